//! Task-tracking server: a hand-built HTTP/1.1 subset over TCP plus a UDP
//! channel that pushes task notifications to registered clients.

pub mod acceptor;
pub mod auth;
pub mod config;
pub mod db;
pub mod http;
pub mod notify;
pub mod router;
pub mod tasks;

use acceptor::{ConnectionOptions, run_acceptor};
use auth::TokenAuthenticator;
use config::Config;
use db::{Db, DbError};
use notify::{Dispatcher, Registry, run_listener};
use router::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tasks::SqliteTaskService;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("database: {0}")]
    Db(#[from] DbError),
    #[error("bind {what} {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// A running server. Dropping it leaves the tasks running; call
/// [`ServerHandle::shutdown`] to stop them.
pub struct ServerHandle {
    pub tcp_addr: SocketAddr,
    /// `None` when the UDP side is disabled.
    pub udp_addr: Option<SocketAddr>,
    pub registry: Registry,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ServerHandle {
    /// Signal both loops to stop and wait for them. Connections already in
    /// flight finish on their own.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("server stopped");
    }
}

/// Open storage, bind the listeners and spawn the accept and receive loops.
pub async fn start(config: &Config) -> Result<ServerHandle, StartError> {
    let db = Arc::new(match &config.sqlite_path {
        Some(path) => Db::open(path)?,
        None => Db::open_in_memory()?,
    });
    let ttl = chrono::Duration::hours(i64::from(config.token_ttl_hours));
    let auth = Arc::new(match &config.token_secret {
        Some(secret) => TokenAuthenticator::new(db.clone(), secret.as_bytes(), ttl),
        None => TokenAuthenticator::with_random_secret(db.clone(), ttl),
    });
    let tasks = Arc::new(SqliteTaskService::new(db.clone()));
    start_with(config, auth, db, tasks).await
}

/// Like [`start`], with caller-supplied collaborators.
pub async fn start_with(
    config: &Config,
    auth: Arc<dyn auth::Authenticator>,
    users: Arc<dyn auth::UserDirectory>,
    tasks: Arc<dyn tasks::TaskService>,
) -> Result<ServerHandle, StartError> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let registry = Registry::new();
    let mut handles = Vec::new();

    let mut udp_addr = None;
    let mut dispatcher = None;
    if config.udp_enabled {
        let addr = SocketAddr::new(config.bind, config.udp_port);
        let socket = UdpSocket::bind(addr).await.map_err(|source| StartError::Bind {
            what: "udp",
            addr,
            source,
        })?;
        let socket = Arc::new(socket);
        let local = socket.local_addr().unwrap_or(addr);
        info!(addr = %local, "udp notification listener bound");
        udp_addr = Some(local);
        dispatcher = Some(Dispatcher::new(registry.clone(), socket.clone()));
        handles.push(tokio::spawn(run_listener(
            socket,
            registry.clone(),
            shutdown_rx.clone(),
        )));
    } else {
        info!("udp notifications disabled");
    }

    let addr = SocketAddr::new(config.bind, config.port);
    let listener = TcpListener::bind(addr).await.map_err(|source| StartError::Bind {
        what: "tcp",
        addr,
        source,
    })?;
    let tcp_addr = listener.local_addr().unwrap_or(addr);
    info!(addr = %tcp_addr, keep_alive = config.keep_alive, "http listener bound");

    let router = Arc::new(Router::new(auth, users, tasks, dispatcher));
    let options = ConnectionOptions {
        keep_alive: config.keep_alive,
        max_body_bytes: config.max_body_bytes,
    };
    handles.push(tokio::spawn(run_acceptor(
        listener,
        router,
        options,
        shutdown_rx,
    )));

    Ok(ServerHandle {
        tcp_addr,
        udp_addr,
        registry,
        shutdown: shutdown_tx,
        tasks: handles,
    })
}
