use kodeo_notify::cli::{Options, cli_command, resolve_server};
use kodeo_notify::{Subscriber, describe};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let matches = cli_command().get_matches();
    let opts = Options::from_matches(&matches);

    let server = match resolve_server(&opts.host, opts.udp_port).await {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "cannot resolve server");
            std::process::exit(1);
        }
    };
    let mut subscriber = match Subscriber::connect(server).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot open UDP socket");
            std::process::exit(1);
        }
    };

    for &user_id in &opts.users {
        if let Err(e) = subscriber.register(user_id).await {
            error!(user_id, error = %e, "registration failed");
            subscriber.unregister_all().await;
            std::process::exit(1);
        }
        info!(user_id, server = %server, "registered for notifications");
    }

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    error!(error = %e, "waiting for ctrl-c failed");
                }
                break;
            }
            event = subscriber.next_event() => match event {
                Ok(event) => info!(
                    event_type = %event.event_type,
                    users = ?subscriber.users(),
                    "{}",
                    describe(&event)
                ),
                Err(e) => {
                    error!(error = %e, "receive failed");
                    break;
                }
            },
        }
    }

    let confirmed = subscriber.unregister_all().await;
    info!(confirmed, "unregistered, exiting");
}
