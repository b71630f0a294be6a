//! Server configuration.
//!
//! Three layers, highest precedence first: command-line flags, an optional
//! TOML file (`--config`), built-in defaults. Every TOML key is optional:
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0"
//! port = 8081
//! keep_alive = false
//! max_body_bytes = 1048576
//!
//! [udp]
//! enabled = true
//! port = 8082
//!
//! [storage]
//! sqlite_path = "/var/lib/kodeo-task/tasks.sqlite3"
//!
//! [auth]
//! token_secret = "change-me"
//! token_ttl_hours = 24
//! ```

use crate::auth::DEFAULT_TOKEN_TTL_HOURS;
use crate::http::request::DEFAULT_MAX_BODY_BYTES;
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

pub const DEFAULT_PORT: u16 = 8081;
pub const DEFAULT_UDP_PORT: u16 = 8082;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub keep_alive: bool,
    pub max_body_bytes: usize,
    pub udp_enabled: bool,
    pub udp_port: u16,
    /// `None` keeps everything in memory.
    pub sqlite_path: Option<PathBuf>,
    /// `None` generates a random secret at start-up.
    pub token_secret: Option<String>,
    pub token_ttl_hours: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            keep_alive: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            udp_enabled: true,
            udp_port: DEFAULT_UDP_PORT,
            sqlite_path: None,
            token_secret: None,
            token_ttl_hours: DEFAULT_TOKEN_TTL_HOURS,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw TOML types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    server: Option<RawServerConfig>,
    udp: Option<RawUdpConfig>,
    storage: Option<RawStorageConfig>,
    auth: Option<RawAuthConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawServerConfig {
    bind: Option<String>,
    port: Option<u16>,
    keep_alive: Option<bool>,
    max_body_bytes: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUdpConfig {
    enabled: Option<bool>,
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStorageConfig {
    sqlite_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAuthConfig {
    token_secret: Option<String>,
    token_ttl_hours: Option<u32>,
}

// ---------------------------------------------------------------------------
// TOML loading
// ---------------------------------------------------------------------------

pub fn load_config_from_path(path: &Path) -> Result<Config, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Parse a TOML document and fill every absent key with its default.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut cfg = Config::default();

    if let Some(server) = raw.server {
        if let Some(bind) = server.bind {
            cfg.bind = bind.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("server.bind '{}' is not an IP address", bind))
            })?;
        }
        if let Some(port) = server.port {
            cfg.port = nonzero_port("server.port", port)?;
        }
        if let Some(keep_alive) = server.keep_alive {
            cfg.keep_alive = keep_alive;
        }
        if let Some(max) = server.max_body_bytes {
            if max == 0 {
                return Err(ConfigError::InvalidValue(
                    "server.max_body_bytes must be > 0".to_owned(),
                ));
            }
            cfg.max_body_bytes = max;
        }
    }

    if let Some(udp) = raw.udp {
        if let Some(enabled) = udp.enabled {
            cfg.udp_enabled = enabled;
        }
        if let Some(port) = udp.port {
            cfg.udp_port = nonzero_port("udp.port", port)?;
        }
    }

    if let Some(storage) = raw.storage {
        cfg.sqlite_path = storage
            .sqlite_path
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
    }

    if let Some(auth) = raw.auth {
        cfg.token_secret = auth.token_secret.filter(|s| !s.is_empty());
        if let Some(hours) = auth.token_ttl_hours {
            if hours == 0 {
                return Err(ConfigError::InvalidValue(
                    "auth.token_ttl_hours must be > 0".to_owned(),
                ));
            }
            cfg.token_ttl_hours = hours;
        }
    }

    Ok(cfg)
}

fn nonzero_port(key: &str, port: u16) -> Result<u16, ConfigError> {
    if port == 0 {
        return Err(ConfigError::InvalidValue(format!("{} must be 1-65535", key)));
    }
    Ok(port)
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Values given on the command line. `None`/`false` means "not given".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub config: Option<PathBuf>,
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub udp_port: Option<u16>,
    pub tcp_only: bool,
    pub keep_alive: bool,
    pub db: Option<PathBuf>,
}

fn validate_port_value(value: &str) -> Result<u16, String> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err("Invalid port number".to_owned()),
        Ok(port) => Ok(port),
    }
}

fn validate_ip_value(value: &str) -> Result<IpAddr, String> {
    value.parse().map_err(|_| "Invalid IP address".to_owned())
}

pub fn cli_command() -> Command {
    Command::new("kodeo-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Task tracking server with UDP push notifications")
        .arg(
            Arg::new("port")
                .help("TCP port for the HTTP listener [default: 8081]")
                .short('p')
                .long("port")
                .value_parser(validate_port_value),
        )
        .arg(
            Arg::new("udp_port")
                .help("UDP port for the notification channel [default: 8082]")
                .short('u')
                .long("udp-port")
                .value_parser(validate_port_value),
        )
        .arg(
            Arg::new("tcp_only")
                .help("Disable the UDP notification channel")
                .long("tcp-only")
                .alias("no-udp")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("bind")
                .help("Address to bind both listeners to [default: 0.0.0.0]")
                .long("bind")
                .value_parser(validate_ip_value),
        )
        .arg(
            Arg::new("db")
                .help("SQLite database file (in-memory when omitted)")
                .long("db")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("keep_alive")
                .help("Serve multiple requests per connection")
                .long("keep-alive")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .help("TOML config file")
                .short('c')
                .long("config")
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

impl CliOverrides {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        CliOverrides {
            config: matches.get_one::<PathBuf>("config").cloned(),
            bind: matches.get_one::<IpAddr>("bind").copied(),
            port: matches.get_one::<u16>("port").copied(),
            udp_port: matches.get_one::<u16>("udp_port").copied(),
            tcp_only: matches.get_flag("tcp_only"),
            keep_alive: matches.get_flag("keep_alive"),
            db: matches.get_one::<PathBuf>("db").cloned(),
        }
    }
}

impl Config {
    /// Load the TOML file named by `--config` (if any) and lay the flags on top.
    pub fn resolve(cli: &CliOverrides) -> Result<Config, ConfigError> {
        let base = match &cli.config {
            Some(path) => load_config_from_path(path)?,
            None => Config::default(),
        };
        Ok(base.with_overrides(cli))
    }

    pub fn with_overrides(mut self, cli: &CliOverrides) -> Config {
        if let Some(bind) = cli.bind {
            self.bind = bind;
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(port) = cli.udp_port {
            self.udp_port = port;
        }
        if cli.tcp_only {
            self.udp_enabled = false;
        }
        if cli.keep_alive {
            self.keep_alive = true;
        }
        if let Some(db) = &cli.db {
            self.sqlite_path = Some(db.clone());
        }
        self
    }
}
