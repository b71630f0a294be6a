use crate::SubscribeError;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::net::SocketAddr;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_UDP_PORT: u16 = 8082;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub host: String,
    pub udp_port: u16,
    pub users: Vec<i64>,
}

fn validate_port_value(value: &str) -> Result<u16, String> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err("Invalid port number".to_owned()),
        Ok(port) => Ok(port),
    }
}

pub fn cli_command() -> Command {
    Command::new("kodeo-notify")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Subscribe to kodeo-server task notifications over UDP")
        .arg(
            Arg::new("host")
                .help("Server host name or address")
                .long("host")
                .default_value(DEFAULT_HOST),
        )
        .arg(
            Arg::new("udp_port")
                .help("Server UDP notification port [default: 8082]")
                .short('p')
                .long("udp-port")
                .value_parser(validate_port_value),
        )
        .arg(
            Arg::new("user")
                .help("User id to subscribe; repeat to listen for several users")
                .short('u')
                .long("user")
                .required(true)
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(i64)),
        )
}

impl Options {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        Options {
            host: matches
                .get_one::<String>("host")
                .cloned()
                .unwrap_or_else(|| DEFAULT_HOST.to_owned()),
            udp_port: matches
                .get_one::<u16>("udp_port")
                .copied()
                .unwrap_or(DEFAULT_UDP_PORT),
            users: matches
                .get_many::<i64>("user")
                .map(|ids| ids.copied().collect())
                .unwrap_or_default(),
        }
    }
}

/// Resolve `host:port`, preferring IPv4 since the server binds an IPv4
/// wildcard by default.
pub async fn resolve_server(host: &str, port: u16) -> Result<SocketAddr, SubscribeError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port)).await?.collect();
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| SubscribeError::Resolve(format!("{host}:{port}")))
}
