use kodeo_server::config::{
    CliOverrides, Config, ConfigError, cli_command, load_config_from_path,
};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn write_toml(content: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f
}

#[test]
fn full_file_is_loaded() {
    let f = write_toml(
        r#"
[server]
bind = "127.0.0.1"
port = 9081
keep_alive = true
max_body_bytes = 4096

[udp]
enabled = false
port = 9082

[storage]
sqlite_path = "/var/lib/kodeo-task/tasks.sqlite3"

[auth]
token_secret = "s3cret"
token_ttl_hours = 12
"#,
    );
    let cfg = load_config_from_path(f.path()).unwrap();
    assert_eq!(cfg.bind, IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!(cfg.port, 9081);
    assert!(cfg.keep_alive);
    assert_eq!(cfg.max_body_bytes, 4096);
    assert!(!cfg.udp_enabled);
    assert_eq!(cfg.udp_port, 9082);
    assert_eq!(
        cfg.sqlite_path,
        Some(PathBuf::from("/var/lib/kodeo-task/tasks.sqlite3"))
    );
    assert_eq!(cfg.token_secret.as_deref(), Some("s3cret"));
    assert_eq!(cfg.token_ttl_hours, 12);
}

#[test]
fn partial_file_keeps_defaults() {
    let f = write_toml("[udp]\nport = 9999\n");
    let cfg = load_config_from_path(f.path()).unwrap();
    assert_eq!(cfg.udp_port, 9999);
    assert_eq!(cfg.port, Config::default().port);
    assert!(cfg.udp_enabled);
    assert!(cfg.sqlite_path.is_none());
}

#[test]
fn missing_file_is_io_error() {
    let err = load_config_from_path(std::path::Path::new("/definitely/not/here.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)), "got {err:?}");
}

#[test]
fn malformed_toml_is_parse_error() {
    let f = write_toml("[server\nport = ");
    assert!(matches!(
        load_config_from_path(f.path()),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn resolve_layers_cli_over_file() {
    let f = write_toml("[server]\nport = 7000\nkeep_alive = false\n[udp]\nenabled = true\n");
    let path = f.path().to_str().unwrap();
    let matches = cli_command()
        .try_get_matches_from(["kodeo-server", "--config", path, "--keep-alive", "--tcp-only"])
        .unwrap();
    let cfg = Config::resolve(&CliOverrides::from_matches(&matches)).unwrap();
    assert_eq!(cfg.port, 7000);
    assert!(cfg.keep_alive);
    assert!(!cfg.udp_enabled);
}

#[test]
fn resolve_without_config_uses_defaults() {
    let cfg = Config::resolve(&CliOverrides::default()).unwrap();
    assert_eq!(cfg, Config::default());
}
