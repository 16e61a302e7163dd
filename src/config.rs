//! Server configuration, parsed from the command line as a flat struct.

use std::path::PathBuf;

use clap::Parser;

/// A small single-server IRC daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "miniircd", version)]
pub struct ServerConfig {
    /// Ports to listen on, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "6667")]
    pub ports: Vec<u16>,

    /// Address to bind. Defaults to all interfaces.
    #[arg(long)]
    pub listen: Option<String>,

    /// Listen on IPv6 instead of IPv4.
    #[arg(long)]
    pub ipv6: bool,

    /// Name the server presents in prefixes and the greeting.
    #[arg(long, default_value = "localhost")]
    pub server_name: String,

    /// Connection password required before registration.
    #[arg(long)]
    pub password: Option<String>,

    /// Read the connection password from a file. Takes precedence over
    /// --password; a trailing newline is stripped.
    #[arg(long)]
    pub password_file: Option<PathBuf>,

    /// Hostname shown in place of the client's real host.
    #[arg(long)]
    pub cloak: Option<String>,

    /// Path to the message-of-the-day file.
    #[arg(long)]
    pub motd_file: Option<PathBuf>,

    /// Resolved MOTD contents. Filled in from --motd-file at startup.
    #[arg(skip)]
    pub motd: Option<String>,

    /// Directory for per-channel transcript logs.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Directory for persisted channel state (topic and key).
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// TLS certificate chain in PEM format.
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key in PEM format.
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,
}

impl ServerConfig {
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    /// The bind address for one listening port.
    pub fn bind_addr(&self, port: u16) -> String {
        match &self.listen {
            Some(addr) if addr.contains(':') => format!("[{addr}]:{port}"),
            Some(addr) => format!("{addr}:{port}"),
            None if self.ipv6 => format!("[::]:{port}"),
            None => format!("0.0.0.0:{port}"),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ports: vec![6667],
            listen: None,
            ipv6: false,
            server_name: "localhost".into(),
            password: None,
            password_file: None,
            cloak: None,
            motd_file: None,
            motd: None,
            log_dir: None,
            state_dir: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_variants() {
        let mut config = ServerConfig::default();
        assert_eq!(config.bind_addr(6667), "0.0.0.0:6667");
        config.ipv6 = true;
        assert_eq!(config.bind_addr(6667), "[::]:6667");
        config.listen = Some("127.0.0.1".into());
        assert_eq!(config.bind_addr(6697), "127.0.0.1:6697");
        config.listen = Some("::1".into());
        assert_eq!(config.bind_addr(6697), "[::1]:6697");
    }
}
