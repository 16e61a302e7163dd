use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use miniircd::config::ServerConfig;
use miniircd::server::Server;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("miniircd=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = ServerConfig::parse();

    // A password file wins over --password; its trailing newline is part
    // of the file, not the password.
    if let Some(path) = &config.password_file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read password file {}", path.display()))?;
        config.password = Some(contents.trim_end_matches('\n').to_string());
    }

    // Resolve the MOTD once at startup. An unreadable file becomes a
    // one-line MOTD saying so.
    if let Some(path) = &config.motd_file {
        match std::fs::read_to_string(path) {
            Ok(contents) => config.motd = Some(contents),
            Err(e) => {
                tracing::warn!("Failed to read MOTD file {}: {e}", path.display());
                config.motd = Some(format!("Could not read MOTD file {path:?}."));
            }
        }
    }

    for dir in [&config.log_dir, &config.state_dir].into_iter().flatten() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    tracing::info!(
        server_name = %config.server_name,
        ports = ?config.ports,
        tls = config.tls_enabled(),
        "Starting miniircd"
    );
    Server::new(config).run().await
}
