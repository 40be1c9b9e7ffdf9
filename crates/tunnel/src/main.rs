//! Shellpipe entry point.

use anyhow::{Context, Result};
use clap::Parser;

use tunnel::cert;
use tunnel::config::{Cli, Config};
use tunnel::session::SessionManager;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;

    // The terminal is the data path, so logs go to a file. The
    // non-blocking writer's guard must outlive the session to flush on
    // exit.
    let log_dir = config.log_file.parent().filter(|p| !p.as_os_str().is_empty());
    let file_name = config
        .log_file
        .file_name()
        .context("log file path has no file name")?;
    let appender = tracing_appender::rolling::never(
        log_dir.unwrap_or_else(|| std::path::Path::new(".")),
        file_name,
    );
    let (writer, _guard) = tracing_appender::non_blocking(appender);
    let filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();

    tracing::info!(mode = ?config.peer_mode, port = config.port, "shellpipe starting");

    if config.auto_cert {
        let cert_path = config.cert.as_ref().context("auto-cert without a path")?;
        let key_path = config.key.as_ref().context("auto-cert without a path")?;
        cert::ensure_self_signed(cert_path, key_path, config.key_type)?;
    }

    let manager = SessionManager::new(config);
    manager.run().await
}
