#[macro_use]
extern crate tracing;

mod config;

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use ironkdc_as::Kdc;
use ironkdc_crypto::PickyCrypto;
use ironkdc_hdb::MemoryHdb;
use ironkdc_server::{KdcServer, ServerConfig};
use tokio::runtime;
use tokio_util::sync::CancellationToken;

use crate::config::Config;

fn main() -> anyhow::Result<()> {
    let config = Config::parse_args().context("CLI arguments parsing")?;

    if config.check_config {
        let rendered = toml::to_string_pretty(&config.server).context("render configuration")?;
        std::io::stdout()
            .lock()
            .write_all(rendered.as_bytes())
            .context("write configuration")?;
        return Ok(());
    }

    setup_logging(config.log_file.as_deref()).context("unable to initialize logging")?;

    let rt = runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("unable to create tokio runtime")?;

    rt.block_on(serve(config.server))
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let crypto = PickyCrypto::new();

    let hdb = MemoryHdb::load(&config.database, &crypto)
        .with_context(|| format!("couldn't load principal database {}", config.database.display()))?;

    let kdc = Kdc::new(config.kdc_config(), Arc::new(hdb), Arc::new(crypto));

    let server = KdcServer::bind(config, kdc).context("unable to bind any socket")?;

    let shutdown = CancellationToken::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    server.run(shutdown).await.context("server failure")?;

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(error) => {
            warn!(%error, "Unable to listen for SIGTERM");
            wait_for_ctrl_c(shutdown).await;
            return;
        }
    };

    tokio::select! {
        () = wait_for_ctrl_c(shutdown.clone()) => {}
        _ = terminate.recv() => {
            info!("SIGTERM received");
            shutdown.cancel();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal(shutdown: CancellationToken) {
    wait_for_ctrl_c(shutdown).await;
}

async fn wait_for_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("SIGINT received"),
        Err(error) => error!(%error, "Unable to listen for SIGINT"),
    }

    shutdown.cancel();
}

fn setup_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    use std::fs::OpenOptions;

    use tracing::metadata::LevelFilter;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let writer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("couldn't open {}", path.display()))?;
            BoxMakeWriter::new(file)
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_ansi(false)
        .with_writer(writer);

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var("IRONKDC_LOG")
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .context("failed to set tracing global subscriber")?;

    Ok(())
}
