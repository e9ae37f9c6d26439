//! Gubinge CLI entry point: flag parsing, logging setup, the
//! file-descriptor limit raise, and signal-driven graceful shutdown. None of
//! this is part of the core message pipeline — it's the ambient stack that
//! makes the core a runnable service.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use mimalloc::MiMalloc;

use gubinge::config::Config;
use gubinge::pipeline::identity_filter_passthrough;
use gubinge::Listener;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// SSH agent proxy that interposes a per-message policy layer between
/// clients and a real upstream ssh-agent.
#[derive(Parser, Debug)]
#[command(name = "gubinge", version, about)]
struct Cli {
    /// Path to bind the proxy's own socket at. Defaults to
    /// ~/.gubinge/sock-<hostname>.
    #[arg(long)]
    bind: Option<PathBuf>,

    /// Path to the real ssh-agent socket to forward to. Defaults to
    /// $SSH_AUTH_SOCK.
    #[arg(long)]
    upstream: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = gubinge::config::raise_fd_limit() {
        log::warn!("failed to raise file descriptor limit: {e}");
    }

    let cli = Cli::parse();
    let config = Config::resolve(cli.bind, cli.upstream)?;

    let listener = Listener::bind(config.bind_path.clone())?;

    // Printed for the operator to `export SSH_AUTH_SOCK=...`; setting it
    // here only reaches children this process execs itself, which it
    // doesn't.
    println!("{}", config.bind_path.display());
    std::env::set_var("SSH_AUTH_SOCK", &config.bind_path);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    listener
        .serve(config.upstream_path, identity_filter_passthrough(), shutdown_rx)
        .await;

    Ok(())
}

async fn wait_for_shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());
    match sigterm {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => log::info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => log::info!("received SIGTERM, shutting down"),
            }
        }
        Err(e) => {
            log::warn!("failed to install SIGTERM handler: {e}");
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("received SIGINT, shutting down");
            }
        }
    }
    let _ = shutdown_tx.send(true);
}
