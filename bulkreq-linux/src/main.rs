// bulkreq Linux host: modem link, operator keys, and the request event loop.

mod config;
mod event_loop;
mod keys;
mod modem;

use anyhow::Context;
use bulkreq_core::Controller;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("bulkreq-linux {}", VERSION);
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load();
    let mut core = Controller::new(
        cfg.engine.clone(),
        cfg.request.clone(),
        test_pattern(cfg.payload_len),
    )
    .context("invalid engine configuration")?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (mut link, reader) = modem::open(&cfg.modem_addr).await?;
        core.setup(&mut link)
            .context("modem setup failed, no request can be made")?;

        let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(modem::read_loop(reader, events_tx.clone()));
        tokio::spawn(async move {
            if let Err(e) = keys::read_keys(events_tx).await {
                tracing::warn!(error = %e, "stdin closed");
            }
        });

        tracing::info!(
            payload_len = cfg.payload_len,
            chunk_size = cfg.engine.chunk_size,
            send_slots = cfg.engine.send_slots,
            "ready: enter 1 to make a request, 3 to announce the device"
        );

        tokio::select! {
            res = event_loop::run(core, link, events_rx) => res,
            res = shutdown_signal() => res,
        }
    })
}

/// Outgoing payload: byte i is i mod 256.
fn test_pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i & 0xff) as u8).collect()
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    tracing::info!("shutting down");
    Ok(())
}
