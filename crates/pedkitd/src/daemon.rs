//! Daemon lifecycle: store and KEK, PED, links, Ctrl-C shutdown

use anyhow::{bail, Context, Result};
use pedkit_core::config::{PedConfig, PedVendor, PedkitConfig};
use pedkit_dispatch::{Dispatcher, LinkSession};
use pedkit_ped::{Ped, SimulatedPed};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::services;

pub async fn run(
    config: PedkitConfig,
    device: Option<PathBuf>,
    listen: Option<String>,
) -> Result<()> {
    info!("daemon starting");

    let mut link = config.link.clone();
    if device.is_some() {
        link.device = device;
    }
    if listen.is_some() {
        link.listen = listen;
    }
    if link.device.is_none() && link.listen.is_none() {
        bail!("nothing to serve: set link.device or link.listen (or pass --device / --listen)");
    }

    // ── Store and KEK ────────────────────────────────────────────────────
    let services = services::open(&config)?;
    match services.kek.status() {
        Ok(status) => info!(
            active_kek = ?status.pointer,
            wraps = status.wraps,
            sealed = status.sealed_records,
            plain = status.plain_records,
            "KEK status"
        ),
        Err(e) => warn!("KEK status unavailable: {e}"),
    }
    if config.store.migrate_on_start {
        services::migrate(&services.store)?;
    }

    // ── PED ──────────────────────────────────────────────────────────────
    let ped = open_ped(&config.ped)?;
    let dispatcher = Arc::new(Dispatcher::with_ped(ped, services.store.clone(), link.clone()));

    // ── Links ────────────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    if let Some(path) = &link.device {
        let port = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
            .with_context(|| format!("opening serial device: {}", path.display()))?;
        info!(device = %path.display(), "serial link: open");
        let session = LinkSession::new(path.display().to_string(), dispatcher.clone());
        let cancel = cancel.clone();
        tasks.spawn(async move {
            if let Err(e) = session.run(port, cancel).await {
                error!("serial link failed: {e}");
            }
        });
    }

    if let Some(addr) = &link.listen {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        info!(addr = %addr, "TCP link: listening");
        tasks.spawn(accept_loop(listener, dispatcher.clone(), cancel.clone()));
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("shutdown requested");
    cancel.cancel();

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!("link task ended abnormally: {e}");
        }
    }
    services
        .store
        .flush()
        .context("flushing key store on shutdown")?;
    info!("daemon stopped");
    Ok(())
}

fn open_ped(config: &PedConfig) -> Result<SimulatedPed> {
    match config.vendor {
        PedVendor::Simulated => {
            warn!("using the simulated PED: keys live in process memory only");
            Ok(SimulatedPed::default().with_max_slot(config.max_slot))
        }
        other => bail!("no in-tree adapter for PED vendor {other:?}; use vendor = \"simulated\""),
    }
}

/// One [`LinkSession`] per bench injector connection.
async fn accept_loop<P>(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher<P>>,
    cancel: CancellationToken,
) where
    P: Ped + 'static,
{
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("TCP link: accept failed: {e}");
                    continue;
                }
            },
        };
        info!(peer = %peer, "TCP link: injector connected");
        let session = LinkSession::new(peer.to_string(), dispatcher.clone());
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = session.run(stream, cancel).await {
                warn!(peer = %peer, "TCP link failed: {e}");
            }
        });
    }
}

