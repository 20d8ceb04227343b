//! The single cooperative event loop. Every producer (modem reader, key reader)
//! queues a [`HostEvent`]; only this loop touches the controller.

use tokio::sync::mpsc;

use bulkreq_core::{Controller, Event, Key, ModemEvent, RequestOutcome, Transport};

#[derive(Debug)]
pub enum HostEvent {
    Key(Key),
    Modem(ModemEvent),
    LinkLost,
}

/// Run until the queue closes or the modem link drops.
pub async fn run<T: Transport>(
    mut core: Controller,
    mut transport: T,
    mut events: mpsc::UnboundedReceiver<HostEvent>,
) -> anyhow::Result<()> {
    let mut shown = core.indicator();
    tracing::info!(indicator = ?shown, "status");
    while let Some(ev) = events.recv().await {
        match ev {
            HostEvent::Key(key) => {
                core.handle(Event::Key(key), &mut transport);
            }
            HostEvent::Modem(ModemEvent::DataReceived { ok, data, finished }) => {
                deliver_response(&mut core, &mut transport, ok, &data, finished);
            }
            HostEvent::Modem(ModemEvent::SetupResult { ok }) => {
                tracing::warn!(ok, "unexpected setup result after handshake");
            }
            HostEvent::Modem(other) => {
                if let Some(event) = other.to_event() {
                    if let Some(outcome) = core.handle(event, &mut transport) {
                        report(&core, &outcome);
                    }
                }
            }
            HostEvent::LinkLost => {
                core.handle(Event::Disconnected, &mut transport);
                anyhow::bail!("modem link lost");
            }
        }
        if core.indicator() != shown {
            shown = core.indicator();
            tracing::info!(indicator = ?shown, "status");
        }
    }
    Ok(())
}

/// Feed modem response bytes through the controller one response unit at a time.
/// Only the last piece carries `finished`.
pub fn deliver_response<T: Transport>(
    core: &mut Controller,
    transport: &mut T,
    ok: bool,
    data: &[u8],
    finished: bool,
) {
    if !ok || data.is_empty() {
        core.handle(
            Event::DataReceived {
                success: ok,
                len: 0,
                finished,
            },
            transport,
        );
        return;
    }
    let unit = core.descriptor().response_unit_size;
    let pieces = data.len().div_ceil(unit);
    for (i, piece) in data.chunks(unit).enumerate() {
        let Some(buf) = core.receive_buffer(piece.len()) else {
            tracing::debug!(len = piece.len(), "response bytes outside an armed receive, dropping");
            return;
        };
        buf[..piece.len()].copy_from_slice(piece);
        core.handle(
            Event::DataReceived {
                success: true,
                len: piece.len(),
                finished: finished && i + 1 == pieces,
            },
            transport,
        );
    }
}

fn report(core: &Controller, outcome: &RequestOutcome) {
    let preview = String::from_utf8_lossy(core.session().receive().preview());
    if outcome.is_success() {
        tracing::info!(
            sent = outcome.bytes_acknowledged,
            received = outcome.bytes_received,
            response = %preview,
            "request complete"
        );
    } else {
        tracing::error!(
            status = %outcome.status,
            sent = outcome.bytes_acknowledged,
            local_failures = outcome.local_failures.len(),
            "request failed"
        );
    }
}
