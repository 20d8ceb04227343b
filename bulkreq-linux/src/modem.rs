//! Modem link: framed TCP connection to the modem, setup handshake, reader and writer tasks.

use anyhow::{bail, Context};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use bulkreq_core::wire::{self, LEN_SIZE};
use bulkreq_core::{
    ModemCommand, ModemEvent, RequestDescriptor, SlotToken, Transport, TransportError,
    LINK_VERSION,
};

use crate::event_loop::HostEvent;

/// Command side of the modem link. Commands are queued to the writer task.
pub struct ModemLink {
    tx: mpsc::UnboundedSender<ModemCommand>,
    setup_ok: bool,
}

impl ModemLink {
    fn command(&self, cmd: ModemCommand) -> Result<(), TransportError> {
        self.tx.send(cmd).map_err(|_| TransportError::LinkClosed)
    }
}

impl Transport for ModemLink {
    fn setup(&mut self) -> Result<(), TransportError> {
        if self.setup_ok {
            Ok(())
        } else {
            Err(TransportError::SetupFailed)
        }
    }

    fn initiate_connection(&mut self) -> Result<(), TransportError> {
        self.command(ModemCommand::Initiate)
    }

    fn terminate_connection(&mut self) -> Result<(), TransportError> {
        self.command(ModemCommand::Terminate)
    }

    fn announce(&mut self) -> Result<(), TransportError> {
        self.command(ModemCommand::Announce)
    }

    fn submit_request(&mut self, request: &RequestDescriptor) -> Result<(), TransportError> {
        self.command(ModemCommand::Submit(request.clone()))
    }

    fn send_chunk(
        &mut self,
        token: SlotToken,
        data: &[u8],
        is_last: bool,
    ) -> Result<(), TransportError> {
        self.command(ModemCommand::SendData {
            token: token.to_raw(),
            data: data.to_vec(),
            finished: is_last,
        })
    }

    fn arm_receive(&mut self, response_unit_size: usize) -> Result<(), TransportError> {
        let unit_size = u32::try_from(response_unit_size)
            .map_err(|_| TransportError::Rejected("response unit too large".into()))?;
        self.command(ModemCommand::ArmReceive { unit_size })
    }

    fn cleanup_request(&mut self) -> Result<(), TransportError> {
        self.command(ModemCommand::Cleanup)
    }
}

/// Connect to the modem and run the setup handshake. The writer task is spawned here;
/// the returned read half goes to [`read_loop`].
pub async fn open(addr: &str) -> anyhow::Result<(ModemLink, OwnedReadHalf)> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to modem at {addr}"))?;
    let (mut reader, mut writer) = stream.into_split();
    write_frame(
        &mut writer,
        &ModemCommand::Setup {
            version: LINK_VERSION,
        },
    )
    .await?;
    let setup_ok = match read_frame::<_, ModemEvent>(&mut reader).await? {
        ModemEvent::SetupResult { ok } => ok,
        other => bail!("unexpected modem event during setup: {other:?}"),
    };
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(writer, rx));
    tracing::info!(%addr, setup_ok, "modem link open");
    Ok((ModemLink { tx, setup_ok }, reader))
}

/// Forward modem events to the event queue until the link drops.
pub async fn read_loop(mut reader: OwnedReadHalf, events: mpsc::UnboundedSender<HostEvent>) {
    loop {
        match read_frame::<_, ModemEvent>(&mut reader).await {
            Ok(ev) => {
                if events.send(HostEvent::Modem(ev)).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "modem link read failed");
                let _ = events.send(HostEvent::LinkLost);
                return;
            }
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<ModemCommand>) {
    while let Some(cmd) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &cmd).await {
            tracing::warn!(error = %e, "modem link write failed");
            break;
        }
    }
}

pub async fn read_frame<R, T>(reader: &mut R) -> anyhow::Result<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; LEN_SIZE];
    reader.read_exact(&mut header).await?;
    let len = wire::frame_body_len(header)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(wire::decode_body(&body)?)
}

pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = wire::encode_frame(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
