use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, trace};

use super::stats::TransferStats;
use crate::constants::KEEPALIVE_INTERVAL;
use crate::peer::{
    Bitfield, ExtensionHandshake, FrameReader, FrameWriter, Message, PeerConnection, PeerError,
    PeerId, EXTENSION_HANDSHAKE_ID,
};
use crate::scheduler::{PeerCommand, PeerEvent};

/// Everything a peer worker needs from the session.
pub(super) struct WorkerContext {
    pub info_hash: [u8; 20],
    pub peer_id: PeerId,
    pub piece_count: usize,
    pub max_frame: usize,
    pub events: mpsc::Sender<PeerEvent>,
    pub stats: Arc<TransferStats>,
    pub failed: Arc<DashMap<SocketAddr, Instant>>,
    pub shutdown: watch::Receiver<bool>,
}

/// One task per peer: dials, handshakes, then shuttles messages to the
/// scheduler and commands back onto the wire until either side is done.
/// Returns the address so the session can retire it from the active
/// set.
pub(super) async fn run_peer(addr: SocketAddr, ctx: WorkerContext) -> SocketAddr {
    match connect_and_drive(addr, ctx).await {
        Ok(()) => debug!(peer = %addr, "peer finished"),
        Err(e) => debug!(peer = %addr, error = %e, "peer failed"),
    }
    addr
}

async fn connect_and_drive(addr: SocketAddr, mut ctx: WorkerContext) -> Result<(), PeerError> {
    let mut connection = match PeerConnection::connect(addr, ctx.info_hash, ctx.peer_id).await {
        Ok(connection) => connection,
        Err(e) => {
            ctx.failed.insert(addr, Instant::now());
            return Err(e);
        }
    };

    connection.set_max_frame_len(ctx.max_frame);

    // Advertise our extensions when the peer speaks BEP-10. Not needed
    // for the download itself, but it lets the swarm know we answer
    // extension handshakes.
    if connection.supports_extensions {
        connection
            .send(&Message::Extended {
                id: EXTENSION_HANDSHAKE_ID,
                payload: ExtensionHandshake::ours().encode(),
            })
            .await?;
    }

    let (commands_tx, commands_rx) = mpsc::channel(256);
    if ctx
        .events
        .send(PeerEvent::Connected {
            key: addr,
            commands: commands_tx,
        })
        .await
        .is_err()
    {
        // Scheduler already gone; nothing to do.
        return Ok(());
    }

    ctx.stats.peer_connected();
    let (reader, writer) = connection.into_split();

    let result = drive(addr, &mut ctx, reader, writer, commands_rx).await;

    ctx.stats.peer_gone();
    ctx.failed.insert(addr, Instant::now());
    let _ = ctx.events.send(PeerEvent::Disconnected { key: addr }).await;

    result
}

async fn drive(
    addr: SocketAddr,
    ctx: &mut WorkerContext,
    mut reader: FrameReader,
    mut writer: FrameWriter,
    mut commands: mpsc::Receiver<PeerCommand>,
) -> Result<(), PeerError> {
    let mut keepalive = interval_at(
        tokio::time::Instant::now() + KEEPALIVE_INTERVAL,
        KEEPALIVE_INTERVAL,
    );
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // BITFIELD is only legal as the very first message.
    let mut saw_message = false;

    loop {
        tokio::select! {
            message = reader.receive() => {
                let message = message?;
                let first = !saw_message;
                if !matches!(message, Message::KeepAlive) {
                    saw_message = true;
                }
                if !handle_message(addr, ctx, message, first).await? {
                    return Ok(());
                }
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    // Scheduler dropped us; close quietly.
                    return Ok(());
                };
                if !handle_command(&mut writer, command).await? {
                    return Ok(());
                }
            }
            _ = keepalive.tick() => {
                writer.send(&Message::KeepAlive).await?;
            }
            _ = ctx.shutdown.changed() => {
                return Ok(());
            }
        }
    }
}

/// Processes one incoming message; `Ok(false)` ends the connection.
async fn handle_message(
    addr: SocketAddr,
    ctx: &WorkerContext,
    message: Message,
    first: bool,
) -> Result<bool, PeerError> {
    match message {
        Message::KeepAlive => {}
        Message::Choke => {
            forward(ctx, PeerEvent::Choked { key: addr }).await?;
        }
        Message::Unchoke => {
            forward(ctx, PeerEvent::Unchoked { key: addr }).await?;
        }
        // The peer's interest in us is noted and ignored: a one-shot
        // leecher never unchokes anyone.
        Message::Interested | Message::NotInterested => {}
        Message::Have { piece } => {
            if piece as usize >= ctx.piece_count {
                return Err(PeerError::Protocol(format!("have for piece {}", piece)));
            }
            forward(ctx, PeerEvent::Have { key: addr, piece }).await?;
        }
        Message::Bitfield(payload) => {
            if !first {
                return Err(PeerError::Protocol("bitfield after first message".into()));
            }
            let bitfield = Bitfield::parse(&payload, ctx.piece_count)?;
            forward(ctx, PeerEvent::Bitfield { key: addr, bitfield }).await?;
        }
        // We keep every peer choked, so any REQUEST is premature and
        // ignored per the protocol.
        Message::Request { .. } | Message::Cancel { .. } => {
            trace!(peer = %addr, "ignoring request from peer");
        }
        Message::Piece { index, begin, data } => {
            forward(
                ctx,
                PeerEvent::Block {
                    key: addr,
                    piece: index,
                    begin,
                    data,
                },
            )
            .await?;
        }
        Message::Extended { id, payload } => {
            if id == EXTENSION_HANDSHAKE_ID {
                // Recorded for the log only; the download path has no
                // further use for the peer's extension map.
                match ExtensionHandshake::decode(&payload) {
                    Ok(handshake) => {
                        trace!(peer = %addr, client = ?handshake.client, "extension handshake")
                    }
                    Err(e) => debug!(peer = %addr, error = %e, "bad extension handshake"),
                }
            }
        }
    }

    Ok(true)
}

async fn forward(ctx: &WorkerContext, event: PeerEvent) -> Result<(), PeerError> {
    ctx.events
        .send(event)
        .await
        .map_err(|_| PeerError::ConnectionClosed)
}

/// Executes one scheduler command; `Ok(false)` ends the connection.
async fn handle_command(writer: &mut FrameWriter, command: PeerCommand) -> Result<bool, PeerError> {
    match command {
        PeerCommand::Request(requests) => {
            for request in requests {
                writer
                    .send(&Message::Request {
                        index: request.piece,
                        begin: request.begin,
                        length: request.length,
                    })
                    .await?;
            }
        }
        PeerCommand::Cancel(request) => {
            writer
                .send(&Message::Cancel {
                    index: request.piece,
                    begin: request.begin,
                    length: request.length,
                })
                .await?;
        }
        PeerCommand::Have(piece) => {
            writer.send(&Message::Have { piece }).await?;
        }
        PeerCommand::SetInterested(true) => {
            writer.send(&Message::Interested).await?;
        }
        PeerCommand::SetInterested(false) => {
            writer.send(&Message::NotInterested).await?;
        }
        PeerCommand::Disconnect => return Ok(false),
    }

    Ok(true)
}
