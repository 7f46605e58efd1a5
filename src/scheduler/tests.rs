use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::*;
use crate::peer::Bitfield;
use crate::session::TransferStats;
use crate::storage::PieceWrite;
use crate::EngineError;

fn sha1_of(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[test]
fn test_block_math() {
    assert_eq!(block_count(32768, 16384), 2);
    assert_eq!(block_count(32769, 16384), 3);
    assert_eq!(block_count(1, 16384), 1);

    assert_eq!(block_length(32768, 16384, 0), 16384);
    assert_eq!(block_length(40000, 16384, 32768), 40000 - 32768);
}

#[test]
fn test_assembly_accepts_blocks_in_any_order() {
    // A 32 KiB piece from two 16 KiB blocks, delivered back to front.
    let first: Vec<u8> = (0..16384u32).map(|i| (i % 251) as u8).collect();
    let second: Vec<u8> = (0..16384u32).map(|i| (i % 241) as u8).collect();
    let mut whole = first.clone();
    whole.extend_from_slice(&second);
    let expected = sha1_of(&whole);

    let mut assembly = PieceAssembly::new(32768, 16384);
    assert_eq!(assembly.insert(16384, &second), Ok(false));
    assert_eq!(assembly.insert(0, &first), Ok(true));

    assert!(assembly.verify(&expected));
    assert_eq!(assembly.into_bytes().as_ref(), whole.as_slice());
}

#[test]
fn test_assembly_detects_corruption() {
    let first: Vec<u8> = vec![7; 16384];
    let second: Vec<u8> = vec![9; 16384];
    let mut whole = first.clone();
    whole.extend_from_slice(&second);
    let expected = sha1_of(&whole);

    let mut corrupted = second.clone();
    corrupted[100] ^= 0xFF;

    let mut assembly = PieceAssembly::new(32768, 16384);
    assembly.insert(0, &first).unwrap();
    assembly.insert(16384, &corrupted).unwrap();

    assert!(assembly.is_complete());
    assert!(!assembly.verify(&expected));
}

#[test]
fn test_assembly_rejects_bad_blocks() {
    let mut assembly = PieceAssembly::new(100, 16);

    // The short final piece still splits into 16-byte blocks plus a
    // 4-byte tail.
    assert_eq!(assembly.block_count(), 7);

    assert_eq!(assembly.insert(3, &[0; 16]), Err(BlockRejected::OutOfRange));
    assert_eq!(
        assembly.insert(112, &[0; 16]),
        Err(BlockRejected::OutOfRange)
    );
    assert_eq!(
        assembly.insert(0, &[0; 15]),
        Err(BlockRejected::WrongLength)
    );
    assert_eq!(
        assembly.insert(96, &[0; 16]),
        Err(BlockRejected::WrongLength)
    );

    assert_eq!(assembly.insert(96, &[1; 4]), Ok(false));
    assert_eq!(assembly.insert(96, &[2; 4]), Err(BlockRejected::Duplicate));
    assert!(assembly.has_block(96));
}

fn bitfield_with(pieces: &[usize], piece_count: usize) -> Bitfield {
    let mut bitfield = Bitfield::new(piece_count);
    for &piece in pieces {
        bitfield.set_piece(piece);
    }
    bitfield
}

#[test]
fn test_picker_rarest_first() {
    // Peers claim {0,1}, {1,2}, {2}: piece 0 has availability 1,
    // pieces 1 and 2 have availability 2.
    let peer_a = bitfield_with(&[0, 1], 3);
    let peer_b = bitfield_with(&[1, 2], 3);
    let peer_c = bitfield_with(&[2], 3);

    let mut picker = PiecePicker::new(3);
    picker.add_bitfield(&peer_a);
    picker.add_bitfield(&peer_b);
    picker.add_bitfield(&peer_c);

    assert_eq!(picker.availability(0), 1);
    assert_eq!(picker.availability(1), 2);
    assert_eq!(picker.availability(2), 2);

    // Peer A gets the rarest piece it has.
    assert_eq!(picker.pick(&peer_a, 8), Some(0));
    picker.assign(0);

    // Peer B ties between 1 and 2; the lower index wins.
    assert_eq!(picker.pick(&peer_b, 8), Some(1));
    picker.assign(1);

    assert_eq!(picker.pick(&peer_c, 8), Some(2));
    picker.assign(2);

    // Everything assigned: peer A can only double up on piece 1.
    assert_eq!(picker.pick(&peer_a, 8), Some(1));
}

#[test]
fn test_picker_saturation_and_completion() {
    let everything = bitfield_with(&[0], 1);

    let mut picker = PiecePicker::new(1);
    picker.add_bitfield(&everything);

    assert_eq!(picker.pick(&everything, 2), Some(0));
    picker.assign(0);

    // A second peer may join the in-flight piece near the tail.
    assert_eq!(picker.pick(&everything, 2), Some(0));
    picker.assign(0);

    // Saturated now.
    assert_eq!(picker.pick(&everything, 2), None);

    picker.mark_complete(0);
    assert!(picker.is_done());
    assert_eq!(picker.pick(&everything, 2), None);
}

#[test]
fn test_picker_availability_lifecycle() {
    let bitfield = bitfield_with(&[0, 2], 3);

    let mut picker = PiecePicker::new(3);
    picker.add_bitfield(&bitfield);
    picker.add_have(1);
    assert_eq!(picker.availability(1), 1);

    assert!(picker.wants_any(&bitfield));

    picker.remove_bitfield(&bitfield);
    assert_eq!(picker.availability(0), 0);
    assert_eq!(picker.availability(2), 0);

    picker.mark_complete(0);
    picker.mark_complete(2);
    assert!(!picker.wants_any(&bitfield));
}

const PIECE_LEN: usize = 32768;

fn peer_key() -> PeerKey {
    "10.0.0.1:6881".parse().unwrap()
}

/// Boots a scheduler over two 32 KiB pieces with one connected,
/// fully-seeded, unchoked peer, and returns the driving channels.
async fn scheduler_with_one_peer(
    content: &[u8],
) -> (
    mpsc::Sender<PeerEvent>,
    mpsc::Receiver<PeerCommand>,
    mpsc::Receiver<PieceWrite>,
    JoinHandle<Result<(), EngineError>>,
) {
    let hashes = vec![
        sha1_of(&content[..PIECE_LEN]),
        sha1_of(&content[PIECE_LEN..]),
    ];

    let (events_tx, events_rx) = mpsc::channel(64);
    let (storage_tx, storage_rx) = mpsc::channel(8);

    let scheduler = Scheduler::new(
        hashes,
        PIECE_LEN as u64,
        content.len() as u64,
        16384,
        64,
        8,
        events_rx,
        storage_tx,
        Arc::new(TransferStats::new()),
    );
    let run = tokio::spawn(scheduler.run());

    let (commands_tx, mut commands_rx) = mpsc::channel(64);
    let key = peer_key();

    events_tx
        .send(PeerEvent::Connected {
            key,
            commands: commands_tx,
        })
        .await
        .unwrap();
    events_tx
        .send(PeerEvent::Bitfield {
            key,
            bitfield: bitfield_with(&[0, 1], 2),
        })
        .await
        .unwrap();

    // The peer has pieces we need: interest comes before any request.
    match recv_command(&mut commands_rx).await {
        PeerCommand::SetInterested(true) => {}
        other => panic!("expected SetInterested(true), got {:?}", other),
    }

    events_tx.send(PeerEvent::Unchoked { key }).await.unwrap();

    (events_tx, commands_rx, storage_rx, run)
}

async fn recv_command(commands: &mut mpsc::Receiver<PeerCommand>) -> PeerCommand {
    tokio::time::timeout(Duration::from_secs(5), commands.recv())
        .await
        .expect("command timeout")
        .expect("command channel closed")
}

async fn recv_write(storage: &mut mpsc::Receiver<PieceWrite>) -> PieceWrite {
    tokio::time::timeout(Duration::from_secs(5), storage.recv())
        .await
        .expect("storage timeout")
        .expect("storage channel closed")
}

async fn send_block(events: &mpsc::Sender<PeerEvent>, content: &[u8], request: BlockRequest) {
    let start = request.piece as usize * PIECE_LEN + request.begin as usize;
    events
        .send(PeerEvent::Block {
            key: peer_key(),
            piece: request.piece,
            begin: request.begin,
            data: Bytes::copy_from_slice(&content[start..start + request.length as usize]),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_scheduler_end_to_end() {
    let content: Vec<u8> = (0..2 * PIECE_LEN as u32).map(|i| (i % 253) as u8).collect();
    let (events, mut commands, mut storage, run) = scheduler_with_one_peer(&content).await;

    let mut writes: Vec<PieceWrite> = Vec::new();
    let mut haves = 0;

    while writes.len() < 2 {
        tokio::select! {
            command = commands.recv() => match command {
                Some(PeerCommand::Request(requests)) => {
                    // Answer back to front to exercise reassembly.
                    for request in requests.into_iter().rev() {
                        send_block(&events, &content, request).await;
                    }
                }
                Some(PeerCommand::Have(_)) => haves += 1,
                Some(_) => {}
                // Scheduler finished; drain the buffered writes.
                None => {
                    while writes.len() < 2 {
                        writes.push(recv_write(&mut storage).await);
                    }
                }
            },
            write = storage.recv() => {
                writes.push(write.expect("storage channel closed"));
            }
        }
    }

    assert_eq!(haves, 2, "every completed piece is announced");

    writes.sort_by_key(|w| w.index);
    assert_eq!(writes[0].index, 0);
    assert_eq!(writes[0].data.as_ref(), &content[..PIECE_LEN]);
    assert_eq!(writes[1].index, 1);
    assert_eq!(writes[1].data.as_ref(), &content[PIECE_LEN..]);

    // All pieces complete: run resolves cleanly.
    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_scheduler_recovers_from_hash_failure() {
    let content: Vec<u8> = (0..2 * PIECE_LEN as u32).map(|i| (i % 249) as u8).collect();
    let (events, mut commands, mut storage, run) = scheduler_with_one_peer(&content).await;

    // First pass: every block of piece 0 is garbage, piece 1 is served
    // correctly. Piece 0 must be discarded and re-requested.
    let mut poisoned = false;
    let mut writes: Vec<PieceWrite> = Vec::new();

    while writes.len() < 2 {
        tokio::select! {
            command = commands.recv() => match command {
                Some(PeerCommand::Request(requests)) => {
                    let poison_now = !poisoned;
                    poisoned = true;
                    for request in requests {
                        if poison_now && request.piece == 0 {
                            events
                                .send(PeerEvent::Block {
                                    key: peer_key(),
                                    piece: request.piece,
                                    begin: request.begin,
                                    data: Bytes::from(vec![0x5A; request.length as usize]),
                                })
                                .await
                                .unwrap();
                        } else {
                            send_block(&events, &content, request).await;
                        }
                    }
                }
                Some(_) => {}
                None => {
                    while writes.len() < 2 {
                        writes.push(recv_write(&mut storage).await);
                    }
                }
            },
            write = storage.recv() => {
                writes.push(write.expect("storage channel closed"));
            }
        }
    }

    writes.sort_by_key(|w| w.index);
    assert_eq!(writes[0].data.as_ref(), &content[..PIECE_LEN]);
    assert_eq!(writes[1].data.as_ref(), &content[PIECE_LEN..]);

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_scheduler_reschedules_after_choke() {
    let content: Vec<u8> = (0..2 * PIECE_LEN as u32).map(|i| (i % 245) as u8).collect();
    let (events, mut commands, mut storage, run) = scheduler_with_one_peer(&content).await;
    let key = peer_key();

    // Take the first batch, then get choked with everything in flight.
    let first_batch = match recv_command(&mut commands).await {
        PeerCommand::Request(requests) => requests,
        other => panic!("expected requests, got {:?}", other),
    };
    assert!(!first_batch.is_empty());

    events.send(PeerEvent::Choked { key }).await.unwrap();
    events.send(PeerEvent::Unchoked { key }).await.unwrap();

    // The forfeited blocks come back as fresh requests; serving only
    // these must still complete both pieces, proving nothing stayed
    // marked in-flight with the dead requests.
    let mut writes: Vec<PieceWrite> = Vec::new();
    while writes.len() < 2 {
        tokio::select! {
            command = commands.recv() => match command {
                Some(PeerCommand::Request(requests)) => {
                    for request in requests {
                        send_block(&events, &content, request).await;
                    }
                }
                Some(_) => {}
                None => {
                    while writes.len() < 2 {
                        writes.push(recv_write(&mut storage).await);
                    }
                }
            },
            write = storage.recv() => {
                writes.push(write.expect("storage channel closed"));
            }
        }
    }

    writes.sort_by_key(|w| w.index);
    assert_eq!(writes[0].data.as_ref(), &content[..PIECE_LEN]);
    assert_eq!(writes[1].data.as_ref(), &content[PIECE_LEN..]);

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_scheduler_discards_unsolicited_blocks() {
    let content: Vec<u8> = vec![1; PIECE_LEN];
    let hashes = vec![sha1_of(&content)];

    let (events_tx, events_rx) = mpsc::channel(16);
    let (storage_tx, mut storage_rx) = mpsc::channel(4);
    let scheduler = Scheduler::new(
        hashes,
        PIECE_LEN as u64,
        PIECE_LEN as u64,
        16384,
        64,
        8,
        events_rx,
        storage_tx,
        Arc::new(TransferStats::new()),
    );
    let run = tokio::spawn(scheduler.run());

    let key = peer_key();
    let (commands_tx, mut commands_rx) = mpsc::channel(16);
    events_tx
        .send(PeerEvent::Connected {
            key,
            commands: commands_tx,
        })
        .await
        .unwrap();

    // A block nobody asked for: silently dropped, nothing written.
    events_tx
        .send(PeerEvent::Block {
            key,
            piece: 0,
            begin: 0,
            data: Bytes::from(vec![1; 16384]),
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(storage_rx.try_recv().is_err());
    assert!(commands_rx.try_recv().is_err());

    drop(events_tx);
    let result = run.await.unwrap();
    assert!(matches!(result, Err(EngineError::Interrupted)));
}
