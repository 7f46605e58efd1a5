use std::path::PathBuf;

use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::mpsc;

use super::*;
use crate::metainfo::FileEntry;

fn entry(path: &str, length: u64, offset: u64) -> FileEntry {
    FileEntry {
        path: PathBuf::from(path),
        length,
        offset,
    }
}

fn two_file_layout() -> FileLayout {
    // [("a/x", 10), ("a/y", 25)] at piece length 8.
    FileLayout::new(vec![entry("a/x", 10, 0), entry("a/y", 25, 10)], 8, 35).unwrap()
}

#[test]
fn test_piece_spans_across_file_boundary() {
    let layout = two_file_layout();

    // Piece 1 covers bytes [8, 16): two bytes at the end of a/x, six
    // bytes at the start of a/y.
    let spans = layout.piece_spans(1);
    assert_eq!(spans.len(), 2);

    assert_eq!(spans[0].file_index, 0);
    assert_eq!(spans[0].file_offset, 8);
    assert_eq!(spans[0].piece_offset, 0);
    assert_eq!(spans[0].length, 2);

    assert_eq!(spans[1].file_index, 1);
    assert_eq!(spans[1].file_offset, 0);
    assert_eq!(spans[1].piece_offset, 2);
    assert_eq!(spans[1].length, 6);
}

#[test]
fn test_piece_spans_single_file() {
    let layout = two_file_layout();

    // Piece 0 sits entirely inside a/x.
    let spans = layout.piece_spans(0);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].file_index, 0);
    assert_eq!(spans[0].file_offset, 0);
    assert_eq!(spans[0].length, 8);

    // The last piece is short: bytes [32, 35).
    assert_eq!(layout.piece_len(4), 3);
    let spans = layout.piece_spans(4);
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].file_index, 1);
    assert_eq!(spans[0].file_offset, 22);
    assert_eq!(spans[0].length, 3);
}

#[test]
fn test_layout_piece_count_and_lengths() {
    let layout = two_file_layout();
    assert_eq!(layout.piece_count(), 5);
    assert_eq!(layout.piece_len(0), 8);
    assert_eq!(layout.piece_len(4), 3);
}

#[test]
fn test_layout_validation() {
    // Offsets must be contiguous.
    assert!(matches!(
        FileLayout::new(vec![entry("a", 10, 0), entry("b", 5, 11)], 8, 15),
        Err(StorageError::InvalidLayout(_))
    ));

    // Lengths must sum to the total.
    assert!(matches!(
        FileLayout::new(vec![entry("a", 10, 0)], 8, 11),
        Err(StorageError::InvalidLayout(_))
    ));

    // Paths may not escape the output directory.
    assert!(matches!(
        FileLayout::new(vec![entry("../evil", 10, 0)], 8, 10),
        Err(StorageError::PathTraversal(_))
    ));
    assert!(matches!(
        FileLayout::new(vec![entry("/abs", 10, 0)], 8, 10),
        Err(StorageError::PathTraversal(_))
    ));
}

#[tokio::test]
async fn test_preallocation() {
    let temp = TempDir::new().unwrap();
    let layout = two_file_layout();

    let _writer = StorageWriter::create(temp.path().to_path_buf(), layout)
        .await
        .unwrap();

    assert_eq!(std::fs::metadata(temp.path().join("a/x")).unwrap().len(), 10);
    assert_eq!(std::fs::metadata(temp.path().join("a/y")).unwrap().len(), 25);
}

#[tokio::test]
async fn test_write_pieces_out_of_order() {
    let temp = TempDir::new().unwrap();
    let layout = two_file_layout();

    let writer = StorageWriter::create(temp.path().to_path_buf(), layout)
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel(8);
    let task = tokio::spawn(writer.run(rx));

    let content: Vec<u8> = (0u8..35).collect();

    // Deliver pieces in scrambled order; piece 4 is the short one.
    for &index in &[4u32, 1, 3, 0, 2] {
        let start = index as usize * 8;
        let end = (start + 8).min(35);
        tx.send(PieceWrite {
            index,
            data: Bytes::copy_from_slice(&content[start..end]),
        })
        .await
        .unwrap();
    }

    drop(tx);
    task.await.unwrap().unwrap();

    let x = std::fs::read(temp.path().join("a/x")).unwrap();
    let y = std::fs::read(temp.path().join("a/y")).unwrap();
    assert_eq!(x, &content[..10]);
    assert_eq!(y, &content[10..]);
}

#[tokio::test]
async fn test_write_rejects_wrong_length() {
    let temp = TempDir::new().unwrap();
    let layout = two_file_layout();

    let writer = StorageWriter::create(temp.path().to_path_buf(), layout)
        .await
        .unwrap();

    let (tx, rx) = mpsc::channel(1);
    let task = tokio::spawn(writer.run(rx));

    tx.send(PieceWrite {
        index: 0,
        data: Bytes::from_static(b"short"),
    })
    .await
    .unwrap();
    drop(tx);

    assert!(matches!(
        task.await.unwrap(),
        Err(StorageError::BadPieceLength { index: 0 })
    ));
}
