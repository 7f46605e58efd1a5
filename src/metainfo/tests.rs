use std::collections::BTreeMap;

use bytes::Bytes;

use super::*;
use crate::bencode::{encode, Value};

fn info_value(piece_length: i64, total: i64, files: Option<Vec<(Vec<&str>, i64)>>) -> Value {
    let piece_count = (total as u64).div_ceil(piece_length as u64) as usize;
    let mut pieces = Vec::with_capacity(piece_count * 20);
    for i in 0..piece_count {
        pieces.extend_from_slice(&[i as u8; 20]);
    }

    let mut info = BTreeMap::new();
    info.insert(Bytes::from_static(b"name"), Value::string("test"));
    info.insert(
        Bytes::from_static(b"piece length"),
        Value::Integer(piece_length),
    );
    info.insert(Bytes::from_static(b"pieces"), Value::Bytes(pieces.into()));

    match files {
        None => {
            info.insert(Bytes::from_static(b"length"), Value::Integer(total));
        }
        Some(entries) => {
            let list = entries
                .into_iter()
                .map(|(path, length)| {
                    let mut file = BTreeMap::new();
                    file.insert(Bytes::from_static(b"length"), Value::Integer(length));
                    file.insert(
                        Bytes::from_static(b"path"),
                        Value::List(path.into_iter().map(Value::string).collect()),
                    );
                    Value::Dict(file)
                })
                .collect();
            info.insert(Bytes::from_static(b"files"), Value::List(list));
        }
    }

    Value::Dict(info)
}

fn torrent_bytes(info: &Value) -> Vec<u8> {
    let mut root = BTreeMap::new();
    root.insert(
        Bytes::from_static(b"announce"),
        Value::string("http://t.example/announce"),
    );
    root.insert(Bytes::from_static(b"info"), info.clone());
    encode(&Value::Dict(root))
}

#[test]
fn test_parse_single_file() {
    let info = info_value(16384, 40000, None);
    let data = torrent_bytes(&info);

    let metainfo = Metainfo::from_bytes(&data).unwrap();
    assert_eq!(metainfo.info.name, "test");
    assert_eq!(metainfo.info.piece_length, 16384);
    assert_eq!(metainfo.info.total_length, 40000);
    assert_eq!(metainfo.info.piece_count(), 3);
    assert_eq!(metainfo.info.files.len(), 1);
    assert_eq!(metainfo.info.files[0].path.to_str(), Some("test"));
    assert_eq!(
        metainfo.announce.as_deref(),
        Some("http://t.example/announce")
    );

    // Last piece carries the remainder.
    assert_eq!(metainfo.info.piece_len(0), 16384);
    assert_eq!(metainfo.info.piece_len(2), 40000 - 2 * 16384);
}

#[test]
fn test_parse_multi_file_offsets() {
    let info = info_value(8, 35, Some(vec![(vec!["a", "x"], 10), (vec!["a", "y"], 25)]));
    let data = torrent_bytes(&info);

    let metainfo = Metainfo::from_bytes(&data).unwrap();
    let files = &metainfo.info.files;
    assert_eq!(files.len(), 2);
    assert_eq!(files[0].path.to_str(), Some("test/a/x"));
    assert_eq!(files[0].offset, 0);
    assert_eq!(files[0].length, 10);
    assert_eq!(files[1].path.to_str(), Some("test/a/y"));
    assert_eq!(files[1].offset, 10);
    assert_eq!(files[1].length, 25);
    assert_eq!(metainfo.info.total_length, 35);
    assert_eq!(metainfo.info.piece_count(), 5);
}

#[test]
fn test_info_hash_covers_original_span() {
    let info = info_value(16384, 16384, None);
    let data = torrent_bytes(&info);

    let metainfo = Metainfo::from_bytes(&data).unwrap();
    assert_eq!(metainfo.info_hash, InfoHash::of(&encode(&info)));
    assert_eq!(metainfo.raw_info().as_ref(), encode(&info).as_slice());
}

#[test]
fn test_info_hash_tolerates_unsorted_info_keys() {
    // Handcrafted metainfo whose info keys are out of canonical order
    // (name before length). The published identity of such torrents is
    // the SHA-1 of these exact bytes.
    let info: &[u8] =
        b"d4:name1:a12:piece lengthi16e6:lengthi16e6:pieces20:aaaaaaaaaaaaaaaaaaaae";
    let mut data = Vec::new();
    data.extend_from_slice(b"d4:info");
    data.extend_from_slice(info);
    data.push(b'e');

    let metainfo = Metainfo::from_bytes(&data).unwrap();
    assert_eq!(metainfo.info_hash, InfoHash::of(info));
    assert_eq!(metainfo.info.name, "a");
    assert!(metainfo.announce.is_none());
}

#[test]
fn test_reject_wrong_piece_count() {
    // 40000 bytes at 16384 per piece needs 3 hashes; supply 2.
    let mut info = info_value(16384, 40000, None);
    if let Value::Dict(ref mut d) = info {
        d.insert(Bytes::from_static(b"pieces"), Value::bytes(&[0u8; 40]));
    }
    let data = torrent_bytes(&info);
    assert!(matches!(
        Metainfo::from_bytes(&data),
        Err(MetainfoError::InvalidField("pieces"))
    ));
}

#[test]
fn test_reject_missing_info() {
    let mut root = BTreeMap::new();
    root.insert(Bytes::from_static(b"announce"), Value::string("x"));
    let data = encode(&Value::Dict(root));
    assert!(matches!(
        Metainfo::from_bytes(&data),
        Err(MetainfoError::MissingField("info"))
    ));
}

#[test]
fn test_from_info_bytes_verifies_hash() {
    let info = info_value(16384, 16384, None);
    let info_bytes = encode(&info);
    let trackers = vec!["udp://t.example:6969".to_string()];

    let ok = Metainfo::from_info_bytes(&info_bytes, &trackers, InfoHash::of(&info_bytes)).unwrap();
    assert_eq!(ok.trackers(), trackers);
    assert_eq!(ok.info.total_length, 16384);

    let wrong = InfoHash::from_bytes([9u8; 20]);
    assert!(matches!(
        Metainfo::from_info_bytes(&info_bytes, &trackers, wrong),
        Err(MetainfoError::InfoHashMismatch)
    ));
}

#[test]
fn test_magnet_parse() {
    let magnet = MagnetLink::parse(
        "magnet:?xt=urn:btih:dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c\
         &dn=Ubuntu&tr=udp://t.example:6969",
    )
    .unwrap();

    assert_eq!(
        magnet.info_hash.to_hex(),
        "dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c"
    );
    assert_eq!(magnet.info_hash.as_bytes()[0], 0xdd);
    assert_eq!(magnet.info_hash.as_bytes()[1], 0x82);
    assert_eq!(magnet.info_hash.as_bytes()[19], 0x1c);
    assert_eq!(magnet.display_name.as_deref(), Some("Ubuntu"));
    assert_eq!(magnet.trackers, vec!["udp://t.example:6969".to_string()]);
    assert!(magnet.web_seeds.is_empty());
    assert_eq!(magnet.expected_length, None);
}

#[test]
fn test_magnet_parse_extras() {
    let magnet = MagnetLink::parse(
        "magnet:?xt=urn:btih:DD8255ECDC7CA55FB0BBF81323D87062DB1F6D1C\
         &dn=Some%20Name&xl=12345&ws=http%3A%2F%2Fseed.example%2Ff",
    )
    .unwrap();

    // Hex is case-insensitive.
    assert_eq!(
        magnet.info_hash.to_hex(),
        "dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c"
    );
    assert_eq!(magnet.display_name.as_deref(), Some("Some Name"));
    assert_eq!(magnet.expected_length, Some(12345));
    assert_eq!(magnet.web_seeds, vec!["http://seed.example/f".to_string()]);
}

#[test]
fn test_magnet_parse_base32() {
    let magnet =
        MagnetLink::parse("magnet:?xt=urn:btih:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
    assert_eq!(magnet.info_hash, InfoHash::from_bytes([0u8; 20]));
}

#[test]
fn test_magnet_parse_invalid() {
    assert!(matches!(
        MagnetLink::parse("http://example.com"),
        Err(MetainfoError::InvalidMagnet(_))
    ));
    assert!(matches!(
        MagnetLink::parse("magnet:?dn=NoHash"),
        Err(MetainfoError::InvalidMagnet(_))
    ));
    assert!(matches!(
        MagnetLink::parse("magnet:?xt=urn:btih:tooshort"),
        Err(MetainfoError::InvalidMagnet(_))
    ));
}

#[test]
fn test_info_hash_hex_roundtrip() {
    let hash = InfoHash::from_hex("dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c").unwrap();
    assert_eq!(hash.to_hex(), "dd8255ecdc7ca55fb0bbf81323d87062db1f6d1c");
    assert!(InfoHash::from_hex("xyz").is_err());
}
