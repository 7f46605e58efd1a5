use std::collections::BTreeMap;

use bytes::Bytes;

use super::*;

#[test]
fn test_decode_integer() {
    assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
    assert_eq!(decode(b"i-7e").unwrap(), Value::Integer(-7));
    assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
}

#[test]
fn test_decode_integer_invalid() {
    assert!(matches!(
        decode(b"i-0e"),
        Err(BencodeError::InvalidInteger(_))
    ));
    assert!(matches!(
        decode(b"i03e"),
        Err(BencodeError::InvalidInteger(_))
    ));
    assert!(matches!(decode(b"ie"), Err(BencodeError::InvalidInteger(_))));
    assert!(matches!(decode(b"i42"), Err(BencodeError::UnexpectedEof)));
}

#[test]
fn test_decode_bytes() {
    assert_eq!(decode(b"5:hello").unwrap(), Value::bytes(b"hello"));
    assert_eq!(decode(b"0:").unwrap(), Value::bytes(b""));
}

#[test]
fn test_decode_bytes_invalid() {
    // Length prefixes may not carry leading zeros.
    assert!(matches!(decode(b"05:hello"), Err(BencodeError::InvalidLength)));
    assert!(matches!(decode(b"5:hi"), Err(BencodeError::UnexpectedEof)));
    assert!(matches!(decode(b"5hello"), Err(BencodeError::InvalidLength)));
}

#[test]
fn test_decode_list() {
    assert_eq!(decode(b"le").unwrap(), Value::List(vec![]));
    assert_eq!(
        decode(b"li1ei2ee").unwrap(),
        Value::List(vec![Value::Integer(1), Value::Integer(2)])
    );
}

#[test]
fn test_decode_dict() {
    let value = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
    let dict = value.as_dict().unwrap();
    assert_eq!(dict.len(), 2);
    assert_eq!(value.get_str(b"cow"), Some("moo"));
    assert_eq!(value.get_str(b"spam"), Some("eggs"));
}

#[test]
fn test_decode_dict_key_order() {
    assert!(matches!(
        decode(b"d3:foo3:bar3:abc3:xyze"),
        Err(BencodeError::UnsortedKeys)
    ));
    assert!(matches!(
        decode(b"d3:fooi1e3:fooi2ee"),
        Err(BencodeError::DuplicateKey)
    ));

    // The lenient decoder accepts both; later duplicates win.
    let v = decode_lenient(b"d3:foo3:bar3:abc3:xyze").unwrap();
    assert_eq!(v.get_str(b"abc"), Some("xyz"));
    let v = decode_lenient(b"d3:fooi1e3:fooi2ee").unwrap();
    assert_eq!(v.get_integer(b"foo"), Some(2));
}

#[test]
fn test_decode_trailing_data() {
    assert!(matches!(
        decode(b"i42eextra"),
        Err(BencodeError::TrailingData)
    ));
}

#[test]
fn test_decode_unterminated() {
    assert!(matches!(decode(b"li1e"), Err(BencodeError::UnexpectedEof)));
    assert!(matches!(
        decode(b"d3:fooi1e"),
        Err(BencodeError::UnexpectedEof)
    ));
}

#[test]
fn test_decode_nesting_limit() {
    let mut deep = vec![b'l'; 100];
    deep.extend(vec![b'e'; 100]);
    assert!(matches!(decode(&deep), Err(BencodeError::NestingTooDeep)));
}

#[test]
fn test_encode_values() {
    assert_eq!(encode(&Value::Integer(42)), b"i42e");
    assert_eq!(encode(&Value::Integer(-7)), b"i-7e");
    assert_eq!(encode(&Value::bytes(b"spam")), b"4:spam");

    let list = Value::List(vec![Value::bytes(b"spam"), Value::Integer(42)]);
    assert_eq!(encode(&list), b"l4:spami42ee");
}

#[test]
fn test_encode_dict_sorted() {
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"foo"), Value::Integer(42));
    dict.insert(Bytes::from_static(b"bar"), Value::bytes(b"spam"));
    // BTreeMap iterates in key order regardless of insertion order.
    assert_eq!(encode(&Value::Dict(dict)), b"d3:bar4:spam3:fooi42ee");
}

#[test]
fn test_roundtrip_decode_encode() {
    let inputs: &[&[u8]] = &[
        b"i42e",
        b"0:",
        b"le",
        b"li1ei2ee",
        b"d3:cow3:moo4:spam4:eggse",
        b"d8:announce15:http://test.com4:infod4:name4:test12:piece lengthi16384eee",
        b"d4:listl4:spami42eee",
    ];
    for input in inputs {
        let decoded = decode(input).unwrap();
        assert_eq!(encode(&decoded), *input, "roundtrip of {:?}", input);
    }
}

#[test]
fn test_roundtrip_encode_decode() {
    let mut dict = BTreeMap::new();
    dict.insert(
        Bytes::from_static(b"nested"),
        Value::List(vec![Value::Integer(-1), Value::bytes(b"\x00\xff")]),
    );
    let original = Value::Dict(dict);
    assert_eq!(decode(&encode(&original)).unwrap(), original);
}

#[test]
fn test_skip_value_spans() {
    let data = b"d3:fooi42e3:barl2:abee";
    // Skip the whole dictionary.
    let mut pos = 0;
    skip_value(data, &mut pos).unwrap();
    assert_eq!(pos, data.len());

    // Skip just the integer value inside.
    let mut pos = 6;
    skip_value(data, &mut pos).unwrap();
    assert_eq!(&data[6..pos], b"i42e");
}
