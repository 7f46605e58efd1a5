use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::BencodeError;
use super::value::Value;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyOrder {
    /// Reject out-of-order or duplicate dictionary keys.
    Strict,
    /// Accept them; later duplicates win. For third-party data.
    Lenient,
}

/// Decodes a single bencode value from `data`.
///
/// The input must contain exactly one complete value with no trailing
/// bytes, and dictionary keys must appear in strictly ascending order.
///
/// # Examples
///
/// ```
/// use bitflood::bencode::{decode, Value};
///
/// assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
/// assert_eq!(decode(b"5:hello").unwrap().as_str(), Some("hello"));
/// assert!(decode(b"i-0e").is_err());
/// assert!(decode(b"d3:foo3:bar3:abc3:xyze").is_err()); // keys out of order
/// ```
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    decode_with(data, KeyOrder::Strict)
}

/// Decodes like [`decode`] but tolerates out-of-order and duplicate
/// dictionary keys.
///
/// Real trackers and some metainfo producers emit dictionaries whose
/// keys are not sorted; this entry point accepts them while keeping
/// every other validation rule.
pub fn decode_lenient(data: &[u8]) -> Result<Value, BencodeError> {
    decode_with(data, KeyOrder::Lenient)
}

fn decode_with(data: &[u8], order: KeyOrder) -> Result<Value, BencodeError> {
    let mut pos = 0;
    let value = decode_value(data, &mut pos, 0, order)?;

    if pos != data.len() {
        return Err(BencodeError::TrailingData);
    }

    Ok(value)
}

/// Advances past one complete value starting at `*pos` without building
/// it, validating only token structure. Used to locate the byte span of
/// a sub-value (the `info` dictionary, a ut_metadata header) inside a
/// larger buffer.
pub(crate) fn skip_value(data: &[u8], pos: &mut usize) -> Result<(), BencodeError> {
    skip_inner(data, pos, 0)
}

fn skip_inner(data: &[u8], pos: &mut usize, depth: usize) -> Result<(), BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep);
    }

    match data.get(*pos) {
        None => Err(BencodeError::UnexpectedEof),
        Some(b'i') => {
            *pos += 1;
            while *pos < data.len() && data[*pos] != b'e' {
                *pos += 1;
            }
            if *pos >= data.len() {
                return Err(BencodeError::UnexpectedEof);
            }
            *pos += 1;
            Ok(())
        }
        Some(b'l') | Some(b'd') => {
            *pos += 1;
            while *pos < data.len() && data[*pos] != b'e' {
                skip_inner(data, pos, depth + 1)?;
            }
            if *pos >= data.len() {
                return Err(BencodeError::UnexpectedEof);
            }
            *pos += 1;
            Ok(())
        }
        Some(b'0'..=b'9') => {
            let len = read_length(data, pos)?;
            if *pos + len > data.len() {
                return Err(BencodeError::UnexpectedEof);
            }
            *pos += len;
            Ok(())
        }
        Some(&c) => Err(BencodeError::UnexpectedChar(c as char)),
    }
}

fn decode_value(
    data: &[u8],
    pos: &mut usize,
    depth: usize,
    order: KeyOrder,
) -> Result<Value, BencodeError> {
    if depth > MAX_DEPTH {
        return Err(BencodeError::NestingTooDeep);
    }

    match data.get(*pos) {
        None => Err(BencodeError::UnexpectedEof),
        Some(b'i') => decode_integer(data, pos),
        Some(b'l') => decode_list(data, pos, depth, order),
        Some(b'd') => decode_dict(data, pos, depth, order),
        Some(b'0'..=b'9') => decode_bytes(data, pos).map(Value::Bytes),
        Some(&c) => Err(BencodeError::UnexpectedChar(c as char)),
    }
}

fn decode_integer(data: &[u8], pos: &mut usize) -> Result<Value, BencodeError> {
    *pos += 1;

    let start = *pos;
    while *pos < data.len() && data[*pos] != b'e' {
        *pos += 1;
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    let digits = &data[start..*pos];
    let text = std::str::from_utf8(digits)
        .map_err(|_| BencodeError::InvalidInteger("not ascii".into()))?;

    if text.is_empty() || text == "-" {
        return Err(BencodeError::InvalidInteger("empty".into()));
    }
    if text.starts_with("-0") || (text.len() > 1 && text.starts_with('0')) {
        return Err(BencodeError::InvalidInteger("leading zeros".into()));
    }

    let value: i64 = text
        .parse()
        .map_err(|_| BencodeError::InvalidInteger(text.into()))?;

    *pos += 1;
    Ok(Value::Integer(value))
}

fn read_length(data: &[u8], pos: &mut usize) -> Result<usize, BencodeError> {
    let start = *pos;
    while *pos < data.len() && data[*pos].is_ascii_digit() {
        *pos += 1;
    }

    if *pos >= data.len() || data[*pos] != b':' {
        return Err(BencodeError::InvalidLength);
    }

    let digits = &data[start..*pos];
    if digits.is_empty() || (digits.len() > 1 && digits[0] == b'0') {
        return Err(BencodeError::InvalidLength);
    }

    // Safe: digits is non-empty ASCII decimal.
    let text = std::str::from_utf8(digits).map_err(|_| BencodeError::InvalidLength)?;
    let len: usize = text.parse().map_err(|_| BencodeError::InvalidLength)?;

    *pos += 1;
    Ok(len)
}

fn decode_bytes(data: &[u8], pos: &mut usize) -> Result<Bytes, BencodeError> {
    let len = read_length(data, pos)?;

    if *pos + len > data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    let bytes = Bytes::copy_from_slice(&data[*pos..*pos + len]);
    *pos += len;
    Ok(bytes)
}

fn decode_list(
    data: &[u8],
    pos: &mut usize,
    depth: usize,
    order: KeyOrder,
) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut list = Vec::new();

    while *pos < data.len() && data[*pos] != b'e' {
        list.push(decode_value(data, pos, depth + 1, order)?);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    *pos += 1;
    Ok(Value::List(list))
}

fn decode_dict(
    data: &[u8],
    pos: &mut usize,
    depth: usize,
    order: KeyOrder,
) -> Result<Value, BencodeError> {
    *pos += 1;
    let mut dict = BTreeMap::new();
    let mut last_key: Option<Bytes> = None;

    while *pos < data.len() && data[*pos] != b'e' {
        if !data[*pos].is_ascii_digit() {
            return Err(BencodeError::UnexpectedChar(data[*pos] as char));
        }
        let key = decode_bytes(data, pos)?;

        if order == KeyOrder::Strict {
            if let Some(ref prev) = last_key {
                match key.as_ref().cmp(prev.as_ref()) {
                    std::cmp::Ordering::Greater => {}
                    std::cmp::Ordering::Equal => return Err(BencodeError::DuplicateKey),
                    std::cmp::Ordering::Less => return Err(BencodeError::UnsortedKeys),
                }
            }
            last_key = Some(key.clone());
        }

        let value = decode_value(data, pos, depth + 1, order)?;
        dict.insert(key, value);
    }

    if *pos >= data.len() {
        return Err(BencodeError::UnexpectedEof);
    }

    *pos += 1;
    Ok(Value::Dict(dict))
}
