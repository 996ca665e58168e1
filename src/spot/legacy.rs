//! Reader for the archive format used before JSON: a Go `encoding/gob`
//! stream holding a single list of message structs.
//!
//! Gob is self-describing. Type definitions travel ahead of the value and
//! struct fields are matched by name, so records written with extra fields
//! (or a numeric `Id`) still load; unknown fields are skipped.

use crate::spot::message::Message;
use std::collections::HashMap;
use thiserror::Error;

// Predeclared gob type ids.
const BOOL: i64 = 1;
const INT: i64 = 2;
const UINT: i64 = 3;
const FLOAT: i64 = 4;
const BYTES: i64 = 5;
const STRING: i64 = 6;
const COMPLEX: i64 = 7;
const INTERFACE: i64 = 8;

const MAX_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum GobError {
    #[error("unexpected end of gob data")]
    Truncated,
    #[error("gob integer wider than 8 bytes")]
    Overflow,
    #[error("gob stream holds no value")]
    NoValue,
    #[error("unknown gob type id {0}")]
    UnknownType(i64),
    #[error("gob field {field} has type id {id}, which cannot hold it")]
    FieldType { field: &'static str, id: i64 },
    #[error("gob value is not a list of structs")]
    NotRecordList,
    #[error("gob values nest too deep")]
    TooDeep,
    #[error("corrupt gob data: {0}")]
    Corrupt(&'static str),
}

type Result<T> = std::result::Result<T, GobError>;

#[derive(Debug, Clone)]
enum WireType {
    Array { elem: i64 },
    Slice { elem: i64 },
    Struct { fields: Vec<(String, i64)> },
    Map { key: i64, elem: i64 },
    /// GobEncoder, BinaryMarshaler or TextMarshaler: sent as a byte string.
    Opaque,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(GobError::Truncated);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Values below 128 are one byte; larger ones are a negated byte count
    /// followed by that many big-endian bytes.
    fn uint(&mut self) -> Result<u64> {
        let first = self.take(1)?[0];
        if first < 0x80 {
            return Ok(u64::from(first));
        }
        let width = usize::from(first.wrapping_neg());
        if width > 8 {
            return Err(GobError::Overflow);
        }
        Ok(self
            .take(width)?
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Sign lives in bit 0; a set bit means the rest is complemented.
    fn int(&mut self) -> Result<i64> {
        let raw = self.uint()?;
        let magnitude = (raw >> 1) as i64;
        Ok(if raw & 1 == 1 { !magnitude } else { magnitude })
    }

    /// IEEE bits, byte-reversed so small exponents encode short.
    fn float(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.uint()?.swap_bytes()))
    }

    fn len(&mut self) -> Result<usize> {
        usize::try_from(self.uint()?).map_err(|_| GobError::Truncated)
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let n = self.len()?;
        self.take(n)
    }

    fn string(&mut self) -> Result<String> {
        Ok(String::from_utf8_lossy(self.bytes()?).into_owned())
    }
}

/// Walk a struct encoding: (field delta, value) pairs ended by a zero delta.
fn for_each_field<'a>(
    cur: &mut Cursor<'a>,
    mut visit: impl FnMut(usize, &mut Cursor<'a>) -> Result<()>,
) -> Result<()> {
    let mut next = 0usize;
    loop {
        let delta = cur.len()?;
        if delta == 0 {
            return Ok(());
        }
        let index = next
            .checked_add(delta - 1)
            .ok_or(GobError::Corrupt("field delta out of range"))?;
        visit(index, cur)?;
        next = index.saturating_add(1);
    }
}

fn skip_common_type(cur: &mut Cursor<'_>) -> Result<()> {
    for_each_field(cur, |index, cur| match index {
        0 => cur.bytes().map(drop),
        1 => cur.int().map(drop),
        _ => Err(GobError::Corrupt("unknown common type field")),
    })
}

fn read_slice_type(cur: &mut Cursor<'_>) -> Result<i64> {
    let mut elem = None;
    for_each_field(cur, |index, cur| match index {
        0 => skip_common_type(cur),
        1 => {
            elem = Some(cur.int()?);
            Ok(())
        }
        // Array length; the count travels with every value anyway.
        2 => cur.int().map(drop),
        _ => Err(GobError::Corrupt("unknown array or slice type field")),
    })?;
    elem.ok_or(GobError::Corrupt("list type without element type"))
}

fn read_field_type(cur: &mut Cursor<'_>) -> Result<(String, i64)> {
    let mut name = String::new();
    let mut id = None;
    for_each_field(cur, |index, cur| match index {
        0 => {
            name = cur.string()?;
            Ok(())
        }
        1 => {
            id = Some(cur.int()?);
            Ok(())
        }
        _ => Err(GobError::Corrupt("unknown struct field descriptor")),
    })?;
    let id = id.ok_or(GobError::Corrupt("struct field without type"))?;
    Ok((name, id))
}

fn read_struct_type(cur: &mut Cursor<'_>) -> Result<Vec<(String, i64)>> {
    let mut fields = Vec::new();
    for_each_field(cur, |index, cur| match index {
        0 => skip_common_type(cur),
        1 => {
            let count = cur.len()?;
            fields.reserve(count.min(cur.remaining()));
            for _ in 0..count {
                fields.push(read_field_type(cur)?);
            }
            Ok(())
        }
        _ => Err(GobError::Corrupt("unknown struct type field")),
    })?;
    Ok(fields)
}

fn read_map_type(cur: &mut Cursor<'_>) -> Result<(i64, i64)> {
    let (mut key, mut elem) = (None, None);
    for_each_field(cur, |index, cur| match index {
        0 => skip_common_type(cur),
        1 => {
            key = Some(cur.int()?);
            Ok(())
        }
        2 => {
            elem = Some(cur.int()?);
            Ok(())
        }
        _ => Err(GobError::Corrupt("unknown map type field")),
    })?;
    match (key, elem) {
        (Some(key), Some(elem)) => Ok((key, elem)),
        _ => Err(GobError::Corrupt("map type without key or element type")),
    }
}

fn read_wire_type(cur: &mut Cursor<'_>) -> Result<WireType> {
    let mut wire = None;
    for_each_field(cur, |index, cur| {
        wire = Some(match index {
            0 => WireType::Array {
                elem: read_slice_type(cur)?,
            },
            1 => WireType::Slice {
                elem: read_slice_type(cur)?,
            },
            2 => WireType::Struct {
                fields: read_struct_type(cur)?,
            },
            3 => {
                let (key, elem) = read_map_type(cur)?;
                WireType::Map { key, elem }
            }
            4..=6 => {
                skip_common_type(cur)?;
                WireType::Opaque
            }
            _ => return Err(GobError::Corrupt("unknown wire type kind")),
        });
        Ok(())
    })?;
    wire.ok_or(GobError::Corrupt("empty type definition"))
}

struct Types(HashMap<i64, WireType>);

impl Types {
    fn get(&self, id: i64) -> Result<&WireType> {
        self.0.get(&id).ok_or(GobError::UnknownType(id))
    }

    fn skip(&self, id: i64, cur: &mut Cursor<'_>, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(GobError::TooDeep);
        }
        match id {
            BOOL | INT | UINT | FLOAT => cur.uint().map(drop),
            COMPLEX => cur.uint().and_then(|_| cur.uint()).map(drop),
            BYTES | STRING => cur.bytes().map(drop),
            INTERFACE => Err(GobError::Corrupt("interface values are not supported")),
            _ => match self.get(id)? {
                WireType::Array { elem } | WireType::Slice { elem } => {
                    for _ in 0..cur.len()? {
                        self.skip(*elem, cur, depth + 1)?;
                    }
                    Ok(())
                }
                WireType::Map { key, elem } => {
                    for _ in 0..cur.len()? {
                        self.skip(*key, cur, depth + 1)?;
                        self.skip(*elem, cur, depth + 1)?;
                    }
                    Ok(())
                }
                WireType::Struct { fields } => for_each_field(cur, |index, cur| {
                    let (_, field) = fields
                        .get(index)
                        .ok_or(GobError::Corrupt("struct field index out of range"))?;
                    self.skip(*field, cur, depth + 1)
                }),
                WireType::Opaque => cur.bytes().map(drop),
            },
        }
    }

    fn record(&self, fields: &[(String, i64)], cur: &mut Cursor<'_>) -> Result<Message> {
        let mut message = Message {
            id: String::new(),
            unix_time: 0,
            latitude: 0.0,
            longitude: 0.0,
            message_content: String::new(),
        };
        for_each_field(cur, |index, cur| {
            let (name, id) = fields
                .get(index)
                .ok_or(GobError::Corrupt("struct field index out of range"))?;
            let id = *id;
            match name.as_str() {
                "Id" => {
                    message.id = match id {
                        STRING => cur.string()?,
                        INT => cur.int()?.to_string(),
                        UINT => cur.uint()?.to_string(),
                        _ => return Err(GobError::FieldType { field: "Id", id }),
                    }
                }
                "UnixTime" => {
                    message.unix_time = match id {
                        INT => cur.int()?,
                        UINT => i64::try_from(cur.uint()?)
                            .map_err(|_| GobError::Corrupt("UnixTime out of range"))?,
                        _ => return Err(GobError::FieldType { field: "UnixTime", id }),
                    }
                }
                "Latitude" if id == FLOAT => message.latitude = cur.float()?,
                "Latitude" => return Err(GobError::FieldType { field: "Latitude", id }),
                "Longitude" if id == FLOAT => message.longitude = cur.float()?,
                "Longitude" => return Err(GobError::FieldType { field: "Longitude", id }),
                "MessageContent" if id == STRING => message.message_content = cur.string()?,
                "MessageContent" => {
                    return Err(GobError::FieldType { field: "MessageContent", id });
                }
                _ => self.skip(id, cur, 1)?,
            }
            Ok(())
        })?;
        Ok(message)
    }

    fn records(&self, id: i64, cur: &mut Cursor<'_>) -> Result<Vec<Message>> {
        let elem = match self.get(id)? {
            WireType::Slice { elem } | WireType::Array { elem } => *elem,
            _ => return Err(GobError::NotRecordList),
        };
        let WireType::Struct { fields } = self.get(elem)? else {
            return Err(GobError::NotRecordList);
        };
        // Top-level non-struct values sit behind a single zero field delta.
        if cur.uint()? != 0 {
            return Err(GobError::Corrupt("non-zero delta before top-level value"));
        }
        let count = cur.len()?;
        let mut out = Vec::with_capacity(count.min(cur.remaining()));
        for _ in 0..count {
            out.push(self.record(fields, cur)?);
        }
        Ok(out)
    }
}

/// Decode the first value of a gob stream as a list of messages.
///
/// Each message on the stream is length-prefixed and starts with a type id:
/// negative ids carry a type definition, the first positive id carries the
/// value itself.
pub fn decode(bytes: &[u8]) -> Result<Vec<Message>> {
    let mut stream = Cursor::new(bytes);
    let mut types = Types(HashMap::new());

    while !stream.is_empty() {
        let len = stream.len()?;
        let mut body = Cursor::new(stream.take(len)?);
        let id = body.int()?;
        if id < 0 {
            let wire = read_wire_type(&mut body)?;
            if !body.is_empty() {
                return Err(GobError::Corrupt("trailing bytes after type definition"));
            }
            types.0.insert(-id, wire);
            continue;
        }
        let records = types.records(id, &mut body)?;
        if !body.is_empty() {
            return Err(GobError::Corrupt("trailing bytes after value"));
        }
        return Ok(records);
    }
    Err(GobError::NoValue)
}

/// `[]spot.Message` with the three records B2, A1 and C3, as written by
/// `gob.NewEncoder(f).Encode(messages)`.
#[cfg(test)]
pub(crate) const THREE_RECORDS: &[u8] = &[
    // type 65: slice of type 66
    0x1d, 0xff, 0x81, 0x02, 0x01, 0x01, 0x0e, 0x5b, 0x5d, 0x73, 0x70, 0x6f, 0x74, 0x2e, 0x4d,
    0x65, 0x73, 0x73, 0x61, 0x67, 0x65, 0x01, 0xff, 0x82, 0x00, 0x01, 0xff, 0x84, 0x00, 0x00,
    // type 66: struct Message
    0x57, 0xff, 0x83, 0x03, 0x01, 0x01, 0x07, 0x4d, 0x65, 0x73, 0x73, 0x61, 0x67, 0x65, 0x01,
    0xff, 0x84, 0x00, 0x01, 0x05, 0x01, 0x02, 0x49, 0x64, 0x01, 0x0c, 0x00, 0x01, 0x08, 0x55,
    0x6e, 0x69, 0x78, 0x54, 0x69, 0x6d, 0x65, 0x01, 0x04, 0x00, 0x01, 0x08, 0x4c, 0x61, 0x74,
    0x69, 0x74, 0x75, 0x64, 0x65, 0x01, 0x08, 0x00, 0x01, 0x09, 0x4c, 0x6f, 0x6e, 0x67, 0x69,
    0x74, 0x75, 0x64, 0x65, 0x01, 0x08, 0x00, 0x01, 0x0e, 0x4d, 0x65, 0x73, 0x73, 0x61, 0x67,
    0x65, 0x43, 0x6f, 0x6e, 0x74, 0x65, 0x6e, 0x74, 0x01, 0x0c, 0x00, 0x00, 0x00,
    // value of type 65
    0x62, 0xff, 0x82, 0x00, 0x03, 0x01, 0x02, 0x42, 0x32, 0x01, 0xfe, 0x07, 0x08, 0x01, 0xfe,
    0x26, 0x40, 0x01, 0xfe, 0x35, 0x40, 0x01, 0x12, 0x68, 0x69, 0x20, 0x3c, 0x74, 0x68, 0x65,
    0x72, 0x65, 0x3e, 0x20, 0x26, 0x20, 0x22, 0x79, 0x6f, 0x75, 0x22, 0x00, 0x01, 0x02, 0x41,
    0x31, 0x01, 0xfe, 0x07, 0xd0, 0x01, 0xfe, 0x24, 0x40, 0x01, 0xfe, 0x34, 0x40, 0x00, 0x01,
    0x02, 0x43, 0x33, 0x01, 0xfe, 0x07, 0xd0, 0x01, 0xf8, 0x82, 0xae, 0x7d, 0x01, 0xbd, 0xee,
    0x40, 0xc0, 0x01, 0xf8, 0xc6, 0x6d, 0x34, 0x80, 0xb7, 0xe6, 0x62, 0x40, 0x01, 0x09, 0xc3,
    0xbc, 0x6e, 0xc3, 0xaf, 0x63, 0x6f, 0x64, 0x65, 0x00,
];
