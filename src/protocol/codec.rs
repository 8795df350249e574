//! Framing primitives for the binary wire protocol.
//!
//! Everything here works directly on `std::io` streams so the same functions
//! serve the buffered socket halves on both ends of a connection. Integers use
//! LEB128 base-128 varints (signed values are zigzag mapped first), strings
//! are varint length prefixed UTF-8, and nullable strings carry a one byte
//! presence flag. Decoding is total: truncated input, oversized lengths, bad
//! tags and invalid UTF-8 all come back as errors, never panics.

use crate::error::{Result, TableError};
use crate::protocol::{ColumnValue, TableId};
use std::io::{Read, Write};

/// upper bound on the encoded length of one varint
pub const MAX_VARINT_LEN: usize = 10;

/// upper bound on the byte length of one wire string
pub const MAX_STRING_LEN: usize = 1 << 20;

/// upper bound on the column count of one wire record
pub const MAX_RECORD_COLUMNS: usize = 1 << 10;

/// upper bound on the length of one invalidate list
pub const MAX_ID_LIST_LEN: usize = 1 << 16;

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_TEXT: u8 = 3;

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut byte = [0_u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

/// writes an unsigned integer as a base-128 varint
pub fn write_uint<W: Write>(writer: &mut W, mut value: u64) -> Result<()> {
    while value >= 0x80 {
        writer.write_all(&[(value as u8) | 0x80])?;
        value >>= 7;
    }
    writer.write_all(&[value as u8])?;
    Ok(())
}

/// reads a base-128 varint
///
/// # Errors
/// returns [`TableError::Protocol`] if the continuation bits run past
/// [`MAX_VARINT_LEN`] bytes
pub fn read_uint<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result = 0_u64;
    let mut shift = 0_u32;
    for _ in 0..MAX_VARINT_LEN {
        let byte = read_u8(reader)?;
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
    }
    Err(TableError::Protocol("varint too long".to_string()))
}

/// writes a signed integer, zigzag mapped into a varint
pub fn write_int<W: Write>(writer: &mut W, value: i64) -> Result<()> {
    let zigzag = ((value << 1) ^ (value >> 63)) as u64;
    write_uint(writer, zigzag)
}

/// reads a zigzag mapped signed integer
pub fn read_int<R: Read>(reader: &mut R) -> Result<i64> {
    let zigzag = read_uint(reader)?;
    Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64))
}

/// writes a boolean as one byte
pub fn write_bool<W: Write>(writer: &mut W, value: bool) -> Result<()> {
    writer.write_all(&[u8::from(value)])?;
    Ok(())
}

/// reads a one byte boolean, rejecting anything but `0` and `1`
pub fn read_bool<R: Read>(reader: &mut R) -> Result<bool> {
    match read_u8(reader)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(TableError::Protocol(format!("invalid bool byte {}", other))),
    }
}

/// writes a length prefixed UTF-8 string
///
/// # Errors
/// returns [`TableError::Protocol`] if the string exceeds [`MAX_STRING_LEN`]
pub fn write_utf<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    if value.len() > MAX_STRING_LEN {
        return Err(TableError::Protocol(format!(
            "string of {} bytes exceeds the wire limit",
            value.len()
        )));
    }
    write_uint(writer, value.len() as u64)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

/// reads a length prefixed UTF-8 string
///
/// # Errors
/// returns [`TableError::Protocol`] on an oversized length prefix or invalid
/// UTF-8 payload
pub fn read_utf<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_uint(reader)?;
    if len > MAX_STRING_LEN as u64 {
        return Err(TableError::Protocol(format!(
            "string length {} exceeds the wire limit",
            len
        )));
    }
    let mut bytes = vec![0_u8; len as usize];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| TableError::Protocol(format!("invalid utf-8 string: {}", e)))
}

/// writes an optional string: a presence byte, then the string if present
pub fn write_nullable_utf<W: Write>(writer: &mut W, value: Option<&str>) -> Result<()> {
    match value {
        Some(s) => {
            write_bool(writer, true)?;
            write_utf(writer, s)
        }
        None => write_bool(writer, false),
    }
}

/// reads an optional string framed by [`write_nullable_utf`]
pub fn read_nullable_utf<R: Read>(reader: &mut R) -> Result<Option<String>> {
    if read_bool(reader)? {
        Ok(Some(read_utf(reader)?))
    } else {
        Ok(None)
    }
}

/// writes one typed cell: a tag byte, then the payload
pub fn write_value<W: Write>(writer: &mut W, value: &ColumnValue) -> Result<()> {
    match value {
        ColumnValue::Null => writer.write_all(&[TAG_NULL])?,
        ColumnValue::Bool(b) => {
            writer.write_all(&[TAG_BOOL])?;
            write_bool(writer, *b)?;
        }
        ColumnValue::Int(n) => {
            writer.write_all(&[TAG_INT])?;
            write_int(writer, *n)?;
        }
        ColumnValue::Text(s) => {
            writer.write_all(&[TAG_TEXT])?;
            write_utf(writer, s)?;
        }
    }
    Ok(())
}

/// reads one typed cell
///
/// # Errors
/// returns [`TableError::Protocol`] on an unknown tag byte
pub fn read_value<R: Read>(reader: &mut R) -> Result<ColumnValue> {
    match read_u8(reader)? {
        TAG_NULL => Ok(ColumnValue::Null),
        TAG_BOOL => Ok(ColumnValue::Bool(read_bool(reader)?)),
        TAG_INT => Ok(ColumnValue::Int(read_int(reader)?)),
        TAG_TEXT => Ok(ColumnValue::Text(read_utf(reader)?)),
        tag => Err(TableError::Protocol(format!("invalid value tag {}", tag))),
    }
}

/// writes one row: a column count, then each cell
///
/// # Errors
/// returns [`TableError::Protocol`] if the row exceeds [`MAX_RECORD_COLUMNS`]
pub fn write_record<W: Write>(writer: &mut W, record: &[ColumnValue]) -> Result<()> {
    if record.len() > MAX_RECORD_COLUMNS {
        return Err(TableError::Protocol(format!(
            "record of {} columns exceeds the wire limit",
            record.len()
        )));
    }
    write_uint(writer, record.len() as u64)?;
    for value in record {
        write_value(writer, value)?;
    }
    Ok(())
}

/// reads one row framed by [`write_record`]
pub fn read_record<R: Read>(reader: &mut R) -> Result<Vec<ColumnValue>> {
    let columns = read_uint(reader)?;
    if columns > MAX_RECORD_COLUMNS as u64 {
        return Err(TableError::Protocol(format!(
            "record column count {} exceeds the wire limit",
            columns
        )));
    }
    let mut record = Vec::with_capacity(columns as usize);
    for _ in 0..columns {
        record.push(read_value(reader)?);
    }
    Ok(record)
}

/// writes an invalidate list: a count, then each table id
pub fn write_table_ids<W: Write>(writer: &mut W, ids: &[TableId]) -> Result<()> {
    if ids.len() > MAX_ID_LIST_LEN {
        return Err(TableError::Protocol(format!(
            "id list of {} entries exceeds the wire limit",
            ids.len()
        )));
    }
    write_uint(writer, ids.len() as u64)?;
    for id in ids {
        write_uint(writer, u64::from(*id))?;
    }
    Ok(())
}

/// reads an invalidate list framed by [`write_table_ids`]
pub fn read_table_ids<R: Read>(reader: &mut R) -> Result<Vec<TableId>> {
    let count = read_uint(reader)?;
    if count > MAX_ID_LIST_LEN as u64 {
        return Err(TableError::Protocol(format!(
            "id list length {} exceeds the wire limit",
            count
        )));
    }
    let mut ids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let id = read_uint(reader)?;
        if id > u64::from(TableId::MAX) {
            return Err(TableError::Protocol(format!("table id {} out of range", id)));
        }
        ids.push(id as TableId);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TableError;
    use std::io::ErrorKind;

    #[test]
    fn uint_roundtrip() {
        let values = [0_u64, 1, 127, 128, 255, 16383, 16384, 1 << 35, u64::MAX];
        for &value in &values {
            let mut buf = Vec::new();
            write_uint(&mut buf, value).unwrap();
            let mut slice: &[u8] = &buf;
            assert_eq!(read_uint(&mut slice).unwrap(), value, "failed for {}", value);
            assert!(slice.is_empty(), "buffer not fully consumed for {}", value);
        }
    }

    #[test]
    fn int_roundtrip() {
        let values = [0_i64, 1, -1, 63, -64, 64, i64::MIN, i64::MAX];
        for &value in &values {
            let mut buf = Vec::new();
            write_int(&mut buf, value).unwrap();
            let mut slice: &[u8] = &buf;
            assert_eq!(read_int(&mut slice).unwrap(), value, "failed for {}", value);
        }
    }

    #[test]
    fn small_ints_stay_small() {
        let mut buf = Vec::new();
        write_int(&mut buf, -1).unwrap();
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn utf_roundtrip() {
        for s in ["", "hello", "überraschung", "キー"] {
            let mut buf = Vec::new();
            write_utf(&mut buf, s).unwrap();
            let mut slice: &[u8] = &buf;
            assert_eq!(read_utf(&mut slice).unwrap(), s);
        }
    }

    #[test]
    fn nullable_utf_roundtrip() {
        for value in [None, Some("x")] {
            let mut buf = Vec::new();
            write_nullable_utf(&mut buf, value).unwrap();
            let mut slice: &[u8] = &buf;
            assert_eq!(read_nullable_utf(&mut slice).unwrap().as_deref(), value);
        }
    }

    #[test]
    fn value_roundtrip() {
        let values = [
            ColumnValue::Null,
            ColumnValue::Bool(true),
            ColumnValue::Int(-12345),
            ColumnValue::Text("cell".to_string()),
        ];
        for value in &values {
            let mut buf = Vec::new();
            write_value(&mut buf, value).unwrap();
            let mut slice: &[u8] = &buf;
            assert_eq!(&read_value(&mut slice).unwrap(), value);
        }
    }

    #[test]
    fn record_roundtrip() {
        let record = vec![
            ColumnValue::Int(1),
            ColumnValue::Text("name".to_string()),
            ColumnValue::Null,
        ];
        let mut buf = Vec::new();
        write_record(&mut buf, &record).unwrap();
        let mut slice: &[u8] = &buf;
        assert_eq!(read_record(&mut slice).unwrap(), record);

        let mut buf = Vec::new();
        write_record(&mut buf, &[]).unwrap();
        let mut slice: &[u8] = &buf;
        assert!(read_record(&mut slice).unwrap().is_empty());
    }

    #[test]
    fn table_ids_roundtrip() {
        let ids = vec![1_u32, 7, 500];
        let mut buf = Vec::new();
        write_table_ids(&mut buf, &ids).unwrap();
        let mut slice: &[u8] = &buf;
        assert_eq!(read_table_ids(&mut slice).unwrap(), ids);
    }

    #[test]
    fn truncated_input_is_an_io_error() {
        let mut empty: &[u8] = &[];
        match read_uint(&mut empty) {
            Err(TableError::Io(e)) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            other => panic!("expected io error, got {:?}", other),
        }

        // length prefix says 5 bytes, only 2 present
        let mut short: &[u8] = &[5, b'h', b'i'];
        assert!(matches!(read_utf(&mut short), Err(TableError::Io(_))));
    }

    #[test]
    fn overlong_varint_is_rejected() {
        let mut bytes: &[u8] = &[0x80_u8; 11];
        assert!(matches!(
            read_uint(&mut bytes),
            Err(TableError::Protocol(_))
        ));
    }

    #[test]
    fn bad_tags_are_rejected() {
        let mut bytes: &[u8] = &[9];
        assert!(matches!(
            read_value(&mut bytes),
            Err(TableError::Protocol(_))
        ));

        let mut bytes: &[u8] = &[TAG_BOOL, 2];
        assert!(matches!(
            read_value(&mut bytes),
            Err(TableError::Protocol(_))
        ));
    }

    #[test]
    fn oversized_lengths_are_rejected() {
        // a string length prefix far past MAX_STRING_LEN
        let mut buf = Vec::new();
        write_uint(&mut buf, (MAX_STRING_LEN as u64) + 1).unwrap();
        let mut slice: &[u8] = &buf;
        assert!(matches!(read_utf(&mut slice), Err(TableError::Protocol(_))));

        let mut buf = Vec::new();
        write_uint(&mut buf, (MAX_RECORD_COLUMNS as u64) + 1).unwrap();
        let mut slice: &[u8] = &buf;
        assert!(matches!(
            read_record(&mut slice),
            Err(TableError::Protocol(_))
        ));
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let mut buf = Vec::new();
        write_uint(&mut buf, 2).unwrap();
        buf.extend_from_slice(&[0xFF, 0xFE]);
        let mut slice: &[u8] = &buf;
        assert!(matches!(read_utf(&mut slice), Err(TableError::Protocol(_))));
    }
}
