// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Prepared statement codec.
//!
//! Parameters go out in `COM_STMT_EXECUTE`, rows come back in the binary row format. Both use a
//! null bitmap: parameters set bit `i` for parameter `i`, rows set bit `i + 2` for column `i`.

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use mysql_common::{
    constants::{ColumnFlags, ColumnType, Command},
    value::Value,
};

use std::{io, io::Write as _, sync::Arc};

use crate::{
    error::{DecodeError, ProtocolError},
    io::{ReadMysqlExt, WriteMysqlExt},
    packets::Column,
    Result, Row,
};

const UNSIGNED_PARAM: u8 = 0x80;
const ROW_HEADER: u8 = 0x00;
const ROW_BITMAP_OFFSET: usize = 2;

/// `COM_STMT_PREPARE` payload.
pub fn encode_prepare(query: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(query.len() + 1);
    out.push(Command::COM_STMT_PREPARE as u8);
    out.extend_from_slice(query);
    out
}

/// `COM_STMT_CLOSE` payload.
pub fn encode_close(statement_id: u32) -> Vec<u8> {
    let mut out = vec![Command::COM_STMT_CLOSE as u8];
    out.extend_from_slice(&statement_id.to_le_bytes());
    out
}

/// `COM_STMT_RESET` payload.
pub fn encode_reset(statement_id: u32) -> Vec<u8> {
    let mut out = vec![Command::COM_STMT_RESET as u8];
    out.extend_from_slice(&statement_id.to_le_bytes());
    out
}

/// Type byte, unsigned flag byte.
fn param_type(value: &Value) -> (ColumnType, u8) {
    match value {
        Value::NULL => (ColumnType::MYSQL_TYPE_NULL, 0),
        Value::Bytes(_) => (ColumnType::MYSQL_TYPE_VAR_STRING, 0),
        Value::Int(_) => (ColumnType::MYSQL_TYPE_LONGLONG, 0),
        Value::UInt(_) => (ColumnType::MYSQL_TYPE_LONGLONG, UNSIGNED_PARAM),
        Value::Float(_) => (ColumnType::MYSQL_TYPE_FLOAT, 0),
        Value::Double(_) => (ColumnType::MYSQL_TYPE_DOUBLE, 0),
        Value::Date(..) => (ColumnType::MYSQL_TYPE_DATETIME, 0),
        Value::Time(..) => (ColumnType::MYSQL_TYPE_TIME, 0),
    }
}

fn write_param(out: &mut Vec<u8>, value: &Value) -> io::Result<()> {
    match *value {
        Value::NULL => Ok(()),
        Value::Bytes(ref bytes) => out.write_lenenc_bytes(bytes),
        Value::Int(x) => out.write_i64::<LE>(x),
        Value::UInt(x) => out.write_u64::<LE>(x),
        Value::Float(x) => out.write_f32::<LE>(x),
        Value::Double(x) => out.write_f64::<LE>(x),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let len = if micros != 0 {
                11
            } else if hour != 0 || minute != 0 || second != 0 {
                7
            } else if year != 0 || month != 0 || day != 0 {
                4
            } else {
                0
            };
            out.write_u8(len)?;
            if len >= 4 {
                out.write_u16::<LE>(year)?;
                out.write_all(&[month, day])?;
            }
            if len >= 7 {
                out.write_all(&[hour, minute, second])?;
            }
            if len == 11 {
                out.write_u32::<LE>(micros)?;
            }
            Ok(())
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let len = if micros != 0 {
                12
            } else if days != 0 || hours != 0 || minutes != 0 || seconds != 0 {
                8
            } else {
                0
            };
            out.write_u8(len)?;
            if len >= 8 {
                out.write_u8(negative as u8)?;
                out.write_u32::<LE>(days)?;
                out.write_all(&[hours, minutes, seconds])?;
            }
            if len == 12 {
                out.write_u32::<LE>(micros)?;
            }
            Ok(())
        }
    }
}

/// `COM_STMT_EXECUTE` payload, parameters bound anew on every call.
pub fn encode_execute(statement_id: u32, params: &[Value]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(16 + params.len() * 9);
    out.write_u8(Command::COM_STMT_EXECUTE as u8)?;
    out.write_u32::<LE>(statement_id)?;
    // CURSOR_TYPE_NO_CURSOR
    out.write_u8(0)?;
    // iteration count
    out.write_u32::<LE>(1)?;

    if params.is_empty() {
        return Ok(out);
    }

    let mut bitmap = vec![0u8; (params.len() + 7) / 8];
    for (i, value) in params.iter().enumerate() {
        if *value == Value::NULL {
            bitmap[i / 8] |= 1 << (i % 8);
        }
    }
    out.write_all(&bitmap)?;

    // new-params-bound
    out.write_u8(1)?;
    for value in params {
        let (column_type, flags) = param_type(value);
        out.write_all(&[column_type as u8, flags])?;
    }
    for value in params {
        write_param(&mut out, value)?;
    }
    Ok(out)
}

type Decoder = fn(&mut &[u8], &Column) -> io::Result<Value>;

fn is_unsigned(column: &Column) -> bool {
    column.flags().contains(ColumnFlags::UNSIGNED_FLAG)
}

fn decode_null(_: &mut &[u8], _: &Column) -> io::Result<Value> {
    Ok(Value::NULL)
}

fn decode_tiny(buf: &mut &[u8], column: &Column) -> io::Result<Value> {
    Ok(if is_unsigned(column) {
        Value::UInt(u64::from(buf.read_u8()?))
    } else {
        Value::Int(i64::from(buf.read_i8()?))
    })
}

fn decode_short(buf: &mut &[u8], column: &Column) -> io::Result<Value> {
    Ok(if is_unsigned(column) {
        Value::UInt(u64::from(buf.read_u16::<LE>()?))
    } else {
        Value::Int(i64::from(buf.read_i16::<LE>()?))
    })
}

fn decode_long(buf: &mut &[u8], column: &Column) -> io::Result<Value> {
    Ok(if is_unsigned(column) {
        Value::UInt(u64::from(buf.read_u32::<LE>()?))
    } else {
        Value::Int(i64::from(buf.read_i32::<LE>()?))
    })
}

fn decode_longlong(buf: &mut &[u8], column: &Column) -> io::Result<Value> {
    Ok(if is_unsigned(column) {
        Value::UInt(buf.read_u64::<LE>()?)
    } else {
        Value::Int(buf.read_i64::<LE>()?)
    })
}

fn decode_float(buf: &mut &[u8], _: &Column) -> io::Result<Value> {
    Ok(Value::Float(buf.read_f32::<LE>()?))
}

fn decode_double(buf: &mut &[u8], _: &Column) -> io::Result<Value> {
    Ok(Value::Double(buf.read_f64::<LE>()?))
}

fn invalid_len(what: &str, len: u8) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("invalid {} length {}", what, len),
    )
}

fn decode_datetime(buf: &mut &[u8], _: &Column) -> io::Result<Value> {
    let len = buf.read_u8()?;
    if !matches!(len, 0 | 4 | 7 | 11) {
        return Err(invalid_len("date", len));
    }
    let mut fields = (0u16, 0u8, 0u8, 0u8, 0u8, 0u8, 0u32);
    if len >= 4 {
        fields.0 = buf.read_u16::<LE>()?;
        fields.1 = buf.read_u8()?;
        fields.2 = buf.read_u8()?;
    }
    if len >= 7 {
        fields.3 = buf.read_u8()?;
        fields.4 = buf.read_u8()?;
        fields.5 = buf.read_u8()?;
    }
    if len == 11 {
        fields.6 = buf.read_u32::<LE>()?;
    }
    let (year, month, day, hour, minute, second, micros) = fields;
    Ok(Value::Date(year, month, day, hour, minute, second, micros))
}

fn decode_time(buf: &mut &[u8], _: &Column) -> io::Result<Value> {
    let len = buf.read_u8()?;
    match len {
        0 => Ok(Value::Time(false, 0, 0, 0, 0, 0)),
        8 | 12 => {
            let negative = buf.read_u8()? == 1;
            let days = buf.read_u32::<LE>()?;
            let hours = buf.read_u8()?;
            let minutes = buf.read_u8()?;
            let seconds = buf.read_u8()?;
            let micros = if len == 12 { buf.read_u32::<LE>()? } else { 0 };
            Ok(Value::Time(negative, days, hours, minutes, seconds, micros))
        }
        _ => Err(invalid_len("time", len)),
    }
}

fn decode_bytes(buf: &mut &[u8], _: &Column) -> io::Result<Value> {
    Ok(Value::Bytes(buf.read_lenenc_bytes()?))
}

/// Binary row decoders by column type.
static DECODERS: &[(ColumnType, Decoder)] = &[
    (ColumnType::MYSQL_TYPE_NULL, decode_null),
    (ColumnType::MYSQL_TYPE_TINY, decode_tiny),
    (ColumnType::MYSQL_TYPE_SHORT, decode_short),
    (ColumnType::MYSQL_TYPE_YEAR, decode_short),
    (ColumnType::MYSQL_TYPE_LONG, decode_long),
    (ColumnType::MYSQL_TYPE_INT24, decode_long),
    (ColumnType::MYSQL_TYPE_LONGLONG, decode_longlong),
    (ColumnType::MYSQL_TYPE_FLOAT, decode_float),
    (ColumnType::MYSQL_TYPE_DOUBLE, decode_double),
    (ColumnType::MYSQL_TYPE_DATE, decode_datetime),
    (ColumnType::MYSQL_TYPE_NEWDATE, decode_datetime),
    (ColumnType::MYSQL_TYPE_DATETIME, decode_datetime),
    (ColumnType::MYSQL_TYPE_DATETIME2, decode_datetime),
    (ColumnType::MYSQL_TYPE_TIMESTAMP, decode_datetime),
    (ColumnType::MYSQL_TYPE_TIMESTAMP2, decode_datetime),
    (ColumnType::MYSQL_TYPE_TIME, decode_time),
    (ColumnType::MYSQL_TYPE_TIME2, decode_time),
    (ColumnType::MYSQL_TYPE_DECIMAL, decode_bytes),
    (ColumnType::MYSQL_TYPE_NEWDECIMAL, decode_bytes),
    (ColumnType::MYSQL_TYPE_VARCHAR, decode_bytes),
    (ColumnType::MYSQL_TYPE_VAR_STRING, decode_bytes),
    (ColumnType::MYSQL_TYPE_STRING, decode_bytes),
    (ColumnType::MYSQL_TYPE_BIT, decode_bytes),
    (ColumnType::MYSQL_TYPE_ENUM, decode_bytes),
    (ColumnType::MYSQL_TYPE_SET, decode_bytes),
    (ColumnType::MYSQL_TYPE_TINY_BLOB, decode_bytes),
    (ColumnType::MYSQL_TYPE_MEDIUM_BLOB, decode_bytes),
    (ColumnType::MYSQL_TYPE_LONG_BLOB, decode_bytes),
    (ColumnType::MYSQL_TYPE_BLOB, decode_bytes),
    (ColumnType::MYSQL_TYPE_JSON, decode_bytes),
    (ColumnType::MYSQL_TYPE_GEOMETRY, decode_bytes),
];

fn decoder_for(type_tag: u8) -> Option<Decoder> {
    DECODERS
        .iter()
        .find(|(column_type, _)| *column_type as u8 == type_tag)
        .map(|(_, decoder)| *decoder)
}

/// Decodes a binary protocol row.
///
/// A payload too short for its header and null bitmap is a protocol violation. Problems with
/// individual values only make this row unusable.
pub fn decode_row(payload: &[u8], columns: Arc<[Column]>) -> Result<Row> {
    let bitmap_len = (columns.len() + 7 + ROW_BITMAP_OFFSET) / 8;
    if payload.len() < 1 + bitmap_len {
        return Err(ProtocolError::MalformedRow {
            expected_len: 1 + bitmap_len,
            actual_len: payload.len(),
        }
        .into());
    }
    if payload[0] != ROW_HEADER {
        return Err(ProtocolError::UnexpectedPacket {
            first_byte: Some(payload[0]),
        }
        .into());
    }

    let bitmap = &payload[1..1 + bitmap_len];
    let mut buf = &payload[1 + bitmap_len..];
    let mut values = Vec::with_capacity(columns.len());
    for (i, column) in columns.iter().enumerate() {
        let bit = i + ROW_BITMAP_OFFSET;
        if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
            values.push(Value::NULL);
            continue;
        }
        let decode = decoder_for(column.type_tag()).ok_or(DecodeError::UnsupportedType {
            column: i,
            type_tag: column.type_tag(),
        })?;
        let value = decode(&mut buf, column).map_err(|err| DecodeError::Malformed {
            column: i,
            reason: err.to_string(),
        })?;
        values.push(value);
    }
    if !buf.is_empty() {
        return Err(DecodeError::Malformed {
            column: columns.len().saturating_sub(1),
            reason: format!("{} trailing bytes", buf.len()),
        }
        .into());
    }
    Ok(Row::new(values, columns))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    fn columns(types: &[ColumnType]) -> Arc<[Column]> {
        types
            .iter()
            .map(|t| Column::new(*t))
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn should_skip_null_column_regardless_of_bytes() {
        let cols = columns(&[
            ColumnType::MYSQL_TYPE_LONG,
            ColumnType::MYSQL_TYPE_LONG,
            ColumnType::MYSQL_TYPE_LONG,
        ]);
        // column 2 of 3 is NULL: bit 1 + offset 2 = bit 3
        let mut payload = vec![0x00, 0b0000_1000];
        payload.extend_from_slice(&1i32.to_le_bytes());
        payload.extend_from_slice(&3i32.to_le_bytes());

        let row = decode_row(&payload, cols).unwrap();
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get(1), None);
        assert_eq!(row.get(2), Some(&Value::Int(3)));
    }

    #[test]
    fn should_decode_types_through_table() {
        let cols: Arc<[Column]> = vec![
            Column::new(ColumnType::MYSQL_TYPE_TINY).with_flags(ColumnFlags::UNSIGNED_FLAG),
            Column::new(ColumnType::MYSQL_TYPE_SHORT),
            Column::new(ColumnType::MYSQL_TYPE_LONGLONG).with_flags(ColumnFlags::UNSIGNED_FLAG),
            Column::new(ColumnType::MYSQL_TYPE_DOUBLE),
            Column::new(ColumnType::MYSQL_TYPE_DATETIME),
            Column::new(ColumnType::MYSQL_TYPE_TIME),
            Column::new(ColumnType::MYSQL_TYPE_VAR_STRING),
        ]
        .into();
        let mut payload = vec![0x00, 0x00, 0x00];
        payload.push(200);
        payload.extend_from_slice(&(-2i16).to_le_bytes());
        payload.extend_from_slice(&u64::MAX.to_le_bytes());
        payload.extend_from_slice(&1.5f64.to_le_bytes());
        payload.extend_from_slice(&[7, 0xE8, 0x07, 2, 29, 13, 45, 10]);
        payload.extend_from_slice(&[8, 1, 1, 0, 0, 0, 2, 3, 4]);
        payload.extend_from_slice(b"\x03abc");

        let row = decode_row(&payload, cols).unwrap();
        assert_eq!(
            row.unwrap(),
            vec![
                Value::UInt(200),
                Value::Int(-2),
                Value::UInt(u64::MAX),
                Value::Double(1.5),
                Value::Date(2024, 2, 29, 13, 45, 10, 0),
                Value::Time(true, 1, 2, 3, 4, 0),
                Value::Bytes(b"abc".to_vec()),
            ]
        );
    }

    #[test]
    fn should_scope_bad_value_to_row() {
        let cols = columns(&[ColumnType::MYSQL_TYPE_LONG, ColumnType::MYSQL_TYPE_LONGLONG]);
        let mut payload = vec![0x00, 0x00];
        payload.extend_from_slice(&1i32.to_le_bytes());
        payload.extend_from_slice(&[1, 2, 3]);
        match decode_row(&payload, cols) {
            Err(err @ Error::DecodeError(DecodeError::Malformed { column: 1, .. })) => {
                assert!(!err.is_fatal())
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn should_escalate_short_bitmap() {
        let cols = columns(&[ColumnType::MYSQL_TYPE_LONG; 7]);
        match decode_row(&[0x00, 0x00], cols) {
            Err(Error::ProtocolError(ProtocolError::MalformedRow {
                expected_len,
                actual_len,
            })) => assert_eq!((expected_len, actual_len), (3, 2)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn should_reject_unknown_type() {
        let cols: Arc<[Column]> =
            vec![Column::new(ColumnType::MYSQL_TYPE_LONG).with_type_tag(0x99)].into();
        match decode_row(&[0x00, 0x00, 0x01], cols) {
            Err(Error::DecodeError(DecodeError::UnsupportedType {
                column: 0,
                type_tag: 0x99,
            })) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn should_encode_execute_with_null_bitmap() {
        let params = [
            Value::Int(-1),
            Value::NULL,
            Value::Bytes(b"hi".to_vec()),
            Value::UInt(5),
        ];
        let payload = encode_execute(0x0102_0304, &params).unwrap();

        let mut expected = vec![0x17, 0x04, 0x03, 0x02, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00];
        expected.push(0b0000_0010);
        expected.push(0x01);
        expected.extend_from_slice(&[0x08, 0x00, 0x06, 0x00, 0xFD, 0x00, 0x08, 0x80]);
        expected.extend_from_slice(&(-1i64).to_le_bytes());
        expected.extend_from_slice(b"\x02hi");
        expected.extend_from_slice(&5u64.to_le_bytes());
        assert_eq!(payload, expected);
    }

    #[test]
    fn should_encode_execute_without_params() {
        let payload = encode_execute(9, &[]).unwrap();
        assert_eq!(payload, [0x17, 9, 0, 0, 0, 0, 1, 0, 0, 0]);
    }

    #[test]
    fn should_omit_trailing_zero_temporal_parts() {
        let mut out = Vec::new();
        write_param(&mut out, &Value::Date(2024, 1, 2, 0, 0, 0, 0)).unwrap();
        assert_eq!(out, [4, 0xE8, 0x07, 1, 2]);

        let mut out = Vec::new();
        write_param(&mut out, &Value::Date(2024, 1, 2, 3, 4, 5, 6)).unwrap();
        assert_eq!(out, [11, 0xE8, 0x07, 1, 2, 3, 4, 5, 6, 0, 0, 0]);

        let mut out = Vec::new();
        write_param(&mut out, &Value::Time(false, 0, 0, 0, 0, 0)).unwrap();
        assert_eq!(out, [0]);
    }

    #[test]
    fn should_encode_statement_commands() {
        assert_eq!(encode_prepare(b"SELECT ?"), b"\x16SELECT ?");
        assert_eq!(encode_close(3), [0x19, 3, 0, 0, 0]);
        assert_eq!(encode_reset(3), [0x1a, 3, 0, 0, 0]);
    }
}
