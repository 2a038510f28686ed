// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use mysql_common::{constants::Command, value::Value};

use std::sync::Arc;

use crate::{error::DecodeError, io::ReadMysqlExt, packets::Column, Result, Row};

const NULL_MARKER: u8 = 0xFB;

/// `COM_QUERY` payload.
pub fn encode_query(query: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(query.len() + 1);
    out.push(Command::COM_QUERY as u8);
    out.extend_from_slice(query);
    out
}

/// Decodes a text protocol row: one length-encoded string or `0xFB` (NULL) per column.
pub fn decode_row(payload: &[u8], columns: Arc<[Column]>) -> Result<Row> {
    let mut buf = payload;
    let mut values = Vec::with_capacity(columns.len());
    for column in 0..columns.len() {
        match buf.first() {
            Some(&NULL_MARKER) => {
                buf = &buf[1..];
                values.push(Value::NULL);
            }
            Some(_) => {
                let bytes = buf
                    .read_lenenc_bytes()
                    .map_err(|err| DecodeError::Malformed {
                        column,
                        reason: err.to_string(),
                    })?;
                values.push(Value::Bytes(bytes));
            }
            None => {
                return Err(DecodeError::Malformed {
                    column,
                    reason: "row ended early".into(),
                }
                .into())
            }
        }
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
    use mysql_common::constants::ColumnType;

    use super::*;
    use crate::error::Error;

    fn columns(n: usize) -> Arc<[Column]> {
        (0..n)
            .map(|_| Column::new(ColumnType::MYSQL_TYPE_VAR_STRING))
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn should_decode_text_row() {
        let row = decode_row(b"\x011\xfb\x05hello", columns(3)).unwrap();
        assert_eq!(
            row.unwrap(),
            vec![Value::Bytes(b"1".to_vec()), Value::NULL, Value::Bytes(b"hello".to_vec())]
        );
    }

    #[test]
    fn should_report_truncated_text_row() {
        match decode_row(b"\x011\x05hel", columns(2)) {
            Err(Error::DecodeError(DecodeError::Malformed { column, .. })) => assert_eq!(column, 1),
            other => panic!("unexpected {:?}", other),
        }
        match decode_row(b"\x011", columns(2)) {
            Err(Error::DecodeError(DecodeError::Malformed { column, .. })) => assert_eq!(column, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn should_encode_query() {
        assert_eq!(encode_query(b"SELECT 1"), b"\x03SELECT 1");
    }
}
