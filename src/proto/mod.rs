// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Row and command codecs for the text and binary protocols.

use std::sync::Arc;

use crate::{packets::Column, Result, Row};

pub mod binary;
pub mod text;

/// Row format of a result set.
pub trait Protocol: 'static + Send + Sync {
    fn decode_row(payload: &[u8], columns: Arc<[Column]>) -> Result<Row>;
}

/// Rows of `COM_QUERY` results.
#[derive(Debug, Clone, Copy)]
pub struct Text;

impl Protocol for Text {
    fn decode_row(payload: &[u8], columns: Arc<[Column]>) -> Result<Row> {
        text::decode_row(payload, columns)
    }
}

/// Rows of `COM_STMT_EXECUTE` results.
#[derive(Debug, Clone, Copy)]
pub struct Binary;

impl Protocol for Binary {
    fn decode_row(payload: &[u8], columns: Arc<[Column]>) -> Result<Row> {
        binary::decode_row(payload, columns)
    }
}
