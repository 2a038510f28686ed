// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::sync::Arc;

use crate::packets::{Column, StmtPrepareOk};

#[derive(Debug, Clone, PartialEq)]
pub struct InnerStmt {
    columns: Arc<[Column]>,
    params: Arc<[Column]>,
    prepare_ok: StmtPrepareOk,
    connection_id: u32,
}

impl InnerStmt {
    pub fn new(prepare_ok: StmtPrepareOk, connection_id: u32) -> InnerStmt {
        InnerStmt {
            columns: Arc::from(Vec::new()),
            params: Arc::from(Vec::new()),
            prepare_ok,
            connection_id,
        }
    }

    pub fn with_params(mut self, params: Vec<Column>) -> Self {
        self.params = params.into();
        self
    }

    pub fn with_columns(mut self, columns: Vec<Column>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn columns(&self) -> Arc<[Column]> {
        self.columns.clone()
    }

    pub fn params(&self) -> &[Column] {
        &self.params
    }

    pub fn id(&self) -> u32 {
        self.prepare_ok.statement_id
    }

    pub const fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn num_params(&self) -> u16 {
        self.prepare_ok.num_params
    }

    pub fn num_columns(&self) -> u16 {
        self.prepare_ok.num_columns
    }
}

/// Server-side prepared statement.
///
/// Cheap to clone. Only valid on the connection that prepared it.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub(crate) inner: Arc<InnerStmt>,
}

impl Statement {
    pub(crate) fn new(inner: Arc<InnerStmt>) -> Self {
        Self { inner }
    }

    /// Columns of the result set, as announced when preparing.
    pub fn columns(&self) -> Arc<[Column]> {
        self.inner.columns()
    }

    pub fn params(&self) -> &[Column] {
        self.inner.params()
    }

    pub fn id(&self) -> u32 {
        self.inner.id()
    }

    pub fn connection_id(&self) -> u32 {
        self.inner.connection_id()
    }

    pub fn num_params(&self) -> u16 {
        self.inner.num_params()
    }

    pub fn num_columns(&self) -> u16 {
        self.inner.num_columns()
    }
}
