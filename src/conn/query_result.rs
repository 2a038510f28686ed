// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::{borrow::Cow, marker::PhantomData, sync::Arc};

use crate::{
    conf::ByteLimit,
    error::ResultError,
    events::Event,
    packets::{Column, OkPacket},
    proto::Protocol,
    Conn, Error, Result, Row,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Or<A, B> {
    A(A),
    B(B),
}

/// State of a result set iterator.
#[derive(Debug)]
enum SetIteratorState {
    /// Iterator is in a non-empty set.
    InSet(Arc<[Column]>),
    /// Iterator is in an empty set.
    InEmptySet(OkPacket),
    /// Iterator is in an errored result set.
    Errored(Error),
    /// The set outgrew the byte limit, its remaining rows are discarded.
    Skipping,
    /// Next result set isn't handled.
    OnBoundary,
    /// No more result sets.
    Done,
}

impl SetIteratorState {
    fn ok_packet(&self) -> Option<&OkPacket> {
        if let Self::InEmptySet(ref ok) = self {
            Some(ok)
        } else {
            None
        }
    }

    fn columns(&self) -> Option<&Arc<[Column]>> {
        if let Self::InSet(ref cols) = self {
            Some(cols)
        } else {
            None
        }
    }
}

impl From<Or<Vec<Column>, OkPacket>> for SetIteratorState {
    fn from(or: Or<Vec<Column>, OkPacket>) -> Self {
        match or {
            Or::A(cols) => Self::InSet(cols.into()),
            Or::B(ok) => Self::InEmptySet(ok),
        }
    }
}

impl From<Error> for SetIteratorState {
    fn from(err: Error) -> Self {
        Self::Errored(err)
    }
}

/// Response to a query or statement execution.
///
/// It is an iterator:
/// *   over result sets (via `Self::iter`)
/// *   over rows of a current result set (via `Iterator` impl)
///
/// Rows are read from the connection one packet at a time. Payload bytes of the current set are
/// summed up and checked against the `max_result_buffer` limit in effect when the statement was
/// issued. Once the limit is exceeded the iterator yields
/// [`ResultError::BufferLimitExceeded`] and the rest of the set is read and thrown away.
///
/// Dropping a `QueryResult` drains whatever is left of the response, so the connection is ready
/// for the next command afterwards.
#[derive(Debug)]
pub struct QueryResult<'c, T: Protocol> {
    conn: &'c mut Conn,
    state: SetIteratorState,
    set_index: usize,
    limit: ByteLimit,
    set_bytes: u64,
    row_index: u64,
    close_on_drop: Option<u32>,
    protocol: PhantomData<T>,
}

impl<'c, T: Protocol> QueryResult<'c, T> {
    pub(crate) fn new(
        conn: &'c mut Conn,
        meta: Or<Vec<Column>, OkPacket>,
        limit: ByteLimit,
    ) -> QueryResult<'c, T> {
        QueryResult {
            conn,
            state: meta.into(),
            set_index: 0,
            limit,
            set_bytes: 0,
            row_index: 0,
            close_on_drop: None,
            protocol: PhantomData,
        }
    }

    /// Closes the statement `id` on the server once the response is consumed.
    pub(crate) fn close_statement_on_drop(mut self, id: u32) -> Self {
        self.close_on_drop = Some(id);
        self
    }

    /// Updates state with the next result set, if any.
    ///
    /// **Requires:** `self.state == OnBoundary`
    fn handle_next(&mut self) {
        debug_assert!(
            matches!(self.state, SetIteratorState::OnBoundary),
            "self.state != OnBoundary"
        );

        self.set_bytes = 0;
        self.row_index = 0;
        if self.conn.more_results_exists() {
            match self.conn.handle_result_set() {
                Ok(meta) => self.state = meta.into(),
                Err(err) => self.state = err.into(),
            }
            self.set_index += 1;
        } else {
            self.state = SetIteratorState::Done;
        }
    }

    /// Moves to the next set unless `err` left the connection unusable.
    fn handle_error(&mut self, err: Error) -> Option<Result<Row>> {
        if err.is_fatal() {
            self.state = SetIteratorState::Done;
        } else {
            self.handle_next();
        }
        Some(Err(err))
    }

    fn next_row(&mut self, cols: Arc<[Column]>) -> Option<Result<Row>> {
        let payload = match self.conn.next_row_packet() {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                self.handle_next();
                return None;
            }
            Err(err) => return self.handle_error(err),
        };

        self.set_bytes += payload.len() as u64;
        if let Some(limit) = self.limit.as_bytes().filter(|limit| self.set_bytes > *limit) {
            let observed = self.set_bytes;
            self.conn
                .events()
                .emit(&Event::BufferLimitExceeded { limit, observed });
            self.state = SetIteratorState::Skipping;
            return Some(Err(
                ResultError::BufferLimitExceeded { limit, observed }.into()
            ));
        }

        let row_index = self.row_index;
        self.row_index += 1;
        match T::decode_row(&payload, cols.clone()) {
            Ok(row) => {
                self.state = SetIteratorState::InSet(cols);
                Some(Ok(row))
            }
            Err(Error::DecodeError(err)) => {
                self.conn.events().emit(&Event::RowDiscarded {
                    row_index,
                    reason: err.to_string(),
                });
                self.state = SetIteratorState::InSet(cols);
                Some(Err(err.into()))
            }
            Err(err) => {
                // the row header or null-bitmap is broken, the stream can't be trusted
                self.conn.mark_broken();
                self.state = SetIteratorState::Done;
                Some(Err(err))
            }
        }
    }

    /// Returns an iterator over the current result set.
    ///
    /// The returned iterator will be consumed either by the caller
    /// or implicitly by the `ResultSet::drop`. This operation
    /// will advance `self` to the next result set (if any).
    pub fn iter<'d>(&'d mut self) -> Option<ResultSet<'c, 'd, T>> {
        use SetIteratorState::*;

        if let OnBoundary | Done = &self.state {
            None
        } else {
            Some(ResultSet {
                set_index: self.set_index,
                inner: self,
            })
        }
    }

    /// `true` once every result set of the response was consumed.
    pub fn is_done(&self) -> bool {
        matches!(self.state, SetIteratorState::Done)
    }

    /// Whether the server announced another result set after the current one.
    pub fn more_results_exists(&self) -> bool {
        self.conn.more_results_exists()
    }

    /// Byte limit this result is checked against.
    pub fn byte_limit(&self) -> ByteLimit {
        self.limit
    }

    /// Row payload bytes read so far from the current result set.
    pub fn bytes_read(&self) -> u64 {
        self.set_bytes
    }

    /// Returns the number of affected rows for the current result set.
    pub fn affected_rows(&self) -> u64 {
        self.state
            .ok_packet()
            .map(|ok| ok.affected_rows())
            .unwrap_or_default()
    }

    /// Returns the last insert id for the current result set.
    pub fn last_insert_id(&self) -> Option<u64> {
        self.state.ok_packet().and_then(|ok| ok.last_insert_id())
    }

    /// Returns the warnings count for the current result set.
    pub fn warnings(&self) -> u16 {
        self.state
            .ok_packet()
            .map(|ok| ok.warnings())
            .unwrap_or_default()
    }

    /// [Info] for the current result set.
    ///
    /// Will be empty if not defined.
    ///
    /// [Info]: http://dev.mysql.com/doc/internals/en/packet-OK_Packet.html
    pub fn info_ref(&self) -> &[u8] {
        self.state
            .ok_packet()
            .map(|ok| ok.info_ref())
            .unwrap_or_default()
    }

    pub fn info_str(&self) -> Cow<'_, str> {
        self.state
            .ok_packet()
            .map(|ok| ok.info_str())
            .unwrap_or_else(|| "".into())
    }

    /// Returns columns of the current result rest.
    pub fn columns(&self) -> SetColumns<'_> {
        SetColumns {
            inner: self.state.columns(),
        }
    }
}

impl<T: Protocol> Drop for QueryResult<'_, T> {
    fn drop(&mut self) {
        while self.iter().is_some() {}
        if let Some(id) = self.close_on_drop.take() {
            let _ = self.conn.close_statement(id);
        }
    }
}

#[derive(Debug)]
pub struct ResultSet<'a, 'd, T: Protocol> {
    set_index: usize,
    inner: &'d mut QueryResult<'a, T>,
}

impl<'a, T: Protocol> std::ops::Deref for ResultSet<'a, '_, T> {
    type Target = QueryResult<'a, T>;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl<T: Protocol> Iterator for ResultSet<'_, '_, T> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.set_index == self.inner.set_index {
            self.inner.next()
        } else {
            None
        }
    }
}

impl<T: Protocol> Drop for ResultSet<'_, '_, T> {
    fn drop(&mut self) {
        while self.next().is_some() {}
    }
}

impl<T: Protocol> Iterator for QueryResult<'_, T> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        use SetIteratorState::*;

        let state = std::mem::replace(&mut self.state, OnBoundary);

        match state {
            InSet(cols) => self.next_row(cols),
            InEmptySet(_) => {
                self.handle_next();
                None
            }
            Errored(err) => self.handle_error(err),
            Skipping => match self.conn.skip_result_set() {
                Ok(()) => {
                    self.handle_next();
                    None
                }
                Err(err) => self.handle_error(err),
            },
            OnBoundary => None,
            Done => {
                self.state = Done;
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetColumns<'a> {
    inner: Option<&'a Arc<[Column]>>,
}

impl<'a> SetColumns<'a> {
    /// Returns an index of a column by its name.
    pub fn column_index<U: AsRef<str>>(&self, name: U) -> Option<usize> {
        let name = name.as_ref();
        self.inner
            .and_then(|cols| cols.iter().position(|col| col.name_str() == name))
    }

    pub fn as_ref(&self) -> &[Column] {
        self.inner.map(|cols| &cols[..]).unwrap_or(&[][..])
    }
}
