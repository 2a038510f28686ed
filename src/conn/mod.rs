// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use mysql_common::{
    constants::{CapabilityFlags, Command, StatusFlags},
    params::Params,
    value::{convert::from_value_opt, Value},
};

use std::{borrow::Cow, fmt, sync::Arc};

use crate::{
    conf::{
        max_heap_bytes, ByteLimit, PropertySnapshot, ReadableProperty, RuntimeProperties,
        MAX_MAX_ALLOWED_PACKET,
    },
    conn::{
        cancel::CancelToken,
        handshake::{default_connect_attributes, Handshake, HandshakeConfig},
        query_result::Or,
        queryable::{AsStatement, Queryable},
        stmt::InnerStmt,
        stmt_cache::StmtCache,
    },
    error::{DriverError, Error, MySqlError, ProtocolError, Result},
    events::EventSink,
    io::{ReadMysqlExt, Stream, Transport},
    packet::PacketStream,
    packets::{is_eof, is_err, is_result_set_terminator, Column, ErrPacket, OkPacket, StmtPrepareOk},
    proto::{binary, text, Binary, Text},
    OptsBuilder, QueryResult, Statement,
};

use self::opts::Opts;

pub mod auth;
pub mod cancel;
pub mod handshake;
pub mod opts;
pub mod query_result;
pub mod queryable;
pub mod stmt;
mod stmt_cache;

struct ConnInner {
    opts: Opts,
    stream: PacketStream<Box<dyn Transport>>,
    properties: RuntimeProperties,
    events: Arc<dyn EventSink>,
    stmt_cache: StmtCache,
    capabilities: CapabilityFlags,
    connection_id: u32,
    server_version: Option<(u16, u16, u16)>,
    status_flags: StatusFlags,
    has_results: bool,
    broken: bool,
}

/// Mysql connection.
///
/// Every operation takes `&mut self`, a connection serves one command at a time. Results are
/// streamed: a [`QueryResult`] borrows the connection until it is dropped.
pub struct Conn(Box<ConnInner>);

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("connection_id", &self.0.connection_id)
            .field("server_version", &self.0.server_version)
            .field("capabilities", &self.0.capabilities)
            .field("status_flags", &self.0.status_flags)
            .field("cached_statements", &self.0.stmt_cache.len())
            .field("broken", &self.0.broken)
            .finish()
    }
}

impl Conn {
    /// Connects to the server described by `opts` over TCP or a unix socket.
    ///
    /// If `prefer_socket` is set and the server is on the loopback interface, the driver asks the
    /// server for its socket path and reconnects through it. Failure to do so is not an error,
    /// the TCP connection is kept.
    pub fn new<T: Into<Opts>>(opts: T) -> Result<Conn> {
        let opts = opts.into();
        let stream = Stream::connect(&opts)?;
        let mut conn = Conn::open(stream, opts)?;

        let opts = &conn.0.opts;
        if opts.get_socket().is_none() && opts.get_prefer_socket() && opts.addr_is_loopback() {
            let socket = conn
                .get_system_var("socket")?
                .and_then(|value| from_value_opt::<String>(value).ok())
                .filter(|socket| !socket.is_empty());
            if let Some(socket) = socket {
                let opts = OptsBuilder::from_opts(conn.0.opts.clone()).socket(Some(socket));
                if let Ok(socket_conn) = Conn::new(opts) {
                    return Ok(socket_conn);
                }
            }
        }

        Ok(conn)
    }

    /// Runs the connection phase over an already established `transport`.
    pub fn open<T, O>(transport: T, opts: O) -> Result<Conn>
    where
        T: Transport + 'static,
        O: Into<Opts>,
    {
        let opts = opts.into();
        let events = opts.get_event_sink();
        let properties = RuntimeProperties::new(
            opts.get_max_allowed_packet(),
            opts.get_max_result_buffer(),
            max_heap_bytes(opts.get_max_heap_size()),
            events.clone(),
        )?;

        let transport: Box<dyn Transport> = Box::new(transport);
        let secure = transport.is_secure();
        let mut stream = PacketStream::new(transport, properties.snapshot().max_allowed_packet);

        let mut connect_attributes = default_connect_attributes();
        connect_attributes.extend(
            opts.get_connect_attrs()
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );
        let registry = opts.get_auth_plugins();
        let config = HandshakeConfig {
            user: opts.get_user().unwrap_or_default(),
            password: opts.get_pass(),
            db_name: opts.get_db_name(),
            connect_attributes: &connect_attributes,
            max_packet_size: MAX_MAX_ALLOWED_PACKET as u32,
            registry: &registry,
            events: &*events,
        };
        let established = Handshake::new(config, secure).run(&mut stream)?;

        let mut conn = Conn(Box::new(ConnInner {
            stmt_cache: StmtCache::new(opts.get_stmt_cache_size()),
            opts,
            stream,
            properties,
            events,
            capabilities: established.capabilities,
            connection_id: established.connection_id,
            server_version: established.server_version,
            status_flags: established.status_flags,
            has_results: false,
            broken: false,
        }));

        if !conn.0.properties.max_allowed_packet().is_explicitly_set() {
            conn.refresh_max_allowed_packet()?;
        }

        Ok(conn)
    }

    fn refresh_max_allowed_packet(&mut self) -> Result<()> {
        let server_value = self
            .get_system_var("max_allowed_packet")?
            .and_then(|value| from_value_opt::<usize>(value).ok());
        if let Some(server_value) = server_value {
            let value = self.0.properties.adopt_server_max_allowed_packet(server_value);
            self.0.stream.set_max_allowed_packet(value);
        }
        Ok(())
    }

    fn get_system_var(&mut self, name: &str) -> Result<Option<Value>> {
        let row = self.query_first(format!("SELECT @@{}", name))?;
        Ok(row.and_then(|row| row.unwrap().into_iter().next()))
    }

    /// Id the server assigned to this connection.
    pub fn connection_id(&self) -> u32 {
        self.0.connection_id
    }

    /// Server version parsed from the handshake, if it follows `major.minor.patch`.
    pub fn server_version(&self) -> Option<(u16, u16, u16)> {
        self.0.server_version
    }

    /// Capabilities negotiated during the handshake.
    pub fn capabilities(&self) -> CapabilityFlags {
        self.0.capabilities
    }

    /// Live properties of this connection.
    ///
    /// Changes take effect with the next command; commands in progress keep the values they
    /// started with.
    pub fn properties(&self) -> &RuntimeProperties {
        &self.0.properties
    }

    /// `true` once an I/O or protocol error left the connection unusable.
    pub fn is_broken(&self) -> bool {
        self.0.broken
    }

    /// Returns a handle able to interrupt a query running on this connection.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken::new(self.0.connection_id, self.0.opts.clone())
    }

    /// Checks that the server is alive.
    pub fn ping(&mut self) -> Result<()> {
        self.begin_command()?;
        self.write_command(&[Command::COM_PING as u8])?;
        let payload = self.read_packet()?;
        if is_err(&payload) {
            return Err(self.server_error(&payload));
        }
        let ok = self.read_ok(&payload)?;
        self.handle_ok(&ok);
        Ok(())
    }

    /// Resets the server-side state of `stmt` (`COM_STMT_RESET`).
    pub fn reset_stmt(&mut self, stmt: &Statement) -> Result<()> {
        self.begin_command()?;
        self.write_command(&binary::encode_reset(stmt.id()))?;
        let payload = self.read_packet()?;
        if is_err(&payload) {
            return Err(self.server_error(&payload));
        }
        let ok = self.read_ok(&payload)?;
        self.handle_ok(&ok);
        Ok(())
    }

    /// Sends `COM_QUIT` and shuts the transport down.
    pub fn close(mut self) -> Result<()> {
        let result = if self.0.broken {
            Ok(())
        } else {
            self.write_command(&[Command::COM_QUIT as u8])
        };
        self.0.broken = true;
        self.0.stream.shutdown()?;
        result
    }

    pub(crate) fn events(&self) -> &dyn EventSink {
        &*self.0.events
    }

    pub(crate) fn mark_broken(&mut self) {
        self.0.broken = true;
        self.0.has_results = false;
    }

    pub(crate) fn more_results_exists(&self) -> bool {
        self.0
            .status_flags
            .contains(StatusFlags::SERVER_MORE_RESULTS_EXISTS)
    }

    /// Marks the connection broken if `result` carries a fatal error.
    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref err) = result {
            if err.is_fatal() {
                self.mark_broken();
            }
        }
        result
    }

    /// Refuses to start on a broken connection, applies the current properties otherwise.
    fn begin_command(&mut self) -> Result<PropertySnapshot> {
        if self.0.broken {
            return Err(DriverError::ConnectionBroken.into());
        }
        let snapshot = self.0.properties.snapshot();
        self.0
            .stream
            .set_max_allowed_packet(snapshot.max_allowed_packet);
        Ok(snapshot)
    }

    fn write_command(&mut self, payload: &[u8]) -> Result<()> {
        let result = self.0.stream.write_command(payload);
        self.track(result)
    }

    fn read_packet(&mut self) -> Result<Vec<u8>> {
        if self.0.broken {
            return Err(DriverError::ConnectionBroken.into());
        }
        let result = self.0.stream.read_packet();
        self.track(result)
    }

    fn read_ok(&mut self, payload: &[u8]) -> Result<OkPacket> {
        let result = OkPacket::parse(payload, self.0.capabilities);
        self.track(result)
    }

    fn handle_ok(&mut self, ok: &OkPacket) {
        self.0.status_flags = ok.status_flags();
    }

    /// Turns an ERR payload into an error. The exchange ends with it.
    fn server_error(&mut self, payload: &[u8]) -> Error {
        self.0.has_results = false;
        self.0
            .status_flags
            .remove(StatusFlags::SERVER_MORE_RESULTS_EXISTS);
        match ErrPacket::parse(payload) {
            Ok(err) => MySqlError::from(err).into(),
            Err(err) => {
                self.mark_broken();
                err
            }
        }
    }

    fn unexpected_packet(&mut self, payload: &[u8]) -> Error {
        self.mark_broken();
        ProtocolError::UnexpectedPacket {
            first_byte: payload.first().copied(),
        }
        .into()
    }

    /// Reads `count` column definitions and, unless `CLIENT_DEPRECATE_EOF` is set, the EOF
    /// packet that follows them.
    fn read_column_defs(&mut self, count: usize) -> Result<Vec<Column>> {
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let payload = self.read_packet()?;
            let column = Column::parse(&payload);
            columns.push(self.track(column)?);
        }
        if !self
            .0
            .capabilities
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
        {
            let payload = self.read_packet()?;
            if !is_eof(&payload) {
                return Err(self.unexpected_packet(&payload));
            }
        }
        Ok(columns)
    }

    /// Reads the head of a result set: either an OK packet or the column definitions.
    pub(crate) fn handle_result_set(&mut self) -> Result<Or<Vec<Column>, OkPacket>> {
        let payload = self.read_packet()?;
        match payload.first() {
            Some(0x00) => {
                let ok = self.read_ok(&payload)?;
                self.handle_ok(&ok);
                Ok(Or::B(ok))
            }
            Some(0xFF) => Err(self.server_error(&payload)),
            // LOCAL INFILE requests need CLIENT_LOCAL_FILES, which is never asked for
            Some(0xFB) | None => Err(self.unexpected_packet(&payload)),
            Some(_) => {
                let column_count = match (&payload[..]).read_lenenc_int() {
                    Ok(count) => count as usize,
                    Err(_) => {
                        self.mark_broken();
                        return Err(ProtocolError::MalformedPacket("column count").into());
                    }
                };
                let columns = self.read_column_defs(column_count)?;
                self.0.has_results = true;
                Ok(Or::A(columns))
            }
        }
    }

    /// Next row payload of the current set, `None` once its terminator was read.
    pub(crate) fn next_row_packet(&mut self) -> Result<Option<Vec<u8>>> {
        if !self.0.has_results {
            return Ok(None);
        }

        let payload = self.read_packet()?;
        if is_result_set_terminator(&payload, self.0.capabilities) {
            self.0.has_results = false;
            let ok = if self
                .0
                .capabilities
                .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
            {
                OkPacket::parse(&payload, self.0.capabilities)
            } else {
                OkPacket::from_eof(&payload)
            };
            let ok = self.track(ok)?;
            self.handle_ok(&ok);
            Ok(None)
        } else if is_err(&payload) {
            Err(self.server_error(&payload))
        } else {
            Ok(Some(payload))
        }
    }

    /// Reads and discards the rest of the current set.
    pub(crate) fn skip_result_set(&mut self) -> Result<()> {
        while self.next_row_packet()?.is_some() {}
        Ok(())
    }

    fn _prepare(&mut self, query: &str) -> Result<InnerStmt> {
        self.begin_command()?;
        self.write_command(&binary::encode_prepare(query.as_bytes()))?;

        let payload = self.read_packet()?;
        if is_err(&payload) {
            return Err(self.server_error(&payload));
        }
        let prepare_ok = StmtPrepareOk::parse(&payload);
        let prepare_ok = self.track(prepare_ok)?;

        let params = self.read_column_defs_if_any(prepare_ok.num_params)?;
        let columns = self.read_column_defs_if_any(prepare_ok.num_columns)?;

        Ok(InnerStmt::new(prepare_ok, self.0.connection_id)
            .with_params(params)
            .with_columns(columns))
    }

    fn read_column_defs_if_any(&mut self, count: u16) -> Result<Vec<Column>> {
        if count > 0 {
            self.read_column_defs(count as usize)
        } else {
            Ok(Vec::new())
        }
    }

    /// Checks `params` against the statement and sends `COM_STMT_EXECUTE`.
    fn _execute(
        &mut self,
        id: u32,
        num_params: u16,
        params: Params,
    ) -> Result<(ByteLimit, Or<Vec<Column>, OkPacket>)> {
        let values = match params {
            Params::Empty => Vec::new(),
            Params::Positional(values) => values,
            Params::Named(_) => return Err(DriverError::NamedParamsForPositionalQuery.into()),
        };
        if num_params as usize != values.len() {
            return Err(DriverError::MismatchedStmtParams(num_params, values.len()).into());
        }

        let snapshot = self.begin_command()?;
        let payload = binary::encode_execute(id, &values)?;
        self.write_command(&payload)?;
        let meta = self.handle_result_set()?;
        Ok((snapshot.max_result_buffer, meta))
    }

    /// `true` for a statement prepared from query text that the disabled cache does not keep.
    fn is_uncached(&self, statement: &Cow<'_, Statement>) -> bool {
        matches!(statement, Cow::Owned(_)) && !self.0.stmt_cache.is_enabled()
    }

    pub(crate) fn close_statement(&mut self, id: u32) -> Result<()> {
        self.begin_command()?;
        self.write_command(&binary::encode_close(id))
    }
}

impl Queryable for Conn {
    fn query_iter<Q: AsRef<str>>(&mut self, query: Q) -> Result<QueryResult<'_, Text>> {
        let snapshot = self.begin_command()?;
        self.write_command(&text::encode_query(query.as_ref().as_bytes()))?;
        let meta = self.handle_result_set()?;
        Ok(QueryResult::new(self, meta, snapshot.max_result_buffer))
    }

    fn prep<Q: AsRef<str>>(&mut self, query: Q) -> Result<Statement> {
        let query = query.as_ref();
        if let Some(inner) = self.0.stmt_cache.by_query(query) {
            return Ok(Statement::new(inner));
        }

        let inner = Arc::new(self._prepare(query)?);
        if let Some(evicted) = self.0.stmt_cache.put(query.into(), inner.clone()) {
            self.close_statement(evicted.id())?;
        }
        Ok(Statement::new(inner))
    }

    fn close(&mut self, stmt: Statement) -> Result<()> {
        self.0.stmt_cache.remove(stmt.id());
        self.close_statement(stmt.id())
    }

    fn exec_iter<S, P>(&mut self, stmt: S, params: P) -> Result<QueryResult<'_, Binary>>
    where
        S: AsStatement,
        P: Into<Params>,
    {
        let statement = stmt.as_statement(self)?;
        let (id, num_params) = (statement.id(), statement.num_params());
        let uncached = self.is_uncached(&statement);

        match self._execute(id, num_params, params.into()) {
            Ok((limit, meta)) => {
                let result = QueryResult::new(self, meta, limit);
                Ok(if uncached {
                    result.close_statement_on_drop(id)
                } else {
                    result
                })
            }
            Err(err) => {
                if uncached {
                    let _ = self.close_statement(id);
                }
                Err(err)
            }
        }
    }

    fn exec_batch<S, P, I>(&mut self, stmt: S, params: I) -> Result<()>
    where
        Self: Sized,
        S: AsStatement,
        P: Into<Params>,
        I: IntoIterator<Item = P>,
    {
        let statement = stmt.as_statement(self)?;
        let uncached = self.is_uncached(&statement);
        let mut result = Ok(());
        for params in params {
            result = self.exec_drop(statement.as_ref(), params);
            if result.is_err() {
                break;
            }
        }

        if uncached {
            let closed = self.close_statement(statement.id());
            result.and(closed)
        } else {
            result
        }
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if !self.0.broken {
            let _ = self.0.stream.write_command(&[Command::COM_QUIT as u8]);
        }
        let _ = self.0.stream.shutdown();
    }
}
