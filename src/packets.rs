// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Payload layouts of the packets a session exchanges outside of row data.

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use mysql_common::constants::{CapabilityFlags, ColumnFlags, ColumnType, StatusFlags};

use std::{borrow::Cow, convert::TryFrom, fmt, io, io::Write as _};

use crate::{
    error::{Error, ProtocolError, Result as MyResult},
    io::{ReadMysqlExt, WriteMysqlExt},
};

pub const OK_HEADER: u8 = 0x00;
pub const AUTH_MORE_DATA_HEADER: u8 = 0x01;
pub const EOF_HEADER: u8 = 0xFE;
pub const ERR_HEADER: u8 = 0xFF;

pub(crate) const UTF8MB4_GENERAL_CI: u8 = 45;

fn malformed(what: &'static str) -> impl Fn(io::Error) -> Error {
    move |_| ProtocolError::MalformedPacket(what).into()
}

fn expect_header(payload: &[u8], header: u8) -> MyResult<&[u8]> {
    match payload.first() {
        Some(&x) if x == header => Ok(&payload[1..]),
        first => Err(ProtocolError::UnexpectedPacket {
            first_byte: first.copied(),
        }
        .into()),
    }
}

/// Payload is an EOF packet (not an OK packet using the `0xFE` header).
pub fn is_eof(payload: &[u8]) -> bool {
    payload.first() == Some(&EOF_HEADER) && payload.len() < 9
}

pub fn is_err(payload: &[u8]) -> bool {
    payload.first() == Some(&ERR_HEADER)
}

/// Payload ends a result set: EOF, or OK with the EOF header if `CLIENT_DEPRECATE_EOF` is set.
pub fn is_result_set_terminator(payload: &[u8], capabilities: CapabilityFlags) -> bool {
    if capabilities.contains(CapabilityFlags::CLIENT_DEPRECATE_EOF) {
        payload.first() == Some(&EOF_HEADER) && payload.len() < 0xFF_FF_FF
    } else {
        is_eof(payload)
    }
}

/// OK packet, also used for the OK-flavoured terminator of a result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    affected_rows: u64,
    last_insert_id: Option<u64>,
    status_flags: StatusFlags,
    warnings: u16,
    info: Vec<u8>,
}

impl Default for OkPacket {
    fn default() -> Self {
        OkPacket {
            affected_rows: 0,
            last_insert_id: None,
            status_flags: StatusFlags::empty(),
            warnings: 0,
            info: Vec::new(),
        }
    }
}

impl OkPacket {
    /// Parses an OK packet. `0xFE` is accepted as the header of a terminating OK.
    pub fn parse(payload: &[u8], capabilities: CapabilityFlags) -> MyResult<OkPacket> {
        let body = match payload.first() {
            Some(&OK_HEADER) | Some(&EOF_HEADER) => &payload[1..],
            first => {
                return Err(ProtocolError::UnexpectedPacket {
                    first_byte: first.copied(),
                }
                .into())
            }
        };
        Self::read(body, capabilities).map_err(malformed("OK"))
    }

    fn read(mut buf: &[u8], capabilities: CapabilityFlags) -> io::Result<OkPacket> {
        let affected_rows = buf.read_lenenc_int()?;
        let last_insert_id = buf.read_lenenc_int()?;
        let (status_flags, warnings) = if capabilities.contains(CapabilityFlags::CLIENT_PROTOCOL_41)
        {
            let status = StatusFlags::from_bits_truncate(buf.read_u16::<LE>()?);
            (status, buf.read_u16::<LE>()?)
        } else {
            (StatusFlags::empty(), 0)
        };
        let info = if capabilities.contains(CapabilityFlags::CLIENT_SESSION_TRACK) && !buf.is_empty()
        {
            buf.read_lenenc_bytes()?
        } else {
            buf.to_vec()
        };
        Ok(OkPacket {
            affected_rows,
            last_insert_id: Some(last_insert_id).filter(|x| *x != 0),
            status_flags,
            warnings,
            info,
        })
    }

    /// Builds the terminating OK from an old-style EOF packet.
    pub fn from_eof(payload: &[u8]) -> MyResult<OkPacket> {
        let mut buf = expect_header(payload, EOF_HEADER)?;
        if buf.is_empty() {
            return Ok(OkPacket::default());
        }
        let warnings = buf.read_u16::<LE>().map_err(malformed("EOF"))?;
        let status = buf.read_u16::<LE>().map_err(malformed("EOF"))?;
        Ok(OkPacket {
            status_flags: StatusFlags::from_bits_truncate(status),
            warnings,
            ..OkPacket::default()
        })
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> Option<u64> {
        self.last_insert_id
    }

    pub fn status_flags(&self) -> StatusFlags {
        self.status_flags
    }

    pub fn warnings(&self) -> u16 {
        self.warnings
    }

    pub fn info_ref(&self) -> &[u8] {
        &self.info
    }

    pub fn info_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.info)
    }

    pub fn more_results_exists(&self) -> bool {
        self.status_flags
            .contains(StatusFlags::SERVER_MORE_RESULTS_EXISTS)
    }
}

/// ERR packet. Borrows the payload it was parsed from.
#[derive(Clone, PartialEq, Eq)]
pub struct ErrPacket<'a> {
    code: u16,
    state: &'a [u8],
    message: &'a [u8],
}

impl<'a> ErrPacket<'a> {
    pub fn parse(payload: &'a [u8]) -> MyResult<ErrPacket<'a>> {
        let mut buf = expect_header(payload, ERR_HEADER)?;
        let code = buf.read_u16::<LE>().map_err(malformed("ERR"))?;
        let (state, message): (&[u8], &[u8]) = match buf.split_first() {
            Some((b'#', rest)) if rest.len() >= 5 => (&rest[..5], &rest[5..]),
            _ => (b"HY000", buf),
        };
        Ok(ErrPacket {
            code,
            state,
            message,
        })
    }

    pub fn error_code(&self) -> u16 {
        self.code
    }

    pub fn sql_state_str(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.state)
    }

    pub fn message_str(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.message)
    }
}

impl fmt::Debug for ErrPacket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrPacket")
            .field("code", &self.code)
            .field("state", &self.sql_state_str())
            .field("message", &self.message_str())
            .finish()
    }
}

/// Initial handshake packet (protocol version 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakePacket {
    server_version: Vec<u8>,
    connection_id: u32,
    nonce: Vec<u8>,
    capabilities: CapabilityFlags,
    default_collation: u8,
    status_flags: StatusFlags,
    auth_plugin: Option<String>,
}

impl HandshakePacket {
    pub fn parse(payload: &[u8]) -> MyResult<HandshakePacket> {
        match payload.first() {
            Some(&10) => Self::read(&payload[1..]).map_err(malformed("handshake")),
            Some(&ERR_HEADER) => Err(Error::MySqlError(ErrPacket::parse(payload)?.into())),
            Some(&other) => Err(ProtocolError::UnsupportedProtocol(other).into()),
            None => Err(ProtocolError::UnexpectedPacket { first_byte: None }.into()),
        }
    }

    fn read(mut buf: &[u8]) -> io::Result<HandshakePacket> {
        let server_version = buf.read_null_terminated()?;
        let connection_id = buf.read_u32::<LE>()?;
        let mut nonce = buf.read_fixed_bytes(8)?;
        buf.read_u8()?;
        let mut capabilities = u32::from(buf.read_u16::<LE>()?);

        let mut handshake = HandshakePacket {
            server_version,
            connection_id,
            nonce: Vec::new(),
            capabilities: CapabilityFlags::empty(),
            default_collation: 0,
            status_flags: StatusFlags::empty(),
            auth_plugin: None,
        };

        if !buf.is_empty() {
            handshake.default_collation = buf.read_u8()?;
            handshake.status_flags = StatusFlags::from_bits_truncate(buf.read_u16::<LE>()?);
            capabilities |= u32::from(buf.read_u16::<LE>()?) << 16;
            let nonce_len = buf.read_u8()? as usize;
            buf.read_fixed_bytes(10)?;
            if capabilities & CapabilityFlags::CLIENT_SECURE_CONNECTION.bits() != 0 {
                let part2_len = nonce_len.saturating_sub(8).max(13);
                let mut part2 = buf.read_fixed_bytes(part2_len.min(buf.len()))?;
                if part2.last() == Some(&0) {
                    part2.pop();
                }
                nonce.extend(part2);
            }
            if capabilities & CapabilityFlags::CLIENT_PLUGIN_AUTH.bits() != 0 {
                // some servers omit the terminating NUL
                let name = match buf.iter().position(|x| *x == 0) {
                    Some(pos) => &buf[..pos],
                    None => buf,
                };
                handshake.auth_plugin = Some(String::from_utf8_lossy(name).into_owned());
            }
        }

        handshake.nonce = nonce;
        handshake.capabilities = CapabilityFlags::from_bits_truncate(capabilities);
        Ok(handshake)
    }

    pub fn server_version_ref(&self) -> &[u8] {
        &self.server_version
    }

    /// `(major, minor, patch)` parsed from the leading digits of the version string.
    pub fn server_version_parsed(&self) -> Option<(u16, u16, u16)> {
        let version = String::from_utf8_lossy(&self.server_version);
        let mut parts = version
            .split(|c: char| !c.is_ascii_digit())
            .take(3)
            .map(|x| x.parse::<u16>().ok());
        match (parts.next(), parts.next(), parts.next()) {
            (Some(Some(major)), Some(Some(minor)), Some(Some(patch))) => {
                Some((major, minor, patch))
            }
            _ => None,
        }
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    pub fn default_collation(&self) -> u8 {
        self.default_collation
    }

    pub fn status_flags(&self) -> StatusFlags {
        self.status_flags
    }

    pub fn auth_plugin(&self) -> Option<&str> {
        self.auth_plugin.as_deref()
    }
}

/// Client reply to the initial handshake.
#[derive(Debug, Clone)]
pub struct HandshakeResponse<'a> {
    pub capabilities: CapabilityFlags,
    pub max_packet_size: u32,
    pub collation: u8,
    pub user: &'a [u8],
    pub auth_response: &'a [u8],
    pub db_name: Option<&'a [u8]>,
    pub auth_plugin: &'a str,
    pub connect_attributes: &'a [(String, String)],
}

impl HandshakeResponse<'_> {
    /// Fails if the auth response does not fit the one-byte length prefix the negotiated
    /// capabilities call for.
    pub fn serialize(&self) -> MyResult<Vec<u8>> {
        let short_length = !self
            .capabilities
            .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA)
            && self
                .capabilities
                .contains(CapabilityFlags::CLIENT_SECURE_CONNECTION);
        if short_length && self.auth_response.len() > u8::MAX as usize {
            return Err(ProtocolError::MalformedPacket("handshake response").into());
        }

        let mut out = Vec::with_capacity(128);
        self.write(&mut out)?;
        Ok(out)
    }

    fn write(&self, out: &mut Vec<u8>) -> io::Result<()> {
        let caps = self.capabilities;
        out.write_u32::<LE>(caps.bits())?;
        out.write_u32::<LE>(self.max_packet_size)?;
        out.write_u8(self.collation)?;
        out.write_all(&[0; 23])?;
        out.write_null_terminated(self.user)?;

        if caps.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            out.write_lenenc_bytes(self.auth_response)?;
        } else if caps.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            out.write_u8(self.auth_response.len() as u8)?;
            out.write_all(self.auth_response)?;
        } else {
            out.write_null_terminated(self.auth_response)?;
        }

        if caps.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB) {
            out.write_null_terminated(self.db_name.unwrap_or_default())?;
        }
        if caps.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
            out.write_null_terminated(self.auth_plugin.as_bytes())?;
        }
        if caps.contains(CapabilityFlags::CLIENT_CONNECT_ATTRS) {
            let mut attrs = Vec::new();
            for (key, value) in self.connect_attributes {
                attrs.write_lenenc_bytes(key.as_bytes())?;
                attrs.write_lenenc_bytes(value.as_bytes())?;
            }
            out.write_lenenc_bytes(&attrs)?;
        }
        Ok(())
    }
}

/// Server reply during the authentication exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply<'a> {
    Ok(OkPacket),
    Err(ErrPacket<'a>),
    /// Continue with another plugin and a fresh nonce.
    Switch { plugin: String, nonce: Vec<u8> },
    /// Plugin-specific data for the current plugin.
    MoreData(&'a [u8]),
}

impl<'a> AuthReply<'a> {
    pub fn parse(payload: &'a [u8], capabilities: CapabilityFlags) -> MyResult<AuthReply<'a>> {
        match payload.first() {
            Some(&OK_HEADER) => OkPacket::parse(payload, capabilities).map(AuthReply::Ok),
            Some(&ERR_HEADER) => ErrPacket::parse(payload).map(AuthReply::Err),
            Some(&AUTH_MORE_DATA_HEADER) => Ok(AuthReply::MoreData(&payload[1..])),
            Some(&EOF_HEADER) => {
                let mut buf = &payload[1..];
                let plugin = buf.read_null_terminated().map_err(malformed("auth switch"))?;
                let mut nonce = buf.to_vec();
                if nonce.last() == Some(&0) {
                    nonce.pop();
                }
                Ok(AuthReply::Switch {
                    plugin: String::from_utf8_lossy(&plugin).into_owned(),
                    nonce,
                })
            }
            first => Err(ProtocolError::UnexpectedPacket {
                first_byte: first.copied(),
            }
            .into()),
        }
    }
}

/// Column definition (`Protocol::ColumnDefinition41`).
#[derive(Clone, PartialEq, Eq)]
pub struct Column {
    schema: Vec<u8>,
    table: Vec<u8>,
    org_table: Vec<u8>,
    name: Vec<u8>,
    org_name: Vec<u8>,
    character_set: u16,
    column_length: u32,
    type_tag: u8,
    flags: ColumnFlags,
    decimals: u8,
}

impl Column {
    pub fn parse(payload: &[u8]) -> MyResult<Column> {
        Self::read(payload).map_err(malformed("column definition"))
    }

    fn read(mut buf: &[u8]) -> io::Result<Column> {
        let _catalog = buf.read_lenenc_bytes()?;
        let schema = buf.read_lenenc_bytes()?;
        let table = buf.read_lenenc_bytes()?;
        let org_table = buf.read_lenenc_bytes()?;
        let name = buf.read_lenenc_bytes()?;
        let org_name = buf.read_lenenc_bytes()?;
        let _fixed_len = buf.read_lenenc_int()?;
        Ok(Column {
            schema,
            table,
            org_table,
            name,
            org_name,
            character_set: buf.read_u16::<LE>()?,
            column_length: buf.read_u32::<LE>()?,
            type_tag: buf.read_u8()?,
            flags: ColumnFlags::from_bits_truncate(buf.read_u16::<LE>()?),
            decimals: buf.read_u8()?,
        })
    }

    /// Builds a definition without a server, mostly useful for tests and tooling.
    pub fn new(column_type: ColumnType) -> Column {
        Column {
            schema: Vec::new(),
            table: Vec::new(),
            org_table: Vec::new(),
            name: Vec::new(),
            org_name: Vec::new(),
            character_set: u16::from(UTF8MB4_GENERAL_CI),
            column_length: 0,
            type_tag: column_type as u8,
            flags: ColumnFlags::empty(),
            decimals: 0,
        }
    }

    pub fn with_name(mut self, name: &[u8]) -> Self {
        self.name = name.to_vec();
        self.org_name = name.to_vec();
        self
    }

    pub fn with_flags(mut self, flags: ColumnFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_type_tag(mut self, type_tag: u8) -> Self {
        self.type_tag = type_tag;
        self
    }

    pub fn schema_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.schema)
    }

    pub fn table_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.table)
    }

    pub fn org_table_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.org_table)
    }

    pub fn name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    pub fn org_name_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.org_name)
    }

    pub fn character_set(&self) -> u16 {
        self.character_set
    }

    pub fn column_length(&self) -> u32 {
        self.column_length
    }

    /// Raw type tag as sent by the server.
    pub fn type_tag(&self) -> u8 {
        self.type_tag
    }

    /// `None` if the server sent a tag this driver does not know.
    pub fn column_type(&self) -> Option<ColumnType> {
        ColumnType::try_from(self.type_tag).ok()
    }

    pub fn flags(&self) -> ColumnFlags {
        self.flags
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Column")
            .field("schema", &self.schema_str())
            .field("table", &self.table_str())
            .field("name", &self.name_str())
            .field("character_set", &self.character_set)
            .field("column_length", &self.column_length)
            .field("column_type", &self.column_type())
            .field("flags", &self.flags)
            .field("decimals", &self.decimals)
            .finish()
    }
}

/// `COM_STMT_PREPARE` OK reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtPrepareOk {
    pub statement_id: u32,
    pub num_columns: u16,
    pub num_params: u16,
    pub warning_count: u16,
}

impl StmtPrepareOk {
    pub fn parse(payload: &[u8]) -> MyResult<StmtPrepareOk> {
        let mut buf = expect_header(payload, OK_HEADER)?;
        Self::read(&mut buf).map_err(malformed("prepare OK"))
    }

    fn read(buf: &mut &[u8]) -> io::Result<StmtPrepareOk> {
        let statement_id = buf.read_u32::<LE>()?;
        let num_columns = buf.read_u16::<LE>()?;
        let num_params = buf.read_u16::<LE>()?;
        // filler, then the warning count which old servers omit
        let warning_count = match buf.read_u8() {
            Ok(_) => buf.read_u16::<LE>().unwrap_or(0),
            Err(_) => 0,
        };
        Ok(StmtPrepareOk {
            statement_id,
            num_columns,
            num_params,
            warning_count,
        })
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Serializes a column definition the way a server does.
    pub fn column_payload(name: &str, type_tag: u8, flags: u16) -> Vec<u8> {
        let mut out = Vec::new();
        for part in [&b"def"[..], b"db", b"t", b"t", name.as_bytes(), name.as_bytes()] {
            out.write_lenenc_bytes(part).unwrap();
        }
        out.write_lenenc_int(0x0c).unwrap();
        out.write_u16::<LE>(45).unwrap();
        out.write_u32::<LE>(11).unwrap();
        out.write_u8(type_tag).unwrap();
        out.write_u16::<LE>(flags).unwrap();
        out.write_u8(0).unwrap();
        out.write_all(&[0, 0]).unwrap();
        out
    }

    /// Handshake v10 as sent by MySQL 8.0.
    pub fn handshake_payload(capabilities: CapabilityFlags, plugin: &str) -> Vec<u8> {
        let mut out = vec![10];
        out.write_null_terminated(b"8.0.36").unwrap();
        out.write_u32::<LE>(42).unwrap();
        out.write_all(b"abcdefgh").unwrap();
        out.write_u8(0).unwrap();
        out.write_u16::<LE>(capabilities.bits() as u16).unwrap();
        out.write_u8(255).unwrap();
        out.write_u16::<LE>(StatusFlags::SERVER_STATUS_AUTOCOMMIT.bits())
            .unwrap();
        out.write_u16::<LE>((capabilities.bits() >> 16) as u16)
            .unwrap();
        out.write_u8(21).unwrap();
        out.write_all(&[0; 10]).unwrap();
        out.write_null_terminated(b"ijklmnopqrst").unwrap();
        out.write_null_terminated(plugin.as_bytes()).unwrap();
        out
    }

    pub fn server_capabilities() -> CapabilityFlags {
        CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_PLUGIN_AUTH
            | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
            | CapabilityFlags::CLIENT_CONNECT_WITH_DB
            | CapabilityFlags::CLIENT_TRANSACTIONS
            | CapabilityFlags::CLIENT_MULTI_RESULTS
            | CapabilityFlags::CLIENT_LONG_PASSWORD
            | CapabilityFlags::CLIENT_LONG_FLAG
            | CapabilityFlags::CLIENT_DEPRECATE_EOF
    }

    #[test]
    fn should_parse_handshake() {
        let payload = handshake_payload(server_capabilities(), "caching_sha2_password");
        let handshake = HandshakePacket::parse(&payload).unwrap();
        assert_eq!(handshake.server_version_ref(), b"8.0.36");
        assert_eq!(handshake.server_version_parsed(), Some((8, 0, 36)));
        assert_eq!(handshake.connection_id(), 42);
        assert_eq!(handshake.nonce(), b"abcdefghijklmnopqrst");
        assert_eq!(handshake.capabilities(), server_capabilities());
        assert_eq!(handshake.default_collation(), 255);
        assert_eq!(handshake.auth_plugin(), Some("caching_sha2_password"));
    }

    #[test]
    fn should_reject_old_protocol() {
        match HandshakePacket::parse(&[9, b'4', 0]) {
            Err(Error::ProtocolError(ProtocolError::UnsupportedProtocol(9))) => (),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn should_parse_ok_packet() {
        let payload = b"\x00\x03\xfc\x00\x01\x02\x00\x01\x00info";
        let ok = OkPacket::parse(payload, CapabilityFlags::CLIENT_PROTOCOL_41).unwrap();
        assert_eq!(ok.affected_rows(), 3);
        assert_eq!(ok.last_insert_id(), Some(256));
        assert_eq!(ok.status_flags(), StatusFlags::SERVER_STATUS_AUTOCOMMIT);
        assert_eq!(ok.warnings(), 1);
        assert_eq!(ok.info_str(), "info");
        assert!(!ok.more_results_exists());
    }

    #[test]
    fn should_parse_eof_packet() {
        let payload = b"\xfe\x00\x00\x08\x00";
        assert!(is_eof(payload));
        assert!(is_result_set_terminator(payload, CapabilityFlags::empty()));
        let ok = OkPacket::from_eof(payload).unwrap();
        assert!(ok.more_results_exists());
    }

    #[test]
    fn should_parse_err_packet() {
        let payload = b"\xff\x15\x04#28000Access denied";
        let err = ErrPacket::parse(payload).unwrap();
        assert_eq!(err.error_code(), 1045);
        assert_eq!(err.sql_state_str(), "28000");
        assert_eq!(err.message_str(), "Access denied");

        let payload = b"\xff\x15\x04no state";
        let err = ErrPacket::parse(payload).unwrap();
        assert_eq!(err.sql_state_str(), "HY000");
        assert_eq!(err.message_str(), "no state");
    }

    #[test]
    fn should_parse_column_definition() {
        let payload = column_payload("id", ColumnType::MYSQL_TYPE_LONG as u8, 0x20 | 0x01);
        let column = Column::parse(&payload).unwrap();
        assert_eq!(column.name_str(), "id");
        assert_eq!(column.schema_str(), "db");
        assert_eq!(column.column_type(), Some(ColumnType::MYSQL_TYPE_LONG));
        assert!(column.flags().contains(ColumnFlags::UNSIGNED_FLAG));
        assert!(column.flags().contains(ColumnFlags::NOT_NULL_FLAG));
        assert_eq!(column.character_set(), 45);
    }

    #[test]
    fn should_parse_auth_switch() {
        let payload = b"\xfemysql_native_password\x00abcdefghijklmnopqrst\x00";
        match AuthReply::parse(payload, server_capabilities()).unwrap() {
            AuthReply::Switch { plugin, nonce } => {
                assert_eq!(plugin, "mysql_native_password");
                assert_eq!(nonce, b"abcdefghijklmnopqrst");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            AuthReply::parse(b"\x01\x03", server_capabilities()).unwrap(),
            AuthReply::MoreData(b"\x03")
        );
    }

    #[test]
    fn should_serialize_handshake_response() {
        let caps = CapabilityFlags::CLIENT_PROTOCOL_41
            | CapabilityFlags::CLIENT_SECURE_CONNECTION
            | CapabilityFlags::CLIENT_PLUGIN_AUTH
            | CapabilityFlags::CLIENT_CONNECT_WITH_DB;
        let response = HandshakeResponse {
            capabilities: caps,
            max_packet_size: 16_777_216,
            collation: UTF8MB4_GENERAL_CI,
            user: b"root",
            auth_response: &[1, 2, 3],
            db_name: Some(b"test"),
            auth_plugin: "mysql_native_password",
            connect_attributes: &[],
        };
        let out = response.serialize().unwrap();

        let mut buf = &out[..];
        assert_eq!(buf.read_u32::<LE>().unwrap(), caps.bits());
        assert_eq!(buf.read_u32::<LE>().unwrap(), 16_777_216);
        assert_eq!(buf.read_u8().unwrap(), UTF8MB4_GENERAL_CI);
        assert_eq!(buf.read_fixed_bytes(23).unwrap(), vec![0; 23]);
        assert_eq!(buf.read_null_terminated().unwrap(), b"root");
        assert_eq!(buf.read_u8().unwrap(), 3);
        assert_eq!(buf.read_fixed_bytes(3).unwrap(), [1, 2, 3]);
        assert_eq!(buf.read_null_terminated().unwrap(), b"test");
        assert_eq!(buf.read_null_terminated().unwrap(), b"mysql_native_password");
        assert!(buf.is_empty());
    }

    #[test]
    fn should_refuse_long_auth_response_without_lenenc() {
        let password = vec![b'x'; 300];
        let mut response = HandshakeResponse {
            capabilities: CapabilityFlags::CLIENT_PROTOCOL_41
                | CapabilityFlags::CLIENT_SECURE_CONNECTION
                | CapabilityFlags::CLIENT_PLUGIN_AUTH,
            max_packet_size: 16_777_216,
            collation: UTF8MB4_GENERAL_CI,
            user: b"root",
            auth_response: &password,
            db_name: None,
            auth_plugin: "mysql_clear_password",
            connect_attributes: &[],
        };
        match response.serialize() {
            Err(Error::ProtocolError(ProtocolError::MalformedPacket(_))) => (),
            other => panic!("unexpected {:?}", other),
        }

        response.capabilities |= CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;
        let out = response.serialize().unwrap();
        let mut buf = &out[4 + 4 + 1 + 23..];
        assert_eq!(buf.read_null_terminated().unwrap(), b"root");
        assert_eq!(buf.read_lenenc_bytes().unwrap(), password);
    }

    #[test]
    fn should_parse_prepare_ok() {
        let payload = b"\x00\x07\x00\x00\x00\x02\x00\x03\x00\x00\x00\x00";
        let ok = StmtPrepareOk::parse(payload).unwrap();
        assert_eq!(ok.statement_id, 7);
        assert_eq!(ok.num_columns, 2);
        assert_eq!(ok.num_params, 3);
        assert_eq!(ok.warning_count, 0);
    }
}
