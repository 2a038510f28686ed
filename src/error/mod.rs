// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use url::ParseError;

use std::{error, fmt, io, result};

use crate::packets::ErrPacket;

impl<'a> From<ErrPacket<'a>> for MySqlError {
    fn from(x: ErrPacket<'a>) -> MySqlError {
        MySqlError {
            state: x.sql_state_str().into_owned(),
            code: x.error_code(),
            message: x.message_str().into_owned(),
        }
    }
}

/// Error returned by a server (an ERR packet), preserved verbatim.
#[derive(Eq, PartialEq, Clone)]
pub struct MySqlError {
    pub state: String,
    pub message: String,
    pub code: u16,
}

impl fmt::Display for MySqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ERROR {} ({}): {}", self.code, self.state, self.message)
    }
}

impl fmt::Debug for MySqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl error::Error for MySqlError {
    fn description(&self) -> &str {
        "Error returned by a server"
    }
}

pub enum Error {
    IoError(io::Error),
    ProtocolError(ProtocolError),
    AuthError(AuthError),
    DecodeError(DecodeError),
    ResultError(ResultError),
    ConfigError(ConfigError),
    MySqlError(MySqlError),
    DriverError(DriverError),
    UrlError(UrlError),
}

impl Error {
    /// Returns `true` if the connection that produced this error must not be reused.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::IoError(_) | Error::ProtocolError(_) | Error::AuthError(_) => true,
            Error::DriverError(err) => err.is_connectivity_error(),
            Error::DecodeError(_)
            | Error::ResultError(_)
            | Error::ConfigError(_)
            | Error::MySqlError(_)
            | Error::UrlError(_) => false,
        }
    }

    #[doc(hidden)]
    pub fn server_disconnected() -> Self {
        Error::IoError(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "server disconnected",
        ))
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::ProtocolError(err) => Some(err),
            Error::AuthError(err) => Some(err),
            Error::DecodeError(err) => Some(err),
            Error::ResultError(err) => Some(err),
            Error::ConfigError(err) => Some(err),
            Error::MySqlError(err) => Some(err),
            Error::DriverError(err) => Some(err),
            Error::UrlError(err) => Some(err),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Error {
        Error::ProtocolError(err)
    }
}

impl From<AuthError> for Error {
    fn from(err: AuthError) -> Error {
        Error::AuthError(err)
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Error {
        Error::DecodeError(err)
    }
}

impl From<ResultError> for Error {
    fn from(err: ResultError) -> Error {
        Error::ResultError(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Error {
        Error::ConfigError(err)
    }
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Error {
        Error::DriverError(err)
    }
}

impl From<MySqlError> for Error {
    fn from(x: MySqlError) -> Error {
        Error::MySqlError(x)
    }
}

impl From<UrlError> for Error {
    fn from(err: UrlError) -> Error {
        Error::UrlError(err)
    }
}

impl From<std::convert::Infallible> for Error {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => write!(f, "IoError {{ {} }}", err),
            Error::ProtocolError(ref err) => write!(f, "ProtocolError {{ {} }}", err),
            Error::AuthError(ref err) => write!(f, "AuthError {{ {} }}", err),
            Error::DecodeError(ref err) => write!(f, "DecodeError {{ {} }}", err),
            Error::ResultError(ref err) => write!(f, "ResultError {{ {} }}", err),
            Error::ConfigError(ref err) => write!(f, "ConfigError {{ {} }}", err),
            Error::MySqlError(ref err) => write!(f, "MySqlError {{ {} }}", err),
            Error::DriverError(ref err) => write!(f, "DriverError {{ {} }}", err),
            Error::UrlError(ref err) => write!(f, "UrlError {{ {} }}", err),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Framing and sequencing violations. The connection is unusable afterwards.
#[derive(Eq, PartialEq, Clone)]
pub enum ProtocolError {
    SequenceMismatch { expected: u8, observed: u8 },
    PacketTooLarge { size: usize, max: usize },
    UnexpectedPacket { first_byte: Option<u8> },
    UnsupportedProtocol(u8),
    Protocol41NotSet,
    MalformedPacket(&'static str),
    /// Row payload is too short for its header and null-bitmap.
    MalformedRow { expected_len: usize, actual_len: usize },
}

impl error::Error for ProtocolError {
    fn description(&self) -> &str {
        "MySql protocol error"
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::SequenceMismatch { expected, observed } => write!(
                f,
                "Packet out of sync: expected sequence id {}, got {}",
                expected, observed
            ),
            ProtocolError::PacketTooLarge { size, max } => write!(
                f,
                "Packet too large: {} bytes exceeds max_allowed_packet of {} bytes",
                size, max
            ),
            ProtocolError::UnexpectedPacket {
                first_byte: Some(byte),
            } => write!(f, "Unexpected packet with header 0x{:02X}", byte),
            ProtocolError::UnexpectedPacket { first_byte: None } => {
                write!(f, "Unexpected empty packet")
            }
            ProtocolError::UnsupportedProtocol(proto_version) => {
                write!(f, "Unsupported protocol version {}", proto_version)
            }
            ProtocolError::Protocol41NotSet => {
                write!(f, "Server must set CLIENT_PROTOCOL_41 flag")
            }
            ProtocolError::MalformedPacket(what) => write!(f, "Malformed {} packet", what),
            ProtocolError::MalformedRow {
                expected_len,
                actual_len,
            } => write!(
                f,
                "Malformed row: header and null-bitmap need {} bytes, packet has {}",
                expected_len, actual_len
            ),
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Authentication failures. Fatal for the connection attempt.
#[derive(Eq, PartialEq, Clone)]
pub enum AuthError {
    /// The server rejected the credentials. Diagnostic text is kept verbatim.
    Server(MySqlError),
    TooManyRounds { rounds: usize },
    UnknownPlugin(String),
    /// Full authentication would reveal the password over an insecure transport.
    InsecureFullAuth { plugin: String },
    UnexpectedAuthData { plugin: String },
}

impl error::Error for AuthError {
    fn description(&self) -> &str {
        "MySql authentication error"
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            AuthError::Server(ref err) => write!(f, "Access denied: {}", err),
            AuthError::TooManyRounds { rounds } => write!(
                f,
                "Authentication did not complete after {} round trips",
                rounds
            ),
            AuthError::UnknownPlugin(ref name) => {
                write!(f, "Unknown authentication plugin: `{}`", name)
            }
            AuthError::InsecureFullAuth { ref plugin } => write!(
                f,
                "`{}` requested full authentication which requires a secure transport",
                plugin
            ),
            AuthError::UnexpectedAuthData { ref plugin } => {
                write!(f, "Unexpected auth data for plugin `{}`", plugin)
            }
        }
    }
}

impl fmt::Debug for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Failure to decode a single row. The connection and the rest of the stream stay valid.
#[derive(Eq, PartialEq, Clone)]
pub enum DecodeError {
    Malformed { column: usize, reason: String },
    UnsupportedType { column: usize, type_tag: u8 },
}

impl error::Error for DecodeError {
    fn description(&self) -> &str {
        "MySql row decoding error"
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DecodeError::Malformed { column, ref reason } => {
                write!(f, "Malformed value in column {}: {}", column, reason)
            }
            DecodeError::UnsupportedType { column, type_tag } => write!(
                f,
                "Column {} has unsupported type 0x{:02X}",
                column, type_tag
            ),
        }
    }
}

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Result stream failures. The connection stays reusable once the stream is drained.
#[derive(Eq, PartialEq, Clone)]
pub enum ResultError {
    BufferLimitExceeded { limit: u64, observed: u64 },
}

impl error::Error for ResultError {
    fn description(&self) -> &str {
        "MySql result error"
    }
}

impl fmt::Display for ResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ResultError::BufferLimitExceeded { limit, observed } => write!(
                f,
                "Result set exceeded max_result_buffer: {} bytes read, limit is {} bytes",
                observed, limit
            ),
        }
    }
}

impl fmt::Debug for ResultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Configuration value could not be turned into a usable setting.
#[derive(Eq, PartialEq, Clone)]
pub enum ConfigError {
    InvalidFormat {
        value: String,
        expected: &'static str,
    },
}

impl error::Error for ConfigError {
    fn description(&self) -> &str {
        "MySql driver configuration error"
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ConfigError::InvalidFormat {
                ref value,
                expected,
            } => write!(f, "Invalid value `{}'. Accepted formats: {}", value, expected),
        }
    }
}

impl fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Eq, PartialEq, Clone)]
pub enum DriverError {
    ConnectTimeout,
    // (address, description)
    CouldNotConnect(Option<(String, String, io::ErrorKind)>),
    MismatchedStmtParams(u16, usize),
    NamedParamsForPositionalQuery,
    /// A previous fatal error left the connection unusable.
    ConnectionBroken,
}

impl DriverError {
    fn is_connectivity_error(&self) -> bool {
        match self {
            DriverError::ConnectTimeout
            | DriverError::CouldNotConnect(_)
            | DriverError::ConnectionBroken => true,
            DriverError::MismatchedStmtParams(..) | DriverError::NamedParamsForPositionalQuery => {
                false
            }
        }
    }
}

impl error::Error for DriverError {
    fn description(&self) -> &str {
        "MySql driver error"
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            DriverError::ConnectTimeout => write!(f, "Could not connect: connection timeout"),
            DriverError::CouldNotConnect(None) => {
                write!(f, "Could not connect: address not specified")
            }
            DriverError::CouldNotConnect(Some((ref addr, ref desc, _))) => {
                write!(f, "Could not connect to address `{}': {}", addr, desc)
            }
            DriverError::MismatchedStmtParams(exp, prov) => write!(
                f,
                "Statement takes {} parameters but {} was supplied",
                exp, prov
            ),
            DriverError::NamedParamsForPositionalQuery => {
                write!(f, "Can not pass named parameters to positional query")
            }
            DriverError::ConnectionBroken => {
                write!(f, "Connection is broken by a previous fatal error")
            }
        }
    }
}

impl fmt::Debug for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Eq, PartialEq, Clone)]
pub enum UrlError {
    ParseError(ParseError),
    UnsupportedScheme(String),
    /// (parameter_name, value)
    InvalidValue(String, String),
    UnknownParameter(String),
    BadUrl,
}

impl error::Error for UrlError {
    fn description(&self) -> &str {
        "Database connection URL error"
    }
}

impl fmt::Display for UrlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            UrlError::ParseError(ref err) => write!(f, "URL ParseError {{ {} }}", err),
            UrlError::UnsupportedScheme(ref s) => write!(f, "URL scheme `{}' is not supported", s),
            UrlError::InvalidValue(ref parameter, ref value) => write!(
                f,
                "Invalid value `{}' for URL parameter `{}'",
                value, parameter
            ),
            UrlError::UnknownParameter(ref parameter) => {
                write!(f, "Unknown URL parameter `{}'", parameter)
            }
            UrlError::BadUrl => write!(f, "Invalid or incomplete connection URL"),
        }
    }
}

impl fmt::Debug for UrlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl From<ParseError> for UrlError {
    fn from(x: ParseError) -> UrlError {
        UrlError::ParseError(x)
    }
}

pub type Result<T> = result::Result<T, Error>;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_classify_fatal_errors() {
        assert!(Error::from(ProtocolError::SequenceMismatch {
            expected: 1,
            observed: 3
        })
        .is_fatal());
        assert!(Error::from(AuthError::TooManyRounds { rounds: 5 }).is_fatal());
        assert!(Error::from(DriverError::ConnectionBroken).is_fatal());
        assert!(!Error::from(ResultError::BufferLimitExceeded {
            limit: 1000,
            observed: 1100
        })
        .is_fatal());
        assert!(!Error::from(DecodeError::Malformed {
            column: 0,
            reason: "short".into()
        })
        .is_fatal());
    }

    #[test]
    fn should_keep_context_in_messages() {
        let err = ProtocolError::SequenceMismatch {
            expected: 4,
            observed: 7,
        };
        assert_eq!(
            err.to_string(),
            "Packet out of sync: expected sequence id 4, got 7"
        );

        let err = AuthError::Server(MySqlError {
            state: "28000".into(),
            message: "Access denied for user 'root'@'localhost'".into(),
            code: 1045,
        });
        assert!(err
            .to_string()
            .contains("ERROR 1045 (28000): Access denied for user 'root'@'localhost'"));
    }

    #[allow(dead_code)]
    fn error_should_implement_send_and_sync() {
        fn _dummy<T: Send + Sync>(_: T) {}
        _dummy(Error::from(DriverError::ConnectionBroken));
    }
}
