// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Connection phase.
//!
//! [`Handshake`] is a state machine fed with server payloads. Every transition returns what to
//! send next, so the exchange can be driven over any transport (see [`Handshake::run`]) or
//! stepped through directly.

use mysql_common::constants::{CapabilityFlags, StatusFlags};

use std::{fmt, process, sync::Arc};

use crate::{
    conn::auth::{AuthAction, AuthContext, AuthPlugin, AuthPluginRegistry, MYSQL_NATIVE_PASSWORD},
    error::{AuthError, Error, ProtocolError, Result as MyResult},
    events::{Event, EventSink},
    io::Transport,
    packet::PacketStream,
    packets::{AuthReply, HandshakePacket, HandshakeResponse, OkPacket, UTF8MB4_GENERAL_CI},
};

/// Plugin switches and extra-data exchanges allowed before giving up.
pub const MAX_AUTH_ROUNDS: usize = 4;

/// Capabilities this client asks for. The server's set is intersected with it.
pub fn client_capabilities(with_db: bool) -> CapabilityFlags {
    let mut caps = CapabilityFlags::CLIENT_PROTOCOL_41
        | CapabilityFlags::CLIENT_SECURE_CONNECTION
        | CapabilityFlags::CLIENT_LONG_PASSWORD
        | CapabilityFlags::CLIENT_LONG_FLAG
        | CapabilityFlags::CLIENT_TRANSACTIONS
        | CapabilityFlags::CLIENT_MULTI_STATEMENTS
        | CapabilityFlags::CLIENT_MULTI_RESULTS
        | CapabilityFlags::CLIENT_PS_MULTI_RESULTS
        | CapabilityFlags::CLIENT_PLUGIN_AUTH
        | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CapabilityFlags::CLIENT_CONNECT_ATTRS
        | CapabilityFlags::CLIENT_DEPRECATE_EOF;
    if with_db {
        caps |= CapabilityFlags::CLIENT_CONNECT_WITH_DB;
    }
    caps
}

pub fn default_connect_attributes() -> Vec<(String, String)> {
    vec![
        ("_client_name".into(), env!("CARGO_PKG_NAME").into()),
        ("_client_version".into(), env!("CARGO_PKG_VERSION").into()),
        ("_os".into(), std::env::consts::OS.into()),
        ("_platform".into(), std::env::consts::ARCH.into()),
        ("_pid".into(), process::id().to_string()),
    ]
}

/// Connection-phase state.
#[derive(Debug)]
pub enum HandshakeState {
    AwaitGreeting,
    /// Handshake response sent, authenticating with the server's initial plugin.
    CapabilitiesSent {
        plugin: Arc<dyn AuthPlugin>,
        nonce: Vec<u8>,
    },
    /// Plugin switch or plugin-specific data exchange in progress.
    AuthDataExchange {
        plugin: Arc<dyn AuthPlugin>,
        nonce: Vec<u8>,
        rounds: usize,
    },
    Authenticated,
    Failed,
}

/// What the driver should do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Send(Vec<u8>),
    /// Read the next server packet without sending anything.
    Wait,
    Done,
}

/// Parameters of the connection phase.
#[derive(Clone)]
pub struct HandshakeConfig<'a> {
    pub user: &'a str,
    pub password: Option<&'a str>,
    pub db_name: Option<&'a str>,
    pub connect_attributes: &'a [(String, String)],
    pub max_packet_size: u32,
    pub registry: &'a AuthPluginRegistry,
    pub events: &'a dyn EventSink,
}

impl fmt::Debug for HandshakeConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeConfig")
            .field("user", &self.user)
            .field("db_name", &self.db_name)
            .field("max_packet_size", &self.max_packet_size)
            .finish()
    }
}

/// Session parameters fixed by a successful handshake.
#[derive(Debug, Clone)]
pub struct Established {
    pub capabilities: CapabilityFlags,
    pub connection_id: u32,
    pub server_version: Option<(u16, u16, u16)>,
    pub status_flags: StatusFlags,
    pub ok: OkPacket,
}

#[derive(Debug)]
pub struct Handshake<'a> {
    config: HandshakeConfig<'a>,
    secure: bool,
    state: HandshakeState,
    greeting: Option<HandshakePacket>,
    capabilities: CapabilityFlags,
}

impl<'a> Handshake<'a> {
    /// `secure` tells plugins whether the transport is encrypted.
    pub fn new(config: HandshakeConfig<'a>, secure: bool) -> Self {
        Handshake {
            config,
            secure,
            state: HandshakeState::AwaitGreeting,
            greeting: None,
            capabilities: CapabilityFlags::empty(),
        }
    }

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    pub fn capabilities(&self) -> CapabilityFlags {
        self.capabilities
    }

    fn fail<T>(&mut self, err: impl Into<Error>) -> MyResult<T> {
        self.state = HandshakeState::Failed;
        Err(err.into())
    }

    fn ctx<'b>(&self, nonce: &'b [u8]) -> AuthContext<'b>
    where
        'a: 'b,
    {
        AuthContext {
            nonce,
            password: self.config.password,
            secure: self.secure,
        }
    }

    /// `AwaitGreeting` → `CapabilitiesSent`. Returns the handshake response.
    pub fn on_greeting(&mut self, payload: &[u8]) -> MyResult<Vec<u8>> {
        if !matches!(self.state, HandshakeState::AwaitGreeting) {
            return self.fail(ProtocolError::UnexpectedPacket {
                first_byte: payload.first().copied(),
            });
        }
        let greeting = match HandshakePacket::parse(payload) {
            Ok(greeting) => greeting,
            Err(err) => return self.fail(err),
        };
        let server_caps = greeting.capabilities();
        if !server_caps.contains(CapabilityFlags::CLIENT_PROTOCOL_41) {
            return self.fail(ProtocolError::Protocol41NotSet);
        }
        let capabilities = client_capabilities(self.config.db_name.is_some()) & server_caps;

        let plugin_name = if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
            greeting.auth_plugin().unwrap_or(MYSQL_NATIVE_PASSWORD)
        } else {
            MYSQL_NATIVE_PASSWORD
        };
        let plugin = match self.config.registry.resolve(plugin_name) {
            Ok(plugin) => plugin,
            Err(err) => return self.fail(err),
        };
        let auth_response = match plugin.initial_response(&self.ctx(greeting.nonce())) {
            Ok(response) => response,
            Err(err) => return self.fail(err),
        };

        let response = HandshakeResponse {
            capabilities,
            max_packet_size: self.config.max_packet_size,
            collation: UTF8MB4_GENERAL_CI,
            user: self.config.user.as_bytes(),
            auth_response: &auth_response,
            db_name: self.config.db_name.map(str::as_bytes),
            auth_plugin: plugin.name(),
            connect_attributes: self.config.connect_attributes,
        }
        .serialize();
        let response = match response {
            Ok(response) => response,
            Err(err) => return self.fail(err),
        };

        self.capabilities = capabilities;
        self.state = HandshakeState::CapabilitiesSent {
            plugin,
            nonce: greeting.nonce().to_vec(),
        };
        self.greeting = Some(greeting);
        Ok(response)
    }

    /// Handles a server reply during authentication.
    pub fn on_auth_reply(&mut self, payload: &[u8]) -> MyResult<Step> {
        let (plugin, nonce, rounds) =
            match std::mem::replace(&mut self.state, HandshakeState::Failed) {
                HandshakeState::CapabilitiesSent { plugin, nonce } => (plugin, nonce, 0),
                HandshakeState::AuthDataExchange {
                    plugin,
                    nonce,
                    rounds,
                } => (plugin, nonce, rounds),
                _ => {
                    return self.fail(ProtocolError::UnexpectedPacket {
                        first_byte: payload.first().copied(),
                    })
                }
            };

        let reply = match AuthReply::parse(payload, self.capabilities) {
            Ok(reply) => reply,
            Err(err) => return self.fail(err),
        };

        let step = match reply {
            AuthReply::Ok(_) => {
                self.state = HandshakeState::Authenticated;
                return Ok(Step::Done);
            }
            AuthReply::Err(err) => return self.fail(AuthError::Server(err.into())),
            AuthReply::Switch {
                plugin: name,
                nonce,
            } => {
                let rounds = rounds + 1;
                if rounds > MAX_AUTH_ROUNDS {
                    return self.fail(AuthError::TooManyRounds { rounds });
                }
                let next = match self.config.registry.resolve(&name) {
                    Ok(next) => next,
                    Err(err) => return self.fail(err),
                };
                self.config.events.emit(&Event::AuthPluginSwitched {
                    from: plugin.name().to_owned(),
                    to: next.name().to_owned(),
                    round: rounds,
                });
                let response = match next.initial_response(&self.ctx(&nonce)) {
                    Ok(response) => response,
                    Err(err) => return self.fail(err),
                };
                self.state = HandshakeState::AuthDataExchange {
                    plugin: next,
                    nonce,
                    rounds,
                };
                Step::Send(response)
            }
            AuthReply::MoreData(data) => {
                let rounds = rounds + 1;
                if rounds > MAX_AUTH_ROUNDS {
                    return self.fail(AuthError::TooManyRounds { rounds });
                }
                let action = match plugin.on_more_data(data, &self.ctx(&nonce)) {
                    Ok(action) => action,
                    Err(err) => return self.fail(err),
                };
                self.state = HandshakeState::AuthDataExchange {
                    plugin,
                    nonce,
                    rounds,
                };
                match action {
                    AuthAction::Send(data) => Step::Send(data),
                    AuthAction::Wait => Step::Wait,
                }
            }
        };
        Ok(step)
    }

    /// Drives the whole connection phase over `stream`.
    pub fn run<T: Transport>(mut self, stream: &mut PacketStream<T>) -> MyResult<Established> {
        stream.reset_seq();
        let greeting = stream.read_packet()?;
        let response = self.on_greeting(&greeting)?;
        stream.write_packet(&response)?;

        let ok = loop {
            let reply = stream.read_packet()?;
            match self.on_auth_reply(&reply)? {
                Step::Send(data) => stream.write_packet(&data)?,
                Step::Wait => (),
                Step::Done => break OkPacket::parse(&reply, self.capabilities)?,
            }
        };

        match self.greeting {
            Some(greeting) => Ok(Established {
                capabilities: self.capabilities,
                connection_id: greeting.connection_id(),
                server_version: greeting.server_version_parsed(),
                status_flags: ok.status_flags(),
                ok,
            }),
            None => Err(ProtocolError::UnexpectedPacket { first_byte: None }.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        error::Error,
        events::{test::RecordingSink, NoopSink},
        io::mock::MockTransport,
        packets::test::{handshake_payload, server_capabilities},
    };

    const OK: &[u8] = b"\x00\x00\x00\x02\x00\x00\x00";

    fn config<'a>(
        registry: &'a AuthPluginRegistry,
        events: &'a dyn EventSink,
    ) -> HandshakeConfig<'a> {
        HandshakeConfig {
            user: "root",
            password: Some("password"),
            db_name: Some("test"),
            connect_attributes: &[],
            max_packet_size: 16 * 1024 * 1024,
            registry,
            events,
        }
    }

    fn switch_payload(plugin: &str) -> Vec<u8> {
        let mut out = vec![0xfe];
        out.extend_from_slice(plugin.as_bytes());
        out.push(0);
        out.extend_from_slice(b"01234567890123456789\0");
        out
    }

    #[test]
    fn should_negotiate_capabilities_on_greeting() {
        let registry = AuthPluginRegistry::default();
        let mut handshake = Handshake::new(config(&registry, &NoopSink), false);
        let greeting = handshake_payload(server_capabilities(), "mysql_native_password");

        let response = handshake.on_greeting(&greeting).unwrap();
        let caps = handshake.capabilities();
        assert!(caps.contains(CapabilityFlags::CLIENT_PROTOCOL_41));
        assert!(caps.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB));
        assert!(!caps.contains(CapabilityFlags::CLIENT_CONNECT_ATTRS));
        assert_eq!(&response[..4], &caps.bits().to_le_bytes());
        assert!(matches!(
            handshake.state(),
            HandshakeState::CapabilitiesSent { .. }
        ));
    }

    #[test]
    fn should_require_protocol_41() {
        let registry = AuthPluginRegistry::default();
        let mut handshake = Handshake::new(config(&registry, &NoopSink), false);
        let caps = server_capabilities() & !CapabilityFlags::CLIENT_PROTOCOL_41;
        let greeting = handshake_payload(caps, "mysql_native_password");
        match handshake.on_greeting(&greeting) {
            Err(Error::ProtocolError(ProtocolError::Protocol41NotSet)) => (),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(handshake.state(), HandshakeState::Failed));
    }

    #[test]
    fn should_switch_plugin_and_authenticate() {
        let registry = AuthPluginRegistry::default();
        let sink = RecordingSink::default();
        let mut handshake = Handshake::new(config(&registry, &sink), false);
        let greeting = handshake_payload(server_capabilities(), "caching_sha2_password");
        handshake.on_greeting(&greeting).unwrap();

        let step = handshake
            .on_auth_reply(&switch_payload("mysql_native_password"))
            .unwrap();
        match step {
            Step::Send(data) => assert_eq!(data.len(), 20),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            sink.events(),
            vec![Event::AuthPluginSwitched {
                from: "caching_sha2_password".into(),
                to: "mysql_native_password".into(),
                round: 1,
            }]
        );
        assert_eq!(handshake.on_auth_reply(OK).unwrap(), Step::Done);
        assert!(matches!(handshake.state(), HandshakeState::Authenticated));
    }

    #[test]
    fn should_take_fast_auth_path() {
        let registry = AuthPluginRegistry::default();
        let mut handshake = Handshake::new(config(&registry, &NoopSink), false);
        let greeting = handshake_payload(server_capabilities(), "caching_sha2_password");
        handshake.on_greeting(&greeting).unwrap();

        assert_eq!(handshake.on_auth_reply(b"\x01\x03").unwrap(), Step::Wait);
        assert_eq!(handshake.on_auth_reply(OK).unwrap(), Step::Done);
    }

    #[test]
    fn should_keep_server_error_verbatim() {
        let registry = AuthPluginRegistry::default();
        let mut handshake = Handshake::new(config(&registry, &NoopSink), false);
        let greeting = handshake_payload(server_capabilities(), "mysql_native_password");
        handshake.on_greeting(&greeting).unwrap();

        match handshake.on_auth_reply(b"\xff\x15\x04#28000Access denied for user 'root'") {
            Err(Error::AuthError(AuthError::Server(err))) => {
                assert_eq!(err.code, 1045);
                assert_eq!(err.state, "28000");
                assert_eq!(err.message, "Access denied for user 'root'");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(handshake.state(), HandshakeState::Failed));
    }

    #[test]
    fn should_stop_after_too_many_switches() {
        let transport = MockTransport::new();
        transport.push_packet(
            0,
            &handshake_payload(server_capabilities(), "mysql_native_password"),
        );
        for i in 0..5u8 {
            let plugin = if i % 2 == 0 {
                "caching_sha2_password"
            } else {
                "mysql_native_password"
            };
            transport.push_packet(2 + i * 2, &switch_payload(plugin));
        }
        let mut stream = PacketStream::new(transport.clone(), 1024 * 1024);
        let registry = AuthPluginRegistry::default();
        let handshake = Handshake::new(config(&registry, &NoopSink), false);

        match handshake.run(&mut stream) {
            Err(Error::AuthError(AuthError::TooManyRounds { rounds })) => assert_eq!(rounds, 5),
            other => panic!("unexpected {:?}", other),
        }
        // handshake response plus one reply per accepted switch
        assert_eq!(transport.written_packets().len(), 1 + MAX_AUTH_ROUNDS);
        assert_eq!(transport.unread(), 0);
    }

    #[test]
    fn should_run_full_exchange() {
        let transport = MockTransport::secure();
        transport.push_packet(
            0,
            &handshake_payload(server_capabilities(), "caching_sha2_password"),
        );
        transport.push_packet(2, b"\x01\x04");
        transport.push_packet(4, OK);
        let mut stream = PacketStream::new(transport.clone(), 1024 * 1024);
        let registry = AuthPluginRegistry::default();
        let handshake = Handshake::new(config(&registry, &NoopSink), true);

        let established = handshake.run(&mut stream).unwrap();
        assert_eq!(established.connection_id, 42);
        assert_eq!(established.server_version, Some((8, 0, 36)));
        assert!(established
            .capabilities
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF));

        let written = transport.written_packets();
        assert_eq!(written.len(), 2);
        assert_eq!(written[1], (3, b"password\0".to_vec()));
    }
}
