// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use crate::{conn::queryable::Queryable, io::Transport, Conn, Opts, Result};

/// Interrupts the statement running on another connection.
///
/// A running connection is busy reading its response, so the `KILL QUERY` is sent over a
/// separate connection opened with the same options.
#[derive(Debug, Clone)]
pub struct CancelToken {
    connection_id: u32,
    opts: Opts,
}

impl CancelToken {
    pub(crate) fn new(connection_id: u32, opts: Opts) -> Self {
        CancelToken {
            connection_id,
            opts,
        }
    }

    /// Id of the connection this token cancels statements on.
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    /// Connects to the server and kills the current statement of the target connection.
    pub fn cancel(&self) -> Result<()> {
        let conn = Conn::new(self.opts.clone())?;
        self.kill_query(conn)
    }

    /// Same as [`CancelToken::cancel`], over a transport established by the caller.
    pub fn cancel_over<T: Transport + 'static>(&self, transport: T) -> Result<()> {
        let conn = Conn::open(transport, self.opts.clone())?;
        self.kill_query(conn)
    }

    fn kill_query(&self, mut conn: Conn) -> Result<()> {
        conn.query_drop(format!("KILL QUERY {}", self.connection_id))?;
        conn.close()
    }
}

#[cfg(test)]
mod test {
    use mysql_common::constants::Command;

    use crate::{
        conn::opts::OptsBuilder,
        io::mock::MockTransport,
        packets::test::{handshake_payload, server_capabilities},
        Conn,
    };

    const OK: &[u8] = b"\x00\x00\x00\x02\x00\x00\x00";

    fn push_handshake(transport: &MockTransport) {
        let greeting = handshake_payload(server_capabilities(), "mysql_native_password");
        transport.push_packet(0, &greeting);
        transport.push_packet(2, OK);
    }

    #[test]
    fn should_kill_query_over_separate_connection() {
        let opts = OptsBuilder::new()
            .user(Some("root"))
            .max_allowed_packet(Some(4 * 1024 * 1024));

        let target = MockTransport::new();
        push_handshake(&target);
        let conn = Conn::open(target.clone(), opts).unwrap();
        let token = conn.cancel_token();
        assert_eq!(token.connection_id(), 42);

        let side = MockTransport::new();
        push_handshake(&side);
        side.push_packet(1, OK);
        token.cancel_over(side.clone()).unwrap();

        let mut written = side.written_packets();
        assert_eq!(written.pop(), Some((0, vec![Command::COM_QUIT as u8])));
        let (seq, kill) = written.pop().unwrap();
        assert_eq!(seq, 0);
        assert_eq!(kill[0], Command::COM_QUERY as u8);
        assert_eq!(&kill[1..], b"KILL QUERY 42");
        assert!(side.is_shut_down());

        // nothing but the handshake response went over the target connection
        assert_eq!(target.written_packets().len(), 1);
    }
}
