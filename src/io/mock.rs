// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! In-memory transport fed with a scripted server conversation.

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex},
};

use super::Transport;

#[derive(Debug, Default)]
struct Inner {
    input: VecDeque<u8>,
    output: Vec<u8>,
    secure: bool,
    shut_down: bool,
}

/// Cloneable handle, every clone sees the same buffers.
#[derive(Debug, Clone, Default)]
pub struct MockTransport(Arc<Mutex<Inner>>);

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn secure() -> Self {
        let transport = Self::default();
        transport.0.lock().unwrap().secure = true;
        transport
    }

    /// Queues a single-frame server packet.
    pub fn push_packet(&self, seq: u8, payload: &[u8]) {
        assert!(payload.len() < crate::packet::MAX_PAYLOAD_LEN);
        let mut inner = self.0.lock().unwrap();
        let len = (payload.len() as u32).to_le_bytes();
        inner.input.extend(&len[..3]);
        inner.input.push_back(seq);
        inner.input.extend(payload);
    }

    pub fn unread(&self) -> usize {
        self.0.lock().unwrap().input.len()
    }

    pub fn written(&self) -> Vec<u8> {
        self.0.lock().unwrap().output.clone()
    }

    /// Splits written bytes into `(seq, payload)` frames.
    pub fn written_packets(&self) -> Vec<(u8, Vec<u8>)> {
        let output = self.written();
        let mut packets = Vec::new();
        let mut rest = &output[..];
        while rest.len() >= 4 {
            let len = rest[0] as usize | (rest[1] as usize) << 8 | (rest[2] as usize) << 16;
            packets.push((rest[3], rest[4..4 + len].to_vec()));
            rest = &rest[4 + len..];
        }
        packets
    }

    pub fn is_shut_down(&self) -> bool {
        self.0.lock().unwrap().shut_down
    }
}

impl io::Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.0.lock().unwrap();
        let n = buf.len().min(inner.input.len());
        for (dst, src) in buf.iter_mut().zip(inner.input.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl io::Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn is_secure(&self) -> bool {
        self.0.lock().unwrap().secure
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.0.lock().unwrap().shut_down = true;
        Ok(())
    }
}
