// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Packet envelope: 3-byte little-endian payload length, 1-byte sequence id, payload.
//!
//! Payloads of `MAX_PAYLOAD_LEN` bytes or more are split into several frames. A frame carrying
//! exactly `MAX_PAYLOAD_LEN` bytes means "more follows", so a payload that is an exact multiple
//! of it is terminated by an empty frame.

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};

use std::io::{self, Read as _, Write as _};

use crate::{
    error::{ProtocolError, Result as MyResult},
    io::{Transport, WriteMysqlExt},
};

pub const MAX_PAYLOAD_LEN: usize = 0xFF_FF_FF;

/// One logical packet, reassembled from one or more frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Sequence id of the first frame.
    pub seq: u8,
    /// Sequence id the next frame of the exchange must carry.
    pub next_seq: u8,
    pub payload: Vec<u8>,
}

fn truncated_frame() -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "unexpected EOF while reading packet",
    )
}

/// Reads one logical packet whose first frame must carry `seq`.
pub fn read_packet<R: io::Read>(stream: &mut R, seq: u8) -> MyResult<Packet> {
    let mut payload = Vec::new();
    let mut next_seq = seq;
    loop {
        let payload_len = stream.read_uint::<LE>(3)? as usize;
        let frame_seq = stream.read_u8()?;
        if frame_seq != next_seq {
            return Err(ProtocolError::SequenceMismatch {
                expected: next_seq,
                observed: frame_seq,
            }
            .into());
        }
        next_seq = next_seq.wrapping_add(1);

        payload.reserve(payload_len);
        let count = stream
            .by_ref()
            .take(payload_len as u64)
            .read_to_end(&mut payload)?;
        if count != payload_len {
            return Err(truncated_frame().into());
        }
        if payload_len < MAX_PAYLOAD_LEN {
            break;
        }
    }
    Ok(Packet {
        seq,
        next_seq,
        payload,
    })
}

/// Writes `payload` starting at sequence id `seq` and returns the next sequence id.
///
/// Nothing is written if the payload is larger than `max_allowed_packet`.
pub fn write_packet<W: io::Write>(
    stream: &mut W,
    payload: &[u8],
    mut seq: u8,
    max_allowed_packet: usize,
) -> MyResult<u8> {
    if payload.len() > max_allowed_packet {
        return Err(ProtocolError::PacketTooLarge {
            size: payload.len(),
            max: max_allowed_packet,
        }
        .into());
    }

    let mut last_was_max = true;
    for chunk in payload.chunks(MAX_PAYLOAD_LEN) {
        stream.write_le_uint_n(chunk.len() as u64, 3)?;
        stream.write_u8(seq)?;
        stream.write_all(chunk)?;
        last_was_max = chunk.len() == MAX_PAYLOAD_LEN;
        seq = seq.wrapping_add(1);
    }
    // empty payloads and exact multiples both end with an empty frame
    if last_was_max {
        stream.write_all(&[0, 0, 0, seq])?;
        seq = seq.wrapping_add(1);
    }
    stream.flush()?;
    Ok(seq)
}

/// Sequenced packet I/O over a transport.
///
/// Tracks the sequence id of the current exchange, the outgoing packet size limit and the
/// number of payload bytes read so far.
#[derive(Debug)]
pub struct PacketStream<T> {
    transport: T,
    seq: u8,
    max_allowed_packet: usize,
    bytes_read: u64,
}

impl<T: Transport> PacketStream<T> {
    pub fn new(transport: T, max_allowed_packet: usize) -> Self {
        PacketStream {
            transport,
            seq: 0,
            max_allowed_packet,
            bytes_read: 0,
        }
    }

    pub fn read_packet(&mut self) -> MyResult<Vec<u8>> {
        let packet = read_packet(&mut self.transport, self.seq)?;
        self.seq = packet.next_seq;
        self.bytes_read += packet.payload.len() as u64;
        Ok(packet.payload)
    }

    pub fn write_packet(&mut self, payload: &[u8]) -> MyResult<()> {
        self.seq = write_packet(
            &mut self.transport,
            payload,
            self.seq,
            self.max_allowed_packet,
        )?;
        Ok(())
    }

    /// Starts a new exchange with the given command payload.
    pub fn write_command(&mut self, payload: &[u8]) -> MyResult<()> {
        self.reset_seq();
        self.write_packet(payload)
    }

    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn seq(&self) -> u8 {
        self.seq
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn set_max_allowed_packet(&mut self, max_allowed_packet: usize) {
        self.max_allowed_packet = max_allowed_packet;
    }

    pub fn shutdown(&mut self) -> io::Result<()> {
        self.transport.shutdown()
    }
}

#[cfg(test)]
mod test {
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::{error::Error, io::mock::MockTransport};

    #[test]
    fn should_round_trip_payloads_across_frame_boundary() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
        let sizes = [
            0,
            1,
            MAX_PAYLOAD_LEN - 1,
            MAX_PAYLOAD_LEN,
            MAX_PAYLOAD_LEN + 1,
            MAX_PAYLOAD_LEN * 2,
            20_000_000,
        ];
        for size in sizes {
            let mut payload = vec![0u8; size];
            rng.fill(&mut payload[..]);

            let mut wire = Vec::new();
            let next = write_packet(&mut wire, &payload, 7, usize::MAX).unwrap();
            let frames = size / MAX_PAYLOAD_LEN + 1;
            assert_eq!(next, 7 + frames as u8, "size {}", size);
            assert_eq!(wire.len(), size + frames * 4);

            let packet = read_packet(&mut &wire[..], 7).unwrap();
            assert_eq!(packet.seq, 7);
            assert_eq!(packet.next_seq, next);
            assert!(packet.payload == payload, "size {}", size);
        }
    }

    #[test]
    fn should_write_empty_packet_as_single_frame() {
        let mut wire = Vec::new();
        assert_eq!(write_packet(&mut wire, &[], 255, 1024).unwrap(), 0);
        assert_eq!(wire, [0, 0, 0, 255]);
    }

    #[test]
    fn should_reject_sequence_gap() {
        let transport = MockTransport::new();
        transport.push_packet(0, b"first");
        transport.push_packet(2, b"second");
        let mut stream = PacketStream::new(transport, 1024);

        assert_eq!(stream.read_packet().unwrap(), b"first");
        match stream.read_packet() {
            Err(Error::ProtocolError(ProtocolError::SequenceMismatch { expected, observed })) => {
                assert_eq!((expected, observed), (1, 2));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn should_reject_sequence_gap_inside_split_packet() {
        let mut wire = Vec::new();
        wire.write_le_uint_n(MAX_PAYLOAD_LEN as u64, 3).unwrap();
        wire.push(0);
        wire.resize(wire.len() + MAX_PAYLOAD_LEN, 0xAB);
        wire.extend_from_slice(&[1, 0, 0, 5, 0xCD]);

        match read_packet(&mut &wire[..], 0) {
            Err(Error::ProtocolError(ProtocolError::SequenceMismatch { expected, observed })) => {
                assert_eq!((expected, observed), (1, 5));
            }
            other => panic!("unexpected {:?}", other.map(|p| p.payload.len())),
        }
    }

    #[test]
    fn should_fail_on_truncated_frame() {
        let wire = [10u8, 0, 0, 0, 1, 2, 3];
        match read_packet(&mut &wire[..], 0) {
            Err(Error::IoError(err)) => assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn should_refuse_oversized_packet_before_writing() {
        let transport = MockTransport::new();
        let mut stream = PacketStream::new(transport.clone(), 1024);
        match stream.write_command(&[0u8; 1025]) {
            Err(Error::ProtocolError(ProtocolError::PacketTooLarge { size, max })) => {
                assert_eq!((size, max), (1025, 1024));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(transport.written().is_empty());
    }

    #[test]
    fn should_count_bytes_and_reset_sequence() {
        let transport = MockTransport::new();
        transport.push_packet(1, &[0u8; 100]);
        transport.push_packet(2, &[0u8; 50]);
        let mut stream = PacketStream::new(transport.clone(), 1024);

        stream.write_command(b"\x03SELECT 1").unwrap();
        assert_eq!(stream.seq(), 1);
        stream.read_packet().unwrap();
        stream.read_packet().unwrap();
        assert_eq!(stream.bytes_read(), 150);
        assert_eq!(stream.seq(), 3);

        stream.write_command(b"\x0e").unwrap();
        let written = transport.written_packets();
        assert_eq!(written.len(), 2);
        assert_eq!(written[1], (0, b"\x0e".to_vec()));
    }
}
