// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Wire-level integer and string encodings, and the byte streams they travel over.

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};

use std::io::{self, Read as _};

pub use self::stream::{Stream, Transport};

#[cfg(test)]
pub(crate) mod mock;
mod stream;
pub(crate) mod tcp;

fn unexpected_eof(what: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, what)
}

/// Readers of MySQL basic data types.
pub trait ReadMysqlExt: ReadBytesExt + Sized {
    /// Reads a length-encoded integer.
    ///
    /// `0xFB` (NULL marker) and `0xFF` (ERR header) are rejected, callers that expect a NULL
    /// marker must check for it first.
    fn read_lenenc_int(&mut self) -> io::Result<u64> {
        let head_byte = self.read_u8()?;
        let length = match head_byte {
            0xfc => 2,
            0xfd => 3,
            0xfe => 8,
            0xfb | 0xff => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "invalid length-encoded integer prefix",
                ))
            }
            x => return Ok(x as u64),
        };
        self.read_uint::<LE>(length)
    }

    fn read_lenenc_bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.read_lenenc_int()?;
        self.read_fixed_bytes(len as usize)
    }

    fn read_fixed_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(len.min(1 << 16));
        let count = self.by_ref().take(len as u64).read_to_end(&mut out)?;
        if count == len {
            Ok(out)
        } else {
            Err(unexpected_eof("unexpected EOF while reading fixed-length string"))
        }
    }

    /// Reads up to (not including) the next `0x00`. Fails if there is none.
    fn read_null_terminated(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            match self.read_u8() {
                Ok(0) => return Ok(out),
                Ok(c) => out.push(c),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(unexpected_eof("missing NUL terminator"))
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<T: io::Read> ReadMysqlExt for T {}

/// Writers of MySQL basic data types.
pub trait WriteMysqlExt: WriteBytesExt + Sized {
    fn write_le_uint_n(&mut self, x: u64, len: usize) -> io::Result<()> {
        let buf = x.to_le_bytes();
        self.write_all(&buf[..len])
    }

    fn write_lenenc_int(&mut self, x: u64) -> io::Result<()> {
        if x < 251 {
            self.write_u8(x as u8)
        } else if x < 65_536 {
            self.write_u8(0xFC)?;
            self.write_le_uint_n(x, 2)
        } else if x < 16_777_216 {
            self.write_u8(0xFD)?;
            self.write_le_uint_n(x, 3)
        } else {
            self.write_u8(0xFE)?;
            self.write_le_uint_n(x, 8)
        }
    }

    fn write_lenenc_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_lenenc_int(bytes.len() as u64)?;
        self.write_all(bytes)
    }

    fn write_null_terminated(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.write_u8(0)
    }
}

impl<T: io::Write> WriteMysqlExt for T {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_write_lenenc_int_boundaries() {
        let cases: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (250, &[0xfa]),
            (251, &[0xfc, 0xfb, 0x00]),
            (65_535, &[0xfc, 0xff, 0xff]),
            (65_536, &[0xfd, 0x00, 0x00, 0x01]),
            (16_777_215, &[0xfd, 0xff, 0xff, 0xff]),
            (16_777_216, &[0xfe, 0, 0, 0, 1, 0, 0, 0, 0]),
        ];
        for (value, expected) in cases {
            let mut out = Vec::new();
            out.write_lenenc_int(*value).unwrap();
            assert_eq!(&out[..], *expected, "value {}", value);
            assert_eq!((&out[..]).read_lenenc_int().unwrap(), *value);
        }
    }

    #[test]
    fn should_reject_null_marker_as_int() {
        let err = (&[0xfb_u8][..]).read_lenenc_int().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn should_read_strings() {
        let mut buf = &b"\x03foobar\x00\x02hi"[..];
        assert_eq!(buf.read_lenenc_bytes().unwrap(), b"foo");
        assert_eq!(buf.read_null_terminated().unwrap(), b"bar");
        assert_eq!(buf.read_lenenc_bytes().unwrap(), b"hi");
        assert!(buf.is_empty());
    }

    #[test]
    fn should_fail_on_truncated_strings() {
        let mut buf = &b"\x05ab"[..];
        assert_eq!(
            buf.read_lenenc_bytes().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
        let mut buf = &b"abc"[..];
        assert_eq!(
            buf.read_null_terminated().unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }
}
