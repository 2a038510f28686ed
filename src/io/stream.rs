// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use bufstream::BufStream;

use std::{fmt, io, net, time::Duration};

#[cfg(unix)]
use std::os::unix;

use crate::{
    error::{DriverError::CouldNotConnect, DriverError::ConnectTimeout, Error::DriverError},
    io::tcp::MyTcpBuilder,
    Opts, Result as MyResult,
};

/// Ordered, reliable byte stream a session runs over.
///
/// The session engine does not care whether this is a plain socket or a TLS tunnel
/// established by someone else, it only asks whether the bytes are protected (some
/// authentication plugins refuse to send a password otherwise).
pub trait Transport: io::Read + io::Write + Send {
    /// Whether the stream is encrypted or otherwise protected from eavesdropping.
    fn is_secure(&self) -> bool {
        false
    }

    /// Flushes pending output and closes the stream.
    fn shutdown(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn is_secure(&self) -> bool {
        (**self).is_secure()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        (**self).shutdown()
    }
}

/// Buffered connection to a server.
pub enum Stream {
    #[cfg(unix)]
    SocketStream(BufStream<unix::net::UnixStream>),
    TcpStream(BufStream<net::TcpStream>),
}

impl Stream {
    #[cfg(unix)]
    pub fn connect_socket(
        socket: &str,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> MyResult<Stream> {
        match unix::net::UnixStream::connect(socket) {
            Ok(stream) => {
                stream.set_read_timeout(read_timeout)?;
                stream.set_write_timeout(write_timeout)?;
                Ok(Stream::SocketStream(BufStream::new(stream)))
            }
            Err(e) => {
                let addr = socket.to_string();
                let desc = e.to_string();
                Err(DriverError(CouldNotConnect(Some((addr, desc, e.kind())))))
            }
        }
    }

    #[cfg(not(unix))]
    pub fn connect_socket(
        socket: &str,
        _read_timeout: Option<Duration>,
        _write_timeout: Option<Duration>,
    ) -> MyResult<Stream> {
        Err(DriverError(CouldNotConnect(Some((
            socket.to_string(),
            "unix sockets are not supported on this platform".into(),
            io::ErrorKind::Unsupported,
        )))))
    }

    pub fn connect_tcp(ip_or_hostname: &str, port: u16, opts: &Opts) -> MyResult<Stream> {
        let mut builder = MyTcpBuilder::new((ip_or_hostname, port));
        builder
            .connect_timeout(opts.get_tcp_connect_timeout())
            .read_timeout(opts.get_read_timeout())
            .write_timeout(opts.get_write_timeout())
            .keepalive_time_ms(opts.get_tcp_keepalive_time_ms())
            .nodelay(opts.get_tcp_nodelay());
        builder
            .connect()
            .map(|stream| Stream::TcpStream(BufStream::new(stream)))
            .map_err(|err| {
                if err.kind() == io::ErrorKind::TimedOut {
                    DriverError(ConnectTimeout)
                } else {
                    let addr = format!("{}:{}", ip_or_hostname, port);
                    let desc = err.to_string();
                    DriverError(CouldNotConnect(Some((addr, desc, err.kind()))))
                }
            })
    }

    /// Connects to the server described by `opts`, preferring the socket if one is set.
    pub fn connect(opts: &Opts) -> MyResult<Stream> {
        match opts.get_socket() {
            Some(socket) => {
                Stream::connect_socket(socket, opts.get_read_timeout(), opts.get_write_timeout())
            }
            None => Stream::connect_tcp(&opts.get_ip_or_hostname(), opts.get_tcp_port(), opts),
        }
    }

    fn as_mut(&mut self) -> &mut dyn BufIo {
        match self {
            #[cfg(unix)]
            Stream::SocketStream(stream) => stream,
            Stream::TcpStream(stream) => stream,
        }
    }
}

trait BufIo: io::Read + io::Write {}

impl<T: io::Read + io::Write> BufIo for BufStream<T> {}

impl io::Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.as_mut().read(buf)
    }
}

impl io::Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.as_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.as_mut().flush()
    }
}

impl Transport for Stream {
    fn shutdown(&mut self) -> io::Result<()> {
        io::Write::flush(self)?;
        match self {
            #[cfg(unix)]
            Stream::SocketStream(stream) => stream.get_ref().shutdown(net::Shutdown::Both),
            Stream::TcpStream(stream) => stream.get_ref().shutdown(net::Shutdown::Both),
        }
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Stream::SocketStream(stream) => write!(f, "Socket stream {:?}", stream.get_ref()),
            Stream::TcpStream(stream) => write!(f, "Tcp stream {:?}", stream.get_ref()),
        }
    }
}
