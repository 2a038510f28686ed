// Copyright (c) 2020 rust-mysql-simple contributors
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use socket2::{Domain, Protocol, SockAddr, Socket, TcpKeepalive, Type};

use std::{
    io,
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

pub struct MyTcpBuilder<T> {
    address: T,
    connect_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    keepalive_time_ms: Option<u32>,
    nodelay: bool,
}

impl<T: ToSocketAddrs> MyTcpBuilder<T> {
    pub fn keepalive_time_ms(&mut self, keepalive_time_ms: Option<u32>) -> &mut Self {
        self.keepalive_time_ms = keepalive_time_ms;
        self
    }

    pub fn nodelay(&mut self, nodelay: bool) -> &mut Self {
        self.nodelay = nodelay;
        self
    }

    pub fn write_timeout(&mut self, write_timeout: Option<Duration>) -> &mut Self {
        self.write_timeout = write_timeout;
        self
    }

    pub fn read_timeout(&mut self, read_timeout: Option<Duration>) -> &mut Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn connect_timeout(&mut self, timeout: Option<Duration>) -> &mut Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn new(address: T) -> MyTcpBuilder<T> {
        MyTcpBuilder {
            address,
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            keepalive_time_ms: None,
            nodelay: true,
        }
    }

    /// Tries every resolved address in turn and returns the first stream that connects.
    pub fn connect(&self) -> io::Result<TcpStream> {
        let err = io::Error::new(io::ErrorKind::Other, "could not connect to any address");

        let socket = self
            .address
            .to_socket_addrs()?
            .fold(Err(err), |prev, sock_addr| {
                prev.or_else(|_| self.connect_one(sock_addr))
            })?;

        socket.set_read_timeout(self.read_timeout)?;
        socket.set_write_timeout(self.write_timeout)?;
        socket.set_nodelay(self.nodelay)?;
        if let Some(duration) = self.keepalive_time_ms {
            let conf =
                TcpKeepalive::new().with_time(Duration::from_millis(u64::from(duration)));
            socket.set_tcp_keepalive(&conf)?;
        }

        Ok(TcpStream::from(socket))
    }

    fn connect_one(&self, sock_addr: SocketAddr) -> io::Result<Socket> {
        let socket = Socket::new(
            Domain::for_address(sock_addr),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        let addr = SockAddr::from(sock_addr);
        match self.connect_timeout {
            Some(timeout) => socket.connect_timeout(&addr, timeout)?,
            None => socket.connect(&addr)?,
        }
        Ok(socket)
    }
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;

    use super::MyTcpBuilder;

    #[test]
    fn should_connect_to_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut builder = MyTcpBuilder::new(addr);
        builder
            .keepalive_time_ms(Some(5_000))
            .connect_timeout(Some(std::time::Duration::from_secs(5)));
        let stream = builder.connect().unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert!(stream.nodelay().unwrap());
    }
}
