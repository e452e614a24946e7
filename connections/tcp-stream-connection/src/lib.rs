// Copyright 2020 Joyent, Inc.

use std::convert::TryFrom;
use std::io::{self, Error as IOError, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use colpool::connection::Connection;
use colpool::node::Node;

/// The largest frame `recv_message` accepts.
pub const MAX_FRAME_SIZE: u32 = 16_384_000;

/// A pooled connection holding one TCP stream to a node. The node's socket
/// timeout, if configured, bounds connecting as well as every read and write.
///
/// When the node is configured as framed, `send_message` and `recv_message`
/// delimit each message with a four byte big-endian length prefix. The `Read`
/// and `Write` implementations always operate on the raw stream.
#[derive(Debug)]
pub struct TcpStreamConnection {
    stream: Option<TcpStream>,
    address: String,
    port: u16,
    timeout: Option<Duration>,
    framed: bool,
}

impl TcpStreamConnection {
    pub fn new(node: &Node) -> Self {
        TcpStreamConnection {
            stream: None,
            address: node.address.clone(),
            port: node.port(),
            timeout: node.socket_timeout(),
            framed: node.config.framed,
        }
    }

    pub fn is_framed(&self) -> bool {
        self.framed
    }

    /// Send one message, prefixed with its length if the connection is
    /// framed.
    pub fn send_message(&mut self, message: &[u8]) -> Result<(), IOError> {
        let framed = self.framed;
        let stream = self.stream()?;
        if framed {
            let len = u32::try_from(message.len())
                .ok()
                .filter(|len| *len <= MAX_FRAME_SIZE)
                .ok_or_else(|| {
                    IOError::new(ErrorKind::InvalidInput, "message too large")
                })?;
            stream.write_all(&len.to_be_bytes())?;
        }
        stream.write_all(message)?;
        stream.flush()
    }

    /// Receive one framed message. An unframed stream carries no message
    /// boundaries, so this fails with `InvalidInput` if the connection is not
    /// framed.
    pub fn recv_message(&mut self) -> Result<Vec<u8>, IOError> {
        if !self.framed {
            return Err(IOError::new(
                ErrorKind::InvalidInput,
                "connection is not framed",
            ));
        }
        let stream = self.stream()?;
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix)?;
        let len = u32::from_be_bytes(prefix);
        if len > MAX_FRAME_SIZE {
            return Err(IOError::new(
                ErrorKind::InvalidData,
                format!("frame of {} bytes exceeds maximum", len),
            ));
        }
        let mut message = vec![0u8; len as usize];
        stream.read_exact(&mut message)?;
        Ok(message)
    }

    /// The underlying stream. Fails with `NotConnected` before `connect` or
    /// after `close`.
    pub fn stream(&mut self) -> Result<&mut TcpStream, IOError> {
        self.stream.as_mut().ok_or_else(|| {
            IOError::new(ErrorKind::NotConnected, "not connected")
        })
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>, IOError> {
        let addrs: Vec<SocketAddr> =
            (self.address.as_str(), self.port).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(IOError::new(
                ErrorKind::AddrNotAvailable,
                format!("{} did not resolve", self.address),
            ));
        }
        Ok(addrs)
    }

    fn open(&self, addr: &SocketAddr) -> Result<TcpStream, IOError> {
        let stream = match self.timeout {
            Some(timeout) => TcpStream::connect_timeout(addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

impl From<&Node> for TcpStreamConnection {
    fn from(node: &Node) -> Self {
        TcpStreamConnection::new(node)
    }
}

impl Connection for TcpStreamConnection {
    type Error = IOError;

    fn connect(&mut self) -> Result<(), Self::Error> {
        let mut last_err = None;
        for addr in self.resolve()? {
            match self.open(&addr) {
                Ok(stream) => {
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            IOError::new(ErrorKind::NotConnected, "no address to connect to")
        }))
    }

    fn is_open(&self) -> bool {
        let stream = match &self.stream {
            Some(stream) => stream,
            None => return false,
        };

        // A readable stream with nothing to read is healthy; end of file or
        // an error means the peer is gone.
        if stream.set_nonblocking(true).is_err() {
            return false;
        }
        let mut buf = [0u8; 1];
        let open = match stream.peek(&mut buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => true,
            Err(_) => false,
        };
        open && stream.set_nonblocking(false).is_ok()
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        match self.stream.take() {
            Some(stream) => match stream.shutdown(Shutdown::Both) {
                Ok(()) => Ok(()),
                // The peer may already have gone away
                Err(ref e) if e.kind() == ErrorKind::NotConnected => Ok(()),
                Err(e) => Err(e),
            },
            None => Ok(()),
        }
    }
}

impl Read for TcpStreamConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }
}

impl Write for TcpStreamConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream()?.flush()
    }
}
