//! Byte-stream transports the client runs over.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream as StdTcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token};

use crate::config::TlsConfig;
use crate::error::{ClientError, Result};

const STREAM: Token = Token(0);
const READ_CHUNK: usize = 4096;

/// A connected byte stream.
///
/// Reads are non-blocking: when no data is buffered they fail with
/// `WouldBlock`, and callers wait with [`poll_readable`](Transport::poll_readable).
/// A read of zero bytes means the peer closed the stream.
pub trait Transport: Read + Write + Send {
    /// Wait until a read would make progress (data or EOF).
    /// Returns `Ok(false)` if `timeout` elapsed first.
    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Close the stream. Further writes fail.
    fn close(&mut self);

    /// Release spare buffer capacity while the connection is idle.
    fn reclaim(&mut self) {}
}

/// Opens transports for [`Client::connect`](crate::Client::connect).
pub trait Connector: Send {
    fn open(&mut self, host: &str, port: u16, timeout: Duration) -> Result<Box<dyn Transport>>;
}

/// Plain TCP, optionally wrapped in TLS.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    tls: Option<TlsConfig>,
}

impl TcpConnector {
    pub fn new(tls: Option<TlsConfig>) -> Self {
        Self { tls }
    }
}

impl Connector for TcpConnector {
    fn open(&mut self, host: &str, port: u16, timeout: Duration) -> Result<Box<dyn Transport>> {
        let tcp = TcpTransport::connect(host, port, timeout)?;
        match &self.tls {
            None => Ok(Box::new(tcp)),
            #[cfg(feature = "tls")]
            Some(tls) => Ok(Box::new(crate::tls::TlsTransport::new(tcp, tls, host)?)),
            #[cfg(not(feature = "tls"))]
            Some(_) => Err(ClientError::Tls(
                "TLS requested but the `tls` feature is not enabled".into(),
            )),
        }
    }
}

/// Non-blocking TCP stream driven by a private `mio` poll.
pub struct TcpTransport {
    poll: Poll,
    events: Events,
    stream: TcpStream,
    read_buf: BytesMut,
    eof: bool,
}

impl TcpTransport {
    /// Resolve `host` and connect to the first address that accepts.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match StdTcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::from_std(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(ClientError::Io(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("could not resolve {host}"))
        })))
    }

    /// Take over an already connected std stream.
    pub fn from_std(stream: StdTcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        let mut stream = TcpStream::from_std(stream);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut stream, STREAM, Interest::READABLE)?;

        Ok(Self {
            poll,
            events: Events::with_capacity(4),
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            eof: false,
        })
    }

    /// Drain the socket into the read buffer until it would block.
    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        while !self.eof {
            match self.stream.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn readable(&self) -> bool {
        !self.read_buf.is_empty() || self.eof
    }
}

impl Transport for TcpTransport {
    fn poll_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        self.fill()?;
        let deadline = Instant::now() + timeout;
        while !self.readable() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            match self.poll.poll(&mut self.events, Some(remaining)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
            self.fill()?;
        }
        Ok(true)
    }

    fn close(&mut self) {
        let _ = self.poll.registry().deregister(&mut self.stream);
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn reclaim(&mut self) {
        if self.read_buf.is_empty() && self.read_buf.capacity() > READ_CHUNK {
            self.read_buf = BytesMut::with_capacity(READ_CHUNK);
        }
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.read_buf.is_empty() {
            self.fill()?;
        }
        if self.read_buf.is_empty() {
            return if self.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(self.read_buf.len());
        buf[..n].copy_from_slice(&self.read_buf[..n]);
        self.read_buf.advance(n);
        Ok(n)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_read_write() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut transport = TcpTransport::connect("127.0.0.1", port, Duration::from_secs(1)).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        let mut buf = [0u8; 8];
        let err = transport.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert!(!transport.poll_readable(Duration::from_millis(20)).unwrap());

        peer.write_all(b"\xd0\x00").unwrap();
        assert!(transport.poll_readable(Duration::from_secs(1)).unwrap());
        assert_eq!(transport.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"\xd0\x00");

        transport.write_all(b"\xc0\x00").unwrap();
        let mut got = [0u8; 2];
        peer.read_exact(&mut got).unwrap();
        assert_eq!(&got, b"\xc0\x00");

        drop(peer);
        assert!(transport.poll_readable(Duration::from_secs(1)).unwrap());
        assert_eq!(transport.read(&mut buf).unwrap(), 0);
        transport.reclaim();
        transport.close();
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn test_tls_without_feature() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut connector = TcpConnector::new(Some(TlsConfig::default()));
        let err = connector
            .open("127.0.0.1", port, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Tls(_)));
    }
}
