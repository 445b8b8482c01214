//! TCP transport

use std::io::{self, BufReader, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use super::connection::{Listener, StreamPair, Transport, TransportError, TransportKind};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn stream_pair(stream: TcpStream) -> Result<StreamPair, TransportError> {
    stream.set_nodelay(true)?;
    let reader = stream.try_clone()?;
    let closer = stream.try_clone()?;
    Ok(StreamPair::new(
        BufReader::new(reader),
        BufWriter::new(stream),
        move || {
            let _ = closer.shutdown(Shutdown::Both);
        },
    ))
}

/// Connects to a host at a fixed address.
#[derive(Clone, Debug)]
pub struct TcpTransport {
    addr: SocketAddr,
    timeout: Option<Duration>,
}

impl TcpTransport {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, timeout: None }
    }

    /// Resolve `addr` and take the first result
    pub fn resolve(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing"))?;
        Ok(Self::new(addr))
    }

    /// Give up the handshake after `timeout` (builder pattern)
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn open(&self) -> Result<StreamPair, TransportError> {
        let stream = match self.timeout {
            Some(timeout) => TcpStream::connect_timeout(&self.addr, timeout)?,
            None => TcpStream::connect(self.addr)?,
        };
        stream_pair(stream)
    }
}

/// Accepts controllers on a bound socket.
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)?;
        // polled, so the accept loop can notice it was asked to stop
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }
}

impl Listener for TcpAcceptor {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn accept(&mut self, timeout: Duration) -> Result<Option<StreamPair>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    debug!(%peer, "tcp controller accepted");
                    return stream_pair(stream).map(Some);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(POLL_INTERVAL.min(deadline - now));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    #[test]
    fn accept_times_out_without_peers() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        assert!(acceptor.accept(Duration::from_millis(20)).unwrap().is_none());
    }

    #[test]
    fn loopback_round_trip() {
        let mut acceptor = TcpAcceptor::bind("127.0.0.1:0").unwrap();
        let transport = TcpTransport::new(acceptor.local_addr().unwrap())
            .with_timeout(Duration::from_secs(1));

        let client = transport.open().unwrap();
        let server = acceptor.accept(Duration::from_secs(1)).unwrap().unwrap();

        let StreamPair { mut writer, closer, .. } = client;
        writer.write_all(b"ping").unwrap();
        writer.flush().unwrap();

        let StreamPair { mut reader, .. } = server;
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        closer();
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }
}
