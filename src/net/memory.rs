//! In-process transport over crossbeam channels
//!
//! Behaves like a socket: bytes written on one end come out of the other,
//! and dropping a writer is end of stream for the peer.

use std::io::{self, Read, Write};
use std::time::Duration;

use crossbeam_channel::{select, Receiver, RecvTimeoutError, Sender};

use super::connection::{Listener, StreamPair, Transport, TransportError, TransportKind};

struct MemoryReader {
    incoming: Receiver<Vec<u8>>,
    shutdown: Receiver<()>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.pending.len() {
            select! {
                recv(self.incoming) -> chunk => match chunk {
                    Ok(chunk) => {
                        self.pending = chunk;
                        self.pos = 0;
                    }
                    Err(_) => return Ok(0),
                },
                // nothing is ever sent; the sender being dropped is the signal
                recv(self.shutdown) -> _ => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

struct MemoryWriter {
    outgoing: Sender<Vec<u8>>,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.outgoing
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer hung up"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn end(incoming: Receiver<Vec<u8>>, outgoing: Sender<Vec<u8>>) -> StreamPair {
    let (stop, shutdown) = crossbeam_channel::bounded::<()>(0);
    StreamPair::new(
        MemoryReader {
            incoming,
            shutdown,
            pending: Vec::new(),
            pos: 0,
        },
        MemoryWriter { outgoing },
        move || drop(stop),
    )
}

/// Two connected stream ends.
pub fn duplex() -> (StreamPair, StreamPair) {
    let (a_tx, a_rx) = crossbeam_channel::unbounded();
    let (b_tx, b_rx) = crossbeam_channel::unbounded();
    (end(a_rx, b_tx), end(b_rx, a_tx))
}

/// A stream whose peer never reads or writes: both directions block until
/// the closer runs.
#[cfg(test)]
pub(crate) fn stalled() -> StreamPair {
    struct Stuck(Receiver<()>);

    impl Read for Stuck {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    impl Write for Stuck {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let (release, gate) = crossbeam_channel::bounded::<()>(0);
    StreamPair::new(Stuck(gate.clone()), Stuck(gate), move || drop(release))
}

/// Controller side of an in-memory link. Cheap to clone.
#[derive(Clone)]
pub struct MemoryTransport {
    host: Sender<StreamPair>,
}

/// Host side of an in-memory link.
pub struct MemoryListener {
    incoming: Receiver<StreamPair>,
}

/// A transport/listener pair: every `open` on the transport shows up as one
/// `accept` on the listener.
pub fn channel() -> (MemoryTransport, MemoryListener) {
    let (host, incoming) = crossbeam_channel::unbounded();
    (MemoryTransport { host }, MemoryListener { incoming })
}

impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn open(&self) -> Result<StreamPair, TransportError> {
        let (ours, theirs) = duplex();
        self.host
            .send(theirs)
            .map_err(|_| TransportError::Unavailable(TransportKind::Memory))?;
        Ok(ours)
    }
}

impl Listener for MemoryListener {
    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    fn accept(&mut self, timeout: Duration) -> Result<Option<StreamPair>, TransportError> {
        match self.incoming.recv_timeout(timeout) {
            Ok(pair) => Ok(Some(pair)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }
}
