//! Transport-agnostic duplex connections
//!
//! A [`Connection`] owns two threads while connected: a writer draining an
//! outbound queue into the transport, and a reader decoding inbound frames
//! and handing them to a [`MessageHandler`].

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::message::{ConnectionId, Message};
use super::wire;

/// Messages a connection may have queued before the peer counts as stuck
pub const OUTBOUND_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("{0:?} transport is not available")]
    Unavailable(TransportKind),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("outbound queue is full")]
    Backlogged,

    #[error("connection is closed")]
    Closed,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum TransportKind {
    Tcp,
    Memory,
    /// Provided by platform code; only the tag lives here
    Bluetooth,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The byte streams of an opened transport, plus a way to tear it down.
///
/// `closer` must make a blocked `reader` return, either with an error or
/// end of stream.
pub struct StreamPair {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    pub closer: Box<dyn FnOnce() + Send>,
}

impl StreamPair {
    pub fn new(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
        closer: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            closer: Box::new(closer),
        }
    }
}

/// Controller side: something that can open a stream to a host.
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn is_available(&self) -> bool {
        true
    }

    /// Perform the transport handshake.
    fn open(&self) -> Result<StreamPair, TransportError>;
}

/// Host side: something that yields streams from new controllers.
pub trait Listener: Send {
    fn kind(&self) -> TransportKind;

    /// Wait up to `timeout` for a controller. `Ok(None)` on timeout,
    /// `Err(TransportError::Closed)` once no more controllers can arrive.
    fn accept(&mut self, timeout: Duration) -> Result<Option<StreamPair>, TransportError>;
}

/// Receives decoded messages on a connection's reader thread.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, connection: &Connection, message: Message);

    /// Called once when the reader stops, whatever the reason.
    fn on_disconnect(&self, _connection: &Connection) {}
}

/// Adapts a closure into a [`MessageHandler`].
pub struct FnHandler<F>(pub F);

impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Connection, Message) + Send + Sync + 'static,
{
    fn on_message(&self, connection: &Connection, message: Message) {
        (self.0)(connection, message)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Role {
    Controller,
    Host,
}

struct Link {
    outbound: Sender<Message>,
    closer: Box<dyn FnOnce() + Send>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

struct Inner {
    id: AtomicU32,
    kind: TransportKind,
    role: Role,
    state: Mutex<ConnectionState>,
    link: Mutex<Option<Link>>,
}

impl Inner {
    fn id(&self) -> ConnectionId {
        self.id.load(Ordering::Acquire)
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }
}

// Reached only when every handle was dropped without `close`.
impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            drop(link.outbound);
            (link.closer)();
        }
    }
}

/// One end of a duplex message channel.
///
/// Cloning gives another handle to the same connection.
///
/// ```text
/// Disconnected -> Connecting -> Connected -> Disconnected
///                     |                           ^
///                     +------ handshake failed ---+
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// A controller-side connection that has not connected yet
    pub fn new(kind: TransportKind) -> Self {
        Self::with_role(0, kind, Role::Controller)
    }

    fn with_role(id: ConnectionId, kind: TransportKind, role: Role) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: AtomicU32::new(id),
                kind,
                role,
                state: Mutex::new(ConnectionState::Disconnected),
                link: Mutex::new(None),
            }),
        }
    }

    /// A host-side connection over an already accepted stream
    pub(crate) fn accepted(
        id: ConnectionId,
        kind: TransportKind,
        pair: StreamPair,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<Self, TransportError> {
        let connection = Self::with_role(id, kind, Role::Host);
        connection.start(pair, handler)?;
        Ok(connection)
    }

    /// Open `transport` and start the reader and writer.
    ///
    /// A failed handshake leaves the connection `Disconnected` and is
    /// returned to the caller; nothing is retried. Connecting an already
    /// connected connection does nothing.
    pub fn connect(
        &self,
        transport: &dyn Transport,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Disconnected {
            return Ok(());
        }
        // reap threads of an earlier session that the peer ended
        self.release_link(true);
        self.inner.set_state(ConnectionState::Connecting);

        let kind = self.inner.kind;
        if !transport.is_available() {
            self.inner.set_state(ConnectionState::Disconnected);
            return Err(TransportError::Unavailable(kind));
        }

        let pair = match transport.open() {
            Ok(pair) => pair,
            Err(e) => {
                warn!(kind = ?kind, error = %e, "connect failed");
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.start(pair, handler)?;
        debug!(kind = ?kind, "connected");
        Ok(())
    }

    fn start(&self, pair: StreamPair, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        let StreamPair {
            reader,
            writer,
            closer,
        } = pair;
        let (outbound, queue) = crossbeam_channel::bounded(OUTBOUND_CAPACITY);
        let name = format!("conn-{}", self.id());

        // Connected before the reader runs, so an immediate EOF wins.
        self.inner.set_state(ConnectionState::Connected);

        let weak = Arc::downgrade(&self.inner);
        let writer_thread = match thread::Builder::new()
            .name(format!("{name}-tx"))
            .spawn(move || write_loop(weak, writer, queue))
        {
            Ok(handle) => handle,
            Err(e) => {
                closer();
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };

        *self.inner.link.lock() = Some(Link {
            outbound,
            closer,
            writer: Some(writer_thread),
            reader: None,
        });

        let weak = Arc::downgrade(&self.inner);
        match thread::Builder::new()
            .name(format!("{name}-rx"))
            .spawn(move || read_loop(weak, reader, handler))
        {
            Ok(handle) => {
                if let Some(link) = self.inner.link.lock().as_mut() {
                    link.reader = Some(handle);
                }
                Ok(())
            }
            Err(e) => {
                self.close();
                Err(e.into())
            }
        }
    }

    #[inline]
    pub fn id(&self) -> ConnectionId {
        self.inner.id()
    }

    /// Record the id the host assigned to this controller
    pub fn set_id(&self, id: ConnectionId) {
        self.inner.id.store(id, Ordering::Release);
    }

    #[inline]
    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Queue `message` for delivery. Does nothing unless connected.
    pub fn send(&self, message: Message) {
        if let Err(e) = self.try_send(message) {
            trace!(id = self.id(), error = %e, "message not sent");
        }
    }

    /// Like [`send`](Self::send), but reports why nothing was queued.
    ///
    /// Controller-side connections stamp their id into `sender` once the
    /// host has assigned one.
    pub fn try_send(&self, mut message: Message) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        if self.inner.role == Role::Controller && message.sender.is_none() {
            let id = self.id();
            if id != 0 {
                message.sender = Some(id);
            }
        }

        let link = self.inner.link.lock();
        let link = link.as_ref().ok_or(TransportError::Closed)?;
        link.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => TransportError::Backlogged,
            TrySendError::Disconnected(_) => TransportError::Closed,
        })
    }

    /// Flush queued messages, release the transport, then stop the reader.
    ///
    /// Safe to call more than once, and from the handler itself.
    pub fn close(&self) {
        if self.release_link(true) {
            debug!(id = self.id(), "connection closed");
        }
    }

    /// Drop whatever is still queued and tear the transport down at once.
    ///
    /// For peers that stopped reading; `close` would wait on their writer.
    pub fn abort(&self) {
        if self.release_link(false) {
            debug!(id = self.id(), "connection aborted");
        }
    }

    fn release_link(&self, flush: bool) -> bool {
        let Some(link) = self.inner.link.lock().take() else {
            return false;
        };
        self.inner.set_state(ConnectionState::Disconnected);

        let Link {
            outbound,
            closer,
            writer,
            reader,
        } = link;

        drop(outbound);
        if flush {
            // the writer drains whatever is still queued, then exits
            if let Some(writer) = writer {
                join(writer, "writer");
            }
            closer();
        } else {
            closer();
            if let Some(writer) = writer {
                join(writer, "writer");
            }
        }

        if let Some(reader) = reader {
            if reader.thread().id() != thread::current().id() {
                join(reader, "reader");
            }
        }
        true
    }
}

fn join(handle: JoinHandle<()>, what: &str) {
    if handle.join().is_err() {
        warn!(thread = what, "connection thread panicked");
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish()
    }
}

fn write_loop(conn: Weak<Inner>, mut writer: Box<dyn Write + Send>, queue: Receiver<Message>) {
    for message in queue.iter() {
        if let Err(e) = wire::write_message(&mut writer, &message) {
            if let Some(inner) = conn.upgrade() {
                warn!(id = inner.id(), error = %e, "send failed");
                inner.set_state(ConnectionState::Disconnected);
            }
            return;
        }
    }
    let _ = writer.flush();
}

fn read_loop(conn: Weak<Inner>, mut reader: Box<dyn Read + Send>, handler: Arc<dyn MessageHandler>) {
    let connection = loop {
        let frame = wire::read_frame(&mut reader);
        let Some(inner) = conn.upgrade() else {
            return;
        };
        let connection = Connection { inner };

        match frame {
            Ok(Some(body)) => match Message::decode(&body) {
                Ok(message) => {
                    trace!(id = connection.id(), command = ?message.command, "received");
                    handler.on_message(&connection, message);
                }
                Err(e) => warn!(id = connection.id(), error = %e, "dropping malformed message"),
            },
            Ok(None) => {
                debug!(id = connection.id(), "peer hung up");
                break connection;
            }
            Err(e) => {
                warn!(id = connection.id(), error = %e, "receive failed");
                break connection;
            }
        }
    };

    connection.inner.set_state(ConnectionState::Disconnected);
    handler.on_disconnect(&connection);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::memory;
    use crate::net::Command;
    use std::time::Instant;

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    struct Refused;

    impl Transport for Refused {
        fn kind(&self) -> TransportKind {
            TransportKind::Tcp
        }

        fn open(&self) -> Result<StreamPair, TransportError> {
            Err(io::Error::from(io::ErrorKind::ConnectionRefused).into())
        }
    }

    struct Offline;

    impl Transport for Offline {
        fn kind(&self) -> TransportKind {
            TransportKind::Bluetooth
        }

        fn is_available(&self) -> bool {
            false
        }

        fn open(&self) -> Result<StreamPair, TransportError> {
            unreachable!("never opened while unavailable")
        }
    }

    fn ignore() -> Arc<dyn MessageHandler> {
        Arc::new(FnHandler(|_: &Connection, _: Message| {}))
    }

    #[test]
    fn failed_handshake_returns_to_disconnected() {
        let conn = Connection::new(TransportKind::Tcp);
        assert!(matches!(conn.connect(&Refused, ignore()), Err(TransportError::Io(_))));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let conn = Connection::new(TransportKind::Bluetooth);
        assert!(matches!(
            conn.connect(&Offline, ignore()),
            Err(TransportError::Unavailable(TransportKind::Bluetooth))
        ));
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn send_while_disconnected_is_a_no_op() {
        let conn = Connection::new(TransportKind::Memory);
        conn.send(Message::hello());
        assert!(matches!(conn.try_send(Message::hello()), Err(TransportError::Closed)));
    }

    #[test]
    fn close_flushes_queued_messages() {
        let (ours, theirs) = memory::duplex();
        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        let peer = Connection::accepted(
            9,
            TransportKind::Memory,
            theirs,
            Arc::new(FnHandler(move |_: &Connection, m: Message| log.lock().push(m))),
        )
        .unwrap();

        let conn = Connection::accepted(1, TransportKind::Memory, ours, ignore()).unwrap();
        for _ in 0..50 {
            conn.send(Message::hello());
        }
        conn.close();
        conn.close();

        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(wait_until(|| received.lock().len() == 50));
        assert!(wait_until(|| !peer.is_connected()));
    }

    #[test]
    fn controller_stamps_its_id() {
        let (transport, mut listener) = memory::channel();
        let conn = Connection::new(TransportKind::Memory);
        conn.connect(&transport, ignore()).unwrap();
        let pair = listener.accept(Duration::from_secs(1)).unwrap().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let log = received.clone();
        let host_side = Connection::accepted(
            3,
            TransportKind::Memory,
            pair,
            Arc::new(FnHandler(move |_: &Connection, m: Message| log.lock().push(m))),
        )
        .unwrap();

        conn.send(Message::hello());
        conn.set_id(3);
        conn.send(Message::hello());
        assert!(wait_until(|| received.lock().len() == 2));
        let got = received.lock();
        assert_eq!(got[0].sender, None);
        assert_eq!(got[1].sender, Some(3));
        assert_eq!(got[1].command, Command::Hello);

        conn.close();
        host_side.close();
    }

    #[test]
    fn outbound_queue_is_bounded_and_abort_does_not_wait() {
        let conn = Connection::accepted(1, TransportKind::Memory, memory::stalled(), ignore()).unwrap();

        let mut result = Ok(());
        for _ in 0..OUTBOUND_CAPACITY + 2 {
            result = conn.try_send(Message::hello());
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(TransportError::Backlogged)));
        assert!(conn.is_connected());

        conn.abort();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(conn.try_send(Message::hello()), Err(TransportError::Closed)));
    }
}
