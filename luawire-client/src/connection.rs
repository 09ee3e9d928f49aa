//! Connection management.

use crate::error::ClientError;
use crate::pending::{PendingReply, PendingTable};
use crate::reader::FrameReader;
use bytes::Bytes;
use luawire_protocol::{
    Command, Frame, FramingError, Incoming, Reply, DEFAULT_MAX_FRAME_SIZE, DEFAULT_PORT,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default capacity for the event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Encoded commands queued for the writer task.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Host name or address of the Lua host.
    pub host: String,
    /// Port the Lua host listens on.
    pub port: u16,
    /// Largest incoming JSON frame accepted.
    pub max_frame_size: usize,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
    /// Run the `return 2+2` round trip after connecting.
    pub self_test: bool,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connect_timeout: Duration::from_secs(10),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            self_test: true,
        }
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_self_test(mut self, enabled: bool) -> Self {
        self.self_test = enabled;
        self
    }

    /// Returns `host:port`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

/// Lifecycle of a connection.
///
/// `NotConnected → Connecting → Ready → {ReadFailed, Closed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Ready,
    /// The read loop stopped on an error.
    ReadFailed,
    /// Closed by the client.
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::ReadFailed | ConnectionState::Closed)
    }
}

/// A connection to a Lua host.
///
/// One background read loop pulls frames off the socket and routes them:
/// replies to the caller waiting on their id, everything else to the event
/// channel. Any number of tasks may issue requests concurrently.
pub struct Connection {
    config: ConnectionConfig,
    /// Queue in front of the writer task. A command is either queued whole
    /// or not at all, so an abandoned caller never leaves half a frame on
    /// the wire.
    outbound: mpsc::Sender<Bytes>,
    /// Write half and queue receiver, held until the writer task takes them.
    writer: parking_lot::Mutex<Option<(BoxedWriter, mpsc::Receiver<Bytes>)>>,
    /// Read half, held until the read loop takes it.
    reader: parking_lot::Mutex<Option<FrameReader<BoxedReader>>>,
    read_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    write_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    /// Requests waiting for replies.
    pending: Arc<PendingTable>,
    /// Next correlation id.
    next_id: AtomicU64,
    state: watch::Sender<ConnectionState>,
    /// Error that stopped the read loop.
    failure: parking_lot::Mutex<Option<Arc<ClientError>>>,
    /// Unsolicited host messages.
    events: broadcast::Sender<Value>,
}

impl Connection {
    /// Opens a TCP connection to the configured host.
    pub async fn open(config: ConnectionConfig) -> Result<Self, ClientError> {
        let addr = config.addr();
        tracing::debug!("Connecting to {}...", addr);

        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect((config.host.as_str(), config.port)),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                ClientError::Refused {
                    addr: addr.clone(),
                    source: e,
                }
            } else {
                ClientError::Io(e)
            }
        })?;

        stream.set_nodelay(true).ok();
        tracing::debug!("TCP connected to {}", addr);

        Ok(Self::from_stream(stream, config))
    }

    /// Wraps an already-open transport.
    pub fn from_stream<S>(stream: S, config: ConnectionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = FrameReader::new(Box::new(read_half) as BoxedReader, config.max_frame_size)
            .with_read_buffer_size(config.read_buffer_size);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
        let writer: BoxedWriter = Box::new(write_half);

        Self {
            config,
            outbound,
            writer: parking_lot::Mutex::new(Some((writer, outbound_rx))),
            reader: parking_lot::Mutex::new(Some(reader)),
            read_task: parking_lot::Mutex::new(None),
            write_task: parking_lot::Mutex::new(None),
            pending: Arc::new(PendingTable::new()),
            next_id: AtomicU64::new(0),
            state,
            failure: parking_lot::Mutex::new(None),
            events,
        }
    }

    /// Routes events to an existing channel instead of a private one, so
    /// subscribers can outlive the connection.
    pub fn with_event_sink(mut self, events: broadcast::Sender<Value>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Marks the connection ready and spawns its read loop and writer task.
    pub fn start(self: &Arc<Self>) -> Result<(), ClientError> {
        let reader = self.reader.lock().take();
        let writer = self.writer.lock().take();
        let (Some(reader), Some((writer, outbound_rx))) = (reader, writer) else {
            return Err(ClientError::AlreadyConnected);
        };

        self.state.send_replace(ConnectionState::Ready);

        let conn = Arc::clone(self);
        let handle = tokio::spawn(async move { conn.read_loop(reader).await });
        *self.read_task.lock() = Some(handle);

        let conn = Arc::clone(self);
        let handle = tokio::spawn(async move { conn.write_loop(writer, outbound_rx).await });
        *self.write_task.lock() = Some(handle);
        Ok(())
    }

    /// Writes queued commands until the connection reaches a terminal
    /// state, then shuts the write half down so the host sees the close.
    async fn write_loop(self: Arc<Self>, mut writer: BoxedWriter, mut rx: mpsc::Receiver<Bytes>) {
        tracing::debug!("write_loop started");
        let mut state = self.state.subscribe();

        loop {
            let frame = tokio::select! {
                frame = rx.recv() => frame,
                _ = state.wait_for(ConnectionState::is_terminal) => None,
            };
            let Some(frame) = frame else { break };

            let written = tokio::select! {
                result = write_frame(&mut writer, &frame) => result,
                _ = state.wait_for(ConnectionState::is_terminal) => break,
            };
            if let Err(e) = written {
                self.fail(ClientError::Io(e));
                break;
            }
            tracing::trace!("write_loop: wrote {} bytes", frame.len());
        }

        tracing::debug!("Shutting down writer");
        let _ = writer.shutdown().await;
    }

    /// Reads and dispatches frames until the stream fails.
    async fn read_loop(self: Arc<Self>, mut reader: FrameReader<BoxedReader>) {
        tracing::debug!("read_loop started");

        let err = loop {
            match reader.read_object().await {
                Ok(frame) => self.dispatch(frame),
                Err(ClientError::Framing(FramingError::IncompleteFrame { partial }))
                    if partial.is_empty() =>
                {
                    tracing::debug!("read_loop: connection closed by host");
                    break ClientError::ConnectionClosed;
                }
                Err(e) => {
                    if let ClientError::Framing(FramingError::FrameTooLarge { size, max }) = &e {
                        tracing::warn!(
                            "read_loop: frame of {} bytes exceeds limit of {}, dropping connection",
                            size,
                            max
                        );
                    }
                    break e;
                }
            }
        };

        self.fail(err);
    }

    fn dispatch(&self, frame: Frame) {
        match Incoming::classify(frame.value) {
            Incoming::Reply(reply) => {
                let id = reply.reply_id;
                tracing::debug!("read_loop: dispatching reply id={}", id);
                if !self.pending.resolve(id, reply) {
                    tracing::debug!("read_loop: no pending request for id={}", id);
                }
            }
            Incoming::Invalid { reply_id, reason } => {
                tracing::warn!("read_loop: malformed reply id={}: {}", reply_id, reason);
                let reply = Reply::error(reply_id, format!("malformed reply: {}", reason));
                self.pending.resolve(reply_id, reply);
            }
            Incoming::Event(payload) => {
                tracing::debug!("read_loop: dispatching event");
                // No subscribers means nobody wants events.
                let _ = self.events.send(payload);
            }
        }
    }

    /// Records a fatal read or write error and cancels everyone waiting.
    /// The writer task observes the state change and closes the transport.
    fn fail(&self, err: ClientError) {
        let err = Arc::new(err);
        {
            let mut failure = self.failure.lock();
            if failure.is_none() {
                *failure = Some(Arc::clone(&err));
            }
        }

        let cancelled = self.pending.cancel_all();
        match err.as_ref() {
            ClientError::ConnectionClosed => tracing::info!(
                "Connection closed by host, cancelled {} pending request(s)",
                cancelled
            ),
            _ => tracing::error!(
                "Connection failed: {}, cancelled {} pending request(s)",
                err,
                cancelled
            ),
        }

        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = ConnectionState::ReadFailed;
                true
            }
        });
    }

    /// Queues a command and returns a handle that resolves to its reply.
    ///
    /// The slot is registered before the command is queued, so a fast reply
    /// always finds it. Cancelling this call either queues the whole command
    /// or nothing.
    pub async fn issue_request(&self, code: &str) -> Result<PendingReply, ClientError> {
        if let Some(err) = self.failure() {
            return Err(ClientError::ConnectionFailed(err));
        }
        match self.state() {
            ConnectionState::Ready => {}
            ConnectionState::Closed => return Err(ClientError::ConnectionClosed),
            _ => return Err(ClientError::NotConnected),
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let Some(pending) = self.pending.register(id) else {
            return Err(self
                .failure()
                .map(ClientError::ConnectionFailed)
                .unwrap_or(ClientError::ConnectionClosed));
        };

        let encoded = Command::new(id, code).encode();
        let len = encoded.len();
        if self.outbound.send(encoded).await.is_err() {
            return Err(self
                .failure()
                .map(ClientError::ConnectionFailed)
                .unwrap_or(ClientError::ConnectionClosed));
        }
        tracing::debug!("Request id={} queued ({} bytes)", id, len);

        Ok(pending)
    }

    /// Sends a command and waits for its reply.
    pub async fn request(&self, code: &str) -> Result<Reply, ClientError> {
        self.issue_request(code).await?.await
    }

    /// Subscribes to unsolicited host messages.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Value> {
        self.events.subscribe()
    }

    /// Subscribes to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Completes once the connection has failed or been closed.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(ConnectionState::is_terminal).await;
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Returns the error that stopped the read loop, if any.
    pub fn failure(&self) -> Option<Arc<ClientError>> {
        self.failure.lock().clone()
    }

    /// Returns the number of pending requests.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Marks the connection closed, stops the read loop and cancels pending
    /// requests without waiting. The writer task shuts the transport down
    /// on its own.
    pub fn terminate(&self) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        });

        let read_task = self.read_task.lock().take();
        if let Some(handle) = read_task {
            handle.abort();
        }
        self.reader.lock().take();

        let cancelled = self.pending.cancel_all();
        tracing::debug!("Connection closed, cancelled {} pending request(s)", cancelled);
    }

    /// Closes the connection, cancels pending requests and waits for the
    /// transport to be shut down.
    pub async fn close(&self) {
        tracing::debug!("Closing connection...");
        self.terminate();

        let write_task = self.write_task.lock().take();
        if let Some(handle) = write_task {
            let _ = handle.await;
        }

        // Never started: nothing else owns the write half.
        let unstarted = self.writer.lock().take();
        if let Some((mut writer, _)) = unstarted {
            let _ = writer.shutdown().await;
        }
    }
}

async fn write_frame(writer: &mut BoxedWriter, frame: &[u8]) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}
