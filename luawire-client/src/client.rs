//! High-level client API.

use crate::connection::{Connection, ConnectionConfig, ConnectionState, EVENT_CHANNEL_CAPACITY};
use crate::error::ClientError;
use crate::pending::PendingReply;
use crate::ready::ReadySignal;
use luawire_protocol::{Reply, SubtitleTrack};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, Mutex};

/// Command whose answer proves the host is evaluating Lua.
pub const SELF_TEST_COMMAND: &str = "return 2+2";

/// High-level client for a Lua host.
///
/// Holds at most one live [`Connection`]. Once that connection fails the
/// client stays unusable until `connect` is called again.
pub struct Client {
    config: ConnectionConfig,
    conn: parking_lot::Mutex<Option<Arc<Connection>>>,
    /// Serializes `connect` calls.
    connect_lock: Mutex<()>,
    /// Shared by every connection this client opens.
    events: broadcast::Sender<Value>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            conn: parking_lot::Mutex::new(None),
            connect_lock: Mutex::new(()),
            events,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects to the host.
    ///
    /// A refused connection waits on `ready` and then tries exactly once
    /// more. After connecting, the read loop is started and the self-test
    /// is run; on failure the connection is torn down before returning.
    pub async fn connect<R: ReadySignal + Sync>(&self, ready: &R) -> Result<(), ClientError> {
        let _guard = self.connect_lock.lock().await;
        self.ensure_not_live()?;

        let conn = match Connection::open(self.config.clone()).await {
            Ok(conn) => conn,
            Err(ClientError::Refused { addr, .. }) => {
                tracing::info!("Host at {} not available, waiting for ready signal", addr);
                ready.wait_ready().await?;
                tracing::info!("Ready signal received, retrying {}", addr);
                Connection::open(self.config.clone()).await?
            }
            Err(e) => return Err(e),
        };

        self.attach(conn).await
    }

    /// Uses an already-open transport instead of dialing the configured
    /// address.
    pub async fn connect_stream<S>(&self, stream: S) -> Result<(), ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let _guard = self.connect_lock.lock().await;
        self.ensure_not_live()?;
        self.attach(Connection::from_stream(stream, self.config.clone()))
            .await
    }

    fn ensure_not_live(&self) -> Result<(), ClientError> {
        match self.connection() {
            Some(conn) if !conn.state().is_terminal() => Err(ClientError::AlreadyConnected),
            _ => Ok(()),
        }
    }

    async fn attach(&self, conn: Connection) -> Result<(), ClientError> {
        let conn = Arc::new(conn.with_event_sink(self.events.clone()));
        conn.start()?;

        // Tears the connection down if this future is dropped before the
        // connection is handed over.
        let guard = TerminateOnDrop::new(&conn);
        if self.config.self_test {
            if let Err(e) = Self::self_test(&conn).await {
                tracing::warn!("Self-test failed on {}: {}", self.config.addr(), e);
                guard.disarm();
                conn.close().await;
                return Err(e);
            }
        }
        guard.disarm();

        tracing::info!("Connected to {}", self.config.addr());
        *self.conn.lock() = Some(conn);
        Ok(())
    }

    async fn self_test(conn: &Connection) -> Result<(), ClientError> {
        let reply = check_reply(SELF_TEST_COMMAND, conn.request(SELF_TEST_COMMAND).await?)?;
        if reply.result().as_f64() == Some(4.0) {
            Ok(())
        } else {
            Err(ClientError::SelfTestFailed(format!(
                "`{}` returned {}",
                SELF_TEST_COMMAND,
                reply.result()
            )))
        }
    }

    /// Returns the current connection, if any.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.conn.lock().clone()
    }

    fn live_connection(&self) -> Result<Arc<Connection>, ClientError> {
        self.connection().ok_or(ClientError::NotConnected)
    }

    pub fn state(&self) -> ConnectionState {
        self.connection()
            .map(|conn| conn.state())
            .unwrap_or(ConnectionState::NotConnected)
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Completes once the current connection fails or is closed. Returns
    /// immediately when there is no connection.
    pub async fn closed(&self) {
        if let Some(conn) = self.connection() {
            conn.closed().await;
        }
    }

    /// Subscribes to unsolicited host messages, across reconnects.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Value> {
        self.events.subscribe()
    }

    /// Closes the connection.
    pub async fn close(&self) {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close().await;
        }
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Sends a command and returns a handle to its eventual reply.
    pub async fn issue_request(&self, code: &str) -> Result<PendingReply, ClientError> {
        self.live_connection()?.issue_request(code).await
    }

    /// Runs a command and returns its reply, failing if the host reports a
    /// timeout or an error.
    pub async fn execute(&self, code: &str) -> Result<Reply, ClientError> {
        let reply = self.issue_request(code).await?.await?;
        check_reply(code, reply)
    }

    /// Runs the `return 2+2` round trip on the live connection.
    pub async fn test_connection(&self) -> Result<(), ClientError> {
        let conn = self.live_connection()?;
        Self::self_test(&conn).await
    }

    // =========================================================================
    // Subtitle operations
    // =========================================================================

    /// Lists subtitle tracks of the current input.
    pub async fn subtitle_tracks(&self) -> Result<Vec<SubtitleTrack>, ClientError> {
        let reply = self.execute(SubtitleTrack::LIST_COMMAND).await?;
        Ok(SubtitleTrack::from_result(reply.result())?)
    }

    /// Makes `track` the active subtitle track.
    pub async fn select_subtitle(&self, track: &SubtitleTrack) -> Result<(), ClientError> {
        tracing::info!(
            "Selecting subtitle track {} ({}, {})",
            track.index,
            track.description,
            track.language
        );
        self.execute(&track.select_command()).await?;
        Ok(())
    }
}

struct TerminateOnDrop<'a> {
    conn: &'a Connection,
    armed: bool,
}

impl<'a> TerminateOnDrop<'a> {
    fn new(conn: &'a Connection) -> Self {
        Self { conn, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TerminateOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("Connect abandoned, closing half-open connection");
            self.conn.terminate();
        }
    }
}

/// Turns a host-reported timeout or error into the matching client error.
/// A timeout wins over any result the reply also carries.
fn check_reply(command: &str, reply: Reply) -> Result<Reply, ClientError> {
    if reply.is_timeout() {
        return Err(ClientError::RemoteTimeout {
            command: command.to_string(),
        });
    }
    if let Some(message) = reply.error_message() {
        return Err(ClientError::RemoteError {
            command: command.to_string(),
            message,
        });
    }
    Ok(reply)
}
