//! WebSocket client transport and event loop.
//!
//! # Event Loop
//!
//! [`WebSocketConnector::connect`] spawns a tokio task that:
//!
//! - Connects to the server and reports `Open`
//! - Forwards text frames as `Message` (binary, ping and pong are ignored)
//! - Writes frames queued through [`WebSocketTransport::send`]
//! - Performs the close handshake on [`WebSocketTransport::close`]
//! - Reports `Close(code)`, or `Error` then `Close(1006)` on failure
//!
//! Must be used from within a tokio runtime.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::Payload;

use super::{
    CLOSE_ABNORMAL, CLOSE_NO_STATUS, Connector, EventSink, ReadyState, Transport, TransportEvent,
};

// ============================================================================
// TransportCommand
// ============================================================================

/// Internal commands for the event loop.
enum TransportCommand {
    /// Write a frame.
    Send(Payload),
    /// Start the close handshake.
    Close,
}

impl fmt::Debug for TransportCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send(payload) => f.debug_tuple("Send").field(&payload.len()).finish(),
            Self::Close => f.write_str("Close"),
        }
    }
}

/// Why the event loop stopped.
enum Exit {
    /// Close handshake finished.
    Closed(Option<u16>),
    /// Socket failed.
    Failed(Error),
    /// Nobody listens for events anymore.
    Abandoned,
}

// ============================================================================
// SharedState
// ============================================================================

/// Ready state shared between the handle and the event loop.
#[derive(Debug)]
struct SharedState(AtomicU8);

impl SharedState {
    fn new(state: ReadyState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> ReadyState {
        ReadyState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ReadyState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves `from` to `to`; returns `false` if the state was not `from`.
    fn advance(&self, from: ReadyState, to: ReadyState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

// ============================================================================
// WebSocketConnector
// ============================================================================

/// Opens [`WebSocketTransport`]s with tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Creates a connector.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, url: &Url, events: EventSink) -> Arc<dyn Transport> {
        Arc::new(WebSocketTransport::spawn(url.clone(), events))
    }
}

// ============================================================================
// WebSocketTransport
// ============================================================================

/// Handle to a WebSocket connection driven by a background task.
///
/// Dropping the handle closes the socket.
#[derive(Debug)]
pub struct WebSocketTransport {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<TransportCommand>,
    /// Ready state (shared with event loop).
    state: Arc<SharedState>,
}

impl WebSocketTransport {
    /// Starts connecting to `url` on a new task.
    pub fn spawn(url: Url, events: EventSink) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let state = Arc::new(SharedState::new(ReadyState::Connecting));

        tokio::spawn(run_event_loop(url, command_rx, Arc::clone(&state), events));

        Self { command_tx, state }
    }
}

impl Transport for WebSocketTransport {
    fn ready_state(&self) -> ReadyState {
        self.state.get()
    }

    fn send(&self, payload: Payload) -> Result<()> {
        self.command_tx
            .send(TransportCommand::Send(payload))
            .map_err(|_| Error::ConnectionClosed)
    }

    fn close(&self) {
        if self.state.advance(ReadyState::Open, ReadyState::Closing)
            || self
                .state
                .advance(ReadyState::Connecting, ReadyState::Closing)
        {
            let _ = self.command_tx.send(TransportCommand::Close);
        }
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Connects and pumps frames until the socket closes.
async fn run_event_loop(
    url: Url,
    mut command_rx: mpsc::UnboundedReceiver<TransportCommand>,
    state: Arc<SharedState>,
    events: EventSink,
) {
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            warn!(%url, error = %e, "WebSocket connect failed");
            state.set(ReadyState::Closed);
            let _ = events.send(TransportEvent::Error(Error::WebSocket(e)));
            let _ = events.send(TransportEvent::Close(Some(CLOSE_ABNORMAL)));
            return;
        }
    };

    debug!(%url, "WebSocket connected");

    // close() during the handshake leaves the state at Closing
    let _ = state.advance(ReadyState::Connecting, ReadyState::Open);
    let _ = events.send(TransportEvent::Open);

    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut commands_open = true;

    let exit = loop {
        tokio::select! {
            // Incoming frames from server
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        trace!(len = text.len(), "Text frame received");
                        if events.send(TransportEvent::Message(text.as_str().to_owned())).is_err() {
                            let _ = ws_write.close().await;
                            break Exit::Abandoned;
                        }
                    }

                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map_or(CLOSE_NO_STATUS, |f| u16::from(f.code));
                        debug!(code, "WebSocket closed by remote");
                        // Flush the queued close reply
                        let _ = ws_write.flush().await;
                        break Exit::Closed(Some(code));
                    }

                    Some(Ok(Message::Binary(bytes))) => {
                        trace!(len = bytes.len(), "Ignoring binary frame");
                    }

                    Some(Err(e)) => break Exit::Failed(Error::WebSocket(e)),

                    None => break Exit::Failed(Error::connection("stream ended without close frame")),

                    // Ignore Ping, Pong, raw frames
                    Some(Ok(_)) => {}
                }
            }

            // Commands from the handle
            command = command_rx.recv(), if commands_open => {
                match command {
                    Some(TransportCommand::Send(payload)) => {
                        let message = match payload {
                            Payload::Text(text) => Message::Text(text.into()),
                            Payload::Binary(bytes) => Message::Binary(bytes.into()),
                        };
                        if let Err(e) = ws_write.send(message).await {
                            break Exit::Failed(Error::WebSocket(e));
                        }
                    }

                    Some(TransportCommand::Close) => {
                        debug!("Close requested");
                        state.set(ReadyState::Closing);
                        if let Err(e) = ws_write.close().await {
                            break Exit::Failed(Error::WebSocket(e));
                        }
                    }

                    None => {
                        // Handle dropped; finish the close handshake on our own
                        commands_open = false;
                        if state.get() != ReadyState::Closing {
                            debug!("Transport handle dropped, closing");
                            state.set(ReadyState::Closing);
                            let _ = ws_write.close().await;
                        }
                    }
                }
            }
        }
    };

    state.set(ReadyState::Closed);

    match exit {
        Exit::Closed(code) => {
            let _ = events.send(TransportEvent::Close(code));
        }
        Exit::Failed(err) => {
            warn!(error = %err, "WebSocket failed");
            let _ = events.send(TransportEvent::Error(err));
            let _ = events.send(TransportEvent::Close(Some(CLOSE_ABNORMAL)));
        }
        Exit::Abandoned => {
            debug!("Event receiver dropped");
        }
    }

    debug!("Event loop terminated");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::accept_async;

    use crate::transport::{EventStream, event_channel};

    const WAIT: Duration = Duration::from_secs(5);

    async fn next_event(rx: &mut EventStream) -> TransportEvent {
        timeout(WAIT, rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
    }

    async fn bind() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let url = Url::parse(&format!("ws://127.0.0.1:{port}")).expect("url");
        (listener, url)
    }

    #[tokio::test]
    async fn test_forwards_text_frames() {
        let (listener, url) = bind().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("upgrade");
            ws.send(Message::Binary(vec![1, 2, 3].into()))
                .await
                .expect("send binary");
            ws.send(Message::Text(
                r#"{"event":"hello","data":{"connection_id":"abc"}}"#.into(),
            ))
            .await
            .expect("send text");
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (tx, mut rx) = event_channel();
        let transport = WebSocketConnector::new().connect(&url, tx);

        assert!(matches!(next_event(&mut rx).await, TransportEvent::Open));
        assert_eq!(transport.ready_state(), ReadyState::Open);

        match next_event(&mut rx).await {
            TransportEvent::Message(text) => assert!(text.contains("connection_id")),
            other => panic!("unexpected event: {other:?}"),
        }

        transport.close();
        assert!(matches!(
            next_event(&mut rx).await,
            TransportEvent::Close(Some(_))
        ));
        assert_eq!(transport.ready_state(), ReadyState::Closed);

        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_sends_text_and_binary() {
        let (listener, url) = bind().await;
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("upgrade");
            while let Some(Ok(message)) = ws.next().await {
                let _ = seen_tx.send(message);
            }
        });

        let (tx, mut rx) = event_channel();
        let transport = WebSocketConnector::new().connect(&url, tx);
        assert!(matches!(next_event(&mut rx).await, TransportEvent::Open));

        transport
            .send(Payload::Text("ping".to_string()))
            .expect("send text");
        transport
            .send(Payload::Binary(vec![9, 8]))
            .expect("send binary");

        let first = timeout(WAIT, seen_rx.recv()).await.expect("in time");
        assert!(matches!(first, Some(Message::Text(t)) if t.as_str() == "ping"));

        let second = timeout(WAIT, seen_rx.recv()).await.expect("in time");
        assert!(matches!(second, Some(Message::Binary(b)) if b[..] == [9u8, 8]));

        transport.close();
        assert!(matches!(next_event(&mut rx).await, TransportEvent::Close(_)));
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_remote_close_reports_code() {
        use tokio_tungstenite::tungstenite::protocol::CloseFrame;
        use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

        let (listener, url) = bind().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("upgrade");
            ws.close(Some(CloseFrame {
                code: CloseCode::Away,
                reason: "bye".into(),
            }))
            .await
            .expect("close");
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (tx, mut rx) = event_channel();
        let _transport = WebSocketConnector::new().connect(&url, tx);

        assert!(matches!(next_event(&mut rx).await, TransportEvent::Open));
        assert!(matches!(
            next_event(&mut rx).await,
            TransportEvent::Close(Some(1001))
        ));

        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_then_close() {
        let (listener, url) = bind().await;
        drop(listener);

        let (tx, mut rx) = event_channel();
        let transport = WebSocketConnector::new().connect(&url, tx);

        assert!(matches!(next_event(&mut rx).await, TransportEvent::Error(_)));
        assert!(matches!(
            next_event(&mut rx).await,
            TransportEvent::Close(Some(CLOSE_ABNORMAL))
        ));
        assert_eq!(transport.ready_state(), ReadyState::Closed);
    }
}
