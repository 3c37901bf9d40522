//! Usage telemetry.
//!
//! [`TelemetryClient`] tags tracked events with the installation's
//! diagnostic id, merges default properties and hands them in batches to a
//! [`TelemetrySink`] from a background worker. [`HttpSink`] posts each batch
//! to `<dataplane_url>/v1/batch`, authenticated with the write key.
//!
//! # Example
//!
//! ```no_run
//! use plugin_ws_relay::telemetry::{HttpSink, TelemetryClient, TelemetryConfig};
//! use serde_json::json;
//!
//! # async fn example() -> plugin_ws_relay::Result<()> {
//! let config = TelemetryConfig::new("write-key", "https://dataplane.example.com", "diag-1")
//!     .with_default_prop("plugin_version", json!("0.1.0"));
//!
//! let client = TelemetryClient::new(config, HttpSink::new()?)?;
//! client.track("call_started", None)?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Events buffered before a flush is forced.
const DEFAULT_BATCH_SIZE: usize = 100;

/// Interval between periodic flushes.
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Dataplane path accepting event batches.
const BATCH_PATH: &str = "v1/batch";

/// Upper bound for one batch request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// TelemetryConfig
// ============================================================================

/// Telemetry endpoint and identity.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Dataplane write key, sent as the basic-auth user.
    pub write_key: String,

    /// Dataplane base URL.
    pub dataplane_url: String,

    /// Installation identifier, sent as the user id.
    pub diagnostic_id: String,

    /// Properties added to every event; they override per-event values.
    pub default_props: Map<String, Value>,

    /// Events buffered before a flush is forced.
    pub batch_size: usize,

    /// Interval between periodic flushes.
    pub flush_interval: Duration,
}

impl TelemetryConfig {
    /// Creates a configuration with default batching.
    #[must_use]
    pub fn new(
        write_key: impl Into<String>,
        dataplane_url: impl Into<String>,
        diagnostic_id: impl Into<String>,
    ) -> Self {
        Self {
            write_key: write_key.into(),
            dataplane_url: dataplane_url.into(),
            diagnostic_id: diagnostic_id.into(),
            default_props: Map::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    /// Adds a default property.
    #[inline]
    #[must_use]
    pub fn with_default_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        self.default_props.insert(key.into(), value);
        self
    }

    /// Sets the batch size.
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the flush interval.
    #[inline]
    #[must_use]
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first empty or zero field.
    pub fn validate(&self) -> Result<()> {
        if self.write_key.is_empty() {
            return Err(Error::config("WriteKey should not be empty"));
        }
        if self.dataplane_url.is_empty() {
            return Err(Error::config("DataplaneURL should not be empty"));
        }
        if self.diagnostic_id.is_empty() {
            return Err(Error::config("DiagnosticID should not be empty"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("Batch size must be greater than zero"));
        }
        if self.flush_interval.is_zero() {
            return Err(Error::config("Flush interval must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the batch endpoint below [`TelemetryConfig::dataplane_url`].
    #[must_use]
    pub fn batch_url(&self) -> String {
        format!("{}/{BATCH_PATH}", self.dataplane_url.trim_end_matches('/'))
    }
}

// ============================================================================
// Track
// ============================================================================

/// One tracked event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    /// Unique message id for deduplication.
    pub message_id: Uuid,

    /// Event name.
    pub event: String,

    /// Installation identifier.
    pub user_id: String,

    /// Event properties, defaults merged in.
    pub properties: Map<String, Value>,
}

// ============================================================================
// TelemetrySink
// ============================================================================

/// Destination for tracked events.
#[async_trait]
pub trait TelemetrySink: Send + Sync + 'static {
    /// Delivers one batch.
    ///
    /// # Errors
    ///
    /// A failed batch is logged and dropped by the worker.
    async fn deliver(&self, config: &TelemetryConfig, batch: Vec<Track>) -> Result<()>;
}

/// Sink that writes batches to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn deliver(&self, config: &TelemetryConfig, batch: Vec<Track>) -> Result<()> {
        for track in &batch {
            let properties = Value::Object(track.properties.clone());
            info!(
                dataplane = %config.dataplane_url,
                event = %track.event,
                message_id = %track.message_id,
                %properties,
                "Telemetry event"
            );
        }
        Ok(())
    }
}

/// Batch request body.
#[derive(Serialize)]
struct BatchRequest<'a> {
    batch: Vec<BatchMessage<'a>>,
}

/// One entry of a batch request.
#[derive(Serialize)]
struct BatchMessage<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    track: &'a Track,
}

/// Sink that posts batches to the dataplane over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSink {
    http: reqwest::Client,
}

impl HttpSink {
    /// Creates a sink with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Telemetry`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::telemetry(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl TelemetrySink for HttpSink {
    async fn deliver(&self, config: &TelemetryConfig, batch: Vec<Track>) -> Result<()> {
        let body = BatchRequest {
            batch: batch
                .iter()
                .map(|track| BatchMessage {
                    kind: "track",
                    track,
                })
                .collect(),
        };

        let response = self
            .http
            .post(config.batch_url())
            .basic_auth(&config.write_key, None::<&str>)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::telemetry(format!("batch request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        warn!(status = status.as_u16(), body = %body, "Dataplane rejected batch");
        Err(Error::telemetry(format!("dataplane returned {}", status.as_u16())))
    }
}

// ============================================================================
// TelemetryClient
// ============================================================================

/// Internal commands for the worker.
enum WorkerCommand {
    /// Buffer an event.
    Enqueue(Track),
    /// Flush and stop.
    Close(oneshot::Sender<()>),
}

/// Batching telemetry client.
pub struct TelemetryClient {
    /// Validated configuration.
    config: Arc<TelemetryConfig>,
    /// Channel to the worker; `None` after close.
    command_tx: Mutex<Option<mpsc::UnboundedSender<WorkerCommand>>>,
    /// Worker task handle.
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TelemetryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryClient")
            .field("diagnostic_id", &self.config.diagnostic_id)
            .field("closed", &self.command_tx.lock().is_none())
            .finish_non_exhaustive()
    }
}

impl TelemetryClient {
    /// Validates the configuration and starts the worker.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Telemetry`] if the configuration is invalid.
    pub fn new(config: TelemetryConfig, sink: impl TelemetrySink) -> Result<Self> {
        config
            .validate()
            .map_err(|e| Error::telemetry(format!("config validation failed: {e}")))?;

        let config = Arc::new(config);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(Arc::clone(&config), sink, command_rx));

        debug!(diagnostic_id = %config.diagnostic_id, "Telemetry client started");

        Ok(Self {
            config,
            command_tx: Mutex::new(Some(command_tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues an event.
    ///
    /// Default properties overwrite same-named entries in `props`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Telemetry`] if the client is closed.
    pub fn track(&self, event: impl Into<String>, props: Option<Map<String, Value>>) -> Result<()> {
        let mut properties = props.unwrap_or_default();
        for (key, value) in &self.config.default_props {
            properties.insert(key.clone(), value.clone());
        }

        let track = Track {
            message_id: Uuid::new_v4(),
            event: event.into(),
            user_id: self.config.diagnostic_id.clone(),
            properties,
        };

        let guard = self.command_tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::telemetry("failed to track event: client closed"))?;

        tx.send(WorkerCommand::Enqueue(track))
            .map_err(|_| Error::telemetry("failed to track event: worker stopped"))
    }

    /// Flushes pending events and stops the worker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Telemetry`] if the client was already closed.
    pub async fn close(&self) -> Result<()> {
        let tx = self
            .command_tx
            .lock()
            .take()
            .ok_or_else(|| Error::telemetry("failed to close client: already closed"))?;

        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(WorkerCommand::Close(done_tx)).is_ok() {
            let _ = done_rx.await;
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker
                .await
                .map_err(|e| Error::telemetry(format!("failed to close client: {e}")))?;
        }

        debug!("Telemetry client closed");
        Ok(())
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Buffers events and flushes them by size, by interval and on close.
async fn run_worker(
    config: Arc<TelemetryConfig>,
    sink: impl TelemetrySink,
    mut command_rx: mpsc::UnboundedReceiver<WorkerCommand>,
) {
    let mut buffer: Vec<Track> = Vec::with_capacity(config.batch_size);
    let mut ticker = interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                match command {
                    Some(WorkerCommand::Enqueue(track)) => {
                        buffer.push(track);
                        if buffer.len() >= config.batch_size {
                            flush(&config, &sink, &mut buffer).await;
                        }
                    }

                    Some(WorkerCommand::Close(done_tx)) => {
                        flush(&config, &sink, &mut buffer).await;
                        let _ = done_tx.send(());
                        break;
                    }

                    None => {
                        flush(&config, &sink, &mut buffer).await;
                        break;
                    }
                }
            }

            _ = ticker.tick() => {
                flush(&config, &sink, &mut buffer).await;
            }
        }
    }

    debug!("Telemetry worker terminated");
}

/// Sends the buffered events, if any.
async fn flush(config: &TelemetryConfig, sink: &impl TelemetrySink, buffer: &mut Vec<Track>) {
    if buffer.is_empty() {
        return;
    }

    let batch = std::mem::take(buffer);
    let count = batch.len();

    if let Err(e) = sink.deliver(config, batch).await {
        warn!(error = %e, count, "Failed to deliver telemetry batch");
    } else {
        debug!(count, "Telemetry batch delivered");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[derive(Default, Clone)]
    struct RecordingSink {
        batches: Arc<Mutex<Vec<Vec<Track>>>>,
    }

    #[async_trait]
    impl TelemetrySink for RecordingSink {
        async fn deliver(&self, _config: &TelemetryConfig, batch: Vec<Track>) -> Result<()> {
            self.batches.lock().push(batch);
            Ok(())
        }
    }

    fn config() -> TelemetryConfig {
        TelemetryConfig::new("key", "https://dataplane.example.com", "diag-1")
    }

    fn track(event: &str) -> Track {
        let mut properties = Map::new();
        properties.insert("participants".to_string(), json!(2));
        Track {
            message_id: Uuid::new_v4(),
            event: event.to_string(),
            user_id: "diag-1".to_string(),
            properties,
        }
    }

    /// Reads one HTTP request, answers with `status` and returns head and body.
    async fn serve_once(status: &'static str) -> (String, JoinHandle<(String, Value)>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let url = format!("http://127.0.0.1:{port}/");

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");

            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let head_end = loop {
                let n = stream.read(&mut chunk).await.expect("read");
                assert!(n > 0, "connection closed before headers");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos;
                }
            };

            let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);

            let body_start = head_end + 4;
            while buf.len() < body_start + length {
                let n = stream.read(&mut chunk).await.expect("read");
                assert!(n > 0, "connection closed before body");
                buf.extend_from_slice(&chunk[..n]);
            }

            let response =
                format!("HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).await.expect("respond");

            let body: Value = serde_json::from_slice(&buf[body_start..body_start + length])
                .expect("json body");
            (head, body)
        });

        (url, server)
    }

    #[test]
    fn test_validate() {
        assert!(config().validate().is_ok());

        let err = TelemetryConfig::new("", "u", "d").validate().unwrap_err();
        assert!(err.to_string().contains("WriteKey"));

        let err = TelemetryConfig::new("k", "", "d").validate().unwrap_err();
        assert!(err.to_string().contains("DataplaneURL"));

        let err = TelemetryConfig::new("k", "u", "").validate().unwrap_err();
        assert!(err.to_string().contains("DiagnosticID"));

        assert!(config().with_batch_size(0).validate().is_err());
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let err = TelemetryClient::new(TelemetryConfig::new("", "u", "d"), LogSink).unwrap_err();
        assert!(matches!(err, Error::Telemetry { .. }));
    }

    #[tokio::test]
    async fn test_track_merges_defaults_and_flushes_on_close() {
        let sink = RecordingSink::default();
        let config = config()
            .with_default_prop("plugin_version", json!("1.2.3"))
            .with_default_prop("source", json!("default"));
        let client = TelemetryClient::new(config, sink.clone()).expect("client");

        let mut props = Map::new();
        props.insert("source".to_string(), json!("caller"));
        props.insert("participants".to_string(), json!(3));

        client.track("call_started", Some(props)).expect("track");
        client.track("call_ended", None).expect("track");
        client.close().await.expect("close");

        let batches = sink.batches.lock();
        let events: Vec<&Track> = batches.iter().flatten().collect();
        assert_eq!(events.len(), 2);

        let started = events[0];
        assert_eq!(started.event, "call_started");
        assert_eq!(started.user_id, "diag-1");
        assert_eq!(started.properties["source"], json!("default"));
        assert_eq!(started.properties["participants"], json!(3));
        assert_eq!(started.properties["plugin_version"], json!("1.2.3"));

        assert_eq!(events[1].properties.len(), 2);
        assert_ne!(events[0].message_id, events[1].message_id);
    }

    #[tokio::test]
    async fn test_batch_size_triggers_flush() {
        let sink = RecordingSink::default();
        let client =
            TelemetryClient::new(config().with_batch_size(2), sink.clone()).expect("client");

        for n in 0..5 {
            client.track(format!("event_{n}"), None).expect("track");
        }
        client.close().await.expect("close");

        let sizes: Vec<usize> = sink.batches.lock().iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flush() {
        let sink = RecordingSink::default();
        let client = TelemetryClient::new(
            config().with_flush_interval(Duration::from_secs(1)),
            sink.clone(),
        )
        .expect("client");

        client.track("tick", None).expect("track");
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(sink.batches.lock().len(), 1);
        client.close().await.expect("close");
    }

    #[tokio::test]
    async fn test_track_after_close_fails() {
        let client = TelemetryClient::new(config(), LogSink).expect("client");
        client.close().await.expect("close");

        assert!(client.track("late", None).is_err());
        assert!(client.close().await.is_err());
    }

    #[test]
    fn test_batch_url() {
        assert_eq!(config().batch_url(), "https://dataplane.example.com/v1/batch");

        let trailing = TelemetryConfig::new("k", "https://dp.example.com/rudder/", "d");
        assert_eq!(trailing.batch_url(), "https://dp.example.com/rudder/v1/batch");
    }

    #[tokio::test]
    async fn test_log_sink_accepts_batch() {
        let result = LogSink.deliver(&config(), vec![track("call_started")]).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_http_sink_posts_batch_with_write_key() {
        let (url, server) = serve_once("200 OK").await;
        let config = TelemetryConfig::new("key", url, "diag-1");
        let sink = HttpSink::new().expect("http client");

        sink.deliver(&config, vec![track("call_started"), track("call_ended")])
            .await
            .expect("deliver");

        let (head, body) = server.await.expect("server task");
        assert!(head.starts_with("POST /v1/batch HTTP/1.1"), "{head}");
        assert!(
            head.to_ascii_lowercase()
                .contains("authorization: basic a2v5og=="),
            "{head}"
        );

        let batch = body["batch"].as_array().expect("batch array");
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0]["type"], "track");
        assert_eq!(batch[0]["event"], "call_started");
        assert_eq!(batch[0]["userId"], "diag-1");
        assert_eq!(batch[0]["properties"]["participants"], 2);
        assert!(batch[1]["messageId"].is_string());
    }

    #[tokio::test]
    async fn test_http_sink_reports_rejected_batch() {
        let (url, server) = serve_once("401 Unauthorized").await;
        let config = TelemetryConfig::new("bad-key", url, "diag-1");
        let sink = HttpSink::new().expect("http client");

        let err = sink
            .deliver(&config, vec![track("call_started")])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Telemetry { .. }));
        assert!(err.to_string().contains("401"));
        server.await.expect("server task");
    }

    #[tokio::test]
    async fn test_client_flushes_to_dataplane_on_close() {
        let (url, server) = serve_once("200 OK").await;
        let config = TelemetryConfig::new("key", url, "diag-1")
            .with_default_prop("plugin_version", json!("0.1.0"));
        let client = TelemetryClient::new(config, HttpSink::new().expect("http client"))
            .expect("client");

        client.track("call_started", None).expect("track");
        client.close().await.expect("close");

        let (_, body) = server.await.expect("server task");
        assert_eq!(body["batch"][0]["event"], "call_started");
        assert_eq!(body["batch"][0]["properties"]["plugin_version"], "0.1.0");
    }

    #[test]
    fn test_track_serializes_camel_case() {
        let track = Track {
            message_id: Uuid::nil(),
            event: "e".to_string(),
            user_id: "u".to_string(),
            properties: Map::new(),
        };
        let value = serde_json::to_value(&track).expect("serialize");
        assert!(value.get("messageId").is_some());
        assert!(value.get("userId").is_some());
    }
}
