use crate::stream::{IngestSource, event::IngestEvent};
use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::{debug, error, info, warn};

/// WebSocket feed configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Feed URL
    pub url: String,
    /// Ping interval to keep the connection alive
    pub ping_interval: Duration,
    /// Delay before reconnecting after a disconnect
    pub reconnect_delay: Duration,
    /// Events buffered between the socket task and the consumer
    pub channel_buffer_size: usize,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9001".to_string(),
            ping_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            channel_buffer_size: 1000,
        }
    }
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// [`IngestSource`] reading JSON [`IngestEvent`] text frames from a WebSocket feed, reconnecting
/// forever until dropped.
#[derive(Debug)]
pub struct WebSocketSource {
    rx: mpsc::Receiver<IngestEvent>,
    task: JoinHandle<()>,
}

impl WebSocketSource {
    /// Spawn the connection task. Must be called from within a tokio runtime.
    pub fn connect(config: WebSocketConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer_size.max(1));
        let task = tokio::spawn(run_websocket_loop(config, tx));
        Self { rx, task }
    }
}

impl Drop for WebSocketSource {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl IngestSource for WebSocketSource {
    async fn next_event(&mut self) -> Option<IngestEvent> {
        self.rx.recv().await
    }
}

/// Parse one text frame. Control frames such as `{"type":"welcome"}` yield `None`.
fn parse_frame(text: &str) -> Option<IngestEvent> {
    match serde_json::from_str::<IngestEvent>(text) {
        Ok(event) => Some(event),
        Err(e) => {
            let frame_type = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|value| value.get("type")?.as_str().map(str::to_owned));

            match frame_type.as_deref() {
                Some("welcome") | Some("heartbeat") => debug!("Received control frame"),
                _ => {
                    error!("Failed to parse message: {}", e);
                    debug!("Raw message: {}", text);
                }
            }
            None
        }
    }
}

/// Why a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Socket closed or errored, reconnect.
    Disconnected,
    /// Nobody is listening for events any more.
    ConsumerGone,
}

/// Connect, pump frames into `event_tx`, and reconnect after `reconnect_delay` until the consumer
/// goes away.
async fn run_websocket_loop(config: WebSocketConfig, event_tx: mpsc::Sender<IngestEvent>) {
    info!(url = %config.url, "Starting WebSocket feed");

    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match connect_async(&config.url).await {
            Ok((ws_stream, _)) => {
                info!(url = %config.url, attempt, "Connected to WebSocket feed");
                attempt = 0;

                if read_session(ws_stream, config.ping_interval, &event_tx).await
                    == SessionEnd::ConsumerGone
                {
                    warn!("Event receiver dropped, stopping feed");
                    return;
                }
                warn!(url = %config.url, "Feed disconnected");
            }
            Err(e) => {
                error!(url = %config.url, attempt, "Failed to connect: {}", e);
            }
        }

        if event_tx.is_closed() {
            return;
        }
        debug!(delay = ?config.reconnect_delay, "Reconnecting");
        tokio::time::sleep(config.reconnect_delay).await;
    }
}

async fn read_session<S>(
    mut ws: S,
    ping_interval: Duration,
    event_tx: &mpsc::Sender<IngestEvent>,
) -> SessionEnd
where
    S: Stream<Item = Result<Message, WsError>> + Sink<Message> + Unpin,
{
    let mut keep_alive = tokio::time::interval(ping_interval.max(Duration::from_millis(1)));
    // First tick completes immediately
    keep_alive.tick().await;

    loop {
        tokio::select! {
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_frame(&text) {
                        if event_tx.send(event).await.is_err() {
                            return SessionEnd::ConsumerGone;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Feed closed connection");
                    return SessionEnd::Disconnected;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    return SessionEnd::Disconnected;
                }
                None => return SessionEnd::Disconnected,
            },
            _ = keep_alive.tick() => {
                if ws.send(Message::Ping(Vec::new().into())).await.is_err() {
                    debug!("Ping failed, dropping connection");
                    return SessionEnd::Disconnected;
                }
            }
            _ = event_tx.closed() => return SessionEnd::ConsumerGone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new_keeps_defaults() {
        let config = WebSocketConfig::new("ws://localhost:8080");
        let defaults = WebSocketConfig::default();

        assert_eq!(config.url, "ws://localhost:8080");
        assert_eq!(config.ping_interval, defaults.ping_interval);
        assert_eq!(config.reconnect_delay, defaults.reconnect_delay);
        assert_eq!(config.channel_buffer_size, defaults.channel_buffer_size);
    }

    #[test]
    fn test_parse_frame() {
        struct TestCase {
            input: &'static str,
            expected: Option<&'static str>,
        }

        let tests = vec![
            TestCase {
                // TC0: snapshot event
                input: r#"{"type":"snapshot","pair_address":"0xAB","price_usd":1.0,"volume_24h_usd":2.0,"liquidity_usd":3.0,"timestamp":"2024-01-01T00:00:00Z"}"#,
                expected: Some("0xab"),
            },
            TestCase {
                // TC1: welcome frame is skipped
                input: r#"{"type":"welcome","version":1}"#,
                expected: None,
            },
            TestCase {
                // TC2: garbage is skipped
                input: "not json",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = parse_frame(test.input);
            assert_eq!(
                actual.as_ref().map(|event| event.pair_address().as_str()),
                test.expected,
                "TC{} failed",
                index
            );
        }
    }

    #[tokio::test]
    async fn test_unreachable_feed_yields_nothing() {
        let config = WebSocketConfig {
            reconnect_delay: Duration::from_millis(10),
            ..WebSocketConfig::new("ws://127.0.0.1:1")
        };
        let mut source = WebSocketSource::connect(config);

        let next = tokio::time::timeout(Duration::from_millis(50), source.next_event()).await;
        assert!(next.is_err());
    }
}
