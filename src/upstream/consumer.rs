// =============================================================================
// Upstream consumer — single read-only session, reconnect with jitter
// =============================================================================
//
// Grounded on the teacher's `trade_stream::run_trade_stream` (connect, split,
// drain with `while let Some(msg) = read.next().await`) and its call-site
// reconnect loop in `main.rs` (`loop { if let Err(e) = run(...) {...} sleep
// }`), generalized to decorrelated-jitter backoff and a single upstream
// session instead of one task per trading symbol.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;
use tokio::sync::{Mutex, Notify};
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::errors::ConsumerError;
use crate::inbound::RawFrame;
use crate::metrics::Metrics;
use crate::types::{ConnectionEvent, ConnectionEventType};

const BACKOFF_MIN: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(5);
const FRONTEND_VERSION_PARAM: &str = "frontend-version";
const FRONTEND_VERSION_VALUE: &str = "1.0";

/// Shared liveness flag consumed by `/api/readiness`.
#[derive(Default)]
pub struct Liveness(AtomicBool);

impl Liveness {
    pub fn set(&self, connected: bool) {
        self.0.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Bounded raw-frame queue with drop-oldest overflow, matching the
/// availability-over-completeness policy for upstream backpressure.
pub struct RawFrameQueue {
    inner: Mutex<VecDeque<RawFrame>>,
    capacity: usize,
    notify: Notify,
}

impl RawFrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    async fn push(&self, frame: RawFrame, metrics: &Metrics) {
        let mut guard = self.inner.lock().await;
        if guard.len() >= self.capacity {
            guard.pop_front();
            metrics.upstream_dropped.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(frame);
        drop(guard);
        self.notify.notify_one();
    }

    /// Await and drain the next frame. Used by the router task.
    pub async fn recv(&self) -> RawFrame {
        loop {
            {
                let mut guard = self.inner.lock().await;
                if let Some(frame) = guard.pop_front() {
                    return frame;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Appends `frontend-version=1.0` if the configured URL doesn't already
/// carry it. Avoids pulling in a full URL-parsing crate for one query param.
fn with_frontend_version(url: &str) -> String {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };

    let has_param = query
        .map(|q| q.split('&').any(|pair| pair.split_once('=').map(|(k, _)| k) == Some(FRONTEND_VERSION_PARAM)))
        .unwrap_or(false);

    if has_param {
        return url.to_string();
    }

    match query {
        Some(q) if !q.is_empty() => format!("{base}?{q}&{FRONTEND_VERSION_PARAM}={FRONTEND_VERSION_VALUE}"),
        _ => format!("{base}?{FRONTEND_VERSION_PARAM}={FRONTEND_VERSION_VALUE}"),
    }
}

fn next_backoff(rng: &mut impl Rng, previous: Duration) -> Duration {
    // Decorrelated jitter: next = random(base, previous * 3), clamped to cap.
    let base_ms = BACKOFF_MIN.as_millis() as u64;
    let upper = (previous.as_millis() as u64 * 3).max(base_ms);
    let next_ms = rng.gen_range(base_ms..=upper);
    Duration::from_millis(next_ms).min(BACKOFF_MAX)
}

/// Run the reconnect-forever consumer loop. Never returns unless
/// `max_reconnects` is reached or `shutdown` fires.
pub async fn run_consumer(
    url: String,
    max_reconnects: Option<u32>,
    queue: Arc<RawFrameQueue>,
    metrics: Arc<Metrics>,
    liveness: Arc<Liveness>,
    connection_events: tokio::sync::mpsc::Sender<ConnectionEvent>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut attempt: u32 = 0;
    let mut backoff = BACKOFF_MIN;
    let mut rng = StdRng::from_entropy();
    let full_url = with_frontend_version(&url);

    loop {
        if let Some(max) = max_reconnects {
            if attempt >= max {
                error!(attempt, max, "max reconnect attempts reached");
                let _ = connection_events
                    .send(ConnectionEvent {
                        event_type: ConnectionEventType::MaxReconnectsReached,
                        attempt: Some(attempt),
                        reason: None,
                        created_at: Utc::now(),
                    })
                    .await;
                liveness.set(false);
                return;
            }
        }

        attempt += 1;
        info!(attempt, url = %full_url, "connecting to upstream");

        tokio::select! {
            result = run_session(&full_url, &queue, &metrics, &liveness, &connection_events) => {
                match result {
                    Ok(()) => info!("upstream session ended cleanly"),
                    Err(e) => {
                        warn!(attempt, error = %e, "upstream session error");
                        let _ = connection_events.send(ConnectionEvent {
                            event_type: ConnectionEventType::Error,
                            attempt: Some(attempt),
                            reason: Some(e.to_string()),
                            created_at: Utc::now(),
                        }).await;
                    }
                }
                liveness.set(false);
                backoff = next_backoff(&mut rng, backoff);
                info!(backoff_ms = backoff.as_millis(), "backing off before reconnect");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.recv() => return,
                }
            }
            _ = shutdown.recv() => {
                liveness.set(false);
                return;
            }
        }
    }
}

async fn run_session(
    url: &str,
    queue: &RawFrameQueue,
    metrics: &Metrics,
    liveness: &Liveness,
    connection_events: &tokio::sync::mpsc::Sender<ConnectionEvent>,
) -> Result<(), ConsumerError> {
    let (mut ws_stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(ConsumerError::Connect)?;

    liveness.set(true);
    let _ = connection_events
        .send(ConnectionEvent {
            event_type: ConnectionEventType::Connected,
            attempt: None,
            reason: None,
            created_at: Utc::now(),
        })
        .await;

    loop {
        match ws_stream.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Some((event_name, payload)) = parse_frame(&text) {
                    metrics.record_message();
                    queue
                        .push(
                            RawFrame {
                                event_name,
                                payload,
                                received_at: Utc::now(),
                            },
                            metrics,
                        )
                        .await;
                }
            }
            Some(Ok(Message::Ping(data))) => {
                // Read-only session: responding to a ping with a pong is
                // transport-level keepalive, not an application message.
                let _ = ws_stream.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                let reason = frame.map(|f| f.reason.to_string());
                let _ = connection_events
                    .send(ConnectionEvent {
                        event_type: ConnectionEventType::Disconnected,
                        attempt: None,
                        reason,
                        created_at: Utc::now(),
                    })
                    .await;
                return Ok(());
            }
            Some(Err(e)) => return Err(ConsumerError::Ws(e)),
            None => return Err(ConsumerError::StreamClosed),
            Some(Ok(_)) => {}
        }
    }
}

/// Parse one text frame into `(eventName, payload)`. The upstream wraps the
/// event name and payload in a small envelope; unrecognized shapes are
/// skipped rather than crashing the session.
fn parse_frame(text: &str) -> Option<(String, serde_json::Value)> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let event_name = value.get("event").and_then(|v| v.as_str())?.to_string();
    let payload = value.get("data").cloned().unwrap_or(value);
    Some((event_name, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_frontend_version_when_missing() {
        let url = with_frontend_version("wss://backend.rugs.fun/socket.io");
        assert!(url.contains("frontend-version=1.0"));
    }

    #[test]
    fn leaves_frontend_version_untouched_when_present() {
        let url = with_frontend_version("wss://backend.rugs.fun/socket.io?frontend-version=2.0");
        let count = url.matches("frontend-version").count();
        assert_eq!(count, 1);
        assert!(url.contains("frontend-version=2.0"));
    }

    #[test]
    fn backoff_stays_within_bounds() {
        let mut rng = StdRng::from_entropy();
        let mut backoff = BACKOFF_MIN;
        for _ in 0..20 {
            backoff = next_backoff(&mut rng, backoff);
            assert!(backoff >= BACKOFF_MIN);
            assert!(backoff <= BACKOFF_MAX);
        }
    }

    #[test]
    fn parses_event_envelope() {
        let (name, payload) = parse_frame(r#"{"event":"gameStateUpdate","data":{"gameId":"g1"}}"#).unwrap();
        assert_eq!(name, "gameStateUpdate");
        assert_eq!(payload["gameId"], "g1");
    }

    #[tokio::test]
    async fn queue_drops_oldest_on_overflow() {
        let queue = RawFrameQueue::new(2);
        let metrics = Metrics::default();
        for i in 0..3 {
            queue
                .push(
                    RawFrame {
                        event_name: "x".to_string(),
                        payload: serde_json::json!(i),
                        received_at: Utc::now(),
                    },
                    &metrics,
                )
                .await;
        }
        assert_eq!(metrics.snapshot().upstream_dropped, 1);
        let first = queue.recv().await;
        assert_eq!(first.payload, serde_json::json!(1));
    }
}
