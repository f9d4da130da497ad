// =============================================================================
// Broadcaster — fan-out to `/api/ws/stream` subscribers with bounded buffers
// =============================================================================
//
// Grounded on the teacher's `ws.rs` push loop (a `tokio::select!` between a
// heartbeat interval and inbound socket messages) generalized from one
// dashboard connection per client to many independent outbound-only
// subscribers, each with its own bounded channel instead of a shared one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::metrics::Metrics;
use crate::outbound::OutboundFrame;

const SUBSCRIBER_BUFFER: usize = 256;

pub type Subscription = mpsc::Receiver<OutboundFrame>;

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<OutboundFrame>,
}

/// Holds the live subscriber set and publishes outbound frames to all of
/// them in router-emission order. A subscriber whose buffer is full is
/// evicted rather than allowed to stall the publisher.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. The caller is expected to send a `hello`
    /// frame on the returned receiver's paired sender as the first message;
    /// the API layer (which owns the socket) does this so the broadcaster
    /// itself stays transport-agnostic.
    pub fn subscribe(&self, metrics: &Metrics) -> (u64, Subscription) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.write().push(Subscriber { id, sender: tx });
        metrics.ws_subscribers.fetch_add(1, Ordering::Relaxed);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64, metrics: &Metrics) {
        let mut subs = self.subscribers.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        if subs.len() < before {
            metrics.ws_subscribers.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Publish one frame to every subscriber, evicting any whose buffer is
    /// full. Eviction happens out-of-band (collected ids, removed after the
    /// send loop) so the write lock isn't held across the whole fan-out.
    pub fn publish(&self, frame: OutboundFrame, metrics: &Metrics) {
        let mut evicted = Vec::new();
        {
            let subs = self.subscribers.read();
            for sub in subs.iter() {
                match sub.sender.try_send(frame.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => evicted.push(sub.id),
                    Err(mpsc::error::TrySendError::Closed(_)) => evicted.push(sub.id),
                }
            }
        }
        if !evicted.is_empty() {
            let mut subs = self.subscribers.write();
            subs.retain(|s| !evicted.contains(&s.id));
            metrics.ws_slow_client_drops.fetch_add(evicted.len() as u64, Ordering::Relaxed);
            metrics.ws_subscribers.fetch_sub(evicted.len() as i64, Ordering::Relaxed);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

/// Spawn the 30-second heartbeat loop. Runs until `shutdown` fires.
pub fn spawn_heartbeat(broadcaster: Arc<Broadcaster>, metrics: Arc<Metrics>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    broadcaster.publish(OutboundFrame::heartbeat(), &metrics);
                }
                _ = shutdown.recv() => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_all_subscribers() {
        let broadcaster = Broadcaster::new();
        let metrics = Metrics::default();
        let (_id_a, mut rx_a) = broadcaster.subscribe(&metrics);
        let (_id_b, mut rx_b) = broadcaster.subscribe(&metrics);

        broadcaster.publish(OutboundFrame::hello(), &metrics);

        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_after_buffer_fills() {
        let broadcaster = Broadcaster::new();
        let metrics = Metrics::default();
        let (_id, _rx) = broadcaster.subscribe(&metrics);

        for _ in 0..(SUBSCRIBER_BUFFER + 10) {
            broadcaster.publish(OutboundFrame::heartbeat(), &metrics);
        }

        assert_eq!(broadcaster.subscriber_count(), 0);
        assert!(metrics.snapshot().ws_slow_client_drops >= 1);
    }

    #[tokio::test]
    async fn unsubscribe_removes_and_decrements_count() {
        let broadcaster = Broadcaster::new();
        let metrics = Metrics::default();
        let (id, _rx) = broadcaster.subscribe(&metrics);
        assert_eq!(broadcaster.subscriber_count(), 1);
        broadcaster.unsubscribe(id, &metrics);
        assert_eq!(broadcaster.subscriber_count(), 0);
        assert_eq!(metrics.snapshot().ws_subscribers, 0);
    }
}
