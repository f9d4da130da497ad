// =============================================================================
// Process-wide operational counters — atomic, monotonic, never reset
// =============================================================================
//
// Grounded on the teacher's `state_version`/`ws_sequence_number` atomics in
// its app state hub: a handful of `AtomicU64`s updated in place and read by
// value for a snapshot, rather than a mutex-guarded counters struct.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

const ORD: Ordering = Ordering::Relaxed;

#[derive(Debug, Default, Serialize, Clone)]
pub struct SchemaCounts {
    pub ok: u64,
    pub fail: u64,
}

/// Process-wide counters. All fields are monotonic for the life of the
/// process; a snapshot is a cheap by-value read, never a held lock across I/O.
pub struct Metrics {
    started_at: Instant,
    pub total_messages_processed: AtomicU64,
    pub total_trades: AtomicU64,
    pub total_games_tracked: AtomicU64,
    pub upstream_dropped: AtomicU64,
    pub ws_subscribers: AtomicI64,
    pub ws_slow_client_drops: AtomicU64,
    pub schema_total: AtomicU64,
    schema_per_event: RwLock<HashMap<String, (AtomicU64, AtomicU64)>>,
    error_counters: RwLock<HashMap<String, AtomicU64>>,
    last_event_at: RwLock<Option<chrono::DateTime<chrono::Utc>>>,
    recent_event_times: RwLock<Vec<Instant>>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            total_messages_processed: AtomicU64::new(0),
            total_trades: AtomicU64::new(0),
            total_games_tracked: AtomicU64::new(0),
            upstream_dropped: AtomicU64::new(0),
            ws_subscribers: AtomicI64::new(0),
            ws_slow_client_drops: AtomicU64::new(0),
            schema_total: AtomicU64::new(0),
            schema_per_event: RwLock::new(HashMap::new()),
            error_counters: RwLock::new(HashMap::new()),
            last_event_at: RwLock::new(None),
            recent_event_times: RwLock::new(Vec::new()),
        }
    }
}

impl Metrics {
    pub fn record_message(&self) {
        self.total_messages_processed.fetch_add(1, ORD);
        *self.last_event_at.write() = Some(chrono::Utc::now());

        let now = Instant::now();
        let mut times = self.recent_event_times.write();
        times.push(now);
        // Bound the ring: anything older than 5 minutes is irrelevant to the
        // 1m/5m rate windows we report.
        while times.first().is_some_and(|t| now.duration_since(*t).as_secs() > 300) {
            times.remove(0);
        }
    }

    pub fn record_schema_result(&self, key: &str, ok: bool) {
        self.schema_total.fetch_add(1, ORD);
        let guard = self.schema_per_event.read();
        if let Some((ok_ctr, fail_ctr)) = guard.get(key) {
            if ok {
                ok_ctr.fetch_add(1, ORD);
            } else {
                fail_ctr.fetch_add(1, ORD);
            }
            return;
        }
        drop(guard);

        let mut guard = self.schema_per_event.write();
        let entry = guard
            .entry(key.to_string())
            .or_insert_with(|| (AtomicU64::new(0), AtomicU64::new(0)));
        if ok {
            entry.0.fetch_add(1, ORD);
        } else {
            entry.1.fetch_add(1, ORD);
        }
    }

    pub fn record_error(&self, kind: &str) {
        let guard = self.error_counters.read();
        if let Some(ctr) = guard.get(kind) {
            ctr.fetch_add(1, ORD);
            return;
        }
        drop(guard);
        let mut guard = self.error_counters.write();
        guard.entry(kind.to_string()).or_insert_with(|| AtomicU64::new(0)).fetch_add(1, ORD);
    }

    fn messages_in_last(&self, secs: u64) -> u64 {
        let now = Instant::now();
        self.recent_event_times
            .read()
            .iter()
            .filter(|t| now.duration_since(**t).as_secs() <= secs)
            .count() as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let schema_per_event: HashMap<String, SchemaCounts> = self
            .schema_per_event
            .read()
            .iter()
            .map(|(k, (ok, fail))| {
                (
                    k.clone(),
                    SchemaCounts {
                        ok: ok.load(ORD),
                        fail: fail.load(ORD),
                    },
                )
            })
            .collect();

        let error_counters: HashMap<String, u64> = self
            .error_counters
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(ORD)))
            .collect();

        MetricsSnapshot {
            service_uptime_sec: self.started_at.elapsed().as_secs(),
            total_messages_processed: self.total_messages_processed.load(ORD),
            total_trades: self.total_trades.load(ORD),
            total_games_tracked: self.total_games_tracked.load(ORD),
            upstream_dropped: self.upstream_dropped.load(ORD),
            messages_per_second_1m: self.messages_in_last(60) as f64 / 60.0,
            messages_per_second_5m: self.messages_in_last(300) as f64 / 300.0,
            ws_subscribers: self.ws_subscribers.load(ORD).max(0) as u64,
            ws_slow_client_drops: self.ws_slow_client_drops.load(ORD),
            last_event_at: *self.last_event_at.read(),
            error_counters,
            schema_validation: SchemaValidationSnapshot {
                total: self.schema_total.load(ORD),
                per_event: schema_per_event,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SchemaValidationSnapshot {
    pub total: u64,
    #[serde(rename = "perEvent")]
    pub per_event: HashMap<String, SchemaCounts>,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    #[serde(rename = "serviceUptimeSec")]
    pub service_uptime_sec: u64,
    #[serde(rename = "totalMessagesProcessed")]
    pub total_messages_processed: u64,
    #[serde(rename = "totalTrades")]
    pub total_trades: u64,
    #[serde(rename = "totalGamesTracked")]
    pub total_games_tracked: u64,
    #[serde(rename = "upstreamDropped")]
    pub upstream_dropped: u64,
    #[serde(rename = "messagesPerSecond1m")]
    pub messages_per_second_1m: f64,
    #[serde(rename = "messagesPerSecond5m")]
    pub messages_per_second_5m: f64,
    #[serde(rename = "wsSubscribers")]
    pub ws_subscribers: u64,
    #[serde(rename = "wsSlowClientDrops")]
    pub ws_slow_client_drops: u64,
    #[serde(rename = "lastEventAt")]
    pub last_event_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "errorCounters")]
    pub error_counters: HashMap<String, u64>,
    #[serde(rename = "schemaValidation")]
    pub schema_validation: SchemaValidationSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic() {
        let metrics = Metrics::default();
        metrics.record_message();
        metrics.record_message();
        let snap = metrics.snapshot();
        assert_eq!(snap.total_messages_processed, 2);
    }

    #[test]
    fn schema_total_equals_sum_of_per_event() {
        let metrics = Metrics::default();
        metrics.record_schema_result("gameStateUpdate", true);
        metrics.record_schema_result("gameStateUpdate", false);
        metrics.record_schema_result("newTrade", true);
        let snap = metrics.snapshot();
        assert_eq!(snap.schema_validation.total, 3);
        let sum: u64 = snap
            .schema_validation
            .per_event
            .values()
            .map(|c| c.ok + c.fail)
            .sum();
        assert_eq!(sum, 3);
    }
}
