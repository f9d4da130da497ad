// =============================================================================
// Event router & normalizer — validates, persists, tracks, and broadcasts
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::broadcaster::Broadcaster;
use crate::inbound::{InboundEvent, RawFrame};
use crate::metrics::Metrics;
use crate::outbound::{OutboundFrame, SCHEMA_V1};
use crate::persistence::{Job, WorkerPool};
use crate::schema::SchemaRegistry;
use crate::state_tracker::{StateTracker, TrackerEvent};
use crate::types::{
    ConnectionEventType, EventRecord, Game, GameIndex, GameStateSnapshot, GameTick, Price, SideBet, Trade, TradeSide, ValidationSummary,
};

pub struct Router {
    schemas: Arc<SchemaRegistry>,
    tracker: parking_lot::Mutex<StateTracker>,
    persistence: Arc<WorkerPool>,
    broadcaster: Arc<Broadcaster>,
    metrics: Arc<Metrics>,
}

#[derive(Debug, Deserialize, Default)]
struct TradePayload {
    id: Option<String>,
    #[serde(rename = "gameId")]
    game_id: Option<String>,
    #[serde(rename = "playerId")]
    player_id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "tickIndex")]
    tick_index: Option<u64>,
    amount: Option<f64>,
    qty: Option<f64>,
    price: Option<f64>,
    coin: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SideBetPayload {
    id: Option<String>,
    #[serde(rename = "gameId")]
    game_id: Option<String>,
    #[serde(rename = "playerId")]
    player_id: Option<String>,
    event: Option<String>,
    #[serde(rename = "startTick")]
    start_tick: Option<u64>,
    #[serde(rename = "endTick")]
    end_tick: Option<u64>,
    #[serde(rename = "betAmount")]
    bet_amount: Option<f64>,
    #[serde(rename = "targetMultiplier")]
    target_multiplier: Option<f64>,
    #[serde(rename = "payoutRatio")]
    payout_ratio: Option<f64>,
    won: Option<bool>,
    pnl: Option<f64>,
}

impl Router {
    pub fn new(schemas: Arc<SchemaRegistry>, persistence: Arc<WorkerPool>, broadcaster: Arc<Broadcaster>, metrics: Arc<Metrics>) -> Self {
        Self {
            schemas,
            tracker: parking_lot::Mutex::new(StateTracker::new()),
            persistence,
            broadcaster,
            metrics,
        }
    }

    pub fn live_state(&self) -> crate::types::LiveState {
        self.tracker.lock().live_state()
    }

    /// Drain the raw-frame queue forever, preserving per-frame order
    /// (single task, no reordering across ticks).
    pub async fn run(self: Arc<Self>, queue: Arc<crate::upstream::consumer::RawFrameQueue>, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                frame = queue.recv() => self.handle_frame(frame).await,
                _ = shutdown.recv() => break,
            }
        }
    }

    async fn handle_frame(&self, frame: RawFrame) {
        let event = InboundEvent::parse(&frame.event_name, frame.payload);
        let validation = match event.schema_key() {
            Some(key) => {
                let summary = self.schemas.validate(key, event.payload());
                self.metrics.record_schema_result(key, summary.ok);
                Some(summary)
            }
            None => None,
        };

        match &event {
            InboundEvent::GameStateUpdate(payload) => self.handle_game_state_update(payload, validation.unwrap(), frame.received_at).await,
            InboundEvent::NewTrade(payload) => self.handle_trade(payload, validation.unwrap(), frame.received_at).await,
            InboundEvent::SideBetCurrent(payload) => self.handle_side_bet(payload, "placed", validation.unwrap(), frame.received_at).await,
            InboundEvent::SideBetNew(payload) => self.handle_side_bet(payload, "resolved", validation.unwrap(), frame.received_at).await,
            InboundEvent::GameStatePlayerUpdate(_) | InboundEvent::PlayerUpdate(_) => {
                // Validated above for the counters, but this service's
                // normalized surface doesn't include a player-state entity.
            }
            InboundEvent::Other { name, payload } => {
                self.persist(Job::Event(EventRecord {
                    event_type: name.clone(),
                    payload: payload.clone(),
                    validation: None,
                    created_at: frame.received_at,
                }))
                .await;
            }
        }
    }

    async fn handle_game_state_update(&self, payload: &Value, validation: ValidationSummary, received_at: chrono::DateTime<Utc>) {
        let tick_count = payload.get("tickCount").and_then(Value::as_u64).unwrap_or(0);
        let price = payload.get("price").and_then(Value::as_f64).and_then(Price::from_f64);
        let game_id = payload.get("gameId").and_then(Value::as_str).unwrap_or_default().to_string();

        let phase = self.tracker.lock().live_state().phase;
        self.persist(Job::Snapshot(GameStateSnapshot {
            game_id: game_id.clone(),
            tick_count,
            price,
            phase,
            payload: payload.clone(),
            validation: validation.clone(),
            created_at: received_at,
        }))
        .await;

        let events = self.tracker.lock().process_snapshot(payload, received_at);
        for event in events {
            self.apply_tracker_event(event).await;
        }

        if let Some(price) = price {
            let frame = OutboundFrame::GameStateUpdate {
                schema: SCHEMA_V1,
                game_id,
                tick: tick_count,
                price,
                phase: self.tracker.lock().live_state().phase.to_string(),
                validation,
                ts: received_at,
            };
            self.broadcaster.publish(frame, &self.metrics);
        }
    }

    async fn apply_tracker_event(&self, event: TrackerEvent) {
        match event {
            TrackerEvent::PhaseChanged { game_id, phase, at } => {
                self.persist(Job::PhaseUpdate { game_id, phase, at }).await;
            }
            TrackerEvent::GameStarted { game_id, server_seed_hash, start_time } => {
                self.metrics.total_games_tracked.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                self.persist(Job::Game(Game::new(game_id, server_seed_hash, start_time))).await;
            }
            TrackerEvent::Tick { game_id, tick, price } => {
                self.persist(Job::Tick(GameTick {
                    game_id,
                    tick,
                    price,
                    created_at: Utc::now(),
                }))
                .await;
            }
            TrackerEvent::Ohlc(accum) => {
                self.persist(Job::Ohlc(GameIndex {
                    game_id: accum.game_id,
                    index: accum.index,
                    start_tick: accum.start_tick,
                    end_tick: accum.end_tick,
                    open: accum.open,
                    high: accum.high,
                    low: accum.low,
                    close: accum.close,
                }))
                .await;
            }
            TrackerEvent::GodCandle(candle) => {
                let frame = OutboundFrame::GodCandle {
                    schema: SCHEMA_V1,
                    game_id: candle.game_id.clone(),
                    tick: candle.tick_index,
                    from_price: candle.from_price,
                    to_price: candle.to_price,
                    ratio: candle.ratio,
                    ts: candle.created_at,
                };
                self.broadcaster.publish(frame, &self.metrics);
                self.persist(Job::GodCandleFlag(candle.game_id.clone())).await;
                self.persist(Job::GodCandle(candle)).await;
            }
            TrackerEvent::Rug { game_id, tick, end_price } => {
                let frame = OutboundFrame::Rug {
                    schema: SCHEMA_V1,
                    game_id,
                    tick,
                    end_price,
                    ts: Utc::now(),
                };
                self.broadcaster.publish(frame, &self.metrics);
            }
            TrackerEvent::GameCompleted {
                game_id,
                prices,
                peak_multiplier,
                rug_tick,
                end_price,
                total_ticks,
                end_time,
                server_seed,
                server_seed_hash,
                generator_version,
            } => {
                self.persist(Job::Event(EventRecord {
                    event_type: "game_completed".to_string(),
                    payload: serde_json::json!({
                        "gameId": game_id.clone(),
                        "prices": prices,
                        "peakMultiplier": peak_multiplier,
                        "serverSeed": server_seed.clone(),
                        "serverSeedHash": server_seed_hash.clone(),
                    }),
                    validation: None,
                    created_at: Utc::now(),
                }))
                .await;

                // The authoritative `games` document already exists from
                // `GameStarted`; completion only adds fields, so this is a
                // targeted field update rather than a full replace.
                self.persist(Job::GameCompletion {
                    game_id,
                    end_time,
                    rug_tick,
                    end_price,
                    peak_multiplier,
                    total_ticks,
                    server_seed,
                    server_seed_hash,
                    generator_version,
                })
                .await;
            }
            TrackerEvent::QualityChanged { game_id, quality } => {
                self.persist(Job::QualityUpdate { game_id, quality }).await;
            }
            TrackerEvent::ConsistencyError(message) => {
                self.metrics.record_error("consistency_violation");
                error!(%message, "state tracker consistency error");
            }
        }
    }

    async fn handle_trade(&self, payload: &Value, validation: ValidationSummary, received_at: chrono::DateTime<Utc>) {
        let parsed: TradePayload = serde_json::from_value(payload.clone()).unwrap_or_default();
        let event_id = parsed.id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let side = match parsed.kind.as_deref() {
            Some("sell") => TradeSide::Sell,
            _ => TradeSide::Buy,
        };

        let trade = Trade {
            event_id: event_id.clone(),
            game_id: parsed.game_id.clone().unwrap_or_default(),
            player_id: parsed.player_id.clone().unwrap_or_default(),
            side,
            tick_index: parsed.tick_index.unwrap_or(0),
            amount: parsed.amount.and_then(Price::from_f64).unwrap_or_default(),
            qty: parsed.qty.and_then(Price::from_f64).unwrap_or_default(),
            price: parsed.price.and_then(Price::from_f64),
            coin: parsed.coin.clone().unwrap_or_default(),
            validation: validation.clone(),
            created_at: received_at,
        };

        self.metrics.total_trades.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.persist(Job::Trade(trade.clone())).await;

        let frame = OutboundFrame::Trade {
            schema: SCHEMA_V1,
            game_id: trade.game_id,
            player_id: trade.player_id,
            trade_type: parsed.kind.unwrap_or_else(|| "buy".to_string()),
            tick_index: trade.tick_index,
            amount: trade.amount,
            qty: trade.qty,
            price: trade.price,
            validation,
            ts: received_at,
        };
        self.broadcaster.publish(frame, &self.metrics);
    }

    async fn handle_side_bet(&self, payload: &Value, event_hint: &str, validation: ValidationSummary, received_at: chrono::DateTime<Utc>) {
        let parsed: SideBetPayload = serde_json::from_value(payload.clone()).unwrap_or_default();
        let event = parsed.event.clone().unwrap_or_else(|| event_hint.to_string());

        let bet = SideBet {
            id: parsed.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            game_id: parsed.game_id.clone().unwrap_or_default(),
            player_id: parsed.player_id.clone().unwrap_or_default(),
            event: event.clone(),
            start_tick: parsed.start_tick,
            end_tick: parsed.end_tick,
            bet_amount: parsed.bet_amount.and_then(Price::from_f64),
            target_multiplier: parsed.target_multiplier.and_then(Price::from_f64),
            payout_ratio: parsed.payout_ratio.and_then(Price::from_f64),
            won: parsed.won,
            pnl: parsed.pnl.and_then(Price::from_f64),
            validation: validation.clone(),
            created_at: received_at,
        };

        self.persist(Job::SideBet(bet.clone())).await;

        let frame = OutboundFrame::SideBet {
            schema: SCHEMA_V1,
            event,
            game_id: bet.game_id,
            player_id: bet.player_id,
            validation,
            ts: received_at,
        };
        self.broadcaster.publish(frame, &self.metrics);
    }

    async fn persist(&self, job: Job) {
        if !self.persistence.submit(job).await {
            self.metrics.record_error("persistence_dropped");
        }
    }

    pub async fn record_connection_event(&self, event_type: ConnectionEventType, attempt: Option<u32>, reason: Option<String>) {
        self.persist(Job::ConnectionEvent(crate::types::ConnectionEvent {
            event_type,
            attempt,
            reason,
            created_at: Utc::now(),
        }))
        .await;
    }
}
