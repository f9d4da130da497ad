// =============================================================================
// Game lifecycle state tracker — the FSM owning ticks, OHLC, god candles,
// quality flags, and the `live_state` singleton.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::prng::GeneratorVersion;
use crate::types::{GamePhase, GodCandle, LiveState, Price, QualityFlags};

/// Tags god candles detected live (as opposed to those reconstructed by the
/// PRNG verifier's replay, which stamps the generator version instead).
const GOD_CANDLE_LIVE_VERSION: &str = "live";
const OHLC_WINDOW: u64 = 5;

/// Minimal parse of a `gameStateUpdate` payload. Fields absent from a given
/// frame are `None` and simply leave the tracker's state unchanged for that
/// aspect.
#[derive(Debug, Default, Deserialize)]
struct GameStateUpdatePayload {
    #[serde(rename = "gameId")]
    game_id: Option<String>,
    #[serde(rename = "tickCount")]
    tick_count: Option<u64>,
    price: Option<f64>,
    active: Option<bool>,
    rugged: Option<bool>,
    #[serde(rename = "cooldownTimer")]
    cooldown_timer: Option<f64>,
    #[serde(rename = "allowPreRoundBuys")]
    allow_pre_round_buys: Option<bool>,
    #[serde(rename = "gameHistory")]
    game_history: Option<Vec<GameHistoryEntry>>,
    #[serde(rename = "serverSeedHash")]
    server_seed_hash: Option<String>,
    #[serde(rename = "provablyFair")]
    provably_fair: Option<ProvablyFair>,
}

#[derive(Debug, Deserialize)]
struct ProvablyFair {
    #[serde(rename = "serverSeed")]
    server_seed: Option<String>,
    #[serde(rename = "serverSeedHash")]
    server_seed_hash: Option<String>,
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GameHistoryEntry {
    #[serde(rename = "gameId")]
    game_id: String,
    prices: Option<Vec<f64>>,
    #[serde(rename = "peakMultiplier")]
    peak_multiplier: Option<f64>,
    #[serde(rename = "provablyFair")]
    provably_fair: Option<ProvablyFair>,
}

pub struct OhlcAccumulator {
    pub game_id: String,
    pub index: u64,
    pub start_tick: u64,
    pub end_tick: u64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
}

/// Events the tracker emits for the router to persist. Decouples the FSM
/// from the store so it can be exercised without a live database.
pub enum TrackerEvent {
    PhaseChanged { game_id: String, phase: GamePhase, at: DateTime<Utc> },
    GameStarted { game_id: String, server_seed_hash: String, start_time: DateTime<Utc> },
    Tick { game_id: String, tick: u64, price: Price },
    Ohlc(OhlcAccumulator),
    GodCandle(GodCandle),
    Rug { game_id: String, tick: u64, end_price: Price },
    GameCompleted {
        game_id: String,
        prices: Vec<Price>,
        peak_multiplier: Price,
        rug_tick: u64,
        end_price: Price,
        total_ticks: u64,
        end_time: DateTime<Utc>,
        server_seed: Option<String>,
        server_seed_hash: Option<String>,
        generator_version: Option<GeneratorVersion>,
    },
    QualityChanged { game_id: String, quality: QualityFlags },
    ConsistencyError(String),
}

struct TrackedGame {
    game_id: String,
    phase: GamePhase,
    last_tick: Option<u64>,
    last_price: Option<Price>,
    quality: QualityFlags,
    ohlc_current: Option<OhlcAccumulator>,
}

/// Owns `trackedGameId` and derives the artifacts described in the state
/// machine: ticks, 5-tick OHLC, god candles, quality flags, and `live_state`.
pub struct StateTracker {
    tracked: Option<TrackedGame>,
    live_state: LiveState,
}

impl Default for StateTracker {
    fn default() -> Self {
        Self {
            tracked: None,
            live_state: LiveState::default(),
        }
    }
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_state(&self) -> LiveState {
        self.live_state.clone()
    }

    /// Feed a `gameStateUpdate` payload through the FSM, returning every
    /// derived event to persist/broadcast. `now` is threaded in explicitly so
    /// the tracker stays deterministic and testable.
    pub fn process_snapshot(&mut self, payload: &Value, now: DateTime<Utc>) -> Vec<TrackerEvent> {
        let parsed: GameStateUpdatePayload = match serde_json::from_value(payload.clone()) {
            Ok(p) => p,
            Err(_) => return Vec::new(),
        };

        let mut events = Vec::new();
        let Some(game_id) = parsed.game_id.clone() else {
            return events;
        };

        let tracked_id = self.tracked.as_ref().map(|t| t.game_id.clone());

        match tracked_id {
            None => self.handle_no_tracked_game(&parsed, &game_id, now, &mut events),
            Some(ref t) if *t == game_id => self.handle_tracked_game(&parsed, now, &mut events),
            Some(previous) => {
                // A snapshot for a different game while one is tracked is
                // ignored unless it's the ACTIVE gate for a fresh game,
                // which ends the prior one without a clean RUG->COOLDOWN
                // extraction — log and drop tracking rather than corrupt it.
                if parsed.active == Some(true) {
                    warn!(%previous, incoming = %game_id, "new game became active before prior game's history arrived");
                    self.tracked = None;
                    self.handle_no_tracked_game(&parsed, &game_id, now, &mut events);
                } else {
                    return events;
                }
            }
        }

        self.update_live_state(&parsed, now);
        events
    }

    fn handle_no_tracked_game(
        &mut self,
        parsed: &GameStateUpdatePayload,
        game_id: &str,
        now: DateTime<Utc>,
        events: &mut Vec<TrackerEvent>,
    ) {
        let active = parsed.active.unwrap_or(false);
        let cooldown = parsed.cooldown_timer.unwrap_or(0.0);
        let allow_pre_round = parsed.allow_pre_round_buys.unwrap_or(false);

        let phase = if active {
            GamePhase::Active
        } else if cooldown > 10_000.0 {
            GamePhase::Cooldown
        } else if cooldown > 0.0 && allow_pre_round {
            GamePhase::PreRound
        } else {
            GamePhase::Waiting
        };

        self.tracked = Some(TrackedGame {
            game_id: game_id.to_string(),
            phase,
            last_tick: None,
            last_price: None,
            quality: QualityFlags::default(),
            ohlc_current: None,
        });

        // The `games` document is created here, at first observation, so that
        // the phase it's first seen in already has somewhere to land — not
        // only once the game reaches ACTIVE.
        events.push(TrackerEvent::GameStarted {
            game_id: game_id.to_string(),
            server_seed_hash: parsed.server_seed_hash.clone().unwrap_or_default(),
            start_time: now,
        });

        if phase != GamePhase::Waiting {
            events.push(TrackerEvent::PhaseChanged {
                game_id: game_id.to_string(),
                phase,
                at: now,
            });
        }

        if phase == GamePhase::Active {
            if let (Some(tick), Some(price)) = (parsed.tick_count, parsed.price.and_then(Price::from_f64)) {
                self.apply_tick(tick, price, now, events);
            }
        }
    }

    fn handle_tracked_game(&mut self, parsed: &GameStateUpdatePayload, now: DateTime<Utc>, events: &mut Vec<TrackerEvent>) {
        let tracked = self.tracked.as_ref().expect("tracked game present");
        let game_id = tracked.game_id.clone();
        let phase = tracked.phase;

        let next_phase = match phase {
            GamePhase::Waiting => {
                if parsed.active == Some(false) && parsed.cooldown_timer.unwrap_or(0.0) > 10_000.0 {
                    Some(GamePhase::Cooldown)
                } else {
                    None
                }
            }
            GamePhase::Cooldown => {
                let cooldown = parsed.cooldown_timer.unwrap_or(f64::MAX);
                if cooldown <= 10_000.0 && cooldown > 0.0 && parsed.allow_pre_round_buys == Some(true) && parsed.active != Some(true) {
                    Some(GamePhase::PreRound)
                } else {
                    None
                }
            }
            GamePhase::PreRound => {
                if parsed.active == Some(true) {
                    Some(GamePhase::Active)
                } else {
                    None
                }
            }
            GamePhase::Active => {
                if let Some(tick) = parsed.tick_count {
                    if let Some(price) = parsed.price.and_then(Price::from_f64) {
                        self.apply_tick(tick, price, now, events);
                    }
                }
                if parsed.rugged == Some(true) {
                    Some(GamePhase::Rug)
                } else {
                    None
                }
            }
            GamePhase::Rug => {
                if let Some(history) = &parsed.game_history {
                    return self.extract_completed_game(&game_id, history, now, events);
                }
                None
            }
            GamePhase::Completed => None,
        };

        if let Some(new_phase) = next_phase {
            let tracked = self.tracked.as_mut().expect("tracked game present");
            tracked.phase = new_phase;
            events.push(TrackerEvent::PhaseChanged {
                game_id: game_id.clone(),
                phase: new_phase,
                at: now,
            });

            if new_phase == GamePhase::Rug {
                if let (Some(tick), Some(price)) = (parsed.tick_count, parsed.price.and_then(Price::from_f64)) {
                    events.push(TrackerEvent::Rug {
                        game_id: game_id.clone(),
                        tick,
                        end_price: price,
                    });
                }
            }
        }
    }

    fn apply_tick(&mut self, tick: u64, price: Price, now: DateTime<Utc>, events: &mut Vec<TrackerEvent>) {
        let Some(tracked) = self.tracked.as_mut() else { return };
        let game_id = tracked.game_id.clone();

        if let Some(last_tick) = tracked.last_tick {
            if tick <= last_tick {
                tracked.quality.duplicate_or_out_of_order = true;
                tracked.quality.last_checked_at = Some(now);
                events.push(TrackerEvent::QualityChanged {
                    game_id: game_id.clone(),
                    quality: tracked.quality.clone(),
                });
                return;
            }
            if tick - last_tick > 10 {
                tracked.quality.large_gap = true;
            }
        }
        if price <= Price::ZERO {
            tracked.quality.price_non_positive = true;
        }
        tracked.quality.last_checked_at = Some(now);
        events.push(TrackerEvent::QualityChanged {
            game_id: game_id.clone(),
            quality: tracked.quality.clone(),
        });

        if let Some(prev_price) = tracked.last_price {
            if !prev_price.is_zero() {
                let ratio = price / prev_price;
                if ratio >= Price::from(10) {
                    let under_cap = prev_price <= Price::from(100);
                    events.push(TrackerEvent::GodCandle(GodCandle {
                        game_id: game_id.clone(),
                        tick_index: tick,
                        from_price: prev_price,
                        to_price: price,
                        ratio,
                        version: GOD_CANDLE_LIVE_VERSION.to_string(),
                        under_cap,
                        created_at: now,
                    }));
                }
            }
        }

        tracked.last_tick = Some(tick);
        tracked.last_price = Some(price);

        events.push(TrackerEvent::Tick {
            game_id: game_id.clone(),
            tick,
            price,
        });

        let index = tick / OHLC_WINDOW;
        let needs_fresh = match &tracked.ohlc_current {
            Some(a) => a.index != index,
            None => true,
        };

        if needs_fresh {
            tracked.ohlc_current = Some(OhlcAccumulator {
                game_id: game_id.clone(),
                index,
                start_tick: index * OHLC_WINDOW,
                end_tick: index * OHLC_WINDOW + OHLC_WINDOW - 1,
                open: price,
                high: price,
                low: price,
                close: price,
            });
        } else {
            let accum = tracked.ohlc_current.as_mut().expect("checked above");
            accum.close = price;
            accum.high = accum.high.max(price);
            accum.low = accum.low.min(price);
        }

        let current = tracked.ohlc_current.as_ref().expect("just set above");
        events.push(TrackerEvent::Ohlc(OhlcAccumulator {
            game_id: current.game_id.clone(),
            index: current.index,
            start_tick: current.start_tick,
            end_tick: current.end_tick,
            open: current.open,
            high: current.high,
            low: current.low,
            close: current.close,
        }));
    }

    fn extract_completed_game(&mut self, tracked_game_id: &str, history: &[GameHistoryEntry], now: DateTime<Utc>, events: &mut Vec<TrackerEvent>) {
        let Some(entry) = history.iter().find(|h| h.game_id == tracked_game_id) else {
            warn!(game_id = %tracked_game_id, "gameHistory arrived without the tracked game; resetting tracking");
            events.push(TrackerEvent::ConsistencyError(format!(
                "gameHistory missing tracked game {tracked_game_id}"
            )));
            self.tracked = None;
            return;
        };

        let prices: Vec<Price> = entry
            .prices
            .as_ref()
            .map(|ps| ps.iter().filter_map(|p| Price::from_f64(*p)).collect())
            .unwrap_or_default();
        let peak_multiplier = entry
            .peak_multiplier
            .and_then(Price::from_f64)
            .unwrap_or_else(|| prices.iter().copied().max().unwrap_or_default());
        let total_ticks = prices.len() as u64;
        let rug_tick = total_ticks.saturating_sub(1);
        let end_price = prices.last().copied().unwrap_or_default();
        let server_seed = entry.provably_fair.as_ref().and_then(|pf| pf.server_seed.clone());
        let server_seed_hash = entry.provably_fair.as_ref().and_then(|pf| pf.server_seed_hash.clone());
        let generator_version = entry.provably_fair.as_ref().and_then(|pf| pf.version.as_deref()).map(GeneratorVersion::parse);

        events.push(TrackerEvent::GameCompleted {
            game_id: tracked_game_id.to_string(),
            prices,
            peak_multiplier,
            rug_tick,
            end_price,
            total_ticks,
            end_time: now,
            server_seed,
            server_seed_hash,
            generator_version,
        });

        self.tracked = None;
    }

    fn update_live_state(&mut self, parsed: &GameStateUpdatePayload, now: DateTime<Utc>) {
        self.live_state = LiveState {
            game_id: parsed.game_id.clone(),
            phase: self.tracked.as_ref().map(|t| t.phase).unwrap_or_default(),
            tick_count: parsed.tick_count,
            price: parsed.price.and_then(Price::from_f64),
            updated_at: now,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(v: Value) -> Value {
        v
    }

    #[test]
    fn waiting_to_cooldown_boundary() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        tracker.process_snapshot(
            &snapshot(json!({"gameId": "g1", "active": false, "cooldownTimer": 10001})),
            now,
        );
        let events = tracker.process_snapshot(
            &snapshot(json!({"gameId": "g1", "active": false, "cooldownTimer": 10001})),
            now,
        );
        assert!(matches!(tracker.tracked.as_ref().unwrap().phase, GamePhase::Cooldown));
        drop(events);
    }

    #[test]
    fn cooldown_to_pre_round_requires_allow_flag() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        tracker.process_snapshot(&json!({"gameId": "g1", "active": false, "cooldownTimer": 10001}), now);
        tracker.process_snapshot(
            &json!({"gameId": "g1", "active": false, "cooldownTimer": 9000, "allowPreRoundBuys": true}),
            now,
        );
        assert!(matches!(tracker.tracked.as_ref().unwrap().phase, GamePhase::PreRound));
    }

    #[test]
    fn pre_round_to_active_on_active_true() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        tracker.process_snapshot(&json!({"gameId": "g1", "active": false, "cooldownTimer": 10001}), now);
        tracker.process_snapshot(
            &json!({"gameId": "g1", "active": false, "cooldownTimer": 100, "allowPreRoundBuys": true}),
            now,
        );
        tracker.process_snapshot(&json!({"gameId": "g1", "active": true, "cooldownTimer": 0, "price": 1, "tickCount": 0}), now);
        assert!(matches!(tracker.tracked.as_ref().unwrap().phase, GamePhase::Active));
    }

    #[test]
    fn god_candle_detected_on_tenfold_jump_under_cap() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        tracker.process_snapshot(&json!({"gameId": "g1", "active": true, "cooldownTimer": 0, "price": 1, "tickCount": 1}), now);
        let events = tracker.process_snapshot(&json!({"gameId": "g1", "active": true, "price": 10, "tickCount": 2}), now);
        let has_god_candle = events.iter().any(|e| matches!(e, TrackerEvent::GodCandle(gc) if gc.under_cap));
        assert!(has_god_candle);
    }

    #[test]
    fn rug_to_cooldown_extracts_by_game_id_not_position() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        tracker.process_snapshot(&json!({"gameId": "g1", "active": true, "price": 1, "tickCount": 0}), now);
        tracker.process_snapshot(&json!({"gameId": "g1", "active": true, "price": 1, "tickCount": 1, "rugged": true}), now);
        let history = json!([
            {"gameId": "decoy", "prices": [1.0, 2.0], "peakMultiplier": 2.0},
            {"gameId": "g1", "prices": [1.0, 0.5], "peakMultiplier": 1.0}
        ]);
        let events = tracker.process_snapshot(&json!({"gameId": "g1", "gameHistory": history}), now);
        let completed = events.iter().find_map(|e| match e {
            TrackerEvent::GameCompleted { game_id, prices, .. } if game_id == "g1" => Some(prices.clone()),
            _ => None,
        });
        assert_eq!(completed, Some(vec![Price::from_f64(1.0).unwrap(), Price::from_f64(0.5).unwrap()]));
    }

    #[test]
    fn history_missing_tracked_game_resets_tracking() {
        let mut tracker = StateTracker::new();
        let now = Utc::now();
        tracker.process_snapshot(&json!({"gameId": "g1", "active": true, "price": 1, "tickCount": 0}), now);
        tracker.process_snapshot(&json!({"gameId": "g1", "active": true, "price": 1, "tickCount": 1, "rugged": true}), now);
        let history = json!([{"gameId": "other", "prices": [1.0], "peakMultiplier": 1.0}]);
        let events = tracker.process_snapshot(&json!({"gameId": "g1", "gameHistory": history}), now);
        assert!(events.iter().any(|e| matches!(e, TrackerEvent::ConsistencyError(_))));
        assert!(tracker.tracked.is_none());
    }
}
