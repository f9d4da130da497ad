// =============================================================================
// Core data model — games, ticks, trades, and the other persisted entities
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exact decimal used for every price/amount field. Never `f64` — round-trips
/// through persistence and the PRNG verifier must be bit-for-bit stable.
pub type Price = Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    Waiting,
    Cooldown,
    PreRound,
    Active,
    Rug,
    Completed,
}

impl Default for GamePhase {
    fn default() -> Self {
        Self::Waiting
    }
}

impl std::fmt::Display for GamePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "WAITING",
            Self::Cooldown => "COOLDOWN",
            Self::PreRound => "PRE_ROUND",
            Self::Active => "ACTIVE",
            Self::Rug => "RUG",
            Self::Completed => "COMPLETED",
        };
        write!(f, "{s}")
    }
}

/// A single phase transition recorded in `Game::history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub phase: GamePhase,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityFlags {
    #[serde(default)]
    pub duplicate_or_out_of_order: bool,
    #[serde(default)]
    pub large_gap: bool,
    #[serde(default)]
    pub price_non_positive: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrngVerificationData {
    pub full_verification: bool,
    pub peak_match: bool,
    pub ticks_match: bool,
    pub array_match: bool,
    pub divergence_tick: Option<u64>,
    pub expected_peak: Option<Price>,
    pub actual_peak: Option<Price>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub phase: GamePhase,
    pub version: u64,
    pub server_seed_hash: String,
    pub server_seed: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub rug_tick: Option<u64>,
    pub end_price: Option<Price>,
    pub peak_multiplier: Option<Price>,
    pub total_ticks: Option<u64>,
    pub has_god_candle: bool,
    pub prng_verified: Option<bool>,
    pub prng_verification_data: Option<PrngVerificationData>,
    /// Formula variant the upstream generator used for this game, carried in
    /// `gameHistory[].provablyFair.version`. `None` until the game completes
    /// and the history entry arrives.
    pub generator_version: Option<crate::prng::GeneratorVersion>,
    pub quality: QualityFlags,
    pub history: Vec<PhaseTransition>,
}

impl Game {
    pub fn new(id: impl Into<String>, server_seed_hash: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        let id = id.into();
        Self {
            id,
            phase: GamePhase::Waiting,
            version: 1,
            server_seed_hash: server_seed_hash.into(),
            server_seed: None,
            start_time,
            end_time: None,
            rug_tick: None,
            end_price: None,
            peak_multiplier: None,
            total_ticks: None,
            has_god_candle: false,
            prng_verified: None,
            prng_verification_data: None,
            generator_version: None,
            quality: QualityFlags::default(),
            history: vec![PhaseTransition {
                phase: GamePhase::Waiting,
                at: start_time,
            }],
        }
    }

    pub fn push_transition(&mut self, phase: GamePhase, at: DateTime<Utc>) {
        self.phase = phase;
        self.version += 1;
        self.history.push(PhaseTransition { phase, at });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateSnapshot {
    pub game_id: String,
    pub tick_count: u64,
    pub price: Option<Price>,
    pub phase: GamePhase,
    pub payload: serde_json::Value,
    pub validation: ValidationSummary,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub event_id: String,
    pub game_id: String,
    pub player_id: String,
    pub side: TradeSide,
    pub tick_index: u64,
    pub amount: Price,
    pub qty: Price,
    pub price: Option<Price>,
    pub coin: String,
    pub validation: ValidationSummary,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideBet {
    pub id: String,
    pub game_id: String,
    pub player_id: String,
    pub event: String,
    pub start_tick: Option<u64>,
    pub end_tick: Option<u64>,
    pub bet_amount: Option<Price>,
    pub target_multiplier: Option<Price>,
    pub payout_ratio: Option<Price>,
    pub won: Option<bool>,
    pub pnl: Option<Price>,
    pub validation: ValidationSummary,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GodCandle {
    pub game_id: String,
    pub tick_index: u64,
    pub from_price: Price,
    pub to_price: Price,
    pub ratio: Price,
    pub version: String,
    pub under_cap: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameTick {
    pub game_id: String,
    pub tick: u64,
    pub price: Price,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameIndex {
    pub game_id: String,
    pub index: u64,
    pub start_tick: u64,
    pub end_tick: u64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: String,
    pub payload: serde_json::Value,
    pub validation: Option<ValidationSummary>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionEventType {
    Connected,
    Disconnected,
    Error,
    MaxReconnectsReached,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionEvent {
    pub event_type: ConnectionEventType,
    pub attempt: Option<u32>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrngStatus {
    Tracking,
    Complete,
    AwaitingSeed,
    MissingExpected,
    Verified,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrngTracking {
    pub game_id: String,
    pub status: PrngStatus,
    pub server_seed_hash: String,
    pub server_seed: Option<String>,
    pub verification: Option<PrngVerificationData>,
    pub updated_at: DateTime<Utc>,
}

/// Validation outcome tagged onto every persisted record that passed through
/// the schema validator. `None` schema key means no schema applies (ancillary
/// archive-only events).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub ok: bool,
    pub schema: Option<String>,
    pub error: Option<String>,
}

impl ValidationSummary {
    pub fn pass(schema: impl Into<String>) -> Self {
        Self {
            ok: true,
            schema: Some(schema.into()),
            error: None,
        }
    }

    pub fn fail(schema: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            schema: Some(schema.into()),
            error: Some(error.into()),
        }
    }
}

/// The singleton `live_state` meta record: the latest authoritative snapshot
/// plus the tracker's currently inferred phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveState {
    pub game_id: Option<String>,
    pub phase: GamePhase,
    pub tick_count: Option<u64>,
    pub price: Option<Price>,
    pub updated_at: DateTime<Utc>,
}

impl Default for LiveState {
    fn default() -> Self {
        Self {
            game_id: None,
            phase: GamePhase::Waiting,
            tick_count: None,
            price: None,
            updated_at: Utc::now(),
        }
    }
}
