// =============================================================================
// Deterministic price-trajectory generator and verifier
// =============================================================================
//
// A small, independently seedable PRNG module — grounded on the teacher's
// statistical/detector modules (entropy, hurst, cusum) being small pure
// numeric units with no shared mutable state. Seeded by a string so the same
// draw sequence replays bit-for-bit given the revealed server seed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Price;

pub const RUG_PROB: f64 = 0.005;
pub const GOD_CANDLE_PROB: f64 = 0.00001;
pub const GOD_CANDLE_MULTIPLIER: f64 = 10.0;
pub const GOD_CANDLE_PRICE_CAP: f64 = 100.0;
pub const BIG_MOVE_PROB: f64 = 0.125;
pub const BIG_MOVE_MIN: f64 = 0.15;
pub const BIG_MOVE_MAX: f64 = 0.25;
pub const DRIFT_MIN: f64 = -0.02;
pub const DRIFT_MAX: f64 = 0.03;
pub const MAX_TICKS: u64 = 5_000;
/// Tolerance used when comparing a replayed trajectory to the stored one.
pub const PRICE_TOLERANCE: f64 = 1e-6;

/// Generator version. The volatility formula differs per version (§ below),
/// so the verifier selects it per game from `gameHistory[].provablyFair.version`
/// rather than hardcoding one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorVersion {
    V1,
    V3,
}

impl GeneratorVersion {
    fn volatility(self, price: f64) -> f64 {
        match self {
            Self::V1 => 0.005 * price.sqrt(),
            Self::V3 => 0.005 * price.sqrt().min(10.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V3 => "v3",
        }
    }

    /// Parses the upstream `provablyFair.version` tag, falling back to `V3`
    /// for anything unrecognized or absent — the only version observed in
    /// practice so far.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "v1" => Self::V1,
            _ => Self::V3,
        }
    }
}

pub struct SimulationResult {
    pub prices: Vec<f64>,
    pub peak_multiplier: f64,
    pub total_ticks: u64,
    pub rugged: bool,
    pub god_candle_tick: Option<u64>,
}

/// Derives a 32-byte ChaCha20 seed from the revealed server seed and game id,
/// matching the documented `serverSeed + "-" + gameId` keying.
pub fn derive_seed(server_seed: &str, game_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(server_seed.as_bytes());
    hasher.update(b"-");
    hasher.update(game_id.as_bytes());
    hasher.finalize().into()
}

/// Re-simulate the full price trajectory for a game from its revealed seed.
pub fn simulate(server_seed: &str, game_id: &str, version: GeneratorVersion) -> SimulationResult {
    let seed = derive_seed(server_seed, game_id);
    let mut rng = ChaCha20Rng::from_seed(seed);

    let mut prices = vec![1.0_f64];
    let mut peak = 1.0_f64;
    let mut god_candle_tick = None;
    let mut rugged = false;
    let mut price = 1.0_f64;

    for tick in 1..=MAX_TICKS {
        let rug_draw: f64 = rng.gen();
        if rug_draw < RUG_PROB {
            rugged = true;
            prices.push(price);
            return SimulationResult {
                prices,
                peak_multiplier: peak,
                total_ticks: tick,
                rugged,
                god_candle_tick,
            };
        }

        let god_draw: f64 = rng.gen();
        if god_draw < GOD_CANDLE_PROB && price <= GOD_CANDLE_PRICE_CAP {
            price *= GOD_CANDLE_MULTIPLIER;
            god_candle_tick = Some(tick);
        } else {
            let big_move_draw: f64 = rng.gen();
            if big_move_draw < BIG_MOVE_PROB {
                let magnitude: f64 = BIG_MOVE_MIN + rng.gen::<f64>() * (BIG_MOVE_MAX - BIG_MOVE_MIN);
                let sign: f64 = if rng.gen::<f64>() < 0.5 { -1.0 } else { 1.0 };
                price = (price * (1.0 + sign * magnitude)).max(0.0);
            } else {
                let drift = DRIFT_MIN + rng.gen::<f64>() * (DRIFT_MAX - DRIFT_MIN);
                let volatility = version.volatility(price);
                let u: f64 = rng.gen();
                let change = drift + volatility * (2.0 * u - 1.0);
                price = (price * (1.0 + change)).max(0.0);
            }
        }

        prices.push(price);
        peak = peak.max(price);
    }

    SimulationResult {
        prices,
        peak_multiplier: peak,
        total_ticks: MAX_TICKS,
        rugged,
        god_candle_tick,
    }
}

/// Outcome of comparing a replayed trajectory against the stored ground
/// truth. `matched` is the conjunction the verifier persists as `prngVerified`.
pub struct ComparisonReport {
    pub peak_match: bool,
    pub ticks_match: bool,
    pub array_match: bool,
    pub divergence_tick: Option<u64>,
}

impl ComparisonReport {
    pub fn matched(&self) -> bool {
        self.peak_match && self.ticks_match && self.array_match
    }
}

/// Compare a simulated trajectory against stored authoritative values.
pub fn compare(sim: &SimulationResult, expected_prices: &[Price], expected_peak: Price, expected_ticks: u64) -> ComparisonReport {
    let ticks_match = sim.total_ticks == expected_ticks;

    let expected_peak_f = expected_peak.to_f64().unwrap_or(f64::NAN);
    let peak_match = (sim.peak_multiplier - expected_peak_f).abs() <= PRICE_TOLERANCE;

    let mut divergence_tick = None;
    let mut array_match = sim.prices.len() == expected_prices.len();
    if array_match {
        for (i, (actual, expected)) in sim.prices.iter().zip(expected_prices.iter()).enumerate() {
            let expected_f = expected.to_f64().unwrap_or(f64::NAN);
            if (actual - expected_f).abs() > PRICE_TOLERANCE {
                array_match = false;
                divergence_tick = Some(i as u64);
                break;
            }
        }
    } else {
        divergence_tick = Some(sim.prices.len().min(expected_prices.len()) as u64);
    }

    ComparisonReport {
        peak_match,
        ticks_match,
        array_match,
        divergence_tick,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_and_game_id_reproduce_identical_trajectory() {
        let a = simulate("abc123", "game-1", GeneratorVersion::V3);
        let b = simulate("abc123", "game-1", GeneratorVersion::V3);
        assert_eq!(a.prices, b.prices);
        assert_eq!(a.total_ticks, b.total_ticks);
        assert_eq!(a.rugged, b.rugged);
    }

    #[test]
    fn different_game_id_changes_the_trajectory() {
        let a = simulate("abc123", "game-1", GeneratorVersion::V3);
        let b = simulate("abc123", "game-2", GeneratorVersion::V3);
        assert_ne!(a.prices, b.prices);
    }

    #[test]
    fn simulation_terminates_within_max_ticks() {
        let sim = simulate("seed", "game-x", GeneratorVersion::V3);
        assert!(sim.total_ticks <= MAX_TICKS);
        assert_eq!(sim.prices.len() as u64, sim.total_ticks + 1);
    }

    #[test]
    fn comparison_matches_identical_trajectory() {
        let sim = simulate("seed-z", "game-z", GeneratorVersion::V3);
        let expected: Vec<Price> = sim.prices.iter().map(|p| Price::try_from(*p).unwrap()).collect();
        let peak = Price::try_from(sim.peak_multiplier).unwrap();
        let report = compare(&sim, &expected, peak, sim.total_ticks);
        assert!(report.matched());
        assert_eq!(report.divergence_tick, None);
    }

    #[test]
    fn comparison_flags_tick_count_mismatch() {
        let sim = simulate("seed-q", "game-q", GeneratorVersion::V3);
        let expected: Vec<Price> = sim.prices.iter().map(|p| Price::try_from(*p).unwrap()).collect();
        let peak = Price::try_from(sim.peak_multiplier).unwrap();
        let report = compare(&sim, &expected, peak, sim.total_ticks + 1);
        assert!(!report.ticks_match);
        assert!(!report.matched());
    }
}
