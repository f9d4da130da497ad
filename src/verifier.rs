// =============================================================================
// PRNG verification service — wraps the generator with precondition checks
// and status bookkeeping for `games` / `prng_tracking`.
// =============================================================================

use rust_decimal::prelude::ToPrimitive;

use crate::errors::VerifierError;
use crate::prng::{self, GeneratorVersion};
use crate::types::{Price, PrngStatus, PrngVerificationData};

/// Run a full verification pass for a completed game.
///
/// `expected_prices` and `expected_ticks` come from the stored `game_ticks`
/// collection (or an equivalent in-memory snapshot during tests); `server_seed`
/// must already have been revealed on the `games` record.
pub fn verify(
    server_seed: &str,
    game_id: &str,
    expected_prices: &[Price],
    expected_peak: Price,
    expected_ticks: u64,
    generator_version: GeneratorVersion,
) -> Result<(PrngStatus, PrngVerificationData), VerifierError> {
    if server_seed.is_empty() {
        return Err(VerifierError::SeedNotRevealed(game_id.to_string()));
    }
    if expected_prices.is_empty() {
        return Err(VerifierError::MissingExpectedTicks(game_id.to_string()));
    }

    let sim = prng::simulate(server_seed, game_id, generator_version);
    if sim.prices.is_empty() {
        return Err(VerifierError::EmptySimulation(game_id.to_string()));
    }

    let report = prng::compare(&sim, expected_prices, expected_peak, expected_ticks);
    let full_verification = report.matched();

    let data = PrngVerificationData {
        full_verification,
        peak_match: report.peak_match,
        ticks_match: report.ticks_match,
        array_match: report.array_match,
        divergence_tick: report.divergence_tick,
        expected_peak: Some(expected_peak),
        actual_peak: Price::try_from(sim.peak_multiplier).ok(),
    };

    let status = if full_verification {
        PrngStatus::Verified
    } else {
        PrngStatus::Failed
    };

    Ok((status, data))
}

/// Status to record before any verification attempt has been made, based on
/// whether the preconditions are currently satisfied.
pub fn pending_status(server_seed: Option<&str>, has_expected_ticks: bool) -> PrngStatus {
    match (server_seed, has_expected_ticks) {
        (None, _) => PrngStatus::AwaitingSeed,
        (Some(_), false) => PrngStatus::MissingExpected,
        (Some(_), true) => PrngStatus::Complete,
    }
}

#[allow(dead_code)]
fn to_f64(p: Price) -> f64 {
    p.to_f64().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices_for(seed: &str, game_id: &str, version: GeneratorVersion) -> (Vec<Price>, Price, u64) {
        let sim = prng::simulate(seed, game_id, version);
        let prices: Vec<Price> = sim.prices.iter().map(|p| Price::try_from(*p).unwrap()).collect();
        let peak = Price::try_from(sim.peak_multiplier).unwrap();
        (prices, peak, sim.total_ticks)
    }

    #[test]
    fn verifies_matching_trajectory() {
        let (prices, peak, ticks) = prices_for("revealed-seed", "game-42", GeneratorVersion::V3);
        let (status, data) = verify("revealed-seed", "game-42", &prices, peak, ticks, GeneratorVersion::V3).unwrap();
        assert_eq!(status, PrngStatus::Verified);
        assert!(data.full_verification);
    }

    #[test]
    fn verifies_matching_trajectory_v1() {
        let (prices, peak, ticks) = prices_for("revealed-seed", "game-42", GeneratorVersion::V1);
        let (status, data) = verify("revealed-seed", "game-42", &prices, peak, ticks, GeneratorVersion::V1).unwrap();
        assert_eq!(status, PrngStatus::Verified);
        assert!(data.full_verification);
    }

    #[test]
    fn fails_on_diverging_trajectory() {
        let (mut prices, peak, ticks) = prices_for("revealed-seed", "game-7", GeneratorVersion::V3);
        if let Some(first) = prices.first_mut() {
            *first += Price::new(1, 0);
        }
        let (status, data) = verify("revealed-seed", "game-7", &prices, peak, ticks, GeneratorVersion::V3).unwrap();
        assert_eq!(status, PrngStatus::Failed);
        assert!(!data.full_verification);
    }

    #[test]
    fn rejects_unrevealed_seed() {
        let err = verify("", "game-1", &[Price::new(1, 0)], Price::new(1, 0), 1, GeneratorVersion::V3).unwrap_err();
        assert!(matches!(err, VerifierError::SeedNotRevealed(_)));
    }

    #[test]
    fn rejects_missing_expected_ticks() {
        let err = verify("seed", "game-1", &[], Price::new(1, 0), 0, GeneratorVersion::V3).unwrap_err();
        assert!(matches!(err, VerifierError::MissingExpectedTicks(_)));
    }

    #[test]
    fn pending_status_tracks_preconditions() {
        assert_eq!(pending_status(None, false), PrngStatus::AwaitingSeed);
        assert_eq!(pending_status(Some("s"), false), PrngStatus::MissingExpected);
        assert_eq!(pending_status(Some("s"), true), PrngStatus::Complete);
    }
}
