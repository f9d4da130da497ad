// =============================================================================
// REST surface — health, readiness, metrics, reads over persistence, and the
// single mutating endpoint (PRNG re-verification)
// =============================================================================
//
// Grounded on the teacher's `api/rest.rs` router-construction shape (one
// `Router::new()` with routes layered under CORS and shared state) with the
// bearer-token gate removed: this service's Non-goals explicitly rule out an
// authenticated mutation surface beyond the one verify endpoint, and that
// endpoint needs no credential because it only recomputes a deterministic
// function of already-public data.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::app_state::AppState;
use crate::types::{PrngStatus, PrngTracking, Price};
use crate::verifier;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = build_cors(&state.config.cors_origins);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/readiness", get(readiness))
        .route("/api/metrics", get(metrics))
        .route("/api/connection", get(connection))
        .route("/api/live", get(live))
        .route("/api/snapshots", get(snapshots))
        .route("/api/games", get(list_games))
        .route("/api/games/current", get(current_game))
        .route("/api/games/:id", get(get_game))
        .route("/api/games/:id/quality", get(game_quality))
        .route("/api/games/:id/verification", get(game_verification))
        .route("/api/ohlc", get(ohlc))
        .route("/api/god-candles", get(god_candles))
        .route("/api/prng/tracking", get(prng_tracking))
        .route("/api/prng/verify/:id", post(verify_prng))
        .route("/api/schemas", get(schemas))
        .route("/api/ws/stream", get(crate::api::ws::handler))
        .layer(cors)
        .with_state(state)
}

/// Unlike the teacher's permissive `Any`, origins are read from config. No
/// configured origins means no cross-origin access at all rather than a
/// wide-open default — this service has no bearer-token gate on reads.
fn build_cors(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET, Method::POST]);
    if origins.is_empty() {
        return layer;
    }
    let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

fn internal_error(err: impl std::fmt::Display) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": err.to_string() })))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "time": chrono::Utc::now() }))
}

async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ping = state.store.ping().await;
    let (db_ok, db_ping_ms) = match &db_ping {
        Ok(elapsed) => (true, Some(elapsed.as_millis() as u64)),
        Err(e) => {
            warn!(error = %e, "readiness db ping failed");
            (false, None)
        }
    };

    Json(json!({
        "dbOk": db_ok,
        "upstreamConnected": state.liveness.is_connected(),
        "time": chrono::Utc::now(),
        "dbPingMs": db_ping_ms,
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    let db_ping_ms = state.store.ping().await.ok().map(|d| d.as_millis() as u64);
    let connected = state.liveness.is_connected();

    let mut body = serde_json::to_value(&snapshot).expect("MetricsSnapshot always serializes");
    if let Some(obj) = body.as_object_mut() {
        obj.insert("currentSocketConnected".to_string(), json!(connected));
        obj.insert("socketId".to_string(), json!(connected.then_some("upstream-session")));
        obj.insert("dbPingMs".to_string(), json!(db_ping_ms));
    }
    Json(body)
}

async fn connection(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connected = state.liveness.is_connected();
    Json(json!({
        "connected": connected,
        "socketId": connected.then_some("upstream-session"),
    }))
}

async fn live(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.router.live_state())
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

const DEFAULT_LIMIT: i64 = 50;

async fn snapshots(State(state): State<Arc<AppState>>, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    match state.store.list_snapshots(q.limit.unwrap_or(DEFAULT_LIMIT)).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn list_games(State(state): State<Arc<AppState>>, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    match state.store.list_games(q.limit.unwrap_or(DEFAULT_LIMIT)).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn current_game(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let live = state.router.live_state();
    let Some(game_id) = live.game_id else {
        return Json(json!(null)).into_response();
    };
    match state.store.get_game(&game_id).await {
        Ok(Some(game)) => Json(game).into_response(),
        Ok(None) => Json(json!(null)).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn get_game(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_game(&id).await {
        Ok(Some(game)) => Json(game).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "game not found" }))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn game_quality(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_game(&id).await {
        Ok(Some(game)) => Json(game.quality).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "game not found" }))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn game_verification(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.store.get_game(&id).await {
        Ok(Some(game)) => Json(json!({
            "gameId": game.id,
            "prngVerified": game.prng_verified,
            "verification": game.prng_verification_data,
        }))
        .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({ "error": "game not found" }))).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

#[derive(Deserialize)]
struct OhlcQuery {
    #[serde(rename = "gameId")]
    game_id: String,
    #[allow(dead_code)]
    window: Option<u64>,
    limit: Option<i64>,
}

async fn ohlc(State(state): State<Arc<AppState>>, Query(q): Query<OhlcQuery>) -> impl IntoResponse {
    match state.store.list_ohlc(&q.game_id, q.limit.unwrap_or(DEFAULT_LIMIT)).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

#[derive(Deserialize)]
struct GameIdQuery {
    #[serde(rename = "gameId")]
    game_id: String,
}

async fn god_candles(State(state): State<Arc<AppState>>, Query(q): Query<GameIdQuery>) -> impl IntoResponse {
    match state.store.list_god_candles(&q.game_id).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

async fn prng_tracking(State(state): State<Arc<AppState>>, Query(q): Query<LimitQuery>) -> impl IntoResponse {
    match state.store.list_prng_tracking(q.limit.unwrap_or(DEFAULT_LIMIT)).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => internal_error(e).into_response(),
    }
}

/// The only mutating endpoint. Re-simulates the PRNG trajectory from the
/// revealed seed and compares it against the persisted tick array, updating
/// both `games` and `prng_tracking` with the outcome.
async fn verify_prng(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    let mut game = match state.store.get_game(&id).await {
        Ok(Some(game)) => game,
        Ok(None) => return (StatusCode::NOT_FOUND, Json(json!({ "error": "game not found" }))).into_response(),
        Err(e) => return internal_error(e).into_response(),
    };

    let Some(server_seed) = game.server_seed.clone() else {
        return record_pending(&state, &id, &game, PrngStatus::AwaitingSeed).await.into_response();
    };

    let ticks = match state.store.list_ticks(&id).await {
        Ok(ticks) => ticks,
        Err(e) => return internal_error(e).into_response(),
    };
    if ticks.is_empty() {
        return record_pending(&state, &id, &game, PrngStatus::MissingExpected).await.into_response();
    }

    let prices: Vec<Price> = ticks.iter().map(|t| t.price).collect();
    let expected_peak = game.peak_multiplier.unwrap_or_else(|| prices.iter().copied().max().unwrap_or_default());
    let expected_ticks = game.total_ticks.unwrap_or(prices.len().saturating_sub(1) as u64);
    let generator_version = game.generator_version.unwrap_or(crate::prng::GeneratorVersion::V3);

    match verifier::verify(&server_seed, &id, &prices, expected_peak, expected_ticks, generator_version) {
        Ok((status, data)) => {
            game.prng_verified = Some(data.full_verification);
            game.prng_verification_data = Some(data.clone());
            if let Err(e) = state.store.upsert_game(&game).await {
                warn!(error = %e, "failed to persist verification result on game");
            }

            let tracking = PrngTracking {
                game_id: id.clone(),
                status,
                server_seed_hash: game.server_seed_hash.clone(),
                server_seed: Some(server_seed),
                verification: Some(data.clone()),
                updated_at: chrono::Utc::now(),
            };
            if let Err(e) = state.store.upsert_prng_tracking(&tracking).await {
                warn!(error = %e, "failed to persist prng_tracking record");
            }

            Json(json!({ "gameId": id, "status": status, "verification": data })).into_response()
        }
        Err(e) => (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "gameId": id, "error": e.to_string() }))).into_response(),
    }
}

async fn record_pending(state: &AppState, id: &str, game: &crate::types::Game, status: PrngStatus) -> impl IntoResponse {
    let tracking = PrngTracking {
        game_id: id.to_string(),
        status,
        server_seed_hash: game.server_seed_hash.clone(),
        server_seed: game.server_seed.clone(),
        verification: None,
        updated_at: chrono::Utc::now(),
    };
    if let Err(e) = state.store.upsert_prng_tracking(&tracking).await {
        warn!(error = %e, "failed to persist pending prng_tracking record");
    }
    Json(json!({ "gameId": id, "status": status }))
}

async fn schemas(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.schemas.list())
}
