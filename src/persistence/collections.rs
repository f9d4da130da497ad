// =============================================================================
// Collection names and index/TTL definitions
// =============================================================================

use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use mongodb::IndexModel;

pub const GAME_STATE_SNAPSHOTS: &str = "game_state_snapshots";
pub const TRADES: &str = "trades";
pub const GAMES: &str = "games";
pub const EVENTS: &str = "events";
pub const CONNECTION_EVENTS: &str = "connection_events";
pub const PRNG_TRACKING: &str = "prng_tracking";
pub const GOD_CANDLES: &str = "god_candles";
pub const GAME_TICKS: &str = "game_ticks";
pub const GAME_INDICES: &str = "game_indices";
pub const SIDE_BETS: &str = "side_bets";
pub const META: &str = "meta";
pub const STATUS_CHECKS: &str = "status_checks";

const TEN_DAYS_SECS: u32 = 10 * 24 * 3600;
const THIRTY_DAYS_SECS: u32 = 30 * 24 * 3600;

/// One `(collection, indexes)` entry, applied idempotently at startup via
/// `create_indexes` (Mongo no-ops on an already-present, identical index).
pub fn index_plan() -> Vec<(&'static str, Vec<IndexModel>)> {
    vec![
        (
            GAME_STATE_SNAPSHOTS,
            vec![
                IndexModel::builder().keys(doc! { "gameId": 1, "tickCount": 1 }).build(),
                IndexModel::builder()
                    .keys(doc! { "createdAt": 1 })
                    .options(IndexOptions::builder().expire_after(Some(std::time::Duration::from_secs(TEN_DAYS_SECS as u64))).build())
                    .build(),
            ],
        ),
        (
            TRADES,
            vec![
                IndexModel::builder()
                    .keys(doc! { "eventId": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                IndexModel::builder().keys(doc! { "gameId": 1, "tickIndex": 1 }).build(),
            ],
        ),
        (
            GAMES,
            vec![
                IndexModel::builder()
                    .keys(doc! { "id": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                IndexModel::builder().keys(doc! { "phase": 1 }).build(),
                IndexModel::builder().keys(doc! { "hasGodCandle": 1 }).build(),
                IndexModel::builder().keys(doc! { "prngVerified": 1 }).build(),
                IndexModel::builder().keys(doc! { "startTime": 1 }).build(),
                IndexModel::builder().keys(doc! { "endTime": 1 }).build(),
                IndexModel::builder().keys(doc! { "rugTick": 1 }).build(),
                IndexModel::builder().keys(doc! { "endPrice": 1 }).build(),
                IndexModel::builder().keys(doc! { "peakMultiplier": 1 }).build(),
                IndexModel::builder().keys(doc! { "totalTicks": 1 }).build(),
            ],
        ),
        (
            EVENTS,
            vec![IndexModel::builder()
                .keys(doc! { "type": 1, "createdAt": 1 })
                .options(IndexOptions::builder().expire_after(Some(std::time::Duration::from_secs(THIRTY_DAYS_SECS as u64))).build())
                .build()],
        ),
        (
            CONNECTION_EVENTS,
            vec![IndexModel::builder()
                .keys(doc! { "eventType": 1, "createdAt": 1 })
                .options(IndexOptions::builder().expire_after(Some(std::time::Duration::from_secs(THIRTY_DAYS_SECS as u64))).build())
                .build()],
        ),
        (
            PRNG_TRACKING,
            vec![IndexModel::builder()
                .keys(doc! { "gameId": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build()],
        ),
        (
            GOD_CANDLES,
            vec![
                IndexModel::builder()
                    .keys(doc! { "gameId": 1, "tickIndex": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
                IndexModel::builder().keys(doc! { "createdAt": 1 }).build(),
                IndexModel::builder().keys(doc! { "underCap": 1 }).build(),
            ],
        ),
        (
            GAME_TICKS,
            vec![IndexModel::builder()
                .keys(doc! { "gameId": 1, "tick": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build()],
        ),
        (
            GAME_INDICES,
            vec![IndexModel::builder()
                .keys(doc! { "gameId": 1, "index": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build()],
        ),
        (
            SIDE_BETS,
            vec![
                IndexModel::builder().keys(doc! { "gameId": 1, "createdAt": -1 }).build(),
                IndexModel::builder().keys(doc! { "gameId": 1, "startTick": 1 }).build(),
            ],
        ),
        (
            META,
            vec![IndexModel::builder()
                .keys(doc! { "key": 1 })
                .options(IndexOptions::builder().unique(true).build())
                .build()],
        ),
        (STATUS_CHECKS, vec![IndexModel::builder().keys(doc! { "timestamp": -1 }).build()]),
    ]
}
