// =============================================================================
// Persistence layer — pooled store handle, idempotent upserts, bounded
// worker pool, and index/TTL provisioning at startup.
// =============================================================================
//
// Grounded on the teacher's resource-acquisition pattern (a single pooled
// client handed out via `Arc`, background tasks doing the actual I/O) even
// though the teacher talks to an exchange REST/WS API rather than a store.

mod collections;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use mongodb::bson::{doc, to_bson, Bson};
use mongodb::options::{FindOptions, ReplaceOptions};
use mongodb::{Client, Database};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::config::ServiceConfig;
use crate::errors::PersistenceError;
use crate::prng::GeneratorVersion;
use crate::types::{
    ConnectionEvent, EventRecord, Game, GameIndex, GamePhase, GameStateSnapshot, GameTick, GodCandle, LiveState, PhaseTransition, Price,
    PrngTracking, QualityFlags, SideBet, Trade,
};

pub use collections::*;

/// Thin wrapper over the pooled Mongo client. Every call goes through
/// `with_deadline` so a slow store never stalls the router indefinitely.
pub struct Store {
    db: Database,
    call_deadline: Duration,
}

impl Store {
    pub async fn connect(config: &ServiceConfig) -> Result<Self, PersistenceError> {
        let client = Client::with_uri_str(&config.mongo_url)
            .await
            .map_err(|source| PersistenceError::Mongo { collection: "client", source })?;
        let db = client.database(&config.db_name);
        Ok(Self {
            db,
            call_deadline: config.store_call_deadline,
        })
    }

    async fn with_deadline<T, F>(&self, collection: &'static str, fut: F) -> Result<T, PersistenceError>
    where
        F: std::future::Future<Output = Result<T, mongodb::error::Error>>,
    {
        match timeout(self.call_deadline, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(source)) => Err(PersistenceError::Mongo { collection, source }),
            Err(_) => Err(PersistenceError::Timeout { collection }),
        }
    }

    /// Create every required index, matching on an already-identical index
    /// (Mongo no-ops rather than erroring).
    pub async fn provision_indexes(&self) -> Result<(), PersistenceError> {
        for (name, indexes) in collections::index_plan() {
            let coll = self.db.collection::<mongodb::bson::Document>(name);
            coll.create_indexes(indexes, None)
                .await
                .map_err(|source| PersistenceError::Provisioning { collection: name, source })?;
        }
        Ok(())
    }

    pub async fn upsert_trade(&self, trade: &Trade) -> Result<(), PersistenceError> {
        let doc = to_bson(trade).expect("Trade always serializes");
        let coll = self.db.collection::<Bson>(TRADES);
        self.with_deadline(TRADES, async {
            coll.replace_one(doc! { "eventId": &trade.event_id }, doc, ReplaceOptions::builder().upsert(true).build())
                .await
                .map(|_| ())
        })
        .await
    }

    pub async fn upsert_tick(&self, tick: &GameTick) -> Result<(), PersistenceError> {
        let doc = to_bson(tick).expect("GameTick always serializes");
        let coll = self.db.collection::<Bson>(GAME_TICKS);
        self.with_deadline(GAME_TICKS, async {
            coll.replace_one(
                doc! { "gameId": &tick.game_id, "tick": tick.tick as i64 },
                doc,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    pub async fn upsert_ohlc(&self, index: &GameIndex) -> Result<(), PersistenceError> {
        let doc = to_bson(index).expect("GameIndex always serializes");
        let coll = self.db.collection::<Bson>(GAME_INDICES);
        self.with_deadline(GAME_INDICES, async {
            coll.replace_one(
                doc! { "gameId": &index.game_id, "index": index.index as i64 },
                doc,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    pub async fn upsert_god_candle(&self, candle: &GodCandle) -> Result<(), PersistenceError> {
        let doc = to_bson(candle).expect("GodCandle always serializes");
        let coll = self.db.collection::<Bson>(GOD_CANDLES);
        self.with_deadline(GOD_CANDLES, async {
            coll.replace_one(
                doc! { "gameId": &candle.game_id, "tickIndex": candle.tick_index as i64 },
                doc,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    /// Never dropped under overflow — see `WorkerPool`'s policy.
    pub async fn upsert_game(&self, game: &Game) -> Result<(), PersistenceError> {
        let doc = to_bson(game).expect("Game always serializes");
        let coll = self.db.collection::<Bson>(GAMES);
        self.with_deadline(GAMES, async {
            coll.replace_one(doc! { "id": &game.id }, doc, ReplaceOptions::builder().upsert(true).build())
                .await
                .map(|_| ())
        })
        .await
    }

    /// Never dropped under overflow — see `WorkerPool`'s policy.
    pub async fn upsert_prng_tracking(&self, tracking: &PrngTracking) -> Result<(), PersistenceError> {
        let doc = to_bson(tracking).expect("PrngTracking always serializes");
        let coll = self.db.collection::<Bson>(PRNG_TRACKING);
        self.with_deadline(PRNG_TRACKING, async {
            coll.replace_one(
                doc! { "gameId": &tracking.game_id },
                doc,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await
            .map(|_| ())
        })
        .await
    }

    /// Targeted patch for a phase transition on an already-created `games`
    /// document — never dropped on overflow, see `WorkerPool`'s policy.
    pub async fn set_game_phase(&self, game_id: &str, phase: GamePhase, at: DateTime<Utc>) -> Result<(), PersistenceError> {
        let phase_bson = to_bson(&phase).expect("GamePhase always serializes");
        let transition = to_bson(&PhaseTransition { phase, at }).expect("PhaseTransition always serializes");
        let coll = self.db.collection::<Bson>(GAMES);
        self.with_deadline(GAMES, async {
            coll.update_one(
                doc! { "id": game_id },
                doc! {
                    "$set": { "phase": phase_bson },
                    "$push": { "history": transition },
                    "$inc": { "version": 1_i64 },
                },
                None,
            )
            .await
            .map(|_| ())
        })
        .await
    }

    /// Targeted patch applied once a game's `gameHistory` entry arrives,
    /// filling in the fields only known at the end of the game. Never
    /// dropped on overflow, see `WorkerPool`'s policy.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete_game(
        &self,
        game_id: &str,
        end_time: DateTime<Utc>,
        rug_tick: u64,
        end_price: Price,
        peak_multiplier: Price,
        total_ticks: u64,
        server_seed: Option<&str>,
        server_seed_hash: Option<&str>,
        generator_version: Option<GeneratorVersion>,
    ) -> Result<(), PersistenceError> {
        let mut set_doc = doc! {
            "phase": to_bson(&GamePhase::Completed).expect("GamePhase always serializes"),
            "end_time": Bson::DateTime(mongodb::bson::DateTime::from_chrono(end_time)),
            "rug_tick": rug_tick as i64,
            "end_price": to_bson(&end_price).expect("Price always serializes"),
            "peak_multiplier": to_bson(&peak_multiplier).expect("Price always serializes"),
            "total_ticks": total_ticks as i64,
        };
        if let Some(seed) = server_seed {
            set_doc.insert("server_seed", seed);
        }
        if let Some(hash) = server_seed_hash {
            set_doc.insert("server_seed_hash", hash);
        }
        if let Some(version) = generator_version {
            set_doc.insert("generator_version", to_bson(&version).expect("GeneratorVersion always serializes"));
        }

        let transition = to_bson(&PhaseTransition {
            phase: GamePhase::Completed,
            at: end_time,
        })
        .expect("PhaseTransition always serializes");

        let coll = self.db.collection::<Bson>(GAMES);
        self.with_deadline(GAMES, async {
            coll.update_one(
                doc! { "id": game_id },
                doc! {
                    "$set": set_doc,
                    "$push": { "history": transition },
                    "$inc": { "version": 1_i64 },
                },
                None,
            )
            .await
            .map(|_| ())
        })
        .await
    }

    /// Never dropped under overflow — see `WorkerPool`'s policy.
    pub async fn set_god_candle_flag(&self, game_id: &str) -> Result<(), PersistenceError> {
        let coll = self.db.collection::<Bson>(GAMES);
        self.with_deadline(GAMES, async {
            coll.update_one(doc! { "id": game_id }, doc! { "$set": { "has_god_candle": true } }, None)
                .await
                .map(|_| ())
        })
        .await
    }

    /// Syncs the tracker's in-memory quality flags onto the persisted `games`
    /// document, so `GET /api/games/:id/quality` reflects live state.
    pub async fn update_game_quality(&self, game_id: &str, quality: &QualityFlags) -> Result<(), PersistenceError> {
        let doc = to_bson(quality).expect("QualityFlags always serializes");
        let coll = self.db.collection::<Bson>(GAMES);
        self.with_deadline(GAMES, async {
            coll.update_one(doc! { "id": game_id }, doc! { "$set": { "quality": doc } }, None)
                .await
                .map(|_| ())
        })
        .await
    }

    pub async fn append_event(&self, event: &EventRecord) -> Result<(), PersistenceError> {
        let doc = to_bson(event).expect("EventRecord always serializes");
        let coll = self.db.collection::<Bson>(EVENTS);
        self.with_deadline(EVENTS, async { coll.insert_one(doc, None).await.map(|_| ()) }).await
    }

    pub async fn append_connection_event(&self, event: &ConnectionEvent) -> Result<(), PersistenceError> {
        let doc = to_bson(event).expect("ConnectionEvent always serializes");
        let coll = self.db.collection::<Bson>(CONNECTION_EVENTS);
        self.with_deadline(CONNECTION_EVENTS, async { coll.insert_one(doc, None).await.map(|_| ()) })
            .await
    }

    pub async fn append_side_bet(&self, bet: &SideBet) -> Result<(), PersistenceError> {
        let doc = to_bson(bet).expect("SideBet always serializes");
        let coll = self.db.collection::<Bson>(SIDE_BETS);
        self.with_deadline(SIDE_BETS, async { coll.insert_one(doc, None).await.map(|_| ()) }).await
    }

    pub async fn append_snapshot(&self, snapshot: &GameStateSnapshot) -> Result<(), PersistenceError> {
        let doc = to_bson(snapshot).expect("GameStateSnapshot always serializes");
        let coll = self.db.collection::<Bson>(GAME_STATE_SNAPSHOTS);
        self.with_deadline(GAME_STATE_SNAPSHOTS, async { coll.insert_one(doc, None).await.map(|_| ()) })
            .await
    }

    pub async fn set_live_state(&self, state: &LiveState) -> Result<(), PersistenceError> {
        let mut doc = to_bson(state).expect("LiveState always serializes");
        if let Bson::Document(d) = &mut doc {
            d.insert("key", "live_state");
        }
        let coll = self.db.collection::<Bson>(META);
        self.with_deadline(META, async {
            coll.replace_one(doc! { "key": "live_state" }, doc, ReplaceOptions::builder().upsert(true).build())
                .await
                .map(|_| ())
        })
        .await
    }

    /// Writes a `status_checks` row and returns the round-trip latency used
    /// as `dbPingMs`, independent of any driver-internal ping.
    pub async fn ping(&self) -> Result<Duration, PersistenceError> {
        let started = Instant::now();
        let coll = self.db.collection::<mongodb::bson::Document>(STATUS_CHECKS);
        self.with_deadline(STATUS_CHECKS, async {
            coll.insert_one(doc! { "timestamp": Bson::DateTime(mongodb::bson::DateTime::from_chrono(Utc::now())) }, None)
                .await
                .map(|_| ())
        })
        .await?;
        Ok(started.elapsed())
    }

    pub async fn list_games(&self, limit: i64) -> Result<Vec<Game>, PersistenceError> {
        self.find_many(GAMES, doc! {}, Some(doc! { "startTime": -1 }), Some(limit)).await
    }

    pub async fn get_game(&self, id: &str) -> Result<Option<Game>, PersistenceError> {
        let coll = self.db.collection::<Game>(GAMES);
        self.with_deadline(GAMES, async { coll.find_one(doc! { "id": id }, None).await }).await
    }

    pub async fn list_ticks(&self, game_id: &str) -> Result<Vec<GameTick>, PersistenceError> {
        self.find_many(GAME_TICKS, doc! { "gameId": game_id }, Some(doc! { "tick": 1 }), None).await
    }

    pub async fn list_ohlc(&self, game_id: &str, limit: i64) -> Result<Vec<GameIndex>, PersistenceError> {
        self.find_many(GAME_INDICES, doc! { "gameId": game_id }, Some(doc! { "index": 1 }), Some(limit))
            .await
    }

    pub async fn list_god_candles(&self, game_id: &str) -> Result<Vec<GodCandle>, PersistenceError> {
        self.find_many(GOD_CANDLES, doc! { "gameId": game_id }, Some(doc! { "tickIndex": 1 }), None)
            .await
    }

    pub async fn list_prng_tracking(&self, limit: i64) -> Result<Vec<PrngTracking>, PersistenceError> {
        self.find_many(PRNG_TRACKING, doc! {}, Some(doc! { "updatedAt": -1 }), Some(limit)).await
    }

    pub async fn list_snapshots(&self, limit: i64) -> Result<Vec<GameStateSnapshot>, PersistenceError> {
        self.find_many(GAME_STATE_SNAPSHOTS, doc! {}, Some(doc! { "createdAt": -1 }), Some(limit))
            .await
    }

    async fn find_many<T>(
        &self,
        collection: &'static str,
        filter: mongodb::bson::Document,
        sort: Option<mongodb::bson::Document>,
        limit: Option<i64>,
    ) -> Result<Vec<T>, PersistenceError>
    where
        T: serde::de::DeserializeOwned + Unpin + Send + Sync,
    {
        use futures_util::TryStreamExt;

        let coll = self.db.collection::<T>(collection);
        let mut opts = FindOptions::default();
        opts.sort = sort;
        opts.limit = limit;

        self.with_deadline(collection, async {
            let mut cursor = coll.find(filter, opts).await?;
            let mut out = Vec::new();
            while let Some(item) = cursor.try_next().await? {
                out.push(item);
            }
            Ok(out)
        })
        .await
    }
}

/// Work item dispatched to the bounded persistence worker pool. `critical`
/// jobs (games, prng_tracking, and the targeted `games` patches) are never
/// dropped on overflow.
pub enum Job {
    Trade(Trade),
    Tick(GameTick),
    Ohlc(GameIndex),
    GodCandle(GodCandle),
    Game(Game),
    PrngTracking(PrngTracking),
    Event(EventRecord),
    ConnectionEvent(ConnectionEvent),
    SideBet(SideBet),
    Snapshot(GameStateSnapshot),
    LiveState(LiveState),
    PhaseUpdate {
        game_id: String,
        phase: GamePhase,
        at: DateTime<Utc>,
    },
    GameCompletion {
        game_id: String,
        end_time: DateTime<Utc>,
        rug_tick: u64,
        end_price: Price,
        peak_multiplier: Price,
        total_ticks: u64,
        server_seed: Option<String>,
        server_seed_hash: Option<String>,
        generator_version: Option<GeneratorVersion>,
    },
    GodCandleFlag(String),
    QualityUpdate {
        game_id: String,
        quality: QualityFlags,
    },
}

impl Job {
    fn is_critical(&self) -> bool {
        matches!(
            self,
            Job::Game(_)
                | Job::PrngTracking(_)
                | Job::PhaseUpdate { .. }
                | Job::GameCompletion { .. }
                | Job::GodCandleFlag(_)
                | Job::QualityUpdate { .. }
        )
    }
}

/// Bounded worker pool keeping store latency off the router's hot path.
/// Non-critical jobs are dropped on overflow (counted by the caller);
/// critical jobs block briefly then are retried once before giving up.
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
}

impl WorkerPool {
    pub fn spawn(store: Arc<Store>, workers: usize, queue_depth: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue_depth);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        for worker_id in 0..workers.max(1) {
            let store = store.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match job {
                        Some(job) => run_job(&store, job, worker_id).await,
                        None => break,
                    }
                }
            });
        }

        Self { sender: tx }
    }

    /// Enqueue a job, applying the drop-non-critical-first overflow policy.
    pub async fn submit(&self, job: Job) -> bool {
        if job.is_critical() {
            match self.sender.try_send(job) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(job)) => {
                    warn!("persistence queue full, blocking briefly for critical write");
                    matches!(timeout(Duration::from_millis(250), self.sender.send(job)).await, Ok(Ok(())))
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        } else {
            match self.sender.try_send(job) {
                Ok(()) => true,
                Err(_) => false,
            }
        }
    }
}

async fn run_job(store: &Store, job: Job, worker_id: usize) {
    let result = match &job {
        Job::Trade(t) => store.upsert_trade(t).await,
        Job::Tick(t) => store.upsert_tick(t).await,
        Job::Ohlc(o) => store.upsert_ohlc(o).await,
        Job::GodCandle(g) => store.upsert_god_candle(g).await,
        Job::Game(g) => store.upsert_game(g).await,
        Job::PrngTracking(p) => store.upsert_prng_tracking(p).await,
        Job::Event(e) => store.append_event(e).await,
        Job::ConnectionEvent(e) => store.append_connection_event(e).await,
        Job::SideBet(s) => store.append_side_bet(s).await,
        Job::Snapshot(s) => store.append_snapshot(s).await,
        Job::LiveState(l) => store.set_live_state(l).await,
        Job::PhaseUpdate { game_id, phase, at } => store.set_game_phase(game_id, *phase, *at).await,
        Job::GameCompletion {
            game_id,
            end_time,
            rug_tick,
            end_price,
            peak_multiplier,
            total_ticks,
            server_seed,
            server_seed_hash,
            generator_version,
        } => {
            store
                .complete_game(
                    game_id,
                    *end_time,
                    *rug_tick,
                    *end_price,
                    *peak_multiplier,
                    *total_ticks,
                    server_seed.as_deref(),
                    server_seed_hash.as_deref(),
                    *generator_version,
                )
                .await
        }
        Job::GodCandleFlag(game_id) => store.set_god_candle_flag(game_id).await,
        Job::QualityUpdate { game_id, quality } => store.update_game_quality(game_id, quality).await,
    };

    if let Err(e) = result {
        error!(worker_id, error = %e, "persistence job failed");
    }
}
