// =============================================================================
// Typed errors per subsystem — anyhow::Result is reserved for main.rs and task
// boundaries; everything below the boundary returns one of these.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("failed to connect to upstream: {0}")]
    Connect(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("upstream stream ended unexpectedly")]
    StreamClosed,

    #[error("websocket error: {0}")]
    Ws(#[source] tokio_tungstenite::tungstenite::Error),

    #[error("max reconnect attempts ({0}) reached")]
    MaxReconnectsReached(u32),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("unknown schema key: {0}")]
    UnknownSchema(String),

    #[error("schema compilation failed for {key}: {source}")]
    Compile {
        key: String,
        #[source]
        source: Box<jsonschema::ValidationError<'static>>,
    },

    #[error("payload failed validation against {schema}: {reason}")]
    Failed { schema: String, reason: String },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store call to {collection} exceeded its deadline")]
    Timeout { collection: &'static str },

    #[error("mongo error on {collection}: {source}")]
    Mongo {
        collection: &'static str,
        #[source]
        source: mongodb::error::Error,
    },

    #[error("index/TTL provisioning failed on {collection}: {source}")]
    Provisioning {
        collection: &'static str,
        #[source]
        source: mongodb::error::Error,
    },
}

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("game {0} has no revealed server seed yet")]
    SeedNotRevealed(String),

    #[error("game {0} has no expected tick array to compare against")]
    MissingExpectedTicks(String),

    #[error("simulation for game {0} produced zero ticks")]
    EmptySimulation(String),
}
