// =============================================================================
// Central application state — ties the subsystems together for the API layer
// =============================================================================
//
// Unlike the teacher's `AppState`, there is no mutable runtime config, no
// engine-internal snapshot to build by hand: REST handlers read straight
// from the store and the in-memory singletons (`live_state`, `Metrics`).
// AppState's only job is holding the `Arc`s every handler needs.

use std::sync::Arc;

use crate::broadcaster::Broadcaster;
use crate::config::ServiceConfig;
use crate::metrics::Metrics;
use crate::persistence::{Store, WorkerPool};
use crate::router::Router;
use crate::schema::SchemaRegistry;
use crate::upstream::Liveness;

pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub schemas: Arc<SchemaRegistry>,
    pub metrics: Arc<Metrics>,
    pub router: Arc<Router>,
    pub broadcaster: Arc<Broadcaster>,
    pub store: Arc<Store>,
    pub persistence: Arc<WorkerPool>,
    pub liveness: Arc<Liveness>,
}
