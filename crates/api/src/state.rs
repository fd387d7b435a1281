use std::sync::Arc;

use storyreel_pipeline::ArtifactCache;
use storyreel_worker::Coordinator;

/// Shared application state available to all handlers via `State<AppState>`.
///
/// Cheap to clone: everything inside is behind an `Arc` or already shares
/// its internals.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    /// Artifacts handed to external providers by URL.
    pub cache: Arc<ArtifactCache>,
    /// Present when jobs are persisted in PostgreSQL.
    pub pool: Option<storyreel_db::DbPool>,
}
