use crate::types::DbId;

/// Domain errors raised by job and scene rules.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// A job or scene id that does not exist, or a scene that belongs to
    /// another job.
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    /// Rejected input or a lifecycle rule the request would break, such as
    /// an illegal status transition or an empty storyboard.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The request collides with state already recorded, such as a second
    /// stitched result for the same job.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An invariant the service itself broke. Never caused by the caller.
    #[error("Internal error: {0}")]
    Internal(String),
}
