use storyreel_core::error::CoreError;
use storyreel_db::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CoordinatorError {
    /// Whether the error means the addressed job or scene does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Core(CoreError::NotFound { .. }) | Self::Store(StoreError::NotFound { .. })
        )
    }
}
