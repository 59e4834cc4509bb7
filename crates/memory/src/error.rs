/// Error kinds surfaced by the memory service.
///
/// Each variant maps to a stable `kind` string that batch tool results carry
/// back to the caller next to the human-readable message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("embedding provider rejected request: {0}")]
    ProviderInvalid(String),
    #[error("index storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("cancelled")]
    Cancelled,
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable kind tag used in per-item batch results.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFound",
            Self::AlreadyExists(_) => "AlreadyExists",
            Self::InvalidArgument(_) => "InvalidArgument",
            Self::Conflict(_) => "Conflict",
            Self::ProviderUnavailable(_) => "ProviderUnavailable",
            Self::ProviderInvalid(_) => "ProviderInvalid",
            Self::StorageUnavailable(_) => "StorageUnavailable",
            Self::Cancelled => "Cancelled",
            Self::Internal(_) | Self::Io(_) => "Internal",
        }
    }

    /// Transient errors are retried by the sync service and the embedding
    /// retry helper; everything else fails fast.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::StorageUnavailable(_)
        )
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".into()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::StorageUnavailable(e.to_string())
            },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(Error::NotFound("x".into()).kind(), "NotFound");
        assert_eq!(Error::InvalidArgument("x".into()).kind(), "InvalidArgument");
        assert_eq!(Error::Cancelled.kind(), "Cancelled");
        assert_eq!(Error::Internal("x".into()).kind(), "Internal");
    }

    #[test]
    fn transient_classification() {
        assert!(Error::ProviderUnavailable("timeout".into()).is_transient());
        assert!(Error::StorageUnavailable("pool".into()).is_transient());
        assert!(!Error::NotFound("x".into()).is_transient());
        assert!(!Error::ProviderInvalid("bad key".into()).is_transient());
    }
}
