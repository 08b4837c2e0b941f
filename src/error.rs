use thiserror::Error;
use uuid::Uuid;

/// Failures raised by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("contact not found: {0}")]
    ContactNotFound(Uuid),

    #[error("company not found: {0}")]
    CompanyNotFound(Uuid),

    #[error("merge not found: {0}")]
    MergeNotFound(Uuid),

    #[error("{0} cannot be merged into itself")]
    SelfMerge(Uuid),

    #[error("a merge of {duplicate} into {primary} is already pending")]
    AlreadyQueued { primary: Uuid, duplicate: Uuid },

    #[error("malformed stored value in {field}: {reason}")]
    Corrupt { field: &'static str, reason: String },

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("{0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt {
            field: "merge_selections",
            reason: e.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
