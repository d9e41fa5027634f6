use thiserror::Error;

use crate::supabase::SupabaseError;

/// Storage failures as seen by repositories, independent of the backing store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// A uniqueness constraint or concurrent write rejected the change.
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// The store could not be reached or timed out; the operation may be retried.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Stored record could not be decoded: {0}")]
    Corrupt(String),

    #[error("Storage rejected the request: {0}")]
    Rejected(String),
}

impl RepositoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RepositoryError::Unavailable(_))
    }
}

impl From<anyhow::Error> for RepositoryError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<SupabaseError>() {
            Some(SupabaseError::Conflict(msg)) => RepositoryError::Conflict(msg.clone()),
            Some(SupabaseError::Transport(msg)) => RepositoryError::Unavailable(msg.clone()),
            Some(SupabaseError::Api { status, message }) if *status >= 500 => {
                RepositoryError::Unavailable(format!("{}: {}", status, message))
            }
            Some(SupabaseError::Decode(msg)) => RepositoryError::Corrupt(msg.clone()),
            Some(other) => RepositoryError::Rejected(other.to_string()),
            None => match err.downcast_ref::<serde_json::Error>() {
                Some(json_err) => RepositoryError::Corrupt(json_err.to_string()),
                None => RepositoryError::Rejected(err.to_string()),
            },
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Corrupt(err.to_string())
    }
}
