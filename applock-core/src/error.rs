use thiserror::Error;

/// Error taxonomy for the enforcement engine.
///
/// Detector-internal conditions (missing observation permission, transient
/// storage hiccups) are absorbed and retried inside the watchers and never
/// surface here; everything below is reported synchronously to the caller
/// of the operation that failed.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("pin: incorrect PIN")]
    IncorrectPin,

    #[error("pin: no PIN set - provide a new PIN of at least {min} characters")]
    NeedsNewPin { min: usize },

    #[error("store: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LockError>;
