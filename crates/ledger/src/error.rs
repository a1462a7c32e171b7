/// Errors produced by the resume ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no progress record for {0}")]
    NotFound(String),

    #[error("record {key} is not in progress")]
    NotInProgress { key: String },

    #[error("progress for {key} cannot go backwards ({current} -> {requested})")]
    NonMonotonic {
        key: String,
        current: u64,
        requested: u64,
    },

    #[error("progress for {key} exceeds file size ({requested} > {size})")]
    Overrun { key: String, requested: u64, size: u64 },

    #[error("transfer {0} is already in progress in another session")]
    Busy(String),
}
