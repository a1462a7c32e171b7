use tokio::sync::mpsc;

/// Progress snapshot emitted after each durable chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes of the file known to be on the receiver.
    pub transferred: u64,
    pub total: u64,
}

impl TransferProgress {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.transferred as f64 / self.total as f64) * 100.0
    }
}

/// Optional progress sink. Updates are dropped when the consumer lags.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProgressSink(Option<mpsc::Sender<TransferProgress>>);

impl ProgressSink {
    pub(crate) fn new(tx: Option<mpsc::Sender<TransferProgress>>) -> Self {
        Self(tx)
    }

    pub(crate) fn report(&self, transferred: u64, total: u64) {
        if let Some(tx) = &self.0 {
            let _ = tx.try_send(TransferProgress { transferred, total });
        }
    }
}
