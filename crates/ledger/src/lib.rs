//! Resume ledger: the receiver's durable record of partial transfers.
//!
//! One JSON record per [`FileIdentity`](ferry_protocol::FileIdentity) lives
//! under `<out_dir>/.ferry/ledger/<key>.json`, the partial data under
//! `<out_dir>/.ferry/partial/<key>.part`. Records are replaced with a
//! write-temp, fsync, rename sequence so a crash never leaves a torn record.
//!
//! Ordering contract with the writer of the partial file: bytes are flushed
//! to disk first, the record is advanced second. The file may run ahead of
//! the ledger, never the reverse.

mod atomic;
mod claim;
mod error;
mod ledger;
mod record;

pub use claim::Claim;
pub use error::LedgerError;
pub use ledger::ResumeLedger;
pub use record::{ProgressRecord, TransferStatus};

/// Name of the hidden state directory inside the output directory.
pub const STATE_DIR: &str = ".ferry";
