use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use ferry_protocol::FileIdentity;
use tracing::{debug, info, warn};

use crate::STATE_DIR;
use crate::atomic::{TMP_SUFFIX, atomic_write};
use crate::claim::Claim;
use crate::error::LedgerError;
use crate::record::{ProgressRecord, TransferStatus};

/// Durable store of transfer progress records.
///
/// Mutations of one identity are expected to happen under a [`Claim`];
/// unrelated identities never contend.
#[derive(Debug)]
pub struct ResumeLedger {
    ledger_dir: PathBuf,
    partial_dir: PathBuf,
    held: Mutex<HashSet<String>>,
}

impl ResumeLedger {
    /// Opens (creating if needed) the ledger kept inside `out_dir`.
    ///
    /// Temp files left behind by an interrupted update are removed.
    ///
    /// Claims live in memory, so they only exclude sessions sharing this
    /// value. Two processes must not open the same `out_dir`.
    pub fn open(out_dir: &Path) -> Result<Self, LedgerError> {
        let state = out_dir.join(STATE_DIR);
        let ledger_dir = state.join("ledger");
        let partial_dir = state.join("partial");
        std::fs::create_dir_all(&ledger_dir)?;
        std::fs::create_dir_all(&partial_dir)?;

        let mut swept = 0usize;
        for entry in std::fs::read_dir(&ledger_dir)? {
            let path = entry?.path();
            if path.to_string_lossy().ends_with(TMP_SUFFIX) {
                std::fs::remove_file(&path)?;
                swept += 1;
            }
        }
        if swept > 0 {
            warn!(swept, "removed interrupted ledger updates");
        }

        debug!(dir = %ledger_dir.display(), "resume ledger opened");
        Ok(Self {
            ledger_dir,
            partial_dir,
            held: Mutex::new(HashSet::new()),
        })
    }

    /// Path of the partial data file for `identity`.
    pub fn partial_path(&self, identity: &FileIdentity) -> PathBuf {
        self.partial_dir.join(format!("{}.part", identity.key()))
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.ledger_dir.join(format!("{key}.json"))
    }

    /// Takes the exclusive lease on `identity`.
    ///
    /// The lease is held in this process only; see [`ResumeLedger::open`].
    pub fn claim(self: &Arc<Self>, identity: &FileIdentity) -> Result<Claim, LedgerError> {
        let key = identity.key();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(key.clone()) {
            return Err(LedgerError::Busy(key));
        }
        debug!(key = %key, "ledger claim taken");
        Ok(Claim::new(Arc::clone(self), key))
    }

    pub(crate) fn release(&self, key: &str) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Returns the stored progress for `identity`, if any.
    ///
    /// An unreadable record is reported as absent so the transfer restarts
    /// from zero and overwrites it.
    pub fn lookup(&self, identity: &FileIdentity) -> Result<Option<ProgressRecord>, LedgerError> {
        let key = identity.key();
        let Some(record) = self.read_record(&key)? else {
            return Ok(None);
        };
        if record.identity != *identity {
            warn!(key = %key, "ledger record belongs to a different file, ignoring");
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Creates or overwrites the record for `identity` at offset zero.
    pub fn begin(&self, identity: &FileIdentity) -> Result<ProgressRecord, LedgerError> {
        let record = ProgressRecord::new(identity.clone());
        self.write_record(&record)?;
        info!(file = %identity, "transfer record started");
        Ok(record)
    }

    /// Resets an existing record to offset zero and clears its corrupt flag.
    pub fn restart(&self, identity: &FileIdentity) -> Result<ProgressRecord, LedgerError> {
        let previous = self
            .lookup(identity)?
            .ok_or_else(|| LedgerError::NotFound(identity.key()))?;
        let record = ProgressRecord::new(identity.clone());
        self.write_record(&record)?;
        info!(
            file = %identity,
            discarded = previous.bytes_received,
            corrupt = previous.corrupt,
            "transfer record restarted"
        );
        Ok(record)
    }

    /// Records that `new_bytes_received` bytes are durably on disk.
    ///
    /// Never moves backwards and never past the file size.
    pub fn advance(
        &self,
        identity: &FileIdentity,
        new_bytes_received: u64,
    ) -> Result<ProgressRecord, LedgerError> {
        let key = identity.key();
        let mut record = self
            .lookup(identity)?
            .ok_or_else(|| LedgerError::NotFound(key.clone()))?;

        if record.status != TransferStatus::InProgress || record.corrupt {
            return Err(LedgerError::NotInProgress { key });
        }
        if new_bytes_received < record.bytes_received {
            return Err(LedgerError::NonMonotonic {
                key,
                current: record.bytes_received,
                requested: new_bytes_received,
            });
        }
        if new_bytes_received > identity.size {
            return Err(LedgerError::Overrun {
                key,
                requested: new_bytes_received,
                size: identity.size,
            });
        }

        record.bytes_received = new_bytes_received;
        record.updated_at = Utc::now();
        self.write_record(&record)?;
        Ok(record)
    }

    /// Pins the record at the file size and flags it corrupt.
    pub fn mark_corrupt(&self, identity: &FileIdentity) -> Result<ProgressRecord, LedgerError> {
        let mut record = self
            .lookup(identity)?
            .unwrap_or_else(|| ProgressRecord::new(identity.clone()));
        record.bytes_received = identity.size;
        record.status = TransferStatus::InProgress;
        record.corrupt = true;
        record.updated_at = Utc::now();
        self.write_record(&record)?;
        warn!(file = %identity, "transfer record flagged corrupt");
        Ok(record)
    }

    /// Marks the transfer complete and removes its record.
    ///
    /// Call only after the whole-file digest matched.
    pub fn complete(&self, identity: &FileIdentity) -> Result<ProgressRecord, LedgerError> {
        let key = identity.key();
        let mut record = self
            .lookup(identity)?
            .ok_or_else(|| LedgerError::NotFound(key.clone()))?;
        if record.corrupt {
            return Err(LedgerError::NotInProgress { key });
        }
        record.status = TransferStatus::Complete;
        record.updated_at = Utc::now();

        std::fs::remove_file(self.record_path(&key))?;
        crate::atomic::sync_dir(&self.ledger_dir)?;
        info!(file = %identity, "transfer record completed");
        Ok(record)
    }

    /// Drops records that share `identity.name` but describe another file.
    ///
    /// Their partial files are deleted as well. Returns how many were removed.
    pub fn abandon_stale(&self, identity: &FileIdentity) -> Result<usize, LedgerError> {
        let key = identity.key();
        let mut removed = 0;
        for record in self.records()? {
            if record.identity.name != identity.name || record.key() == key {
                continue;
            }
            let stale_key = record.key();
            if self.is_held(&stale_key) {
                debug!(key = %stale_key, "stale record is in use, leaving it");
                continue;
            }
            remove_if_exists(&self.partial_path(&record.identity))?;
            remove_if_exists(&self.record_path(&stale_key))?;
            warn!(
                name = %record.identity.name,
                stale_size = record.identity.size,
                stale_bytes = record.bytes_received,
                "abandoned stale transfer record"
            );
            removed += 1;
        }
        Ok(removed)
    }

    /// Returns every readable record.
    pub fn records(&self) -> Result<Vec<ProgressRecord>, LedgerError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.ledger_dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(record) = self.read_record(stem)? {
                out.push(record);
            }
        }
        Ok(out)
    }

    fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    fn read_record(&self, key: &str) -> Result<Option<ProgressRecord>, LedgerError> {
        let path = self.record_path(key);
        let data = match std::fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<ProgressRecord>(&data) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable ledger record");
                Ok(None)
            }
        }
    }

    fn write_record(&self, record: &ProgressRecord) -> Result<(), LedgerError> {
        let json = serde_json::to_vec_pretty(record)?;
        atomic_write(&self.record_path(&record.key()), &json)?;
        debug!(
            key = %record.key(),
            bytes_received = record.bytes_received,
            "ledger record persisted"
        );
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, size: u64) -> FileIdentity {
        FileIdentity::new(name, size, [9; 32])
    }

    fn open() -> (tempfile::TempDir, Arc<ResumeLedger>) {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = Arc::new(ResumeLedger::open(tmp.path()).unwrap());
        (tmp, ledger)
    }

    #[test]
    fn lookup_unknown_is_none() {
        let (_tmp, ledger) = open();
        assert!(ledger.lookup(&identity("a.bin", 10)).unwrap().is_none());
    }

    #[test]
    fn begin_then_advance() {
        let (_tmp, ledger) = open();
        let id = identity("a.bin", 300);
        ledger.begin(&id).unwrap();
        ledger.advance(&id, 100).unwrap();
        ledger.advance(&id, 200).unwrap();
        assert_eq!(ledger.lookup(&id).unwrap().unwrap().bytes_received, 200);
    }

    #[test]
    fn advance_is_monotonic() {
        let (_tmp, ledger) = open();
        let id = identity("a.bin", 300);
        ledger.begin(&id).unwrap();
        ledger.advance(&id, 200).unwrap();
        assert!(matches!(
            ledger.advance(&id, 100),
            Err(LedgerError::NonMonotonic { current: 200, requested: 100, .. })
        ));
        assert_eq!(ledger.lookup(&id).unwrap().unwrap().bytes_received, 200);
    }

    #[test]
    fn advance_same_value_is_allowed() {
        let (_tmp, ledger) = open();
        let id = identity("a.bin", 300);
        ledger.begin(&id).unwrap();
        ledger.advance(&id, 100).unwrap();
        ledger.advance(&id, 100).unwrap();
    }

    #[test]
    fn advance_past_size_rejected() {
        let (_tmp, ledger) = open();
        let id = identity("a.bin", 300);
        ledger.begin(&id).unwrap();
        assert!(matches!(
            ledger.advance(&id, 301),
            Err(LedgerError::Overrun { .. })
        ));
    }

    #[test]
    fn advance_without_record_rejected() {
        let (_tmp, ledger) = open();
        assert!(matches!(
            ledger.advance(&identity("a.bin", 300), 10),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn progress_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let id = identity("a.bin", 1000);
        {
            let ledger = ResumeLedger::open(tmp.path()).unwrap();
            ledger.begin(&id).unwrap();
            ledger.advance(&id, 640).unwrap();
        }
        let ledger = ResumeLedger::open(tmp.path()).unwrap();
        let record = ledger.lookup(&id).unwrap().unwrap();
        assert_eq!(record.bytes_received, 640);
        assert!(record.is_resumable());
    }

    #[test]
    fn complete_removes_record() {
        let (_tmp, ledger) = open();
        let id = identity("a.bin", 10);
        ledger.begin(&id).unwrap();
        ledger.advance(&id, 10).unwrap();
        let done = ledger.complete(&id).unwrap();
        assert_eq!(done.status, TransferStatus::Complete);
        assert!(ledger.lookup(&id).unwrap().is_none());
    }

    #[test]
    fn corrupt_record_cannot_advance_or_complete() {
        let (_tmp, ledger) = open();
        let id = identity("a.bin", 10);
        ledger.begin(&id).unwrap();
        let r = ledger.mark_corrupt(&id).unwrap();
        assert_eq!(r.bytes_received, 10);
        assert!(!r.is_resumable());
        assert!(matches!(
            ledger.advance(&id, 10),
            Err(LedgerError::NotInProgress { .. })
        ));
        assert!(ledger.complete(&id).is_err());
        assert!(ledger.lookup(&id).unwrap().unwrap().corrupt);
    }

    #[test]
    fn restart_clears_corrupt_flag() {
        let (_tmp, ledger) = open();
        let id = identity("a.bin", 10);
        ledger.begin(&id).unwrap();
        ledger.mark_corrupt(&id).unwrap();
        let r = ledger.restart(&id).unwrap();
        assert_eq!(r.bytes_received, 0);
        assert!(!r.corrupt);
        assert!(r.is_resumable());
    }

    #[test]
    fn abandon_stale_removes_same_name_other_size() {
        let (_tmp, ledger) = open();
        let old = identity("shared.bin", 500);
        let new = identity("shared.bin", 800);
        let other = identity("other.bin", 500);
        ledger.begin(&old).unwrap();
        ledger.advance(&old, 200).unwrap();
        std::fs::write(ledger.partial_path(&old), vec![0u8; 200]).unwrap();
        ledger.begin(&other).unwrap();

        assert_eq!(ledger.abandon_stale(&new).unwrap(), 1);
        assert!(ledger.lookup(&old).unwrap().is_none());
        assert!(!ledger.partial_path(&old).exists());
        assert!(ledger.lookup(&other).unwrap().is_some());
    }

    #[test]
    fn abandon_stale_keeps_matching_record() {
        let (_tmp, ledger) = open();
        let id = identity("a.bin", 500);
        ledger.begin(&id).unwrap();
        assert_eq!(ledger.abandon_stale(&id).unwrap(), 0);
        assert!(ledger.lookup(&id).unwrap().is_some());
    }

    #[test]
    fn claim_is_exclusive_until_dropped() {
        let (_tmp, ledger) = open();
        let id = identity("a.bin", 500);
        let claim = ledger.claim(&id).unwrap();
        assert_eq!(claim.key(), id.key());
        assert!(matches!(ledger.claim(&id), Err(LedgerError::Busy(_))));
        drop(claim);
        assert!(ledger.claim(&id).is_ok());
    }

    #[test]
    fn claims_on_different_identities_coexist() {
        let (_tmp, ledger) = open();
        let _a = ledger.claim(&identity("a.bin", 1)).unwrap();
        let _b = ledger.claim(&identity("b.bin", 1)).unwrap();
    }

    #[test]
    fn claims_do_not_cross_ledger_values() {
        let (tmp, first) = open();
        let second = Arc::new(ResumeLedger::open(tmp.path()).unwrap());
        let id = identity("a.bin", 500);

        let _held = first.claim(&id).unwrap();
        assert!(matches!(first.claim(&id), Err(LedgerError::Busy(_))));
        // Only a shared Arc excludes; a second open of the same dir does not.
        assert!(second.claim(&id).is_ok());
    }

    #[test]
    fn open_sweeps_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger = ResumeLedger::open(tmp.path()).unwrap();
        let stray = ledger.ledger_dir.join("deadbeef.json.tmp");
        std::fs::write(&stray, b"{ torn").unwrap();
        drop(ledger);

        let _ledger = ResumeLedger::open(tmp.path()).unwrap();
        assert!(!stray.exists());
    }

    #[test]
    fn unreadable_record_treated_as_absent() {
        let (_tmp, ledger) = open();
        let id = identity("a.bin", 10);
        std::fs::write(ledger.record_path(&id.key()), b"not json").unwrap();
        assert!(ledger.lookup(&id).unwrap().is_none());
        ledger.begin(&id).unwrap();
        assert!(ledger.lookup(&id).unwrap().is_some());
    }

    #[test]
    fn records_lists_all() {
        let (_tmp, ledger) = open();
        ledger.begin(&identity("a.bin", 1)).unwrap();
        ledger.begin(&identity("b.bin", 2)).unwrap();
        let mut names: Vec<_> = ledger
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.identity.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.bin", "b.bin"]);
    }

    #[test]
    fn concurrent_advances_on_distinct_identities() {
        use std::thread;

        let (_tmp, ledger) = open();
        let mut handles = vec![];
        for i in 0..8 {
            let ledger = Arc::clone(&ledger);
            handles.push(thread::spawn(move || {
                let id = identity(&format!("file_{i}"), 1000);
                let _claim = ledger.claim(&id).unwrap();
                ledger.begin(&id).unwrap();
                for step in 1..=10 {
                    ledger.advance(&id, step * 100).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        for i in 0..8 {
            let r = ledger
                .lookup(&identity(&format!("file_{i}"), 1000))
                .unwrap()
                .unwrap();
            assert_eq!(r.bytes_received, 1000);
        }
    }
}
