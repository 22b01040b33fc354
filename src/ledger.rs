//! Append-only certificate ledger in OpenSSL `index.txt` format.
//!
//! Every issued certificate is recorded as one tab-separated line keyed by
//! serial number. The file doubles as the cross-process mutex: an issuance
//! attempt holds an exclusive, non-blocking advisory lock on it for the
//! duration of a single check-then-append, so uniqueness holds even when
//! several processes share the same ledger path.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{BusyError, DatabaseError, IssueError};

/// index.txt separator; do not change!
const SEP: char = '\t';
/// Serial number column index
const SN_INDEX: usize = 3;

/// One valid-status ledger line for a freshly issued certificate.
///
/// The remaining three columns of the on-disk format are fixed at issuance
/// time: status `V`, an empty revocation timestamp, and the `unknown`
/// filename placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    /// Expiry timestamp in compact `YYMMDDHHMMSSZ` form, century stripped
    pub expires: String,
    /// Serial number as lowercase hex, no prefix
    pub serial: String,
    /// Subject common name, recorded as `/CN=<name>`
    pub common_name: String,
}

impl LedgerRecord {
    pub fn new(expires: String, serial: String, common_name: String) -> Self {
        Self {
            expires,
            serial,
            common_name,
        }
    }

    /// Render the six tab-separated fields of one index line.
    fn to_line(&self) -> String {
        format!(
            "V{sep}{}{sep}{sep}{}{sep}unknown{sep}/CN={}",
            self.expires,
            self.serial,
            self.common_name,
            sep = SEP
        )
    }
}

/// Handle on the ledger file backing a certificate authority.
///
/// The store itself is stateless; all mutation goes through a [`LockGuard`]
/// obtained from [`begin_issuance`](Self::begin_issuance).
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the ledger for one issuance attempt.
    ///
    /// Acquires an exclusive advisory lock without blocking. If another
    /// issuance currently holds the lock this fails immediately with
    /// [`IssueError::Busy`]; callers wanting eventual success retry later.
    /// The file is created on first use.
    ///
    /// # Errors
    /// * [`IssueError::Busy`] - the ledger is locked by another attempt
    /// * [`IssueError::Database`] - the ledger file could not be opened
    pub fn begin_issuance(&self) -> Result<LockGuard, IssueError> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .map_err(DatabaseError::Io)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(LockGuard {
                file,
                path: self.path.clone(),
            }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(BusyError {
                path: self.path.clone(),
            }
            .into()),
            Err(e) => Err(DatabaseError::Io(e).into()),
        }
    }

    /// Number of records currently in the ledger.
    ///
    /// A ledger that does not exist yet is empty.
    pub fn record_count(&self) -> Result<usize, DatabaseError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        Ok(BufReader::new(file).lines().count())
    }
}

/// Exclusive hold on the ledger for the duration of one issuance attempt.
///
/// The advisory lock rides on the open file descriptor, so dropping the
/// guard is the single release path on every exit: commit success, serial
/// collision, or write failure.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Verify serial uniqueness, then append exactly one record.
    ///
    /// Scans all existing records for the candidate serial; on a hit the
    /// commit fails without writing. Otherwise the new line is appended and
    /// flushed to disk before success is reported. The guard is consumed
    /// either way.
    ///
    /// # Errors
    /// * [`DatabaseError::SerialCollision`] - the serial is already recorded
    /// * [`DatabaseError::Io`] - scan, append, or flush failed
    pub fn commit(mut self, record: &LedgerRecord) -> Result<(), DatabaseError> {
        if self.serial_in_use(&record.serial)? {
            return Err(DatabaseError::SerialCollision {
                serial: record.serial.clone(),
            });
        }

        writeln!(self.file, "{}", record.to_line())?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Check whether a serial number was already recorded.
    fn serial_in_use(&self, serial: &str) -> Result<bool, DatabaseError> {
        let reader = BufReader::new(File::open(&self.path)?);
        for line in reader.lines() {
            let line = line?;
            if line.split(SEP).nth(SN_INDEX) == Some(serial) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Releasing a lock we hold cannot meaningfully fail; the descriptor
        // is closed right after either way.
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, LedgerStore) {
        let dir = TempDir::new().unwrap();
        let store = LedgerStore::new(dir.path().join("index.txt"));
        (dir, store)
    }

    fn sample_record(serial: &str, cn: &str) -> LedgerRecord {
        LedgerRecord::new("260904120000Z".to_string(), serial.to_string(), cn.to_string())
    }

    #[test]
    fn test_record_line_format() {
        let record = sample_record("deadbeef01", "alice");
        assert_eq!(
            record.to_line(),
            "V\t260904120000Z\t\tdeadbeef01\tunknown\t/CN=alice"
        );

        let line = record.to_line();
        let fields: Vec<&str> = line.split('\t').collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0], "V");
        assert_eq!(fields[2], "");
        assert_eq!(fields[4], "unknown");
    }

    #[test]
    fn test_commit_appends_one_record() {
        let (_dir, store) = test_store();

        let guard = store.begin_issuance().unwrap();
        guard.commit(&sample_record("abc123", "alice")).unwrap();

        assert_eq!(store.record_count().unwrap(), 1);
        let contents = std::fs::read_to_string(store.path()).unwrap();
        assert!(contents.ends_with("/CN=alice\n"));
        assert!(contents.starts_with("V\t"));
    }

    #[test]
    fn test_existing_records_untouched() {
        let (_dir, store) = test_store();

        let guard = store.begin_issuance().unwrap();
        guard.commit(&sample_record("aaa", "alice")).unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        let guard = store.begin_issuance().unwrap();
        guard.commit(&sample_record("bbb", "bob")).unwrap();

        let after = std::fs::read_to_string(store.path()).unwrap();
        assert!(after.starts_with(&before));
        assert_eq!(store.record_count().unwrap(), 2);
    }

    #[test]
    fn test_serial_collision_rejected_without_write() {
        let (_dir, store) = test_store();

        let guard = store.begin_issuance().unwrap();
        guard.commit(&sample_record("abc123", "alice")).unwrap();

        let guard = store.begin_issuance().unwrap();
        let err = guard.commit(&sample_record("abc123", "bob")).unwrap_err();
        assert!(matches!(err, DatabaseError::SerialCollision { ref serial } if serial == "abc123"));

        // the losing attempt must not have written anything
        assert_eq!(store.record_count().unwrap(), 1);
    }

    #[test]
    fn test_second_acquire_fails_busy() {
        let (_dir, store) = test_store();

        let _guard = store.begin_issuance().unwrap();
        let err = store.begin_issuance().unwrap_err();
        assert!(matches!(err, IssueError::Busy(_)));
    }

    #[test]
    fn test_guard_released_on_every_path() {
        let (_dir, store) = test_store();

        // released after success
        let guard = store.begin_issuance().unwrap();
        guard.commit(&sample_record("aaa", "alice")).unwrap();
        let guard = store.begin_issuance().unwrap();

        // released after collision
        let _ = guard.commit(&sample_record("aaa", "alice")).unwrap_err();
        let guard = store.begin_issuance().unwrap();

        // released after a plain drop
        drop(guard);
        store.begin_issuance().unwrap();
    }

    #[test]
    fn test_concurrent_acquire_exactly_one_wins() {
        let (_dir, store) = test_store();
        let store = Arc::new(store);
        let start = Arc::new(Barrier::new(2));
        let settled = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = Arc::clone(&store);
                let start = Arc::clone(&start);
                let settled = Arc::clone(&settled);
                thread::spawn(move || {
                    start.wait();
                    let result = store.begin_issuance();
                    // hold the guard until both attempts have settled
                    settled.wait();
                    result.is_ok()
                })
            })
            .collect();

        let wins: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(wins.into_iter().filter(|won| *won).count(), 1);
    }

    #[test]
    fn test_loser_succeeds_after_retry() {
        let (_dir, store) = test_store();

        let winner = store.begin_issuance().unwrap();
        assert!(matches!(store.begin_issuance(), Err(IssueError::Busy(_))));

        winner.commit(&sample_record("aaa", "alice")).unwrap();

        // retried attempt goes through once the winner finished
        let guard = store.begin_issuance().unwrap();
        guard.commit(&sample_record("bbb", "bob")).unwrap();
        assert_eq!(store.record_count().unwrap(), 2);
    }

    #[test]
    fn test_record_count_of_missing_ledger() {
        let (_dir, store) = test_store();
        assert_eq!(store.record_count().unwrap(), 0);
    }
}
