//! Write-ahead log of page images.
//!
//! A commit appends the new image of every page the transaction touched,
//! followed by the new file header and a commit marker, and makes the log
//! durable before a single byte of the main file changes. After the pages
//! reach the main file the log is truncated.
//!
//! ## Entry sequence of one transaction
//!
//! ```text
//! Begin { txn } → Page { id, image }* → Header { image } → Commit { txn, pages }
//! ```
//!
//! ## Recovery
//!
//! On open, every transaction that reached its commit marker is replayed;
//! a trailing transaction without one is discarded. Replaying a page image
//! twice is harmless, so a crash during replay is handled by the next open.

pub mod reader;
pub mod record;
pub mod writer;

pub use reader::LogReader;
pub use record::{Fragment, FragmentKind};
pub use writer::LogWriter;

use crate::error::{Error, Result};
use crate::pager::page::PageId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One logical log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogEntry {
    /// Start of a transaction.
    Begin {
        /// Transaction id
        txn: u64,
    },
    /// New image of a page.
    Page {
        /// Page number
        id: PageId,
        /// Full page image
        image: Vec<u8>,
    },
    /// New image of the file header page.
    Header {
        /// Full header page image
        image: Vec<u8>,
    },
    /// The transaction is complete and may be replayed.
    Commit {
        /// Transaction id
        txn: u64,
        /// Number of page entries written for the transaction
        pages: u32,
    },
}

impl LogEntry {
    /// Serializes the entry.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserializes an entry.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// A transaction found complete in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedTxn {
    /// Transaction id
    pub txn: u64,
    /// Header page image
    pub header: Vec<u8>,
    /// Page images in log order
    pub pages: Vec<(PageId, Vec<u8>)>,
}

/// Outcome of scanning a log.
#[derive(Debug, Default)]
pub struct Recovery {
    /// Complete transactions, oldest first.
    pub committed: Vec<CommittedTxn>,
    /// Number of entries that belonged to no complete transaction.
    pub discarded: usize,
}

/// Name of the log file that accompanies a database file.
pub fn log_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(".wal");
    PathBuf::from(name)
}

/// Append side of the log, owned by the pager.
pub struct Journal {
    writer: LogWriter,
}

impl Journal {
    /// Open or create a log file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self { writer: LogWriter::new(path)? })
    }

    /// Appends an entry.
    pub fn append(&mut self, entry: &LogEntry) -> Result<()> {
        self.writer.append(&entry.encode()?)
    }

    /// Hands buffered entries to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    /// Makes every appended entry durable.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.sync()
    }

    /// Empties the log once its transactions are in the main file.
    pub fn reset(&mut self, sync: bool) -> Result<()> {
        self.writer.truncate(sync)
    }

    /// Current size in bytes.
    pub fn size(&self) -> u64 {
        self.writer.file_size()
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// Scans a log and groups its entries into complete transactions.
    pub fn recover<P: AsRef<Path>>(path: P) -> Result<Recovery> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Recovery::default());
        }

        let raw = LogReader::new(path)?.recover_all()?;
        let mut recovery = Recovery::default();
        let mut pending: Option<CommittedTxn> = None;
        let mut pending_entries = 0usize;

        for bytes in raw {
            let entry = match LogEntry::decode(&bytes) {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("undecodable log entry, stopping recovery scan: {}", e);
                    break;
                }
            };
            pending_entries += 1;

            match entry {
                LogEntry::Begin { txn } => {
                    if pending.is_some() {
                        recovery.discarded += pending_entries - 1;
                        pending_entries = 1;
                    }
                    pending = Some(CommittedTxn { txn, header: Vec::new(), pages: Vec::new() });
                }
                LogEntry::Page { id, image } => match pending.as_mut() {
                    Some(txn) => txn.pages.push((id, image)),
                    None => {
                        recovery.discarded += 1;
                        pending_entries = 0;
                    }
                },
                LogEntry::Header { image } => match pending.as_mut() {
                    Some(txn) => txn.header = image,
                    None => {
                        recovery.discarded += 1;
                        pending_entries = 0;
                    }
                },
                LogEntry::Commit { txn, pages } => {
                    match pending.take() {
                        Some(done)
                            if done.txn == txn
                                && done.pages.len() == pages as usize
                                && !done.header.is_empty() =>
                        {
                            recovery.committed.push(done);
                        }
                        _ => {
                            log::warn!("commit marker for transaction {} does not match", txn);
                            recovery.discarded += pending_entries;
                        }
                    }
                    pending_entries = 0;
                }
            }
        }

        recovery.discarded += pending_entries;
        Ok(recovery)
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("path", &self.path()).field("size", &self.size()).finish()
    }
}

/// Checks that a recovered page image has the expected size.
pub(crate) fn check_image(id: PageId, image: &[u8], page_size: usize) -> Result<()> {
    if image.len() != page_size {
        return Err(Error::corrupt(format!(
            "logged image of page {} has {} bytes, expected {}",
            id,
            image.len(),
            page_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_txn(journal: &mut Journal, txn: u64, pages: &[(PageId, u8)], commit: bool) {
        journal.append(&LogEntry::Begin { txn }).unwrap();
        for (id, fill) in pages {
            journal.append(&LogEntry::Page { id: *id, image: vec![*fill; 64] }).unwrap();
        }
        journal.append(&LogEntry::Header { image: vec![0xEE; 64] }).unwrap();
        if commit {
            journal.append(&LogEntry::Commit { txn, pages: pages.len() as u32 }).unwrap();
        }
        journal.sync().unwrap();
    }

    #[test]
    fn test_log_path() {
        assert_eq!(log_path(Path::new("/tmp/data.db")), PathBuf::from("/tmp/data.db.wal"));
    }

    #[test]
    fn test_recover_committed_transaction() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.wal");
        {
            let mut journal = Journal::open(&path).unwrap();
            write_txn(&mut journal, 7, &[(1, 0xA1), (2, 0xA2)], true);
        }

        let recovery = Journal::recover(&path).unwrap();
        assert_eq!(recovery.discarded, 0);
        assert_eq!(recovery.committed.len(), 1);
        let txn = &recovery.committed[0];
        assert_eq!(txn.txn, 7);
        assert_eq!(txn.pages, vec![(1, vec![0xA1; 64]), (2, vec![0xA2; 64])]);
        assert_eq!(txn.header, vec![0xEE; 64]);
    }

    #[test]
    fn test_recover_discards_incomplete_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.wal");
        {
            let mut journal = Journal::open(&path).unwrap();
            write_txn(&mut journal, 1, &[(1, 1)], true);
            write_txn(&mut journal, 2, &[(1, 2), (3, 3)], false);
        }

        let recovery = Journal::recover(&path).unwrap();
        assert_eq!(recovery.committed.len(), 1);
        assert_eq!(recovery.committed[0].txn, 1);
        // Begin + two pages + header of the unfinished transaction.
        assert_eq!(recovery.discarded, 4);
    }

    #[test]
    fn test_recover_missing_and_reset_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.wal");
        assert!(Journal::recover(&path).unwrap().committed.is_empty());

        let mut journal = Journal::open(&path).unwrap();
        write_txn(&mut journal, 3, &[(4, 4)], true);
        assert!(journal.size() > 0);
        journal.reset(true).unwrap();
        assert_eq!(journal.size(), 0);
        assert!(Journal::recover(&path).unwrap().committed.is_empty());
    }

    #[test]
    fn test_mismatched_commit_marker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.wal");
        {
            let mut journal = Journal::open(&path).unwrap();
            journal.append(&LogEntry::Begin { txn: 5 }).unwrap();
            journal.append(&LogEntry::Page { id: 1, image: vec![0; 64] }).unwrap();
            journal.append(&LogEntry::Header { image: vec![0; 64] }).unwrap();
            journal.append(&LogEntry::Commit { txn: 5, pages: 3 }).unwrap();
            journal.sync().unwrap();
        }

        let recovery = Journal::recover(&path).unwrap();
        assert!(recovery.committed.is_empty());
        assert_eq!(recovery.discarded, 4);
    }
}
