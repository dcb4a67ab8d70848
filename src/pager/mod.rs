//! Storage page manager.
//!
//! The pager divides the backing file into fixed-size pages and hands them
//! out to the B+tree. Page 0 holds the [`FileHeader`]; every other page is a
//! tree node, an overflow page or a member of the free list.
//!
//! ## Durability
//!
//! Writes never touch the main file directly. Modified pages collect in a
//! dirty set until [`Pager::commit`], which logs them to the write-ahead log,
//! makes the log durable, copies them into the main file and truncates the
//! log. [`Pager::rollback`] simply forgets the dirty set.
//!
//! ## Savepoints
//!
//! [`Pager::begin_op`] / [`Pager::undo_op`] bracket a single mutation so a
//! failure half way through a split or a value rewrite restores every page
//! and the header it touched.

pub mod cache;
pub mod page;

pub use cache::{CacheStats, PageCache};
pub use page::{FileHeader, Page, PageId, PageType, HEADER_PAGE, PAGE_HEADER_SIZE};

use crate::config::Options;
use crate::error::{Error, Result};
use crate::wal::{self, Journal, LogEntry, Recovery};
use bytes::{Buf, BufMut};
use fs2::FileExt;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Points in the commit sequence where a simulated crash can be injected.
///
/// ```text
/// log pages → log header →  commit marker + sync → apply pages → apply header → truncate log
///                        ↑                       ↑           ↑
///                 BeforeLogCommit          AfterLogSync  DuringPageApply
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrashPoint {
    /// The log holds the transaction's pages but no commit marker.
    BeforeLogCommit,
    /// The log is complete and durable; the main file is untouched.
    AfterLogSync,
    /// Half of the pages reached the main file.
    DuringPageApply,
}

/// I/O counters of a pager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagerStats {
    /// Pages loaded from the main file
    pub pages_read: u64,
    /// Pages written to the main file
    pub pages_written: u64,
    /// Transactions committed
    pub commits: u64,
    /// Transactions rolled back
    pub rollbacks: u64,
    /// Page cache counters
    pub cache: CacheStats,
}

struct Savepoint {
    header: FileHeader,
    /// Dirty image of each touched page before the operation (None if clean).
    pages: HashMap<PageId, Option<Page>>,
}

/// Page manager over a single backing file.
pub struct Pager {
    path: PathBuf,
    file: File,
    page_size: usize,
    header: FileHeader,
    committed: FileHeader,
    cache: PageCache,
    dirty: BTreeMap<PageId, Page>,
    journal: Option<Journal>,
    read_only: bool,
    sync: bool,
    max_pages: u32,
    crash_point: Option<CrashPoint>,
    poisoned: Option<String>,
    savepoint: Option<Savepoint>,
    stats: PagerStats,
}

impl Pager {
    /// Opens (or creates) the backing file, takes the file lock and runs
    /// crash recovery before anything is read.
    pub fn open(path: &Path, options: &Options) -> Result<Self> {
        let exists = path.exists();
        if !exists && (options.read_only || !options.create_if_missing) {
            return Err(Error::CannotOpen(format!("{} does not exist", path.display())));
        }
        if exists && options.error_if_exists {
            return Err(Error::Exists(format!("database already exists: {}", path.display())));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(!options.read_only)
            .create(!options.read_only)
            .open(path)
            .map_err(|e| Error::CannotOpen(format!("{}: {}", path.display(), e)))?;

        let locked = if options.read_only {
            FileExt::try_lock_shared(&file)
        } else {
            FileExt::try_lock_exclusive(&file)
        };
        if locked.is_err() {
            return Err(Error::Busy(format!("{} is in use by another handle", path.display())));
        }

        let log_path = wal::log_path(path);
        let recovery = Journal::recover(&log_path)?;
        if recovery.discarded > 0 {
            log::warn!(
                "discarded {} log entries of an unfinished transaction in {:?}",
                recovery.discarded,
                log_path
            );
        }

        let journal = if options.read_only {
            None
        } else {
            if !recovery.committed.is_empty() {
                replay(&file, &recovery)?;
                log::info!(
                    "replayed {} committed transaction(s) from {:?}",
                    recovery.committed.len(),
                    log_path
                );
            }
            let mut journal = Journal::open(&log_path)?;
            if journal.size() > 0 {
                journal.reset(true)?;
            }
            Some(journal)
        };

        let file_len = file.metadata()?.len();
        let header = if file_len == 0 {
            let header = FileHeader::new(options.page_size);
            if !options.read_only {
                write_at(&file, 0, &header.encode())?;
                file.sync_all()?;
                log::info!("created database {:?} (page size {})", path, options.page_size);
            }
            header
        } else {
            let header = read_header(&file)?;
            let needed = header.page_count as u64 * header.page_size as u64;
            if file_len < needed {
                return Err(Error::corrupt(format!(
                    "file holds {} bytes but the header describes {}",
                    file_len, needed
                )));
            }
            header
        };

        let mut pager = Pager {
            path: path.to_path_buf(),
            file,
            page_size: header.page_size as usize,
            header,
            committed: header,
            cache: PageCache::new(options.page_cache_size),
            dirty: BTreeMap::new(),
            journal,
            read_only: options.read_only,
            sync: options.sync,
            max_pages: options.max_pages,
            crash_point: options.crash_point,
            poisoned: None,
            savepoint: None,
            stats: PagerStats::default(),
        };

        // A read-only handle cannot replay into the file, so committed log
        // contents are layered over it in memory instead.
        if options.read_only {
            pager.overlay(recovery)?;
        }

        log::info!(
            "opened {:?}: {} pages, {} records, root {}",
            pager.path,
            pager.header.page_count,
            pager.header.record_count,
            pager.header.root
        );
        Ok(pager)
    }

    fn overlay(&mut self, recovery: Recovery) -> Result<()> {
        for txn in recovery.committed {
            let header = FileHeader::decode(&txn.header)?;
            for (id, image) in txn.pages {
                wal::check_image(id, &image, header.page_size as usize)?;
                self.dirty.insert(id, Page::from_bytes(id, image));
            }
            self.header = header;
            self.committed = header;
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        self.ensure_usable()
    }

    /// Fails with `Aborted` once a simulated crash has poisoned the pager.
    pub(crate) fn ensure_usable(&self) -> Result<()> {
        match &self.poisoned {
            Some(reason) => Err(Error::Aborted(format!("pager unusable: {}", reason))),
            None => Ok(()),
        }
    }

    /// Page size of the file.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when the file was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// The working copy of the header.
    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Root page of the tree, 0 when empty.
    pub fn root(&self) -> PageId {
        self.header.root
    }

    /// Changes the tree root.
    pub fn set_root(&mut self, root: PageId) {
        self.header.root = root;
    }

    /// Number of records stored.
    pub fn record_count(&self) -> u64 {
        self.header.record_count
    }

    /// Adjusts the record counter.
    pub fn adjust_record_count(&mut self, delta: i64) {
        self.header.record_count = self.header.record_count.saturating_add_signed(delta);
    }

    /// True when there are uncommitted changes.
    pub fn has_changes(&self) -> bool {
        !self.dirty.is_empty() || self.header != self.committed
    }

    /// Loads a page.
    pub fn read(&mut self, id: PageId) -> Result<Page> {
        self.ensure_usable()?;
        if id == HEADER_PAGE || id >= self.header.page_count {
            return Err(Error::corrupt(format!("page {} out of range", id)));
        }
        if let Some(page) = self.dirty.get(&id) {
            return Ok(page.clone());
        }
        if let Some(page) = self.cache.get(id) {
            return Ok(page);
        }

        let mut buf = vec![0u8; self.page_size];
        (&self.file).seek(SeekFrom::Start(id as u64 * self.page_size as u64))?;
        (&self.file).read_exact(&mut buf).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                Error::corrupt(format!("page {} lies beyond the end of the file", id))
            }
            _ => Error::Io(e),
        })?;

        let page = Page::from_bytes(id, buf);
        page.verify().map_err(|e| Error::corrupt(format!("page {}: {}", id, e)))?;
        self.stats.pages_read += 1;
        self.cache.insert(page.clone());
        Ok(page)
    }

    /// Records a new image of a page in the dirty set.
    pub fn write(&mut self, mut page: Page) -> Result<()> {
        self.ensure_writable()?;
        let id = page.id();
        if id == HEADER_PAGE || id >= self.header.page_count {
            return Err(Error::corrupt(format!("write to page {} out of range", id)));
        }
        page.seal();
        if let Some(sp) = self.savepoint.as_mut() {
            if !sp.pages.contains_key(&id) {
                sp.pages.insert(id, self.dirty.get(&id).cloned());
            }
        }
        self.dirty.insert(id, page);
        Ok(())
    }

    /// Hands out a page, reusing the free list before growing the file.
    ///
    /// The returned page is blank; it becomes part of the file once written.
    pub fn allocate(&mut self, page_type: PageType) -> Result<Page> {
        self.ensure_writable()?;

        if self.header.free_head != 0 {
            let id = self.header.free_head;
            let free = self.read(id)?;
            if free.page_type()? != PageType::Free || self.header.free_count == 0 {
                return Err(Error::corrupt(format!("free list entry {} is not a free page", id)));
            }
            let mut payload = free.payload();
            self.header.free_head = payload.get_u32_le();
            self.header.free_count -= 1;
            log::trace!("reusing free page {}", id);
            return Ok(Page::new(id, self.page_size, page_type));
        }

        if self.header.page_count >= self.max_pages {
            return Err(Error::Full(format!("page limit of {} reached", self.max_pages)));
        }
        let id = self.header.page_count;
        self.header.page_count += 1;
        log::trace!("allocated page {}", id);
        Ok(Page::new(id, self.page_size, page_type))
    }

    /// Returns a page to the free list.
    pub fn free(&mut self, id: PageId) -> Result<()> {
        self.ensure_writable()?;
        let mut page = Page::new(id, self.page_size, PageType::Free);
        page.payload_mut().put_u32_le(self.header.free_head);
        self.write(page)?;
        self.header.free_head = id;
        self.header.free_count += 1;
        Ok(())
    }

    /// Number of pages on the free list.
    pub fn free_count(&self) -> u32 {
        self.header.free_count
    }

    /// Number of pages in the file, header included.
    pub fn page_count(&self) -> u32 {
        self.header.page_count
    }

    /// Starts tracking changes of a single mutation.
    pub fn begin_op(&mut self) {
        self.savepoint = Some(Savepoint { header: self.header, pages: HashMap::new() });
    }

    /// Keeps the changes of the current mutation.
    pub fn end_op(&mut self) {
        self.savepoint = None;
    }

    /// Reverts everything done since [`Pager::begin_op`].
    pub fn undo_op(&mut self) {
        if let Some(sp) = self.savepoint.take() {
            self.header = sp.header;
            for (id, before) in sp.pages {
                match before {
                    Some(page) => {
                        self.dirty.insert(id, page);
                    }
                    None => {
                        self.dirty.remove(&id);
                    }
                }
            }
        }
    }

    /// Makes every dirty page durable and publishes it to readers.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_writable()?;
        if !self.has_changes() {
            return Ok(());
        }

        let txn = self.committed.last_txn + 1;
        self.header.last_txn = txn;
        let header_image = self.header.encode();

        if let Err(e) = self.log_transaction(txn, &header_image) {
            self.header.last_txn = self.committed.last_txn;
            if self.poisoned.is_none() {
                // Nothing was committed; drop the partial log so the
                // transaction can still be rolled back or retried.
                if let Some(journal) = self.journal.as_mut() {
                    let _ = journal.reset(self.sync);
                }
            }
            return Err(e);
        }

        if let Err(e) = self.apply(&header_image) {
            // The log is complete, so the next open finishes the job.
            self.poisoned.get_or_insert_with(|| format!("commit {} interrupted: {}", txn, e));
            return Err(e);
        }

        let pages = self.dirty.len();
        for (_, page) in std::mem::take(&mut self.dirty) {
            self.cache.insert(page);
        }
        self.committed = self.header;
        self.savepoint = None;
        self.stats.commits += 1;
        log::debug!("committed transaction {} ({} pages)", txn, pages);
        Ok(())
    }

    fn log_transaction(&mut self, txn: u64, header_image: &[u8]) -> Result<()> {
        let crash_point = self.crash_point;
        let sync = self.sync;
        let journal = self.journal.as_mut().ok_or(Error::ReadOnly)?;

        journal.append(&LogEntry::Begin { txn })?;
        for page in self.dirty.values() {
            journal.append(&LogEntry::Page { id: page.id(), image: page.as_bytes().to_vec() })?;
        }
        journal.append(&LogEntry::Header { image: header_image.to_vec() })?;

        if crash_point == Some(CrashPoint::BeforeLogCommit) {
            journal.flush()?;
            return Err(self.crash(CrashPoint::BeforeLogCommit));
        }

        journal.append(&LogEntry::Commit { txn, pages: self.dirty.len() as u32 })?;
        if sync {
            journal.sync()?;
        } else {
            journal.flush()?;
        }

        if crash_point == Some(CrashPoint::AfterLogSync) {
            return Err(self.crash(CrashPoint::AfterLogSync));
        }
        Ok(())
    }

    fn apply(&mut self, header_image: &[u8]) -> Result<()> {
        let torn = self.crash_point == Some(CrashPoint::DuringPageApply);
        let limit = if torn { self.dirty.len() / 2 } else { self.dirty.len() };
        for page in self.dirty.values().take(limit) {
            write_at(&self.file, page.id() as u64 * self.page_size as u64, page.as_bytes())?;
            self.stats.pages_written += 1;
        }
        if torn {
            return Err(self.crash(CrashPoint::DuringPageApply));
        }
        write_at(&self.file, 0, header_image)?;
        if self.sync {
            self.file.sync_all()?;
        }

        let sync = self.sync;
        if let Some(journal) = self.journal.as_mut() {
            journal.reset(sync)?;
        }
        Ok(())
    }

    fn crash(&mut self, point: CrashPoint) -> Error {
        log::warn!("simulated crash at {:?}", point);
        self.poisoned = Some(format!("simulated crash at {:?}", point));
        Error::Aborted(format!("simulated crash at {:?}", point))
    }

    /// Forgets every uncommitted change.
    pub fn rollback(&mut self) {
        let discarded = self.dirty.len();
        self.dirty.clear();
        self.header = self.committed;
        self.savepoint = None;
        self.stats.rollbacks += 1;
        log::debug!("rolled back {} dirty pages", discarded);
    }

    /// Resizes the page cache.
    pub fn set_cache_capacity(&mut self, pages: usize) {
        self.cache.resize(pages);
    }

    /// True once a failed commit left the pager unusable until reopened.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// I/O counters.
    pub fn stats(&self) -> PagerStats {
        PagerStats { cache: self.cache.stats(), ..self.stats.clone() }
    }
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("path", &self.path)
            .field("page_size", &self.page_size)
            .field("header", &self.header)
            .field("dirty", &self.dirty.len())
            .field("read_only", &self.read_only)
            .finish()
    }
}

fn read_header(file: &File) -> Result<FileHeader> {
    let mut buf = vec![0u8; page::FILE_HEADER_LEN];
    let mut reader = file;
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => Error::corrupt("file too short for a header"),
        _ => Error::Io(e),
    })?;
    FileHeader::decode(&buf)
}

fn write_at(file: &File, offset: u64, data: &[u8]) -> Result<()> {
    let mut writer = file;
    writer.seek(SeekFrom::Start(offset))?;
    writer.write_all(data)?;
    Ok(())
}

fn replay(file: &File, recovery: &Recovery) -> Result<()> {
    for txn in &recovery.committed {
        let header = FileHeader::decode(&txn.header)?;
        let page_size = header.page_size as usize;
        for (id, image) in &txn.pages {
            wal::check_image(*id, image, page_size)?;
            write_at(file, *id as u64 * page_size as u64, image)?;
        }
        write_at(file, 0, &txn.header)?;
        log::debug!("replayed transaction {} ({} pages)", txn.txn, txn.pages.len());
    }
    file.sync_all()?;
    Ok(())
}
