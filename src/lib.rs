//! # unqdb - An Embedded Transactional Key/Value Engine
//!
//! unqdb stores byte-string keys and values in a single file, keeps them
//! consistent across crashes, and can run small scripts against them.
//!
//! ## Architecture
//!
//! - **Pager**: fixed-size checksummed pages, a free list and an LRU cache
//! - **B+tree**: ordered index over the pager, with overflow chains for
//!   large values
//! - **WAL**: redo log of page images; a commit is durable once its log
//!   record is, and recovery replays it on the next open
//! - **Cursor**: ordered traversal with exact and nearest-key seeks
//! - **Script VM**: Lua 5.4 scripts with a `db` table bound to the store
//!
//! The special path `:mem:` opens a transient in-memory hash engine
//! instead of a file.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use unqdb::{Database, Options};
//!
//! # fn main() -> Result<(), unqdb::Error> {
//! let db = Database::open("./data.db", Options::default())?;
//!
//! // Each call commits on its own...
//! db.store(b"key1", b"value1")?;
//! db.append(b"key1", b"+more")?;
//! assert_eq!(db.fetch(b"key1")?, b"value1+more".to_vec());
//!
//! // ...unless an explicit transaction is open.
//! db.begin()?;
//! db.store(b"key2", b"value2")?;
//! db.delete(b"key1")?;
//! db.rollback()?;
//! assert!(db.contains(b"key1")?);
//!
//! db.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod btree;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod library;
pub mod memory;
pub mod pager;
pub mod script;
pub mod transaction;
pub mod wal;

// Re-exports
pub use config::{CompressionType, DbConfig, Options};
pub use cursor::Cursor;
pub use error::{Error, ErrorCode, Result};
pub use library::{copyright, ident, is_threadsafe, signature, version, Library, LibraryConfig};
pub use pager::{CrashPoint, PagerStats};
pub use script::{ScriptValue, Vm};

use btree::BTreeEngine;
use engine::KvEngine;
use memory::MemEngine;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use transaction::TxnState;

/// Path that selects the in-memory engine.
pub const MEM_PATH: &str = ":mem:";

struct DbState {
    engine: Box<dyn KvEngine>,
    txn: TxnState,
    auto_commit: bool,
    read_only: bool,
    script_timeout: Option<Duration>,
    closed: bool,
}

impl DbState {
    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        Ok(())
    }
}

/// The main database handle.
///
/// All access goes through one internal lock, so a `Database` can be shared
/// between threads (`&Database` or `Arc<Database>`). Cursors and compiled
/// scripts borrow it and cannot outlive it.
///
/// An explicit transaction belongs to the thread that opened it. While it is
/// open, reads and writes from other threads wait for it to finish, so they
/// never see its uncommitted changes and never get swept into it.
///
/// Dropping the handle commits any open transaction and releases the file
/// lock; [`Database::close`] does the same but reports errors.
pub struct Database {
    path: PathBuf,
    state: Mutex<DbState>,
    /// Signalled whenever a transaction finishes.
    txn_done: Condvar,
    library: &'static Library,
}

impl Database {
    /// Opens a database at the specified path with the given options.
    ///
    /// The file is created if missing (unless `create_if_missing` is off)
    /// and recovered from its log if a previous process crashed mid-commit.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The options are invalid (`InvalidParam`)
    /// - The file cannot be created or opened (`CannotOpen`)
    /// - Another handle holds the file (`Busy`)
    /// - The file is damaged (`Corrupt`)
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use unqdb::{Database, Options};
    ///
    /// # fn main() -> Result<(), unqdb::Error> {
    /// let db = Database::open("./my_database.db", Options::default().sync(false))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref().to_path_buf();
        let library = Library::global();

        let engine: Box<dyn KvEngine> = if path.as_os_str() == MEM_PATH {
            Box::new(MemEngine::new())
        } else {
            Box::new(BTreeEngine::open(&path, &options)?)
        };
        library.register();

        log::info!("opened {:?} with the {} engine", path, engine.name());
        Ok(Self {
            path,
            state: Mutex::new(DbState {
                engine,
                txn: TxnState::new(),
                auto_commit: options.auto_commit,
                read_only: options.read_only,
                script_timeout: options.script_timeout,
                closed: false,
            }),
            txn_done: Condvar::new(),
            library,
        })
    }

    /// Opens a database with the process-wide defaults of [`Library`].
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(path, Library::global().default_options())
    }

    /// Opens a transient in-memory database.
    pub fn memory() -> Result<Self> {
        Self::open(MEM_PATH, Options::default())
    }

    /// Path the database was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the storage engine in use (`btree` or `mem`).
    pub fn engine_name(&self) -> &'static str {
        self.state.lock().engine.name()
    }

    /// Whether the engine supports nearest-key seeks.
    pub fn supports_range_search(&self) -> bool {
        self.state.lock().engine.supports_range_search()
    }

    /// Whether the database was opened read-only.
    pub fn is_read_only(&self) -> bool {
        self.state.lock().read_only
    }

    /// Takes the database lock once no other thread holds a transaction.
    fn acquire(&self) -> MutexGuard<'_, DbState> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while state.txn.is_foreign_to(me) {
            log::trace!("waiting for another thread's transaction on {:?}", self.path);
            self.txn_done.wait(&mut state);
        }
        state
    }

    /// Runs a read against the engine under the database lock.
    pub(crate) fn with_engine<T>(&self, f: impl FnOnce(&mut dyn KvEngine) -> Result<T>) -> Result<T> {
        let mut state = self.acquire();
        f(state.engine.as_mut())
    }

    /// Runs a mutation under the database lock, committing it on its own
    /// when auto-commit applies.
    pub(crate) fn mutate<T>(&self, f: impl FnOnce(&mut dyn KvEngine) -> Result<T>) -> Result<T> {
        let mut state = self.acquire();
        state.ensure_writable()?;
        let out = f(state.engine.as_mut())?;

        if state.auto_commit && !state.txn.is_active() {
            if let Err(e) = state.engine.commit() {
                let _ = state.engine.rollback();
                return Err(e);
            }
        }
        Ok(out)
    }

    /// Inserts or overwrites a record.
    ///
    /// # Errors
    ///
    /// `ReadOnly` on a read-only database, `LimitReached` for an oversized
    /// key, `Full` when the file may not grow. A failed store changes
    /// nothing, even inside a transaction.
    pub fn store(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.mutate(|engine| engine.put(key, value))
    }

    /// Appends `value` to an existing record, or stores it if absent.
    ///
    /// The read-modify-write is atomic with respect to other callers.
    pub fn append(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.mutate(|engine| engine.append(key, value))
    }

    /// Returns a copy of the value stored under `key`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key is absent.
    pub fn fetch(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.fetch_optional(key)?.ok_or_else(|| {
            Error::not_found(format!("key {:?}", String::from_utf8_lossy(key)))
        })
    }

    /// Returns the value stored under `key`, or `None`.
    pub fn fetch_optional(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_engine(|engine| engine.get(key))
    }

    /// Whether a record exists.
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.fetch_optional(key)?.is_some())
    }

    /// Number of records.
    pub fn len(&self) -> u64 {
        self.acquire().engine.len()
    }

    /// Whether the database holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes a record.
    ///
    /// # Errors
    ///
    /// `NotFound` if the key is absent.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.mutate(|engine| {
            if engine.delete(key)? {
                Ok(())
            } else {
                Err(Error::not_found(format!("key {:?}", String::from_utf8_lossy(key))))
            }
        })
    }

    /// Opens an explicit transaction.
    ///
    /// # Errors
    ///
    /// `LockError` if one is already open (by any thread), `ReadOnly` on a
    /// read-only database.
    pub fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_writable()?;
        Self::start(&mut state)
    }

    /// Opens the transaction wrapping a script run.
    ///
    /// Waits out another thread's transaction. Returns `false` when there is
    /// nothing to open: the database is read-only, or the calling thread
    /// already has a transaction the script's writes will join.
    pub(crate) fn begin_implicit(&self) -> Result<bool> {
        let mut state = self.acquire();
        if state.read_only || state.txn.is_active() {
            return Ok(false);
        }
        Self::start(&mut state)?;
        Ok(true)
    }

    fn start(state: &mut DbState) -> Result<()> {
        let id = state.txn.begin(thread::current().id())?;
        if let Err(e) = state.engine.begin() {
            state.txn.abandon();
            return Err(e);
        }
        log::debug!("transaction {} started", id);
        Ok(())
    }

    /// Commits the open transaction.
    ///
    /// If the commit fails the transaction is rolled back.
    ///
    /// # Errors
    ///
    /// `LockError` if no transaction is open or it belongs to another
    /// thread.
    pub fn commit(&self) -> Result<()> {
        let mut state = self.state.lock();
        let id = state.txn.finish(thread::current().id())?;
        let result = state.engine.commit();
        if let Err(e) = &result {
            log::warn!("commit of transaction {} failed, rolling back: {}", id, e);
            let _ = state.engine.rollback();
        } else {
            log::debug!("transaction {} committed", id);
        }
        drop(state);
        self.txn_done.notify_all();
        result
    }

    /// Discards the open transaction.
    ///
    /// # Errors
    ///
    /// `LockError` if no transaction is open or it belongs to another
    /// thread.
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.state.lock();
        let id = state.txn.finish(thread::current().id())?;
        let result = state.engine.rollback();
        log::debug!("transaction {} rolled back", id);
        drop(state);
        self.txn_done.notify_all();
        result
    }

    /// Whether an explicit transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.state.lock().txn.is_active()
    }

    /// Creates a cursor over this database.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self)
    }

    /// Compiles a Lua script for execution against this database.
    ///
    /// # Errors
    ///
    /// `Compile` with the diagnostic and its line when the source does not
    /// parse.
    pub fn compile(&self, source: &str) -> Result<Vm<'_>> {
        Vm::compile(self, source)
    }

    /// Timeout applied to script executions.
    pub fn script_timeout(&self) -> Option<Duration> {
        self.state.lock().script_timeout
    }

    /// Applies a structural setting.
    ///
    /// Serialized against library init/shutdown and other `configure` calls.
    pub fn configure(&self, config: DbConfig) -> Result<()> {
        self.library.serialized(|| {
            let mut state = self.state.lock();
            match config {
                DbConfig::PageCacheSize(pages) => {
                    if pages == 0 {
                        return Err(Error::invalid_param("page cache size must be > 0"));
                    }
                    state.engine.set_cache_capacity(pages);
                }
                DbConfig::AutoCommit(enabled) => state.auto_commit = enabled,
                DbConfig::ScriptTimeout(timeout) => state.script_timeout = timeout,
            }
            log::debug!("{:?} applied to {:?}", config, self.path);
            Ok(())
        })
    }

    /// Page I/O counters; `None` for the in-memory engine.
    pub fn stats(&self) -> Option<PagerStats> {
        self.state.lock().engine.stats()
    }

    /// Closes the database, committing any open transaction and pending
    /// changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the final commit fails; the handle is released
    /// regardless.
    pub fn close(self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&self) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;

            if let Some(id) = state.txn.abandon() {
                log::debug!("committing transaction {} left open at close", id);
                if !state.read_only {
                    if let Err(e) = state.engine.commit() {
                        let _ = state.engine.rollback();
                        log::warn!("final commit of {:?} failed: {}", self.path, e);
                    }
                }
            }
            state.engine.close()
        };
        self.txn_done.notify_all();

        self.library.deregister();
        log::info!("closed {:?}", self.path);
        result
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Errors can't be propagated from here.
        if let Err(e) = self.shutdown() {
            log::error!("error closing {:?}: {}", self.path, e);
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").field("path", &self.path).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Database {
        Database::open(dir.path().join("test.db"), Options::default().sync(false)).unwrap()
    }

    #[test]
    fn test_store_and_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);

        db.store(b"key1", b"value1").unwrap();
        assert_eq!(db.fetch(b"key1").unwrap(), b"value1".to_vec());
        assert!(db.fetch(b"key2").unwrap_err().is_not_found());
        assert_eq!(db.fetch_optional(b"key2").unwrap(), None);
    }

    #[test]
    fn test_empty_key_and_value() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);

        db.store(b"", b"").unwrap();
        assert_eq!(db.fetch(b"").unwrap(), Vec::<u8>::new());
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_append() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);

        db.append(b"log", b"a").unwrap();
        db.append(b"log", b"bc").unwrap();
        assert_eq!(db.fetch(b"log").unwrap(), b"abc".to_vec());
    }

    #[test]
    fn test_delete() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);

        db.store(b"key1", b"value1").unwrap();
        db.delete(b"key1").unwrap();
        assert!(!db.contains(b"key1").unwrap());
        assert!(matches!(db.delete(b"key1"), Err(Error::NotFound(_))));
        assert!(db.is_empty());
    }

    #[test]
    fn test_transaction_protocol() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);

        assert!(matches!(db.commit(), Err(Error::LockError(_))));
        assert!(matches!(db.rollback(), Err(Error::LockError(_))));

        db.begin().unwrap();
        assert!(matches!(db.begin(), Err(Error::LockError(_))));
        db.store(b"k", b"v").unwrap();
        db.rollback().unwrap();
        assert!(!db.contains(b"k").unwrap());
        assert!(!db.in_transaction());
    }

    #[test]
    fn test_close_commits_open_transaction() {
        let temp_dir = TempDir::new().unwrap();
        {
            let db = open(&temp_dir);
            db.begin().unwrap();
            db.store(b"pending", b"yes").unwrap();
            db.close().unwrap();
        }
        let db = open(&temp_dir);
        assert_eq!(db.fetch(b"pending").unwrap(), b"yes".to_vec());
    }

    #[test]
    fn test_memory_database() {
        let db = Database::memory().unwrap();
        assert_eq!(db.engine_name(), "mem");
        assert!(!db.supports_range_search());
        assert!(db.stats().is_none());

        db.store(b"a", b"1").unwrap();
        db.begin().unwrap();
        db.store(b"b", b"2").unwrap();
        db.rollback().unwrap();
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_configure() {
        let temp_dir = TempDir::new().unwrap();
        let db = open(&temp_dir);

        db.configure(DbConfig::PageCacheSize(4)).unwrap();
        assert!(db.configure(DbConfig::PageCacheSize(0)).is_err());
        db.configure(DbConfig::ScriptTimeout(Some(Duration::from_millis(50)))).unwrap();
        assert_eq!(db.script_timeout(), Some(Duration::from_millis(50)));
    }
}
