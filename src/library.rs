//! Process-wide library lifecycle.
//!
//! [`Library::global`] is the single lifecycle object of the process. Every
//! [`crate::Database`] registers with it on open and deregisters on close.
//!
//! | Method            | Thread safety                                        |
//! |-------------------|------------------------------------------------------|
//! | `init`            | safe from any thread, idempotent                     |
//! | `shutdown`        | serialized under the lifecycle lock                  |
//! | `configure`       | serialized; only before `init` or after `shutdown`   |
//! | `version` & co.   | pure                                                 |

use crate::config::{Options, MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::OnceLock;

static GLOBAL: OnceLock<Library> = OnceLock::new();

/// Process-wide defaults, changeable only while the library is not
/// initialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryConfig {
    /// Page size of files created through [`crate::Database::open_default`].
    PageSize(usize),
    /// Page cache capacity (in pages) of databases opened with defaults.
    PageCacheSize(usize),
    /// Fsync policy of databases opened with defaults.
    Sync(bool),
}

#[derive(Debug)]
struct Lifecycle {
    initialized: bool,
    open_databases: usize,
    defaults: Options,
}

/// The library lifecycle service.
#[derive(Debug)]
pub struct Library {
    lifecycle: Mutex<Lifecycle>,
}

impl Library {
    pub(crate) fn new() -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle {
                initialized: false,
                open_databases: 0,
                defaults: Options::default(),
            }),
        }
    }

    /// The process-wide instance.
    pub fn global() -> &'static Library {
        GLOBAL.get_or_init(Library::new)
    }

    /// Initializes the library. Later calls are no-ops.
    pub fn init(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.initialized {
            lifecycle.initialized = true;
            log::debug!("{} initialized", signature());
        }
    }

    /// Whether `init` has run since the last shutdown.
    pub fn is_initialized(&self) -> bool {
        self.lifecycle.lock().initialized
    }

    /// Shuts the library down.
    ///
    /// Fails with [`Error::Busy`] while any database is open. Shutting down
    /// an uninitialized library is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.open_databases > 0 {
            return Err(Error::Busy(format!(
                "{} database(s) still open",
                lifecycle.open_databases
            )));
        }
        if lifecycle.initialized {
            lifecycle.initialized = false;
            log::debug!("{} shut down", signature());
        }
        Ok(())
    }

    /// Changes a process-wide default.
    ///
    /// Only allowed before [`Library::init`] or after [`Library::shutdown`];
    /// otherwise fails with [`Error::Locked`].
    pub fn configure(&self, config: LibraryConfig) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.initialized {
            return Err(Error::Locked(
                "library is initialized; shut it down before reconfiguring".into(),
            ));
        }

        match config {
            LibraryConfig::PageSize(size) => {
                if !size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&size) {
                    return Err(Error::invalid_param(format!("invalid page size: {}", size)));
                }
                lifecycle.defaults.page_size = size;
            }
            LibraryConfig::PageCacheSize(pages) => {
                if pages == 0 {
                    return Err(Error::invalid_param("page cache size must be > 0"));
                }
                lifecycle.defaults.page_cache_size = pages;
            }
            LibraryConfig::Sync(sync) => lifecycle.defaults.sync = sync,
        }
        Ok(())
    }

    /// Options used by [`crate::Database::open_default`].
    pub fn default_options(&self) -> Options {
        self.lifecycle.lock().defaults.clone()
    }

    /// Initializes if needed and counts a newly opened database.
    pub(crate) fn register(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if !lifecycle.initialized {
            lifecycle.initialized = true;
            log::debug!("{} initialized", signature());
        }
        lifecycle.open_databases += 1;
    }

    /// Counts a closed database.
    pub(crate) fn deregister(&self) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.open_databases = lifecycle.open_databases.saturating_sub(1);
    }

    /// Runs a per-database structural change under the lifecycle lock.
    pub(crate) fn serialized<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.lifecycle.lock();
        f()
    }

    /// Number of databases currently open.
    pub fn open_databases(&self) -> usize {
        self.lifecycle.lock().open_databases
    }
}

/// Library version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Name and version, e.g. `unqdb/0.1.0`.
pub fn signature() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), version())
}

/// Identifies the storage format and engines of this build.
pub fn ident() -> &'static str {
    "unqdb:btree-v1:wal-v1:lua54"
}

/// Copyright notice.
pub fn copyright() -> &'static str {
    "Copyright (C) unqdb Contributors. Licensed under MIT OR Apache-2.0."
}

/// Every handle in this crate is safe to share between threads.
pub fn is_threadsafe() -> bool {
    true
}
