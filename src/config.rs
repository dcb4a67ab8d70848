//! Configuration options for the unqdb storage engine.

use crate::pager::CrashPoint;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest supported page size in bytes.
pub const MIN_PAGE_SIZE: usize = 512;

/// Largest supported page size in bytes.
pub const MAX_PAGE_SIZE: usize = 64 * 1024;

/// Configuration options for opening a database.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Create the database file if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// Error if the database file already exists.
    /// Default: false
    pub error_if_exists: bool,

    /// Open the file read-only (shared lock, all mutations rejected).
    /// Default: false
    pub read_only: bool,

    /// Page size in bytes for newly created files. Must be a power of two.
    /// Existing files keep the page size they were created with.
    /// Default: 4KB
    pub page_size: usize,

    /// Number of clean pages kept in the page cache.
    /// Default: 256
    pub page_cache_size: usize,

    /// Upper bound on the number of pages in the backing file.
    /// Default: u32::MAX
    pub max_pages: u32,

    /// Fsync the log and the main file on every commit.
    /// Disabling reduces durability but increases performance.
    /// Default: true
    pub sync: bool,

    /// Commit each mutation made outside an explicit transaction.
    /// Default: true
    pub auto_commit: bool,

    /// Compression applied to values stored in overflow pages.
    /// Default: CompressionType::Snappy
    pub compression: CompressionType,

    /// Maximum wall-clock time a script may run.
    /// Default: None
    pub script_timeout: Option<Duration>,

    /// Aborts commits at the given point, leaving files as a crash would.
    #[doc(hidden)]
    #[serde(skip)]
    pub crash_point: Option<CrashPoint>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            read_only: false,
            page_size: 4 * 1024, // 4KB
            page_cache_size: 256,
            max_pages: u32::MAX,
            sync: true,
            auto_commit: true,
            compression: CompressionType::default(),
            script_timeout: None,
            crash_point: None,
        }
    }
}

/// Compression algorithms for overflow values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    None = 0,

    /// Snappy compression (fast, moderate compression ratio).
    #[cfg(feature = "snappy")]
    Snappy = 1,
}

impl CompressionType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            #[cfg(feature = "snappy")]
            1 => Some(CompressionType::Snappy),
            _ => None,
        }
    }
}

impl Default for CompressionType {
    fn default() -> Self {
        #[cfg(feature = "snappy")]
        return CompressionType::Snappy;

        #[cfg(not(feature = "snappy"))]
        CompressionType::None
    }
}

/// Structural settings that can be changed on an open database.
///
/// Applied through [`crate::Database::configure`], which serializes them
/// against library init/shutdown and against each other.
#[derive(Debug, Clone, PartialEq)]
pub enum DbConfig {
    /// Resize the page cache (in pages).
    PageCacheSize(usize),
    /// Enable or disable auto-commit of mutations outside transactions.
    AutoCommit(bool),
    /// Change the script execution timeout.
    ScriptTimeout(Option<Duration>),
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses options from a JSON document; missing fields keep defaults.
    pub fn from_json_str(json: &str) -> crate::Result<Self> {
        let options: Options = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Reads options from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Sets whether to create the database if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Opens the database read-only.
    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the page size for new files.
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the page cache capacity in pages.
    pub fn page_cache_size(mut self, pages: usize) -> Self {
        self.page_cache_size = pages;
        self
    }

    /// Caps the number of pages in the backing file.
    pub fn max_pages(mut self, pages: u32) -> Self {
        self.max_pages = pages;
        self
    }

    /// Enables or disables fsync on commit.
    pub fn sync(mut self, value: bool) -> Self {
        self.sync = value;
        self
    }

    /// Enables or disables auto-commit.
    pub fn auto_commit(mut self, value: bool) -> Self {
        self.auto_commit = value;
        self
    }

    /// Sets the compression algorithm for overflow values.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the script execution timeout.
    pub fn script_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.script_timeout = timeout;
        self
    }

    #[doc(hidden)]
    pub fn crash_at(mut self, point: CrashPoint) -> Self {
        self.crash_point = Some(point);
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.page_size.is_power_of_two()
            || self.page_size < MIN_PAGE_SIZE
            || self.page_size > MAX_PAGE_SIZE
        {
            return Err(crate::Error::invalid_param(format!(
                "page_size must be a power of two between {} and {}",
                MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.page_cache_size == 0 {
            return Err(crate::Error::invalid_param("page_cache_size must be > 0"));
        }
        if self.max_pages < 2 {
            return Err(crate::Error::invalid_param("max_pages must be >= 2"));
        }
        if self.read_only && self.error_if_exists {
            return Err(crate::Error::invalid_param(
                "error_if_exists cannot be combined with read_only",
            ));
        }
        Ok(())
    }
}
