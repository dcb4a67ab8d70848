//! Storage engine abstraction.
//!
//! A [`crate::Database`] drives exactly one engine: the paged B+tree for
//! files, or the in-memory hash engine for `:mem:`. Both speak the same
//! narrow trait so the database, its cursors and the script VM never care
//! which one is underneath.

use crate::error::Result;
use crate::pager::PagerStats;

/// An owned key/value pair.
pub type Entry = (Vec<u8>, Vec<u8>);

/// How a seek treats a key that is not present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekMode {
    /// Only the key itself.
    Exact,
    /// The largest key less than or equal to the target.
    Le,
    /// The smallest key greater than or equal to the target.
    Ge,
}

/// Operations every storage engine provides.
///
/// Movement methods take the key the caller is positioned on rather than
/// an engine-side position, so a caller always sees the current contents
/// of the index.
pub trait KvEngine: Send {
    /// Short engine name, used in logs.
    fn name(&self) -> &'static str;

    /// Whether `SeekMode::Le`/`SeekMode::Ge` find neighbours. Engines
    /// without ordered keys treat them as exact lookups.
    fn supports_range_search(&self) -> bool;

    /// Looks up a key.
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Inserts or overwrites a record.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Concatenates `value` onto an existing record, or inserts it.
    fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match self.get(key)? {
            Some(mut existing) => {
                existing.extend_from_slice(value);
                self.put(key, &existing)
            }
            None => self.put(key, value),
        }
    }

    /// Removes a record, returning whether it existed.
    fn delete(&mut self, key: &[u8]) -> Result<bool>;

    /// Positions on a key according to `mode`.
    fn seek(&mut self, key: &[u8], mode: SeekMode) -> Result<Option<Entry>>;

    /// The first entry in iteration order.
    fn first(&mut self) -> Result<Option<Entry>>;

    /// The last entry in iteration order.
    fn last(&mut self) -> Result<Option<Entry>>;

    /// The entry following `key` in iteration order.
    fn next(&mut self, key: &[u8]) -> Result<Option<Entry>>;

    /// The entry preceding `key` in iteration order.
    fn prev(&mut self, key: &[u8]) -> Result<Option<Entry>>;

    /// Number of records.
    fn len(&self) -> u64;

    /// Whether the engine holds no records.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts collecting changes that `rollback` can undo.
    fn begin(&mut self) -> Result<()>;

    /// Makes collected changes durable.
    fn commit(&mut self) -> Result<()>;

    /// Discards collected changes.
    fn rollback(&mut self) -> Result<()>;

    /// Flushes anything buffered before the handle goes away.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Applies a new page cache size; engines without a cache ignore it.
    fn set_cache_capacity(&mut self, _pages: usize) {}

    /// Page I/O counters, for engines backed by a file.
    fn stats(&self) -> Option<PagerStats> {
        None
    }
}
