//! In-memory hash engine backing `:mem:` databases.
//!
//! Lookups go through a hash index. Iteration follows insertion order,
//! so range seeks have no meaning here and degrade to exact lookups.
//! Transactions are a snapshot copy taken on `begin`.

use crate::engine::{Entry, KvEngine, SeekMode};
use crate::error::Result;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};

#[derive(Debug, Clone, Default)]
struct State {
    /// Insertion sequence → record.
    records: BTreeMap<u64, Entry>,
    /// Key → insertion sequence.
    index: HashMap<Vec<u8>, u64>,
    next_seq: u64,
}

/// Hash-indexed engine without range search.
#[derive(Debug, Default)]
pub struct MemEngine {
    state: State,
    snapshot: Option<State>,
}

impl MemEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_at(&self, seq: u64) -> Option<Entry> {
        self.state.records.get(&seq).cloned()
    }
}

impl KvEngine for MemEngine {
    fn name(&self) -> &'static str {
        "mem"
    }

    fn supports_range_search(&self) -> bool {
        false
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .state
            .index
            .get(key)
            .and_then(|seq| self.state.records.get(seq))
            .map(|(_, v)| v.clone()))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let state = &mut self.state;
        match state.index.get(key) {
            Some(seq) => {
                if let Some(record) = state.records.get_mut(seq) {
                    record.1 = value.to_vec();
                }
            }
            None => {
                let seq = state.next_seq;
                state.next_seq += 1;
                state.index.insert(key.to_vec(), seq);
                state.records.insert(seq, (key.to_vec(), value.to_vec()));
            }
        }
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool> {
        match self.state.index.remove(key) {
            Some(seq) => {
                self.state.records.remove(&seq);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn seek(&mut self, key: &[u8], _mode: SeekMode) -> Result<Option<Entry>> {
        Ok(self.state.index.get(key).and_then(|seq| self.entry_at(*seq)))
    }

    fn first(&mut self) -> Result<Option<Entry>> {
        Ok(self.state.records.values().next().cloned())
    }

    fn last(&mut self) -> Result<Option<Entry>> {
        Ok(self.state.records.values().next_back().cloned())
    }

    fn next(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        let Some(&seq) = self.state.index.get(key) else {
            return Ok(None);
        };
        Ok(self.state.records.range((Excluded(seq), Unbounded)).next().map(|(_, e)| e.clone()))
    }

    fn prev(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        let Some(&seq) = self.state.index.get(key) else {
            return Ok(None);
        };
        Ok(self.state.records.range(..seq).next_back().map(|(_, e)| e.clone()))
    }

    fn len(&self) -> u64 {
        self.state.records.len() as u64
    }

    fn begin(&mut self) -> Result<()> {
        self.snapshot = Some(self.state.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.take() {
            self.state = snapshot;
        }
        Ok(())
    }
}
