//! Paged B+tree engine.
//!
//! Records live in leaves ordered by key bytes; interior nodes hold
//! separator keys (the first key of the right sibling at split time).
//! Values larger than a quarter page go to overflow chains.
//!
//! Nodes split on encoded size rather than entry count. Deletion does not
//! rebalance: a node that becomes empty is freed and unlinked from its
//! parent, and a root left with a single child is replaced by that child.
//!
//! Every mutation runs inside a pager savepoint, so an error part way
//! through (a full file, a corrupt page) leaves the tree as it was.

mod node;
pub mod overflow;

use crate::config::{CompressionType, Options};
use crate::engine::{Entry, KvEngine, SeekMode};
use crate::error::{Error, Result};
use crate::pager::{Pager, PagerStats, PageId, PageType};
use node::{child_index, inline_cell_len, Cell, CellValue, Node};
use std::path::Path;

/// B+tree over a [`Pager`].
pub struct BTreeEngine {
    pager: Pager,
    compression: CompressionType,
    max_key_len: usize,
    inline_limit: usize,
}

/// What a recursive insert reports to its parent.
struct Inserted {
    /// The value that was overwritten, if any.
    replaced: Option<CellValue>,
    /// Separator and new right sibling when the child split.
    split: Option<(Vec<u8>, PageId)>,
}

/// What a recursive delete reports to its parent.
struct Removed {
    value: CellValue,
    /// The child was freed and must be unlinked.
    emptied: bool,
}

impl BTreeEngine {
    /// Opens the tree stored in `path`.
    pub fn open(path: &Path, options: &Options) -> Result<Self> {
        let pager = Pager::open(path, options)?;
        Ok(Self::with_pager(pager, options.compression))
    }

    fn with_pager(pager: Pager, compression: CompressionType) -> Self {
        let page_size = pager.page_size();
        Self { pager, compression, max_key_len: page_size / 8, inline_limit: page_size / 4 }
    }

    /// Longest key the tree accepts.
    pub fn max_key_len(&self) -> usize {
        self.max_key_len
    }

    /// Pages on the free list.
    pub fn free_pages(&self) -> u32 {
        self.pager.free_count()
    }

    /// Pages in the file, header included.
    pub fn page_count(&self) -> u32 {
        self.pager.page_count()
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() > self.max_key_len {
            return Err(Error::LimitReached(format!(
                "key of {} bytes exceeds the {} byte limit",
                key.len(),
                self.max_key_len
            )));
        }
        Ok(())
    }

    /// Runs a mutation under a savepoint.
    fn atomically<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.pager.begin_op();
        match op(self) {
            Ok(result) => {
                self.pager.end_op();
                Ok(result)
            }
            Err(e) => {
                self.pager.undo_op();
                Err(e)
            }
        }
    }

    fn load(&mut self, id: PageId) -> Result<Node> {
        let page = self.pager.read(id)?;
        Node::decode(&page)
    }

    fn store_node(&mut self, id: PageId, node: &Node) -> Result<()> {
        let page = node.encode(id, self.pager.page_size());
        self.pager.write(page)
    }

    fn new_node(&mut self, node: &Node) -> Result<PageId> {
        let page_type = match node {
            Node::Leaf(_) => PageType::Leaf,
            Node::Interior { .. } => PageType::Interior,
        };
        let id = self.pager.allocate(page_type)?.id();
        self.store_node(id, node)?;
        Ok(id)
    }

    fn make_value(&mut self, key: &[u8], value: &[u8]) -> Result<CellValue> {
        if inline_cell_len(key.len(), value.len()) <= self.inline_limit {
            return Ok(CellValue::Inline(value.to_vec()));
        }
        let len = u32::try_from(value.len()).map_err(|_| {
            Error::LimitReached(format!("value of {} bytes is too large", value.len()))
        })?;

        let (stored, compressed) = self.compress(value)?;
        let head = overflow::write_chain(&mut self.pager, &stored)?;
        Ok(CellValue::Overflow { len, head, compressed })
    }

    fn compress(&self, value: &[u8]) -> Result<(Vec<u8>, bool)> {
        match self.compression {
            CompressionType::None => Ok((value.to_vec(), false)),
            #[cfg(feature = "snappy")]
            CompressionType::Snappy => {
                let packed = snap::raw::Encoder::new()
                    .compress_vec(value)
                    .map_err(|e| Error::Serialization(format!("snappy: {}", e)))?;
                if packed.len() < value.len() {
                    Ok((packed, true))
                } else {
                    Ok((value.to_vec(), false))
                }
            }
        }
    }

    fn read_value(&mut self, value: &CellValue) -> Result<Vec<u8>> {
        let (len, head, compressed) = match value {
            CellValue::Inline(v) => return Ok(v.clone()),
            CellValue::Overflow { len, head, compressed } => (*len, *head, *compressed),
        };

        let stored = overflow::read_chain(&mut self.pager, head)?;
        let data = if compressed { decompress(&stored)? } else { stored };
        if data.len() != len as usize {
            return Err(Error::corrupt(format!(
                "overflow value at page {} has {} bytes, expected {}",
                head,
                data.len(),
                len
            )));
        }
        Ok(data)
    }

    fn release_value(&mut self, value: &CellValue) -> Result<()> {
        if let CellValue::Overflow { head, .. } = value {
            overflow::free_chain(&mut self.pager, *head)?;
        }
        Ok(())
    }

    fn entry(&mut self, cell: Cell) -> Result<Entry> {
        let value = self.read_value(&cell.value)?;
        Ok((cell.key, value))
    }

    fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let value = self.make_value(key, value)?;
        let root = self.pager.root();

        if root == 0 {
            let id = self.new_node(&Node::Leaf(vec![Cell { key: key.to_vec(), value }]))?;
            self.pager.set_root(id);
            self.pager.adjust_record_count(1);
            return Ok(());
        }

        let inserted = self.insert_into(root, key, value)?;
        if let Some((separator, right)) = inserted.split {
            let new_root =
                self.new_node(&Node::Interior { keys: vec![separator], children: vec![root, right] })?;
            self.pager.set_root(new_root);
            log::trace!("tree grew a level, new root {}", new_root);
        }

        match inserted.replaced {
            Some(old) => self.release_value(&old)?,
            None => self.pager.adjust_record_count(1),
        }
        Ok(())
    }

    fn insert_into(&mut self, id: PageId, key: &[u8], value: CellValue) -> Result<Inserted> {
        let page_size = self.pager.page_size();

        match self.load(id)? {
            Node::Leaf(mut cells) => {
                let replaced = match cells.binary_search_by(|c| c.key.as_slice().cmp(key)) {
                    Ok(i) => Some(std::mem::replace(&mut cells[i].value, value)),
                    Err(i) => {
                        cells.insert(i, Cell { key: key.to_vec(), value });
                        None
                    }
                };

                if node::leaf_fits(&cells, page_size) {
                    self.store_node(id, &Node::Leaf(cells))?;
                    return Ok(Inserted { replaced, split: None });
                }

                let right_cells = node::split_leaf(&mut cells);
                let separator = right_cells[0].key.clone();
                let right = self.new_node(&Node::Leaf(right_cells))?;
                self.store_node(id, &Node::Leaf(cells))?;
                Ok(Inserted { replaced, split: Some((separator, right)) })
            }
            Node::Interior { mut keys, mut children } => {
                let index = child_index(&keys, key);
                let inserted = self.insert_into(children[index], key, value)?;
                let Some((separator, new_child)) = inserted.split else {
                    return Ok(inserted);
                };

                keys.insert(index, separator);
                children.insert(index + 1, new_child);
                if node::interior_fits(&keys, page_size) {
                    self.store_node(id, &Node::Interior { keys, children })?;
                    return Ok(Inserted { replaced: inserted.replaced, split: None });
                }

                let (up, right_keys, right_children) =
                    node::split_interior(&mut keys, &mut children);
                let right =
                    self.new_node(&Node::Interior { keys: right_keys, children: right_children })?;
                self.store_node(id, &Node::Interior { keys, children })?;
                Ok(Inserted { replaced: inserted.replaced, split: Some((up, right)) })
            }
        }
    }

    fn remove(&mut self, key: &[u8]) -> Result<bool> {
        let root = self.pager.root();
        if root == 0 {
            return Ok(false);
        }

        let Some(removed) = self.remove_from(root, key)? else {
            return Ok(false);
        };
        self.release_value(&removed.value)?;
        self.pager.adjust_record_count(-1);

        if removed.emptied {
            self.pager.set_root(0);
            return Ok(true);
        }

        // Collapse single-child roots.
        let mut root = root;
        while let Node::Interior { keys, children } = self.load(root)? {
            if !keys.is_empty() {
                break;
            }
            self.pager.free(root)?;
            root = children[0];
            self.pager.set_root(root);
            log::trace!("tree shrank a level, new root {}", root);
        }
        Ok(true)
    }

    fn remove_from(&mut self, id: PageId, key: &[u8]) -> Result<Option<Removed>> {
        match self.load(id)? {
            Node::Leaf(mut cells) => {
                let Ok(i) = cells.binary_search_by(|c| c.key.as_slice().cmp(key)) else {
                    return Ok(None);
                };
                let value = cells.remove(i).value;
                if cells.is_empty() {
                    self.pager.free(id)?;
                    return Ok(Some(Removed { value, emptied: true }));
                }
                self.store_node(id, &Node::Leaf(cells))?;
                Ok(Some(Removed { value, emptied: false }))
            }
            Node::Interior { mut keys, mut children } => {
                let index = child_index(&keys, key);
                let Some(removed) = self.remove_from(children[index], key)? else {
                    return Ok(None);
                };
                if !removed.emptied {
                    return Ok(Some(removed));
                }

                children.remove(index);
                if !keys.is_empty() {
                    keys.remove(index.saturating_sub(1));
                }
                if children.is_empty() {
                    self.pager.free(id)?;
                    return Ok(Some(Removed { value: removed.value, emptied: true }));
                }
                self.store_node(id, &Node::Interior { keys, children })?;
                Ok(Some(Removed { value: removed.value, emptied: false }))
            }
        }
    }

    fn lookup(&mut self, key: &[u8]) -> Result<Option<Cell>> {
        let mut id = self.pager.root();
        if id == 0 {
            return Ok(None);
        }
        loop {
            match self.load(id)? {
                Node::Interior { keys, children } => id = children[child_index(&keys, key)],
                Node::Leaf(cells) => {
                    return Ok(cells
                        .binary_search_by(|c| c.key.as_slice().cmp(key))
                        .ok()
                        .map(|i| cells[i].clone()))
                }
            }
        }
    }

    /// Leftmost (`last == false`) or rightmost cell under `id`.
    fn edge(&mut self, mut id: PageId, last: bool) -> Result<Option<Cell>> {
        loop {
            match self.load(id)? {
                Node::Interior { children, .. } => {
                    let next = if last { children.last() } else { children.first() };
                    match next {
                        Some(child) => id = *child,
                        None => return Ok(None),
                    }
                }
                Node::Leaf(mut cells) => {
                    return Ok(if last { cells.pop() } else { cells.into_iter().next() })
                }
            }
        }
    }

    /// Smallest cell with key ≥ `key` (> when `strict`).
    fn ceil(&mut self, id: PageId, key: &[u8], strict: bool) -> Result<Option<Cell>> {
        match self.load(id)? {
            Node::Leaf(cells) => {
                let at = cells.partition_point(|c| {
                    if strict {
                        c.key.as_slice() <= key
                    } else {
                        c.key.as_slice() < key
                    }
                });
                Ok(cells.into_iter().nth(at))
            }
            Node::Interior { keys, children } => {
                let index = child_index(&keys, key);
                if let Some(cell) = self.ceil(children[index], key, strict)? {
                    return Ok(Some(cell));
                }
                for child in &children[index + 1..] {
                    if let Some(cell) = self.edge(*child, false)? {
                        return Ok(Some(cell));
                    }
                }
                Ok(None)
            }
        }
    }

    /// Largest cell with key ≤ `key` (< when `strict`).
    fn floor(&mut self, id: PageId, key: &[u8], strict: bool) -> Result<Option<Cell>> {
        match self.load(id)? {
            Node::Leaf(mut cells) => {
                let at = cells.partition_point(|c| {
                    if strict {
                        c.key.as_slice() < key
                    } else {
                        c.key.as_slice() <= key
                    }
                });
                cells.truncate(at);
                Ok(cells.pop())
            }
            Node::Interior { keys, children } => {
                let index = child_index(&keys, key);
                if let Some(cell) = self.floor(children[index], key, strict)? {
                    return Ok(Some(cell));
                }
                for child in children[..index].iter().rev() {
                    if let Some(cell) = self.edge(*child, true)? {
                        return Ok(Some(cell));
                    }
                }
                Ok(None)
            }
        }
    }

    fn neighbour(&mut self, key: &[u8], above: bool, strict: bool) -> Result<Option<Entry>> {
        let root = self.pager.root();
        if root == 0 {
            return Ok(None);
        }
        let cell = if above { self.ceil(root, key, strict)? } else { self.floor(root, key, strict)? };
        cell.map(|c| self.entry(c)).transpose()
    }

    fn extreme(&mut self, last: bool) -> Result<Option<Entry>> {
        let root = self.pager.root();
        if root == 0 {
            return Ok(None);
        }
        let cell = self.edge(root, last)?;
        cell.map(|c| self.entry(c)).transpose()
    }
}

fn decompress(stored: &[u8]) -> Result<Vec<u8>> {
    #[cfg(feature = "snappy")]
    {
        snap::raw::Decoder::new()
            .decompress_vec(stored)
            .map_err(|e| Error::corrupt(format!("snappy: {}", e)))
    }
    #[cfg(not(feature = "snappy"))]
    {
        let _ = stored;
        Err(Error::NotImplemented("value is snappy-compressed; enable the snappy feature".into()))
    }
}

impl KvEngine for BTreeEngine {
    fn name(&self) -> &'static str {
        "btree"
    }

    fn supports_range_search(&self) -> bool {
        true
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.lookup(key)? {
            Some(cell) => Ok(Some(self.read_value(&cell.value)?)),
            None => Ok(None),
        }
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.atomically(|tree| tree.insert(key, value))
    }

    fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_key(key)?;
        self.atomically(|tree| {
            let combined = match tree.get(key)? {
                Some(mut existing) => {
                    existing.extend_from_slice(value);
                    existing
                }
                None => value.to_vec(),
            };
            tree.insert(key, &combined)
        })
    }

    fn delete(&mut self, key: &[u8]) -> Result<bool> {
        self.atomically(|tree| tree.remove(key))
    }

    fn seek(&mut self, key: &[u8], mode: SeekMode) -> Result<Option<Entry>> {
        match mode {
            SeekMode::Exact => Ok(self.get(key)?.map(|value| (key.to_vec(), value))),
            SeekMode::Le => self.neighbour(key, false, false),
            SeekMode::Ge => self.neighbour(key, true, false),
        }
    }

    fn first(&mut self) -> Result<Option<Entry>> {
        self.extreme(false)
    }

    fn last(&mut self) -> Result<Option<Entry>> {
        self.extreme(true)
    }

    fn next(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        self.neighbour(key, true, true)
    }

    fn prev(&mut self, key: &[u8]) -> Result<Option<Entry>> {
        self.neighbour(key, false, true)
    }

    fn len(&self) -> u64 {
        self.pager.record_count()
    }

    fn begin(&mut self) -> Result<()> {
        self.pager.ensure_usable()
    }

    fn commit(&mut self) -> Result<()> {
        self.pager.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.pager.rollback();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.pager.is_read_only() || self.pager.is_poisoned() {
            return Ok(());
        }
        self.pager.commit()
    }

    fn set_cache_capacity(&mut self, pages: usize) {
        self.pager.set_cache_capacity(pages);
    }

    fn stats(&self) -> Option<PagerStats> {
        Some(self.pager.stats())
    }
}

impl std::fmt::Debug for BTreeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeEngine")
            .field("pager", &self.pager)
            .field("compression", &self.compression)
            .finish()
    }
}
