//! B+tree node layouts.
//!
//! Leaf payload:
//!
//! ```text
//! [count: u16] ([key_len: u16][key][kind: u8][value ...])*
//!   kind 0: [len: u32][bytes]                inline value
//!   kind 1: [len: u32][head: u32]            overflow chain
//!   kind 2: [len: u32][head: u32]            snappy-compressed overflow chain
//! ```
//!
//! Interior payload:
//!
//! ```text
//! [count: u16][child0: u32] ([key_len: u16][key][child: u32])*
//! ```
//!
//! Child `i` holds keys in `[keys[i - 1], keys[i])`.

use crate::error::{Error, Result};
use crate::pager::{Page, PageId, PageType, PAGE_HEADER_SIZE};
use bytes::{Buf, BufMut};

const KIND_INLINE: u8 = 0;
const KIND_OVERFLOW: u8 = 1;
const KIND_COMPRESSED: u8 = 2;

/// Where a record's value lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    /// Stored in the leaf.
    Inline(Vec<u8>),
    /// Stored in a chain of overflow pages.
    Overflow {
        /// Logical length of the value
        len: u32,
        /// First page of the chain
        head: PageId,
        /// Chain holds snappy-compressed bytes
        compressed: bool,
    },
}

impl CellValue {
    fn encoded_len(&self) -> usize {
        match self {
            CellValue::Inline(v) => 1 + 4 + v.len(),
            CellValue::Overflow { .. } => 1 + 4 + 4,
        }
    }
}

/// A record in a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub key: Vec<u8>,
    pub value: CellValue,
}

impl Cell {
    /// Bytes the cell occupies in a leaf.
    pub fn encoded_len(&self) -> usize {
        2 + self.key.len() + self.value.encoded_len()
    }
}

/// Leaf cell size of an inline record.
pub fn inline_cell_len(key_len: usize, value_len: usize) -> usize {
    2 + key_len + 1 + 4 + value_len
}

/// Decoded tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(Vec<Cell>),
    Interior { keys: Vec<Vec<u8>>, children: Vec<PageId> },
}

impl Node {
    /// Decodes a leaf or interior page.
    pub fn decode(page: &Page) -> Result<Self> {
        let mut buf = page.payload();
        let node = match page.page_type()? {
            PageType::Leaf => {
                let count = read_u16(&mut buf)? as usize;
                let mut cells = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = read_key(&mut buf)?;
                    let kind = read_u8(&mut buf)?;
                    let len = read_u32(&mut buf)?;
                    let value = match kind {
                        KIND_INLINE => CellValue::Inline(take(&mut buf, len as usize)?.to_vec()),
                        KIND_OVERFLOW | KIND_COMPRESSED => CellValue::Overflow {
                            len,
                            head: read_u32(&mut buf)?,
                            compressed: kind == KIND_COMPRESSED,
                        },
                        other => {
                            return Err(Error::corrupt(format!(
                                "page {}: invalid value kind {}",
                                page.id(),
                                other
                            )))
                        }
                    };
                    cells.push(Cell { key, value });
                }
                Node::Leaf(cells)
            }
            PageType::Interior => {
                let count = read_u16(&mut buf)? as usize;
                let mut keys = Vec::with_capacity(count);
                let mut children = Vec::with_capacity(count + 1);
                children.push(read_u32(&mut buf)?);
                for _ in 0..count {
                    keys.push(read_key(&mut buf)?);
                    children.push(read_u32(&mut buf)?);
                }
                Node::Interior { keys, children }
            }
            other => {
                return Err(Error::corrupt(format!(
                    "page {} is a {:?} page, expected a tree node",
                    page.id(),
                    other
                )))
            }
        };
        Ok(node)
    }

    /// Whether the node fits in a page of the given size.
    pub fn fits(&self, page_size: usize) -> bool {
        match self {
            Node::Leaf(cells) => leaf_fits(cells, page_size),
            Node::Interior { keys, .. } => interior_fits(keys, page_size),
        }
    }

    /// Encodes the node into a page image.
    pub fn encode(&self, id: PageId, page_size: usize) -> Page {
        debug_assert!(self.fits(page_size));
        let page_type = match self {
            Node::Leaf(_) => PageType::Leaf,
            Node::Interior { .. } => PageType::Interior,
        };
        let mut page = Page::new(id, page_size, page_type);
        let mut out = page.payload_mut();

        match self {
            Node::Leaf(cells) => {
                out.put_u16_le(cells.len() as u16);
                for cell in cells {
                    out.put_u16_le(cell.key.len() as u16);
                    out.put_slice(&cell.key);
                    match &cell.value {
                        CellValue::Inline(v) => {
                            out.put_u8(KIND_INLINE);
                            out.put_u32_le(v.len() as u32);
                            out.put_slice(v);
                        }
                        CellValue::Overflow { len, head, compressed } => {
                            out.put_u8(if *compressed { KIND_COMPRESSED } else { KIND_OVERFLOW });
                            out.put_u32_le(*len);
                            out.put_u32_le(*head);
                        }
                    }
                }
            }
            Node::Interior { keys, children } => {
                out.put_u16_le(keys.len() as u16);
                out.put_u32_le(children[0]);
                for (key, child) in keys.iter().zip(&children[1..]) {
                    out.put_u16_le(key.len() as u16);
                    out.put_slice(key);
                    out.put_u32_le(*child);
                }
            }
        }
        page
    }
}

/// Whether leaf cells fit in one page.
pub fn leaf_fits(cells: &[Cell], page_size: usize) -> bool {
    2 + cells.iter().map(Cell::encoded_len).sum::<usize>() <= page_size - PAGE_HEADER_SIZE
}

/// Whether interior separators (and their children) fit in one page.
pub fn interior_fits(keys: &[Vec<u8>], page_size: usize) -> bool {
    2 + 4 + keys.iter().map(|k| 2 + k.len() + 4).sum::<usize>() <= page_size - PAGE_HEADER_SIZE
}

/// Index of the child whose range contains `key`.
pub fn child_index(keys: &[Vec<u8>], key: &[u8]) -> usize {
    keys.partition_point(|k| k.as_slice() <= key)
}

/// Splits leaf cells roughly in half by encoded size.
///
/// Returns the right half; both halves are non-empty.
pub fn split_leaf(cells: &mut Vec<Cell>) -> Vec<Cell> {
    let total: usize = cells.iter().map(Cell::encoded_len).sum();
    let mut left = 0;
    let mut at = cells.len() - 1;
    for (i, cell) in cells.iter().enumerate() {
        if left >= total / 2 {
            at = i;
            break;
        }
        left += cell.encoded_len();
    }
    cells.split_off(at.clamp(1, cells.len() - 1))
}

/// Splits an interior node roughly in half by encoded size.
///
/// Returns the separator pushed up to the parent and the right half.
pub fn split_interior(
    keys: &mut Vec<Vec<u8>>,
    children: &mut Vec<PageId>,
) -> (Vec<u8>, Vec<Vec<u8>>, Vec<PageId>) {
    let total: usize = keys.iter().map(|k| k.len() + 6).sum();
    let mut left = 0;
    let mut mid = keys.len() / 2;
    for (i, key) in keys.iter().enumerate() {
        if left >= total / 2 {
            mid = i;
            break;
        }
        left += key.len() + 6;
    }
    let mid = mid.clamp(1, keys.len().saturating_sub(2).max(1));

    let right_keys = keys.split_off(mid + 1);
    let separator = keys.pop().unwrap_or_default();
    let right_children = children.split_off(mid + 1);
    (separator, right_keys, right_children)
}

fn take<'a>(buf: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if buf.len() < n {
        return Err(Error::corrupt("tree node truncated"));
    }
    let (head, rest) = buf.split_at(n);
    *buf = rest;
    Ok(head)
}

fn read_u8(buf: &mut &[u8]) -> Result<u8> {
    Ok(take(buf, 1)?[0])
}

fn read_u16(buf: &mut &[u8]) -> Result<u16> {
    Ok(take(buf, 2)?.get_u16_le())
}

fn read_u32(buf: &mut &[u8]) -> Result<u32> {
    Ok(take(buf, 4)?.get_u32_le())
}

fn read_key(buf: &mut &[u8]) -> Result<Vec<u8>> {
    let len = read_u16(buf)? as usize;
    Ok(take(buf, len)?.to_vec())
}
