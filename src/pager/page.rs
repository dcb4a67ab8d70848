//! Page and file header layouts.
//!
//! Every page except the header page starts with:
//!
//! ```text
//! [checksum: u32][type: u8][payload ...]
//! ```
//!
//! The checksum is a CRC32 over everything after it, verified on every load.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

/// Page number inside the backing file. Page 0 is the file header.
pub type PageId = u32;

/// The page holding the [`FileHeader`].
pub const HEADER_PAGE: PageId = 0;

/// Bytes taken by the checksum and the type tag.
pub const PAGE_HEADER_SIZE: usize = 5;

const CHECKSUM_LEN: usize = 4;

/// Identifies a database file.
pub const MAGIC: &[u8; 8] = b"unqdb\0kv";

/// On-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Encoded length of the header fields, checksum included.
pub const FILE_HEADER_LEN: usize = 8 + 4 + 4 * 5 + 8 + 8 + 4;

/// Kinds of pages stored in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// Member of the free list.
    Free = 1,
    /// B+tree leaf.
    Leaf = 2,
    /// B+tree interior node.
    Interior = 3,
    /// Part of an overflow value chain.
    Overflow = 4,
}

impl PageType {
    /// Convert from u8 to PageType
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PageType::Free),
            2 => Ok(PageType::Leaf),
            3 => Ok(PageType::Interior),
            4 => Ok(PageType::Overflow),
            _ => Err(Error::corrupt(format!("invalid page type: {}", value))),
        }
    }
}

/// A fixed-size page image.
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    id: PageId,
    data: Vec<u8>,
}

impl Page {
    /// Creates a zeroed page of the given type.
    pub fn new(id: PageId, page_size: usize, page_type: PageType) -> Self {
        let mut data = vec![0u8; page_size];
        data[CHECKSUM_LEN] = page_type as u8;
        Self { id, data }
    }

    /// Wraps a raw page image read from disk or the log.
    pub fn from_bytes(id: PageId, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    /// The page number.
    pub fn id(&self) -> PageId {
        self.id
    }

    /// The page type tag.
    pub fn page_type(&self) -> Result<PageType> {
        PageType::from_u8(self.data[CHECKSUM_LEN])
    }

    /// The bytes after the checksum and type tag.
    pub fn payload(&self) -> &[u8] {
        &self.data[PAGE_HEADER_SIZE..]
    }

    /// Mutable access to the payload.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[PAGE_HEADER_SIZE..]
    }

    /// The full page image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the page, returning its image.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Stores the checksum of the current contents.
    pub fn seal(&mut self) {
        let checksum = crc32fast::hash(&self.data[CHECKSUM_LEN..]);
        self.data[..CHECKSUM_LEN].copy_from_slice(&checksum.to_le_bytes());
    }

    /// Checks the stored checksum against the contents.
    pub fn verify(&self) -> Result<()> {
        let mut stored = &self.data[..CHECKSUM_LEN];
        let expected = stored.get_u32_le();
        let actual = crc32fast::hash(&self.data[CHECKSUM_LEN..]);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("page_type", &self.page_type().ok())
            .field("len", &self.data.len())
            .finish()
    }
}

/// Contents of page 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Page size the file was created with.
    pub page_size: u32,
    /// Number of pages in the file, header included.
    pub page_count: u32,
    /// First page of the free list, 0 when empty.
    pub free_head: PageId,
    /// Number of pages on the free list.
    pub free_count: u32,
    /// Root page of the B+tree, 0 when the tree is empty.
    pub root: PageId,
    /// Number of records in the tree.
    pub record_count: u64,
    /// Id of the last committed transaction.
    pub last_txn: u64,
}

impl FileHeader {
    /// Header of a freshly created file.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size as u32,
            page_count: 1,
            free_head: 0,
            free_count: 0,
            root: 0,
            record_count: 0,
            last_txn: 0,
        }
    }

    /// Encodes the header into a full page image.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.page_size as usize);
        buf.put_slice(MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u32_le(self.page_size);
        buf.put_u32_le(self.page_count);
        buf.put_u32_le(self.free_head);
        buf.put_u32_le(self.free_count);
        buf.put_u32_le(self.root);
        buf.put_u64_le(self.record_count);
        buf.put_u64_le(self.last_txn);
        let checksum = crc32fast::hash(&buf);
        buf.put_u32_le(checksum);
        buf.resize(self.page_size as usize, 0);
        buf
    }

    /// Decodes and validates a header.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < FILE_HEADER_LEN {
            return Err(Error::corrupt(format!("file header too short: {} bytes", data.len())));
        }
        if &data[..MAGIC.len()] != MAGIC {
            return Err(Error::corrupt("not a unqdb database file"));
        }

        let body = &data[..FILE_HEADER_LEN - 4];
        let mut buf = &data[MAGIC.len()..FILE_HEADER_LEN];
        let version = buf.get_u32_le();
        if version != FORMAT_VERSION {
            return Err(Error::corrupt(format!("unsupported format version: {}", version)));
        }

        let header = Self {
            page_size: buf.get_u32_le(),
            page_count: buf.get_u32_le(),
            free_head: buf.get_u32_le(),
            free_count: buf.get_u32_le(),
            root: buf.get_u32_le(),
            record_count: buf.get_u64_le(),
            last_txn: buf.get_u64_le(),
        };
        let expected = buf.get_u32_le();
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        let page_size = header.page_size as usize;
        if !page_size.is_power_of_two()
            || !(crate::config::MIN_PAGE_SIZE..=crate::config::MAX_PAGE_SIZE).contains(&page_size)
        {
            return Err(Error::corrupt(format!("invalid page size: {}", page_size)));
        }
        if header.page_count == 0
            || header.root >= header.page_count
            || header.free_head >= header.page_count
            || header.free_count >= header.page_count
        {
            return Err(Error::corrupt("file header page references out of range"));
        }
        Ok(header)
    }
}
