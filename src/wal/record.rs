//! Log record framing.
//!
//! Each log entry is stored as one or more fragments:
//! - Checksum (4 bytes): CRC32 of kind and data
//! - Length (2 bytes): Length of the data
//! - Kind (1 byte): Full, First, Middle or Last
//! - Data (variable): a slice of the serialized entry
//!
//! A torn write at the tail of the log shows up as a short or mismatching
//! fragment, which the reader reports as corruption.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut, BytesMut};
use crc32fast::Hasher;

/// Maximum size of a single fragment's data portion
pub const MAX_FRAGMENT_SIZE: usize = 32 * 1024; // 32KB

/// Size of the fragment header (checksum + length + kind)
pub const HEADER_SIZE: usize = 7;

/// Position of a fragment within its entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FragmentKind {
    /// The whole entry fits in one fragment
    Full = 1,
    /// First fragment of a split entry
    First = 2,
    /// Interior fragment of a split entry
    Middle = 3,
    /// Final fragment of a split entry
    Last = 4,
}

impl FragmentKind {
    /// Convert from u8 to FragmentKind
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(FragmentKind::Full),
            2 => Ok(FragmentKind::First),
            3 => Ok(FragmentKind::Middle),
            4 => Ok(FragmentKind::Last),
            _ => Err(Error::corrupt(format!("invalid fragment kind: {}", value))),
        }
    }

    /// Picks the kind for the chunk at `offset..offset + len` of a `total`-byte entry.
    pub fn for_chunk(offset: usize, len: usize, total: usize) -> Self {
        if total <= MAX_FRAGMENT_SIZE {
            FragmentKind::Full
        } else if offset == 0 {
            FragmentKind::First
        } else if offset + len >= total {
            FragmentKind::Last
        } else {
            FragmentKind::Middle
        }
    }
}

/// A single framed slice of a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Position within the entry
    pub kind: FragmentKind,
    /// Data payload
    pub data: Vec<u8>,
}

impl Fragment {
    /// Create a new fragment
    pub fn new(kind: FragmentKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    /// Encode the fragment: [checksum: u32][length: u16][kind: u8][data]
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.data.len() <= MAX_FRAGMENT_SIZE);
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.data.len());
        buf.put_u32_le(Self::checksum(self.kind, &self.data));
        buf.put_u16_le(self.data.len() as u16);
        buf.put_u8(self.kind as u8);
        buf.put_slice(&self.data);
        buf.to_vec()
    }

    /// Reads the data length out of an encoded header.
    pub fn data_len(header: &[u8; HEADER_SIZE]) -> usize {
        u16::from_le_bytes([header[4], header[5]]) as usize
    }

    /// Decode a fragment, verifying its checksum
    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::corrupt(format!("fragment too short: {} bytes", data.len())));
        }

        let checksum = data.get_u32_le();
        let length = data.get_u16_le() as usize;
        let kind = FragmentKind::from_u8(data.get_u8())?;

        if data.len() < length {
            return Err(Error::corrupt(format!(
                "incomplete fragment: expected {} bytes, got {}",
                length,
                data.len()
            )));
        }

        let payload = data[..length].to_vec();
        let expected = Self::checksum(kind, &payload);
        if checksum != expected {
            return Err(Error::corrupt(format!(
                "fragment checksum mismatch: expected {:#x}, got {:#x}",
                expected, checksum
            )));
        }

        Ok(Fragment { kind, data: payload })
    }

    fn checksum(kind: FragmentKind, data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&[kind as u8]);
        hasher.update(data);
        hasher.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_encode_decode() {
        let fragment = Fragment::new(FragmentKind::Full, b"page image".to_vec());
        let encoded = fragment.encode();
        assert_eq!(encoded.len(), HEADER_SIZE + 10);
        assert_eq!(Fragment::decode(&encoded).unwrap(), fragment);
    }

    #[test]
    fn test_checksum_validation() {
        let mut encoded = Fragment::new(FragmentKind::Last, b"commit".to_vec()).encode();
        encoded[HEADER_SIZE] ^= 0xFF;
        assert!(matches!(Fragment::decode(&encoded), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_truncated_fragment() {
        let encoded = Fragment::new(FragmentKind::Full, vec![1; 64]).encode();
        assert!(Fragment::decode(&encoded[..HEADER_SIZE + 10]).is_err());
        assert!(Fragment::decode(&encoded[..3]).is_err());
    }

    #[test]
    fn test_kind_for_chunk() {
        assert_eq!(FragmentKind::for_chunk(0, 10, 10), FragmentKind::Full);
        let total = MAX_FRAGMENT_SIZE * 2 + 1;
        assert_eq!(FragmentKind::for_chunk(0, MAX_FRAGMENT_SIZE, total), FragmentKind::First);
        assert_eq!(
            FragmentKind::for_chunk(MAX_FRAGMENT_SIZE, MAX_FRAGMENT_SIZE, total),
            FragmentKind::Middle
        );
        assert_eq!(FragmentKind::for_chunk(2 * MAX_FRAGMENT_SIZE, 1, total), FragmentKind::Last);
        assert!(FragmentKind::from_u8(9).is_err());
    }
}
