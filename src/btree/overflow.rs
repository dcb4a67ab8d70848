//! Overflow page chains for values too large to keep in a leaf.
//!
//! Overflow payload: `[next: u32][chunk_len: u32][chunk]`, `next == 0` ends
//! the chain.

use crate::error::{Error, Result};
use crate::pager::{Pager, PageId, PageType, PAGE_HEADER_SIZE};
use bytes::{Buf, BufMut};

const CHAIN_HEADER: usize = 8;

fn chunk_capacity(page_size: usize) -> usize {
    page_size - PAGE_HEADER_SIZE - CHAIN_HEADER
}

/// Writes `data` to freshly allocated pages and returns the head page.
pub fn write_chain(pager: &mut Pager, data: &[u8]) -> Result<PageId> {
    let capacity = chunk_capacity(pager.page_size());
    let chunks: Vec<&[u8]> = if data.is_empty() {
        vec![data]
    } else {
        data.chunks(capacity).collect()
    };

    let mut pages = Vec::with_capacity(chunks.len());
    for _ in &chunks {
        pages.push(pager.allocate(PageType::Overflow)?);
    }
    let ids: Vec<PageId> = pages.iter().map(|p| p.id()).collect();

    for (i, (mut page, chunk)) in pages.into_iter().zip(chunks).enumerate() {
        let next = ids.get(i + 1).copied().unwrap_or(0);
        let mut out = page.payload_mut();
        out.put_u32_le(next);
        out.put_u32_le(chunk.len() as u32);
        out.put_slice(chunk);
        pager.write(page)?;
    }

    Ok(ids[0])
}

/// Reads a whole chain back.
pub fn read_chain(pager: &mut Pager, head: PageId) -> Result<Vec<u8>> {
    let capacity = chunk_capacity(pager.page_size());
    let mut data = Vec::new();
    let mut next = head;
    let mut hops = 0u32;

    while next != 0 {
        hops += 1;
        if hops > pager.page_count() {
            return Err(Error::corrupt(format!("overflow chain at page {} loops", head)));
        }
        let page = pager.read(next)?;
        if page.page_type()? != PageType::Overflow {
            return Err(Error::corrupt(format!("page {} is not an overflow page", next)));
        }
        let mut payload = page.payload();
        next = payload.get_u32_le();
        let len = payload.get_u32_le() as usize;
        if len > capacity {
            return Err(Error::corrupt(format!("overflow page {} claims {} bytes", page.id(), len)));
        }
        data.extend_from_slice(&payload[..len]);
    }

    Ok(data)
}

/// Returns every page of a chain to the free list.
pub fn free_chain(pager: &mut Pager, head: PageId) -> Result<()> {
    let mut next = head;
    let mut hops = 0u32;

    while next != 0 {
        hops += 1;
        if hops > pager.page_count() {
            return Err(Error::corrupt(format!("overflow chain at page {} loops", head)));
        }
        let page = pager.read(next)?;
        if page.page_type()? != PageType::Overflow {
            return Err(Error::corrupt(format!("page {} is not an overflow page", next)));
        }
        let id = page.id();
        next = page.payload().get_u32_le();
        pager.free(id)?;
    }

    Ok(())
}
