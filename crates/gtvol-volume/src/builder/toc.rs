//! Table of contents serialization.
//!
//! ```text
//! u16 LE × (pages + 1)   page offsets in 64-byte units; the last one marks the end
//! ...                    pad to 64 bytes
//! pages                  each padded to 64 bytes
//! ```

use byteorder::{ByteOrder, LittleEndian};
use gtvol_common::VarIntFlavor;

use crate::entry::MAX_PAGE_ID;
use crate::page::{Page, PAGE_ALIGNMENT};
use crate::{Error, Result};

/// Serialize `pages` into a plaintext table of contents.
pub fn write_toc(pages: &[Page], flavor: VarIntFlavor) -> Result<Vec<u8>> {
    if pages.len() > MAX_PAGE_ID + 1 {
        return Err(Error::CapacityExceeded {
            field: "page count",
            value: pages.len(),
            max: MAX_PAGE_ID + 1,
        });
    }

    let table_len = ((pages.len() + 1) * 2).next_multiple_of(PAGE_ALIGNMENT);
    let mut toc = vec![0u8; table_len];
    let mut offsets = Vec::with_capacity(pages.len() + 1);

    for page in pages {
        offsets.push(offset_unit(toc.len())?);
        toc.extend_from_slice(&page.encode(flavor)?);
    }
    offsets.push(offset_unit(toc.len())?);

    for (slot, &offset) in toc.chunks_exact_mut(2).zip(&offsets) {
        LittleEndian::write_u16(slot, offset);
    }
    Ok(toc)
}

fn offset_unit(position: usize) -> Result<u16> {
    let unit = position / PAGE_ALIGNMENT;
    u16::try_from(unit).map_err(|_| Error::CapacityExceeded {
        field: "table of contents offset",
        value: unit,
        max: u16::MAX as usize,
    })
}
