//! CRC-32 for persisted state
//!
//! CRC-32/ISO-HDLC (the zlib/Ethernet polynomial, reflected, init and
//! final XOR `0xFFFF_FFFF`), so stored checksums can be reproduced by any
//! other implementation of the standard algorithm.
//!
//! The streaming functions let callers cover several disjoint memory
//! regions (control block, then payload) without concatenating them:
//!
//! ```ignore
//! let state = crc32_begin();
//! let state = crc32_continue(state, header);
//! let state = crc32_continue(state, payload);
//! assert_eq!(crc32_end(state), crc32(&[header, payload].concat()));
//! ```

use crc::{Crc, Digest, CRC_32_ISO_HDLC};

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// In-progress CRC-32 computation
pub struct Crc32(Digest<'static, u32>);

impl Crc32 {
    pub fn update(&mut self, bytes: &[u8]) {
        self.0.update(bytes);
    }

    pub fn finalize(self) -> u32 {
        self.0.finalize()
    }
}

/// CRC-32 of `bytes` in one go.
pub fn crc32(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

pub fn crc32_begin() -> Crc32 {
    Crc32(CRC32.digest())
}

pub fn crc32_continue(mut state: Crc32, bytes: &[u8]) -> Crc32 {
    state.update(bytes);
    state
}

pub fn crc32_end(state: Crc32) -> u32 {
    state.finalize()
}
