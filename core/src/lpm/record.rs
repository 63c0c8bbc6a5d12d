//! Persistent sleep control block
//!
//! Stored at offset 0 of the non-volatile region, followed directly by the
//! caller's auxiliary payload. All fields little-endian:
//!
//! | Offset | Size | Field                                    |
//! |--------|------|------------------------------------------|
//! | 0      | 4    | CRC-32 over bytes 4..12 and the payload   |
//! | 4      | 1    | state: 0 = Set, 1 = Counting, 2 = Done   |
//! | 5      | 3    | reserved, zero                           |
//! | 8      | 4    | remaining milliseconds                   |

use crate::crc::{crc32_begin, crc32_continue, crc32_end};

/// Encoded control block size
pub const CONTROL_BLOCK_SIZE: usize = 12;

const CHECKSUM_SIZE: usize = 4;

/// Countdown state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SleepState {
    /// Freshly armed, the first chunk has not completed yet.
    Set = 0,
    /// At least one chunk completed, more remain.
    Counting = 1,
    /// Last chunk entered or nothing pending.
    Done = 2,
}

impl TryFrom<u8> for SleepState {
    type Error = RecordError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Set),
            1 => Ok(Self::Counting),
            2 => Ok(Self::Done),
            other => Err(RecordError::UnknownState(other)),
        }
    }
}

/// Decoding failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RecordError {
    ChecksumMismatch { stored: u32, computed: u32 },
    UnknownState(u8),
}

impl core::fmt::Display for RecordError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::ChecksumMismatch { stored, computed } => write!(
                f,
                "Checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored, computed
            ),
            Self::UnknownState(raw) => write!(f, "Unknown sleep state {}", raw),
        }
    }
}

impl core::error::Error for RecordError {}

/// Decoded control block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlBlock {
    pub state: SleepState,
    pub remaining_ms: u32,
}

impl ControlBlock {
    pub const fn new(state: SleepState, remaining_ms: u32) -> Self {
        Self {
            state,
            remaining_ms,
        }
    }

    /// Nothing pending
    pub const fn cleared() -> Self {
        Self::new(SleepState::Done, 0)
    }

    /// The checksummed part of the block: state, reserved bytes, remaining.
    pub fn context_bytes(&self) -> [u8; CONTROL_BLOCK_SIZE - CHECKSUM_SIZE] {
        let mut bytes = [0u8; CONTROL_BLOCK_SIZE - CHECKSUM_SIZE];
        bytes[0] = self.state as u8;
        bytes[4..].copy_from_slice(&self.remaining_ms.to_le_bytes());
        bytes
    }

    /// CRC-32 over the block context followed by `payload`.
    pub fn checksum(&self, payload: &[u8]) -> u32 {
        checksum_raw(&self.context_bytes(), payload)
    }

    pub fn encode(&self, payload: &[u8]) -> [u8; CONTROL_BLOCK_SIZE] {
        let mut bytes = [0u8; CONTROL_BLOCK_SIZE];
        bytes[..CHECKSUM_SIZE].copy_from_slice(&self.checksum(payload).to_le_bytes());
        bytes[CHECKSUM_SIZE..].copy_from_slice(&self.context_bytes());
        bytes
    }

    /// Validates `raw` against `payload` and decodes it.
    ///
    /// The checksum is verified before the state byte is interpreted.
    pub fn decode(raw: &[u8; CONTROL_BLOCK_SIZE], payload: &[u8]) -> Result<Self, RecordError> {
        let stored = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
        let computed = checksum_raw(&raw[CHECKSUM_SIZE..], payload);
        if stored != computed {
            return Err(RecordError::ChecksumMismatch { stored, computed });
        }
        let state = SleepState::try_from(raw[4])?;
        let remaining_ms = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        Ok(Self::new(state, remaining_ms))
    }
}

fn checksum_raw(context: &[u8], payload: &[u8]) -> u32 {
    let state = crc32_begin();
    let state = crc32_continue(state, context);
    let state = crc32_continue(state, payload);
    crc32_end(state)
}
