//! Battery-backed SRAM (BKPSRAM)
//!
//! This module is the only place in the firmware that touches memory through
//! raw pointers. Everything else reaches the 4 KB backup SRAM through the
//! [`NvStorage`] regions handed out by [`take`].
//!
//! # Layout
//!
//! ```text
//! 0x4002_4000 ┬ LPM record + sleep memory   512 B
//! 0x4002_4200 ┼ node configuration blob     512 B
//! 0x4002_4400 ┴ unused                     3072 B
//! ```
//!
//! With the backup regulator on, contents survive standby and, with a coin
//! cell on VBAT, a lost main supply.
//!
//! # Safety
//!
//! - The block is mapped at a fixed address on every STM32F405, never used by
//!   the linker and never touched by DMA here.
//! - [`take`] hands the regions out once and they do not overlap, so no two
//!   owners alias the same bytes.
//! - All accesses are volatile and bounds-checked against the owning region.

#![allow(unsafe_code)]

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_stm32::pac;
use hal_abstractions::NvStorage;
use node_core::storage::StorageError;

const BKPSRAM_BASE: usize = 0x4002_4000;
const BKPSRAM_SIZE: u32 = 4096;

const LPM_REGION: (u32, u32) = (0, 512);
const CONFIG_REGION: (u32, u32) = (512, 512);

static TAKEN: AtomicBool = AtomicBool::new(false);

/// A window into backup SRAM
pub struct BackupSram {
    offset: u32,
    len: u32,
}

/// Regions for the LPM record and for the configuration blob.
pub struct Regions {
    pub lpm: BackupSram,
    pub config: BackupSram,
}

/// Powers the backup domain and hands out the regions, once.
pub fn take() -> Option<Regions> {
    if TAKEN.swap(true, Ordering::AcqRel) {
        return None;
    }

    pac::RCC.apb1enr().modify(|w| w.set_pwren(true));
    pac::PWR.cr1().modify(|w| w.set_dbp(true));
    pac::RCC.ahb1enr().modify(|w| w.set_bkpsramen(true));
    // Keep BKPSRAM powered in standby and on VBAT
    pac::PWR.csr1().modify(|w| w.set_bre(true));
    while !pac::PWR.csr1().read().brr() {}

    Some(Regions {
        lpm: BackupSram::new(LPM_REGION),
        config: BackupSram::new(CONFIG_REGION),
    })
}

impl BackupSram {
    const fn new((offset, len): (u32, u32)) -> Self {
        assert!(offset + len <= BKPSRAM_SIZE);
        Self { offset, len }
    }

    fn address(&self, offset: u32, len: usize) -> Result<usize, StorageError> {
        let end = (offset as usize).checked_add(len);
        match end {
            Some(end) if end <= self.len as usize => {
                Ok(BKPSRAM_BASE + self.offset as usize + offset as usize)
            }
            _ => Err(StorageError::OutOfBounds {
                offset,
                len: len as u32,
            }),
        }
    }
}

impl NvStorage for BackupSram {
    type Error = StorageError;

    fn capacity(&self) -> u32 {
        self.len
    }

    fn read_region(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
        let base = self.address(offset, buf.len())?;
        for (i, byte) in buf.iter_mut().enumerate() {
            // SAFETY: inside this region of BKPSRAM, checked above
            *byte = unsafe { core::ptr::read_volatile((base + i) as *const u8) };
        }
        Ok(())
    }

    fn write_region(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
        let base = self.address(offset, data.len())?;
        for (i, byte) in data.iter().enumerate() {
            // SAFETY: inside this region of BKPSRAM, checked above
            unsafe { core::ptr::write_volatile((base + i) as *mut u8, *byte) };
        }
        Ok(())
    }
}
