//! Platform-agnostic low-power logic for IoT sensor node firmware
//!
//! This crate contains the logic shared across all supported boards. It has
//! NO hardware dependencies: boards plug their registers in through the
//! `hal-abstractions` traits.
//!
//! - [`time`]: the system millisecond clock and timer helpers
//! - [`crc`]: CRC-32 used to validate persisted state
//! - [`storage`]: non-volatile regions and a checksummed blob store
//! - [`lpm`]: the sleep engines
//! - [`node`]: the sensor node wake/publish/sleep cycle
//!
//! Logging goes through `defmt` when the `defmt` feature is enabled and
//! through the `log` facade otherwise.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]
#![deny(warnings)]

pub mod crc;
pub mod error;
pub mod lpm;
pub mod node;
pub mod storage;
pub mod time;

pub use error::LpmError;
