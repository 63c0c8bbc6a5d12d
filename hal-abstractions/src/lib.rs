//! Hardware abstraction traits for low-power sensor node firmware
//!
//! This crate defines traits that abstract over hardware differences
//! between boards. BSPs implement these traits; `node-core` drives them.
//!
//! - [`clock`]: millisecond and wall-clock time sources
//! - [`power`]: CPU sleep states, tick timer, watchdog, destructive sleep, restart
//! - [`storage`]: byte-addressable non-volatile regions
//! - [`collab`]: sensors, publisher and update service the node talks to

#![no_std]
#![deny(unsafe_code)]
#![deny(warnings)]

pub mod clock;
pub mod collab;
pub mod power;
pub mod storage;

/// Pin traits used for the awake indicator and the reset-request input.
pub use embedded_hal::digital as pins;

pub use clock::Clock;
pub use collab::{Publisher, Quantity, Reading, Sensor, SensorError, UpdateOutcome, UpdateService};
pub use power::{
    DeepSleep, LowPowerCpu, Platform, RadioMode, SleepMode, TickConfig, TickPrescaler, TickTimer,
    Watchdog, WatchdogPeriod,
};
pub use storage::NvStorage;
