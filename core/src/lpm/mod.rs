//! Low Power Mode engines
//!
//! Two engines solve the same problem under different hardware constraints:
//!
//! - [`OscillatorSleepEngine`]: halts the CPU while an asynchronous
//!   oscillator (or the watchdog) keeps time, then back-fills the elapsed
//!   milliseconds into the [`SystemClock`](crate::time::SystemClock).
//! - [`PersistentSleepEngine`]: powers the chip down completely. A countdown
//!   record and caller state are written to non-volatile storage before every
//!   sleep chunk and validated with CRC-32 on the next boot.
//!
//! [`BusyWaitEngine`] covers boards without a usable sleep state.
//!
//! A board picks exactly one engine when it wires its peripherals; there is
//! no runtime switch between them.

mod busy;
mod oscillator;
mod persistent;
pub mod record;
mod ticks;

use hal_abstractions::pins::InputPin;

pub use busy::BusyWaitEngine;
pub use oscillator::{select_watchdog_period, OscillatorConfig, OscillatorSleepEngine};
pub use persistent::{LossReason, PersistentSleepConfig, PersistentSleepEngine, Recovery, SleepChunk};
pub use record::{ControlBlock, SleepState, CONTROL_BLOCK_SIZE};
pub use ticks::{
    CpuFrequency, HardwareTimerController, Mhz16, Mhz8, TickAccumulator, TickProfile, TickReading,
};

/// Common sleep capability.
pub trait SleepEngine {
    type Error;

    /// Sleeps for about `duration_ms`.
    ///
    /// Engines whose sleep ends in a reset only return on error.
    fn idle(&mut self, duration_ms: u32) -> Result<(), Self::Error>;
}

/// Sleep engine that carries caller state across a destructive sleep.
pub trait ResumableSleep: SleepEngine {
    /// Like [`SleepEngine::idle`], persisting `aux` alongside the countdown.
    fn idle_preserving(&mut self, duration_ms: u32, aux: &[u8]) -> Result<(), Self::Error>;

    /// Boot-time check. Restores `aux` and reports whether persisted state
    /// was recovered. May start the next sleep chunk and never return.
    fn check_resume<P: InputPin>(&mut self, reset_pin: &mut P, aux: Option<&mut [u8]>) -> bool;

    /// Largest `aux` payload that fits in storage.
    fn max_data_size(&self) -> u32;
}
