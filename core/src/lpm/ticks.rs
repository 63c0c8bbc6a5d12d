//! Asynchronous tick timer bookkeeping
//!
//! A single prescaler cannot give both fine resolution for short sleeps and
//! long range for long ones without overflowing the 8-bit compare register,
//! so every supported CPU frequency carries two profiles: a *small* one
//! (1 ms per interrupt) and a *big* one (16 or 32 ms per interrupt).
//!
//! Only frequencies with a [`CpuFrequency`] impl can be used; anything else
//! does not compile.

use core::cell::Cell;
use critical_section::Mutex;
use hal_abstractions::{TickConfig, TickPrescaler, TickTimer};

/// Timer setup plus the constants needed to turn ticks back into milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickProfile {
    pub prescaler: TickPrescaler,
    /// Compare value, zero relative
    pub compare_top: u8,
    /// Milliseconds between two compare-match interrupts
    pub ms_per_interrupt: u32,
    /// Timer ticks per millisecond, Q8 fixed point
    pub ticks_per_ms_q8: u32,
}

impl TickProfile {
    /// Builds a profile and checks at compile time that one interrupt period
    /// is a whole number of milliseconds.
    pub const fn new(
        cpu_hz: u32,
        prescaler: TickPrescaler,
        compare_top: u8,
        ms_per_interrupt: u32,
    ) -> Self {
        let ticks_per_ms_q8 = ((cpu_hz as u64 * 256) / (1000 * prescaler.divisor() as u64)) as u32;
        assert!(
            (compare_top as u32 + 1) * 256 == ms_per_interrupt * ticks_per_ms_q8,
            "unsupported tick timer configuration"
        );
        Self {
            prescaler,
            compare_top,
            ms_per_interrupt,
            ticks_per_ms_q8,
        }
    }

    pub const fn config(&self) -> TickConfig {
        TickConfig {
            prescaler: self.prescaler,
            compare_top: self.compare_top,
        }
    }

    /// `interrupts × ms_per_interrupt + round(partial_ticks / ticks_per_ms)`
    pub fn elapsed_ms(&self, reading: TickReading) -> u32 {
        let partial_q8 = reading.partial_ticks as u32 * 256;
        let partial_ms = (partial_q8 + self.ticks_per_ms_q8 / 2) / self.ticks_per_ms_q8;
        reading
            .interrupts
            .saturating_mul(self.ms_per_interrupt)
            .saturating_add(partial_ms)
    }
}

/// CPU clock frequencies the oscillator engine supports.
pub trait CpuFrequency {
    const HZ: u32;
    /// Fine profile, used while the remaining time is below one big interrupt
    const SMALL: TickProfile;
    /// Coarse profile
    const BIG: TickProfile;
}

/// 8 MHz CPU clock
#[derive(Debug, Clone, Copy)]
pub struct Mhz8;

impl CpuFrequency for Mhz8 {
    const HZ: u32 = 8_000_000;
    const SMALL: TickProfile = TickProfile::new(Self::HZ, TickPrescaler::Div64, 125 - 1, 1);
    const BIG: TickProfile = TickProfile::new(Self::HZ, TickPrescaler::Div1024, 250 - 1, 32);
}

/// 16 MHz CPU clock
#[derive(Debug, Clone, Copy)]
pub struct Mhz16;

impl CpuFrequency for Mhz16 {
    const HZ: u32 = 16_000_000;
    const SMALL: TickProfile = TickProfile::new(Self::HZ, TickPrescaler::Div128, 125 - 1, 1);
    const BIG: TickProfile = TickProfile::new(Self::HZ, TickPrescaler::Div1024, 250 - 1, 16);
}

/// Snapshot of the tick timer after a sleep segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickReading {
    /// Compare-match interrupts since the segment started
    pub interrupts: u32,
    /// Ticks counted after the last interrupt
    pub partial_ticks: u8,
}

/// Interrupt counter shared with the compare-match handler.
///
/// The handler only increments; the main flow reads and resets inside a
/// critical section.
pub struct TickAccumulator {
    interrupts: Mutex<Cell<u32>>,
}

impl TickAccumulator {
    pub const fn new() -> Self {
        Self {
            interrupts: Mutex::new(Cell::new(0)),
        }
    }

    /// Call from the compare-match interrupt handler.
    pub fn on_compare_match(&self) {
        critical_section::with(|cs| {
            let count = self.interrupts.borrow(cs);
            count.set(count.get().wrapping_add(1));
        });
    }

    pub fn reset(&self) {
        critical_section::with(|cs| self.interrupts.borrow(cs).set(0));
    }

    pub fn count(&self) -> u32 {
        critical_section::with(|cs| self.interrupts.borrow(cs).get())
    }
}

impl Default for TickAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the tick timer registers and the interrupt counter fed by its ISR.
pub struct HardwareTimerController<'a, T> {
    timer: T,
    accumulator: &'a TickAccumulator,
}

impl<'a, T: TickTimer> HardwareTimerController<'a, T> {
    pub fn new(mut timer: T, accumulator: &'a TickAccumulator) -> Self {
        timer.stop();
        accumulator.reset();
        Self { timer, accumulator }
    }

    /// Starts a fresh segment: counter and accumulator back to zero.
    pub fn start(&mut self, config: TickConfig) {
        self.timer.stop();
        self.accumulator.reset();
        self.timer.start(config);
    }

    pub fn stop(&mut self) {
        self.timer.stop();
    }

    pub fn read_accumulated(&self) -> TickReading {
        TickReading {
            interrupts: self.accumulator.count(),
            partial_ticks: self.timer.counter(),
        }
    }
}
