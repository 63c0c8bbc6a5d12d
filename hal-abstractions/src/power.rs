//! Power management ports
//!
//! Everything an LPM engine needs from the silicon: halting the CPU, an
//! asynchronous tick timer that keeps counting while the main clock is
//! stopped, a watchdog usable as a wake-up source, and a destructive
//! sleep that only ends in a reset.

/// CPU sleep states, lightest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepMode {
    /// CPU halted, all peripheral clocks running. Fastest wake.
    Idle,
    /// Peripheral clocks gated except the timekeeping oscillator.
    PowerSave,
    /// Deepest state. Only the watchdog (or a reset) wakes the CPU.
    PowerDown,
}

impl SleepMode {
    /// Raw encoding used by persisted configuration.
    pub const fn as_raw(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::PowerSave => 1,
            Self::PowerDown => 2,
        }
    }
}

/// Unknown raw values fall back to the shallowest mode.
impl From<u8> for SleepMode {
    fn from(raw: u8) -> Self {
        match raw {
            1 => Self::PowerSave,
            2 => Self::PowerDown,
            _ => Self::Idle,
        }
    }
}

/// Radio / RF peripheral power after a destructive sleep chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioMode {
    /// Radio left in its default power mode.
    Default,
    /// Radio held off.
    Disabled,
}

/// Watchdog interrupt periods supported by the hardware prescaler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WatchdogPeriod {
    Ms16,
    Ms32,
    Ms64,
    Ms125,
    Ms250,
    Ms500,
    S1,
    S2,
    S4,
    S8,
}

impl WatchdogPeriod {
    /// All periods, longest first.
    pub const LADDER: [WatchdogPeriod; 10] = [
        Self::S8,
        Self::S4,
        Self::S2,
        Self::S1,
        Self::Ms500,
        Self::Ms250,
        Self::Ms125,
        Self::Ms64,
        Self::Ms32,
        Self::Ms16,
    ];

    /// Nominal period length in milliseconds.
    pub const fn as_millis(self) -> u32 {
        match self {
            Self::Ms16 => 16,
            Self::Ms32 => 32,
            Self::Ms64 => 64,
            Self::Ms125 => 125,
            Self::Ms250 => 250,
            Self::Ms500 => 500,
            Self::S1 => 1000,
            Self::S2 => 2000,
            Self::S4 => 4000,
            Self::S8 => 8000,
        }
    }
}

/// Clock prescaler for the asynchronous tick timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickPrescaler {
    Div64,
    Div128,
    Div1024,
}

impl TickPrescaler {
    pub const fn divisor(self) -> u32 {
        match self {
            Self::Div64 => 64,
            Self::Div128 => 128,
            Self::Div1024 => 1024,
        }
    }
}

/// Tick timer setup for one sleep segment: clear-on-compare-match at `compare_top`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TickConfig {
    pub prescaler: TickPrescaler,
    /// Compare value, zero relative (an interrupt every `compare_top + 1` ticks).
    pub compare_top: u8,
}

/// CPU halt control.
pub trait LowPowerCpu {
    /// Masks the system millisecond tick interrupt for the duration of a sleep.
    fn suspend_system_tick(&mut self);

    /// Restores the system tick interrupt saved by [`suspend_system_tick`](Self::suspend_system_tick).
    fn resume_system_tick(&mut self);

    /// Halts the CPU in `mode` until an enabled interrupt fires.
    ///
    /// Implementations gate the peripheral clocks they can for the mode but
    /// must leave the tick timer and watchdog interrupts running.
    fn sleep(&mut self, mode: SleepMode);
}

/// Asynchronous-oscillator timer that raises a compare-match interrupt.
///
/// The interrupt handler itself lives in the board crate and feeds the
/// shared tick accumulator; this port only touches the timer registers.
pub trait TickTimer {
    /// Resets the counter and prescaler, then starts counting with `config`.
    fn start(&mut self, config: TickConfig);

    /// Stops the clock source and masks the compare interrupt.
    fn stop(&mut self);

    /// Ticks counted since the last compare match.
    fn counter(&self) -> u8;
}

/// Watchdog used purely as a wake-up source.
pub trait Watchdog {
    /// Arms the watchdog in interrupt-only mode (no system reset).
    fn start_interrupt(&mut self, period: WatchdogPeriod);

    fn disable(&mut self);
}

/// Sleep that powers volatile memory down. Execution resumes at the next boot.
pub trait DeepSleep {
    fn deep_sleep(&mut self, duration_ms: u32, radio: RadioMode) -> !;
}

/// Board-level control.
pub trait Platform {
    /// Performs a full system reset.
    fn restart(&mut self) -> !;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_mode_unknown_raw_is_idle() {
        assert_eq!(SleepMode::from(0), SleepMode::Idle);
        assert_eq!(SleepMode::from(1), SleepMode::PowerSave);
        assert_eq!(SleepMode::from(2), SleepMode::PowerDown);
        assert_eq!(SleepMode::from(7), SleepMode::Idle);
        assert_eq!(SleepMode::from(SleepMode::PowerSave.as_raw()), SleepMode::PowerSave);
    }

    #[test]
    fn test_watchdog_ladder_is_descending() {
        let ladder = WatchdogPeriod::LADDER;
        for pair in ladder.windows(2) {
            assert!(pair[0].as_millis() > pair[1].as_millis());
        }
        assert_eq!(ladder[0].as_millis(), 8000);
        assert_eq!(ladder[9].as_millis(), 16);
    }
}
