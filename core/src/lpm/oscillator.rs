//! Oscillator-relative sleep
//!
//! The CPU is halted while a clock that survives the sleep state keeps
//! running. After every wake the measured time is added to the system
//! clock, so `now_ms()` stays continuous across sleeps far longer than one
//! timer period.
//!
//! Per segment, depending on what is left of the request:
//! - `>= 16 ms` in [`SleepMode::PowerDown`]: watchdog wake-up at the largest
//!   ladder period that fits. The watchdog has no sub-period counter in
//!   interrupt mode, so exactly the chosen period is credited.
//! - `> 1 ms`: tick timer in small or big profile, halt in `PowerSave` or
//!   `Idle`, credit the counted interrupts plus the rounded partial ticks.
//! - `<= 1 ms`: nothing to do.
//!
//! Targets an AVR-class MCU with an asynchronous timer and a watchdog
//! interrupt. No board in this repository implements [`LowPowerCpu`],
//! [`TickTimer`] and [`Watchdog`] yet, so the engine is only driven by the
//! simulated hardware in its tests.

use core::marker::PhantomData;

use hal_abstractions::pins::OutputPin;
use hal_abstractions::{Clock, LowPowerCpu, SleepMode, TickTimer, Watchdog, WatchdogPeriod};

use super::ticks::{CpuFrequency, HardwareTimerController, TickProfile};
use super::SleepEngine;
use crate::time::{elapsed_since, SystemClock};

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
use defmt::{debug, trace};

#[cfg(not(feature = "defmt"))]
#[allow(unused_imports)]
use log::{debug, trace};

/// Shortest request served by the watchdog branch
const WATCHDOG_MIN_MS: u32 = 16;

/// Oscillator engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OscillatorConfig {
    /// `PowerDown` enables the watchdog branch; tick segments halt in
    /// `PowerSave` when configured and in `Idle` otherwise.
    pub mode: SleepMode,
}

impl Default for OscillatorConfig {
    fn default() -> Self {
        Self {
            mode: SleepMode::Idle,
        }
    }
}

/// Largest watchdog period that does not exceed `remaining_ms`.
///
/// Requests shorter than the smallest period get the smallest period.
pub fn select_watchdog_period(remaining_ms: u32) -> WatchdogPeriod {
    WatchdogPeriod::LADDER
        .into_iter()
        .find(|period| period.as_millis() <= remaining_ms)
        .unwrap_or(WatchdogPeriod::Ms16)
}

/// Sleep engine for CPUs with an asynchronous timekeeping oscillator.
///
/// `F` fixes the CPU frequency and with it the tick timer profiles.
pub struct OscillatorSleepEngine<'a, F, CPU, T, W, LED> {
    config: OscillatorConfig,
    clock: &'a SystemClock,
    cpu: CPU,
    timer: HardwareTimerController<'a, T>,
    watchdog: W,
    led_awake: LED,
    _frequency: PhantomData<F>,
}

impl<'a, F, CPU, T, W, LED> OscillatorSleepEngine<'a, F, CPU, T, W, LED>
where
    F: CpuFrequency,
    CPU: LowPowerCpu,
    T: TickTimer,
    W: Watchdog,
    LED: OutputPin,
{
    pub fn new(
        config: OscillatorConfig,
        clock: &'a SystemClock,
        cpu: CPU,
        timer: HardwareTimerController<'a, T>,
        mut watchdog: W,
        mut led_awake: LED,
    ) -> Self {
        led_awake.set_high().ok();
        watchdog.disable();
        Self {
            config,
            clock,
            cpu,
            timer,
            watchdog,
            led_awake,
            _frequency: PhantomData,
        }
    }

    pub fn config(&self) -> OscillatorConfig {
        self.config
    }

    /// Sleeps for about `duration_ms` and returns the time credited to the clock.
    pub fn sleep_for(&mut self, duration_ms: u32) -> u32 {
        let mut remaining = duration_ms;
        let mut credited = 0u32;
        let mut start = self.clock.now_ms();

        while remaining > 0 {
            if remaining >= WATCHDOG_MIN_MS && self.config.mode == SleepMode::PowerDown {
                credited = credited.wrapping_add(self.watchdog_segment(remaining));
            } else if remaining > 1 {
                credited = credited.wrapping_add(self.tick_segment(remaining));
            } else {
                // Not worth sleeping
                break;
            }

            let now = self.clock.now_ms();
            let delta = elapsed_since(now, start);
            remaining = remaining.saturating_sub(delta);
            start = now;
            trace!("Sleep segment done, {} ms left", remaining);
        }

        credited
    }

    fn watchdog_segment(&mut self, remaining: u32) -> u32 {
        let period = select_watchdog_period(remaining);
        debug!("Watchdog sleep: {} ms", period.as_millis());

        self.cpu.suspend_system_tick();
        self.watchdog.start_interrupt(period);
        self.led_awake.set_low().ok();
        self.cpu.sleep(SleepMode::PowerDown);
        self.led_awake.set_high().ok();
        self.watchdog.disable();

        let elapsed = period.as_millis();
        self.clock.advance(elapsed);
        self.cpu.resume_system_tick();
        elapsed
    }

    fn tick_segment(&mut self, remaining: u32) -> u32 {
        let profile = Self::profile_for(remaining);
        let mode = match self.config.mode {
            SleepMode::PowerSave => SleepMode::PowerSave,
            _ => SleepMode::Idle,
        };
        debug!(
            "Tick sleep: {} ms left, {} ms per interrupt",
            remaining, profile.ms_per_interrupt
        );

        self.cpu.suspend_system_tick();
        self.timer.start(profile.config());
        self.led_awake.set_low().ok();
        self.cpu.sleep(mode);
        self.led_awake.set_high().ok();
        self.timer.stop();

        let elapsed = profile.elapsed_ms(self.timer.read_accumulated());
        self.clock.advance(elapsed);
        self.cpu.resume_system_tick();
        elapsed
    }

    fn profile_for(remaining: u32) -> TickProfile {
        if remaining < F::BIG.ms_per_interrupt {
            F::SMALL
        } else {
            F::BIG
        }
    }
}

impl<'a, F, CPU, T, W, LED> SleepEngine for OscillatorSleepEngine<'a, F, CPU, T, W, LED>
where
    F: CpuFrequency,
    CPU: LowPowerCpu,
    T: TickTimer,
    W: Watchdog,
    LED: OutputPin,
{
    type Error = core::convert::Infallible;

    fn idle(&mut self, duration_ms: u32) -> Result<(), Self::Error> {
        self.sleep_for(duration_ms);
        Ok(())
    }
}
