//! Busy-wait fallback for boards without a usable sleep state

use hal_abstractions::pins::OutputPin;
use hal_abstractions::Clock;

use super::SleepEngine;
use crate::time::Timer;

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
use defmt::trace;

#[cfg(not(feature = "defmt"))]
#[allow(unused_imports)]
use log::trace;

/// Spins on the system clock. The tick interrupt keeps running, so the clock
/// needs no correction afterwards.
pub struct BusyWaitEngine<C, LED> {
    clock: C,
    led_awake: LED,
}

impl<C: Clock, LED: OutputPin> BusyWaitEngine<C, LED> {
    pub fn new(clock: C, mut led_awake: LED) -> Self {
        led_awake.set_high().ok();
        Self { clock, led_awake }
    }
}

impl<C: Clock, LED: OutputPin> SleepEngine for BusyWaitEngine<C, LED> {
    type Error = core::convert::Infallible;

    fn idle(&mut self, duration_ms: u32) -> Result<(), Self::Error> {
        trace!("Busy wait: {} ms", duration_ms);
        let timer = Timer::new(&self.clock, duration_ms);
        self.led_awake.set_low().ok();
        while !timer.expired() {
            core::hint::spin_loop();
        }
        self.led_awake.set_high().ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use hal_abstractions::pins::ErrorType;
    use std::rc::Rc;

    /// Moves forward one millisecond per read
    struct SteppingClock(Cell<u32>);

    impl Clock for SteppingClock {
        fn now_ms(&self) -> u32 {
            let now = self.0.get();
            self.0.set(now.wrapping_add(1));
            now
        }

        fn now_rtc(&self) -> u32 {
            0
        }
    }

    struct Led(Rc<Cell<(bool, u32)>>);

    impl ErrorType for Led {
        type Error = core::convert::Infallible;
    }

    impl OutputPin for Led {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            let (_, toggles) = self.0.get();
            self.0.set((false, toggles + 1));
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            let (_, toggles) = self.0.get();
            self.0.set((true, toggles + 1));
            Ok(())
        }
    }

    #[test]
    fn test_spins_until_elapsed() {
        let led = Rc::new(Cell::new((false, 0)));
        let mut busy = BusyWaitEngine::new(SteppingClock(Cell::new(u32::MAX - 20)), Led(led.clone()));

        busy.idle(50).unwrap();

        assert!(busy.clock.0.get().wrapping_sub(u32::MAX - 20) >= 50);
        // High at construction, then low and high around the wait
        assert_eq!(led.get(), (true, 3));
    }

    #[test]
    fn test_zero_returns_immediately() {
        let led = Rc::new(Cell::new((false, 0)));
        let mut busy = BusyWaitEngine::new(SteppingClock(Cell::new(0)), Led(led.clone()));
        busy.idle(0).unwrap();
        assert_eq!(busy.clock.0.get(), 2);
    }
}
