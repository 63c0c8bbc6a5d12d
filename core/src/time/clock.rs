//! Millisecond counter shared between the tick interrupt and the main flow

use core::cell::Cell;
use critical_section::Mutex;
use hal_abstractions::Clock;

/// Wall-clock calibration point
#[derive(Debug, Clone, Copy)]
struct WallClockAnchor {
    /// Unix seconds at calibration
    unix_secs: u32,
    /// Millisecond count captured at the same instant
    millis: u32,
}

/// Process-wide clock state.
///
/// `const`-constructible so boards can keep it in a `static` and reach it
/// from the tick interrupt handler:
///
/// ```ignore
/// static CLOCK: SystemClock = SystemClock::new();
///
/// #[task(binds = SysTick)]
/// fn tick(_cx: tick::Context) {
///     CLOCK.on_tick();
/// }
/// ```
pub struct SystemClock {
    millis: Mutex<Cell<u32>>,
    anchor: Mutex<Cell<Option<WallClockAnchor>>>,
}

impl SystemClock {
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Clock whose counter already reads `millis`.
    pub const fn starting_at(millis: u32) -> Self {
        Self {
            millis: Mutex::new(Cell::new(millis)),
            anchor: Mutex::new(Cell::new(None)),
        }
    }

    /// One millisecond elapsed. Call from the system tick interrupt only.
    pub fn on_tick(&self) {
        critical_section::with(|cs| {
            let millis = self.millis.borrow(cs);
            millis.set(millis.get().wrapping_add(1));
        });
    }

    /// Adds time measured while the tick interrupt was stopped.
    ///
    /// Runs with interrupts masked so the bulk update cannot interleave with
    /// [`on_tick`](Self::on_tick).
    pub fn advance(&self, delta_ms: u32) {
        critical_section::with(|cs| {
            let millis = self.millis.borrow(cs);
            millis.set(millis.get().wrapping_add(delta_ms));
        });
    }

    /// Calibrates the wall clock to `unix_secs` at the current millisecond count.
    ///
    /// Passing 0 marks the wall clock as unknown again.
    pub fn set_rtc(&self, unix_secs: u32) {
        critical_section::with(|cs| {
            let anchor = (unix_secs != 0).then(|| WallClockAnchor {
                unix_secs,
                millis: self.millis.borrow(cs).get(),
            });
            self.anchor.borrow(cs).set(anchor);
        });
    }

    pub fn is_rtc_synced(&self) -> bool {
        critical_section::with(|cs| self.anchor.borrow(cs).get().is_some())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        critical_section::with(|cs| self.millis.borrow(cs).get())
    }

    fn now_rtc(&self) -> u32 {
        critical_section::with(|cs| match self.anchor.borrow(cs).get() {
            Some(anchor) => {
                let elapsed_ms = self.millis.borrow(cs).get().wrapping_sub(anchor.millis);
                anchor.unix_secs.wrapping_add(elapsed_ms / 1000)
            }
            None => 0,
        })
    }
}
