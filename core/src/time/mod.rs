//! System time
//!
//! ## Architecture
//! - [`SystemClock`] holds the millisecond counter since boot. The board's
//!   tick interrupt increments it; sleep engines back-fill the time the tick
//!   was stopped with [`SystemClock::advance`].
//! - Wall-clock seconds are derived from an anchor captured at network time
//!   sync (Unix seconds + millisecond count at that instant), so they keep
//!   moving across oscillator-relative sleeps without a hardware RTC.
//! - [`timer`] has the wrap-safe elapsed/remaining helpers and [`Timer`].
//!
//! Both the counter and the anchor are 32-bit: the counter wraps after
//! ~49.7 days and the wall clock must be re-anchored at least that often.

mod clock;
pub mod timer;

pub use clock::SystemClock;
pub use timer::{elapsed_since, has_passed, time_left, Timer};
