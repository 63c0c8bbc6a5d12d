//! Time sources

/// Millisecond and wall-clock time as seen by the rest of the firmware.
///
/// Implementations must be non-blocking and callable from any context,
/// including code that runs right next to interrupt handlers.
pub trait Clock {
    /// Milliseconds since boot. Wraps at `u32::MAX`.
    fn now_ms(&self) -> u32;

    /// UTC seconds since 1970-01-01, or 0 if the wall clock was never synchronized.
    fn now_rtc(&self) -> u32;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }

    fn now_rtc(&self) -> u32 {
        (**self).now_rtc()
    }
}
