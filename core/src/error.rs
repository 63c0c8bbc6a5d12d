//! LPM error types

/// Low-power-mode operation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LpmError {
    /// Non-volatile storage rejected a read or write
    Storage,
    /// Auxiliary payload does not fit behind the control block
    PayloadTooLarge {
        /// Bytes the caller asked to persist
        requested: u32,
        /// Bytes available after the control block
        available: u32,
    },
}

impl core::fmt::Display for LpmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Storage => write!(f, "Non-volatile storage error"),
            Self::PayloadTooLarge {
                requested,
                available,
            } => write!(
                f,
                "Payload too large: {} bytes requested, {} available",
                requested, available
            ),
        }
    }
}

// Implement core::error::Error for no_std compatibility
impl core::error::Error for LpmError {}
