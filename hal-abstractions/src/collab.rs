//! External collaborators of the sensor node
//!
//! Sensor drivers, the pub/sub client and the firmware/config update flow
//! live outside this workspace. The node only needs these narrow interfaces.

/// Physical quantity reported by a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Quantity {
    /// Degrees Celsius
    Temperature,
    /// Percent relative humidity
    Humidity,
    /// Lux
    Light,
}

impl Quantity {
    /// Key used in published payloads.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Light => "light",
        }
    }
}

/// One sensor sample, fixed point with two decimals (`2150` is `21.50`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    pub quantity: Quantity,
    pub centi: i32,
}

impl Reading {
    pub const fn new(quantity: Quantity, centi: i32) -> Self {
        Self { quantity, centi }
    }
}

/// Sensor read failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorError {
    /// Device did not answer
    NotResponding,
    /// Answer failed its own integrity check
    InvalidData,
}

impl core::fmt::Display for SensorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotResponding => write!(f, "Sensor not responding"),
            Self::InvalidData => write!(f, "Sensor returned invalid data"),
        }
    }
}

impl core::error::Error for SensorError {}

pub trait Sensor {
    fn read(&mut self) -> Result<Reading, SensorError>;
}

/// Pub/sub client, already connected by the network layer.
pub trait Publisher {
    type Error;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;
}

/// Result of one firmware/configuration update check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateOutcome {
    /// Server answered, nothing new
    UpToDate,
    /// Something was installed
    Installed,
    /// Server unreachable or rejected the request
    Failed,
}

pub trait UpdateService {
    fn check_for_update(&mut self) -> UpdateOutcome;
}
