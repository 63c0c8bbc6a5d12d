//! Bench stand-ins for the network side
//!
//! The node publishes over the debug probe until the board gets a network
//! stack: payloads go to the RTT log and the update check always reports
//! the firmware as current.

use core::convert::Infallible;

use defmt::info;
use hal_abstractions::{Publisher, UpdateOutcome, UpdateService};

pub struct RttPublisher;

impl Publisher for RttPublisher {
    type Error = Infallible;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error> {
        match core::str::from_utf8(payload) {
            Ok(text) => info!("[{}] {}", topic, text),
            Err(_) => info!("[{}] {=[u8]:x}", topic, payload),
        }
        Ok(())
    }
}

pub struct NoUpdateServer;

impl UpdateService for NoUpdateServer {
    fn check_for_update(&mut self) -> UpdateOutcome {
        UpdateOutcome::UpToDate
    }
}
