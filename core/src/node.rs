//! Sensor node wake/publish/sleep cycle
//!
//! One cycle reads every sensor, publishes a `name=value` list, runs the
//! update check when it is due and then hands the time until the next
//! publish to a sleep engine. [`SleepMemory`] is the state that has to
//! survive a destructive sleep; engines implementing
//! [`ResumableSleep`] carry it as their auxiliary payload.

use core::fmt::Write;

use hal_abstractions::{Clock, NvStorage, Publisher, Reading, Sensor, UpdateOutcome, UpdateService};
use heapless::String;

use crate::lpm::{ResumableSleep, SleepEngine};
use crate::storage::{BlobError, BlobStore};
use crate::time::Timer;

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
use defmt::{debug, info, warn};

#[cfg(not(feature = "defmt"))]
#[allow(unused_imports)]
use log::{debug, info, warn};

/// Published payload capacity in bytes
pub const PAYLOAD_CAPACITY: usize = 128;

const CONFIG_SIZE: usize = 12;

/// Node configuration, persisted in a [`BlobStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeConfig {
    /// Time between two publishes
    pub publish_period_ms: u32,
    /// Minimum wall-clock time between two update checks
    pub update_interval_secs: u32,
    /// Delay before retrying a failed publish
    pub retry_period_ms: u32,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            publish_period_ms: 60_000,
            update_interval_secs: 24 * 60 * 60,
            retry_period_ms: 30_000,
        }
    }
}

impl NodeConfig {
    pub fn to_bytes(&self) -> [u8; CONFIG_SIZE] {
        let mut bytes = [0u8; CONFIG_SIZE];
        bytes[0..4].copy_from_slice(&self.publish_period_ms.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.update_interval_secs.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.retry_period_ms.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CONFIG_SIZE {
            return None;
        }
        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Some(Self {
            publish_period_ms: word(0),
            update_interval_secs: word(4),
            retry_period_ms: word(8),
        })
    }

    /// Stored configuration, or the defaults if there is none or it is damaged.
    pub fn load<S: NvStorage>(store: &mut BlobStore<S>) -> Self {
        match store.stored_len() {
            Ok(0) => {
                info!("No stored configuration, using defaults");
                return Self::default();
            }
            Ok(len) if len as usize != CONFIG_SIZE => {
                warn!("Stored configuration has {} bytes, using defaults", len);
                return Self::default();
            }
            _ => {}
        }

        let mut buf = [0u8; CONFIG_SIZE];
        match store.read(&mut buf) {
            Ok(len) => match Self::from_bytes(&buf[..len]) {
                Some(config) => {
                    debug!("Configuration loaded");
                    config
                }
                None => Self::default(),
            },
            Err(e) => {
                warn!("Stored configuration unusable: {:?}", e);
                Self::default()
            }
        }
    }

    pub fn store<S: NvStorage>(&self, store: &mut BlobStore<S>) -> Result<(), BlobError> {
        store.write(&self.to_bytes())
    }
}

/// Node state that survives destructive sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepMemory {
    /// Wall-clock second of the last successful update check, 0 if never.
    /// Checks only run once the wall clock is synced, so a recorded check
    /// is never 0.
    pub last_update_secs: u32,
}

impl SleepMemory {
    pub const SIZE: usize = 4;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        self.last_update_secs.to_le_bytes()
    }

    pub fn decode(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            last_update_secs: u32::from_le_bytes(*bytes),
        }
    }
}

/// Due if there never was an update, or the wall clock is known and the
/// interval has passed since the last one.
pub fn is_update_due(now_rtc: u32, last_update_secs: u32, interval_secs: u32) -> bool {
    last_update_secs == 0 || (now_rtc != 0 && last_update_secs.saturating_add(interval_secs) < now_rtc)
}

/// Next wake-up: the publish period, or a sooner retry after a failure.
pub struct Schedule<C> {
    publish: Timer<C>,
    retry: Option<Timer<C>>,
}

impl<C: Clock + Clone> Schedule<C> {
    pub fn new(clock: C, config: &NodeConfig) -> Self {
        Self {
            publish: Timer::new(clock, config.publish_period_ms),
            retry: None,
        }
    }

    pub fn published(&mut self) {
        self.publish.reset();
        self.retry = None;
    }

    /// A failed publish is retried after `retry_ms`, but never later than
    /// the next regular publish.
    pub fn failed(&mut self, retry_ms: u32) {
        self.retry = Some(Timer::bounded(&self.publish, 0, retry_ms));
    }

    pub fn idle_duration(&self) -> u32 {
        match &self.retry {
            Some(retry) => retry.left().min(self.publish.left()),
            None => self.publish.left(),
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CycleReport {
    pub readings: u8,
    pub sensor_failures: u8,
    pub published: bool,
    /// `None` when no update check was due
    pub update: Option<UpdateOutcome>,
}

pub struct SensorNode<'a, C> {
    config: NodeConfig,
    topic: &'a str,
    clock: C,
    memory: SleepMemory,
    schedule: Schedule<C>,
}

impl<'a, C: Clock + Clone> SensorNode<'a, C> {
    pub fn new(config: NodeConfig, topic: &'a str, clock: C, memory: SleepMemory) -> Self {
        let schedule = Schedule::new(clock.clone(), &config);
        Self {
            config,
            topic,
            clock,
            memory,
            schedule,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn memory(&self) -> SleepMemory {
        self.memory
    }

    pub fn run_cycle<P, U>(
        &mut self,
        sensors: &mut [&mut dyn Sensor],
        publisher: &mut P,
        updater: &mut U,
    ) -> CycleReport
    where
        P: Publisher,
        U: UpdateService,
    {
        let mut report = CycleReport::default();
        let mut payload: String<PAYLOAD_CAPACITY> = String::new();

        for sensor in sensors.iter_mut() {
            match sensor.read() {
                Ok(reading) => {
                    if append_reading(&mut payload, &reading).is_err() {
                        warn!("Payload full, dropping {}", reading.quantity.name());
                        continue;
                    }
                    report.readings = report.readings.saturating_add(1);
                }
                Err(e) => {
                    warn!("Sensor read failed: {:?}", e);
                    report.sensor_failures = report.sensor_failures.saturating_add(1);
                }
            }
        }

        match publisher.publish(self.topic, payload.as_bytes()) {
            Ok(()) => {
                debug!("Published {} bytes", payload.len());
                report.published = true;
                self.schedule.published();
            }
            Err(_) => {
                warn!("Publish failed, retry in {} ms", self.config.retry_period_ms);
                self.schedule.failed(self.config.retry_period_ms);
            }
        }

        let now_rtc = self.clock.now_rtc();
        if now_rtc == 0 {
            // The check time could not be recorded
            debug!("Wall clock not synced, skipping update check");
        } else if is_update_due(now_rtc, self.memory.last_update_secs, self.config.update_interval_secs) {
            let outcome = updater.check_for_update();
            info!("Update check: {:?}", outcome);
            if outcome != UpdateOutcome::Failed {
                self.memory.last_update_secs = now_rtc;
            }
            report.update = Some(outcome);
        }

        report
    }

    /// Milliseconds until the next scheduled event.
    pub fn idle_duration(&self) -> u32 {
        self.schedule.idle_duration()
    }

    pub fn sleep_until_next<E: SleepEngine>(&mut self, engine: &mut E) -> Result<(), E::Error> {
        let duration = self.idle_duration();
        info!("Idle for {} ms", duration);
        engine.idle(duration)
    }

    /// Like [`sleep_until_next`](Self::sleep_until_next), carrying the
    /// [`SleepMemory`] through the sleep.
    pub fn sleep_preserving<E: ResumableSleep>(&mut self, engine: &mut E) -> Result<(), E::Error> {
        let duration = self.idle_duration();
        info!("Idle for {} ms, preserving state", duration);
        engine.idle_preserving(duration, &self.memory.encode())
    }
}

/// Appends `name=value` with two decimals, comma separated.
fn append_reading<const N: usize>(payload: &mut String<N>, reading: &Reading) -> core::fmt::Result {
    let rollback = payload.len();
    let separator = if payload.is_empty() { "" } else { "," };
    let sign = if reading.centi < 0 { "-" } else { "" };
    let magnitude = reading.centi.unsigned_abs();
    let result = write!(
        payload,
        "{}{}={}{}.{:02}",
        separator,
        reading.quantity.name(),
        sign,
        magnitude / 100,
        magnitude % 100
    );
    if result.is_err() {
        payload.truncate(rollback);
    }
    result
}
