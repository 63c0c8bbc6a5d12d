//! Persistent-sleep-survival engine
//!
//! For chips whose deepest sleep loses RAM and ends in a reset. A countdown
//! is split into chunks of at most one hour; before every chunk the
//! [`ControlBlock`] and the caller's auxiliary payload are written to
//! non-volatile storage under one CRC-32. On the next boot
//! [`check`](PersistentSleepEngine::check) validates the record and either
//! continues the countdown or reports the state as lost.
//!
//! ```text
//! idle(ms) -> Set --chunk--> Counting --chunk--> ... --last chunk--> Done
//! ```
//!
//! [`arm`](PersistentSleepEngine::arm) and
//! [`recover`](PersistentSleepEngine::recover) do all the bookkeeping and
//! return the chunk to sleep for; `idle` and `check` add the final call into
//! [`DeepSleep`].

use core::convert::Infallible;

use hal_abstractions::pins::InputPin;
use hal_abstractions::{Clock, DeepSleep, NvStorage, RadioMode};

use super::record::{ControlBlock, RecordError, SleepState, CONTROL_BLOCK_SIZE};
use super::{ResumableSleep, SleepEngine};
use crate::error::LpmError;

#[cfg(feature = "defmt")]
#[allow(unused_imports)]
use defmt::{debug, error, info, warn};

#[cfg(not(feature = "defmt"))]
#[allow(unused_imports)]
use log::{debug, error, info, warn};

const PAYLOAD_OFFSET: u32 = CONTROL_BLOCK_SIZE as u32;

/// Persistent engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PersistentSleepConfig {
    /// Shortest destructive sleep ever issued
    pub min_sleep_ms: u32,
    /// Longest single chunk
    pub max_chunk_ms: u32,
}

impl Default for PersistentSleepConfig {
    fn default() -> Self {
        Self {
            min_sleep_ms: 100,
            max_chunk_ms: 60 * 60 * 1000,
        }
    }
}

/// One destructive sleep to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepChunk {
    /// Already raised to the configured minimum
    pub duration_ms: u32,
    pub radio: RadioMode,
}

/// Outcome of the boot-time check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recovery {
    /// Valid record with time left: sleep for the chunk.
    Resume(SleepChunk),
    /// Valid record, countdown finished. The payload was restored.
    Completed,
    /// Nothing trustworthy in storage. Proceed as after a cold boot.
    Lost(LossReason),
}

impl Recovery {
    /// Whether persisted state was recovered.
    pub fn is_recovered(&self) -> bool {
        !matches!(self, Self::Lost(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LossReason {
    /// External reset pin asserted
    ResetRequested,
    /// Checksum mismatch or unknown state
    Corrupted,
    /// Storage access failed
    Storage,
    /// Caller buffer larger than the storage region
    PayloadTooLarge,
}

/// Deep sleep engine backed by non-volatile storage.
pub struct PersistentSleepEngine<C, S, D> {
    config: PersistentSleepConfig,
    clock: C,
    storage: S,
    sleeper: D,
}

impl<C, S, D> PersistentSleepEngine<C, S, D>
where
    C: Clock,
    S: NvStorage,
    D: DeepSleep,
{
    pub fn new(config: PersistentSleepConfig, clock: C, storage: S, sleeper: D) -> Self {
        Self {
            config,
            clock,
            storage,
            sleeper,
        }
    }

    pub fn config(&self) -> PersistentSleepConfig {
        self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Largest auxiliary payload that fits behind the control block.
    pub fn max_data_size(&self) -> u32 {
        self.storage.capacity().saturating_sub(PAYLOAD_OFFSET)
    }

    /// Starts a countdown of `duration_ms`, persists `aux` and returns the
    /// first chunk.
    ///
    /// Nothing is written when `aux` does not fit.
    pub fn arm(&mut self, duration_ms: u32, aux: &[u8]) -> Result<SleepChunk, LpmError> {
        self.ensure_fits(aux.len())?;
        debug!("Arming persistent sleep: {} ms, {} bytes", duration_ms, aux.len());

        self.storage
            .write_region(PAYLOAD_OFFSET, aux)
            .map_err(|_| storage_error())?;

        self.next_chunk(ControlBlock::new(SleepState::Set, duration_ms), aux)
    }

    /// Boot-time validation of the persisted record.
    ///
    /// `aux` receives the payload and must be as long as the one given to
    /// [`arm`](Self::arm). It is zeroed whenever the state is lost.
    pub fn recover(&mut self, reset_requested: bool, aux: Option<&mut [u8]>) -> Recovery {
        let mut empty = [0u8; 0];
        let payload = match aux {
            Some(buf) => buf,
            None => &mut empty[..],
        };

        if reset_requested {
            warn!("Reset pin asserted, discarding persisted state");
            payload.fill(0);
            self.reset_record();
            return Recovery::Lost(LossReason::ResetRequested);
        }

        if self.ensure_fits(payload.len()).is_err() {
            payload.fill(0);
            return Recovery::Lost(LossReason::PayloadTooLarge);
        }

        let mut raw = [0u8; CONTROL_BLOCK_SIZE];
        let read = self
            .storage
            .read_region(0, &mut raw)
            .and_then(|()| self.storage.read_region(PAYLOAD_OFFSET, payload));
        if read.is_err() {
            error!("Persisted state could not be read");
            payload.fill(0);
            return Recovery::Lost(LossReason::Storage);
        }

        let block = match ControlBlock::decode(&raw, payload) {
            Ok(block) => block,
            Err(RecordError::ChecksumMismatch { stored, computed }) => {
                warn!(
                    "Persisted state corrupted: stored {}, computed {}",
                    stored, computed
                );
                payload.fill(0);
                self.reset_record();
                return Recovery::Lost(LossReason::Corrupted);
            }
            Err(RecordError::UnknownState(raw_state)) => {
                warn!("Persisted state unknown: {}", raw_state);
                payload.fill(0);
                self.reset_record();
                return Recovery::Lost(LossReason::Corrupted);
            }
        };

        if block.state == SleepState::Done {
            info!("Persistent sleep completed");
            return Recovery::Completed;
        }

        match self.next_chunk(block, payload) {
            Ok(chunk) => {
                info!("Resuming persistent sleep: {} ms", chunk.duration_ms);
                Recovery::Resume(chunk)
            }
            Err(_) => {
                payload.fill(0);
                Recovery::Lost(LossReason::Storage)
            }
        }
    }

    /// Persists `aux` and sleeps for `duration_ms`.
    ///
    /// Returns only when the countdown cannot be persisted.
    pub fn idle(&mut self, duration_ms: u32, aux: Option<&[u8]>) -> Result<Infallible, LpmError> {
        let chunk = self.arm(duration_ms, aux.unwrap_or(&[]))?;
        self.enter(chunk)
    }

    /// Boot-time check. Returns whether persisted state was recovered;
    /// continues an unfinished countdown without returning.
    pub fn check<P: InputPin>(&mut self, reset_pin: &mut P, aux: Option<&mut [u8]>) -> bool {
        // Pulled up, active low
        let reset_requested = reset_pin.is_low().unwrap_or(false);
        match self.recover(reset_requested, aux) {
            Recovery::Resume(chunk) => self.enter(chunk),
            recovery => recovery.is_recovered(),
        }
    }

    /// One state machine step from `Set` or `Counting`. Persists the
    /// updated block and returns the chunk to sleep for.
    fn next_chunk(&mut self, mut block: ControlBlock, payload: &[u8]) -> Result<SleepChunk, LpmError> {
        if block.state == SleepState::Counting {
            let boot_ms = self.clock.now_ms();
            block.remaining_ms = block.remaining_ms.saturating_sub(boot_ms);
        }

        let (chunk_ms, radio) = if block.remaining_ms > self.config.max_chunk_ms {
            block.state = SleepState::Counting;
            (self.config.max_chunk_ms, RadioMode::Default)
        } else {
            block.state = SleepState::Done;
            (block.remaining_ms, RadioMode::Disabled)
        };
        block.remaining_ms -= chunk_ms;

        self.write_block(&block, payload)?;
        debug!(
            "Next chunk {} ms, {} ms left after it",
            chunk_ms, block.remaining_ms
        );
        Ok(self.floor(chunk_ms, radio))
    }

    fn floor(&self, chunk_ms: u32, radio: RadioMode) -> SleepChunk {
        SleepChunk {
            duration_ms: chunk_ms.max(self.config.min_sleep_ms),
            radio,
        }
    }

    fn ensure_fits(&self, len: usize) -> Result<(), LpmError> {
        let available = self.max_data_size();
        if len > available as usize {
            warn!("Payload of {} bytes exceeds {} available", len, available);
            return Err(LpmError::PayloadTooLarge {
                requested: len as u32,
                available,
            });
        }
        Ok(())
    }

    fn write_block(&mut self, block: &ControlBlock, payload: &[u8]) -> Result<(), LpmError> {
        self.storage
            .write_region(0, &block.encode(payload))
            .map_err(|_| storage_error())
    }

    /// Back to `Done`/0 with no payload.
    fn reset_record(&mut self) {
        if self.write_block(&ControlBlock::cleared(), &[]).is_err() {
            error!("Failed to reset persisted state");
        }
    }

    fn enter(&mut self, chunk: SleepChunk) -> ! {
        info!("Deep sleep for {} ms", chunk.duration_ms);
        self.sleeper.deep_sleep(chunk.duration_ms, chunk.radio)
    }
}

fn storage_error() -> LpmError {
    error!("Non-volatile storage access failed");
    LpmError::Storage
}

impl<C, S, D> SleepEngine for PersistentSleepEngine<C, S, D>
where
    C: Clock,
    S: NvStorage,
    D: DeepSleep,
{
    type Error = LpmError;

    fn idle(&mut self, duration_ms: u32) -> Result<(), Self::Error> {
        match PersistentSleepEngine::idle(self, duration_ms, None) {
            Ok(never) => match never {},
            Err(e) => Err(e),
        }
    }
}

impl<C, S, D> ResumableSleep for PersistentSleepEngine<C, S, D>
where
    C: Clock,
    S: NvStorage,
    D: DeepSleep,
{
    fn idle_preserving(&mut self, duration_ms: u32, aux: &[u8]) -> Result<(), Self::Error> {
        match PersistentSleepEngine::idle(self, duration_ms, Some(aux)) {
            Ok(never) => match never {},
            Err(e) => Err(e),
        }
    }

    fn check_resume<P: InputPin>(&mut self, reset_pin: &mut P, aux: Option<&mut [u8]>) -> bool {
        self.check(reset_pin, aux)
    }

    fn max_data_size(&self) -> u32 {
        PersistentSleepEngine::max_data_size(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RamStorage, StorageError};
    use crate::time::SystemClock;
    use hal_abstractions::pins::{ErrorKind, ErrorType};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    const HOUR: u32 = 3_600_000;

    /// Stands in for the reset that ends a deep sleep.
    #[derive(Debug, PartialEq)]
    struct Slept(u32, RadioMode);

    struct Sleeper;

    impl DeepSleep for Sleeper {
        fn deep_sleep(&mut self, duration_ms: u32, radio: RadioMode) -> ! {
            std::panic::panic_any(Slept(duration_ms, radio))
        }
    }

    struct Pin {
        low: bool,
    }

    impl ErrorType for Pin {
        type Error = core::convert::Infallible;
    }

    impl InputPin for Pin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.low)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(self.low)
        }
    }

    struct BrokenPin;

    impl ErrorType for BrokenPin {
        type Error = ErrorKind;
    }

    impl InputPin for BrokenPin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Err(ErrorKind::Other)
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Err(ErrorKind::Other)
        }
    }

    /// Storage that fails every access
    struct DeadStorage;

    impl NvStorage for DeadStorage {
        type Error = StorageError;

        fn capacity(&self) -> u32 {
            64
        }

        fn read_region(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error> {
            Err(StorageError::OutOfBounds {
                offset,
                len: buf.len() as u32,
            })
        }

        fn write_region(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error> {
            Err(StorageError::OutOfBounds {
                offset,
                len: data.len() as u32,
            })
        }
    }

    type Engine<'a> = PersistentSleepEngine<&'a SystemClock, RamStorage<64>, Sleeper>;

    fn engine(clock: &SystemClock, storage: RamStorage<64>) -> Engine<'_> {
        PersistentSleepEngine::new(PersistentSleepConfig::default(), clock, storage, Sleeper)
    }

    fn stored_block(engine: &Engine<'_>, payload: &[u8]) -> ControlBlock {
        stored_block_raw(engine.storage(), payload)
    }

    fn stored_block_raw(storage: &RamStorage<64>, payload: &[u8]) -> ControlBlock {
        let mut raw = [0u8; CONTROL_BLOCK_SIZE];
        raw.copy_from_slice(&storage.as_bytes()[..CONTROL_BLOCK_SIZE]);
        ControlBlock::decode(&raw, payload).unwrap()
    }

    #[test]
    fn test_max_data_size() {
        let clock = SystemClock::new();
        let lpm = engine(&clock, RamStorage::new());
        assert_eq!(lpm.max_data_size(), 64 - 12);
    }

    #[test]
    fn test_long_sleep_is_clamped_to_one_hour() {
        let clock = SystemClock::new();
        let mut lpm = engine(&clock, RamStorage::new());

        let chunk = lpm.arm(HOUR + 1, &[]).unwrap();
        assert_eq!(
            chunk,
            SleepChunk {
                duration_ms: HOUR,
                radio: RadioMode::Default
            }
        );
        assert_eq!(
            stored_block(&lpm, &[]),
            ControlBlock::new(SleepState::Counting, 1)
        );
    }

    #[test]
    fn test_short_sleep_finishes_in_one_chunk() {
        let clock = SystemClock::new();
        let mut lpm = engine(&clock, RamStorage::new());

        let chunk = lpm.arm(HOUR, &[7, 7]).unwrap();
        assert_eq!(
            chunk,
            SleepChunk {
                duration_ms: HOUR,
                radio: RadioMode::Disabled
            }
        );
        assert_eq!(
            stored_block(&lpm, &[7, 7]),
            ControlBlock::new(SleepState::Done, 0)
        );
    }

    #[test]
    fn test_minimum_sleep_floor() {
        let clock = SystemClock::new();
        let mut lpm = engine(&clock, RamStorage::new());
        assert_eq!(lpm.arm(3, &[]).unwrap().duration_ms, 100);
        assert_eq!(lpm.arm(0, &[]).unwrap().duration_ms, 100);
        assert_eq!(lpm.arm(250, &[]).unwrap().duration_ms, 250);
    }

    #[test]
    fn test_zero_request_arms_final_chunk() {
        let clock = SystemClock::new();
        let mut lpm = engine(&clock, RamStorage::new());

        let chunk = lpm.arm(0, &[4]).unwrap();
        assert_eq!(
            chunk,
            SleepChunk {
                duration_ms: 100,
                radio: RadioMode::Disabled
            }
        );
        let written = lpm.storage().as_bytes().to_vec();
        assert_eq!(stored_block(&lpm, &[4]), ControlBlock::new(SleepState::Done, 0));

        // A finished countdown is reported and left as it is
        let mut aux = [0u8; 1];
        assert_eq!(lpm.recover(false, Some(&mut aux)), Recovery::Completed);
        assert_eq!(lpm.recover(false, Some(&mut aux)), Recovery::Completed);
        assert_eq!(aux, [4]);
        assert_eq!(lpm.storage().as_bytes(), &written[..]);
    }

    #[test]
    fn test_countdown_conservation() {
        let total = 3 * HOUR + 5_000;
        let payload = [0xA5, 0x5A, 0x01, 0x02];

        let clock = SystemClock::new();
        let mut lpm = engine(&clock, RamStorage::new());
        let mut slept = lpm.arm(total, &payload).unwrap().duration_ms;
        let mut storage = lpm.storage;
        let mut states = vec![stored_block_raw(&storage, &payload).state];

        // Every boot takes a little time before check runs
        let boot_ms = 250;
        let mut booted = 0;
        loop {
            let clock = SystemClock::starting_at(boot_ms);
            let mut lpm = engine(&clock, storage);
            let mut aux = [0u8; 4];
            let recovery = lpm.recover(false, Some(&mut aux));
            assert_eq!(aux, payload);
            storage = lpm.storage;
            match recovery {
                Recovery::Resume(chunk) => {
                    slept += chunk.duration_ms;
                    booted += boot_ms;
                    states.push(stored_block_raw(&storage, &payload).state);
                }
                Recovery::Completed => break,
                Recovery::Lost(reason) => panic!("lost state: {:?}", reason),
            }
        }

        assert_eq!(slept + booted, total);
        assert_eq!(
            states,
            [
                SleepState::Counting,
                SleepState::Counting,
                SleepState::Counting,
                SleepState::Done
            ]
        );
    }

    #[test]
    fn test_any_single_bit_flip_is_detected() {
        let payload = [0x10, 0x20, 0x30, 0x40];
        let clock = SystemClock::new();
        let mut lpm = engine(&clock, RamStorage::new());

        for bit in 0..(CONTROL_BLOCK_SIZE + payload.len()) * 8 {
            lpm.arm(2 * HOUR, &payload).unwrap();
            lpm.storage_mut().as_bytes_mut()[bit / 8] ^= 1 << (bit % 8);

            let mut aux = [0xFFu8; 4];
            assert_eq!(
                lpm.recover(false, Some(&mut aux)),
                Recovery::Lost(LossReason::Corrupted),
                "bit {}",
                bit
            );
            assert_eq!(aux, [0; 4], "bit {}", bit);
        }
    }

    #[test]
    fn test_unknown_state_resets_record() {
        let clock = SystemClock::new();
        let mut storage = RamStorage::<64>::new();
        let mut raw = ControlBlock::new(SleepState::Set, 500).encode(&[]);
        raw[4] = 7;
        let crc = crate::crc::crc32(&raw[4..]);
        raw[..4].copy_from_slice(&crc.to_le_bytes());
        storage.as_bytes_mut()[..CONTROL_BLOCK_SIZE].copy_from_slice(&raw);

        let mut lpm = engine(&clock, storage);
        assert_eq!(
            lpm.recover(false, None),
            Recovery::Lost(LossReason::Corrupted)
        );
        assert_eq!(stored_block(&lpm, &[]), ControlBlock::cleared());
    }

    #[test]
    fn test_reset_pin_wins_over_valid_record() {
        let clock = SystemClock::new();
        let mut lpm = engine(&clock, RamStorage::new());
        lpm.arm(2 * HOUR, &[1, 2, 3, 4]).unwrap();

        let mut aux = [0u8; 4];
        assert!(!lpm.check(&mut Pin { low: true }, Some(&mut aux)));
        assert_eq!(aux, [0; 4]);
        assert_eq!(stored_block(&lpm, &[]), ControlBlock::cleared());
    }

    #[test]
    fn test_check_resumes_by_sleeping() {
        let clock = SystemClock::starting_at(40);
        let mut lpm = engine(&clock, RamStorage::new());
        lpm.arm(HOUR + 1_000, &[9]).unwrap();

        let mut aux = [0u8; 1];
        let result = catch_unwind(AssertUnwindSafe(|| {
            lpm.check(&mut Pin { low: false }, Some(&mut aux))
        }));
        let slept = result.unwrap_err().downcast::<Slept>().unwrap();
        assert_eq!(*slept, Slept(960, RadioMode::Disabled));
        assert_eq!(aux, [9]);
    }

    #[test]
    fn test_check_after_final_chunk_restores_payload() {
        let clock = SystemClock::new();
        let mut lpm = engine(&clock, RamStorage::new());
        lpm.arm(10_000, &[1, 2, 3]).unwrap();

        let mut aux = [0u8; 3];
        assert!(lpm.check(&mut Pin { low: false }, Some(&mut aux)));
        assert_eq!(aux, [1, 2, 3]);
    }

    #[test]
    fn test_pin_read_error_means_not_asserted() {
        let clock = SystemClock::new();
        let mut lpm = engine(&clock, RamStorage::new());
        lpm.arm(10_000, &[5]).unwrap();

        let mut aux = [0u8; 1];
        assert!(lpm.check(&mut BrokenPin, Some(&mut aux)));
        assert_eq!(aux, [5]);
    }

    #[test]
    fn test_cold_storage_is_not_recovered() {
        let clock = SystemClock::new();
        let mut lpm = engine(&clock, RamStorage::new());
        let mut aux = [0xEEu8; 8];
        assert!(!lpm.check(&mut Pin { low: false }, Some(&mut aux)));
        assert_eq!(aux, [0; 8]);
    }

    #[test]
    fn test_oversize_payload_fails_without_writing() {
        let clock = SystemClock::new();
        let mut lpm = engine(&clock, RamStorage::new());
        let big = [0xABu8; 53];

        assert_eq!(
            lpm.arm(1_000, &big),
            Err(LpmError::PayloadTooLarge {
                requested: 53,
                available: 52
            })
        );
        assert!(lpm.storage().as_bytes().iter().all(|&b| b == 0));
        assert_eq!(
            PersistentSleepEngine::idle(&mut lpm, 1_000, Some(&big[..])),
            Err(LpmError::PayloadTooLarge {
                requested: 53,
                available: 52
            })
        );

        let mut aux = [0xABu8; 53];
        assert_eq!(
            lpm.recover(false, Some(&mut aux)),
            Recovery::Lost(LossReason::PayloadTooLarge)
        );
        assert!(aux.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_storage_failure() {
        let clock = SystemClock::new();
        let mut lpm = PersistentSleepEngine::new(
            PersistentSleepConfig::default(),
            &clock,
            DeadStorage,
            Sleeper,
        );
        assert_eq!(lpm.arm(1_000, &[]), Err(LpmError::Storage));
        assert_eq!(SleepEngine::idle(&mut lpm, 1_000), Err(LpmError::Storage));
        assert_eq!(
            lpm.recover(false, None),
            Recovery::Lost(LossReason::Storage)
        );
    }

    #[test]
    fn test_idle_enters_deep_sleep() {
        let clock = SystemClock::new();
        let mut lpm = engine(&clock, RamStorage::new());
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _ = lpm.idle_preserving(5 * HOUR, &[1]);
        }));
        let slept = result.unwrap_err().downcast::<Slept>().unwrap();
        assert_eq!(*slept, Slept(HOUR, RadioMode::Default));
        assert_eq!(
            stored_block(&lpm, &[1]),
            ControlBlock::new(SleepState::Counting, 4 * HOUR)
        );
    }
}
