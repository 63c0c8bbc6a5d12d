//! Non-volatile storage port

/// Byte-addressable region that survives destructive sleep.
///
/// A write that returns `Ok` must be durable across the sleep/reset cycle.
/// No atomicity is assumed for partially completed writes; callers that need
/// integrity checksum what they store.
pub trait NvStorage {
    type Error;

    /// Region size in bytes.
    fn capacity(&self) -> u32;

    /// Fills `buf` with the bytes starting at `offset`.
    fn read_region(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Stores `data` starting at `offset`.
    fn write_region(&mut self, offset: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// Clears `len` bytes starting at `offset`.
    fn erase_region(&mut self, offset: u32, len: u32) -> Result<(), Self::Error> {
        const CHUNK: usize = 16;
        let zeros = [0u8; CHUNK];
        let mut done = 0u32;
        while done < len {
            let n = core::cmp::min(CHUNK as u32, len - done);
            self.write_region(offset + done, &zeros[..n as usize])?;
            done += n;
        }
        Ok(())
    }
}
