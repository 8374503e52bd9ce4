//! The authoritative state of one DMX universe.
//!
//! A DMX frame on the wire is 513 bytes: the start code followed by up to
//! 512 channel values. [`Universe`] owns exactly that buffer. Slot 0 is the
//! start code and is never written; channels are addressed 1 through 512,
//! matching how fixtures are patched in the real world.

use thiserror::Error;

/// Number of addressable channels in a DMX universe.
pub const DMX_CHANNELS: usize = 512;

/// Full frame length on the wire: start code plus all channels.
pub const DMX_FRAME_LEN: usize = DMX_CHANNELS + 1;

/// Channels a pattern block spans (red/green/blue/white).
pub const BLOCK_CHANNELS: usize = 4;

/// Number of 4-channel blocks in a universe.
pub const NUM_BLOCKS: usize = DMX_CHANNELS / BLOCK_CHANNELS;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("channel {0} out of range, must be between 1 and {DMX_CHANNELS}")]
pub struct OutOfRange(pub usize);

/// The 513-byte channel buffer.
///
/// All mutation goes through the command router; the transmit driver only
/// ever sees [`Universe::snapshot`] copies, so a frame can never be torn by
/// a concurrent writer.
pub struct Universe {
    slots: [u8; DMX_FRAME_LEN],
}

impl Default for Universe {
    fn default() -> Self {
        Self {
            slots: [0; DMX_FRAME_LEN],
        }
    }
}

impl Universe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set channel `index` (1..=512) to `value`. An out-of-range index is
    /// rejected, never clamped or wrapped.
    pub fn set(&mut self, index: usize, value: u8) -> Result<(), OutOfRange> {
        if !(1..=DMX_CHANNELS).contains(&index) {
            return Err(OutOfRange(index));
        }
        self.slots[index] = value;
        Ok(())
    }

    /// Read channel `index` (1..=512), same bounds policy as [`Universe::set`].
    pub fn get(&self, index: usize) -> Result<u8, OutOfRange> {
        if !(1..=DMX_CHANNELS).contains(&index) {
            return Err(OutOfRange(index));
        }
        Ok(self.slots[index])
    }

    /// Zero every channel. The start code stays 0.
    pub fn clear_all(&mut self) {
        self.slots[1..].fill(0);
    }

    /// Immutable copy of the full frame for the transmit driver.
    pub fn snapshot(&self) -> [u8; DMX_FRAME_LEN] {
        self.slots
    }

    /// Channel values without the start code.
    pub fn levels(&self) -> [u8; DMX_CHANNELS] {
        let mut levels = [0u8; DMX_CHANNELS];
        levels.copy_from_slice(&self.slots[1..]);
        levels
    }

    /// Write a channel already validated by the caller (fixture geometry is
    /// checked at configure time, pattern blocks by construction).
    pub(crate) fn write(&mut self, index: usize, value: u8) {
        debug_assert!((1..=DMX_CHANNELS).contains(&index));
        if let Some(slot) = self.slots.get_mut(index) {
            if index != 0 {
                *slot = value;
            }
        }
    }

    /// Fill the 4-channel block `block` (0..NUM_BLOCKS) with `values`.
    pub(crate) fn fill_block(&mut self, block: usize, values: [u8; BLOCK_CHANNELS]) {
        debug_assert!(block < NUM_BLOCKS);
        let base = block * BLOCK_CHANNELS + 1;
        for (i, value) in values.into_iter().enumerate() {
            self.write(base + i, value);
        }
    }
}
