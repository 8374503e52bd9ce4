//! DMX512 transmit driver.
//!
//! Turns a universe snapshot into the wire protocol on an RS-485 serial
//! adapter: direction assert, break, mark-after-break, then the 513-byte
//! frame at 250 kbaud 8N2, with an inter-frame guard.
//!
//! The break is produced the portable way: drop the port to a low baud rate
//! and clock out a single 0x00. At 57 600 baud the start bit plus the zero
//! data bits hold the line low well past the 88 us spec minimum, and the
//! stop bit gives a mark-after-break comfortably over 8 us.

use std::io::Write;
use std::thread;
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};
use thiserror::Error;
use tracing::debug;

use crate::universe::DMX_FRAME_LEN;

/// DMX payload bitrate.
pub const DMX_BAUD: u32 = 250_000;

/// Baud rate used to stretch a 0x00 byte into the break.
const BREAK_BAUD: u32 = 57_600;

/// Line time of the break byte before the payload may start.
const BREAK_SETTLE: Duration = Duration::from_micros(180);

/// Spacing after each frame; bounds the refresh rate to roughly 44 Hz and
/// keeps slow fixtures from being overrun.
const INTER_FRAME_GUARD: Duration = Duration::from_millis(3);

/// Per-channel delta below which a frame counts as unchanged for
/// diagnostics. Does not gate transmission.
const CHANGE_THRESHOLD: u8 = 5;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("transmit driver is not initialized, frame not sent")]
    NotInitialized,
    #[error("serial port: {0}")]
    Serial(#[from] serialport::Error),
    #[error("serial i/o: {0}")]
    Io(#[from] std::io::Error),
}

pub struct DmxDriver {
    port: Option<Box<dyn SerialPort>>,
    last_sent: Option<[u8; DMX_FRAME_LEN]>,
}

impl DmxDriver {
    /// Open an RS-485 adapter for DMX output.
    pub fn open(device: &str) -> Result<Self, DriverError> {
        let port = serialport::new(device, DMX_BAUD)
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::Two)
            .parity(Parity::None)
            .timeout(Duration::from_millis(50))
            .open()?;
        Ok(Self {
            port: Some(port),
            last_sent: None,
        })
    }

    /// A driver with no hardware behind it. Every send reports
    /// [`DriverError::NotInitialized`] and leaves everything untouched; the
    /// rest of the bridge keeps running.
    pub fn disconnected() -> Self {
        Self {
            port: None,
            last_sent: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.port.is_some()
    }

    /// Transmit one full frame. Blocks through the break, the payload
    /// flush and the inter-frame guard, so calling this back-to-back stays
    /// within DMX timing.
    pub fn send(&mut self, frame: &[u8; DMX_FRAME_LEN]) -> Result<(), DriverError> {
        let Some(port) = self.port.as_mut() else {
            return Err(DriverError::NotInitialized);
        };

        // Half-duplex direction: most RS-485 adapters key the driver off RTS.
        port.write_request_to_send(true)?;

        // Break plus mark-after-break via the baud-rate drop.
        port.set_baud_rate(BREAK_BAUD)?;
        port.write_all(&[0x00])?;
        port.flush()?;
        thread::sleep(BREAK_SETTLE);

        port.set_baud_rate(DMX_BAUD)?;
        port.write_all(frame)?;
        port.flush()?;

        let changed = self
            .last_sent
            .map(|prev| changed_channels(&prev, frame))
            .unwrap_or(DMX_FRAME_LEN);
        if changed > 0 {
            debug!(changed, "dmx frame content changed");
        }
        self.last_sent = Some(*frame);

        thread::sleep(INTER_FRAME_GUARD);
        Ok(())
    }
}

/// Channels differing by more than the diagnostic threshold.
fn changed_channels(prev: &[u8; DMX_FRAME_LEN], next: &[u8; DMX_FRAME_LEN]) -> usize {
    prev.iter()
        .zip(next.iter())
        .filter(|(a, b)| a.abs_diff(**b) > CHANGE_THRESHOLD)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_driver_reports_and_sends_nothing() {
        let mut driver = DmxDriver::disconnected();
        let frame = [0u8; DMX_FRAME_LEN];
        assert!(matches!(
            driver.send(&frame),
            Err(DriverError::NotInitialized)
        ));
        assert!(!driver.is_initialized());
    }

    #[test]
    fn change_count_ignores_small_deltas() {
        let a = [0u8; DMX_FRAME_LEN];
        let mut b = [0u8; DMX_FRAME_LEN];
        b[1] = CHANGE_THRESHOLD; // within threshold
        b[2] = CHANGE_THRESHOLD + 1;
        b[512] = 255;
        assert_eq!(changed_channels(&a, &b), 2);
    }

    #[test]
    fn identical_frames_count_no_changes() {
        let a = [7u8; DMX_FRAME_LEN];
        assert_eq!(changed_channels(&a, &a), 0);
    }
}
