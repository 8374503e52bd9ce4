//! Bridge configuration, loaded from a JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::fixture::Fixture;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    /// RS-485 serial adapter; when absent the bridge runs without DMX
    /// output and reports the driver as uninitialized.
    pub serial_device: Option<String>,
    /// Where downlink envelopes arrive.
    pub downlink_bind: String,
    /// Where uplink envelopes go.
    pub uplink_dest: String,
    /// LoRaWAN fPort for heartbeat uplinks.
    pub uplink_port: u8,
    /// Control-loop cadence (tick + frame send).
    pub frame_interval_ms: u64,
    /// Heartbeat uplink cadence.
    pub heartbeat_secs: u64,
    /// Saved channel levels and fixture layout; none disables persistence.
    pub state_file: Option<PathBuf>,
    /// Initial fixture patch.
    pub fixtures: Vec<Fixture>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            serial_device: None,
            downlink_bind: "0.0.0.0:5810".to_string(),
            uplink_dest: "127.0.0.1:5811".to_string(),
            uplink_port: 10,
            frame_interval_ms: 25,
            heartbeat_secs: 60,
            state_file: None,
            fixtures: default_fixtures(),
        }
    }
}

/// Eight 4-channel RGBW pars patched back to back, enough to light a small
/// rig out of the box.
fn default_fixtures() -> Vec<Fixture> {
    (0..8)
        .map(|i| Fixture::rgbw(&format!("par-{}", i + 1), i * 4 + 1))
        .collect()
}

impl BridgeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let bytes = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_patch_eight_pars() {
        let config = BridgeConfig::default();
        assert_eq!(config.fixtures.len(), 8);
        assert_eq!(config.fixtures[0].start_address, 1);
        assert_eq!(config.fixtures[7].start_address, 29);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let config: BridgeConfig =
            serde_json::from_str(r#"{"serial_device":"/dev/ttyUSB0","heartbeat_secs":30}"#)
                .unwrap();
        assert_eq!(config.serial_device.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.heartbeat_secs, 30);
        assert_eq!(config.frame_interval_ms, 25);
        assert_eq!(config.fixtures.len(), 8);
    }
}
