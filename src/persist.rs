//! Optional saved state: channel levels and the fixture layout.
//!
//! The state file is keyed by fixture count and channels-per-fixture; a
//! mismatch on load (or any read/parse failure) is treated as "no saved
//! state" rather than a partial restore.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::fixture::Fixture;
use crate::universe::DMX_CHANNELS;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("writing state file: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding state file: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SavedState {
    pub fixture_count: usize,
    pub channels_per_fixture: usize,
    pub levels: Vec<u8>,
    pub fixtures: Vec<Fixture>,
}

impl SavedState {
    pub fn new(levels: &[u8], fixtures: Vec<Fixture>) -> Self {
        Self {
            fixture_count: fixtures.len(),
            channels_per_fixture: fixtures.first().map(Fixture::span).unwrap_or(0),
            levels: levels.to_vec(),
            fixtures,
        }
    }
}

pub fn save(path: &Path, state: &SavedState) -> Result<(), PersistError> {
    let encoded = serde_json::to_vec_pretty(state)?;
    fs::write(path, encoded)?;
    Ok(())
}

/// Load saved state compatible with the given layout key. Returns `None`
/// on any mismatch or failure.
pub fn load(
    path: &Path,
    expected_fixture_count: usize,
    expected_channels_per_fixture: usize,
) -> Option<SavedState> {
    let bytes = fs::read(path).ok()?;
    let state: SavedState = match serde_json::from_slice(&bytes) {
        Ok(state) => state,
        Err(err) => {
            debug!(%err, "state file unreadable, starting fresh");
            return None;
        }
    };
    if state.fixture_count != expected_fixture_count
        || state.channels_per_fixture != expected_channels_per_fixture
        || state.levels.len() != DMX_CHANNELS
    {
        debug!(
            saved_fixtures = state.fixture_count,
            saved_span = state.channels_per_fixture,
            "state file layout mismatch, starting fresh"
        );
        return None;
    }
    Some(state)
}
