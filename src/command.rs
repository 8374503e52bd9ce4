//! Structured commands arriving on the downlink.
//!
//! A downlink payload is JSON; this module turns it into a [`Command`] the
//! router can apply. The shapes mirror what the base station sends:
//!
//! ```json
//! {"cmd":"fixture","fixture_id":1,"role_values":{"red":255,"white":255}}
//! {"cmd":"raw","start_address":510,"values":[1,2,3]}
//! {"cmd":"pattern","action":"start","kind":"rainbow","speed_ms":40,"staggered":true}
//! {"cmd":"pattern","action":"stop"}
//! {"cmd":"configure","fixtures":[{"name":"F1","start_address":1,"roles":{"red":0}}]}
//! {"cmd":"blackout"}
//! ```

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

use crate::fixture::{ChannelRole, Fixture};
use crate::pattern::{PatternColor, PatternKind};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("malformed command payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Set color roles on one fixture (0-based table index).
    Fixture {
        fixture_id: usize,
        role_values: HashMap<ChannelRole, u8>,
    },
    /// Write consecutive raw channel values starting at an address.
    Raw {
        start_address: usize,
        values: Vec<u8>,
    },
    /// Start or stop a procedural pattern.
    Pattern(PatternRequest),
    /// Atomically replace the fixture table.
    Configure { fixtures: Vec<Fixture> },
    /// Stop any pattern and zero the universe.
    Blackout,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatternAction {
    Start,
    Stop,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PatternRequest {
    pub action: PatternAction,
    pub kind: Option<PatternKind>,
    pub speed_ms: Option<u64>,
    #[serde(default)]
    pub max_cycles: u32,
    #[serde(default)]
    pub staggered: bool,
    pub color: Option<PatternColor>,
}

/// Decode one downlink payload into a command.
pub fn decode(payload: &[u8]) -> Result<Command, CommandError> {
    Ok(serde_json::from_slice(payload)?)
}
