//! Procedural lighting patterns.
//!
//! The engine is a small state machine: idle, or running exactly one
//! pattern. Every control-loop cadence it gets a `tick(now)`; once the
//! per-frame interval has elapsed it computes the next frame straight into
//! the universe and advances its scratch state. Cycle-bounded runs count
//! one cycle per frame and drop back to idle at the bound.
//!
//! A raw channel write landing while a pattern runs is allowed; the next
//! frame simply overwrites it. Callers wanting persistent manual control
//! stop the pattern first.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fixture::{ChannelRole, FixtureTable};
use crate::universe::{BLOCK_CHANNELS, NUM_BLOCKS, Universe};

#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Debug,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PatternKind {
    /// Ping-pong ramp applied as (v, 255-v, 0, 0) across 4-channel blocks.
    ColorFade,
    /// Hue wheel via HSV conversion, applied per fixture, optionally
    /// staggered across fixtures into a traveling rainbow.
    Rainbow,
    /// Full color / blackout flip every frame.
    Strobe,
    /// A single white 4-channel block walking the universe.
    Chase,
    /// Even/odd blocks swapping at full every frame.
    Alternate,
}

/// RGBW color a pattern flashes or fills with.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatternColor {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub white: u8,
}

impl Default for PatternColor {
    fn default() -> Self {
        // full white
        Self {
            red: 255,
            green: 255,
            blue: 255,
            white: 255,
        }
    }
}

impl PatternColor {
    fn as_block(self) -> [u8; BLOCK_CHANNELS] {
        [self.red, self.green, self.blue, self.white]
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PatternParams {
    /// Minimum interval between frames.
    pub speed: Duration,
    /// Frames to run before going idle; 0 runs unbounded.
    pub max_cycles: u32,
    /// Rainbow only: phase-shift each fixture's hue by its table position.
    pub staggered: bool,
    /// Strobe fill color.
    pub color: PatternColor,
}

impl Default for PatternParams {
    fn default() -> Self {
        Self {
            speed: Duration::from_millis(50),
            max_cycles: 0,
            staggered: false,
            color: PatternColor::default(),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern frame interval must be at least 1 ms")]
    ZeroSpeed,
}

/// Per-kind scratch state, reset whenever a pattern starts.
enum Scratch {
    Fade { value: u8, rising: bool },
    Rainbow { hue: u8 },
    Strobe { on: bool },
    Chase { position: usize },
    Alternate { parity: bool },
}

impl Scratch {
    fn fresh(kind: PatternKind) -> Self {
        match kind {
            PatternKind::ColorFade => Scratch::Fade {
                value: 0,
                rising: true,
            },
            PatternKind::Rainbow => Scratch::Rainbow { hue: 0 },
            PatternKind::Strobe => Scratch::Strobe { on: true },
            PatternKind::Chase => Scratch::Chase { position: 0 },
            PatternKind::Alternate => Scratch::Alternate { parity: false },
        }
    }
}

struct Run {
    kind: PatternKind,
    params: PatternParams,
    last_update: Option<Instant>,
    elapsed_cycles: u32,
    scratch: Scratch,
}

/// At most one pattern is running at any time; starting a new one discards
/// the previous run's scratch state.
#[derive(Default)]
pub struct PatternEngine {
    active: Option<Run>,
}

impl PatternEngine {
    pub fn start(&mut self, kind: PatternKind, params: PatternParams) -> Result<(), PatternError> {
        if params.speed < Duration::from_millis(1) {
            // reject without disturbing a running pattern
            return Err(PatternError::ZeroSpeed);
        }
        self.active = Some(Run {
            kind,
            params,
            last_update: None,
            elapsed_cycles: 0,
            scratch: Scratch::fresh(kind),
        });
        Ok(())
    }

    /// Takes effect before the next tick; a tick in progress is never
    /// preempted (the engine runs inside the router's lock).
    pub fn stop(&mut self) {
        self.active = None;
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    pub fn active_kind(&self) -> Option<PatternKind> {
        self.active.as_ref().map(|run| run.kind)
    }

    /// Advance by one frame if a pattern is running and due. Returns true
    /// when a frame was written into the universe.
    pub fn tick(&mut self, now: Instant, universe: &mut Universe, fixtures: &FixtureTable) -> bool {
        let Some(run) = self.active.as_mut() else {
            return false;
        };
        if let Some(last) = run.last_update {
            if now.duration_since(last) < run.params.speed {
                return false;
            }
        }

        match &mut run.scratch {
            Scratch::Fade { value, rising } => {
                for block in 0..NUM_BLOCKS {
                    universe.fill_block(block, [*value, 255 - *value, 0, 0]);
                }
                if *rising {
                    *value += 1;
                    if *value == 255 {
                        *rising = false;
                    }
                } else {
                    *value -= 1;
                    if *value == 0 {
                        *rising = true;
                    }
                }
            }
            Scratch::Rainbow { hue } => {
                let count = fixtures.len().max(1);
                for (index, fixture) in fixtures.iter().enumerate() {
                    let fixture_hue = if run.params.staggered {
                        hue.wrapping_add((index * 256 / count) as u8)
                    } else {
                        *hue
                    };
                    let (r, g, b) = hsv_to_rgb(fixture_hue, 255, 255);
                    for (role, value) in [
                        (ChannelRole::Red, r),
                        (ChannelRole::Green, g),
                        (ChannelRole::Blue, b),
                    ] {
                        if let Some(channel) = fixture.channel_for(role) {
                            universe.write(channel, value);
                        }
                    }
                }
                *hue = hue.wrapping_add(1);
            }
            Scratch::Strobe { on } => {
                if *on {
                    let fill = run.params.color.as_block();
                    for block in 0..NUM_BLOCKS {
                        universe.fill_block(block, fill);
                    }
                } else {
                    universe.clear_all();
                }
                *on = !*on;
            }
            Scratch::Chase { position } => {
                universe.clear_all();
                universe.fill_block(*position, [255; BLOCK_CHANNELS]);
                *position = (*position + 1) % NUM_BLOCKS;
            }
            Scratch::Alternate { parity } => {
                for block in 0..NUM_BLOCKS {
                    let lit = (block % 2 == 1) == *parity;
                    let level = if lit { 255 } else { 0 };
                    universe.fill_block(block, [level; BLOCK_CHANNELS]);
                }
                *parity = !*parity;
            }
        }

        run.last_update = Some(now);
        if run.params.max_cycles > 0 {
            run.elapsed_cycles += 1;
            if run.elapsed_cycles >= run.params.max_cycles {
                self.active = None;
            }
        }
        true
    }
}

/// HSV to RGB with the six 42-43 unit hue regions and the classic
/// region/remainder/p/q/t integer formula.
pub(crate) fn hsv_to_rgb(h: u8, s: u8, v: u8) -> (u8, u8, u8) {
    if s == 0 {
        return (v, v, v);
    }

    let region = h / 43;
    let remainder = (h - (region * 43)) * 6;

    let p = (v as u16 * (255 - s as u16)) / 255;
    let q = (v as u16 * (255 - ((s as u16 * remainder as u16) / 255))) / 255;
    let t = (v as u16 * (255 - ((s as u16 * (255 - remainder as u16)) / 255))) / 255;

    match region {
        0 => (v, t as u8, p as u8),
        1 => (q as u8, v, p as u8),
        2 => (p as u8, v, t as u8),
        3 => (p as u8, q as u8, v),
        4 => (t as u8, p as u8, v),
        _ => (v, p as u8, q as u8),
    }
}
