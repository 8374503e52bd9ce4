//! Fixture geometry and the fixture table.
//!
//! A fixture is a named span of consecutive DMX channels with roles (red,
//! green, blue, ...) mapped to offsets within the span. The table translates
//! semantic operations ("set fixture 1 to amber") into channel writes on the
//! [`Universe`]; it keeps no channel storage of its own.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::universe::{DMX_CHANNELS, OutOfRange, Universe};

/// Function of a single channel within a fixture.
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Debug,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChannelRole {
    /// Overall brightness (0 = off, 255 = full).
    Intensity,
    /// Red color channel for RGB mixing.
    Red,
    /// Green color channel for RGB mixing.
    Green,
    /// Blue color channel for RGB mixing.
    Blue,
    /// White channel of RGBW fixtures.
    White,
    /// Amber channel of RGBWA fixtures.
    Amber,
}

/// One patched fixture: a name, a 1-based start address and a role → offset
/// map. Offsets are 0-based from the start address, so a fixture at address
/// 5 with red at offset 0 puts red on channel 5.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Fixture {
    pub name: String,
    pub start_address: usize,
    pub roles: HashMap<ChannelRole, u8>,
}

impl Fixture {
    pub fn new(name: &str, start_address: usize, roles: &[(ChannelRole, u8)]) -> Self {
        Self {
            name: name.to_string(),
            start_address,
            roles: roles.iter().copied().collect(),
        }
    }

    /// A generic 4-channel RGBW par, the common case on this bridge.
    pub fn rgbw(name: &str, start_address: usize) -> Self {
        Self::new(
            name,
            start_address,
            &[
                (ChannelRole::Red, 0),
                (ChannelRole::Green, 1),
                (ChannelRole::Blue, 2),
                (ChannelRole::White, 3),
            ],
        )
    }

    /// Number of channels this fixture occupies.
    pub fn span(&self) -> usize {
        self.roles
            .values()
            .map(|&offset| offset as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Last absolute channel of the span.
    fn last_channel(&self) -> usize {
        self.start_address + self.span().saturating_sub(1)
    }

    /// Absolute channel for `role`, or `None` when the fixture lacks it.
    pub fn channel_for(&self, role: ChannelRole) -> Option<usize> {
        self.roles
            .get(&role)
            .map(|&offset| self.start_address + offset as usize)
    }
}

#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("fixture {name:?}: channels {start}..={end} extend past channel {DMX_CHANNELS}")]
    SpanOutOfRange {
        name: String,
        start: usize,
        end: usize,
    },
    #[error("fixture {0:?} has no channel roles")]
    EmptyRoles(String),
    #[error("no fixture with id {0}")]
    NotFound(usize),
    #[error(transparent)]
    Channel(#[from] OutOfRange),
}

/// Result of a raw range write: how much was applied, how much fell off the
/// end of the universe. Truncation is reported, never silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawWrite {
    pub written: usize,
    pub dropped: usize,
}

/// The set of patched fixtures. Replaced atomically as a whole on
/// reconfiguration so nothing ever observes half-updated geometry.
#[derive(Default)]
pub struct FixtureTable {
    fixtures: Vec<Fixture>,
}

impl FixtureTable {
    /// Validate and atomically replace the whole table.
    ///
    /// Every fixture must fit within channels 1..=512 and define at least
    /// one role. Overlapping spans are unusual but permitted; they are
    /// reported at `warn` since they are a likely patching mistake.
    pub fn configure(&mut self, fixtures: Vec<Fixture>) -> Result<(), FixtureError> {
        for fixture in &fixtures {
            if fixture.roles.is_empty() {
                return Err(FixtureError::EmptyRoles(fixture.name.clone()));
            }
            if fixture.start_address < 1 || fixture.last_channel() > DMX_CHANNELS {
                return Err(FixtureError::SpanOutOfRange {
                    name: fixture.name.clone(),
                    start: fixture.start_address,
                    end: fixture.last_channel(),
                });
            }
        }
        for (i, a) in fixtures.iter().enumerate() {
            for b in fixtures.iter().skip(i + 1) {
                if a.start_address <= b.last_channel() && b.start_address <= a.last_channel() {
                    warn!(
                        first = %a.name,
                        second = %b.name,
                        "fixtures overlap on the universe, check the patch"
                    );
                }
            }
        }
        self.fixtures = fixtures;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Fixture> {
        self.fixtures.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fixture> {
        self.fixtures.iter()
    }

    pub fn fixtures(&self) -> &[Fixture] {
        &self.fixtures
    }

    /// Write color roles of fixture `id` into the universe. Roles the
    /// fixture does not define are skipped, so an RGB-only par simply
    /// ignores a white value.
    pub fn set_fixture_color(
        &self,
        id: usize,
        role_values: &HashMap<ChannelRole, u8>,
        universe: &mut Universe,
    ) -> Result<(), FixtureError> {
        let fixture = self.fixtures.get(id).ok_or(FixtureError::NotFound(id))?;
        for (&role, &value) in role_values {
            if let Some(channel) = fixture.channel_for(role) {
                // in range by configure-time span validation
                universe.write(channel, value);
            }
        }
        Ok(())
    }

    /// Write consecutive channels starting at `start_address`, clipping at
    /// channel 512. The clipped remainder is counted in the result.
    pub fn set_raw_range(
        &self,
        start_address: usize,
        values: &[u8],
        universe: &mut Universe,
    ) -> Result<RawWrite, FixtureError> {
        if !(1..=DMX_CHANNELS).contains(&start_address) {
            return Err(OutOfRange(start_address).into());
        }
        let available = DMX_CHANNELS - start_address + 1;
        let written = values.len().min(available);
        for (i, &value) in values[..written].iter().enumerate() {
            universe.write(start_address + i, value);
        }
        Ok(RawWrite {
            written,
            dropped: values.len() - written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_rgbw_pars() -> Vec<Fixture> {
        vec![Fixture::rgbw("F1", 1), Fixture::rgbw("F2", 5)]
    }

    #[test]
    fn configure_rejects_span_past_universe_end() {
        let mut table = FixtureTable::default();
        let err = table
            .configure(vec![Fixture::rgbw("tail", 510)])
            .unwrap_err();
        assert!(matches!(err, FixtureError::SpanOutOfRange { end: 513, .. }));
    }

    #[test]
    fn configure_rejects_empty_role_set() {
        let mut table = FixtureTable::default();
        let err = table
            .configure(vec![Fixture::new("hollow", 1, &[])])
            .unwrap_err();
        assert!(matches!(err, FixtureError::EmptyRoles(_)));
    }

    #[test]
    fn configure_allows_span_ending_exactly_at_512() {
        let mut table = FixtureTable::default();
        table.configure(vec![Fixture::rgbw("edge", 509)]).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn color_round_trip_through_role_offsets() {
        let mut table = FixtureTable::default();
        table.configure(vec![Fixture::rgbw("par", 10)]).unwrap();
        let mut universe = Universe::new();

        let values: HashMap<ChannelRole, u8> = [
            (ChannelRole::Red, 10),
            (ChannelRole::Green, 20),
            (ChannelRole::Blue, 30),
            (ChannelRole::White, 40),
        ]
        .into_iter()
        .collect();
        table.set_fixture_color(0, &values, &mut universe).unwrap();

        assert_eq!(universe.get(10), Ok(10));
        assert_eq!(universe.get(11), Ok(20));
        assert_eq!(universe.get(12), Ok(30));
        assert_eq!(universe.get(13), Ok(40));
    }

    #[test]
    fn second_fixture_color_leaves_first_untouched() {
        let mut table = FixtureTable::default();
        table.configure(two_rgbw_pars()).unwrap();
        let mut universe = Universe::new();

        let values: HashMap<ChannelRole, u8> =
            [(ChannelRole::Red, 255), (ChannelRole::White, 255)]
                .into_iter()
                .collect();
        table.set_fixture_color(1, &values, &mut universe).unwrap();

        assert_eq!(universe.get(5), Ok(255));
        assert_eq!(universe.get(6), Ok(0));
        assert_eq!(universe.get(7), Ok(0));
        assert_eq!(universe.get(8), Ok(255));
        for channel in 1..=4 {
            assert_eq!(universe.get(channel), Ok(0));
        }
    }

    #[test]
    fn missing_roles_are_skipped_not_errors() {
        let mut table = FixtureTable::default();
        table
            .configure(vec![Fixture::new(
                "rgb only",
                1,
                &[
                    (ChannelRole::Red, 0),
                    (ChannelRole::Green, 1),
                    (ChannelRole::Blue, 2),
                ],
            )])
            .unwrap();
        let mut universe = Universe::new();

        let values: HashMap<ChannelRole, u8> =
            [(ChannelRole::Red, 9), (ChannelRole::White, 99)]
                .into_iter()
                .collect();
        table.set_fixture_color(0, &values, &mut universe).unwrap();
        assert_eq!(universe.get(1), Ok(9));
        // no white channel, nothing else written
        assert!((2..=512).all(|ch| universe.get(ch) == Ok(0)));
    }

    #[test]
    fn unknown_fixture_id_is_not_found() {
        let mut table = FixtureTable::default();
        table.configure(two_rgbw_pars()).unwrap();
        let mut universe = Universe::new();
        let err = table
            .set_fixture_color(2, &HashMap::new(), &mut universe)
            .unwrap_err();
        assert!(matches!(err, FixtureError::NotFound(2)));
    }

    #[test]
    fn raw_range_truncates_at_channel_512() {
        let table = FixtureTable::default();
        let mut universe = Universe::new();
        let outcome = table
            .set_raw_range(510, &[1, 2, 3, 4, 5], &mut universe)
            .unwrap();
        assert_eq!(
            outcome,
            RawWrite {
                written: 3,
                dropped: 2
            }
        );
        assert_eq!(universe.get(510), Ok(1));
        assert_eq!(universe.get(511), Ok(2));
        assert_eq!(universe.get(512), Ok(3));
    }

    #[test]
    fn raw_range_rejects_out_of_range_start() {
        let table = FixtureTable::default();
        let mut universe = Universe::new();
        assert!(table.set_raw_range(0, &[1], &mut universe).is_err());
        assert!(table.set_raw_range(513, &[1], &mut universe).is_err());
    }
}
