//! The command router: the single serialization point for everything that
//! mutates the universe, the fixture table or the pattern engine.
//!
//! Two contexts call in here concurrently: the control loop (tick, then
//! snapshot for the transmit driver) and the radio downlink handler. Both
//! go through one bounded-wait lock. The lock is only ever held for a
//! handful of array writes, never across I/O, so a timeout means something
//! is genuinely wrong and the caller gets a busy error instead of stalling
//! the radio path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::command::{Command, PatternAction, PatternRequest};
use crate::fixture::{ChannelRole, Fixture, FixtureError, FixtureTable, RawWrite};
use crate::pattern::{PatternEngine, PatternError, PatternKind, PatternParams};
use crate::universe::{DMX_CHANNELS, DMX_FRAME_LEN, Universe};

/// Wait budget for radio-originated mutations; the downlink handler must
/// not stall the radio stack.
const COMMAND_LOCK_WAIT: Duration = Duration::from_millis(10);

/// Wait budget for the control loop's tick-and-snapshot.
const FRAME_LOCK_WAIT: Duration = Duration::from_millis(50);

/// Frame interval used when a pattern start omits `speed_ms`.
const DEFAULT_PATTERN_SPEED: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("core is busy, retry")]
    Busy,
    #[error("pattern start requires a kind")]
    MissingKind,
    #[error(transparent)]
    Fixture(#[from] FixtureError),
    #[error(transparent)]
    Pattern(#[from] PatternError),
}

/// Most recent downlink radio metadata, kept for the heartbeat.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkQuality {
    pub rssi: Option<i16>,
    pub snr: Option<f32>,
}

struct Core {
    universe: Universe,
    fixtures: FixtureTable,
    engine: PatternEngine,
}

pub struct CommandRouter {
    core: Mutex<Core>,
    link: Mutex<LinkQuality>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl CommandRouter {
    pub fn new(fixtures: Vec<Fixture>) -> Result<Self, FixtureError> {
        let mut table = FixtureTable::default();
        table.configure(fixtures)?;
        Ok(Self {
            core: Mutex::new(Core {
                universe: Universe::new(),
                fixtures: table,
                engine: PatternEngine::default(),
            }),
            link: Mutex::new(LinkQuality::default()),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        })
    }

    fn lock_core(&self, wait: Duration) -> Result<parking_lot::MutexGuard<'_, Core>, RouterError> {
        self.core.try_lock_for(wait).ok_or(RouterError::Busy)
    }

    /// Apply one decoded downlink command, keeping the accept/reject
    /// counters for the heartbeat. Every rejection is logged so a remote
    /// operator can diagnose a bad command.
    pub fn apply(&self, command: Command) -> Result<(), RouterError> {
        let result = match command {
            Command::Fixture {
                fixture_id,
                role_values,
            } => self.apply_fixture_update(fixture_id, &role_values),
            Command::Raw {
                start_address,
                values,
            } => self.apply_raw_channel_write(start_address, &values).map(|_| ()),
            Command::Pattern(request) => match request.action {
                PatternAction::Start => self.apply_pattern_start(&request),
                PatternAction::Stop => self.apply_pattern_stop(),
            },
            Command::Configure { fixtures } => self.apply_configure(fixtures),
            Command::Blackout => self.apply_blackout(),
        };
        match &result {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(%err, "command rejected");
            }
        }
        result
    }

    pub fn apply_fixture_update(
        &self,
        fixture_id: usize,
        role_values: &HashMap<ChannelRole, u8>,
    ) -> Result<(), RouterError> {
        let mut core = self.lock_core(COMMAND_LOCK_WAIT)?;
        let Core {
            universe, fixtures, ..
        } = &mut *core;
        fixtures.set_fixture_color(fixture_id, role_values, universe)?;
        Ok(())
    }

    /// Raw writes land even while a pattern runs; the next tick overwrites
    /// them. Truncation past channel 512 is applied partially and reported.
    pub fn apply_raw_channel_write(
        &self,
        start_address: usize,
        values: &[u8],
    ) -> Result<RawWrite, RouterError> {
        let mut core = self.lock_core(COMMAND_LOCK_WAIT)?;
        let Core {
            universe, fixtures, ..
        } = &mut *core;
        let outcome = fixtures.set_raw_range(start_address, values, universe)?;
        drop(core);
        if outcome.dropped > 0 {
            warn!(
                start_address,
                written = outcome.written,
                dropped = outcome.dropped,
                "raw channel write truncated at channel {DMX_CHANNELS}"
            );
        }
        Ok(outcome)
    }

    pub fn apply_pattern_start(&self, request: &PatternRequest) -> Result<(), RouterError> {
        let kind = request.kind.ok_or(RouterError::MissingKind)?;
        let params = PatternParams {
            speed: request
                .speed_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_PATTERN_SPEED),
            max_cycles: request.max_cycles,
            staggered: request.staggered,
            color: request.color.unwrap_or_default(),
        };
        let mut core = self.lock_core(COMMAND_LOCK_WAIT)?;
        core.engine.start(kind, params)?;
        drop(core);
        info!(%kind, "pattern started");
        Ok(())
    }

    /// Takes effect before the next tick, never preempting one in progress.
    pub fn apply_pattern_stop(&self) -> Result<(), RouterError> {
        let mut core = self.lock_core(COMMAND_LOCK_WAIT)?;
        core.engine.stop();
        Ok(())
    }

    pub fn apply_configure(&self, fixtures: Vec<Fixture>) -> Result<(), RouterError> {
        let mut core = self.lock_core(COMMAND_LOCK_WAIT)?;
        core.fixtures.configure(fixtures)?;
        drop(core);
        info!("fixture table reconfigured");
        Ok(())
    }

    pub fn apply_blackout(&self) -> Result<(), RouterError> {
        let mut core = self.lock_core(COMMAND_LOCK_WAIT)?;
        core.engine.stop();
        core.universe.clear_all();
        Ok(())
    }

    /// One control-loop cycle: advance the pattern engine, then hand back a
    /// consistent frame copy. Tick always precedes the snapshot, so a frame
    /// computed here is visible to the very next send.
    pub fn tick_and_snapshot(&self, now: Instant) -> Result<[u8; DMX_FRAME_LEN], RouterError> {
        let mut core = self.lock_core(FRAME_LOCK_WAIT)?;
        let Core {
            universe,
            fixtures,
            engine,
        } = &mut *core;
        engine.tick(now, universe, fixtures);
        Ok(universe.snapshot())
    }

    /// Restore previously saved channel levels (start code untouched).
    pub fn restore_levels(&self, levels: &[u8]) -> Result<(), RouterError> {
        let mut core = self.lock_core(COMMAND_LOCK_WAIT)?;
        for (i, &value) in levels.iter().take(DMX_CHANNELS).enumerate() {
            core.universe.write(i + 1, value);
        }
        Ok(())
    }

    pub fn current_levels(&self) -> Result<[u8; DMX_CHANNELS], RouterError> {
        let core = self.lock_core(COMMAND_LOCK_WAIT)?;
        Ok(core.universe.levels())
    }

    pub fn fixtures_snapshot(&self) -> Result<Vec<Fixture>, RouterError> {
        let core = self.lock_core(COMMAND_LOCK_WAIT)?;
        Ok(core.fixtures.fixtures().to_vec())
    }

    pub fn active_pattern(&self) -> Option<PatternKind> {
        self.core.try_lock_for(COMMAND_LOCK_WAIT)?.engine.active_kind()
    }

    pub fn note_link_quality(&self, rssi: i16, snr: f32) {
        let mut link = self.link.lock();
        link.rssi = Some(rssi);
        link.snr = Some(snr);
    }

    pub fn link_quality(&self) -> LinkQuality {
        *self.link.lock()
    }

    pub fn commands_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn commands_rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command;
    use std::sync::Arc;
    use std::thread;

    fn router_with_two_pars() -> CommandRouter {
        CommandRouter::new(vec![Fixture::rgbw("F1", 1), Fixture::rgbw("F2", 5)]).unwrap()
    }

    #[test]
    fn fixture_command_lands_on_absolute_channels() {
        let router = router_with_two_pars();
        let cmd = command::decode(
            br#"{"cmd":"fixture","fixture_id":1,"role_values":{"red":255,"white":255}}"#,
        )
        .unwrap();
        router.apply(cmd).unwrap();

        let frame = router.tick_and_snapshot(Instant::now()).unwrap();
        assert_eq!(&frame[5..9], &[255, 0, 0, 255]);
        assert!(frame[1..5].iter().all(|&v| v == 0));
        assert_eq!(router.commands_accepted(), 1);
    }

    #[test]
    fn unknown_fixture_counts_as_rejected() {
        let router = router_with_two_pars();
        let cmd = command::decode(br#"{"cmd":"fixture","fixture_id":7,"role_values":{"red":1}}"#)
            .unwrap();
        assert!(router.apply(cmd).is_err());
        assert_eq!(router.commands_rejected(), 1);
        assert_eq!(router.commands_accepted(), 0);
    }

    #[test]
    fn raw_write_truncation_is_reported_and_partially_applied() {
        let router = router_with_two_pars();
        let outcome = router
            .apply_raw_channel_write(510, &[1, 2, 3, 4, 5])
            .unwrap();
        assert_eq!(outcome, RawWrite { written: 3, dropped: 2 });
        let frame = router.tick_and_snapshot(Instant::now()).unwrap();
        assert_eq!(&frame[510..513], &[1, 2, 3]);
    }

    #[test]
    fn pattern_start_without_kind_is_a_configuration_error() {
        let router = router_with_two_pars();
        let cmd = command::decode(br#"{"cmd":"pattern","action":"start"}"#).unwrap();
        assert!(matches!(router.apply(cmd), Err(RouterError::MissingKind)));
        assert!(router.active_pattern().is_none());
    }

    #[test]
    fn pattern_runs_and_stops_through_the_router() {
        let router = router_with_two_pars();
        router
            .apply(
                command::decode(
                    br#"{"cmd":"pattern","action":"start","kind":"chase","speed_ms":1}"#,
                )
                .unwrap(),
            )
            .unwrap();
        assert_eq!(router.active_pattern(), Some(PatternKind::Chase));

        let frame = router.tick_and_snapshot(Instant::now()).unwrap();
        assert_eq!(&frame[1..5], &[255, 255, 255, 255]);

        router
            .apply(command::decode(br#"{"cmd":"pattern","action":"stop"}"#).unwrap())
            .unwrap();
        assert!(router.active_pattern().is_none());
    }

    #[test]
    fn blackout_stops_pattern_and_clears_levels() {
        let router = router_with_two_pars();
        router.apply_raw_channel_write(1, &[9; 16]).unwrap();
        router
            .apply_pattern_start(&PatternRequest {
                action: PatternAction::Start,
                kind: Some(PatternKind::Strobe),
                speed_ms: Some(1),
                max_cycles: 0,
                staggered: false,
                color: None,
            })
            .unwrap();
        router.apply_blackout().unwrap();
        assert!(router.active_pattern().is_none());
        let frame = router.tick_and_snapshot(Instant::now()).unwrap();
        assert!(frame.iter().all(|&v| v == 0));
    }

    #[test]
    fn restore_levels_round_trips() {
        let router = router_with_two_pars();
        let mut levels = [0u8; DMX_CHANNELS];
        levels[0] = 10;
        levels[511] = 20;
        router.restore_levels(&levels).unwrap();
        assert_eq!(router.current_levels().unwrap(), levels);
    }

    #[test]
    fn snapshots_stay_consistent_under_concurrent_raw_writes() {
        // One context bursts uniform writes over a range while another
        // tick/snapshots; every snapshot must show a single write ordering
        // (the whole range uniform), never a half-old/half-new mix.
        let router = Arc::new(router_with_two_pars());
        let writer = {
            let router = Arc::clone(&router);
            thread::spawn(move || {
                for round in 0..500u32 {
                    let value = if round % 2 == 0 { 17 } else { 203 };
                    let _ = router.apply_raw_channel_write(1, &[value; 64]);
                }
            })
        };

        for _ in 0..500 {
            let frame = router.tick_and_snapshot(Instant::now()).unwrap();
            let first = frame[1];
            assert!(
                frame[1..65].iter().all(|&v| v == first),
                "torn snapshot: {:?}",
                &frame[1..65]
            );
        }
        writer.join().unwrap();
    }
}
