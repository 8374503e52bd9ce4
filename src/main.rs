//! LoRaWAN to DMX512 bridge daemon.
//!
//! Assembly lives here: one [`CommandRouter`] owns the shared core, the
//! downlink listener feeds it from the radio side, and a blocking control
//! loop ticks the pattern engine and pushes frames out the transmit driver
//! on a fixed cadence. Heartbeat uplinks and shutdown handling run on the
//! async side.

mod command;
mod config;
mod driver;
mod fixture;
mod link;
mod pattern;
mod persist;
mod router;
mod universe;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};
use tracing_subscriber::EnvFilter;

use crate::config::BridgeConfig;
use crate::driver::{DmxDriver, DriverError};
use crate::fixture::Fixture;
use crate::link::{Downlink, DownlinkListener, Heartbeat, UplinkSender};
use crate::router::{CommandRouter, RouterError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = BridgeConfig::load(config_path.as_deref())?;

    let router = Arc::new(CommandRouter::new(config.fixtures.clone())?);

    if let Some(state_file) = &config.state_file {
        let span = config.fixtures.first().map(Fixture::span).unwrap_or(0);
        if let Some(saved) = persist::load(state_file, config.fixtures.len(), span) {
            router.restore_levels(&saved.levels)?;
            info!("restored saved channel state");
        }
    }

    // A driver that fails to open degrades to "stop sending frames"; the
    // radio and status paths keep running on their last-known-good state.
    let driver = match config.serial_device.as_deref() {
        Some(device) => match DmxDriver::open(device) {
            Ok(driver) => {
                info!(device, "dmx output ready");
                driver
            }
            Err(err) => {
                warn!(%err, device, "dmx output unavailable, continuing without frames");
                DmxDriver::disconnected()
            }
        },
        None => {
            warn!("no serial device configured, dmx output disabled");
            DmxDriver::disconnected()
        }
    };

    let listener = DownlinkListener::bind(&config.downlink_bind)?;
    let uplink = UplinkSender::connect(&config.uplink_dest)?;
    info!(
        downlink = %config.downlink_bind,
        uplink = %config.uplink_dest,
        "link endpoints ready"
    );

    let running = Arc::new(AtomicBool::new(true));
    let frames_sent = Arc::new(AtomicU64::new(0));

    let control = {
        let router = Arc::clone(&router);
        let running = Arc::clone(&running);
        let frames_sent = Arc::clone(&frames_sent);
        let interval = Duration::from_millis(config.frame_interval_ms.max(1));
        let mut driver = driver;
        tokio::task::spawn_blocking(move || {
            control_loop(
                &router,
                &listener,
                &mut driver,
                &frames_sent,
                &running,
                interval,
            );
        })
    };

    let started = Instant::now();
    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(config.heartbeat_secs.max(1)));
    heartbeat.tick().await; // the first interval tick completes immediately
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            _ = heartbeat.tick() => {
                let quality = router.link_quality();
                let status = Heartbeat {
                    uptime_s: started.elapsed().as_secs(),
                    frames_sent: frames_sent.load(Ordering::Relaxed),
                    commands_accepted: router.commands_accepted(),
                    commands_rejected: router.commands_rejected(),
                    active_pattern: router.active_pattern().map(|kind| kind.to_string()),
                    last_rssi: quality.rssi,
                    last_snr: quality.snr,
                };
                if let Err(err) = uplink.send_heartbeat(&status, config.uplink_port) {
                    warn!(%err, "heartbeat uplink failed");
                }
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    control.await?;

    if let Some(state_file) = &config.state_file {
        match (router.current_levels(), router.fixtures_snapshot()) {
            (Ok(levels), Ok(fixtures)) => {
                let state = persist::SavedState::new(&levels, fixtures);
                match persist::save(state_file, &state) {
                    Ok(()) => info!("channel state saved"),
                    Err(err) => warn!(%err, "failed to save channel state"),
                }
            }
            _ => warn!("core busy at shutdown, state not saved"),
        }
    }
    Ok(())
}

/// The periodic control loop: drain downlinks, tick the pattern engine,
/// send the resulting frame. Tick always precedes send within a cycle, so
/// a pattern frame is visible to the very next transmission.
fn control_loop(
    router: &CommandRouter,
    listener: &DownlinkListener,
    driver: &mut DmxDriver,
    frames_sent: &AtomicU64,
    running: &AtomicBool,
    interval: Duration,
) {
    while running.load(Ordering::Relaxed) {
        while let Some(downlink) = listener.try_recv() {
            handle_downlink(router, downlink);
        }

        match router.tick_and_snapshot(Instant::now()) {
            Ok(frame) => match driver.send(&frame) {
                Ok(()) => {
                    frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(DriverError::NotInitialized) => {
                    trace!("dmx driver not initialized, frame skipped");
                }
                Err(err) => warn!(%err, "dmx frame send failed"),
            },
            Err(RouterError::Busy) => warn!("core busy, frame skipped"),
            Err(err) => warn!(%err, "control tick failed"),
        }

        thread::sleep(interval);
    }
}

fn handle_downlink(router: &CommandRouter, downlink: Downlink) {
    router.note_link_quality(downlink.rssi, downlink.snr);
    debug!(
        port = downlink.port,
        rssi = downlink.rssi,
        snr = downlink.snr,
        bytes = downlink.payload.len(),
        "downlink received"
    );
    match command::decode(&downlink.payload) {
        // apply logs and counts rejections itself
        Ok(cmd) => {
            let _ = router.apply(cmd);
        }
        Err(err) => warn!(%err, "undecodable downlink payload"),
    }
}
