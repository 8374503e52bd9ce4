//! The LoRaWAN boundary.
//!
//! The radio stack itself (join, session keys, class-C receive windows)
//! lives on the network-server side; this bridge sees it as two UDP JSON
//! flows. Downlinks arrive as an envelope carrying the opaque command
//! payload plus port/RSSI/SNR metadata; uplinks go out the same way. The
//! listener runs on its own task with a drop-driven stopper so shutdown
//! never leaves a socket loop behind.

use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("invalid address {0:?}")]
    InvalidAddress(String),
    #[error("binding error: {0}")]
    Binding(String),
    #[error("uplink send: {0}")]
    Send(#[from] std::io::Error),
    #[error("uplink encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One received downlink: opaque payload plus radio metadata.
#[derive(Debug, Clone)]
pub struct Downlink {
    pub port: u8,
    pub rssi: i16,
    pub snr: f32,
    pub payload: Vec<u8>,
}

#[derive(Deserialize)]
struct DownlinkEnvelope {
    #[serde(default)]
    port: u8,
    #[serde(default)]
    rssi: i16,
    #[serde(default)]
    snr: f32,
    payload: String,
}

impl From<DownlinkEnvelope> for Downlink {
    fn from(env: DownlinkEnvelope) -> Self {
        Self {
            port: env.port,
            rssi: env.rssi,
            snr: env.snr,
            payload: env.payload.into_bytes(),
        }
    }
}

#[derive(Serialize)]
struct UplinkEnvelope<'a> {
    port: u8,
    confirmed: bool,
    payload: &'a str,
}

/// Periodic device status carried in heartbeat uplinks.
#[derive(Serialize, Debug)]
pub struct Heartbeat {
    pub uptime_s: u64,
    pub frames_sent: u64,
    pub commands_accepted: u64,
    pub commands_rejected: u64,
    pub active_pattern: Option<String>,
    pub last_rssi: Option<i16>,
    pub last_snr: Option<f32>,
}

/// Listens for downlink envelopes and hands decoded [`Downlink`]s to the
/// control loop over a channel.
pub struct DownlinkListener {
    stopper: Sender<()>,
    handle: JoinHandle<()>,
    downlinks: Receiver<Downlink>,
}

impl Drop for DownlinkListener {
    fn drop(&mut self) {
        let _ = self.stopper.send(());
        self.handle.abort();
        debug!("downlink listener stopped");
    }
}

impl DownlinkListener {
    pub fn bind(address: &str) -> Result<Self, LinkError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|_| LinkError::InvalidAddress(address.to_string()))?;
        let socket = UdpSocket::bind(addr).map_err(|e| LinkError::Binding(e.to_string()))?;
        let _ = socket.set_read_timeout(Some(Duration::from_millis(50)));

        let (stop_tx, stop_rx) = bounded(1);
        let (downlink_tx, downlink_rx) = unbounded();
        let handle = tokio::spawn(async move {
            let mut buffer = [0u8; 2048];
            loop {
                if stop_rx.try_recv().is_ok() {
                    break;
                }
                match socket.recv_from(&mut buffer) {
                    Ok((size, _)) => {
                        match serde_json::from_slice::<DownlinkEnvelope>(&buffer[..size]) {
                            Ok(envelope) => {
                                let _ = downlink_tx.send(envelope.into());
                            }
                            Err(err) => {
                                warn!(%err, "discarding malformed downlink envelope");
                            }
                        }
                    }
                    // read timeout, loop around to check the stopper
                    Err(_) => {}
                }
            }
        });

        Ok(Self {
            stopper: stop_tx,
            handle,
            downlinks: downlink_rx,
        })
    }

    pub fn try_recv(&self) -> Option<Downlink> {
        self.downlinks.try_recv().ok()
    }
}

/// Sends uplink payloads to the network-server side.
pub struct UplinkSender {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl UplinkSender {
    pub fn connect(destination: &str) -> Result<Self, LinkError> {
        let destination: SocketAddr = destination
            .parse()
            .map_err(|_| LinkError::InvalidAddress(destination.to_string()))?;
        let socket =
            UdpSocket::bind("0.0.0.0:0").map_err(|e| LinkError::Binding(e.to_string()))?;
        Ok(Self {
            socket,
            destination,
        })
    }

    /// Emit one uplink. The core interprets nothing of any response beyond
    /// this call's own success or failure.
    pub fn send(&self, payload: &[u8], port: u8, confirmed: bool) -> Result<(), LinkError> {
        let envelope = UplinkEnvelope {
            port,
            confirmed,
            payload: std::str::from_utf8(payload).unwrap_or_default(),
        };
        let datagram = serde_json::to_vec(&envelope)?;
        self.socket.send_to(&datagram, self.destination)?;
        Ok(())
    }

    pub fn send_heartbeat(&self, heartbeat: &Heartbeat, port: u8) -> Result<(), LinkError> {
        let payload = serde_json::to_vec(heartbeat)?;
        self.send(&payload, port, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_metadata_carries_through() {
        let env: DownlinkEnvelope = serde_json::from_str(
            r#"{"port":10,"rssi":-97,"snr":8.5,"payload":"{\"cmd\":\"blackout\"}"}"#,
        )
        .unwrap();
        let downlink: Downlink = env.into();
        assert_eq!(downlink.port, 10);
        assert_eq!(downlink.rssi, -97);
        assert_eq!(downlink.snr, 8.5);
        assert_eq!(downlink.payload, br#"{"cmd":"blackout"}"#.to_vec());
    }

    #[test]
    fn envelope_defaults_missing_metadata() {
        let env: DownlinkEnvelope = serde_json::from_str(r#"{"payload":"x"}"#).unwrap();
        assert_eq!(env.port, 0);
        assert_eq!(env.rssi, 0);
    }

    #[test]
    fn heartbeat_serializes_to_stable_fields() {
        let hb = Heartbeat {
            uptime_s: 61,
            frames_sent: 2400,
            commands_accepted: 5,
            commands_rejected: 1,
            active_pattern: Some("rainbow".to_string()),
            last_rssi: Some(-101),
            last_snr: Some(4.25),
        };
        let json = serde_json::to_value(&hb).unwrap();
        assert_eq!(json["uptime_s"], 61);
        assert_eq!(json["active_pattern"], "rainbow");
        assert_eq!(json["last_rssi"], -101);
    }
}
