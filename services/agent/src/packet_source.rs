//! Live packet capture: one task per resolved interface, decoding raw
//! frames and handing them to the dispatcher.
//!
//! `pnet::datalink` channels block on read, so each interface gets a
//! dedicated blocking thread; a short read timeout lets it notice
//! cancellation without a dedicated wakeup mechanism.

use crate::interfaces::ResolvedInterface;
use bytes::Bytes;
use capture_core::buffer_pool::BufferPool;
use capture_core::models::{DecodeError, LinkType, Packet};
use pnet::datalink::{self, Channel, Config, NetworkInterface};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const READ_TIMEOUT: Duration = Duration::from_millis(200);

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// One decoded packet plus which interface it arrived on.
pub struct CapturedPacket {
    pub interface: String,
    pub packet: Packet,
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no datalink channel type for interface '{0}'")]
    UnsupportedChannelType(String),
    #[error("failed to open interface '{0}': {1}")]
    Open(String, String),
}

/// Spawn a blocking capture thread for `iface`, forwarding decoded
/// packets to `tx` until `shutdown` fires or the channel closes.
///
/// Each read stages into a scratch buffer checked out of `buffer_pool`
/// rather than a fresh allocation; a pool under memory pressure makes
/// capture drop and count frames instead of growing without bound.
pub fn spawn_capture_task(
    iface: ResolvedInterface,
    tx: mpsc::Sender<CapturedPacket>,
    buffer_pool: Arc<BufferPool>,
    shutdown: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>, CaptureError> {
    let interfaces = datalink::interfaces();
    let net_iface: NetworkInterface = interfaces
        .into_iter()
        .find(|i| i.name == iface.name)
        .ok_or_else(|| CaptureError::Open(iface.name.clone(), "interface disappeared".to_string()))?;

    let link_type = if net_iface.is_loopback() { LinkType::RawIp } else { LinkType::Ethernet };
    let config = Config { read_timeout: Some(READ_TIMEOUT), ..Config::default() };
    let channel = datalink::channel(&net_iface, config)
        .map_err(|e| CaptureError::Open(iface.name.clone(), e.to_string()))?;
    let mut rx = match channel {
        Channel::Ethernet(_tx, rx) => rx,
        _ => return Err(CaptureError::UnsupportedChannelType(iface.name.clone())),
    };

    let rt = Handle::current();
    let handle = tokio::task::spawn_blocking(move || {
        while !shutdown.is_cancelled() {
            match rx.next() {
                Ok(frame) => {
                    let Ok(mut scratch) = buffer_pool.try_acquire(frame.len()) else {
                        debug!(interface = %iface.name, "buffer pool exhausted, dropping frame");
                        continue;
                    };
                    scratch.data.extend_from_slice(frame);
                    let raw = Bytes::copy_from_slice(&scratch.data);
                    rt.block_on(buffer_pool.release(scratch));

                    match Packet::decode(link_type, now_ms(), raw) {
                        Ok(packet) => {
                            if tx.blocking_send(CapturedPacket { interface: iface.name.clone(), packet }).is_err() {
                                return;
                            }
                        }
                        Err(e) => log_decode_error(&iface.name, e),
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut || e.kind() == std::io::ErrorKind::WouldBlock => {
                    continue;
                }
                Err(e) => {
                    warn!(interface = %iface.name, %e, "capture read error, stopping interface task");
                    return;
                }
            }
        }
        debug!(interface = %iface.name, "capture task cancelled");
    });

    Ok(handle)
}

fn log_decode_error(interface: &str, e: DecodeError) {
    match e {
        DecodeError::NotTcp | DecodeError::NotIpv4 | DecodeError::UnsupportedEtherType => {
            // Expected on a mixed-traffic interface; not worth a log line per packet.
        }
        DecodeError::Truncated(part) => {
            debug!(interface, part, "dropped truncated frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_channel_type_is_a_named_error() {
        let err = CaptureError::UnsupportedChannelType("eth0".to_string());
        assert!(err.to_string().contains("eth0"));
    }
}
