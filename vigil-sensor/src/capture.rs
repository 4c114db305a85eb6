//! Pluggable capture backends.
//!
//! Two variants: the portable libpcap backend, and on Linux an AF_PACKET
//! socket with a TPACKET_V3 ring when the kernel grants one. Reads are
//! blocking with a bounded timeout so capture loops notice shutdown.

use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

use crate::config::SensorConfig;

pub type CaptureResult<T> = Result<T, CaptureError>;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("pcap error: {0}")]
    Pcap(#[from] pcap::Error),

    #[error("capture open failed on {iface}: {reason}")]
    Open { iface: String, reason: String },

    #[error("capture read failed: {0}")]
    Read(String),

    #[error("backend '{0}' is not supported on this platform")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Pcap,
    AfPacket,
}

impl FromStr for BackendKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pcap" => Ok(BackendKind::Pcap),
            "af_packet" | "afpacket" => Ok(BackendKind::AfPacket),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    pub received: u64,
    pub dropped: u64,
}

/// A blocking capture handle bound to one interface.
pub trait CaptureBackend: Send {
    /// Read available frames, invoking `handler` once per frame. Returns
    /// the number of frames delivered; 0 means the read timed out.
    fn poll(&mut self, handler: &mut dyn FnMut(&[u8])) -> CaptureResult<usize>;

    /// Kernel-side capture statistics.
    fn stats(&mut self) -> CaptureResult<CaptureStats>;
}

/// Open the configured backend for `iface`, falling back to pcap when the
/// ring backend is unavailable on this platform.
pub fn open_backend(cfg: &SensorConfig, iface: &str) -> CaptureResult<Box<dyn CaptureBackend>> {
    match cfg.backend {
        BackendKind::Pcap => Ok(Box::new(PcapCapture::open(cfg, iface)?)),
        BackendKind::AfPacket => {
            #[cfg(target_os = "linux")]
            {
                match crate::afpacket::AfPacketCapture::open(cfg, iface) {
                    Ok(capture) => return Ok(Box::new(capture)),
                    Err(err) => {
                        warn!(error = %err, iface, "af_packet open failed, falling back to pcap");
                    }
                }
                Ok(Box::new(PcapCapture::open(cfg, iface)?))
            }
            #[cfg(not(target_os = "linux"))]
            {
                warn!(iface, "af_packet requested on non-linux host, using pcap");
                Ok(Box::new(PcapCapture::open(cfg, iface)?))
            }
        }
    }
}

/// Default device name when `SENSOR_INTERFACE` is unset.
pub fn default_interface() -> CaptureResult<String> {
    let device = pcap::Device::lookup()?
        .ok_or_else(|| CaptureError::Open {
            iface: "<default>".into(),
            reason: "no capture device found".into(),
        })?;
    Ok(device.name)
}

// ── libpcap backend ──────────────────────────────────────────────────────────

pub struct PcapCapture {
    capture: pcap::Capture<pcap::Active>,
}

impl PcapCapture {
    pub fn open(cfg: &SensorConfig, iface: &str) -> CaptureResult<PcapCapture> {
        let inactive = pcap::Capture::from_device(iface).map_err(|e| CaptureError::Open {
            iface: iface.to_string(),
            reason: e.to_string(),
        })?;
        let mut capture = inactive
            .snaplen(cfg.snaplen)
            .promisc(cfg.promiscuous)
            .buffer_size(cfg.buffer_size)
            .timeout(cfg.read_timeout.as_millis() as i32)
            .open()
            .map_err(|e| CaptureError::Open {
                iface: iface.to_string(),
                reason: e.to_string(),
            })?;

        if !cfg.bpf_filter.is_empty() {
            capture.filter(&cfg.bpf_filter, true)?;
        }

        Ok(PcapCapture { capture })
    }
}

impl CaptureBackend for PcapCapture {
    fn poll(&mut self, handler: &mut dyn FnMut(&[u8])) -> CaptureResult<usize> {
        match self.capture.next_packet() {
            Ok(packet) => {
                handler(packet.data);
                Ok(1)
            }
            Err(pcap::Error::TimeoutExpired) => Ok(0),
            Err(err) => Err(CaptureError::Read(err.to_string())),
        }
    }

    fn stats(&mut self) -> CaptureResult<CaptureStats> {
        let stats = self.capture.stats()?;
        Ok(CaptureStats {
            received: stats.received as u64,
            dropped: stats.dropped as u64 + stats.if_dropped as u64,
        })
    }
}
