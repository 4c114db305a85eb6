//! Linux AF_PACKET capture backend.
//!
//! Opens a raw packet socket bound to one interface and asks the kernel
//! for a TPACKET_V3 memory-mapped ring; when the kernel refuses (old
//! kernel, exotic config) the socket falls back to plain timed reads,
//! which matches the v1 delivery semantics. PACKET_FANOUT spreads load
//! across sockets sharing a group id.
//!
//! BPF filters are applied by the pcap backend; this backend captures
//! everything on the interface and leaves filtering to the decoder.

use std::ffi::CString;
use std::io;
use std::sync::atomic::{fence, Ordering};

use tracing::{debug, warn};

use crate::capture::{CaptureBackend, CaptureError, CaptureResult, CaptureStats};
use crate::config::SensorConfig;

// Packet-socket option constants from <linux/if_packet.h>; spelled out
// here because the ring setup depends on their exact values.
const ETH_P_ALL: u16 = 0x0003;
const SOL_PACKET: libc::c_int = 263;
const PACKET_ADD_MEMBERSHIP: libc::c_int = 1;
const PACKET_MR_PROMISC: libc::c_int = 1;
const PACKET_RX_RING: libc::c_int = 5;
const PACKET_STATISTICS: libc::c_int = 6;
const PACKET_VERSION: libc::c_int = 10;
const PACKET_FANOUT: libc::c_int = 18;
const PACKET_FANOUT_HASH: u32 = 0;
const TPACKET_V3: libc::c_int = 2;
const TP_STATUS_KERNEL: u32 = 0;
const TP_STATUS_USER: u32 = 1;

/// Ring geometry: 16 blocks of 1 MiB.
const BLOCK_SIZE: u32 = 1 << 20;
const BLOCK_COUNT: u32 = 16;
const FRAME_SIZE: u32 = 2048;

// Kernel ABI structs for the v3 ring.

#[repr(C)]
struct TpacketReq3 {
    tp_block_size: u32,
    tp_block_nr: u32,
    tp_frame_size: u32,
    tp_frame_nr: u32,
    tp_retire_blk_tov: u32,
    tp_sizeof_priv: u32,
    tp_feature_req_word: u32,
}

#[repr(C)]
struct TpacketBdTs {
    ts_sec: u32,
    ts_usec: u32,
}

#[repr(C)]
struct TpacketHdrV1 {
    block_status: u32,
    num_pkts: u32,
    offset_to_first_pkt: u32,
    blk_len: u32,
    seq_num: u64,
    ts_first_pkt: TpacketBdTs,
    ts_last_pkt: TpacketBdTs,
}

#[repr(C)]
struct TpacketBlockDesc {
    version: u32,
    offset_to_priv: u32,
    hdr: TpacketHdrV1,
}

#[repr(C)]
struct TpacketHdrVariant1 {
    tp_rxhash: u32,
    tp_vlan_tci: u32,
    tp_vlan_tpid: u16,
    tp_padding: u16,
}

#[repr(C)]
struct Tpacket3Hdr {
    tp_next_offset: u32,
    tp_sec: u32,
    tp_nsec: u32,
    tp_snaplen: u32,
    tp_len: u32,
    tp_status: u32,
    tp_mac: u16,
    tp_net: u16,
    hv1: TpacketHdrVariant1,
    tp_padding: [u8; 8],
}

#[repr(C)]
struct TpacketStatsV3 {
    tp_packets: u32,
    tp_drops: u32,
    tp_freeze_q_cnt: u32,
}

#[repr(C)]
struct TpacketStats {
    tp_packets: u32,
    tp_drops: u32,
}

enum Mode {
    /// TPACKET_V3 memory-mapped ring.
    Ring {
        map: *mut u8,
        map_len: usize,
        current_block: u32,
    },
    /// Plain timed socket reads (v1-equivalent delivery).
    Socket { buf: Vec<u8> },
}

pub struct AfPacketCapture {
    fd: libc::c_int,
    mode: Mode,
    timeout_ms: i32,
    totals: CaptureStats,
}

// The ring mapping is exclusively owned by this handle.
unsafe impl Send for AfPacketCapture {}

impl AfPacketCapture {
    pub fn open(cfg: &SensorConfig, iface: &str) -> CaptureResult<AfPacketCapture> {
        let fd = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                (ETH_P_ALL.to_be()) as libc::c_int,
            )
        };
        if fd < 0 {
            return Err(open_err(iface, "socket"));
        }

        let capture = Self::setup(fd, cfg, iface);
        if capture.is_err() {
            unsafe { libc::close(fd) };
        }
        capture
    }

    fn setup(fd: libc::c_int, cfg: &SensorConfig, iface: &str) -> CaptureResult<AfPacketCapture> {
        let ifindex = interface_index(iface)?;
        bind_to_interface(fd, ifindex, iface)?;

        if cfg.promiscuous {
            enable_promiscuous(fd, ifindex, iface)?;
        }
        if !cfg.bpf_filter.is_empty() {
            warn!(iface, "af_packet backend ignores the BPF filter; all frames are decoded");
        }

        let timeout_ms = cfg.read_timeout.as_millis().max(1) as i32;
        let mode = match map_ring(fd, timeout_ms as u32) {
            Ok((map, map_len)) => {
                debug!(iface, blocks = BLOCK_COUNT, "tpacket_v3 ring mapped");
                Mode::Ring { map, map_len, current_block: 0 }
            }
            Err(err) => {
                warn!(iface, error = %err, "tpacket_v3 unavailable, using socket reads");
                set_read_timeout(fd, timeout_ms)?;
                Mode::Socket {
                    buf: vec![0u8; cfg.snaplen.max(FRAME_SIZE as i32) as usize],
                }
            }
        };

        if let Some(group) = cfg.fanout_group {
            let opt: u32 = group as u32 | (PACKET_FANOUT_HASH << 16);
            if set_opt(fd, PACKET_FANOUT, &opt).is_err() {
                warn!(iface, group, "fanout not supported, capturing without it");
            }
        }

        Ok(AfPacketCapture {
            fd,
            mode,
            timeout_ms,
            totals: CaptureStats::default(),
        })
    }

    fn poll_ring(&mut self, handler: &mut dyn FnMut(&[u8])) -> CaptureResult<usize> {
        let Mode::Ring { map, current_block, .. } = &mut self.mode else {
            unreachable!("poll_ring called in socket mode");
        };

        let block_ptr = unsafe { map.add((*current_block * BLOCK_SIZE) as usize) };
        let desc = block_ptr as *mut TpacketBlockDesc;

        let status = unsafe { std::ptr::read_volatile(&(*desc).hdr.block_status) };
        if status & TP_STATUS_USER == 0 {
            wait_readable(self.fd, self.timeout_ms)?;
            let status = unsafe { std::ptr::read_volatile(&(*desc).hdr.block_status) };
            if status & TP_STATUS_USER == 0 {
                return Ok(0);
            }
        }
        fence(Ordering::Acquire);

        let num_pkts = unsafe { (*desc).hdr.num_pkts } as usize;
        let mut offset = unsafe { (*desc).hdr.offset_to_first_pkt } as usize;
        for _ in 0..num_pkts {
            let pkt = unsafe { block_ptr.add(offset) } as *const Tpacket3Hdr;
            let mac = unsafe { (*pkt).tp_mac } as usize;
            let snaplen = unsafe { (*pkt).tp_snaplen } as usize;
            if offset + mac + snaplen <= BLOCK_SIZE as usize {
                let frame =
                    unsafe { std::slice::from_raw_parts(block_ptr.add(offset + mac), snaplen) };
                handler(frame);
            }
            let next = unsafe { (*pkt).tp_next_offset } as usize;
            if next == 0 {
                break;
            }
            offset += next;
        }

        // Hand the block back to the kernel.
        fence(Ordering::Release);
        unsafe { std::ptr::write_volatile(&mut (*desc).hdr.block_status, TP_STATUS_KERNEL) };
        *current_block = (*current_block + 1) % BLOCK_COUNT;

        Ok(num_pkts)
    }

    fn poll_socket(&mut self, handler: &mut dyn FnMut(&[u8])) -> CaptureResult<usize> {
        let Mode::Socket { buf } = &mut self.mode else {
            unreachable!("poll_socket called in ring mode");
        };
        let n = unsafe {
            libc::recv(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(0),
                _ => Err(CaptureError::Read(err.to_string())),
            };
        }
        handler(&buf[..n as usize]);
        Ok(1)
    }
}

impl CaptureBackend for AfPacketCapture {
    fn poll(&mut self, handler: &mut dyn FnMut(&[u8])) -> CaptureResult<usize> {
        match self.mode {
            Mode::Ring { .. } => self.poll_ring(handler),
            Mode::Socket { .. } => self.poll_socket(handler),
        }
    }

    fn stats(&mut self) -> CaptureResult<CaptureStats> {
        // PACKET_STATISTICS counters reset on read; fold them into totals.
        let (packets, drops) = match self.mode {
            Mode::Ring { .. } => {
                let mut stats = TpacketStatsV3 { tp_packets: 0, tp_drops: 0, tp_freeze_q_cnt: 0 };
                get_opt(self.fd, PACKET_STATISTICS, &mut stats)?;
                (stats.tp_packets as u64, stats.tp_drops as u64)
            }
            Mode::Socket { .. } => {
                let mut stats = TpacketStats { tp_packets: 0, tp_drops: 0 };
                get_opt(self.fd, PACKET_STATISTICS, &mut stats)?;
                (stats.tp_packets as u64, stats.tp_drops as u64)
            }
        };
        self.totals.received += packets;
        self.totals.dropped += drops;
        Ok(self.totals)
    }
}

impl Drop for AfPacketCapture {
    fn drop(&mut self) {
        if let Mode::Ring { map, map_len, .. } = &self.mode {
            unsafe { libc::munmap(*map as *mut libc::c_void, *map_len) };
        }
        unsafe { libc::close(self.fd) };
    }
}

// ── Socket plumbing ──────────────────────────────────────────────────────────

fn interface_index(iface: &str) -> CaptureResult<libc::c_uint> {
    let name = CString::new(iface).map_err(|_| open_err(iface, "interface name"))?;
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    if index == 0 {
        return Err(open_err(iface, "if_nametoindex"));
    }
    Ok(index)
}

fn bind_to_interface(fd: libc::c_int, ifindex: libc::c_uint, iface: &str) -> CaptureResult<()> {
    let mut addr: libc::sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = libc::AF_PACKET as u16;
    addr.sll_protocol = ETH_P_ALL.to_be();
    addr.sll_ifindex = ifindex as libc::c_int;
    let rc = unsafe {
        libc::bind(
            fd,
            &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(open_err(iface, "bind"));
    }
    Ok(())
}

fn enable_promiscuous(fd: libc::c_int, ifindex: libc::c_uint, iface: &str) -> CaptureResult<()> {
    let mut mreq: libc::packet_mreq = unsafe { std::mem::zeroed() };
    mreq.mr_ifindex = ifindex as libc::c_int;
    mreq.mr_type = PACKET_MR_PROMISC as libc::c_ushort;
    set_opt(fd, PACKET_ADD_MEMBERSHIP, &mreq).map_err(|_| open_err(iface, "promiscuous mode"))
}

fn map_ring(fd: libc::c_int, retire_tov_ms: u32) -> Result<(*mut u8, usize), io::Error> {
    let version = TPACKET_V3;
    set_opt(fd, PACKET_VERSION, &version)?;

    let req = TpacketReq3 {
        tp_block_size: BLOCK_SIZE,
        tp_block_nr: BLOCK_COUNT,
        tp_frame_size: FRAME_SIZE,
        tp_frame_nr: BLOCK_SIZE / FRAME_SIZE * BLOCK_COUNT,
        tp_retire_blk_tov: retire_tov_ms,
        tp_sizeof_priv: 0,
        tp_feature_req_word: 0,
    };
    set_opt(fd, PACKET_RX_RING, &req)?;

    let map_len = (BLOCK_SIZE * BLOCK_COUNT) as usize;
    let map = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            map_len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if map == libc::MAP_FAILED {
        return Err(io::Error::last_os_error());
    }
    Ok((map as *mut u8, map_len))
}

fn set_read_timeout(fd: libc::c_int, timeout_ms: i32) -> CaptureResult<()> {
    let tv = libc::timeval {
        tv_sec: (timeout_ms / 1000) as libc::time_t,
        tv_usec: ((timeout_ms % 1000) * 1000) as libc::suseconds_t,
    };
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const libc::timeval as *const libc::c_void,
            std::mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(CaptureError::Read(io::Error::last_os_error().to_string()));
    }
    Ok(())
}

fn wait_readable(fd: libc::c_int, timeout_ms: i32) -> CaptureResult<()> {
    let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            return Ok(());
        }
        return Err(CaptureError::Read(err.to_string()));
    }
    Ok(())
}

fn set_opt<T>(fd: libc::c_int, option: libc::c_int, value: &T) -> Result<(), io::Error> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            SOL_PACKET,
            option,
            value as *const T as *const libc::c_void,
            std::mem::size_of::<T>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn get_opt<T>(fd: libc::c_int, option: libc::c_int, value: &mut T) -> CaptureResult<()> {
    let mut len = std::mem::size_of::<T>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            SOL_PACKET,
            option,
            value as *mut T as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(CaptureError::Read(io::Error::last_os_error().to_string()));
    }
    Ok(())
}

fn open_err(iface: &str, stage: &str) -> CaptureError {
    CaptureError::Open {
        iface: iface.to_string(),
        reason: format!("{stage}: {}", io::Error::last_os_error()),
    }
}
