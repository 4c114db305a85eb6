//! Single-pass zero-copy frame decoding.
//!
//! One [`decode`] call slices ethernet → IPv4/IPv6 → TCP/UDP → payload
//! without allocating; the borrowed [`PacketView`] lives as long as the
//! frame buffer. Frames that are not IP, or that fail to slice, yield
//! `None` — parse failures on the capture path are silent by policy.

use std::net::IpAddr;

use etherparse::{NetSlice, SlicedPacket, TransportSlice};

/// Decoded TCP header fields needed by DPI and the trackers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpInfo {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
    pub urg: bool,
    pub ece: bool,
    pub cwr: bool,
    pub sequence: u32,
    pub acknowledgment: u32,
    pub window_size: u16,
}

impl TcpInfo {
    /// Single-letter union in observation order: "SAFRPUEC".
    pub fn flags_string(&self) -> String {
        let mut s = String::with_capacity(8);
        if self.syn { s.push('S'); }
        if self.ack { s.push('A'); }
        if self.fin { s.push('F'); }
        if self.rst { s.push('R'); }
        if self.psh { s.push('P'); }
        if self.urg { s.push('U'); }
        if self.ece { s.push('E'); }
        if self.cwr { s.push('C'); }
        s
    }
}

/// Borrowed view over one decoded frame.
#[derive(Debug)]
pub struct PacketView<'a> {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    /// "TCP", "UDP", or the raw IP protocol number rendered as text.
    pub transport: &'static str,
    pub src_port: u16,
    pub dst_port: u16,
    pub tcp: Option<TcpInfo>,
    pub payload: &'a [u8],
    /// Total frame length on the wire.
    pub frame_len: usize,
}

pub fn decode(frame: &[u8]) -> Option<PacketView<'_>> {
    let sliced = SlicedPacket::from_ethernet(frame).ok()?;

    let (src_ip, dst_ip) = match sliced.net.as_ref()? {
        NetSlice::Ipv4(v4) => {
            let h = v4.header();
            (IpAddr::V4(h.source_addr()), IpAddr::V4(h.destination_addr()))
        }
        NetSlice::Ipv6(v6) => {
            let h = v6.header();
            (IpAddr::V6(h.source_addr()), IpAddr::V6(h.destination_addr()))
        }
        _ => return None,
    };

    let view = match sliced.transport {
        Some(TransportSlice::Tcp(tcp)) => PacketView {
            src_ip,
            dst_ip,
            transport: "TCP",
            src_port: tcp.source_port(),
            dst_port: tcp.destination_port(),
            tcp: Some(TcpInfo {
                syn: tcp.syn(),
                ack: tcp.ack(),
                fin: tcp.fin(),
                rst: tcp.rst(),
                psh: tcp.psh(),
                urg: tcp.urg(),
                ece: tcp.ece(),
                cwr: tcp.cwr(),
                sequence: tcp.sequence_number(),
                acknowledgment: tcp.acknowledgment_number(),
                window_size: tcp.window_size(),
            }),
            payload: tcp.payload(),
            frame_len: frame.len(),
        },
        Some(TransportSlice::Udp(udp)) => PacketView {
            src_ip,
            dst_ip,
            transport: "UDP",
            src_port: udp.source_port(),
            dst_port: udp.destination_port(),
            tcp: None,
            payload: udp.payload(),
            frame_len: frame.len(),
        },
        _ => PacketView {
            src_ip,
            dst_ip,
            transport: "IP",
            src_port: 0,
            dst_port: 0,
            tcp: None,
            payload: &[],
            frame_len: frame.len(),
        },
    };

    Some(view)
}

#[cfg(test)]
pub(crate) mod testutil {
    use etherparse::PacketBuilder;

    /// Assemble an ethernet/IPv4/TCP frame carrying `payload`.
    pub fn tcp_frame(
        src: [u8; 4],
        dst: [u8; 4],
        sport: u16,
        dport: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4(src, dst, 64)
            .tcp(sport, dport, 1000, 64240);
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }

    /// Assemble an ethernet/IPv4/UDP frame carrying `payload`.
    pub fn udp_frame(
        src: [u8; 4],
        dst: [u8; 4],
        sport: u16,
        dport: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [7, 8, 9, 10, 11, 12])
            .ipv4(src, dst, 64)
            .udp(sport, dport);
        let mut out = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut out, payload).unwrap();
        out
    }
}
