//! Definitions for the actual netflow 5 protocol

use byteorder::{BigEndian, ByteOrder};
use std::net::Ipv4Addr;

/// Size of the fixed header on the wire.
pub const HEADER_SIZE: usize = 24;
/// Size of one flow record on the wire.
pub const RECORD_SIZE: usize = 48;
/// Largest record count a v5 exporter may announce.
pub const MAX_RECORDS: u16 = 30;

/// Standard Netflow 5 header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowHeader {
    pub version: u16,
    pub count: u16,
    pub sys_uptime: u32,
    pub unix_secs: u32,
    pub unix_nsecs: u32,
    pub flow_sequence: u32,
    pub engine_type: u8,
    pub engine_id: u8,
    pub sampling_raw: u16,
}

impl FlowHeader {
    /// Reads a header from the first 24 bytes of `buf`. The caller checks
    /// the length.
    pub(crate) fn read(buf: &[u8]) -> Self {
        Self {
            version: BigEndian::read_u16(&buf[0..2]),
            count: BigEndian::read_u16(&buf[2..4]),
            sys_uptime: BigEndian::read_u32(&buf[4..8]),
            unix_secs: BigEndian::read_u32(&buf[8..12]),
            unix_nsecs: BigEndian::read_u32(&buf[12..16]),
            flow_sequence: BigEndian::read_u32(&buf[16..20]),
            engine_type: buf[20],
            engine_id: buf[21],
            sampling_raw: BigEndian::read_u16(&buf[22..24]),
        }
    }

    /// Top two bits of the sampling field.
    pub fn sampling_algorithm(&self) -> u8 {
        ((self.sampling_raw >> 14) & 0x3) as u8
    }

    /// Lower fourteen bits of the sampling field.
    pub fn sampling_interval(&self) -> u16 {
        self.sampling_raw & 0x3fff
    }
}

/// Standard Netflow 5 record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRecord {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub input: u16,
    pub output: u16,
    pub d_pkts: u32,
    pub d_octets: u32,
    /// Milliseconds of sysUptime at the first packet.
    pub first: u32,
    /// Milliseconds of sysUptime at the last packet.
    pub last: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub tcp_flags: u8,
    pub prot: u8,
    pub tos: u8,
    pub src_as: u16,
    pub dst_as: u16,
    pub src_mask: u8,
    pub dst_mask: u8,
}

impl FlowRecord {
    /// Reads one record from the first 48 bytes of `buf`. Both padding
    /// fields are skipped.
    pub(crate) fn read(buf: &[u8]) -> Self {
        Self {
            src_addr: read_ipv4(&buf[0..4]),
            dst_addr: read_ipv4(&buf[4..8]),
            next_hop: read_ipv4(&buf[8..12]),
            input: BigEndian::read_u16(&buf[12..14]),
            output: BigEndian::read_u16(&buf[14..16]),
            d_pkts: BigEndian::read_u32(&buf[16..20]),
            d_octets: BigEndian::read_u32(&buf[20..24]),
            first: BigEndian::read_u32(&buf[24..28]),
            last: BigEndian::read_u32(&buf[28..32]),
            src_port: BigEndian::read_u16(&buf[32..34]),
            dst_port: BigEndian::read_u16(&buf[34..36]),
            // 36: pad1
            tcp_flags: buf[37],
            prot: buf[38],
            tos: buf[39],
            src_as: BigEndian::read_u16(&buf[40..42]),
            dst_as: BigEndian::read_u16(&buf[42..44]),
            src_mask: buf[44],
            dst_mask: buf[45],
            // 46..48: pad2
        }
    }

    /// Flow duration in milliseconds. Uptime counters wrap, so the
    /// subtraction does too.
    pub fn duration_ms(&self) -> u32 {
        self.last.wrapping_sub(self.first)
    }
}

/// Addresses are stored most significant octet first.
fn read_ipv4(buf: &[u8]) -> Ipv4Addr {
    Ipv4Addr::from(BigEndian::read_u32(buf))
}
