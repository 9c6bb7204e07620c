//! Support for the Netflow 5 protocol
//! Layout as in: https://netflow.caligare.com/netflow_v5.htm
mod protocol;

pub use protocol::{FlowHeader, FlowRecord, HEADER_SIZE, MAX_RECORDS, RECORD_SIZE};
use std::net::SocketAddr;
use thiserror::Error;

/// One flow record together with the header it arrived under and the
/// exporter that sent it. This is what travels down the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEvent {
    pub header: FlowHeader,
    pub record: FlowRecord,
    pub router: SocketAddr,
}

/// A fully decoded datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub header: FlowHeader,
    pub records: Vec<FlowRecord>,
    pub sender: SocketAddr,
    /// Bytes read from the buffer: the header plus one slot per record.
    pub consumed: usize,
}

impl Datagram {
    /// Splits the datagram into pipeline events, in wire order.
    pub fn into_events(self) -> impl Iterator<Item = FlowEvent> {
        let header = self.header;
        let router = self.sender;
        self.records.into_iter().map(move |record| FlowEvent {
            header,
            record,
            router,
        })
    }
}

/// Decodes a whole datagram. Either every announced record is returned
/// or none is.
pub fn decode(buf: &[u8], sender: SocketAddr) -> Result<Datagram, DecodeError> {
    if buf.len() < HEADER_SIZE {
        return Err(DecodeError::TruncatedPacket {
            needed: HEADER_SIZE,
            available: buf.len(),
        });
    }
    let header = FlowHeader::read(buf);
    if header.version != 5 {
        return Err(DecodeError::UnsupportedVersion(header.version));
    }
    if header.count > MAX_RECORDS {
        return Err(DecodeError::TooManyRecords(header.count));
    }

    let needed = HEADER_SIZE + RECORD_SIZE * header.count as usize;
    if buf.len() < needed {
        return Err(DecodeError::TruncatedPacket {
            needed,
            available: buf.len(),
        });
    }

    let records = buf[HEADER_SIZE..needed]
        .chunks_exact(RECORD_SIZE)
        .map(FlowRecord::read)
        .collect();

    Ok(Datagram {
        header,
        records,
        sender,
        consumed: needed,
    })
}

/// Reasons a datagram is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated packet: need {needed} bytes, have {available}")]
    TruncatedPacket { needed: usize, available: usize },
    #[error("Unsupported NetFlow version {0}")]
    UnsupportedVersion(u16),
    #[error("Header announces {0} records, more than the v5 limit")]
    TooManyRecords(u16),
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::net::Ipv4Addr;

    /// Fields a test cares about; everything else is zero.
    #[derive(Clone, Copy)]
    pub(crate) struct TestRecord {
        pub src: Ipv4Addr,
        pub dst: Ipv4Addr,
        pub src_port: u16,
        pub dst_port: u16,
        pub bytes: u32,
        pub first: u32,
        pub last: u32,
        pub protocol: u8,
    }

    impl Default for TestRecord {
        fn default() -> Self {
            Self {
                src: Ipv4Addr::new(8, 8, 8, 8),
                dst: Ipv4Addr::new(192, 168, 65, 10),
                src_port: 443,
                dst_port: 51000,
                bytes: 9193,
                first: 1000,
                last: 45459,
                protocol: 6,
            }
        }
    }

    /// Serializes a v5 datagram the way an exporter would.
    pub(crate) fn build_datagram(version: u16, unix_secs: u32, records: &[TestRecord]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24 + 48 * records.len());
        buf.extend_from_slice(&version.to_be_bytes());
        buf.extend_from_slice(&(records.len() as u16).to_be_bytes());
        buf.extend_from_slice(&123_456u32.to_be_bytes()); // sys_uptime
        buf.extend_from_slice(&unix_secs.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes()); // unix_nsecs
        buf.extend_from_slice(&77u32.to_be_bytes()); // flow_sequence
        buf.push(0); // engine_type
        buf.push(1); // engine_id
        buf.extend_from_slice(&0x4064u16.to_be_bytes()); // sampling
        for r in records {
            buf.extend_from_slice(&r.src.octets());
            buf.extend_from_slice(&r.dst.octets());
            buf.extend_from_slice(&[0, 0, 0, 0]); // next hop
            buf.extend_from_slice(&1u16.to_be_bytes());
            buf.extend_from_slice(&2u16.to_be_bytes());
            buf.extend_from_slice(&10u32.to_be_bytes()); // packets
            buf.extend_from_slice(&r.bytes.to_be_bytes());
            buf.extend_from_slice(&r.first.to_be_bytes());
            buf.extend_from_slice(&r.last.to_be_bytes());
            buf.extend_from_slice(&r.src_port.to_be_bytes());
            buf.extend_from_slice(&r.dst_port.to_be_bytes());
            buf.push(0); // pad1
            buf.push(0x18); // tcp flags
            buf.push(r.protocol);
            buf.push(0); // tos
            buf.extend_from_slice(&[0, 0, 0, 0]); // src/dst AS
            buf.push(24);
            buf.push(0);
            buf.extend_from_slice(&[0, 0]); // pad2
        }
        buf
    }
}
