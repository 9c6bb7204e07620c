use ip_network::Ipv4Network;
use ip_network_table::IpNetworkTable;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::{debug, error};

/// Answers "is this address local?" against the configured subnets.
/// Built once at startup from CIDR strings and read-only afterwards.
pub struct SubnetMatcher {
    table: IpNetworkTable<()>,
    count: usize,
}

impl SubnetMatcher {
    /// Parses each CIDR. Entries that fail to parse are logged and
    /// skipped.
    pub fn new<S: AsRef<str>>(cidrs: &[S]) -> Self {
        let mut table = IpNetworkTable::new();
        let mut count = 0;
        for cidr in cidrs {
            match parse_cidr(cidr.as_ref()) {
                Ok(network) => {
                    debug!("Local subnet: {network}");
                    table.insert(network, ());
                    count += 1;
                }
                Err(e) => error!("Skipping subnet: {e}"),
            }
        }
        Self { table, count }
    }

    /// True when any configured network contains `ip`.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.table.longest_match(ip).is_some()
    }

    /// Number of networks that parsed successfully.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when no usable network was configured.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Accepts `a.b.c.d/len` (host bits are masked off) and bare `a.b.c.d`,
/// which is treated as a single host.
fn parse_cidr(raw: &str) -> Result<Ipv4Network, SubnetError> {
    let raw = raw.trim();
    let invalid = || SubnetError::InvalidCidr(raw.to_string());
    let (addr, prefix) = match raw.split_once('/') {
        Some((addr, prefix)) => (addr, prefix.parse::<u8>().map_err(|_| invalid())?),
        None => (raw, 32),
    };
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
    Ipv4Network::new_truncate(addr, prefix).map_err(|_| invalid())
}

/// Subnet parsing failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubnetError {
    /// Not an IPv4 network in CIDR notation.
    #[error("invalid IPv4 CIDR '{0}'")]
    InvalidCidr(String),
}
