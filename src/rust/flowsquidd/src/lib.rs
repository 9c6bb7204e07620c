//! NetFlow v5 to squid-style access log collector.
//!
//! Datagrams are decoded, classified against the local subnets, enriched
//! with device identity from the inventory cache and appended to the
//! access log (and optionally a pipe-delimited companion log).

pub mod admin; // Administrative HTTP API
pub mod context;
pub mod device_cache; // IP -> device snapshot and its refresh actor
pub mod formatter;
pub mod log_sink;
pub mod netflow5;
pub mod pipeline;
pub mod receiver; // UDP listener

pub use context::Context;
