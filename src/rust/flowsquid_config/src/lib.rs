//! Configuration handling for the flowsquid NetFlow collector.
//!
//! Options are layered: command-line flags win over `FLOWSQUID_*`
//! environment variables, which win over the YAML configuration file.

#![warn(missing_docs)]

mod config;
mod ignore;
mod subnets;

pub use config::{CliArgs, Config, ConfigError, ConfigFile, Quotas, CONFIG_SEARCH_PATHS};
pub use ignore::IgnoreList;
pub use subnets::{SubnetError, SubnetMatcher};
