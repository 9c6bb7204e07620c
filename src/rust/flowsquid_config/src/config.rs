use crate::{IgnoreList, SubnetMatcher};
use chrono_tz::Tz;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Locations searched, in order, when no configuration file is named
/// explicitly.
pub const CONFIG_SEARCH_PATHS: [&str; 3] = [
    "./flowsquid.yaml",
    "/etc/flowsquid/flowsquid.yaml",
    "/etc/flowsquid.yaml",
];

const DEFAULT_FLOW_ADDR: &str = "0.0.0.0:2055";
const DEFAULT_ADMIN_ADDR: &str = ":3030";
const DEFAULT_REFRESH_INTERVAL: &str = "10m";
const FALLBACK_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_LOCATION: &str = "Asia/Yekaterinburg";
const DEFAULT_RECEIVE_BUFFER: usize = 212_992;
const DEFAULT_SIZE_OF_MEGABYTE: u64 = 1_048_576;
const DEFAULT_LOG_LEVEL: &str = "info";

/// Command-line flags. Every flag can also be supplied through the
/// environment variable named next to it.
#[derive(Debug, Clone, Default, Parser)]
#[command(author, version, about = "Converts NetFlow v5 into squid-style access logs")]
pub struct CliArgs {
    /// Path to a YAML configuration file
    #[arg(long, env = "FLOWSQUID_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address and port to listen for NetFlow packets
    #[arg(long = "addr", env = "FLOWSQUID_FLOW_ADDR")]
    pub flow_addr: Option<String>,

    /// Listen address of the administrative HTTP server
    #[arg(long = "admin-addr", env = "FLOWSQUID_ADMIN_ADDR")]
    pub admin_addr: Option<String>,

    /// Base URL of the device inventory service
    #[arg(long = "inventory", env = "FLOWSQUID_INVENTORY_URL")]
    pub inventory_url: Option<String>,

    /// How often the device list is refreshed, e.g. "10m", "1h30m" or "1.5h"
    #[arg(long = "interval", env = "FLOWSQUID_INTERVAL")]
    pub refresh_interval: Option<String>,

    /// Local subnet in CIDR notation; repeat or comma-separate
    #[arg(long = "subnet", env = "FLOWSQUID_SUBNETS", value_delimiter = ',')]
    pub subnets: Vec<String>,

    /// Substring excluding matching lines from the log; repeatable
    #[arg(long = "ignore", env = "FLOWSQUID_IGNORE_LIST", value_delimiter = ',')]
    pub ignore_list: Vec<String>,

    /// File receiving the squid-style log
    #[arg(long = "log", env = "FLOWSQUID_FLOW_LOG")]
    pub log_file: Option<PathBuf>,

    /// Also write a pipe-delimited log next to the main one
    #[arg(long, env = "FLOWSQUID_CSV", num_args = 0..=1, default_missing_value = "true")]
    pub csv: Option<bool>,

    /// IANA time zone used for the CSV time columns
    #[arg(long = "loc", env = "FLOWSQUID_LOC")]
    pub location: Option<String>,

    /// Size of the UDP receive queue (SO_RCVBUF) in bytes
    #[arg(long = "buffer", env = "FLOWSQUID_BUFSIZE")]
    pub receive_buffer_size: Option<usize>,

    /// Default hourly quota, in megabytes
    #[arg(long = "quotah", env = "FLOWSQUID_QUOTAH")]
    pub default_quota_hourly: Option<u64>,

    /// Default daily quota, in megabytes
    #[arg(long = "quotad", env = "FLOWSQUID_QUOTAD")]
    pub default_quota_daily: Option<u64>,

    /// Default monthly quota, in megabytes
    #[arg(long = "quotam", env = "FLOWSQUID_QUOTAM")]
    pub default_quota_monthly: Option<u64>,

    /// Number of bytes in one megabyte
    #[arg(long = "sizeofmb", env = "FLOWSQUID_SIZEOFMB")]
    pub size_of_megabyte: Option<u64>,

    /// Log verbosity: trace, debug, info, warn or error
    #[arg(long = "loglevel", env = "FLOWSQUID_LOG_LEVEL")]
    pub log_level: Option<String>,
}

/// On-disk YAML representation. Every field is optional; anything left
/// out falls back to the built-in default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// NetFlow listen address.
    pub flow_addr: Option<String>,
    /// Administrative HTTP listen address.
    pub admin_addr: Option<String>,
    /// Inventory base URL.
    pub inventory_url: Option<String>,
    /// Device refresh interval as a duration string.
    pub refresh_interval: Option<String>,
    /// Local subnets.
    pub subnets: Option<Vec<String>>,
    /// Ignore substrings.
    pub ignore_list: Option<Vec<String>>,
    /// Squid-style log path.
    pub log_file: Option<PathBuf>,
    /// Write the CSV companion log.
    pub csv: Option<bool>,
    /// IANA time zone name.
    pub location: Option<String>,
    /// SO_RCVBUF size.
    pub receive_buffer_size: Option<usize>,
    /// Default hourly quota (MiB).
    pub default_quota_hourly: Option<u64>,
    /// Default daily quota (MiB).
    pub default_quota_daily: Option<u64>,
    /// Default monthly quota (MiB).
    pub default_quota_monthly: Option<u64>,
    /// Bytes per megabyte.
    pub size_of_megabyte: Option<u64>,
    /// Log level.
    pub log_level: Option<String>,
}

impl ConfigFile {
    /// Reads and parses a YAML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            error!("Unable to read {}: {e}", path.display());
            ConfigError::CannotReadFile(path.to_path_buf())
        })?;
        Self::load_from_string(&raw)
    }

    pub(crate) fn load_from_string(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|e| {
            error!("Unable to parse configuration YAML: {e}");
            ConfigError::CannotParseYaml(e.to_string())
        })
    }
}

/// Default per-device traffic quotas. These are carried through to
/// consumers of the device list; the collector does not enforce them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Quotas {
    /// Hourly quota.
    pub hourly: u64,
    /// Daily quota.
    pub daily: u64,
    /// Monthly quota.
    pub monthly: u64,
}

/// Fully resolved configuration. Built once at startup and handed to
/// each component; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    /// Address and port to listen for NetFlow v5 datagrams.
    pub flow_addr: String,

    /// Address the administrative HTTP server binds to.
    pub admin_addr: String,

    /// Base URL of the device inventory (`/api/v1/devices` is appended).
    pub inventory_url: String,

    /// Period between two full device refreshes.
    pub refresh_interval: Duration,

    /// CIDRs considered local.
    pub subnets: Vec<String>,

    /// Substrings that suppress a log line.
    pub ignore_list: Vec<String>,

    /// Path of the squid-style log.
    pub log_file: PathBuf,

    /// Whether the pipe-delimited companion log is written.
    pub csv: bool,

    /// IANA time zone name for rendered timestamps.
    pub location: String,

    /// Requested SO_RCVBUF size in bytes.
    pub receive_buffer_size: usize,

    /// Default quotas, in megabytes.
    pub default_quotas: Quotas,

    /// How many bytes make one megabyte for quota conversion.
    pub size_of_megabyte: u64,

    /// Log verbosity.
    pub log_level: String,
}

impl Config {
    /// Parses the command line and environment, finds the configuration
    /// file and merges all three sources.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();
        Self::load_with(&cli)
    }

    /// Resolves configuration from already parsed CLI/environment values.
    pub fn load_with(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                ConfigFile::load(path)?
            }
            None => match find_config_file() {
                Some(path) => {
                    info!("Loading configuration from {}", path.display());
                    ConfigFile::load(&path)?
                }
                None => {
                    warn!("No configuration file found, using flags and environment only");
                    ConfigFile::default()
                }
            },
        };
        Self::merge(cli, file)
    }

    /// Layers CLI/environment values over the file values and applies
    /// defaults.
    pub fn merge(cli: &CliArgs, file: ConfigFile) -> Result<Self, ConfigError> {
        let log_file = cli
            .log_file
            .clone()
            .or(file.log_file)
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingLogFile)?;

        let interval_str = cli
            .refresh_interval
            .clone()
            .or(file.refresh_interval)
            .unwrap_or_else(|| DEFAULT_REFRESH_INTERVAL.to_string());

        let config = Self {
            flow_addr: normalize_bind_addr(
                &cli.flow_addr
                    .clone()
                    .or(file.flow_addr)
                    .unwrap_or_else(|| DEFAULT_FLOW_ADDR.to_string()),
            ),
            admin_addr: normalize_bind_addr(
                &cli.admin_addr
                    .clone()
                    .or(file.admin_addr)
                    .unwrap_or_else(|| DEFAULT_ADMIN_ADDR.to_string()),
            ),
            inventory_url: cli
                .inventory_url
                .clone()
                .or(file.inventory_url)
                .unwrap_or_default(),
            refresh_interval: parse_refresh_interval(&interval_str),
            subnets: prefer_list(&cli.subnets, file.subnets),
            ignore_list: prefer_list(&cli.ignore_list, file.ignore_list),
            log_file,
            csv: cli.csv.or(file.csv).unwrap_or(false),
            location: cli
                .location
                .clone()
                .or(file.location)
                .unwrap_or_else(|| DEFAULT_LOCATION.to_string()),
            receive_buffer_size: cli
                .receive_buffer_size
                .or(file.receive_buffer_size)
                .unwrap_or(DEFAULT_RECEIVE_BUFFER),
            default_quotas: Quotas {
                hourly: cli.default_quota_hourly.or(file.default_quota_hourly).unwrap_or(0),
                daily: cli.default_quota_daily.or(file.default_quota_daily).unwrap_or(0),
                monthly: cli.default_quota_monthly.or(file.default_quota_monthly).unwrap_or(0),
            },
            size_of_megabyte: cli
                .size_of_megabyte
                .or(file.size_of_megabyte)
                .unwrap_or(DEFAULT_SIZE_OF_MEGABYTE),
            log_level: cli
                .log_level
                .clone()
                .or(file.log_level)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        };
        debug!("Resolved configuration: {config:?}");
        Ok(config)
    }

    /// The CSV companion log sits next to the main log with `.csv`
    /// appended to the full file name.
    pub fn csv_file(&self) -> PathBuf {
        let mut name = self.log_file.clone().into_os_string();
        name.push(".csv");
        PathBuf::from(name)
    }

    /// Resolves the configured location, falling back to UTC.
    pub fn time_zone(&self) -> Tz {
        match self.location.parse::<Tz>() {
            Ok(tz) => tz,
            Err(e) => {
                error!("Error loading location ({}): {e}. Using UTC", self.location);
                Tz::UTC
            }
        }
    }

    /// Builds the local subnet matcher, skipping invalid entries.
    pub fn subnet_matcher(&self) -> SubnetMatcher {
        SubnetMatcher::new(&self.subnets)
    }

    /// Builds the ignore filter.
    pub fn ignore(&self) -> IgnoreList {
        IgnoreList::new(self.ignore_list.clone())
    }

    /// Default quotas converted from megabytes to bytes.
    pub fn default_quotas_bytes(&self) -> Quotas {
        Quotas {
            hourly: self.default_quotas.hourly.saturating_mul(self.size_of_megabyte),
            daily: self.default_quotas.daily.saturating_mul(self.size_of_megabyte),
            monthly: self.default_quotas.monthly.saturating_mul(self.size_of_megabyte),
        }
    }
}

fn find_config_file() -> Option<PathBuf> {
    CONFIG_SEARCH_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn prefer_list(cli: &[String], file: Option<Vec<String>>) -> Vec<String> {
    if cli.is_empty() {
        file.unwrap_or_default()
    } else {
        cli.to_vec()
    }
}

/// Duration strings follow the "10m" / "1h30m" form, with fractions
/// such as "1.5h" allowed. Anything that does not parse becomes fifteen
/// minutes.
fn parse_refresh_interval(raw: &str) -> Duration {
    let raw = raw.trim();
    let parsed = humantime::parse_duration(raw)
        .map_err(|e| e.to_string())
        .or_else(|e| parse_fractional_duration(raw).ok_or(e));
    match parsed {
        Ok(d) if !d.is_zero() => d,
        Ok(_) => {
            warn!("Refresh interval must be positive, using 15m");
            FALLBACK_REFRESH_INTERVAL
        }
        Err(e) => {
            warn!("Unable to parse refresh interval '{raw}': {e}. Using 15m");
            FALLBACK_REFRESH_INTERVAL
        }
    }
}

/// `<decimal><unit>` pairs with units ns, us, µs, ms, s, m and h.
fn parse_fractional_duration(raw: &str) -> Option<Duration> {
    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut rest = raw;
    let mut seconds = 0f64;
    if rest.is_empty() {
        return None;
    }
    while !rest.is_empty() {
        let number_end = rest.find(|c: char| !is_number(c))?;
        let value: f64 = rest[..number_end].parse().ok()?;
        rest = &rest[number_end..];
        let unit_end = rest.find(is_number).unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        seconds += value * scale;
        rest = &rest[unit_end..];
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// ":3030" means every IPv4 interface.
fn normalize_bind_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("Unable to read configuration file {0:?}")]
    CannotReadFile(PathBuf),
    /// The configuration file is not valid YAML for this schema.
    #[error("Unable to parse configuration file: {0}")]
    CannotParseYaml(String),
    /// No log destination was configured.
    #[error("No log file configured (--log, FLOWSQUID_FLOW_LOG or log_file)")]
    MissingLogFile,
}
