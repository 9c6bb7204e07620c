//! Device inventory client.
//!
//! The inventory is an HTTP/JSON registry mapping IPv4 addresses to
//! devices (MAC, host name, comment metadata). This crate fetches the
//! list and normalizes it into [`DeviceRecord`]s ready to be cached.

mod comment; // Device comment grammar
mod device; // Inventory wire format and normalized records
mod rest; // REST HTTP helpers

pub use comment::{CommentError, DeviceComment};
pub use device::{normalize_mac, DeviceError, DeviceRecord, InventoryDevice};

use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Total time allowed for one device-list request.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for `GET <base>/api/v1/devices`.
#[derive(Clone, Debug)]
pub struct InventoryClient {
    client: reqwest::Client,
    url: String,
}

impl InventoryClient {
    /// Creates a client for the inventory rooted at `base_url`.
    pub fn new(base_url: &str) -> Result<Self, InventoryError> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| InventoryError::FetchFailed(e.to_string()))?;
        Ok(Self {
            client,
            url: rest::devices_url(base_url),
        })
    }

    /// The full URL that is queried.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Loads every device. Entries that cannot be normalized are logged
    /// and left out; every kept record is stamped with the same refresh
    /// time.
    pub async fn load_all_devices(&self) -> Result<Vec<DeviceRecord>, InventoryError> {
        let raw = rest::request_get_vec::<InventoryDevice>(&self.client, &self.url).await?;
        let refreshed_at = Utc::now();
        let total = raw.len();
        let devices: Vec<DeviceRecord> = raw
            .into_iter()
            .filter_map(|d| match DeviceRecord::from_inventory(d, refreshed_at) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("Skipping inventory entry: {e}");
                    None
                }
            })
            .collect();
        debug!("Inventory returned {total} entries, {} usable", devices.len());
        Ok(devices)
    }
}

/// Inventory failures. Any of these leaves the previous cache contents
/// in place.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InventoryError {
    /// Connection, timeout or transport error.
    #[error("inventory fetch failed: {0}")]
    FetchFailed(String),
    /// The inventory answered with a non-2xx status.
    #[error("inventory answered HTTP {0}")]
    BadStatus(u16),
    /// The body was not a JSON array of devices.
    #[error("inventory response could not be parsed: {0}")]
    ParseFailed(String),
}
