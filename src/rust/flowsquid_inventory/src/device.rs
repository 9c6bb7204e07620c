use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::warn;

/// A device as returned by the inventory's `/api/v1/devices` endpoint.
/// Older inventories emit Go-style capitalised names; those are accepted
/// where they cannot collide with the lowercase spelling.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct InventoryDevice {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    pub ip: String,
    pub mac: String,
    #[serde(rename = "activeMacAddress", alias = "ActiveMacAddress")]
    pub active_mac_address: String,
    #[serde(rename = "hostName", alias = "HostName")]
    pub host_name: String,
    #[serde(rename = "addressLists", alias = "AddressLists")]
    pub address_lists: String,
    #[serde(alias = "Comment")]
    pub comment: String,
    #[serde(rename = "type", alias = "TypeD", alias = "typeD")]
    pub device_type: Option<String>,
    #[serde(alias = "Name")]
    pub name: Option<String>,
    #[serde(alias = "Position")]
    pub position: Option<String>,
    #[serde(alias = "Company")]
    pub company: Option<String>,
    #[serde(rename = "hourlyQuota", alias = "HourlyQuota")]
    pub hourly_quota: u64,
    #[serde(rename = "dailyQuota", alias = "DailyQuota")]
    pub daily_quota: u64,
    #[serde(rename = "monthlyQuota", alias = "MonthlyQuota")]
    pub monthly_quota: u64,
    #[serde(alias = "Disabled")]
    pub disabled: bool,
}

/// Ids are opaque; some inventories send them as numbers.
fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// A normalized device, as stored in the IP → device cache and served by
/// the admin endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    /// Cache key; always a valid IPv4 address.
    pub ip: Ipv4Addr,
    /// Lowercase, colon separated, or empty.
    pub mac: String,
    #[serde(rename = "activeMacAddress")]
    pub active_mac: String,
    pub host_name: String,
    pub comment: String,
    pub address_lists: Vec<String>,
    #[serde(rename = "type")]
    pub device_type: String,
    pub name: String,
    pub position: String,
    pub company: String,
    pub hourly_quota: u64,
    pub daily_quota: u64,
    pub monthly_quota: u64,
    pub disabled: bool,
    pub last_refreshed_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// Normalizes an inventory entry fetched at `refreshed_at`.
    ///
    /// * the IP must be an IPv4 literal, otherwise the entry is rejected
    /// * MACs are lowercased; malformed MACs become empty
    /// * an empty `mac` falls back to `activeMacAddress`
    /// * `addressLists` is split on commas
    /// * `type`, `name`, `position`, `company` and the quotas are taken
    ///   as sent; the comment is kept verbatim and never parsed here
    pub fn from_inventory(
        device: InventoryDevice,
        refreshed_at: DateTime<Utc>,
    ) -> Result<Self, DeviceError> {
        let ip: Ipv4Addr = device
            .ip
            .trim()
            .parse()
            .map_err(|_| DeviceError::InvalidIp(device.ip.clone()))?;

        let active_mac = checked_mac(&device.active_mac_address, ip);
        let mut mac = checked_mac(&device.mac, ip);
        if mac.is_empty() {
            mac = active_mac.clone();
        }

        let address_lists = device
            .address_lists
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            id: device.id.clone(),
            ip,
            mac,
            active_mac,
            host_name: device.host_name.clone(),
            comment: device.comment.clone(),
            address_lists,
            device_type: device.device_type.unwrap_or_default(),
            name: device.name.unwrap_or_default(),
            position: device.position.unwrap_or_default(),
            company: device.company.unwrap_or_default(),
            hourly_quota: device.hourly_quota,
            daily_quota: device.daily_quota,
            monthly_quota: device.monthly_quota,
            disabled: device.disabled,
            last_refreshed_at: refreshed_at,
        })
    }

    /// The MAC to print for this device, if it has one.
    pub fn display_mac(&self) -> Option<&str> {
        [self.mac.as_str(), self.active_mac.as_str()]
            .into_iter()
            .find(|m| !m.is_empty())
    }
}

fn checked_mac(raw: &str, ip: Ipv4Addr) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    match normalize_mac(raw) {
        Some(mac) => mac,
        None => {
            warn!("Device {ip}: ignoring malformed MAC address '{raw}'");
            String::new()
        }
    }
}

/// Accepts six hex octets separated by `:` or `-` and returns them
/// lowercase and colon separated.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let octets: Vec<&str> = raw.split([':', '-']).collect();
    if octets.len() != 6 {
        return None;
    }
    if !octets
        .iter()
        .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return None;
    }
    Some(octets.join(":").to_ascii_lowercase())
}

/// Reasons an inventory entry cannot be cached.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    /// The `ip` field is not an IPv4 literal.
    #[error("'{0}' is not an IPv4 address")]
    InvalidIp(String),
}
