//! IP → device cache.
//!
//! The map is published as an immutable snapshot behind an `ArcSwap`, so
//! the formatter reads without taking a lock and never observes a half
//! built map. Only the refresh actor (see [`refresh`]) replaces it.

pub mod refresh;

use arc_swap::ArcSwap;
use flowsquid_inventory::DeviceRecord;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use refresh::{refresh_now, run_refresh_actor, DeviceSource, RefreshCommand};

/// An immutable view of all known devices.
pub type Snapshot = HashMap<Ipv4Addr, DeviceRecord>;

const COMMAND_CAPACITY: usize = 16;

pub struct DeviceCache {
    snapshot: ArcSwap<Snapshot>,
    commands: mpsc::Sender<RefreshCommand>,
}

impl DeviceCache {
    /// Creates an empty cache. The returned receiver belongs to the
    /// refresh actor.
    pub fn new() -> (Arc<Self>, mpsc::Receiver<RefreshCommand>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let cache = Arc::new(Self {
            snapshot: ArcSwap::from_pointee(Snapshot::new()),
            commands: tx,
        });
        (cache, rx)
    }

    /// The current snapshot. Holding it does not block a refresh.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<DeviceRecord> {
        self.snapshot.load().get(&ip).cloned()
    }

    /// Publishes a new set of devices, replacing the previous one as a
    /// whole. Duplicate addresses keep the last entry.
    pub fn replace_snapshot(&self, devices: Vec<DeviceRecord>) {
        let mut map = Snapshot::with_capacity(devices.len());
        for device in devices {
            if let Some(previous) = map.insert(device.ip, device) {
                debug!("Inventory lists {} more than once", previous.ip);
            }
        }
        info!("Device cache now holds {} devices", map.len());
        self.snapshot.store(Arc::new(map));
    }

    /// All cached devices, ordered by address.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        let mut devices: Vec<DeviceRecord> = self.snapshot.load().values().cloned().collect();
        devices.sort_by_key(|d| d.ip);
        devices
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Asks the refresh actor to run within about a second. Never blocks:
    /// if a request is already queued this one is redundant.
    pub fn schedule_immediate(&self) {
        match self.commands.try_send(RefreshCommand::ScheduleImmediate) {
            Ok(()) => debug!("Device refresh requested"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("Device refresh already pending")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Device refresh actor is not running")
            }
        }
    }
}
