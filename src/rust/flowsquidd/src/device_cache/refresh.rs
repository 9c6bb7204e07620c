//! The refresh actor owns the refresh timer. It refreshes once at
//! startup, then every `interval`, and earlier whenever it is asked to.
//! Requests that arrive while a fetch is running are dropped: the fetch
//! already in flight will answer them.

use super::DeviceCache;
use flowsquid_inventory::{DeviceRecord, InventoryClient, InventoryError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::Receiver;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Delay applied by [`RefreshCommand::ScheduleImmediate`].
pub const IMMEDIATE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshCommand {
    /// Fire the timer in about a second, unless it is due sooner.
    ScheduleImmediate,
}

/// Something that can produce the full device list.
pub trait DeviceSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<Vec<DeviceRecord>, InventoryError>> + Send;
}

impl DeviceSource for InventoryClient {
    fn fetch(&self) -> impl Future<Output = Result<Vec<DeviceRecord>, InventoryError>> + Send {
        self.load_all_devices()
    }
}

/// Fetches and publishes. On failure the current snapshot stays.
/// Returns true when a new snapshot was published.
pub async fn refresh_now<S: DeviceSource>(cache: &DeviceCache, source: &S) -> bool {
    match source.fetch().await {
        Ok(devices) => {
            cache.replace_snapshot(devices);
            true
        }
        Err(e) => {
            error!("Device refresh failed, keeping {} cached devices: {e}", cache.len());
            false
        }
    }
}

/// Runs until `cancel` fires.
pub async fn run_refresh_actor<S: DeviceSource>(
    cache: Arc<DeviceCache>,
    source: S,
    mut commands: Receiver<RefreshCommand>,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!("Device refresh every {interval:?}");
    let mut deadline = Instant::now();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(deadline) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = refresh_now(&cache, &source) => {}
                }
                while commands.try_recv().is_ok() {}
                deadline = Instant::now() + interval;
            }
            command = commands.recv() => match command {
                Some(RefreshCommand::ScheduleImmediate) => {
                    deadline = deadline.min(Instant::now() + IMMEDIATE_DELAY);
                }
                None => break,
            },
        }
    }
    info!("Device refresh stopped");
}
