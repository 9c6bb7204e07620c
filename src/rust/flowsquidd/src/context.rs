use crate::device_cache::{DeviceCache, RefreshCommand};
use chrono_tz::Tz;
use flowsquid_config::{Config, IgnoreList, SubnetMatcher};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;

/// Everything the long-running tasks share. Built once in `main` and
/// cloned into each task; nothing in here changes after startup except
/// the cache contents.
#[derive(Clone)]
pub struct Context {
    pub config: Arc<Config>,
    pub subnets: Arc<SubnetMatcher>,
    pub ignore: Arc<IgnoreList>,
    pub time_zone: Tz,
    pub cache: Arc<DeviceCache>,
    pub cancel: CancellationToken,
}

impl Context {
    /// Builds the context and hands back the refresh actor's command
    /// receiver.
    pub fn new(config: Config) -> (Self, Receiver<RefreshCommand>) {
        let subnets = Arc::new(config.subnet_matcher());
        let ignore = Arc::new(config.ignore());
        let time_zone = config.time_zone();
        let (cache, commands) = DeviceCache::new();
        let ctx = Self {
            config: Arc::new(config),
            subnets,
            ignore,
            time_zone,
            cache,
            cancel: CancellationToken::new(),
        };
        (ctx, commands)
    }
}
