use anyhow::Result;
use flowsquid_config::Config;
use flowsquid_inventory::InventoryClient;
use flowsquidd::admin::run_admin_server;
use flowsquidd::device_cache::run_refresh_actor;
use flowsquidd::formatter::Formatter;
use flowsquidd::log_sink::LogSinks;
use flowsquidd::pipeline::{flow_channel, run_formatter};
use flowsquidd::receiver::run_receiver;
use flowsquidd::Context;
use signal_hook::{
    consts::{SIGHUP, SIGINT, SIGTERM},
    iterator::Signals,
};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};

/// Configure a highly detailed logging system. `RUST_LOG` overrides the
/// configured level.
pub fn set_console_logging(configured: &str) -> Result<()> {
    let requested = std::env::var("RUST_LOG").unwrap_or_else(|_| configured.to_string());
    let (level, known) = match requested.to_lowercase().as_str() {
        "trace" => (LevelFilter::TRACE, true),
        "debug" => (LevelFilter::DEBUG, true),
        "info" => (LevelFilter::INFO, true),
        "warn" | "warning" => (LevelFilter::WARN, true),
        "error" => (LevelFilter::ERROR, true),
        _ => (LevelFilter::INFO, false),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        // Use a more compact, abbreviated log format
        .compact()
        // Display source code file paths
        .with_file(true)
        // Display source code line numbers
        .with_line_number(true)
        .with_thread_ids(false)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if !known {
        error!("Unknown log level '{requested}', using info");
    }
    Ok(())
}

/// SIGINT and SIGTERM cancel `cancel`; SIGHUP is logged and ignored.
fn spawn_signal_watcher(cancel: CancellationToken) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGHUP, SIGTERM])?;
    std::thread::Builder::new()
        .name("Signal Handler".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                match sig {
                    SIGINT => warn!("Terminating on SIGINT"),
                    SIGTERM => warn!("Terminating on SIGTERM"),
                    SIGHUP => {
                        warn!("SIGHUP received; configuration is only read at startup");
                        continue;
                    }
                    _ => {
                        warn!("No handler for signal: {sig}");
                        continue;
                    }
                }
                cancel.cancel();
                break;
            }
        })?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    set_console_logging(&config.log_level)?;
    info!("flowsquid {} starting", env!("CARGO_PKG_VERSION"));

    let quotas = config.default_quotas_bytes();
    info!(
        "Default quotas (bytes): hourly={} daily={} monthly={}",
        quotas.hourly, quotas.daily, quotas.monthly
    );

    let (ctx, commands) = Context::new(config);
    if ctx.subnets.is_empty() {
        warn!("No local subnets configured; no flows will be logged");
    }
    if ctx.config.inventory_url.is_empty() {
        warn!("No inventory URL configured; device lookups will always miss");
    }

    // Fatal at startup: nowhere to write
    let sinks = LogSinks::open(&ctx.config)
        .await
        .inspect_err(|e| error!("{e}"))?;
    let inventory = InventoryClient::new(&ctx.config.inventory_url)?;
    info!("Device inventory: {}", inventory.url());

    spawn_signal_watcher(ctx.cancel.clone())?;

    let refresh = tokio::spawn(run_refresh_actor(
        ctx.cache.clone(),
        inventory,
        commands,
        ctx.config.refresh_interval,
        ctx.cancel.clone(),
    ));

    let admin = {
        let addr = ctx.config.admin_addr.clone();
        let cache = ctx.cache.clone();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = run_admin_server(&addr, cache, cancel).await {
                error!("Admin API failed: {e:?}");
            }
        })
    };

    let (tx, rx) = flow_channel();
    let formatter = tokio::spawn(run_formatter(
        Formatter::new(&ctx),
        sinks,
        rx,
        ctx.cancel.clone(),
    ));
    let receiver = tokio::spawn(run_receiver(
        ctx.config.flow_addr.clone(),
        ctx.config.receive_buffer_size,
        tx,
        ctx.cancel.clone(),
    ));

    ctx.cancel.cancelled().await;
    info!("Shutting down");
    for (name, task) in [
        ("receiver", receiver),
        ("formatter", formatter),
        ("refresh", refresh),
        ("admin", admin),
    ] {
        if let Err(e) = task.await {
            error!("The {name} task failed: {e}");
        }
    }
    info!("flowsquid stopped");
    Ok(())
}
