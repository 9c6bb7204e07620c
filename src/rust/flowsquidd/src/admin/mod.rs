//! Administrative HTTP API.
//!
//! * `GET /api/v1/updatedevices` asks for a device refresh within a second
//! * `GET /api/v1/devices` returns the cached devices

use crate::device_cache::DeviceCache;
use anyhow::Result;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use flowsquid_inventory::DeviceRecord;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub fn admin_router(cache: Arc<DeviceCache>) -> Router {
    Router::new()
        .route("/api/v1/updatedevices", get(update_devices))
        .route("/api/v1/devices", get(list_devices))
        .with_state(cache)
        .layer(axum::middleware::from_fn(log_requests))
}

/// Serves the admin API on `listen_address` until `cancel` fires.
pub async fn run_admin_server(
    listen_address: &str,
    cache: Arc<DeviceCache>,
    cancel: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(listen_address).await?;
    info!("Admin API listening on: [{listen_address}]");
    axum::serve(
        listener,
        admin_router(cache).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await?;
    info!("Admin API stopped");
    Ok(())
}

async fn update_devices(State(cache): State<Arc<DeviceCache>>) -> StatusCode {
    cache.schedule_immediate();
    StatusCode::OK
}

async fn list_devices(State(cache): State<Arc<DeviceCache>>) -> Json<Vec<DeviceRecord>> {
    Json(cache.devices())
}

async fn log_requests(
    peer: Option<ConnectInfo<SocketAddr>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let remote = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.to_string()))
        .unwrap_or_else(|| "-".to_string());

    info!("started {method} {uri} for {remote}");
    let started = Instant::now();
    let response = next.run(req).await;
    info!(
        "completed {method} {uri} for {remote}: {} in {:?}",
        response.status().as_u16(),
        started.elapsed()
    );
    response
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device_cache::test_support::device;
    use crate::device_cache::RefreshCommand;
    use std::net::Ipv4Addr;

    async fn serve(cache: Arc<DeviceCache>) -> (String, CancellationToken) {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let bind = addr.clone();
        tokio::spawn(async move { run_admin_server(&bind, cache, token).await });
        // Wait for the listener
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(&addr).await.is_ok() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        (format!("http://{addr}"), cancel)
    }

    #[tokio::test]
    async fn update_devices_schedules_a_refresh() {
        let (cache, mut commands) = DeviceCache::new();
        let (base, cancel) = serve(cache).await;
        let res = reqwest::get(format!("{base}/api/v1/updatedevices")).await.unwrap();
        assert_eq!(res.status().as_u16(), 200);
        assert_eq!(res.text().await.unwrap(), "");
        assert_eq!(commands.recv().await, Some(RefreshCommand::ScheduleImmediate));
        cancel.cancel();
    }

    #[tokio::test]
    async fn devices_returns_the_snapshot() {
        let (cache, _commands) = DeviceCache::new();
        cache.replace_snapshot(vec![
            device(Ipv4Addr::new(192, 168, 65, 10), "c8:58:c0:38:68:a5", "root-hp", "nb=vlad"),
            device(Ipv4Addr::new(192, 168, 65, 2), "", "printer", ""),
        ]);
        let (base, cancel) = serve(cache).await;
        let devices: Vec<DeviceRecord> = reqwest::get(format!("{base}/api/v1/devices"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].host_name, "printer");
        assert_eq!(devices[1].mac, "c8:58:c0:38:68:a5");
        cancel.cancel();
    }

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for Captured {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn unknown_path_is_not_found_and_logged() {
        // Current-thread runtime: the server task logs on this thread
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (cache, _commands) = DeviceCache::new();
        let (base, cancel) = serve(cache).await;
        let res = reqwest::get(format!("{base}/api/v1/nothing")).await.unwrap();
        assert_eq!(res.status().as_u16(), 404);
        cancel.cancel();

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("started GET /api/v1/nothing"), "{output}");
        assert!(output.contains("completed GET /api/v1/nothing"), "{output}");
        assert!(output.contains(": 404 in"), "{output}");
    }
}
