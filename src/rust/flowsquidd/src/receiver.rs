//! NetFlow UDP listener.
//!
//! Binds, sizes the kernel receive queue, then reads datagrams and hands
//! each to its own decoding task. Bind failures are retried every five
//! seconds; a socket that cannot be sized is dropped and rebound after two.
//! Read errors are logged and the same socket keeps reading.

use crate::netflow5::FlowEvent;
use crate::pipeline::dispatch_datagram;
use socket2::SockRef;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Largest datagram read; a full v5 datagram is 1464 bytes.
pub const DATAGRAM_BUFFER: usize = 4096;
const BIND_RETRY: Duration = Duration::from_secs(5);
const REBIND_DELAY: Duration = Duration::from_secs(2);

pub async fn run_receiver(
    addr: String,
    receive_buffer: usize,
    tx: Sender<FlowEvent>,
    cancel: CancellationToken,
) {
    if let Some(socket) = bind_sized(&addr, receive_buffer, &cancel).await {
        info!("Listening for NetFlow on {addr}");
        read_loop(&socket, &tx, &cancel).await;
    }
    info!("NetFlow listener stopped");
}

/// Binds and sizes the socket, rebinding if it cannot be sized. `None`
/// once shutdown begins.
async fn bind_sized(
    addr: &str,
    receive_buffer: usize,
    cancel: &CancellationToken,
) -> Option<UdpSocket> {
    loop {
        let socket = bind_with_retry(addr, cancel).await?;
        match set_receive_buffer(&socket, receive_buffer) {
            Ok(()) => return Some(socket),
            Err(e) => {
                error!("Unable to set receive buffer on {addr}: {e}");
                drop(socket);
                if !pause(REBIND_DELAY, cancel).await {
                    return None;
                }
            }
        }
    }
}

/// Tries to bind until it succeeds or shutdown begins.
async fn bind_with_retry(addr: &str, cancel: &CancellationToken) -> Option<UdpSocket> {
    loop {
        match UdpSocket::bind(addr).await {
            Ok(socket) => return Some(socket),
            Err(e) => {
                error!("Unable to bind {addr}: {e}. Retrying in {BIND_RETRY:?}");
                if !pause(BIND_RETRY, cancel).await {
                    return None;
                }
            }
        }
    }
}

fn set_receive_buffer(socket: &UdpSocket, requested: usize) -> std::io::Result<()> {
    let sock = SockRef::from(socket);
    sock.set_recv_buffer_size(requested)?;
    match sock.recv_buffer_size() {
        Ok(actual) if actual < requested => {
            warn!("Receive buffer is below requested size: requested={requested} actual={actual}")
        }
        Ok(actual) => info!("Receive buffer: requested={requested} actual={actual}"),
        Err(e) => warn!("Unable to read back receive buffer size: {e}"),
    }
    Ok(())
}

/// Reads until shutdown.
async fn read_loop(socket: &UdpSocket, tx: &Sender<FlowEvent>, cancel: &CancellationToken) {
    let mut buf = vec![0u8; DATAGRAM_BUFFER];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            recv = socket.recv_from(&mut buf) => match recv {
                Ok((0, _)) => continue,
                Ok((len, sender)) => {
                    tokio::spawn(dispatch_datagram(buf[..len].to_vec(), sender, tx.clone()));
                }
                Err(e) => error!("Error reading NetFlow socket: {e}"),
            },
        }
    }
}

/// Sleeps unless shutdown begins first. Returns false on shutdown.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
