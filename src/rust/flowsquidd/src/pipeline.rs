//! Glue between the receiver and the log: each datagram is decoded on
//! its own task and its records are queued, in wire order, for the one
//! formatter task that owns the log sinks.

use crate::formatter::Formatter;
use crate::log_sink::LogSinks;
use crate::netflow5::{self, FlowEvent};
use std::net::SocketAddr;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Records in flight between decoders and the formatter.
pub const CHANNEL_CAPACITY: usize = 100;

pub fn flow_channel() -> (Sender<FlowEvent>, Receiver<FlowEvent>) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// Decodes one datagram and queues its records. A bad datagram is
/// dropped as a whole.
pub async fn dispatch_datagram(buf: Vec<u8>, sender: SocketAddr, tx: Sender<FlowEvent>) {
    let datagram = match netflow5::decode(&buf, sender) {
        Ok(datagram) => datagram,
        Err(e) => {
            warn!("Dropping datagram from {sender}: {e}");
            return;
        }
    };
    trace!(
        "Datagram from {sender}: sequence {}, {} records",
        datagram.header.flow_sequence,
        datagram.records.len()
    );
    for event in datagram.into_events() {
        if tx.send(event).await.is_err() {
            debug!("Formatter has stopped, dropping the rest of a datagram from {sender}");
            return;
        }
    }
}

/// Formats and writes records until cancelled, then drains what is
/// already queued and flushes.
pub async fn run_formatter(
    formatter: Formatter,
    mut sinks: LogSinks,
    mut rx: Receiver<FlowEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => {
                    handle(&formatter, &mut sinks, &event).await;
                    if rx.is_empty() {
                        sinks.flush().await;
                    }
                }
                None => break,
            },
        }
    }

    rx.close();
    let mut drained = 0;
    while let Some(event) = rx.recv().await {
        handle(&formatter, &mut sinks, &event).await;
        drained += 1;
    }
    sinks.flush().await;
    info!("Formatter stopped, {drained} queued records written at shutdown");
}

async fn handle(formatter: &Formatter, sinks: &mut LogSinks, event: &FlowEvent) {
    trace!("Formatting {:?}", event.record);
    if let Some(flow) = formatter.format(event) {
        trace!("Logged: {}", flow.text);
        sinks.write(&flow).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Context;
    use crate::device_cache::test_support::device;
    use crate::netflow5::test_support::*;
    use flowsquid_config::{CliArgs, Config, ConfigFile};
    use std::net::Ipv4Addr;
    use std::path::Path;

    fn config(log: &Path) -> Config {
        let cli = CliArgs {
            log_file: Some(log.to_path_buf()),
            subnets: vec!["192.168.65.0/24".to_string()],
            csv: Some(true),
            location: Some("UTC".to_string()),
            ..Default::default()
        };
        Config::merge(&cli, ConfigFile::default()).unwrap()
    }

    fn router() -> SocketAddr {
        "10.0.0.1:2055".parse().unwrap()
    }

    #[tokio::test]
    async fn datagram_records_are_queued_in_order() {
        let (tx, mut rx) = flow_channel();
        let records: Vec<TestRecord> = (0..3)
            .map(|i| TestRecord {
                src_port: 2000 + i,
                ..Default::default()
            })
            .collect();
        dispatch_datagram(build_datagram(5, 1, &records), router(), tx).await;
        for i in 0..3 {
            assert_eq!(rx.recv().await.unwrap().record.src_port, 2000 + i);
        }
        // The only sender was moved into the dispatcher and dropped
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn bad_datagram_queues_nothing() {
        let (tx, mut rx) = flow_channel();
        let mut buf = build_datagram(5, 1, &[TestRecord::default(), TestRecord::default()]);
        buf.truncate(100);
        dispatch_datagram(buf, router(), tx).await;
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn queued_records_are_written_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir.path().join("access.log"));
        let (ctx, _commands) = Context::new(cfg);
        ctx.cache.replace_snapshot(vec![device(
            Ipv4Addr::new(192, 168, 65, 10),
            "c8:58:c0:38:68:a5",
            "root-hp",
            "",
        )]);
        let sinks = LogSinks::open(&ctx.config).await.unwrap();

        let (tx, rx) = flow_channel();
        let records = vec![TestRecord::default(); 4];
        dispatch_datagram(build_datagram(5, 1_628_047_627, &records), router(), tx).await;

        // Cancelled before it starts: everything queued must still land
        ctx.cancel.cancel();
        run_formatter(Formatter::new(&ctx), sinks, rx, ctx.cancel.clone()).await;

        let log = std::fs::read_to_string(&ctx.config.log_file).unwrap();
        assert_eq!(log.lines().count(), 4);
        assert!(log.lines().all(|l| l.contains("c8:58:c0:38:68:a5")));
        let csv = std::fs::read_to_string(ctx.config.csv_file()).unwrap();
        assert_eq!(csv.lines().count(), 4);
        assert!(csv.starts_with("1628047627|2021|August|4|3|27|7|+0000|"));
    }

    #[tokio::test]
    async fn unclassified_records_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir.path().join("access.log"));
        let (ctx, _commands) = Context::new(cfg);
        let sinks = LogSinks::open(&ctx.config).await.unwrap();
        let (tx, rx) = flow_channel();
        let record = TestRecord {
            dst: Ipv4Addr::new(1, 1, 1, 1),
            ..Default::default()
        };
        dispatch_datagram(build_datagram(5, 1, &[record]), router(), tx).await;
        run_formatter(Formatter::new(&ctx), sinks, rx, ctx.cancel.clone()).await;
        assert_eq!(std::fs::read_to_string(&ctx.config.log_file).unwrap(), "");
        assert_eq!(std::fs::read_to_string(ctx.config.csv_file()).unwrap(), "");
    }
}
