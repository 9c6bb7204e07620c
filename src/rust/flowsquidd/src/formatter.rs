//! Turns a flow record into squid-style log lines.
//!
//! Only flows with exactly one local end are logged. The local end is
//! the "subject": its address, port and device identity fill the
//! client columns; the other end fills the destination columns.

use crate::context::Context;
use crate::device_cache::DeviceCache;
use crate::netflow5::FlowEvent;
use chrono::{Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use flowsquid_config::{IgnoreList, SubnetMatcher};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Destination is local.
    Inbound,
    /// Source is local.
    Outbound,
}

impl Direction {
    /// Decides direction from subnet membership. Flows where both or
    /// neither end is local have none.
    pub fn classify(subnets: &SubnetMatcher, src: Ipv4Addr, dst: Ipv4Addr) -> Option<Self> {
        match (subnets.contains(dst), subnets.contains(src)) {
            (true, false) => Some(Self::Inbound),
            (false, true) => Some(Self::Outbound),
            _ => None,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Self::Inbound => "packet_netflow",
            Self::Outbound => "packet_netflow_inverse",
        }
    }

    fn csv_tag(self) -> &'static str {
        match self {
            Self::Inbound => "NF_PACKET",
            Self::Outbound => "NF_I_PACKET",
        }
    }
}

/// Squid "method" column for an IP protocol number.
pub fn protocol_name(protocol: u8) -> &'static str {
    match protocol {
        6 => "TCP_PACKET",
        17 => "UDP_PACKET",
        1 => "ICMP_PACKET",
        _ => "OTHER_PACKET",
    }
}

/// The lines produced for one flow. They are written or dropped together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedFlow {
    pub text: String,
    pub csv: Option<String>,
}

pub struct Formatter {
    subnets: Arc<SubnetMatcher>,
    ignore: Arc<IgnoreList>,
    cache: Arc<DeviceCache>,
    time_zone: Tz,
    csv: bool,
}

impl Formatter {
    pub fn new(ctx: &Context) -> Self {
        Self {
            subnets: ctx.subnets.clone(),
            ignore: ctx.ignore.clone(),
            cache: ctx.cache.clone(),
            time_zone: ctx.time_zone,
            csv: ctx.config.csv,
        }
    }

    /// Formats one flow. `None` means nothing is logged for it.
    pub fn format(&self, event: &FlowEvent) -> Option<FormattedFlow> {
        let record = &event.record;
        let Some(direction) = Direction::classify(&self.subnets, record.src_addr, record.dst_addr)
        else {
            trace!(
                "No local end in {} -> {}, skipping",
                record.src_addr,
                record.dst_addr
            );
            return None;
        };

        let (subject, subject_port, other, other_port) = match direction {
            Direction::Inbound => (
                record.dst_addr,
                record.dst_port,
                record.src_addr,
                record.src_port,
            ),
            Direction::Outbound => (
                record.src_addr,
                record.src_port,
                record.dst_addr,
                record.dst_port,
            ),
        };
        let subject_str = subject.to_string();
        if self.ignore.should_drop_ip(&subject_str) {
            return None;
        }

        let snapshot = self.cache.snapshot();
        let device = snapshot.get(&subject);
        if device.is_none() {
            debug!("No device known for {subject_str}, requesting refresh");
            self.cache.schedule_immediate();
        }
        let mac = device
            .and_then(|d| d.display_mac())
            .unwrap_or(subject_str.as_str());
        let host_name = device.map(|d| d.host_name.as_str()).unwrap_or("");
        let comment = device.map(|d| d.comment.as_str()).unwrap_or("");

        let unix_secs = event.header.unix_secs;
        let duration = record.duration_ms();
        let protocol = protocol_name(record.prot);
        let router = router_ip(event.router.ip());

        let text = format!(
            "{unix_secs}.000 {duration:>6} {subject_str} {protocol}/- {bytes} HEAD {other}:{other_port} {mac} FIRSTUP_PARENT/{router} {tag}/:{subject_port} {host_name} {comment}",
            bytes = record.d_octets,
            tag = direction.tag(),
        );
        if self.ignore.should_drop_line(&text) {
            return None;
        }

        let csv = self.csv.then(|| {
            let time = self.time_columns(unix_secs);
            format!(
                "{unix_secs}|{time}|{duration}|{bytes}|{subject_str}|{host_name}|{subject_port}|{mac}|{other}|{other_port}|{other}:{other_port}|{tag}|200|{protocol}|{mac}|DATA_FROM|{router}|-",
                bytes = record.d_octets,
                tag = direction.csv_tag(),
            )
        });

        Some(FormattedFlow { text, csv })
    }

    /// `year|Month|day|hour|minute|second|±HHMM` in the configured zone.
    fn time_columns(&self, unix_secs: u32) -> String {
        let utc = Utc
            .timestamp_opt(i64::from(unix_secs), 0)
            .single()
            .unwrap_or_default();
        let local = utc.with_timezone(&self.time_zone);
        format!(
            "{}|{}|{}|{}|{}|{}|{}",
            local.year(),
            local.format("%B"),
            local.day(),
            local.hour(),
            local.minute(),
            local.second(),
            local.format("%z"),
        )
    }
}

/// Exporters reached through a dual-stack socket show up as mapped v6.
fn router_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::device_cache::test_support::device;
    use crate::device_cache::RefreshCommand;
    use crate::netflow5::{decode, test_support::*};
    use flowsquid_config::{CliArgs, Config, ConfigFile};
    use std::path::PathBuf;
    use tokio::sync::mpsc::Receiver;

    const UNIX: u32 = 1_628_047_627;

    fn context(csv: bool, ignore: &[&str]) -> (Context, Receiver<RefreshCommand>) {
        let cli = CliArgs {
            log_file: Some(PathBuf::from("/tmp/unused.log")),
            subnets: vec!["192.168.65.0/24".to_string()],
            ignore_list: ignore.iter().map(|s| s.to_string()).collect(),
            csv: Some(csv),
            location: Some("Asia/Yekaterinburg".to_string()),
            ..Default::default()
        };
        let config = Config::merge(&cli, ConfigFile::default()).unwrap();
        let (ctx, rx) = Context::new(config);
        ctx.cache.replace_snapshot(vec![device(
            Ipv4Addr::new(192, 168, 65, 10),
            "c8:58:c0:38:68:a5",
            "root-hp",
            "nb=vlad",
        )]);
        (ctx, rx)
    }

    fn event(record: TestRecord) -> FlowEvent {
        let buf = build_datagram(5, UNIX, &[record]);
        decode(&buf, "10.0.0.1:40000".parse().unwrap())
            .unwrap()
            .into_events()
            .next()
            .unwrap()
    }

    fn swapped() -> TestRecord {
        let r = TestRecord::default();
        TestRecord {
            src: r.dst,
            dst: r.src,
            src_port: r.dst_port,
            dst_port: r.src_port,
            ..r
        }
    }

    #[test]
    fn inbound_flow_from_known_device() {
        let (ctx, mut rx) = context(true, &[]);
        let out = Formatter::new(&ctx).format(&event(TestRecord::default())).unwrap();
        assert_eq!(
            out.text,
            "1628047627.000  44459 192.168.65.10 TCP_PACKET/- 9193 HEAD 8.8.8.8:443 c8:58:c0:38:68:a5 FIRSTUP_PARENT/10.0.0.1 packet_netflow/:51000 root-hp nb=vlad"
        );
        assert_eq!(
            out.csv.unwrap(),
            "1628047627|2021|August|4|8|27|7|+0500|44459|9193|192.168.65.10|root-hp|51000|c8:58:c0:38:68:a5|8.8.8.8|443|8.8.8.8:443|NF_PACKET|200|TCP_PACKET|c8:58:c0:38:68:a5|DATA_FROM|10.0.0.1|-"
        );
        // A hit does not ask for a refresh
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn outbound_flow_keeps_local_subject() {
        let (ctx, _rx) = context(true, &[]);
        let out = Formatter::new(&ctx).format(&event(swapped())).unwrap();
        assert_eq!(
            out.text,
            "1628047627.000  44459 192.168.65.10 TCP_PACKET/- 9193 HEAD 8.8.8.8:443 c8:58:c0:38:68:a5 FIRSTUP_PARENT/10.0.0.1 packet_netflow_inverse/:51000 root-hp nb=vlad"
        );
        let csv = out.csv.unwrap();
        let fields: Vec<&str> = csv.split('|').collect();
        assert_eq!(fields.len(), 24);
        assert_eq!(fields[10], "192.168.65.10");
        assert_eq!(fields[17], "NF_I_PACKET");
    }

    #[test]
    fn miss_uses_ip_as_mac_and_requests_refresh() {
        let (ctx, mut rx) = context(false, &[]);
        let record = TestRecord {
            dst: Ipv4Addr::new(192, 168, 65, 77),
            ..Default::default()
        };
        let out = Formatter::new(&ctx).format(&event(record)).unwrap();
        let fields: Vec<&str> = out.text.split(' ').collect();
        // Two spaces before the duration leave an empty field at index 1
        assert_eq!(fields[8], "192.168.65.77");
        assert!(out.text.ends_with("packet_netflow/:51000  "));
        assert_eq!(rx.try_recv().ok(), Some(RefreshCommand::ScheduleImmediate));
    }

    #[test]
    fn csv_only_when_enabled() {
        let (ctx, _rx) = context(false, &[]);
        let out = Formatter::new(&ctx).format(&event(TestRecord::default())).unwrap();
        assert!(out.csv.is_none());
    }

    #[test]
    fn ignored_subject_produces_nothing() {
        let (ctx, mut rx) = context(true, &["192.168.65.99"]);
        let formatter = Formatter::new(&ctx);
        let record = TestRecord {
            dst: Ipv4Addr::new(192, 168, 65, 99),
            ..Default::default()
        };
        assert!(formatter.format(&event(record)).is_none());
        let record = TestRecord {
            src: Ipv4Addr::new(192, 168, 65, 99),
            dst: Ipv4Addr::new(1, 1, 1, 1),
            ..Default::default()
        };
        assert!(formatter.format(&event(record)).is_none());
        // Dropped before the lookup, so no refresh either
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn ignore_matches_anywhere_in_the_line() {
        let (ctx, _rx) = context(true, &["root-hp"]);
        assert!(Formatter::new(&ctx)
            .format(&event(TestRecord::default()))
            .is_none());
    }

    #[test]
    fn both_or_neither_local_is_dropped() {
        let (ctx, _rx) = context(true, &[]);
        let formatter = Formatter::new(&ctx);
        let both = TestRecord {
            src: Ipv4Addr::new(192, 168, 65, 20),
            ..Default::default()
        };
        assert!(formatter.format(&event(both)).is_none());
        let same = TestRecord {
            src: Ipv4Addr::new(192, 168, 65, 10),
            ..Default::default()
        };
        assert!(formatter.format(&event(same)).is_none());
        let neither = TestRecord {
            dst: Ipv4Addr::new(1, 1, 1, 1),
            ..Default::default()
        };
        assert!(formatter.format(&event(neither)).is_none());
    }

    #[test]
    fn empty_subnet_list_logs_nothing() {
        let matcher = SubnetMatcher::new::<&str>(&[]);
        assert_eq!(
            Direction::classify(&matcher, Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(10, 0, 0, 1)),
            None
        );
    }

    #[test]
    fn protocol_names() {
        assert_eq!(protocol_name(6), "TCP_PACKET");
        assert_eq!(protocol_name(17), "UDP_PACKET");
        assert_eq!(protocol_name(1), "ICMP_PACKET");
        assert_eq!(protocol_name(47), "OTHER_PACKET");
    }

    #[test]
    fn duration_is_right_aligned() {
        let (ctx, _rx) = context(false, &[]);
        let record = TestRecord {
            first: 0,
            last: 7,
            protocol: 17,
            ..Default::default()
        };
        let out = Formatter::new(&ctx).format(&event(record)).unwrap();
        assert!(out.text.starts_with("1628047627.000      7 192.168.65.10 UDP_PACKET/- "));
    }

    #[test]
    fn mapped_router_address_is_shown_as_v4() {
        let mapped: IpAddr = "::ffff:10.0.0.1".parse().unwrap();
        assert_eq!(router_ip(mapped), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
    }
}
