//! Device comments carry structured metadata as `/`-separated segments,
//! for example `nb=Vlad/com=UTTiST/col=Admin/quotahourly=500000000`.
//!
//! * `tel`, `nb`, `ws`, `srv`, `prn` set the device type to the key and
//!   the name to the value. `name` does the same with type `other`.
//! * `col` is the position, `com` the company.
//! * `quotahourly`, `quotadaily`, `quotamonthly` are byte counts.
//!
//! Anything else is ignored. Later segments overwrite earlier ones.

use std::fmt;
use thiserror::Error;
use tracing::warn;

const TYPED_KEYS: [&str; 5] = ["tel", "nb", "ws", "srv", "prn"];

/// Fields recovered from a device comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceComment {
    /// Device kind: one of the typed keys or `other`.
    pub device_type: String,
    /// Owner or device name.
    pub name: String,
    /// Position of the owner.
    pub position: String,
    /// Company of the owner.
    pub company: String,
    /// Hourly quota in bytes, 0 when unset.
    pub hourly_quota: u64,
    /// Daily quota in bytes, 0 when unset.
    pub daily_quota: u64,
    /// Monthly quota in bytes, 0 when unset.
    pub monthly_quota: u64,
}

enum Segment<'a> {
    Typed(&'a str, &'a str),
    Position(&'a str),
    Company(&'a str),
    HourlyQuota(u64),
    DailyQuota(u64),
    MonthlyQuota(u64),
}

impl DeviceComment {
    /// Parses a comment. Problems with individual segments are logged
    /// and the segment skipped; parsing itself never fails.
    pub fn parse(comment: &str) -> Self {
        let mut result = Self::default();
        for raw in comment.split('/') {
            match parse_segment(raw) {
                Ok(Some(segment)) => result.apply(segment),
                Ok(None) => {}
                Err(e) => warn!("Comment '{comment}': {e}"),
            }
        }
        result
    }

    /// True when no recognised field was found.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(&mut self, segment: Segment) {
        match segment {
            Segment::Typed(kind, name) => {
                self.device_type = kind.to_string();
                self.name = name.to_string();
            }
            Segment::Position(v) => self.position = v.to_string(),
            Segment::Company(v) => self.company = v.to_string(),
            Segment::HourlyQuota(q) => self.hourly_quota = q,
            Segment::DailyQuota(q) => self.daily_quota = q,
            Segment::MonthlyQuota(q) => self.monthly_quota = q,
        }
    }
}

fn parse_segment(raw: &str) -> Result<Option<Segment<'_>>, CommentError> {
    let raw = raw.trim();
    let Some((key, value)) = raw.split_once('=') else {
        // Bare tokens carry no recognised meaning.
        return Ok(None);
    };
    let key = key.trim();
    let value = value.trim();
    if value.is_empty() {
        return Err(CommentError::MissingValue(key.to_string()));
    }
    let quota = || {
        value.parse::<u64>().map_err(|_| CommentError::InvalidQuota {
            key: key.to_string(),
            value: value.to_string(),
        })
    };
    let segment = match key {
        k if TYPED_KEYS.contains(&k) => Segment::Typed(k, value),
        "name" => Segment::Typed("other", value),
        "col" => Segment::Position(value),
        "com" => Segment::Company(value),
        "quotahourly" => Segment::HourlyQuota(quota()?),
        "quotadaily" => Segment::DailyQuota(quota()?),
        "quotamonthly" => Segment::MonthlyQuota(quota()?),
        _ => return Ok(None),
    };
    Ok(Some(segment))
}

impl fmt::Display for DeviceComment {
    /// Re-emits the recognised fields in grammar form. Unknown segments
    /// from the source comment are not preserved.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.name.is_empty() {
            let key = if self.device_type == "other" || self.device_type.is_empty() {
                "name"
            } else {
                self.device_type.as_str()
            };
            parts.push(format!("{key}={}", self.name));
        }
        if !self.company.is_empty() {
            parts.push(format!("com={}", self.company));
        }
        if !self.position.is_empty() {
            parts.push(format!("col={}", self.position));
        }
        if self.hourly_quota > 0 {
            parts.push(format!("quotahourly={}", self.hourly_quota));
        }
        if self.daily_quota > 0 {
            parts.push(format!("quotadaily={}", self.daily_quota));
        }
        if self.monthly_quota > 0 {
            parts.push(format!("quotamonthly={}", self.monthly_quota));
        }
        write!(f, "{}", parts.join("/"))
    }
}

/// Problems with a single comment segment.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommentError {
    /// `key=` with nothing after the equals sign.
    #[error("segment '{0}=' has no value")]
    MissingValue(String),
    /// A quota that is not an unsigned integer.
    #[error("quota '{key}' has non-numeric value '{value}'")]
    InvalidQuota {
        /// Quota key.
        key: String,
        /// Offending value.
        value: String,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn full_comment() {
        let c = DeviceComment::parse("nb=Vlad/com=UTTiST/col=Admin/quotahourly=500000000");
        assert_eq!(c.device_type, "nb");
        assert_eq!(c.name, "Vlad");
        assert_eq!(c.company, "UTTiST");
        assert_eq!(c.position, "Admin");
        assert_eq!(c.hourly_quota, 500_000_000);
        assert_eq!(c.daily_quota, 0);
    }

    #[test]
    fn name_key_means_other() {
        let c = DeviceComment::parse("name=printer-2");
        assert_eq!(c.device_type, "other");
        assert_eq!(c.name, "printer-2");
    }

    #[test]
    fn last_typed_key_wins() {
        let c = DeviceComment::parse("name=Bob/nb=Vlad");
        assert_eq!(c.device_type, "nb");
        assert_eq!(c.name, "Vlad");
        let c = DeviceComment::parse("srv=files/name=Bob");
        assert_eq!(c.device_type, "other");
        assert_eq!(c.name, "Bob");
    }

    #[test]
    fn unknown_and_bare_segments_are_ignored() {
        let c = DeviceComment::parse("hello/foo=bar/ws=desk-12");
        assert_eq!(c.device_type, "ws");
        assert_eq!(c.name, "desk-12");
        assert_eq!(c.company, "");
    }

    #[test]
    fn empty_value_contributes_nothing() {
        let c = DeviceComment::parse("com=/col=Boss");
        assert_eq!(c.company, "");
        assert_eq!(c.position, "Boss");
        assert!(matches!(
            parse_segment("com="),
            Err(CommentError::MissingValue(k)) if k == "com"
        ));
    }

    #[test]
    fn bad_quota_is_skipped() {
        let c = DeviceComment::parse("quotadaily=lots/quotamonthly=7");
        assert_eq!(c.daily_quota, 0);
        assert_eq!(c.monthly_quota, 7);
    }

    #[test]
    fn empty_comment() {
        assert!(DeviceComment::parse("").is_empty());
    }

    #[test]
    fn render_then_parse_keeps_recognised_pairs() {
        let original = DeviceComment::parse(
            "tel=Anna/junk/com=Acme/col=CEO/quotahourly=1/quotadaily=2/quotamonthly=3",
        );
        let rendered = original.to_string();
        assert_eq!(
            rendered,
            "tel=Anna/com=Acme/col=CEO/quotahourly=1/quotadaily=2/quotamonthly=3"
        );
        assert_eq!(DeviceComment::parse(&rendered), original);

        let other = DeviceComment::parse("name=Bob");
        assert_eq!(DeviceComment::parse(&other.to_string()), other);
    }
}
