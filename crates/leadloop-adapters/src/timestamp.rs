//! Splitting free-text stage values into display content and the machine
//! timestamp the automation appends as the last line.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use leadloop_core::Channel;
use serde::{Deserialize, Serialize};

/// A whole field shorter than this that parses as a date is a bare send stamp.
pub const TIMESTAMP_ONLY_MAX_LEN: usize = 50;

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y, %I:%M:%S %p",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y, %I:%M %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y, %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecomposedKind {
    /// The whole field was a timestamp.
    TimestampOnly,
    /// Content lines followed by a timestamp line.
    ContentWithTimestamp,
    /// No trailing timestamp recognised.
    ContentOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decomposed {
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: DecomposedKind,
}

impl Decomposed {
    /// Content for display, with the placeholders used when the field held
    /// nothing but a timestamp or nothing at all.
    pub fn display_content(&self, channel: Channel) -> String {
        match (self.kind, self.timestamp) {
            (DecomposedKind::TimestampOnly, Some(ts)) => {
                format!("Sent on: {}", ts.format("%Y-%m-%d %H:%M UTC"))
            }
            _ if self.content.is_empty() => empty_reply_placeholder(channel).to_string(),
            _ => self.content.clone(),
        }
    }
}

pub fn empty_reply_placeholder(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => "Email Reply Received",
        Channel::WhatsApp => "WhatsApp Reply Received",
        Channel::Voice | Channel::Message => "Message Reply Received",
    }
}

/// Splits `raw` into content and an optional trailing timestamp.
///
/// The last line only counts as a timestamp when it also contains both `-`
/// and `:`. A content line that happens to parse and carries both characters
/// is taken as a timestamp too.
pub fn decompose(raw: &str) -> Decomposed {
    let trimmed = raw.trim();

    if trimmed.chars().count() < TIMESTAMP_ONLY_MAX_LEN {
        if let Some(ts) = parse_timestamp(trimmed) {
            return Decomposed {
                content: String::new(),
                timestamp: Some(ts),
                kind: DecomposedKind::TimestampOnly,
            };
        }
    }

    let mut lines = trimmed.lines().collect::<Vec<_>>();
    if let Some(last) = lines.last().map(|l| l.trim()) {
        if last.contains('-') && last.contains(':') {
            if let Some(ts) = parse_timestamp(last) {
                lines.pop();
                return Decomposed {
                    content: lines.join("\n").trim().to_string(),
                    timestamp: Some(ts),
                    kind: DecomposedKind::ContentWithTimestamp,
                };
            }
        }
    }

    Decomposed {
        content: trimmed.to_string(),
        timestamp: None,
        kind: DecomposedKind::ContentOnly,
    }
}

/// Parses the timestamp shapes seen in the upstream sheets. Offset-less
/// values are read as UTC.
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}
