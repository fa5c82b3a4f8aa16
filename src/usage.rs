//! Token usage accounting and time-bucketed aggregation
//!
//! Each chat owns at most one [`UsageRecord`]: running totals plus an
//! append-only history of per-response counts. Totals can only move through
//! [`UsageRecord::record`], and are recomputed from the history whenever a
//! record is deserialized, so they never drift from the history they
//! summarize.
//!
//! [`bucket`] rolls the histories of many records into a cumulative series
//! at hour, day, week or month granularity for reporting.
//!
//! # Examples
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use personachat::store::ChatId;
//! use personachat::usage::{bucket, Granularity, UsageRecord};
//!
//! let mut record = UsageRecord::new(ChatId(1));
//! record.record(10, 4, Utc.with_ymd_and_hms(2025, 3, 1, 9, 15, 0).unwrap());
//! record.record(5, 1, Utc.with_ymd_and_hms(2025, 3, 2, 8, 0, 0).unwrap());
//!
//! let series = bucket([&record], Granularity::Day);
//! assert_eq!(series.len(), 2);
//! assert_eq!((series[1].input, series[1].output), (15, 5));
//! ```

use crate::error::PersonaChatError;
use crate::store::ChatId;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Input/output token counts for one response
///
/// Missing fields deserialize as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCounts {
    /// Prompt tokens
    pub input_tokens: u64,
    /// Generated tokens
    pub output_tokens: u64,
}

impl TokenCounts {
    /// Creates a pair of counts
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// True when both counts are zero
    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }
}

/// One history entry of a usage record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    /// When the usage was recorded
    pub timestamp: DateTime<Utc>,
    /// Prompt tokens of this response
    pub input_tokens: u64,
    /// Generated tokens of this response
    pub output_tokens: u64,
}

/// Per-chat token usage: totals plus append-only history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredUsageRecord")]
pub struct UsageRecord {
    chat_id: ChatId,
    total_input_tokens: u64,
    total_output_tokens: u64,
    history: Vec<UsageEntry>,
}

/// Serialized shape of a usage record; totals are ignored on load
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredUsageRecord {
    chat_id: ChatId,
    #[serde(default)]
    total_input_tokens: u64,
    #[serde(default)]
    total_output_tokens: u64,
    #[serde(default)]
    history: Vec<UsageEntry>,
}

impl From<StoredUsageRecord> for UsageRecord {
    fn from(stored: StoredUsageRecord) -> Self {
        let mut record = UsageRecord::new(stored.chat_id);
        for entry in stored.history {
            record.push(entry);
        }
        if record.total_input_tokens != stored.total_input_tokens
            || record.total_output_tokens != stored.total_output_tokens
        {
            tracing::warn!(
                chat_id = %record.chat_id,
                stored_input = stored.total_input_tokens,
                stored_output = stored.total_output_tokens,
                "Usage totals disagreed with history; recomputed from history"
            );
        }
        record
    }
}

impl UsageRecord {
    /// Creates an empty record for a chat
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            total_input_tokens: 0,
            total_output_tokens: 0,
            history: Vec::new(),
        }
    }

    /// Adds one response's counts to the totals and appends a history entry
    pub fn record(&mut self, input_tokens: u64, output_tokens: u64, at: DateTime<Utc>) {
        self.push(UsageEntry {
            timestamp: at,
            input_tokens,
            output_tokens,
        });
    }

    fn push(&mut self, entry: UsageEntry) {
        self.total_input_tokens = self.total_input_tokens.saturating_add(entry.input_tokens);
        self.total_output_tokens = self.total_output_tokens.saturating_add(entry.output_tokens);
        self.history.push(entry);
    }

    /// Chat this record belongs to
    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    /// Sum of all recorded input tokens
    pub fn total_input_tokens(&self) -> u64 {
        self.total_input_tokens
    }

    /// Sum of all recorded output tokens
    pub fn total_output_tokens(&self) -> u64 {
        self.total_output_tokens
    }

    /// History in recording order
    pub fn history(&self) -> &[UsageEntry] {
        &self.history
    }

    /// True if nothing was ever recorded
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Totals across several usage records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    /// Sum of input tokens
    pub input: u64,
    /// Sum of output tokens
    pub output: u64,
}

impl UsageTotals {
    /// Sums the totals of the given records
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a UsageRecord>) -> Self {
        records.into_iter().fold(Self::default(), |acc, r| Self {
            input: acc.input.saturating_add(r.total_input_tokens()),
            output: acc.output.saturating_add(r.total_output_tokens()),
        })
    }
}

/// Reporting granularity for [`bucket`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    /// Calendar hour
    Hour,
    /// Calendar day
    Day,
    /// ISO week, starting Monday
    Week,
    /// Calendar month
    Month,
}

impl Granularity {
    /// Start of the bucket containing `ts` (UTC)
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        match self {
            Self::Hour => midnight(date) + Duration::hours(i64::from(ts.hour())),
            Self::Day => midnight(date),
            Self::Week => {
                let offset = i64::from(date.weekday().num_days_from_monday());
                midnight(date - Duration::days(offset))
            }
            Self::Month => midnight(date.with_day(1).unwrap_or(date)),
        }
    }

    /// Human-readable key of the bucket starting at `start`
    pub fn label(&self, start: DateTime<Utc>) -> String {
        let pattern = match self {
            Self::Hour => "%Y-%m-%d %H:00",
            Self::Day => "%Y-%m-%d",
            Self::Week => "%G-W%V",
            Self::Month => "%Y-%m",
        };
        start.format(pattern).to_string()
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hour => write!(f, "hour"),
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
        }
    }
}

impl FromStr for Granularity {
    type Err = PersonaChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hour" | "hourly" => Ok(Self::Hour),
            "day" | "daily" => Ok(Self::Day),
            "week" | "weekly" => Ok(Self::Week),
            "month" | "monthly" => Ok(Self::Month),
            other => Err(PersonaChatError::InvalidInput(format!(
                "unknown granularity: {}. Must be one of: hour, day, week, month",
                other
            ))),
        }
    }
}

/// One point of a cumulative usage series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsagePoint {
    /// Start of the bucket (UTC)
    pub bucket_start: DateTime<Utc>,
    /// Bucket key, formatted per granularity
    pub label: String,
    /// Input tokens in this bucket and all earlier ones
    pub input: u64,
    /// Output tokens in this bucket and all earlier ones
    pub output: u64,
}

/// Groups every history entry of `records` into buckets and returns the
/// cumulative running totals in chronological order.
///
/// The result is non-decreasing in both `input` and `output`.
pub fn bucket<'a>(
    records: impl IntoIterator<Item = &'a UsageRecord>,
    granularity: Granularity,
) -> Vec<UsagePoint> {
    let mut buckets: BTreeMap<DateTime<Utc>, (u64, u64)> = BTreeMap::new();
    for record in records {
        for entry in record.history() {
            let slot = buckets
                .entry(granularity.truncate(entry.timestamp))
                .or_insert((0, 0));
            slot.0 = slot.0.saturating_add(entry.input_tokens);
            slot.1 = slot.1.saturating_add(entry.output_tokens);
        }
    }

    let mut input = 0u64;
    let mut output = 0u64;
    buckets
        .into_iter()
        .map(|(start, (bucket_input, bucket_output))| {
            input = input.saturating_add(bucket_input);
            output = output.saturating_add(bucket_output);
            UsagePoint {
                bucket_start: start,
                label: granularity.label(start),
                input,
                output,
            }
        })
        .collect()
}
