//! Request log retrieval: unfiltered, paginated and filtered listings.
//!
//! Every query here runs on the read pool. Results are ordered newest first
//! (`id DESC`); ids grow monotonically with insertion, so the order is stable.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, Months, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::pool::Store;
use crate::error::{Error, Result};

/// Page size used when `limit` is not supplied.
pub const DEFAULT_LIMIT: u32 = 100;

/// Largest page a single listing returns.
pub const MAX_LIMIT: u32 = 1000;

/// Timestamp layout SQLite's `CURRENT_TIMESTAMP` writes into `created_at`.
const SQLITE_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

const SELECT_LOGS: &str = "SELECT id, request_id, remote_ip, host, method, uri, user_agent, \
     status, error, latency, latency_human, bytes_in, bytes_out, created_at FROM logs";

/// A single request log row from the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct LogRow {
    pub id: i64,
    pub request_id: String,
    pub remote_ip: String,
    pub host: String,
    pub method: String,
    pub uri: String,
    pub user_agent: String,
    pub status: i64,
    pub error: String,
    pub latency: i64,
    pub latency_human: String,
    pub bytes_in: i64,
    pub bytes_out: i64,
    pub created_at: String,
}

/// Unit of a relative time expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "second" => Some(Self::Second),
            "minute" => Some(Self::Minute),
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }
}

/// A signed offset from "now", such as `-1 hour` or `-24 hours`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeTime {
    pub amount: i64,
    pub unit: TimeUnit,
}

fn relative_time_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^\s*([+-]?)\s*(\d{1,9})\s*(second|minute|hour|day|week|month|year)s?\s*$")
            .expect("relative time pattern is valid")
    })
}

impl RelativeTime {
    /// Parse `[+|-]N unit[s]`. A missing sign means a positive offset.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || {
            Error::Validation(format!(
                "Invalid timeRange '{}'. Expected e.g. '-1 hour', '-24 hours', '-7 days'",
                input
            ))
        };
        let caps = relative_time_pattern().captures(input).ok_or_else(invalid)?;
        let magnitude: i64 = caps[2].parse().map_err(|_| invalid())?;
        let amount = if &caps[1] == "-" { -magnitude } else { magnitude };
        let unit = TimeUnit::parse(&caps[3].to_ascii_lowercase()).ok_or_else(invalid)?;
        Ok(Self { amount, unit })
    }

    /// Resolve against `now`, yielding the instant `now + self`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let out_of_range = || Error::Validation("timeRange is out of range".to_string());
        let fixed = |d: Option<Duration>| -> Result<DateTime<Utc>> {
            let d = d.ok_or_else(out_of_range)?;
            now.checked_add_signed(d).ok_or_else(out_of_range)
        };
        let months = |m: i64| -> Result<DateTime<Utc>> {
            let n = u32::try_from(m.unsigned_abs()).map_err(|_| out_of_range())?;
            let shifted = if m < 0 {
                now.checked_sub_months(Months::new(n))
            } else {
                now.checked_add_months(Months::new(n))
            };
            shifted.ok_or_else(out_of_range)
        };

        match self.unit {
            TimeUnit::Second => fixed(Duration::try_seconds(self.amount)),
            TimeUnit::Minute => fixed(Duration::try_minutes(self.amount)),
            TimeUnit::Hour => fixed(Duration::try_hours(self.amount)),
            TimeUnit::Day => fixed(Duration::try_days(self.amount)),
            TimeUnit::Week => fixed(Duration::try_weeks(self.amount)),
            TimeUnit::Month => months(self.amount),
            TimeUnit::Year => months(self.amount.checked_mul(12).ok_or_else(out_of_range)?),
        }
    }
}

/// Raw query parameters for the filtered listing, as received.
///
/// Everything is a string so malformed numbers surface as validation errors
/// rather than extractor rejections.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FilterParams {
    pub method: Option<String>,
    /// Response status code
    pub response: Option<String>,
    #[serde(rename = "timeRange")]
    pub time_range: Option<String>,
    pub offset: Option<String>,
    pub limit: Option<String>,
}

/// Raw query parameters for the paginated listing.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PageParams {
    pub offset: Option<String>,
    pub limit: Option<String>,
}

/// Offset/limit pair applied to a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl Page {
    /// Build a page from optional inputs; absent values take the defaults.
    pub fn from_params(params: &PageParams) -> Result<Self> {
        let offset = match present(&params.offset) {
            Some(v) => parse_count("offset", v)?,
            None => 0,
        };
        let limit = match present(&params.limit) {
            Some(v) => parse_count("limit", v)?,
            None => DEFAULT_LIMIT,
        };
        Ok(Self {
            offset,
            limit: limit.min(MAX_LIMIT),
        })
    }
}

/// A validated filter for `list_filtered`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub method: Option<String>,
    pub status: Option<u16>,
    /// Rows created before this instant are excluded
    pub since: DateTime<Utc>,
    pub page: Page,
}

impl LogFilter {
    /// Validate raw parameters against `now`.
    ///
    /// `limit`, `offset` and `timeRange` are all required; a partial set is
    /// rejected rather than applied. `method` and `response` are optional.
    pub fn from_params(params: &FilterParams, now: DateTime<Utc>) -> Result<Self> {
        let limit = present(&params.limit);
        let offset = present(&params.offset);
        let time_range = present(&params.time_range);

        let (limit, offset, time_range) = match (limit, offset, time_range) {
            (Some(l), Some(o), Some(t)) => (l, o, t),
            _ => {
                let missing: Vec<&str> = [("limit", limit), ("offset", offset), ("timeRange", time_range)]
                    .iter()
                    .filter(|(_, v)| v.is_none())
                    .map(|(name, _)| *name)
                    .collect();
                return Err(Error::Validation(format!(
                    "limit, offset and timeRange parameters must all be provided (missing: {})",
                    missing.join(", ")
                )));
            }
        };

        let status = present(&params.response)
            .map(|v| {
                v.parse::<u16>().map_err(|_| {
                    Error::Validation(format!("Invalid response parameter '{}'", v))
                })
            })
            .transpose()?;

        let page = Page {
            offset: parse_count("offset", offset)?,
            limit: parse_count("limit", limit)?.min(MAX_LIMIT),
        };
        let since = RelativeTime::parse(time_range)?.resolve(now)?;

        Ok(Self {
            method: present(&params.method).map(str::to_string),
            status,
            since,
            page,
        })
    }
}

/// Treat empty query values the same as absent ones.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_count(name: &str, value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| Error::Validation(format!("Invalid {} parameter '{}'", name, value)))
}

/// Every log row, newest first.
pub async fn list_all(store: &Store) -> Result<Vec<LogRow>> {
    let mut conn = store.acquire_read().await?;
    let sql = format!("{} ORDER BY id DESC", SELECT_LOGS);
    Ok(sqlx::query_as::<_, LogRow>(&sql)
        .fetch_all(&mut *conn)
        .await?)
}

/// One page of log rows, newest first.
pub async fn list_basic(store: &Store, page: Page) -> Result<Vec<LogRow>> {
    let mut conn = store.acquire_read().await?;
    let sql = format!("{} ORDER BY id DESC LIMIT ? OFFSET ?", SELECT_LOGS);
    Ok(sqlx::query_as::<_, LogRow>(&sql)
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&mut *conn)
        .await?)
}

/// One page of log rows matching `filter`, newest first.
///
/// `method` and `status` are nullable predicates: an unset value binds NULL
/// and the predicate holds for every row.
pub async fn list_filtered(store: &Store, filter: &LogFilter) -> Result<Vec<LogRow>> {
    let mut conn = store.acquire_read().await?;
    let sql = format!(
        "{} WHERE (? IS NULL OR method = ?) \
         AND (? IS NULL OR status = ?) \
         AND created_at >= ? \
         ORDER BY id DESC LIMIT ? OFFSET ?",
        SELECT_LOGS
    );
    let status = filter.status.map(i64::from);
    let since = filter.since.format(SQLITE_TIMESTAMP).to_string();

    tracing::debug!(
        method = ?filter.method,
        status = ?filter.status,
        since = %since,
        offset = filter.page.offset,
        limit = filter.page.limit,
        "Filtered logs query"
    );

    Ok(sqlx::query_as::<_, LogRow>(&sql)
        .bind(filter.method.as_deref())
        .bind(filter.method.as_deref())
        .bind(status)
        .bind(status)
        .bind(since)
        .bind(filter.page.limit as i64)
        .bind(filter.page.offset as i64)
        .fetch_all(&mut *conn)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn params(
        method: Option<&str>,
        response: Option<&str>,
        time_range: Option<&str>,
        offset: Option<&str>,
        limit: Option<&str>,
    ) -> FilterParams {
        FilterParams {
            method: method.map(String::from),
            response: response.map(String::from),
            time_range: time_range.map(String::from),
            offset: offset.map(String::from),
            limit: limit.map(String::from),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_relative_time_parses_common_forms() {
        assert_eq!(
            RelativeTime::parse("-1 hour").unwrap(),
            RelativeTime { amount: -1, unit: TimeUnit::Hour }
        );
        assert_eq!(
            RelativeTime::parse("-24 hours").unwrap(),
            RelativeTime { amount: -24, unit: TimeUnit::Hour }
        );
        assert_eq!(
            RelativeTime::parse(" -7 Days ").unwrap(),
            RelativeTime { amount: -7, unit: TimeUnit::Day }
        );
        assert_eq!(
            RelativeTime::parse("+30 minutes").unwrap(),
            RelativeTime { amount: 30, unit: TimeUnit::Minute }
        );
    }

    #[test]
    fn test_relative_time_rejects_garbage() {
        for bad in ["", "hour", "-1", "-1 fortnight", "one hour", "-1.5 hours", "--1 hour"] {
            assert!(
                matches!(RelativeTime::parse(bad), Err(Error::Validation(_))),
                "'{}' should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_relative_time_resolve() {
        let hour = RelativeTime::parse("-1 hour").unwrap().resolve(now()).unwrap();
        assert_eq!(hour, Utc.with_ymd_and_hms(2025, 3, 31, 11, 0, 0).unwrap());

        let month = RelativeTime::parse("-1 month").unwrap().resolve(now()).unwrap();
        assert_eq!(month, Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap());

        let year = RelativeTime::parse("-1 year").unwrap().resolve(now()).unwrap();
        assert_eq!(year, Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_relative_time_out_of_range() {
        let huge = RelativeTime::parse("-999999999 years").unwrap();
        assert!(matches!(huge.resolve(now()), Err(Error::Validation(_))));
    }

    #[test]
    fn test_filter_requires_trio() {
        let missing_offset = params(None, None, Some("-1 hour"), None, Some("10"));
        let err = LogFilter::from_params(&missing_offset, now()).unwrap_err();
        match err {
            Error::Validation(msg) => assert!(msg.contains("offset"), "{}", msg),
            other => panic!("expected validation error, got {other:?}"),
        }

        let missing_range = params(Some("GET"), None, None, Some("0"), Some("10"));
        assert!(matches!(
            LogFilter::from_params(&missing_range, now()),
            Err(Error::Validation(_))
        ));

        let empty_limit = params(None, None, Some("-1 hour"), Some("0"), Some(""));
        assert!(matches!(
            LogFilter::from_params(&empty_limit, now()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_filter_rejects_malformed_numbers() {
        for p in [
            params(None, None, Some("-1 hour"), Some("0"), Some("ten")),
            params(None, None, Some("-1 hour"), Some("-5"), Some("10")),
            params(None, Some("ok"), Some("-1 hour"), Some("0"), Some("10")),
        ] {
            assert!(matches!(
                LogFilter::from_params(&p, now()),
                Err(Error::Validation(_))
            ));
        }
    }

    #[test]
    fn test_filter_builds_optional_predicates() {
        let p = params(Some("GET"), Some("200"), Some("-1 hour"), Some("5"), Some("20"));
        let filter = LogFilter::from_params(&p, now()).unwrap();
        assert_eq!(filter.method.as_deref(), Some("GET"));
        assert_eq!(filter.status, Some(200));
        assert_eq!(filter.page, Page { offset: 5, limit: 20 });
        assert_eq!(filter.since, Utc.with_ymd_and_hms(2025, 3, 31, 11, 0, 0).unwrap());

        let bare = params(None, None, Some("-1 hour"), Some("0"), Some("5000"));
        let filter = LogFilter::from_params(&bare, now()).unwrap();
        assert!(filter.method.is_none());
        assert!(filter.status.is_none());
        assert_eq!(filter.page.limit, MAX_LIMIT);
    }

    #[test]
    fn test_page_defaults_and_clamp() {
        assert_eq!(Page::from_params(&PageParams::default()).unwrap(), Page::default());

        let page = Page::from_params(&PageParams {
            offset: Some("3".to_string()),
            limit: Some("100000".to_string()),
        })
        .unwrap();
        assert_eq!(page, Page { offset: 3, limit: MAX_LIMIT });

        let bad = Page::from_params(&PageParams {
            offset: Some("x".to_string()),
            limit: None,
        });
        assert!(matches!(bad, Err(Error::Validation(_))));
    }
}
