// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 sbaudit Authors

//! Certificate expiration classification.
//!
//! Every "not after" timestamp seen during one audit run is compared
//! against the same [`ExpirationThresholds`], so the local signing key and
//! all four enrolled key stores agree on what "now" means.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Default "expiring soon" horizon, in days
pub const DEFAULT_SOON_DAYS: u32 = 365;

/// Expiration state of a certificate relative to the audit reference time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Expired,
    ExpiringSoon,
    Valid,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Classification::Expired => "EXPIRED",
            Classification::ExpiringSoon => "EXPIRING SOON",
            Classification::Valid => "valid",
        };
        write!(f, "{s}")
    }
}

/// Classify `not_after` relative to `now`.
///
/// A certificate whose validity ends exactly at `now` is still reported as
/// expiring soon; it only becomes expired once `not_after` is in the past.
pub fn classify(
    not_after: DateTime<Utc>,
    now: DateTime<Utc>,
    soon_horizon: Duration,
) -> Classification {
    let delta = not_after - now;
    if delta < Duration::zero() {
        Classification::Expired
    } else if delta < soon_horizon {
        Classification::ExpiringSoon
    } else {
        Classification::Valid
    }
}

/// Reference time and horizon captured once at audit start
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExpirationThresholds {
    now: DateTime<Utc>,
    soon_horizon: Duration,
}

impl ExpirationThresholds {
    pub fn new(now: DateTime<Utc>, soon_days: u32) -> Self {
        Self {
            now,
            soon_horizon: Duration::days(i64::from(soon_days)),
        }
    }

    /// Thresholds anchored at the current wall clock time
    pub fn capture(soon_days: u32) -> Self {
        Self::new(Utc::now(), soon_days)
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    pub fn soon_days(&self) -> i64 {
        self.soon_horizon.num_days()
    }

    pub fn classify(&self, not_after: DateTime<Utc>) -> Classification {
        classify(not_after, self.now, self.soon_horizon)
    }
}

impl Default for ExpirationThresholds {
    fn default() -> Self {
        Self::capture(DEFAULT_SOON_DAYS)
    }
}

/*
 * Parse the textual "not after" form printed by OpenSSL and mokutil, e.g.
 * "Jan  1 00:00:00 2000 GMT". The day may be space padded, and the zone
 * is always GMT/UTC in practice; any other suffix is rejected.
 */
pub fn parse_not_after(text: &str) -> Result<DateTime<Utc>> {
    let mut fields: Vec<&str> = text.split_whitespace().collect();
    match fields.last() {
        Some(&"GMT") | Some(&"UTC") | Some(&"Z") => {
            let _ = fields.pop();
        }
        _ => {}
    }

    let normalized = fields.join(" ");
    NaiveDateTime::parse_from_str(&normalized, "%b %d %H:%M:%S %Y")
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::UnparseableExpirationDate(text.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap() //#[allow_ci]
    }

    #[test]
    fn test_classify_boundaries() {
        let now = at(2024, 1, 1);
        let horizon = Duration::days(365);

        assert_eq!(
            classify(now - Duration::seconds(1), now, horizon),
            Classification::Expired
        );
        assert_eq!(classify(now, now, horizon), Classification::ExpiringSoon);
        assert_eq!(
            classify(now + horizon - Duration::seconds(1), now, horizon),
            Classification::ExpiringSoon
        );
        assert_eq!(
            classify(now + horizon, now, horizon),
            Classification::Valid
        );
        assert_eq!(
            classify(at(2040, 6, 1), now, horizon),
            Classification::Valid
        );
    }

    #[test]
    fn test_thresholds_use_captured_now() {
        let thresholds = ExpirationThresholds::new(at(2024, 1, 1), 30);
        assert_eq!(thresholds.soon_days(), 30);
        assert_eq!(
            thresholds.classify(at(2024, 1, 15)),
            Classification::ExpiringSoon
        );
        assert_eq!(
            thresholds.classify(at(2024, 3, 1)),
            Classification::Valid
        );
        assert_eq!(
            thresholds.classify(at(2023, 12, 31)),
            Classification::Expired
        );
    }

    #[test]
    fn test_parse_not_after() {
        assert_eq!(
            parse_not_after("Jan 1 00:00:00 2000 GMT").unwrap(), //#[allow_ci]
            at(2000, 1, 1)
        );
        assert_eq!(
            parse_not_after("Jan  1 00:00:00 2000 GMT").unwrap(), //#[allow_ci]
            at(2000, 1, 1)
        );
        assert_eq!(
            parse_not_after(" Oct 19 12:30:05 2037 GMT\n").unwrap(), //#[allow_ci]
            Utc.with_ymd_and_hms(2037, 10, 19, 12, 30, 5).unwrap() //#[allow_ci]
        );
    }

    #[test]
    fn test_parse_not_after_rejects_garbage() {
        for text in ["", "never", "2000-01-01", "Foo 1 00:00:00 2000 GMT"] {
            match parse_not_after(text) {
                Err(Error::UnparseableExpirationDate(_)) => {}
                other => panic!("unexpected result for {text:?}: {other:?}"), //#[allow_ci]
            }
        }
    }
}
