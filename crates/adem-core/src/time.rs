//! Timestamp normalization for inbound records.
//!
//! Devices report epoch timestamps in whatever unit their firmware happens
//! to use: seconds, milliseconds, microseconds or nanoseconds. Everything
//! downstream works in epoch milliseconds, so the cascade below picks an
//! interpretation by magnitude and converts. Values that land outside every
//! plausible epoch window are replaced with the supplied wall clock.

use chrono::{Local, TimeZone, Utc};

/// Upper bound of the epoch-ms window (`10^13`, ~year 2286).
const MS_MAX: i64 = 10_000_000_000_000;
/// Lower bound of the epoch-ms window (`10^12`, ~year 2001).
const MS_MIN: i64 = 1_000_000_000_000;
/// Bounds of the epoch-seconds window (`10^9`..`10^10`).
const SEC_MIN: i64 = 1_000_000_000;
const SEC_MAX: i64 = 10_000_000_000;

/// Current wall clock in epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Normalize a raw device timestamp to epoch milliseconds.
///
/// The magnitude cascade is applied until the value settles in the epoch-ms
/// window: values above `10^13` are treated as nanoseconds and divided by
/// `10^6` (a microsecond reading passes through the seconds branch on the
/// next round), values in the seconds window are multiplied by `10^3`, and
/// anything that never converges falls back to `fallback_now_ms`.
///
/// Idempotent for inputs already in epoch milliseconds.
pub fn normalize_epoch_ms(raw: Option<i64>, fallback_now_ms: i64) -> i64 {
    let Some(mut ts) = raw else {
        return fallback_now_ms;
    };
    // Two conversions suffice for any unit down to nanoseconds; the third
    // pass only classifies the settled value.
    for _ in 0..3 {
        if ts > MS_MAX {
            ts /= 1_000_000;
        } else if (MS_MIN..=MS_MAX).contains(&ts) {
            return ts;
        } else if ts > SEC_MIN && ts < SEC_MAX {
            return ts * 1000;
        } else {
            return fallback_now_ms;
        }
    }
    fallback_now_ms
}

/// Format an epoch-ms timestamp as `DD-MM-YYYY HH:MM:SS:mmm` in server
/// local time (the `dt` field on persisted records).
pub fn format_dt_local(ts_ms: i64) -> String {
    let ms = ts_ms.rem_euclid(1000);
    let dt = Local
        .timestamp_millis_opt(ts_ms)
        .earliest()
        .unwrap_or_else(Local::now);
    format!("{}:{:03}", dt.format("%d-%m-%Y %H:%M:%S"), ms)
}
