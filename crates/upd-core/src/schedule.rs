//! Next-check computation.
//!
//! Check times are multiples of the channel TTL counted from local midnight
//! of 2000-01-01, so every launch within one window agrees on when the next
//! remote check is due.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use upd_schema::MIN_CHECK_INTERVAL;

/// Local midnight of the reference date, as a UTC instant.
pub fn reference_midnight<Tz: TimeZone>(tz: &Tz) -> DateTime<Utc> {
    tz.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
        .earliest()
        .map_or_else(
            || DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(10_957),
            |t| t.with_timezone(&Utc),
        )
}

/// Earliest time after `last_check` that the next check may run.
///
/// `last_check` is rounded up to the next TTL boundary; a time sitting
/// exactly on a boundary moves to the following one. TTLs at or below the
/// minimum interval yield `last_check + MIN_CHECK_INTERVAL`. A TTL too
/// large to represent saturates at the latest representable instant.
pub fn next_check<Tz: TimeZone>(last_check: DateTime<Utc>, ttl: Duration, tz: &Tz) -> DateTime<Utc> {
    if ttl <= MIN_CHECK_INTERVAL {
        return forced_next_check(last_check);
    }
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let anchor = reference_midnight(tz);
    let elapsed_ms = (last_check - anchor).num_milliseconds();
    let periods = elapsed_ms.div_euclid(ttl_ms) + 1;
    TimeDelta::try_milliseconds(periods.saturating_mul(ttl_ms))
        .and_then(|offset| anchor.checked_add_signed(offset))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Next check after a forced check at `now`.
pub fn forced_next_check(now: DateTime<Utc>) -> DateTime<Utc> {
    let interval = TimeDelta::from_std(MIN_CHECK_INTERVAL).unwrap_or(TimeDelta::minutes(1));
    now.checked_add_signed(interval).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
