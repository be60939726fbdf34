//! Session-window arithmetic: daily `[start, end]` ranges in a named
//! time zone, including ranges that wrap around midnight.

use chrono::{DateTime, Duration as ChronoDuration, LocalResult, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::settings::SessionWindow;

pub fn time_in_range(start: NaiveTime, end: NaiveTime, target: NaiveTime) -> bool {
    if start <= end {
        start <= target && target <= end
    } else {
        start <= target || target <= end
    }
}

fn at_time(now: &DateTime<Tz>, time: NaiveTime) -> DateTime<Tz> {
    let naive = now.date_naive().and_time(time);
    match now.timezone().from_local_datetime(&naive) {
        LocalResult::Single(datetime) => datetime,
        // During a DST transition pick the earlier interpretation.
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => now.timezone().from_utc_datetime(&naive),
    }
}

/// How long to wait until the window opens, and when it closes again.
/// A zero wait means `now` is already inside the window.
pub fn delay_until_window(
    now: DateTime<Tz>,
    start: NaiveTime,
    end: NaiveTime,
) -> (Duration, DateTime<Tz>) {
    let mut start_at = at_time(&now, start);
    let mut end_at = at_time(&now, end);
    if start < end {
        if now > end_at {
            start_at += ChronoDuration::days(1);
            end_at += ChronoDuration::days(1);
        }
    } else {
        end_at += ChronoDuration::days(1);
    }

    let wait = if now < start_at {
        (start_at - now).to_std().unwrap_or_default()
    } else {
        Duration::ZERO
    };
    (wait, end_at)
}

/// Wait until the session window opens, returning the logout deadline,
/// or `None` when cancelled first.
pub async fn wait_for_window(
    window: &SessionWindow,
    cancellation: &CancellationToken,
) -> Option<DateTime<Utc>> {
    let now = Utc::now().with_timezone(&window.time_zone);
    let (wait, logout_time) = delay_until_window(now, window.start, window.end);
    if !wait.is_zero() {
        info!(?wait, "waiting for session window");
        tokio::select! {
            _ = cancellation.cancelled() => return None,
            _ = tokio::time::sleep(wait) => {}
        }
    }
    Some(logout_time.with_timezone(&Utc))
}
