//! Daily briefing call at a fixed local time.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{error, info};

use callie_core::{CallieError, Result};

use crate::config::Config;
use crate::notify::Notifier;
use crate::telephony::Caller;

/// Next `hour:minute` strictly after `now`: today if still ahead, else
/// tomorrow.
pub fn next_occurrence(now: NaiveDateTime, hour: u32, minute: u32) -> Result<NaiveDateTime> {
    let at = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| CallieError::config(format!("invalid schedule time {hour}:{minute:02}")))?;
    let today = now.date().and_time(at);
    if today > now {
        Ok(today)
    } else {
        today
            .checked_add_signed(chrono::Duration::days(1))
            .ok_or_else(|| CallieError::config("schedule date out of range"))
    }
}

/// Resolve a wall-clock time in `tz` to an instant. Times skipped by a DST
/// jump move forward an hour.
fn to_instant(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + chrono::Duration::hours(1))).earliest())
        .map(|t| t.with_timezone(&Utc))
}

/// Time to sleep from `now` until the next scheduled call, and its wall-clock time.
pub fn until_next(now: DateTime<Utc>, tz: Tz, hour: u32, minute: u32) -> Result<(Duration, NaiveDateTime)> {
    let local_now = now.with_timezone(&tz).naive_local();
    let next = next_occurrence(local_now, hour, minute)?;
    let instant = to_instant(tz, next).ok_or_else(|| CallieError::config("cannot resolve next call time"))?;
    let wait = (instant - now).to_std().unwrap_or(Duration::ZERO);
    Ok((wait, next))
}

/// Build the briefing and place the announcement call.
pub async fn briefing_call(config: &Config, to: Option<&str>) -> Result<()> {
    let caller = Caller::from_config(config)?;
    let briefing = crate::briefing::generate(config).await?;
    let record = caller.call_with_briefing(&briefing, to).await?;
    info!("briefing call placed: {}", record.sid);
    Ok(())
}

/// Place the briefing call every day at the configured time. Failures are
/// reported through the notifier and the loop keeps going.
pub async fn run(config: &Config, notifier: &Notifier) -> Result<()> {
    let tz = crate::context::timezone(&config.call.timezone)?;
    let (hour, minute) = (config.schedule.hour, config.schedule.minute);
    info!("scheduler started; calling at {hour}:{minute:02} daily ({tz})");

    loop {
        let (wait, next) = until_next(Utc::now(), tz, hour, minute)?;
        info!(
            "next call in {:.1} hours ({})",
            wait.as_secs_f64() / 3600.0,
            next.format("%Y-%m-%d %H:%M")
        );
        tokio::time::sleep(wait).await;

        info!("making daily briefing call");
        if let Err(e) = briefing_call(config, None).await {
            error!("call failed: {e}");
            notifier.call_failed(&e).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    #[test]
    fn later_today() {
        assert_eq!(next_occurrence(at("2026-10-16 06:30"), 8, 0).unwrap(), at("2026-10-16 08:00"));
    }

    #[test]
    fn already_passed_goes_to_tomorrow() {
        assert_eq!(next_occurrence(at("2026-10-16 09:00"), 8, 0).unwrap(), at("2026-10-17 08:00"));
        // exactly now counts as passed
        assert_eq!(next_occurrence(at("2026-10-16 08:00"), 8, 0).unwrap(), at("2026-10-17 08:00"));
    }

    #[test]
    fn month_rollover() {
        assert_eq!(next_occurrence(at("2026-10-31 23:59"), 8, 0).unwrap(), at("2026-11-01 08:00"));
    }

    #[test]
    fn invalid_time_is_config_error() {
        assert!(next_occurrence(at("2026-10-16 06:30"), 25, 0).is_err());
    }

    #[test]
    fn wait_respects_timezone() {
        // 14:00 UTC is 07:00 in Vancouver (PDT)
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 14, 0, 0).unwrap();
        let (wait, next) = until_next(now, chrono_tz::America::Vancouver, 8, 0).unwrap();
        assert_eq!(wait, Duration::from_secs(3600));
        assert_eq!(next, at("2026-10-16 08:00"));
    }

    #[test]
    fn dst_gap_moves_forward() {
        // 2026-03-08 02:30 does not exist in Vancouver
        let instant = to_instant(chrono_tz::America::Vancouver, at("2026-03-08 02:30")).unwrap();
        assert_eq!(instant, Utc.with_ymd_and_hms(2026, 3, 8, 10, 30, 0).unwrap());
    }
}
