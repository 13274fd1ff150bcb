//! Recurring jobs driven by cron expressions, evaluated in local time.
//!
//! Expressions use the six-field form with seconds first:
//! `"0 0 11 * * *"` is every day at 11:00.

use std::{str::FromStr, sync::Arc};

use chrono::{DateTime, Local, TimeZone};
use cron::Schedule;
use tokio::task::JoinHandle;

/// Parses a cron expression, naming it in the error.
pub fn parse(expr: &str) -> Result<Schedule, String> {
    Schedule::from_str(expr).map_err(|e| format!("invalid cron expression '{expr}': {e}"))
}

/// The first time `schedule` fires strictly after `now`.
pub fn next_after<Tz: TimeZone>(schedule: &Schedule, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    schedule.after(now).next()
}

/// Runs `job` on the blocking pool every time `schedule` fires.
///
/// A run still going when the next one is due delays it; runs never overlap.
pub fn spawn<F>(name: &'static str, schedule: Schedule, job: F) -> JoinHandle<()>
where
    F: Fn() + Send + Sync + 'static,
{
    let job = Arc::new(job);
    tokio::spawn(async move {
        loop {
            let now = Local::now();
            let Some(next) = next_after(&schedule, &now) else {
                tracing::warn!(job = name, "schedule has no future runs; stopping");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!(job = name, next = %next, "scheduled");
            tokio::time::sleep(wait).await;

            tracing::info!(job = name, "running");
            let job = Arc::clone(&job);
            if let Err(e) = tokio::task::spawn_blocking(move || job()).await {
                tracing::error!(job = name, error = %e, "job panicked");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn later_today_fires_today() {
        let daily = parse("0 0 11 * * *").unwrap();

        let next = next_after(&daily, &utc(2026, 3, 1, 9, 30)).unwrap();

        assert_eq!(next, utc(2026, 3, 1, 11, 0));
    }

    #[test]
    fn past_time_fires_tomorrow() {
        let daily = parse("0 0 11 * * *").unwrap();

        let next = next_after(&daily, &utc(2026, 3, 1, 12, 0)).unwrap();

        assert_eq!(next, utc(2026, 3, 2, 11, 0));
    }

    #[test]
    fn exactly_now_fires_next_occurrence() {
        let daily = parse("0 0 11 * * *").unwrap();

        let next = next_after(&daily, &utc(2026, 12, 31, 11, 0)).unwrap();

        assert_eq!(next, utc(2027, 1, 1, 11, 0));
    }

    #[test]
    fn non_daily_cadence_is_supported() {
        let every_six_hours = parse("0 0 0/6 * * *").unwrap();

        let next = next_after(&every_six_hours, &utc(2026, 3, 1, 7, 15)).unwrap();

        assert_eq!(next, utc(2026, 3, 1, 12, 0));
    }

    #[test]
    fn malformed_expression_is_rejected() {
        let err = parse("every day at eleven").unwrap_err();

        assert!(err.contains("every day at eleven"));
    }
}
