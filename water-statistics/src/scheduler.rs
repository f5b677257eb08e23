//! Wall-clock triggers in the meter's timezone, feeding the cycle queue.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use time::Date;
use tokio::task::JoinHandle;

use crate::{orchestrator::OrchestratorHandle, pipeline::PipelineError};

/// Julian day number of 0001-01-01, which chrono counts as CE day 1.
const JULIAN_DAY_OF_CE_EPOCH: i32 = 1_721_425;

fn to_date(day: NaiveDate) -> Result<Date, PipelineError> {
    Date::from_julian_day(day.num_days_from_ce() + JULIAN_DAY_OF_CE_EPOCH)
        .map_err(|e| PipelineError::InvalidRequest(format!("date {day} out of range: {e}")))
}

/// Calendar date of `now` in `tz`.
pub fn local_date(now: DateTime<Utc>, tz: Tz) -> Result<Date, PipelineError> {
    to_date(now.with_timezone(&tz).date_naive())
}

/// First trigger strictly after `now`.
///
/// Hours are wall-clock hours in `tz`. An hour skipped by a DST jump does not
/// fire that day; a repeated hour fires on its first occurrence.
pub fn next_trigger(now: DateTime<Utc>, tz: Tz, hours: &[u8]) -> Option<DateTime<Utc>> {
    let mut hours: Vec<u32> = hours.iter().copied().filter(|h| *h < 24).map(u32::from).collect();
    hours.sort_unstable();
    hours.dedup();

    let today = now.with_timezone(&tz).date_naive();
    let tomorrow = today.succ_opt()?;
    let day_after = tomorrow.succ_opt()?;

    [today, tomorrow, day_after]
        .into_iter()
        .flat_map(|day| {
            hours.iter().filter_map(move |h| {
                tz.with_ymd_and_hms(day.year(), day.month(), day.day(), *h, 0, 0)
                    .earliest()
            })
        })
        .map(|local| local.with_timezone(&Utc))
        .find(|candidate| *candidate > now)
}

/// Sleep until each trigger hour and enqueue a routine cycle.
///
/// The task ends when the queue is closed.
pub fn spawn_daily_triggers(handle: OrchestratorHandle, hours: Vec<u8>, tz: Tz) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = next_trigger(now, tz, &hours) else {
                tracing::error!(?hours, "no valid trigger hours configured, routine cycles disabled");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!(
                next = %next.with_timezone(&tz),
                wait_secs = wait.as_secs(),
                "waiting for next routine trigger"
            );
            tokio::time::sleep(wait).await;

            tracing::info!(at = %next.with_timezone(&tz), "routine trigger fired");
            if handle.request_routine().await.is_err() {
                tracing::info!("cycle queue closed, stopping triggers");
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::London;
    use time::macros::date;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn next_trigger_is_later_the_same_day() {
        let now = utc(2024, 1, 15, 11, 59);
        assert_eq!(next_trigger(now, London, &[0, 12]), Some(utc(2024, 1, 15, 12, 0)));
    }

    #[test]
    fn exact_trigger_time_moves_to_the_next_one() {
        let now = utc(2024, 1, 15, 12, 0);
        assert_eq!(next_trigger(now, London, &[12, 0]), Some(utc(2024, 1, 16, 0, 0)));
    }

    #[test]
    fn summer_triggers_follow_british_summer_time() {
        // 12:00 BST is 11:00 UTC.
        let now = utc(2024, 6, 15, 10, 0);
        assert_eq!(next_trigger(now, London, &[0, 12]), Some(utc(2024, 6, 15, 11, 0)));
    }

    #[test]
    fn spring_forward_moves_noon_trigger_an_hour_earlier_in_utc() {
        // Clocks go forward at 01:00 UTC on 2024-03-31.
        let now = utc(2024, 3, 31, 0, 30);
        assert_eq!(next_trigger(now, London, &[0, 12]), Some(utc(2024, 3, 31, 11, 0)));
    }

    #[test]
    fn autumn_fallback_midnight_and_noon_stay_on_local_time() {
        // Clocks go back at 01:00 UTC on 2024-10-27.
        let now = utc(2024, 10, 26, 12, 30);
        let midnight = next_trigger(now, London, &[0, 12]).unwrap();
        assert_eq!(midnight, utc(2024, 10, 26, 23, 0));
        assert_eq!(next_trigger(midnight, London, &[0, 12]), Some(utc(2024, 10, 27, 12, 0)));
    }

    #[test]
    fn hour_skipped_by_dst_waits_for_the_next_day() {
        let now = utc(2024, 3, 30, 23, 0);
        assert_eq!(next_trigger(now, London, &[1]), Some(utc(2024, 4, 1, 0, 0)));
    }

    #[test]
    fn no_valid_hours_gives_none() {
        let now = utc(2024, 6, 15, 11, 0);
        assert_eq!(next_trigger(now, London, &[]), None);
        assert_eq!(next_trigger(now, London, &[24, 30]), None);
    }

    #[test]
    fn local_date_uses_the_zone_calendar() {
        assert_eq!(local_date(utc(2024, 6, 15, 23, 30), London).unwrap(), date!(2024 - 06 - 16));
        assert_eq!(local_date(utc(2024, 1, 15, 23, 30), London).unwrap(), date!(2024 - 01 - 15));
        assert_eq!(local_date(utc(2024, 1, 1, 0, 0), chrono_tz::UTC).unwrap(), date!(2024 - 01 - 01));
    }
}
