use std::env;
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveTime};

use crate::checker::TimetableChecker;
use crate::models::ChangeReport;
use crate::source::LessonSource;

/// How far past today the rolling window reaches.
const DAYS_AHEAD: i64 = 6;

const DEFAULT_INTERVAL_SECS: u64 = 3600;

pub struct PollConfig {
    pub interval: Duration,
}

impl PollConfig {
    pub fn from_env() -> Self {
        let secs = env::var("CHECK_INTERVAL_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        Self {
            interval: Duration::from_secs(secs),
        }
    }
}

/// Checks today and the upcoming days once, forwarding every report to
/// `sink`. Once the last lesson of today has ended (or today is empty) the
/// window shifts: today is still reported this cycle, but the look-ahead
/// reaches one day further.
///
/// A failed fetch is logged and skipped; the date is simply retried on the
/// next cycle.
pub async fn run_check_cycle<S, F>(
    checker: &mut TimetableChecker<S>,
    today: NaiveDate,
    now: NaiveTime,
    sink: &mut F,
) where
    S: LessonSource,
    F: FnMut(NaiveDate, ChangeReport),
{
    let mut changes = false;
    let mut days_ahead = DAYS_AHEAD;

    match checker.check(today).await {
        Ok(report) => {
            let day_over = report
                .all_lessons
                .lessons()
                .last()
                .map_or(true, |lesson| lesson.end_time < now);
            if day_over {
                days_ahead += 1;
            }
            changes |= report.has_changes();
            sink(today, report);
        }
        Err(err) => {
            tracing::warn!(date = %today, error = %err, "timetable check failed");
        }
    }

    for offset in 1..=days_ahead {
        let date = today + chrono::Duration::days(offset);
        match checker.check(date).await {
            Ok(report) => {
                changes |= report.has_changes();
                sink(date, report);
            }
            Err(err) => {
                tracing::warn!(date = %date, error = %err, "timetable check failed");
            }
        }
    }

    tracing::info!(%today, changes, "checked timetable");
}

/// Drives `run_check_cycle` forever on a fixed interval. The first cycle
/// runs immediately.
pub async fn run_poll_loop<S, F>(
    checker: &mut TimetableChecker<S>,
    config: &PollConfig,
    mut sink: F,
) where
    S: LessonSource,
    F: FnMut(NaiveDate, ChangeReport),
{
    let mut ticker = tokio::time::interval(config.interval);
    loop {
        ticker.tick().await;
        let now = Local::now();
        run_check_cycle(checker, now.date_naive(), now.time(), &mut sink).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::models::{Lesson, LessonCode};
    use crate::source::{ClassId, FetchError};

    #[derive(Clone, Default)]
    struct RecordingSource {
        days: Arc<Mutex<HashMap<NaiveDate, Vec<Lesson>>>>,
        fetched: Arc<Mutex<Vec<NaiveDate>>>,
    }

    impl RecordingSource {
        fn put(&self, date: NaiveDate, lessons: Vec<Lesson>) {
            self.days.lock().unwrap().insert(date, lessons);
        }

        fn fetched(&self) -> Vec<NaiveDate> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LessonSource for RecordingSource {
        async fn fetch_lessons(
            &self,
            date: NaiveDate,
            _class_id: ClassId,
        ) -> Result<Vec<Lesson>, FetchError> {
            self.fetched.lock().unwrap().push(date);
            Ok(self
                .days
                .lock()
                .unwrap()
                .get(&date)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn lesson(date: NaiveDate, start: &str, end: &str, code: LessonCode) -> Lesson {
        Lesson {
            date,
            start_time: start.parse().unwrap(),
            end_time: end.parse().unwrap(),
            code,
            subjects: BTreeSet::from(["Maths".to_string()]),
            teachers: BTreeSet::from(["Smith".to_string()]),
            rooms: BTreeSet::new(),
            display_name: "1".to_string(),
        }
    }

    fn window(today: NaiveDate, offsets: std::ops::RangeInclusive<i64>) -> Vec<NaiveDate> {
        offsets.map(|o| today + chrono::Duration::days(o)).collect()
    }

    #[tokio::test]
    async fn cycle_covers_today_plus_six_days_while_lessons_remain() {
        let today = NaiveDate::from_ymd_opt(2022, 1, 17).unwrap();
        let source = RecordingSource::default();
        source.put(
            today,
            vec![lesson(today, "08:00:00", "08:45:00", LessonCode::Regular)],
        );
        let mut checker = TimetableChecker::new(source.clone(), 42);

        let mut reported = Vec::new();
        run_check_cycle(&mut checker, today, "07:30:00".parse().unwrap(), &mut |date, _| {
            reported.push(date);
        })
        .await;

        assert_eq!(source.fetched(), window(today, 0..=6));
        assert_eq!(reported, window(today, 0..=6));
    }

    #[tokio::test]
    async fn window_shifts_once_todays_lessons_are_over() {
        let today = NaiveDate::from_ymd_opt(2022, 1, 17).unwrap();
        let source = RecordingSource::default();
        source.put(
            today,
            vec![lesson(today, "08:00:00", "08:45:00", LessonCode::Regular)],
        );
        let mut checker = TimetableChecker::new(source.clone(), 42);

        let mut reported = Vec::new();
        run_check_cycle(&mut checker, today, "20:00:00".parse().unwrap(), &mut |date, _| {
            reported.push(date);
        })
        .await;

        // Today is still probed and reported, but the look-ahead now spans
        // one extra day.
        assert_eq!(source.fetched(), window(today, 0..=7));
        assert_eq!(reported, window(today, 0..=7));
    }

    #[tokio::test]
    async fn empty_today_counts_as_finished() {
        let today = NaiveDate::from_ymd_opt(2022, 1, 17).unwrap();
        let source = RecordingSource::default();
        let mut checker = TimetableChecker::new(source.clone(), 42);

        let mut count = 0;
        run_check_cycle(&mut checker, today, "07:30:00".parse().unwrap(), &mut |_, _| {
            count += 1;
        })
        .await;

        assert_eq!(source.fetched(), window(today, 0..=7));
        assert_eq!(count, 8);
    }

    #[tokio::test]
    async fn todays_changes_are_forwarded_not_swallowed() {
        let today = NaiveDate::from_ymd_opt(2022, 1, 17).unwrap();
        let source = RecordingSource::default();
        source.put(
            today,
            vec![lesson(today, "08:00:00", "08:45:00", LessonCode::Cancelled)],
        );
        let mut checker = TimetableChecker::new(source.clone(), 42);

        let mut cancelled_today = 0;
        run_check_cycle(&mut checker, today, "20:00:00".parse().unwrap(), &mut |date, report| {
            if date == today {
                cancelled_today += report.cancelled.len();
            }
        })
        .await;

        assert_eq!(cancelled_today, 1);
    }
}
