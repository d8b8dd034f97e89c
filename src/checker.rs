use std::collections::{HashMap, HashSet};

use chrono::{Datelike, NaiveDate};

use crate::models::{ChangeReport, Lesson, LessonCode, MovedPair, Timetable};
use crate::source::{ClassId, FetchError, LessonSource};

/// Per-weekday cache partition. The school schedule repeats weekly, so a
/// lesson's classification is remembered against its weekday and compared
/// with whatever the next poll for that weekday brings.
#[derive(Debug, Default)]
struct WeekdaySlot {
    /// Lessons currently believed cancelled and not yet seen reverting.
    cancelled: HashSet<Lesson>,
    /// Origin halves of detected moves, plus anything else already consumed
    /// by a pairing; never reclassified.
    ignored: HashSet<Lesson>,
    /// Detected moves, keyed by the lesson occupying the slot now ("to"),
    /// mapped to the lesson it replaced ("from").
    moved: HashMap<Lesson, Lesson>,
    /// Earliest date this slot was ever evaluated for. Only ever lowered,
    /// never used to evict; cache entries live as long as the checker.
    earliest_seen: Option<NaiveDate>,
}

/// Stateful change detector for one class. Holds seven weekday slots that
/// survive across polling cycles so every change is reported exactly once.
///
/// `check` must be called with non-decreasing dates from a single task at a
/// time; the weekday-keyed caches make no attempt to cope with out-of-order
/// or cross-week calls. Distinct checker instances are fully independent.
pub struct TimetableChecker<S> {
    source: S,
    class_id: ClassId,
    slots: [WeekdaySlot; 7],
}

impl<S: LessonSource> TimetableChecker<S> {
    pub fn new(source: S, class_id: ClassId) -> Self {
        Self {
            source,
            class_id,
            slots: std::array::from_fn(|_| WeekdaySlot::default()),
        }
    }

    /// Fetches the snapshot for `date` and classifies every lesson against
    /// the weekday's cache. A fetch failure propagates without touching any
    /// cache state.
    pub async fn check(&mut self, date: NaiveDate) -> Result<ChangeReport, FetchError> {
        let lessons = self.source.fetch_lessons(date, self.class_id).await?;
        let mut timetable = Timetable::new(lessons);
        timetable.sort_by_start_time();

        let slot = &mut self.slots[date.weekday().num_days_from_monday() as usize];

        let mut report = ChangeReport {
            all_lessons: timetable.clone(),
            ..ChangeReport::default()
        };

        for lesson in timetable.iter() {
            if lesson.code == LessonCode::Cancelled
                && !slot.cancelled.contains(lesson)
                && !slot.ignored.contains(lesson)
            {
                let siblings = timetable.search_by_start_time_excluding(lesson.start_time, lesson);
                match siblings.as_slice() {
                    // Nothing else in this slot: a plain cancellation.
                    [] => {
                        slot.cancelled.insert(lesson.clone());
                        report.cancelled.push(lesson.clone());
                    }
                    [other] if other.code == LessonCode::Irregular => {
                        // An irregular lesson took this slot over; look for
                        // the cancelled lesson it was moved out of, matched
                        // by shared teacher.
                        for candidate in timetable.search_by_teachers(*other) {
                            if candidate.code == LessonCode::Cancelled
                                && !slot.ignored.contains(candidate)
                            {
                                register_move(slot, &mut report, lesson, candidate);
                                break;
                            }
                        }
                    }
                    [_] => {
                        slot.cancelled.insert(lesson.clone());
                        report.cancelled.push(lesson.clone());
                    }
                    // More than two lessons in one slot is ambiguous; leave
                    // the lesson unclassified rather than guess.
                    _ => {}
                }
            } else if lesson.code == LessonCode::Irregular
                && timetable.search_by_start_time(lesson.start_time).len() == 1
                && !slot.ignored.contains(lesson)
            {
                // An irregular lesson alone in its slot is the destination
                // half of a move; its origin is the first cancelled lesson
                // whose subjects it covers.
                for candidate in timetable.iter() {
                    if candidate.code == LessonCode::Cancelled
                        && !slot.ignored.contains(candidate)
                        && lesson.subjects.is_superset(&candidate.subjects)
                    {
                        register_move(slot, &mut report, lesson, candidate);
                        break;
                    }
                }
            } else if lesson.code == LessonCode::Regular && slot.moved.contains_key(lesson) {
                // A moved lesson takes place regularly again.
                if let Some(origin) = slot.moved.remove(lesson) {
                    slot.ignored.remove(&origin);
                    report.unmoved.push(MovedPair {
                        to: lesson.clone(),
                        from: origin,
                    });
                }
                break;
            } else if lesson.code == LessonCode::Regular && slot.cancelled.contains(lesson) {
                // A cancelled lesson takes place again.
                slot.cancelled.remove(lesson);
                report.uncancelled.push(lesson.clone());
                break;
            }
        }

        slot.earliest_seen = Some(slot.earliest_seen.map_or(date, |seen| seen.min(date)));

        tracing::debug!(
            %date,
            lessons = report.all_lessons.len(),
            cancelled = report.cancelled.len(),
            moved = report.moved.len(),
            uncancelled = report.uncancelled.len(),
            unmoved = report.unmoved.len(),
            "classified timetable snapshot"
        );

        Ok(report)
    }
}

/// Records a detected move of `from` into the slot now held by `to`. The
/// origin is consumed: it leaves the cancelled cache and, if this same call
/// already classified it as cancelled, that report entry is withdrawn so a
/// lesson shows up in at most one list per report.
fn register_move(slot: &mut WeekdaySlot, report: &mut ChangeReport, to: &Lesson, from: &Lesson) {
    slot.ignored.insert(from.clone());
    slot.cancelled.remove(from);
    report.cancelled.retain(|lesson| lesson != from);
    slot.moved.insert(to.clone(), from.clone());
    report.moved.push(MovedPair {
        to: to.clone(),
        from: from.clone(),
    });
}
