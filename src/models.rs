use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;

/// Status code of a period as reported by the timetable service.
/// A missing code on the wire means `Regular`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LessonCode {
    Regular,
    Cancelled,
    Irregular,
}

/// One scheduled period of one class on one date.
#[derive(Debug, Clone, Serialize)]
pub struct Lesson {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub code: LessonCode,
    pub subjects: BTreeSet<String>,
    pub teachers: BTreeSet<String>,
    pub rooms: BTreeSet<String>,
    /// Period label from the school's time grid, e.g. "3".
    pub display_name: String,
}

/// Lesson identity is `(date, start_time, teachers, subjects)`. The checker
/// caches lessons across polling cycles and must recognize a freshly fetched
/// lesson as the one it cached earlier even though its `code`, rooms or end
/// time changed in the meantime.
impl PartialEq for Lesson {
    fn eq(&self, other: &Self) -> bool {
        self.date == other.date
            && self.start_time == other.start_time
            && self.teachers == other.teachers
            && self.subjects == other.subjects
    }
}

impl Eq for Lesson {}

impl Hash for Lesson {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.date.hash(state);
        self.start_time.hash(state);
        self.teachers.hash(state);
        self.subjects.hash(state);
    }
}

impl Lesson {
    pub fn shares_teacher(&self, other: &Lesson) -> bool {
        !self.teachers.is_disjoint(&other.teachers)
    }
}

/// The lessons of one class on one date.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Timetable {
    lessons: Vec<Lesson>,
}

impl Timetable {
    pub fn new(lessons: Vec<Lesson>) -> Self {
        Self { lessons }
    }

    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Lesson> {
        self.lessons.iter()
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }

    /// Stable ascending sort; lessons sharing a start time keep their fetch
    /// order, which the checker's first-match pairing relies on.
    pub fn sort_by_start_time(&mut self) {
        self.lessons.sort_by_key(|lesson| lesson.start_time);
    }

    /// All lessons starting at `start_time`.
    pub fn search_by_start_time(&self, start_time: NaiveTime) -> Vec<&Lesson> {
        self.lessons
            .iter()
            .filter(|lesson| lesson.start_time == start_time)
            .collect()
    }

    /// All lessons starting at `start_time`, minus one occurrence of
    /// `exclude` (the lesson currently being classified).
    pub fn search_by_start_time_excluding(
        &self,
        start_time: NaiveTime,
        exclude: &Lesson,
    ) -> Vec<&Lesson> {
        let mut found = self.search_by_start_time(start_time);
        if let Some(position) = found.iter().position(|lesson| *lesson == exclude) {
            found.remove(position);
        }
        found
    }

    /// All lessons sharing at least one teacher with `reference`, in
    /// timetable order.
    pub fn search_by_teachers(&self, reference: &Lesson) -> Vec<&Lesson> {
        self.lessons
            .iter()
            .filter(|lesson| lesson.shares_teacher(reference))
            .collect()
    }
}

/// A detected move: `to` now occupies the slot that `from` was moved out of.
#[derive(Debug, Clone, Serialize)]
pub struct MovedPair {
    pub to: Lesson,
    pub from: Lesson,
}

/// Outcome of one `TimetableChecker::check` call. `all_lessons` is always the
/// full snapshot for the date; the four change lists only carry what is new
/// since the previous call for the same weekday.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeReport {
    pub all_lessons: Timetable,
    pub cancelled: Vec<Lesson>,
    pub moved: Vec<MovedPair>,
    pub uncancelled: Vec<Lesson>,
    pub unmoved: Vec<MovedPair>,
}

impl ChangeReport {
    pub fn has_changes(&self) -> bool {
        !self.cancelled.is_empty()
            || !self.moved.is_empty()
            || !self.uncancelled.is_empty()
            || !self.unmoved.is_empty()
    }
}
