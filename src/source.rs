use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::models::Lesson;

/// Identifier of a school class ("Klasse") in the timetable service.
pub type ClassId = i32;

/// The timetable service could not produce a snapshot for the requested
/// date. The checker propagates this untouched; retry policy lives with the
/// poll driver.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timetable request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("timetable service error {code}: {message}")]
    Service { code: i64, message: String },
    #[error("malformed timetable payload: {0}")]
    Payload(String),
}

/// Where timetable snapshots come from. Lessons are returned for the single
/// requested date in no particular order; the checker sorts them itself.
#[async_trait]
pub trait LessonSource {
    async fn fetch_lessons(
        &self,
        date: NaiveDate,
        class_id: ClassId,
    ) -> Result<Vec<Lesson>, FetchError>;
}
