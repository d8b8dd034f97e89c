use chrono::NaiveDate;

use crate::models::{ChangeReport, Lesson};

/// Renders a report into notification text, one line per change. Returns
/// `None` when there is nothing to tell so empty reports never produce a
/// message.
pub fn render_report(date: NaiveDate, report: &ChangeReport) -> Option<String> {
    if !report.has_changes() {
        return None;
    }

    let mut text = format!("Timetable changes for {}:\n", date.format("%A %d.%m.%Y"));
    for lesson in &report.cancelled {
        text.push_str(&format!("  cancelled: {}\n", describe(lesson)));
    }
    for pair in &report.moved {
        text.push_str(&format!(
            "  moved: {} now takes place in period {} at {}\n",
            describe(&pair.from),
            pair.to.display_name,
            pair.to.start_time.format("%H:%M"),
        ));
    }
    for lesson in &report.uncancelled {
        text.push_str(&format!("  takes place again: {}\n", describe(lesson)));
    }
    for pair in &report.unmoved {
        text.push_str(&format!(
            "  moved back: {} returns to period {} at {}\n",
            describe(&pair.from),
            pair.to.display_name,
            pair.to.start_time.format("%H:%M"),
        ));
    }
    Some(text)
}

fn describe(lesson: &Lesson) -> String {
    format!(
        "period {} ({}-{}) {} with {} in {}",
        lesson.display_name,
        lesson.start_time.format("%H:%M"),
        lesson.end_time.format("%H:%M"),
        join(&lesson.subjects),
        join(&lesson.teachers),
        join(&lesson.rooms),
    )
}

fn join(names: &std::collections::BTreeSet<String>) -> String {
    if names.is_empty() {
        "-".to_string()
    } else {
        names.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}
