//! Relative timestamp rendering for the status dashboard

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime};

/// Shown before the first health sample exists
pub const NOT_YET_CHECKED: &str = "...";

const ABSOLUTE_FORMAT: &[FormatItem<'static>] =
    format_description!("[month repr:short] [day], [year] [hour]:[minute]:[second]");

/// Render `then` relative to `now`
///
/// Under a week the result is "N seconds/minutes/hours/days ago"; older
/// timestamps fall back to an absolute "Mon DD, YYYY HH:MM:SS".
pub fn time_ago(then: OffsetDateTime, now: OffsetDateTime) -> String {
    let elapsed = now - then;
    // Clock skew can put samples slightly in the future
    let elapsed = if elapsed.is_negative() { Duration::ZERO } else { elapsed };

    if elapsed < Duration::minutes(1) {
        format!("{} seconds ago", elapsed.whole_seconds())
    } else if elapsed < Duration::hours(1) {
        format!("{} minutes ago", elapsed.whole_minutes())
    } else if elapsed < Duration::days(1) {
        format!("{} hours ago", elapsed.whole_hours())
    } else if elapsed < Duration::weeks(1) {
        format!("{} days ago", elapsed.whole_days())
    } else {
        then.format(ABSOLUTE_FORMAT)
            .unwrap_or_else(|_| then.unix_timestamp().to_string())
    }
}

/// Render an optional timestamp, using the placeholder when absent
pub fn time_ago_or_placeholder(then: Option<OffsetDateTime>, now: OffsetDateTime) -> String {
    match then {
        Some(then) => time_ago(then, now),
        None => NOT_YET_CHECKED.to_string(),
    }
}
