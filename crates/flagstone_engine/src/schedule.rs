//! Schedule windows.

use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use flagstone_model::{Schedule, TimeWindow};

/// Returns true when `at` falls inside every bound the schedule sets.
pub fn is_active(schedule: &Schedule, at: DateTime<Utc>) -> bool {
    if schedule.start_time.is_some_and(|start| at < start) {
        return false;
    }
    if schedule.end_time.is_some_and(|end| at > end) {
        return false;
    }
    if !schedule.days_of_week.is_empty() && !schedule.days_of_week.contains(&at.weekday()) {
        return false;
    }
    schedule
        .time_window
        .map_or(true, |window| window_contains(&window, time_of_day(at)))
}

/// Returns true when a time of day is inside the window, wrapping past midnight
/// when the window starts after it ends.
pub fn window_contains(window: &TimeWindow, time: NaiveTime) -> bool {
    if window.start <= window.end {
        window.start <= time && time <= window.end
    } else {
        time >= window.start || time <= window.end
    }
}

fn time_of_day(at: DateTime<Utc>) -> NaiveTime {
    NaiveTime::from_hms_opt(at.hour(), at.minute(), at.second()).unwrap_or_else(|| at.time())
}
