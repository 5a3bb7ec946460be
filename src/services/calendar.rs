//! Month grid for the training calendar. Weeks start on Sunday.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Joined,
    Missed,
    Upcoming,
}

pub fn event_status(attended: bool, end_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> EventStatus {
    if attended {
        EventStatus::Joined
    } else if end_time.is_some_and(|end| now > end) {
        EventStatus::Missed
    } else {
        EventStatus::Upcoming
    }
}

/// The requested month, or the current one when either part is missing or invalid.
pub fn resolve_month(year: Option<i32>, month: Option<u32>, today: NaiveDate) -> (i32, u32) {
    match (year, month) {
        (Some(y), Some(m)) if NaiveDate::from_ymd_opt(y, m, 1).is_some() => (y, m),
        _ => (today.year(), today.month()),
    }
}

pub fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month <= 1 { (year - 1, 12) } else { (year, month - 1) }
}

pub fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month >= 12 { (year + 1, 1) } else { (year, month + 1) }
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (ny, nm) = next_month(year, month);
    match (NaiveDate::from_ymd_opt(year, month, 1), NaiveDate::from_ymd_opt(ny, nm, 1)) {
        (Some(first), Some(next)) => (next - first).num_days() as u32,
        _ => 0,
    }
}

/// Rows of seven day numbers; 0 pads days outside the month.
pub fn month_grid(year: i32, month: u32) -> Vec<[u32; 7]> {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return Vec::new();
    };
    let offset = first.weekday().num_days_from_sunday() as usize;
    let days = days_in_month(year, month);

    let mut weeks = Vec::new();
    let mut week = [0u32; 7];
    let mut slot = offset;
    for day in 1..=days {
        week[slot] = day;
        slot += 1;
        if slot == 7 {
            weeks.push(week);
            week = [0; 7];
            slot = 0;
        }
    }
    if slot > 0 {
        weeks.push(week);
    }
    weeks
}

/// `[start, end)` of the month in UTC.
pub fn month_bounds(year: i32, month: u32) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let (ny, nm) = next_month(year, month);
    let start = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?.and_utc();
    let end = NaiveDate::from_ymd_opt(ny, nm, 1)?.and_hms_opt(0, 0, 0)?.and_utc();
    Some((start, end))
}

pub fn month_name(month: u32) -> &'static str {
    const NAMES: [&str; 12] = [
        "January", "February", "March", "April", "May", "June", "July", "August", "September",
        "October", "November", "December",
    ];
    NAMES.get(month.wrapping_sub(1) as usize).copied().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn grid_starts_on_sunday() {
        // June 1st 2025 is a Sunday.
        let june = month_grid(2025, 6);
        assert_eq!(june[0], [1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(june.len(), 5);
        assert_eq!(june[4], [29, 30, 0, 0, 0, 0, 0]);

        // March 1st 2025 is a Saturday.
        let march = month_grid(2025, 3);
        assert_eq!(march[0], [0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(march.len(), 6);
    }

    #[test]
    fn february_lengths() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2025, 2), 28);
        assert_eq!(days_in_month(2025, 12), 31);
    }

    #[test]
    fn month_navigation_wraps_years() {
        assert_eq!(previous_month(2025, 1), (2024, 12));
        assert_eq!(next_month(2025, 12), (2026, 1));
        assert_eq!(next_month(2025, 6), (2025, 7));
    }

    #[test]
    fn invalid_month_falls_back_to_today() {
        let today = NaiveDate::from_ymd_opt(2025, 8, 20).unwrap();
        assert_eq!(resolve_month(Some(2025), Some(13), today), (2025, 8));
        assert_eq!(resolve_month(None, Some(3), today), (2025, 8));
        assert_eq!(resolve_month(Some(2024), Some(3), today), (2024, 3));
    }

    #[test]
    fn statuses() {
        let now = Utc.with_ymd_and_hms(2025, 8, 20, 12, 0, 0).unwrap();
        let past = Some(now - Duration::hours(1));
        assert_eq!(event_status(true, past, now), EventStatus::Joined);
        assert_eq!(event_status(false, past, now), EventStatus::Missed);
        assert_eq!(event_status(false, Some(now + Duration::hours(1)), now), EventStatus::Upcoming);
        assert_eq!(event_status(false, None, now), EventStatus::Upcoming);
    }

    #[test]
    fn bounds_and_names() {
        let (start, end) = month_bounds(2025, 12).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(month_name(2), "February");
        assert_eq!(month_name(0), "");
    }
}
