//! Environment snapshot for policy evaluation.

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use vorion_extensions::EnvironmentSnapshot;

const BUSINESS_OPEN_HOUR: u32 = 9;
const BUSINESS_CLOSE_HOUR: u32 = 17;

/// Build the point-in-time facts policy extensions evaluate against:
/// `HH:MM` time of day, the weekday name, and a business-hours flag
/// (09:00-17:00, Monday through Friday).
pub fn environment_snapshot(now: DateTime<Utc>) -> EnvironmentSnapshot {
    let weekday = now.weekday();
    let weekday_name = match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    };
    let is_weekday = !matches!(weekday, Weekday::Sat | Weekday::Sun);
    let hour = now.hour();
    EnvironmentSnapshot {
        time_of_day: format!("{:02}:{:02}", hour, now.minute()),
        weekday: weekday_name.to_string(),
        business_hours: is_weekday && (BUSINESS_OPEN_HOUR..BUSINESS_CLOSE_HOUR).contains(&hour),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_weekday_morning_is_business_hours() {
        // Tuesday 2026-03-03 10:30 UTC.
        let now = Utc.with_ymd_and_hms(2026, 3, 3, 10, 30, 0).unwrap();
        let snapshot = environment_snapshot(now);
        assert_eq!(snapshot.time_of_day, "10:30");
        assert_eq!(snapshot.weekday, "Tuesday");
        assert!(snapshot.business_hours);
    }

    #[test]
    fn test_weekend_is_not_business_hours() {
        // Saturday 2026-03-07 11:00 UTC.
        let now = Utc.with_ymd_and_hms(2026, 3, 7, 11, 0, 0).unwrap();
        let snapshot = environment_snapshot(now);
        assert_eq!(snapshot.weekday, "Saturday");
        assert!(!snapshot.business_hours);
    }

    #[test]
    fn test_evening_is_not_business_hours() {
        // Wednesday 2026-03-04 17:00 UTC: close hour is exclusive.
        let now = Utc.with_ymd_and_hms(2026, 3, 4, 17, 0, 0).unwrap();
        let snapshot = environment_snapshot(now);
        assert_eq!(snapshot.time_of_day, "17:00");
        assert!(!snapshot.business_hours);
    }
}
