//! Relative time labels, computed at render time against a supplied `now`.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelativeDay {
    Today,
    Yesterday,
    Earlier,
}

fn relative_day(date: NaiveDate, today: NaiveDate) -> RelativeDay {
    if date == today {
        RelativeDay::Today
    } else if today.pred_opt() == Some(date) {
        RelativeDay::Yesterday
    } else {
        RelativeDay::Earlier
    }
}

fn localize<Tz: TimeZone>(at: DateTime<Utc>, now: &DateTime<Tz>) -> (DateTime<Tz>, RelativeDay) {
    let local = at.with_timezone(&now.timezone());
    let day = relative_day(local.date_naive(), now.date_naive());
    (local, day)
}

/// Header label for a user's presence: "Online", "Today at 14:05", ...
pub fn last_seen_label<Tz>(online: bool, last_active_at: Option<DateTime<Utc>>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    if online {
        return "Online".to_string();
    }
    let Some(at) = last_active_at else {
        return "Offline".to_string();
    };
    let (local, day) = localize(at, now);
    match day {
        RelativeDay::Today => format!("Today at {}", local.format("%H:%M")),
        RelativeDay::Yesterday => format!("Yesterday at {}", local.format("%H:%M")),
        RelativeDay::Earlier => local.format("%d/%m/%y, %H:%M").to_string(),
    }
}

/// Timestamp under a message bubble, e.g. "Today 08:01 PM".
pub fn message_time_label<Tz>(at: DateTime<Utc>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let (local, day) = localize(at, now);
    let time = local.format("%I:%M %p");
    match day {
        RelativeDay::Today => format!("Today {time}"),
        RelativeDay::Yesterday => format!("Yesterday {time}"),
        RelativeDay::Earlier => format!("{}, {time}", local.format("%d %b %Y")),
    }
}

/// Timestamp on a conversation row: "14:05", "Yesterday" or "Mar 4, 2026".
pub fn conversation_time_label<Tz>(at: DateTime<Utc>, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let (local, day) = localize(at, now);
    match day {
        RelativeDay::Today => local.format("%H:%M").to_string(),
        RelativeDay::Yesterday => "Yesterday".to_string(),
        RelativeDay::Earlier => local.format("%b %-d, %Y").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_last_seen_label() {
        let now = utc(2026, 3, 10, 18, 0);
        assert_eq!(last_seen_label(true, None, &now), "Online");
        assert_eq!(last_seen_label(false, None, &now), "Offline");
        assert_eq!(
            last_seen_label(false, Some(utc(2026, 3, 10, 9, 5)), &now),
            "Today at 09:05"
        );
        assert_eq!(
            last_seen_label(false, Some(utc(2026, 3, 9, 23, 59)), &now),
            "Yesterday at 23:59"
        );
        assert_eq!(
            last_seen_label(false, Some(utc(2026, 2, 1, 7, 30)), &now),
            "01/02/26, 07:30"
        );
    }

    #[test]
    fn test_message_time_label() {
        let now = utc(2026, 3, 10, 22, 0);
        assert_eq!(message_time_label(utc(2026, 3, 10, 20, 1), &now), "Today 08:01 PM");
        assert_eq!(
            message_time_label(utc(2026, 3, 9, 8, 15), &now),
            "Yesterday 08:15 AM"
        );
        assert_eq!(
            message_time_label(utc(2025, 12, 24, 13, 0), &now),
            "24 Dec 2025, 01:00 PM"
        );
    }

    #[test]
    fn test_conversation_time_label() {
        let now = utc(2026, 3, 10, 12, 0);
        assert_eq!(conversation_time_label(utc(2026, 3, 10, 8, 42), &now), "08:42");
        assert_eq!(conversation_time_label(utc(2026, 3, 9, 8, 42), &now), "Yesterday");
        assert_eq!(conversation_time_label(utc(2026, 3, 4, 8, 42), &now), "Mar 4, 2026");
    }

    #[test]
    fn test_labels_use_viewer_timezone() {
        // 23:30 UTC on the 9th is already the 10th at UTC+2.
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let now = utc(2026, 3, 10, 10, 0).with_timezone(&tz);
        assert_eq!(
            conversation_time_label(utc(2026, 3, 9, 23, 30), &now),
            "01:30"
        );
    }
}
