use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::fmt;

/// Classification of a calendar date against the festival days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EventDay {
    /// 1, 2 or 3 for a festival day, 0 for any other date
    pub index: u8,
    /// The matched festival date, or the classified date itself for day 0
    pub date: NaiveDate,
}

impl EventDay {
    /// Whether the date fell on one of the configured festival days
    pub fn is_event_day(&self) -> bool {
        self.index != 0
    }

    /// `YYYY-MM-DD` form used for folders and tags
    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for EventDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Day {} ({})", self.index, self.date.format("%Y-%m-%d"))
    }
}

/// The three configured festival dates, fixed at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCalendar {
    days: [Option<NaiveDate>; 3],
}

impl EventCalendar {
    pub fn new(days: [Option<NaiveDate>; 3]) -> Self {
        Self { days }
    }

    pub fn days(&self) -> &[Option<NaiveDate>; 3] {
        &self.days
    }

    /// Classify the current UTC date
    pub fn today(&self) -> EventDay {
        self.classify(Utc::now().date_naive())
    }

    /// Classify `date`; the first matching festival day wins
    pub fn classify(&self, date: NaiveDate) -> EventDay {
        classify(date, &self.days)
    }
}

/// Map `today` onto its festival day index, checking days in order 1, 2, 3
pub fn classify(today: NaiveDate, days: &[Option<NaiveDate>; 3]) -> EventDay {
    days.iter()
        .zip(1u8..)
        .find_map(|(day, index)| {
            (*day)
                .filter(|d| *d == today)
                .map(|date| EventDay { index, date })
        })
        .unwrap_or(EventDay {
            index: 0,
            date: today,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn festival() -> EventCalendar {
        EventCalendar::new([
            Some(date(2025, 2, 20)),
            Some(date(2025, 2, 21)),
            Some(date(2025, 2, 22)),
        ])
    }

    #[test]
    fn test_each_configured_day_maps_to_its_position() {
        let calendar = festival();
        for (position, day) in calendar.days().iter().enumerate() {
            let day = day.unwrap();
            let result = calendar.classify(day);
            assert_eq!(result.index as usize, position + 1);
            assert_eq!(result.date, day);
            assert!(result.is_event_day());
        }
    }

    #[test]
    fn test_other_dates_are_day_zero() {
        let calendar = festival();
        for d in [date(2025, 2, 19), date(2025, 2, 23), date(2024, 2, 20)] {
            assert_eq!(calendar.classify(d), EventDay { index: 0, date: d });
        }
    }

    #[test]
    fn test_unset_days_never_match() {
        let calendar = EventCalendar::new([None, Some(date(2025, 2, 21)), None]);
        assert_eq!(calendar.classify(date(2025, 2, 21)).index, 2);
        assert_eq!(calendar.classify(date(2025, 2, 20)).index, 0);

        let empty = EventCalendar::default();
        assert_eq!(empty.classify(date(2025, 2, 20)).index, 0);
    }

    #[test]
    fn test_first_match_wins_on_duplicate_dates() {
        let calendar = EventCalendar::new([
            None,
            Some(date(2025, 2, 21)),
            Some(date(2025, 2, 21)),
        ]);
        assert_eq!(calendar.classify(date(2025, 2, 21)).index, 2);
    }

    #[test]
    fn test_today_uses_current_utc_date() {
        let today = Utc::now().date_naive();
        let calendar = EventCalendar::new([None, None, Some(today)]);
        let result = calendar.today();
        // Tolerate a UTC midnight rollover between the two clock reads.
        if result.date == today {
            assert_eq!(result.index, 3);
        }
    }

    #[test]
    fn test_date_string_format() {
        let day = festival().classify(date(2025, 2, 1));
        assert_eq!(day.date_string(), "2025-02-01");
        assert_eq!(day.to_string(), "Day 0 (2025-02-01)");
    }
}
