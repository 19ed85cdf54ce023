//! Working-day calendars with fractional availability.

use chrono::{Datelike, Days, NaiveDate};
use std::collections::BTreeMap;

use crate::EPS;

/// Hard cap on calendar walks so a calendar with no working days saturates
/// instead of spinning.
const MAX_WALK_DAYS: usize = 200_000;

/// Maps dates to availability in [0, 1] on top of a per-weekday default.
///
/// Fractional availability counts proportionally: the working days consumed
/// by the range [s, e) equal the sum of availability over its dates.
#[derive(Clone, Debug, PartialEq)]
pub struct Calendar {
    /// Default availability per weekday, Monday first.
    weekday_availability: [f64; 7],
    /// Date-specific overrides (holidays, partial days).
    overrides: BTreeMap<NaiveDate, f64>,
}

impl Calendar {
    /// Seven-day calendar, every day fully available. The engine default:
    /// durations behave as plain calendar days.
    pub fn full_time() -> Self {
        Self {
            weekday_availability: [1.0; 7],
            overrides: BTreeMap::new(),
        }
    }

    /// Monday through Friday available, weekends off.
    pub fn weekdays() -> Self {
        Self {
            weekday_availability: [1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0],
            overrides: BTreeMap::new(),
        }
    }

    /// Availability on a date: the override if present, else the weekday
    /// default.
    pub fn availability(&self, date: NaiveDate) -> f64 {
        if let Some(&avail) = self.overrides.get(&date) {
            return avail;
        }
        self.weekday_availability[date.weekday().num_days_from_monday() as usize]
    }

    pub fn is_working_day(&self, date: NaiveDate) -> bool {
        self.availability(date) > EPS
    }

    /// Override availability on a single date.
    pub fn set_availability(&mut self, date: NaiveDate, availability: f64) {
        self.overrides.insert(date, availability.clamp(0.0, 1.0));
    }

    /// Mark an inclusive date range unavailable.
    pub fn add_unavailable_period(&mut self, from: NaiveDate, to: NaiveDate) {
        let mut date = from;
        while date <= to {
            self.overrides.insert(date, 0.0);
            date = next_day(date);
        }
    }

    /// Advance from `start` until `workdays` working days are consumed,
    /// returning the exclusive end date: availability summed over
    /// [start, end) is at least `workdays`.
    pub fn add_workdays(&self, start: NaiveDate, workdays: f64) -> NaiveDate {
        if workdays <= EPS {
            return start;
        }
        let mut date = start;
        let mut consumed = 0.0;
        for _ in 0..MAX_WALK_DAYS {
            consumed += self.availability(date);
            date = next_day(date);
            if consumed >= workdays - EPS {
                return date;
            }
        }
        date
    }

    /// Walk backward from the exclusive `end` until `workdays` working days
    /// fit, returning the latest start such that [start, end) holds them.
    pub fn sub_workdays(&self, end: NaiveDate, workdays: f64) -> NaiveDate {
        if workdays <= EPS {
            return end;
        }
        let mut date = end;
        let mut consumed = 0.0;
        for _ in 0..MAX_WALK_DAYS {
            date = prev_day(date);
            consumed += self.availability(date);
            if consumed >= workdays - EPS {
                return date;
            }
        }
        date
    }

    /// Working days in [from, to): the sum of availability over the range.
    pub fn workdays_between(&self, from: NaiveDate, to: NaiveDate) -> f64 {
        if to <= from {
            return 0.0;
        }
        let mut date = from;
        let mut total = 0.0;
        while date < to {
            total += self.availability(date);
            date = next_day(date);
        }
        total
    }

    /// First working day at or after `date`.
    pub fn next_working_day(&self, date: NaiveDate) -> NaiveDate {
        let mut current = date;
        for _ in 0..MAX_WALK_DAYS {
            if self.is_working_day(current) {
                return current;
            }
            current = next_day(current);
        }
        current
    }
}

impl Default for Calendar {
    fn default() -> Self {
        Self::full_time()
    }
}

pub(crate) fn next_day(date: NaiveDate) -> NaiveDate {
    date.checked_add_days(Days::new(1)).unwrap_or(date)
}

pub(crate) fn prev_day(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(1)).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn test_full_time_add_workdays() {
        let cal = Calendar::full_time();
        assert_eq!(cal.add_workdays(d(2025, 4, 1), 30.0), d(2025, 5, 1));
        assert_eq!(cal.add_workdays(d(2025, 4, 1), 0.0), d(2025, 4, 1));
    }

    #[test]
    fn test_weekdays_skip_weekend() {
        let cal = Calendar::weekdays();
        // 2025-04-04 is a Friday; 5 working days starting there span the
        // weekend and finish after Thursday the 10th.
        assert_eq!(cal.add_workdays(d(2025, 4, 4), 5.0), d(2025, 4, 11));
        assert!(!cal.is_working_day(d(2025, 4, 5)));
        assert!(!cal.is_working_day(d(2025, 4, 6)));
    }

    #[test]
    fn test_unavailable_period() {
        let mut cal = Calendar::full_time();
        cal.add_unavailable_period(d(2025, 4, 10), d(2025, 4, 12));

        assert!(!cal.is_working_day(d(2025, 4, 10)));
        assert!(!cal.is_working_day(d(2025, 4, 12)));
        assert!(cal.is_working_day(d(2025, 4, 13)));
        // 10 workdays from Apr 1 stretch 3 days over the closure.
        assert_eq!(cal.add_workdays(d(2025, 4, 1), 10.0), d(2025, 4, 14));
    }

    #[test]
    fn test_fractional_availability_counts_proportionally() {
        let mut cal = Calendar::full_time();
        cal.set_availability(d(2025, 4, 2), 0.5);

        // Apr 1 (1.0) + Apr 2 (0.5) = 1.5 workdays over [Apr 1, Apr 3).
        assert!((cal.workdays_between(d(2025, 4, 1), d(2025, 4, 3)) - 1.5).abs() < 1e-9);
        assert_eq!(cal.add_workdays(d(2025, 4, 1), 2.0), d(2025, 4, 4));
    }

    #[test]
    fn test_sub_workdays_inverts_add() {
        let cal = Calendar::weekdays();
        let start = d(2025, 4, 7); // Monday
        let end = cal.add_workdays(start, 8.0);
        assert_eq!(cal.sub_workdays(end, 8.0), start);
    }

    #[test]
    fn test_workdays_between_roundtrip() {
        let cal = Calendar::weekdays();
        let start = d(2025, 4, 1);
        let end = cal.add_workdays(start, 12.0);
        assert!((cal.workdays_between(start, end) - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_next_working_day() {
        let cal = Calendar::weekdays();
        assert_eq!(cal.next_working_day(d(2025, 4, 5)), d(2025, 4, 7));
        assert_eq!(cal.next_working_day(d(2025, 4, 7)), d(2025, 4, 7));
    }
}
