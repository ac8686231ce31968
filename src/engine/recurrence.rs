use chrono::{Datelike, Days, NaiveDate};

use crate::model::*;

/// Lazy walk over the dates of `range` that fall on `days`, ascending.
/// Pure function of its inputs; clone it to restart.
#[derive(Debug, Clone)]
pub struct Occurrences {
    next: Option<NaiveDate>,
    end: NaiveDate,
    days: WeekdaySet,
}

impl Occurrences {
    pub fn new(range: DateRange, days: WeekdaySet) -> Self {
        Self {
            next: Some(range.start),
            end: range.end,
            days,
        }
    }
}

impl Iterator for Occurrences {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        if self.days.is_empty() {
            self.next = None;
            return None;
        }
        while let Some(day) = self.next {
            if day > self.end {
                self.next = None;
                break;
            }
            self.next = day.checked_add_days(Days::new(1));
            if self.days.contains(day.weekday()) {
                return Some(day);
            }
        }
        None
    }
}

/// Every calendar date in `range` whose weekday is in `days`, ascending.
pub fn expand(range: DateRange, days: WeekdaySet) -> Vec<NaiveDate> {
    Occurrences::new(range, days).collect()
}

fn shared(a: &Slot, b: &Slot) -> Option<Occurrences> {
    let range = a.dates.intersection(&b.dates)?;
    Some(Occurrences::new(range, a.days.intersection(&b.days)))
}

/// Dates shared by two recurring series, ascending.
pub fn common_dates(a: &Slot, b: &Slot) -> Vec<NaiveDate> {
    shared(a, b).map(Iterator::collect).unwrap_or_default()
}

/// Earliest date shared by two recurring series, without expanding the rest.
pub fn first_common_date(a: &Slot, b: &Slot) -> Option<NaiveDate> {
    shared(a, b)?.next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn days(codes: &[u8]) -> WeekdaySet {
        WeekdaySet::from_iso(codes).unwrap()
    }

    #[test]
    fn single_monday_week() {
        let range = DateRange::new(d("2025-06-02"), d("2025-06-08"));
        assert_eq!(expand(range, days(&[1])), vec![d("2025-06-02")]);
    }

    #[test]
    fn monday_wednesday_over_june() {
        let range = DateRange::new(d("2025-06-01"), d("2025-06-30"));
        let dates = expand(range, days(&[1, 3]));
        assert_eq!(dates.len(), 9);
        assert_eq!(dates.first(), Some(&d("2025-06-02")));
        assert_eq!(dates.last(), Some(&d("2025-06-30")));
        assert!(dates.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn range_bounds_are_inclusive() {
        // Sunday to Sunday
        let range = DateRange::new(d("2025-06-01"), d("2025-06-08"));
        assert_eq!(
            expand(range, days(&[7])),
            vec![d("2025-06-01"), d("2025-06-08")]
        );
    }

    #[test]
    fn no_matching_dates() {
        // Tuesday to Thursday, Saturday only
        let range = DateRange::new(d("2025-06-03"), d("2025-06-05"));
        assert!(expand(range, days(&[6])).is_empty());
    }

    #[test]
    fn single_day_range() {
        let range = DateRange::single(d("2025-06-04"));
        assert_eq!(expand(range, days(&[3])), vec![d("2025-06-04")]);
        assert!(expand(range, days(&[1, 2, 4, 5, 6, 7])).is_empty());
    }

    #[test]
    fn empty_set_yields_nothing() {
        let range = DateRange::new(d("2025-06-01"), d("2025-06-30"));
        assert!(expand(range, WeekdaySet::EMPTY).is_empty());
    }

    #[test]
    fn iterator_is_restartable() {
        let it = Occurrences::new(DateRange::new(d("2025-06-01"), d("2025-06-30")), days(&[5]));
        let first: Vec<_> = it.clone().collect();
        let second: Vec<_> = it.collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
    }

    #[test]
    fn range_ending_at_max_date_terminates() {
        let range = DateRange::new(NaiveDate::MAX - Days::new(3), NaiveDate::MAX);
        assert_eq!(expand(range, WeekdaySet::from_iso(&[1, 2, 3, 4, 5, 6, 7]).unwrap()).len(), 4);
    }

    #[test]
    fn common_dates_of_two_series() {
        let a = Slot {
            dates: DateRange::new(d("2025-06-01"), d("2025-06-30")),
            window: TimeWindow::new(TimeOfDay::parse("08:00").unwrap(), TimeOfDay::parse("09:00").unwrap()),
            days: days(&[1, 3]),
        };
        let b = Slot {
            dates: DateRange::new(d("2025-06-10"), d("2025-07-31")),
            window: a.window,
            days: days(&[3, 5]),
        };
        assert_eq!(
            common_dates(&a, &b),
            vec![d("2025-06-11"), d("2025-06-18"), d("2025-06-25")]
        );
        assert_eq!(first_common_date(&a, &b), Some(d("2025-06-11")));

        let c = Slot { days: days(&[5]), ..a };
        assert_eq!(first_common_date(&c, &b), Some(d("2025-06-13")));
        let later = Slot { dates: DateRange::new(d("2025-08-01"), d("2025-08-31")), ..b };
        assert_eq!(first_common_date(&a, &later), None);
    }
}
