use chrono::{Datelike, NaiveDate};

/// Days a single fiscal quarter may span and still count as one quarter.
pub const QUARTER_DAYS: std::ops::RangeInclusive<i64> = 76..=104;

/// Days a fiscal year may span (52/53-week years included).
pub const ANNUAL_DAYS: std::ops::RangeInclusive<i64> = 350..=380;

/// 1-based calendar quarter containing `date`.
pub fn calendar_quarter(date: NaiveDate) -> u8 {
    (date.month0() / 3 + 1) as u8
}

pub fn previous_quarter(year: i32, quarter: u8) -> (i32, u8) {
    if quarter <= 1 {
        (year - 1, 4)
    } else {
        (year, quarter - 1)
    }
}

/// The `count` quarters strictly before `(year, quarter)`, most recent first.
///
/// `previous_quarters(2024, 1, 3)` yields `[(2023, 4), (2023, 3), (2023, 2)]`.
pub fn previous_quarters(year: i32, quarter: u8, count: usize) -> Vec<(i32, u8)> {
    let mut result = Vec::with_capacity(count);
    let mut current = (year, quarter);
    for _ in 0..count {
        current = previous_quarter(current.0, current.1);
        result.push(current);
    }
    result
}

pub fn is_quarter_length(days: i64) -> bool {
    QUARTER_DAYS.contains(&days)
}

pub fn is_annual_length(days: i64) -> bool {
    ANNUAL_DAYS.contains(&days)
}

/// Longer than a quarter but short of a year: a first-half or nine-month cumulative figure.
pub fn is_year_to_date_length(days: i64) -> bool {
    days > *QUARTER_DAYS.end() && days < *ANNUAL_DAYS.start()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calendar_quarter() {
        assert_eq!(calendar_quarter(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()), 1);
        assert_eq!(calendar_quarter(NaiveDate::from_ymd_opt(2023, 6, 30).unwrap()), 2);
        assert_eq!(calendar_quarter(NaiveDate::from_ymd_opt(2023, 9, 30).unwrap()), 3);
        assert_eq!(calendar_quarter(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()), 4);
    }

    #[test]
    fn test_previous_quarters_wrap_year() {
        assert_eq!(
            previous_quarters(2024, 1, 3),
            vec![(2023, 4), (2023, 3), (2023, 2)]
        );
        assert_eq!(
            previous_quarters(2024, 4, 3),
            vec![(2024, 3), (2024, 2), (2024, 1)]
        );
    }

    #[test]
    fn test_duration_classification() {
        assert!(is_quarter_length(90));
        assert!(!is_quarter_length(181));
        assert!(is_annual_length(364));
        assert!(is_annual_length(371));
        assert!(!is_annual_length(273));
        assert!(is_year_to_date_length(181));
        assert!(is_year_to_date_length(273));
        assert!(!is_year_to_date_length(91));
        assert!(!is_year_to_date_length(364));
    }
}
