use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::ChartError;

pub const MIN_AGE: f64 = 0.0;
pub const MAX_AGE: f64 = 50.0;

/// The two mutually exclusive ways of entering a patient's age.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum AgeInput {
    BirthDate(Option<NaiveDate>),
    Direct(String),
}

/// Resolve `input` to an age in years, validated against [0, 50].
pub fn resolve_age(input: &AgeInput, today: NaiveDate) -> Result<f64, ChartError> {
    match input {
        AgeInput::BirthDate(None) => Err(ChartError::MissingInput("birth date".into())),
        AgeInput::BirthDate(Some(birth)) => validate_age(elapsed_years(*birth, today)),
        AgeInput::Direct(raw) => {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(ChartError::MissingInput("age".into()));
            }
            let age: f64 = raw
                .parse()
                .map_err(|_| ChartError::InvalidAge(format!("'{}' is not a number", raw)))?;
            validate_age(age)
        }
    }
}

pub fn validate_age(age: f64) -> Result<f64, ChartError> {
    if !age.is_finite() || !(MIN_AGE..=MAX_AGE).contains(&age) {
        return Err(ChartError::InvalidAge(format!(
            "age must be between {} and {}, got {}",
            MIN_AGE, MAX_AGE, age
        )));
    }
    Ok(age)
}

/// Parse an ISO `YYYY-MM-DD` birth date field; blank means no date was entered.
pub fn parse_birth_date(raw: &str) -> Result<Option<NaiveDate>, ChartError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| ChartError::InvalidAge(format!("bad birth date '{}': {}", raw, e)))
}

/// Calendar years from `birth` to `today`, with the partial year as a fraction of
/// the current year of life. Negative when `birth` is after `today`.
pub fn elapsed_years(birth: NaiveDate, today: NaiveDate) -> f64 {
    if today < birth {
        return -elapsed_years(today, birth);
    }
    let whole = today.years_since(birth).unwrap_or(0);
    let anniversary = add_years(birth, whole);
    let next = add_years(birth, whole + 1);
    let span = (next - anniversary).num_days() as f64;
    let into = (today - anniversary).num_days() as f64;
    let frac = if span > 0.0 { into / span } else { 0.0 };
    whole as f64 + frac
}

// Feb 29 anniversaries clamp to Feb 28.
fn add_years(date: NaiveDate, years: u32) -> NaiveDate {
    date.checked_add_months(Months::new(years.saturating_mul(12)))
        .unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_direct_age() {
        let today = date(2024, 6, 1);
        assert_eq!(resolve_age(&AgeInput::Direct("32.5".into()), today).unwrap(), 32.5);
        assert_eq!(resolve_age(&AgeInput::Direct("0".into()), today).unwrap(), 0.0);
        assert_eq!(resolve_age(&AgeInput::Direct("50".into()), today).unwrap(), 50.0);
    }

    #[test]
    fn test_direct_age_errors() {
        let today = date(2024, 6, 1);
        let missing = resolve_age(&AgeInput::Direct("".into()), today).unwrap_err();
        assert!(matches!(missing, ChartError::MissingInput(_)));
        for raw in ["abc", "-0.001", "50.001", "NaN", "inf"] {
            let err = resolve_age(&AgeInput::Direct(raw.into()), today).unwrap_err();
            assert!(matches!(err, ChartError::InvalidAge(_)), "{}", raw);
        }
    }

    #[test]
    fn test_birth_date_age() {
        let birth = AgeInput::BirthDate(Some(date(1990, 3, 15)));
        let age = resolve_age(&birth, date(2024, 3, 15)).unwrap();
        assert_eq!(age, 34.0);
        let age = resolve_age(&birth, date(2024, 9, 14)).unwrap();
        assert!(age > 34.49 && age < 34.51, "{}", age);
    }

    #[test]
    fn test_birth_date_missing_or_too_old() {
        let today = date(2024, 6, 1);
        let err = resolve_age(&AgeInput::BirthDate(None), today).unwrap_err();
        assert!(matches!(err, ChartError::MissingInput(_)));
        let err = resolve_age(&AgeInput::BirthDate(Some(date(1960, 1, 1))), today).unwrap_err();
        assert!(matches!(err, ChartError::InvalidAge(_)));
    }

    #[test]
    fn test_leap_day_birthday() {
        let birth = date(2000, 2, 29);
        assert_eq!(elapsed_years(birth, date(2004, 2, 29)), 4.0);
        let age = elapsed_years(birth, date(2001, 3, 1));
        assert!(age > 1.0 && age < 1.01, "{}", age);
        assert!(elapsed_years(date(2025, 1, 1), date(2024, 1, 1)) < 0.0);
    }

    #[test]
    fn test_parse_birth_date() {
        assert_eq!(parse_birth_date(" ").unwrap(), None);
        assert_eq!(parse_birth_date("1988-11-02").unwrap(), Some(date(1988, 11, 2)));
        assert!(matches!(parse_birth_date("02/11/1988"), Err(ChartError::InvalidAge(_))));
    }
}
