//! Locale-tolerant date parsing for the free-form date strings found in
//! newspaper exports.

use std::fmt;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::patterns::compile;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    #[error("Could not parse datetime string '{0}'")]
    Unparseable(String),
    #[error("Could not parse time part of datetime string '{0}'")]
    InvalidTime(String),
    #[error("Invalid date in datetime string '{0}'")]
    InvalidDate(String),
}

pub type DateResult<T> = Result<T, DateError>;

/// Languages whose month names the date reader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    #[serde(rename = "en")]
    English,
    #[serde(rename = "nl")]
    Dutch,
    #[serde(rename = "de")]
    German,
    #[serde(rename = "fr")]
    French,
    #[serde(rename = "es")]
    Spanish,
    #[serde(rename = "it")]
    Italian,
}

impl Language {
    pub const ALL: [Self; 6] = [
        Self::English,
        Self::Dutch,
        Self::German,
        Self::French,
        Self::Spanish,
        Self::Italian,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::Dutch => "nl",
            Self::German => "de",
            Self::French => "fr",
            Self::Spanish => "es",
            Self::Italian => "it",
        }
    }

    /// Month name prefixes, indexed by month number minus one.
    fn month_prefixes(self) -> [&'static [&'static str]; 12] {
        match self {
            Self::English => [
                &["jan"], &["feb"], &["mar"], &["apr"], &["may"], &["jun"],
                &["jul"], &["aug"], &["sep"], &["oct"], &["nov"], &["dec"],
            ],
            Self::Dutch => [
                &["jan"], &["feb"], &["maa", "mrt"], &["apr"], &["mei"], &["jun"],
                &["jul"], &["aug"], &["sep"], &["okt"], &["nov"], &["dec"],
            ],
            Self::German => [
                &["jan", "jän"], &["feb"], &["mär", "maerz", "mrz"], &["apr"], &["mai"], &["jun"],
                &["jul"], &["aug"], &["sep"], &["okt"], &["nov"], &["dez"],
            ],
            Self::French => [
                &["janv"], &["fév", "fev"], &["mars"], &["avr"], &["mai"], &["juin"],
                &["juil"], &["aoû", "aou"], &["sep"], &["oct"], &["nov"], &["déc", "dec"],
            ],
            Self::Spanish => [
                &["ene"], &["feb"], &["mar"], &["abr"], &["may"], &["jun"],
                &["jul"], &["ago"], &["sep", "setiembre"], &["oct"], &["nov"], &["dic"],
            ],
            Self::Italian => [
                &["gen"], &["feb"], &["mar"], &["apr"], &["mag"], &["giu"],
                &["lug"], &["ago"], &["set"], &["ott"], &["nov"], &["dic"],
            ],
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Resolve a (possibly abbreviated) month name using the month tables of
/// `languages`, or of every known language when none are given.
pub fn month_number(name: &str, languages: Option<&[Language]>) -> Option<u32> {
    let name = name.to_lowercase();
    if name.is_empty() {
        return None;
    }
    let pool = languages.filter(|l| !l.is_empty()).unwrap_or(&Language::ALL);
    for month in 0..12 {
        for language in pool {
            if language.month_prefixes()[month]
                .iter()
                .any(|prefix| name.starts_with(prefix))
            {
                return u32::try_from(month + 1).ok();
            }
        }
    }
    None
}

#[derive(Clone, Copy)]
enum Month {
    Number,
    Name,
}

struct DateFormat {
    expr: Regex,
    year: usize,
    month: usize,
    day: usize,
    month_kind: Month,
}

impl DateFormat {
    fn new(expr: &str, (year, month, day): (usize, usize, usize), month_kind: Month) -> Self {
        Self {
            expr: compile(expr),
            year,
            month,
            day,
            month_kind,
        }
    }

    /// Year, month and day of the first match. An unknown month name is no match.
    fn read(&self, s: &str, languages: Option<&[Language]>) -> Option<(i32, u32, u32)> {
        let caps = self.expr.captures(s)?;
        let year: i32 = caps.get(self.year)?.as_str().parse().ok()?;
        let month_str = caps.get(self.month)?.as_str();
        let month = match self.month_kind {
            Month::Number => month_str.parse().ok()?,
            Month::Name => month_number(month_str, languages)?,
        };
        let day: u32 = caps.get(self.day)?.as_str().parse().ok()?;
        Some((expand_year(year), month, day))
    }
}

/// Two-digit years pivot at 1940.
pub const fn expand_year(year: i32) -> i32 {
    if year < 40 {
        year + 2000
    } else if year < 100 {
        year + 1900
    } else {
        year
    }
}

static DATE_FORMATS: LazyLock<Vec<DateFormat>> = LazyLock::new(|| {
    vec![
        DateFormat::new(r"(\d{4})[-/\.](\d{1,2})[-/\.](\d{1,2})", (1, 2, 3), Month::Number),
        DateFormat::new(r"(\d{1,2})[-/\.](\d{1,2})[-/\.](\d{4})", (3, 2, 1), Month::Number),
        DateFormat::new(r"(\w+),?\s+(\d{1,2})\s*,?\s+(\d{4})", (3, 1, 2), Month::Name),
        DateFormat::new(r"(\w+)\s+(\d{1,2})\s*,?\s+(\d{4})", (3, 1, 2), Month::Name),
        DateFormat::new(r"(\d{1,2})(?:\w\w?|\.)?\s+(\w*)\s+(\d{4})", (3, 2, 1), Month::Name),
        DateFormat::new(r"\w*?,?\s*(\d{1,2})\s+(\w+)\s+(\d{4})", (3, 2, 1), Month::Name),
        DateFormat::new(r"(\d{1,2})\.?\s+(\w*)\s+(\d{4})", (3, 2, 1), Month::Name),
        DateFormat::new(r"(\d{1,2})[- ](\w+)[- ](\d{2,4})", (3, 2, 1), Month::Name),
        DateFormat::new(r"(\w+) (\d{1,2}), (\d{4})", (3, 1, 2), Month::Name),
        DateFormat::new(r"(\d{1,2})(\w{3})(\d{4})", (3, 2, 1), Month::Name),
        DateFormat::new(r"(\d{1,2})[-/](\d{1,2})[-/](\d{2})", (3, 2, 1), Month::Number),
    ]
});

static TIME: LazyLock<Regex> = LazyLock::new(|| compile(r"^(.*?)(\d+:[\d:]+)(\s+[AP]M\b)?"));

/// Read a date or datetime string of unknown format.
///
/// Formats are tried in a fixed order, ISO first. A `hh:mm[:ss]` time with an
/// optional `PM` marker may appear anywhere after the date. `languages`
/// restricts the month-name tables that are consulted.
///
/// The first matching format decides: if its numbers do not form a calendar
/// date the string is rejected.
pub fn read_date(s: &str, languages: Option<&[Language]>) -> DateResult<NaiveDateTime> {
    let (date_part, time) = split_time(s)?;

    let (year, month, day) = DATE_FORMATS
        .iter()
        .find_map(|format| format.read(date_part, languages))
        .ok_or_else(|| DateError::Unparseable(s.to_string()))?;
    NaiveDate::from_ymd_opt(year, month, day)
        .map(|date| date.and_time(time.unwrap_or(NaiveTime::MIN)))
        .ok_or_else(|| DateError::InvalidDate(s.to_string()))
}

fn split_time(s: &str) -> DateResult<(&str, Option<NaiveTime>)> {
    if !s.contains(':') {
        return Ok((s, None));
    }
    let Some(caps) = TIME.captures(s) else {
        return Ok((s, None));
    };
    let date_part = caps.get(1).map_or("", |m| m.as_str());
    let clock = caps.get(2).map_or("", |m| m.as_str());
    let pm = caps
        .get(3)
        .is_some_and(|m| m.as_str().trim().eq_ignore_ascii_case("pm"));

    let parts: Vec<u32> = clock
        .split(':')
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| DateError::InvalidTime(s.to_string()))?;
    let (mut hour, minute, second) = match parts.as_slice() {
        [h, m] => (*h, *m, 0),
        [h, m, sec] => (*h, *m, *sec),
        _ => return Err(DateError::InvalidTime(s.to_string())),
    };
    if pm && hour != 12 {
        hour += 12;
    }
    let time = NaiveTime::from_hms_opt(hour, minute, second)
        .ok_or_else(|| DateError::InvalidTime(s.to_string()))?;
    Ok((date_part, Some(time)))
}

/// True if `s` holds a digit and reads as a date.
pub fn is_date(s: &str, languages: Option<&[Language]>) -> bool {
    s.chars().any(|c| c.is_ascii_digit()) && read_date(s, languages).is_ok()
}
