use std::fmt;
use std::sync::LazyLock;

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, Utc, Weekday};
use regex::Regex;

static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{1,2})(?:st|nd|rd|th)\b").unwrap());
static DMY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})[-./](\d{1,2})[-./](\d{4})").unwrap());
static YMD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4})[-./](\d{1,2})[-./](\d{1,2})").unwrap());

/// Exact formats tried in order before the regex fallback.
const FORMATS: &[&str] = &[
    "%d %B %Y",  // 07 June 2025
    "%d %b %Y",  // 07 Jun 2025
    "%B %d, %Y", // June 07, 2025
    "%b %d, %Y", // Jun 07, 2025
    "%d-%m-%Y",
    "%d/%m/%Y",
    "%d.%m.%Y",
    "%Y-%m-%d",
];

const LONG_FORMAT: &str = "%d %B %Y";
const SHORT_FORMAT: &str = "%b %d, %Y";

/// Canonical long form, "07 June 2025".
pub fn format_long(date: NaiveDate) -> String {
    date.format(LONG_FORMAT).to_string()
}

/// Short form used by the listing pages, "Jun 07, 2025".
pub fn format_short(date: NaiveDate) -> String {
    date.format(SHORT_FORMAT).to_string()
}

/// Parse a scraped date string in any of the supported shapes.
///
/// Ordinal suffixes are stripped first ("1st" → "1"), then each exact format
/// is tried, then a `D-M-YYYY` / `YYYY-M-D` extractor accepting `-`, `/` or
/// `.` separators anywhere in the text.
pub fn parse_date(date_str: &str) -> Option<NaiveDate> {
    let stripped = ORDINAL_RE.replace_all(date_str, "$1");
    let cleaned = collapse_whitespace(&stripped);
    if cleaned.is_empty() {
        return None;
    }

    for fmt in FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, fmt) {
            return Some(date);
        }
    }

    if let Some(caps) = DMY_RE.captures(&cleaned) {
        let day = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let year = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    if let Some(caps) = YMD_RE.captures(&cleaned) {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }
    None
}

/// Canonicalize a date string for equality checks. Returns the input
/// unchanged when it cannot be parsed.
pub fn normalize_for_compare(date_str: &str) -> String {
    match parse_date(date_str) {
        Some(date) => format_long(date),
        None => date_str.to_string(),
    }
}

/// True when `date_str` denotes one of `targets`. Both sides are normalized,
/// so "07 June 2025" matches "Jun 07, 2025". Blank and "N/A" never match.
pub fn is_target_date<S: AsRef<str>>(date_str: &str, targets: &[S]) -> bool {
    if is_blank(date_str) {
        return false;
    }
    let normalized = collapse_whitespace(&normalize_for_compare(date_str));
    targets
        .iter()
        .any(|t| collapse_whitespace(&normalize_for_compare(t.as_ref())) == normalized)
}

/// Inclusion window for a run on `today`.
pub fn target_dates(today: NaiveDate) -> TargetDateSet {
    match today.weekday() {
        Weekday::Sat | Weekday::Sun => TargetDateSet::default(),
        _ => TargetDateSet {
            dates: weekend_or_yesterday(today),
        },
    }
}

fn weekend_or_yesterday(today: NaiveDate) -> Vec<NaiveDate> {
    if today.weekday() == Weekday::Mon {
        vec![today - Duration::days(2), today - Duration::days(1)]
    } else {
        vec![today - Duration::days(1)]
    }
}

pub(crate) fn is_blank(s: &str) -> bool {
    let t = s.trim();
    t.is_empty() || t.eq_ignore_ascii_case("n/a")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Ordered set of calendar days a run collects: empty on weekends, yesterday
/// on Tuesday to Friday, Saturday then Sunday on Monday.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetDateSet {
    dates: Vec<NaiveDate>,
}

impl TargetDateSet {
    #[cfg(test)]
    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Monday's window: Saturday and Sunday collected together.
    pub fn is_weekend_rollup(&self) -> bool {
        self.dates.len() > 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    pub fn oldest(&self) -> Option<NaiveDate> {
        self.dates.iter().min().copied()
    }

    /// Short-form strings, the shape the listing pages print.
    pub fn to_strings(&self) -> Vec<String> {
        self.dates.iter().copied().map(format_short).collect()
    }
}

impl fmt::Display for TargetDateSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dates.is_empty() {
            return f.write_str("(none)");
        }
        f.write_str(&self.to_strings().join(", "))
    }
}

/// Date arithmetic anchored on one reference day.
#[derive(Debug, Clone, Copy)]
pub struct DateResolver {
    today: NaiveDate,
}

impl DateResolver {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    /// Today's date at a fixed UTC offset (the sites publish on IST, +330).
    pub fn from_clock(utc_offset_minutes: i32) -> Self {
        let now = Utc::now();
        let today = match FixedOffset::east_opt(utc_offset_minutes * 60) {
            Some(offset) => now.with_timezone(&offset).date_naive(),
            None => now.date_naive(),
        };
        Self { today }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn yesterday(&self) -> NaiveDate {
        self.today - Duration::days(1)
    }

    pub fn today_string(&self) -> String {
        format_long(self.today)
    }

    pub fn yesterday_string(&self) -> String {
        format_short(self.yesterday())
    }

    pub fn weekend_dates(&self) -> Vec<String> {
        weekend_or_yesterday(self.today)
            .into_iter()
            .map(format_short)
            .collect()
    }

    pub fn target_dates(&self) -> TargetDateSet {
        target_dates(self.today)
    }

    pub fn is_today(&self, date_str: &str) -> bool {
        parse_date(date_str) == Some(self.today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn strings_use_two_shapes() {
        let r = DateResolver::new(day(2025, 6, 11));
        assert_eq!(r.today_string(), "11 June 2025");
        assert_eq!(r.yesterday_string(), "Jun 10, 2025");
    }

    #[test]
    fn monday_targets_weekend() {
        let r = DateResolver::new(day(2025, 6, 9));
        let t = r.target_dates();
        assert_eq!(t.dates(), &[day(2025, 6, 7), day(2025, 6, 8)]);
        assert_eq!(t.to_strings(), vec!["Jun 07, 2025", "Jun 08, 2025"]);
        assert_eq!(r.weekend_dates(), t.to_strings());
        assert!(t.is_weekend_rollup());
    }

    #[test]
    fn midweek_targets_yesterday() {
        for d in 10..=13 {
            let r = DateResolver::new(day(2025, 6, d));
            let t = r.target_dates();
            assert_eq!(t.dates().len(), 1);
            assert!(!t.is_weekend_rollup());
            assert_eq!(t.to_strings(), vec![r.yesterday_string()]);
            assert_eq!(r.weekend_dates(), vec![r.yesterday_string()]);
        }
    }

    #[test]
    fn weekend_has_no_targets() {
        assert!(target_dates(day(2025, 6, 7)).is_empty());
        assert!(target_dates(day(2025, 6, 8)).is_empty());
        // weekend_dates itself still answers "yesterday" off-Monday
        assert_eq!(
            DateResolver::new(day(2025, 6, 8)).weekend_dates(),
            vec!["Jun 07, 2025"]
        );
    }

    #[test]
    fn leap_day_yesterday() {
        let r = DateResolver::new(day(2024, 3, 1));
        assert_eq!(r.yesterday_string(), "Feb 29, 2024");
        assert_eq!(normalize_for_compare("29th February 2024"), "29 February 2024");
        assert_eq!(normalize_for_compare("29/02/2024"), "29 February 2024");
        // not a leap year: left untouched
        assert_eq!(normalize_for_compare("29/02/2023"), "29/02/2023");
    }

    #[test]
    fn ordinal_suffixes() {
        assert_eq!(normalize_for_compare("1st June 2025"), "01 June 2025");
        assert_eq!(normalize_for_compare("2nd June 2025"), "02 June 2025");
        assert_eq!(normalize_for_compare("3rd June 2025"), "03 June 2025");
        assert_eq!(normalize_for_compare("4th June 2025"), "04 June 2025");
        assert_eq!(normalize_for_compare("June 21st, 2025"), "21 June 2025");
    }

    #[test]
    fn same_day_any_format() {
        let shapes = [
            "07 June 2025",
            "7 June 2025",
            "07 Jun 2025",
            "June 07, 2025",
            "Jun 7, 2025",
            "07-06-2025",
            "07/06/2025",
            "07.06.2025",
            "2025-06-07",
            "7th June 2025",
            "  Jun   07,  2025 ",
        ];
        for s in shapes {
            assert_eq!(normalize_for_compare(s), "07 June 2025", "{s}");
        }
    }

    #[test]
    fn regex_fallback_finds_embedded_dates() {
        assert_eq!(normalize_for_compare("Published: 7-6-2025 10:30"), "07 June 2025");
        assert_eq!(normalize_for_compare("updated 2025/06/07"), "07 June 2025");
    }

    #[test]
    fn unparseable_is_returned_unchanged() {
        assert_eq!(normalize_for_compare("yesterday-ish"), "yesterday-ish");
        assert_eq!(normalize_for_compare(""), "");
        assert_eq!(parse_date("N/A"), None);
    }

    #[test]
    fn blank_never_matches() {
        let targets = ["Jun 07, 2025"];
        assert!(!is_target_date("", &targets));
        assert!(!is_target_date("N/A", &targets));
        assert!(!is_target_date("   ", &targets));
    }

    #[test]
    fn target_match_normalizes_both_sides() {
        // raw string equality would reject this pair
        let targets = ["Jun 07, 2025", "Jun 08, 2025"];
        assert!(is_target_date("07 June 2025", &targets));
        assert!(is_target_date("08-06-2025", &targets));
        assert!(is_target_date("Jun  07, 2025", &targets));
        assert!(!is_target_date("Jun 06, 2025", &targets));
    }

    #[test]
    fn today_check() {
        let r = DateResolver::new(day(2025, 6, 9));
        assert!(r.is_today("Jun 09, 2025"));
        assert!(r.is_today("09 June 2025"));
        assert!(!r.is_today("Jun 08, 2025"));
        assert!(!r.is_today("N/A"));
    }
}
