//! Generation markers stamped into generated notes (daily and weekly prompts).
//!
//! Format: `<!-- generated: 2026-02-18 -->` or `<!-- generated: 2026-02-16 week 8 -->`

use chrono::NaiveDate;
use regex::Regex;
use std::sync::LazyLock;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*generated:\s*(\S+)(?:\s+week\s+(\S+))?\s*-->").unwrap()
});

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parsed marker. A malformed marker has no date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenerationMarker {
    pub date: Option<NaiveDate>,
    pub week: Option<u32>,
}

pub fn format_generation_marker(date: NaiveDate, week: Option<u32>) -> String {
    match week {
        Some(week) => format!("<!-- generated: {} week {} -->", date.format(DATE_FORMAT), week),
        None => format!("<!-- generated: {} -->", date.format(DATE_FORMAT)),
    }
}

/// Find and parse the first marker in `text`
pub fn parse_generation_marker(text: &str) -> GenerationMarker {
    let Some(caps) = MARKER_RE.captures(text) else {
        return GenerationMarker::default();
    };

    let Ok(date) = NaiveDate::parse_from_str(&caps[1], DATE_FORMAT) else {
        return GenerationMarker::default();
    };

    let week = match caps.get(2) {
        None => None,
        Some(raw) => match raw.as_str().parse::<u32>() {
            Ok(week) if (1..=53).contains(&week) => Some(week),
            _ => return GenerationMarker::default(),
        },
    };

    GenerationMarker {
        date: Some(date),
        week,
    }
}

/// Replace an existing marker in `content`, or prepend one
pub fn upsert_generation_marker(content: &str, date: NaiveDate, week: Option<u32>) -> String {
    let marker = format_generation_marker(date, week);
    if MARKER_RE.is_match(content) {
        MARKER_RE.replace(content, marker.as_str()).to_string()
    } else {
        format!("{}\n{}", marker, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_daily_marker_round_trip() {
        let marker = format_generation_marker(date(2026, 2, 18), None);
        assert_eq!(marker, "<!-- generated: 2026-02-18 -->");
        let parsed = parse_generation_marker(&marker);
        assert_eq!(parsed.date, Some(date(2026, 2, 18)));
        assert_eq!(parsed.week, None);
    }

    #[test]
    fn test_weekly_marker_round_trip() {
        let marker = format_generation_marker(date(2026, 2, 16), Some(8));
        let parsed = parse_generation_marker(&format!("# Weekly\n{}\nbody", marker));
        assert_eq!(parsed.date, Some(date(2026, 2, 16)));
        assert_eq!(parsed.week, Some(8));
    }

    #[test]
    fn test_malformed_markers_have_no_date() {
        for text in [
            "<!-- generated: yesterday -->",
            "<!-- generated: 2026-13-01 -->",
            "<!-- generated: 2026-02-16 week x -->",
            "<!-- generated: 2026-02-16 week 0 -->",
            "no marker here",
        ] {
            let parsed = parse_generation_marker(text);
            assert_eq!(parsed.date, None, "{}", text);
            assert_eq!(parsed.week, None, "{}", text);
        }
    }

    #[test]
    fn test_upsert_replaces_existing_marker() {
        let content = "<!-- generated: 2026-01-01 -->\nPrompt";
        let updated = upsert_generation_marker(content, date(2026, 1, 2), None);
        assert_eq!(updated, "<!-- generated: 2026-01-02 -->\nPrompt");

        let fresh = upsert_generation_marker("Prompt", date(2026, 1, 5), Some(2));
        assert!(fresh.starts_with("<!-- generated: 2026-01-05 week 2 -->\n"));
    }
}
