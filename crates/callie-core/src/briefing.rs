//! Briefing text composition: greeting, section layout, and the small
//! phrase builders for each data source.
//!
//! Fetching lives in callie-lib; everything here is deterministic.

use chrono::Weekday;
use regex::Regex;
use std::sync::LazyLock;

static RE_NUMBERED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\s+").unwrap());

pub const SIGN_OFF: &str = "That's your briefing.";

/// A section after its fetch resolved (or fell back).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSection {
    pub title: String,
    pub body: String,
}

/// Time-of-day greeting for a local hour (0-23).
pub fn greeting(hour: u32) -> &'static str {
    match hour {
        0..=11 => "Good morning",
        12..=16 => "Good afternoon",
        _ => "Good evening",
    }
}

/// Assemble the briefing. Sections whose body is empty are left out entirely.
pub fn compose_briefing(
    greeting: &str,
    user_name: &str,
    date: &str,
    sections: &[ResolvedSection],
) -> String {
    let mut out = format!("{greeting} {user_name}. {date}.\n\n");
    for section in sections {
        let body = section.body.trim();
        if body.is_empty() {
            continue;
        }
        out.push_str(&format!("{}. {body}\n\n", section.title));
    }
    out.push_str(SIGN_OFF);
    out
}

/// Pull up to `max` numbered headlines (`1. Foo`) out of a news digest,
/// joined with periods and without their numbering.
pub fn extract_headlines(digest: &str, max: usize) -> String {
    digest
        .lines()
        .map(str::trim)
        .filter(|line| RE_NUMBERED.is_match(line))
        .map(|line| RE_NUMBERED.replace(line, "").trim().to_string())
        .take(max)
        .collect::<Vec<_>>()
        .join(". ")
}

/// First `max` distinct non-blank lines, comma-joined.
pub fn unique_lines(raw: &str, max: usize) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()).take(max) {
        if !seen.contains(&line) {
            seen.push(line);
        }
    }
    seen.join(", ")
}

// ─── Weather ───────────────────────────────────────────────────────────────

/// WMO weather interpretation code → short phrase.
pub fn weather_condition(code: u32) -> &'static str {
    match code {
        0 => "Clear",
        1 => "Mostly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 | 48 => "Foggy",
        51 => "Light drizzle",
        53 => "Drizzle",
        55 => "Heavy drizzle",
        61 => "Light rain",
        63 => "Rain",
        65 => "Heavy rain",
        71 => "Light snow",
        73 => "Snow",
        75 => "Heavy snow",
        80 | 81 => "Rain showers",
        82 => "Heavy rain showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with hail",
        _ => "Unknown",
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherReading {
    pub current: f64,
    pub code: u32,
    pub high: f64,
    pub low: f64,
    pub precipitation_chance: f64,
}

pub fn weather_phrase(city: &str, w: &WeatherReading) -> String {
    format!(
        "{city}. Currently {} degrees, {}. High of {}, low of {}. {}% chance of precipitation.",
        w.current.round() as i64,
        weather_condition(w.code).to_lowercase(),
        w.high.round() as i64,
        w.low.round() as i64,
        w.precipitation_chance.round() as i64,
    )
}

// ─── Markets ───────────────────────────────────────────────────────────────

/// Which market feed a briefing reports on a given day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketSource {
    /// S&P 500 on trading days.
    Equities,
    /// Bitcoin on weekends, when equity markets are closed.
    Crypto,
}

impl MarketSource {
    pub fn for_weekday(day: Weekday) -> Self {
        match day {
            Weekday::Sat | Weekday::Sun => Self::Crypto,
            _ => Self::Equities,
        }
    }

    /// Phrase used when the feed cannot be reached.
    pub fn fallback(self) -> &'static str {
        match self {
            Self::Equities => "Markets steady.",
            Self::Crypto => "Markets closed this weekend.",
        }
    }
}

/// S&P 500 day change; anything under a tenth of a percent is "flat".
pub fn equities_phrase(price: f64, previous_close: f64) -> String {
    let pct = (price - previous_close) / previous_close * 100.0;
    let rounded = (pct * 10.0).round() / 10.0;
    if rounded.abs() < 0.1 {
        return "S and P flat today.".to_string();
    }
    let dir = if rounded >= 0.0 { "up" } else { "down" };
    format!("S and P {dir} {:.1} percent.", rounded.abs())
}

pub fn crypto_phrase(change_24h: f64) -> String {
    let dir = if change_24h >= 0.0 { "up" } else { "down" };
    format!("Bitcoin {dir} {:.1} percent in 24 hours.", change_24h.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_by_hour() {
        assert_eq!(greeting(7), "Good morning");
        assert_eq!(greeting(12), "Good afternoon");
        assert_eq!(greeting(16), "Good afternoon");
        assert_eq!(greeting(17), "Good evening");
    }

    #[test]
    fn compose_omits_empty_sections() {
        let sections = vec![
            ResolvedSection { title: "Weather".into(), body: "Sunny.".into() },
            ResolvedSection { title: "Finances".into(), body: String::new() },
            ResolvedSection { title: "Calendar".into(), body: "Dentist at 3".into() },
        ];
        let b = compose_briefing("Good morning", "Joshua", "Friday, October 16, 2026", &sections);
        assert!(b.starts_with("Good morning Joshua. Friday, October 16, 2026.\n\n"));
        assert!(b.contains("Weather. Sunny.\n\n"));
        assert!(b.contains("Calendar. Dentist at 3\n\n"));
        assert!(!b.contains("Finances"));
        assert!(b.ends_with(SIGN_OFF));
    }

    #[test]
    fn headlines_strip_numbering() {
        let digest = "Top stories\n1. Rates hold steady\n2. Storm hits coast\n3. Third story";
        assert_eq!(extract_headlines(digest, 2), "Rates hold steady. Storm hits coast");
        assert_eq!(extract_headlines("no numbers here", 2), "");
    }

    #[test]
    fn unique_lines_dedupes() {
        assert_eq!(unique_lines("a\n\na\nb\nc\nd", 4), "a, b, c");
    }

    #[test]
    fn weather_phrase_rounds() {
        let w = WeatherReading {
            current: 11.6,
            code: 2,
            high: 14.2,
            low: 6.5,
            precipitation_chance: 40.0,
        };
        assert_eq!(
            weather_phrase("Brookswood", &w),
            "Brookswood. Currently 12 degrees, partly cloudy. High of 14, low of 7. 40% chance of precipitation."
        );
    }

    #[test]
    fn market_source_by_day() {
        assert_eq!(MarketSource::for_weekday(Weekday::Sat), MarketSource::Crypto);
        assert_eq!(MarketSource::for_weekday(Weekday::Wed), MarketSource::Equities);
    }

    #[test]
    fn equities_phrases() {
        assert_eq!(equities_phrase(100.04, 100.0), "S and P flat today.");
        assert_eq!(equities_phrase(101.5, 100.0), "S and P up 1.5 percent.");
        assert_eq!(equities_phrase(98.0, 100.0), "S and P down 2.0 percent.");
    }

    #[test]
    fn crypto_phrases() {
        assert_eq!(crypto_phrase(-3.26), "Bitcoin down 3.3 percent in 24 hours.");
        assert_eq!(crypto_phrase(0.0), "Bitcoin up 0.0 percent in 24 hours.");
    }
}
