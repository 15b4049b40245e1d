//! Briefing aggregator.
//!
//! Sections are fetched concurrently, each under its own timeout. A section
//! that errors or times out contributes its fallback phrase; a section that
//! resolves to an empty string is left out of the briefing.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tracing::{debug, info, warn};

use callie_core::briefing::{compose_briefing, extract_headlines, greeting, unique_lines, MarketSource, ResolvedSection};
use callie_core::Result;

use crate::config::Config;
use crate::sources;

const FAST: Duration = Duration::from_secs(5);
const SLOW: Duration = Duration::from_secs(15);
/// Weather gets room for its retry.
const WEATHER: Duration = Duration::from_secs(22);

/// One independently fetched piece of the briefing.
pub struct Section {
    pub title: String,
    pub timeout: Duration,
    /// Used when the fetch fails or times out. May be empty to drop the
    /// section in that case.
    pub fallback: String,
    fetch: BoxFuture<'static, Result<String>>,
}

impl Section {
    pub fn new<F>(title: impl Into<String>, timeout: Duration, fallback: impl Into<String>, fetch: F) -> Self
    where
        F: Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            title: title.into(),
            timeout,
            fallback: fallback.into(),
            fetch: fetch.boxed(),
        }
    }

    async fn resolve(self) -> ResolvedSection {
        let Section {
            title,
            timeout,
            fallback,
            fetch,
        } = self;
        let body = match tokio::time::timeout(timeout, fetch).await {
            Ok(Ok(body)) => {
                debug!("section {title}: {} chars", body.len());
                body
            }
            Ok(Err(e)) => {
                warn!("section {title} failed: {e}");
                fallback
            }
            Err(_) => {
                warn!("section {title} timed out after {timeout:?}");
                fallback
            }
        };
        ResolvedSection { title, body }
    }
}

/// Resolve all sections concurrently, preserving their order. Total latency
/// is bounded by the slowest section.
pub async fn resolve_sections(sections: Vec<Section>) -> Vec<ResolvedSection> {
    join_all(sections.into_iter().map(Section::resolve)).await
}

/// Resolve `sections` and lay them out under a greeting for `now`.
pub async fn assemble<Tz: TimeZone>(user_name: &str, now: &DateTime<Tz>, sections: Vec<Section>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let resolved = resolve_sections(sections).await;
    let date = now.format("%A, %B %-d, %Y").to_string();
    compose_briefing(greeting(now.hour()), user_name, &date, &resolved)
}

/// The standard section list, in reading order.
pub fn live_sections<Tz: TimeZone>(config: &Config, now: &DateTime<Tz>) -> Vec<Section> {
    let b = &config.briefing;
    let client = sources::http_client();
    let today = now.date_naive();
    let market = MarketSource::for_weekday(now.weekday());

    let mut sections = Vec::new();

    let (c, city, lat, lon) = (client.clone(), b.city.clone(), b.latitude, b.longitude);
    sections.push(Section::new("Weather", WEATHER, "Weather unavailable", async move {
        sources::weather(&c, &city, lat, lon).await
    }));

    let calendar = b.calendar_command.clone();
    sections.push(Section::new("Calendar", FAST, "Nothing scheduled", async move {
        let Some(cmd) = calendar else {
            return Ok("Nothing scheduled".to_string());
        };
        let events = unique_lines(&sources::run_command(&cmd).await?, 3);
        Ok(if events.is_empty() { "Nothing scheduled".to_string() } else { events })
    }));

    let reminders = b.reminders_command.clone();
    sections.push(Section::new("Reminders", FAST, "", async move {
        let Some(cmd) = reminders else {
            return Ok(String::new());
        };
        let out = sources::run_command(&cmd).await?;
        Ok(sources::reminder_titles(&out).into_iter().take(5).collect::<Vec<_>>().join(", "))
    }));

    let c = client.clone();
    sections.push(Section::new("Markets", FAST * 2, market.fallback(), async move {
        match market {
            MarketSource::Equities => sources::equities(&c).await,
            MarketSource::Crypto => sources::crypto(&c).await,
        }
    }));

    let portfolio = b.portfolio_path.clone();
    sections.push(Section::new("Finances", FAST, "", async move {
        match portfolio {
            Some(path) => sources::portfolio(&path).await,
            None => Ok(String::new()),
        }
    }));

    let news = b.news_command.clone();
    sections.push(Section::new("Headlines", SLOW, "", async move {
        match news {
            Some(cmd) => Ok(extract_headlines(&sources::run_command(&cmd).await?, 2)),
            None => Ok(String::new()),
        }
    }));

    let items = b.action_items_path.clone();
    sections.push(Section::new("Action items", FAST, "", async move {
        match items {
            Some(path) if path.exists() => sources::action_items(&path, today).await,
            _ => Ok(String::new()),
        }
    }));

    sections
}

/// Build today's briefing from live sources, in the configured timezone.
pub async fn generate(config: &Config) -> Result<String> {
    let tz = crate::context::timezone(&config.call.timezone)?;
    let now = chrono::Utc::now().with_timezone(&tz);
    let sections = live_sections(config, &now);
    info!("building briefing from {} sections", sections.len());
    Ok(assemble(&config.call.user_name, &now, sections).await)
}
