//! Call context: what the assistant knows when an interactive call starts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use callie_core::intent::{system_prompt, PromptContext};
use callie_core::{CallieError, Result};

use crate::config::Config;
use crate::sources;

const CONTEXT_TIMEOUT: Duration = Duration::from_secs(5);

/// Produces the multi-line summary embedded in the system instruction.
#[async_trait]
pub trait ContextSource: Send + Sync {
    async fn summary(&self) -> String;
}

/// Fixed summary text.
pub struct StaticContext(pub String);

#[async_trait]
impl ContextSource for StaticContext {
    async fn summary(&self) -> String {
        self.0.clone()
    }
}

/// Weather line, the coming week's calendar and open reminders, each
/// fetched under its own timeout.
pub struct LiveContext {
    client: reqwest::Client,
    wttr_location: String,
    calendar_command: Option<String>,
    reminders_command: Option<String>,
}

impl LiveContext {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client: sources::http_client(),
            wttr_location: config.briefing.wttr_location.clone(),
            calendar_command: config.briefing.calendar_week_command.clone(),
            reminders_command: config.briefing.reminders_command.clone(),
        }
    }

    async fn weather(&self) -> String {
        match bounded("weather", sources::weather_line(&self.client, &self.wttr_location)).await {
            Ok(line) => format!("Weather: {line}"),
            Err(e) => {
                warn!("context weather: {e}");
                "Weather: unavailable".to_string()
            }
        }
    }

    async fn calendar(&self) -> String {
        let Some(cmd) = &self.calendar_command else {
            return "Calendar: unavailable".to_string();
        };
        match bounded("calendar", sources::run_command(cmd)).await {
            Ok(out) if out.is_empty() => "Calendar (next 7 days):\nNothing scheduled".to_string(),
            Ok(out) => format!("Calendar (next 7 days):\n{out}"),
            Err(e) => {
                warn!("context calendar: {e}");
                "Calendar: unavailable".to_string()
            }
        }
    }

    async fn reminders(&self) -> String {
        let Some(cmd) = &self.reminders_command else {
            return "Reminders: unavailable".to_string();
        };
        match bounded("reminders", sources::run_command(cmd)).await {
            Ok(out) => {
                let titles = sources::reminder_titles(&out);
                if titles.is_empty() {
                    "Reminders: None".to_string()
                } else {
                    format!("Reminders: {}", titles.join(", "))
                }
            }
            Err(e) => {
                warn!("context reminders: {e}");
                "Reminders: unavailable".to_string()
            }
        }
    }
}

async fn bounded<F: std::future::Future<Output = Result<String>>>(what: &str, fut: F) -> Result<String> {
    tokio::time::timeout(CONTEXT_TIMEOUT, fut)
        .await
        .map_err(|_| CallieError::timeout(what, CONTEXT_TIMEOUT))?
}

#[async_trait]
impl ContextSource for LiveContext {
    async fn summary(&self) -> String {
        let (weather, calendar, reminders) = tokio::join!(self.weather(), self.calendar(), self.reminders());
        [weather, calendar, reminders].join("\n")
    }
}

pub fn timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| CallieError::config(format!("unknown timezone {name:?}")))
}

/// `Friday, October 16, 8:05 AM` in `tz`.
pub fn spoken_time(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz).format("%A, %B %-d, %-I:%M %p").to_string()
}

/// System instruction for a call starting at `now`.
pub fn build_system_prompt(config: &Config, summary: &str, now: DateTime<Utc>) -> Result<String> {
    let tz = timezone(&config.call.timezone)?;
    let now = spoken_time(now, tz);
    Ok(system_prompt(&PromptContext {
        assistant_name: &config.call.assistant_name,
        user_name: &config.call.user_name,
        now: &now,
        summary,
    }))
}
