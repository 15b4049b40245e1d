//! Configuration loading from an optional TOML file plus environment
//! overrides.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use url::Url;

use callie_core::speech::{safe_voice, DEFAULT_MAX_CHUNK_LEN};
use callie_core::{CallieError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub twilio: TwilioConfig,
    pub call: CallConfig,
    pub llm: LlmConfig,
    pub briefing: BriefingConfig,
    pub schedule: ScheduleConfig,
    pub notify: NotifyConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Publicly reachable base URL (e.g. an ngrok tunnel) for vendor webhooks.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5050,
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    /// Caller ID for outbound calls.
    pub phone_number: Option<String>,
    pub status_callback: Option<String>,
    pub api_base: String,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            auth_token: None,
            phone_number: None,
            status_callback: None,
            api_base: "https://api.twilio.com".into(),
        }
    }
}

/// Twilio settings with every required field present.
#[derive(Debug, Clone)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    pub from: String,
    pub to: String,
    pub status_callback: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Default callee.
    pub to: Option<String>,
    /// Voice for announcement calls.
    pub voice: String,
    /// Voice for the conversation relay.
    pub relay_voice: String,
    pub transcription_provider: String,
    pub assistant_name: String,
    pub user_name: String,
    /// IANA timezone for the time embedded in prompts and briefings.
    pub timezone: String,
    pub chunk_len: usize,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            to: None,
            voice: callie_core::speech::DEFAULT_VOICE.into(),
            relay_voice: "en-US-Neural2-F".into(),
            transcription_provider: "google".into(),
            assistant_name: "Callie".into(),
            user_name: "Joshua".into(),
            timezone: "America/Vancouver".into(),
            chunk_len: DEFAULT_MAX_CHUNK_LEN,
        }
    }
}

/// One OpenAI-compatible chat endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub primary: BackendConfig,
    pub fallback: BackendConfig,
    pub max_tokens: u32,
    /// Delay between a closing-intent reply and hanging up.
    pub hangup_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: BackendConfig {
                base_url: "https://api.openai.com/v1".into(),
                api_key: None,
                model: "gpt-5.3-codex".into(),
            },
            fallback: BackendConfig {
                base_url: "http://localhost:11434/v1".into(),
                api_key: Some("ollama".into()),
                model: "qwen2.5:3b".into(),
            },
            max_tokens: 300,
            hangup_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BriefingConfig {
    pub city: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Short weather line for call context (wttr.in location slug).
    pub wttr_location: String,
    pub calendar_command: Option<String>,
    pub calendar_week_command: Option<String>,
    pub reminders_command: Option<String>,
    pub news_command: Option<String>,
    pub portfolio_path: Option<PathBuf>,
    pub action_items_path: Option<PathBuf>,
}

impl Default for BriefingConfig {
    fn default() -> Self {
        Self {
            city: "Brookswood".into(),
            latitude: 49.0520,
            longitude: -122.6340,
            wttr_location: "Brookswood+Langley+BC".into(),
            calendar_command: Some(
                r#"icalBuddy -n -nc -iep "title,datetime" -b "" eventsToday+2 2>/dev/null | head -5"#.into(),
            ),
            calendar_week_command: Some(
                "icalBuddy -n -nc -iep 'title,datetime' eventsToday+7 2>/dev/null".into(),
            ),
            reminders_command: Some("remindctl all --plain 2>/dev/null".into()),
            news_command: None,
            portfolio_path: None,
            action_items_path: Some("data/reminders.json".into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub hour: u32,
    pub minute: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { hour: 8, minute: 0 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Command line for the failure notifier; the message is appended as
    /// the final argument.
    pub command: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `callie_lib=debug,info`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl Config {
    /// Load from `path` (if given and present) and apply process env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.is_file() => Self::from_toml(
                &std::fs::read_to_string(p)
                    .map_err(|e| CallieError::config(format!("failed to read {}: {e}", p.display())))?,
            )?,
            Some(p) => return Err(CallieError::config(format!("config file not found: {}", p.display()))),
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| CallieError::config(format!("failed to parse config: {e}")))
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        let set = |slot: &mut Option<String>, key: &str| {
            if let Some(v) = env(key).filter(|v| !v.is_empty()) {
                *slot = Some(v);
            }
        };

        set(&mut self.twilio.account_sid, "TWILIO_ACCOUNT_SID");
        set(&mut self.twilio.auth_token, "TWILIO_AUTH_TOKEN");
        set(&mut self.twilio.phone_number, "TWILIO_PHONE_NUMBER");
        set(&mut self.twilio.status_callback, "STATUS_CALLBACK");
        set(&mut self.call.to, "YOUR_PHONE");
        set(&mut self.server.public_url, "PUBLIC_URL");
        set(&mut self.llm.primary.api_key, "OPENAI_API_KEY");
        set(&mut self.llm.fallback.api_key, "OLLAMA_API_KEY");
        set(&mut self.notify.command, "NOTIFY_COMMAND");

        if let Some(v) = env("HOST") {
            self.server.host = v;
        }
        if let Some(port) = env("PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(v) = env("VOICE") {
            self.call.voice = v;
        }
        if let Some(v) = env("OPENAI_BASE_URL") {
            self.llm.primary.base_url = v;
        }
        if let Some(v) = env("CODEX_MODEL") {
            self.llm.primary.model = v;
        }
        if let Some(v) = env("OLLAMA_BASE_URL") {
            self.llm.fallback.base_url = v;
        }
        if let Some(v) = env("OLLAMA_MODEL") {
            self.llm.fallback.model = v;
        }
        if let Some(v) = env("CALLIE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("CALLIE_LOG_JSON") {
            self.logging.json = v == "true" || v == "1";
        }
        if let Some(h) = env("SCHEDULE_HOUR").and_then(|v| v.parse().ok()) {
            self.schedule.hour = h;
        }
        if let Some(m) = env("SCHEDULE_MINUTE").and_then(|v| v.parse().ok()) {
            self.schedule.minute = m;
        }
    }

    /// Credentials and numbers needed to place a call. Fails before any
    /// network traffic when something is missing.
    pub fn twilio(&self) -> Result<TwilioCredentials> {
        let need = |v: &Option<String>, name: &str| {
            v.clone()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| CallieError::config(format!("{name} not set")))
        };
        Ok(TwilioCredentials {
            account_sid: need(&self.twilio.account_sid, "TWILIO_ACCOUNT_SID")?,
            auth_token: need(&self.twilio.auth_token, "TWILIO_AUTH_TOKEN")?,
            from: need(&self.twilio.phone_number, "TWILIO_PHONE_NUMBER")?,
            to: need(&self.call.to, "YOUR_PHONE")?,
            status_callback: self.twilio.status_callback.clone(),
            api_base: self.twilio.api_base.clone(),
        })
    }

    pub fn public_url(&self) -> Result<&str> {
        self.server
            .public_url
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CallieError::config("PUBLIC_URL not set; expose the server first (e.g. `ngrok http 5050`)"))
    }

    /// Relay socket URL derived from the public URL.
    pub fn relay_ws_url(&self) -> Result<String> {
        to_ws_url(self.public_url()?)
    }

    /// Webhook the vendor fetches when an interactive call connects.
    pub fn outbound_call_webhook(&self) -> Result<String> {
        Ok(format!("{}/outbound-call", self.public_url()?.trim_end_matches('/')))
    }

    /// Announcement voice, sanitized.
    pub fn voice(&self) -> String {
        safe_voice(Some(&self.call.voice))
    }
}

/// Rewrite an http(s) base URL to the ws(s) relay endpoint at `/ws`, with
/// query and fragment removed.
pub fn to_ws_url(public_url: &str) -> Result<String> {
    let mut url =
        Url::parse(public_url).map_err(|e| CallieError::config(format!("PUBLIC_URL is invalid: {e}")))?;
    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => return Err(CallieError::config(format!("PUBLIC_URL has unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| CallieError::config("PUBLIC_URL is invalid"))?;
    url.set_path("/ws");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}
