//! Twilio REST client: place calls, poll their status, and the call flows
//! built on top (briefing announcement, custom text, test, interactive).

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};

use callie_core::speech::{chunk_text, escape_markup, say_document, to_speech_markup};
use callie_core::types::{AnsweredBy, CallRecord, CallStatus, TimelinePoint};
use callie_core::{CallieError, Result};

use crate::config::{Config, TwilioCredentials};

const SERVICE: &str = "twilio";
const STATUS_EVENTS: [&str; 4] = ["initiated", "ringing", "answered", "completed"];
pub const TEST_MESSAGE: &str = "Hello! This is Callie, your daily briefing assistant. This is a test call. Everything is working.";

/// Where the call gets its instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallInstructions {
    /// Instruction document sent with the request.
    Inline(String),
    /// URL the vendor POSTs to when the call connects.
    Webhook(String),
}

#[derive(Debug, Clone)]
pub struct CallRequest {
    pub from: String,
    pub to: String,
    pub instructions: CallInstructions,
    /// Receives lifecycle events and async machine-detection results.
    pub status_callback: Option<String>,
}

impl CallRequest {
    /// Form fields for the create-call endpoint. `StatusCallbackEvent` repeats.
    fn form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![("From", self.from.clone()), ("To", self.to.clone())];
        match &self.instructions {
            CallInstructions::Inline(doc) => form.push(("Twiml", doc.clone())),
            CallInstructions::Webhook(url) => {
                form.push(("Url", url.clone()));
                form.push(("Method", "POST".into()));
            }
        }
        form.push(("MachineDetection", "Enable".into()));
        form.push(("AsyncAmd", "true".into()));
        if let Some(cb) = &self.status_callback {
            form.push(("AsyncAmdStatusCallback", cb.clone()));
            form.push(("StatusCallback", cb.clone()));
            for event in STATUS_EVENTS {
                form.push(("StatusCallbackEvent", event.into()));
            }
        }
        form
    }
}

/// Call resource as the API returns it.
#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
    status: CallStatus,
    #[serde(default)]
    direction: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Option<String>,
    /// Seconds, sent as a string once the call ends.
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    answered_by: Option<String>,
}

impl From<CallResource> for CallRecord {
    fn from(r: CallResource) -> Self {
        CallRecord {
            sid: r.sid,
            status: r.status,
            direction: r.direction,
            from: r.from,
            to: r.to,
            duration: r.duration.and_then(|d| d.parse().ok()),
            answered_by: AnsweredBy::from_vendor(r.answered_by.as_deref()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: Option<u32>,
    #[serde(default)]
    message: Option<String>,
}

/// Result of polling a call until it ends.
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub final_call: CallRecord,
    /// One point per observed status change.
    pub timeline: Vec<TimelinePoint>,
    pub timed_out: bool,
}

#[derive(Clone)]
pub struct TwilioClient {
    http: reqwest::Client,
    api_base: String,
    account_sid: String,
    auth_token: String,
}

impl TwilioClient {
    pub fn new(api_base: &str, account_sid: &str, auth_token: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            account_sid: account_sid.to_string(),
            auth_token: auth_token.to_string(),
        }
    }

    fn calls_url(&self) -> String {
        format!("{}/2010-04-01/Accounts/{}/Calls", self.api_base, self.account_sid)
    }

    pub async fn place_call(&self, request: &CallRequest) -> Result<CallRecord> {
        let url = format!("{}.json", self.calls_url());
        debug!("POST {url} to={}", request.to);
        let resp = self
            .http
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&request.form())
            .send()
            .await
            .map_err(|e| CallieError::transport(SERVICE, e))?;
        let record: CallRecord = parse_response::<CallResource>(resp).await?.into();
        info!("call initiated: {} ({} -> {})", record.sid, request.from, request.to);
        Ok(record)
    }

    pub async fn fetch_call(&self, sid: &str) -> Result<CallRecord> {
        let url = format!("{}/{sid}.json", self.calls_url());
        let resp = self
            .http
            .get(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| CallieError::transport(SERVICE, e))?;
        Ok(parse_response::<CallResource>(resp).await?.into())
    }

    /// Poll every `interval` until the call reaches a terminal status or
    /// `timeout` elapses; on timeout the status is fetched once more.
    pub async fn wait_for_completion(
        &self,
        sid: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<CompletionReport> {
        let started = tokio::time::Instant::now();
        let mut timeline: Vec<TimelinePoint> = Vec::new();

        while started.elapsed() < timeout {
            let call = self.fetch_call(sid).await?;
            if timeline.last().map(|p| p.status) != Some(call.status) {
                let point = TimelinePoint {
                    at: Utc::now(),
                    status: call.status,
                    duration: call.duration,
                    answered_by: call.answered_by,
                };
                info!(
                    "[status] {} -> {} (duration={}, answered_by={:?})",
                    point.at.to_rfc3339(),
                    point.status,
                    point.duration.map(|d| format!("{d}s")).unwrap_or_else(|| "n/a".into()),
                    point.answered_by,
                );
                timeline.push(point);
            }
            if call.status.is_terminal() {
                return Ok(CompletionReport {
                    final_call: call,
                    timeline,
                    timed_out: false,
                });
            }
            tokio::time::sleep(interval).await;
        }

        let final_call = self.fetch_call(sid).await?;
        Ok(CompletionReport {
            final_call,
            timeline,
            timed_out: true,
        })
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    let body = resp.text().await.map_err(|e| CallieError::transport(SERVICE, e))?;
    if !status.is_success() {
        let message = serde_json::from_str::<ApiError>(&body)
            .ok()
            .and_then(|e| match (e.code, e.message) {
                (Some(code), Some(msg)) => Some(format!("{msg} (code {code})")),
                (None, Some(msg)) => Some(msg),
                _ => None,
            })
            .unwrap_or(body);
        return Err(CallieError::vendor(SERVICE, Some(status.as_u16()), message));
    }
    serde_json::from_str(&body)
        .map_err(|e| CallieError::vendor(SERVICE, Some(status.as_u16()), format!("bad response: {e}")))
}

/// Announcement document for briefing text: newlines become spoken pauses.
pub fn briefing_document(text: &str, voice: &str, chunk_len: usize) -> (String, usize) {
    let chunks = chunk_text(&to_speech_markup(text), chunk_len);
    (say_document(&chunks, voice), chunks.len())
}

/// Announcement document for arbitrary text; escaped but otherwise verbatim.
pub fn text_document(text: &str, voice: &str, chunk_len: usize) -> (String, usize) {
    let chunks = chunk_text(&escape_markup(text), chunk_len);
    (say_document(&chunks, voice), chunks.len())
}

/// Places calls using configured credentials and voice.
pub struct Caller {
    client: TwilioClient,
    creds: TwilioCredentials,
    voice: String,
    chunk_len: usize,
}

impl Caller {
    /// Fails with a config error, before any request, when credentials or
    /// numbers are missing.
    pub fn from_config(config: &Config) -> Result<Self> {
        let creds = config.twilio()?;
        Ok(Self {
            client: TwilioClient::new(&creds.api_base, &creds.account_sid, &creds.auth_token),
            creds,
            voice: config.voice(),
            chunk_len: config.call.chunk_len,
        })
    }

    pub fn client(&self) -> &TwilioClient {
        &self.client
    }

    fn request(&self, to: Option<&str>, instructions: CallInstructions, status_callback: bool) -> CallRequest {
        CallRequest {
            from: self.creds.from.clone(),
            to: to.unwrap_or(&self.creds.to).to_string(),
            instructions,
            status_callback: if status_callback { self.creds.status_callback.clone() } else { None },
        }
    }

    pub async fn call_with_briefing(&self, briefing: &str, to: Option<&str>) -> Result<CallRecord> {
        let (doc, chunks) = briefing_document(briefing, &self.voice, self.chunk_len);
        debug!("briefing document: {chunks} chunk(s), {} chars", doc.len());
        let record = self
            .client
            .place_call(&self.request(to, CallInstructions::Inline(doc), true))
            .await?;
        info!("voice: {} | AMD: enabled", self.voice);
        Ok(record)
    }

    pub async fn call_with_text(&self, text: &str, to: Option<&str>) -> Result<CallRecord> {
        if text.trim().is_empty() {
            return Err(CallieError::validation("nothing to say"));
        }
        let (doc, chunks) = text_document(text, &self.voice, self.chunk_len);
        let record = self
            .client
            .place_call(&self.request(to, CallInstructions::Inline(doc), false))
            .await?;
        info!(
            "voice: {} | text length: {} chars, {chunks} chunk(s)",
            self.voice,
            text.chars().count()
        );
        Ok(record)
    }

    pub async fn test_call(&self, to: Option<&str>) -> Result<CallRecord> {
        self.call_with_text(TEST_MESSAGE, to).await
    }

    /// Hand the call to the relay server behind `webhook`.
    pub async fn call_interactive(&self, webhook: &str, to: Option<&str>) -> Result<CallRecord> {
        info!("starting interactive call via {webhook}");
        self.client
            .place_call(&self.request(to, CallInstructions::Webhook(webhook.to_string()), false))
            .await
    }
}
