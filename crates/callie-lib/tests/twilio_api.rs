//! Telephony client against a local stand-in for the calls API.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde_json::json;

use callie_lib::callie_core::types::{AnsweredBy, CallStatus};
use callie_lib::callie_core::ErrorKind;
use callie_lib::config::Config;
use callie_lib::telephony::{CallInstructions, CallRequest, Caller, TwilioClient};

#[derive(Clone, Default)]
struct Mock {
    /// Statuses handed out by successive fetches; the last one repeats.
    statuses: Arc<Mutex<VecDeque<&'static str>>>,
    forms: Arc<Mutex<Vec<Vec<(String, String)>>>>,
    reject: bool,
}

async fn create(State(mock): State<Mock>, headers: HeaderMap, Form(form): Form<Vec<(String, String)>>) -> Response {
    if !headers.contains_key("authorization") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    mock.forms.lock().unwrap().push(form);
    if mock.reject {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": 21211, "message": "The 'To' number is not a valid phone number.", "status": 400})),
        )
            .into_response();
    }
    (
        StatusCode::CREATED,
        Json(json!({"sid": "CA0001", "status": "queued", "direction": "outbound-api", "from": "+15550001", "to": "+15550002", "duration": null})),
    )
        .into_response()
}

async fn fetch(State(mock): State<Mock>, Path((_account, file)): Path<(String, String)>) -> Response {
    let sid = file.trim_end_matches(".json").to_string();
    let status = {
        let mut statuses = mock.statuses.lock().unwrap();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap()
        } else {
            statuses.front().copied().unwrap_or("queued")
        }
    };
    let ended = status == "completed";
    let duration = ended.then_some("42");
    let answered_by = ended.then_some("human");
    Json(json!({
        "sid": sid,
        "status": status,
        "direction": "outbound-api",
        "duration": duration,
        "answered_by": answered_by,
    }))
    .into_response()
}

async fn start(mock: Mock) -> String {
    let app = Router::new()
        .route("/2010-04-01/Accounts/{account}/Calls.json", post(create))
        .route("/2010-04-01/Accounts/{account}/Calls/{file}", get(fetch))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn mock_with(statuses: &[&'static str]) -> Mock {
    Mock {
        statuses: Arc::new(Mutex::new(statuses.iter().copied().collect())),
        ..Default::default()
    }
}

fn value<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
    form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

#[tokio::test]
async fn place_call_posts_form_and_returns_record() {
    let mock = mock_with(&[]);
    let base = start(mock.clone()).await;
    let client = TwilioClient::new(&base, "AC123", "secret");

    let record = client
        .place_call(&CallRequest {
            from: "+15550001".into(),
            to: "+15550002".into(),
            instructions: CallInstructions::Webhook("https://abc.ngrok.app/outbound-call".into()),
            status_callback: None,
        })
        .await
        .unwrap();
    assert_eq!(record.sid, "CA0001");
    assert_eq!(record.status, CallStatus::Queued);
    assert_eq!(record.duration, None);

    let forms = mock.forms.lock().unwrap();
    let form = &forms[0];
    assert_eq!(value(form, "To"), Some("+15550002"));
    assert_eq!(value(form, "Url"), Some("https://abc.ngrok.app/outbound-call"));
    assert_eq!(value(form, "MachineDetection"), Some("Enable"));
    assert_eq!(value(form, "StatusCallback"), None);
}

#[tokio::test]
async fn vendor_error_carries_code_and_message() {
    let mock = Mock {
        reject: true,
        ..Default::default()
    };
    let base = start(mock).await;
    let client = TwilioClient::new(&base, "AC123", "secret");

    let err = client
        .place_call(&CallRequest {
            from: "+15550001".into(),
            to: "12".into(),
            instructions: CallInstructions::Inline("<Response/>".into()),
            status_callback: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Vendor);
    let text = err.to_string();
    assert!(text.contains("21211"), "{text}");
    assert!(text.contains("not a valid phone number"), "{text}");
}

#[tokio::test]
async fn polls_until_terminal_recording_changes() {
    let base = start(mock_with(&["queued", "ringing", "ringing", "in-progress", "completed"])).await;
    let client = TwilioClient::new(&base, "AC123", "secret");

    let report = client
        .wait_for_completion("CA0001", Duration::from_secs(10), Duration::from_millis(1))
        .await
        .unwrap();
    assert!(!report.timed_out);
    let statuses: Vec<CallStatus> = report.timeline.iter().map(|p| p.status).collect();
    assert_eq!(
        statuses,
        vec![CallStatus::Queued, CallStatus::Ringing, CallStatus::InProgress, CallStatus::Completed]
    );
    assert_eq!(report.final_call.duration, Some(42));
    assert_eq!(report.final_call.answered_by, AnsweredBy::Human);
}

#[tokio::test]
async fn poll_timeout_fetches_once_more() {
    let base = start(mock_with(&["ringing"])).await;
    let client = TwilioClient::new(&base, "AC123", "secret");

    let report = client
        .wait_for_completion("CA0001", Duration::from_millis(40), Duration::from_millis(10))
        .await
        .unwrap();
    assert!(report.timed_out);
    assert_eq!(report.timeline.len(), 1);
    assert_eq!(report.final_call.status, CallStatus::Ringing);
}

#[tokio::test]
async fn briefing_call_sends_inline_speech_with_callbacks() {
    let mock = mock_with(&[]);
    let base = start(mock.clone()).await;

    let mut config = Config::default();
    config.twilio.account_sid = Some("AC123".into());
    config.twilio.auth_token = Some("secret".into());
    config.twilio.phone_number = Some("+15550001".into());
    config.twilio.status_callback = Some("https://hooks.example.com/status".into());
    config.twilio.api_base = base;
    config.call.to = Some("+15550002".into());

    let caller = Caller::from_config(&config).unwrap();
    caller
        .call_with_briefing("Good morning.\nWeather: Sunny & 18°C", None)
        .await
        .unwrap();

    let forms = mock.forms.lock().unwrap();
    let form = &forms[0];
    let twiml = value(form, "Twiml").unwrap();
    assert!(twiml.contains("<Say"));
    assert!(twiml.contains("&amp;"));
    assert_eq!(value(form, "StatusCallback"), Some("https://hooks.example.com/status"));
    let events: Vec<&str> = form
        .iter()
        .filter(|(k, _)| k == "StatusCallbackEvent")
        .map(|(_, v)| v.as_str())
        .collect();
    assert_eq!(events, vec!["initiated", "ringing", "answered", "completed"]);
}

#[tokio::test]
async fn blank_custom_text_is_rejected_before_sending() {
    let mock = mock_with(&[]);
    let base = start(mock.clone()).await;

    let mut config = Config::default();
    config.twilio.account_sid = Some("AC123".into());
    config.twilio.auth_token = Some("secret".into());
    config.twilio.phone_number = Some("+15550001".into());
    config.twilio.api_base = base;
    config.call.to = Some("+15550002".into());

    let caller = Caller::from_config(&config).unwrap();
    let err = caller.call_with_text("   ", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(mock.forms.lock().unwrap().is_empty());
}
