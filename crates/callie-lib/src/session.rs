//! One conversation per relay socket.
//!
//! The session owns the transcript and system instruction for a single call,
//! brokers each recognized utterance to the chat backends (primary, then
//! fallback) and streams reply fragments to the socket writer as they arrive.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use callie_core::intent::is_closing;
use callie_core::types::{RelayInbound, RelayOutbound, Transcript};
use callie_core::Result;

use crate::llm::{Backends, ChatBackend, CompletionRequest};

/// Spoken when neither backend produced a reply.
pub const APOLOGY: &str = "Sorry, I ran into an issue. Talk to you later.";

/// What the socket loop should do after a message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Continue,
    /// Close the socket now, without flushing queued output.
    Close,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub max_tokens: u32,
    /// Delay between a closing-intent reply and the end message.
    pub hangup_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_tokens: 300,
            hangup_delay: Duration::from_millis(2000),
        }
    }
}

pub struct ConversationSession {
    system: String,
    transcript: Transcript,
    backends: Backends,
    settings: SessionSettings,
    outbound: mpsc::UnboundedSender<RelayOutbound>,
    hangup: Option<JoinHandle<()>>,
}

impl ConversationSession {
    pub fn new(
        system: String,
        backends: Backends,
        settings: SessionSettings,
        outbound: mpsc::UnboundedSender<RelayOutbound>,
    ) -> Self {
        Self {
            system,
            transcript: Transcript::new(),
            backends,
            settings,
            outbound,
            hangup: None,
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn system_prompt(&self) -> &str {
        &self.system
    }

    /// Whether a closing-intent hangup is scheduled and has not fired yet.
    pub fn hangup_pending(&self) -> bool {
        self.hangup.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub async fn handle(&mut self, msg: RelayInbound) -> SessionControl {
        match msg {
            RelayInbound::Prompt { voice_prompt } => {
                self.respond(&voice_prompt).await;
                SessionControl::Continue
            }
            RelayInbound::Interrupt { utterance_until_interrupt } => {
                info!(
                    "caller interrupted after {:?}",
                    utterance_until_interrupt.as_deref().unwrap_or("")
                );
                SessionControl::Continue
            }
            RelayInbound::End => {
                info!("relay ended the call");
                self.cancel_hangup();
                SessionControl::Close
            }
            RelayInbound::Other => SessionControl::Continue,
        }
    }

    /// Answer one utterance. Blank prompts are ignored.
    pub async fn respond(&mut self, prompt: &str) {
        let text = prompt.trim();
        if text.is_empty() {
            return;
        }

        // The caller spoke again, so the previous goodbye no longer stands.
        self.cancel_hangup();

        debug!("prompt: {text}");
        self.transcript.push_user(text);

        let request = CompletionRequest {
            system: self.system.clone(),
            turns: self.transcript.turns().to_vec(),
            max_tokens: self.settings.max_tokens,
        };

        let mut reply = None;
        for backend in self.backends.in_order() {
            match self.stream_from(backend, &request).await {
                Ok(full) => {
                    info!("{} ({}) replied: {} chars", backend.name(), backend.model(), full.len());
                    reply = Some(full);
                    break;
                }
                Err(e) => warn!("{} ({}) failed: {e}", backend.name(), backend.model()),
            }
        }

        let Some(full) = reply else {
            error!("no backend produced a reply");
            self.send(RelayOutbound::token(APOLOGY));
            self.send(RelayOutbound::stream_end());
            return;
        };

        self.send(RelayOutbound::stream_end());
        let closing = is_closing(&full);
        self.transcript.push_assistant(full);

        if closing {
            self.schedule_hangup();
        }
    }

    /// Forward every fragment to the socket and return their concatenation.
    async fn stream_from(&self, backend: &dyn ChatBackend, request: &CompletionRequest) -> Result<String> {
        let mut stream = backend.stream_reply(request).await?;
        let mut full = String::new();
        while let Some(fragment) = stream.next().await {
            let fragment = fragment?;
            if fragment.is_empty() {
                continue;
            }
            full.push_str(&fragment);
            self.send(RelayOutbound::token(fragment));
        }
        Ok(full)
    }

    fn send(&self, msg: RelayOutbound) {
        // Socket already gone: the fragment is dropped.
        let _ = self.outbound.send(msg);
    }

    fn schedule_hangup(&mut self) {
        self.cancel_hangup();
        let outbound = self.outbound.clone();
        let delay = self.settings.hangup_delay;
        info!("closing intent detected, ending call in {delay:?}");
        self.hangup = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = outbound.send(RelayOutbound::End);
        }));
    }

    fn cancel_hangup(&mut self) {
        if let Some(handle) = self.hangup.take() {
            if !handle.is_finished() {
                debug!("pending hangup cancelled");
            }
            handle.abort();
        }
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.cancel_hangup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FragmentStream;
    use async_trait::async_trait;
    use callie_core::types::Role;
    use callie_core::CallieError;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    enum Script {
        Reply(Vec<&'static str>),
        /// Emit these fragments, then fail.
        FailAfter(Vec<&'static str>),
        FailToStart,
    }

    struct ScriptedBackend {
        name: &'static str,
        script: Script,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedBackend {
        fn new(name: &'static str, script: Script) -> Arc<Self> {
            Arc::new(Self {
                name,
                script,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<CompletionRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        fn name(&self) -> &str {
            self.name
        }

        fn model(&self) -> &str {
            "scripted"
        }

        async fn stream_reply(&self, request: &CompletionRequest) -> Result<FragmentStream> {
            self.seen.lock().unwrap().push(request.clone());
            let items: Vec<Result<String>> = match &self.script {
                Script::Reply(parts) => parts.iter().map(|p| Ok(p.to_string())).collect(),
                Script::FailAfter(parts) => parts
                    .iter()
                    .map(|p| Ok(p.to_string()))
                    .chain(std::iter::once(Err(CallieError::vendor(self.name, Some(500), "boom"))))
                    .collect(),
                Script::FailToStart => {
                    return Err(CallieError::vendor(self.name, Some(401), "unauthorized"));
                }
            };
            Ok(futures_util::stream::iter(items).boxed())
        }
    }

    fn session(
        primary: Arc<ScriptedBackend>,
        fallback: Arc<ScriptedBackend>,
    ) -> (ConversationSession, mpsc::UnboundedReceiver<RelayOutbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backends = Backends { primary, fallback };
        let s = ConversationSession::new("SYSTEM".into(), backends, SessionSettings::default(), tx);
        (s, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RelayOutbound>) -> Vec<RelayOutbound> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn streams_fragments_then_end_marker() {
        let primary = ScriptedBackend::new("primary", Script::Reply(vec!["It's ", "sunny."]));
        let fallback = ScriptedBackend::new("fallback", Script::Reply(vec!["unused"]));
        let (mut s, mut rx) = session(primary.clone(), fallback.clone());

        let control = s
            .handle(RelayInbound::Prompt {
                voice_prompt: "  weather?  ".into(),
            })
            .await;
        assert_eq!(control, SessionControl::Continue);

        assert_eq!(
            drain(&mut rx),
            vec![
                RelayOutbound::token("It's "),
                RelayOutbound::token("sunny."),
                RelayOutbound::stream_end(),
            ]
        );
        assert_eq!(s.transcript().len(), 2);
        assert_eq!(s.transcript().turns()[0].content, "weather?");
        assert_eq!(s.transcript().last().unwrap().content, "It's sunny.");
        assert!(fallback.calls().is_empty());
        assert!(!s.hangup_pending());
    }

    #[tokio::test]
    async fn request_carries_system_and_history() {
        let primary = ScriptedBackend::new("primary", Script::Reply(vec!["ok"]));
        let fallback = ScriptedBackend::new("fallback", Script::Reply(vec![]));
        let (mut s, _rx) = session(primary.clone(), fallback);

        s.respond("first").await;
        s.respond("second").await;

        let calls = primary.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].system, "SYSTEM");
        assert_eq!(calls[1].max_tokens, 300);
        let roles: Vec<Role> = calls[1].turns.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User]);
    }

    #[tokio::test]
    async fn midstream_failure_falls_back_with_identical_history() {
        let primary = ScriptedBackend::new("primary", Script::FailAfter(vec!["Partial "]));
        let fallback = ScriptedBackend::new("fallback", Script::Reply(vec!["From ", "fallback."]));
        let (mut s, mut rx) = session(primary.clone(), fallback.clone());

        s.respond("hello").await;

        let p = primary.calls();
        let f = fallback.calls();
        assert_eq!(p.len(), 1);
        assert_eq!(f.len(), 1);
        assert_eq!(p[0].system, f[0].system);
        assert_eq!(p[0].turns, f[0].turns);

        let out = drain(&mut rx);
        assert!(out.contains(&RelayOutbound::token("From ")));
        assert!(out.contains(&RelayOutbound::token("fallback.")));
        assert_eq!(out.last(), Some(&RelayOutbound::stream_end()));
        assert_eq!(out.iter().filter(|m| **m == RelayOutbound::stream_end()).count(), 1);

        let last = s.transcript().last().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "From fallback.");
        assert!(!last.content.contains("Partial"));
    }

    #[tokio::test]
    async fn start_failure_falls_back() {
        let primary = ScriptedBackend::new("primary", Script::FailToStart);
        let fallback = ScriptedBackend::new("fallback", Script::Reply(vec!["Hi."]));
        let (mut s, _rx) = session(primary, fallback.clone());

        s.respond("hello").await;
        assert_eq!(fallback.calls().len(), 1);
        assert_eq!(s.transcript().last().unwrap().content, "Hi.");
    }

    #[tokio::test]
    async fn double_failure_apologizes_and_keeps_session() {
        let primary = ScriptedBackend::new("primary", Script::FailToStart);
        let fallback = ScriptedBackend::new("fallback", Script::FailAfter(vec![]));
        let (mut s, mut rx) = session(primary, fallback);

        let control = s
            .handle(RelayInbound::Prompt {
                voice_prompt: "hello".into(),
            })
            .await;
        assert_eq!(control, SessionControl::Continue);
        assert_eq!(
            drain(&mut rx),
            vec![RelayOutbound::token(APOLOGY), RelayOutbound::stream_end()]
        );
        // only the user turn; no assistant turn for a failed reply
        assert_eq!(s.transcript().len(), 1);
        assert_eq!(s.transcript().last().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn blank_prompt_is_ignored() {
        let primary = ScriptedBackend::new("primary", Script::Reply(vec!["x"]));
        let fallback = ScriptedBackend::new("fallback", Script::Reply(vec!["y"]));
        let (mut s, mut rx) = session(primary.clone(), fallback);

        s.respond("   \n ").await;
        assert!(s.transcript().is_empty());
        assert!(primary.calls().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn interrupt_does_not_touch_transcript() {
        let primary = ScriptedBackend::new("primary", Script::Reply(vec!["x"]));
        let fallback = ScriptedBackend::new("fallback", Script::Reply(vec!["y"]));
        let (mut s, mut rx) = session(primary, fallback);

        let control = s
            .handle(RelayInbound::Interrupt {
                utterance_until_interrupt: Some("It's".into()),
            })
            .await;
        assert_eq!(control, SessionControl::Continue);
        assert!(s.transcript().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn end_closes() {
        let primary = ScriptedBackend::new("primary", Script::Reply(vec!["x"]));
        let fallback = ScriptedBackend::new("fallback", Script::Reply(vec!["y"]));
        let (mut s, mut rx) = session(primary, fallback);

        assert_eq!(s.handle(RelayInbound::End).await, SessionControl::Close);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn closing_reply_schedules_hangup() {
        let primary = ScriptedBackend::new("primary", Script::Reply(vec!["Sounds good, ", "have a good one!"]));
        let fallback = ScriptedBackend::new("fallback", Script::Reply(vec![]));
        let (mut s, mut rx) = session(primary, fallback);

        s.respond("that's it, thanks").await;
        assert!(s.hangup_pending());
        drain(&mut rx);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(rx.recv().await, Some(RelayOutbound::End));
    }

    #[tokio::test(start_paused = true)]
    async fn ordinary_reply_schedules_nothing() {
        let primary = ScriptedBackend::new("primary", Script::Reply(vec!["It's 12 degrees."]));
        let fallback = ScriptedBackend::new("fallback", Script::Reply(vec![]));
        let (mut s, mut rx) = session(primary, fallback);

        s.respond("weather?").await;
        assert!(!s.hangup_pending());
        drain(&mut rx);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn new_prompt_cancels_pending_hangup() {
        let primary = ScriptedBackend::new("primary", Script::Reply(vec!["Bye!"]));
        let fallback = ScriptedBackend::new("fallback", Script::Reply(vec![]));
        let (mut s, mut rx) = session(primary, fallback);

        s.respond("thanks").await;
        assert!(s.hangup_pending());

        // Caller keeps talking before the timer fires. The scripted reply is a
        // goodbye again, so a fresh timer replaces the cancelled one.
        tokio::time::sleep(Duration::from_millis(1000)).await;
        s.respond("wait, one more thing").await;
        drain(&mut rx);

        // The first timer would have fired at 2000 ms.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(drain(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(drain(&mut rx), vec![RelayOutbound::End]);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_cancels_hangup() {
        let primary = ScriptedBackend::new("primary", Script::Reply(vec!["Goodbye."]));
        let fallback = ScriptedBackend::new("fallback", Script::Reply(vec![]));
        let (mut s, mut rx) = session(primary, fallback);

        s.respond("done").await;
        drain(&mut rx);
        drop(s);

        tokio::time::sleep(Duration::from_secs(3)).await;
        // every sender is gone and nothing was sent
        assert_eq!(rx.recv().await, None);
    }
}
