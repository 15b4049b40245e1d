//! Closing-intent detection and system-instruction composition for
//! interactive calls.

use regex::Regex;
use std::sync::LazyLock;

static RE_CLOSING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(goodbye|bye|take care|have a good|that['\x{2019}]s all|end the call)\b").unwrap()
});

/// Whether an assistant reply signals the call should wrap up.
pub fn is_closing(reply: &str) -> bool {
    RE_CLOSING.is_match(reply)
}

/// Who is talking to whom, plus what the assistant knows at call start.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub assistant_name: &'a str,
    pub user_name: &'a str,
    /// Human-readable local time, e.g. "Friday, October 16, 8:05 AM".
    pub now: &'a str,
    /// Multi-line summary (weather, calendar, reminders).
    pub summary: &'a str,
}

/// Build the system instruction for one interactive call.
pub fn system_prompt(ctx: &PromptContext<'_>) -> String {
    let PromptContext {
        assistant_name,
        user_name,
        now,
        summary,
    } = ctx;

    format!(
        "You are {assistant_name}, {user_name}'s AI assistant calling them on the phone. You're smart, direct, and sharp.

Current time: {now}

{user_name}'s context:
{summary}

Rules:
- This is a PHONE CALL. Keep responses SHORT and conversational. 1-3 sentences max.
- Start the call by delivering the morning briefing concisely, then ask if they have questions.
- Answer anything they ask: weather follow-up, news, tasks, whatever.
- No markdown, no bullet points. Just natural speech.
- When {user_name} says goodbye/thanks/done, wrap up and end the call."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_closing_phrases() {
        assert!(is_closing("Sounds good, have a good one!"));
        assert!(is_closing("Goodbye, Josh."));
        assert!(is_closing("OK, bye"));
        assert!(is_closing("Take care out there."));
        assert!(is_closing("That's all for now."));
        assert!(is_closing("That\u{2019}s all for now."));
        assert!(is_closing("I'll END THE CALL now."));
    }

    #[test]
    fn ignores_ordinary_replies() {
        assert!(!is_closing("It's 12 degrees and cloudy."));
        assert!(!is_closing("Your next meeting is at ten."));
        // word boundary: "bye" inside another word does not count
        assert!(!is_closing("Check the byelaws first."));
    }

    #[test]
    fn prompt_embeds_context() {
        let p = system_prompt(&PromptContext {
            assistant_name: "Callie",
            user_name: "Josh",
            now: "Friday, October 16, 8:05 AM",
            summary: "Weather: sunny",
        });
        assert!(p.starts_with("You are Callie, Josh's AI assistant"));
        assert!(p.contains("Current time: Friday, October 16, 8:05 AM"));
        assert!(p.contains("Josh's context:\nWeather: sunny"));
    }
}
