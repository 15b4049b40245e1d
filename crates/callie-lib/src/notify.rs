//! Best-effort failure notification through an external messaging command.

use std::time::Duration;

use tracing::{error, info};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the configured command with the message appended as its final
/// argument. Never fails; problems are logged.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    command: Option<String>,
}

impl Notifier {
    pub fn new(command: Option<String>) -> Self {
        Self {
            command: command.filter(|c| !c.trim().is_empty()),
        }
    }

    pub async fn notify(&self, message: &str) {
        let Some(command) = &self.command else {
            info!("no notifier configured, dropping: {message}");
            return;
        };
        let mut parts = command.split_whitespace();
        let Some(program) = parts.next() else {
            return;
        };
        let child = tokio::process::Command::new(program)
            .args(parts)
            .arg(message)
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(NOTIFY_TIMEOUT, child).await {
            Ok(Ok(out)) if out.status.success() => info!("failure notification sent"),
            Ok(Ok(out)) => error!(
                "notification command exited with {}: {}",
                out.status,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Ok(Err(e)) => error!("notification command failed to start: {e}"),
            Err(_) => error!("notification command timed out after {NOTIFY_TIMEOUT:?}"),
        }
    }

    /// Notify that a scheduled or requested call could not be placed.
    pub async fn call_failed(&self, err: &callie_core::CallieError) {
        self.notify(&format!("Callie failed to call: {err}")).await;
    }
}
