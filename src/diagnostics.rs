use chrono::{DateTime, Local};
use serde::Serialize;

use crate::core::truncate_message;

const MAX_ERROR_CHARS: usize = 300;

/// Health of the polling loop, as reported to the options page.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollDiagnostics {
    pub running: bool,
    pub interval_seconds: u64,
    pub epoch: u64,
    pub last_check_at: Option<DateTime<Local>>,
    pub stale_for_seconds: Option<u64>,
    pub last_error: Option<String>,
    pub ticks: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
}

impl PollDiagnostics {
    pub(crate) fn record_success(&mut self, at: DateTime<Local>) {
        self.ticks += 1;
        self.last_check_at = Some(at);
        self.last_error = None;
        self.consecutive_failures = 0;
    }

    pub(crate) fn record_failure(&mut self, error: &str) {
        self.ticks += 1;
        self.failures += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(truncate_message(error, MAX_ERROR_CHARS));
    }

    /// Copy with `stale_for_seconds` filled in relative to `now`.
    pub fn snapshot(&self, now: DateTime<Local>) -> Self {
        let stale_for_seconds = self
            .last_check_at
            .map(|last| now.signed_duration_since(last).num_seconds().max(0) as u64);
        Self {
            stale_for_seconds,
            ..self.clone()
        }
    }
}
