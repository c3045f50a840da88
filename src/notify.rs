//! Delivery of two-factor confirmation tokens.
//!
//! Mail delivery lives outside this service; the default notifier hands the
//! confirmation to the log so an operator or a mail relay tailing it can
//! forward it.

use std::sync::Mutex;

use crate::store::Channel;

pub trait ConfirmationNotifier: Send + Sync {
    fn notify(&self, channel: &Channel, token: &str, summary: &str);
}

pub struct LogNotifier;

impl ConfirmationNotifier for LogNotifier {
    fn notify(&self, channel: &Channel, token: &str, summary: &str) {
        tracing::info!(
            target: "confirmation",
            channel = %channel.name,
            email = ?channel.email,
            token,
            summary,
            "confirmation required"
        );
    }
}

/// A confirmation captured by [`RecordingNotifier`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sent {
    pub channel: String,
    pub token: String,
    pub summary: String,
}

/// Keeps confirmations in memory; used by tests and local setups.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_token(&self) -> Option<String> {
        self.sent().last().map(|s| s.token.clone())
    }
}

impl ConfirmationNotifier for RecordingNotifier {
    fn notify(&self, channel: &Channel, token: &str, summary: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(Sent {
                channel: channel.name.clone(),
                token: token.to_string(),
                summary: summary.to_string(),
            });
        }
    }
}
