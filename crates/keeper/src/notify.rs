//! User-visible notifications.
//!
//! Raised by the orchestrator exactly once per transition into a terminal
//! credential error; the dedup latch lives in the orchestrator, not here.
//! Embedders plug in their own surface (desktop notification, message bus);
//! the default just logs.

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// No credentials are stored, or the stored blob cannot be decrypted.
    CredentialsMissing,
    /// The portal explicitly rejected the stored credentials.
    CredentialsRejected,
}

impl Notification {
    pub fn message(&self) -> &'static str {
        match self {
            Self::CredentialsMissing => {
                "No portal credentials configured. Run `set-credentials` to store them."
            }
            Self::CredentialsRejected => {
                "The portal rejected your credentials. Update your username and password."
            }
        }
    }
}

pub trait Notify: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Default notifier: a structured warning in the log stream.
pub struct LogNotifier;

impl Notify for LogNotifier {
    fn notify(&self, notification: Notification) {
        warn!(kind = ?notification, "{}", notification.message());
    }
}
