//! Transient user notifications.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Visual weight of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Neutral,
    Error,
}

/// A transient notification for the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
    /// Whether the notification dismisses itself.
    pub autohide: bool,
}

impl Toast {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Success,
            message: message.into(),
            autohide: true,
        }
    }

    pub fn neutral(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Neutral,
            message: message.into(),
            autohide: true,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Error,
            message: message.into(),
            autohide: true,
        }
    }

    /// Keeps the notification up until dismissed.
    pub fn sticky(mut self) -> Self {
        self.autohide = false;
        self
    }
}

/// Sink for user notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, toast: Toast) {
        match toast.kind {
            ToastKind::Error => tracing::warn!(message = %toast.message, "notification"),
            _ => tracing::info!(message = %toast.message, "notification"),
        }
    }
}

/// Fans notifications out to every receiver obtained from
/// [`BroadcastNotifier::subscribe`]. Notifications sent while nobody
/// listens are logged and dropped.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Toast>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Toast> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, toast: Toast) {
        if let Err(broadcast::error::SendError(toast)) = self.tx.send(toast) {
            LogNotifier.notify(toast);
        }
    }
}
