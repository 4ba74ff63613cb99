//! Progress reporting for flashing runs.
//!
//! The flasher sends [`ProgressEvent`]s through a channel created with
//! [`channel`]. The receiving side is an iterator, so a UI thread can simply
//! loop over it until the run ends:
//!
//! ```rust,no_run
//! let (tx, rx) = romflash::progress::channel();
//! # drop(tx);
//! for event in rx {
//!     println!("{:?} {}% {}", event.stage, event.percent, event.message);
//! }
//! ```

use {
    crate::error::{Error, FailureKind},
    log::trace,
    std::{fmt, sync::mpsc},
};

/// Stage of a flashing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Stage {
    /// Port open.
    Connecting,
    /// Target region being erased by FlashBegin.
    Erasing,
    /// Blocks being written.
    Writing,
    /// FlashEnd being confirmed.
    Verifying,
    /// Run finished.
    Complete,
    /// Run aborted.
    Failed(FailureKind),
}

impl Stage {
    /// Whether no further events follow this one.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Erasing => write!(f, "Erasing"),
            Self::Writing => write!(f, "Writing"),
            Self::Verifying => write!(f, "Verifying"),
            Self::Complete => write!(f, "Complete"),
            Self::Failed(kind) => write!(f, "Failed ({kind})"),
        }
    }
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProgressEvent {
    /// Current stage.
    pub stage: Stage,
    /// Percent complete within the stage, 0 to 100.
    pub percent: u8,
    /// Human-readable detail.
    pub message: String,
}

impl ProgressEvent {
    /// Create an event; `percent` is clamped to 100.
    pub fn new(stage: Stage, percent: u8, message: impl Into<String>) -> Self {
        Self {
            stage,
            percent: percent.min(100),
            message: message.into(),
        }
    }

    /// Terminal failure event for `err`.
    pub fn failed(err: &Error) -> Self {
        Self::new(Stage::Failed(err.kind()), 0, err.to_string())
    }

    /// Write progress after `written` of `total` bytes.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn writing(written: usize, total: usize) -> Self {
        let percent = if total == 0 {
            100
        } else {
            ((written as f64 / total as f64) * 100.0).round() as u8
        };
        Self::new(Stage::Writing, percent, format!("{written}/{total} bytes"))
    }
}

/// Create a progress channel.
pub fn channel() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::channel();
    (ProgressSender { tx }, ProgressReceiver { rx })
}

/// Sending half of a progress channel.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSender {
    /// Send an event. A dropped receiver is not an error; the event is discarded.
    pub fn send(&self, event: ProgressEvent) {
        trace!("Progress: {} {}% {}", event.stage, event.percent, event.message);
        let _ = self
            .tx
            .send(event);
    }
}

/// Receiving half of a progress channel.
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl ProgressReceiver {
    /// Block until the next event, or `None` once every sender is gone.
    pub fn recv(&self) -> Option<ProgressEvent> {
        self.rx
            .recv()
            .ok()
    }

    /// Take the next event if one is queued.
    pub fn try_recv(&self) -> Option<ProgressEvent> {
        self.rx
            .try_recv()
            .ok()
    }

    /// Drain every queued event without blocking.
    pub fn drain(&self) -> Vec<ProgressEvent> {
        self.rx
            .try_iter()
            .collect()
    }
}

impl Iterator for ProgressReceiver {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writing_percent_rounds() {
        assert_eq!(ProgressEvent::writing(1024, 2048).percent, 50);
        assert_eq!(ProgressEvent::writing(1024, 3000).percent, 34);
        assert_eq!(ProgressEvent::writing(2048, 3000).percent, 68);
        assert_eq!(ProgressEvent::writing(3000, 3000).percent, 100);
    }

    #[test]
    fn test_percent_is_clamped() {
        assert_eq!(ProgressEvent::new(Stage::Writing, 250, "").percent, 100);
    }

    #[test]
    fn test_failed_event_carries_kind() {
        let event = ProgressEvent::failed(&Error::Cancelled);
        assert_eq!(event.stage, Stage::Failed(FailureKind::Cancelled));
        assert!(event.stage.is_terminal());
        assert_eq!(event.message, "Cancelled");
    }

    #[test]
    fn test_send_without_receiver_is_ignored() {
        let (tx, rx) = channel();
        drop(rx);
        tx.send(ProgressEvent::new(Stage::Connecting, 100, "ignored"));
    }

    #[test]
    fn test_receiver_ends_when_senders_drop() {
        let (tx, rx) = channel();
        tx.send(ProgressEvent::new(Stage::Connecting, 100, "a"));
        tx.send(ProgressEvent::new(Stage::Complete, 100, "b"));
        drop(tx);
        let stages: Vec<_> = rx.map(|e| e.stage).collect();
        assert_eq!(stages, vec![Stage::Connecting, Stage::Complete]);
    }
}
