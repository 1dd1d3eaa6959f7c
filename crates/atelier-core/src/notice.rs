//! User-visible error notices
//!
//! Recoverable errors become toasts that expire on their own; unrecoverable
//! ones become a blocking panel that stays until the user retries.

use serde::{Deserialize, Serialize};

use crate::error::ArError;

/// How long a toast stays up
pub const TOAST_DURATION_MS: f64 = 5_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    /// Dismissible, auto-expiring, non-modal
    Toast,
    /// Full panel with a retry action
    Blocking,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub error: ArError,
    pub raised_at_ms: f64,
}

impl Notice {
    pub fn expires_at_ms(&self) -> Option<f64> {
        match self.kind {
            NoticeKind::Toast => Some(self.raised_at_ms + TOAST_DURATION_MS),
            NoticeKind::Blocking => None,
        }
    }

    pub fn retry_available(&self) -> bool {
        self.kind == NoticeKind::Blocking
    }

    /// Text shown to the user
    pub fn text(&self) -> String {
        match &self.error.suggested_action {
            Some(action) => format!("{}. {}", self.error.message, action),
            None => self.error.message.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NoticeBoard {
    notices: Vec<Notice>,
    next_id: u64,
}

impl NoticeBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: NoticeKind, error: ArError, now_ms: f64) -> u64 {
        self.next_id += 1;
        self.notices.push(Notice {
            id: self.next_id,
            kind,
            error,
            raised_at_ms: now_ms,
        });
        self.next_id
    }

    pub fn toast(&mut self, error: ArError, now_ms: f64) -> u64 {
        self.push(NoticeKind::Toast, error, now_ms)
    }

    /// Raise the blocking panel, replacing any previous one
    pub fn block(&mut self, error: ArError, now_ms: f64) -> u64 {
        self.clear_blocking();
        self.push(NoticeKind::Blocking, error, now_ms)
    }

    /// Dismiss a toast; blocking notices only go away through retry
    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id || n.kind == NoticeKind::Blocking);
        self.notices.len() != before
    }

    /// Drop toasts past their expiry; returns how many were removed
    pub fn expire(&mut self, now_ms: f64) -> usize {
        let before = self.notices.len();
        self.notices
            .retain(|n| n.expires_at_ms().map_or(true, |at| now_ms < at));
        before - self.notices.len()
    }

    pub fn clear_blocking(&mut self) {
        self.notices.retain(|n| n.kind != NoticeKind::Blocking);
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn toasts(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter().filter(|n| n.kind == NoticeKind::Toast)
    }

    pub fn blocking(&self) -> Option<&Notice> {
        self.notices.iter().find(|n| n.kind == NoticeKind::Blocking)
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toasts_expire() {
        let mut board = NoticeBoard::new();
        board.toast(ArError::load_failed("Could not load model"), 1_000.0);
        board.block(ArError::not_supported("AR unavailable"), 1_000.0);

        assert_eq!(board.expire(5_999.0), 0);
        assert_eq!(board.expire(6_000.0), 1);
        assert_eq!(board.toasts().count(), 0);
        // Blocking panels never expire
        assert!(board.blocking().is_some());
        assert_eq!(board.expire(1e9), 0);
    }

    #[test]
    fn test_dismiss_only_toasts() {
        let mut board = NoticeBoard::new();
        let toast = board.toast(ArError::timeout("Slow network"), 0.0);
        let panel = board.block(ArError::not_supported("AR unavailable"), 0.0);

        assert!(!board.dismiss(panel));
        assert!(board.dismiss(toast));
        assert!(!board.dismiss(toast));
        assert_eq!(board.notices().len(), 1);
        assert!(board.blocking().unwrap().retry_available());
    }

    #[test]
    fn test_single_blocking_panel() {
        let mut board = NoticeBoard::new();
        board.block(ArError::not_supported("first"), 0.0);
        board.block(ArError::not_supported("second"), 1.0);
        assert_eq!(board.notices().len(), 1);
        assert_eq!(board.blocking().unwrap().error.message, "second");
        assert!(board.blocking().unwrap().text().starts_with("second. "));
    }
}
