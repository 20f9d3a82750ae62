//! Cancellation for running cycles.
//!
//! A `CancelHandle` aborts every `Cancellation` cloned from the same pair. A
//! cancellation can also carry a wall-clock deadline. Drivers check it between
//! actions and while backing off; an in-flight collaborator call is never cut short.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Sender side: abort the cycles watching this handle
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<Option<String>>,
}

impl CancelHandle {
    /// Request cancellation. The first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

/// Receiver side, checked by drivers
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<Option<String>>,
    deadline: Option<Instant>,
}

/// Create a linked handle/cancellation pair
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = watch::channel(None);
    (CancelHandle { tx }, Cancellation { rx, deadline: None })
}

impl Cancellation {
    /// A cancellation that never fires (unless given a deadline)
    pub fn never() -> Self {
        let (_, rx) = watch::channel(None);
        Self { rx, deadline: None }
    }

    /// Also cancel once `timeout` has elapsed from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// Reason for cancellation, if cancelled
    pub fn reason(&self) -> Option<String> {
        if let Some(reason) = self.rx.borrow().clone() {
            return Some(reason);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some("deadline exceeded".to_string()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolve once cancelled, returning the reason
    pub async fn cancelled(&self) -> String {
        let mut rx = self.rx.clone();
        let signalled = async move {
            // Copy the reason out so no watch guard lives across the next await
            let reason = rx
                .wait_for(|reason| reason.is_some())
                .await
                .map(|reason| reason.clone().unwrap_or_default());
            match reason {
                Ok(reason) => reason,
                // Sender gone: nobody can cancel any more
                Err(_) => std::future::pending::<String>().await,
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                reason = signalled => reason,
                _ = tokio::time::sleep_until(deadline) => "deadline exceeded".to_string(),
            },
            None => signalled.await,
        }
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns the cancellation reason if the sleep was cut short.
    pub async fn sleep(&self, duration: Duration) -> Option<String> {
        if let Some(reason) = self.reason() {
            return Some(reason);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => None,
            reason = self.cancelled() => Some(reason),
        }
    }
}
