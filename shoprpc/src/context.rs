use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::{Duration, Instant},
};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::{CallOptions, Codec, Error, ErrorKind, MethodDescriptor, Metadata, Result};

/// Lifecycle of a call. Every state but `Active` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallStatus {
    Active = 0,
    Completed = 1,
    Cancelled = 2,
    DeadlineExceeded = 3,
}

impl CallStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CallStatus::Active,
            1 => CallStatus::Completed,
            2 => CallStatus::Cancelled,
            _ => CallStatus::DeadlineExceeded,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != CallStatus::Active
    }
}

#[derive(Debug, Default)]
struct CallState {
    status: AtomicU8,
    /// Fired when the call is cancelled or expires.
    cancel: CancellationToken,
    /// Fired when the call leaves `Active`, whatever the reason.
    done: CancellationToken,
}

/// Shared view of a call's lifecycle.
///
/// The client half and the server half of a call hold clones of the same
/// handle. The first transition out of `Active` wins and later ones are
/// no-ops.
#[derive(Debug, Clone, Default)]
pub struct CallHandle(Arc<CallState>);

impl CallHandle {
    fn terminate(&self, status: CallStatus) -> bool {
        let won = self
            .0
            .status
            .compare_exchange(
                CallStatus::Active as u8,
                status as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            if status != CallStatus::Completed {
                self.0.cancel.cancel();
            }
            self.0.done.cancel();
        }
        won
    }

    /// Cancels the call. Returns `false` if the call had already ended.
    pub fn cancel(&self) -> bool {
        let cancelled = self.terminate(CallStatus::Cancelled);
        if cancelled {
            tracing::debug!("call cancelled");
        }
        cancelled
    }

    /// Marks the call as timed out. Returns `false` if the call had already ended.
    pub fn expire(&self) -> bool {
        self.terminate(CallStatus::DeadlineExceeded)
    }

    pub(crate) fn complete(&self) -> bool {
        self.terminate(CallStatus::Completed)
    }

    #[must_use]
    pub fn status(&self) -> CallStatus {
        CallStatus::from_u8(self.0.status.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status() == CallStatus::Active
    }

    /// True once the call was cancelled or ran past its deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.cancel.is_cancelled()
    }

    /// Resolves once the call was cancelled or ran past its deadline.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.0.cancel.cancelled()
    }

    /// Resolves once the call reached any terminal state.
    pub fn finished(&self) -> WaitForCancellationFuture<'_> {
        self.0.done.cancelled()
    }

    /// The error a caller observes for a call that did not complete normally.
    #[must_use]
    pub fn terminal_error(&self) -> Option<Error> {
        match self.status() {
            CallStatus::Cancelled => Some(Error::new(ErrorKind::Cancelled, "call cancelled")),
            CallStatus::DeadlineExceeded => Some(Error::new(
                ErrorKind::DeadlineExceeded,
                "deadline exceeded",
            )),
            CallStatus::Active | CallStatus::Completed => None,
        }
    }
}

#[derive(Debug)]
struct ContextInner {
    call_id: u64,
    method: &'static MethodDescriptor,
    metadata: Metadata,
    deadline: Option<Instant>,
    codec: Codec,
    handle: CallHandle,
}

/// Per-call state handed to a handler.
///
/// Cheap to clone; all clones observe the same cancellation signal.
#[derive(Debug, Clone)]
pub struct Context(Arc<ContextInner>);

impl Context {
    #[must_use]
    pub fn new(
        call_id: u64,
        method: &'static MethodDescriptor,
        options: &CallOptions,
        handle: CallHandle,
    ) -> Self {
        Self(Arc::new(ContextInner {
            call_id,
            method,
            metadata: options.metadata.clone(),
            deadline: options.timeout.map(|timeout| Instant::now() + timeout),
            codec: options.codec,
            handle,
        }))
    }

    #[must_use]
    pub fn call_id(&self) -> u64 {
        self.0.call_id
    }

    #[must_use]
    pub fn method(&self) -> &'static MethodDescriptor {
        self.0.method
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.0.metadata
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.0.deadline
    }

    #[must_use]
    pub fn time_remaining(&self) -> Option<Duration> {
        self.0
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    #[must_use]
    pub fn codec(&self) -> Codec {
        self.0.codec
    }

    #[must_use]
    pub fn handle(&self) -> &CallHandle {
        &self.0.handle
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.handle.is_cancelled()
    }

    /// Resolves once the caller cancelled the call or its deadline passed.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.0.handle.cancelled()
    }

    /// Fails with `Cancelled` or `DeadlineExceeded` once the call is over.
    ///
    /// # Errors
    ///
    /// Returns the terminal error of a cancelled or expired call.
    pub fn check(&self) -> Result<()> {
        match self.0.handle.terminal_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_call_handle_cancel_once() {
        let handle = CallHandle::default();
        assert!(handle.is_active());

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(!handle.expire());
        assert!(!handle.complete());
        assert_eq!(handle.status(), CallStatus::Cancelled);
        assert!(handle.is_cancelled());

        handle.cancelled().await;
        handle.finished().await;
        assert_eq!(handle.terminal_error().unwrap().kind, ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn test_call_handle_complete() {
        let handle = CallHandle::default();
        let observer = handle.clone();

        assert!(handle.complete());
        assert!(!observer.cancel());
        assert_eq!(observer.status(), CallStatus::Completed);
        assert!(!observer.is_cancelled());
        assert!(observer.terminal_error().is_none());
        observer.finished().await;
    }

    #[test]
    fn test_call_handle_expire() {
        let handle = CallHandle::default();
        assert!(handle.expire());
        assert!(handle.is_cancelled());
        assert!(handle.status().is_terminal());
        assert_eq!(
            handle.terminal_error().unwrap().kind,
            ErrorKind::DeadlineExceeded
        );
    }
}
