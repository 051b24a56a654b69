//! Call Shape Engine.
//!
//! A call is one invocation of an operation. It has a shape, an optional
//! deadline and exactly one Message Channel made of two independently
//! closable directions:
//!
//! | Shape          | Client sends                  | Server sends                      |
//! |----------------|-------------------------------|-----------------------------------|
//! | `Unary`        | 1, then auto half-close       | 0 or 1                            |
//! | `ServerStream` | 1, then auto half-close       | 0..N, then close                  |
//! | `ClientStream` | 0..N, then explicit half-close| 1, after the client half-closed   |
//! | `BidiStream`   | 0..N, independent half-close  | 0..N, independent half-close      |
//!
//! The call reaches `Closed` once both directions are closed, or immediately
//! when it is cancelled, its deadline passes, or its transport fails.

mod channel;
mod typed;

pub use channel::{open, open_with_id, ClientCall, RecvHalf, SendHalf, ServerCall};
pub use typed::{MessageReceiver, MessageSender};

use crate::cancel::{CancellationToken, Deadline};
use crate::error::{RpcError, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::debug;

/// Identifier of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

impl CallId {
    /// Allocate a process-unique id.
    pub fn next() -> Self {
        CallId(NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Cardinality pattern of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallShape {
    Unary,
    ServerStream,
    ClientStream,
    BidiStream,
}

/// How many messages one direction accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// Exactly one message, then the direction closes itself.
    One,
    /// Any number of messages, terminated by an explicit close.
    Many,
}

impl CallShape {
    pub fn client_streaming(&self) -> bool {
        matches!(self, CallShape::ClientStream | CallShape::BidiStream)
    }

    pub fn server_streaming(&self) -> bool {
        matches!(self, CallShape::ServerStream | CallShape::BidiStream)
    }

    /// Cardinality of the direction written by `side`.
    pub fn limit(&self, side: Side) -> Cardinality {
        let streaming = match side {
            Side::Client => self.client_streaming(),
            Side::Server => self.server_streaming(),
        };
        if streaming {
            Cardinality::Many
        } else {
            Cardinality::One
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallShape::Unary => "unary",
            CallShape::ServerStream => "server_stream",
            CallShape::ClientStream => "client_stream",
            CallShape::BidiStream => "bidi_stream",
        }
    }
}

impl std::fmt::Display for CallShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The party owning one direction of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Client,
    Server,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Client => write!(f, "client"),
            Side::Server => write!(f, "server"),
        }
    }
}

/// Lifecycle state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Open,
    HalfClosedByClient,
    HalfClosedByServer,
    Closed,
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

struct CallInner {
    id: CallId,
    method: String,
    shape: CallShape,
    deadline: Deadline,
    token: CancellationToken,
    done: CancellationToken,
    client_closed: AtomicBool,
    server_closed: AtomicBool,
    /// First abnormal termination reason wins.
    aborted: OnceLock<StatusCode>,
    released: AtomicBool,
    release_hook: Mutex<Option<ReleaseHook>>,
}

/// Shared view of one call, held by both of its ends.
#[derive(Clone)]
pub struct CallContext {
    inner: Arc<CallInner>,
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("id", &self.inner.id)
            .field("method", &self.inner.method)
            .field("shape", &self.inner.shape)
            .field("deadline", &self.inner.deadline)
            .field("state", &self.state())
            .finish()
    }
}

impl CallContext {
    pub(crate) fn new(id: CallId, method: &str, shape: CallShape, deadline: Deadline) -> Self {
        Self {
            inner: Arc::new(CallInner {
                id,
                method: method.to_string(),
                shape,
                deadline,
                token: CancellationToken::new(),
                done: CancellationToken::new(),
                client_closed: AtomicBool::new(false),
                server_closed: AtomicBool::new(false),
                aborted: OnceLock::new(),
                released: AtomicBool::new(false),
                release_hook: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> CallId {
        self.inner.id
    }

    pub fn method(&self) -> &str {
        &self.inner.method
    }

    pub fn shape(&self) -> CallShape {
        self.inner.shape
    }

    pub fn deadline(&self) -> Deadline {
        self.inner.deadline
    }

    pub fn state(&self) -> CallState {
        if self.inner.aborted.get().is_some() {
            return CallState::Closed;
        }
        match (
            self.is_direction_closed(Side::Client),
            self.is_direction_closed(Side::Server),
        ) {
            (true, true) => CallState::Closed,
            (true, false) => CallState::HalfClosedByClient,
            (false, true) => CallState::HalfClosedByServer,
            (false, false) => CallState::Open,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.inner.deadline.is_expired()
    }

    /// Cancel the call from either side. Blocked sends and receives fail
    /// with `Cancelled`.
    pub fn cancel(&self) {
        self.abort(StatusCode::Cancelled);
    }

    /// Register a hook run exactly once when the call reaches `Closed`.
    ///
    /// Runs immediately if the call is already closed.
    pub fn on_release(&self, hook: impl FnOnce() + Send + 'static) {
        if let Ok(mut slot) = self.inner.release_hook.lock() {
            *slot = Some(Box::new(hook));
        }
        self.try_release();
    }

    /// Resolve once the call reaches `Closed`, normally or not.
    pub async fn closed(&self) {
        self.inner.done.cancelled().await;
    }

    /// Whether the call was terminated abnormally, and why.
    pub fn abort_reason(&self) -> Option<StatusCode> {
        self.inner.aborted.get().copied()
    }

    pub(crate) fn is_direction_closed(&self, side: Side) -> bool {
        match side {
            Side::Client => self.inner.client_closed.load(Ordering::SeqCst),
            Side::Server => self.inner.server_closed.load(Ordering::SeqCst),
        }
    }

    pub(crate) fn close_direction(&self, side: Side) {
        let flag = match side {
            Side::Client => &self.inner.client_closed,
            Side::Server => &self.inner.server_closed,
        };
        if !flag.swap(true, Ordering::SeqCst) {
            debug!("call {} {}: {} direction closed", self.inner.id, self.inner.method, side);
        }
        self.try_release();
    }

    /// Terminate the call with `reason`. Only the first reason is kept.
    ///
    /// A no-op once the call has closed normally: its outcome is final and any
    /// buffered messages remain deliverable.
    pub(crate) fn abort(&self, reason: StatusCode) {
        if self.finished_normally() {
            return;
        }
        if self.inner.aborted.set(reason).is_ok() {
            debug!("call {} {} aborted: {}", self.inner.id, self.inner.method, reason);
        }
        self.inner.token.cancel();
        self.try_release();
    }

    /// Fail if the call can no longer make progress.
    pub(crate) fn check(&self) -> Result<(), RpcError> {
        if self.inner.deadline.is_expired() {
            self.abort(StatusCode::DeadlineExceeded);
        }
        if self.inner.token.is_cancelled() {
            return Err(self.interruption());
        }
        Ok(())
    }

    /// Resolve when the call is cancelled or its deadline passes.
    ///
    /// Never resolves for a call that closed normally before its deadline.
    pub(crate) async fn interrupted(&self) -> RpcError {
        tokio::select! {
            _ = self.inner.token.cancelled() => {}
            _ = self.inner.deadline.expired() => {
                self.abort(StatusCode::DeadlineExceeded);
                if !self.inner.token.is_cancelled() {
                    std::future::pending::<()>().await;
                }
            }
        }
        self.interruption()
    }

    fn finished_normally(&self) -> bool {
        self.inner.aborted.get().is_none()
            && self.is_direction_closed(Side::Client)
            && self.is_direction_closed(Side::Server)
    }

    fn interruption(&self) -> RpcError {
        match self.abort_reason() {
            Some(StatusCode::DeadlineExceeded) => RpcError::DeadlineExceeded,
            Some(StatusCode::Unavailable) => {
                RpcError::transport(format!("connection lost during call {}", self.inner.id))
            }
            _ => RpcError::Cancelled,
        }
    }

    fn try_release(&self) {
        if self.state() != CallState::Closed {
            return;
        }
        let hook = match self.inner.release_hook.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if !self.inner.released.swap(true, Ordering::SeqCst) {
            debug!("call {} {} released", self.inner.id, self.inner.method);
            self.inner.done.cancel();
        }
        if let Some(hook) = hook {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn context(shape: CallShape) -> CallContext {
        CallContext::new(CallId::next(), "Test", shape, Deadline::none())
    }

    #[test]
    fn test_shape_cardinality() {
        assert_eq!(CallShape::Unary.limit(Side::Client), Cardinality::One);
        assert_eq!(CallShape::Unary.limit(Side::Server), Cardinality::One);
        assert_eq!(CallShape::ServerStream.limit(Side::Client), Cardinality::One);
        assert_eq!(CallShape::ServerStream.limit(Side::Server), Cardinality::Many);
        assert_eq!(CallShape::ClientStream.limit(Side::Client), Cardinality::Many);
        assert_eq!(CallShape::ClientStream.limit(Side::Server), Cardinality::One);
        assert_eq!(CallShape::BidiStream.limit(Side::Client), Cardinality::Many);
        assert_eq!(CallShape::BidiStream.limit(Side::Server), Cardinality::Many);
    }

    #[test]
    fn test_state_transitions() {
        let ctx = context(CallShape::BidiStream);
        assert_eq!(ctx.state(), CallState::Open);

        ctx.close_direction(Side::Client);
        assert_eq!(ctx.state(), CallState::HalfClosedByClient);

        ctx.close_direction(Side::Server);
        assert_eq!(ctx.state(), CallState::Closed);
    }

    #[test]
    fn test_server_half_close_first() {
        let ctx = context(CallShape::BidiStream);
        ctx.close_direction(Side::Server);
        assert_eq!(ctx.state(), CallState::HalfClosedByServer);
    }

    #[test]
    fn test_release_hook_runs_exactly_once() {
        let ctx = context(CallShape::Unary);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        ctx.on_release(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        ctx.close_direction(Side::Client);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        ctx.close_direction(Side::Server);
        ctx.close_direction(Side::Server);
        ctx.cancel();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_abort_keeps_first_reason() {
        let ctx = context(CallShape::Unary);
        ctx.abort(StatusCode::DeadlineExceeded);
        ctx.cancel();

        assert_eq!(ctx.state(), CallState::Closed);
        assert_eq!(ctx.abort_reason(), Some(StatusCode::DeadlineExceeded));
        assert!(ctx.check().unwrap_err().is_deadline_exceeded());
    }

    #[tokio::test]
    async fn test_closed_resolves_after_both_directions() {
        let ctx = context(CallShape::ClientStream);
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.closed().await })
        };

        ctx.close_direction(Side::Client);
        ctx.close_direction(Side::Server);

        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("closed should resolve")
            .unwrap();
        assert_eq!(ctx.abort_reason(), None);
    }

    #[test]
    fn test_abort_after_normal_close_is_ignored() {
        let ctx = context(CallShape::Unary);
        ctx.close_direction(Side::Client);
        ctx.close_direction(Side::Server);

        ctx.abort(StatusCode::DeadlineExceeded);
        ctx.cancel();

        assert_eq!(ctx.abort_reason(), None);
        assert!(!ctx.is_cancelled());
        assert!(ctx.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_after_normal_close_does_not_interrupt() {
        let ctx = CallContext::new(
            CallId::next(),
            "Test",
            CallShape::Unary,
            Deadline::after(std::time::Duration::from_secs(1)),
        );
        ctx.close_direction(Side::Client);
        ctx.close_direction(Side::Server);

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(5), ctx.interrupted()).await;

        assert!(result.is_err());
        assert_eq!(ctx.abort_reason(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_by_deadline() {
        let ctx = CallContext::new(
            CallId::next(),
            "Test",
            CallShape::Unary,
            Deadline::after(std::time::Duration::from_secs(1)),
        );

        let err = ctx.interrupted().await;

        assert!(err.is_deadline_exceeded());
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.state(), CallState::Closed);
    }
}
