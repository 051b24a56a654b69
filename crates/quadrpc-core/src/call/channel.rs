//! Message Channel: the two directions of one call.
//!
//! Each direction is a bounded tokio `mpsc` queue of envelopes. An envelope
//! is either a payload or the terminal `Status` of the call; dropping the
//! sending half is the half-close signal and surfaces as end-of-stream.

use super::{Cardinality, CallContext, CallId, CallShape, Side};
use crate::cancel::Deadline;
use crate::config::ChannelConfig;
use crate::error::{Result, RpcError, Status};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

pub(crate) type Envelope = std::result::Result<Value, Status>;

/// Sending half of one direction.
#[derive(Debug)]
pub struct SendHalf {
    ctx: CallContext,
    side: Side,
    limit: Cardinality,
    tx: Option<mpsc::Sender<Envelope>>,
    sent: u64,
}

impl SendHalf {
    /// Send one message.
    ///
    /// Fails with `CardinalityViolation` on a second send through a
    /// single-message direction, `StreamClosed` once the direction is closed
    /// or the peer stopped receiving, and `DeadlineExceeded`/`Cancelled` when
    /// the call is interrupted, including while waiting for buffer space.
    pub async fn send(&mut self, payload: Value) -> Result<()> {
        if self.limit == Cardinality::One && self.sent >= 1 {
            return Err(RpcError::CardinalityViolation {
                message: format!(
                    "{} direction of {} call {} accepts a single message",
                    self.side,
                    self.ctx.shape(),
                    self.ctx.method()
                ),
            });
        }

        let Some(tx) = self.tx.as_ref() else {
            return Err(RpcError::StreamClosed {
                message: format!("{} direction of {} is closed", self.side, self.ctx.method()),
            });
        };

        self.ctx.check()?;

        if self.side == Side::Server
            && self.ctx.shape() == CallShape::ClientStream
            && !self.ctx.is_direction_closed(Side::Client)
        {
            return Err(RpcError::CardinalityViolation {
                message: format!(
                    "{} responded before the client half-closed its request stream",
                    self.ctx.method()
                ),
            });
        }

        tokio::select! {
            biased;
            err = self.ctx.interrupted() => return Err(err),
            sent = tx.send(Ok(payload)) => {
                if sent.is_err() {
                    return Err(RpcError::StreamClosed {
                        message: format!("peer stopped receiving on {}", self.ctx.method()),
                    });
                }
            }
        }

        self.sent += 1;
        if self.limit == Cardinality::One {
            self.close_send();
        }
        Ok(())
    }

    /// Terminate the call with an error status, then close this direction.
    ///
    /// A no-op if the direction is already closed.
    pub async fn fail(&mut self, status: Status) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        debug!(
            "call {} {} failing with {}",
            self.ctx.id(),
            self.ctx.method(),
            status
        );
        tokio::select! {
            _ = self.ctx.interrupted() => {}
            _ = tx.send(Err(status)) => {}
        }
        drop(tx);
        self.ctx.close_direction(self.side);
    }

    /// Half-close this direction. Idempotent.
    pub fn close_send(&mut self) {
        if let Some(tx) = self.tx.take() {
            drop(tx);
            self.ctx.close_direction(self.side);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// The side that writes this direction.
    pub fn side(&self) -> Side {
        self.side
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }
}

impl Drop for SendHalf {
    fn drop(&mut self) {
        self.close_send();
    }
}

/// Receiving half of one direction.
#[derive(Debug)]
pub struct RecvHalf {
    ctx: CallContext,
    rx: mpsc::Receiver<Envelope>,
    finished: bool,
}

impl RecvHalf {
    /// Receive the next message, or `None` once the peer half-closed.
    ///
    /// Suspends until a message arrives, the peer closes its direction, or the
    /// call is interrupted. A terminal `Status` from the peer is returned as
    /// the structured error it encodes. After end-of-stream every further call
    /// returns `None` again. Messages buffered by a call that closed normally
    /// are still delivered after its deadline passes.
    pub async fn receive(&mut self) -> Result<Option<Value>> {
        if self.finished {
            return Ok(None);
        }
        self.ctx.check()?;

        let next = tokio::select! {
            biased;
            next = self.rx.recv() => next,
            err = self.ctx.interrupted() => return Err(err),
        };

        match next {
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(status)) => {
                self.finished = true;
                Err(status.into())
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    pub fn context(&self) -> &CallContext {
        &self.ctx
    }
}

fn direction(ctx: &CallContext, writer: Side) -> (SendHalf, RecvHalf) {
    let (tx, rx) = mpsc::channel(ChannelConfig::DIRECTION_CAPACITY);
    (
        SendHalf {
            ctx: ctx.clone(),
            side: writer,
            limit: ctx.shape().limit(writer),
            tx: Some(tx),
            sent: 0,
        },
        RecvHalf {
            ctx: ctx.clone(),
            rx,
            finished: false,
        },
    )
}

/// Client end of a call: sends requests, receives responses.
#[derive(Debug)]
pub struct ClientCall {
    pub context: CallContext,
    pub requests: SendHalf,
    pub responses: RecvHalf,
}

/// Server end of a call: receives requests, sends responses.
#[derive(Debug)]
pub struct ServerCall {
    pub context: CallContext,
    pub requests: RecvHalf,
    pub responses: SendHalf,
}

/// Open a call with a fresh id.
pub fn open(method: &str, shape: CallShape, deadline: Deadline) -> (ClientCall, ServerCall) {
    open_with_id(CallId::next(), method, shape, deadline)
}

/// Open a call under a caller-chosen id.
pub fn open_with_id(
    id: CallId,
    method: &str,
    shape: CallShape,
    deadline: Deadline,
) -> (ClientCall, ServerCall) {
    let ctx = CallContext::new(id, method, shape, deadline);
    let (request_tx, request_rx) = direction(&ctx, Side::Client);
    let (response_tx, response_rx) = direction(&ctx, Side::Server);
    debug!("call {} {} opened as {}", id, method, shape);

    (
        ClientCall {
            context: ctx.clone(),
            requests: request_tx,
            responses: response_rx,
        },
        ServerCall {
            context: ctx,
            requests: request_rx,
            responses: response_tx,
        },
    )
}
