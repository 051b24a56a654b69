//! Bridges between an in-process call and a connection.
//!
//! Each end of a connection opens an ordinary in-process call and hands the
//! user the local end. The remote end is driven by two tasks: `pump_out`
//! turns what the local user sends into frames, `pump_in` feeds routed frames
//! back into the call. All frames go through the connection's single writer
//! queue, which keeps each direction in send order.

use super::protocol::Frame;
use crate::call::{CallContext, CallId, CallState, RecvHalf, SendHalf, Side};
use crate::config::ChannelConfig;
use crate::error::{RpcError, StatusCode};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Per-connection table of live calls, keyed by call id.
#[derive(Clone, Default)]
pub(crate) struct Routes {
    inner: Arc<Mutex<HashMap<CallId, Route>>>,
}

#[derive(Clone)]
struct Route {
    queue: mpsc::Sender<Frame>,
    ctx: CallContext,
}

impl Routes {
    /// Register a call and return the queue its routed frames arrive on.
    ///
    /// The entry is removed when the call is released. Returns `None` if the
    /// id is already live.
    pub(crate) fn register(&self, ctx: &CallContext) -> Option<mpsc::Receiver<Frame>> {
        let id = ctx.id();
        let (tx, rx) = mpsc::channel(ChannelConfig::ROUTE_CAPACITY);
        {
            let mut routes = self.inner.lock().ok()?;
            if routes.contains_key(&id) {
                return None;
            }
            routes.insert(
                id,
                Route {
                    queue: tx,
                    ctx: ctx.clone(),
                },
            );
        }

        let routes = self.clone();
        ctx.on_release(move || routes.remove(id));
        Some(rx)
    }

    fn remove(&self, id: CallId) {
        if let Ok(mut routes) = self.inner.lock() {
            routes.remove(&id);
        }
    }

    /// Queue a frame for its call. Frames for unknown calls are dropped.
    ///
    /// Never waits: a call whose queue is full is cancelled so that it cannot
    /// stall the other calls sharing the connection.
    pub(crate) fn deliver(&self, frame: Frame) {
        let id = frame.call_id();
        let route = match self.inner.lock() {
            Ok(routes) => routes.get(&id).cloned(),
            Err(_) => None,
        };
        let Some(route) = route else {
            debug!("dropping {} frame for unknown call {}", frame.kind(), id);
            return;
        };
        match route.queue.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("call {} is not keeping up with its peer, cancelling", id);
                route.ctx.cancel();
                self.remove(id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("call {} finished before frame could be routed", id);
            }
        }
    }

    /// Forget every call; their `pump_in` tasks observe the connection loss.
    pub(crate) fn clear(&self) {
        if let Ok(mut routes) = self.inner.lock() {
            routes.clear();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().map(|r| r.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for Routes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routes").field("live", &self.len()).finish()
    }
}

/// Forward messages written by the local user of a call as frames.
///
/// `writer` is the side whose direction is being forwarded. Errors become a
/// `Status` frame when forwarding the server direction and a `Cancel` frame
/// when forwarding the client direction.
pub(crate) async fn pump_out(
    id: CallId,
    writer: Side,
    mut half: RecvHalf,
    outbound: mpsc::Sender<Frame>,
) {
    let ctx = half.context().clone();
    let frame = loop {
        match half.receive().await {
            Ok(Some(payload)) => {
                if outbound
                    .send(Frame::Message { call_id: id, payload })
                    .await
                    .is_err()
                {
                    ctx.abort(StatusCode::Unavailable);
                    return;
                }
            }
            Ok(None) => break Frame::HalfClose { call_id: id },
            Err(e) => break interruption_frame(id, writer, &e),
        }
    };

    let ended_normally = matches!(frame, Frame::HalfClose { .. });
    if outbound.send(frame).await.is_err() {
        ctx.abort(StatusCode::Unavailable);
        return;
    }

    // A client that half-closed can still abandon the call afterwards.
    if ended_normally && writer == Side::Client {
        ctx.closed().await;
        if matches!(
            ctx.abort_reason(),
            Some(StatusCode::Cancelled) | Some(StatusCode::DeadlineExceeded)
        ) {
            let _ = outbound.send(Frame::Cancel { call_id: id }).await;
        }
    }
}

fn interruption_frame(id: CallId, writer: Side, error: &RpcError) -> Frame {
    match writer {
        Side::Client => Frame::Cancel { call_id: id },
        Side::Server => Frame::Status {
            call_id: id,
            status: error.to_status(),
        },
    }
}

/// Feed frames routed to a call into its remote direction.
///
/// `half` writes the direction owned by the remote peer. When the local user
/// has stopped reading, a client abandons the call while a server just drops
/// the rest of the stream.
pub(crate) async fn pump_in(mut half: SendHalf, mut inbound: mpsc::Receiver<Frame>) {
    let ctx = half.context().clone();
    let local = match half.side() {
        Side::Client => Side::Server,
        Side::Server => Side::Client,
    };
    let mut discarding = false;

    loop {
        let frame = tokio::select! {
            frame = inbound.recv() => frame,
            _ = ctx.closed() => return,
        };
        let Some(frame) = frame else {
            if ctx.state() != CallState::Closed {
                debug!("call {} lost its connection", ctx.id());
                ctx.abort(StatusCode::Unavailable);
            }
            return;
        };

        match frame {
            Frame::Message { payload, .. } => {
                if discarding {
                    continue;
                }
                match half.send(payload).await {
                    Ok(()) => {}
                    Err(RpcError::DeadlineExceeded) | Err(RpcError::Cancelled) => return,
                    Err(e) if local == Side::Client => {
                        debug!("call {}: receiver gone, cancelling: {}", ctx.id(), e);
                        ctx.cancel();
                        return;
                    }
                    Err(e) => {
                        warn!("call {}: discarding further requests: {}", ctx.id(), e);
                        discarding = true;
                    }
                }
            }
            Frame::HalfClose { .. } => half.close_send(),
            Frame::Status { status, .. } => half.fail(status).await,
            Frame::Cancel { .. } => {
                debug!("call {} cancelled by peer", ctx.id());
                ctx.cancel();
                return;
            }
            Frame::Open { .. } => {
                warn!("call {}: ignoring duplicate open frame", ctx.id());
            }
        }
    }
}
