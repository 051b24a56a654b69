//! Typed views over the untyped channel halves.
//!
//! Payloads travel as `serde_json::Value` so the same call can be bridged
//! onto a connection unchanged; these wrappers do the (de)serialization at
//! the edges. A view either owns its half (client side) or borrows it from a
//! `ServerCall` that the handler runtime keeps, so the runtime can still
//! terminate the call after the handler returns.

use super::{CallContext, ClientCall, RecvHalf, SendHalf, ServerCall};
use crate::error::{Result, RpcError, Status};
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::{Borrow, BorrowMut};
use std::marker::PhantomData;

/// Typed sending half.
#[derive(Debug)]
pub struct MessageSender<T, H = SendHalf> {
    half: H,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize, H: BorrowMut<SendHalf>> MessageSender<T, H> {
    pub fn new(half: H) -> Self {
        Self {
            half,
            _marker: PhantomData,
        }
    }

    fn half(&self) -> &SendHalf {
        self.half.borrow()
    }

    fn half_mut(&mut self) -> &mut SendHalf {
        self.half.borrow_mut()
    }

    pub async fn send(&mut self, message: T) -> Result<()> {
        let payload = serde_json::to_value(&message).map_err(|e| RpcError::Codec {
            message: format!("Failed to encode message: {}", e),
        })?;
        self.half_mut().send(payload).await
    }

    /// Half-close. Idempotent.
    pub fn close_send(&mut self) {
        self.half_mut().close_send();
    }

    pub async fn fail(&mut self, status: Status) {
        self.half_mut().fail(status).await;
    }

    pub fn is_closed(&self) -> bool {
        self.half().is_closed()
    }

    pub fn context(&self) -> &CallContext {
        self.half().context()
    }
}

/// Typed receiving half.
#[derive(Debug)]
pub struct MessageReceiver<T, H = RecvHalf> {
    half: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned, H: BorrowMut<RecvHalf>> MessageReceiver<T, H> {
    pub fn new(half: H) -> Self {
        Self {
            half,
            _marker: PhantomData,
        }
    }

    fn half(&self) -> &RecvHalf {
        self.half.borrow()
    }

    fn half_mut(&mut self) -> &mut RecvHalf {
        self.half.borrow_mut()
    }

    /// Next message, or `None` at end-of-stream.
    pub async fn receive(&mut self) -> Result<Option<T>> {
        match self.half_mut().receive().await? {
            Some(payload) => serde_json::from_value(payload)
                .map(Some)
                .map_err(|e| RpcError::Codec {
                    message: format!("Failed to decode message: {}", e),
                }),
            None => Ok(None),
        }
    }

    /// Receive the single message of a one-message direction.
    ///
    /// A direction that ends without a message is an `Internal` error.
    pub async fn receive_single(&mut self) -> Result<T> {
        let message = self.receive().await?.ok_or_else(|| RpcError::Internal {
            message: format!("{} ended without a message", self.context().method()),
        })?;
        Ok(message)
    }

    /// Drain the stream into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.receive().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Consume the receiver as a `Stream`, ending after end-of-stream or the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut receiver = state?;
            match receiver.receive().await {
                Ok(Some(item)) => Some((Ok(item), Some(receiver))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    pub fn context(&self) -> &CallContext {
        self.half().context()
    }
}

impl ClientCall {
    /// Split into typed request sender and response receiver.
    pub fn into_typed<Req, Resp>(self) -> (CallContext, MessageSender<Req>, MessageReceiver<Resp>)
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        (
            self.context,
            MessageSender::new(self.requests),
            MessageReceiver::new(self.responses),
        )
    }
}

impl ServerCall {
    /// Borrow typed views of the request receiver and response sender.
    pub fn typed<Req, Resp>(
        &mut self,
    ) -> (
        MessageReceiver<Req, &mut RecvHalf>,
        MessageSender<Resp, &mut SendHalf>,
    )
    where
        Req: DeserializeOwned,
        Resp: Serialize,
    {
        (
            MessageReceiver::new(&mut self.requests),
            MessageSender::new(&mut self.responses),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::{open, CallShape};
    use crate::cancel::Deadline;
    use futures::StreamExt;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Number {
        number: i64,
    }

    #[tokio::test]
    async fn test_typed_stream_preserves_order() {
        let (client, mut server) = open("Primes", CallShape::ServerStream, Deadline::none());
        let (_, _requests, responses) = client.into_typed::<Number, Number>();
        let (_incoming, mut outgoing) = server.typed::<Number, Number>();

        for n in [2, 2, 3] {
            outgoing.send(Number { number: n }).await.unwrap();
        }
        outgoing.close_send();

        let items: Vec<i64> = responses
            .into_stream()
            .map(|r| r.unwrap().number)
            .collect()
            .await;
        assert_eq!(items, vec![2, 2, 3]);
    }

    #[tokio::test]
    async fn test_decode_mismatch_is_codec_error() {
        let (client, mut server) = open("Sum", CallShape::Unary, Deadline::none());
        let (_, _requests, mut responses) = client.into_typed::<Number, Number>();

        server
            .responses
            .send(serde_json::json!({"unexpected": true}))
            .await
            .unwrap();

        let err = responses.receive().await.unwrap_err();
        assert!(matches!(err, RpcError::Codec { .. }));
    }

    #[tokio::test]
    async fn test_receive_single_without_response_is_internal() {
        let (client, server) = open("Sum", CallShape::Unary, Deadline::none());
        let (_, _requests, mut responses) = client.into_typed::<Number, Number>();
        drop(server);

        let err = responses.receive_single().await.unwrap_err();
        assert!(matches!(err, RpcError::Internal { .. }));
    }
}
