//! Typed client stubs.
//!
//! One method per operation, returning a handle that matches the call shape:
//! unary methods return the response, server-streaming methods a
//! `MessageReceiver`, client-streaming methods a `ClientStreamCall`, and
//! bidirectional methods a sender/receiver pair that can be driven from two
//! tasks.

use crate::call::{CallContext, CallShape, MessageReceiver, MessageSender};
use crate::error::Result;
use crate::service::calculator::{
    PrimeFactorsRequest, PrimeFactorsResponse, RunningAverageRequest, RunningAverageResponse,
    RunningMaximumRequest, RunningMaximumResponse, SquareRootRequest, SquareRootResponse,
    SumRequest, SumResponse, PRIME_FACTORS, RUNNING_AVERAGE, RUNNING_MAXIMUM, SQUARE_ROOT, SUM,
};
use crate::service::greet::{
    GreetRequest, GreetResponse, Greeting, GREET, GREET_EVERYONE, GREET_MANY_TIMES,
    GREET_WITH_DEADLINE, LONG_GREET,
};
use crate::transport::Transport;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Handle to a client-streaming call.
#[derive(Debug)]
pub struct ClientStreamCall<Req, Resp> {
    context: CallContext,
    requests: MessageSender<Req>,
    responses: MessageReceiver<Resp>,
}

impl<Req: Serialize, Resp: DeserializeOwned> ClientStreamCall<Req, Resp> {
    pub async fn send(&mut self, request: Req) -> Result<()> {
        self.requests.send(request).await
    }

    /// Half-close the request stream and wait for the single response.
    pub async fn close_and_recv(mut self) -> Result<Resp> {
        self.requests.close_send();
        self.responses.receive_single().await
    }

    pub fn context(&self) -> &CallContext {
        &self.context
    }
}

async fn unary<T, Req, Resp>(
    transport: &T,
    method: &str,
    request: Req,
    timeout: Option<Duration>,
) -> Result<Resp>
where
    T: Transport + ?Sized,
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let call = transport.open(method, CallShape::Unary, timeout).await?;
    let (_, mut requests, mut responses) = call.into_typed::<Req, Resp>();
    requests.send(request).await?;
    responses.receive_single().await
}

async fn server_stream<T, Req, Resp>(
    transport: &T,
    method: &str,
    request: Req,
    timeout: Option<Duration>,
) -> Result<MessageReceiver<Resp>>
where
    T: Transport + ?Sized,
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let call = transport.open(method, CallShape::ServerStream, timeout).await?;
    let (_, mut requests, responses) = call.into_typed::<Req, Resp>();
    requests.send(request).await?;
    Ok(responses)
}

async fn client_stream<T, Req, Resp>(
    transport: &T,
    method: &str,
    timeout: Option<Duration>,
) -> Result<ClientStreamCall<Req, Resp>>
where
    T: Transport + ?Sized,
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let call = transport.open(method, CallShape::ClientStream, timeout).await?;
    let (context, requests, responses) = call.into_typed::<Req, Resp>();
    Ok(ClientStreamCall {
        context,
        requests,
        responses,
    })
}

async fn bidi_stream<T, Req, Resp>(
    transport: &T,
    method: &str,
    timeout: Option<Duration>,
) -> Result<(MessageSender<Req>, MessageReceiver<Resp>)>
where
    T: Transport + ?Sized,
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let call = transport.open(method, CallShape::BidiStream, timeout).await?;
    let (_, requests, responses) = call.into_typed::<Req, Resp>();
    Ok((requests, responses))
}

/// Client for the calculator service.
#[derive(Debug, Clone)]
pub struct CalculatorClient<T> {
    transport: T,
    timeout: Option<Duration>,
}

impl<T: Transport> CalculatorClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeout: None,
        }
    }

    /// Apply a deadline, relative to each call's start, to every call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn sum(&self, first: i64, second: i64) -> Result<i64> {
        let response: SumResponse = unary(
            &self.transport,
            SUM,
            SumRequest { first, second },
            self.timeout,
        )
        .await?;
        Ok(response.result)
    }

    pub async fn prime_factors(
        &self,
        number: i64,
    ) -> Result<MessageReceiver<PrimeFactorsResponse>> {
        server_stream(
            &self.transport,
            PRIME_FACTORS,
            PrimeFactorsRequest { number },
            self.timeout,
        )
        .await
    }

    pub async fn running_average(
        &self,
    ) -> Result<ClientStreamCall<RunningAverageRequest, RunningAverageResponse>> {
        client_stream(&self.transport, RUNNING_AVERAGE, self.timeout).await
    }

    pub async fn running_maximum(
        &self,
    ) -> Result<(
        MessageSender<RunningMaximumRequest>,
        MessageReceiver<RunningMaximumResponse>,
    )> {
        bidi_stream(&self.transport, RUNNING_MAXIMUM, self.timeout).await
    }

    pub async fn square_root(&self, number: i64) -> Result<f64> {
        let response: SquareRootResponse = unary(
            &self.transport,
            SQUARE_ROOT,
            SquareRootRequest { number },
            self.timeout,
        )
        .await?;
        Ok(response.result)
    }
}

/// Client for the greet service.
#[derive(Debug, Clone)]
pub struct GreetClient<T> {
    transport: T,
    timeout: Option<Duration>,
}

impl<T: Transport> GreetClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn greet(&self, greeting: Greeting) -> Result<String> {
        let response: GreetResponse =
            unary(&self.transport, GREET, GreetRequest::from(greeting), self.timeout).await?;
        Ok(response.result)
    }

    /// `GreetWithDeadline` bounded by `timeout` rather than the client default.
    pub async fn greet_with_deadline(&self, greeting: Greeting, timeout: Duration) -> Result<String> {
        let response: GreetResponse = unary(
            &self.transport,
            GREET_WITH_DEADLINE,
            GreetRequest::from(greeting),
            Some(timeout),
        )
        .await?;
        Ok(response.result)
    }

    pub async fn greet_many_times(&self, greeting: Greeting) -> Result<MessageReceiver<GreetResponse>> {
        server_stream(
            &self.transport,
            GREET_MANY_TIMES,
            GreetRequest::from(greeting),
            self.timeout,
        )
        .await
    }

    pub async fn long_greet(&self) -> Result<ClientStreamCall<GreetRequest, GreetResponse>> {
        client_stream(&self.transport, LONG_GREET, self.timeout).await
    }

    pub async fn greet_everyone(
        &self,
    ) -> Result<(MessageSender<GreetRequest>, MessageReceiver<GreetResponse>)> {
        bidi_stream(&self.transport, GREET_EVERYONE, self.timeout).await
    }
}
