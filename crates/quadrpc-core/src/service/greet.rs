//! Greet service: the string-concatenation counterpart of the calculator,
//! including the deadline-aware unary operation.

use super::{MethodDescriptor, Service};
use crate::call::{CallShape, ServerCall};
use crate::config::GreetConfig;
use crate::error::{Result, RpcError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const GREET: &str = "Greet";
pub const GREET_WITH_DEADLINE: &str = "GreetWithDeadline";
pub const GREET_MANY_TIMES: &str = "GreetManyTimes";
pub const LONG_GREET: &str = "LongGreet";
pub const GREET_EVERYONE: &str = "GreetEveryone";

const METHODS: [MethodDescriptor; 5] = [
    MethodDescriptor::new(GREET, CallShape::Unary),
    MethodDescriptor::new(GREET_WITH_DEADLINE, CallShape::Unary),
    MethodDescriptor::new(GREET_MANY_TIMES, CallShape::ServerStream),
    MethodDescriptor::new(LONG_GREET, CallShape::ClientStream),
    MethodDescriptor::new(GREET_EVERYONE, CallShape::BidiStream),
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl Greeting {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }
}

/// Request shared by every greet operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetRequest {
    pub greeting: Greeting,
}

impl From<Greeting> for GreetRequest {
    fn from(greeting: Greeting) -> Self {
        Self { greeting }
    }
}

/// Response shared by every greet operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetResponse {
    pub result: String,
}

impl GreetResponse {
    fn new(result: String) -> Self {
        Self { result }
    }
}

pub fn hello(first_name: &str) -> String {
    format!("Hello {}", first_name)
}

/// Greet service with configurable pacing.
#[derive(Debug, Clone)]
pub struct GreetService {
    repeat_count: u32,
    repeat_interval: Duration,
    deadline_ticks: u32,
    deadline_tick: Duration,
}

impl Default for GreetService {
    fn default() -> Self {
        Self {
            repeat_count: GreetConfig::REPEAT_COUNT,
            repeat_interval: GreetConfig::REPEAT_INTERVAL,
            deadline_ticks: GreetConfig::DEADLINE_TICKS,
            deadline_tick: GreetConfig::DEADLINE_TICK,
        }
    }
}

impl GreetService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the pause between `GreetManyTimes` responses.
    pub fn with_repeat_interval(mut self, interval: Duration) -> Self {
        self.repeat_interval = interval;
        self
    }

    /// Override the delay `GreetWithDeadline` waits before answering.
    pub fn with_deadline_delay(mut self, ticks: u32, tick: Duration) -> Self {
        self.deadline_ticks = ticks;
        self.deadline_tick = tick;
        self
    }

    async fn greet(call: &mut ServerCall) -> Result<()> {
        let (mut incoming, mut outgoing) = call.typed::<GreetRequest, GreetResponse>();
        let request = incoming.receive_single().await?;
        info!("Greet function invoked with {:?}", request);

        outgoing
            .send(GreetResponse::new(hello(&request.greeting.first_name)))
            .await
    }

    async fn greet_with_deadline(&self, call: &mut ServerCall) -> Result<()> {
        let context = call.context.clone();
        let (mut incoming, mut outgoing) = call.typed::<GreetRequest, GreetResponse>();
        let request = incoming.receive_single().await?;
        info!("GreetWithDeadline function invoked with {:?}", request);

        for _ in 0..self.deadline_ticks {
            if context.is_expired() {
                debug!("GreetWithDeadline: client deadline passed, abandoning");
                return Err(RpcError::DeadlineExceeded);
            }
            if context.is_cancelled() {
                debug!("GreetWithDeadline: client cancelled, abandoning");
                return Err(RpcError::Cancelled);
            }
            tokio::time::sleep(self.deadline_tick).await;
        }

        outgoing
            .send(GreetResponse::new(hello(&request.greeting.first_name)))
            .await
    }

    async fn greet_many_times(&self, call: &mut ServerCall) -> Result<()> {
        let (mut incoming, mut outgoing) = call.typed::<GreetRequest, GreetResponse>();
        let request = incoming.receive_single().await?;
        info!("GreetManyTimes function invoked with {:?}", request);

        for i in 0..self.repeat_count {
            let result = format!("{} number {}", hello(&request.greeting.first_name), i);
            outgoing.send(GreetResponse::new(result)).await?;
            tokio::time::sleep(self.repeat_interval).await;
        }
        Ok(())
    }

    async fn long_greet(call: &mut ServerCall) -> Result<()> {
        info!("LongGreet function invoked with a stream request");
        let (mut incoming, mut outgoing) = call.typed::<GreetRequest, GreetResponse>();

        let mut result = String::new();
        while let Some(request) = incoming.receive().await? {
            result.push_str(&hello(&request.greeting.first_name));
            result.push_str("! ");
        }

        outgoing.send(GreetResponse::new(result)).await
    }

    async fn greet_everyone(call: &mut ServerCall) -> Result<()> {
        info!("GreetEveryone function invoked with a stream request");
        let (mut incoming, mut outgoing) = call.typed::<GreetRequest, GreetResponse>();

        while let Some(request) = incoming.receive().await? {
            let result = format!("{}!", hello(&request.greeting.first_name));
            outgoing.send(GreetResponse::new(result)).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Service for GreetService {
    fn name(&self) -> &'static str {
        "greet"
    }

    fn methods(&self) -> Vec<MethodDescriptor> {
        METHODS.to_vec()
    }

    async fn call(&self, method: &str, call: &mut ServerCall) -> Result<()> {
        match method {
            GREET => Self::greet(call).await,
            GREET_WITH_DEADLINE => self.greet_with_deadline(call).await,
            GREET_MANY_TIMES => self.greet_many_times(call).await,
            LONG_GREET => Self::long_greet(call).await,
            GREET_EVERYONE => Self::greet_everyone(call).await,
            _ => Err(RpcError::Unimplemented {
                message: format!("Unknown greet method: {}", method),
            }),
        }
    }
}
