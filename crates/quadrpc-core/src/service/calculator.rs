//! Calculator service: one operation per call shape, plus `SquareRoot` for
//! the error path.

use super::{MethodDescriptor, Service};
use crate::call::{CallShape, ServerCall};
use crate::config::CalculatorConfig;
use crate::error::{Result, RpcError};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const SUM: &str = "Sum";
pub const PRIME_FACTORS: &str = "PrimeFactors";
pub const RUNNING_AVERAGE: &str = "RunningAverage";
pub const RUNNING_MAXIMUM: &str = "RunningMaximum";
pub const SQUARE_ROOT: &str = "SquareRoot";

const METHODS: [MethodDescriptor; 5] = [
    MethodDescriptor::new(SUM, CallShape::Unary),
    MethodDescriptor::new(PRIME_FACTORS, CallShape::ServerStream),
    MethodDescriptor::new(RUNNING_AVERAGE, CallShape::ClientStream),
    MethodDescriptor::new(RUNNING_MAXIMUM, CallShape::BidiStream),
    MethodDescriptor::new(SQUARE_ROOT, CallShape::Unary),
];

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumRequest {
    pub first: i64,
    pub second: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SumResponse {
    pub result: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimeFactorsRequest {
    pub number: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimeFactorsResponse {
    pub prime: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunningAverageRequest {
    pub number: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunningAverageResponse {
    pub result: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningMaximumRequest {
    pub number: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningMaximumResponse {
    pub result: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SquareRootRequest {
    pub number: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SquareRootResponse {
    pub result: f64,
}

// ============================================================================
// Arithmetic
// ============================================================================

/// Two's-complement sum; overflow wraps.
pub fn sum(first: i64, second: i64) -> i64 {
    first.wrapping_add(second)
}

/// Trial-division factorization of a number.
///
/// Yields prime factors in non-decreasing order, each repeated by its
/// multiplicity. Numbers below 2 yield nothing.
#[derive(Debug, Clone)]
pub struct PrimeFactors {
    remaining: i64,
    factor: i64,
}

/// Result of a bounded step of the factor search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactorSearch {
    Found(i64),
    /// The step budget ran out; call `advance` again to continue.
    Paused,
    Exhausted,
}

impl PrimeFactors {
    pub fn new(number: i64) -> Self {
        Self {
            remaining: number,
            factor: 2,
        }
    }

    /// Search for the next factor, trying at most `budget` candidates.
    pub fn advance(&mut self, budget: u64) -> FactorSearch {
        let mut budget = budget.max(1);
        while self.remaining > 1 {
            // Past the square root the remainder is itself prime.
            if self.factor > self.remaining / self.factor {
                let prime = self.remaining;
                self.remaining = 1;
                return FactorSearch::Found(prime);
            }
            if self.remaining % self.factor == 0 {
                self.remaining /= self.factor;
                return FactorSearch::Found(self.factor);
            }
            self.factor += 1;
            budget -= 1;
            if budget == 0 {
                return FactorSearch::Paused;
            }
        }
        FactorSearch::Exhausted
    }
}

impl Iterator for PrimeFactors {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        loop {
            match self.advance(u64::MAX) {
                FactorSearch::Found(prime) => return Some(prime),
                FactorSearch::Paused => continue,
                FactorSearch::Exhausted => return None,
            }
        }
    }
}

/// Sum and count of samples received so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningAverage {
    sum: f64,
    count: u64,
}

impl RunningAverage {
    pub fn push(&mut self, sample: f64) {
        self.sum += sample;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Average of the samples; zero samples count as one so the result is 0.
    pub fn value(&self) -> f64 {
        self.sum / self.count.max(1) as f64
    }
}

/// Running maximum starting at 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMaximum {
    current: i64,
}

impl RunningMaximum {
    /// Fold in `number`; returns the new maximum when it strictly increased.
    pub fn observe(&mut self, number: i64) -> Option<i64> {
        if number > self.current {
            self.current = number;
            Some(number)
        } else {
            None
        }
    }

    pub fn current(&self) -> i64 {
        self.current
    }
}

pub fn square_root(number: i64) -> Result<f64> {
    if number < 0 {
        return Err(RpcError::invalid_argument(format!(
            "Received a negative number: {}",
            number
        )));
    }
    Ok((number as f64).sqrt())
}

// ============================================================================
// Handlers
// ============================================================================

/// Calculator service; stateless, all per-call state lives in the handlers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalculatorService;

impl CalculatorService {
    pub fn new() -> Self {
        Self
    }

    async fn sum(call: &mut ServerCall) -> Result<()> {
        let (mut incoming, mut outgoing) = call.typed::<SumRequest, SumResponse>();
        let request = incoming.receive_single().await?;
        info!("Sum was invoked with {:?}", request);

        outgoing
            .send(SumResponse {
                result: sum(request.first, request.second),
            })
            .await
    }

    async fn prime_factors(call: &mut ServerCall) -> Result<()> {
        let (mut incoming, mut outgoing) =
            call.typed::<PrimeFactorsRequest, PrimeFactorsResponse>();
        let request = incoming.receive_single().await?;
        info!("PrimeFactors was invoked with {:?}", request);

        // The search yields to the runtime between batches and stops as soon
        // as the call is cancelled or expires.
        let mut factors = PrimeFactors::new(request.number);
        loop {
            match factors.advance(CalculatorConfig::TRIAL_DIVISIONS_PER_YIELD) {
                FactorSearch::Found(prime) => outgoing.send(PrimeFactorsResponse { prime }).await?,
                FactorSearch::Paused => {
                    outgoing.context().check()?;
                    tokio::task::yield_now().await;
                }
                FactorSearch::Exhausted => return Ok(()),
            }
        }
    }

    async fn running_average(call: &mut ServerCall) -> Result<()> {
        info!("RunningAverage was invoked");
        let (mut incoming, mut outgoing) =
            call.typed::<RunningAverageRequest, RunningAverageResponse>();

        let mut average = RunningAverage::default();
        while let Some(request) = incoming.receive().await? {
            average.push(request.number);
        }

        outgoing
            .send(RunningAverageResponse {
                result: average.value(),
            })
            .await
    }

    async fn running_maximum(call: &mut ServerCall) -> Result<()> {
        info!("RunningMaximum was invoked");
        let (mut incoming, mut outgoing) =
            call.typed::<RunningMaximumRequest, RunningMaximumResponse>();

        let mut maximum = RunningMaximum::default();
        while let Some(request) = incoming.receive().await? {
            if let Some(result) = maximum.observe(request.number) {
                outgoing.send(RunningMaximumResponse { result }).await?;
            }
        }
        Ok(())
    }

    async fn square_root(call: &mut ServerCall) -> Result<()> {
        let (mut incoming, mut outgoing) = call.typed::<SquareRootRequest, SquareRootResponse>();
        let request = incoming.receive_single().await?;
        info!("SquareRoot was invoked with {:?}", request);

        let result = square_root(request.number)?;
        outgoing.send(SquareRootResponse { result }).await
    }
}

#[async_trait::async_trait]
impl Service for CalculatorService {
    fn name(&self) -> &'static str {
        "calculator"
    }

    fn methods(&self) -> Vec<MethodDescriptor> {
        METHODS.to_vec()
    }

    async fn call(&self, method: &str, call: &mut ServerCall) -> Result<()> {
        match method {
            SUM => Self::sum(call).await,
            PRIME_FACTORS => Self::prime_factors(call).await,
            RUNNING_AVERAGE => Self::running_average(call).await,
            RUNNING_MAXIMUM => Self::running_maximum(call).await,
            SQUARE_ROOT => Self::square_root(call).await,
            _ => Err(RpcError::Unimplemented {
                message: format!("Unknown calculator method: {}", method),
            }),
        }
    }
}
