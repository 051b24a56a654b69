//! Client driver: one demonstration per operation.
//!
//! Each scenario prints what it sends and receives and returns the received
//! values so the scenarios can be checked in tests.

use clap::ValueEnum;
use futures::StreamExt;
use quadrpc_core::service::calculator::{RunningAverageRequest, RunningMaximumRequest};
use quadrpc_core::service::greet::{GreetRequest, Greeting};
use quadrpc_core::{CalculatorClient, GreetClient, RpcError, Transport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Scenario selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    Sum,
    Primes,
    Average,
    Maximum,
    Sqrt,
    Greet,
    GreetMany,
    LongGreet,
    GreetEveryone,
    Deadline,
    All,
}

/// Runtime options for the driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Pause between messages sent by the bidirectional sender tasks.
    pub pacing: Duration,
    /// Deadlines tried by the deadline scenario, in order.
    pub deadlines: Vec<Duration>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            pacing: Duration::from_secs(1),
            deadlines: vec![Duration::from_secs(5), Duration::from_secs(1)],
        }
    }
}

impl DriverConfig {
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }
}

/// Outcome of one `GreetWithDeadline` attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadlineOutcome {
    Greeted(String),
    DeadlineExceeded,
}

pub struct Driver {
    calculator: CalculatorClient<Arc<dyn Transport>>,
    greeter: GreetClient<Arc<dyn Transport>>,
    config: DriverConfig,
}

impl Driver {
    pub fn new(transport: Arc<dyn Transport>, config: DriverConfig) -> Self {
        Self {
            calculator: CalculatorClient::new(transport.clone()),
            greeter: GreetClient::new(transport),
            config,
        }
    }

    pub async fn run(&self, scenario: Scenario) -> anyhow::Result<()> {
        info!("Running {:?} scenario", scenario);
        match scenario {
            Scenario::Sum => {
                self.sum().await?;
            }
            Scenario::Primes => {
                self.prime_factors().await?;
            }
            Scenario::Average => {
                self.running_average().await?;
            }
            Scenario::Maximum => {
                self.running_maximum().await?;
            }
            Scenario::Sqrt => {
                self.square_root().await?;
            }
            Scenario::Greet => {
                self.greet().await?;
            }
            Scenario::GreetMany => {
                self.greet_many_times().await?;
            }
            Scenario::LongGreet => {
                self.long_greet().await?;
            }
            Scenario::GreetEveryone => {
                self.greet_everyone().await?;
            }
            Scenario::Deadline => {
                self.greet_with_deadline().await?;
            }
            Scenario::All => {
                self.sum().await?;
                self.prime_factors().await?;
                self.running_average().await?;
                self.running_maximum().await?;
                self.square_root().await?;
                self.greet().await?;
                self.greet_many_times().await?;
                self.long_greet().await?;
                self.greet_everyone().await?;
                self.greet_with_deadline().await?;
            }
        }
        Ok(())
    }

    pub async fn sum(&self) -> anyhow::Result<i64> {
        let result = self.calculator.sum(3, 10).await?;
        println!("Sum of 3 and 10: {}", result);
        Ok(result)
    }

    pub async fn prime_factors(&self) -> anyhow::Result<Vec<i64>> {
        let number = 567_890;
        let mut stream = Box::pin(self.calculator.prime_factors(number).await?.into_stream());

        let mut primes = Vec::new();
        while let Some(response) = stream.next().await {
            let prime = response?.prime;
            println!("Prime factor of {}: {}", number, prime);
            primes.push(prime);
        }
        Ok(primes)
    }

    pub async fn running_average(&self) -> anyhow::Result<f64> {
        let mut call = self.calculator.running_average().await?;
        for number in [1.0, 2.0, 3.0, 4.0] {
            println!("Sending number: {}", number);
            call.send(RunningAverageRequest { number }).await?;
        }

        let response = call.close_and_recv().await?;
        println!("Average: {}", response.result);
        Ok(response.result)
    }

    /// Requests are sent from their own task, paced by `DriverConfig::pacing`,
    /// while maxima are printed as they arrive.
    pub async fn running_maximum(&self) -> anyhow::Result<Vec<i64>> {
        let (mut requests, mut responses) = self.calculator.running_maximum().await?;
        let pacing = self.config.pacing;

        let sender = tokio::spawn(async move {
            for number in [1, 5, 3, 6, 2, 20] {
                println!("Sending number: {}", number);
                requests.send(RunningMaximumRequest { number }).await?;
                tokio::time::sleep(pacing).await;
            }
            requests.close_send();
            Ok::<_, RpcError>(())
        });

        let mut maxima = Vec::new();
        while let Some(response) = responses.receive().await? {
            println!("New maximum: {}", response.result);
            maxima.push(response.result);
        }
        sender.await??;
        Ok(maxima)
    }

    /// Reports the `InvalidArgument` for a negative number instead of failing.
    pub async fn square_root(&self) -> anyhow::Result<Vec<Result<f64, RpcError>>> {
        let mut outcomes = Vec::new();
        for number in [10, -1] {
            match self.calculator.square_root(number).await {
                Ok(root) => {
                    println!("Square root of {}: {}", number, root);
                    outcomes.push(Ok(root));
                }
                Err(e @ RpcError::InvalidArgument { .. }) => {
                    println!("Square root of {} rejected: {}", number, e);
                    outcomes.push(Err(e));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(outcomes)
    }

    pub async fn greet(&self) -> anyhow::Result<String> {
        let result = self.greeter.greet(Greeting::new("Nathan", "Smith")).await?;
        println!("Greeting: {}", result);
        Ok(result)
    }

    pub async fn greet_many_times(&self) -> anyhow::Result<Vec<String>> {
        let mut responses = self
            .greeter
            .greet_many_times(Greeting::new("Nathan", "Smith"))
            .await?;

        let mut results = Vec::new();
        while let Some(response) = responses.receive().await? {
            println!("{}", response.result);
            results.push(response.result);
        }
        Ok(results)
    }

    pub async fn long_greet(&self) -> anyhow::Result<String> {
        let mut call = self.greeter.long_greet().await?;
        for name in ["Nathan", "Rav", "Ellen"] {
            debug!("Sending greeting for {}", name);
            call.send(Greeting::new(name, "").into()).await?;
        }

        let response = call.close_and_recv().await?;
        println!("LongGreet response: {}", response.result);
        Ok(response.result)
    }

    pub async fn greet_everyone(&self) -> anyhow::Result<Vec<String>> {
        let (mut requests, mut responses) = self.greeter.greet_everyone().await?;
        let pacing = self.config.pacing;

        let sender = tokio::spawn(async move {
            for name in ["Nathan", "Rav", "Ellen", "Ivy"] {
                println!("Sending greeting for {}", name);
                requests
                    .send(GreetRequest::from(Greeting::new(name, "")))
                    .await?;
                tokio::time::sleep(pacing).await;
            }
            requests.close_send();
            Ok::<_, RpcError>(())
        });

        let mut results = Vec::new();
        while let Some(response) = responses.receive().await? {
            println!("Received: {}", response.result);
            results.push(response.result);
        }
        sender.await??;
        Ok(results)
    }

    /// Deadline expiry is reported as its own outcome; any other failure is an error.
    pub async fn greet_with_deadline(&self) -> anyhow::Result<Vec<DeadlineOutcome>> {
        let mut outcomes = Vec::new();
        for &deadline in &self.config.deadlines {
            let result = self
                .greeter
                .greet_with_deadline(Greeting::new("Nathan", "Smith"), deadline)
                .await;
            match result {
                Ok(greeting) => {
                    println!("Greeting within {:?}: {}", deadline, greeting);
                    outcomes.push(DeadlineOutcome::Greeted(greeting));
                }
                Err(e) if e.is_deadline_exceeded() => {
                    println!("Deadline exceeded after {:?}", deadline);
                    outcomes.push(DeadlineOutcome::DeadlineExceeded);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadrpc_core::{LocalTransport, ServiceSet};

    fn driver() -> Driver {
        let transport = LocalTransport::new(Arc::new(ServiceSet::standard()));
        Driver::new(Arc::new(transport), DriverConfig::default())
    }

    #[tokio::test]
    async fn test_calculator_scenarios() {
        let driver = driver();
        assert_eq!(driver.sum().await.unwrap(), 13);
        assert_eq!(
            driver.prime_factors().await.unwrap(),
            vec![2, 5, 109, 521]
        );
        assert_eq!(driver.running_average().await.unwrap(), 2.5);

        let roots = driver.square_root().await.unwrap();
        assert_eq!(roots.len(), 2);
        assert!(matches!(roots[1], Err(RpcError::InvalidArgument { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_maximum_is_paced() {
        let driver = driver();
        let started = tokio::time::Instant::now();

        assert_eq!(driver.running_maximum().await.unwrap(), vec![1, 5, 6, 20]);
        assert!(started.elapsed() >= Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_greet_scenarios() {
        let driver = driver();
        assert_eq!(driver.greet().await.unwrap(), "Hello Nathan");
        assert_eq!(driver.greet_many_times().await.unwrap().len(), 10);
        assert_eq!(
            driver.long_greet().await.unwrap(),
            "Hello Nathan! Hello Rav! Hello Ellen! "
        );
        assert_eq!(
            driver.greet_everyone().await.unwrap(),
            vec!["Hello Nathan!", "Hello Rav!", "Hello Ellen!", "Hello Ivy!"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_scenario_distinguishes_expiry() {
        let driver = driver();
        assert_eq!(
            driver.greet_with_deadline().await.unwrap(),
            vec![
                DeadlineOutcome::Greeted("Hello Nathan".to_string()),
                DeadlineOutcome::DeadlineExceeded,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_all() {
        driver().run(Scenario::All).await.unwrap();
    }
}
