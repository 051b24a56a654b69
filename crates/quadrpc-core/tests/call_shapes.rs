//! Integration tests for every operation, over the in-process transport and
//! over TCP.
//!
//! Each check is written once against `Transport` and instantiated for both
//! transports by `over_both_transports!`.

use futures::StreamExt;
use quadrpc_core::service::calculator::{RunningAverageRequest, RunningMaximumRequest};
use quadrpc_core::service::greet::Greeting;
use quadrpc_core::{
    CalculatorClient, CalculatorService, CallShape, Connection, GreetClient, GreetService,
    LocalTransport, RpcError, RpcServer, RpcServerHandle, ServerConfig, ServiceSet, Transport,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(20);

fn services() -> ServiceSet {
    ServiceSet::new().with(CalculatorService::new()).with(
        GreetService::new()
            .with_repeat_interval(TICK)
            .with_deadline_delay(3, Duration::from_millis(100)),
    )
}

fn local() -> LocalTransport<ServiceSet> {
    LocalTransport::new(Arc::new(services()))
}

async fn tcp() -> (RpcServerHandle, Connection) {
    let config = ServerConfig::new().with_port(0);
    let handle = RpcServer::start(Arc::new(services()), &config)
        .await
        .expect("server should start");
    let connection = Connection::connect(handle.addr())
        .await
        .expect("client should connect");
    (handle, connection)
}

macro_rules! over_both_transports {
    ($name:ident, $check:ident) => {
        mod $name {
            use super::*;

            #[tokio::test]
            async fn local() {
                $check(super::local()).await;
            }

            #[tokio::test]
            async fn tcp() {
                let (_server, connection) = super::tcp().await;
                $check(connection).await;
            }
        }
    };
}

// ============================================================================
// Calculator
// ============================================================================

async fn check_sum<T: Transport>(transport: T) {
    let client = CalculatorClient::new(transport);
    assert_eq!(client.sum(3, 10).await.unwrap(), 13);
    assert_eq!(client.sum(-7, 7).await.unwrap(), 0);
    assert_eq!(client.sum(i64::MAX, 1).await.unwrap(), i64::MIN);
}

async fn check_prime_factors<T: Transport>(transport: T) {
    let client = CalculatorClient::new(transport);

    let primes: Vec<i64> = client
        .prime_factors(120)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.prime)
        .collect();
    assert_eq!(primes, vec![2, 2, 2, 3, 5]);

    for number in [0, 1, -12] {
        let primes = client
            .prime_factors(number)
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();
        assert!(primes.is_empty(), "{} should have no prime factors", number);
    }

    let primes: Vec<i64> = client
        .prime_factors(97)
        .await
        .unwrap()
        .into_stream()
        .map(|r| r.unwrap().prime)
        .collect()
        .await;
    assert_eq!(primes, vec![97]);
}

async fn check_running_average<T: Transport>(transport: T) {
    let client = CalculatorClient::new(transport);

    let mut call = client.running_average().await.unwrap();
    for number in [1.0, 2.0, 3.0, 4.0] {
        call.send(RunningAverageRequest { number }).await.unwrap();
    }
    assert_eq!(call.close_and_recv().await.unwrap().result, 2.5);

    let empty = client.running_average().await.unwrap();
    assert_eq!(empty.close_and_recv().await.unwrap().result, 0.0);
}

async fn check_running_maximum<T: Transport>(transport: T) {
    let client = CalculatorClient::new(transport);

    let (mut requests, mut responses) = client.running_maximum().await.unwrap();
    let sender = tokio::spawn(async move {
        for number in [1, 5, 3, 6, 2, 20] {
            requests
                .send(RunningMaximumRequest { number })
                .await
                .unwrap();
        }
        requests.close_send();
    });

    let mut maxima = Vec::new();
    while let Some(response) = responses.receive().await.unwrap() {
        maxima.push(response.result);
    }
    sender.await.unwrap();
    assert_eq!(maxima, vec![1, 5, 6, 20]);

    let (mut requests, responses) = client.running_maximum().await.unwrap();
    for number in [-3, -1, -8] {
        requests
            .send(RunningMaximumRequest { number })
            .await
            .unwrap();
    }
    requests.close_send();
    assert!(responses.collect_all().await.unwrap().is_empty());
}

async fn check_square_root<T: Transport>(transport: T) {
    let client = CalculatorClient::new(transport);
    assert_eq!(client.square_root(10).await.unwrap(), 10f64.sqrt());
    assert_eq!(client.square_root(0).await.unwrap(), 0.0);

    match client.square_root(-1).await.unwrap_err() {
        RpcError::InvalidArgument { message } => {
            assert_eq!(message, "Received a negative number: -1")
        }
        other => panic!("Expected InvalidArgument, got: {:?}", other),
    }
}

over_both_transports!(sum, check_sum);
over_both_transports!(prime_factors, check_prime_factors);
over_both_transports!(running_average, check_running_average);
over_both_transports!(running_maximum, check_running_maximum);
over_both_transports!(square_root, check_square_root);

// ============================================================================
// Greet
// ============================================================================

async fn check_greet<T: Transport>(transport: T) {
    let client = GreetClient::new(transport);
    let result = client.greet(Greeting::new("Nathan", "Smith")).await.unwrap();
    assert_eq!(result, "Hello Nathan");
}

async fn check_greet_with_deadline<T: Transport>(transport: T) {
    let client = GreetClient::new(transport);

    let result = client
        .greet_with_deadline(Greeting::new("Nathan", ""), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(result, "Hello Nathan");

    let err = client
        .greet_with_deadline(Greeting::new("Nathan", ""), Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.is_deadline_exceeded(), "unexpected error: {:?}", err);
    assert!(!err.is_transport());
}

async fn check_greet_many_times<T: Transport>(transport: T) {
    let client = GreetClient::new(transport);
    let results: Vec<String> = client
        .greet_many_times(Greeting::new("Rav", ""))
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.result)
        .collect();

    let expected: Vec<String> = (0..10).map(|i| format!("Hello Rav number {}", i)).collect();
    assert_eq!(results, expected);
}

async fn check_long_greet<T: Transport>(transport: T) {
    let client = GreetClient::new(transport);
    let mut call = client.long_greet().await.unwrap();
    for name in ["Nathan", "Rav", "Ellen"] {
        call.send(Greeting::new(name, "").into()).await.unwrap();
    }
    let response = call.close_and_recv().await.unwrap();
    assert_eq!(response.result, "Hello Nathan! Hello Rav! Hello Ellen! ");
}

async fn check_greet_everyone<T: Transport>(transport: T) {
    let client = GreetClient::new(transport);
    let (mut requests, mut responses) = client.greet_everyone().await.unwrap();

    for name in ["Nathan", "Rav"] {
        requests.send(Greeting::new(name, "").into()).await.unwrap();
        let reply = responses.receive().await.unwrap().unwrap();
        assert_eq!(reply.result, format!("Hello {}!", name));
    }
    requests.close_send();
    assert!(responses.receive().await.unwrap().is_none());
}

over_both_transports!(greet, check_greet);
over_both_transports!(greet_with_deadline, check_greet_with_deadline);
over_both_transports!(greet_many_times, check_greet_many_times);
over_both_transports!(long_greet, check_long_greet);
over_both_transports!(greet_everyone, check_greet_everyone);

// ============================================================================
// Call-shape rules
// ============================================================================

async fn check_unknown_method<T: Transport>(transport: T) {
    let mut call = transport
        .open("Multiply", CallShape::Unary, None)
        .await
        .unwrap();
    let err = call.responses.receive().await.unwrap_err();
    assert!(matches!(err, RpcError::Unimplemented { .. }));
}

async fn check_unary_cardinality<T: Transport>(transport: T) {
    let mut call = transport.open("Sum", CallShape::Unary, None).await.unwrap();
    call.requests
        .send(json!({"first": 1, "second": 2}))
        .await
        .unwrap();

    let err = call
        .requests
        .send(json!({"first": 3, "second": 4}))
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::CardinalityViolation { .. }));

    // The first request is still answered.
    assert_eq!(
        call.responses.receive().await.unwrap(),
        Some(json!({"result": 3}))
    );
}

async fn check_end_of_stream_is_sticky<T: Transport>(transport: T) {
    let mut call = transport
        .open("GreetEveryone", CallShape::BidiStream, None)
        .await
        .unwrap();
    call.requests.close_send();
    call.requests.close_send();

    assert_eq!(call.responses.receive().await.unwrap(), None);
    assert_eq!(call.responses.receive().await.unwrap(), None);

    let err = call.requests.send(json!({})).await.unwrap_err();
    assert!(matches!(err, RpcError::StreamClosed { .. }));
}

async fn check_cancel_stops_stream<T: Transport>(transport: T) {
    let client = GreetClient::new(transport);
    let mut responses = client
        .greet_many_times(Greeting::new("Nathan", ""))
        .await
        .unwrap();

    let first = responses.receive().await.unwrap().unwrap();
    assert_eq!(first.result, "Hello Nathan number 0");

    responses.context().cancel();
    let err = responses.receive().await.unwrap_err();
    assert!(matches!(err, RpcError::Cancelled));
    assert!(responses.context().is_cancelled());
}

over_both_transports!(unknown_method, check_unknown_method);
over_both_transports!(unary_cardinality, check_unary_cardinality);
over_both_transports!(end_of_stream_is_sticky, check_end_of_stream_is_sticky);
over_both_transports!(cancel_stops_stream, check_cancel_stops_stream);

#[tokio::test]
async fn test_calls_multiplex_over_one_connection() {
    let (_server, connection) = tcp().await;
    let connection = Arc::new(connection);
    let calculator = CalculatorClient::new(connection.clone());
    let greeter = GreetClient::new(connection);

    let (mut requests, mut responses) = calculator.running_maximum().await.unwrap();
    let mut many = greeter
        .greet_many_times(Greeting::new("Rav", ""))
        .await
        .unwrap();

    requests
        .send(RunningMaximumRequest { number: 4 })
        .await
        .unwrap();
    assert_eq!(responses.receive().await.unwrap().unwrap().result, 4);
    assert_eq!(
        many.receive().await.unwrap().unwrap().result,
        "Hello Rav number 0"
    );
    assert_eq!(calculator.sum(1, 1).await.unwrap(), 2);

    requests.close_send();
    assert!(responses.receive().await.unwrap().is_none());
    assert_eq!(many.collect_all().await.unwrap().len(), 9);
}
