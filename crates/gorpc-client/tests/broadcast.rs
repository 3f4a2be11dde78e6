//! Broadcast semantics: full fan-out, first-error cancellation, and caller
//! deadlines.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{start_server_with, start_tcp_server, Args};
use gorpc_client::{MultiServers, SelectMode, XClient};
use gorpc_common::{ConnectOptions, RpcError};
use gorpc_server::Service;

/// Arith whose `Sum` bumps a counter so fan-out can be observed per server.
fn counting_service(counter: Arc<AtomicUsize>) -> Service {
    let mut arith = Service::new("Arith").unwrap();
    arith
        .register("Sum", move |args: Args| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<i64, String>(args.num1 + args.num2)
            }
        })
        .unwrap();
    arith
}

/// Arith whose every method waits `delay` before answering.
fn slow_service(delay: Duration) -> Service {
    let mut arith = Service::new("Arith").unwrap();
    arith
        .register("Sum", move |args: Args| async move {
            tokio::time::sleep(delay).await;
            Ok::<i64, String>(args.num1 + args.num2)
        })
        .unwrap();
    arith
}

/// Arith whose `Sum` fails instantly.
fn failing_service() -> Service {
    let mut arith = Service::new("Arith").unwrap();
    arith
        .register("Sum", |_: Args| async move { Err::<i64, _>("boom".to_string()) })
        .unwrap();
    arith
}

fn xclient_for(addrs: Vec<String>) -> XClient<MultiServers> {
    XClient::new(
        MultiServers::new(addrs),
        SelectMode::RoundRobin,
        ConnectOptions::default(),
    )
}

#[tokio::test]
async fn broadcast_invokes_every_server_exactly_once() {
    let counter_a = Arc::new(AtomicUsize::new(0));
    let counter_b = Arc::new(AtomicUsize::new(0));
    let counter_c = Arc::new(AtomicUsize::new(0));
    let addr_a = start_server_with(counting_service(Arc::clone(&counter_a))).await;
    let addr_b = start_server_with(counting_service(Arc::clone(&counter_b))).await;
    let addr_c = start_server_with(counting_service(Arc::clone(&counter_c))).await;

    let xclient = xclient_for(vec![
        format!("tcp@{addr_a}"),
        format!("tcp@{addr_b}"),
        format!("tcp@{addr_c}"),
    ]);

    let reply: i64 = xclient
        .broadcast("Arith", "Sum", &Args { num1: 2, num2: 3 })
        .await
        .unwrap();
    assert_eq!(reply, 5);

    assert_eq!(counter_a.load(Ordering::SeqCst), 1);
    assert_eq!(counter_b.load(Ordering::SeqCst), 1);
    assert_eq!(counter_c.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn broadcast_waits_for_a_slow_sibling_then_succeeds() {
    let fast = start_tcp_server().await;
    let slow = start_server_with(slow_service(Duration::from_millis(800))).await;
    let xclient = xclient_for(vec![format!("tcp@{fast}"), format!("tcp@{slow}")]);

    let started = Instant::now();
    let reply: i64 = xclient
        .broadcast("Arith", "Sum", &Args { num1: 1, num2: 2 })
        .await
        .unwrap();
    assert_eq!(reply, 3);
    // Success is only reported once every sibling has answered.
    assert!(started.elapsed() >= Duration::from_millis(700));
}

#[tokio::test]
async fn broadcast_under_caller_deadline_reports_timeout() {
    let fast = start_tcp_server().await;
    let slow = start_server_with(slow_service(Duration::from_secs(5))).await;
    let xclient = xclient_for(vec![format!("tcp@{fast}"), format!("tcp@{slow}")]);

    let started = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_millis(200),
        xclient.broadcast::<_, i64>("Arith", "Sum", &Args { num1: 1, num2: 1 }),
    )
    .await;
    assert!(result.is_err(), "expected the caller deadline to fire");
    // The deadline detaches the in-flight siblings immediately.
    assert!(started.elapsed() < Duration::from_secs(1));

    // The slow server is unharmed and the pool still works for a fast one.
    let reply: i64 = xclient
        .call_addr(&format!("tcp@{fast}"), "Arith", "Sum", &Args { num1: 2, num2: 2 })
        .await
        .unwrap();
    assert_eq!(reply, 4);
}

#[tokio::test]
async fn first_error_cancels_remaining_siblings() {
    let failing = start_server_with(failing_service()).await;
    let slow = start_server_with(slow_service(Duration::from_secs(5))).await;
    let xclient = xclient_for(vec![format!("tcp@{failing}"), format!("tcp@{slow}")]);

    let started = Instant::now();
    match xclient
        .broadcast::<_, i64>("Arith", "Sum", &Args { num1: 1, num2: 1 })
        .await
    {
        Err(RpcError::Remote(message)) => assert_eq!(message, "boom"),
        other => panic!("expected the sibling error, got {other:?}"),
    }
    // The failure must not wait out the slow sibling.
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn broadcast_returns_the_error_even_when_a_sibling_succeeded() {
    let ok = start_tcp_server().await;
    let failing = start_server_with(failing_service()).await;
    let xclient = xclient_for(vec![format!("tcp@{ok}"), format!("tcp@{failing}")]);

    let result = xclient
        .broadcast::<_, i64>("Arith", "Sum", &Args { num1: 1, num2: 1 })
        .await;
    assert!(matches!(result, Err(RpcError::Remote(_))), "{result:?}");
}

#[tokio::test]
async fn broadcast_propagates_dial_failures() {
    // One live server, one address nobody listens on.
    let ok = start_tcp_server().await;
    let xclient = XClient::new(
        MultiServers::new(vec![
            format!("tcp@{ok}"),
            "tcp@127.0.0.1:1".to_string(),
        ]),
        SelectMode::RoundRobin,
        ConnectOptions::default().with_connect_timeout(500),
    );

    let result = xclient
        .broadcast::<_, i64>("Arith", "Sum", &Args { num1: 1, num2: 1 })
        .await;
    assert!(result.is_err(), "dial failure must surface: {result:?}");
}
