//! End-to-end broker/client tests over real localhost sockets.

use std::time::Duration;

use ghostwriter_bus::{Broker, BusClient, QoS};
use serde_json::json;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Spawn a broker on an ephemeral port and return its address.
async fn spawn_broker(shutdown: &CancellationToken) -> String {
    let broker = Broker::bind("127.0.0.1:0").await.unwrap();
    let addr = broker.local_addr().unwrap().to_string();
    let token = shutdown.clone();
    tokio::spawn(async move {
        broker.run(token).await.unwrap();
    });
    addr
}

/// Give the broker time to process an in-flight subscribe or disconnect.
async fn settle() {
    sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn publish_reaches_subscriber() {
    let shutdown = CancellationToken::new();
    let addr = spawn_broker(&shutdown).await;

    let mut sub = BusClient::connect(&addr, "sub").await.unwrap();
    sub.handle().subscribe("STATE", QoS::AtLeastOnce, false).unwrap();
    settle().await;

    let pubc = BusClient::connect(&addr, "pub").await.unwrap();
    pubc.handle()
        .publish("STATE", json!({"cmd": "get"}), QoS::AtLeastOnce)
        .unwrap();

    let (topic, payload) = timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(topic, "STATE");
    assert_eq!(payload, json!({"cmd": "get"}));
    shutdown.cancel();
}

#[tokio::test]
async fn other_topics_are_not_delivered() {
    let shutdown = CancellationToken::new();
    let addr = spawn_broker(&shutdown).await;

    let mut sub = BusClient::connect(&addr, "sub").await.unwrap();
    sub.handle().subscribe("TYPER", QoS::AtMostOnce, false).unwrap();
    settle().await;

    let pubc = BusClient::connect(&addr, "pub").await.unwrap();
    pubc.handle()
        .publish("STATE", json!({"n": 1}), QoS::AtMostOnce)
        .unwrap();
    pubc.handle()
        .publish("TYPER", json!({"n": 2}), QoS::AtMostOnce)
        .unwrap();

    let (topic, payload) = timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(topic, "TYPER");
    assert_eq!(payload, json!({"n": 2}));
    shutdown.cancel();
}

#[tokio::test]
async fn wildcard_sees_every_topic() {
    let shutdown = CancellationToken::new();
    let addr = spawn_broker(&shutdown).await;

    let mut spy = BusClient::connect(&addr, "spy").await.unwrap();
    spy.handle().subscribe("#", QoS::AtMostOnce, false).unwrap();
    settle().await;

    let pubc = BusClient::connect(&addr, "pub").await.unwrap();
    for topic in ["TYPER", "STATE", "LISTENER", "APP"] {
        pubc.handle()
            .publish(topic, json!({"t": topic}), QoS::AtMostOnce)
            .unwrap();
    }

    for expected in ["TYPER", "STATE", "LISTENER", "APP"] {
        let (topic, _) = timeout(RECV_TIMEOUT, spy.recv()).await.unwrap().unwrap();
        assert_eq!(topic, expected);
    }
    shutdown.cancel();
}

#[tokio::test]
async fn single_publisher_order_is_preserved() {
    let shutdown = CancellationToken::new();
    let addr = spawn_broker(&shutdown).await;

    let mut sub = BusClient::connect(&addr, "sub").await.unwrap();
    sub.handle().subscribe("STATE", QoS::AtLeastOnce, false).unwrap();
    settle().await;

    let pubc = BusClient::connect(&addr, "pub").await.unwrap();
    for i in 0..100 {
        pubc.handle()
            .publish("STATE", json!({"seq": i}), QoS::AtLeastOnce)
            .unwrap();
    }

    for i in 0..100 {
        let (_, payload) = timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(payload, json!({"seq": i}));
    }
    shutdown.cancel();
}

#[tokio::test]
async fn durable_subscription_buffers_across_reconnect() {
    let shutdown = CancellationToken::new();
    let addr = spawn_broker(&shutdown).await;

    let mut sub = BusClient::connect(&addr, "durable-sub").await.unwrap();
    sub.handle().subscribe("STATE", QoS::AtLeastOnce, true).unwrap();
    settle().await;
    drop(sub);
    settle().await;

    let pubc = BusClient::connect(&addr, "pub").await.unwrap();
    for i in 0..3 {
        pubc.handle()
            .publish("STATE", json!({"seq": i}), QoS::AtLeastOnce)
            .unwrap();
    }
    settle().await;

    // Reconnecting with the same client id replays the buffered messages
    // in publish order.
    let mut sub = BusClient::connect(&addr, "durable-sub").await.unwrap();
    for i in 0..3 {
        let (topic, payload) = timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(topic, "STATE");
        assert_eq!(payload, json!({"seq": i}));
    }
    shutdown.cancel();
}

#[tokio::test]
async fn non_durable_subscription_is_dropped_on_disconnect() {
    let shutdown = CancellationToken::new();
    let addr = spawn_broker(&shutdown).await;

    let sub = BusClient::connect(&addr, "flaky").await.unwrap();
    sub.handle().subscribe("STATE", QoS::AtMostOnce, false).unwrap();
    settle().await;
    drop(sub);
    settle().await;

    let pubc = BusClient::connect(&addr, "pub").await.unwrap();
    pubc.handle()
        .publish("STATE", json!({"seq": 0}), QoS::AtMostOnce)
        .unwrap();
    settle().await;

    let mut sub = BusClient::connect(&addr, "flaky").await.unwrap();
    // Nothing buffered: a fresh subscribe only sees later messages.
    sub.handle().subscribe("STATE", QoS::AtMostOnce, false).unwrap();
    settle().await;
    pubc.handle()
        .publish("STATE", json!({"seq": 1}), QoS::AtMostOnce)
        .unwrap();

    let (_, payload) = timeout(RECV_TIMEOUT, sub.recv()).await.unwrap().unwrap();
    assert_eq!(payload, json!({"seq": 1}));
    shutdown.cancel();
}

#[tokio::test]
async fn connect_fails_after_bounded_attempts() {
    // Nothing is listening on this port.
    let err = BusClient::connect("127.0.0.1:1", "nobody").await.err().unwrap();
    let msg = err.to_string();
    assert!(msg.contains("after 5 attempts"), "unexpected error: {msg}");
}
