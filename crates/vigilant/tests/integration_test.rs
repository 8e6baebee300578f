// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;
use std::time::Duration;
use vigilant::batcher::BatchConfig;
use vigilant::{Agent, AgentConfigBuilder, Attributes, GaugeMode, SortedTags};

const INSTANCE_ID: &str = "6f9619ff-8b86-d011-b42d-00c04fc964ff";
const REASSIGNED_ID: &str = "0e1d2c3b-4a59-6877-8695-a4b3c2d1e0f9";

fn builder(server: &ServerGuard) -> AgentConfigBuilder {
    AgentConfigBuilder::new()
        .with_name("checkout")
        .with_token("tk_test")
        .with_endpoint(server.url())
        .with_registration_interval(Duration::from_millis(50))
}

async fn wait_until_matched(mock: &Mock) {
    for _ in 0..300 {
        if mock.matched_async().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn mock_registration(server: &mut ServerGuard) -> Mock {
    server
        .mock("POST", "/api/registration")
        .match_header("authorization", "Bearer tk_test")
        .match_body(Matcher::PartialJson(
            json!({"token": "tk_test", "service_name": "checkout"}),
        ))
        .with_status(200)
        .with_body(json!({"service_instance_number": 4, "service_instance_id": INSTANCE_ID}).to_string())
        .create_async()
        .await
}

#[tokio::test]
async fn test_logs_flush_when_batch_is_full() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/message")
        .match_header("authorization", "Bearer tk_test")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"token": "tk_test", "type": "logs"})),
            Matcher::Regex(r#""body":"first".*"body":"second""#.to_string()),
            Matcher::Regex(r#""service.name":"checkout""#.to_string()),
        ]))
        .with_status(202)
        .expect(1)
        .create_async()
        .await;

    let config = builder(&server)
        .with_noop_metrics(true)
        .with_batch(BatchConfig {
            max_batch_size: 2,
            flush_interval: Duration::from_secs(3600),
            ..BatchConfig::default()
        })
        .build()
        .expect("config");
    let agent = Agent::new(config).expect("agent");
    agent.start();

    agent.info("first", Attributes::new());
    agent.warn("second", Attributes::from([("attempt", 2)]));

    wait_until_matched(&mock).await;
    mock.assert_async().await;
    agent.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_every_stream() {
    let mut server = Server::new_async().await;
    let logs = server
        .mock("POST", "/api/message")
        .match_body(Matcher::PartialJson(json!({"type": "logs"})))
        .with_status(200)
        .expect(3)
        .create_async()
        .await;
    let errors = server
        .mock("POST", "/api/message")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"type": "errors"})),
            Matcher::Regex(r#""message":"config file missing""#.to_string()),
        ]))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let alerts = server
        .mock("POST", "/api/message")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"type": "alerts"})),
            Matcher::Regex(r#""title":"queue backlog""#.to_string()),
        ]))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let config = builder(&server)
        .with_noop_metrics(true)
        .with_batch(BatchConfig {
            max_batch_size: 2,
            flush_interval: Duration::from_secs(3600),
            ..BatchConfig::default()
        })
        .build()
        .expect("config");
    let agent = Agent::new(config).expect("agent");

    // queued before start: still shipped on shutdown
    for i in 0..5 {
        agent.error(&format!("failure {i}"), Attributes::new());
    }
    let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "config file missing");
    agent.capture_error(&missing, Attributes::new());
    agent.send_alert("queue backlog", Attributes::new());
    agent.start();
    agent.shutdown().await;

    logs.assert_async().await;
    errors.assert_async().await;
    alerts.assert_async().await;
    assert_eq!(agent.dropped(), 0);
}

#[tokio::test]
async fn test_level_filter_and_noop_streams() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/message")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let config = builder(&server)
        .with_level(vigilant::LogLevel::Error)
        .with_noop_alerts(true)
        .with_noop_metrics(true)
        .build()
        .expect("config");
    let agent = Agent::new(config).expect("agent");
    agent.start();
    agent.info("below the minimum", Attributes::new());
    agent.send_alert("disabled stream", Attributes::new());
    agent.shutdown().await;

    mock.assert_async().await;
}

#[tokio::test]
async fn test_full_queue_drops() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api/message")
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let config = builder(&server)
        .with_noop_metrics(true)
        .with_batch(BatchConfig {
            queue_capacity: 2,
            ..BatchConfig::default()
        })
        .build()
        .expect("config");
    let agent = Agent::new(config).expect("agent");
    for i in 0..5 {
        agent.info(&format!("message {i}"), Attributes::new());
    }
    assert_eq!(agent.dropped(), 3);

    agent.shutdown().await;
    mock.assert_async().await;
}

#[tokio::test]
async fn test_metrics_aggregated_and_flushed_on_shutdown() {
    let mut server = Server::new_async().await;
    let registration = mock_registration(&mut server).await;
    let _heartbeat = server
        .mock("POST", "/api/registration/heartbeat")
        .with_body(json!({"reassigned": false}).to_string())
        .create_async()
        .await;
    let deregistration = server
        .mock("DELETE", "/api/registration")
        .match_body(Matcher::PartialJson(json!({
            "service_instance_number": 4,
            "service_instance_id": INSTANCE_ID,
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;
    let metrics = server
        .mock("POST", "/api/message")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({"token": "tk_test", "type": "metrics"})),
            Matcher::Regex(r#""metric_name":"jobs","value":6\.0"#.to_string()),
            Matcher::Regex(r#""metric_name":"pool","value":6\.0"#.to_string()),
            Matcher::Regex(r#""metric_name":"latency","values":\[1\.0,2\.0\]"#.to_string()),
            Matcher::Regex(r#""service":"checkout-4""#.to_string()),
        ]))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let config = builder(&server)
        .with_noop_logs(true)
        .with_noop_errors(true)
        .with_noop_alerts(true)
        .build()
        .expect("config");
    let agent = Agent::new(config).expect("agent");
    agent.start();

    wait_until_matched(&registration).await;
    // let the collector observe the registration before recording
    tokio::time::sleep(Duration::from_millis(200)).await;

    for value in [1.0, 2.0, 3.0] {
        agent.counter("jobs", value, [("queue", "mail")]);
    }
    agent.gauge("pool", 5.0, GaugeMode::Set, SortedTags::default());
    agent.gauge("pool", 2.0, GaugeMode::Increment, SortedTags::default());
    agent.gauge("pool", 1.0, GaugeMode::Decrement, SortedTags::default());
    agent.histogram("latency", 1.0, SortedTags::default());
    agent.histogram("latency", 2.0, SortedTags::default());

    agent.shutdown().await;

    metrics.assert_async().await;
    deregistration.assert_async().await;
}

#[tokio::test]
async fn test_metrics_dropped_without_registration() {
    let mut server = Server::new_async().await;
    let _registration = server
        .mock("POST", "/api/registration")
        .with_status(503)
        .create_async()
        .await;
    let metrics = server
        .mock("POST", "/api/message")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let config = builder(&server)
        .with_noop_logs(true)
        .with_noop_errors(true)
        .with_noop_alerts(true)
        .build()
        .expect("config");
    let agent = Agent::new(config).expect("agent");
    agent.start();
    agent.counter("jobs", 1.0, SortedTags::default());
    tokio::time::sleep(Duration::from_millis(100)).await;
    agent.shutdown().await;

    metrics.assert_async().await;
}

#[tokio::test]
async fn test_heartbeat_reassignment_changes_service_tag() {
    let mut server = Server::new_async().await;
    let _registration = mock_registration(&mut server).await;
    let heartbeat = server
        .mock("POST", "/api/registration/heartbeat")
        .match_body(Matcher::PartialJson(json!({
            "service_name": "checkout",
            "service_instance_number": 4,
        })))
        .with_body(
            json!({
                "reassigned": true,
                "new_instance_number": 9,
                "new_instance_id": REASSIGNED_ID,
            })
            .to_string(),
        )
        .create_async()
        .await;
    let _later_heartbeats = server
        .mock("POST", "/api/registration/heartbeat")
        .with_body(json!({"reassigned": false}).to_string())
        .create_async()
        .await;
    let _deregistration = server
        .mock("DELETE", "/api/registration")
        .with_status(200)
        .create_async()
        .await;
    let metrics = server
        .mock("POST", "/api/message")
        .match_body(Matcher::Regex(r#""service":"checkout-9""#.to_string()))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let config = builder(&server)
        .with_noop_logs(true)
        .with_noop_errors(true)
        .with_noop_alerts(true)
        .build()
        .expect("config");
    let agent = Agent::new(config).expect("agent");
    agent.start();

    wait_until_matched(&heartbeat).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    agent.counter("jobs", 1.0, SortedTags::default());
    agent.shutdown().await;

    metrics.assert_async().await;
}
