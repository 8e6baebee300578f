// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use vigilant::{AgentConfig, Attributes, GaugeMode, SortedTags};

// One test per binary: the process-wide agent can only be installed once.
#[tokio::test]
async fn test_global_agent_lifecycle() {
    // before init every call is a no-op
    assert!(vigilant::agent().is_none());
    vigilant::info("ignored", Attributes::new());
    vigilant::counter("ignored", 1.0, SortedTags::default());
    vigilant::capture_error(&std::fmt::Error, Attributes::new());
    vigilant::shutdown().await;

    assert!(matches!(
        vigilant::init(AgentConfig::default()),
        Err(vigilant::ConfigError::MissingToken)
    ));
    assert!(vigilant::agent().is_none());

    let first = vigilant::init(AgentConfig {
        name: "first".to_string(),
        ..AgentConfig::noop()
    })
    .expect("init");
    let second = vigilant::init(AgentConfig {
        name: "second".to_string(),
        ..AgentConfig::noop()
    })
    .expect("init");
    assert!(std::ptr::eq(first, second));
    assert_eq!(second.name(), "first");

    vigilant::set_attribute("version", "1.2.3");
    vigilant::warn("disk almost full", Attributes::from([("mount", "/var")]));
    vigilant::send_alert("disk full", Attributes::new());
    vigilant::gauge("disk.used", 0.93, GaugeMode::Set, [("mount", "/var")]);
    vigilant::histogram("latency", 12.0, SortedTags::default());
    vigilant::remove_attribute("version");
    vigilant::shutdown().await;

    assert_eq!(first.dropped(), 0);
}
