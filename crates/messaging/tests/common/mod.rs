//! Shared fixtures for the broker-backed tests.

use std::time::Duration;

use relay_messaging::{ConsumerConfig, ProducerConfig};
use testcontainers::{clients::Cli, Container, RunnableImage};
use testcontainers_modules::kafka::Kafka;

/// A single-node Kafka broker running in a container for the duration of
/// a test.
pub struct KafkaBroker<'a> {
    _container: Container<'a, Kafka>,
    bootstrap: String,
}

impl<'a> KafkaBroker<'a> {
    pub fn launch(docker: &'a Cli) -> Self {
        let container = docker.run(RunnableImage::from(Kafka::default()));
        let bootstrap = format!("localhost:{}", container.get_host_port_ipv4(9093));

        // The port is mapped before the broker finishes starting up.
        std::thread::sleep(Duration::from_secs(5));

        Self {
            _container: container,
            bootstrap,
        }
    }

    pub fn bootstrap(&self) -> &str {
        &self.bootstrap
    }
}

pub fn test_consumer_config(bootstrap_servers: &str, topic: &str, group: &str) -> ConsumerConfig {
    ConsumerConfig {
        brokers: bootstrap_servers.to_string(),
        group_id: group.to_string(),
        topic: topic.to_string(),
        client_id: "relay-test".to_string(),
        session_timeout_ms: 6_000,
        initial_backoff_ms: 100,
        max_backoff_ms: 1_000,
        ..Default::default()
    }
}

pub fn test_producer_config(bootstrap_servers: &str, topic: &str) -> ProducerConfig {
    ProducerConfig {
        brokers: bootstrap_servers.to_string(),
        topic: topic.to_string(),
        client_id: "relay-test".to_string(),
        message_timeout_ms: 10_000,
        ..Default::default()
    }
}
