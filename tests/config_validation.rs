//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use chat_protocol::config::{
    ClientConfig, LoggingConfig, NetworkConfig, ServerConfig, TransportConfig,
};
use chat_protocol::core::fragment::ReassemblyOrder;
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = NetworkConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_stream_address() {
    let mut config = NetworkConfig::default();
    config.server.stream_address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(!errors.is_empty(), "Should have validation errors");
    assert!(errors
        .iter()
        .any(|e| e.contains("Invalid stream address format")));
}

#[test]
fn test_empty_datagram_address() {
    let mut config = NetworkConfig::default();
    config.server.datagram_address = String::new();

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("datagram address cannot be empty")));
}

#[test]
fn test_zero_backpressure_limit() {
    let mut config = NetworkConfig::default();
    config.server.backpressure_limit = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Backpressure limit must be greater than 0")));
}

#[test]
fn test_short_idle_timeout() {
    let mut config = NetworkConfig::default();
    config.server.idle_timeout = Duration::from_millis(500);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Idle timeout too short")));
}

#[test]
fn test_long_shutdown_timeout() {
    let mut config = NetworkConfig::default();
    config.server.shutdown_timeout = Duration::from_secs(120);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Shutdown timeout too long")));
}

#[test]
fn test_zero_max_connections() {
    let mut config = NetworkConfig::default();
    config.server.max_connections = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max connections must be greater than 0")));
}

#[test]
fn test_short_client_timeouts() {
    let mut config = NetworkConfig::default();
    config.client.connection_timeout = Duration::from_millis(50);
    config.client.response_timeout = Duration::from_millis(10);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Connection timeout too short")));
    assert!(errors.iter().any(|e| e.contains("Response timeout too short")));
}

#[test]
fn test_datagram_budget_bounds() {
    let mut config = NetworkConfig::default();
    config.transport.datagram_budget = 16;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Datagram budget too small")));

    config.transport.datagram_budget = 70_000;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Datagram budget too large")));
}

#[test]
fn test_tiny_max_message_size() {
    let mut config = NetworkConfig::default();
    config.transport.max_message_size = 512;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max message size too small")));
}

#[test]
fn test_short_reassembly_ttl() {
    let mut config = NetworkConfig::default();
    config.transport.reassembly_ttl = Duration::from_millis(10);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Reassembly TTL too short")));
}

#[test]
fn test_empty_app_name() {
    let mut config = NetworkConfig::default();
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_log_to_file_without_path() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_file = true;
    config.logging.log_file_path = None;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_logging_outputs() {
    let mut config = NetworkConfig::default();
    config.logging.log_to_console = false;
    config.logging.log_to_file = false;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = NetworkConfig::default();
    config.server.stream_address = String::new();

    let result = config.validate_strict();
    assert!(result.is_err());

    if let Err(e) = result {
        let error_str = e.to_string();
        assert!(error_str.contains("Configuration validation failed"));
    }
}

#[test]
fn test_multiple_validation_errors() {
    let mut config = NetworkConfig::default();

    config.server.stream_address = String::new();
    config.server.backpressure_limit = 0;
    config.client.response_timeout = Duration::ZERO;
    config.transport.max_message_size = 0;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(
        errors.len() >= 5,
        "Expected at least 5 errors, got {}: {:?}",
        errors.len(),
        errors
    );
}

#[test]
fn test_toml_overrides_fragmentation_settings() {
    let config = NetworkConfig::from_toml(
        r#"
        [transport]
        datagram_budget = 512
        reassembly_order = "sequence"
        "#,
    )
    .expect("valid TOML");

    assert_eq!(config.transport.datagram_budget, 512);
    assert_eq!(config.transport.reassembly_order, ReassemblyOrder::Sequence);
    assert_eq!(config.server.stream_address, "127.0.0.1:7777");
    assert!(config.validate().is_empty());
}

#[test]
fn test_unknown_reassembly_order_is_rejected() {
    let result = NetworkConfig::from_toml(
        r#"
        [transport]
        reassembly_order = "random"
        "#,
    );
    assert!(result.is_err());
}

#[test]
fn test_saved_config_loads_back() {
    let path = std::env::temp_dir().join(format!("chat-protocol-{}.toml", std::process::id()));
    let config = NetworkConfig::default_with_overrides(|c| {
        c.server.stream_address = "0.0.0.0:9000".into();
        c.transport.datagram_budget = 1200;
    });
    config.save_to_file(&path).expect("save");

    let loaded = NetworkConfig::from_file(&path).expect("load");
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.server.stream_address, "0.0.0.0:9000");
    assert_eq!(loaded.transport.datagram_budget, 1200);
}

#[test]
fn test_valid_production_config() {
    let config = NetworkConfig {
        server: ServerConfig {
            stream_address: "0.0.0.0:7777".to_string(),
            datagram_address: "0.0.0.0:7778".to_string(),
            backpressure_limit: 256,
            idle_timeout: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(10),
            max_connections: 10_000,
        },
        client: ClientConfig {
            connection_timeout: Duration::from_secs(10),
            response_timeout: Duration::from_secs(30),
        },
        transport: TransportConfig {
            datagram_budget: 1200,
            pad_byte: b'#',
            max_message_size: 16 * 1024 * 1024,
            reassembly_ttl: Duration::from_secs(30),
            reassembly_order: ReassemblyOrder::Sequence,
        },
        logging: LoggingConfig {
            app_name: "chat-server".to_string(),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: true,
        },
    };

    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Production config should be valid, got: {:?}",
        errors
    );
}
