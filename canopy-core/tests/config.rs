//! Configuration files on disk and building a router from them

use canopy_core::config::{load_from_json, load_from_yaml, ConfigError, ValidationErrorKind};
use canopy_core::providers::ProviderKind;
use canopy_core::routing::{CircuitState, Router, RouterError};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

const GROW_ROOM_YAML: &str = r#"
version: "0.1"
providers:
  - id: openai
    type: openai
    api_key: ${CANOPY_IT_OPENAI_KEY}
    default_model: gpt-4o-mini
    max_retries: 2
    capabilities:
      vision: true
      streaming: true
  - id: claude
    type: anthropic
    api_key: ${CANOPY_IT_ANTHROPIC_KEY}
    default_model: claude-haiku
    enabled: false
  - id: local
    type: ollama
    base_url: http://127.0.0.1:11434
    default_model: llama3
    timeout_ms: 120000
retry:
  max_attempts: 4
  base_delay_ms: 250
circuit_breaker:
  failure_threshold: 3
cache:
  ttl_secs: 600
  max_entries: 100
budget:
  daily: 2.0
  monthly: 40.0
health_check:
  enabled: false
logging:
  level: debug
"#;

#[test]
fn test_yaml_file_with_env_interpolation() {
    std::env::set_var("CANOPY_IT_OPENAI_KEY", "sk-it-0123456789");
    std::env::set_var("CANOPY_IT_ANTHROPIC_KEY", "ak-it-0123456789");

    let dir = tempdir().unwrap();
    let path = dir.path().join("canopy.yaml");
    fs::write(&path, GROW_ROOM_YAML).unwrap();

    let config = load_from_yaml(&path).unwrap();
    assert_eq!(config.providers.len(), 3);
    assert_eq!(config.providers[0].kind, ProviderKind::OpenAI);
    assert_eq!(
        config.providers[0].api_key.as_ref().map(|k| k.expose_secret()),
        Some("sk-it-0123456789")
    );
    assert_eq!(config.providers[0].max_retries, Some(2));
    assert!(!config.providers[1].enabled);
    assert_eq!(config.providers[2].timeout_ms, 120_000);
    assert_eq!(config.retry.max_attempts, 4);
    assert_eq!(config.retry.max_delay_ms, 10_000);
    assert_eq!(config.circuit_breaker.failure_threshold, 3);
    assert_eq!(config.budget.daily, Some(2.0));
    assert_eq!(config.budget.alerts.len(), 2);
    assert_eq!(config.logging.level, "debug");

    // Credentials never show up in debug output
    let debug = format!("{:?}", config.providers[0]);
    assert!(!debug.contains("sk-it-0123456789"));

    let router = Router::from_config(&config).unwrap();
    assert_eq!(router.registry().ids(), vec!["openai", "local"]);
    assert_eq!(router.retry_policy().max_attempts, 4);
    assert_eq!(router.retry_policy().base_delay, Duration::from_millis(250));
    assert_eq!(router.cache().unwrap().config().max_entries, 100);
    assert_eq!(router.ledger().budget().monthly, Some(40.0));

    let openai = router.registry().get("openai").unwrap();
    assert_eq!(openai.adapter.config().max_attempts, Some(2));
    assert!(openai.adapter.config().capabilities.vision);
    assert_eq!(openai.breaker.state(), CircuitState::Closed);

    let local = router.registry().get("local").unwrap();
    assert_eq!(local.adapter.config().base_url, "http://127.0.0.1:11434");
    assert_eq!(local.adapter.config().timeout, Duration::from_secs(120));

    std::env::remove_var("CANOPY_IT_OPENAI_KEY");
    std::env::remove_var("CANOPY_IT_ANTHROPIC_KEY");
}

#[test]
fn test_missing_env_var_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("canopy.yaml");
    fs::write(
        &path,
        r#"
version: "0.1"
providers:
  - id: openai
    type: openai
    api_key: ${CANOPY_IT_NEVER_SET}
    default_model: gpt-4o-mini
"#,
    )
    .unwrap();

    let err = load_from_yaml(&path).unwrap_err();
    assert!(matches!(err, ConfigError::EnvVarNotFound { ref var } if var == "CANOPY_IT_NEVER_SET"));
}

#[test]
fn test_json_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("canopy.json");
    fs::write(
        &path,
        r#"{
  "version": "0.1",
  "providers": [
    {"id": "local", "type": "ollama", "default_model": "llava",
     "capabilities": {"vision": true}}
  ],
  "cache": {"enabled": false},
  "conversation": {"max_messages": 20}
}"#,
    )
    .unwrap();

    let config = load_from_json(&path).unwrap();
    assert!(!config.cache.enabled);

    let router = Router::from_config(&config).unwrap();
    assert!(router.cache().is_none());
    assert_eq!(router.conversations().max_messages(), 20);
}

#[test]
fn test_duplicate_ids_rejected_with_field_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("canopy.yaml");
    fs::write(
        &path,
        r#"
version: "0.1"
providers:
  - id: local
    type: ollama
    default_model: llama3
  - id: local
    type: ollama
    default_model: llava
"#,
    )
    .unwrap();

    match load_from_yaml(&path).unwrap_err() {
        ConfigError::ValidationError(err) => {
            assert!(matches!(
                err.kind,
                ValidationErrorKind::DuplicateValue { ref value } if value == "local"
            ));
            assert_eq!(err.field_path, "providers[1].id");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_bad_url_scheme_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("canopy.yaml");
    fs::write(
        &path,
        r#"
version: "0.1"
providers:
  - id: local
    type: ollama
    base_url: ftp://127.0.0.1
    default_model: llama3
"#,
    )
    .unwrap();

    assert!(matches!(
        load_from_yaml(&path).unwrap_err(),
        ConfigError::ValidationError(_)
    ));
}

#[test]
fn test_missing_file() {
    let err = load_from_yaml("/nonexistent/canopy.yaml").unwrap_err();
    assert!(matches!(err, ConfigError::IoError { .. }));
}

#[test]
fn test_router_rejects_invalid_config() {
    let config = canopy_core::config::load_from_yaml_str(
        r#"
version: "0.1"
providers:
  - id: local
    type: ollama
    default_model: llama3
"#,
    )
    .unwrap();
    let mut broken = config.clone();
    broken.providers[0].enabled = false;

    assert!(matches!(
        Router::from_config(&broken),
        Err(RouterError::Configuration(_))
    ));
}
