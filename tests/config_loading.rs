//! Integration tests for config loading across all file formats.

use std::path::PathBuf;
use std::sync::Arc;

use brokerlink::cmd::run::load_registry;
use brokerlink::config::model::{ConfigRegistry, DEFAULT_CONFIG_NAME};
use brokerlink::config::sources::parse_config_str;
use brokerlink::config::validation::validate;
use brokerlink::error::{BrokerlinkError, MessagingError};
use brokerlink::factory::ConnectionFactoryProvider;
use brokerlink::manager::ConnectionRegistry;
use brokerlink::transport::memory::{BrokerRegistry, VmTransport};

const YAML: &str = r#"
url: "vm://0"
username: "admin"
password: "secret"
xa-enabled: true

health:
  enabled: false

named:
  named-1:
    url: "vm://1"
    pool-size: 4
    destination: "orders"
  named-2:
    url: "vm://2"
    health-exclude: true
    properties:
      client-id: "reporting"
"#;

#[cfg(feature = "json")]
const JSON: &str = r#"{
  "url": "vm://0",
  "username": "admin",
  "password": "secret",
  "xa-enabled": true,
  "health": { "enabled": false },
  "named": {
    "named-1": { "url": "vm://1", "pool-size": 4, "destination": "orders" },
    "named-2": {
      "url": "vm://2",
      "health-exclude": true,
      "properties": { "client-id": "reporting" }
    }
  }
}"#;

#[cfg(feature = "toml")]
const TOML: &str = r#"
url = "vm://0"
username = "admin"
password = "secret"
xa-enabled = true

[health]
enabled = false

[named.named-1]
url = "vm://1"
pool-size = 4
destination = "orders"

[named.named-2]
url = "vm://2"
health-exclude = true

[named.named-2.properties]
client-id = "reporting"
"#;

fn assert_expected(registry: &ConfigRegistry) {
    validate(registry).unwrap();
    assert!(!registry.is_health_check_enabled());

    let resolved = registry.resolve();
    assert_eq!(
        resolved.keys().map(String::as_str).collect::<Vec<_>>(),
        vec![DEFAULT_CONFIG_NAME, "named-1", "named-2"]
    );
    assert!(resolved[DEFAULT_CONFIG_NAME].is_xa_enabled());
    assert_eq!(resolved["named-1"].pool_size, Some(4));
    assert_eq!(resolved["named-1"].destination_or("named-1"), "orders");
    assert!(resolved["named-2"].is_health_excluded());
    assert_eq!(resolved["named-2"].properties["client-id"], "reporting");
}

fn temp_path(ext: &str) -> PathBuf {
    std::env::temp_dir().join(format!("brokerlink-{}.{ext}", uuid::Uuid::new_v4()))
}

#[test]
fn yaml_config_loads_and_validates() {
    let registry = parse_config_str("yaml", YAML, "brokerlink.yaml").unwrap();
    assert_expected(&registry);
}

#[cfg(feature = "json")]
#[test]
fn json_config_loads_and_validates() {
    let registry = parse_config_str("json", JSON, "brokerlink.json").unwrap();
    assert_expected(&registry);
}

#[cfg(feature = "toml")]
#[test]
fn toml_config_loads_and_validates() {
    let registry = parse_config_str("toml", TOML, "brokerlink.toml").unwrap();
    assert_expected(&registry);
}

#[cfg(all(feature = "json", feature = "toml"))]
#[test]
fn all_formats_produce_equivalent_configs() {
    let yaml = parse_config_str("yaml", YAML, "brokerlink.yaml").unwrap();
    let json = parse_config_str("json", JSON, "brokerlink.json").unwrap();
    let toml = parse_config_str("toml", TOML, "brokerlink.toml").unwrap();
    assert_eq!(yaml, json);
    assert_eq!(yaml, toml);
}

#[test]
fn named_only_config_has_no_default() {
    let content = "named:\n  named-1:\n    url: \"vm://1\"\n";
    let registry = parse_config_str("yaml", content, "brokerlink.yaml").unwrap();
    assert!(registry.default.is_empty());
    assert!(!registry.resolve().contains_key(DEFAULT_CONFIG_NAME));
    assert!(registry.is_health_check_enabled());
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    let err = parse_config_str("yaml", "named: [unterminated", "bad.yaml").unwrap_err();
    assert!(matches!(err, BrokerlinkError::ConfigParse { ref path, .. } if path == "bad.yaml"));
}

#[test]
fn unsupported_extension_is_rejected() {
    let err = parse_config_str("ini", "", "brokerlink.ini").unwrap_err();
    assert!(matches!(err, BrokerlinkError::UnsupportedFormat(ref ext) if ext == "ini"));
}

#[tokio::test]
async fn file_is_loaded_and_validated() {
    let path = temp_path("yaml");
    std::fs::write(&path, YAML).unwrap();

    let registry = load_registry(Some(&path)).await;
    let _ = std::fs::remove_file(&path);

    assert_expected(&registry.unwrap());
}

#[tokio::test]
async fn invalid_file_fails_validation() {
    let path = temp_path("yaml");
    std::fs::write(&path, "named:\n  \"<default>\":\n    url: \"vm://0\"\n").unwrap();

    let result = load_registry(Some(&path)).await;
    let _ = std::fs::remove_file(&path);

    let Err(BrokerlinkError::ConfigValidation { errors }) = result else {
        panic!("expected validation failure");
    };
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field, "name");
}

#[tokio::test]
async fn missing_file_is_reported() {
    let path = temp_path("yaml");
    let err = load_registry(Some(&path)).await.unwrap_err();
    assert!(matches!(err, BrokerlinkError::ConfigFileNotFound { .. }));
}

#[tokio::test]
async fn bad_entry_does_not_stop_the_others_from_loading() {
    let path = temp_path("yaml");
    std::fs::write(
        &path,
        "named:\n  good:\n    url: \"vm://0\"\n  bad:\n    url: \"not-a-url\"\n  zero:\n    url: \"vm://0\"\n    pool-size: 0\n",
    )
    .unwrap();

    let result = load_registry(Some(&path)).await;
    let _ = std::fs::remove_file(&path);
    let registry = result.unwrap();
    assert_eq!(registry.resolve().len(), 3);

    let brokers = BrokerRegistry::new();
    brokers.start("0");
    let provider =
        ConnectionFactoryProvider::new().with_transport(VmTransport::new(Arc::clone(&brokers)));
    let connections = ConnectionRegistry::build(&registry.resolve(), &provider);

    for name in ["bad", "zero"] {
        let err = connections.producer(name).await.err().unwrap();
        assert!(matches!(err, MessagingError::Configuration { name: ref n, .. } if n == name));
    }
    let producer = connections.producer("good").await.unwrap();
    producer.send(bytes::Bytes::from_static(b"still works")).await.unwrap();
    let consumer = connections.consumer("good").await.unwrap();
    assert_eq!(
        consumer.receive(Some(std::time::Duration::from_millis(200))).await.unwrap(),
        &b"still works"[..]
    );
}

#[tokio::test]
async fn misspelled_key_rejects_the_file() {
    let path = temp_path("yaml");
    std::fs::write(
        &path,
        "URL: \"vm://0\"\nnamed:\n  named-1:\n    url: \"vm://1\"\n    xa-enabeld: true\n",
    )
    .unwrap();

    let result = load_registry(Some(&path)).await;
    let _ = std::fs::remove_file(&path);

    let Err(BrokerlinkError::ConfigValidation { errors }) = result else {
        panic!("expected validation failure");
    };
    let mut fields: Vec<(&str, &str)> = errors
        .iter()
        .map(|e| (e.config.as_str(), e.field.as_str()))
        .collect();
    fields.sort_unstable();
    assert_eq!(
        fields,
        vec![(DEFAULT_CONFIG_NAME, "URL"), ("named-1", "xa-enabeld")]
    );
}
