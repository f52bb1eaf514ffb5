//! Integration tests for connection managers, transactions and health
//! aggregation against in-vm brokers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use brokerlink::config::model::{ConfigRegistry, DEFAULT_CONFIG_NAME};
use brokerlink::error::{MessagingError, TransactionError};
use brokerlink::factory::ConnectionFactoryProvider;
use brokerlink::health::{HealthAggregator, HealthProbe, ProbeKind};
use brokerlink::manager::ConnectionRegistry;
use brokerlink::transaction::{Transaction, TransactionManager};
use brokerlink::transport::memory::{BrokerRegistry, MemoryBroker, VmTransport};
use bytes::Bytes;

fn build(config: serde_json::Value, brokers: &Arc<BrokerRegistry>) -> Arc<ConnectionRegistry> {
    let registry: ConfigRegistry = serde_json::from_value(config).unwrap();
    let provider =
        ConnectionFactoryProvider::new().with_transport(VmTransport::new(Arc::clone(brokers)));
    Arc::new(ConnectionRegistry::build(&registry.resolve(), &provider))
}

#[tokio::test]
async fn default_entry_is_usable_under_reserved_name() {
    let brokers = BrokerRegistry::new();
    brokers.start("0");
    let registry = build(serde_json::json!({ "url": "vm://0" }), &brokers);

    let producer = registry.producer(DEFAULT_CONFIG_NAME).await.unwrap();
    producer.send(Bytes::from_static(b"payload")).await.unwrap();

    let consumer = registry.consumer(DEFAULT_CONFIG_NAME).await.unwrap();
    let received = consumer.receive(Some(Duration::from_secs(1))).await.unwrap();
    assert_eq!(received, "payload");
}

#[tokio::test]
async fn receive_fails_when_broker_stops_mid_wait() {
    let brokers = BrokerRegistry::new();
    let broker = brokers.start("1");
    let registry = build(
        serde_json::json!({ "named": { "named-1": { "url": "vm://1" } } }),
        &brokers,
    );
    let consumer = registry.consumer("named-1").await.unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        broker.stop();
    });

    let err = consumer.receive(None).await.unwrap_err();
    assert!(matches!(err, MessagingError::ConnectionLost(_)));
}

#[tokio::test]
async fn credentials_are_passed_to_the_broker() {
    let brokers = BrokerRegistry::new();
    brokers.register(MemoryBroker::with_credentials("1", "admin", "secret"));
    let registry = build(
        serde_json::json!({
            "named": {
                "good": { "url": "vm://1", "username": "admin", "password": "secret" },
                "bad": { "url": "vm://1", "username": "admin", "password": "wrong" }
            }
        }),
        &brokers,
    );

    assert!(registry.producer("good").await.is_ok());
    assert_eq!(
        registry.producer("bad").await.err().unwrap(),
        MessagingError::Authentication("admin".into())
    );
}

#[tokio::test]
async fn explicit_destination_is_shared_between_configurations() {
    let brokers = BrokerRegistry::new();
    brokers.start("0");
    let registry = build(
        serde_json::json!({
            "named": {
                "writer": { "url": "vm://0", "destination": "orders" },
                "reader": { "url": "vm://0", "destination": "orders" }
            }
        }),
        &brokers,
    );

    registry
        .producer("writer")
        .await
        .unwrap()
        .send(Bytes::from_static(b"order-1"))
        .await
        .unwrap();
    let received = registry
        .consumer("reader")
        .await
        .unwrap()
        .receive(Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(received, "order-1");
}

#[tokio::test]
async fn failed_prepare_rolls_back_every_configuration() {
    let brokers = BrokerRegistry::new();
    let first = brokers.start("1");
    let second = brokers.start("2");
    let registry = build(
        serde_json::json!({
            "named": {
                "named-1": { "url": "vm://1", "xa-enabled": true },
                "named-2": { "url": "vm://2", "xa-enabled": true }
            }
        }),
        &brokers,
    );
    let p1 = registry.producer("named-1").await.unwrap();
    let p2 = registry.producer("named-2").await.unwrap();

    let err = TransactionManager::new()
        .run(async {
            p1.send_xa(Bytes::from_static(b"a")).await?;
            p2.send_xa(Bytes::from_static(b"b")).await?;
            second.stop();
            Ok::<_, MessagingError>(())
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MessagingError::Transaction(TransactionError::RolledBack { .. })
    ));
    assert_eq!(first.depth("named-1"), 0);
    assert_eq!(second.depth("named-2"), 0);
}

#[tokio::test]
async fn rollback_only_discards_transactional_sends() {
    let brokers = BrokerRegistry::new();
    let broker = brokers.start("1");
    let registry = build(
        serde_json::json!({ "named": { "named-1": { "url": "vm://1", "xa-enabled": true } } }),
        &brokers,
    );
    let producer = registry.producer("named-1").await.unwrap();

    let result = TransactionManager::new()
        .run(async {
            producer.send_xa(Bytes::from_static(b"a")).await?;
            if let Some(tx) = Transaction::current() {
                tx.set_rollback_only();
            }
            Ok::<_, MessagingError>(())
        })
        .await;

    assert!(result.is_err());
    assert_eq!(broker.depth("named-1"), 0);
}

#[tokio::test]
async fn transaction_is_not_visible_to_spawned_tasks() {
    let brokers = BrokerRegistry::new();
    let broker = brokers.start("1");
    let registry = build(
        serde_json::json!({ "named": { "named-1": { "url": "vm://1", "xa-enabled": true } } }),
        &brokers,
    );
    let producer = registry.producer("named-1").await.unwrap();

    let spawned = TransactionManager::new()
        .run(async {
            let producer = Arc::clone(&producer);
            let handle =
                tokio::spawn(async move { producer.send_xa(Bytes::from_static(b"a")).await });
            Ok::<_, MessagingError>(handle.await.unwrap())
        })
        .await
        .unwrap();

    assert_eq!(spawned, Err(MessagingError::NoActiveTransaction));
    assert_eq!(broker.depth("named-1"), 0);
}

#[tokio::test]
async fn concurrent_health_check_matches_sequential_probing() {
    let brokers = BrokerRegistry::new();
    let mut named = serde_json::Map::new();
    for i in 0..8 {
        if i % 3 != 0 {
            brokers.start(&i.to_string());
        }
        named.insert(
            format!("named-{i}"),
            serde_json::json!({ "url": format!("vm://{i}") }),
        );
    }
    let registry = build(serde_json::json!({ "named": named }), &brokers);

    let aggregator = HealthAggregator::new(
        Arc::clone(&registry) as Arc<dyn HealthProbe>,
        Duration::from_secs(1),
    );
    let status = aggregator.check(ProbeKind::Readiness).await;

    let mut sequential = BTreeMap::new();
    for name in registry.names() {
        sequential.insert(name.to_string(), registry.probe(name).await.is_ok());
    }

    assert_eq!(status.checks, sequential);
    assert!(!status.up);
    assert_eq!(status.failing().count(), 3);
}
