//! End-to-end behaviour of `Logger` against a capped store

mod common;

use capped_logger::record::RecordBody;
use capped_logger::store::{CappedBounds, LogStore};
use capped_logger::{LogError, LogRecord, Logger, Metadata, Severity, Unit, WriterState};
use common::{connected, options, read_log, FlakyStore, COLLECTION};
use futures::FutureExt;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn metadata(value: Value) -> Metadata {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_request_messages_are_combined_into_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({})).await;

    logger
        .run(metadata(json!({"path": "/orders", "method": "POST"})), async {
            logger.info("Started POST /orders").await;
            logger.debug("Loading cart").await;
            logger.info("Completed 201").await;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .unwrap();

    let docs = store.documents(COLLECTION);
    assert_eq!(docs.len(), 1);

    let doc = &docs[0];
    assert_eq!(doc["messages"]["INFO"], json!(["Started POST /orders", "Completed 201"]));
    assert_eq!(doc["messages"]["DEBUG"], json!(["Loading cart"]));
    assert_eq!(doc["path"], "/orders");
    assert_eq!(doc["method"], "POST");
    assert_eq!(doc["progname"], "shop");
    assert!(doc["runtime"].is_u64());
    assert!(doc.get("message").is_none());
    assert!(doc.get("severity").is_none());
}

#[tokio::test]
async fn test_below_level_messages_are_dropped_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({"level": "info", "individual_lines": true})).await;

    logger
        .run(Metadata::new(), async {
            logger.debug("cache miss").await;
            let unit = Unit::current().unwrap();
            assert!(unit.snapshot().messages().is_empty());
            Ok::<_, anyhow::Error>(())
        })
        .await
        .unwrap();

    // Only the combined record itself reached the store
    assert_eq!(store.insert_attempts(), 1);
    let docs = store.documents(COLLECTION);
    assert_eq!(docs[0]["messages"], json!({}));
    assert!(!read_log(dir.path()).contains("cache miss"));
}

#[tokio::test]
async fn test_add_returns_the_message() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store, json!({"level": "error"})).await;

    assert_eq!(logger.add(Severity::Info, "ignored", None).await, "ignored");
    assert_eq!(logger.add(Severity::Fatal, "kept", Some("worker")).await, "kept");
    assert_eq!(logger.warn("").await, "");
}

#[tokio::test]
async fn test_runtime_is_recorded_when_body_fails() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({})).await;

    let result = logger
        .run(Metadata::new(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<(), _>(anyhow::anyhow!("boom"))
        })
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.to_string(), "boom");

    let docs = store.documents(COLLECTION);
    assert_eq!(docs.len(), 1);
    assert!(docs[0]["runtime"].as_u64().unwrap() >= 20);

    let errors = docs[0]["messages"]["ERROR"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().starts_with("boom"));
}

#[tokio::test]
async fn test_panicking_body_is_persisted_then_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({})).await;

    let outcome = AssertUnwindSafe(logger.run(Metadata::new(), async {
        logger.info("about to fail").await;
        if store.insert_attempts() == 0 {
            panic!("kaboom");
        }
        Ok::<_, anyhow::Error>(())
    }))
    .catch_unwind()
    .await;

    assert!(outcome.is_err());

    let docs = store.documents(COLLECTION);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["messages"]["INFO"], json!(["about to fail"]));
    assert_eq!(docs[0]["messages"]["ERROR"], json!(["panic: kaboom"]));
    assert!(docs[0]["runtime"].is_u64());
}

#[tokio::test]
async fn test_reserved_metadata_key_fails_before_anything_runs() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({})).await;
    let ran = AtomicBool::new(false);

    let err = logger
        .run(metadata(json!({"ip": "10.0.0.1"})), async {
            ran.store(true, Ordering::SeqCst);
            Ok::<_, LogError>(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, LogError::ReservedKey(ref key) if key == "ip"));
    assert!(err.to_string().starts_with(":ip is a reserved key"));
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(store.insert_attempts(), 0);
    assert!(store.documents(COLLECTION).is_empty());
}

#[tokio::test]
async fn test_metadata_cannot_shadow_record_fields() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({})).await;

    let err = logger
        .run(
            metadata(json!({"message": "x", "severity": "INFO", "time": "user-supplied"})),
            async {
                logger.info("hello").await;
                Ok::<_, LogError>(())
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LogError::ReservedKey(ref key) if key == "message"));
    assert_eq!(store.insert_attempts(), 0);

    // Ordinary metadata still produces a readable combined record
    logger
        .run(metadata(json!({"request_id": "abc"})), async {
            logger.info("hello").await;
            Ok::<_, LogError>(())
        })
        .await
        .unwrap();

    let docs = store.documents(COLLECTION);
    assert_eq!(docs.len(), 1);
    let record = LogRecord::from_document(&docs[0]).unwrap();
    assert!(record.is_combined());
    assert_eq!(record.extra.get("request_id"), Some(&json!("abc")));
}

#[tokio::test]
async fn test_unstorable_metadata_is_flattened_and_retried() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({})).await;

    logger
        .run(
            metadata(json!({"params": {"filter": {"$gt": 3}}, "user_id": 42})),
            async {
                logger.info("search").await;
                Ok::<_, anyhow::Error>(())
            },
        )
        .await
        .unwrap();

    assert_eq!(store.insert_attempts(), 2);

    let docs = store.documents(COLLECTION);
    assert_eq!(docs.len(), 1);
    let filter = docs[0]["params"]["filter"].as_str().unwrap();
    assert!(filter.contains("$gt"));
    assert_eq!(docs[0]["user_id"], 42);
    assert_eq!(docs[0]["messages"]["INFO"], json!(["search"]));
}

#[tokio::test]
async fn test_second_insert_failure_is_swallowed() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({})).await;
    store.fail_next_inserts(2);

    let value = logger
        .run(Metadata::new(), async {
            logger.info("lost").await;
            Ok::<_, anyhow::Error>(7)
        })
        .await
        .unwrap();

    assert_eq!(value, 7);
    assert_eq!(store.insert_attempts(), 2);
    assert!(store.documents(COLLECTION).is_empty());
}

#[tokio::test]
async fn test_individual_lines_are_written_alongside_combined_record() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({"individual_lines": true})).await;

    logger
        .run(Metadata::new(), async {
            logger.add(Severity::Warn, "low stock", Some("inventory")).await;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .unwrap();

    let records: Vec<LogRecord> = store
        .documents(COLLECTION)
        .iter()
        .map(|doc| LogRecord::from_document(doc).unwrap())
        .collect();
    assert_eq!(records.len(), 2);

    match &records[0].body {
        RecordBody::Simple { message, severity } => {
            assert_eq!(message, "low stock");
            assert_eq!(*severity, Severity::Warn);
        }
        other => panic!("expected simple record, got {:?}", other),
    }
    assert_eq!(records[0].progname, "inventory");
    assert!(records[1].is_combined());
}

#[tokio::test]
async fn test_without_combining_the_record_still_carries_runtime() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({"combine_request": false})).await;

    logger
        .run(metadata(json!({"path": "/health"})), async {
            logger.info("ok").await;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .unwrap();

    let docs = store.documents(COLLECTION);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["messages"], json!({}));
    assert_eq!(docs[0]["path"], "/health");
    assert!(docs[0]["runtime"].is_u64());
    assert!(read_log(dir.path()).contains("INFO shop: ok"));
}

#[tokio::test]
async fn test_messages_outside_a_unit_only_reach_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({})).await;

    logger.info("booting").await;

    assert_eq!(store.insert_attempts(), 0);
    assert!(read_log(dir.path()).contains("INFO shop: booting"));
}

#[tokio::test]
async fn test_disabled_file_logging_writes_nothing_to_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({"disable_file_logging": true})).await;

    logger
        .run(Metadata::new(), async {
            logger.info("quiet").await;
            Ok::<_, anyhow::Error>(())
        })
        .await
        .unwrap();

    assert_eq!(store.documents(COLLECTION).len(), 1);
    assert!(read_log(dir.path()).is_empty());
}

#[tokio::test]
async fn test_concurrent_units_do_not_share_records() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({})).await;

    let first = logger.run(metadata(json!({"request": 1})), async {
        logger.info("one-a").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        logger.info("one-b").await;
        Ok::<_, anyhow::Error>(())
    });
    let second = logger.run(metadata(json!({"request": 2})), async {
        logger.info("two-a").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        logger.info("two-b").await;
        Ok::<_, anyhow::Error>(())
    });

    let (a, b) = tokio::join!(first, second);
    a.unwrap();
    b.unwrap();

    let docs = store.documents(COLLECTION);
    assert_eq!(docs.len(), 2);
    for doc in docs {
        let expected = match doc["request"].as_u64() {
            Some(1) => json!(["one-a", "one-b"]),
            Some(2) => json!(["two-a", "two-b"]),
            other => panic!("unexpected request {:?}", other),
        };
        assert_eq!(doc["messages"]["INFO"], expected);
    }
}

#[tokio::test]
async fn test_reset_empties_collection_and_keeps_accepting_writes() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let logger = connected(dir.path(), store.clone(), json!({"individual_lines": true})).await;

    for i in 0..3 {
        logger.info(&format!("line {}", i)).await;
    }
    assert_eq!(store.documents(COLLECTION).len(), 3);

    logger.reset().await.unwrap();
    assert!(store.documents(COLLECTION).is_empty());
    assert_eq!(store.list_collections().await.unwrap(), vec![COLLECTION.to_string()]);

    logger.info("after reset").await;
    let docs = store.documents(COLLECTION);
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["message"], "after reset");
}

#[tokio::test]
async fn test_unreachable_store_degrades_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::unavailable();

    let err = Logger::connect_with_store(options(dir.path(), json!({})), store.clone())
        .await
        .unwrap_err();
    assert!(matches!(err.source, LogError::BackendUnavailable(_)));

    let logger = err.into_degraded().unwrap();
    assert_eq!(logger.state(), WriterState::Degraded);
    assert!(!logger.is_connected());

    let returned = logger
        .run(Metadata::new(), async {
            Ok::<_, anyhow::Error>(logger.add(Severity::Error, "payment failed", None).await.to_string())
        })
        .await
        .unwrap();
    assert_eq!(returned, "payment failed");

    assert_eq!(store.insert_attempts(), 0);
    let contents = read_log(dir.path());
    assert!(contents.contains("ERROR shop: payment failed"));
    // The connection failure itself is the first line of the file
    assert!(contents.lines().next().unwrap().contains("ERROR"));

    assert!(matches!(logger.reset().await, Err(LogError::Degraded)));
}

#[tokio::test]
async fn test_production_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let store = FlakyStore::new();
    let options = capped_logger::LoggerOptions::new(
        capped_logger::config::Environment::production(),
        dir.path().join("production.log"),
    )
    .with_source(capped_logger::config::MapSource::missing("capped_logger.yml"))
    .with_application_name("shop");

    let logger = Logger::connect_with_store(options, store.clone()).await.unwrap();
    assert_eq!(logger.config().unwrap().collection, "production_log");

    assert_eq!(
        store.inner.bounds("production_log").unwrap(),
        Some(CappedBounds {
            size_bytes: 256 * 1024 * 1024,
            max_documents: 10_000_000,
        })
    );
}
