// Soft delete, restore and purge behaviour of the trash manager.

mod common;

use bulwark_core::config::TrashConfig;
use bulwark_engine::{EngineError, RestoreOutcome, TrashManager};
use bulwark_storage::{DocumentStore, MemoryBackend};
use common::{FlakyStore, seed_alerts};
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

fn manager(store: Arc<dyn DocumentStore>) -> TrashManager {
    TrashManager::new(store, TrashConfig::default())
}

#[tokio::test]
async fn test_soft_delete_moves_record_to_trash() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    seed_alerts(&*store, &["a1"]).await;
    let trash = manager(store.clone());

    let entry = trash.soft_delete("alerts", "a1", "alice").await.unwrap();

    assert!(!store.exists("alerts", "a1").await.unwrap());
    let doc = store.get("trash", "a1").await.unwrap().unwrap();
    assert_eq!(doc["originalCollection"], "alerts");
    assert_eq!(doc["originalId"], "a1");
    assert_eq!(doc["deletedBy"], "alice");
    assert_eq!(doc["type"], "alert");
    assert_eq!(doc["alertName"], "a1");
    assert_eq!(doc["restorationCount"], 0);

    let deleted_at = entry.deleted_at.unwrap();
    assert_eq!(entry.expires_at.unwrap() - deleted_at, time::Duration::days(30));
    assert!(entry.size.unwrap() > 0);
}

#[tokio::test]
async fn test_second_soft_delete_fails() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    seed_alerts(&*store, &["a1"]).await;
    let trash = manager(store.clone());

    trash.soft_delete("alerts", "a1", "alice").await.unwrap();
    let err = trash.soft_delete("alerts", "a1", "alice").await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyTrashed(_)), "got {err}");

    let entries = trash.list_trash().await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_soft_delete_validates_input() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    let trash = manager(store);

    assert!(matches!(
        trash.soft_delete("", "a1", "alice").await,
        Err(EngineError::MissingMetadata(_))
    ));
    assert!(matches!(
        trash.soft_delete("alerts", " ", "alice").await,
        Err(EngineError::MissingMetadata(_))
    ));
    assert!(matches!(
        trash.soft_delete("users", "a1", "alice").await,
        Err(EngineError::MissingMetadata(_))
    ));
    assert!(matches!(
        trash.soft_delete("alerts", "ghost", "alice").await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_soft_delete_refuses_record_restore_would_reject() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    // A log without its required timestamp.
    let log = json!({"message": "x", "tenant": "acme"});
    store
        .set("logs", "l1", log.as_object().cloned().unwrap())
        .await
        .unwrap();
    let trash = manager(store.clone());

    let err = trash.soft_delete("logs", "l1", "alice").await.unwrap_err();
    assert!(
        matches!(err, EngineError::Core(bulwark_core::Error::InvalidRecord { .. })),
        "got {err}"
    );
    assert!(store.exists("logs", "l1").await.unwrap());
    assert!(!store.exists("trash", "l1").await.unwrap());
}

#[tokio::test]
async fn test_soft_delete_refuses_fields_named_like_trash_metadata() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    let alert = json!({"alertName": "x", "type": "phishing", "size": 3});
    store
        .set("alerts", "a1", alert.as_object().cloned().unwrap())
        .await
        .unwrap();
    let trash = manager(store.clone());

    let err = trash.soft_delete("alerts", "a1", "alice").await.unwrap_err();
    assert!(matches!(err, EngineError::MissingMetadata(_)), "got {err}");
    assert!(err.to_string().contains("type"), "got {err}");

    let live = store.get("alerts", "a1").await.unwrap().unwrap();
    assert_eq!(live["type"], "phishing");
    assert!(!store.exists("trash", "a1").await.unwrap());
}

#[tokio::test]
async fn test_every_trashed_record_can_be_restored() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    let log = json!({"message": "x", "timestamp": "2024-03-01T10:00:00Z"});
    store
        .set("logs", "l1", log.as_object().cloned().unwrap())
        .await
        .unwrap();
    let trash = manager(store.clone());

    trash.soft_delete("logs", "l1", "alice").await.unwrap();
    let outcome = trash.restore("l1", "bob").await.unwrap();
    assert!(matches!(outcome, RestoreOutcome::Restored { .. }), "{outcome:?}");
    let live = store.get("logs", "l1").await.unwrap().unwrap();
    assert_eq!(live["message"], "x");
}

#[tokio::test]
async fn test_failed_soft_delete_keeps_live_record() {
    let store = FlakyStore::new();
    seed_alerts(&*store, &["a1"]).await;
    store.fail_on("a1");
    let trash = manager(store.clone());

    let err = trash.soft_delete("alerts", "a1", "alice").await.unwrap_err();
    assert!(matches!(err, EngineError::Store(_)));
    assert!(store.exists("alerts", "a1").await.unwrap());
    assert!(!store.exists("trash", "a1").await.unwrap());
}

#[tokio::test]
async fn test_restore_twice_is_idempotent() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    seed_alerts(&*store, &["a1"]).await;
    let trash = manager(store.clone());
    trash.soft_delete("alerts", "a1", "alice").await.unwrap();

    let first = trash.restore("a1", "bob").await.unwrap();
    assert_eq!(
        first,
        RestoreOutcome::Restored {
            collection: "alerts".into(),
            id: "a1".into(),
            restoration_count: 1,
        }
    );
    let second = trash.restore("a1", "bob").await.unwrap();
    assert_eq!(second, RestoreOutcome::Missing);

    let live = store.get("alerts", "a1").await.unwrap().unwrap();
    assert_eq!(live["restoredBy"], "bob");
    assert_eq!(live["restorationCount"], 1);
    assert!(live.contains_key("restoredAt"));
    for key in [
        "originalCollection",
        "originalId",
        "deletedBy",
        "deletedAt",
        "expiresAt",
        "size",
        "type",
    ] {
        assert!(!live.contains_key(key), "{key} leaked into restored record");
    }
    assert!(trash.list_trash().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_restoration_count_carries_across_cycles() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    seed_alerts(&*store, &["a1"]).await;
    let trash = manager(store.clone());

    for expected in 1..=2 {
        trash.soft_delete("alerts", "a1", "alice").await.unwrap();
        match trash.restore("a1", "bob").await.unwrap() {
            RestoreOutcome::Restored {
                restoration_count, ..
            } => assert_eq!(restoration_count, expected),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_restore_when_live_copy_exists_purges_trash() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    seed_alerts(&*store, &["a1"]).await;
    let trash = manager(store.clone());
    trash.soft_delete("alerts", "a1", "alice").await.unwrap();
    // Someone recreated the record while it sat in the trash.
    seed_alerts(&*store, &["a1"]).await;

    let outcome = trash.restore("a1", "bob").await.unwrap();
    assert_eq!(
        outcome,
        RestoreOutcome::AlreadyRestored {
            collection: "alerts".into(),
            id: "a1".into(),
        }
    );
    assert!(store.exists("alerts", "a1").await.unwrap());
    assert!(!store.exists("trash", "a1").await.unwrap());
}

#[tokio::test]
async fn test_restore_rejects_incomplete_metadata() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    let trash = manager(store.clone());

    let no_collection = json!({"type": "alert", "status": "New"});
    store
        .set("trash", "t1", no_collection.as_object().cloned().unwrap())
        .await
        .unwrap();
    let mismatched = json!({"originalCollection": "alerts", "type": "log"});
    store
        .set("trash", "t2", mismatched.as_object().cloned().unwrap())
        .await
        .unwrap();
    let unknown = json!({"originalCollection": "users", "type": "alert"});
    store
        .set("trash", "t3", unknown.as_object().cloned().unwrap())
        .await
        .unwrap();

    for id in ["t1", "t2", "t3"] {
        let err = trash.restore(id, "bob").await.unwrap_err();
        assert!(
            matches!(err, EngineError::IncompleteMetadata { ref trash_id, .. } if trash_id == id),
            "{id}: got {err}"
        );
        // The entry is left for an operator to inspect.
        assert!(store.exists("trash", id).await.unwrap());
    }
}

#[tokio::test]
async fn test_sweep_purges_only_expired_entries() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    seed_alerts(&*store, &["a1", "a2"]).await;
    let trash = manager(store.clone());
    trash.soft_delete("alerts", "a1", "alice").await.unwrap();
    trash.soft_delete("alerts", "a2", "alice").await.unwrap();

    let now = OffsetDateTime::now_utc();
    assert_eq!(trash.sweep_expired(now).await.unwrap(), 0);
    assert_eq!(
        trash
            .sweep_expired(now + time::Duration::days(31))
            .await
            .unwrap(),
        2
    );
    assert!(trash.list_trash().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_trash_is_one_commit() {
    let store = FlakyStore::new();
    seed_alerts(&*store, &["a1", "a2", "a3"]).await;
    let trash = manager(store.clone());
    for id in ["a1", "a2", "a3"] {
        trash.soft_delete("alerts", id, "alice").await.unwrap();
    }

    let before = store.commit_count();
    assert_eq!(trash.empty_trash().await.unwrap(), 3);
    assert_eq!(store.commit_count(), before + 1);
    assert_eq!(trash.empty_trash().await.unwrap(), 0);
}

#[tokio::test]
async fn test_background_sweeper_purges_and_stops() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    let expired = json!({
        "originalCollection": "alerts",
        "originalId": "old",
        "type": "alert",
        "expiresAt": "2000-01-01T00:00:00Z",
    });
    store
        .set("trash", "old", expired.as_object().cloned().unwrap())
        .await
        .unwrap();

    let trash = Arc::new(manager(store.clone()));
    let cancel = CancellationToken::new();
    let handle = trash.spawn_sweeper(Duration::from_millis(10), cancel.clone());

    let mut purged = false;
    for _ in 0..100 {
        if !store.exists("trash", "old").await.unwrap() {
            purged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(purged, "sweeper never purged the expired entry");

    cancel.cancel();
    handle.await.unwrap();
}
