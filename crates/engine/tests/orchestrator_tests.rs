// Bulk delete/update/restore and CSV import/export through the orchestrator.

mod common;

use bulwark_core::codec;
use bulwark_engine::{BatchOperation, EngineError, StatusPatch};
use bulwark_storage::{DocumentStore, Filter, MemoryBackend};
use common::{FlakyStore, orchestrator, seed_alerts, strings};
use std::sync::Arc;
use time::OffsetDateTime;

const THREE_ROWS: &str = "\
Status,Alert Name,Timestamp,SRC Geo Code
New,Port scan,03/01/2024 10:00:00,NL
Closed,\"Login, failed\",,DE
New,Beacon,3/2/2024 9:05:00,US
";

#[tokio::test]
async fn test_bulk_delete_cancelled_after_first_window() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    seed_alerts(&*store, &["a", "b", "c", "d", "e"]).await;
    let engine = orchestrator(store.clone(), 2);

    let op = BatchOperation::new();
    let token = op.cancellation_token();
    let op = op.with_observer(move |_| token.cancel());

    let ids = strings(&["a", "b", "c", "d", "e"]);
    let result = engine.bulk_delete("alerts", &ids, &op).await.unwrap();

    assert!(result.cancelled);
    assert_eq!(result.processed, 2);
    assert_eq!(result.success_count, 2);
    assert!(op.state().cancelled);
    for id in ["a", "b"] {
        assert!(store.exists("trash", id).await.unwrap());
        assert!(!store.exists("alerts", id).await.unwrap());
    }
    for id in ["c", "d", "e"] {
        assert!(store.exists("alerts", id).await.unwrap());
        assert!(!store.exists("trash", id).await.unwrap());
    }
}

#[tokio::test]
async fn test_bulk_delete_reports_mixed_results() {
    let store = FlakyStore::new();
    seed_alerts(&*store, &["a", "b", "c"]).await;
    store.fail_on("b");
    let engine = orchestrator(store.clone(), 5);

    let result = engine
        .bulk_delete("alerts", &strings(&["a", "b", "c", "zz"]), &BatchOperation::new())
        .await
        .unwrap();

    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 2);
    let failed: Vec<_> = result.errors.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(failed, ["b", "zz"]);
    assert!(store.exists("alerts", "b").await.unwrap());
}

#[tokio::test]
async fn test_bulk_delete_rejects_unknown_collection() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    let engine = orchestrator(store, 5);
    let err = engine
        .bulk_delete("users", &strings(&["a"]), &BatchOperation::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Core(_)));
}

#[tokio::test]
async fn test_bulk_update_patches_status_fields() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    seed_alerts(&*store, &["a", "b"]).await;
    let engine = orchestrator(store.clone(), 5);

    let patch = StatusPatch {
        status: Some("Closed".into()),
        verification_status: Some("False Positive".into()),
    };
    let result = engine
        .bulk_update("alerts", &strings(&["a", "b", "missing"]), &patch, &BatchOperation::new())
        .await
        .unwrap();

    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 1);
    assert_eq!(result.errors[0].id, "missing");
    for id in ["a", "b"] {
        let doc = store.get("alerts", id).await.unwrap().unwrap();
        assert_eq!(doc["status"], "Closed");
        assert_eq!(doc["verificationStatus"], "False Positive");
        assert_eq!(doc["alertName"], id);
    }
    assert!(!store.exists("alerts", "missing").await.unwrap());
}

#[tokio::test]
async fn test_bulk_update_rejects_empty_patch_before_writing() {
    let store = FlakyStore::new();
    seed_alerts(&*store, &["a"]).await;
    let before = store.commit_count();
    let engine = orchestrator(store.clone(), 5);

    let err = engine
        .bulk_update("alerts", &strings(&["a"]), &StatusPatch::default(), &BatchOperation::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidPatch(_)));
    assert_eq!(store.commit_count(), before);
}

#[tokio::test]
async fn test_import_fills_missing_timestamp_with_now() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    let engine = orchestrator(store.clone(), 2);

    let before = OffsetDateTime::now_utc();
    let outcome = engine
        .import_csv(THREE_ROWS, &BatchOperation::new())
        .await
        .unwrap();
    let after = OffsetDateTime::now_utc();

    assert_eq!(outcome.result.success_count, 3);
    assert_eq!(outcome.result.failure_count, 0);
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(outcome.warnings[0].row, 2);
    assert_eq!(outcome.ids.len(), 3);
    assert_eq!(store.query("alerts", &Filter::all()).await.unwrap().len(), 3);

    let second = store.get("alerts", &outcome.ids[1]).await.unwrap().unwrap();
    assert_eq!(second["alertName"], "Login, failed");
    assert_eq!(second["status"], "Closed");
    assert_eq!(second["verificationStatus"], "To Be Confirmed");
    let ts = OffsetDateTime::parse(
        second["timestamp"].as_str().unwrap(),
        &time::format_description::well_known::Rfc3339,
    )
    .unwrap();
    assert!(ts >= before.replace_nanosecond(0).unwrap() && ts <= after);

    let first = store.get("alerts", &outcome.ids[0]).await.unwrap().unwrap();
    assert_eq!(first["sourceGeo"]["country"], "NL");
    assert_eq!(first["timestamp"], "2024-03-01T10:00:00Z");
}

#[tokio::test]
async fn test_import_format_error_writes_nothing() {
    let store = FlakyStore::new();
    let engine = orchestrator(store.clone(), 2);

    for raw in ["", "Colour,Shape\nred,round\n"] {
        let err = engine
            .import_csv(raw, &BatchOperation::new())
            .await
            .unwrap_err();
        assert!(
            matches!(err, EngineError::Core(bulwark_core::Error::Format(_))),
            "got {err}"
        );
    }
    assert_eq!(store.commit_count(), 0);
}

#[tokio::test]
async fn test_import_reports_failed_rows_without_rollback() {
    let store = FlakyStore::new();
    store.fail_after(2);
    let engine = orchestrator(store.clone(), 2);

    let outcome = engine
        .import_csv(THREE_ROWS, &BatchOperation::new())
        .await
        .unwrap();

    assert_eq!(outcome.result.success_count, 2);
    assert_eq!(outcome.result.failure_count, 1);
    assert_eq!(outcome.result.errors[0].id, outcome.ids[2]);
    // Rows saved before the failure are kept.
    assert_eq!(store.query("alerts", &Filter::all()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_export_orders_by_timestamp_then_id_and_round_trips() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    let engine = orchestrator(store.clone(), 3);
    let outcome = engine
        .import_csv(
            "Alert Name,Timestamp\nlate,05/01/2024 00:00:00\nearly,01/01/2024 00:00:00\n",
            &BatchOperation::new(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.result.success_count, 2);

    let csv = engine.export_csv("alerts").await.unwrap();
    let mut lines = csv.lines();
    assert!(lines.next().unwrap().starts_with("\"Status\",\"Verification Status\""));
    assert!(lines.next().unwrap().contains("\"early\""));
    assert!(lines.next().unwrap().contains("\"late\""));

    let decoded = codec::decode_alerts(&csv, OffsetDateTime::now_utc()).unwrap();
    assert!(decoded.warnings.is_empty());
    let names: Vec<_> = decoded.alerts.iter().map(|a| a.alert_name.as_str()).collect();
    assert_eq!(names, ["early", "late"]);
}

#[tokio::test]
async fn test_export_rejects_non_alert_collections() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    let engine = orchestrator(store, 3);
    assert!(engine.export_csv("logs").await.is_err());
    assert!(engine.export_csv("users").await.is_err());
}

#[tokio::test]
async fn test_bulk_restore_counts_missing_as_success() {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryBackend::new());
    seed_alerts(&*store, &["a", "b"]).await;
    let engine = orchestrator(store.clone(), 2);
    engine
        .bulk_delete("alerts", &strings(&["a", "b"]), &BatchOperation::new())
        .await
        .unwrap();

    let result = engine
        .bulk_restore(&strings(&["a", "b", "never-deleted"]), &BatchOperation::new())
        .await
        .unwrap();

    assert_eq!(result.success_count, 3);
    assert_eq!(result.failure_count, 0);
    assert!(store.exists("alerts", "a").await.unwrap());
    assert!(store.exists("alerts", "b").await.unwrap());
    assert!(engine.trash().list_trash().await.unwrap().is_empty());
}
