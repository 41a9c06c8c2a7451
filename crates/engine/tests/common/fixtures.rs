//! Seed data and engine wiring for tests.

use bulwark_core::config::AppConfig;
use bulwark_core::{Alert, Record};
use bulwark_engine::MutationOrchestrator;
use bulwark_storage::DocumentStore;
use std::sync::Arc;
use time::macros::datetime;

/// Build an orchestrator over `store` with the given batch size.
#[allow(dead_code)]
pub fn orchestrator(store: Arc<dyn DocumentStore>, batch_size: usize) -> MutationOrchestrator {
    let mut config = AppConfig::for_testing();
    config.batch.batch_size = batch_size;
    config.operator.name = "tester".to_string();
    MutationOrchestrator::from_config(store, &config)
}

/// An alert with a fixed timestamp and the given name.
#[allow(dead_code)]
pub fn sample_alert(name: &str) -> Alert {
    Alert {
        alert_name: name.to_string(),
        tenant: "acme".to_string(),
        src_ip: "10.0.0.1".to_string(),
        ..Alert::new(datetime!(2024-03-01 12:00:00 UTC))
    }
}

/// Store one alert per id.
#[allow(dead_code)]
pub async fn seed_alerts(store: &dyn DocumentStore, ids: &[&str]) {
    for id in ids {
        let doc = Record::from(sample_alert(id)).to_document().unwrap();
        store.set("alerts", id, doc).await.unwrap();
    }
}

#[allow(dead_code)]
pub fn strings(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}
