//! Extraction runs against the SQLite catalog backend

use pretty_assertions::assert_eq;
use serde_json::json;
use sqlx::Row;
use std::sync::Arc;

use crate::common::fixtures::{date, default_response, test_config, ScriptedApi};
use crate::common::logging::{init_test_logging, log_test_step};
use financial_etl::database::CatalogStore;
use financial_etl::models::ExtractionMode;
use financial_etl::pipeline::Extractor;
use financial_etl::storage::ArtifactStore;

async fn count(store: &CatalogStore, table: &str) -> i64 {
    sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", table))
        .fetch_one(store.pool())
        .await
        .unwrap()
        .get::<i64, _>("n")
}

fn calendar_api() -> ScriptedApi {
    ScriptedApi::new(|request| {
        if request.path == "earning_calendar" {
            let from = request.params[0].1.clone();
            Ok(json!([
                { "symbol": "{AAPL}", "date": from },
                { "symbol": "MSFT", "date": from }
            ]))
        } else {
            Ok(default_response(request))
        }
    })
}

#[tokio::test]
async fn test_catalog_run_is_incremental() {
    init_test_logging();
    log_test_step("Full run against an in-memory catalog");

    let store = CatalogStore::in_memory().await.unwrap();
    let api = Arc::new(calendar_api());
    let extractor = Extractor::new(
        test_config(&[("STORAGE_BACKEND", "catalog")]),
        api.clone(),
        Arc::new(store.clone()),
    )
    .with_today(date(2024, 1, 5));

    let first = extractor.run(&ExtractionMode::ALL).await.unwrap();
    assert_eq!(first.dispatched(), 2 + 2 + 4);

    assert_eq!(count(&store, "raw_earning_calendar").await, 4);
    assert_eq!(count(&store, "raw_profile").await, 2);
    assert_eq!(count(&store, "process_profile").await, 2);
    assert_eq!(count(&store, "raw_historical_price_full").await, 4);
    assert_eq!(count(&store, "process_historical_price_full").await, 4);
    assert_eq!(
        store.artifact_names(ExtractionMode::EarningCalendar).await.unwrap(),
        vec!["2024-01-05".to_string()]
    );

    let second = extractor.run(&ExtractionMode::ALL).await.unwrap();
    assert_eq!(second.dispatched(), 0);
    assert_eq!(api.calls().len(), 8);
}

#[tokio::test]
async fn test_curated_keys_count_as_completed() {
    let store = CatalogStore::in_memory().await.unwrap();
    for mode in ExtractionMode::ALL {
        store.register_schema(mode).await.unwrap();
    }
    store
        .write_artifact(
            ExtractionMode::EarningCalendar,
            "2024-01-31",
            &[
                json!({"symbol": "AAPL", "date": "2024-01-25"}),
                json!({"symbol": "MSFT", "date": "2024-01-30"}),
            ],
        )
        .await
        .unwrap();
    sqlx::query("INSERT INTO ref_profile (symbol, date, payload) VALUES ('AAPL', NULL, '{}')")
        .execute(store.pool())
        .await
        .unwrap();

    let api = Arc::new(ScriptedApi::healthy());
    let report = Extractor::new(test_config(&[]), api.clone(), Arc::new(store))
        .with_today(date(2024, 1, 31))
        .run(&[ExtractionMode::Profile])
        .await
        .unwrap();

    assert_eq!(report.dispatched(), 1);
    assert_eq!(api.calls(), vec!["profile/MSFT".to_string()]);
}
