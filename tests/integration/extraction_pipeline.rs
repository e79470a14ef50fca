//! Extraction runs against the file backend

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::common::fixtures::{date, default_response, seed_calendar, test_config, FailingStore, ScriptedApi};
use crate::common::logging::{init_test_logging, log_test_data, log_test_step};
use financial_etl::dataset::collect_rows;
use financial_etl::dedup::SortOrder;
use financial_etl::error::{ExtractError, FetchError};
use financial_etl::models::{EntityKey, ExtractionMode};
use financial_etl::pipeline::Extractor;
use financial_etl::storage::{ArtifactStore, FileStore, KeyLedger};

fn artifact_sizes(store: &FileStore, mode: ExtractionMode) -> Vec<usize> {
    let mut sizes: Vec<usize> = std::fs::read_dir(store.mode_dir(mode))
        .unwrap()
        .map(|entry| {
            let content = std::fs::read_to_string(entry.unwrap().path()).unwrap();
            let body: Value = serde_json::from_str(&content).unwrap();
            body["result"].as_array().unwrap().len()
        })
        .collect();
    sizes.sort();
    sizes
}

#[tokio::test]
async fn test_second_run_dispatches_nothing() {
    init_test_logging();
    log_test_step("Running profile extraction twice");

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));
    seed_calendar(store.as_ref()).await;

    let api = Arc::new(ScriptedApi::healthy());
    let extractor = Extractor::new(test_config(&[]), api.clone(), store.clone()).with_today(date(2024, 1, 31));

    let first = extractor.run(&ExtractionMode::ALL).await.unwrap();
    log_test_data("First run", &first);
    assert_eq!(first.for_mode(ExtractionMode::EarningCalendar).unwrap().fetch.dispatched, 0);
    assert_eq!(first.for_mode(ExtractionMode::Profile).unwrap().fetch.dispatched, 3);
    assert_eq!(first.for_mode(ExtractionMode::HistoricalPriceFull).unwrap().fetch.dispatched, 3);

    let second = extractor.run(&ExtractionMode::ALL).await.unwrap();
    assert_eq!(second.dispatched(), 0);
    assert_eq!(api.calls().len(), 6);
}

#[tokio::test]
async fn test_failed_fetch_is_marked_done_with_placeholder() {
    init_test_logging();

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));
    seed_calendar(store.as_ref()).await;

    let api = Arc::new(ScriptedApi::new(|request| {
        if request.path == "profile/AAPL" {
            Err(FetchError::Status {
                status: 500,
                path: request.path.clone(),
            })
        } else {
            Ok(default_response(request))
        }
    }));
    let extractor = Extractor::new(test_config(&[]), api.clone(), store.clone()).with_today(date(2024, 1, 31));

    let report = extractor.run(&[ExtractionMode::Profile]).await.unwrap();
    assert_eq!(report.modes[0].fetch.failed, 1);

    let rows = store.read_rows(ExtractionMode::Profile).await.unwrap();
    assert!(rows.contains(&json!({"symbol": "AAPL"})));

    let again = extractor.run(&[ExtractionMode::Profile]).await.unwrap();
    assert_eq!(again.dispatched(), 0);
    assert_eq!(api.calls().iter().filter(|path| *path == "profile/AAPL").count(), 1);
}

#[tokio::test]
async fn test_flush_threshold_splits_batches() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));
    seed_calendar(store.as_ref()).await;

    let report = Extractor::new(
        test_config(&[("ENTITY_FLUSH_THRESHOLD", "2")]),
        Arc::new(ScriptedApi::healthy()),
        store.clone(),
    )
    .with_today(date(2024, 1, 31))
    .run(&[ExtractionMode::Profile])
    .await
    .unwrap();

    assert_eq!(report.modes[0].artifacts.len(), 2);
    assert_eq!(report.modes[0].keys_registered, 3);
    assert_eq!(artifact_sizes(&store, ExtractionMode::Profile), vec![1, 2]);
}

#[tokio::test]
async fn test_reflushed_batch_is_still_deduped() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));
    seed_calendar(store.as_ref()).await;

    // Same batch landed twice, as after a crash between flush and registration
    let batch = [json!({"symbol": "MSFT", "companyName": "Microsoft"})];
    store.write_artifact(ExtractionMode::Profile, "20240131000000000000001", &batch).await.unwrap();
    store.write_artifact(ExtractionMode::Profile, "20240131000000000000002", &batch).await.unwrap();

    let pending = store
        .pending_keys(ExtractionMode::Profile, SortOrder::Ascending)
        .await
        .unwrap();
    assert_eq!(pending, vec![EntityKey::symbol("AAPL"), EntityKey::symbol("NVDA")]);

    let rows = collect_rows(store.as_ref(), ExtractionMode::Profile, &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_failed_flush_registers_nothing() {
    init_test_logging();

    let dir = tempfile::tempdir().unwrap();
    let failing = Arc::new(FailingStore::new(dir.path(), ExtractionMode::Profile));
    seed_calendar(failing.as_ref()).await;

    let result = Extractor::new(test_config(&[]), Arc::new(ScriptedApi::healthy()), failing)
        .with_today(date(2024, 1, 31))
        .run(&[ExtractionMode::Profile])
        .await;

    let err = result.unwrap_err();
    assert_matches!(
        err.downcast_ref::<ExtractError>(),
        Some(ExtractError::Flush { mode: ExtractionMode::Profile, records: 3, .. })
    );

    // Nothing landed, so every key is retried by the next run
    let store = Arc::new(FileStore::new(dir.path()));
    assert!(store.completed_keys(ExtractionMode::Profile).await.unwrap().is_empty());
    let api = Arc::new(ScriptedApi::healthy());
    let report = Extractor::new(test_config(&[]), api.clone(), store)
        .with_today(date(2024, 1, 31))
        .run(&[ExtractionMode::Profile])
        .await
        .unwrap();
    assert_eq!(report.dispatched(), 3);
}

#[tokio::test]
async fn test_failure_streak_aborts_without_registering() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));
    seed_calendar(store.as_ref()).await;

    let api = Arc::new(ScriptedApi::new(|_| Err(FetchError::Transport("connection reset".to_string()))));
    let result = Extractor::new(
        test_config(&[("MAX_CONSECUTIVE_FAILURES", "2"), ("FETCH_CONCURRENCY", "1")]),
        api,
        store.clone(),
    )
    .with_today(date(2024, 1, 31))
    .run(&[ExtractionMode::HistoricalPriceFull])
    .await;

    assert_matches!(
        result.unwrap_err().downcast_ref::<ExtractError>(),
        Some(ExtractError::TooManyFailures { count: 3, limit: 2 })
    );
    assert!(store
        .completed_keys(ExtractionMode::HistoricalPriceFull)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_calendar_output_feeds_entity_modes() {
    init_test_logging();

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));

    let api = Arc::new(ScriptedApi::new(|request| {
        if request.path == "earning_calendar" {
            let from = request.params[0].1.clone();
            Ok(json!([{ "symbol": "AAPL", "date": from }]))
        } else {
            Ok(default_response(request))
        }
    }));
    let report = Extractor::new(test_config(&[]), api, store.clone())
        .with_today(date(2024, 1, 5))
        .run(&ExtractionMode::ALL)
        .await
        .unwrap();

    // Windows [01-01, 01-03) and [01-03, 01-05), each reporting AAPL on its first day
    assert_eq!(report.for_mode(ExtractionMode::EarningCalendar).unwrap().fetch.dispatched, 2);
    assert_eq!(report.for_mode(ExtractionMode::Profile).unwrap().fetch.dispatched, 1);
    assert_eq!(report.for_mode(ExtractionMode::HistoricalPriceFull).unwrap().fetch.dispatched, 2);

    let history = collect_rows(
        store.as_ref(),
        ExtractionMode::HistoricalPriceFull,
        &["date".to_string(), "symbol".to_string()],
    )
    .await
    .unwrap();
    assert_eq!(
        history,
        vec![
            json!({"date": "2024-01-01", "symbol": "AAPL"}),
            json!({"date": "2024-01-03", "symbol": "AAPL"}),
        ]
    );
}
