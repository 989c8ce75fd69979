mod support;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use gazette_adapters::FixtureFeed;
use gazette_core::Category;
use gazette_storage::BookletStore;
use gazette_sync::{IngestOptions, IngestPipeline};
use support::{raw_result, record, FakeSink, StaticFeed};

async fn pipeline(feed: StaticFeed, sink: Arc<FakeSink>) -> (IngestPipeline, BookletStore) {
    let store = BookletStore::open_in_memory().await.unwrap();
    let pipeline = IngestPipeline::new(store.clone(), Box::new(feed), sink);
    (pipeline, store)
}

fn title_a_b() -> StaticFeed {
    StaticFeed::default().with_page(Category::Law, vec![raw_result(500, "Title A<br/>Title B")])
}

#[tokio::test]
async fn failed_first_create_stops_the_batch_and_records_no_keys() {
    let sink = Arc::new(FakeSink::rejecting(0));
    let (pipeline, store) = pipeline(title_a_b(), sink.clone()).await;

    let summary = pipeline.run_once(&IngestOptions::default()).await.unwrap();

    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.tickets_created, 0);
    let halted = summary.send_halted.expect("batch halted");
    assert_eq!(halted.display_name, "Title A");
    assert_eq!(halted.not_attempted, 1);
    assert_eq!(sink.attempted_summaries(), vec!["Title A"]);

    let rows = store.rows_by_booklet_number(500).await.unwrap();
    let names = rows.iter().map(|r| r.display_name()).collect::<Vec<_>>();
    assert_eq!(names, vec!["Title A", "Title B"]);
    assert_eq!(rows[0].record.description, rows[1].record.description);
    assert!(rows.iter().all(|r| r.ticket_key.is_none()));
}

#[tokio::test]
async fn created_keys_are_recorded_and_a_rerun_is_a_no_op() {
    let sink = Arc::new(FakeSink::default());
    let (pipeline, store) = pipeline(title_a_b(), sink.clone()).await;

    let first = pipeline.run_once(&IngestOptions::default()).await.unwrap();
    assert_eq!(first.tickets_created, 2);
    assert_eq!(sink.attempted_summaries(), vec!["Title A", "Title B"]);
    let keys = store
        .rows_by_booklet_number(500)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.ticket_key)
        .collect::<Vec<_>>();
    assert_eq!(keys, vec![Some("KOL-1".to_string()), Some("KOL-2".to_string())]);

    let second = pipeline.run_once(&IngestOptions::default()).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.categories[0].skipped, 2);
    assert_eq!(sink.attempted_summaries().len(), 2);
    assert_eq!(store.count().await.unwrap(), 2);
}

#[tokio::test]
async fn lookback_window_admits_the_boundary_booklet() {
    let feed = StaticFeed::default().with_page(
        Category::Law,
        vec![raw_result(50, "Fifty"), raw_result(49, "Forty nine")],
    );
    let sink = Arc::new(FakeSink::default());
    let (pipeline, store) = pipeline(feed, sink).await;
    store.insert(&record(Category::Law, 100, "Hundred")).await.unwrap();

    let summary = pipeline.run_once(&IngestOptions::default()).await.unwrap();

    let law = &summary.categories[0];
    assert_eq!(law.high_water, Some(100));
    assert_eq!((law.admitted, law.skipped), (1, 1));
    assert!(store.by_number(Category::Law, 49).await.unwrap().is_none());
    assert!(store.by_number(Category::Law, 50).await.unwrap().is_some());
}

#[tokio::test]
async fn explicit_anchor_replaces_the_stored_maximum() {
    let feed = StaticFeed::default().with_page(
        Category::Regulation,
        vec![raw_result(12, "Twelve"), raw_result(9, "Nine")],
    );
    let (pipeline, store) = pipeline(feed, Arc::new(FakeSink::default())).await;
    store.insert(&record(Category::Regulation, 10, "Ten")).await.unwrap();
    store.insert(&record(Category::Regulation, 40, "Forty")).await.unwrap();

    let options = IngestOptions {
        lookback: 0,
        anchors: BTreeMap::from([(Category::Regulation, 10)]),
        ..IngestOptions::default()
    };
    let summary = pipeline.run_once(&options).await.unwrap();
    let regulation = &summary.categories[1];
    assert_eq!(regulation.high_water, Some(10));
    assert_eq!(regulation.admitted, 1);
    assert!(store.by_number(Category::Regulation, 12).await.unwrap().is_some());

    let missing = IngestOptions {
        anchors: BTreeMap::from([(Category::Regulation, 11)]),
        ..IngestOptions::default()
    };
    let err = pipeline.run_once(&missing).await.unwrap_err();
    assert!(format!("{err:#}").contains("#11 is not stored"));
}

#[tokio::test]
async fn dry_run_writes_nothing_and_calls_nothing() {
    let sink = Arc::new(FakeSink::default());
    let reports = tempfile::tempdir().unwrap();
    let store = BookletStore::open_in_memory().await.unwrap();
    let pipeline = IngestPipeline::new(store.clone(), Box::new(title_a_b()), sink.clone())
        .with_reports_root(Some(reports.path().to_path_buf()));

    let options = IngestOptions {
        dry_run: true,
        ..IngestOptions::default()
    };
    let summary = pipeline.run_once(&options).await.unwrap();

    assert_eq!(summary.categories[0].admitted, 2);
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.report_path, None);
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(sink.attempted_summaries().is_empty());
    assert!(!reports.path().join("reports").exists());
}

#[tokio::test]
async fn run_report_is_written_under_the_run_id() {
    let reports = tempfile::tempdir().unwrap();
    let store = BookletStore::open_in_memory().await.unwrap();
    let pipeline = IngestPipeline::new(store, Box::new(title_a_b()), Arc::new(FakeSink::default()))
        .with_reports_root(Some(reports.path().to_path_buf()));

    let summary = pipeline.run_once(&IngestOptions::default()).await.unwrap();

    let expected = reports
        .path()
        .join("reports")
        .join(summary.run_id.to_string())
        .join("ingest_summary.json");
    assert_eq!(summary.report_path.as_deref(), Some(expected.display().to_string().as_str()));
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&expected).unwrap()).unwrap();
    assert_eq!(written["inserted"], 2);
    assert_eq!(written["tickets_created"], 2);
    assert_eq!(written["categories"][0]["category"], "law");
}

#[tokio::test]
async fn feed_failure_is_fatal_before_anything_is_written() {
    let feed = title_a_b().failing(Category::Regulation, 503);
    let sink = Arc::new(FakeSink::default());
    let (pipeline, store) = pipeline(feed, sink.clone()).await;

    let err = pipeline.run_once(&IngestOptions::default()).await.unwrap_err();

    assert!(format!("{err:#}").contains("503"));
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(sink.attempted_summaries().is_empty());
}

#[tokio::test]
async fn cycle_after_a_feed_failure_still_tickets_earlier_categories() {
    let store = BookletStore::open_in_memory().await.unwrap();
    let broken = IngestPipeline::new(
        store.clone(),
        Box::new(title_a_b().failing(Category::Regulation, 503)),
        Arc::new(FakeSink::default()),
    );
    broken.run_once(&IngestOptions::default()).await.unwrap_err();

    let sink = Arc::new(FakeSink::default());
    let healthy = IngestPipeline::new(store.clone(), Box::new(title_a_b()), sink.clone());
    let summary = healthy.run_once(&IngestOptions::default()).await.unwrap();

    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.tickets_created, 2);
    assert_eq!(sink.attempted_summaries(), vec!["Title A", "Title B"]);
    assert!(store.without_ticket_key(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_anchor_in_a_later_category_writes_nothing() {
    let feed = title_a_b().with_page(Category::Regulation, vec![raw_result(900, "Takana")]);
    let (pipeline, store) = pipeline(feed, Arc::new(FakeSink::default())).await;
    let options = IngestOptions {
        anchors: BTreeMap::from([(Category::Regulation, 42)]),
        ..IngestOptions::default()
    };

    let err = pipeline.run_once(&options).await.unwrap_err();

    assert!(format!("{err:#}").contains("cannot anchor"));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn several_documents_in_one_item_abort_the_cycle() {
    let mut doc = raw_result(77, "A");
    let descriptor = doc["Data"]["Document"][0].clone();
    doc["Data"]["Document"]
        .as_array_mut()
        .unwrap()
        .push(descriptor);
    let feed = StaticFeed::default().with_page(Category::Law, vec![doc]);
    let (pipeline, store) = pipeline(feed, Arc::new(FakeSink::default())).await;

    let err = pipeline.run_once(&IngestOptions::default()).await.unwrap_err();
    assert!(format!("{err:#}").contains("expected exactly one"));
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn resend_skips_admission_and_keeps_existing_keys() {
    let sink = Arc::new(FakeSink::default());
    let (pipeline, store) = pipeline(title_a_b(), sink.clone()).await;
    pipeline.run_once(&IngestOptions::default()).await.unwrap();
    let orphan = store.insert(&record(Category::Notification, 500, "Orphan")).await.unwrap();

    let summary = pipeline.resend(500, false).await.unwrap();

    assert_eq!(summary.rows, 3);
    assert_eq!(summary.tickets_created, 3);
    assert_eq!(summary.keys_recorded, 1);
    let rows = store.rows_by_booklet_number(500).await.unwrap();
    let keys = rows
        .iter()
        .map(|r| (r.id, r.ticket_key.clone().unwrap()))
        .collect::<Vec<_>>();
    assert_eq!(keys[0].1, "KOL-1");
    assert_eq!(keys[1].1, "KOL-2");
    assert_eq!(keys[2], (orphan, "KOL-5".to_string()));
}

#[tokio::test]
async fn captured_fixture_pages_flow_through_in_category_order() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/feed");
    let sink = Arc::new(FakeSink::default());
    let store = BookletStore::open_in_memory().await.unwrap();
    let pipeline = IngestPipeline::new(store.clone(), Box::new(FixtureFeed::new(root)), sink.clone());

    let summary = pipeline.run_once(&IngestOptions::default()).await.unwrap();

    assert_eq!(summary.feed, "fixture");
    let admitted = summary
        .categories
        .iter()
        .map(|c| (c.category, c.admitted))
        .collect::<Vec<_>>();
    assert_eq!(
        admitted,
        vec![(Category::Law, 5), (Category::Regulation, 2), (Category::Notification, 0)]
    );
    let summaries = sink.attempted_summaries();
    assert_eq!(summaries.len(), 7);
    assert_eq!(summaries[0], "חוק שעות עבודה ומנוחה (תיקון מס' 22)");
    assert_eq!(summaries[6], "תקנות הנמלים (שינוי אגרות), התשפ\"ד-2024");
    assert!(store.without_ticket_key(None).await.unwrap().is_empty());
}
