//! End-to-end crawl runs against in-memory fetchers and capturers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tempfile::TempDir;

use stocktrail::catalog::{Catalog, CatalogEntry};
use stocktrail::crawl::{CancelFlag, CrawlCoordinator, CrawlError, CrawlState, Poll, ProgressEvent};
use stocktrail::extract::ProductPageExtractor;
use stocktrail::models::{MetadataPolicy, Price};
use stocktrail::repository::{ObservationQuery, Store};
use stocktrail::scrapers::{FetchError, PageFetcher};
use stocktrail::snapshot::{CaptureError, SnapshotCapturer};

const BOX_A_PAGE: &str = r#"
    <html><body>
      <div class="price-block">
        <span class="woocommerce-Price-amount amount">€ 12,50</span>
      </div>
      <div class="text collapse"><p>Op voorraad: 42 stuks</p></div>
    </body></html>
"#;

/// Serves canned pages and records when each fetch started and ended.
#[derive(Clone, Default)]
struct FakeFetcher {
    pages: HashMap<String, Result<String, u16>>,
    calls: Arc<Mutex<Vec<(String, Instant, Instant)>>>,
    closed: Arc<AtomicBool>,
    /// Cancel this flag during the first fetch.
    cancel_on_fetch: Option<CancelFlag>,
    session_lost_on: Option<String>,
}

impl FakeFetcher {
    fn page(mut self, link: &str, body: &str) -> Self {
        self.pages.insert(link.to_string(), Ok(body.to_string()));
        self
    }

    fn status(mut self, link: &str, status: u16) -> Self {
        self.pages.insert(link.to_string(), Err(status));
        self
    }

    fn fetched_links(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.0.clone()).collect()
    }
}

#[async_trait]
impl PageFetcher for FakeFetcher {
    async fn fetch(&mut self, url: &str) -> Result<String, FetchError> {
        let started = Instant::now();
        if let Some(flag) = self.cancel_on_fetch.take() {
            flag.cancel();
        }
        // Stand-in for network latency
        tokio::time::sleep(Duration::from_millis(5)).await;
        let outcome = if self.session_lost_on.as_deref() == Some(url) {
            Err(FetchError::SessionLost("browser crashed".to_string()))
        } else {
            match self.pages.get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(FetchError::Status {
                    url: url.to_string(),
                    status: *status,
                }),
                None => Err(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        };
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), started, Instant::now()));
        outcome
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

enum CaptureMode {
    Bytes(Vec<u8>),
    Timeout,
    SessionLost,
}

struct FakeCapturer {
    mode: CaptureMode,
    closed: Arc<AtomicBool>,
}

impl FakeCapturer {
    fn new(mode: CaptureMode) -> Self {
        Self {
            mode,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl SnapshotCapturer for FakeCapturer {
    async fn capture(&mut self, _url: &str) -> Result<Vec<u8>, CaptureError> {
        match &self.mode {
            CaptureMode::Bytes(bytes) => Ok(bytes.clone()),
            CaptureMode::Timeout => Err(CaptureError::Timeout(Duration::from_secs(30))),
            CaptureMode::SessionLost => Err(CaptureError::SessionLost("tab crashed".to_string())),
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

fn entry(name: &str, link: &str) -> CatalogEntry {
    CatalogEntry {
        category: "Letterbox shipments".to_string(),
        subcategory: "Letterbox Boxes".to_string(),
        name: name.to_string(),
        link: link.to_string(),
    }
}

fn catalog(links: &[&str]) -> Catalog {
    Catalog::from_entries(links.iter().map(|link| entry(link, link)))
}

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn db(dir: &TempDir) -> PathBuf {
    dir.path().join("stocktrail.db")
}

fn coordinator(db_path: &Path, fetcher: FakeFetcher) -> CrawlCoordinator {
    CrawlCoordinator::new(
        db_path,
        Box::new(fetcher),
        Box::new(ProductPageExtractor::default()),
    )
}

#[tokio::test]
async fn test_single_product_run() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::parse(
        r#"{"Letterbox shipments": {"Letterbox Boxes": {
            "url": "http://x/c/letterbox",
            "products": [{"Name": "Box A", "link": "http://x/a"}]
        }}}"#,
    )
    .unwrap();
    let fetcher = FakeFetcher::default().page("http://x/a", BOX_A_PAGE);

    let summary = coordinator(&db(&dir), fetcher.clone())
        .run(&catalog)
        .await
        .unwrap();
    assert_eq!(summary.state, CrawlState::Completed);
    assert_eq!((summary.succeeded, summary.failed), (1, 0));
    assert!(fetcher.closed.load(Ordering::SeqCst));

    let store = Store::open(&db(&dir)).unwrap();
    let products = store.products().unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].link, "http://x/a");
    assert_eq!(products[0].name, "Box A");
    assert_eq!(products[0].first_seen, summary.observed_at);

    let history = store.history(products[0].id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].stock_amount, Some(42));
    assert_eq!(
        history[0].price,
        Some(Price::new(Decimal::from_str("12.50").unwrap()))
    );
    assert!(!history[0].has_snapshot);
    assert_eq!(history[0].observed_at, summary.observed_at);
}

#[tokio::test]
async fn test_repeated_runs_extend_one_history() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Catalog::from_entries(vec![entry("Box A", "http://x/a")]);
    let (t1, t2) = (ts("2024-08-01T09:00:00Z"), ts("2024-08-02T09:00:00Z"));

    for at in [t1, t2] {
        let fetcher = FakeFetcher::default().page("http://x/a", BOX_A_PAGE);
        coordinator(&db(&dir), fetcher)
            .with_run_timestamp(at)
            .run(&catalog)
            .await
            .unwrap();
    }

    let store = Store::open(&db(&dir)).unwrap();
    assert_eq!(store.products().unwrap().len(), 1);

    let records = store.observations(&ObservationQuery::default()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].observed_at, t1);
    assert_eq!(records[1].observed_at, t2);
    assert_eq!(records[0].product_id, records[1].product_id);
}

#[tokio::test]
async fn test_failed_fetch_does_not_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::default()
        .page("http://x/a", BOX_A_PAGE)
        .status("http://x/b", 500)
        .page("http://x/c", BOX_A_PAGE);

    let summary = coordinator(&db(&dir), fetcher.clone())
        .run(&catalog(&["http://x/a", "http://x/b", "http://x/c"]))
        .await
        .unwrap();

    assert_eq!(summary.state, CrawlState::Completed);
    assert_eq!((summary.succeeded, summary.failed), (2, 1));
    assert_eq!(
        fetcher.fetched_links(),
        vec!["http://x/a", "http://x/b", "http://x/c"]
    );

    let store = Store::open(&db(&dir)).unwrap();
    assert!(store.product_by_link("http://x/b").unwrap().is_none());
    for link in ["http://x/a", "http://x/c"] {
        let product = store.product_by_link(link).unwrap().unwrap();
        assert_eq!(store.history(product.id).unwrap().len(), 1);
    }
}

#[tokio::test]
async fn test_link_listed_twice_is_visited_once() {
    let dir = tempfile::tempdir().unwrap();
    let listed_twice = Catalog::from_entries(vec![
        entry("Box A", "http://x/a"),
        CatalogEntry {
            subcategory: "Postal boxes".to_string(),
            ..entry("Box A", "http://x/a")
        },
        entry("Box B", "http://x/b"),
    ]);
    let fetcher = FakeFetcher::default()
        .page("http://x/a", BOX_A_PAGE)
        .page("http://x/b", BOX_A_PAGE);

    let (handle, mut events) = coordinator(&db(&dir), fetcher.clone()).spawn(listed_twice);
    let mut skipped = Vec::new();
    while let Some(event) = events.recv().await {
        if let ProgressEvent::EntrySkipped { index, link } = event {
            skipped.push((index, link));
        }
    }
    let summary = handle.await.unwrap().unwrap();

    // Crawl order is a, b (Letterbox Boxes) then a again (Postal boxes)
    assert_eq!(skipped, vec![(2, "http://x/a".to_string())]);
    assert_eq!((summary.succeeded, summary.duplicates), (2, 1));
    assert_eq!(fetcher.fetched_links(), vec!["http://x/a", "http://x/b"]);

    let store = Store::open(&db(&dir)).unwrap();
    let product = store.product_by_link("http://x/a").unwrap().unwrap();
    assert_eq!(product.subcategory, "Letterbox Boxes");
    assert_eq!(store.history(product.id).unwrap().len(), 1);
    assert_eq!(store.count_observations().unwrap(), 2);
}

#[tokio::test]
async fn test_politeness_delay_between_fetches() {
    let dir = tempfile::tempdir().unwrap();
    let links = ["http://x/a", "http://x/b", "http://x/c"];
    let mut fetcher = FakeFetcher::default();
    for link in links {
        fetcher = fetcher.page(link, BOX_A_PAGE);
    }
    let delay = Duration::from_millis(60);

    coordinator(&db(&dir), fetcher.clone())
        .with_delay(delay)
        .run(&catalog(&links))
        .await
        .unwrap();

    let calls = fetcher.calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        let (_, _, previous_end) = pair[0];
        let (_, next_start, _) = pair[1];
        assert!(
            next_start.duration_since(previous_end) >= delay,
            "fetches only {:?} apart",
            next_start.duration_since(previous_end)
        );
    }
}

#[tokio::test]
async fn test_missing_stock_is_stored_as_null() {
    let dir = tempfile::tempdir().unwrap();
    let page = r#"<div class="price-block"><span class="woocommerce-Price-amount amount">€ 3,10</span></div>"#;
    let fetcher = FakeFetcher::default().page("http://x/a", page);

    coordinator(&db(&dir), fetcher)
        .run(&catalog(&["http://x/a"]))
        .await
        .unwrap();

    let store = Store::open(&db(&dir)).unwrap();
    let records = store.observations(&ObservationQuery::default()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].stock_amount, None);
    assert_eq!(
        records[0].price,
        Some(Price::new(Decimal::from_str("3.10").unwrap()))
    );
}

#[tokio::test]
async fn test_snapshot_is_stored() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::default().page("http://x/a", BOX_A_PAGE);
    let capturer = FakeCapturer::new(CaptureMode::Bytes(vec![0xFF, 0xD8, 0xFF, 0xE0]));
    let capturer_closed = capturer.closed.clone();

    let summary = coordinator(&db(&dir), fetcher)
        .with_capturer(Box::new(capturer))
        .run(&catalog(&["http://x/a"]))
        .await
        .unwrap();
    assert_eq!(summary.snapshots, 1);
    assert!(capturer_closed.load(Ordering::SeqCst));

    let store = Store::open(&db(&dir)).unwrap();
    let record = &store.observations(&ObservationQuery::default()).unwrap()[0];
    assert!(record.has_snapshot);
    assert_eq!(
        store.snapshot(record.observation_id).unwrap(),
        Some(vec![0xFF, 0xD8, 0xFF, 0xE0])
    );
}

#[tokio::test]
async fn test_failed_snapshot_keeps_observation() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::default().page("http://x/a", BOX_A_PAGE);

    let (handle, mut events) = coordinator(&db(&dir), fetcher)
        .with_capturer(Box::new(FakeCapturer::new(CaptureMode::Timeout)))
        .spawn(catalog(&["http://x/a"]));

    let mut skipped = false;
    while let Some(event) = events.recv().await {
        skipped |= matches!(event, ProgressEvent::SnapshotSkipped { .. });
    }
    let summary = handle.await.unwrap().unwrap();

    assert!(skipped);
    assert_eq!((summary.succeeded, summary.snapshots), (1, 0));

    let store = Store::open(&db(&dir)).unwrap();
    let records = store.observations(&ObservationQuery::default()).unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].has_snapshot);
    assert_eq!(records[0].stock_amount, Some(42));
}

#[tokio::test]
async fn test_lost_capture_session_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::default()
        .page("http://x/a", BOX_A_PAGE)
        .page("http://x/b", BOX_A_PAGE);

    let err = coordinator(&db(&dir), fetcher.clone())
        .with_capturer(Box::new(FakeCapturer::new(CaptureMode::SessionLost)))
        .run(&catalog(&["http://x/a", "http://x/b"]))
        .await
        .unwrap_err();

    assert!(matches!(err, CrawlError::Capture(CaptureError::SessionLost(_))));
    assert_eq!(fetcher.fetched_links(), vec!["http://x/a"]);
    assert!(fetcher.closed.load(Ordering::SeqCst));
    assert_eq!(Store::open(&db(&dir)).unwrap().count_observations().unwrap(), 0);
}

#[tokio::test]
async fn test_lost_fetch_session_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher {
        session_lost_on: Some("http://x/b".to_string()),
        ..FakeFetcher::default()
    }
    .page("http://x/a", BOX_A_PAGE)
    .page("http://x/c", BOX_A_PAGE);

    let err = coordinator(&db(&dir), fetcher.clone())
        .run(&catalog(&["http://x/a", "http://x/b", "http://x/c"]))
        .await
        .unwrap_err();

    assert!(matches!(err, CrawlError::Fetch(FetchError::SessionLost(_))));
    assert_eq!(fetcher.fetched_links(), vec!["http://x/a", "http://x/b"]);
    assert!(fetcher.closed.load(Ordering::SeqCst));
    // Work done before the abort stays
    assert_eq!(Store::open(&db(&dir)).unwrap().count_observations().unwrap(), 1);
}

#[tokio::test]
async fn test_cancel_between_entries() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancelFlag::new();
    let fetcher = FakeFetcher {
        cancel_on_fetch: Some(cancel.clone()),
        ..FakeFetcher::default()
    }
    .page("http://x/a", BOX_A_PAGE)
    .page("http://x/b", BOX_A_PAGE)
    .page("http://x/c", BOX_A_PAGE);

    let summary = coordinator(&db(&dir), fetcher.clone())
        .with_cancel_flag(cancel)
        .run(&catalog(&["http://x/a", "http://x/b", "http://x/c"]))
        .await
        .unwrap();

    // The fetch in flight completes and is stored
    assert_eq!(summary.state, CrawlState::Cancelled);
    assert_eq!((summary.succeeded, summary.remaining), (1, 2));
    assert_eq!(fetcher.fetched_links(), vec!["http://x/a"]);
    assert!(fetcher.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_progress_events_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::default()
        .page("http://x/a", BOX_A_PAGE)
        .status("http://x/b", 503);

    let (handle, mut events) = coordinator(&db(&dir), fetcher).spawn(catalog(&["http://x/a", "http://x/b"]));

    let mut lines = Vec::new();
    loop {
        match events.recv_timeout(Duration::from_secs(5)).await {
            Poll::Event(ProgressEvent::RunStarted { .. }) => {}
            Poll::Event(event) => lines.push(event.to_string()),
            Poll::Empty => panic!("no progress within 5s"),
            Poll::Closed => break,
        }
    }
    handle.await.unwrap().unwrap();

    assert_eq!(
        lines,
        vec![
            "entry started http://x/a",
            "entry finished http://x/a",
            "entry started http://x/b",
            "entry failed http://x/b: HTTP 503 from http://x/b",
            "run completed: 1 succeeded, 1 failed",
        ]
    );
}

#[tokio::test]
async fn test_keep_policy_preserves_first_name() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["Box A", "Box A (renamed)"] {
        let fetcher = FakeFetcher::default().page("http://x/a", BOX_A_PAGE);
        coordinator(&db(&dir), fetcher)
            .with_metadata_policy(MetadataPolicy::Keep)
            .run(&Catalog::from_entries(vec![entry(name, "http://x/a")]))
            .await
            .unwrap();
    }

    let store = Store::open(&db(&dir)).unwrap();
    let product = store.product_by_link("http://x/a").unwrap().unwrap();
    assert_eq!(product.name, "Box A");
    assert_eq!(store.history(product.id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_unusable_store_aborts_before_fetching() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the database file should be
    let db_path = dir.path().join("stocktrail.db");
    std::fs::create_dir(&db_path).unwrap();
    let fetcher = FakeFetcher::default().page("http://x/a", BOX_A_PAGE);

    let err = coordinator(&db_path, fetcher.clone())
        .run(&catalog(&["http://x/a"]))
        .await
        .unwrap_err();

    assert!(matches!(err, CrawlError::Store(_)));
    assert!(fetcher.fetched_links().is_empty());
}
