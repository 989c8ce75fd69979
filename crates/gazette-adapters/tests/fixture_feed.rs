use std::path::{Path, PathBuf};

use gazette_adapters::{
    normalize_page, FeedRequest, FixtureFeed, SourceFeed, DEFAULT_PAGE_LIMIT,
};
use gazette_core::Category;

fn fixture_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/feed")
        .canonicalize()
        .expect("fixture root")
}

#[tokio::test]
async fn law_fixture_normalizes_oldest_first_with_split_items() {
    let feed = FixtureFeed::new(fixture_root());
    let page = feed
        .fetch_page(&FeedRequest::first_page(Category::Law, DEFAULT_PAGE_LIMIT))
        .await
        .expect("fixture page");
    assert_eq!(page.results.len(), 3);

    let records = normalize_page(page, Category::Law)
        .collect::<Result<Vec<_>, _>>()
        .expect("normalize");
    let numbers = records.iter().map(|r| r.booklet_number).collect::<Vec<_>>();
    assert_eq!(numbers, vec![3100, 3101, 3101, 3102, 3102]);

    let amended = &records[3..];
    assert_eq!(amended[0].display_name, "חוק הפיקוח על מחירי מצרכים ושירותים, התשנ\"ו-1996");
    assert_eq!(amended[1].display_name, "חוק החוזים האחידים, התשמ\"ג-1982");
    assert_eq!(amended[0].description, amended[1].description);
    assert!(amended[0].description.starts_with("ספר החוקים 3102\nהתשפ\"ד\n\n"));
    assert_eq!(records[1].foreign_year.as_deref(), Some("5784"));
    assert_eq!(records[0].modify_date, None);
}

#[tokio::test]
async fn missing_category_fixture_is_an_empty_page() {
    let feed = FixtureFeed::new(fixture_root());
    let page = feed
        .fetch_page(&FeedRequest::first_page(Category::Notification, 10))
        .await
        .expect("empty page");
    assert!(page.results.is_empty());
}

#[tokio::test]
async fn fixture_feed_honours_skip_and_limit() {
    let feed = FixtureFeed::new(fixture_root());
    let page = feed
        .fetch_page(&FeedRequest {
            category: Category::Law,
            limit: 1,
            skip: 1,
        })
        .await
        .expect("page");
    assert_eq!(page.results.len(), 1);
    assert_eq!(page.results[0].data.booklet_num, 3101);
}
