//! End-to-end refresh flows through the controller: quota accounting, cache
//! fallback, proxy envelope decoding, and cache-first selection. The proxy is
//! a wiremock server answering with the allorigins-style JSON envelope.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use uutiset::config::Config;
use uutiset::controller::{ArticleSource, FeedRefreshController, RefreshState};
use uutiset::feed::Article;
use uutiset::storage::KvStore;

const T0: i64 = 1_700_000_000_000;
const FEED_URL: &str = "https://yle.fi/rss/t/18-204933/fi";

fn rss(titles: &[&str]) -> String {
    let items: String = titles
        .iter()
        .enumerate()
        .map(|(i, t)| {
            format!(
                "<item><guid>id-{i}</guid><title>{t}</title><link>https://yle.fi/a/{i}</link></item>"
            )
        })
        .collect();
    format!(r#"<?xml version="1.0"?><rss version="2.0"><channel>{items}</channel></rss>"#)
}

fn envelope(xml: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({ "contents": xml }))
}

fn config(proxy: &MockServer, max_requests: u32) -> Config {
    Config {
        proxy_endpoint: format!("{}/get", proxy.uri()),
        fetch_timeout_secs: 5,
        quota_window_secs: 60,
        quota_max_requests: max_requests,
        feeds: BTreeMap::from([("uutiset".to_string(), FEED_URL.to_string())]),
    }
}

async fn controller(proxy: &MockServer, max_requests: u32) -> FeedRefreshController {
    let store = KvStore::open_in_memory().await.unwrap();
    FeedRefreshController::new(&config(proxy, max_requests), reqwest::Client::new(), store)
}

fn titles(articles: &[Article]) -> Vec<&str> {
    articles.iter().map(|a| a.title.as_str()).collect()
}

#[tokio::test]
async fn test_refresh_serves_live_articles_and_fills_cache() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("url", FEED_URL))
        .respond_with(envelope(&rss(&["Eka", "Toka"])))
        .mount(&proxy)
        .await;

    let controller = controller(&proxy, 5).await;
    let state = controller.refresh("uutiset", T0).await.unwrap();

    match state {
        RefreshState::Ready { articles, source } => {
            assert_eq!(source, ArticleSource::Live);
            assert_eq!(titles(&articles), vec!["Eka", "Toka"]);
            assert_eq!(articles[0].identity, "id-0");
        }
        other => panic!("expected Ready, got {other:?}"),
    }
    assert_eq!(controller.remaining("uutiset", T0).await.unwrap(), 4);
}

#[tokio::test]
async fn test_exhausted_quota_blocks_with_latest_cached_articles() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(envelope(&rss(&["Vanha"])))
        .up_to_n_times(1)
        .mount(&proxy)
        .await;
    Mock::given(method("GET"))
        .respond_with(envelope(&rss(&["Uusi"])))
        .mount(&proxy)
        .await;

    let controller = controller(&proxy, 2).await;
    controller.refresh("uutiset", T0).await.unwrap();
    controller.refresh("uutiset", T0 + 1_000).await.unwrap();

    // Third refresh inside the window: no network call, cache from the second
    let state = controller.refresh("uutiset", T0 + 2_000).await.unwrap();
    match state {
        RefreshState::Blocked { cached: Some(articles) } => {
            assert_eq!(titles(&articles), vec!["Uusi"]);
        }
        other => panic!("expected Blocked with cache, got {other:?}"),
    }
    assert_eq!(proxy.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_exhausted_quota_without_cache_blocks_empty_handed() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&proxy)
        .await;

    let controller = controller(&proxy, 2).await;
    // Both budgeted attempts fail, so nothing ever lands in the cache
    for i in 0..2 {
        let state = controller.refresh("uutiset", T0 + i).await.unwrap();
        assert_eq!(state, RefreshState::Failed { cached: None });
    }

    let state = controller.refresh("uutiset", T0 + 10).await.unwrap();
    assert_eq!(state, RefreshState::Blocked { cached: None });
}

#[tokio::test]
async fn test_failure_after_success_falls_back_to_cache() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(envelope(&rss(&["Tallessa"])))
        .up_to_n_times(1)
        .mount(&proxy)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&proxy)
        .await;

    let controller = controller(&proxy, 5).await;
    controller.refresh("uutiset", T0).await.unwrap();

    let state = controller.refresh("uutiset", T0 + 1_000).await.unwrap();
    match state {
        RefreshState::Failed { cached: Some(articles) } => {
            assert_eq!(titles(&articles), vec!["Tallessa"]);
        }
        other => panic!("expected Failed with cache, got {other:?}"),
    }
}

#[tokio::test]
async fn test_select_serves_cache_without_network_or_quota() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(envelope(&rss(&["Eka", "Toka", "Kolmas"])))
        .expect(1)
        .mount(&proxy)
        .await;

    let controller = controller(&proxy, 5).await;
    controller.refresh("uutiset", T0).await.unwrap();
    let spent = controller.remaining("uutiset", T0).await.unwrap();

    // Selections are answered from the cache; the mock's expect(1) verifies
    // no further network traffic
    for _ in 0..3 {
        let state = controller.select("uutiset", T0 + 5_000).await.unwrap();
        match state {
            RefreshState::Ready { articles, source } => {
                assert_eq!(source, ArticleSource::Cached);
                assert_eq!(titles(&articles), vec!["Eka", "Toka", "Kolmas"]);
            }
            other => panic!("expected cached Ready, got {other:?}"),
        }
    }
    assert_eq!(
        controller.remaining("uutiset", T0 + 5_000).await.unwrap(),
        spent
    );
}

#[tokio::test]
async fn test_select_without_cache_fetches_live() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(envelope(&rss(&["Tuore"])))
        .mount(&proxy)
        .await;

    let controller = controller(&proxy, 5).await;
    let state = controller.select("uutiset", T0).await.unwrap();
    match state {
        RefreshState::Ready { articles, source } => {
            assert_eq!(source, ArticleSource::Live);
            assert_eq!(titles(&articles), vec!["Tuore"]);
        }
        other => panic!("expected live Ready, got {other:?}"),
    }
    assert_eq!(controller.remaining("uutiset", T0).await.unwrap(), 4);
}

#[tokio::test]
async fn test_base64_envelope_matches_plain_envelope() {
    let xml = rss(&["Sama"]);
    let data_uri = format!(
        "data:application/rss+xml; charset=utf-8;base64,{}",
        BASE64.encode(&xml)
    );

    let plain_proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(envelope(&xml))
        .mount(&plain_proxy)
        .await;
    let wrapped_proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(envelope(&data_uri))
        .mount(&wrapped_proxy)
        .await;

    let plain = controller(&plain_proxy, 5)
        .await
        .refresh("uutiset", T0)
        .await
        .unwrap();
    let wrapped = controller(&wrapped_proxy, 5)
        .await
        .refresh("uutiset", T0)
        .await
        .unwrap();
    assert_eq!(plain, wrapped);
}

#[tokio::test]
async fn test_single_item_feed_yields_one_article() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(envelope(&rss(&["Ainoa"])))
        .mount(&proxy)
        .await;

    let controller = controller(&proxy, 5).await;
    let state = controller.refresh("uutiset", T0).await.unwrap();
    match state {
        RefreshState::Ready { articles, .. } => {
            assert_eq!(titles(&articles), vec!["Ainoa"]);
        }
        other => panic!("expected Ready, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_feed_is_a_valid_live_and_cached_result() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(envelope(
            r#"<?xml version="1.0"?><rss><channel><title>Yle</title></channel></rss>"#,
        ))
        .mount(&proxy)
        .await;

    let controller = controller(&proxy, 5).await;
    let live = controller.refresh("uutiset", T0).await.unwrap();
    assert_eq!(
        live,
        RefreshState::Ready {
            articles: vec![],
            source: ArticleSource::Live,
        }
    );

    // The empty list was cached as a real entry, so selection serves it
    let selected = controller.select("uutiset", T0 + 1_000).await.unwrap();
    assert_eq!(
        selected,
        RefreshState::Ready {
            articles: vec![],
            source: ArticleSource::Cached,
        }
    );
}

#[tokio::test]
async fn test_quota_is_durable_across_controller_instances() {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(envelope(&rss(&["Eka"])))
        .mount(&proxy)
        .await;

    let store = KvStore::open_in_memory().await.unwrap();
    let config = config(&proxy, 2);

    let first = FeedRefreshController::new(&config, reqwest::Client::new(), store.clone());
    first.refresh("uutiset", T0).await.unwrap();
    first.refresh("uutiset", T0 + 100).await.unwrap();
    drop(first);

    // A fresh controller over the same storage inherits the spent budget
    // and the cached articles
    let second = FeedRefreshController::new(&config, reqwest::Client::new(), store);
    let state = second.refresh("uutiset", T0 + 200).await.unwrap();
    match state {
        RefreshState::Blocked { cached: Some(articles) } => {
            assert_eq!(titles(&articles), vec!["Eka"]);
        }
        other => panic!("expected Blocked with cache, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_feed_key_is_an_error() {
    let proxy = MockServer::start().await;
    let controller = controller(&proxy, 5).await;
    assert!(controller.refresh("olematon", T0).await.is_err());
    assert!(controller.select("olematon", T0).await.is_err());
}
