//! HTTP-level tests for the arXiv source against a local mock server.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use paperbot_sources::{ArxivConfig, ArxivSource, Error, KeywordSet, PaperSource};
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn entry(id: &str, hours_ago: i64, title: &str) -> String {
    let published = (Utc::now() - chrono::Duration::hours(hours_ago))
        .to_rfc3339_opts(SecondsFormat::Secs, true);
    format!(
        r#"<entry>
    <id>http://arxiv.org/abs/{id}v1</id>
    <published>{published}</published>
    <title>{title}</title>
    <summary>Abstract of {id}.</summary>
    <author><name>Author {id}</name></author>
  </entry>"#
    )
}

fn feed(entries: &[String]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="html">ArXiv Query</title>
  {}
</feed>"#,
        entries.join("\n  ")
    )
}

fn config(server: &MockServer) -> ArxivConfig {
    ArxivConfig::default()
        .with_base_url(format!("{}/api/query", server.uri()))
        .with_wait(Duration::ZERO, Duration::ZERO)
        .with_paging(2, 6)
}

fn keywords() -> KeywordSet {
    KeywordSet::parse(["transformer"]).unwrap()
}

#[tokio::test]
async fn test_fetch_pages_until_short_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("start", "0"))
        .and(query_param("sortBy", "submittedDate"))
        .and(query_param("sortOrder", "descending"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed(&[
            entry("2610.00001", 1, "One"),
            entry("2610.00002", 2, "Two"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(query_param("start", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(feed(&[entry("2610.00003", 3, "Three")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let source = ArxivSource::new(config(&server)).unwrap();
    let papers = source.fetch_candidates(&keywords()).await.unwrap();

    let ids: Vec<&str> = papers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["2610.00001", "2610.00002", "2610.00003"]);
    assert_eq!(papers[0].authors, vec!["Author 2610.00001".to_string()]);
}

#[tokio::test]
async fn test_fetch_stops_at_lookback_window() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("start", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed(&[
            entry("2610.00001", 1, "Fresh"),
            entry("2609.09999", 100, "Stale"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(query_param("start", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed(&[])))
        .expect(0)
        .mount(&server)
        .await;

    let source = ArxivSource::new(config(&server).with_lookback(chrono::Duration::hours(48))).unwrap();
    let papers = source.fetch_candidates(&keywords()).await.unwrap();

    assert_eq!(papers.len(), 1);
    assert_eq!(papers[0].id.as_str(), "2610.00001");
}

#[tokio::test]
async fn test_default_window_keeps_weekend_announcements() {
    let server = MockServer::start().await;

    // Friday submissions as seen from a Monday-morning poll.
    Mock::given(method("GET"))
        .and(query_param("start", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed(&[
            entry("2610.00005", 43, "Friday evening"),
            entry("2610.00004", 70, "Thursday afternoon"),
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(query_param("start", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed(&[])))
        .mount(&server)
        .await;

    let source = ArxivSource::new(config(&server)).unwrap();
    let papers = source.fetch_candidates(&keywords()).await.unwrap();

    let ids: Vec<&str> = papers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["2610.00005", "2610.00004"]);
}

#[tokio::test]
async fn test_fetch_respects_max_results() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("max_results", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed(&[
            entry("2610.00001", 1, "A"),
            entry("2610.00002", 1, "B"),
        ])))
        .expect(3)
        .mount(&server)
        .await;

    let source = ArxivSource::new(config(&server)).unwrap();
    let papers = source.fetch_candidates(&keywords()).await.unwrap();

    // Three full pages of two, capped at six results.
    assert_eq!(papers.len(), 6);
}

#[tokio::test]
async fn test_server_error_is_recoverable_fetch_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let source = ArxivSource::new(config(&server)).unwrap();
    let err = source.fetch_candidates(&keywords()).await.unwrap_err();

    assert!(matches!(err, Error::Fetch(ref m) if m.contains("503")));
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_keyword_query_without_categories() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(query_param("search_query", "all:\"transformer\""))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed(&[])))
        .expect(1)
        .mount(&server)
        .await;

    let source =
        ArxivSource::new(config(&server).with_categories(Vec::<String>::new())).unwrap();
    let papers = source.fetch_candidates(&keywords()).await.unwrap();
    assert!(papers.is_empty());
}
