//! End-to-end tests: real sockets in front, a mock GitHub behind.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use reposcout_core::Config;
use reposcout_server::App;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(upstream: &MockServer, listen: &[&str], capacity: usize) -> Config {
    let mut config = Config::default();
    config.server.listen = listen.iter().map(ToString::to_string).collect();
    config.cache.capacity = capacity;
    config.upstream.base_url = upstream.uri();
    config.upstream.timeout_secs = 5;
    config
}

fn items(topic: &str) -> Value {
    json!({
        "total_count": 3,
        "incomplete_results": false,
        "items": [
            {
                "name": format!("{topic}-alpha"),
                "description": "first",
                "html_url": format!("https://github.com/example/{topic}-alpha"),
                "stargazers_count": 120,
                "forks_count": 12,
            },
            {
                "name": format!("{topic}-beta"),
                "description": null,
                "html_url": format!("https://github.com/example/{topic}-beta"),
                "stargazers_count": 900,
                "forks_count": 3,
            },
            {
                "name": format!("{topic}-gamma"),
                "description": "third",
                "html_url": format!("https://github.com/example/{topic}-gamma"),
                "stargazers_count": 5,
                "forks_count": 0,
            },
        ],
    })
}

async fn mount_topic(upstream: &MockServer, topic: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", format!("topic:{topic}")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "59")
                .set_body_json(items(topic)),
        )
        .expect(expected_calls)
        .mount(upstream)
        .await;
}

fn url(addr: SocketAddr, target: &str) -> String {
    format!("http://{addr}{target}")
}

#[tokio::test]
async fn serves_topic_and_caches_it() {
    let upstream = MockServer::start().await;
    mount_topic(&upstream, "go", 1).await;

    let app = App::start(&config_for(&upstream, &["127.0.0.1:0"], 4))
        .await
        .unwrap();
    let addr = app.local_addrs()[0];
    let client = reqwest::Client::new();

    let first = client.get(url(addr, "/?topic=go")).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["content-type"], "application/json");
    let first_body: Value = first.json().await.unwrap();

    assert_eq!(
        first_body,
        json!([
            {
                "Name": "go-alpha",
                "Description": "first",
                "Url": "https://github.com/example/go-alpha",
                "StarsCount": 120,
                "ForksCount": 12,
            },
            {
                "Name": "go-beta",
                "Description": "",
                "Url": "https://github.com/example/go-beta",
                "StarsCount": 900,
                "ForksCount": 3,
            },
            {
                "Name": "go-gamma",
                "Description": "third",
                "Url": "https://github.com/example/go-gamma",
                "StarsCount": 5,
                "ForksCount": 0,
            },
        ])
    );

    let second: Value = client
        .get(url(addr, "/?topic=go"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second, first_body);

    app.termination().raise();
    let summary = app.wait().await.unwrap();
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.cache_hits, 1);
    // MockServer verifies the single upstream call on drop.
}

#[tokio::test]
async fn rejects_bad_requests_locally() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(0)
        .mount(&upstream)
        .await;

    let app = App::start(&config_for(&upstream, &["127.0.0.1:0"], 4))
        .await
        .unwrap();
    let addr = app.local_addrs()[0];
    let client = reqwest::Client::new();

    let response = client.post(url(addr, "/?topic=go")).send().await.unwrap();
    assert_eq!(response.status(), 405);
    assert_eq!(response.headers()["content-type"], "text/html");
    assert_eq!(response.text().await.unwrap(), "<h1>Method not allowed.</h1>");

    for target in ["/", "/?page=2", "/?topic="] {
        let response = client.get(url(addr, target)).send().await.unwrap();
        assert_eq!(response.status(), 400, "target {target}");
        assert_eq!(response.text().await.unwrap(), "<h1>Bad request.</h1>");
    }

    app.termination().raise();
    let summary = app.wait().await.unwrap();
    assert_eq!(summary.rejected, 4);
}

#[tokio::test]
async fn upstream_failure_is_a_gateway_error_and_not_cached() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("q", "topic:broken"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"message": "boom"})))
        .expect(2)
        .mount(&upstream)
        .await;
    Mock::given(method("GET"))
        .and(query_param("q", "topic:limited"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .set_body_json(json!({"message": "API rate limit exceeded"})),
        )
        .mount(&upstream)
        .await;

    let app = App::start(&config_for(&upstream, &["127.0.0.1:0"], 4))
        .await
        .unwrap();
    let addr = app.local_addrs()[0];
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let response = client.get(url(addr, "/?topic=broken")).send().await.unwrap();
        assert_eq!(response.status(), 502);
    }

    let response = client.get(url(addr, "/?topic=limited")).send().await.unwrap();
    assert_eq!(response.status(), 503);

    app.termination().raise();
    let summary = app.wait().await.unwrap();
    assert_eq!(summary.failed, 3);
}

#[tokio::test]
async fn multi_word_topic_is_one_upstream_qualifier() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/repositories"))
        .and(query_param("q", "topic:\"machine learning\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(items("ml")))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = App::start(&config_for(&upstream, &["127.0.0.1:0"], 4))
        .await
        .unwrap();
    let addr = app.local_addrs()[0];
    let client = reqwest::Client::new();

    let response = client
        .get(url(addr, "/?topic=machine+learning"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body[0]["Name"], "ml-alpha");

    app.termination().raise();
    app.wait().await.unwrap();
}

#[tokio::test]
async fn least_recently_used_topic_is_refetched() {
    let upstream = MockServer::start().await;
    mount_topic(&upstream, "a", 2).await;
    mount_topic(&upstream, "b", 1).await;
    mount_topic(&upstream, "c", 1).await;

    let app = App::start(&config_for(&upstream, &["127.0.0.1:0"], 2))
        .await
        .unwrap();
    let addr = app.local_addrs()[0];
    let client = reqwest::Client::new();

    for topic in ["a", "b", "c", "a"] {
        let response = client
            .get(url(addr, &format!("/?topic={topic}")))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    app.termination().raise();
    app.wait().await.unwrap();
}

#[tokio::test]
async fn every_listener_serves_the_same_cache() {
    let upstream = MockServer::start().await;
    mount_topic(&upstream, "rust", 1).await;

    let app = App::start(&config_for(&upstream, &["127.0.0.1:0", "127.0.0.1:0"], 4))
        .await
        .unwrap();
    let addrs = app.local_addrs().to_vec();
    assert_eq!(addrs.len(), 2);
    assert_ne!(addrs[0], addrs[1]);

    let client = reqwest::Client::new();
    for addr in &addrs {
        let response = client.get(url(*addr, "/?topic=rust")).send().await.unwrap();
        assert_eq!(response.status(), 200);
    }

    app.termination().raise();
    let summary = app.wait().await.unwrap();
    assert_eq!(summary.fetched + summary.cache_hits, 2);
}

#[tokio::test]
async fn stops_accepting_after_termination() {
    let upstream = MockServer::start().await;
    let app = App::start(&config_for(&upstream, &["127.0.0.1:0"], 4))
        .await
        .unwrap();
    let addr = app.local_addrs()[0];

    app.termination().raise();
    tokio::time::timeout(Duration::from_secs(5), app.wait())
        .await
        .expect("shutdown should drain promptly")
        .unwrap();

    let client = reqwest::Client::new();
    assert!(client.get(url(addr, "/?topic=go")).send().await.is_err());
}

#[tokio::test]
async fn bind_failure_is_reported() {
    let upstream = MockServer::start().await;
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap().to_string();

    let result = App::start(&config_for(&upstream, &[addr.as_str()], 4)).await;
    let err = result.err().expect("binding a used port should fail");
    assert!(err.to_string().contains("failed to bind"));
}
