//! Integration tests for the HTTP fetcher and robots checker
//!
//! These tests use wiremock to stand in for real servers, and end with a full
//! dispatcher run over HTTP.

use ripple_dispatch::config::UserAgentConfig;
use ripple_dispatch::http::{build_http_client, HttpFetcher};
use ripple_dispatch::robots::HttpRobotsChecker;
use ripple_dispatch::{
    Config, Dispatcher, FailureKind, Fetcher, PolicyDecision, RobotsChecker, SemaphoreDispatcher,
    TaskDescriptor,
};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_user_agent(name: &str) -> UserAgentConfig {
    UserAgentConfig {
        crawler_name: name.to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: Some("https://example.com/contact".to_string()),
        contact_email: Some("test@example.com".to_string()),
        request_timeout: 5.0,
    }
}

/// Checker pointed at the mock server, which listens on 127.0.0.1
fn local_checker(name: &str, server: &MockServer) -> HttpRobotsChecker {
    HttpRobotsChecker::new(&test_user_agent(name))
        .expect("Failed to build robots checker")
        .with_scheme("http")
        .with_port(server.address().port())
}

async fn serve_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_success_returns_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("hello")
                .insert_header("Content-Type", "text/plain"),
        )
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new(&test_user_agent("TestBot")).unwrap();
    let task = TaskDescriptor::parse(&format!("{}/page", mock_server.uri())).unwrap();
    let outcome = fetcher.fetch(&task).await;

    assert!(outcome.success);
    assert_eq!(outcome.status_code, Some(200));
    assert_eq!(
        outcome.headers.get("content-type").map(String::as_str),
        Some("text/plain")
    );
    let body = outcome
        .payload
        .as_ref()
        .and_then(|p| p.downcast_ref::<String>())
        .cloned();
    assert_eq!(body.as_deref(), Some("hello"));
}

#[tokio::test]
async fn test_fetch_rate_limited_keeps_hint() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&mock_server)
        .await;

    let fetcher = HttpFetcher::new(&test_user_agent("TestBot")).unwrap();
    let task = TaskDescriptor::parse(&format!("{}/busy", mock_server.uri())).unwrap();
    let outcome = fetcher.fetch(&task).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status_code, Some(429));
    assert_eq!(
        outcome.headers.get("retry-after").map(String::as_str),
        Some("7")
    );
}

#[tokio::test]
async fn test_fetch_connection_failure() {
    // Nothing listens on port 1
    let fetcher = HttpFetcher::new(&test_user_agent("TestBot")).unwrap();
    let task = TaskDescriptor::parse("http://127.0.0.1:1/").unwrap();
    let outcome = fetcher.fetch(&task).await;

    assert!(!outcome.success);
    assert_eq!(outcome.status_code, None);
    assert!(!outcome.error_message.is_empty());
}

#[tokio::test]
async fn test_robots_disallow_all() {
    let mock_server = MockServer::start().await;
    serve_robots(&mock_server, "User-agent: *\nDisallow: /").await;

    let checker = local_checker("TestBot", &mock_server);
    assert_eq!(checker.check("127.0.0.1").await, PolicyDecision::Disallowed);
}

#[tokio::test]
async fn test_robots_agent_specific_rules() {
    let mock_server = MockServer::start().await;
    serve_robots(
        &mock_server,
        "User-agent: TestBot\nDisallow: /\n\nUser-agent: *\nAllow: /",
    )
    .await;

    let blocked = local_checker("TestBot", &mock_server);
    let other = local_checker("OtherBot", &mock_server);

    assert_eq!(blocked.check("127.0.0.1").await, PolicyDecision::Disallowed);
    assert_eq!(other.check("127.0.0.1").await, PolicyDecision::Allowed);
}

#[tokio::test]
async fn test_robots_partial_disallow_allows_site() {
    let mock_server = MockServer::start().await;
    serve_robots(&mock_server, "User-agent: *\nDisallow: /private/").await;

    let checker = local_checker("TestBot", &mock_server);
    assert_eq!(checker.check("127.0.0.1").await, PolicyDecision::Allowed);
}

#[tokio::test]
async fn test_fetcher_and_checker_share_client() {
    let mock_server = MockServer::start().await;
    serve_robots(&mock_server, "User-agent: SharedBot\nDisallow: /").await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string("shared"))
        .mount(&mock_server)
        .await;

    let agent = test_user_agent("SharedBot");
    let client = build_http_client(&agent).unwrap();
    let fetcher = HttpFetcher::with_client(client.clone());
    let checker = HttpRobotsChecker::with_client(client, &agent)
        .with_scheme("http")
        .with_port(mock_server.address().port());

    assert_eq!(checker.check("127.0.0.1").await, PolicyDecision::Disallowed);

    let task = TaskDescriptor::parse(&format!("{}/page", mock_server.uri())).unwrap();
    let outcome = fetcher.fetch(&task).await;
    assert!(outcome.success);
    assert_eq!(
        outcome.payload.as_ref().and_then(|p| p.downcast_ref::<String>()).cloned().as_deref(),
        Some("shared")
    );
}

#[tokio::test]
async fn test_robots_missing_allows_all() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let checker = local_checker("TestBot", &mock_server);
    assert_eq!(checker.check("127.0.0.1").await, PolicyDecision::Allowed);
}

#[tokio::test]
async fn test_dispatch_over_http() {
    let mock_server = MockServer::start().await;
    serve_robots(&mock_server, "User-agent: *\nAllow: /").await;

    // First answer is a 429, every later one succeeds
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/limited"))
        .respond_with(ResponseTemplate::new(200).set_body_string("finally"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&mock_server)
        .await;

    let mut config = Config::default();
    config.user_agent = test_user_agent("TestBot");
    config.dispatcher.max_session_permit = 2;
    config.rate_limit.base_delay = (0.001, 0.005);
    config.rate_limit.max_delay = 0.05;

    let dispatcher = SemaphoreDispatcher::new(&config)
        .unwrap()
        .with_robots_checker(Arc::new(local_checker("TestBot", &mock_server)));
    let fetcher = Arc::new(HttpFetcher::new(&config.user_agent).unwrap());

    let base = mock_server.uri();
    let tasks: Vec<TaskDescriptor> = ["limited", "ok", "gone"]
        .iter()
        .map(|p| TaskDescriptor::parse(&format!("{}/{}", base, p)).unwrap())
        .collect();

    let results = dispatcher.run_batch(tasks, fetcher).await;
    assert_eq!(results.len(), 3);

    let find = |suffix: &str| {
        results
            .iter()
            .find(|r| r.url.path() == suffix)
            .expect("missing result")
    };

    let limited = find("/limited");
    assert!(limited.success);
    assert_eq!(limited.attempts, 2);
    assert_eq!(limited.payload_as::<String>().map(String::as_str), Some("finally"));

    assert!(find("/ok").success);

    let gone = find("/gone");
    assert_eq!(gone.failure, Some(FailureKind::Fetch));
    assert_eq!(gone.status_code, Some(410));
}
