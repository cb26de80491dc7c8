use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use learnlink::client::ApiClient;
use learnlink::http::HttpTransport;
use learnlink::model::{ApiRequest, FailureKind, StreamEvent};
use learnlink::options::ClientOptions;
use learnlink::refresh::{Navigator, RefreshCoordinator};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const COURSE_STREAM: &str = concat!(
    "{\"type\":\"outline\",\"data\":{\"chapters\":3}}\n",
    "{\"type\":\"chapter\",\"data\":{\"index\":1,\"title\":\"Ownership\"}}\n",
    "{\"type\":\"chapter\",\"data\":{\"index\":2,\"title\":\"Borrowing\"}}\n",
    "{\"type\":\"done\",\"data\":null}\n"
);

#[derive(Default)]
struct CountingNavigator {
    redirects: AtomicUsize,
}

impl Navigator for CountingNavigator {
    fn current_path(&self) -> Option<String> {
        Some("/courses/new".to_string())
    }

    fn redirect_to_login(&self) {
        self.redirects.fetch_add(1, Ordering::SeqCst);
    }
}

async fn mount_refresh(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({"access_token": "fresh"})))
        .expect(1)
        .mount(server)
        .await;
}

fn client_with_navigator(
    server: &MockServer,
    navigator: Arc<CountingNavigator>,
) -> ApiClient<HttpTransport> {
    let options = ClientOptions::new(server.uri())
        .with_access_token("stale")
        .with_timeout(Duration::from_secs(5));
    let transport = HttpTransport::new(options.clone()).unwrap();
    let coordinator =
        RefreshCoordinator::new(Arc::new(transport.refresher())).with_navigator(navigator);
    ApiClient::new(transport, Arc::new(coordinator), options)
}

#[tokio::test]
async fn test_unauthorized_request_is_refreshed_and_replayed() {
    let server = MockServer::start().await;
    mount_refresh(&server, 200).await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Ada"})))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let client = ApiClient::over_http(ClientOptions::new(server.uri()).with_access_token("stale"))
        .unwrap();
    let me: Value = client.get_json("/me").await.unwrap();

    assert_eq!(me["name"], "Ada");
    assert_eq!(client.coordinator().refresh_count(), 1);
}

#[tokio::test]
async fn test_course_stream_delivers_records_then_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/courses/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-ndjson")
                .set_body_string(COURSE_STREAM),
        )
        .mount(&server)
        .await;

    let client = ApiClient::over_http(ClientOptions::new(server.uri())).unwrap();
    let request = ApiRequest::post("/courses/generate", json!({"topic": "rust"}));
    let events: Vec<StreamEvent> = client.stream(request).collect().await;

    let kinds: Vec<_> = events.iter().filter_map(|e| e.record_type()).collect();
    assert_eq!(kinds, vec!["outline", "chapter", "chapter", "done"]);
    assert_eq!(events.last(), Some(&StreamEvent::Completion));
    assert_eq!(events.len(), 5);
}

#[tokio::test]
async fn test_stream_replays_after_refresh() {
    let server = MockServer::start().await;
    mount_refresh(&server, 200).await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"type\":\"token\",\"data\":\"Hel\"}\n{\"type\":\"token\",\"data\":\"lo\"}",
        ))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let navigator = Arc::new(CountingNavigator::default());
    let client = client_with_navigator(&server, navigator.clone());
    let request = ApiRequest::post("/chat/stream", json!({"message": "hi"}));
    let events = client.stream_into(request, Vec::new()).await;

    let text: String = events
        .iter()
        .filter_map(|e| e.record())
        .filter_map(|r| r.data.as_str().map(str::to_string))
        .collect();
    assert_eq!(text, "Hello");
    assert_eq!(events.last(), Some(&StreamEvent::Completion));
    assert_eq!(navigator.redirects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_refresh_fails_stream_and_redirects() {
    let server = MockServer::start().await;
    mount_refresh(&server, 401).await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let navigator = Arc::new(CountingNavigator::default());
    let client = client_with_navigator(&server, navigator.clone());
    let events = client
        .stream_into(ApiRequest::post("/chat/stream", json!({})), Vec::new())
        .await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        StreamEvent::Failure { kind: FailureKind::Unauthorized, .. }
    ));
    assert_eq!(navigator.redirects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_server_error_is_one_terminal_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/courses/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let client = ApiClient::over_http(ClientOptions::new(server.uri())).unwrap();
    let events = client
        .stream_into(ApiRequest::post("/courses/generate", json!({})), Vec::new())
        .await;

    match &events[..] {
        [StreamEvent::Failure { kind, message, .. }] => {
            assert_eq!(*kind, FailureKind::Server);
            assert!(message.contains("try again later"));
        }
        other => panic!("unexpected events {:?}", other),
    }
    assert_eq!(client.coordinator().refresh_count(), 0);
}

#[tokio::test]
async fn test_slow_stream_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/courses/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(COURSE_STREAM)
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let options =
        ClientOptions::new(server.uri()).with_timeout(Duration::from_millis(200));
    let client = ApiClient::over_http(options).unwrap();
    let events = client
        .stream_into(ApiRequest::post("/courses/generate", json!({})), Vec::new())
        .await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        StreamEvent::Failure { kind: FailureKind::Timeout, .. }
    ));
}

#[tokio::test]
async fn test_refresh_request_carries_extra_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header("x-client", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "fresh"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Ada"})))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let options = ClientOptions::new(server.uri())
        .with_access_token("stale")
        .with_header("x-client".to_string(), "web".to_string());
    let client = ApiClient::over_http(options).unwrap();
    let me: Value = client.get_json("/me").await.unwrap();

    assert_eq!(me["name"], "Ada");
}
