//! Core transport trait, error types, and the authenticated API client.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::Stream;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::http::HttpTransport;
use crate::model::{ApiRequest, ApiResponse, FailureKind, StreamEvent};
use crate::ndjson::RecordDecoder;
use crate::options::ClientOptions;
use crate::refresh::{RefreshCoordinator, RefreshError};
use crate::retry::with_refresh;
use crate::stream::{drive, EventSink, StreamSession};

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Request timed out")]
    Timeout,

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Http(e)
        }
    }
}

impl ClientError {
    /// Map an unsuccessful status code and its body to an error.
    pub fn from_status(status: u16, body: &str) -> Self {
        if status == 401 {
            ClientError::Unauthorized
        } else {
            ClientError::Status {
                status,
                message: body.trim().to_string(),
            }
        }
    }

    /// Whether this error should trigger a session refresh.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized)
    }

    /// Classify the error for a terminal stream failure.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ClientError::Timeout => FailureKind::Timeout,
            ClientError::Unauthorized | ClientError::Refresh(_) => FailureKind::Unauthorized,
            ClientError::Status { status, .. } if *status >= 500 => FailureKind::Server,
            _ => FailureKind::Other,
        }
    }

    /// Human-readable text for the classification.
    pub fn user_message(&self) -> String {
        match self.failure_kind() {
            FailureKind::Timeout => "The request timed out. Please try again.".to_string(),
            FailureKind::Unauthorized => {
                "Your session has expired. Please sign in again.".to_string()
            }
            FailureKind::Server => {
                "The server ran into a problem. Please try again later.".to_string()
            }
            FailureKind::Decode | FailureKind::Other => self.to_string(),
        }
    }
}

/// A stream of raw response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send>>;

/// The HTTP capability consumed by the client.
///
/// Implementations report a 401 as [`ClientError::Unauthorized`] and any
/// other non-2xx status as [`ClientError::Status`], before any body is read
/// for streaming calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a request and wait for the full body.
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError>;

    /// Issue a request and return its body as it arrives.
    async fn open_stream(&self, request: &ApiRequest) -> Result<ByteStream, ClientError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        (**self).send(request).await
    }

    async fn open_stream(&self, request: &ApiRequest) -> Result<ByteStream, ClientError> {
        (**self).open_stream(request).await
    }
}

/// Authenticated API client.
///
/// Every call goes through [`with_refresh`], so an expired session is
/// refreshed once (shared with all concurrent callers) and the call replayed.
///
/// # Example
/// ```no_run
/// use futures::StreamExt;
/// use learnlink::client::ApiClient;
/// use learnlink::model::ApiRequest;
/// use learnlink::options::ClientOptions;
/// use serde_json::json;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let options = ClientOptions::new("https://learn.example.com/api");
///     let client = ApiClient::over_http(options)?;
///
///     let request = ApiRequest::post("/courses/generate", json!({"topic": "ownership"}));
///     let mut events = client.stream(request);
///     while let Some(event) = events.next().await {
///         println!("{:?}", event);
///     }
///     Ok(())
/// }
/// ```
pub struct ApiClient<T> {
    transport: Arc<T>,
    coordinator: Arc<RefreshCoordinator>,
    options: ClientOptions,
}

impl<T> Clone for ApiClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            coordinator: Arc::clone(&self.coordinator),
            options: self.options.clone(),
        }
    }
}

impl ApiClient<HttpTransport> {
    /// Build a client over reqwest, refreshing through the configured refresh path.
    pub fn over_http(options: ClientOptions) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(options.clone())?;
        let coordinator = RefreshCoordinator::new(Arc::new(transport.refresher()))
            .with_login_path(options.login_path.clone());
        Ok(Self::new(transport, Arc::new(coordinator), options))
    }
}

impl<T: Transport + 'static> ApiClient<T> {
    pub fn new(transport: T, coordinator: Arc<RefreshCoordinator>, options: ClientOptions) -> Self {
        Self {
            transport: Arc::new(transport),
            coordinator,
            options,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Send a request, refreshing the session once on a 401.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        with_refresh(&self.coordinator, || self.transport.send(&request)).await
    }

    /// GET `path` and deserialize the JSON body.
    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    /// POST `body` as JSON to `path` and deserialize the JSON response.
    pub async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        let body = serde_json::to_value(body)?;
        self.send(ApiRequest::post(path, body)).await?.json()
    }

    /// Run a streaming request and dispatch its events to `sink`.
    ///
    /// The sink always receives exactly one terminal event unless it detaches
    /// first. It is handed back once the stream has settled.
    pub async fn stream_into<S: EventSink>(&self, request: ApiRequest, sink: S) -> S {
        let decoder = RecordDecoder::new(self.options.excerpt_limit);
        let session = StreamSession::with_decoder(sink, decoder);

        let transport = &self.transport;
        let request = &request;
        let timeout = self.options.timeout;
        // Each attempt gets its own deadline, starting when its body opens.
        let opened = with_refresh(&self.coordinator, move || async move {
            let bytes = transport.open_stream(request).await?;
            Ok::<_, ClientError>((bytes, timeout.map(|timeout| Instant::now() + timeout)))
        })
        .await;

        match opened {
            Ok((bytes, deadline)) => drive(bytes, session, deadline).await,
            Err(e) => {
                debug!(path = %request.path, error = %e, "stream request failed before body");
                session.on_settled(Err(&e))
            }
        }
    }

    /// Run a streaming request on a spawned task and return its events.
    ///
    /// Dropping the returned stream detaches from the session; the task stops
    /// reading the response at the next chunk.
    pub fn stream(&self, request: ApiRequest) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let (tx, rx) = mpsc::unbounded();
        let client = self.clone();
        tokio::spawn(async move {
            client.stream_into(request, tx).await;
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::Refresher;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Rejects the first stream with a 401, then answers after a delay.
    #[derive(Default)]
    struct ExpiringTransport {
        opened: AtomicUsize,
    }

    #[async_trait]
    impl Transport for ExpiringTransport {
        async fn send(&self, _request: &ApiRequest) -> Result<ApiResponse, ClientError> {
            Err(ClientError::Transport("not used".to_string()))
        }

        async fn open_stream(&self, _request: &ApiRequest) -> Result<ByteStream, ClientError> {
            if self.opened.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ClientError::Unauthorized);
            }
            Ok(Box::pin(futures::stream::once(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(Bytes::from_static(b"{\"type\":\"lesson\",\"data\":1}\n"))
            })))
        }
    }

    struct SlowRefresher;

    #[async_trait]
    impl Refresher for SlowRefresher {
        async fn refresh(&self) -> Result<(), ClientError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_replayed_stream_gets_a_fresh_timeout() {
        let coordinator = Arc::new(RefreshCoordinator::new(Arc::new(SlowRefresher)));
        let options =
            ClientOptions::new("http://localhost").with_timeout(Duration::from_millis(400));
        let client = ApiClient::new(ExpiringTransport::default(), coordinator, options);

        let events = client
            .stream_into(ApiRequest::get("/lessons/stream"), Vec::new())
            .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Unit(serde_json::json!({"type": "lesson", "data": 1})),
                StreamEvent::Completion,
            ]
        );
        assert_eq!(client.transport().opened.load(Ordering::SeqCst), 2);
        assert_eq!(client.coordinator().refresh_count(), 1);
    }

    #[test]
    fn test_from_status() {
        assert!(ClientError::from_status(401, "").is_unauthorized());
        match ClientError::from_status(503, " busy \n") {
            ClientError::Status { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_failure_kind() {
        assert_eq!(ClientError::Timeout.failure_kind(), FailureKind::Timeout);
        assert_eq!(ClientError::Unauthorized.failure_kind(), FailureKind::Unauthorized);
        assert_eq!(
            ClientError::Refresh(RefreshError::Abandoned).failure_kind(),
            FailureKind::Unauthorized
        );
        assert_eq!(ClientError::from_status(500, "").failure_kind(), FailureKind::Server);
        assert_eq!(ClientError::from_status(404, "").failure_kind(), FailureKind::Other);
        assert_eq!(
            ClientError::Transport("connection reset".into()).failure_kind(),
            FailureKind::Other
        );
    }

    #[test]
    fn test_user_message() {
        assert!(ClientError::Timeout.user_message().contains("timed out"));
        assert!(ClientError::from_status(502, "bad gateway")
            .user_message()
            .contains("try again later"));
        assert_eq!(
            ClientError::Transport("connection reset".into()).user_message(),
            "Transport error: connection reset"
        );
    }
}
