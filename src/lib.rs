//! # learnlink - Learning platform API client core
//!
//! The resilient part of a learning-platform client: streaming course
//! generation and chat replies out of long-lived NDJSON responses, and
//! keeping the session alive across concurrent authorization failures.
//!
//! ## Features
//! - Async-first, tokio compatible
//! - Incremental NDJSON decoding from cumulative response text
//! - Exactly one terminal event per stream, on every settlement path
//! - Single-flight session refresh shared by all concurrent requests
//! - Transport-agnostic core with a reqwest implementation
//!
//! ## Architecture
//!
//! - **`ndjson`**: `LineBuffer` splits text into records, `RecordDecoder`
//!   turns a record into a `StreamEvent`
//! - **`stream`**: `StreamSession` tracks consumed text and dispatches events
//!   to an `EventSink`; `drive` feeds it from a transport body
//! - **`refresh`**: `RefreshCoordinator` runs at most one refresh at a time
//!   and queues everyone else behind it
//! - **`retry`**: `with_refresh` replays a call once after a 401
//! - **`client`**: `ApiClient` puts it all together over a `Transport`
//!
//! ## Example
//! ```no_run
//! use learnlink::client::ApiClient;
//! use learnlink::model::{ApiRequest, StreamEvent};
//! use learnlink::options::ClientOptions;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ApiClient::over_http(ClientOptions::new("https://learn.example.com/api"))?;
//!
//!     let request = ApiRequest::post("/chat/stream", json!({"message": "What is a lifetime?"}));
//!     let events = client.stream_into(request, Vec::new()).await;
//!
//!     for event in events {
//!         match event {
//!             StreamEvent::Unit(payload) => println!("{}", payload),
//!             StreamEvent::Completion => println!("done"),
//!             StreamEvent::Failure { message, .. } => eprintln!("{}", message),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod http;
pub mod model;
pub mod ndjson;
pub mod options;
pub mod refresh;
pub mod retry;
pub mod stream;

// Re-exports for convenience
pub use client::{ApiClient, ClientError, Transport};
pub use model::{ApiRequest, ApiResponse, FailureKind, StreamEvent};
pub use refresh::{Navigator, RefreshCoordinator, RefreshError, Refresher};
pub use retry::with_refresh;
pub use stream::{EventSink, StreamSession};
