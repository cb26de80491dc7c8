//! Stream a course generation from a learning-platform backend.
//!
//! Run with:
//! ```bash
//! export LEARNLINK_BASE_URL="http://localhost:8000/api"
//! export LEARNLINK_TIMEOUT_SECS=300
//! RUST_LOG=learnlink=debug cargo run --example stream_course -- "Rust ownership"
//! ```

use futures::StreamExt;
use learnlink::client::ApiClient;
use learnlink::model::{ApiRequest, StreamEvent};
use learnlink::options::ClientOptions;
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let topic = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Rust ownership".to_string());

    let client = ApiClient::over_http(ClientOptions::from_env()?)?;
    let request = ApiRequest::post("/courses/generate", json!({ "topic": topic }));

    println!("Generating course on {:?}...\n", topic);

    let mut events = client.stream(request);
    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Unit(_) => {
                if let Some(record) = event.record() {
                    println!("[{}] {}", record.kind, record.data);
                }
            }
            StreamEvent::Completion => println!("\nCourse ready."),
            StreamEvent::Failure { kind, message, .. } => {
                eprintln!("{:?}: {}", kind, message);
            }
        }
    }

    Ok(())
}
