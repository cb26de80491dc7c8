//! reqwest-backed transport and session refresher.
//!
//! This module provides the HTTP client construction, request building and
//! status mapping shared by plain and streaming calls.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, info};

use crate::client::{ByteStream, ClientError, Transport};
use crate::model::{ApiRequest, ApiResponse};
use crate::options::{ClientOptions, SecretString};
use crate::refresh::Refresher;

/// Bearer token shared between a transport and its refresher.
type SharedToken = Arc<RwLock<Option<SecretString>>>;

/// Build a configured HTTP client from client options.
///
/// This applies common configuration like timeouts and proxies, and enables
/// the cookie store so cookie-based sessions survive a refresh.
///
/// # Example
/// ```ignore
/// let client = build_http_client(&options)?;
/// ```
pub fn build_http_client(options: &ClientOptions) -> Result<Client, ClientError> {
    let mut builder = Client::builder().cookie_store(true);

    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &options.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ClientError::Config(format!("invalid proxy {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Add extra headers to a request if specified in the options.
///
/// # Example
/// ```ignore
/// let mut req = client.get(url);
/// req = add_extra_headers(req, &options.extra_headers);
/// ```
pub fn add_extra_headers(
    mut request: RequestBuilder,
    extra_headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    if let Some(headers) = extra_headers {
        for (key, value) in headers {
            request = request.header(key, value);
        }
    }
    request
}

/// Transport over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    options: ClientOptions,
    token: SharedToken,
}

impl HttpTransport {
    pub fn new(options: ClientOptions) -> Result<Self, ClientError> {
        let client = build_http_client(&options)?;
        let token = Arc::new(RwLock::new(options.access_token.clone()));
        Ok(Self {
            client,
            options,
            token,
        })
    }

    /// A refresher sharing this transport's cookie store and bearer token.
    pub fn refresher(&self) -> HttpRefresher {
        HttpRefresher {
            client: self.client.clone(),
            url: self.options.url(&self.options.refresh_path),
            extra_headers: self.options.extra_headers.clone(),
            token: Arc::clone(&self.token),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn build(&self, request: &ApiRequest) -> RequestBuilder {
        let url = self.options.url(&request.path);
        let mut req = self.client.request(request.method.clone(), url);

        if let Some(token) = current_token(&self.token) {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()));
        }
        req = add_extra_headers(req, &self.options.extra_headers);

        if let Some(body) = &request.body {
            req = req.header(CONTENT_TYPE, "application/json").json(body);
        }
        req
    }

    /// Send and turn a non-2xx status into an error.
    async fn execute(&self, request: &ApiRequest) -> Result<reqwest::Response, ClientError> {
        let response = self.build(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(path = %request.path, status = status.as_u16(), "request rejected");
            return Err(ClientError::from_status(status.as_u16(), &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let response = self.execute(request).await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(ApiResponse { status, body })
    }

    async fn open_stream(&self, request: &ApiRequest) -> Result<ByteStream, ClientError> {
        let response = self.execute(request).await?;
        Ok(Box::pin(
            response.bytes_stream().map(|chunk| chunk.map_err(ClientError::from)),
        ))
    }
}

/// Refresh endpoint response; only token-based deployments return a body.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// Calls the refresh endpoint.
///
/// Cookie sessions are renewed by the shared cookie store. When the endpoint
/// answers with an `access_token`, it replaces the transport's bearer token.
#[derive(Debug, Clone)]
pub struct HttpRefresher {
    client: Client,
    url: String,
    extra_headers: Option<HashMap<String, String>>,
    token: SharedToken,
}

#[async_trait]
impl Refresher for HttpRefresher {
    async fn refresh(&self) -> Result<(), ClientError> {
        let request = add_extra_headers(self.client.post(&self.url), &self.extra_headers);
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::from_status(status.as_u16(), &body));
        }

        let body = response.bytes().await?;
        if let Ok(RefreshResponse {
            access_token: Some(token),
        }) = serde_json::from_slice::<RefreshResponse>(&body)
        {
            if let Ok(mut slot) = self.token.write() {
                *slot = Some(SecretString::new(token));
            }
            info!("access token replaced by refresh");
        }
        Ok(())
    }
}

fn current_token(token: &SharedToken) -> Option<SecretString> {
    token.read().ok().and_then(|slot| slot.clone())
}
