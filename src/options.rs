//! Client configuration.

use std::collections::HashMap;
use std::time::Duration;

use crate::client::ClientError;
use crate::ndjson::DEFAULT_EXCERPT_LIMIT;

/// Default path of the session refresh endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Default path of the login surface.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// A secret string type for sensitive data like access tokens.
/// Prevents accidental logging or display of secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Create a new secret string.
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Get the underlying secret value.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

/// Options for the API client and its HTTP transport.
///
/// # Example
/// ```rust
/// use learnlink::options::ClientOptions;
/// use std::time::Duration;
///
/// let options = ClientOptions::new("https://learn.example.com/api")
///     .with_timeout(Duration::from_secs(120))
///     .with_login_path("/signin".to_string());
///
/// assert_eq!(options.url("/courses"), "https://learn.example.com/api/courses");
/// assert_eq!(options.refresh_path, "/auth/refresh");
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Base URL every request path is joined onto
    pub base_url: String,

    /// Wall-clock timeout per call, including the whole streamed body
    pub timeout: Option<Duration>,

    /// Path of the session refresh endpoint
    pub refresh_path: String,

    /// Path of the login surface; no redirect is issued while already there
    pub login_path: String,

    /// Characters of an undecodable record quoted in its failure message
    pub excerpt_limit: usize,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,

    /// Bearer token, for deployments that do not use session cookies
    pub access_token: Option<SecretString>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout: None,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            excerpt_limit: DEFAULT_EXCERPT_LIMIT,
            proxy: None,
            extra_headers: None,
            access_token: None,
        }
    }
}

impl ClientOptions {
    /// Create options for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Read options from `LEARNLINK_BASE_URL` and `LEARNLINK_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ClientError> {
        let base_url = std::env::var("LEARNLINK_BASE_URL")
            .map_err(|_| ClientError::Config("LEARNLINK_BASE_URL is not set".to_string()))?;
        let mut options = Self::new(base_url);

        if let Ok(secs) = std::env::var("LEARNLINK_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                ClientError::Config(format!("LEARNLINK_TIMEOUT_SECS is not a number: {}", secs))
            })?;
            options.timeout = Some(Duration::from_secs(secs));
        }

        Ok(options)
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the refresh endpoint path.
    pub fn with_refresh_path(mut self, path: String) -> Self {
        self.refresh_path = path;
        self
    }

    /// Set the login surface path.
    pub fn with_login_path(mut self, path: String) -> Self {
        self.login_path = path;
        self
    }

    /// Set the decode-failure excerpt length.
    pub fn with_excerpt_limit(mut self, limit: usize) -> Self {
        self.excerpt_limit = limit;
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }

    /// Set the bearer token.
    pub fn with_access_token(mut self, token: impl Into<SecretString>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Resolve a request path against the base URL.
    ///
    /// Absolute URLs are returned unchanged.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
