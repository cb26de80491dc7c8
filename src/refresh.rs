//! Single-flight session refresh.
//!
//! When a request fails with 401, the session has to be refreshed before it
//! can be replayed. Concurrent failures must not each fire their own refresh:
//! the first one to observe the failure leads the refresh, every later one
//! waits for the leader's outcome.
//!
//! [`RefreshMachine`] holds the state and waiter queue with no I/O, so it can
//! be driven step by step. [`RefreshCoordinator`] wraps it behind a mutex and
//! runs the actual refresh through an injected [`Refresher`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::client::ClientError;
use crate::options::DEFAULT_LOGIN_PATH;

/// Why a refresh did not renew the session.
///
/// Cloned to every request waiting on the same refresh.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Session refresh failed: {0}")]
    Failed(String),

    #[error("Session refresh was abandoned before it settled")]
    Abandoned,
}

/// Performs the refresh call.
///
/// On success, subsequent requests must succeed with the renewed credentials.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self) -> Result<(), ClientError>;
}

/// Navigation and notification capability of the surrounding application.
pub trait Navigator: Send + Sync {
    /// The current location path, if the application has one.
    fn current_path(&self) -> Option<String>;

    /// Send the user to the login surface.
    fn redirect_to_login(&self);

    /// Show a message to the user.
    fn notify(&self, _message: &str) {}
}

/// A navigator for headless use: never redirects.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNavigator;

impl Navigator for NoopNavigator {
    fn current_path(&self) -> Option<String> {
        None
    }

    fn redirect_to_login(&self) {}
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    #[default]
    Idle,
    Refreshing,
}

type Waiter = oneshot::Sender<Result<(), RefreshError>>;

/// What an observer of a 401 has to do.
#[derive(Debug)]
pub enum Role {
    /// Issue the refresh and settle the machine with its outcome.
    Leader,
    /// Wait for the leader's outcome.
    Follower(oneshot::Receiver<Result<(), RefreshError>>),
}

/// Refresh state plus the ordered queue of waiting requests.
#[derive(Debug, Default)]
pub struct RefreshMachine {
    state: RefreshState,
    waiters: VecDeque<Waiter>,
}

impl RefreshMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RefreshState {
        self.state
    }

    /// Number of queued waiters.
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }

    /// Record an authorization failure.
    ///
    /// The first observer while idle becomes the leader; everyone else is
    /// queued behind it.
    pub fn observe_failure(&mut self) -> Role {
        match self.state {
            RefreshState::Idle => {
                self.state = RefreshState::Refreshing;
                Role::Leader
            }
            RefreshState::Refreshing => {
                let (tx, rx) = oneshot::channel();
                self.waiters.push_back(tx);
                Role::Follower(rx)
            }
        }
    }

    /// Return to idle and hand `outcome` to every waiter, in enqueue order.
    ///
    /// Returns how many waiters were released.
    pub fn settle(&mut self, outcome: Result<(), RefreshError>) -> usize {
        self.state = RefreshState::Idle;
        let waiters = std::mem::take(&mut self.waiters);
        let released = waiters.len();
        for waiter in waiters {
            // A dropped receiver is a caller that stopped waiting.
            let _ = waiter.send(outcome.clone());
        }
        released
    }
}

/// Process-wide single-flight refresh coordinator.
///
/// Share one instance (behind an `Arc`) across every client that talks to
/// the same session.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use learnlink::http::HttpTransport;
/// use learnlink::options::ClientOptions;
/// use learnlink::refresh::RefreshCoordinator;
///
/// # fn main() -> Result<(), learnlink::ClientError> {
/// let transport = HttpTransport::new(ClientOptions::new("https://learn.example.com/api"))?;
/// let coordinator = Arc::new(RefreshCoordinator::new(Arc::new(transport.refresher())));
/// # Ok(())
/// # }
/// ```
pub struct RefreshCoordinator {
    refresher: Arc<dyn Refresher>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
    machine: Mutex<RefreshMachine>,
    refreshes: AtomicUsize,
}

impl RefreshCoordinator {
    pub fn new(refresher: Arc<dyn Refresher>) -> Self {
        Self {
            refresher,
            navigator: Arc::new(NoopNavigator),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
            machine: Mutex::new(RefreshMachine::new()),
            refreshes: AtomicUsize::new(0),
        }
    }

    /// Set the navigator told to redirect when a refresh fails.
    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    /// Set the login surface path.
    pub fn with_login_path(mut self, path: String) -> Self {
        self.login_path = path;
        self
    }

    pub fn state(&self) -> RefreshState {
        self.lock().state()
    }

    /// Requests currently waiting on the in-flight refresh.
    pub fn pending_waiters(&self) -> usize {
        self.lock().pending()
    }

    /// Refresh calls issued so far.
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    /// Renew the session after an authorization failure.
    ///
    /// Starts a refresh if none is in flight, otherwise waits for the one
    /// that is. Every caller sharing a refresh gets the same outcome.
    pub async fn refresh(&self) -> Result<(), RefreshError> {
        let role = self.lock().observe_failure();
        match role {
            Role::Leader => self.lead().await,
            Role::Follower(rx) => {
                debug!("waiting on in-flight session refresh");
                rx.await.unwrap_or(Err(RefreshError::Abandoned))
            }
        }
    }

    async fn lead(&self) -> Result<(), RefreshError> {
        let mut guard = LeaderGuard {
            coordinator: self,
            armed: true,
        };
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        info!("refreshing session");

        let outcome = self
            .refresher
            .refresh()
            .await
            .map_err(|e| RefreshError::Failed(e.to_string()));

        guard.armed = false;
        let released = self.lock().settle(outcome.clone());

        match &outcome {
            Ok(()) => info!(released, "session refreshed"),
            Err(e) => {
                warn!(released, error = %e, "session refresh failed");
                self.redirect_to_login();
            }
        }
        outcome
    }

    fn redirect_to_login(&self) {
        let current = self.navigator.current_path();
        if current.as_deref().is_some_and(|path| self.is_login_surface(path)) {
            debug!("already on the login surface, not redirecting");
            return;
        }
        info!(from = ?current, "redirecting to login");
        self.navigator
            .notify("Your session has expired. Please sign in again.");
        self.navigator.redirect_to_login();
    }

    fn is_login_surface(&self, path: &str) -> bool {
        let path = path.split(|c| c == '?' || c == '#').next().unwrap_or(path);
        let login = self.login_path.trim_end_matches('/');
        let path = path.trim_end_matches('/');
        if login.is_empty() {
            return path.is_empty();
        }
        path == login || path.starts_with(&format!("{}/", login))
    }

    fn lock(&self) -> MutexGuard<'_, RefreshMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the waiters if the leader's future is dropped mid-refresh.
struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let released = self.coordinator.lock().settle(Err(RefreshError::Abandoned));
            warn!(released, "session refresh abandoned by its leader");
        }
    }
}
