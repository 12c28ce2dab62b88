//! Client-side router
//!
//! Maps a navigation token to exactly one mounted page. The previous page's
//! cleanup always runs before the next page mounts, so at most one page is
//! live at any time.
//!
//! [`Router`] is the synchronous state machine; [`RouterHandle`] drives it
//! from its own task so navigations are processed strictly in order.

pub mod pattern;

pub use pattern::{normalize_token, Params, RoutePattern, WILDCARD};

use crate::error::{AppError, Result};
use crate::observable::{Observable, Subscription};
use pattern::split_segments;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Teardown returned by a page; errors are logged, never propagated
pub type Cleanup = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

type Handler = Box<dyn FnMut(&Params) -> Option<Cleanup> + Send>;

/// Which page is mounted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteState {
    Idle,
    Mounted {
        pattern: String,
        path: String,
        params: Params,
    },
}

impl RouteState {
    pub fn pattern(&self) -> Option<&str> {
        match self {
            RouteState::Idle => None,
            RouteState::Mounted { pattern, .. } => Some(pattern),
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        match self {
            RouteState::Idle => None,
            RouteState::Mounted { params, .. } => params.get(name).map(String::as_str),
        }
    }
}

/// Route table plus the single-mounted-page state machine
pub struct Router {
    routes: Vec<(RoutePattern, Handler)>,
    not_found: Option<Handler>,
    cleanup: Option<Cleanup>,
    location: Option<String>,
    current: Observable<RouteState>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            not_found: None,
            cleanup: None,
            location: None,
            current: Observable::new(RouteState::Idle),
        }
    }

    /// Register a handler. `*` sets the not-found handler; registering an
    /// existing pattern again replaces its handler in place.
    pub fn register<F>(&mut self, pattern: &str, handler: F) -> Result<()>
    where
        F: FnMut(&Params) -> Option<Cleanup> + Send + 'static,
    {
        if pattern == WILDCARD {
            self.not_found = Some(Box::new(handler));
            return Ok(());
        }

        let parsed = RoutePattern::parse(pattern)?;
        match self.routes.iter_mut().find(|(p, _)| p.as_str() == pattern) {
            Some(slot) => slot.1 = Box::new(handler),
            None => self.routes.push((parsed, Box::new(handler))),
        }

        tracing::debug!("Registered route {}", pattern);
        Ok(())
    }

    pub fn current_route(&self) -> RouteState {
        self.current.get()
    }

    /// Observable route state, for subscribers
    pub fn route(&self) -> Observable<RouteState> {
        self.current.clone()
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Tear down the mounted page, then mount whatever matches `token`
    pub fn transition(&mut self, token: &str) {
        let path = normalize_token(token);

        if self.location.as_deref() == Some(path.as_str())
            && matches!(self.current.get(), RouteState::Mounted { .. })
        {
            tracing::debug!("Already at {}, ignoring navigation", path);
            return;
        }
        self.location = Some(path.clone());

        self.run_cleanup();

        let segments = split_segments(&path);
        for (pattern, handler) in self.routes.iter_mut() {
            if let Some(params) = pattern.match_segments(&segments) {
                tracing::debug!("Mounting {} for {}", pattern.as_str(), path);
                self.cleanup = handler(&params);
                self.current.set(RouteState::Mounted {
                    pattern: pattern.as_str().to_string(),
                    path,
                    params,
                });
                return;
            }
        }

        match self.not_found.as_mut() {
            Some(handler) => {
                tracing::debug!("No route for {}, mounting not-found page", path);
                self.cleanup = handler(&Params::new());
                self.current.set(RouteState::Mounted {
                    pattern: WILDCARD.to_string(),
                    path,
                    params: Params::new(),
                });
            }
            None => {
                tracing::debug!("No route for {}", path);
                self.current.set(RouteState::Idle);
            }
        }
    }

    /// Run the mounted page's cleanup and return to Idle
    pub fn teardown(&mut self) {
        self.run_cleanup();
        self.location = None;
        self.current.set(RouteState::Idle);
    }

    /// Move the router onto its own task
    pub fn spawn(self) -> RouterHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let route = self.current.clone();
        tokio::spawn(run(self, rx));
        RouterHandle {
            tx,
            route,
            location: Arc::new(Mutex::new(None)),
        }
    }

    fn run_cleanup(&mut self) {
        let Some(cleanup) = self.cleanup.take() else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(cleanup)) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Route cleanup failed: {:#}", e),
            Err(_) => tracing::warn!("Route cleanup panicked"),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        self.run_cleanup();
    }
}

enum Command {
    Navigate(String),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

async fn run(mut router: Router, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Navigate(token) => router.transition(&token),
            Command::Flush(ack) => {
                let _ = ack.send(());
            }
            Command::Shutdown(ack) => {
                router.teardown();
                rx.close();
                let _ = ack.send(());
                return;
            }
        }
    }
    // Every handle dropped
    router.teardown();
}

/// Handle to a router running on its own task
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::UnboundedSender<Command>,
    route: Observable<RouteState>,
    location: Arc<Mutex<Option<String>>>,
}

impl RouterHandle {
    /// Change the address; the transition runs asynchronously, in order
    pub fn navigate(&self, token: &str) -> Result<()> {
        let path = normalize_token(token);
        *self.location.lock().unwrap_or_else(|e| e.into_inner()) = Some(path.clone());
        self.tx
            .send(Command::Navigate(path))
            .map_err(|_| AppError::Generic("Router has shut down".to_string()))
    }

    /// Last address requested through this handle
    pub fn location(&self) -> Option<String> {
        self.location.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn current_route(&self) -> RouteState {
        self.route.get()
    }

    pub fn subscribe<F>(&self, listener: F) -> Result<Subscription>
    where
        F: Fn(&RouteState) + Send + Sync + 'static,
    {
        self.route.subscribe(listener)
    }

    /// Resolves once every navigation queued before it has been processed
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Flush(ack))
            .map_err(|_| AppError::Generic("Router has shut down".to_string()))?;
        done.await
            .map_err(|_| AppError::Generic("Router has shut down".to_string()))
    }

    /// Process queued navigations, tear down the mounted page and stop
    pub async fn shutdown(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(ack))
            .map_err(|_| AppError::Generic("Router has shut down".to_string()))?;
        done.await
            .map_err(|_| AppError::Generic("Router has shut down".to_string()))
    }
}

/// Flag a page shares with its async work so results arriving after
/// cleanup are discarded instead of applied
#[derive(Debug, Clone, Default)]
pub struct DisposeFlag(Arc<AtomicBool>);

impl DisposeFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_disposed(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn dispose(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Cleanup that marks this flag disposed
    pub fn cleanup(&self) -> Cleanup {
        let flag = self.clone();
        Box::new(move || -> anyhow::Result<()> {
            flag.dispose();
            Ok(())
        })
    }
}
