//! Location middleware: per-path guards consulted before a navigation.
//!
//! A guard sees the target path, its query parameters and the local session,
//! and answers [`Navigation::Allow`], [`Navigation::Redirect`] or
//! [`Navigation::Stay`]. Paths without a guard are always allowed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use switchboard_core::{Location, Session};
use tracing::{debug, info};

/// Decision for one navigation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Navigation {
    /// Go where asked.
    Allow,
    /// Go somewhere else instead.
    Redirect(String),
    /// Remain on the current page.
    Stay,
}

/// User-facing notices raised by guards.
pub trait Notifier: Send + Sync {
    /// Show `message` to the user.
    fn notify(&self, message: &str);
}

/// Logs notices.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str) {
        info!(message, "navigation notice");
    }
}

/// What a guard gets to look at.
pub struct NavigationRequest<'a> {
    /// Target path.
    pub path: &'a str,
    /// Target query parameters.
    pub search_params: &'a BTreeMap<String, String>,
    /// Local session view.
    pub session: &'a Session,
    notifier: &'a dyn Notifier,
}

impl NavigationRequest<'_> {
    /// Raise a notice, typically before answering [`Navigation::Stay`].
    pub fn notify(&self, message: &str) {
        self.notifier.notify(message);
    }
}

/// Per-path navigation guard.
pub trait LocationGuard: Send + Sync {
    /// Decide the navigation.
    fn check(&self, request: &NavigationRequest<'_>) -> Navigation;
}

impl<F> LocationGuard for F
where
    F: Fn(&NavigationRequest<'_>) -> Navigation + Send + Sync,
{
    fn check(&self, request: &NavigationRequest<'_>) -> Navigation {
        self(request)
    }
}

/// Path-keyed guard table.
pub struct LocationMiddleware {
    guards: HashMap<String, Arc<dyn LocationGuard>>,
    notifier: Arc<dyn Notifier>,
}

impl Default for LocationMiddleware {
    fn default() -> Self {
        Self::new(Arc::new(TracingNotifier))
    }
}

impl LocationMiddleware {
    /// Empty table reporting notices to `notifier`.
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            guards: HashMap::new(),
            notifier,
        }
    }

    /// Guard `path`, replacing any earlier guard for it.
    #[must_use]
    pub fn route(mut self, path: impl Into<String>, guard: impl LocationGuard + 'static) -> Self {
        let _ = self.guards.insert(path.into(), Arc::new(guard));
        self
    }

    /// Consult the guard for `path`.
    pub fn evaluate(&self, path: &str, search_params: &BTreeMap<String, String>, session: &Session) -> Navigation {
        let Some(guard) = self.guards.get(path) else {
            return Navigation::Allow;
        };
        let request = NavigationRequest {
            path,
            search_params,
            session,
            notifier: self.notifier.as_ref(),
        };
        let decision = guard.check(&request);
        debug!(path, ?decision, "navigation guard");
        decision
    }

    /// Where a navigation from `from` toward `to` actually lands.
    #[must_use]
    pub fn resolve(&self, from: &Location, to: Location, session: &Session) -> Location {
        match self.evaluate(&to.path_name, &to.search_params, session) {
            Navigation::Allow => from.advance(to),
            Navigation::Redirect(path) => from.advance(Location::at(path)),
            Navigation::Stay => from.clone(),
        }
    }
}

impl std::fmt::Debug for LocationMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut paths: Vec<&String> = self.guards.keys().collect();
        paths.sort();
        f.debug_struct("LocationMiddleware").field("paths", &paths).finish_non_exhaustive()
    }
}
