//! Pluggable observer registry: a mapping from observer name to instance,
//! plus an ordered list of enabled names. Registration happens only during
//! process initialization, before the accept loop begins; the enabled list
//! is fixed for the process lifetime thereafter, requiring no lock.

pub mod apiserver_stats;
mod dispatch;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;
use x509_cert::Certificate;

use crate::http::message::{ParsedRequest, ParsedResponse};

/// What a plugin must implement. Observers must treat their arguments as
/// read-only; the dispatcher isolates a panicking observer so it cannot
/// affect another observer or the proxy core.
pub trait Observer: Send + Sync {
    /// Unique identifier, used on the `--plugins` command line.
    fn name(&self) -> &str;

    /// One-shot initialization, invoked after flag parsing.
    fn setup(&self) {}

    /// Read-only request callback.
    fn on_request(&self, req: &ParsedRequest, client_cert: Option<&Certificate>);

    /// Read-only response callback. The dispatcher releases the response
    /// body once every enabled observer's callback has returned.
    fn on_response(&self, resp: &ParsedResponse, client_cert: Option<&Certificate>);
}

/// Explicit registry object passed into the dispatcher at construction,
/// rather than relying on package-init side-effect registration.
pub struct ObserverRegistry {
    registered: HashMap<String, Arc<dyn Observer>>,
    enabled: Vec<String>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self {
            registered: HashMap::new(),
            enabled: Vec::new(),
        }
    }

    /// Add an observer to the registry by its unique name. Call only during
    /// process initialization, before [`ObserverRegistry::enable`].
    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        self.registered.insert(observer.name().to_string(), observer);
    }

    /// Record which observers are active. Unknown names warn but are
    /// otherwise ignored.
    pub fn enable(&mut self, names: &[String]) {
        for name in names {
            if self.registered.contains_key(name) {
                self.enabled.push(name.clone());
            } else {
                warn!(name, "unrecognized plugin");
            }
        }
    }

    /// Invoke each enabled observer's initialization hook once.
    pub fn setup(&self) {
        for name in &self.enabled {
            if let Some(observer) = self.registered.get(name) {
                observer.setup();
            }
        }
    }

    /// Dispatch the request callback of every enabled observer in a fresh
    /// task each, without waiting for completion.
    pub fn dispatch_request(&self, req: &ParsedRequest, client_cert: Option<&Certificate>) {
        dispatch::dispatch_request(&self.registered, &self.enabled, req, client_cert)
    }

    /// Dispatch the response callback of every enabled observer, joining
    /// their completion before releasing the response body. The join
    /// itself runs in a detached task so this call never blocks the parser
    /// loop.
    pub fn dispatch_response(&self, resp: ParsedResponse, client_cert: Option<Certificate>) {
        dispatch::dispatch_response(self.registered.clone(), self.enabled.clone(), resp, client_cert)
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
