//! Traffic-capture collaborator boundary.
//!
//! The capture host owns interception. The scanner only registers a
//! [`TrafficHandler`] with a [`TrafficSource`] while it is running.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::RwLock;
use ps_core::Exchange;

/// Receives captured exchanges.
///
/// Called once per observed exchange, on the capture host's thread.
/// Implementations must not block.
pub trait TrafficHandler: Send + Sync {
    /// Handles one captured exchange.
    fn on_http_traffic(&self, exchange: Exchange);
}

/// Handle returned by [`TrafficSource::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Registration(pub u64);

/// A capture host that fans exchanges out to registered handlers.
pub trait TrafficSource: Send + Sync {
    /// Registers a handler and returns its registration handle.
    fn register(&self, handler: Arc<dyn TrafficHandler>) -> Registration;

    /// Removes a handler. Unknown registrations are ignored.
    fn unregister(&self, registration: Registration);
}

/// In-memory [`TrafficSource`] that delivers published exchanges
/// synchronously.
///
/// Used by the CLI to replay capture files and by tests.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use ps_core::{Exchange, HttpRequest};
/// use ps_scanner::{MemoryTrafficSource, TrafficHandler, TrafficSource};
///
/// struct Print;
/// impl TrafficHandler for Print {
///     fn on_http_traffic(&self, exchange: Exchange) {
///         let _ = exchange;
///     }
/// }
///
/// let source = MemoryTrafficSource::new();
/// let registration = source.register(Arc::new(Print));
/// let exchange = Exchange::new(HttpRequest::new("GET", "https://h/"), None);
/// assert_eq!(source.publish(exchange.clone()), 1);
/// source.unregister(registration);
/// assert_eq!(source.publish(exchange), 0);
/// ```
#[derive(Default)]
pub struct MemoryTrafficSource {
    handlers: RwLock<Vec<(Registration, Arc<dyn TrafficHandler>)>>,
    next_id: AtomicU64,
    registrations_total: AtomicUsize,
}

impl std::fmt::Debug for MemoryTrafficSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTrafficSource")
            .field("handlers", &self.handler_count())
            .field("registrations_total", &self.registrations_total())
            .finish()
    }
}

impl MemoryTrafficSource {
    /// Creates a source with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers an exchange to every handler. Returns how many received it.
    pub fn publish(&self, exchange: Exchange) -> usize {
        let handlers: Vec<Arc<dyn TrafficHandler>> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        let Some((last, rest)) = handlers.split_last() else {
            return 0;
        };
        for handler in rest {
            handler.on_http_traffic(exchange.clone());
        }
        last.on_http_traffic(exchange);
        handlers.len()
    }

    /// Returns the number of currently registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns how many registrations were ever made.
    #[must_use]
    pub fn registrations_total(&self) -> usize {
        self.registrations_total.load(Ordering::SeqCst)
    }
}

impl TrafficSource for MemoryTrafficSource {
    fn register(&self, handler: Arc<dyn TrafficHandler>) -> Registration {
        let registration = Registration(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.handlers.write().push((registration, handler));
        self.registrations_total.fetch_add(1, Ordering::SeqCst);
        registration
    }

    fn unregister(&self, registration: Registration) {
        self.handlers.write().retain(|(r, _)| *r != registration);
    }
}
