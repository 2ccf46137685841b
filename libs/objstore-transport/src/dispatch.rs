//! Request admission: bounds total and per-destination in-flight requests.
//!
//! Requests over either limit wait for a permit; nothing is rejected.

use crate::config::ConnectionConfig;
use crate::error::TransportError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Concurrency ceilings of an admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    pub max_requests: usize,
    pub max_requests_per_host: usize,
}

/// Held for as long as a request counts against the limits.
pub struct DispatchPermit {
    _guard: Box<dyn Send + Sync>,
}

impl DispatchPermit {
    /// Wrap whatever releases the admission slot when dropped
    pub fn new(guard: impl Send + Sync + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for DispatchPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchPermit").finish_non_exhaustive()
    }
}

/// Admission capability. Any external dispatcher must expose this.
#[async_trait]
pub trait Admission: Send + Sync {
    fn limits(&self) -> DispatchLimits;

    /// Wait until a request to `destination` may proceed.
    ///
    /// # Errors
    /// Returns `TransportError::DispatcherClosed` if the dispatcher shut down.
    async fn acquire(&self, destination: &str) -> Result<DispatchPermit, TransportError>;
}

type HostMap = Arc<Mutex<HashMap<String, Arc<Semaphore>>>>;

/// Default admission policy: one semaphore for all requests and one per host.
///
/// A host entry lives only while some request to that host holds or awaits
/// a permit.
pub struct Dispatcher {
    limits: DispatchLimits,
    total: Arc<Semaphore>,
    per_host: HostMap,
}

impl Dispatcher {
    /// Create a dispatcher; limits are clamped to `1..=Semaphore::MAX_PERMITS`.
    #[must_use]
    pub fn new(max_requests: usize, max_requests_per_host: usize) -> Self {
        let clamp = |n: usize| n.clamp(1, Semaphore::MAX_PERMITS);
        let limits = DispatchLimits {
            max_requests: clamp(max_requests),
            max_requests_per_host: clamp(max_requests_per_host),
        };
        Self {
            limits,
            total: Arc::new(Semaphore::new(limits.max_requests)),
            per_host: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Requests currently admitted across all hosts
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.limits.max_requests - self.total.available_permits()
    }

    fn lease(&self, destination: &str) -> HostLease {
        let semaphore = Arc::clone(
            self.per_host
                .lock()
                .entry(destination.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(self.limits.max_requests_per_host))),
        );
        HostLease {
            host: destination.to_owned(),
            hosts: Arc::clone(&self.per_host),
            semaphore,
            held: false,
        }
    }
}

/// Claim on a host semaphore, from the start of the wait until release.
struct HostLease {
    host: String,
    hosts: HostMap,
    semaphore: Arc<Semaphore>,
    held: bool,
}

impl Drop for HostLease {
    fn drop(&mut self) {
        if self.held {
            self.semaphore.add_permits(1);
        }
        let mut hosts = self.hosts.lock();
        // Map entry plus this lease: nobody else holds or awaits the host
        let unused = hosts
            .get(&self.host)
            .is_some_and(|s| Arc::ptr_eq(s, &self.semaphore) && Arc::strong_count(s) == 2);
        if unused {
            hosts.remove(&self.host);
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("limits", &self.limits)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Admission for Dispatcher {
    fn limits(&self) -> DispatchLimits {
        self.limits
    }

    async fn acquire(&self, destination: &str) -> Result<DispatchPermit, TransportError> {
        let mut host = self.lease(destination);
        host.semaphore
            .acquire()
            .await
            .map_err(|_| TransportError::DispatcherClosed)?
            .forget();
        host.held = true;

        let total: OwnedSemaphorePermit = Arc::clone(&self.total)
            .acquire_owned()
            .await
            .map_err(|_| TransportError::DispatcherClosed)?;
        Ok(DispatchPermit::new((host, total)))
    }
}

/// Pick the admission policy for a transport.
///
/// Without an external dispatcher a new [`Dispatcher`] is created with both
/// limits set to `max_connections`. An external one must be an
/// `Arc<Dispatcher>` behind the `Any`, or an `Arc<dyn Admission>` boxed
/// inside it.
///
/// # Errors
/// Returns `TransportError::UnsupportedDispatcher` for any other type.
pub fn install(
    config: &ConnectionConfig,
    external: Option<Arc<dyn Any + Send + Sync>>,
) -> Result<Arc<dyn Admission>, TransportError> {
    let Some(external) = external else {
        let dispatcher = Dispatcher::new(config.max_connections, config.max_connections);
        tracing::debug!(limits = ?dispatcher.limits(), "created default dispatcher");
        return Ok(Arc::new(dispatcher));
    };

    if let Some(admission) = external.downcast_ref::<Arc<dyn Admission>>() {
        tracing::debug!(limits = ?admission.limits(), "using external admission policy");
        return Ok(Arc::clone(admission));
    }
    match external.downcast::<Dispatcher>() {
        Ok(dispatcher) => {
            tracing::debug!(limits = ?dispatcher.limits(), "using external dispatcher");
            Ok(dispatcher)
        }
        Err(_) => Err(TransportError::UnsupportedDispatcher),
    }
}
