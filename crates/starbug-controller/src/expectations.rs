use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default age after which an unfulfilled record no longer blocks syncs
pub const EXPECTATIONS_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Outstanding creates and deletes of one controller object
#[derive(Debug)]
pub struct ControlleeExpectations {
    add: AtomicI64,
    del: AtomicI64,
    timestamp: Instant,
}

impl ControlleeExpectations {
    fn new(add: i64, del: i64) -> Self {
        Self {
            add: AtomicI64::new(add),
            del: AtomicI64::new(del),
            timestamp: Instant::now(),
        }
    }

    fn adjust(&self, add: i64, del: i64) {
        self.add.fetch_add(add, Ordering::AcqRel);
        self.del.fetch_add(del, Ordering::AcqRel);
    }

    /// `(pending adds, pending deletes)`
    pub fn get(&self) -> (i64, i64) {
        (
            self.add.load(Ordering::Acquire),
            self.del.load(Ordering::Acquire),
        )
    }

    /// Every expected create and delete has been observed
    pub fn fulfilled(&self) -> bool {
        let (add, del) = self.get();
        add <= 0 && del <= 0
    }

    pub fn is_expired(&self, timeout: Duration) -> bool {
        self.timestamp.elapsed() > timeout
    }
}

/// Tracks pod creations and deletions a controller issued but has not yet
/// seen in its caches, keyed by the controller object's `namespace/name`.
///
/// A sync for a key must not act on cached pods while its record is
/// unfulfilled, since the cache may not reflect its own earlier actions.
#[derive(Debug)]
pub struct ControllerExpectations {
    records: RwLock<HashMap<String, Arc<ControlleeExpectations>>>,
    timeout: Duration,
}

impl Default for ControllerExpectations {
    fn default() -> Self {
        Self::new(EXPECTATIONS_TIMEOUT)
    }
}

impl ControllerExpectations {
    pub fn new(timeout: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn get_expectations(&self, key: &str) -> Option<Arc<ControlleeExpectations>> {
        self.records.read().get(key).cloned()
    }

    /// Whether a sync for `key` may act on the cache.
    ///
    /// True when no record exists, when the record is fulfilled, or when it
    /// is older than the timeout.
    pub fn satisfied_expectations(&self, key: &str) -> bool {
        match self.get_expectations(key) {
            Some(exp) if exp.fulfilled() => {
                debug!("Expectations fulfilled for {}", key);
                true
            }
            Some(exp) if exp.is_expired(self.timeout) => {
                let (add, del) = exp.get();
                debug!(
                    "Expectations expired for {} (add: {}, del: {})",
                    key, add, del
                );
                true
            }
            Some(exp) => {
                let (add, del) = exp.get();
                debug!(
                    "Controller still waiting on expectations for {} (add: {}, del: {})",
                    key, add, del
                );
                false
            }
            None => true,
        }
    }

    /// Replace the record for `key` with a fresh one
    pub fn set_expectations(&self, key: &str, add: i64, del: i64) {
        let record = Arc::new(ControlleeExpectations::new(add, del));
        self.records.write().insert(key.to_string(), record);
    }

    pub fn expect_creations(&self, key: &str, adds: i64) {
        self.set_expectations(key, adds, 0);
    }

    pub fn expect_deletions(&self, key: &str, dels: i64) {
        self.set_expectations(key, 0, dels);
    }

    /// Add to an existing record; no-op when none exists
    pub fn raise_expectations(&self, key: &str, add: i64, del: i64) {
        if let Some(exp) = self.get_expectations(key) {
            exp.adjust(add, del);
        }
    }

    /// Subtract from an existing record; no-op when none exists
    pub fn lower_expectations(&self, key: &str, add: i64, del: i64) {
        if let Some(exp) = self.get_expectations(key) {
            exp.adjust(-add, -del);
        }
    }

    pub fn creation_observed(&self, key: &str) {
        self.lower_expectations(key, 1, 0);
    }

    pub fn deletion_observed(&self, key: &str) {
        self.lower_expectations(key, 0, 1);
    }

    pub fn delete_expectations(&self, key: &str) {
        self.records.write().remove(key);
    }
}
