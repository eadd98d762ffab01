use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for a single informer
#[derive(Debug, Clone)]
pub struct InformerConfig {
    /// Re-deliver every cached object as an update this often (None disables resync)
    pub resync_period: Option<Duration>,
    /// Wait this long before relisting after a failed list or a broken watch
    pub relist_backoff: Duration,
    /// Capacity of the reflector -> processor delta channel
    pub delta_buffer: usize,
}

impl Default for InformerConfig {
    fn default() -> Self {
        Self {
            resync_period: Some(Duration::from_secs(30)),
            relist_backoff: Duration::from_secs(1),
            delta_buffer: 1024,
        }
    }
}

/// Configuration for the job controller
#[derive(Debug, Clone)]
pub struct JobControllerConfig {
    /// Number of concurrent sync workers
    pub workers: usize,
    /// Informer settings shared by the job and pod informers
    pub informer: InformerConfig,
    /// Expectations older than this are considered satisfied
    pub expectations_timeout: Duration,
    /// How long to wait before re-checking a pod cache that has not synced yet
    pub pod_store_sync_poll_period: Duration,
    /// First retry delay of a failing key
    pub base_backoff: Duration,
    /// Upper bound on the retry delay of a failing key
    pub max_backoff: Duration,
}

impl Default for JobControllerConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            informer: InformerConfig::default(),
            expectations_timeout: Duration::from_secs(5 * 60),
            pod_store_sync_poll_period: Duration::from_millis(100),
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_secs(1000),
        }
    }
}

/// Configuration for the health endpoints
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Address to bind the health server to
    pub listen_addr: SocketAddr,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
        }
    }
}
