// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

pub mod api_client;
pub mod cache;
pub mod config;
pub mod error;
pub mod expectations;
pub mod health;
pub mod job;
pub mod mock;
pub mod pod_control;
pub mod traits;
pub mod workqueue;

// Re-export primary types
pub use error::{ControllerError, Result};
pub use traits::{JobStatusWriter, ListerWatcher, ObjectList, PodControl, ResourceEventHandler};

// Re-export machinery types
pub use cache::{wait_for_cache_sync, Informer, Store, StoreChange, SyncedFlag};
pub use expectations::{ControlleeExpectations, ControllerExpectations};
pub use workqueue::{ItemExponentialBackoff, RateLimiter, WorkQueue};

// Re-export controller and collaborator types
pub use api_client::{ApiClient, ApiListerWatcher};
pub use config::{HealthConfig, InformerConfig, JobControllerConfig};
pub use health::HealthServer;
pub use job::{JobController, SyncOutcome};
pub use mock::{FakeListerWatcher, FakePodControl, RecordingStatusWriter};
pub use pod_control::{pod_from_template, ApiPodControl};
