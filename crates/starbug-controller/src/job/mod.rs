//! Job reconciliation: the controller, its event handlers and pod bookkeeping

pub mod controller;
pub mod handlers;
pub mod pods;

pub use controller::{JobController, SyncOutcome};
pub use handlers::{get_pod_job, JobEventHandler, PodEventHandler};
pub use pods::{deletion_order, partition_pods, pods_to_delete, PodCounts};
