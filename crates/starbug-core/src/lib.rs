//! Starbug Core - Fundamental types and traits for the Starbug job controller
//!
//! This crate provides:
//! - Object identity (GVK, resource keys, reconciliation keys)
//! - Resource abstractions for Pods and Jobs
//! - Watch event model shared by the client and the informers
//! - Label selector matching
//! - Error types with miette diagnostics

pub mod error;
pub mod events;
pub mod resources;
pub mod selector;
pub mod types;

// Re-export commonly used types
pub use error::{Result, StarbugError};
pub use events::{RawWatchEvent, WatchEvent, WatchEventType, WatchStatus};
pub use resources::{
    is_job_finished, is_pod_active, is_pod_ready, job_completions, job_parallelism, pod_phase,
    restart_policy_never, PodPhase, Resource, JOB_COMPLETE, JOB_FAILED,
};
pub use selector::Selector;
pub use types::{
    meta_namespace_key, split_meta_namespace_key, GroupVersionKind, ResourceKey, ResourceVersion,
};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::batch::v1::{Job, JobCondition, JobSpec, JobStatus};
pub use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
