mod job;
mod pod;

pub use job::{
    is_job_finished, job_completions, job_parallelism, restart_policy_never, JOB_COMPLETE,
    JOB_FAILED,
};
pub use pod::{is_pod_active, is_pod_ready, pod_phase, PodPhase};

use crate::error::{Result, StarbugError};
use crate::types::{meta_namespace_key, GroupVersionKind, ResourceKey, ResourceVersion};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;

/// Trait for Kubernetes resources that can be cached and reconciled
pub trait Resource: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Get the API version of this resource
    fn api_version(&self) -> String;

    /// Get the kind of this resource
    fn kind(&self) -> String;

    /// Get the metadata of this resource
    fn metadata(&self) -> &ObjectMeta;

    /// Get the GroupVersionKind
    fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version_kind(&self.api_version(), &self.kind())
    }

    /// Name, or the empty string when unset
    fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Namespace, or the empty string when unset
    fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// Cache / work queue key (`namespace/name`)
    fn object_key(&self) -> Result<String> {
        meta_namespace_key(self.metadata())
    }

    /// Get the ResourceKey
    fn resource_key(&self) -> Result<ResourceKey> {
        let name = self
            .metadata()
            .name
            .as_ref()
            .ok_or_else(|| StarbugError::missing_field("metadata.name"))?;
        Ok(ResourceKey::new(self.gvk(), self.namespace(), name))
    }

    /// Get the resource version
    fn resource_version(&self) -> Option<ResourceVersion> {
        self.metadata()
            .resource_version
            .as_ref()
            .map(ResourceVersion::new)
    }

    /// Labels attached to the object
    fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata().labels.as_ref()
    }

    /// Get the UID
    fn uid(&self) -> Option<&str> {
        self.metadata().uid.as_deref()
    }
}

impl Resource for Pod {
    fn api_version(&self) -> String {
        "v1".to_string()
    }

    fn kind(&self) -> String {
        "Pod".to_string()
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}

impl Resource for Job {
    fn api_version(&self) -> String {
        "batch/v1".to_string()
    }

    fn kind(&self) -> String {
        "Job".to_string()
    }

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }
}
