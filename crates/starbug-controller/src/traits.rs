use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use starbug_core::{Job, PodTemplateSpec, WatchEvent};

/// A full listing of a collection together with the version it was taken at
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectList<K> {
    pub items: Vec<K>,
    /// Resource version to start watching from
    pub resource_version: String,
}

/// Source of a resource collection: a consistent list plus incremental watch.
///
/// Informers only ever talk to the API server through this trait, which lets
/// tests drive them with `FakeListerWatcher`.
#[async_trait]
pub trait ListerWatcher<K: Send + 'static>: Send + Sync {
    /// List every object of the collection
    async fn list(&self) -> Result<ObjectList<K>>;

    /// Stream changes that happened after `resource_version`
    async fn watch(&self, resource_version: &str)
        -> Result<BoxStream<'static, Result<WatchEvent<K>>>>;
}

/// Callbacks invoked by an informer after its store has been updated.
///
/// Calls happen on the informer's processing task, one at a time and in the
/// order the changes were applied. Implementations must not block.
pub trait ResourceEventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);

    fn on_update(&self, old: &K, new: &K);

    /// `obj` is the last known state of the deleted object
    fn on_delete(&self, obj: &K);
}

/// Creates and deletes the pods a job owns
#[async_trait]
pub trait PodControl: Send + Sync {
    /// Create one pod from `template` in `namespace`, owned by `owner`
    async fn create_pods(
        &self,
        namespace: &str,
        template: &PodTemplateSpec,
        owner: &Job,
    ) -> Result<()>;

    /// Delete the named pod
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Persists the status sub-resource of a job
#[async_trait]
pub trait JobStatusWriter: Send + Sync {
    /// Write `job.status`, returning the object as stored by the server
    async fn update_job_status(&self, job: &Job) -> Result<Job>;
}
