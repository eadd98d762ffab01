use crate::error::{ControllerError, Result};
use crate::traits::{JobStatusWriter, ListerWatcher, ObjectList, PodControl};
use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use starbug_core::{Job, PodTemplateSpec, Resource, WatchEvent};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

#[derive(Debug, Default)]
struct FakePodControlState {
    templates: Vec<PodTemplateSpec>,
    owners: Vec<String>,
    deleted: Vec<String>,
    error: Option<String>,
    failing_creates: usize,
    failing_deletes: usize,
}

/// In-memory pod control for tests
///
/// Records every successful create and delete. Calls can be made to fail
/// always (`with_error`) or only for the next few calls
/// (`fail_next_creates` / `fail_next_deletes`); failed calls are not recorded.
#[derive(Debug, Default)]
pub struct FakePodControl {
    state: Mutex<FakePodControlState>,
}

impl FakePodControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call with `message`
    pub fn with_error(message: impl Into<String>) -> Self {
        let control = Self::default();
        control.state.lock().error = Some(message.into());
        control
    }

    pub fn fail_next_creates(&self, count: usize) {
        self.state.lock().failing_creates = count;
    }

    pub fn fail_next_deletes(&self, count: usize) {
        self.state.lock().failing_deletes = count;
    }

    /// Templates of successfully created pods
    pub fn templates(&self) -> Vec<PodTemplateSpec> {
        self.state.lock().templates.clone()
    }

    /// Names of the jobs that owned each successful create
    pub fn owners(&self) -> Vec<String> {
        self.state.lock().owners.clone()
    }

    /// Names of successfully deleted pods
    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().deleted.clone()
    }

    pub fn create_count(&self) -> usize {
        self.state.lock().templates.len()
    }

    pub fn delete_count(&self) -> usize {
        self.state.lock().deleted.len()
    }

    /// Forget recorded calls
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.templates.clear();
        state.owners.clear();
        state.deleted.clear();
    }
}

#[async_trait]
impl PodControl for FakePodControl {
    async fn create_pods(
        &self,
        namespace: &str,
        template: &PodTemplateSpec,
        owner: &Job,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(message) = &state.error {
            return Err(ControllerError::api(500, message.clone()));
        }
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(ControllerError::api(500, "injected create failure"));
        }
        state.templates.push(template.clone());
        state.owners.push(owner.name().to_string());
        debug!("Mock: pod created in {} for job {}", namespace, owner.name());
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(message) = &state.error {
            return Err(ControllerError::api(500, message.clone()));
        }
        if state.failing_deletes > 0 {
            state.failing_deletes -= 1;
            return Err(ControllerError::api(500, "injected delete failure"));
        }
        state.deleted.push(name.to_string());
        debug!("Mock: pod deleted: {}/{}", namespace, name);
        Ok(())
    }
}

/// Status writer that records every update
#[derive(Debug, Default)]
pub struct RecordingStatusWriter {
    updates: Mutex<Vec<Job>>,
    error: Mutex<Option<ControllerError>>,
}

impl RecordingStatusWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every update with a 500 carrying `message`
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.error.lock() = Some(ControllerError::api(500, message.into()));
    }

    /// Fail every update with the given API status
    pub fn fail_with_status(&self, status: u16) {
        *self.error.lock() = Some(ControllerError::api(status, "injected status failure"));
    }

    pub fn succeed(&self) {
        *self.error.lock() = None;
    }

    pub fn updates(&self) -> Vec<Job> {
        self.updates.lock().clone()
    }

    pub fn last(&self) -> Option<Job> {
        self.updates.lock().last().cloned()
    }
}

#[async_trait]
impl JobStatusWriter for RecordingStatusWriter {
    async fn update_job_status(&self, job: &Job) -> Result<Job> {
        if let Some(ControllerError::Api { status, message }) = &*self.error.lock() {
            return Err(ControllerError::api(*status, message.clone()));
        }
        self.updates.lock().push(job.clone());
        Ok(job.clone())
    }
}

struct FakeSource<K> {
    items: BTreeMap<String, K>,
    resource_version: u64,
    watcher: Option<mpsc::UnboundedSender<Result<WatchEvent<K>>>>,
    watched_versions: Vec<String>,
    failing_lists: usize,
}

/// Scriptable list/watch source for informer tests
///
/// `list` returns the current item set; `watch` opens a stream that stays
/// open until the next `watch` call replaces it or `close_watch` is called.
/// `push` both applies an event to the item set and sends it to the open watch.
pub struct FakeListerWatcher<K> {
    source: Mutex<FakeSource<K>>,
    list_calls: AtomicUsize,
    watch_calls: AtomicUsize,
}

impl<K: Resource> FakeListerWatcher<K> {
    pub fn new(items: Vec<K>, resource_version: &str) -> Self {
        let lw = Self {
            source: Mutex::new(FakeSource {
                items: BTreeMap::new(),
                resource_version: 0,
                watcher: None,
                watched_versions: Vec::new(),
                failing_lists: 0,
            }),
            list_calls: AtomicUsize::new(0),
            watch_calls: AtomicUsize::new(0),
        };
        lw.set_items(items, resource_version);
        lw
    }

    /// Replace the listed items, as if the collection changed while unwatched
    pub fn set_items(&self, items: Vec<K>, resource_version: &str) {
        let mut source = self.source.lock();
        source.items = items
            .into_iter()
            .filter_map(|item| item.object_key().ok().map(|key| (key, item)))
            .collect();
        source.resource_version = resource_version.parse().unwrap_or(source.resource_version);
    }

    /// Apply `event` to the item set and deliver it to the open watch
    pub fn push(&self, event: WatchEvent<K>) -> bool {
        let mut source = self.source.lock();
        match &event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                if let Ok(key) = obj.object_key() {
                    source.items.insert(key, obj.clone());
                }
            }
            WatchEvent::Deleted(obj) => {
                if let Ok(key) = obj.object_key() {
                    source.items.remove(&key);
                }
            }
            WatchEvent::Bookmark(_) | WatchEvent::Error(_) => {}
        }
        source.resource_version += 1;

        match &source.watcher {
            Some(tx) => tx.send(Ok(event)).is_ok(),
            None => false,
        }
    }

    /// Deliver a stream error to the open watch
    pub fn push_error(&self, error: ControllerError) -> bool {
        match &self.source.lock().watcher {
            Some(tx) => tx.send(Err(error)).is_ok(),
            None => false,
        }
    }

    /// End the open watch stream
    pub fn close_watch(&self) {
        self.source.lock().watcher = None;
    }

    /// Make the next `count` list calls fail
    pub fn fail_next_lists(&self, count: usize) {
        self.source.lock().failing_lists = count;
    }

    /// Resource versions passed to each `watch` call, oldest first
    pub fn watched_versions(&self) -> Vec<String> {
        self.source.lock().watched_versions.clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    /// Wait until `watch` has been called at least `count` times
    pub async fn wait_for_watch(&self, count: usize) {
        while self.watch_calls() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[async_trait]
impl<K: Resource> ListerWatcher<K> for FakeListerWatcher<K> {
    async fn list(&self) -> Result<ObjectList<K>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut source = self.source.lock();
        if source.failing_lists > 0 {
            source.failing_lists -= 1;
            return Err(ControllerError::transport("injected list failure"));
        }
        Ok(ObjectList {
            items: source.items.values().cloned().collect(),
            resource_version: source.resource_version.to_string(),
        })
    }

    async fn watch(
        &self,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<K>>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut source = self.source.lock();
            source.watcher = Some(tx);
            source.watched_versions.push(resource_version.to_string());
        }
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starbug_core::{ObjectMeta, Pod};

    fn pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fake_pod_control_records_successes_only() {
        let control = FakePodControl::new();
        control.fail_next_creates(1);
        let template = PodTemplateSpec::default();
        let job = Job::default();

        assert!(control.create_pods("default", &template, &job).await.is_err());
        assert!(control.create_pods("default", &template, &job).await.is_ok());
        assert_eq!(control.create_count(), 1);

        control.delete_pod("default", "a").await.unwrap();
        assert_eq!(control.deleted(), vec!["a"]);

        control.clear();
        assert_eq!(control.create_count(), 0);
        assert_eq!(control.delete_count(), 0);
    }

    #[tokio::test]
    async fn test_fake_pod_control_with_error() {
        let control = FakePodControl::with_error("fake error");
        let job = Job::default();
        assert!(control
            .create_pods("default", &PodTemplateSpec::default(), &job)
            .await
            .is_err());
        assert!(control.delete_pod("default", "a").await.is_err());
        assert_eq!(control.create_count(), 0);
    }

    #[tokio::test]
    async fn test_recording_status_writer() {
        let writer = RecordingStatusWriter::new();
        writer.update_job_status(&Job::default()).await.unwrap();
        writer.fail_with_status(409);
        let err = writer.update_job_status(&Job::default()).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(writer.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_fake_lister_watcher() {
        let lw = FakeListerWatcher::new(vec![pod("a")], "3");
        let list = lw.list().await.unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.resource_version, "3");

        let mut stream = lw.watch(&list.resource_version).await.unwrap();
        assert!(lw.push(WatchEvent::Added(pod("b"))));
        assert!(matches!(
            stream.next().await,
            Some(Ok(WatchEvent::Added(_)))
        ));
        assert_eq!(lw.list().await.unwrap().items.len(), 2);

        lw.close_watch();
        assert!(stream.next().await.is_none());
        assert!(!lw.push(WatchEvent::Deleted(pod("a"))));
    }
}
