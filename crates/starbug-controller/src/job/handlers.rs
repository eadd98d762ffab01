use crate::cache::{Store, NAMESPACE_INDEX};
use crate::expectations::ControllerExpectations;
use crate::traits::ResourceEventHandler;
use crate::workqueue::WorkQueue;
use starbug_core::{is_job_finished, Job, Pod, Resource, Selector};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

fn enqueue<K: Resource>(queue: &WorkQueue<String>, obj: &K) {
    match obj.object_key() {
        Ok(key) => queue.add(key),
        Err(e) => warn!("Couldn't get key for {} {}: {}", obj.kind(), obj.name(), e),
    }
}

fn oldest_first(a: &Arc<Job>, b: &Arc<Job>) -> Ordering {
    let created = |j: &Job| j.metadata.creation_timestamp.as_ref().map(|t| t.0);
    match (created(a), created(b)) {
        (Some(ta), Some(tb)) => ta.cmp(&tb),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.name().cmp(b.name()))
}

/// Find the job managing `pod`.
///
/// Only jobs in the pod's namespace with a non-empty selector matching the
/// pod's labels are candidates. When several match, the oldest wins.
pub fn get_pod_job(pod: &Pod, jobs: &Store<Job>) -> Option<Arc<Job>> {
    let labels = pod.labels().filter(|labels| !labels.is_empty())?;

    let candidates = match jobs.by_index(NAMESPACE_INDEX, pod.namespace()) {
        Ok(candidates) => candidates,
        Err(e) => {
            warn!("Failed to look up jobs for pod {}: {}", pod.name(), e);
            return None;
        }
    };

    let mut matching: Vec<Arc<Job>> = candidates
        .into_iter()
        .filter(|job| {
            let selector = job.spec.as_ref().and_then(|s| s.selector.as_ref());
            match Selector::from_label_selector(selector) {
                Ok(selector) => !selector.is_empty() && selector.matches(Some(labels)),
                Err(e) => {
                    warn!("Job {}/{} has an invalid selector: {}", job.namespace(), job.name(), e);
                    false
                }
            }
        })
        .collect();

    if matching.len() > 1 {
        matching.sort_by(oldest_first);
        let names: Vec<&str> = matching.iter().map(|j| j.name()).collect();
        warn!(
            "Pod {}/{} matches multiple jobs {:?}, choosing {}",
            pod.namespace(),
            pod.name(),
            names,
            names[0]
        );
    }

    matching.into_iter().next()
}

/// Enqueues jobs as they change
pub struct JobEventHandler {
    queue: Arc<WorkQueue<String>>,
    expectations: Arc<ControllerExpectations>,
}

impl JobEventHandler {
    pub fn new(queue: Arc<WorkQueue<String>>, expectations: Arc<ControllerExpectations>) -> Self {
        Self {
            queue,
            expectations,
        }
    }
}

impl ResourceEventHandler<Job> for JobEventHandler {
    fn on_add(&self, job: &Job) {
        enqueue(&self.queue, job);
    }

    fn on_update(&self, _old: &Job, new: &Job) {
        // Finished jobs need no further work
        if is_job_finished(new) {
            return;
        }
        enqueue(&self.queue, new);
    }

    fn on_delete(&self, job: &Job) {
        if let Ok(key) = job.object_key() {
            self.expectations.delete_expectations(&key);
        }
        enqueue(&self.queue, job);
    }
}

/// Maps pod changes to their job, settles expectations and enqueues the job
pub struct PodEventHandler {
    queue: Arc<WorkQueue<String>>,
    expectations: Arc<ControllerExpectations>,
    jobs: Arc<Store<Job>>,
}

impl PodEventHandler {
    pub fn new(
        queue: Arc<WorkQueue<String>>,
        expectations: Arc<ControllerExpectations>,
        jobs: Arc<Store<Job>>,
    ) -> Self {
        Self {
            queue,
            expectations,
            jobs,
        }
    }

    fn job_key(&self, pod: &Pod) -> Option<String> {
        let job = get_pod_job(pod, &self.jobs)?;
        match job.object_key() {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("Couldn't get key for job {}: {}", job.name(), e);
                None
            }
        }
    }
}

impl ResourceEventHandler<Pod> for PodEventHandler {
    fn on_add(&self, pod: &Pod) {
        // A pod already being deleted when first seen must not count as a creation
        if pod.metadata.deletion_timestamp.is_some() {
            self.on_delete(pod);
            return;
        }
        if let Some(key) = self.job_key(pod) {
            debug!("Pod {}/{} created for job {}", pod.namespace(), pod.name(), key);
            self.expectations.creation_observed(&key);
            self.queue.add(key);
        }
    }

    fn on_update(&self, old: &Pod, new: &Pod) {
        if old.metadata.resource_version == new.metadata.resource_version {
            // Periodic resync; nothing changed
            return;
        }
        if new.metadata.deletion_timestamp.is_some() {
            self.on_delete(new);
            return;
        }

        if let Some(key) = self.job_key(new) {
            self.queue.add(key);
        }
        if old.labels() != new.labels() {
            if let Some(key) = self.job_key(old) {
                self.queue.add(key);
            }
        }
    }

    fn on_delete(&self, pod: &Pod) {
        if let Some(key) = self.job_key(pod) {
            debug!("Pod {}/{} deleted for job {}", pod.namespace(), pod.name(), key);
            self.expectations.deletion_observed(&key);
            self.queue.add(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::api::batch::v1::{JobCondition, JobSpec, JobStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use starbug_core::{LabelSelector, ObjectMeta};
    use std::collections::BTreeMap;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn job(namespace: &str, name: &str, selector: Option<BTreeMap<String, String>>) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                selector: selector.map(|match_labels| LabelSelector {
                    match_labels: Some(match_labels),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(namespace: &str, name: &str, pod_labels: Option<BTreeMap<String, String>>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: pod_labels,
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn jobs(items: Vec<Job>) -> Arc<Store<Job>> {
        let store = Arc::new(Store::new());
        for item in items {
            store.add(item).unwrap();
        }
        store
    }

    fn pod_handler(
        store: Arc<Store<Job>>,
    ) -> (PodEventHandler, Arc<WorkQueue<String>>, Arc<ControllerExpectations>) {
        let queue = Arc::new(WorkQueue::new());
        let expectations = Arc::new(ControllerExpectations::default());
        let handler = PodEventHandler::new(queue.clone(), expectations.clone(), store);
        (handler, queue, expectations)
    }

    #[test]
    fn test_pod_without_labels_matches_nothing() {
        let store = jobs(vec![job("", "basic", None)]);
        assert!(get_pod_job(&pod("", "foo1", None), &store).is_none());
    }

    #[test]
    fn test_matching_labels_other_namespace() {
        let store = jobs(vec![job("", "foo", Some(labels(&[("foo", "bar")])))]);
        let p = pod("ns", "foo2", Some(labels(&[("foo", "bar")])));
        assert!(get_pod_job(&p, &store).is_none());
    }

    #[test]
    fn test_matching_namespace_and_labels() {
        let store = jobs(vec![
            job("", "foo", Some(labels(&[("foo", "bar")]))),
            job("ns", "bar", Some(labels(&[("foo", "bar")]))),
        ]);
        let p = pod("ns", "foo3", Some(labels(&[("foo", "bar")])));
        assert_eq!(get_pod_job(&p, &store).unwrap().name(), "bar");
    }

    #[test]
    fn test_empty_selector_matches_nothing() {
        let store = jobs(vec![job("ns", "greedy", Some(BTreeMap::new()))]);
        let p = pod("ns", "foo", Some(labels(&[("foo", "bar")])));
        assert!(get_pod_job(&p, &store).is_none());
    }

    #[test]
    fn test_overlapping_jobs_oldest_wins() {
        let mut newer = job("ns", "a-newer", Some(labels(&[("foo", "bar")])));
        newer.metadata.creation_timestamp = Utc.timestamp_opt(200, 0).single().map(Time);
        let mut older = job("ns", "z-older", Some(labels(&[("foo", "bar")])));
        older.metadata.creation_timestamp = Utc.timestamp_opt(100, 0).single().map(Time);

        let store = jobs(vec![newer, older]);
        let p = pod("ns", "foo", Some(labels(&[("foo", "bar")])));
        assert_eq!(get_pod_job(&p, &store).unwrap().name(), "z-older");
    }

    #[tokio::test]
    async fn test_finished_job_update_not_enqueued() {
        let queue = Arc::new(WorkQueue::new());
        let handler = JobEventHandler::new(queue.clone(), Arc::new(ControllerExpectations::default()));

        let running = job("default", "foo", Some(labels(&[("foo", "bar")])));
        handler.on_add(&running);
        assert_eq!(queue.get().await.as_deref(), Some("default/foo"));
        queue.done(&"default/foo".to_string());

        let mut finished = running.clone();
        finished.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Complete".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        handler.on_update(&running, &finished);
        assert!(queue.is_empty());

        handler.on_update(&running, &running);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_job_delete_clears_expectations() {
        let queue = Arc::new(WorkQueue::new());
        let expectations = Arc::new(ControllerExpectations::default());
        let handler = JobEventHandler::new(queue.clone(), expectations.clone());

        expectations.expect_creations("default/foo", 2);
        handler.on_delete(&job("default", "foo", None));
        assert!(expectations.get_expectations("default/foo").is_none());
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_pod_add_and_delete_settle_expectations() {
        let store = jobs(vec![job("default", "foo", Some(labels(&[("foo", "bar")])))]);
        let (handler, queue, expectations) = pod_handler(store);
        expectations.set_expectations("default/foo", 1, 1);

        let p = pod("default", "foo-1", Some(labels(&[("foo", "bar")])));
        handler.on_add(&p);
        assert_eq!(
            expectations.get_expectations("default/foo").unwrap().get(),
            (0, 1)
        );
        handler.on_delete(&p);
        assert!(expectations.satisfied_expectations("default/foo"));
        assert_eq!(queue.get().await.as_deref(), Some("default/foo"));
    }

    #[tokio::test]
    async fn test_pod_added_while_deleting_counts_as_delete() {
        let store = jobs(vec![job("default", "foo", Some(labels(&[("foo", "bar")])))]);
        let (handler, _queue, expectations) = pod_handler(store);
        expectations.set_expectations("default/foo", 1, 1);

        let mut p = pod("default", "foo-1", Some(labels(&[("foo", "bar")])));
        p.metadata.deletion_timestamp = Some(Time(Utc::now()));
        handler.on_add(&p);
        assert_eq!(
            expectations.get_expectations("default/foo").unwrap().get(),
            (1, 0)
        );
    }

    #[tokio::test]
    async fn test_pod_update_same_version_ignored() {
        let store = jobs(vec![job("default", "foo", Some(labels(&[("foo", "bar")])))]);
        let (handler, queue, _expectations) = pod_handler(store);

        let p = pod("default", "foo-1", Some(labels(&[("foo", "bar")])));
        handler.on_update(&p, &p);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_pod_label_change_enqueues_both_jobs() {
        let store = jobs(vec![
            job("default", "old", Some(labels(&[("app", "old")]))),
            job("default", "new", Some(labels(&[("app", "new")]))),
        ]);
        let (handler, queue, _expectations) = pod_handler(store);

        let before = pod("default", "p", Some(labels(&[("app", "old")])));
        let mut after = pod("default", "p", Some(labels(&[("app", "new")])));
        after.metadata.resource_version = Some("2".to_string());

        handler.on_update(&before, &after);
        assert_eq!(queue.get().await.as_deref(), Some("default/new"));
        assert_eq!(queue.get().await.as_deref(), Some("default/old"));
    }
}
