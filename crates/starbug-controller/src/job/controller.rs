use crate::cache::{wait_for_cache_sync, Informer, Store, SyncedFlag, NAMESPACE_INDEX};
use crate::config::JobControllerConfig;
use crate::error::{ControllerError, Result};
use crate::expectations::ControllerExpectations;
use crate::job::handlers::{JobEventHandler, PodEventHandler};
use crate::job::pods::{partition_pods, pods_to_delete};
use crate::traits::{JobStatusWriter, ListerWatcher, PodControl};
use crate::workqueue::{ItemExponentialBackoff, WorkQueue};
use chrono::Utc;
use futures_util::future::join_all;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use starbug_core::{
    job_completions, job_parallelism, restart_policy_never, Job, JobCondition, JobStatus, Pod,
    Resource, Selector, JOB_COMPLETE,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of a successful sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Pods and status were reconciled
    Synced,
    /// The job no longer exists
    Deleted,
    /// Earlier creates or deletes have not been observed yet
    AwaitingExpectations,
    /// The pod cache is not ready; look again after the given delay
    RequeueAfter(Duration),
}

/// Drives every job towards its desired number of pods
pub struct JobController {
    job_informer: Arc<Informer<Job>>,
    pod_informer: Arc<Informer<Pod>>,
    jobs: Arc<Store<Job>>,
    pods: Arc<Store<Pod>>,
    queue: Arc<WorkQueue<String>>,
    expectations: Arc<ControllerExpectations>,
    pod_control: Arc<dyn PodControl>,
    status_writer: Arc<dyn JobStatusWriter>,
    config: JobControllerConfig,
}

impl JobController {
    pub fn new(
        job_lister_watcher: Arc<dyn ListerWatcher<Job>>,
        pod_lister_watcher: Arc<dyn ListerWatcher<Pod>>,
        pod_control: Arc<dyn PodControl>,
        status_writer: Arc<dyn JobStatusWriter>,
        config: JobControllerConfig,
    ) -> Self {
        let job_informer = Arc::new(Informer::new(
            "job",
            job_lister_watcher,
            config.informer.clone(),
        ));
        let pod_informer = Arc::new(Informer::new(
            "pod",
            pod_lister_watcher,
            config.informer.clone(),
        ));

        let queue = Arc::new(WorkQueue::with_rate_limiter(Box::new(
            ItemExponentialBackoff::<String>::new(config.base_backoff, config.max_backoff),
        )));
        let expectations = Arc::new(ControllerExpectations::new(config.expectations_timeout));

        let jobs = job_informer.store();
        let pods = pod_informer.store();

        job_informer.add_event_handler(Arc::new(JobEventHandler::new(
            queue.clone(),
            expectations.clone(),
        )));
        pod_informer.add_event_handler(Arc::new(PodEventHandler::new(
            queue.clone(),
            expectations.clone(),
            jobs.clone(),
        )));

        Self {
            job_informer,
            pod_informer,
            jobs,
            pods,
            queue,
            expectations,
            pod_control,
            status_writer,
            config,
        }
    }

    pub fn job_store(&self) -> Arc<Store<Job>> {
        self.jobs.clone()
    }

    pub fn pod_store(&self) -> Arc<Store<Pod>> {
        self.pods.clone()
    }

    pub fn job_informer(&self) -> Arc<Informer<Job>> {
        self.job_informer.clone()
    }

    pub fn pod_informer(&self) -> Arc<Informer<Pod>> {
        self.pod_informer.clone()
    }

    pub fn queue(&self) -> Arc<WorkQueue<String>> {
        self.queue.clone()
    }

    pub fn expectations(&self) -> Arc<ControllerExpectations> {
        self.expectations.clone()
    }

    /// Flags that flip once each informer has completed its first listing
    pub fn synced_flags(&self) -> Vec<SyncedFlag> {
        vec![
            self.job_informer.synced_flag(),
            self.pod_informer.synced_flag(),
        ]
    }

    /// Start informers and workers, then block until `token` is cancelled
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!(
            "Starting job controller with {} workers",
            self.config.workers
        );

        let informers = vec![
            tokio::spawn(self.job_informer.clone().run(token.clone())),
            tokio::spawn(self.pod_informer.clone().run(token.clone())),
        ];

        if wait_for_cache_sync(&self.synced_flags(), &token).await {
            info!("Job controller caches synced");
            let workers: Vec<_> = (0..self.config.workers.max(1))
                .map(|id| tokio::spawn(self.clone().worker(id)))
                .collect();

            token.cancelled().await;
            self.queue.shut_down();

            for worker in workers {
                if let Err(e) = worker.await {
                    error!("Job controller worker panicked: {}", e);
                }
            }
        } else {
            info!("Job controller stopped before caches synced");
        }

        self.queue.shut_down();
        for informer in informers {
            if let Err(e) = informer.await {
                warn!("Informer task failed: {}", e);
            }
        }
        info!("Job controller stopped");
    }

    async fn worker(self: Arc<Self>, id: usize) {
        debug!("Job worker {} started", id);
        while self.process_next_work_item().await {}
        debug!("Job worker {} stopped", id);
    }

    /// Take one key off the queue and sync it. Returns false once the queue is shut down.
    pub async fn process_next_work_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        match self.sync_one(&key).await {
            Ok(SyncOutcome::RequeueAfter(delay)) => {
                self.queue.add_after(key.clone(), delay);
            }
            // A pod event normally wakes the key first; this covers
            // observations that never arrive
            Ok(SyncOutcome::AwaitingExpectations) => {
                self.queue
                    .add_after(key.clone(), self.config.expectations_timeout);
            }
            Ok(_) => self.queue.forget(&key),
            Err(e) if e.is_retryable() => {
                warn!("Error syncing job {}, retrying: {}", key, e);
                self.queue.add_rate_limited(key.clone());
            }
            Err(e) => {
                error!("Dropping job {} out of the queue: {}", key, e);
                self.queue.forget(&key);
            }
        }

        self.queue.done(&key);
        true
    }

    /// Reconcile the job stored under `key`
    pub async fn sync_one(&self, key: &str) -> Result<SyncOutcome> {
        let started = Instant::now();
        let result = self.sync_job(key).await;
        debug!(
            "Finished syncing job {} ({:?}): {:?}",
            key,
            started.elapsed(),
            result
        );
        result
    }

    async fn sync_job(&self, key: &str) -> Result<SyncOutcome> {
        if !self.job_informer.has_synced() || !self.pod_informer.has_synced() {
            debug!("Caches not synced yet, delaying sync of job {}", key);
            return Ok(SyncOutcome::RequeueAfter(
                self.config.pod_store_sync_poll_period,
            ));
        }

        let Some(job) = self.jobs.get_by_key(key) else {
            info!("Job {} has been deleted", key);
            self.expectations.delete_expectations(key);
            return Ok(SyncOutcome::Deleted);
        };

        // Until earlier creates and deletes show up in the pod cache its
        // counts are stale, so acting now would overshoot
        if !self.expectations.satisfied_expectations(key) {
            debug!("Waiting on expectations for job {}", key);
            return Ok(SyncOutcome::AwaitingExpectations);
        }

        let counts = partition_pods(self.job_pods(&job)?);
        let succeeded = counts.succeeded;
        let failed = if restart_policy_never(&job) {
            counts.failed
        } else {
            0
        };
        let finished = succeeded + failed;
        let completions = job_completions(&job);
        let wanted = job_parallelism(&job).min((completions - finished).max(0));

        let (active, manage_error) = self.manage_job(key, &job, counts.active, wanted).await;

        let mut status = job.status.clone().unwrap_or_default();
        status.active = Some(active);
        status.succeeded = Some(succeeded);
        status.failed = Some(failed);
        if status.start_time.is_none() {
            status.start_time = Some(Time(Utc::now()));
        }
        if finished >= completions && !has_complete_condition(&status) {
            info!("Job {} completed", key);
            let now = Time(Utc::now());
            status.conditions.get_or_insert_with(Vec::new).push(JobCondition {
                type_: JOB_COMPLETE.to_string(),
                status: "True".to_string(),
                last_probe_time: Some(now.clone()),
                last_transition_time: Some(now.clone()),
                ..Default::default()
            });
            status.completion_time = Some(now);
        }

        if job.status.as_ref() != Some(&status) {
            let mut updated = (*job).clone();
            updated.status = Some(status);
            match self.status_writer.update_job_status(&updated).await {
                Ok(_) => debug!("Updated status of job {}", key),
                Err(e) if e.is_not_found() => {
                    info!("Job {} was deleted while syncing", key);
                    self.expectations.delete_expectations(key);
                    return Ok(SyncOutcome::Deleted);
                }
                Err(e) => return Err(ControllerError::status_update(key, e.to_string())),
            }
        }

        match manage_error {
            Some(e) => Err(e),
            None => Ok(SyncOutcome::Synced),
        }
    }

    /// Pods in the job's namespace matched by its selector
    fn job_pods(&self, job: &Job) -> Result<Vec<Arc<Pod>>> {
        let selector = Selector::from_label_selector(
            job.spec.as_ref().and_then(|s| s.selector.as_ref()),
        )?;
        if selector.is_empty() {
            warn!(
                "Job {}/{} has an empty selector and matches no pods",
                job.namespace(),
                job.name()
            );
            return Ok(Vec::new());
        }

        let pods = self.pods.by_index(NAMESPACE_INDEX, job.namespace())?;
        Ok(pods
            .into_iter()
            .filter(|pod| selector.matches(pod.labels()))
            .collect())
    }

    /// Create or delete pods until `wanted` are active.
    ///
    /// Returns the number of active pods after the calls that succeeded, and
    /// the aggregated error of the calls that did not.
    async fn manage_job(
        &self,
        key: &str,
        job: &Job,
        active: Vec<Arc<Pod>>,
        wanted: i32,
    ) -> (i32, Option<ControllerError>) {
        let current = active.len() as i32;

        if current > wanted {
            let diff = (current - wanted) as usize;
            info!(
                "Too many pods running job {}, need {}, deleting {}",
                key, wanted, diff
            );
            self.expectations.expect_deletions(key, diff as i64);

            let victims = pods_to_delete(active, diff);
            let results = join_all(
                victims
                    .iter()
                    .map(|pod| self.pod_control.delete_pod(pod.namespace(), pod.name())),
            )
            .await;

            let errors: Vec<ControllerError> = results.into_iter().filter_map(|r| r.err()).collect();
            if !errors.is_empty() {
                self.expectations
                    .lower_expectations(key, 0, errors.len() as i64);
            }
            let deleted = (diff - errors.len()) as i32;
            (current - deleted, aggregate(key, "delete", diff, errors))
        } else if current < wanted {
            let diff = (wanted - current) as usize;
            let Some(template) = job.spec.as_ref().map(|s| &s.template) else {
                return (
                    current,
                    Some(ControllerError::invalid_template(key, "job has no spec")),
                );
            };
            info!(
                "Too few pods running job {}, need {}, creating {}",
                key, wanted, diff
            );
            self.expectations.expect_creations(key, diff as i64);

            let results = join_all(
                (0..diff).map(|_| self.pod_control.create_pods(job.namespace(), template, job)),
            )
            .await;

            let errors: Vec<ControllerError> = results.into_iter().filter_map(|r| r.err()).collect();
            if !errors.is_empty() {
                self.expectations
                    .lower_expectations(key, errors.len() as i64, 0);
            }
            let created = (diff - errors.len()) as i32;
            (current + created, aggregate(key, "create", diff, errors))
        } else {
            (current, None)
        }
    }
}

fn has_complete_condition(status: &JobStatus) -> bool {
    status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == JOB_COMPLETE && c.status == "True")
}

/// Fold the failures of one batch into a single error
fn aggregate(
    key: &str,
    action: &str,
    attempted: usize,
    errors: Vec<ControllerError>,
) -> Option<ControllerError> {
    if errors.is_empty() {
        return None;
    }
    // Retrying cannot fix a batch where every call failed permanently
    if errors.iter().all(|e| !e.is_retryable()) {
        return errors.into_iter().next();
    }

    for e in &errors {
        warn!("Failed to {} pod for job {}: {}", action, key, e);
    }
    let message = errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    Some(ControllerError::pod_control(
        key,
        action,
        errors.len(),
        attempted,
        message,
    ))
}
