use k8s_openapi::api::batch::v1::Job;

/// Condition type set once a job has reached its completion count
pub const JOB_COMPLETE: &str = "Complete";
/// Condition type set when a job has permanently failed
pub const JOB_FAILED: &str = "Failed";

/// Desired number of concurrently active pods (defaults to 1, never negative)
pub fn job_parallelism(job: &Job) -> i32 {
    job.spec
        .as_ref()
        .and_then(|s| s.parallelism)
        .unwrap_or(1)
        .max(0)
}

/// Number of finished pods required for the job to complete (defaults to 1)
pub fn job_completions(job: &Job) -> i32 {
    job.spec
        .as_ref()
        .and_then(|s| s.completions)
        .unwrap_or(1)
        .max(0)
}

/// Whether the pod template uses `restartPolicy: Never`.
///
/// Under `Never` a failed pod is final and counts toward completions;
/// under `OnFailure` the kubelet restarts containers in place.
pub fn restart_policy_never(job: &Job) -> bool {
    job.spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|s| s.restart_policy.as_deref())
        == Some("Never")
}

/// A job is finished once it carries a `Complete` or `Failed` condition set to `True`
pub fn is_job_finished(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| (c.type_ == JOB_COMPLETE || c.type_ == JOB_FAILED) && c.status == "True")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobSpec, JobStatus};
    use k8s_openapi::api::core::v1::{PodSpec, PodTemplateSpec};

    #[test]
    fn test_defaults_when_unset() {
        let job = Job::default();
        assert_eq!(job_parallelism(&job), 1);
        assert_eq!(job_completions(&job), 1);
        assert!(!restart_policy_never(&job));
    }

    #[test]
    fn test_spec_values() {
        let job = Job {
            spec: Some(JobSpec {
                parallelism: Some(3),
                completions: Some(-2),
                template: PodTemplateSpec {
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(job_parallelism(&job), 3);
        assert_eq!(job_completions(&job), 0);
        assert!(restart_policy_never(&job));
    }

    #[test]
    fn test_is_job_finished() {
        let mut job = Job::default();
        assert!(!is_job_finished(&job));

        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: JOB_COMPLETE.to_string(),
                status: "False".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert!(!is_job_finished(&job));

        job.status.as_mut().unwrap().conditions.as_mut().unwrap()[0].status = "True".to_string();
        assert!(is_job_finished(&job));
    }
}
