use starbug_core::{is_pod_active, is_pod_ready, pod_phase, Pod, PodPhase, Resource};
use std::cmp::Ordering;
use std::sync::Arc;

/// Pods of one job split by what they mean for progress
#[derive(Debug, Default)]
pub struct PodCounts {
    pub active: Vec<Arc<Pod>>,
    pub succeeded: i32,
    pub failed: i32,
}

/// Split pods into active ones and terminal counts.
///
/// Pods that are being deleted are not active. Succeeded and failed pods
/// are counted whether or not they are being deleted.
pub fn partition_pods(pods: Vec<Arc<Pod>>) -> PodCounts {
    let mut counts = PodCounts::default();
    for pod in pods {
        match pod_phase(&pod) {
            PodPhase::Succeeded => counts.succeeded += 1,
            PodPhase::Failed => counts.failed += 1,
            _ if is_pod_active(&pod) => counts.active.push(pod),
            _ => {}
        }
    }
    counts
}

fn is_scheduled(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.as_deref())
        .is_some_and(|n| !n.is_empty())
}

/// Order in which surplus active pods are deleted: the least useful pod first.
///
/// Unscheduled before scheduled, then Pending, Unknown, Running, then not
/// ready before ready, then the most recently created, then by name.
pub fn deletion_order(a: &Pod, b: &Pod) -> Ordering {
    is_scheduled(a)
        .cmp(&is_scheduled(b))
        .then_with(|| pod_phase(a).cmp(&pod_phase(b)))
        .then_with(|| is_pod_ready(a).cmp(&is_pod_ready(b)))
        .then_with(|| {
            // Newest first; a pod without a timestamp sorts as the newest
            let created = |p: &Pod| p.metadata.creation_timestamp.as_ref().map(|t| t.0);
            match (created(a), created(b)) {
                (Some(ta), Some(tb)) => tb.cmp(&ta),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        })
        .then_with(|| a.name().cmp(b.name()))
}

/// The first `count` pods of `active` in deletion order
pub fn pods_to_delete(mut active: Vec<Arc<Pod>>, count: usize) -> Vec<Arc<Pod>> {
    active.sort_by(|a, b| deletion_order(a, b));
    active.truncate(count);
    active
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::api::core::v1::{PodCondition, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use starbug_core::ObjectMeta;

    fn pod(name: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn scheduled(mut pod: Pod) -> Pod {
        pod.spec = Some(PodSpec {
            node_name: Some("node-1".to_string()),
            ..Default::default()
        });
        pod
    }

    fn ready(mut pod: Pod) -> Pod {
        if let Some(status) = pod.status.as_mut() {
            status.conditions = Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]);
        }
        pod
    }

    fn created(mut pod: Pod, secs: i64) -> Pod {
        pod.metadata.creation_timestamp = Utc.timestamp_opt(secs, 0).single().map(Time);
        pod
    }

    fn names(pods: &[Arc<Pod>]) -> Vec<&str> {
        pods.iter().map(|p| p.name()).collect()
    }

    #[test]
    fn test_partition_pods() {
        let mut deleting = pod("deleting", "Running");
        deleting.metadata.deletion_timestamp = Some(Time(Utc::now()));

        let counts = partition_pods(vec![
            Arc::new(pod("r", "Running")),
            Arc::new(pod("p", "Pending")),
            Arc::new(pod("s", "Succeeded")),
            Arc::new(pod("f1", "Failed")),
            Arc::new(pod("f2", "Failed")),
            Arc::new(deleting),
        ]);

        assert_eq!(names(&counts.active), vec!["r", "p"]);
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.failed, 2);
    }

    #[test]
    fn test_terminal_pods_counted_while_deleting() {
        let mut succeeded = pod("done", "Succeeded");
        succeeded.metadata.deletion_timestamp = Some(Time(Utc::now()));
        let mut failed = pod("crashed", "Failed");
        failed.metadata.deletion_timestamp = Some(Time(Utc::now()));

        let counts = partition_pods(vec![Arc::new(succeeded), Arc::new(failed)]);
        assert!(counts.active.is_empty());
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.failed, 1);
    }

    #[test]
    fn test_deletion_prefers_unscheduled_then_phase() {
        let active = vec![
            Arc::new(scheduled(pod("running", "Running"))),
            Arc::new(scheduled(pod("pending", "Pending"))),
            Arc::new(scheduled(pod("unknown", "Unknown"))),
            Arc::new(pod("unscheduled", "Pending")),
        ];
        let victims = pods_to_delete(active, 4);
        assert_eq!(names(&victims), vec!["unscheduled", "pending", "unknown", "running"]);
    }

    #[test]
    fn test_deletion_prefers_not_ready_then_newest() {
        let active = vec![
            Arc::new(ready(scheduled(created(pod("ready-new", "Running"), 300)))),
            Arc::new(scheduled(created(pod("old", "Running"), 100))),
            Arc::new(scheduled(created(pod("new", "Running"), 200))),
        ];
        let victims = pods_to_delete(active, 2);
        assert_eq!(names(&victims), vec!["new", "old"]);
    }

    #[test]
    fn test_deletion_order_is_deterministic() {
        let active: Vec<Arc<Pod>> = ["c", "a", "b"]
            .iter()
            .map(|n| Arc::new(pod(n, "Running")))
            .collect();
        let mut reversed = active.clone();
        reversed.reverse();

        assert_eq!(names(&pods_to_delete(active, 2)), vec!["a", "b"]);
        assert_eq!(names(&pods_to_delete(reversed, 2)), vec!["a", "b"]);
    }
}
