use k8s_openapi::api::core::v1::Pod;
use std::fmt;

/// Lifecycle phase reported in `status.phase`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PodPhase {
    Pending,
    Unknown,
    Running,
    Succeeded,
    Failed,
}

impl PodPhase {
    /// Parse a phase string; a missing or unrecognised phase is `Pending`
    /// since the pod has not been reported on yet.
    pub fn parse(phase: Option<&str>) -> Self {
        match phase {
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            Some("Unknown") => Self::Unknown,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Unknown => "Unknown",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current phase of a pod
pub fn pod_phase(pod: &Pod) -> PodPhase {
    PodPhase::parse(pod.status.as_ref().and_then(|s| s.phase.as_deref()))
}

/// A pod counts as active until it terminates or starts being deleted
pub fn is_pod_active(pod: &Pod) -> bool {
    !matches!(pod_phase(pod), PodPhase::Succeeded | PodPhase::Failed)
        && pod.metadata.deletion_timestamp.is_none()
}

/// Whether the pod reports a `Ready=True` condition
pub fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn pod_in_phase(phase: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_phase_parsing() {
        assert_eq!(pod_phase(&Pod::default()), PodPhase::Pending);
        assert_eq!(pod_phase(&pod_in_phase("Running")), PodPhase::Running);
        assert_eq!(pod_phase(&pod_in_phase("Succeeded")), PodPhase::Succeeded);
        assert_eq!(pod_phase(&pod_in_phase("Failed")), PodPhase::Failed);
        assert_eq!(pod_phase(&pod_in_phase("Unknown")), PodPhase::Unknown);
    }

    #[test]
    fn test_is_pod_active() {
        assert!(is_pod_active(&pod_in_phase("Pending")));
        assert!(is_pod_active(&pod_in_phase("Running")));
        assert!(!is_pod_active(&pod_in_phase("Succeeded")));
        assert!(!is_pod_active(&pod_in_phase("Failed")));

        let mut terminating = pod_in_phase("Running");
        terminating.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(!is_pod_active(&terminating));
    }

    #[test]
    fn test_is_pod_ready() {
        let mut pod = pod_in_phase("Running");
        assert!(!is_pod_ready(&pod));

        pod.status.as_mut().unwrap().conditions = Some(vec![PodCondition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }]);
        assert!(is_pod_ready(&pod));
    }
}
