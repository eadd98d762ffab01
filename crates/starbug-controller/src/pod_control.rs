use crate::api_client::ApiClient;
use crate::error::{ControllerError, Result};
use crate::traits::PodControl;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use starbug_core::{Job, ObjectMeta, Pod, PodTemplateSpec, Resource};
use std::sync::Arc;
use tracing::info;

/// Length of the random suffix appended to generated pod names
const POD_NAME_SUFFIX_LEN: usize = 5;

/// Build the pod a job creates from its template.
///
/// The pod gets a generated `<job>-<suffix>` name, the template's labels and
/// annotations, and a controller owner reference back to the job.
pub fn pod_from_template(namespace: &str, template: &PodTemplateSpec, owner: &Job) -> Result<Pod> {
    let job_name = owner.name();
    let template_meta = template.metadata.clone().unwrap_or_default();

    let labels = template_meta
        .labels
        .filter(|labels| !labels.is_empty())
        .ok_or_else(|| {
            ControllerError::invalid_template(job_name, "template has no labels to select pods by")
        })?;

    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(POD_NAME_SUFFIX_LEN)
        .collect();

    let owner_reference = OwnerReference {
        api_version: owner.api_version(),
        kind: owner.kind(),
        name: job_name.to_string(),
        uid: owner.uid().unwrap_or_default().to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    };

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}", job_name, suffix)),
            generate_name: Some(format!("{}-", job_name)),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            annotations: template_meta.annotations,
            owner_references: Some(vec![owner_reference]),
            ..Default::default()
        },
        spec: template.spec.clone(),
        ..Default::default()
    })
}

/// Pod control that talks to the API server
pub struct ApiPodControl {
    client: Arc<ApiClient>,
}

impl ApiPodControl {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodControl for ApiPodControl {
    async fn create_pods(
        &self,
        namespace: &str,
        template: &PodTemplateSpec,
        owner: &Job,
    ) -> Result<()> {
        let pod = pod_from_template(namespace, template, owner)?;
        let created = self.client.create_pod(namespace, &pod).await?;
        info!(
            "Created pod {}/{} for job {}",
            namespace,
            created.name(),
            owner.name()
        );
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.client.delete_pod(namespace, name).await?;
        info!("Deleted pod {}/{}", namespace, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use std::collections::BTreeMap;

    fn job() -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some("pi".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("1234-5678".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn template(labels: Option<BTreeMap<String, String>>) -> PodTemplateSpec {
        PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels,
                annotations: Some(BTreeMap::from([("a".to_string(), "b".to_string())])),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "pi".to_string(),
                    image: Some("perl".to_string()),
                    ..Default::default()
                }],
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_pod_from_template() {
        let labels = BTreeMap::from([("job".to_string(), "pi".to_string())]);
        let pod = pod_from_template("default", &template(Some(labels.clone())), &job()).unwrap();

        let name = pod.name();
        assert!(name.starts_with("pi-"));
        assert_eq!(name.len(), "pi-".len() + POD_NAME_SUFFIX_LEN);
        assert_eq!(pod.namespace(), "default");
        assert_eq!(pod.labels(), Some(&labels));
        assert_eq!(
            pod.metadata.annotations.as_ref().and_then(|a| a.get("a")),
            Some(&"b".to_string())
        );

        let owner = &pod.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "Job");
        assert_eq!(owner.api_version, "batch/v1");
        assert_eq!(owner.uid, "1234-5678");
        assert_eq!(owner.controller, Some(true));

        assert_eq!(pod.spec.unwrap().containers[0].name, "pi");
    }

    #[test]
    fn test_generated_names_differ() {
        let labels = BTreeMap::from([("job".to_string(), "pi".to_string())]);
        let t = template(Some(labels));
        let a = pod_from_template("default", &t, &job()).unwrap();
        let b = pod_from_template("default", &t, &job()).unwrap();
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn test_template_without_labels_is_rejected() {
        let err = pod_from_template("default", &template(None), &job()).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidTemplate { .. }));
        assert!(!err.is_retryable());

        let err = pod_from_template("default", &template(Some(BTreeMap::new())), &job());
        assert!(err.is_err());
    }
}
