use crate::error::{ControllerError, Result};
use crate::traits::{JobStatusWriter, ListerWatcher, ObjectList};
use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::stream::{self, BoxStream, StreamExt};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ListMeta;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use starbug_core::{
    GroupVersionKind, Job, Pod, RawWatchEvent, Resource, ResourceKey, WatchEvent,
};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Lightweight HTTP client for the controller to talk to the API server
pub struct ApiClient {
    base_url: String,
    client: Client,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "K: DeserializeOwned"))]
struct ListResponse<K> {
    #[serde(default = "Vec::new")]
    items: Vec<K>,
    #[serde(default)]
    metadata: ListMeta,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /{api}/{resource} across all namespaces
    pub async fn list<K: Resource>(&self, gvk: &GroupVersionKind) -> Result<ObjectList<K>> {
        let url = format!("{}{}", self.base_url, gvk.all_namespaces_path());
        debug!("GET {}", url);

        let resp = self.client.get(&url).send().await.map_err(transport)?;
        let resp = check_status(resp).await?;
        let list: ListResponse<K> = resp
            .json()
            .await
            .map_err(|e| ControllerError::decode(format!("{} list", gvk.kind), e.to_string()))?;

        Ok(ObjectList {
            items: list.items,
            resource_version: list.metadata.resource_version.unwrap_or_default(),
        })
    }

    /// GET /{api}/{resource}?watch=true across all namespaces
    pub async fn watch<K: Resource>(
        &self,
        gvk: &GroupVersionKind,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<K>>>> {
        let url = format!("{}{}", self.base_url, gvk.all_namespaces_path());
        debug!("WATCH {} from version {}", url, resource_version);

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("watch", "true"),
                ("allowWatchBookmarks", "true"),
                ("resourceVersion", resource_version),
            ])
            .send()
            .await
            .map_err(transport)?;
        let resp = check_status(resp).await?;

        let mut decoder = LineDecoder::default();
        let events = resp.bytes_stream().flat_map(move |chunk| {
            let decoded: Vec<Result<WatchEvent<K>>> = match chunk {
                Ok(bytes) => decoder
                    .push(&bytes)
                    .iter()
                    .filter_map(|line| decode_watch_line(line))
                    .collect(),
                Err(e) => vec![Err(transport(e))],
            };
            stream::iter(decoded)
        });

        Ok(events.boxed())
    }

    /// POST /api/v1/namespaces/{namespace}/pods
    pub async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        let key = ResourceKey::new(GroupVersionKind::pod(), namespace, "");
        let url = format!("{}{}", self.base_url, key.collection_path());
        debug!("POST {}", url);

        let resp = self.client.post(&url).json(pod).send().await.map_err(transport)?;
        let resp = check_status(resp).await?;
        resp.json::<Pod>()
            .await
            .map_err(|e| ControllerError::decode("pod", e.to_string()))
    }

    /// DELETE /api/v1/namespaces/{namespace}/pods/{name}
    pub async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let key = ResourceKey::new(GroupVersionKind::pod(), namespace, name);
        let url = format!("{}{}", self.base_url, key.api_path());
        debug!("DELETE {}", url);

        let resp = self.client.delete(&url).send().await.map_err(transport)?;
        check_status(resp).await?;
        Ok(())
    }

    /// PUT /apis/batch/v1/namespaces/{namespace}/jobs/{name}/status
    pub async fn put_job_status(&self, job: &Job) -> Result<Job> {
        let key = job.resource_key()?;
        let url = format!("{}{}/status", self.base_url, key.api_path());
        debug!("PUT {}", url);

        let resp = self.client.put(&url).json(job).send().await.map_err(transport)?;
        let resp = check_status(resp).await?;
        resp.json::<Job>()
            .await
            .map_err(|e| ControllerError::decode("job", e.to_string()))
    }
}

#[async_trait]
impl JobStatusWriter for ApiClient {
    async fn update_job_status(&self, job: &Job) -> Result<Job> {
        self.put_job_status(job).await
    }
}

fn transport(e: reqwest::Error) -> ControllerError {
    ControllerError::transport(format!("HTTP request failed: {}", e))
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ControllerError::api(status.as_u16(), body))
}

/// Splits a chunked byte stream into complete lines
#[derive(Debug, Default)]
pub struct LineDecoder {
    buf: BytesMut,
}

impl LineDecoder {
    /// Feed a chunk and return every line it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            let text = String::from_utf8_lossy(&line[..pos]);
            lines.push(text.trim_end_matches('\r').to_string());
        }
        lines
    }
}

/// Decode one line of a watch response.
///
/// Accepts newline-delimited JSON and server-sent-event `data:` lines.
/// Blank lines, SSE comments and other SSE fields yield `None`.
pub fn decode_watch_line<K: DeserializeOwned>(line: &str) -> Option<Result<WatchEvent<K>>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = match line.strip_prefix("data:") {
        Some(data) => data.trim_start(),
        None if line.starts_with('{') => line,
        None => return None,
    };

    let decoded = serde_json::from_str::<RawWatchEvent>(payload)
        .map_err(|e| ControllerError::decode("watch event", e.to_string()))
        .and_then(|raw| WatchEvent::from_raw(raw).map_err(ControllerError::from));
    Some(decoded)
}

/// Lists and watches one resource type through an [`ApiClient`]
pub struct ApiListerWatcher<K> {
    client: Arc<ApiClient>,
    gvk: GroupVersionKind,
    _marker: PhantomData<fn() -> K>,
}

impl<K> ApiListerWatcher<K> {
    pub fn new(client: Arc<ApiClient>, gvk: GroupVersionKind) -> Self {
        Self {
            client,
            gvk,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<K: Resource> ListerWatcher<K> for ApiListerWatcher<K> {
    async fn list(&self) -> Result<ObjectList<K>> {
        self.client.list(&self.gvk).await
    }

    async fn watch(
        &self,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<K>>>> {
        self.client.watch(&self.gvk, resource_version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ApiClient::new("http://127.0.0.1:6443/");
        assert_eq!(client.base_url(), "http://127.0.0.1:6443");
    }

    #[test]
    fn test_line_decoder_handles_split_chunks() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"{\"type\":\"ADD").is_empty());
        let lines = decoder.push(b"ED\"}\r\n{\"a\":1}\n{\"b\"");
        assert_eq!(lines, vec!["{\"type\":\"ADDED\"}", "{\"a\":1}"]);
        assert_eq!(decoder.push(b":2}\n"), vec!["{\"b\":2}"]);
    }

    #[test]
    fn test_decode_ndjson_line() {
        let line = r#"{"type":"ADDED","object":{"metadata":{"name":"pi-abc","namespace":"default"}}}"#;
        match decode_watch_line::<Pod>(line) {
            Some(Ok(WatchEvent::Added(pod))) => assert_eq!(pod.name(), "pi-abc"),
            other => panic!("unexpected decode result {:?}", other),
        }
    }

    #[test]
    fn test_decode_sse_framing() {
        assert!(decode_watch_line::<Pod>("").is_none());
        assert!(decode_watch_line::<Pod>(": keep-alive").is_none());
        assert!(decode_watch_line::<Pod>("event: message").is_none());

        let line = r#"data: {"type":"DELETED","object":{"metadata":{"name":"pi-abc","namespace":"default"}}}"#;
        assert!(matches!(
            decode_watch_line::<Pod>(line),
            Some(Ok(WatchEvent::Deleted(_)))
        ));
    }

    #[test]
    fn test_decode_garbage_is_an_error() {
        assert!(matches!(
            decode_watch_line::<Pod>("data: {not json"),
            Some(Err(ControllerError::Decode { .. }))
        ));
    }

    #[test]
    fn test_list_response_parsing() {
        let body = r#"{"kind":"JobList","metadata":{"resourceVersion":"17"},"items":[{"metadata":{"name":"pi","namespace":"default"}}]}"#;
        let list: ListResponse<Job> = serde_json::from_str(body).unwrap();
        assert_eq!(list.items.len(), 1);
        assert_eq!(list.metadata.resource_version.as_deref(), Some("17"));

        let empty: ListResponse<Job> = serde_json::from_str(r#"{"kind":"JobList"}"#).unwrap();
        assert!(empty.items.is_empty());
        assert!(empty.metadata.resource_version.is_none());
    }
}
