use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ConfigError, TransportError};
use crate::state::{DownloadRequest, TaskId, TaskStatus};

/// The extraction service as seen by the lifecycle controller.
///
/// Implementations hold no mutable state and do not retry; retry policy
/// belongs to whoever drives them.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Starts a job and returns the id the service assigned to it.
    async fn submit(&self, request: &DownloadRequest) -> Result<TaskId, TransportError>;

    /// Current status snapshot of a job.
    async fn query_status(&self, id: &TaskId) -> Result<TaskStatus, TransportError>;

    /// Address the finished artifact is served from. Never touches the network.
    fn artifact_location(&self, id: &TaskId) -> Url;
}

#[derive(Deserialize)]
struct SubmitResponse {
    task_id: TaskId,
}

/// HTTP client for the extraction service API.
#[derive(Clone, Debug)]
pub struct ServiceClient {
    client: Client,
    base: Url,
}

impl ServiceClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        let base = config.base_url()?;
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout())
            .build()
            .unwrap_or_else(|_| Client::new());

        Ok(Self { client, base })
    }

    /// Appends path segments to the base url, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // Base urls are checked for `cannot_be_a_base` at construction.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Starts streaming an artifact from the address given by
    /// [`TaskService::artifact_location`].
    pub async fn fetch_artifact(&self, location: &Url) -> Result<Response, TransportError> {
        let response = self.client.get(location.clone()).send().await?;
        ensure_success(location.path(), response)
    }
}

fn ensure_success(endpoint: &str, response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status {
            endpoint: endpoint.to_string(),
            status,
        });
    }
    Ok(response)
}

async fn read_json<T: DeserializeOwned>(
    endpoint: &str,
    response: Response,
) -> Result<T, TransportError> {
    let response = ensure_success(endpoint, response)?;
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|source| TransportError::Decode {
        endpoint: endpoint.to_string(),
        source,
    })
}

#[async_trait]
impl TaskService for ServiceClient {
    async fn submit(&self, request: &DownloadRequest) -> Result<TaskId, TransportError> {
        let url = self.endpoint(&["download"]);
        let body = serde_json::to_vec(request).map_err(TransportError::Encode)?;
        debug!(url = %url, "submitting download request");

        let response = self
            .client
            .post(url.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;
        let parsed: SubmitResponse = read_json(url.path(), response).await?;
        Ok(parsed.task_id)
    }

    async fn query_status(&self, id: &TaskId) -> Result<TaskStatus, TransportError> {
        let url = self.endpoint(&["status", id.as_str()]);
        let response = self.client.get(url.clone()).send().await?;
        read_json(url.path(), response).await
    }

    fn artifact_location(&self, id: &TaskId) -> Url {
        self.endpoint(&["file", id.as_str()])
    }
}
