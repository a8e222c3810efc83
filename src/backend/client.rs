use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::types::{
    ApprovalReceipt, ApproveRequest, Duplicate, Gated, GenerateRequest, GeneratedSuite,
    HealthStatus, IngestInput, Metrics, PreviewRequest, PreviewResponse, RequirementSource, Run,
    RunRequest, RunTicket, Session, StoryUpload,
};
use super::Backend;
use crate::config::{BackendConfig, RequestConfig};
use crate::error::{BackendError, BackendResult};

/// Client for the SpecWeaver REST API
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    request_config: RequestConfig,
}

impl HttpBackend {
    /// Create a new backend client
    pub fn new(config: &BackendConfig, request_config: RequestConfig) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(BackendError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request, mapping transport failures
    async fn send(&self, call: &str, builder: RequestBuilder) -> BackendResult<Response> {
        let start = Instant::now();
        let result = builder.send().await;
        let latency = start.elapsed();

        match result {
            Ok(response) => {
                debug!(
                    call,
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis(),
                    "Backend call returned"
                );
                Ok(response)
            }
            Err(e) => {
                error!(
                    call,
                    error = %e,
                    latency_ms = latency.as_millis(),
                    "Backend call failed"
                );
                if e.is_timeout() {
                    Err(BackendError::Timeout {
                        timeout_ms: self.request_config.timeout_ms,
                    })
                } else {
                    Err(BackendError::Http(e))
                }
            }
        }
    }

    /// Fail on non-2xx, otherwise decode the JSON body
    async fn decode<T: DeserializeOwned>(call: &str, response: Response) -> BackendResult<T> {
        let response = Self::ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                message: format!("Failed to parse {} response: {}", call, e),
            })
    }

    async fn ensure_success(response: Response) -> BackendResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let error_body = response.text().await.unwrap_or_default();
        Err(BackendError::Api {
            status: status.as_u16(),
            message: error_body,
        })
    }

    /// Decode a response that may be a duplicate conflict (HTTP 409)
    async fn decode_gated<T: DeserializeOwned>(
        call: &str,
        response: Response,
    ) -> BackendResult<Gated<T>> {
        if response.status() != StatusCode::CONFLICT {
            return Self::decode(call, response).await.map(Gated::Accepted);
        }

        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| BackendError::InvalidResponse {
                    message: format!("Failed to parse {} conflict: {}", call, e),
                })?;
        let duplicates = conflict_duplicates(&body).ok_or_else(|| BackendError::InvalidResponse {
            message: format!("{} conflict carries no duplicate list", call),
        })?;

        warn!(call, count = duplicates.len(), "Backend reported duplicate tests");
        Ok(Gated::DuplicateConflict { duplicates })
    }

    async fn ingest_text(&self, story: &str, input: &IngestInput) -> BackendResult<Response> {
        let body = StoryUpload {
            story_text: story.to_string(),
            domain: input.domain.clone(),
            tags: input.tags.clone(),
        };
        let builder = self.client.post(self.url("/api/requirements")).json(&body);
        self.send("ingest", builder).await
    }

    async fn ingest_file(
        &self,
        bytes: Vec<u8>,
        filename: String,
        input: &IngestInput,
    ) -> BackendResult<Response> {
        let mut form = Form::new().part("file", Part::bytes(bytes).file_name(filename));
        if let Some(domain) = &input.domain {
            form = form.text("domain", domain.clone());
        }
        if !input.tags.is_empty() {
            form = form.text("tags", input.tags.join(","));
        }
        let builder = self
            .client
            .post(self.url("/api/requirements/upload"))
            .multipart(form);
        self.send("ingest", builder).await
    }
}

/// Duplicate list from a 409 body: `{"detail": {"duplicates": [...]}}` or `{"duplicates": [...]}`
fn conflict_duplicates(body: &serde_json::Value) -> Option<Vec<Duplicate>> {
    let list = body
        .get("detail")
        .and_then(|d| d.get("duplicates"))
        .or_else(|| body.get("duplicates"))?;
    serde_json::from_value(list.clone()).ok()
}

#[async_trait]
impl Backend for HttpBackend {
    async fn ingest(&self, input: &IngestInput) -> BackendResult<Session> {
        let response = match &input.source {
            RequirementSource::Text(story) => self.ingest_text(story, input).await?,
            RequirementSource::File(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| BackendError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                let filename = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "requirement.txt".to_string());
                self.ingest_file(bytes, filename, input).await?
            }
        };
        let session: Session = Self::decode("ingest", response).await?;
        info!(session_id = %session.session_id, "Requirement ingested");
        Ok(session)
    }

    async fn generate(
        &self,
        session_id: &str,
        request: &GenerateRequest,
    ) -> BackendResult<Gated<GeneratedSuite>> {
        let url = self.url(&format!("/api/requirements/{}/generate", session_id));
        let response = self.send("generate", self.client.post(url).json(request)).await?;
        Self::decode_gated("generate", response).await
    }

    async fn preview(
        &self,
        session_id: &str,
        test_case_ids: &[String],
    ) -> BackendResult<PreviewResponse> {
        #[derive(serde::Deserialize)]
        struct PreviewBody {
            #[serde(default)]
            diffs: Vec<super::types::DiffPreview>,
        }

        let url = self.url(&format!("/api/requirements/{}/preview", session_id));
        let body = PreviewRequest {
            test_case_ids: test_case_ids.to_vec(),
        };
        let response = self.send("preview", self.client.post(url).json(&body)).await?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
                debug!(session_id, "Backend has no preview support");
                Ok(PreviewResponse::Unsupported)
            }
            _ => {
                let body: PreviewBody = Self::decode("preview", response).await?;
                Ok(PreviewResponse::Diffs(body.diffs))
            }
        }
    }

    async fn approve(
        &self,
        session_id: &str,
        request: &ApproveRequest,
    ) -> BackendResult<Gated<ApprovalReceipt>> {
        let url = self.url(&format!("/api/requirements/{}/approve", session_id));
        let response = self.send("approve", self.client.post(url).json(request)).await?;
        Self::decode_gated("approve", response).await
    }

    async fn create_run(&self, request: &RunRequest) -> BackendResult<RunTicket> {
        let builder = self.client.post(self.url("/api/runs")).json(request);
        let response = self.send("create_run", builder).await?;
        let ticket: RunTicket = Self::decode("create_run", response).await?;
        info!(run_id = %ticket.id, status = %ticket.status, "Run created");
        Ok(ticket)
    }

    async fn refresh_run(&self, run_id: &str) -> BackendResult<()> {
        let url = self.url(&format!("/api/runs/{}/refresh", run_id));
        let response = self.send("refresh_run", self.client.post(url)).await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn fetch_run(&self, run_id: &str) -> BackendResult<Run> {
        let url = self.url(&format!("/api/runs/{}", run_id));
        let response = self.send("fetch_run", self.client.get(url)).await?;
        Self::decode("fetch_run", response).await
    }

    async fn metrics(&self) -> BackendResult<Metrics> {
        let response = self
            .send("metrics", self.client.get(self.url("/api/metrics")))
            .await?;
        Self::decode("metrics", response).await
    }

    async fn health(&self) -> BackendResult<HealthStatus> {
        let response = self.send("health", self.client.get(self.url("/"))).await?;
        Self::decode("health", response).await
    }

    async fn download_artifact(&self, session_id: &str, filename: &str) -> BackendResult<Vec<u8>> {
        let url = self.url(&format!("/api/artifacts/{}/{}", session_id, filename));
        let response = self.send("download_artifact", self.client.get(url)).await?;
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await.map_err(BackendError::Http)?;
        Ok(bytes.to_vec())
    }
}
