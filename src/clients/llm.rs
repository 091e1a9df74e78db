// src/clients/llm.rs

//! Client for the external test generator and answer-key service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const USER_AGENT: &str = "LLM/1.0";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("invalid service url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: StatusCode },
    #[error("{url} returned an undecodable body: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl LlmError {
    /// Whether trying the same call again may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LlmError::InvalidUrl(_) | LlmError::Client(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub test_id: Uuid,
    pub themes: Vec<String>,
}

#[derive(Serialize)]
struct SetAnswersRequest<'a> {
    test_id: Uuid,
    answers: &'a [String],
}

#[derive(Deserialize)]
struct AnswersResponse {
    answers: Vec<String>,
}

#[async_trait]
pub trait LlmService: Send + Sync {
    /// Long-running generation used by workers. `base_url` comes from the job.
    async fn generate_test(&self, base_url: &Url, request: &GenerateRequest)
    -> Result<Value, LlmError>;

    /// Diagnostic test generation on the request path.
    async fn generate_first_test(&self, request: &GenerateRequest) -> Result<Value, LlmError>;

    /// Ground truth for a generated test, flattened in question order.
    async fn correct_answers(&self, test_id: Uuid) -> Result<Vec<String>, LlmError>;

    /// Registers the answer key of a test that did not come from the generator.
    async fn set_answers(&self, test_id: Uuid, answers: &[String]) -> Result<(), LlmError>;
}

pub struct HttpLlmService {
    client: Client,
    base_url: Url,
    generator_timeout: Duration,
    sync_timeout: Duration,
}

impl HttpLlmService {
    pub fn new(
        base_url: Url,
        generator_timeout: Duration,
        sync_timeout: Duration,
    ) -> Result<Self, LlmError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(LlmError::Client)?;
        Ok(Self {
            client,
            base_url,
            generator_timeout,
            sync_timeout,
        })
    }

    async fn send_json(
        &self,
        builder: reqwest::RequestBuilder,
        url: &Url,
    ) -> Result<reqwest::Response, LlmError> {
        let response = builder.send().await.map_err(|source| LlmError::Transport {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(response)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        url: &Url,
    ) -> Result<T, LlmError> {
        response.json::<T>().await.map_err(|source| LlmError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl LlmService for HttpLlmService {
    async fn generate_test(
        &self,
        base_url: &Url,
        request: &GenerateRequest,
    ) -> Result<Value, LlmError> {
        let url = base_url.join("api/test-workflow")?;
        let builder = self
            .client
            .post(url.clone())
            .timeout(self.generator_timeout)
            .json(request);
        let response = self.send_json(builder, &url).await?;
        Self::read_json(response, &url).await
    }

    async fn generate_first_test(&self, request: &GenerateRequest) -> Result<Value, LlmError> {
        let url = self.base_url.join("test-exmpl/")?;
        // The diagnostic endpoint takes its parameters as a GET body.
        let builder = self
            .client
            .get(url.clone())
            .timeout(self.sync_timeout)
            .json(request);
        let response = self.send_json(builder, &url).await?;
        Self::read_json(response, &url).await
    }

    async fn correct_answers(&self, test_id: Uuid) -> Result<Vec<String>, LlmError> {
        let url = self
            .base_url
            .join(&format!("test-exmpl-answers/{test_id}"))?;
        let builder = self.client.get(url.clone()).timeout(self.sync_timeout);
        let response = self.send_json(builder, &url).await?;
        let body: AnswersResponse = Self::read_json(response, &url).await?;
        Ok(body.answers)
    }

    async fn set_answers(&self, test_id: Uuid, answers: &[String]) -> Result<(), LlmError> {
        let url = self.base_url.join("test/set-answers")?;
        let builder = self
            .client
            .post(url.clone())
            .timeout(self.sync_timeout)
            .json(&SetAnswersRequest { test_id, answers });
        self.send_json(builder, &url).await?;
        Ok(())
    }
}

/// Parses a service base URL so that relative joins keep its path.
pub fn normalize_base_url(raw: &str) -> Result<Url, url::ParseError> {
    let raw = raw.trim();
    if raw.ends_with('/') {
        Url::parse(raw)
    } else {
        Url::parse(&format!("{raw}/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_keeps_path_prefix() {
        let base = normalize_base_url("http://llm:8000/v2").unwrap();
        assert_eq!(base.as_str(), "http://llm:8000/v2/");
        assert_eq!(
            base.join("api/test-workflow").unwrap().as_str(),
            "http://llm:8000/v2/api/test-workflow"
        );

        let same = normalize_base_url(" http://llm:8000/v2/ ").unwrap();
        assert_eq!(same, base);
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn test_invalid_url_is_not_retryable() {
        let err = LlmError::from(Url::parse("::").unwrap_err());
        assert!(!err.is_retryable());
        let err = LlmError::Status {
            url: "http://llm/".into(),
            status: StatusCode::BAD_GATEWAY,
        };
        assert!(err.is_retryable());
    }
}
