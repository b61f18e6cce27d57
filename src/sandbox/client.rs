//! HTTP client for the sandbox service

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::types::{Cmd, RunRequest, RunResult};
use super::Sandbox;
use crate::error::SandboxError;

#[derive(Clone)]
pub struct HttpSandbox {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSandbox {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, SandboxError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SandboxError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SandboxError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Sandbox for HttpSandbox {
    async fn run(&self, cmds: &[Cmd]) -> Result<Vec<RunResult>, SandboxError> {
        let url = format!("{}/run", self.endpoint);
        debug!("Sending {} command(s) to sandbox", cmds.len());

        let response = self
            .client
            .post(&url)
            .json(&RunRequest { cmd: cmds })
            .send()
            .await?;
        let body = Self::check(response).await?.bytes().await?;
        let results: Vec<RunResult> = serde_json::from_slice(&body)?;

        if results.len() != cmds.len() {
            return Err(SandboxError::ResultCount {
                expected: cmds.len(),
                got: results.len(),
            });
        }
        Ok(results)
    }

    async fn delete_file(&self, file_id: &str) -> Result<(), SandboxError> {
        let url = format!("{}/file/{}", self.endpoint, file_id);
        let response = self.client.delete(&url).send().await?;
        Self::check(response).await?;
        Ok(())
    }
}
