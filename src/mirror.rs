//! Best-effort replica of the key pools in a GitHub repository.
//!
//! The local data directory is the source of truth. Pools are pushed after they
//! change and can be pulled back on demand (`/sync`, `keyshop sync-keys`) when a
//! host starts with an empty disk.

use std::time::Duration;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::MirrorConfig;
use crate::error::{AppError, Result};
use crate::keys::KeyPool;
use crate::models::Period;

const REMOTE_KEYS_DIR: &str = "data/keys";

#[derive(Debug, Deserialize)]
struct ContentResponse {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct PutContentRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncedFile {
    pub file: String,
    pub lines: usize,
}

#[derive(Clone)]
pub struct RemoteMirror {
    client: Client,
    token: String,
    owner: String,
    repo: String,
    branch: Option<String>,
    api_url: String,
}

fn remote_path(file_name: &str) -> String {
    format!("{}/{}", REMOTE_KEYS_DIR, file_name)
}

impl RemoteMirror {
    pub fn new(config: &MirrorConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("keyshop/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build mirror HTTP client: {}", e)))?;
        Ok(Self {
            client,
            token: config.token.clone(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            branch: config.branch.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url, self.owner, self.repo, path
        )
    }

    async fn fetch(&self, path: &str) -> Result<Option<ContentResponse>> {
        let mut request = self
            .client
            .get(self.contents_url(path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json");
        if let Some(branch) = &self.branch {
            request = request.query(&[("ref", branch)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Mirror read of {} failed: {}", path, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(path = %path, status = %status, body = %body, "Mirror read failed");
            return Err(AppError::Upstream(format!(
                "Mirror read of {} failed: HTTP {}",
                path, status
            )));
        }

        let content: ContentResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Mirror returned invalid JSON: {}", e)))?;
        Ok(Some(content))
    }

    /// File content, or `None` when the file does not exist remotely.
    pub async fn read_file(&self, path: &str) -> Result<Option<String>> {
        let Some(content) = self.fetch(path).await? else {
            return Ok(None);
        };
        let packed: String = content
            .content
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = STANDARD
            .decode(packed)
            .map_err(|e| AppError::Upstream(format!("Mirror content of {} is not base64: {}", path, e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|_| AppError::Upstream(format!("Mirror content of {} is not UTF-8", path)))?;
        Ok(Some(text))
    }

    /// Create or replace a file. The current `sha` is looked up first.
    pub async fn write_file(&self, path: &str, content: &str, message: &str) -> Result<()> {
        let existing = self.fetch(path).await?;
        let body = PutContentRequest {
            message,
            content: STANDARD.encode(content.as_bytes()),
            sha: existing.as_ref().map(|c| c.sha.as_str()),
            branch: self.branch.as_deref(),
        };

        let response = self
            .client
            .put(self.contents_url(path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Mirror write of {} failed: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(path = %path, status = %status, body = %body, "Mirror write failed");
            return Err(AppError::Upstream(format!(
                "Mirror write of {} failed: HTTP {}",
                path, status
            )));
        }
        tracing::debug!(path = %path, "Mirror file written");
        Ok(())
    }

    /// Push one pool and the solved log.
    pub async fn push_pool(&self, pool: &KeyPool, period: Period) -> Result<()> {
        for file in [period.pool_file_name(), crate::keys::SOLVED_FILE.to_string()] {
            let content = pool.snapshot(&file)?;
            self.write_file(&remote_path(&file), &content, &format!("Update {}", file))
                .await?;
        }
        Ok(())
    }

    /// Overwrite local pool files and the solved log with the remote copies.
    /// Files missing remotely are left alone.
    pub async fn pull_all(&self, pool: &KeyPool) -> Result<Vec<SyncedFile>> {
        let mut synced = Vec::new();
        for file in KeyPool::file_names() {
            if let Some(content) = self.read_file(&remote_path(&file)).await? {
                pool.restore_file(&file, &content)?;
                let lines = content.lines().filter(|l| !l.trim().is_empty()).count();
                tracing::info!(file = %file, lines, "Pulled key file from mirror");
                synced.push(SyncedFile { file, lines });
            }
        }
        Ok(synced)
    }
}
