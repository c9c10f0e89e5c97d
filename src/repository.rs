//! Shared correction repository client
//!
//! Before uploading, the repository is asked whether an artifact with the
//! same query key already exists. Any network failure degrades the outcome to
//! [`RepositoryOutcome::LocalOnly`]; the local artifact is never affected.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::{info, warn};

use crate::config::RepositoryConfig;
use crate::error::{CorrectionError, Result};

/// Remote store of correction artifacts keyed by content hash
pub trait CorrectionRepository: Send + Sync {
    /// Whether an artifact with `query_key` is already stored
    fn exists(&self, query_key: &str) -> Result<bool>;

    /// Upload artifact text under `query_key`
    fn upload(&self, artifact: &[u8], query_key: &str) -> Result<()>;
}

/// Result of the dedup step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepositoryOutcome {
    AlreadyExists,
    Uploaded,
    /// Repository step skipped; the artifact exists locally only
    LocalOnly(String),
}

/// HTTP repository: `GET <base>?hash=<key>` and `POST <base>?hash=<key>`
pub struct HttpRepository {
    client: Client,
    base_url: String,
}

impl HttpRepository {
    /// Build a client with the configured timeout and user agent
    pub fn new(config: &RepositoryConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(network)?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }
}

fn network(err: reqwest::Error) -> CorrectionError {
    CorrectionError::NetworkUnavailable {
        reason: err.to_string(),
    }
}

impl CorrectionRepository for HttpRepository {
    fn exists(&self, query_key: &str) -> Result<bool> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("hash", query_key)])
            .send()
            .map_err(network)?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => {
                let body = response.text().map_err(network)?;
                Ok(!body.trim().is_empty())
            }
            status => Err(CorrectionError::NetworkUnavailable {
                reason: format!("repository query returned {}", status),
            }),
        }
    }

    fn upload(&self, artifact: &[u8], query_key: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.base_url)
            .query(&[("hash", query_key)])
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(artifact.to_vec())
            .send()
            .map_err(network)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(CorrectionError::NetworkUnavailable {
                reason: format!("repository upload returned {}", response.status()),
            })
        }
    }
}

/// Check-then-upload against a [`CorrectionRepository`]
pub struct RepositoryDedupClient<'a> {
    repository: &'a dyn CorrectionRepository,
}

impl<'a> RepositoryDedupClient<'a> {
    pub fn new(repository: &'a dyn CorrectionRepository) -> Self {
        Self { repository }
    }

    /// Upload `artifact` unless the repository already holds `query_key`
    ///
    /// Never fails: every error degrades to `LocalOnly` with the reason.
    pub fn check_and_maybe_upload(&self, artifact: &[u8], query_key: &str) -> RepositoryOutcome {
        match self.repository.exists(query_key) {
            Ok(true) => {
                info!(query_key, "Correction already in repository");
                return RepositoryOutcome::AlreadyExists;
            }
            Ok(false) => {}
            Err(err) => return degrade("query", err),
        }
        match self.repository.upload(artifact, query_key) {
            Ok(()) => {
                info!(query_key, bytes = artifact.len(), "Uploaded correction to repository");
                RepositoryOutcome::Uploaded
            }
            Err(err) => degrade("upload", err),
        }
    }
}

fn degrade(step: &str, err: CorrectionError) -> RepositoryOutcome {
    warn!(step, error = %err, "Repository unavailable, keeping correction local");
    let reason = match err {
        CorrectionError::NetworkUnavailable { reason } => reason,
        other => other.to_string(),
    };
    RepositoryOutcome::LocalOnly(reason)
}
