//! Consent workflow
//!
//! At most one consent request is outstanding at a time. The wait is an
//! async timeout, never a poll, and fails closed: no answer means no consent.

use crate::error::ConsentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use ua_policy::{ChangeCategory, DiffSummary};

/// What the user-facing layer is asked to render
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequest {
    /// Candidate version
    pub version: String,
    /// Categories needing consent
    pub categories: BTreeSet<ChangeCategory>,
    /// Category-scoped descriptors
    pub summary: DiffSummary,
}

/// Explicit user answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentResponse {
    /// Apply the candidate
    Accept,
    /// Keep the current release
    Decline,
}

/// How a consent record was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentResolution {
    /// User accepted
    Accepted,
    /// User declined
    Declined,
    /// No answer inside the window
    TimedOut,
    /// Prompt failed to render or collect an answer
    PromptFailed,
}

/// Outcome of a consent request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    /// Candidate version
    pub version: String,
    /// Categories the user was asked about
    pub categories_requiring_consent: BTreeSet<ChangeCategory>,
    /// Whether consent was granted
    pub granted: bool,
    /// Resolution time (unix seconds)
    pub timestamp: i64,
    /// How the request resolved
    pub resolution: ConsentResolution,
}

impl ConsentRecord {
    /// Whether this record grants every category in `required`
    #[must_use]
    pub fn covers(&self, required: &BTreeSet<ChangeCategory>) -> bool {
        self.granted && required.is_subset(&self.categories_requiring_consent)
    }

    /// Required categories this record does not grant
    #[must_use]
    pub fn missing(&self, required: &BTreeSet<ChangeCategory>) -> BTreeSet<ChangeCategory> {
        if self.granted {
            required.difference(&self.categories_requiring_consent).copied().collect()
        } else {
            required.clone()
        }
    }
}

/// User-facing consent interaction
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    /// Render `request` and wait for an explicit answer
    ///
    /// # Errors
    /// [`ConsentError::Prompt`] if the UI could not collect an answer
    async fn ask(&self, request: &ConsentRequest) -> Result<ConsentResponse, ConsentError>;
}

/// Prompt that answers every request the same way, e.g. unattended hosts
#[derive(Debug, Clone, Copy)]
pub struct StaticPrompt(pub ConsentResponse);

impl StaticPrompt {
    /// Decline everything
    #[must_use]
    pub fn decline() -> Self {
        Self(ConsentResponse::Decline)
    }

    /// Accept everything
    #[must_use]
    pub fn accept() -> Self {
        Self(ConsentResponse::Accept)
    }
}

#[async_trait]
impl ConsentPrompt for StaticPrompt {
    async fn ask(&self, _request: &ConsentRequest) -> Result<ConsentResponse, ConsentError> {
        Ok(self.0)
    }
}

/// Drives single-outstanding consent requests
pub struct ConsentCoordinator {
    prompt: Arc<dyn ConsentPrompt>,
    timeout: Duration,
    pending: Semaphore,
}

impl ConsentCoordinator {
    /// Coordinator with a response window
    #[must_use]
    pub fn new(prompt: Arc<dyn ConsentPrompt>, timeout: Duration) -> Self {
        Self {
            prompt,
            timeout,
            pending: Semaphore::new(1),
        }
    }

    /// Whether a request is currently awaiting an answer
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.available_permits() == 0
    }

    /// Ask for consent to `categories`
    ///
    /// Timeouts and prompt failures resolve to `granted = false`.
    ///
    /// # Errors
    /// [`ConsentError::AlreadyPending`] if another request is outstanding
    pub async fn request_consent(
        &self,
        version: &str,
        categories: BTreeSet<ChangeCategory>,
        summary: DiffSummary,
    ) -> Result<ConsentRecord, ConsentError> {
        let _permit = self
            .pending
            .try_acquire()
            .map_err(|_| ConsentError::AlreadyPending)?;

        let request = ConsentRequest {
            version: version.to_string(),
            categories,
            summary,
        };
        let resolution = match tokio::time::timeout(self.timeout, self.prompt.ask(&request)).await {
            Ok(Ok(ConsentResponse::Accept)) => ConsentResolution::Accepted,
            Ok(Ok(ConsentResponse::Decline)) => ConsentResolution::Declined,
            Ok(Err(e)) => {
                warn!(version, error = %e, "consent prompt failed; treating as declined");
                ConsentResolution::PromptFailed
            }
            Err(_) => {
                warn!(version, timeout_secs = self.timeout.as_secs(), "consent timed out");
                ConsentResolution::TimedOut
            }
        };
        let granted = resolution == ConsentResolution::Accepted;
        info!(version, granted, ?resolution, "consent resolved");

        Ok(ConsentRecord {
            version: request.version,
            categories_requiring_consent: request.categories,
            granted,
            timestamp: chrono::Utc::now().timestamp(),
            resolution,
        })
    }
}

impl std::fmt::Debug for ConsentCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentCoordinator")
            .field("timeout", &self.timeout)
            .field("pending", &self.is_pending())
            .finish_non_exhaustive()
    }
}
