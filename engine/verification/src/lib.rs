//! Boundary to the external image-verification and suggestion capabilities.
//!
//! The gateway validates the request, forwards it to a backend and normalizes
//! whatever comes back into a [`Verdict`]. It never retries and never applies a
//! timeout: both are owned by the caller.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use model::{EvidenceHandle, Verdict};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

mod http;
mod stub;

pub use http::{HttpSuggestions, HttpVerifier};
pub use stub::{StubSuggestions, StubVerifier, SUGGESTION_CATALOGUE};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationRequest {
    pub evidence_handle: String,
    pub activity_description: String,
}

/// Wire shape of the verification capability. `confidence` is kept as raw
/// JSON because upstream sends both numbers and `"0.85"`-style strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_suspicious: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuggestionResponse {
    pub success: bool,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("verification backend unavailable: {0}")]
    Unavailable(String),
    #[error("verification timed out after {0} ms")]
    Timeout(u64),
    #[error("verification rejected: {0}")]
    Rejected(String),
    #[error("malformed verification response: {0}")]
    Malformed(String),
    #[error("invalid verification request: {0}")]
    InvalidRequest(String),
}

impl VerificationError {
    /// Everything except a bad request is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, VerificationError::InvalidRequest(_))
    }
}

pub type VerifyResult<T> = Result<T, VerificationError>;

#[async_trait]
pub trait VerificationBackend: Send + Sync {
    fn backend_id(&self) -> &'static str;
    async fn verify(&self, request: &VerificationRequest) -> VerifyResult<VerificationResponse>;
}

#[async_trait]
pub trait SuggestionBackend: Send + Sync {
    fn backend_id(&self) -> &'static str;
    async fn suggest(&self, preferences: &str) -> VerifyResult<SuggestionResponse>;
}

pub fn normalize(response: VerificationResponse) -> VerifyResult<Verdict> {
    if !response.success {
        let error = response
            .error
            .unwrap_or_else(|| "verification failed without an error message".into());
        return Err(VerificationError::Rejected(error));
    }
    let suspicious = response
        .is_suspicious
        .ok_or_else(|| VerificationError::Malformed("missing isSuspicious".into()))?;
    let raw = response
        .confidence
        .ok_or_else(|| VerificationError::Malformed("missing confidence".into()))?;
    let confidence = parse_confidence(&raw)
        .ok_or_else(|| VerificationError::Malformed(format!("unusable confidence {raw}")))?;
    let reason = response.reason.unwrap_or_default();

    Ok(Verdict {
        suspicious,
        confidence: confidence.clamp(0.0, 1.0),
        reason,
    })
}

fn parse_confidence(raw: &serde_json::Value) -> Option<f64> {
    let value = match raw {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

pub fn suggestions(response: SuggestionResponse) -> VerifyResult<Vec<String>> {
    if !response.success {
        return Err(VerificationError::Rejected(
            response.error.unwrap_or_else(|| "no suggestions".into()),
        ));
    }
    Ok(response.suggestions)
}

#[derive(Clone)]
pub struct VerificationGateway {
    backend: Arc<dyn VerificationBackend>,
    max_evidence_age: Duration,
}

impl VerificationGateway {
    pub fn new(backend: Arc<dyn VerificationBackend>, max_evidence_age: Duration) -> Self {
        Self {
            backend,
            max_evidence_age,
        }
    }

    pub fn backend_id(&self) -> &'static str {
        self.backend.backend_id()
    }

    /// Checks the request against `now` without calling the backend.
    pub fn validate(
        &self,
        evidence: &EvidenceHandle,
        activity: &str,
        now: DateTime<Utc>,
    ) -> VerifyResult<()> {
        if evidence.uri.trim().is_empty() {
            return Err(VerificationError::InvalidRequest(
                "evidence handle is empty".into(),
            ));
        }
        if activity.trim().is_empty() {
            return Err(VerificationError::InvalidRequest(
                "activity description is empty".into(),
            ));
        }
        if evidence.captured_at > now {
            return Err(VerificationError::InvalidRequest(
                "evidence captured in the future".into(),
            ));
        }
        if now - evidence.captured_at > self.max_evidence_age {
            return Err(VerificationError::InvalidRequest(format!(
                "evidence expired (captured {})",
                evidence.captured_at
            )));
        }
        Ok(())
    }

    pub async fn verify(
        &self,
        evidence: &EvidenceHandle,
        activity: &str,
        now: DateTime<Utc>,
    ) -> VerifyResult<Verdict> {
        self.validate(evidence, activity, now)?;
        let request = VerificationRequest {
            evidence_handle: evidence.uri.clone(),
            activity_description: activity.to_string(),
        };
        tracing::debug!(
            "verifying {} via {}",
            request.evidence_handle,
            self.backend.backend_id()
        );
        let response = self.backend.verify(&request).await?;
        normalize(response)
    }
}
