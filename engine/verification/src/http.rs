use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{
    SuggestionBackend, SuggestionResponse, VerificationBackend, VerificationError,
    VerificationRequest, VerificationResponse, VerifyResult,
};

async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
    client: &Client,
    endpoint: &str,
    body: &B,
) -> VerifyResult<R> {
    let res = client
        .post(endpoint)
        .json(body)
        .send()
        .await
        .map_err(|e| VerificationError::Unavailable(e.to_string()))?;
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        tracing::warn!("verification endpoint {} answered {}: {}", endpoint, status, body);
        return Err(VerificationError::Unavailable(format!("{status}: {body}")));
    }
    res.json::<R>()
        .await
        .map_err(|e| VerificationError::Malformed(e.to_string()))
}

/// Forwards requests to a model-backed verification service over HTTP.
#[derive(Clone)]
pub struct HttpVerifier {
    client: Client,
    endpoint: String,
}

impl HttpVerifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl VerificationBackend for HttpVerifier {
    fn backend_id(&self) -> &'static str {
        "http"
    }

    async fn verify(&self, request: &VerificationRequest) -> VerifyResult<VerificationResponse> {
        post_json(&self.client, &self.endpoint, request).await
    }
}

#[derive(Clone)]
pub struct HttpSuggestions {
    client: Client,
    endpoint: String,
}

impl HttpSuggestions {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SuggestionBackend for HttpSuggestions {
    fn backend_id(&self) -> &'static str {
        "http"
    }

    async fn suggest(&self, preferences: &str) -> VerifyResult<SuggestionResponse> {
        let body = serde_json::json!({ "preferences": preferences });
        post_json(&self.client, &self.endpoint, &body).await
    }
}
