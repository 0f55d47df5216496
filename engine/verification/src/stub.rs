use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use std::time::Duration;

use crate::{
    SuggestionBackend, SuggestionResponse, VerificationBackend, VerificationError,
    VerificationRequest, VerificationResponse, VerifyResult,
};

pub const SUGGESTION_CATALOGUE: [&str; 6] = [
    "Complete a 30-day Plank Challenge (increase time daily)",
    "Read 4 non-fiction books this month, summarize each",
    "Learn 10 new words in a foreign language daily for a month",
    "Meditate 15 minutes every morning for 30 days",
    "Run a total of 50 miles in one month",
    "Cook 5 new healthy recipes each week for a month",
];

/// Simulated verifier: fixed latency, randomized verdict. Activities that name
/// both a gym and a person are flagged less often and with higher confidence.
fn names_person_at_gym(activity: &str) -> bool {
    activity.contains("gym") && activity.contains("person")
}

pub struct StubVerifier {
    latency: Duration,
    rng: Mutex<StdRng>,
}

impl StubVerifier {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(latency: Duration, seed: u64) -> Self {
        Self {
            latency,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn roll(&self, activity: &str) -> VerifyResult<VerificationResponse> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| VerificationError::Unavailable("stub rng poisoned".into()))?;
        let venue_bound = names_person_at_gym(activity);
        let (suspicious_odds, low, span) = if venue_bound {
            (0.2, 0.7, 0.3)
        } else {
            (0.4, 0.5, 0.4)
        };
        let suspicious = rng.gen_bool(suspicious_odds);
        let confidence: f64 = low + rng.gen::<f64>() * span;
        let reason = match (suspicious, venue_bound) {
            (false, _) => "Image looks authentic.",
            (true, true) => "Image appears to be from a different location or time.",
            (true, false) => {
                "Image content does not clearly match activity or shows signs of manipulation."
            }
        };
        Ok(VerificationResponse {
            success: true,
            is_suspicious: Some(suspicious),
            confidence: Some(serde_json::Value::String(format!("{confidence:.2}"))),
            reason: Some(reason.into()),
            error: None,
        })
    }
}

#[async_trait]
impl VerificationBackend for StubVerifier {
    fn backend_id(&self) -> &'static str {
        "stub"
    }

    async fn verify(&self, request: &VerificationRequest) -> VerifyResult<VerificationResponse> {
        tokio::time::sleep(self.latency).await;
        self.roll(&request.activity_description)
    }
}

pub struct StubSuggestions {
    rng: Mutex<StdRng>,
}

impl StubSuggestions {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for StubSuggestions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SuggestionBackend for StubSuggestions {
    fn backend_id(&self) -> &'static str {
        "stub"
    }

    async fn suggest(&self, preferences: &str) -> VerifyResult<SuggestionResponse> {
        tracing::debug!("stub suggestions for preferences {:?}", preferences);
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| VerificationError::Unavailable("stub rng poisoned".into()))?;
        let picks = SUGGESTION_CATALOGUE
            .choose_multiple(&mut *rng, 3)
            .map(|s| s.to_string())
            .collect();
        Ok(SuggestionResponse {
            success: true,
            suggestions: picks,
            error: None,
        })
    }
}
