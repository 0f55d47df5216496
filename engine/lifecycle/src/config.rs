use scoring::TierThresholds;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{EngineError, EngineResult};

/// What a proof submission does when the verifier stays unreachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailablePolicy {
    /// Keep the attempt as deferred and wait for the counterparty.
    #[default]
    Defer,
    /// Count the proof as authentic with zero confidence.
    FailOpen,
    /// Open a dispute on the proof.
    Dispute,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakeModel {
    /// Only the initiator escrows.
    #[default]
    SingleStake,
    /// Every staking participant escrows the same amount.
    Matched,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationPolicy {
    pub timeout_ms: u64,
    pub retries: u32,
    pub backoff_ms: u64,
    pub on_unavailable: UnavailablePolicy,
    pub max_evidence_age_secs: i64,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: 12_000,
            retries: 1,
            backoff_ms: 500,
            on_unavailable: UnavailablePolicy::Defer,
            max_evidence_age_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub starting_points: u64,
    pub verification: VerificationPolicy,
    pub stake_model: StakeModel,
    pub auto_settle: bool,
    pub allowed_misses: u32,
    pub failure_quorum: f64,
    pub tiers: TierThresholds,
    pub sweep_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            starting_points: 1_250,
            verification: VerificationPolicy::default(),
            stake_model: StakeModel::SingleStake,
            auto_settle: true,
            allowed_misses: 2,
            failure_quorum: 0.5,
            tiers: TierThresholds::default(),
            sweep_interval_ms: 60_000,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.failure_quorum > 0.0 && self.failure_quorum <= 1.0) {
            return Err(EngineError::Validation(format!(
                "failure_quorum must be in (0, 1], got {}",
                self.failure_quorum
            )));
        }
        if self.verification.timeout_ms == 0 {
            return Err(EngineError::Validation("verification timeout must be > 0".into()));
        }
        if self.verification.max_evidence_age_secs <= 0 {
            return Err(EngineError::Validation("max_evidence_age_secs must be > 0".into()));
        }
        if self.sweep_interval_ms == 0 {
            return Err(EngineError::Validation("sweep_interval_ms must be > 0".into()));
        }
        self.tiers
            .validate()
            .map_err(|e| EngineError::Validation(e.to_string()))
    }
}

/// Reads an [`EngineConfig`] from JSON or YAML depending on the extension.
pub fn load_config_from_file(path: impl AsRef<Path>) -> anyhow::Result<EngineConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    let config: EngineConfig = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&contents)?,
        Some("json") => serde_json::from_str(&contents)?,
        other => anyhow::bail!("unsupported config format {:?} for {}", other, path.display()),
    };
    config.validate()?;
    Ok(config)
}
