// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Negotiation Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) for the
// tunable parameters of the negotiation core. The consensus boundaries
// (accept-rate 0.8/0.5) and the recursion depth cap are binding contracts
// and deliberately NOT configurable; see application/evaluator.rs and
// domain/session.rs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_API_VERSION: &str = "100monkeys.ai/v1";
pub const CONFIG_KIND: &str = "NegotiationConfig";

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationConfigManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: NegotiationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

impl NegotiationConfigManifest {
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        let manifest: Self = serde_yaml::from_str(input)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_version != CONFIG_API_VERSION {
            return Err(ConfigError::InvalidApiVersion(self.api_version.clone()));
        }
        if self.kind != CONFIG_KIND {
            return Err(ConfigError::InvalidKind(self.kind.clone()));
        }
        self.spec.validate()
    }
}

/// Tunable parameters of the negotiation core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NegotiationConfig {
    #[serde(default)]
    pub selector: SelectorConfig,

    #[serde(default)]
    pub rounds: RoundConfig,

    #[serde(default)]
    pub breaker: BreakerConfig,

    #[serde(default)]
    pub checker: CheckerConfig,

    #[serde(default)]
    pub gaps: GapConfig,
}

impl NegotiationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.selector.max_candidates == 0 {
            return Err(ConfigError::Validation(
                "selector.max_candidates must be at least 1".to_string(),
            ));
        }
        if self.selector.fallback_candidates == 0 {
            return Err(ConfigError::Validation(
                "selector.fallback_candidates must be at least 1".to_string(),
            ));
        }
        if self.rounds.max_rounds == 0 {
            return Err(ConfigError::Validation(
                "rounds.max_rounds must be at least 1".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.gaps.approval_threshold) {
            return Err(ConfigError::Validation(
                "gaps.approval_threshold must be within [0,1]".to_string(),
            ));
        }
        if self.gaps.importance_threshold > 100 {
            return Err(ConfigError::Validation(
                "gaps.importance_threshold must be within [0,100]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Candidate-selection funnel parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Top-K window after ranking
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Members drawn uniformly at random when the funnel comes up empty
    #[serde(default = "default_fallback_candidates")]
    pub fallback_candidates: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            fallback_candidates: default_fallback_candidates(),
        }
    }
}

/// Round-cycle timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Barrier timeout for offer collection
    #[serde(default = "default_collection_timeout", with = "humantime_serde")]
    pub collection_timeout: Duration,

    /// Barrier timeout for feedback collection
    #[serde(default = "default_feedback_timeout", with = "humantime_serde")]
    pub feedback_timeout: Duration,

    /// Per-agent bound, independent of the barrier timeouts
    #[serde(default = "default_agent_timeout", with = "humantime_serde")]
    pub agent_timeout: Duration,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            collection_timeout: default_collection_timeout(),
            feedback_timeout: default_feedback_timeout(),
            agent_timeout: default_agent_timeout(),
        }
    }
}

/// Circuit-breaker parameters for the shared Reasoner dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long the breaker stays open before allowing a probe
    #[serde(default = "default_recovery_timeout", with = "humantime_serde")]
    pub recovery_timeout: Duration,

    /// Per-call timeout; an elapsed call counts as a failure
    #[serde(default = "default_call_timeout", with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout: default_recovery_timeout(),
            call_timeout: default_call_timeout(),
        }
    }
}

/// State-checker loop parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_check_interval", with = "humantime_serde")]
    pub check_interval: Duration,

    /// No-progress window before a session counts as stuck
    #[serde(default = "default_max_stuck_time", with = "humantime_serde")]
    pub max_stuck_time: Duration,

    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            check_interval: default_check_interval(),
            max_stuck_time: default_max_stuck_time(),
            max_recovery_attempts: default_max_recovery_attempts(),
        }
    }
}

/// Gap-recursion parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Gaps below this importance (0-100) are left alone
    #[serde(default = "default_importance_threshold")]
    pub importance_threshold: u8,

    /// Weighted recursion score needed to spawn a child
    #[serde(default = "default_approval_threshold")]
    pub approval_threshold: f64,

    /// How long a parent waits for a child before marking the gap
    /// unresolved
    #[serde(default = "default_child_wait_timeout", with = "humantime_serde")]
    pub child_wait_timeout: Duration,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            importance_threshold: default_importance_threshold(),
            approval_threshold: default_approval_threshold(),
            child_wait_timeout: default_child_wait_timeout(),
        }
    }
}

fn default_max_candidates() -> usize {
    10
}

fn default_fallback_candidates() -> usize {
    3
}

fn default_max_rounds() -> u32 {
    5
}

fn default_collection_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_feedback_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_agent_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_stuck_time() -> Duration {
    Duration::from_secs(120)
}

fn default_max_recovery_attempts() -> u32 {
    3
}

fn default_importance_threshold() -> u8 {
    60
}

fn default_approval_threshold() -> f64 {
    0.6
}

fn default_child_wait_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid API version: expected '100monkeys.ai/v1', got '{0}'")]
    InvalidApiVersion(String),

    #[error("invalid kind: expected 'NegotiationConfig', got '{0}'")]
    InvalidKind(String),

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
