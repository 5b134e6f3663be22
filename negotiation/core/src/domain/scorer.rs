// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Similarity Scorer Domain Interface
//
// External collaborator abstracting the numeric-embedding layer. Returns a
// relevance score in [0,1] for a (demand, profile) pair; the selector
// clamps out-of-range values defensively at the call site.

use crate::domain::agent::AgentProfile;
use crate::domain::demand::Demand;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("scorer unavailable: {0}")]
    Unavailable(String),

    #[error("scoring failed: {0}")]
    Failed(String),
}

/// Semantic relevance of a candidate to a demand.
#[async_trait]
pub trait SimilarityScorer: Send + Sync {
    async fn score(&self, demand: &Demand, profile: &AgentProfile) -> Result<f64, ScorerError>;
}
