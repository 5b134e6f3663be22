// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Reasoner Domain Interface (Anti-Corruption Layer)
//
// The generative collaborator producing offers, proposals, and feedback
// evaluations from structured input. The core never inspects free text,
// only the typed fields a deterministic fallback can also populate; every
// call goes through the circuit breaker (infrastructure/breaker.rs).

use crate::domain::agent::{AgentId, AgentPool, AgentProfile};
use crate::domain::demand::Demand;
use crate::domain::message::{Feedback, Response};
use crate::domain::proposal::{Gap, Proposal};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Similarity consultation result for one pool member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub agent_id: AgentId,
    /// Relevance in [0,1]
    pub score: f64,
}

/// The three weighted signals behind a gap-recursion decision
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GapAssessment {
    /// Expected satisfaction uplift in [0,1]
    pub satisfaction_uplift: f64,
    /// Stakeholder support in [0,1]
    pub stakeholder_support: f64,
    /// Cost/benefit ratio mapped into [0,1] (higher is better)
    pub cost_benefit: f64,
}

/// Errors surfaced by a Reasoner implementation
#[derive(Debug, thiserror::Error)]
pub enum ReasonerError {
    #[error("reasoner call timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("malformed reasoner output: {0}")]
    InvalidOutput(String),
}

/// Domain interface for the generative collaborator.
///
/// Implementations live outside this crate (vendor adapters, test
/// scripts). Each operation has a well-defined deterministic fallback
/// matching its success schema, served by the breaker while open.
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Score pool members for a demand (scoring only; gating and
    /// fallback selection are core logic).
    async fn filter(
        &self,
        demand: &Demand,
        pool: &AgentPool,
    ) -> Result<Vec<CandidateScore>, ReasonerError>;

    /// Produce one agent's answer to an invitation.
    async fn generate_offer(
        &self,
        demand: &Demand,
        profile: &AgentProfile,
    ) -> Result<Response, ReasonerError>;

    /// Aggregate a round of responses into a proposal version.
    async fn aggregate(
        &self,
        demand: &Demand,
        responses: &[Response],
    ) -> Result<Proposal, ReasonerError>;

    /// Produce one agent's reaction to a distributed proposal.
    async fn evaluate_proposal(
        &self,
        proposal: &Proposal,
        profile: &AgentProfile,
    ) -> Result<Feedback, ReasonerError>;

    /// Identify unmet capability gaps in a finalized proposal.
    async fn identify_gaps(
        &self,
        demand: &Demand,
        proposal: &Proposal,
        feedbacks: &[Feedback],
    ) -> Result<Vec<Gap>, ReasonerError>;

    /// Supply the weighted signals for a gap-recursion decision.
    async fn assess_gap(
        &self,
        demand: &Demand,
        gap: &Gap,
    ) -> Result<GapAssessment, ReasonerError>;
}
