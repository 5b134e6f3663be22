// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Proposal - the moderator's aggregation of one round of responses
//
// Proposal versions accumulate on the session, append-only; version n is
// the aggregation produced at the end of round n.

use crate::domain::agent::AgentId;
use crate::domain::session::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a Proposal version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProposalId(pub Uuid);

impl ProposalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProposalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProposalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One agent's slot in a proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub agent_id: AgentId,
    pub role: String,
    pub responsibility: String,
    pub is_confirmed: bool,
}

/// An unmet capability in a proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gap {
    pub description: String,
    pub capability_tag: String,
    /// Importance on a 0-100 scale
    pub importance: u8,
    /// Filled in after finalization when gap recursion ran for this gap
    #[serde(default)]
    pub resolution: Option<GapResolution>,
}

impl Gap {
    pub fn new(description: impl Into<String>, capability_tag: impl Into<String>, importance: u8) -> Self {
        Self {
            description: description.into(),
            capability_tag: capability_tag.into(),
            importance: importance.min(100),
            resolution: None,
        }
    }
}

/// Outcome annotation merged into a parent proposal's gap once a child
/// negotiation terminates (or fails to)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GapResolution {
    Resolved { child_session_id: SessionId },
    Unresolved { reason: String },
}

/// Aggregated result of one negotiation round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    /// Equals the round number that produced this version
    pub version: u32,
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub gaps: Vec<Gap>,
    /// Moderator confidence in [0,1]
    pub confidence: f64,
    /// Set when the round cap forced finalization with partial consensus
    pub is_forced: bool,
    #[serde(default)]
    pub confirmed_participants: Vec<AgentId>,
    #[serde(default)]
    pub optional_participants: Vec<AgentId>,
    pub created_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new(version: u32, assignments: Vec<Assignment>, confidence: f64) -> Self {
        Self {
            id: ProposalId::new(),
            version,
            assignments,
            gaps: Vec::new(),
            confidence: confidence.clamp(0.0, 1.0),
            is_forced: false,
            confirmed_participants: Vec::new(),
            optional_participants: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_gaps(mut self, gaps: Vec<Gap>) -> Self {
        self.gaps = gaps;
        self
    }

    /// Agents assigned in this proposal, in assignment order.
    pub fn assigned_agents(&self) -> Vec<AgentId> {
        self.assignments.iter().map(|a| a.agent_id).collect()
    }

    /// Mark the forced-finalization participant split on this version.
    pub fn force_partition(&mut self, confirmed: Vec<AgentId>, optional: Vec<AgentId>) {
        self.is_forced = true;
        self.confirmed_participants = confirmed;
        self.optional_participants = optional;
    }

    /// Annotate the gap at `index` with a child-negotiation outcome.
    pub fn resolve_gap(&mut self, index: usize, resolution: GapResolution) {
        if let Some(gap) = self.gaps.get_mut(index) {
            gap.resolution = Some(resolution);
        }
    }
}
