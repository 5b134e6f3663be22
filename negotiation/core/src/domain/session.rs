// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Negotiation Session Aggregate
//!
//! The aggregate root of one negotiation. A session is created in
//! `Created`, driven through the state machine by its round coordinator,
//! and becomes immutable once terminal. The state machine is enforced by a
//! static transition table: an illegal transition request is rejected with
//! a typed error (logged by the caller, no state change) rather than
//! silently applied.
//!
//! Single-writer invariant: session fields are mutated only inside the
//! owning coordinator task. Everyone else (API handlers, the state
//! checker, child-session completion) communicates through that task's
//! command channel and reads [`SessionSnapshot`] projections.

use crate::domain::agent::Candidate;
use crate::domain::demand::{Demand, DemandId};
use crate::domain::message::{Feedback, MessageId, Response};
use crate::domain::proposal::Proposal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

/// Default round cap
pub const DEFAULT_MAX_ROUNDS: u32 = 5;
/// Maximum recursion depth for sub-negotiations (two-level tree)
pub const MAX_SESSION_DEPTH: u8 = 1;

/// Unique identifier for a NegotiationSession
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Created,
    Broadcasting,
    Collecting,
    Aggregating,
    ProposalSent,
    Negotiating,
    Finalized,
    ForceFinalized,
    Failed,
}

impl SessionStatus {
    /// Static transition table. Terminal states have no outgoing edges;
    /// every non-terminal state may fail (cancellation, empty pool,
    /// exhausted recovery).
    pub fn allowed_transitions(self) -> &'static [SessionStatus] {
        use SessionStatus::*;
        match self {
            Created => &[Broadcasting, Failed],
            Broadcasting => &[Collecting, Failed],
            Collecting => &[Aggregating, Failed],
            Aggregating => &[ProposalSent, Failed],
            ProposalSent => &[Negotiating, Failed],
            Negotiating => &[Collecting, Finalized, ForceFinalized, Failed],
            Finalized | ForceFinalized | Failed => &[],
        }
    }

    pub fn can_transition_to(self, target: SessionStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStatus::Created => "CREATED",
            SessionStatus::Broadcasting => "BROADCASTING",
            SessionStatus::Collecting => "COLLECTING",
            SessionStatus::Aggregating => "AGGREGATING",
            SessionStatus::ProposalSent => "PROPOSAL_SENT",
            SessionStatus::Negotiating => "NEGOTIATING",
            SessionStatus::Finalized => "FINALIZED",
            SessionStatus::ForceFinalized => "FORCE_FINALIZED",
            SessionStatus::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

/// Machine-readable reason attached to every terminal `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoParticipants,
    LowAcceptance,
    MaxRecoveryAttempts,
    Cancelled,
    Internal,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::NoParticipants => "no_participants",
            FailureReason::LowAcceptance => "low_acceptance",
            FailureReason::MaxRecoveryAttempts => "max_recovery_attempts",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Internal => "internal_error",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("illegal transition {from} -> {to}")]
    IllegalTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("session is terminal ({0})")]
    Terminal(SessionStatus),

    #[error("round cap {0} reached")]
    RoundCapReached(u32),
}

/// The negotiation aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationSession {
    pub id: SessionId,
    pub demand: Demand,
    status: SessionStatus,
    pub candidates: Vec<Candidate>,
    responses_by_round: BTreeMap<u32, Vec<Response>>,
    feedback_by_round: BTreeMap<u32, Vec<Feedback>>,
    /// Proposal versions, append-only; the last entry is current
    proposals: Vec<Proposal>,
    round: u32,
    pub max_rounds: u32,
    processed_message_ids: HashSet<MessageId>,
    pub recovery_attempts: u32,
    pub failure_reason: Option<FailureReason>,
    pub parent_session_id: Option<SessionId>,
    pub depth: u8,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl NegotiationSession {
    pub fn new(demand: Demand, max_rounds: u32) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            demand,
            status: SessionStatus::Created,
            candidates: Vec::new(),
            responses_by_round: BTreeMap::new(),
            feedback_by_round: BTreeMap::new(),
            proposals: Vec::new(),
            round: 1,
            max_rounds,
            processed_message_ids: HashSet::new(),
            recovery_attempts: 0,
            failure_reason: None,
            parent_session_id: None,
            depth: 0,
            created_at: now,
            last_updated_at: now,
        }
    }

    /// Create a depth-1 child session for a sub-demand.
    pub fn child_of(parent: SessionId, demand: Demand, max_rounds: u32) -> Self {
        let mut session = Self::new(demand, max_rounds);
        session.parent_session_id = Some(parent);
        session.depth = MAX_SESSION_DEPTH;
        session
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn demand_id(&self) -> DemandId {
        self.demand.id
    }

    /// Request a state transition. Rejected with a typed error when the
    /// static table forbids it; the session is untouched on rejection.
    pub fn transition_to(&mut self, target: SessionStatus) -> Result<(), SessionError> {
        if self.status.is_terminal() {
            return Err(SessionError::Terminal(self.status));
        }
        if !self.status.can_transition_to(target) {
            return Err(SessionError::IllegalTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.touch();
        Ok(())
    }

    /// Terminal failure with a machine-readable reason.
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), SessionError> {
        self.transition_to(SessionStatus::Failed)?;
        self.failure_reason = Some(reason);
        Ok(())
    }

    /// Advance to the next round. Monotone, capped at `max_rounds`.
    pub fn advance_round(&mut self) -> Result<u32, SessionError> {
        if self.round >= self.max_rounds {
            return Err(SessionError::RoundCapReached(self.max_rounds));
        }
        self.round += 1;
        self.touch();
        Ok(self.round)
    }

    pub fn set_candidates(&mut self, candidates: Vec<Candidate>) {
        self.candidates = candidates;
        self.touch();
    }

    /// Record a response for the current round.
    ///
    /// Returns `false` (and leaves the session untouched) for a duplicate
    /// message id or a second response from the same agent in this round.
    pub fn record_response(&mut self, response: Response) -> bool {
        if !self.mark_processed(response.message_id) {
            return false;
        }
        let entries = self.responses_by_round.entry(self.round).or_default();
        if entries.iter().any(|r| r.agent_id == response.agent_id) {
            return false;
        }
        entries.push(response);
        self.touch();
        true
    }

    /// Record feedback for the current round, with the same dedup
    /// semantics as [`record_response`](Self::record_response).
    pub fn record_feedback(&mut self, feedback: Feedback) -> bool {
        if !self.mark_processed(feedback.message_id) {
            return false;
        }
        let entries = self.feedback_by_round.entry(self.round).or_default();
        if entries.iter().any(|f| f.agent_id == feedback.agent_id) {
            return false;
        }
        entries.push(feedback);
        self.touch();
        true
    }

    /// Claim a message id. Returns `false` when it was already processed.
    fn mark_processed(&mut self, message_id: MessageId) -> bool {
        if self.processed_message_ids.contains(&message_id) {
            return false;
        }
        self.processed_message_ids.insert(message_id);
        true
    }

    pub fn responses(&self, round: u32) -> &[Response] {
        self.responses_by_round
            .get(&round)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn feedback(&self, round: u32) -> &[Feedback] {
        self.feedback_by_round
            .get(&round)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn push_proposal(&mut self, proposal: Proposal) {
        self.proposals.push(proposal);
        self.touch();
    }

    pub fn current_proposal(&self) -> Option<&Proposal> {
        self.proposals.last()
    }

    pub fn current_proposal_mut(&mut self) -> Option<&mut Proposal> {
        self.proposals.last_mut()
    }

    pub fn proposals(&self) -> &[Proposal] {
        &self.proposals
    }

    pub fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }

    /// Read-only projection handed to API callers and the state checker.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            demand_id: self.demand.id,
            status: self.status,
            round: self.round,
            max_rounds: self.max_rounds,
            candidates: self.candidates.clone(),
            current_proposal: self.proposals.last().cloned(),
            proposal_count: self.proposals.len(),
            responses_this_round: self.responses(self.round).len(),
            feedback_this_round: self.feedback(self.round).len(),
            recovery_attempts: self.recovery_attempts,
            failure_reason: self.failure_reason,
            parent_session_id: self.parent_session_id,
            depth: self.depth,
            created_at: self.created_at,
            last_updated_at: self.last_updated_at,
        }
    }
}

/// Read-only view of a session at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub demand_id: DemandId,
    pub status: SessionStatus,
    pub round: u32,
    pub max_rounds: u32,
    pub candidates: Vec<Candidate>,
    pub current_proposal: Option<Proposal>,
    pub proposal_count: usize,
    pub responses_this_round: usize,
    pub feedback_this_round: usize,
    pub recovery_attempts: u32,
    pub failure_reason: Option<FailureReason>,
    pub parent_session_id: Option<SessionId>,
    pub depth: u8,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}
