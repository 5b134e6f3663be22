// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Negotiation event stream
//!
//! Events produced for Transport/Store consumers: at-least-once delivery,
//! ordered per session (every event of one session is emitted by its
//! single coordinator task). Consumers must treat unknown event types as
//! ignorable; the serde wire names below are the stable contract.

use crate::domain::agent::{AgentId, Candidate};
use crate::domain::demand::DemandId;
use crate::domain::message::{ParticipationDecision, ResponseKind};
use crate::domain::proposal::{Gap, ProposalId};
use crate::domain::session::{FailureReason, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Evaluator decision as it appears on the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Finalize,
    ForceFinalize,
    Renegotiate,
    Fail,
}

/// Typed payload of one negotiation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NegotiationEvent {
    #[serde(rename = "demand.understood")]
    DemandUnderstood { demand_id: DemandId },

    #[serde(rename = "filter.completed")]
    FilterCompleted {
        candidates: Vec<Candidate>,
        used_fallback: bool,
    },

    #[serde(rename = "offer.submitted")]
    OfferSubmitted {
        agent_id: AgentId,
        decision: ParticipationDecision,
        response_kind: ResponseKind,
    },

    #[serde(rename = "proposal.distributed")]
    ProposalDistributed { proposal_id: ProposalId, round: u32 },

    #[serde(rename = "feedback.evaluated")]
    FeedbackEvaluated {
        accept_rate: f64,
        round: u32,
        decision: DecisionKind,
    },

    #[serde(rename = "negotiation.round_started")]
    RoundStarted { round: u32, max_rounds: u32 },

    #[serde(rename = "negotiation.force_finalized")]
    ForceFinalized {
        confirmed_participants: Vec<AgentId>,
        optional_participants: Vec<AgentId>,
    },

    #[serde(rename = "proposal.finalized")]
    ProposalFinalized { proposal_id: ProposalId },

    #[serde(rename = "negotiation.failed")]
    Failed { reason: FailureReason },

    #[serde(rename = "gap.identified")]
    GapIdentified { gap: Gap },

    #[serde(rename = "subnet.triggered")]
    SubnetTriggered {
        parent_id: SessionId,
        child_id: SessionId,
    },
}

/// Envelope carried on the event bus. Every event names its session and
/// emission time next to the typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub negotiation_id: SessionId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: NegotiationEvent,
}

impl SessionEvent {
    pub fn now(negotiation_id: SessionId, event: NegotiationEvent) -> Self {
        Self {
            negotiation_id,
            timestamp: Utc::now(),
            event,
        }
    }
}
