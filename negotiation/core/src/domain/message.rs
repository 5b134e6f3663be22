// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Negotiation messages
//
// Responses and feedback are immutable per-(agent, round) records. Every
// message carries a `MessageId` dedup key; the session silently ignores a
// message id it has already processed, which makes at-least-once delivery
// from the transport layer safe.

use crate::domain::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Idempotency key carried by every inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether an invited agent joins the negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationDecision {
    Participate,
    Decline,
    Conditional,
}

/// The shape of an agent's answer to an invitation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Offer,
    Negotiate,
}

/// One agent's answer to a round invitation. One per (agent, round);
/// never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub agent_id: AgentId,
    pub decision: ParticipationDecision,
    pub response_kind: ResponseKind,
    pub contribution: String,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub negotiation_points: Vec<String>,
    pub message_id: MessageId,
    pub submitted_at: DateTime<Utc>,
}

impl Response {
    pub fn offer(agent_id: AgentId, contribution: impl Into<String>) -> Self {
        Self {
            agent_id,
            decision: ParticipationDecision::Participate,
            response_kind: ResponseKind::Offer,
            contribution: contribution.into(),
            conditions: Vec::new(),
            negotiation_points: Vec::new(),
            message_id: MessageId::new(),
            submitted_at: Utc::now(),
        }
    }

    pub fn decline(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            decision: ParticipationDecision::Decline,
            response_kind: ResponseKind::Offer,
            contribution: String::new(),
            conditions: Vec::new(),
            negotiation_points: Vec::new(),
            message_id: MessageId::new(),
            submitted_at: Utc::now(),
        }
    }

    pub fn is_participating(&self) -> bool {
        !matches!(self.decision, ParticipationDecision::Decline)
    }
}

/// How an agent reacts to a distributed proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    Accept,
    Negotiate,
    Withdraw,
}

/// One agent's reaction to a proposal version. Same per-round,
/// dedup-by-message-id semantics as [`Response`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub agent_id: AgentId,
    pub feedback_type: FeedbackType,
    #[serde(default)]
    pub adjustment_request: Option<String>,
    pub message_id: MessageId,
    pub submitted_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(agent_id: AgentId, feedback_type: FeedbackType) -> Self {
        Self {
            agent_id,
            feedback_type,
            adjustment_request: None,
            message_id: MessageId::new(),
            submitted_at: Utc::now(),
        }
    }

    pub fn with_adjustment(mut self, request: impl Into<String>) -> Self {
        self.adjustment_request = Some(request.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_is_participating() {
        let response = Response::offer(AgentId::new(), "I can take routing");
        assert!(response.is_participating());
        assert_eq!(response.response_kind, ResponseKind::Offer);
    }

    #[test]
    fn test_decline_is_not_participating() {
        assert!(!Response::decline(AgentId::new()).is_participating());
    }

    #[test]
    fn test_feedback_adjustment_builder() {
        let feedback = Feedback::new(AgentId::new(), FeedbackType::Negotiate)
            .with_adjustment("reduce my share of the workload");
        assert_eq!(feedback.feedback_type, FeedbackType::Negotiate);
        assert!(feedback.adjustment_request.is_some());
    }

    #[test]
    fn test_message_serialization_round_trip() {
        let feedback = Feedback::new(AgentId::new(), FeedbackType::Accept);
        let json = serde_json::to_string(&feedback).unwrap();
        assert!(json.contains("accept"));
        let parsed: Feedback = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.message_id, feedback.message_id);
    }
}
