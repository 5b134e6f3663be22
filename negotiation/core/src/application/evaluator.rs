// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Threshold evaluation
//!
//! The three-way consensus decision at the end of each round. The
//! accept-rate boundaries are binding contracts: ≥ 0.8 finalizes
//! (inclusive on the high side), < 0.5 fails, and exactly 0.5 continues
//! negotiating. Comparisons use exact integer arithmetic so the
//! boundaries hold regardless of floating-point representation.

use crate::domain::agent::AgentId;
use crate::domain::events::DecisionKind;
use crate::domain::message::{Feedback, FeedbackType};
use crate::domain::session::FailureReason;
use std::collections::HashSet;
use tracing::debug;

/// Accept-rate at or above which the proposal finalizes.
pub const FINALIZE_ACCEPT_RATE: f64 = 0.8;
/// Accept-rate below which the negotiation fails.
pub const FAIL_ACCEPT_RATE: f64 = 0.5;

/// Per-round feedback counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedbackTally {
    pub expected: usize,
    pub accept: usize,
    pub negotiate: usize,
    pub withdraw: usize,
}

impl FeedbackTally {
    pub fn count(expected: usize, feedback: &[Feedback]) -> Self {
        let mut tally = Self {
            expected,
            ..Self::default()
        };
        for entry in feedback {
            match entry.feedback_type {
                FeedbackType::Accept => tally.accept += 1,
                FeedbackType::Negotiate => tally.negotiate += 1,
                FeedbackType::Withdraw => tally.withdraw += 1,
            }
        }
        tally
    }

    /// Participants still in the negotiation.
    pub fn active(&self) -> usize {
        self.expected.saturating_sub(self.withdraw)
    }

    pub fn accept_rate(&self) -> f64 {
        match self.active() {
            0 => 0.0,
            active => self.accept as f64 / active as f64,
        }
    }
}

/// Outcome of one round's evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Finalize,
    /// Round cap reached with partial consensus: accepted participants
    /// are confirmed, the rest of the active set becomes optional.
    ForceFinalize {
        confirmed: Vec<AgentId>,
        optional: Vec<AgentId>,
    },
    Renegotiate,
    Fail(FailureReason),
}

impl Decision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            Decision::Finalize => DecisionKind::Finalize,
            Decision::ForceFinalize { .. } => DecisionKind::ForceFinalize,
            Decision::Renegotiate => DecisionKind::Renegotiate,
            Decision::Fail(_) => DecisionKind::Fail,
        }
    }
}

pub struct ThresholdEvaluator;

impl ThresholdEvaluator {
    /// Evaluate one round of feedback from the expected participants.
    ///
    /// `expected` is the set of agents the proposal was distributed to,
    /// in distribution order (the forced-finalization partition keeps
    /// that order).
    pub fn evaluate(
        expected: &[AgentId],
        feedback: &[Feedback],
        round: u32,
        max_rounds: u32,
    ) -> Decision {
        let tally = FeedbackTally::count(expected.len(), feedback);
        let active = tally.active();
        if active == 0 {
            return Decision::Fail(FailureReason::NoParticipants);
        }

        debug!(
            expected = tally.expected,
            accept = tally.accept,
            negotiate = tally.negotiate,
            withdraw = tally.withdraw,
            round,
            "evaluating feedback tally"
        );

        // accept/active >= 0.8  <=>  5*accept >= 4*active
        if 5 * tally.accept >= 4 * active {
            return Decision::Finalize;
        }
        // accept/active < 0.5  <=>  2*accept < active
        if 2 * tally.accept < active {
            return Decision::Fail(FailureReason::LowAcceptance);
        }
        if round >= max_rounds {
            let withdrawn: HashSet<AgentId> = feedback
                .iter()
                .filter(|f| f.feedback_type == FeedbackType::Withdraw)
                .map(|f| f.agent_id)
                .collect();
            let accepted: HashSet<AgentId> = feedback
                .iter()
                .filter(|f| f.feedback_type == FeedbackType::Accept)
                .map(|f| f.agent_id)
                .collect();
            let confirmed = expected
                .iter()
                .copied()
                .filter(|id| accepted.contains(id))
                .collect();
            let optional = expected
                .iter()
                .copied()
                .filter(|id| !accepted.contains(id) && !withdrawn.contains(id))
                .collect();
            return Decision::ForceFinalize {
                confirmed,
                optional,
            };
        }
        Decision::Renegotiate
    }
}
