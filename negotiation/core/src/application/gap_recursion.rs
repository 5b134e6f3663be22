// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Gap recursion
//!
//! After a session reaches plain `FINALIZED`, its proposal's unmet
//! capability gaps may each spawn one child negotiation. The session
//! graph is a strict two-level tree: depth-0 sessions may spawn depth-1
//! children, depth-1 sessions skip gap recursion entirely, so there is
//! nothing to cycle-detect. A failed or timed-out child annotates its
//! gap as unresolved and never fails the parent.

use crate::application::coordinator::{spawn_session, SessionCommand, SessionContext};
use crate::domain::demand::{Demand, KeywordSet};
use crate::domain::events::{NegotiationEvent, SessionEvent};
use crate::domain::proposal::{Gap, GapResolution};
use crate::domain::reasoner::GapAssessment;
use crate::domain::session::{
    NegotiationSession, SessionId, SessionStatus, MAX_SESSION_DEPTH,
};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Signal weights for the recursion decision: expected satisfaction
/// uplift, stakeholder support, cost/benefit.
const UPLIFT_WEIGHT: f64 = 0.4;
const SUPPORT_WEIGHT: f64 = 0.35;
const COST_BENEFIT_WEIGHT: f64 = 0.25;

pub struct GapRecursionManager {
    ctx: Arc<SessionContext>,
}

impl GapRecursionManager {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    /// Weighted recursion score in [0,1].
    pub fn recursion_score(assessment: &GapAssessment) -> f64 {
        UPLIFT_WEIGHT * assessment.satisfaction_uplift.clamp(0.0, 1.0)
            + SUPPORT_WEIGHT * assessment.stakeholder_support.clamp(0.0, 1.0)
            + COST_BENEFIT_WEIGHT * assessment.cost_benefit.clamp(0.0, 1.0)
    }

    /// Identify gaps on the finalized proposal and resolve the important
    /// ones through bounded child negotiations.
    pub async fn resolve_gaps(&self, session: &mut NegotiationSession) {
        if session.depth >= MAX_SESSION_DEPTH {
            debug!(session_id = %session.id, "max depth reached, skipping gap recursion");
            return;
        }

        let demand = session.demand.clone();
        let feedback = session.feedback(session.round()).to_vec();
        let Some(current) = session.current_proposal().cloned() else {
            return;
        };

        // Enrich the proposal with gaps the aggregation pass missed.
        let identified = self
            .ctx
            .reasoner
            .identify_gaps(&demand, &current, &feedback)
            .await
            .unwrap_or_default();
        for gap in identified {
            let known = current
                .gaps
                .iter()
                .any(|existing| existing.capability_tag == gap.capability_tag);
            if !known {
                self.emit(session.id, NegotiationEvent::GapIdentified { gap: gap.clone() });
                if let Some(proposal) = session.current_proposal_mut() {
                    proposal.gaps.push(gap);
                }
            }
        }

        let gaps: Vec<(usize, Gap)> = session
            .current_proposal()
            .map(|p| p.gaps.iter().cloned().enumerate().collect())
            .unwrap_or_default();
        let threshold = self.ctx.config.gaps.importance_threshold;

        for (index, gap) in gaps {
            if gap.importance < threshold {
                debug!(
                    session_id = %session.id,
                    capability = %gap.capability_tag,
                    importance = gap.importance,
                    "gap below importance threshold"
                );
                continue;
            }
            let assessment = self
                .ctx
                .reasoner
                .assess_gap(&demand, &gap)
                .await
                .unwrap_or_default();
            let score = Self::recursion_score(&assessment);
            if score < self.ctx.config.gaps.approval_threshold {
                info!(
                    session_id = %session.id,
                    capability = %gap.capability_tag,
                    score,
                    "recursion declined"
                );
                continue;
            }

            let resolution = self.negotiate_gap(session, &gap).await;
            if let Some(proposal) = session.current_proposal_mut() {
                proposal.resolve_gap(index, resolution);
            }
            session.touch();
        }
    }

    /// Spawn one depth-1 child for the gap and wait for its outcome.
    async fn negotiate_gap(&self, session: &NegotiationSession, gap: &Gap) -> GapResolution {
        let sub_demand = derive_sub_demand(&session.demand, gap);
        let child = NegotiationSession::child_of(
            session.id,
            sub_demand,
            self.ctx.config.rounds.max_rounds,
        );
        let child_id = child.id;
        let handle = spawn_session(self.ctx.clone(), child);
        self.emit(
            session.id,
            NegotiationEvent::SubnetTriggered {
                parent_id: session.id,
                child_id,
            },
        );
        if handle.send(SessionCommand::Confirm).await.is_err() {
            return GapResolution::Unresolved {
                reason: "child_unreachable".to_string(),
            };
        }
        self.await_child(child_id).await
    }

    async fn await_child(&self, child_id: SessionId) -> GapResolution {
        let deadline = Instant::now() + self.ctx.config.gaps.child_wait_timeout;
        let mut watcher = self.ctx.registry.watch(child_id);

        loop {
            let snapshot = match self.ctx.registry.get_snapshot(child_id) {
                Some(snapshot) => snapshot,
                None => {
                    return GapResolution::Unresolved {
                        reason: "child_not_found".to_string(),
                    }
                }
            };
            match snapshot.status {
                SessionStatus::Finalized | SessionStatus::ForceFinalized => {
                    return GapResolution::Resolved {
                        child_session_id: child_id,
                    };
                }
                SessionStatus::Failed => {
                    let reason = snapshot
                        .failure_reason
                        .map(|r| r.as_str().to_string())
                        .unwrap_or_else(|| "child_failed".to_string());
                    return GapResolution::Unresolved { reason };
                }
                _ => {}
            }

            let changed = match watcher.as_mut() {
                Some(rx) => tokio::time::timeout_at(deadline, rx.changed()).await,
                None => {
                    // Active entry already gone: re-read the terminal map
                    // on the next loop.
                    watcher = self.ctx.registry.watch(child_id);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    if Instant::now() >= deadline {
                        warn!(%child_id, "child negotiation timed out");
                        return GapResolution::Unresolved {
                            reason: "child_timeout".to_string(),
                        };
                    }
                    continue;
                }
            };
            match changed {
                Err(_) => {
                    warn!(%child_id, "child negotiation timed out");
                    return GapResolution::Unresolved {
                        reason: "child_timeout".to_string(),
                    };
                }
                Ok(Err(_)) => {
                    // Sender dropped at unregister; the terminal snapshot
                    // is in the registry now.
                    watcher = None;
                }
                Ok(Ok(())) => {}
            }
        }
    }

    fn emit(&self, session_id: SessionId, event: NegotiationEvent) {
        self.ctx.events.publish(SessionEvent::now(session_id, event));
    }
}

/// Sub-demand for a capability gap. The gap's capability tag doubles as
/// the supplied keyword set so the child's selection funnel targets the
/// missing capability rather than the parent's original need.
fn derive_sub_demand(parent: &Demand, gap: &Gap) -> Demand {
    Demand::new(
        parent.requester_id.clone(),
        gap.description.clone(),
        vec![gap.capability_tag.clone()],
        KeywordSet::from_terms([gap.capability_tag.as_str()]),
    )
}
