// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Round Coordinator - the session's single writer
//!
//! One tokio task per negotiation session owns the aggregate. Everything
//! that wants to influence the session (transport handlers delivering
//! responses and feedback, user cancellation, the state checker's
//! recovery requests, the session's own offer/evaluation worker tasks)
//! enqueues a [`SessionCommand`]; only this task mutates session fields,
//! so no field-level locking is needed.
//!
//! One round cycle:
//!
//! ```text
//! broadcast invitations
//!   -> collect responses under a barrier (all expected, or timeout)
//!   -> aggregate responses into a proposal (Reasoner via breaker)
//!   -> distribute the proposal to participants
//!   -> collect feedback under the same barrier discipline
//!   -> threshold evaluation: finalize | renegotiate | fail
//! ```
//!
//! Suspension points are exactly "awaiting the next command" and
//! "awaiting barrier completion", both expressed as channel receives
//! with a deadline.

use crate::application::evaluator::{Decision, FeedbackTally, ThresholdEvaluator};
use crate::application::gap_recursion::GapRecursionManager;
use crate::application::selector::CandidateSelector;
use crate::domain::agent::{AgentId, AgentPool};
use crate::domain::config::NegotiationConfig;
use crate::domain::events::{NegotiationEvent, SessionEvent};
use crate::domain::message::{Feedback, Response};
use crate::domain::reasoner::Reasoner;
use crate::domain::session::{
    FailureReason, NegotiationSession, SessionId, SessionSnapshot, SessionStatus,
    MAX_SESSION_DEPTH,
};
use crate::infrastructure::breaker::GuardedReasoner;
use crate::infrastructure::event_bus::EventBus;
use crate::application::registry::SessionRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Command-channel capacity per session; producers are the K worker
/// tasks of the current round plus transport deliveries.
const COMMAND_BUFFER: usize = 64;

/// Anomaly classification attached to a recovery request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Anomaly {
    StuckInCollecting,
    StuckInNegotiating,
    MissingResponses,
    Timeout,
}

impl Anomaly {
    pub fn as_str(self) -> &'static str {
        match self {
            Anomaly::StuckInCollecting => "stuck_in_collecting",
            Anomaly::StuckInNegotiating => "stuck_in_negotiating",
            Anomaly::MissingResponses => "missing_responses",
            Anomaly::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for Anomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages delivered to a session's coordinator task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Start the negotiation (requester confirmation)
    Confirm,
    /// An agent's answer to the current round's invitation
    Response(Response),
    /// An agent's reaction to the distributed proposal
    Feedback(Feedback),
    /// An agent gave up (individual timeout or worker failure); it no
    /// longer blocks the barrier
    AgentExited(AgentId),
    /// Cooperative user cancellation
    Cancel,
    /// State-checker recovery request
    Recover(Anomaly),
}

#[derive(Debug, thiserror::Error)]
#[error("session {0} is no longer accepting commands")]
pub struct SessionGone(pub SessionId);

/// Cloneable sender side of a session's command channel.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(session_id: SessionId, commands: mpsc::Sender<SessionCommand>) -> Self {
        Self {
            session_id,
            commands,
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionGone> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionGone(self.session_id))
    }
}

/// Shared collaborators handed to every session task.
pub struct SessionContext {
    /// The breaker-guarded reasoner (one breaker process-wide)
    pub reasoner: Arc<dyn Reasoner>,
    pub selector: Arc<CandidateSelector>,
    pub pool: Arc<AgentPool>,
    pub events: EventBus,
    pub registry: Arc<SessionRegistry>,
    pub config: NegotiationConfig,
}

/// Register a session and start its coordinator task.
pub fn spawn_session(ctx: Arc<SessionContext>, session: NegotiationSession) -> SessionHandle {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
    let handle = SessionHandle::new(session.id, tx.clone());
    ctx.registry.register(handle.clone(), snapshot_rx);
    let coordinator = RoundCoordinator {
        ctx,
        session,
        commands: rx,
        self_tx: tx,
        snapshot_tx,
    };
    tokio::spawn(coordinator.run());
    handle
}

pub struct RoundCoordinator {
    ctx: Arc<SessionContext>,
    session: NegotiationSession,
    commands: mpsc::Receiver<SessionCommand>,
    /// Sender back into the own queue, cloned into worker tasks
    self_tx: mpsc::Sender<SessionCommand>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl RoundCoordinator {
    pub(crate) async fn run(mut self) {
        info!(
            session_id = %self.session.id,
            depth = self.session.depth,
            "negotiation session task started"
        );

        if let Err(reason) = self.drive().await {
            if !self.session.is_terminal() {
                match self.session.fail(reason) {
                    Ok(()) => self.emit(NegotiationEvent::Failed { reason }),
                    Err(e) => error!(session_id = %self.session.id, error = %e, "failed to fail session"),
                }
            }
        }

        if self.session.status() == SessionStatus::Finalized
            && self.session.depth < MAX_SESSION_DEPTH
            && self.ctx.config.gaps.enabled
        {
            GapRecursionManager::new(self.ctx.clone())
                .resolve_gaps(&mut self.session)
                .await;
        }

        self.publish_snapshot();
        self.ctx
            .registry
            .unregister(self.session.id, self.session.snapshot());
        info!(
            session_id = %self.session.id,
            status = %self.session.status(),
            "negotiation session task finished"
        );
    }

    async fn drive(&mut self) -> Result<(), FailureReason> {
        self.await_confirm().await?;

        self.emit(NegotiationEvent::DemandUnderstood {
            demand_id: self.session.demand_id(),
        });

        let selection = self
            .ctx
            .selector
            .select(&self.session.demand, &self.ctx.pool)
            .await;
        self.emit(NegotiationEvent::FilterCompleted {
            candidates: selection.candidates.clone(),
            used_fallback: selection.used_fallback,
        });
        if selection.is_empty() {
            // The one legitimate empty selection: nothing to negotiate.
            return Err(FailureReason::NoParticipants);
        }
        self.transition(SessionStatus::Broadcasting)?;
        self.session.set_candidates(selection.candidates);
        self.publish_snapshot();

        loop {
            let round = self.session.round();
            self.emit(NegotiationEvent::RoundStarted {
                round,
                max_rounds: self.session.max_rounds,
            });

            self.transition(SessionStatus::Collecting)?;
            self.collect_responses().await?;

            self.transition(SessionStatus::Aggregating)?;
            self.aggregate_round().await;

            self.transition(SessionStatus::ProposalSent)?;
            let proposal_id = match self.session.current_proposal() {
                Some(proposal) => proposal.id,
                None => return Err(FailureReason::Internal),
            };
            self.emit(NegotiationEvent::ProposalDistributed { proposal_id, round });

            let participants: Vec<AgentId> = self
                .session
                .responses(round)
                .iter()
                .filter(|r| r.is_participating())
                .map(|r| r.agent_id)
                .collect();

            self.transition(SessionStatus::Negotiating)?;
            self.collect_feedback(&participants).await?;

            let feedback = self.session.feedback(round).to_vec();
            let decision = ThresholdEvaluator::evaluate(
                &participants,
                &feedback,
                round,
                self.session.max_rounds,
            );
            let tally = FeedbackTally::count(participants.len(), &feedback);
            self.emit(NegotiationEvent::FeedbackEvaluated {
                accept_rate: tally.accept_rate(),
                round,
                decision: decision.kind(),
            });

            match decision {
                Decision::Finalize => {
                    self.transition(SessionStatus::Finalized)?;
                    self.emit(NegotiationEvent::ProposalFinalized { proposal_id });
                    return Ok(());
                }
                Decision::ForceFinalize { confirmed, optional } => {
                    if let Some(proposal) = self.session.current_proposal_mut() {
                        proposal.force_partition(confirmed.clone(), optional.clone());
                    }
                    self.transition(SessionStatus::ForceFinalized)?;
                    self.emit(NegotiationEvent::ForceFinalized {
                        confirmed_participants: confirmed,
                        optional_participants: optional,
                    });
                    return Ok(());
                }
                Decision::Renegotiate => {
                    // The evaluator only renegotiates below the cap.
                    self.session
                        .advance_round()
                        .map_err(|_| FailureReason::Internal)?;
                    self.publish_snapshot();
                }
                Decision::Fail(reason) => return Err(reason),
            }
        }
    }

    /// Wait in CREATED until the requester confirms (or cancels).
    async fn await_confirm(&mut self) -> Result<(), FailureReason> {
        loop {
            match self.commands.recv().await {
                None => return Err(FailureReason::Cancelled),
                Some(SessionCommand::Confirm) => return Ok(()),
                Some(SessionCommand::Cancel) => return Err(FailureReason::Cancelled),
                Some(other) => {
                    debug!(session_id = %self.session.id, ?other, "command ignored before confirmation");
                }
            }
        }
    }

    /// Barrier: wait until every expected agent answered (or exited) or
    /// the collection timeout elapses. Partial results are accepted
    /// as-is.
    async fn collect_responses(&mut self) -> Result<(), FailureReason> {
        let round = self.session.round();
        let expected: Vec<AgentId> = self.session.candidates.iter().map(|c| c.agent_id).collect();
        let mut exited: HashSet<AgentId> = HashSet::new();
        self.spawn_offer_tasks(&expected, &mut exited);

        let deadline = Instant::now() + self.ctx.config.rounds.collection_timeout;
        loop {
            if self.session.responses(round).len() + exited.len() >= expected.len() {
                break;
            }
            match tokio::time::timeout_at(deadline, self.commands.recv()).await {
                Err(_) => {
                    debug!(session_id = %self.session.id, round, "collection barrier timed out");
                    break;
                }
                Ok(None) => return Err(FailureReason::Cancelled),
                Ok(Some(command)) => {
                    if self.handle_collection_command(command, &expected, &mut exited)? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns `Ok(true)` when the barrier should close early (recovery).
    fn handle_collection_command(
        &mut self,
        command: SessionCommand,
        expected: &[AgentId],
        exited: &mut HashSet<AgentId>,
    ) -> Result<bool, FailureReason> {
        match command {
            SessionCommand::Response(response) => {
                let agent_id = response.agent_id;
                let decision = response.decision;
                let response_kind = response.response_kind;
                if !expected.contains(&agent_id) {
                    debug!(session_id = %self.session.id, %agent_id, "response from non-candidate ignored");
                } else if self.session.record_response(response) {
                    self.emit(NegotiationEvent::OfferSubmitted {
                        agent_id,
                        decision,
                        response_kind,
                    });
                    self.publish_snapshot();
                }
                Ok(false)
            }
            SessionCommand::AgentExited(agent_id) => {
                let round = self.session.round();
                let already_answered = self
                    .session
                    .responses(round)
                    .iter()
                    .any(|r| r.agent_id == agent_id);
                if expected.contains(&agent_id) && !already_answered {
                    warn!(session_id = %self.session.id, %agent_id, "agent non-responsive this round");
                    exited.insert(agent_id);
                }
                Ok(false)
            }
            SessionCommand::Feedback(_) => {
                debug!(session_id = %self.session.id, "feedback outside negotiating phase ignored");
                Ok(false)
            }
            SessionCommand::Confirm => Ok(false),
            SessionCommand::Cancel => Err(FailureReason::Cancelled),
            SessionCommand::Recover(anomaly) => {
                self.note_recovery(anomaly)?;
                Ok(true)
            }
        }
    }

    fn spawn_offer_tasks(&self, expected: &[AgentId], exited: &mut HashSet<AgentId>) {
        for agent_id in expected {
            let Some(profile) = self.ctx.pool.get(*agent_id) else {
                // A candidate that vanished from the pool cannot answer.
                exited.insert(*agent_id);
                continue;
            };
            let profile = profile.clone();
            let reasoner = self.ctx.reasoner.clone();
            let demand = self.session.demand.clone();
            let tx = self.self_tx.clone();
            let agent_timeout = self.ctx.config.rounds.agent_timeout;
            tokio::spawn(async move {
                let command =
                    match tokio::time::timeout(agent_timeout, reasoner.generate_offer(&demand, &profile))
                        .await
                    {
                        Ok(Ok(response)) => SessionCommand::Response(response),
                        Ok(Err(error)) => {
                            warn!(agent_id = %profile.agent_id, %error, "offer generation failed");
                            SessionCommand::AgentExited(profile.agent_id)
                        }
                        Err(_) => SessionCommand::AgentExited(profile.agent_id),
                    };
                let _ = tx.send(command).await;
            });
        }
    }

    /// Aggregate this round's responses into the next proposal version.
    /// Contained: a reasoner error degrades to the deterministic
    /// fallback, never fails the session.
    async fn aggregate_round(&mut self) {
        let round = self.session.round();
        let responses = self.session.responses(round).to_vec();
        let mut proposal = match self
            .ctx
            .reasoner
            .aggregate(&self.session.demand, &responses)
            .await
        {
            Ok(proposal) => proposal,
            Err(error) => {
                warn!(session_id = %self.session.id, %error, "aggregation failed, using fallback proposal");
                GuardedReasoner::fallback_proposal(&responses)
            }
        };
        proposal.version = round;
        self.session.push_proposal(proposal);
        self.publish_snapshot();
    }

    /// Barrier over proposal feedback, same discipline as response
    /// collection.
    async fn collect_feedback(&mut self, participants: &[AgentId]) -> Result<(), FailureReason> {
        let round = self.session.round();
        let mut exited: HashSet<AgentId> = HashSet::new();
        self.spawn_feedback_tasks(participants, &mut exited);

        let deadline = Instant::now() + self.ctx.config.rounds.feedback_timeout;
        loop {
            if self.session.feedback(round).len() + exited.len() >= participants.len() {
                break;
            }
            match tokio::time::timeout_at(deadline, self.commands.recv()).await {
                Err(_) => {
                    debug!(session_id = %self.session.id, round, "feedback barrier timed out");
                    break;
                }
                Ok(None) => return Err(FailureReason::Cancelled),
                Ok(Some(command)) => {
                    if self.handle_feedback_command(command, participants, &mut exited)? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_feedback_command(
        &mut self,
        command: SessionCommand,
        participants: &[AgentId],
        exited: &mut HashSet<AgentId>,
    ) -> Result<bool, FailureReason> {
        match command {
            SessionCommand::Feedback(feedback) => {
                let agent_id = feedback.agent_id;
                if !participants.contains(&agent_id) {
                    debug!(session_id = %self.session.id, %agent_id, "feedback from non-participant ignored");
                } else if self.session.record_feedback(feedback) {
                    self.publish_snapshot();
                }
                Ok(false)
            }
            SessionCommand::AgentExited(agent_id) => {
                let round = self.session.round();
                let already_answered = self
                    .session
                    .feedback(round)
                    .iter()
                    .any(|f| f.agent_id == agent_id);
                if participants.contains(&agent_id) && !already_answered {
                    warn!(session_id = %self.session.id, %agent_id, "agent silent on proposal feedback");
                    exited.insert(agent_id);
                }
                Ok(false)
            }
            SessionCommand::Response(_) => {
                debug!(session_id = %self.session.id, "late response after aggregation ignored");
                Ok(false)
            }
            SessionCommand::Confirm => Ok(false),
            SessionCommand::Cancel => Err(FailureReason::Cancelled),
            SessionCommand::Recover(anomaly) => {
                self.note_recovery(anomaly)?;
                Ok(true)
            }
        }
    }

    fn spawn_feedback_tasks(&self, participants: &[AgentId], exited: &mut HashSet<AgentId>) {
        let Some(proposal) = self.session.current_proposal().cloned() else {
            return;
        };
        for agent_id in participants {
            let Some(profile) = self.ctx.pool.get(*agent_id) else {
                exited.insert(*agent_id);
                continue;
            };
            let profile = profile.clone();
            let proposal = proposal.clone();
            let reasoner = self.ctx.reasoner.clone();
            let tx = self.self_tx.clone();
            let agent_timeout = self.ctx.config.rounds.agent_timeout;
            tokio::spawn(async move {
                let command = match tokio::time::timeout(
                    agent_timeout,
                    reasoner.evaluate_proposal(&proposal, &profile),
                )
                .await
                {
                    Ok(Ok(feedback)) => SessionCommand::Feedback(feedback),
                    Ok(Err(error)) => {
                        warn!(agent_id = %profile.agent_id, %error, "proposal evaluation failed");
                        SessionCommand::AgentExited(profile.agent_id)
                    }
                    Err(_) => SessionCommand::AgentExited(profile.agent_id),
                };
                let _ = tx.send(command).await;
            });
        }
    }

    /// Count a recovery request. The bound is inclusive: the attempt
    /// that reaches the configured maximum fails the session instead of
    /// recovering it.
    fn note_recovery(&mut self, anomaly: Anomaly) -> Result<(), FailureReason> {
        self.session.recovery_attempts += 1;
        warn!(
            session_id = %self.session.id,
            anomaly = %anomaly,
            attempts = self.session.recovery_attempts,
            "recovery requested"
        );
        if self.session.recovery_attempts >= self.ctx.config.checker.max_recovery_attempts {
            return Err(FailureReason::MaxRecoveryAttempts);
        }
        self.session.touch();
        self.publish_snapshot();
        Ok(())
    }

    /// Request a transition the coordinator believes is legal; a
    /// rejection is an internal invariant break.
    fn transition(&mut self, target: SessionStatus) -> Result<(), FailureReason> {
        if let Err(e) = self.session.transition_to(target) {
            error!(session_id = %self.session.id, error = %e, "state transition rejected");
            return Err(FailureReason::Internal);
        }
        self.publish_snapshot();
        Ok(())
    }

    fn emit(&self, event: NegotiationEvent) {
        self.ctx
            .events
            .publish(SessionEvent::now(self.session.id, event));
    }

    fn publish_snapshot(&self) {
        let _ = self.snapshot_tx.send_replace(self.session.snapshot());
    }
}
