// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Negotiation Service - the session API consumed by Transport
//!
//! Composition root for the negotiation core: wires the breaker-guarded
//! reasoner, the selection funnel, the registry, and the event bus, and
//! exposes the four session operations (`submit`, `confirm`, `get`,
//! `cancel`) plus the message ingress for at-least-once transport
//! delivery of agent responses and feedback.

use crate::application::checker::StateChecker;
use crate::application::coordinator::{spawn_session, SessionCommand, SessionContext};
use crate::application::registry::SessionRegistry;
use crate::application::selector::CandidateSelector;
use crate::domain::agent::AgentPool;
use crate::domain::config::NegotiationConfig;
use crate::domain::demand::Demand;
use crate::domain::message::{Feedback, Response};
use crate::domain::reasoner::Reasoner;
use crate::domain::scorer::SimilarityScorer;
use crate::domain::session::{NegotiationSession, SessionId, SessionSnapshot, SessionStatus};
use crate::infrastructure::breaker::{CircuitBreaker, GuardedReasoner};
use crate::infrastructure::event_bus::EventBus;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Typed errors at the API boundary. Illegal requests are rejected here
/// with no session mutation.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("session {id} is terminal ({status}) and cannot accept the request")]
    TerminalSession {
        id: SessionId,
        status: SessionStatus,
    },

    #[error("session {0} stopped accepting commands")]
    Closed(SessionId),
}

pub struct NegotiationService {
    ctx: Arc<SessionContext>,
    breaker: Arc<CircuitBreaker>,
}

impl NegotiationService {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        scorer: Arc<dyn SimilarityScorer>,
        pool: AgentPool,
        config: NegotiationConfig,
    ) -> Self {
        let guarded = GuardedReasoner::new(reasoner, config.breaker.clone());
        let breaker = guarded.breaker();
        let selector = Arc::new(CandidateSelector::new(scorer, config.selector.clone()));
        let ctx = Arc::new(SessionContext {
            reasoner: Arc::new(guarded),
            selector,
            pool: Arc::new(pool),
            events: EventBus::with_default_capacity(),
            registry: Arc::new(SessionRegistry::new()),
            config,
        });
        Self { ctx, breaker }
    }

    /// Build the service from a configuration manifest on disk.
    pub fn from_manifest_file(
        path: impl AsRef<Path>,
        reasoner: Arc<dyn Reasoner>,
        scorer: Arc<dyn SimilarityScorer>,
        pool: AgentPool,
    ) -> anyhow::Result<Self> {
        let manifest = crate::domain::config::NegotiationConfigManifest::from_yaml_file(&path)
            .with_context(|| {
                format!(
                    "loading negotiation config from {}",
                    path.as_ref().display()
                )
            })?;
        Ok(Self::new(reasoner, scorer, pool, manifest.spec))
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.ctx.registry.clone()
    }

    /// The shared breaker guarding the Reasoner (for health surfaces).
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }

    /// Build the state checker over this service's registry. The caller
    /// owns starting and shutting it down.
    pub fn state_checker(&self) -> StateChecker {
        StateChecker::new(self.ctx.registry.clone(), self.ctx.config.checker.clone())
    }

    /// Accept a demand: creates the session in CREATED and starts its
    /// coordinator task, which waits for `confirm`.
    pub fn submit(&self, demand: Demand) -> SessionId {
        let session =
            NegotiationSession::new(demand, self.ctx.config.rounds.max_rounds);
        let session_id = session.id;
        spawn_session(self.ctx.clone(), session);
        info!(%session_id, "demand submitted");
        session_id
    }

    /// Start the negotiation for a submitted demand.
    pub async fn confirm(&self, session_id: SessionId) -> Result<(), ApiError> {
        self.send(session_id, SessionCommand::Confirm).await
    }

    /// Read-only snapshot, available for active and terminal sessions.
    pub fn get(&self, session_id: SessionId) -> Result<SessionSnapshot, ApiError> {
        self.ctx
            .registry
            .get_snapshot(session_id)
            .ok_or(ApiError::NotFound(session_id))
    }

    /// Cooperative cancellation; the owning task observes it at its next
    /// message-processing step.
    pub async fn cancel(&self, session_id: SessionId) -> Result<(), ApiError> {
        self.send(session_id, SessionCommand::Cancel).await
    }

    /// Transport ingress for an agent response. Duplicate deliveries are
    /// deduplicated by message id inside the session.
    pub async fn deliver_response(
        &self,
        session_id: SessionId,
        response: Response,
    ) -> Result<(), ApiError> {
        self.send(session_id, SessionCommand::Response(response))
            .await
    }

    /// Transport ingress for agent feedback, same semantics as
    /// [`deliver_response`](Self::deliver_response).
    pub async fn deliver_feedback(
        &self,
        session_id: SessionId,
        feedback: Feedback,
    ) -> Result<(), ApiError> {
        self.send(session_id, SessionCommand::Feedback(feedback))
            .await
    }

    async fn send(&self, session_id: SessionId, command: SessionCommand) -> Result<(), ApiError> {
        let Some(handle) = self.ctx.registry.handle(session_id) else {
            // Distinguish "finished" from "never existed".
            return match self.ctx.registry.get_snapshot(session_id) {
                Some(snapshot) => Err(ApiError::TerminalSession {
                    id: session_id,
                    status: snapshot.status,
                }),
                None => Err(ApiError::NotFound(session_id)),
            };
        };
        handle
            .send(command)
            .await
            .map_err(|_| ApiError::Closed(session_id))
    }
}
