// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Circuit breaker around the Reasoner dependency
//!
//! One breaker guards the one Reasoner the whole process shares; it must
//! tolerate concurrent callers. State lives in an atomic register with the
//! failure counter next to it; the open-timer sits behind a mutex because
//! it is touched only on state changes, never on the hot path.
//!
//! `CLOSED`: calls pass through, consecutive failures count up, the
//! threshold opens the breaker. `OPEN`: calls are not attempted and the
//! per-operation deterministic fallback is served; once the recovery
//! timeout elapses exactly one caller wins the CAS into `HALF_OPEN` and
//! probes. `HALF_OPEN`: the probe's success closes the breaker and resets
//! the counter; its failure reopens and restarts the timer.

use crate::domain::agent::{AgentPool, AgentProfile};
use crate::domain::config::BreakerConfig;
use crate::domain::demand::Demand;
use crate::domain::message::{Feedback, FeedbackType, Response};
use crate::domain::proposal::{Assignment, Gap, Proposal};
use crate::domain::reasoner::{CandidateScore, GapAssessment, Reasoner, ReasonerError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
            config,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Whether this caller may attempt a call right now.
    ///
    /// While open, the first caller past the recovery timeout wins the
    /// CAS into half-open and becomes the single probe; everyone else
    /// keeps getting fallbacks until the probe reports.
    pub fn try_acquire(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let elapsed = match *self.opened_at.lock() {
                    Some(at) => at.elapsed() >= self.config.recovery_timeout,
                    None => true,
                };
                if !elapsed {
                    return false;
                }
                self.state
                    .compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok()
            }
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        let previous = self
            .state
            .swap(CircuitState::Closed as u8, Ordering::SeqCst);
        if CircuitState::from(previous) != CircuitState::Closed {
            *self.opened_at.lock() = None;
            debug!("circuit breaker closed");
        }
    }

    pub fn record_failure(&self) {
        match self.state() {
            CircuitState::HalfOpen => self.open(),
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    self.open();
                }
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self) {
        *self.opened_at.lock() = Some(Instant::now());
        self.state.store(CircuitState::Open as u8, Ordering::SeqCst);
        warn!(
            failure_threshold = self.config.failure_threshold,
            "circuit breaker opened"
        );
    }
}

/// Reasoner decorator: every operation runs through the shared breaker
/// with a per-call timeout, and failure of any kind resolves to that
/// operation's deterministic fallback instead of propagating.
pub struct GuardedReasoner {
    inner: Arc<dyn Reasoner>,
    breaker: Arc<CircuitBreaker>,
    config: BreakerConfig,
}

impl GuardedReasoner {
    pub fn new(inner: Arc<dyn Reasoner>, config: BreakerConfig) -> Self {
        Self {
            inner,
            breaker: Arc::new(CircuitBreaker::new(config.clone())),
            config,
        }
    }

    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.breaker.clone()
    }

    async fn guarded<T, Fut>(&self, operation: &'static str, call: Fut, fallback: T) -> T
    where
        Fut: Future<Output = Result<T, ReasonerError>>,
    {
        if !self.breaker.try_acquire() {
            debug!(operation, "circuit open, serving fallback");
            return fallback;
        }
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(Ok(value)) => {
                self.breaker.record_success();
                value
            }
            Ok(Err(error)) => {
                warn!(operation, %error, "reasoner call failed, serving fallback");
                self.breaker.record_failure();
                fallback
            }
            Err(_) => {
                warn!(operation, "reasoner call timed out, serving fallback");
                self.breaker.record_failure();
                fallback
            }
        }
    }

    /// Deterministic stand-in for a missing aggregation: every
    /// participating response keeps its contribution, unconfirmed, at
    /// zero confidence. Version is stamped by the coordinator.
    pub fn fallback_proposal(responses: &[Response]) -> Proposal {
        let assignments = responses
            .iter()
            .filter(|r| r.is_participating())
            .map(|r| Assignment {
                agent_id: r.agent_id,
                role: "participant".to_string(),
                responsibility: r.contribution.clone(),
                is_confirmed: false,
            })
            .collect();
        Proposal::new(0, assignments, 0.0)
    }
}

#[async_trait]
impl Reasoner for GuardedReasoner {
    async fn filter(
        &self,
        demand: &Demand,
        pool: &AgentPool,
    ) -> Result<Vec<CandidateScore>, ReasonerError> {
        Ok(self
            .guarded("filter", self.inner.filter(demand, pool), Vec::new())
            .await)
    }

    async fn generate_offer(
        &self,
        demand: &Demand,
        profile: &AgentProfile,
    ) -> Result<Response, ReasonerError> {
        let fallback = Response::decline(profile.agent_id);
        Ok(self
            .guarded(
                "generate_offer",
                self.inner.generate_offer(demand, profile),
                fallback,
            )
            .await)
    }

    async fn aggregate(
        &self,
        demand: &Demand,
        responses: &[Response],
    ) -> Result<Proposal, ReasonerError> {
        let fallback = Self::fallback_proposal(responses);
        Ok(self
            .guarded("aggregate", self.inner.aggregate(demand, responses), fallback)
            .await)
    }

    async fn evaluate_proposal(
        &self,
        proposal: &Proposal,
        profile: &AgentProfile,
    ) -> Result<Feedback, ReasonerError> {
        // Negotiate, not accept: a down reasoner must never fabricate
        // consensus.
        let fallback = Feedback::new(profile.agent_id, FeedbackType::Negotiate);
        Ok(self
            .guarded(
                "evaluate_proposal",
                self.inner.evaluate_proposal(proposal, profile),
                fallback,
            )
            .await)
    }

    async fn identify_gaps(
        &self,
        demand: &Demand,
        proposal: &Proposal,
        feedbacks: &[Feedback],
    ) -> Result<Vec<Gap>, ReasonerError> {
        Ok(self
            .guarded(
                "identify_gaps",
                self.inner.identify_gaps(demand, proposal, feedbacks),
                Vec::new(),
            )
            .await)
    }

    async fn assess_gap(
        &self,
        demand: &Demand,
        gap: &Gap,
    ) -> Result<GapAssessment, ReasonerError> {
        // All-zero signals decline recursion.
        Ok(self
            .guarded(
                "assess_gap",
                self.inner.assess_gap(demand, gap),
                GapAssessment::default(),
            )
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::demand::KeywordSet;
    use crate::domain::message::ParticipationDecision;
    use std::time::Duration;

    struct FlakyReasoner {
        fail: std::sync::atomic::AtomicBool,
    }

    impl FlakyReasoner {
        fn failing() -> Self {
            Self {
                fail: std::sync::atomic::AtomicBool::new(true),
            }
        }

        fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn result<T>(&self, value: T) -> Result<T, ReasonerError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(ReasonerError::Provider("backend down".to_string()))
            } else {
                Ok(value)
            }
        }
    }

    #[async_trait]
    impl Reasoner for FlakyReasoner {
        async fn filter(
            &self,
            _demand: &Demand,
            pool: &AgentPool,
        ) -> Result<Vec<CandidateScore>, ReasonerError> {
            self.result(
                pool.members()
                    .iter()
                    .map(|m| CandidateScore {
                        agent_id: m.agent_id,
                        score: 0.9,
                    })
                    .collect(),
            )
        }

        async fn generate_offer(
            &self,
            _demand: &Demand,
            profile: &AgentProfile,
        ) -> Result<Response, ReasonerError> {
            self.result(Response::offer(profile.agent_id, "real offer"))
        }

        async fn aggregate(
            &self,
            _demand: &Demand,
            _responses: &[Response],
        ) -> Result<Proposal, ReasonerError> {
            self.result(Proposal::new(1, vec![], 0.9))
        }

        async fn evaluate_proposal(
            &self,
            _proposal: &Proposal,
            profile: &AgentProfile,
        ) -> Result<Feedback, ReasonerError> {
            self.result(Feedback::new(profile.agent_id, FeedbackType::Accept))
        }

        async fn identify_gaps(
            &self,
            _demand: &Demand,
            _proposal: &Proposal,
            _feedbacks: &[Feedback],
        ) -> Result<Vec<Gap>, ReasonerError> {
            self.result(vec![Gap::new("gap", "ops", 80)])
        }

        async fn assess_gap(
            &self,
            _demand: &Demand,
            _gap: &Gap,
        ) -> Result<GapAssessment, ReasonerError> {
            self.result(GapAssessment {
                satisfaction_uplift: 0.9,
                stakeholder_support: 0.9,
                cost_benefit: 0.9,
            })
        }
    }

    fn test_demand() -> Demand {
        Demand::new("r", "text", vec![], KeywordSet::from_terms(["a"]))
    }

    fn breaker_config(recovery_ms: u64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            recovery_timeout: Duration::from_millis(recovery_ms),
            call_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_three_consecutive_failures_open_the_breaker() {
        let breaker = CircuitBreaker::new(breaker_config(30_000));
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire());
    }

    #[test]
    fn test_success_resets_the_failure_counter() {
        let breaker = CircuitBreaker::new(breaker_config(30_000));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_single_probe_after_recovery_timeout() {
        let breaker = CircuitBreaker::new(breaker_config(10));
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.try_acquire(), "first caller becomes the probe");
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.try_acquire(), "only one in-flight probe");

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_reopens() {
        let breaker = CircuitBreaker::new(breaker_config(10));
        for _ in 0..3 {
            breaker.record_failure();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(breaker.try_acquire());
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.try_acquire(), "timer restarted");
    }

    #[tokio::test]
    async fn test_guarded_offer_falls_back_to_decline() {
        let inner = Arc::new(FlakyReasoner::failing());
        let guarded = GuardedReasoner::new(inner, breaker_config(30_000));
        let profile = AgentProfile::new("a", KeywordSet::new(), vec![]);

        let offer = guarded
            .generate_offer(&test_demand(), &profile)
            .await
            .unwrap();
        assert_eq!(offer.decision, ParticipationDecision::Decline);
        assert_eq!(offer.agent_id, profile.agent_id);
    }

    #[tokio::test]
    async fn test_guarded_calls_stop_reaching_inner_once_open() {
        let inner = Arc::new(FlakyReasoner::failing());
        let guarded = GuardedReasoner::new(inner.clone(), breaker_config(30_000));
        let profile = AgentProfile::new("a", KeywordSet::new(), vec![]);
        let demand = test_demand();

        for _ in 0..3 {
            let _ = guarded.generate_offer(&demand, &profile).await;
        }
        assert_eq!(guarded.breaker().state(), CircuitState::Open);

        // Inner now healthy, but the open breaker still short-circuits.
        inner.set_failing(false);
        let offer = guarded.generate_offer(&demand, &profile).await.unwrap();
        assert_eq!(offer.decision, ParticipationDecision::Decline);
    }

    #[tokio::test]
    async fn test_fallback_feedback_is_negotiate() {
        let guarded =
            GuardedReasoner::new(Arc::new(FlakyReasoner::failing()), breaker_config(30_000));
        let profile = AgentProfile::new("a", KeywordSet::new(), vec![]);
        let proposal = Proposal::new(1, vec![], 0.5);

        let feedback = guarded
            .evaluate_proposal(&proposal, &profile)
            .await
            .unwrap();
        assert_eq!(feedback.feedback_type, FeedbackType::Negotiate);
    }

    #[tokio::test]
    async fn test_fallback_aggregate_keeps_participating_responses() {
        let guarded =
            GuardedReasoner::new(Arc::new(FlakyReasoner::failing()), breaker_config(30_000));
        let a = crate::domain::agent::AgentId::new();
        let b = crate::domain::agent::AgentId::new();
        let responses = vec![Response::offer(a, "do ingestion"), Response::decline(b)];

        let proposal = guarded.aggregate(&test_demand(), &responses).await.unwrap();
        assert_eq!(proposal.assignments.len(), 1);
        assert_eq!(proposal.assignments[0].agent_id, a);
        assert!(!proposal.assignments[0].is_confirmed);
        assert_eq!(proposal.confidence, 0.0);
    }
}
