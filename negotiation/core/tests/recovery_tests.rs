// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Failure-containment flows: duplicate delivery, cancellation,
//! checker-driven recovery with its attempt bound, and circuit-breaker
//! containment of a dead Reasoner.

use async_trait::async_trait;
use concord_negotiation_core::application::NegotiationService;
use concord_negotiation_core::domain::{
    AgentId, AgentPool, AgentProfile, Assignment, CandidateScore, CheckerConfig, Demand, Feedback,
    FeedbackType, Gap, GapAssessment, KeywordSet, NegotiationConfig, Proposal, Reasoner,
    ReasonerError, Response, SessionId, SessionSnapshot, SessionStatus,
};
use concord_negotiation_core::infrastructure::{CircuitState, KeywordOverlapScorer};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Reasoner where chosen agents hang forever on offers, and feedback can
/// hang wholesale; everything else answers instantly.
struct SlowReasoner {
    hanging_offers: HashSet<AgentId>,
    hang_feedback: bool,
    feedback_plan: HashMap<AgentId, FeedbackType>,
}

impl SlowReasoner {
    fn responsive() -> Self {
        Self {
            hanging_offers: HashSet::new(),
            hang_feedback: false,
            feedback_plan: HashMap::new(),
        }
    }
}

#[async_trait]
impl Reasoner for SlowReasoner {
    async fn filter(
        &self,
        _demand: &Demand,
        pool: &AgentPool,
    ) -> Result<Vec<CandidateScore>, ReasonerError> {
        Ok(pool
            .members()
            .iter()
            .map(|m| CandidateScore {
                agent_id: m.agent_id,
                score: 0.9,
            })
            .collect())
    }

    async fn generate_offer(
        &self,
        _demand: &Demand,
        profile: &AgentProfile,
    ) -> Result<Response, ReasonerError> {
        if self.hanging_offers.contains(&profile.agent_id) {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
        Ok(Response::offer(profile.agent_id, "quick offer"))
    }

    async fn aggregate(
        &self,
        _demand: &Demand,
        responses: &[Response],
    ) -> Result<Proposal, ReasonerError> {
        let assignments = responses
            .iter()
            .filter(|r| r.is_participating())
            .map(|r| Assignment {
                agent_id: r.agent_id,
                role: "participant".to_string(),
                responsibility: r.contribution.clone(),
                is_confirmed: true,
            })
            .collect();
        Ok(Proposal::new(0, assignments, 0.8))
    }

    async fn evaluate_proposal(
        &self,
        _proposal: &Proposal,
        profile: &AgentProfile,
    ) -> Result<Feedback, ReasonerError> {
        if self.hang_feedback {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
        let feedback_type = self
            .feedback_plan
            .get(&profile.agent_id)
            .copied()
            .unwrap_or(FeedbackType::Accept);
        Ok(Feedback::new(profile.agent_id, feedback_type))
    }

    async fn identify_gaps(
        &self,
        _demand: &Demand,
        _proposal: &Proposal,
        _feedbacks: &[Feedback],
    ) -> Result<Vec<Gap>, ReasonerError> {
        Ok(vec![])
    }

    async fn assess_gap(
        &self,
        _demand: &Demand,
        _gap: &Gap,
    ) -> Result<GapAssessment, ReasonerError> {
        Ok(GapAssessment::default())
    }
}

/// Reasoner whose backend is down for good.
struct DeadReasoner;

#[async_trait]
impl Reasoner for DeadReasoner {
    async fn filter(
        &self,
        _demand: &Demand,
        _pool: &AgentPool,
    ) -> Result<Vec<CandidateScore>, ReasonerError> {
        Err(ReasonerError::Provider("backend unreachable".to_string()))
    }

    async fn generate_offer(
        &self,
        _demand: &Demand,
        _profile: &AgentProfile,
    ) -> Result<Response, ReasonerError> {
        Err(ReasonerError::Provider("backend unreachable".to_string()))
    }

    async fn aggregate(
        &self,
        _demand: &Demand,
        _responses: &[Response],
    ) -> Result<Proposal, ReasonerError> {
        Err(ReasonerError::Provider("backend unreachable".to_string()))
    }

    async fn evaluate_proposal(
        &self,
        _proposal: &Proposal,
        _profile: &AgentProfile,
    ) -> Result<Feedback, ReasonerError> {
        Err(ReasonerError::Provider("backend unreachable".to_string()))
    }

    async fn identify_gaps(
        &self,
        _demand: &Demand,
        _proposal: &Proposal,
        _feedbacks: &[Feedback],
    ) -> Result<Vec<Gap>, ReasonerError> {
        Err(ReasonerError::Provider("backend unreachable".to_string()))
    }

    async fn assess_gap(
        &self,
        _demand: &Demand,
        _gap: &Gap,
    ) -> Result<GapAssessment, ReasonerError> {
        Err(ReasonerError::Provider("backend unreachable".to_string()))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn pool_of(count: usize) -> (AgentPool, Vec<AgentId>) {
    let members: Vec<AgentProfile> = (0..count)
        .map(|i| {
            AgentProfile::new(
                format!("agent-{i}"),
                KeywordSet::from_terms(["logistics", "routing"]),
                vec!["logistics".to_string()],
            )
        })
        .collect();
    let ids = members.iter().map(|m| m.agent_id).collect();
    (AgentPool::new(members), ids)
}

fn logistics_demand() -> Demand {
    Demand::new(
        "requester-1",
        "coordinate a delivery network",
        vec!["logistics".to_string()],
        KeywordSet::from_terms(["logistics"]),
    )
}

fn service_with(
    reasoner: impl Reasoner + 'static,
    pool: AgentPool,
    config: NegotiationConfig,
) -> NegotiationService {
    NegotiationService::new(
        Arc::new(reasoner),
        Arc::new(KeywordOverlapScorer),
        pool,
        config,
    )
}

async fn wait_terminal(service: &NegotiationService, session_id: SessionId) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(snapshot) = service.get(session_id) {
                if snapshot.status.is_terminal() {
                    return snapshot;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session did not reach a terminal state in time")
}

async fn wait_status(
    service: &NegotiationService,
    session_id: SessionId,
    status: SessionStatus,
) {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(snapshot) = service.get(session_id) {
                if snapshot.status == status {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached {status}"));
}

/// Checker tuned tight enough for tests: stuck after 150ms, checked
/// every 50ms.
fn impatient_checker() -> CheckerConfig {
    CheckerConfig {
        enabled: true,
        check_interval: Duration::from_millis(50),
        max_stuck_time: Duration::from_millis(150),
        max_recovery_attempts: 3,
    }
}

#[tokio::test]
async fn duplicate_response_delivery_is_idempotent() {
    init_tracing();
    let (pool, ids) = pool_of(2);
    // Every internal offer hangs: responses only arrive through the
    // transport ingress below.
    let reasoner = SlowReasoner {
        hanging_offers: ids.iter().copied().collect(),
        hang_feedback: false,
        feedback_plan: HashMap::new(),
    };
    let mut config = NegotiationConfig::default();
    config.rounds.collection_timeout = Duration::from_millis(500);
    config.rounds.feedback_timeout = Duration::from_secs(5);
    config.rounds.agent_timeout = Duration::from_secs(60);

    let service = service_with(reasoner, pool, config);
    let session_id = service.submit(logistics_demand());
    service.confirm(session_id).await.unwrap();

    let response = Response::offer(ids[0], "external offer");
    service
        .deliver_response(session_id, response.clone())
        .await
        .unwrap();
    service
        .deliver_response(session_id, response)
        .await
        .unwrap();

    let snapshot = wait_terminal(&service, session_id).await;
    assert_eq!(snapshot.status, SessionStatus::Finalized);
    assert_eq!(
        snapshot.responses_this_round, 1,
        "same message id processed once"
    );
    let proposal = snapshot.current_proposal.expect("no proposal");
    assert_eq!(proposal.assignments.len(), 1);
    assert_eq!(proposal.assignments[0].agent_id, ids[0]);
}

#[tokio::test]
async fn cancellation_fails_the_session_cooperatively() {
    let (pool, ids) = pool_of(2);
    let reasoner = SlowReasoner {
        hanging_offers: ids.iter().copied().collect(),
        hang_feedback: false,
        feedback_plan: HashMap::new(),
    };
    let mut config = NegotiationConfig::default();
    config.rounds.collection_timeout = Duration::from_secs(60);
    config.rounds.agent_timeout = Duration::from_secs(60);

    let service = service_with(reasoner, pool, config);
    let session_id = service.submit(logistics_demand());
    service.confirm(session_id).await.unwrap();
    wait_status(&service, session_id, SessionStatus::Collecting).await;

    service.cancel(session_id).await.unwrap();
    let snapshot = wait_terminal(&service, session_id).await;
    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert_eq!(snapshot.failure_reason.map(|r| r.as_str()), Some("cancelled"));
}

#[tokio::test]
async fn stuck_feedback_is_recovered_once_and_reevaluated() {
    init_tracing();
    let (pool, _ids) = pool_of(3);
    let reasoner = SlowReasoner {
        hanging_offers: HashSet::new(),
        hang_feedback: true,
        feedback_plan: HashMap::new(),
    };
    let mut config = NegotiationConfig::default();
    config.rounds.collection_timeout = Duration::from_secs(60);
    config.rounds.feedback_timeout = Duration::from_secs(60);
    config.rounds.agent_timeout = Duration::from_secs(60);
    config.checker = impatient_checker();

    let service = service_with(reasoner, pool, config);
    let checker = Arc::new(service.state_checker());
    let checker_task = checker.clone().start();

    let session_id = service.submit(logistics_demand());
    service.confirm(session_id).await.unwrap();

    // Recovery closes the feedback barrier; evaluating the (empty)
    // feedback fails the round on low acceptance instead of hanging
    // until the 60s barrier timeout.
    let snapshot = wait_terminal(&service, session_id).await;
    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert_eq!(
        snapshot.failure_reason.map(|r| r.as_str()),
        Some("low_acceptance")
    );
    assert_eq!(snapshot.recovery_attempts, 1);

    checker.shutdown_token().cancel();
    let _ = checker_task.await;
}

#[tokio::test]
async fn recovery_attempts_are_bounded_at_three() {
    init_tracing();
    let (pool, ids) = pool_of(5);
    // Two agents never answer invitations; the other three keep the
    // session in the middle band (2 accept, 1 negotiate) so every round
    // stalls in collection and needs the checker.
    let mut feedback_plan: HashMap<AgentId, FeedbackType> = HashMap::new();
    feedback_plan.insert(ids[0], FeedbackType::Accept);
    feedback_plan.insert(ids[1], FeedbackType::Accept);
    feedback_plan.insert(ids[2], FeedbackType::Negotiate);
    let reasoner = SlowReasoner {
        hanging_offers: [ids[3], ids[4]].into_iter().collect(),
        hang_feedback: false,
        feedback_plan,
    };
    let mut config = NegotiationConfig::default();
    config.rounds.collection_timeout = Duration::from_secs(60);
    config.rounds.feedback_timeout = Duration::from_secs(5);
    config.rounds.agent_timeout = Duration::from_secs(60);
    config.checker = impatient_checker();

    let service = service_with(reasoner, pool, config);
    let checker = Arc::new(service.state_checker());
    let checker_task = checker.clone().start();

    let session_id = service.submit(logistics_demand());
    service.confirm(session_id).await.unwrap();

    let snapshot = wait_terminal(&service, session_id).await;
    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert_eq!(
        snapshot.failure_reason.map(|r| r.as_str()),
        Some("max_recovery_attempts")
    );
    assert_eq!(snapshot.recovery_attempts, 3);
    assert!(
        snapshot.round <= snapshot.max_rounds,
        "round cap holds through recovery"
    );

    checker.shutdown_token().cancel();
    let _ = checker_task.await;
}

#[tokio::test]
async fn dead_reasoner_is_contained_by_the_breaker() {
    let (pool, _ids) = pool_of(3);
    let mut config = NegotiationConfig::default();
    config.rounds.collection_timeout = Duration::from_secs(5);
    config.rounds.feedback_timeout = Duration::from_secs(5);
    config.rounds.agent_timeout = Duration::from_secs(2);
    config.breaker.call_timeout = Duration::from_secs(1);

    let service = service_with(DeadReasoner, pool, config);
    let session_id = service.submit(logistics_demand());
    service.confirm(session_id).await.unwrap();

    // All offers degrade to declines, so the session fails for lack of
    // participants; the reasoner outage itself never escalates past the
    // breaker.
    let snapshot = wait_terminal(&service, session_id).await;
    assert_eq!(snapshot.status, SessionStatus::Failed);
    assert_eq!(
        snapshot.failure_reason.map(|r| r.as_str()),
        Some("no_participants")
    );
    assert_eq!(service.breaker().state(), CircuitState::Open);
}

#[tokio::test]
async fn external_feedback_ingress_participates_in_the_tally() {
    let (pool, ids) = pool_of(2);
    // Offers answer instantly; feedback hangs so the externally
    // delivered verdicts are the only ones that count.
    let reasoner = SlowReasoner {
        hanging_offers: HashSet::new(),
        hang_feedback: true,
        feedback_plan: HashMap::new(),
    };
    let mut config = NegotiationConfig::default();
    config.rounds.collection_timeout = Duration::from_secs(5);
    config.rounds.feedback_timeout = Duration::from_millis(800);
    config.rounds.agent_timeout = Duration::from_secs(60);

    let service = service_with(reasoner, pool, config);
    let session_id = service.submit(logistics_demand());
    service.confirm(session_id).await.unwrap();
    wait_status(&service, session_id, SessionStatus::Negotiating).await;

    for id in &ids {
        service
            .deliver_feedback(session_id, Feedback::new(*id, FeedbackType::Accept))
            .await
            .unwrap();
    }

    let snapshot = wait_terminal(&service, session_id).await;
    assert_eq!(snapshot.status, SessionStatus::Finalized);
    assert_eq!(snapshot.feedback_this_round, 2);
}

#[tokio::test]
async fn responsive_sessions_are_never_flagged_by_the_checker() {
    let (pool, _ids) = pool_of(3);
    let mut config = NegotiationConfig::default();
    config.rounds.collection_timeout = Duration::from_secs(5);
    config.rounds.feedback_timeout = Duration::from_secs(5);
    config.rounds.agent_timeout = Duration::from_secs(2);
    config.checker = impatient_checker();

    let service = service_with(SlowReasoner::responsive(), pool, config);
    let checker = Arc::new(service.state_checker());
    let checker_task = checker.clone().start();

    let session_id = service.submit(logistics_demand());
    service.confirm(session_id).await.unwrap();

    let snapshot = wait_terminal(&service, session_id).await;
    assert_eq!(snapshot.status, SessionStatus::Finalized);
    assert_eq!(snapshot.recovery_attempts, 0);

    checker.shutdown_token().cancel();
    let _ = checker_task.await;
}
