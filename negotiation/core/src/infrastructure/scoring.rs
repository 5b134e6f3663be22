// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Similarity adapters
//
// Two implementations of the scorer port: a deterministic keyword-overlap
// scorer (default for deployments without an embedding collaborator, and
// the test double), and a bridge that consults the Reasoner's filter
// operation so scoring rides through the circuit breaker like every
// other reasoner call.

use crate::domain::agent::{AgentPool, AgentProfile};
use crate::domain::demand::Demand;
use crate::domain::reasoner::Reasoner;
use crate::domain::scorer::{ScorerError, SimilarityScorer};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordOverlapScorer;

impl KeywordOverlapScorer {
    fn terms(keywords: impl Iterator<Item = String>, tags: &[String]) -> BTreeSet<String> {
        keywords
            .chain(tags.iter().map(|t| t.trim().to_lowercase()))
            .filter(|t| !t.is_empty())
            .collect()
    }
}

#[async_trait]
impl SimilarityScorer for KeywordOverlapScorer {
    async fn score(&self, demand: &Demand, profile: &AgentProfile) -> Result<f64, ScorerError> {
        let demand_terms = Self::terms(
            demand.keywords.iter().map(str::to_string),
            &demand.capability_tags,
        );
        let member_terms = Self::terms(
            profile.keywords.iter().map(str::to_string),
            &profile.capability_tags,
        );
        if demand_terms.is_empty() || member_terms.is_empty() {
            return Ok(0.0);
        }
        let intersection = demand_terms.intersection(&member_terms).count() as f64;
        let union = demand_terms.union(&member_terms).count() as f64;
        Ok(intersection / union)
    }
}

/// Scorer backed by the Reasoner's filter operation.
///
/// The selector stays in charge of gating and fallback; this adapter only
/// turns per-member consultation into the reasoner's batch contract. An
/// open breaker yields an empty score list, which reads as zero relevance
/// and lets the selector's own fallback draw take over.
pub struct ReasonerScorer {
    reasoner: Arc<dyn Reasoner>,
}

impl ReasonerScorer {
    pub fn new(reasoner: Arc<dyn Reasoner>) -> Self {
        Self { reasoner }
    }
}

#[async_trait]
impl SimilarityScorer for ReasonerScorer {
    async fn score(&self, demand: &Demand, profile: &AgentProfile) -> Result<f64, ScorerError> {
        let scores = self
            .reasoner
            .filter(demand, &AgentPool::new(vec![profile.clone()]))
            .await
            .map_err(|e| ScorerError::Unavailable(e.to_string()))?;
        Ok(scores
            .iter()
            .find(|s| s.agent_id == profile.agent_id)
            .map(|s| s.score.clamp(0.0, 1.0))
            .unwrap_or(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::demand::KeywordSet;

    fn demand_with(terms: &[&str]) -> Demand {
        Demand::new("r", "text", vec![], KeywordSet::from_terms(terms.iter().copied()))
    }

    #[test]
    fn test_identical_terms_score_one() {
        let demand = demand_with(&["etl", "pipeline"]);
        let profile = AgentProfile::new("a", KeywordSet::from_terms(["etl", "pipeline"]), vec![]);
        let score =
            tokio_test::block_on(KeywordOverlapScorer.score(&demand, &profile)).unwrap();
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_disjoint_terms_score_zero() {
        let demand = demand_with(&["etl"]);
        let profile = AgentProfile::new("a", KeywordSet::from_terms(["frontend"]), vec![]);
        let score =
            tokio_test::block_on(KeywordOverlapScorer.score(&demand, &profile)).unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_partial_overlap_is_between() {
        let demand = demand_with(&["etl", "pipeline"]);
        let profile = AgentProfile::new("a", KeywordSet::from_terms(["etl", "warehouse"]), vec![]);
        let score =
            tokio_test::block_on(KeywordOverlapScorer.score(&demand, &profile)).unwrap();
        assert!(score > 0.0 && score < 1.0);
    }

    #[test]
    fn test_capability_tags_count_toward_overlap() {
        let mut demand = demand_with(&[]);
        demand.capability_tags = vec!["Routing".to_string()];
        let profile = AgentProfile::new("a", KeywordSet::new(), vec!["routing".to_string()]);
        let score =
            tokio_test::block_on(KeywordOverlapScorer.score(&demand, &profile)).unwrap();
        assert_eq!(score, 1.0);
    }

    #[test]
    fn test_reasoner_scorer_bridges_the_filter_operation() {
        use crate::domain::message::{Feedback, Response};
        use crate::domain::proposal::{Gap, Proposal};
        use crate::domain::reasoner::{CandidateScore, GapAssessment, ReasonerError};

        struct HalfScorer;

        #[async_trait]
        impl Reasoner for HalfScorer {
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
                        score: 0.5,
                    })
                    .collect())
            }

            async fn generate_offer(
                &self,
                _demand: &Demand,
                profile: &AgentProfile,
            ) -> Result<Response, ReasonerError> {
                Ok(Response::decline(profile.agent_id))
            }

            async fn aggregate(
                &self,
                _demand: &Demand,
                _responses: &[Response],
            ) -> Result<Proposal, ReasonerError> {
                Ok(Proposal::new(1, vec![], 0.0))
            }

            async fn evaluate_proposal(
                &self,
                _proposal: &Proposal,
                profile: &AgentProfile,
            ) -> Result<Feedback, ReasonerError> {
                Ok(Feedback::new(
                    profile.agent_id,
                    crate::domain::message::FeedbackType::Negotiate,
                ))
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

        let scorer = ReasonerScorer::new(Arc::new(HalfScorer));
        let demand = demand_with(&["etl"]);
        let profile = AgentProfile::new("a", KeywordSet::from_terms(["etl"]), vec![]);
        let score = tokio_test::block_on(scorer.score(&demand, &profile)).unwrap();
        assert_eq!(score, 0.5);
    }
}
