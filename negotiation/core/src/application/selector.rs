// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Candidate-selection funnel
//!
//! Three stages: a coarse Bloom-style membership gate (no false negatives
//! for true keyword overlap), a similarity ranking over the survivors, and
//! a top-K window, backed by a uniform-random fallback draw so the
//! selector never returns an empty list for a non-empty pool. The empty
//! pool is the one legitimate empty result and is surfaced to the caller
//! as a terminate-early signal.

use crate::domain::agent::{AgentPool, Candidate};
use crate::domain::config::SelectorConfig;
use crate::domain::demand::Demand;
use crate::domain::scorer::SimilarityScorer;
use futures::future::join_all;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{debug, warn};

/// Selector output: the candidate window plus whether the random
/// fallback draw was needed.
#[derive(Debug, Clone)]
pub struct Selection {
    pub candidates: Vec<Candidate>,
    pub used_fallback: bool,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

pub struct CandidateSelector {
    scorer: Arc<dyn SimilarityScorer>,
    config: SelectorConfig,
}

impl CandidateSelector {
    pub fn new(scorer: Arc<dyn SimilarityScorer>, config: SelectorConfig) -> Self {
        Self { scorer, config }
    }

    /// Select up to `max_candidates` members for a demand.
    ///
    /// Postcondition: the result is non-empty whenever the pool is.
    pub async fn select(&self, demand: &Demand, pool: &AgentPool) -> Selection {
        if pool.is_empty() {
            return Selection {
                candidates: Vec::new(),
                used_fallback: false,
            };
        }

        // Coarse gate: any keyword intersection might exist. A member
        // with true overlap always passes; false positives are fine, the
        // ranking stage sorts them out.
        let survivors: Vec<_> = pool
            .members()
            .iter()
            .filter(|member| member.keywords.bloom().might_contain_any(&demand.keywords))
            .collect();
        debug!(
            pool = pool.len(),
            survivors = survivors.len(),
            "keyword gate applied"
        );

        let mut ranked: Vec<Candidate> = join_all(survivors.iter().map(|member| async move {
            let score = match self.scorer.score(demand, member).await {
                Ok(score) => score.clamp(0.0, 1.0),
                Err(error) => {
                    warn!(agent_id = %member.agent_id, %error, "scoring failed, treating as zero relevance");
                    0.0
                }
            };
            Candidate::ranked(member.agent_id, (score * 100.0).round() as u8)
        }))
        .await;

        // Stable sort: ties keep insertion (pool) order.
        ranked.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
        ranked.truncate(self.config.max_candidates);

        if !ranked.is_empty() {
            return Selection {
                candidates: ranked,
                used_fallback: false,
            };
        }

        // Guarantee: draw F members uniformly at random from the full
        // pool rather than returning nothing.
        let draw = self.config.fallback_candidates.min(pool.len());
        let mut rng = rand::thread_rng();
        let fallback: Vec<Candidate> = pool
            .members()
            .choose_multiple(&mut rng, draw)
            .map(|member| Candidate::fallback(member.agent_id))
            .collect();
        warn!(
            drawn = fallback.len(),
            "selection funnel came up empty, using random fallback"
        );
        Selection {
            candidates: fallback,
            used_fallback: true,
        }
    }
}
