// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Agent pool types
//
// The pool (participant registry) is read-only from the negotiation core's
// perspective; no session ever mutates it.

use crate::domain::demand::KeywordSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a pool member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pool member's public profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: AgentId,
    pub name: String,
    /// Opaque keyword set supplied by the registration layer
    pub keywords: KeywordSet,
    pub capability_tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, keywords: KeywordSet, capability_tags: Vec<String>) -> Self {
        Self {
            agent_id: AgentId::new(),
            name: name.into(),
            keywords,
            capability_tags,
            metadata: HashMap::new(),
        }
    }
}

/// Read-only view over the candidate pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPool {
    members: Vec<AgentProfile>,
}

impl AgentPool {
    pub fn new(members: Vec<AgentProfile>) -> Self {
        Self { members }
    }

    pub fn members(&self) -> &[AgentProfile] {
        &self.members
    }

    pub fn get(&self, agent_id: AgentId) -> Option<&AgentProfile> {
        self.members.iter().find(|m| m.agent_id == agent_id)
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }
}

/// A selected participant for one negotiation.
///
/// Produced once per demand by the selector; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub agent_id: AgentId,
    /// Relevance on a 0-100 scale (scorer output scaled up)
    pub relevance_score: u8,
    pub is_fallback: bool,
}

impl Candidate {
    pub fn ranked(agent_id: AgentId, relevance_score: u8) -> Self {
        Self {
            agent_id,
            relevance_score,
            is_fallback: false,
        }
    }

    pub fn fallback(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            relevance_score: 0,
            is_fallback: true,
        }
    }
}
