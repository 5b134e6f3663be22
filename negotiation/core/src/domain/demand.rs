// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Demand - the immutable need a requester broadcasts
//
// A Demand is created on submission and never mutated afterwards. Keyword
// sets are opaque values supplied alongside the demand by the upstream
// extraction layer; the core never derives them from raw text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Unique identifier for a Demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DemandId(pub Uuid);

impl DemandId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DemandId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DemandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A need broadcast by a requester. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Demand {
    pub id: DemandId,
    pub requester_id: String,
    pub raw_text: String,
    pub capability_tags: Vec<String>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    /// Opaque keyword set supplied by the extraction layer
    pub keywords: KeywordSet,
    pub created_at: DateTime<Utc>,
}

impl Demand {
    pub fn new(
        requester_id: impl Into<String>,
        raw_text: impl Into<String>,
        capability_tags: Vec<String>,
        keywords: KeywordSet,
    ) -> Self {
        Self {
            id: DemandId::new(),
            requester_id: requester_id.into(),
            raw_text: raw_text.into(),
            capability_tags,
            context: HashMap::new(),
            keywords,
            created_at: Utc::now(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

/// An opaque set of normalized keyword terms.
///
/// Normalization (lowercase, trimmed) happens on insertion so that set
/// intersection and the bloom gate agree on term identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordSet {
    terms: BTreeSet<String>,
}

impl KeywordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_terms<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        for term in terms {
            set.insert(term.as_ref());
        }
        set
    }

    pub fn insert(&mut self, term: &str) {
        let normalized = term.trim().to_lowercase();
        if !normalized.is_empty() {
            self.terms.insert(normalized);
        }
    }

    pub fn contains(&self, term: &str) -> bool {
        self.terms.contains(&term.trim().to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|s| s.as_str())
    }

    /// Build the coarse membership gate for this set.
    pub fn bloom(&self) -> KeywordBloom {
        let mut bloom = KeywordBloom::default();
        for term in &self.terms {
            bloom.insert(term);
        }
        bloom
    }
}

/// Number of 64-bit words in the bloom bit array (256 bits total).
const BLOOM_WORDS: usize = 4;
/// Hash functions per term.
const BLOOM_HASHES: usize = 3;

/// Coarse membership gate over a keyword set.
///
/// False positives are acceptable; a term that was inserted always tests
/// positive, so a member with true keyword overlap can never be dropped by
/// the gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordBloom {
    bits: [u64; BLOOM_WORDS],
}

impl KeywordBloom {
    pub fn insert(&mut self, term: &str) {
        for pos in Self::bit_positions(term) {
            self.bits[pos / 64] |= 1u64 << (pos % 64);
        }
    }

    pub fn might_contain(&self, term: &str) -> bool {
        Self::bit_positions(term)
            .iter()
            .all(|pos| self.bits[pos / 64] & (1u64 << (pos % 64)) != 0)
    }

    /// True when any term of `keywords` might be a member.
    pub fn might_contain_any(&self, keywords: &KeywordSet) -> bool {
        keywords.iter().any(|term| self.might_contain(term))
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|word| *word == 0)
    }

    fn bit_positions(term: &str) -> [usize; BLOOM_HASHES] {
        let digest = Sha256::digest(term.as_bytes());
        let mut positions = [0usize; BLOOM_HASHES];
        for (i, chunk) in digest.chunks(8).take(BLOOM_HASHES).enumerate() {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            positions[i] = (u64::from_be_bytes(buf) % (BLOOM_WORDS as u64 * 64)) as usize;
        }
        positions
    }
}
