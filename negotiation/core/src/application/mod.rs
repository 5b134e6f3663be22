// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod checker;
pub mod coordinator;
pub mod evaluator;
pub mod gap_recursion;
pub mod registry;
pub mod selector;
pub mod service;

pub use checker::StateChecker;
pub use coordinator::{Anomaly, SessionCommand, SessionContext, SessionHandle};
pub use evaluator::{Decision, FeedbackTally, ThresholdEvaluator};
pub use gap_recursion::GapRecursionManager;
pub use registry::SessionRegistry;
pub use selector::{CandidateSelector, Selection};
pub use service::{ApiError, NegotiationService};
