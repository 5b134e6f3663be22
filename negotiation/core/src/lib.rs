// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! CONCORD negotiation core
//!
//! Coordinates multi-party negotiations: a requester submits a demand, a
//! bounded candidate set is selected by similarity scoring, candidates
//! respond independently, and a moderator aggregates responses into a
//! proposal that runs through bounded feedback rounds until consensus,
//! forced closure, or failure.
//!
//! # Architecture
//!
//! - **domain**: entities, value objects, collaborator traits, events
//! - **application**: selector, round coordinator, threshold evaluator,
//!   state checker, gap recursion, session API
//! - **infrastructure**: circuit breaker, event bus, scoring adapters

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
