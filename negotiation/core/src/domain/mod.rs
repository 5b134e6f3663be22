// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent;
pub mod config;
pub mod demand;
pub mod events;
pub mod message;
pub mod proposal;
pub mod reasoner;
pub mod scorer;
pub mod session;

pub use agent::*;
pub use config::*;
pub use demand::*;
pub use events::*;
pub use message::*;
pub use proposal::*;
pub use reasoner::*;
pub use scorer::*;
pub use session::*;
