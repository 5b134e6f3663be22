// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! State Checker - background task for stuck-session recovery
//!
//! Iterates all active sessions on a fixed interval and requests
//! recovery from the owning coordinator when a session sits in
//! `COLLECTING` or `NEGOTIATING` with no progress past the stuck window.
//! The checker never mutates session fields; it only classifies the
//! anomaly and enqueues a `Recover` command. Attempt counting and the
//! forced failure at the bound live in the coordinator.

use crate::application::coordinator::{Anomaly, SessionCommand};
use crate::application::registry::SessionRegistry;
use crate::domain::config::CheckerConfig;
use crate::domain::session::{SessionId, SessionSnapshot, SessionStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

pub struct StateChecker {
    registry: Arc<SessionRegistry>,
    config: CheckerConfig,
    /// Last recovery request per session, so one stuck window produces
    /// one request instead of one per tick
    requested: Mutex<HashMap<SessionId, Instant>>,
    shutdown_token: tokio_util::sync::CancellationToken,
}

impl StateChecker {
    pub fn new(registry: Arc<SessionRegistry>, config: CheckerConfig) -> Self {
        Self {
            registry,
            config,
            requested: Mutex::new(HashMap::new()),
            shutdown_token: tokio_util::sync::CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> tokio_util::sync::CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the checker background task.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        if !self.config.enabled {
            info!("state checker is disabled");
            return;
        }

        info!(
            check_interval = ?self.config.check_interval,
            max_stuck_time = ?self.config.max_stuck_time,
            "starting state checker background task"
        );

        let mut tick = interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let recoveries = self.check_cycle().await;
                    if recoveries > 0 {
                        debug!(recoveries, "state checker cycle requested recoveries");
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("shutdown signal received, stopping state checker");
                    break;
                }
            }
        }
    }

    /// One pass over all active sessions. Returns the number of
    /// recovery requests sent.
    pub async fn check_cycle(&self) -> usize {
        let now = Instant::now();
        let mut requested = 0usize;

        for snapshot in self.registry.active_snapshots() {
            let Some(anomaly) = self.classify(&snapshot) else {
                continue;
            };
            if !self.should_request(snapshot.id, now) {
                continue;
            }
            let Some(handle) = self.registry.handle(snapshot.id) else {
                continue;
            };
            warn!(
                session_id = %snapshot.id,
                status = %snapshot.status,
                anomaly = %anomaly,
                recovery_attempts = snapshot.recovery_attempts,
                "requesting session recovery"
            );
            if handle.send(SessionCommand::Recover(anomaly)).await.is_ok() {
                requested += 1;
            }
        }

        // Drop bookkeeping for sessions that have since retired.
        self.requested
            .lock()
            .retain(|id, _| self.registry.handle(*id).is_some());

        requested
    }

    /// Stuck-state classification. Only `COLLECTING` and `NEGOTIATING`
    /// can be stuck; everything else either progresses on its own or is
    /// terminal.
    fn classify(&self, snapshot: &SessionSnapshot) -> Option<Anomaly> {
        let stalled = self.stalled_for(snapshot)?;
        if stalled <= self.config.max_stuck_time {
            return None;
        }
        let anomaly = if stalled > self.config.max_stuck_time * 2 {
            Anomaly::Timeout
        } else {
            match snapshot.status {
                SessionStatus::Collecting if snapshot.responses_this_round == 0 => {
                    Anomaly::MissingResponses
                }
                SessionStatus::Collecting => Anomaly::StuckInCollecting,
                SessionStatus::Negotiating => Anomaly::StuckInNegotiating,
                _ => return None,
            }
        };
        Some(anomaly)
    }

    fn stalled_for(&self, snapshot: &SessionSnapshot) -> Option<Duration> {
        match snapshot.status {
            SessionStatus::Collecting | SessionStatus::Negotiating => {
                let age = chrono::Utc::now() - snapshot.last_updated_at;
                age.to_std().ok()
            }
            _ => None,
        }
    }

    /// One request per stuck window per session.
    fn should_request(&self, session_id: SessionId, now: Instant) -> bool {
        let mut requested = self.requested.lock();
        if let Some(last) = requested.get(&session_id) {
            if now.duration_since(*last) < self.config.max_stuck_time {
                return false;
            }
        }
        requested.insert(session_id, now);
        true
    }
}
