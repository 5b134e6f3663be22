// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for negotiation events
//
// In-memory event streaming over tokio broadcast channels, feeding
// Transport (SSE, CLI) and Store consumers. Delivery is at-least-once for
// live subscribers; per-session ordering holds because each session's
// events are published by its single coordinator task.

use crate::domain::events::SessionEvent;
use crate::domain::session::SessionId;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to negotiation events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<SessionEvent>>,
}

impl EventBus {
    /// Create a new event bus; `capacity` bounds how many events are
    /// buffered before slow subscribers start lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: SessionEvent) {
        debug!(negotiation_id = %event.negotiation_id, "publishing event");
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("no subscribers listening to event");
        }
    }

    /// Subscribe to the whole stream.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to one session's events only.
    pub fn subscribe_session(&self, negotiation_id: SessionId) -> SessionEventReceiver {
        SessionEventReceiver {
            receiver: self.sender.subscribe(),
            negotiation_id,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all negotiation events
pub struct EventReceiver {
    receiver: broadcast::Receiver<SessionEvent>,
}

impl EventReceiver {
    pub async fn recv(&mut self) -> Result<SessionEvent, EventBusError> {
        self.receiver.recv().await.map_err(EventBusError::from_recv)
    }

    pub fn try_recv(&mut self) -> Result<SessionEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Receiver filtered to a single session
pub struct SessionEventReceiver {
    receiver: broadcast::Receiver<SessionEvent>,
    negotiation_id: SessionId,
}

impl SessionEventReceiver {
    pub async fn recv(&mut self) -> Result<SessionEvent, EventBusError> {
        loop {
            let event = self
                .receiver
                .recv()
                .await
                .map_err(EventBusError::from_recv)?;
            if event.negotiation_id == self.negotiation_id {
                return Ok(event);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus is closed")]
    Closed,

    #[error("no events available")]
    Empty,

    #[error("receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl EventBusError {
    fn from_recv(error: broadcast::error::RecvError) -> Self {
        match error {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        }
    }
}
