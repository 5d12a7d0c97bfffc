// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Event Bus
//!
//! An observer registry keyed by event name. Any number of listeners may register
//! for an event; emitting runs every listener registered at that moment, in
//! registration order, and waits for all of them.
//!
//! One bus exists per [`crate::rabbitmq::RabbitMQ`] factory. Listeners stay
//! registered until removed with [`EventBus::off`].

use crate::errors::AmqpError;
use futures_util::future::{join_all, BoxFuture};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tracing::debug;

/// Asynchronous listener receiving the event payload.
pub type Listener<P> = Arc<dyn Fn(P) -> BoxFuture<'static, Result<(), AmqpError>> + Send + Sync>;

/// Identifies one registration on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration<P> {
    id: ListenerId,
    event: String,
    listener: Listener<P>,
}

pub struct EventBus<P> {
    next_id: AtomicU64,
    registrations: Mutex<Vec<Registration<P>>>,
}

impl<P> Default for EventBus<P> {
    fn default() -> Self {
        EventBus {
            next_id: AtomicU64::new(0),
            registrations: Mutex::new(vec![]),
        }
    }
}

impl<P: Clone + Send + 'static> EventBus<P> {
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Registers a listener for `event`.
    pub fn on(&self, event: &str, listener: Listener<P>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registrations().push(Registration {
            id,
            event: event.to_owned(),
            listener,
        });

        id
    }

    /// Removes a registration. Returns `false` if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut registrations = self.registrations();
        let before = registrations.len();
        registrations.retain(|r| r.id != id);

        registrations.len() != before
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.registrations()
            .iter()
            .filter(|r| r.event == event)
            .count()
    }

    /// Runs every listener of `event` with a clone of `payload` and collects their results.
    pub async fn emit(&self, event: &str, payload: P) -> Vec<Result<(), AmqpError>> {
        let pending: Vec<_> = self
            .registrations()
            .iter()
            .filter(|r| r.event == event)
            .map(|r| (r.listener)(payload.clone()))
            .collect();

        debug!(event, listeners = pending.len(), "emitting event");

        join_all(pending).await
    }

    fn registrations(&self) -> MutexGuard<'_, Vec<Registration<P>>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
