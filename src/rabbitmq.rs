// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Factory and Reconnect Orchestration
//!
//! A [`RabbitMQ`] factory owns one broker URI, the current shared connection handle,
//! the remembered lifecycle listeners and the event bus its queue wrappers listen on.
//!
//! Failures are never detected here. The application decides when to call
//! [`RabbitMQ::reconnect`], typically from an `Error` or `Close` listener:
//!
//! ```no_run
//! use rabbitmq_queues::{broker::EventKind, config::RabbitMQConfigs, rabbitmq::RabbitMQ};
//!
//! # async fn run() {
//! let rabbit = RabbitMQ::with_configs(&RabbitMQConfigs::default());
//! let handle = rabbit.clone();
//! rabbit.on(EventKind::Close, move |_| {
//!     let rabbit = handle.clone();
//!     tokio::spawn(async move { rabbit.reconnect().await });
//! });
//! # }
//! ```

use crate::{
    broker::{Broker, BrokerConnection, ConnectionEvent, ConnectionHandle, EventCallback, EventKind},
    channel::LapinBroker,
    config::{ConnectionOptions, RabbitMQConfigs},
    errors::AmqpError,
    events::EventBus,
    exchange::ExchangeOptions,
    queue::QueueOptions,
    topology::QueueTopology,
    wrapper::QueueWrapper,
};
use futures_util::FutureExt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tracing::{debug, warn};

/// Event broadcast to every queue wrapper with the new connection handle.
pub const RECONNECT_EVENT: &str = "reconnect";

/// Factory of queue wrappers sharing one connection.
///
/// Cloning is cheap; clones share the connection, listeners and event bus.
#[derive(Clone)]
pub struct RabbitMQ {
    inner: Arc<RabbitMQInner>,
}

/// The connection handle in use and whether anything has awaited it yet.
#[derive(Clone)]
struct CurrentConnection {
    handle: ConnectionHandle,
    started: Arc<AtomicBool>,
}

struct RabbitMQInner {
    broker: Arc<dyn Broker>,
    uri: String,
    options: ConnectionOptions,
    connection: Mutex<CurrentConnection>,
    listeners: Mutex<Vec<(EventKind, EventCallback)>>,
    events: Arc<EventBus<ConnectionHandle>>,
}

impl RabbitMQ {
    /// Creates a factory. The connection is opened by the first operation awaiting it.
    pub fn new(broker: Arc<dyn Broker>, uri: &str, options: ConnectionOptions) -> RabbitMQ {
        let connection = open(broker.clone(), uri.to_owned(), options.clone());

        RabbitMQ {
            inner: Arc::new(RabbitMQInner {
                broker,
                uri: uri.to_owned(),
                options,
                connection: Mutex::new(connection),
                listeners: Mutex::new(vec![]),
                events: Arc::new(EventBus::new()),
            }),
        }
    }

    /// Creates a factory connecting through lapin.
    pub fn with_configs(cfg: &RabbitMQConfigs) -> RabbitMQ {
        RabbitMQ::new(
            Arc::new(LapinBroker),
            &cfg.uri(),
            ConnectionOptions::from(cfg),
        )
    }

    /// Current connection handle.
    pub fn connection(&self) -> ConnectionHandle {
        self.inner.connection().handle.clone()
    }

    /// Creates a wrapper for `queue`, bound to `exchange` unless it is empty.
    pub fn queue(
        &self,
        exchange: &str,
        queue: &str,
        queue_options: QueueOptions,
        exchange_options: ExchangeOptions,
    ) -> QueueWrapper {
        QueueWrapper::new(
            self.connection(),
            self.inner.events.clone(),
            QueueTopology::new(exchange, queue, queue_options, exchange_options),
        )
    }

    /// Number of queue wrappers listening for reconnects.
    pub fn queue_count(&self) -> usize {
        self.inner.events.listener_count(RECONNECT_EVENT)
    }

    /// Registers a connection lifecycle listener.
    ///
    /// `Connect` fires once the connection resolves. `Error` and `Close` are attached
    /// to the connection once it resolves, or fire right away if connecting fails.
    /// Listeners are remembered and attached again to every new connection.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on<F>(&self, kind: EventKind, callback: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(callback);
        self.inner.listeners().push((kind, callback.clone()));
        attach(self.connection(), kind, callback);
    }

    /// Replaces the connection and replays every queue wrapper on it.
    ///
    /// The previous connection is closed once established, even when it was still
    /// connecting at the time of the call. Remembered
    /// listeners are attached to the new connection, then every wrapper restarts:
    /// new channel, new topology assertion, subscription and binds replayed. All
    /// restarts run to completion; the first failure among them is returned.
    pub async fn reconnect(&self) -> Result<(), AmqpError> {
        let connection = open(
            self.inner.broker.clone(),
            self.inner.uri.clone(),
            self.inner.options.clone(),
        );
        let previous = std::mem::replace(&mut *self.inner.connection(), connection.clone());
        let connection = connection.handle;

        // A connection nobody awaited was never opened and is left alone.
        if previous.started.load(Ordering::SeqCst) {
            let resolved = previous.handle.peek().cloned();
            match resolved {
                Some(Ok(conn)) => close(conn).await,
                Some(Err(_)) => {}
                None => {
                    let pending = previous.handle;
                    tokio::spawn(async move {
                        if let Ok(conn) = pending.await {
                            close(conn).await;
                        }
                    });
                }
            }
        }

        let listeners = self.inner.listeners().clone();
        for (kind, callback) in listeners {
            attach(connection.clone(), kind, callback);
        }

        debug!(queues = self.queue_count(), "broadcasting reconnect");

        self.inner
            .events
            .emit(RECONNECT_EVENT, connection)
            .await
            .into_iter()
            .collect::<Result<Vec<()>, AmqpError>>()
            .map(|_| ())
    }
}

impl RabbitMQInner {
    fn connection(&self) -> MutexGuard<'_, CurrentConnection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(EventKind, EventCallback)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn open(broker: Arc<dyn Broker>, uri: String, options: ConnectionOptions) -> CurrentConnection {
    let started = Arc::new(AtomicBool::new(false));

    let handle = {
        let started = started.clone();
        async move {
            started.store(true, Ordering::SeqCst);
            broker.connect(&uri, &options).await
        }
        .boxed()
        .shared()
    };

    CurrentConnection { handle, started }
}

async fn close(conn: Arc<dyn BrokerConnection>) {
    if let Err(err) = conn.close().await {
        warn!(error = err.to_string(), "previous connection was not closed cleanly");
    }
}

fn attach(connection: ConnectionHandle, kind: EventKind, callback: EventCallback) {
    tokio::spawn(async move {
        match connection.await {
            Ok(conn) => match kind {
                EventKind::Connect => callback(&ConnectionEvent::Connect),
                _ => conn.on_event(kind, callback),
            },
            Err(err) => match kind {
                EventKind::Error => callback(&ConnectionEvent::Error(err)),
                EventKind::Close => callback(&ConnectionEvent::Close),
                EventKind::Connect => {}
            },
        }
    });
}
