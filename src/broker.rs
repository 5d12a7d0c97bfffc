// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Collaborator Contract
//!
//! The queue layer never speaks AMQP itself. It drives a broker through the traits
//! in this module: a [`Broker`] opens connections, a [`BrokerConnection`] derives
//! channels and reports lifecycle events, and a [`BrokerChannel`] performs the
//! topology, publish and consume primitives.
//!
//! [`crate::channel`] provides the lapin backed implementation.

use crate::{
    config::ConnectionOptions, errors::AmqpError, exchange::ExchangeOptions,
    publisher::PublishOptions, queue::QueueOptions, queue::SubscribeOptions,
};
use async_trait::async_trait;
use futures_util::future::{BoxFuture, Shared};
use lapin::BasicProperties;
use std::sync::Arc;

/// Shared, lazily resolved reference to one broker connection.
///
/// Every clone resolves to the same connection (or the same failure). It is
/// replaced, never mutated, on reconnect.
pub type ConnectionHandle = Shared<BoxFuture<'static, Result<Arc<dyn BrokerConnection>, AmqpError>>>;

/// Invoked for every message delivered to a consumer.
pub type DeliveryCallback = Arc<dyn Fn(Delivery) -> BoxFuture<'static, ()> + Send + Sync>;

/// Invoked when a connection lifecycle event fires.
pub type EventCallback = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Connection lifecycle events a listener can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Fired once the connection handle resolves
    Connect,
    /// Fired on connection errors, including failure to connect
    Error,
    /// Fired when the connection goes away or never came up
    Close,
}

/// A connection lifecycle event as delivered to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Error(AmqpError),
    Close,
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Connect => EventKind::Connect,
            ConnectionEvent::Error(_) => EventKind::Error,
            ConnectionEvent::Close => EventKind::Close,
        }
    }
}

/// One message as handed over by the broker.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
}

/// Opens connections to a broker.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(
        &self,
        uri: &str,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn BrokerConnection>, AmqpError>;
}

/// An open broker connection.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Derives a new channel from this connection.
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError>;

    /// Attaches a listener for `Error` or `Close` events of this connection.
    fn on_event(&self, kind: EventKind, callback: EventCallback);

    async fn close(&self) -> Result<(), AmqpError>;
}

/// Operational context derived from a connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn assert_queue(&self, name: &str, options: &QueueOptions) -> Result<(), AmqpError>;

    async fn assert_exchange(&self, name: &str, options: &ExchangeOptions)
        -> Result<(), AmqpError>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str)
        -> Result<(), AmqpError>;

    async fn unbind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    /// Deletes the queue and returns the number of messages it held.
    async fn delete_queue(&self, name: &str) -> Result<u32, AmqpError>;

    /// Publishes a payload. Returns `false` only when a confirmation was awaited
    /// and the broker rejected the message.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        options: &PublishOptions,
    ) -> Result<bool, AmqpError>;

    /// Starts a consumer and returns its consumer tag.
    async fn consume(
        &self,
        queue: &str,
        options: &SubscribeOptions,
        no_ack: bool,
        on_delivery: DeliveryCallback,
    ) -> Result<String, AmqpError>;

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    async fn prefetch(&self, count: u16) -> Result<(), AmqpError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;
}
