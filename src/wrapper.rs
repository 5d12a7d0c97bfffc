// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Wrapper
//!
//! A [`QueueWrapper`] manages one queue (and optionally its exchange) on top of a
//! shared broker connection. It owns a channel derived from that connection, the
//! topology assertion made on that channel, at most one subscription and the list
//! of routing keys bound through it.
//!
//! Channel and assertion belong to a connection epoch: both are memoized shared
//! futures, created when the wrapper is built and recreated every time the factory
//! broadcasts a reconnect. Operations capture the epoch current at call time and
//! wait on its assertion. The subscription and the bind list outlive epochs; after a
//! reconnect they are replayed against the new channel.
//!
//! Wrappers are created through [`crate::rabbitmq::RabbitMQ::queue`].

use crate::{
    broker::{BrokerChannel, ConnectionHandle},
    consumer::{self, MessageHandler},
    errors::AmqpError,
    events::{EventBus, ListenerId},
    otel,
    publisher::PublishOptions,
    queue::SubscribeOptions,
    rabbitmq::RECONNECT_EVENT,
    topology::QueueTopology,
};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tracing::{debug, error, warn};

type ChannelHandle = Shared<BoxFuture<'static, Result<Arc<dyn BrokerChannel>, AmqpError>>>;
type Assertion = Shared<BoxFuture<'static, Result<(), AmqpError>>>;

/// Lifecycle of the wrapper's channel within the current connection epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Nothing has awaited the channel yet
    Uninitialized,
    /// The channel is being derived from the connection
    Connecting,
    Ready,
    /// Connecting or deriving the channel failed; waits for the next reconnect
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    None,
    /// A subscription is recorded but has no consumer yet
    Subscribing,
    Active,
}

/// Routing keys accepted by [`QueueWrapper::bind`] and [`QueueWrapper::unbind`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingKeys(Vec<String>);

impl From<&str> for RoutingKeys {
    fn from(key: &str) -> Self {
        RoutingKeys(vec![key.to_owned()])
    }
}

impl From<String> for RoutingKeys {
    fn from(key: String) -> Self {
        RoutingKeys(vec![key])
    }
}

impl From<Vec<String>> for RoutingKeys {
    fn from(keys: Vec<String>) -> Self {
        RoutingKeys(keys)
    }
}

impl From<Vec<&str>> for RoutingKeys {
    fn from(keys: Vec<&str>) -> Self {
        RoutingKeys(keys.into_iter().map(str::to_owned).collect())
    }
}

impl From<&[&str]> for RoutingKeys {
    fn from(keys: &[&str]) -> Self {
        RoutingKeys(keys.iter().map(|k| (*k).to_owned()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for RoutingKeys {
    fn from(keys: [&str; N]) -> Self {
        RoutingKeys(keys.iter().map(|k| (*k).to_owned()).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindOperation {
    Bind,
    Unbind,
}

/// Channel and topology assertion of one connection epoch.
#[derive(Clone)]
struct Epoch {
    generation: u64,
    channel: ChannelHandle,
    assertion: Assertion,
    started: Arc<AtomicBool>,
}

impl Epoch {
    fn derive(
        generation: u64,
        connection: ConnectionHandle,
        topology: Arc<QueueTopology>,
    ) -> Epoch {
        let started = Arc::new(AtomicBool::new(false));

        let channel = {
            let started = started.clone();
            async move {
                started.store(true, Ordering::SeqCst);
                let conn = connection.await?;
                conn.create_channel().await
            }
            .boxed()
            .shared()
        };

        let assertion = {
            let channel = channel.clone();
            async move {
                let channel = channel.await?;
                topology.install(channel.as_ref()).await
            }
            .boxed()
            .shared()
        };

        Epoch {
            generation,
            channel,
            assertion,
            started,
        }
    }

    fn state(&self) -> ChannelState {
        match self.channel.peek() {
            Some(Ok(_)) => ChannelState::Ready,
            Some(Err(_)) => ChannelState::Failed,
            None if self.started.load(Ordering::SeqCst) => ChannelState::Connecting,
            None => ChannelState::Uninitialized,
        }
    }
}

#[derive(Clone)]
struct Subscription {
    handler: Arc<dyn MessageHandler>,
    ack: bool,
    options: SubscribeOptions,
}

struct QueueState {
    epoch: Epoch,
    subscription: Option<Subscription>,
    consumer_tag: Option<String>,
    binds: Vec<String>,
}

struct QueueInner {
    topology: Arc<QueueTopology>,
    state: Mutex<QueueState>,
}

/// Convenience handle over one queue and its exchange.
///
/// The wrapper stays registered for reconnect broadcasts until [`QueueWrapper::destroy`]
/// is called or the wrapper is dropped.
pub struct QueueWrapper {
    inner: Arc<QueueInner>,
    events: Arc<EventBus<ConnectionHandle>>,
    listener: ListenerId,
}

impl QueueWrapper {
    pub(crate) fn new(
        connection: ConnectionHandle,
        events: Arc<EventBus<ConnectionHandle>>,
        topology: QueueTopology,
    ) -> QueueWrapper {
        let topology = Arc::new(topology);
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState {
                epoch: Epoch::derive(0, connection, topology.clone()),
                subscription: None,
                consumer_tag: None,
                binds: vec![],
            }),
            topology,
        });

        let weak = Arc::downgrade(&inner);
        let listener = events.on(
            RECONNECT_EVENT,
            Arc::new(move |connection: ConnectionHandle| {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.restart(connection).await,
                        None => Ok::<(), AmqpError>(()),
                    }
                }
                .boxed()
            }),
        );

        QueueWrapper {
            inner,
            events,
            listener,
        }
    }

    pub fn exchange(&self) -> &str {
        self.inner.topology.exchange()
    }

    pub fn queue(&self) -> &str {
        self.inner.topology.queue()
    }

    /// Waits for the topology assertion of the current connection epoch.
    ///
    /// The assertion runs once per epoch; every caller shares its outcome.
    pub async fn assert(&self) -> Result<(), AmqpError> {
        self.inner.epoch().assertion.await
    }

    /// Subscribes `handler` to the queue.
    ///
    /// With `ack` set, deliveries must be acknowledged through [`crate::message::Message::ack`];
    /// otherwise the broker considers them acknowledged on delivery. Subscribing while a
    /// subscription is recorded returns the current consumer tag without consuming again.
    pub async fn subscribe<H>(
        &self,
        handler: H,
        ack: bool,
        options: SubscribeOptions,
    ) -> Result<Option<String>, AmqpError>
    where
        H: MessageHandler + 'static,
    {
        self.inner
            .subscribe(Arc::new(handler), ack, options, false)
            .await
    }

    /// Subscribes with an explicit replay flag.
    ///
    /// With `replay` set the recorded subscription is replaced and a new consumer is
    /// started even if one exists. Returns `None` when a recorded subscription has not
    /// obtained its consumer tag yet.
    pub async fn subscribe_with(
        &self,
        handler: Arc<dyn MessageHandler>,
        ack: bool,
        options: SubscribeOptions,
        replay: bool,
    ) -> Result<Option<String>, AmqpError> {
        self.inner.subscribe(handler, ack, options, replay).await
    }

    /// Cancels the consumer and forgets the recorded subscription.
    ///
    /// Does nothing while no consumer tag is known, including while the first
    /// subscribe is still waiting for its tag.
    pub async fn unsubscribe(&self) -> Result<(), AmqpError> {
        self.inner.unsubscribe().await
    }

    /// Publishes `message` as JSON.
    ///
    /// The message goes to the wrapper's exchange (the default exchange when none is
    /// configured) with `routing_key`, or the queue name when absent. Returns `false`
    /// only when a confirmation was requested and the broker refused the message.
    pub async fn publish<T>(
        &self,
        message: &T,
        routing_key: Option<&str>,
        options: PublishOptions,
    ) -> Result<bool, AmqpError>
    where
        T: Serialize + ?Sized,
    {
        self.inner.publish(message, routing_key, options).await
    }

    /// Binds the queue to its exchange with each routing key, in order.
    ///
    /// Fails right away, before touching the broker, when the wrapper uses the
    /// default exchange. Each key joins the bind list once its bind succeeded.
    ///
    /// # Example
    /// ```no_run
    /// # async fn run(queue: &rabbitmq_queues::wrapper::QueueWrapper) -> Result<(), rabbitmq_queues::errors::AmqpError> {
    /// queue.bind(["orders.created", "orders.paid"])?.await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn bind<K>(&self, routing_keys: K) -> Result<BoxFuture<'static, Result<(), AmqpError>>, AmqpError>
    where
        K: Into<RoutingKeys>,
    {
        self.bind_process(BindOperation::Bind, routing_keys.into())
    }

    /// Removes bindings of the queue to its exchange, in order.
    ///
    /// Fails right away when the wrapper uses the default exchange. Each key leaves
    /// the bind list (one occurrence) once its unbind succeeded.
    pub fn unbind<K>(&self, routing_keys: K) -> Result<BoxFuture<'static, Result<(), AmqpError>>, AmqpError>
    where
        K: Into<RoutingKeys>,
    {
        self.bind_process(BindOperation::Unbind, routing_keys.into())
    }

    /// Deletes the queue and returns the number of messages it held.
    pub async fn delete(&self) -> Result<u32, AmqpError> {
        let channel = self.inner.epoch().channel.await?;
        channel.delete_queue(self.queue()).await
    }

    /// Stops listening for reconnect broadcasts. Returns `false` if already destroyed.
    pub fn destroy(&self) -> bool {
        self.events.off(self.listener)
    }

    pub fn channel_state(&self) -> ChannelState {
        self.inner.state().epoch.state()
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        let state = self.inner.state();
        match (&state.subscription, &state.consumer_tag) {
            (None, _) => SubscriptionState::None,
            (Some(_), None) => SubscriptionState::Subscribing,
            (Some(_), Some(_)) => SubscriptionState::Active,
        }
    }

    pub fn consumer_tag(&self) -> Option<String> {
        self.inner.state().consumer_tag.clone()
    }

    /// Routing keys currently bound through this wrapper, in bind order.
    pub fn binds(&self) -> Vec<String> {
        self.inner.state().binds.clone()
    }

    fn bind_process(
        &self,
        operation: BindOperation,
        routing_keys: RoutingKeys,
    ) -> Result<BoxFuture<'static, Result<(), AmqpError>>, AmqpError> {
        if !self.inner.topology.has_exchange() {
            return Err(AmqpError::DefaultExchangeBindingError(match operation {
                BindOperation::Bind => "bind to",
                BindOperation::Unbind => "unbind from",
            }));
        }

        let inner = self.inner.clone();
        Ok(async move { inner.apply_bindings(operation, routing_keys.0, true).await }.boxed())
    }
}

impl Drop for QueueWrapper {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl QueueInner {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn epoch(&self) -> Epoch {
        self.state().epoch.clone()
    }

    async fn subscribe(
        &self,
        handler: Arc<dyn MessageHandler>,
        ack: bool,
        options: SubscribeOptions,
        replay: bool,
    ) -> Result<Option<String>, AmqpError> {
        let epoch = {
            let mut state = self.state();
            if state.subscription.is_some() && !replay {
                return Ok(state.consumer_tag.clone());
            }

            state.subscription = Some(Subscription {
                handler: handler.clone(),
                ack,
                options: options.clone(),
            });
            state.epoch.clone()
        };

        let channel = epoch.channel.await?;
        epoch.assertion.await?;

        if let Some(count) = options.prefetch_count() {
            channel.prefetch(count).await?;
        }

        let queue = self.topology.queue();
        let on_delivery = consumer::delivery_callback(queue, channel.clone(), handler);
        let tag = channel.consume(queue, &options, !ack, on_delivery).await?;

        {
            let mut state = self.state();
            if state.epoch.generation == epoch.generation {
                debug!(queue, consumer_tag = tag.as_str(), replay, "subscribed");
                state.consumer_tag = Some(tag.clone());
                return Ok(Some(tag));
            }
        }

        // A reconnect happened while consuming; the restart owns the subscription now.
        debug!(queue, consumer_tag = tag.as_str(), "cancelling consumer of a stale channel");
        if let Err(err) = channel.cancel(&tag).await {
            warn!(error = err.to_string(), queue, "stale consumer was not cancelled");
        }

        Ok(self.state().consumer_tag.clone())
    }

    async fn unsubscribe(&self) -> Result<(), AmqpError> {
        let (tag, epoch) = {
            let state = self.state();
            match state.consumer_tag.clone() {
                Some(tag) => (tag, state.epoch.clone()),
                None => return Ok(()),
            }
        };

        let channel = epoch.channel.await?;
        channel.cancel(&tag).await?;

        let mut state = self.state();
        state.consumer_tag = None;
        state.subscription = None;

        Ok(())
    }

    async fn publish<T>(
        &self,
        message: &T,
        routing_key: Option<&str>,
        mut options: PublishOptions,
    ) -> Result<bool, AmqpError>
    where
        T: Serialize + ?Sized,
    {
        let epoch = self.epoch();
        let channel = epoch.channel.await?;
        epoch.assertion.await?;

        let payload = serde_json::to_vec(message).map_err(|err| {
            error!(error = err.to_string(), "failure to serialize payload");
            AmqpError::SerializePayloadError(err.to_string())
        })?;

        otel::inject_context(options.headers_mut());

        let routing_key = routing_key.unwrap_or(self.topology.queue());
        channel
            .publish(self.topology.exchange(), routing_key, &payload, &options)
            .await
    }

    /// Issues the binds (or unbinds) one key after another.
    ///
    /// With `track` set the bind list follows each successful operation; replays
    /// leave it untouched.
    async fn apply_bindings(
        &self,
        operation: BindOperation,
        routing_keys: Vec<String>,
        track: bool,
    ) -> Result<(), AmqpError> {
        let epoch = self.epoch();
        let channel = epoch.channel.await?;
        epoch.assertion.await?;

        let queue = self.topology.queue();
        let exchange = self.topology.exchange();

        for key in routing_keys {
            match operation {
                BindOperation::Bind => channel.bind_queue(queue, exchange, &key).await?,
                BindOperation::Unbind => channel.unbind_queue(queue, exchange, &key).await?,
            }

            if !track {
                continue;
            }

            let mut state = self.state();
            match operation {
                BindOperation::Bind => state.binds.push(key),
                BindOperation::Unbind => {
                    if let Some(position) = state.binds.iter().position(|k| *k == key) {
                        state.binds.remove(position);
                    }
                }
            }
        }

        Ok(())
    }

    /// Moves the wrapper to a new connection and replays its subscription and binds.
    async fn restart(&self, connection: ConnectionHandle) -> Result<(), AmqpError> {
        let (subscription, binds) = {
            let mut state = self.state();
            let generation = state.epoch.generation + 1;
            state.epoch = Epoch::derive(generation, connection, self.topology.clone());
            state.consumer_tag = None;
            (state.subscription.clone(), state.binds.clone())
        };

        debug!(
            queue = self.topology.queue(),
            resubscribe = subscription.is_some(),
            binds = binds.len(),
            "restarting queue on the new connection"
        );

        self.epoch().assertion.await?;

        if let Some(subscription) = subscription {
            self.subscribe(
                subscription.handler,
                subscription.ack,
                subscription.options,
                true,
            )
            .await?;
        }

        if !binds.is_empty() {
            self.apply_bindings(BindOperation::Bind, binds, false).await?;
        }

        Ok(())
    }
}
