// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lapin Broker Adapter
//!
//! This module implements the broker contract of [`crate::broker`] on top of lapin.
//! It establishes connections to the RabbitMQ server, derives channels from them and
//! translates every channel primitive into the matching lapin call, logging failures
//! before handing them back as [`AmqpError`]s.

use crate::{
    broker::{
        Broker, BrokerChannel, BrokerConnection, ConnectionEvent, Delivery, DeliveryCallback,
        EventCallback, EventKind,
    },
    config::ConnectionOptions,
    errors::AmqpError,
    exchange::ExchangeOptions,
    publisher::PublishOptions,
    queue::{QueueOptions, SubscribeOptions},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicNackOptions, BasicQosOptions,
        ConfirmSelectOptions, QueueBindOptions, QueueDeleteOptions,
    },
    types::{FieldTable, LongString},
    Channel, Connection, ConnectionProperties,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, warn};

/// Reply code sent when a connection is closed on purpose
const REPLY_SUCCESS: u16 = 200;

/// Opens lapin connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct LapinBroker;

#[async_trait]
impl Broker for LapinBroker {
    async fn connect(
        &self,
        uri: &str,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn BrokerConnection>, AmqpError> {
        debug!("creating amqp connection...");
        let mut properties = ConnectionProperties::default();
        if let Some(name) = &options.connection_name {
            properties = properties.with_connection_name(LongString::from(name.clone()));
        }

        match Connection::connect(uri, properties).await {
            Ok(conn) => {
                debug!("amqp connected");
                let listeners = ConnectionListeners::default();
                let dispatcher = listeners.clone();
                conn.on_error(move |err| dispatcher.dispatch(&err.to_string()));

                Ok(Arc::new(LapinConnection {
                    conn,
                    listeners,
                    publisher_confirms: options.publisher_confirms,
                }))
            }
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }
    }
}

/// Lifecycle listeners registered on one connection.
///
/// lapin keeps a single error handler per connection, so one dispatcher is installed
/// when the connection opens and it fans every failure out to the listeners here.
/// lapin reports connection loss through the same hook: `Error` listeners receive the
/// failure and `Close` listeners are told the connection is gone.
#[derive(Clone, Default)]
pub(crate) struct ConnectionListeners {
    listeners: Arc<Mutex<Vec<(EventKind, EventCallback)>>>,
}

impl ConnectionListeners {
    fn lock(&self) -> MutexGuard<'_, Vec<(EventKind, EventCallback)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, kind: EventKind, callback: EventCallback) {
        self.lock().push((kind, callback));
    }

    pub(crate) fn dispatch(&self, reason: &str) {
        warn!(reason, "amqp connection failure");

        let listeners = self.lock().clone();
        let failure = ConnectionEvent::Error(AmqpError::ConnectionError(reason.to_owned()));

        for (kind, callback) in listeners {
            match kind {
                EventKind::Error => callback(&failure),
                EventKind::Close => callback(&ConnectionEvent::Close),
                EventKind::Connect => {}
            }
        }
    }
}

/// A lapin connection.
pub struct LapinConnection {
    conn: Connection,
    listeners: ConnectionListeners,
    publisher_confirms: bool,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        debug!("creating amqp channel...");
        let channel = match self.conn.create_channel().await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }?;

        if self.publisher_confirms {
            if let Err(err) = channel
                .confirm_select(ConfirmSelectOptions { nowait: false })
                .await
            {
                error!(error = err.to_string(), "error to enable publisher confirms");
                return Err(AmqpError::ChannelError(err.to_string()));
            }
        }

        debug!("channel created");
        Ok(Arc::new(LapinChannel { channel }))
    }

    fn on_event(&self, kind: EventKind, callback: EventCallback) {
        match kind {
            EventKind::Connect => debug!("connect listeners are fired by the factory"),
            _ => self.listeners.register(kind, callback),
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        match self.conn.close(REPLY_SUCCESS, "reconnecting").await {
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = err.to_string(), "failure to close the connection");
                Err(AmqpError::ConnectionError(err.to_string()))
            }
        }
    }
}

/// A lapin channel.
pub struct LapinChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn assert_queue(&self, name: &str, options: &QueueOptions) -> Result<(), AmqpError> {
        debug!("creating queue: {}", name);

        match self
            .channel
            .queue_declare(name, options.declare_options(), options.arguments())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(name.to_owned()))
            }
            _ => {
                debug!("queue: {} was created", name);
                Ok(())
            }
        }
    }

    async fn assert_exchange(
        &self,
        name: &str,
        options: &ExchangeOptions,
    ) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", name);

        match self
            .channel
            .exchange_declare(
                name,
                options.exchange_kind().into(),
                options.declare_options(),
                options.arguments(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name, "error to declare the exchange");
                Err(AmqpError::DeclareExchangeError(name.to_owned()))
            }
            _ => {
                debug!("exchange: {} was created", name);
                Ok(())
            }
        }
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );

        match self
            .channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn unbind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            "unbinding queue: {} from the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );

        match self
            .channel
            .queue_unbind(queue, exchange, routing_key, FieldTable::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to unbind queue from exchange");
                Err(AmqpError::UnbindingExchangeFromQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn delete_queue(&self, name: &str) -> Result<u32, AmqpError> {
        match self
            .channel
            .queue_delete(name, QueueDeleteOptions::default())
            .await
        {
            Ok(count) => {
                debug!("queue: {} was deleted", name);
                Ok(count)
            }
            Err(err) => {
                error!(error = err.to_string(), name, "error to delete the queue");
                Err(AmqpError::DeleteQueueError(name.to_owned()))
            }
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        options: &PublishOptions,
    ) -> Result<bool, AmqpError> {
        let confirm = match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                options.publish_options(),
                payload,
                options.properties(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            Ok(confirm) => Ok(confirm),
        }?;

        if !options.should_wait_confirm() {
            return Ok(true);
        }

        match confirm.await {
            Ok(confirmation) => Ok(!confirmation.is_nack()),
            Err(err) => {
                error!(error = err.to_string(), "error waiting publisher confirm");
                Err(AmqpError::PublishingError(err.to_string()))
            }
        }
    }

    async fn consume(
        &self,
        queue: &str,
        options: &SubscribeOptions,
        no_ack: bool,
        on_delivery: DeliveryCallback,
    ) -> Result<String, AmqpError> {
        let mut consumer = match self
            .channel
            .basic_consume(
                queue,
                options.tag(),
                options.consume_options(no_ack),
                options.arguments(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        let tag = consumer.tag().to_string();

        // The stream ends once the consumer is cancelled or the channel dies.
        tokio::spawn(async move {
            while let Some(result) = consumer.next().await {
                match result {
                    Ok(delivery) => {
                        on_delivery(Delivery {
                            delivery_tag: delivery.delivery_tag,
                            exchange: delivery.exchange.to_string(),
                            routing_key: delivery.routing_key.to_string(),
                            redelivered: delivery.redelivered,
                            properties: delivery.properties,
                            data: delivery.data,
                        })
                        .await
                    }
                    Err(err) => error!(error = err.to_string(), "errors consume msg"),
                }
            }
        });

        Ok(tag)
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), consumer_tag, "error to cancel the consumer");
                Err(AmqpError::CancelConsumerError(consumer_tag.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn prefetch(&self, count: u16) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_qos(count, BasicQosOptions { global: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to configure qos");
                Err(AmqpError::QoSDeclarationError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling ack msg");
                Err(AmqpError::AckMessageError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling nack msg");
                Err(AmqpError::NackMessageError(err.to_string()))
            }
            _ => Ok(()),
        }
    }
}
