// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Consumption
//!
//! This module turns raw broker deliveries into [`Message`] envelopes and hands
//! them to the subscriber's [`MessageHandler`], inside a consumer trace span.

use crate::{
    broker::{BrokerChannel, Delivery, DeliveryCallback},
    errors::AmqpError,
    message::Message,
    otel,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use std::{borrow::Cow, future::Future, sync::Arc};
use tracing::{debug, error};

/// Handles messages delivered to a subscription.
///
/// Any `Fn(Message) -> impl Future<Output = Result<(), AmqpError>>` closure is a handler.
/// Failures are logged and recorded on the consumer span; acknowledging stays the
/// handler's job.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> Result<(), AmqpError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), AmqpError>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> Result<(), AmqpError> {
        (self)(message).await
    }
}

/// Builds the callback given to the broker for one subscription.
pub(crate) fn delivery_callback(
    queue: &str,
    channel: Arc<dyn BrokerChannel>,
    handler: Arc<dyn MessageHandler>,
) -> DeliveryCallback {
    let queue = queue.to_owned();

    Arc::new(move |delivery: Delivery| {
        let queue = queue.clone();
        let channel = channel.clone();
        let handler = handler.clone();

        async move {
            consume(
                &global::tracer("amqp consumer"),
                &queue,
                delivery,
                channel,
                handler,
            )
            .await
        }
        .boxed()
    })
}

/// Wraps a delivery in a [`Message`] and runs the handler on it.
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    queue: &str,
    delivery: Delivery,
    channel: Arc<dyn BrokerChannel>,
    handler: Arc<dyn MessageHandler>,
) {
    let (ctx, mut span) = otel::new_span(&delivery.properties, tracer, queue);

    debug!(
        queue,
        exchange = delivery.exchange.as_str(),
        routing_key = delivery.routing_key.as_str(),
        "received message"
    );

    match handler.handle(Message::new(delivery, channel, ctx)).await {
        Ok(()) => span.set_status(Status::Ok),
        Err(err) => {
            error!(error = err.to_string(), queue, "error handling msg");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from(err.to_string()),
            });
        }
    }
}
