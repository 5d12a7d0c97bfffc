// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Envelope
//!
//! A [`Message`] pairs one delivery with the channel it arrived on. Handlers get a
//! fresh envelope per delivery and may keep it to acknowledge later; the channel
//! reference stays usable until a reconnect replaces it, after which acknowledging
//! fails with whatever the broker reports for a dead channel.

use crate::{
    broker::{BrokerChannel, Delivery},
    errors::AmqpError,
};
use opentelemetry::Context;
use serde::de::DeserializeOwned;
use std::{borrow::Cow, fmt, sync::Arc};

/// One delivered message.
#[derive(Clone)]
pub struct Message {
    delivery: Delivery,
    channel: Arc<dyn BrokerChannel>,
    context: Context,
}

impl Message {
    pub(crate) fn new(delivery: Delivery, channel: Arc<dyn BrokerChannel>, context: Context) -> Self {
        Message {
            delivery,
            channel,
            context,
        }
    }

    /// Payload decoded as UTF-8 text; invalid sequences are replaced.
    pub fn raw_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.delivery.data)
    }

    /// Payload parsed as JSON.
    ///
    /// # Errors
    /// [`AmqpError::ParsePayloadError`] when the payload is not valid JSON for `T`.
    pub fn decoded<T: DeserializeOwned>(&self) -> Result<T, AmqpError> {
        serde_json::from_str(&self.raw_text())
            .map_err(|err| AmqpError::ParsePayloadError(err.to_string()))
    }

    /// Acknowledges this message on the channel it arrived on.
    pub async fn ack(&self) -> Result<(), AmqpError> {
        self.channel.ack(self.delivery.delivery_tag).await
    }

    /// Rejects this message, optionally asking the broker to requeue it.
    pub async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        self.channel.nack(self.delivery.delivery_tag, requeue).await
    }

    pub fn data(&self) -> &[u8] {
        &self.delivery.data
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub fn routing_key(&self) -> &str {
        &self.delivery.routing_key
    }

    pub fn exchange(&self) -> &str {
        &self.delivery.exchange
    }

    pub fn redelivered(&self) -> bool {
        self.delivery.redelivered
    }

    /// Trace context propagated by the publisher.
    pub fn context(&self) -> &Context {
        &self.context
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}
