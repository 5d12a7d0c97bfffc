// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue and Subscription Options
//!
//! This module provides the option bags used when asserting a queue and when
//! consuming from it. A few fields are interpreted by the queue wrapper (`assert`,
//! `bind`, `prefetch`); the rest are passed through to the broker untouched.

use lapin::{
    options::{BasicConsumeOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongInt, ShortString},
};
use std::collections::BTreeMap;

/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify maximum queue length
pub const AMQP_HEADERS_MAX_LENGTH: &str = "x-max-length";
/// Constant for the header field used to specify maximum queue size in bytes
pub const AMQP_HEADERS_MAX_LENGTH_BYTES: &str = "x-max-length-bytes";

/// Options for asserting a queue.
///
/// `assert` and `bind` default to `true`. When `assert` is disabled the queue is
/// neither declared nor bound to the exchange; when only `bind` is disabled the
/// queue is declared but the default binding (routing key = queue name) is skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueOptions {
    pub(crate) assert: bool,
    pub(crate) bind: bool,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
    pub(crate) exclusive: bool,
    pub(crate) passive: bool,
    pub(crate) no_wait: bool,
    pub(crate) ttl: Option<i32>,
    pub(crate) max_length: Option<i32>,
    pub(crate) max_length_bytes: Option<i32>,
    pub(crate) params: BTreeMap<ShortString, AMQPValue>,
}

impl Default for QueueOptions {
    fn default() -> Self {
        QueueOptions {
            assert: true,
            bind: true,
            durable: false,
            delete: false,
            exclusive: false,
            passive: false,
            no_wait: false,
            ttl: None,
            max_length: None,
            max_length_bytes: None,
            params: BTreeMap::default(),
        }
    }
}

impl QueueOptions {
    /// Creates queue options with assertion and default binding enabled.
    pub fn new() -> QueueOptions {
        QueueOptions::default()
    }

    /// Skips the queue assertion (and therefore the default binding).
    ///
    /// # Returns
    /// Self for method chaining
    pub fn skip_assert(mut self) -> Self {
        self.assert = false;
        self
    }

    /// Skips binding the queue to its exchange by queue name.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn skip_bind(mut self) -> Self {
        self.bind = false;
        self
    }

    /// Makes the queue durable, persisting across broker restarts.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    ///
    /// Exclusive queues are deleted when the connection closes, so they are
    /// declared again on every reconnect.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Makes the queue passive, checking for existence without creating it.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Sets no_wait flag, making the declaration non-blocking.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Sets the message Time-To-Live (TTL) for the queue, in milliseconds.
    ///
    /// # Parameters
    /// * `ttl` - Message lifetime in milliseconds
    ///
    /// # Returns
    /// Self for method chaining
    pub fn ttl(mut self, ttl: i32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets the maximum number of messages the queue can hold.
    ///
    /// # Parameters
    /// * `max` - Maximum number of messages
    ///
    /// # Returns
    /// Self for method chaining
    pub fn max_length(mut self, max: i32) -> Self {
        self.max_length = Some(max);
        self
    }

    /// Sets the maximum size in bytes the queue can hold.
    ///
    /// # Parameters
    /// * `max_bytes` - Maximum total size of the messages, in bytes
    ///
    /// # Returns
    /// Self for method chaining
    pub fn max_length_bytes(mut self, max_bytes: i32) -> Self {
        self.max_length_bytes = Some(max_bytes);
        self
    }

    /// Adds a single passthrough argument.
    ///
    /// # Parameters
    /// * `key` - The argument name
    /// * `value` - The argument value
    ///
    /// # Returns
    /// Self for method chaining
    pub fn param(mut self, key: ShortString, value: AMQPValue) -> Self {
        self.params.insert(key, value);
        self
    }

    /// Replaces the passthrough arguments.
    ///
    /// # Parameters
    /// * `params` - Arguments replacing the current ones
    ///
    /// # Returns
    /// Self for method chaining
    pub fn params(mut self, params: BTreeMap<ShortString, AMQPValue>) -> Self {
        self.params = params;
        self
    }

    pub fn should_assert(&self) -> bool {
        self.assert
    }

    pub fn should_bind(&self) -> bool {
        self.assert && self.bind
    }

    /// Declaration flags in the form lapin expects.
    pub fn declare_options(&self) -> QueueDeclareOptions {
        QueueDeclareOptions {
            passive: self.passive,
            durable: self.durable,
            exclusive: self.exclusive,
            auto_delete: self.delete,
            nowait: self.no_wait,
        }
    }

    /// Declaration arguments: the passthrough map plus ttl and length limits.
    pub fn arguments(&self) -> FieldTable {
        let mut args = self.params.clone();

        if let Some(ttl) = self.ttl {
            args.insert(
                ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
                AMQPValue::LongInt(LongInt::from(ttl)),
            );
        }

        if let Some(max) = self.max_length {
            args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH),
                AMQPValue::LongInt(LongInt::from(max)),
            );
        }

        if let Some(max_bytes) = self.max_length_bytes {
            args.insert(
                ShortString::from(AMQP_HEADERS_MAX_LENGTH_BYTES),
                AMQPValue::LongInt(LongInt::from(max_bytes)),
            );
        }

        FieldTable::from(args)
    }
}

/// Options for subscribing to a queue.
///
/// `prefetch` is applied to the channel before consuming. Acknowledgement mode is
/// not part of these options: it follows the `ack` argument of the subscribe call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscribeOptions {
    pub(crate) prefetch: Option<u16>,
    pub(crate) consumer_tag: String,
    pub(crate) no_local: bool,
    pub(crate) exclusive: bool,
    pub(crate) no_wait: bool,
    pub(crate) params: BTreeMap<ShortString, AMQPValue>,
}

impl SubscribeOptions {
    pub fn new() -> SubscribeOptions {
        SubscribeOptions::default()
    }

    /// Limits the number of unacknowledged deliveries on the channel.
    ///
    /// # Parameters
    /// * `count` - Maximum number of deliveries awaiting acknowledgement
    ///
    /// # Returns
    /// Self for method chaining
    pub fn prefetch(mut self, count: u16) -> Self {
        self.prefetch = Some(count);
        self
    }

    /// Requests a specific consumer tag instead of a broker generated one.
    ///
    /// # Parameters
    /// * `tag` - The consumer tag to request
    ///
    /// # Returns
    /// Self for method chaining
    pub fn consumer_tag(mut self, tag: &str) -> Self {
        self.consumer_tag = tag.to_owned();
        self
    }

    pub fn no_local(mut self) -> Self {
        self.no_local = true;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self
    }

    /// Adds a single passthrough consume argument.
    ///
    /// # Parameters
    /// * `key` - The argument name
    /// * `value` - The argument value
    ///
    /// # Returns
    /// Self for method chaining
    pub fn param(mut self, key: ShortString, value: AMQPValue) -> Self {
        self.params.insert(key, value);
        self
    }

    pub fn prefetch_count(&self) -> Option<u16> {
        self.prefetch
    }

    pub fn tag(&self) -> &str {
        &self.consumer_tag
    }

    /// Consume flags in the form lapin expects.
    pub fn consume_options(&self, no_ack: bool) -> BasicConsumeOptions {
        BasicConsumeOptions {
            no_local: self.no_local,
            no_ack,
            exclusive: self.exclusive,
            nowait: self.no_wait,
        }
    }

    pub fn arguments(&self) -> FieldTable {
        FieldTable::from(self.params.clone())
    }
}
