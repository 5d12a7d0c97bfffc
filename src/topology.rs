// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Topology
//!
//! The topology of a queue wrapper is its queue, its exchange (if any) and the
//! default binding between them. It is installed on every fresh channel: once when
//! the wrapper is created and again after each reconnect.

use crate::{
    broker::BrokerChannel, errors::AmqpError, exchange::ExchangeOptions, queue::QueueOptions,
};
use tracing::debug;

/// Queue, exchange and default binding of one queue wrapper.
///
/// An empty exchange name stands for the broker's default exchange, which is
/// never declared nor bound.
#[derive(Debug, Clone)]
pub struct QueueTopology {
    pub(crate) exchange: String,
    pub(crate) queue: String,
    pub(crate) queue_options: QueueOptions,
    pub(crate) exchange_options: ExchangeOptions,
}

impl QueueTopology {
    pub fn new(
        exchange: &str,
        queue: &str,
        queue_options: QueueOptions,
        exchange_options: ExchangeOptions,
    ) -> QueueTopology {
        QueueTopology {
            exchange: exchange.to_owned(),
            queue: queue.to_owned(),
            queue_options,
            exchange_options,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn has_exchange(&self) -> bool {
        !self.exchange.is_empty()
    }

    /// Installs the topology through `channel`.
    ///
    /// This method performs the following operations in order:
    /// 1. Asserts the queue, unless assertion is disabled
    /// 2. Asserts the exchange, when one is configured
    /// 3. Binds the queue to the exchange using the queue name as routing key,
    ///    unless assertion or binding is disabled
    pub async fn install(&self, channel: &dyn BrokerChannel) -> Result<(), AmqpError> {
        if self.queue_options.should_assert() {
            channel.assert_queue(&self.queue, &self.queue_options).await?;
        }

        if !self.has_exchange() {
            return Ok(());
        }

        channel
            .assert_exchange(&self.exchange, &self.exchange_options)
            .await?;

        if self.queue_options.should_bind() {
            channel
                .bind_queue(&self.queue, &self.exchange, &self.queue)
                .await?;
        }

        debug!(
            queue = self.queue.as_str(),
            exchange = self.exchange.as_str(),
            "topology installed"
        );

        Ok(())
    }
}
