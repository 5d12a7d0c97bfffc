// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Queues
//!
//! Queue wrappers over a shared RabbitMQ connection that survive reconnects.
//!
//! A [`rabbitmq::RabbitMQ`] factory holds the connection. Each
//! [`wrapper::QueueWrapper`] it creates asserts its queue and exchange, publishes,
//! subscribes and manages bindings. When the application calls
//! [`rabbitmq::RabbitMQ::reconnect`], every live wrapper derives a new channel,
//! asserts its topology again and replays its subscription and bindings.

mod consumer;
mod otel;

pub mod broker;
pub mod channel;
pub mod config;
pub mod errors;
pub mod events;
pub mod exchange;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod rabbitmq;
pub mod topology;
pub mod wrapper;

pub use consumer::MessageHandler;
