// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publish Options
//!
//! This module provides the options accepted by [`crate::wrapper::QueueWrapper::publish`]
//! and their translation into AMQP message properties.

use lapin::{
    options::BasicPublishOptions,
    types::{
        AMQPValue, FieldTable, LongInt, LongLongInt, LongString, LongUInt, ShortInt, ShortString,
    },
    BasicProperties,
};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// AMQP delivery mode for messages persisted by the broker
const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// Typed value of a message header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    ShortString(String),
    LongString(String),
    Int(i16),
    LongInt(i32),
    LongLongInt(i64),
    Uint(u32),
    LongUint(u32),
    LongLongUint(u64),
}

impl From<HeaderValue> for AMQPValue {
    fn from(value: HeaderValue) -> Self {
        match value {
            HeaderValue::ShortString(v) => AMQPValue::ShortString(ShortString::from(v)),
            HeaderValue::LongString(v) => AMQPValue::LongString(LongString::from(v)),
            HeaderValue::Int(v) => AMQPValue::ShortInt(ShortInt::from(v)),
            HeaderValue::LongInt(v) => AMQPValue::LongInt(LongInt::from(v)),
            HeaderValue::LongLongInt(v) => AMQPValue::LongLongInt(LongLongInt::from(v)),
            HeaderValue::Uint(v) => AMQPValue::LongUInt(LongUInt::from(v)),
            HeaderValue::LongUint(v) => AMQPValue::LongUInt(LongUInt::from(v)),
            // AMQP 0-9-1 as spoken by RabbitMQ has no unsigned 64 bit field; values
            // past i64::MAX travel as their decimal text
            HeaderValue::LongLongUint(v) => match LongLongInt::try_from(v) {
                Ok(v) => AMQPValue::LongLongInt(v),
                Err(_) => AMQPValue::LongString(LongString::from(v.to_string())),
            },
        }
    }
}

/// Options for a single publish.
///
/// Without `wait_confirm` a publish is fire-and-forget. With it, the call waits
/// for the broker's confirmation, which requires the connection to be opened with
/// `publisher_confirms` enabled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    pub(crate) mandatory: bool,
    pub(crate) immediate: bool,
    pub(crate) wait_confirm: bool,
    pub(crate) persistent: bool,
    pub(crate) msg_type: Option<String>,
    pub(crate) message_id: Option<String>,
    pub(crate) content_type: Option<String>,
    pub(crate) headers: BTreeMap<ShortString, AMQPValue>,
}

impl PublishOptions {
    pub fn new() -> PublishOptions {
        PublishOptions::default()
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    /// Waits for the broker to confirm the publish.
    pub fn wait_confirm(mut self) -> Self {
        self.wait_confirm = true;
        self
    }

    /// Marks the message as persistent (delivery mode 2).
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn msg_type(mut self, msg_type: &str) -> Self {
        self.msg_type = Some(msg_type.to_owned());
        self
    }

    pub fn message_id(mut self, id: &str) -> Self {
        self.message_id = Some(id.to_owned());
        self
    }

    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_owned());
        self
    }

    pub fn header(mut self, key: &str, value: HeaderValue) -> Self {
        self.headers.insert(ShortString::from(key), value.into());
        self
    }

    pub fn should_wait_confirm(&self) -> bool {
        self.wait_confirm
    }

    pub(crate) fn headers_mut(&mut self) -> &mut BTreeMap<ShortString, AMQPValue> {
        &mut self.headers
    }

    pub fn headers(&self) -> &BTreeMap<ShortString, AMQPValue> {
        &self.headers
    }

    pub fn publish_options(&self) -> BasicPublishOptions {
        BasicPublishOptions {
            mandatory: self.mandatory,
            immediate: self.immediate,
        }
    }

    /// Message properties: JSON content type and a fresh message id unless overridden.
    pub fn properties(&self) -> BasicProperties {
        let mut props = BasicProperties::default()
            .with_content_type(ShortString::from(
                self.content_type
                    .clone()
                    .unwrap_or_else(|| JSON_CONTENT_TYPE.to_owned()),
            ))
            .with_message_id(ShortString::from(
                self.message_id
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
            ))
            .with_headers(FieldTable::from(self.headers.clone()));

        if let Some(msg_type) = &self.msg_type {
            props = props.with_type(ShortString::from(msg_type.clone()));
        }

        if self.persistent {
            props = props.with_delivery_mode(PERSISTENT_DELIVERY_MODE);
        }

        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_default_to_json_with_a_message_id() {
        let props = PublishOptions::new().properties();

        assert_eq!(
            props.content_type().as_ref().map(|c| c.as_str()),
            Some(JSON_CONTENT_TYPE)
        );
        assert!(props.message_id().is_some());
        assert!(props.delivery_mode().is_none());
    }

    #[test]
    fn headers_and_type_are_carried() {
        let props = PublishOptions::new()
            .msg_type("order.created")
            .message_id("42")
            .persistent()
            .header("tenant", HeaderValue::LongString("acme".to_owned()))
            .properties();

        assert_eq!(props.kind().as_ref().map(|k| k.as_str()), Some("order.created"));
        assert_eq!(props.message_id().as_ref().map(|k| k.as_str()), Some("42"));
        assert_eq!(props.delivery_mode(), &Some(PERSISTENT_DELIVERY_MODE));

        let headers = props.headers().clone().unwrap_or_default();
        assert_eq!(
            headers.inner().get("tenant"),
            Some(&AMQPValue::LongString(LongString::from("acme")))
        );
    }

    #[test]
    fn unsigned_headers_keep_their_value() {
        assert_eq!(
            AMQPValue::from(HeaderValue::LongLongUint(7)),
            AMQPValue::LongLongInt(7)
        );
        assert_eq!(
            AMQPValue::from(HeaderValue::LongLongUint(i64::MAX as u64)),
            AMQPValue::LongLongInt(i64::MAX)
        );
        assert_eq!(
            AMQPValue::from(HeaderValue::LongLongUint(u64::MAX)),
            AMQPValue::LongString(LongString::from("18446744073709551615"))
        );
    }
}
