// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Handler Contract
//!
//! The downstream contract implemented by the embedding application. The
//! consume loop hands every delivered message to a `ConsumerHandler`;
//! handler failures are contained by the loop and must not be relied upon
//! for flow control.

use crate::errors::AmqpError;
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// A message as seen by a handler: the raw payload plus the topic it was
/// consumed from.
#[derive(Clone, Default)]
pub struct ConsumerMessage {
    pub topic: String,
    pub data: Box<[u8]>,
}

impl ConsumerMessage {
    pub fn new<T>(topic: T, data: &[u8]) -> Self
    where
        T: Into<String>,
    {
        ConsumerMessage {
            topic: topic.into(),
            data: data.into(),
        }
    }
}

/// Application-supplied processing logic for consumed messages.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConsumerHandler: Send + Sync {
    async fn exec(&self, msg: &ConsumerMessage) -> Result<(), AmqpError>;
}
