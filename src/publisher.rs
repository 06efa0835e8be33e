// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! Minimal counterpart to the consumer: publishes a payload to a fanout
//! topic. Host processes also use it to deliver the shutdown sentinel that
//! terminates a consume loop.

use crate::errors::AmqpError;
use lapin::{options::BasicPublishOptions, types::ShortString, BasicProperties, Channel};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Publishes messages to fanout exchanges over an existing channel.
pub struct AmqpPublisher {
    channel: Channel,
}

impl AmqpPublisher {
    pub fn new(channel: Channel) -> Arc<AmqpPublisher> {
        Arc::new(AmqpPublisher { channel })
    }

    /// Publishes the payload to the topic's fanout exchange.
    ///
    /// The routing key is left empty (fanout semantics ignore it) and each
    /// message is stamped with a v4 uuid message id. The exchange is not
    /// declared here; consumers own the topology.
    ///
    /// # Returns
    /// Ok(()) on success or `AmqpError::PublishingError` on failure.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                topic,
                "",
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                BasicProperties::default()
                    .with_message_id(ShortString::from(Uuid::new_v4().to_string())),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }
}
