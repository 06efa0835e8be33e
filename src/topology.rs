// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module declares the fanout topology a consumer binds to: one durable
//! queue per (topic, service) pair, one durable fanout exchange per topic,
//! and the binding between them.
//!
//! All declarations are idempotent on the broker side, so they run on every
//! `consume` invocation without duplicating state.

use crate::errors::AmqpError;
use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::FieldTable,
    Channel, ExchangeKind,
};
use tracing::{debug, error};

/// Computes the per-service queue name for a topic.
///
/// The queue is shared by all instances of a service, which distributes
/// deliveries among them.
///
/// # Example
/// ```
/// use amqp_consumer::topology::queue_name;
///
/// assert_eq!(queue_name("orders", "billing"), "orders.billing");
/// ```
pub fn queue_name(topic: &str, service: &str) -> String {
    format!("{}.{}", topic, service)
}

/// Declares the queue, the fanout exchange, and the binding between them.
///
/// The queue is durable, non-exclusive and non-auto-delete; the exchange is
/// a durable, non-auto-delete fanout. The binding carries no routing key,
/// so every message published to the topic reaches every bound queue.
///
/// # Returns
/// Ok(()) on success or the first declaration failure; declaration failures
/// are not retried.
pub async fn declare_fanout_binding(
    channel: &Channel,
    topic: &str,
    queue: &str,
) -> Result<(), AmqpError> {
    debug!("creating queue: {}", queue);

    match channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                passive: false,
                durable: true,
                exclusive: false,
                auto_delete: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to declare the queue");
            Err(AmqpError::DeclareQueueError(queue.to_owned()))
        }
        _ => Ok(()),
    }?;

    debug!("creating exchange: {}", topic);

    match channel
        .exchange_declare(
            topic,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                passive: false,
                durable: true,
                auto_delete: false,
                internal: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                name = topic,
                "error to declare the exchange"
            );
            Err(AmqpError::DeclareExchangeError(topic.to_owned()))
        }
        _ => Ok(()),
    }?;

    debug!("binding queue: {} to the exchange: {}", queue, topic);

    match channel
        .queue_bind(
            queue,
            topic,
            "",
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to bind queue to exchange");
            Err(AmqpError::BindingExchangeToQueueError(
                queue.to_owned(),
                topic.to_owned(),
            ))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_name_is_deterministic() {
        assert_eq!(queue_name("orders", "billing"), "orders.billing");
        assert_eq!(queue_name("orders", "billing"), queue_name("orders", "billing"));
    }

    #[test]
    fn queue_name_keeps_topic_first() {
        assert_eq!(queue_name("billing", "orders"), "billing.orders");
    }
}
