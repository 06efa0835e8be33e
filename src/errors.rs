// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP Consumer
//!
//! This module provides the error taxonomy for the consumer adapter. The
//! `AmqpError` enum covers connection establishment and recovery, channel
//! creation, topology declaration, consumer registration and cancellation,
//! message acknowledgment, and publishing.
//!
//! Two failure classes intentionally have no variant here: handler failures
//! and teardown failures. Both are contained at the point they occur (logged
//! and recovered locally) and are never surfaced to callers.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Only `ConnectionError` and the declaration/registration variants can
/// escape a `consume` call; everything else is handled inside the consume
/// loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing or restoring a connection to the broker.
    /// Carries the underlying cause reported by the client.
    #[error("failure to connect: `{0}`")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{0}` to exchange `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error registering a consumer on a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error cancelling an active consumer registration
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,
}
