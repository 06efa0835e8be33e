// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Management
//!
//! This module handles the creation and caching of the communication channel
//! multiplexed over the managed connection. One channel is created lazily
//! per live connection and reused across `consume` calls.
//!
//! Channel liveness is re-checked on every acquisition rather than assumed
//! to track the connection: a channel the broker closed on its own, or one
//! orphaned by a reconnect, is discarded and recreated from the current
//! connection.

use crate::{
    connection::{ConnectionManager, REPLY_SUCCESS},
    errors::AmqpError,
};
use lapin::Channel;
use tracing::{debug, error};

/// Manages the single channel owned by a consumer instance.
pub struct ChannelManager {
    connections: ConnectionManager,
    channel: Option<Channel>,
}

impl ChannelManager {
    /// Creates a new manager on top of the given connection manager. No
    /// channel is opened until [`acquire`](Self::acquire) is called.
    pub fn new(connections: ConnectionManager) -> Self {
        ChannelManager {
            connections,
            channel: None,
        }
    }

    /// Returns a live channel, acquiring (and repairing, if needed) the
    /// underlying connection first.
    ///
    /// # Returns
    /// * `Err(AmqpError::ConnectionError)` propagated from the connection
    ///   manager.
    /// * `Err(AmqpError::ChannelError)` when the channel could not be
    ///   created on a live connection.
    pub async fn acquire(&mut self) -> Result<Channel, AmqpError> {
        if let Some(channel) = &self.channel {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        let connection = self.connections.acquire().await?;

        debug!("creating amqp channel...");
        match connection.create_channel().await {
            Ok(channel) => {
                debug!("channel created");
                self.channel = Some(channel.clone());
                Ok(channel)
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
        }
    }

    /// Best-effort teardown: closes the channel first, then the connection.
    ///
    /// Failures on either close are suppressed. Safe to call when nothing
    /// was ever created.
    pub async fn close(&mut self) {
        if let Some(channel) = self.channel.take() {
            debug!("closing amqp channel...");
            if let Err(err) = channel.close(REPLY_SUCCESS, "consumer teardown").await {
                debug!(error = err.to_string(), "channel close failure suppressed");
            }
        }

        self.connections.close().await;
    }
}
