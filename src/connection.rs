// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection Management
//!
//! This module owns the single transport connection to the RabbitMQ server.
//! The connection is created lazily on first acquisition, with a bounded
//! retry to ride out a broker that is still starting up. On every later
//! acquisition the cached connection is checked for liveness; a dead
//! connection gets exactly one reconnect attempt, so a persistently broken
//! broker surfaces as an error on the current call instead of blocking
//! indefinitely.

use crate::{configs::BrokerConfigs, errors::AmqpError};
use lapin::{types::LongString, Connection, ConnectionProperties};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// AMQP reply code sent with a deliberate close
pub(crate) const REPLY_SUCCESS: u16 = 200;

/// Bounded retry applied to the initial connection establishment.
///
/// Reconnects after a drop are deliberately not governed by this policy;
/// those get a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of connection attempts before giving up
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 9,
            delay: Duration::from_micros(100),
        }
    }
}

/// Manages the lifecycle of a single connection to the RabbitMQ server.
///
/// Exactly one connection is cached at a time; it is replaced only by a
/// successful reconnect and closed once during teardown.
pub struct ConnectionManager {
    service: String,
    configs: BrokerConfigs,
    policy: RetryPolicy,
    connection: Option<Connection>,
}

impl ConnectionManager {
    /// Creates a new manager for the given service identity and broker
    /// endpoint. No connection is opened until [`acquire`](Self::acquire)
    /// is called.
    pub fn new(service: &str, configs: BrokerConfigs) -> Self {
        ConnectionManager {
            service: service.to_owned(),
            configs,
            policy: RetryPolicy::default(),
            connection: None,
        }
    }

    /// Replaces the retry policy used for initial establishment.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns a live connection, creating or restoring it as needed.
    ///
    /// # Returns
    /// * `Err(AmqpError::ConnectionError)` when the retry budget is
    ///   exhausted at first use, or when the single reconnect attempt after
    ///   a drop fails.
    pub async fn acquire(&mut self) -> Result<&Connection, AmqpError> {
        if self.connection.is_none() {
            let conn = self.establish().await?;
            self.connection = Some(conn);
        } else if !self.is_alive() {
            warn!("amqp connection lost, reconnecting...");
            let conn = self.connect().await.map_err(|err| {
                error!(error = err.to_string(), "failure to reconnect");
                AmqpError::ConnectionError(err.to_string())
            })?;
            self.connection = Some(conn);
        }

        self.connection.as_ref().ok_or(AmqpError::InternalError)
    }

    fn is_alive(&self) -> bool {
        self.connection
            .as_ref()
            .map_or(false, |conn| conn.status().connected())
    }

    /// Best-effort close of the cached connection.
    ///
    /// Teardown failures are suppressed; calling this without an established
    /// connection is a no-op.
    pub async fn close(&mut self) {
        if let Some(conn) = self.connection.take() {
            debug!("closing amqp connection...");
            if let Err(err) = conn.close(REPLY_SUCCESS, "consumer teardown").await {
                debug!(error = err.to_string(), "connection close failure suppressed");
            }
        }
    }

    /// Initial establishment with bounded retry and fixed inter-attempt
    /// delay.
    async fn establish(&self) -> Result<Connection, AmqpError> {
        let mut attempt = 1;
        loop {
            debug!(attempt, "creating amqp connection...");

            match self.connect().await {
                Ok(conn) => {
                    debug!("amqp connected");
                    return Ok(conn);
                }
                Err(err) => {
                    warn!(
                        error = err.to_string(),
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        "failure to connect"
                    );

                    if attempt >= self.policy.max_attempts {
                        error!("connection retry budget exhausted");
                        return Err(AmqpError::ConnectionError(err.to_string()));
                    }

                    attempt += 1;
                    sleep(self.policy.delay).await;
                }
            }
        }
    }

    /// A single connection attempt, shared by establishment and reconnect.
    async fn connect(&self) -> Result<Connection, lapin::Error> {
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(self.service.clone()));

        Connection::connect(&self.configs.uri(), options).await
    }
}
