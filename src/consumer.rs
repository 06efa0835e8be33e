// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! This module provides the public consumer facade and the blocking consume
//! loop. A consumer binds a named service to a fanout topic, dispatches each
//! delivered payload to the application handler, and acknowledges every
//! message exactly once, whether or not the handler succeeded.
//!
//! Consumption ends when a message whose body is exactly the shutdown
//! sentinel arrives: the message is still handled and acked like any other,
//! then the consumer registration is cancelled and `consume` returns.

use crate::{
    channel::ChannelManager,
    configs::BrokerConfigs,
    connection::{ConnectionManager, RetryPolicy},
    errors::AmqpError,
    handler::{ConsumerHandler, ConsumerMessage},
    topology::{declare_fanout_binding, queue_name},
};
use futures_util::{Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{BasicAckOptions, BasicCancelOptions, BasicConsumeOptions},
    types::FieldTable,
};
use std::{future::Future, sync::Arc};
use tracing::{debug, error, warn};

/// Payload that terminates the consume loop instead of being treated as
/// ordinary application data. Exact byte match.
pub const SHUTDOWN_SENTINEL: &[u8] = b"quit";

/// A resilient consumer bound to one service identity.
///
/// The instance exclusively owns its connection and channel; running
/// multiple topics or services requires one instance each. `consume` blocks
/// the calling task, so the facade's other methods must not be called while
/// a loop is in flight.
pub struct AmqpConsumer {
    service: String,
    channels: ChannelManager,
}

impl AmqpConsumer {
    /// Creates a consumer for the given service identity and broker
    /// endpoint. Nothing is opened until the first `consume` call.
    ///
    /// The service name doubles as the consumer tag and as the suffix of
    /// the per-service queue name.
    pub fn new(service: &str, configs: BrokerConfigs) -> Self {
        let connections = ConnectionManager::new(service, configs);

        AmqpConsumer {
            service: service.to_owned(),
            channels: ChannelManager::new(connections),
        }
    }

    /// Replaces the bounded-retry policy applied to the initial connection
    /// establishment.
    pub fn new_with_retry_policy(service: &str, configs: BrokerConfigs, policy: RetryPolicy) -> Self {
        let connections = ConnectionManager::new(service, configs).with_retry_policy(policy);

        AmqpConsumer {
            service: service.to_owned(),
            channels: ChannelManager::new(connections),
        }
    }

    /// Consumes the given topic until the shutdown sentinel is received.
    ///
    /// Acquires the channel (transitively creating or repairing the
    /// connection), declares the fanout topology, registers the consumer
    /// and blocks on deliveries. Handler failures are logged and swallowed;
    /// every delivered message is acked.
    ///
    /// # Returns
    /// * `Ok(())` after the sentinel cancelled the registration.
    /// * `Err(AmqpError::ConnectionError)` when the connection could not be
    ///   established or restored, or when the broker dropped it mid-consume
    ///   and the delivery stream ended without a cancellation.
    /// * `Err(_)` for declaration or consumer-registration failures; these
    ///   are not retried.
    pub async fn consume(
        &mut self,
        topic: &str,
        handler: Arc<dyn ConsumerHandler>,
    ) -> Result<(), AmqpError> {
        let channel = self.channels.acquire().await?;

        let queue = queue_name(topic, &self.service);
        declare_fanout_binding(&channel, topic, &queue).await?;

        let consumer = match channel
            .basic_consume(
                &queue,
                &self.service,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(self.service.clone()))
            }
            Ok(c) => Ok(c),
        }?;

        debug!(queue = queue.as_str(), "consuming...");

        let service = self.service.clone();
        let cancel_channel = channel.clone();

        drain_deliveries(consumer, topic, handler.as_ref(), || {
            let channel = cancel_channel.clone();
            let service = service.clone();

            async move {
                match channel
                    .basic_cancel(&service, BasicCancelOptions::default())
                    .await
                {
                    Err(err) => {
                        error!(error = err.to_string(), "error to cancel the consumer");
                        Err(AmqpError::CancelConsumerError(service))
                    }
                    _ => Ok(()),
                }
            }
        })
        .await
    }

    /// Structured teardown: closes the channel, then the connection, both
    /// best-effort. A consumer that never connected tears down as a no-op.
    pub async fn close(&mut self) {
        self.channels.close().await;
    }
}

/// What the loop should do after a delivery was processed.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Continue,
    Shutdown,
}

/// Drains the delivery stream until the consumer is cancelled.
///
/// Per-message failures are logged and never abort the loop. A `Shutdown`
/// outcome invokes `cancel` and ends consumption normally. A stream that
/// ends without a cancellation means the broker dropped the connection, and
/// that surfaces as a `ConnectionError` rather than a clean return.
pub(crate) async fn drain_deliveries<S, C, Fut>(
    mut deliveries: S,
    topic: &str,
    handler: &dyn ConsumerHandler,
    cancel: C,
) -> Result<(), AmqpError>
where
    S: Stream<Item = Result<Delivery, lapin::Error>> + Unpin,
    C: Fn() -> Fut,
    Fut: Future<Output = Result<(), AmqpError>>,
{
    let mut cancelled = false;

    while let Some(result) = deliveries.next().await {
        match result {
            Ok(delivery) => match process_delivery(&delivery, topic, handler).await {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Shutdown) => {
                    debug!("shutdown sentinel received, cancelling the consumer");
                    cancel().await?;
                    cancelled = true;
                    break;
                }
                Err(err) => error!(error = err.to_string(), "error consume msg"),
            },
            Err(err) => error!(error = err.to_string(), "errors consume msg"),
        }
    }

    if !cancelled {
        error!("delivery stream closed before the consumer was cancelled");
        return Err(AmqpError::ConnectionError(
            "connection closed while consuming".to_owned(),
        ));
    }

    Ok(())
}

/// Processes one delivery: handler first, then ack, then sentinel check.
///
/// The handler runs first and may fail freely; the failure is logged and
/// discarded so it can neither escape the loop nor prevent acknowledgment.
/// The ack is unconditional, and the shutdown decision depends only on the
/// message body: a failed ack on the sentinel must not discard the shutdown
/// request.
pub(crate) async fn process_delivery(
    delivery: &Delivery,
    topic: &str,
    handler: &dyn ConsumerHandler,
) -> Result<Outcome, AmqpError> {
    let msg = ConsumerMessage::new(topic, &delivery.data);

    if let Err(err) = handler.exec(&msg).await {
        warn!(
            error = err.to_string(),
            topic, "handler failure, message will be acked anyway"
        );
    }

    let shutdown = is_shutdown(&delivery.data);

    if let Err(err) = delivery.ack(BasicAckOptions { multiple: false }).await {
        error!(error = err.to_string(), "error whiling ack msg");
        if !shutdown {
            return Err(AmqpError::AckMessageError);
        }
        warn!("ack failure on the shutdown sentinel, cancelling anyway");
    }

    if shutdown {
        return Ok(Outcome::Shutdown);
    }

    Ok(Outcome::Continue)
}

/// Exact byte match against the shutdown sentinel.
pub(crate) fn is_shutdown(data: &[u8]) -> bool {
    data == SHUTDOWN_SENTINEL
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MockConsumerHandler;
    use async_trait::async_trait;
    use futures_util::stream;
    use lapin::{acker::Acker, protocol::basic::AMQPProperties, types::ShortString};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    fn delivery_with_body(body: &[u8]) -> Delivery {
        Delivery {
            acker: Acker::default(),
            data: body.to_vec(),
            delivery_tag: 0,
            exchange: ShortString::from("orders"),
            properties: AMQPProperties::default(),
            redelivered: false,
            routing_key: ShortString::from(""),
        }
    }

    #[tokio::test]
    async fn should_process_msg_and_keep_consuming() {
        let delivery = delivery_with_body(b"hello");
        let handler = MockedHandler::new(None);

        let res = process_delivery(&delivery, "orders", &handler).await;

        assert_eq!(res, Ok(Outcome::Continue));

        let seen = handler.seen.lock().unwrap();
        assert_eq!(*seen, vec![("orders".to_owned(), b"hello".to_vec())]);
    }

    #[tokio::test]
    async fn should_swallow_handler_failure_and_still_ack() {
        let delivery = delivery_with_body(b"hello");
        let handler = MockedHandler::new(Some(AmqpError::InternalError));

        let res = process_delivery(&delivery, "orders", &handler).await;

        assert_eq!(res, Ok(Outcome::Continue));
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_request_shutdown_on_sentinel() {
        let delivery = delivery_with_body(SHUTDOWN_SENTINEL);
        let handler = MockedHandler::new(None);

        let res = process_delivery(&delivery, "orders", &handler).await;

        assert_eq!(res, Ok(Outcome::Shutdown));

        // the sentinel is still handed to the handler before cancellation
        let seen = handler.seen.lock().unwrap();
        assert_eq!(*seen, vec![("orders".to_owned(), b"quit".to_vec())]);
    }

    #[tokio::test]
    async fn should_not_treat_sentinel_prefix_as_sentinel() {
        let delivery = delivery_with_body(b"quit now");
        let handler = MockedHandler::new(None);

        let res = process_delivery(&delivery, "orders", &handler).await;

        assert_eq!(res, Ok(Outcome::Continue));
    }

    #[tokio::test]
    async fn should_invoke_handler_exactly_once_per_delivery() {
        let delivery = delivery_with_body(b"hello");

        let mut handler = MockConsumerHandler::new();
        handler
            .expect_exec()
            .withf(|msg| msg.topic == "orders" && msg.data.as_ref() == b"hello")
            .times(1)
            .returning(|_| Ok(()));

        let res = process_delivery(&delivery, "orders", &handler).await;

        assert_eq!(res, Ok(Outcome::Continue));
    }

    #[tokio::test]
    async fn should_cancel_and_stop_draining_when_sentinel_arrives() {
        let deliveries: Vec<Result<Delivery, lapin::Error>> = vec![
            Ok(delivery_with_body(b"hello")),
            Ok(delivery_with_body(SHUTDOWN_SENTINEL)),
            Ok(delivery_with_body(b"late")),
        ];
        let handler = MockedHandler::new(None);
        let cancels = AtomicUsize::new(0);

        let res = drain_deliveries(stream::iter(deliveries), "orders", &handler, || {
            cancels.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert_eq!(res, Ok(()));
        assert_eq!(cancels.load(Ordering::SeqCst), 1);

        // nothing past the sentinel is processed
        let seen = handler.seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("orders".to_owned(), b"hello".to_vec()),
                ("orders".to_owned(), b"quit".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn should_report_connection_error_when_stream_ends_uncancelled() {
        // a broker drop ends the stream without any cancellation
        let deliveries: Vec<Result<Delivery, lapin::Error>> =
            vec![Ok(delivery_with_body(b"hello"))];
        let handler = MockedHandler::new(None);
        let cancels = AtomicUsize::new(0);

        let res = drain_deliveries(stream::iter(deliveries), "orders", &handler, || {
            cancels.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(res, Err(AmqpError::ConnectionError(_))));
        assert_eq!(cancels.load(Ordering::SeqCst), 0);
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn should_keep_draining_past_handler_failures() {
        let deliveries: Vec<Result<Delivery, lapin::Error>> = vec![
            Ok(delivery_with_body(b"boom")),
            Ok(delivery_with_body(SHUTDOWN_SENTINEL)),
        ];
        let handler = MockedHandler::new(Some(AmqpError::InternalError));
        let cancels = AtomicUsize::new(0);

        let res = drain_deliveries(stream::iter(deliveries), "orders", &handler, || {
            cancels.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert_eq!(res, Ok(()));
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert_eq!(handler.seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn shutdown_decision_depends_only_on_the_body() {
        assert!(is_shutdown(b"quit"));
        assert!(!is_shutdown(b"quit now"));
        assert!(!is_shutdown(b"QUIT"));
        assert!(!is_shutdown(b""));
    }

    #[tokio::test]
    async fn close_before_any_connection_is_a_noop() {
        let mut consumer = AmqpConsumer::new("billing", crate::configs::BrokerConfigs::default());

        consumer.close().await;
    }

    pub struct MockedHandler {
        pub mock_error: Option<AmqpError>,
        pub seen: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl MockedHandler {
        fn new(mock_error: Option<AmqpError>) -> Self {
            MockedHandler {
                mock_error,
                seen: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl ConsumerHandler for MockedHandler {
        async fn exec(&self, msg: &ConsumerMessage) -> Result<(), AmqpError> {
            self.seen
                .lock()
                .unwrap()
                .push((msg.topic.clone(), msg.data.to_vec()));

            match &self.mock_error {
                None => Ok(()),
                Some(err) => Err(err.clone()),
            }
        }
    }
}
