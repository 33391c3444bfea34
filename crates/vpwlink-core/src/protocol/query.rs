//! Request/response orchestration
//!
//! One exchange walks a fixed state machine:
//!
//! ```text
//! Idle -> Sending (up to N attempts) -> Sent -> Receiving (up to N attempts) -> Classified
//! ```
//!
//! Sending is retried only when the write itself fails. Receiving is
//! retried whenever the reply does not classify as success: the bus is
//! shared and noisy, so a stray frame, a short frame or a timeout is a
//! reason to listen again rather than to give up. Once the receive budget
//! is spent the exchange reports [`ResponseStatus::Error`] with the
//! placeholder value.

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;

use super::{Message, Response, ResponseStatus, MAX_RECEIVE_ATTEMPTS, MAX_SEND_ATTEMPTS};
use crate::device::Device;
use crate::transport::Transport;

/// Attempt budgets for one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Writes tried before giving up
    pub send_attempts: u32,
    /// Replies examined before giving up
    pub receive_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            send_attempts: MAX_SEND_ATTEMPTS,
            receive_attempts: MAX_RECEIVE_ATTEMPTS,
        }
    }
}

/// Where an exchange is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    /// Nothing sent yet
    Idle,
    /// Writing the request
    Sending {
        /// 1-based attempt number
        attempt: u32,
    },
    /// Request written
    Sent,
    /// Waiting for a reply that classifies as success
    Receiving {
        /// 1-based attempt number
        attempt: u32,
    },
    /// Finished without success
    Classified(ResponseStatus),
}

/// A request generator bound to a response filter
///
/// The generator runs once per send attempt so every retry transmits a
/// freshly built message. The filter classifies each received message.
pub struct Query<T, G, F> {
    generator: G,
    filter: F,
    _value: PhantomData<fn() -> T>,
}

impl<T, G, F> Query<T, G, F>
where
    T: Default,
    G: FnMut() -> Message,
    F: FnMut(&Message) -> Response<T>,
{
    /// Bind a generator and a filter
    pub fn new(generator: G, filter: F) -> Self {
        Self {
            generator,
            filter,
            _value: PhantomData,
        }
    }

    /// Run one exchange on `device`
    pub fn execute<D: Transport>(
        mut self,
        device: &mut Device<D>,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Response<T> {
        let mut state = ExchangeState::Idle;
        let mut retries = 0u32;

        loop {
            if cancel.is_cancelled() {
                // leave the transport at a frame boundary
                if let Err(e) = device.clear_message_queue() {
                    tracing::warn!("discard after cancel failed: {}", e);
                }
                device.logger().debug("exchange cancelled");
                return Response::failure(ResponseStatus::Cancelled).with_retry_count(retries);
            }

            state = match state {
                ExchangeState::Idle => match device.clear_message_queue() {
                    Ok(()) => ExchangeState::Sending { attempt: 1 },
                    Err(e) => {
                        device.logger().debug(&format!("unable to clear queue: {}", e));
                        ExchangeState::Classified(ResponseStatus::Error)
                    }
                },
                ExchangeState::Sending { attempt } => {
                    let request = (self.generator)();
                    match device.send_message(&request) {
                        Ok(()) => ExchangeState::Sent,
                        Err(e) if attempt < policy.send_attempts => {
                            device
                                .logger()
                                .debug(&format!("send attempt {} failed: {}", attempt, e));
                            retries += 1;
                            ExchangeState::Sending {
                                attempt: attempt + 1,
                            }
                        }
                        Err(e) => {
                            device.logger().debug(&format!("send failed: {}", e));
                            ExchangeState::Classified(ResponseStatus::Error)
                        }
                    }
                }
                ExchangeState::Sent => ExchangeState::Receiving { attempt: 1 },
                ExchangeState::Receiving { attempt } => {
                    let status = match device.receive_message() {
                        Ok(message) => {
                            let response = (self.filter)(&message);
                            if response.is_success() {
                                return response.with_retry_count(retries);
                            }
                            response.status
                        }
                        Err(e) => e.status(),
                    };
                    device
                        .logger()
                        .debug(&format!("receive attempt {}: {}", attempt, status));
                    if attempt < policy.receive_attempts {
                        retries += 1;
                        ExchangeState::Receiving {
                            attempt: attempt + 1,
                        }
                    } else {
                        ExchangeState::Classified(ResponseStatus::Error)
                    }
                }
                ExchangeState::Classified(status) => {
                    return Response::failure(status).with_retry_count(retries);
                }
            };
            tracing::trace!("exchange state: {:?}", state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BinaryCodec, Codec};
    use crate::logger::MemoryLogger;
    use crate::transport::{MockTransport, PortConfig};
    use std::sync::Arc;

    fn loopback_device(transport: MockTransport) -> Device<MockTransport> {
        let mut device = Device::new(
            transport,
            Codec::Binary(BinaryCodec::loopback()),
            Arc::new(MemoryLogger::new()),
        );
        device.open(&PortConfig::Plain).unwrap();
        device
    }

    fn frame(bytes: &[u8]) -> Vec<u8> {
        let mut out = vec![bytes.len() as u8];
        out.extend_from_slice(bytes);
        out.push(crate::protocol::crc::vpw_crc(bytes));
        out
    }

    fn expect_mode(mode: u8) -> impl FnMut(&Message) -> Response<u8> {
        move |message| match message.mode() {
            Some(m) if m == mode => Response::success(m),
            _ => Response::failure(ResponseStatus::UnexpectedResponse),
        }
    }

    #[test]
    fn test_success_first_try() {
        let transport = MockTransport::with_responder(|_| vec![frame(&[0x6C, 0xF0, 0x10, 0x7F])]);
        let mut device = loopback_device(transport);
        let query = Query::new(|| Message::new(vec![0x6C, 0x10, 0xF0, 0x3F]), expect_mode(0x7F));
        let response = query.execute(&mut device, &RetryPolicy::default(), &CancellationToken::new());
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.retry_count, 0);
    }

    #[test]
    fn test_skips_unrelated_traffic() {
        let transport = MockTransport::with_responder(|_| {
            vec![
                frame(&[0x6C, 0xF0, 0x10, 0x60]),
                frame(&[0x6C, 0xF0, 0x10, 0x61]),
                frame(&[0x6C, 0xF0, 0x10, 0x7F]),
            ]
        });
        let mut device = loopback_device(transport);
        let query = Query::new(|| Message::new(vec![0x6C, 0x10, 0xF0, 0x3F]), expect_mode(0x7F));
        let response = query.execute(&mut device, &RetryPolicy::default(), &CancellationToken::new());
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.retry_count, 2);
    }

    #[test]
    fn test_receive_budget_exhausted() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let mut device = loopback_device(transport);
        let query = Query::new(|| Message::new(vec![0x6C, 0x10, 0xF0, 0x3F]), expect_mode(0x7F));
        let response = query.execute(&mut device, &RetryPolicy::default(), &CancellationToken::new());
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.value, 0);
        assert_eq!(response.retry_count, MAX_RECEIVE_ATTEMPTS - 1);
        assert_eq!(handle.sent().len(), 2);
    }

    #[test]
    fn test_send_retries_regenerate() {
        let transport = MockTransport::with_responder(|_| vec![frame(&[0x6C, 0xF0, 0x10, 0x7F])]);
        let handle = transport.handle();
        let mut device = loopback_device(transport);
        handle.fail_next_sends(2);

        let mut generated = 0;
        let query = Query::new(
            || {
                generated += 1;
                Message::new(vec![0x6C, 0x10, 0xF0, 0x3F])
            },
            expect_mode(0x7F),
        );
        let response = query.execute(&mut device, &RetryPolicy::default(), &CancellationToken::new());
        assert_eq!(response.status, ResponseStatus::Success);
        assert_eq!(response.retry_count, 2);
        assert_eq!(generated, 3);
    }

    #[test]
    fn test_send_budget_exhausted() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let mut device = loopback_device(transport);
        handle.fail_next_sends(10);
        let policy = RetryPolicy {
            send_attempts: 3,
            receive_attempts: 5,
        };
        let query = Query::new(|| Message::new(vec![0x6C, 0x10, 0xF0, 0x3F]), expect_mode(0x7F));
        let response = query.execute(&mut device, &policy, &CancellationToken::new());
        assert_eq!(response.status, ResponseStatus::Error);
        assert_eq!(response.retry_count, 2);
        assert!(handle.sent().is_empty());
    }

    #[test]
    fn test_cancelled_before_start() {
        let transport = MockTransport::new();
        let handle = transport.handle();
        let mut device = loopback_device(transport);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let query = Query::new(|| Message::new(vec![0x6C, 0x10, 0xF0, 0x3F]), expect_mode(0x7F));
        let response = query.execute(&mut device, &RetryPolicy::default(), &cancel);
        assert_eq!(response.status, ResponseStatus::Cancelled);
        assert!(handle.sent().is_empty());
    }
}
