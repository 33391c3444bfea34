//! VPW request/response protocol
//!
//! Message construction, CRC, retry orchestration and response parsing
//! for talking to a PCM over a VPW adapter.
//!
//! A typical exchange: [`RequestBuilder`] produces a [`Message`], a
//! [`Query`] sends it through a [`Device`](crate::device::Device) with
//! retries, and a [`BlockParser`] method turns the reply into a
//! [`Response`].

pub mod block_parser;
pub mod crc;
mod error;
pub mod ids;
pub mod keep_alive;
pub mod key;
mod message;
pub mod query;
pub mod request_builder;
mod response;

use std::time::Duration;

pub use block_parser::{BlockParser, SeedReply, UnlockOutcome};
pub use crc::{vpw_crc, Crc8, CrcConvention};
pub use error::ProtocolError;
pub use ids::BlockId;
pub use keep_alive::{spawn_keep_alive, ToolPresentNotifier};
pub use key::{key_for_seed, SeedByteOrder, SEED_BYTE_ORDER};
pub use message::{Message, MessageBuilder};
pub use query::{ExchangeState, Query, RetryPolicy};
pub use request_builder::RequestBuilder;
pub use response::{Response, ResponseStatus};

/// Default baud rate for serial adapters
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default per-read timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Writes attempted per exchange before giving up
pub const MAX_SEND_ATTEMPTS: u32 = 5;

/// Replies examined per exchange before giving up
pub const MAX_RECEIVE_ATTEMPTS: u32 = 5;

/// Time between tool-present notifications
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(2);
