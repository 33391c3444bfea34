//! # vpwlink Core Library
//!
//! Protocol and decoding layer for talking to GM powertrain modules over
//! the J1850 VPW bus.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - CRC-8 as used on the VPW bus
//! - Frame codecs for binary (AVT) and AT-command (ScanTool/ELM) adapters
//! - Request/response orchestration with retries, cancellation and keep-alive
//! - Parsing of PCM block responses (OS id, VIN, serial, seed/key)
//! - CAN and VPW capture decoding
//! - Motorola S-Record reading and kernel image extraction
//!
//! ## Supported Adapters
//!
//! - AVT 852 / 842 / 838
//! - OBDLink ScanTool (STPX) and other ELM327-style adapters
//!
//! ## Example
//!
//! ```rust,no_run
//! use vpwlink_core::prelude::*;
//!
//! let config = SessionConfig::from_file("session.json")?;
//! let transport = SerialTransport::new("/dev/ttyUSB0");
//! let mut session = Session::new(transport, &config, tracing_logger());
//! session.open()?;
//!
//! let os = session.query_operating_system_id();
//! if os.is_success() {
//!     println!("OS: {}", os.value);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bus;
pub mod codec;
pub mod config;
pub mod device;
pub mod hex;
pub mod logger;
pub mod protocol;
pub mod session;
pub mod srecord;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bus::{CanFrame, CanParser, VpwFrame, VpwLogParser};
    pub use crate::codec::{AdapterKind, Codec, HeaderMode};
    pub use crate::config::SessionConfig;
    pub use crate::device::Device;
    pub use crate::logger::{tracing_logger, Logger, MemoryLogger, SharedLogger};
    pub use crate::protocol::{
        BlockId, BlockParser, Message, ProtocolError, RequestBuilder, Response, ResponseStatus,
        RetryPolicy,
    };
    pub use crate::session::Session;
    pub use crate::srecord::{PayloadFilter, SRecord, SRecordReader};
    pub use crate::transport::{PortConfig, SerialTransport, Transport};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
