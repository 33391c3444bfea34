//! Motorola S-Record firmware images
//!
//! Reads S-Record files one record at a time and carves the data that
//! falls inside an address range into a flat image.
//!
//! ```no_run
//! use vpwlink_core::srecord::{PayloadFilter, SRecordReader, KERNEL_LOAD_RANGE};
//!
//! let reader = SRecordReader::open("kernel.S")?;
//! let image = PayloadFilter::new(KERNEL_LOAD_RANGE).extract(reader)?;
//! # Ok::<(), vpwlink_core::srecord::SRecordError>(())
//! ```

mod error;
mod filter;
mod reader;
mod record;

pub use error::SRecordError;
pub use filter::{PayloadFilter, KERNEL_LOAD_RANGE};
pub use reader::SRecordReader;
pub use record::{address_width, SRecord};
