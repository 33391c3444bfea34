//! Request Builder
//!
//! Builds the request messages the tool sends to the PCM.
//!
//! Every request carries the tool as source. Physically addressed requests
//! go to the configured PCM address; tool-present and bus-silence requests
//! are broadcast.

use super::ids::{device, mode, priority, submode, BlockId};
use super::message::{Message, MessageBuilder};

/// Builds requests between one tool and one PCM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestBuilder {
    tool: u8,
    pcm: u8,
}

impl RequestBuilder {
    /// Builder for an explicit tool/PCM address pair
    pub fn new(tool: u8, pcm: u8) -> Self {
        Self { tool, pcm }
    }

    /// Tool address used as source
    pub fn tool(&self) -> u8 {
        self.tool
    }

    /// PCM address used as destination
    pub fn pcm(&self) -> u8 {
        self.pcm
    }

    fn physical(&self) -> MessageBuilder {
        MessageBuilder::new(priority::PHYSICAL, self.pcm, self.tool)
    }

    /// `6C 10 F0 3C <block>`
    pub fn read_block(&self, block: BlockId) -> Message {
        self.physical().mode(mode::READ_BLOCK).byte(block.code()).build()
    }

    /// `6C 10 F0 27 01`
    pub fn seed_request(&self) -> Message {
        self.physical().mode(mode::SEED).byte(submode::GET_SEED).build()
    }

    /// `6C 10 F0 27 02 <key hi> <key lo>`
    pub fn unlock_request(&self, key: u16) -> Message {
        self.physical()
            .mode(mode::SEED)
            .byte(submode::SEND_KEY)
            .u16_be(key)
            .build()
    }

    /// `8C FE F0 3F`
    pub fn tool_present(&self) -> Message {
        MessageBuilder::new(priority::PHYSICAL_HIGH, device::BROADCAST, self.tool)
            .mode(mode::TEST_DEVICE_PRESENT)
            .build()
    }

    /// `6C FE F0 28 00`, asks every node to stop normal traffic
    pub fn silence_bus(&self) -> Message {
        MessageBuilder::new(priority::PHYSICAL, device::BROADCAST, self.tool)
            .mode(mode::SILENCE_BUS)
            .byte(0x00)
            .build()
    }

    /// `68 6A F0 04`
    pub fn clear_dtcs(&self) -> Message {
        MessageBuilder::new(priority::FUNCTIONAL, priority::FUNCTIONAL_2, self.tool)
            .mode(mode::CLEAR_DTC)
            .build()
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new(device::TOOL, device::PCM)
    }
}
