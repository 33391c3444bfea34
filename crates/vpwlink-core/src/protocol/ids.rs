//! Bus identifiers
//!
//! Device addresses, header priorities, diagnostic modes and the block ids
//! the PCM answers to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Node addresses on the VPW bus
pub mod device {
    /// Powertrain control module
    pub const PCM: u8 = 0x10;
    /// Off-board diagnostic tool (us)
    pub const TOOL: u8 = 0xF0;
    /// Every node
    pub const BROADCAST: u8 = 0xFE;
}

/// First header byte values
pub mod priority {
    /// Functional addressing, lowest priority
    pub const FUNCTIONAL_LOW: u8 = 0x48;
    /// Functional addressing, used for clear-DTC
    pub const FUNCTIONAL: u8 = 0x68;
    /// Functional addressing, second target
    pub const FUNCTIONAL_2: u8 = 0x6A;
    /// Physical addressing, normal priority
    pub const PHYSICAL: u8 = 0x6C;
    /// Block transfer
    pub const BLOCK: u8 = 0x6D;
    /// Physical addressing, high priority
    pub const PHYSICAL_HIGH: u8 = 0x8C;
}

/// Diagnostic modes
pub mod mode {
    /// Added to a request mode to form its positive response mode
    pub const RESPONSE: u8 = 0x40;
    /// General reject
    pub const REJECTED: u8 = 0x7F;
    /// Clear diagnostic trouble codes
    pub const CLEAR_DTC: u8 = 0x04;
    /// Clear diagnostic information
    pub const CLEAR_DIAGNOSTIC_INFO: u8 = 0x14;
    /// Leave a loaded kernel
    pub const EXIT_KERNEL: u8 = 0x20;
    /// Read a parameter id
    pub const GET_PID: u8 = 0x22;
    /// Read memory by address
    pub const GET_RAM: u8 = 0x23;
    /// Security access, seed and key
    pub const SEED: u8 = 0x27;
    /// Disable normal communication
    pub const SILENCE_BUS: u8 = 0x28;
    /// Dynamic data packet stream
    pub const SEND_DYNAMIC_DATA: u8 = 0x2A;
    /// Configure dynamic data packets
    pub const CONFIGURE_DYNAMIC_DATA: u8 = 0x2C;
    /// Request download
    pub const UPLOAD_REQUEST: u8 = 0x34;
    /// Transfer data
    pub const UPLOAD: u8 = 0x36;
    /// Read a data block
    pub const READ_BLOCK: u8 = 0x3C;
    /// Tool present
    pub const TEST_DEVICE_PRESENT: u8 = 0x3F;
    /// Prepare for 4x bus speed
    pub const HIGH_SPEED_PREPARE: u8 = 0xA0;
    /// Switch to 4x bus speed
    pub const HIGH_SPEED: u8 = 0xA1;
}

/// Security access submodes
pub mod submode {
    /// Ask for a seed
    pub const GET_SEED: u8 = 0x01;
    /// Answer with a key
    pub const SEND_KEY: u8 = 0x02;
}

/// Data blocks readable with mode 0x3C
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BlockId {
    /// VIN, first 5 characters
    Vin1 = 0x01,
    /// VIN, characters 6 to 9
    Vin2 = 0x02,
    /// VIN, characters 10 to 13
    Vin3 = 0x03,
    /// Serial number, part 1
    Serial1 = 0x04,
    /// Serial number, part 2
    Serial2 = 0x05,
    /// Serial number, part 3
    Serial3 = 0x06,
    /// Serial number, part 4
    Serial4 = 0x07,
    /// Calibration id
    CalibrationId = 0x08,
    /// Operating system id
    OperatingSystemId = 0x0A,
    /// Engine calibration id
    EngineCalibrationId = 0x0B,
    /// Engine diagnostic calibration id
    EngineDiagnosticCalibrationId = 0x0C,
    /// Transmission calibration id
    TransmissionCalibrationId = 0x0D,
    /// Transmission diagnostic calibration id
    TransmissionDiagnosticCalibrationId = 0x0E,
    /// Fuel system calibration id
    FuelCalibrationId = 0x0F,
    /// System calibration id
    SystemCalibrationId = 0x10,
    /// Speedometer calibration id
    SpeedCalibrationId = 0x11,
    /// Broadcast code
    BroadcastCode = 0x14,
    /// Manufacturer enable counter
    ManufacturerEnableCounter = 0xA0,
}

impl BlockId {
    /// Every block id, in numeric order
    pub const ALL: [BlockId; 18] = [
        BlockId::Vin1,
        BlockId::Vin2,
        BlockId::Vin3,
        BlockId::Serial1,
        BlockId::Serial2,
        BlockId::Serial3,
        BlockId::Serial4,
        BlockId::CalibrationId,
        BlockId::OperatingSystemId,
        BlockId::EngineCalibrationId,
        BlockId::EngineDiagnosticCalibrationId,
        BlockId::TransmissionCalibrationId,
        BlockId::TransmissionDiagnosticCalibrationId,
        BlockId::FuelCalibrationId,
        BlockId::SystemCalibrationId,
        BlockId::SpeedCalibrationId,
        BlockId::BroadcastCode,
        BlockId::ManufacturerEnableCounter,
    ];

    /// Wire value
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Look up a wire value
    pub fn from_code(code: u8) -> Option<BlockId> {
        Self::ALL.iter().copied().find(|b| b.code() == code)
    }

    /// Blocks that hold a 32-bit calibration or OS id
    pub fn is_calibration_id(self) -> bool {
        matches!(
            self,
            BlockId::CalibrationId
                | BlockId::OperatingSystemId
                | BlockId::EngineCalibrationId
                | BlockId::EngineDiagnosticCalibrationId
                | BlockId::TransmissionCalibrationId
                | BlockId::TransmissionDiagnosticCalibrationId
                | BlockId::FuelCalibrationId
                | BlockId::SystemCalibrationId
                | BlockId::SpeedCalibrationId
        )
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({:#04x})", self, self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_codes_round_trip() {
        for block in BlockId::ALL {
            assert_eq!(BlockId::from_code(block.code()), Some(block));
        }
        assert_eq!(BlockId::from_code(0x09), None);
    }

    #[test]
    fn test_calibration_blocks() {
        assert!(BlockId::OperatingSystemId.is_calibration_id());
        assert!(BlockId::SpeedCalibrationId.is_calibration_id());
        assert!(!BlockId::Vin1.is_calibration_id());
        assert!(!BlockId::BroadcastCode.is_calibration_id());
    }
}
