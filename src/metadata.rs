//! Frame metadata attribute parsing.
//!
//! Streaming frames carry a fixed-layout metadata blob appended by the
//! firmware: a 12-byte capture header followed by a mode-specific sequence of
//! records, each opening with `{ id, size, version, flags }`. Attribute
//! parsers are pure address arithmetic over that blob; every read is bounds
//! checked and gated by the record's validity flag bits. The buffer is only
//! borrowed for the duration of a parse.

use byteorder::{ByteOrder, LE};

use crate::error::{Error, Result};

// =============================================================================
// Record layout
// =============================================================================

/// Size of the per-frame capture header preceding the record sequence.
pub const CAPTURE_HEADER_SIZE: usize = 12;

/// Size of the `{ id, size, version, flags }` header opening every record.
pub const RECORD_HEADER_SIZE: usize = 16;

/// Byte offset of the flags word within a record.
const RECORD_FLAGS_OFFSET: usize = 12;

/// Record identifiers as written by the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordId {
    CaptureTiming = 1,
    CaptureStats = 2,
    DepthControl = 3,
    FisheyeControl = 4,
    Configuration = 5,
}

// Record sizes, header included. The sequences below are fixed per stream
// mode and never change mid-session.
pub const CAPTURE_TIMING_SIZE: usize = RECORD_HEADER_SIZE + 6 * 4;
pub const CAPTURE_STATS_SIZE: usize = RECORD_HEADER_SIZE + 3 * 4;
pub const DEPTH_CONTROL_SIZE: usize = RECORD_HEADER_SIZE + 4 * 4;
pub const FISHEYE_CONTROL_SIZE: usize = RECORD_HEADER_SIZE + 3 * 4;
pub const CONFIGURATION_SIZE: usize = RECORD_HEADER_SIZE + 8;

// Depth mode: capture header, timing, stats, depth control, configuration.
pub const DEPTH_TIMING_OFFSET: usize = CAPTURE_HEADER_SIZE;
pub const DEPTH_STATS_OFFSET: usize = DEPTH_TIMING_OFFSET + CAPTURE_TIMING_SIZE;
pub const DEPTH_CONTROL_OFFSET: usize = DEPTH_STATS_OFFSET + CAPTURE_STATS_SIZE;
pub const DEPTH_CONFIGURATION_OFFSET: usize = DEPTH_CONTROL_OFFSET + DEPTH_CONTROL_SIZE;
/// Total depth-mode metadata size.
pub const DEPTH_MODE_SIZE: usize = DEPTH_CONFIGURATION_OFFSET + CONFIGURATION_SIZE;

// Fisheye mode: capture header, timing, stats, fisheye control, configuration.
pub const FISHEYE_TIMING_OFFSET: usize = CAPTURE_HEADER_SIZE;
pub const FISHEYE_STATS_OFFSET: usize = FISHEYE_TIMING_OFFSET + CAPTURE_TIMING_SIZE;
pub const FISHEYE_CONTROL_OFFSET: usize = FISHEYE_STATS_OFFSET + CAPTURE_STATS_SIZE;
pub const FISHEYE_CONFIGURATION_OFFSET: usize = FISHEYE_CONTROL_OFFSET + FISHEYE_CONTROL_SIZE;
/// Total fisheye-mode metadata size.
pub const FISHEYE_MODE_SIZE: usize = FISHEYE_CONFIGURATION_OFFSET + CONFIGURATION_SIZE;

// Validity flag bits, one per field in record order.
pub mod timing_flags {
    pub const FRAME_COUNTER: u32 = 1 << 0;
    pub const SENSOR_TIMESTAMP: u32 = 1 << 1;
    pub const READOUT_TIME: u32 = 1 << 2;
    pub const EXPOSURE_TIME: u32 = 1 << 3;
    pub const FRAME_INTERVAL: u32 = 1 << 4;
    pub const PIPE_LATENCY: u32 = 1 << 5;
}

pub mod stats_flags {
    pub const EXPOSURE_TIME: u32 = 1 << 0;
    pub const EXPOSURE_COMPENSATION: u32 = 1 << 1;
    pub const WHITE_BALANCE: u32 = 1 << 2;
}

pub mod control_flags {
    pub const GAIN: u32 = 1 << 0;
    pub const EXPOSURE: u32 = 1 << 1;
    pub const LASER_POWER: u32 = 1 << 2;
    pub const AUTO_EXPOSURE_MODE: u32 = 1 << 3;
}

pub mod configuration_flags {
    pub const HW_TYPE: u32 = 1 << 0;
    pub const SKU_ID: u32 = 1 << 1;
    pub const FORMAT: u32 = 1 << 2;
    pub const WIDTH: u32 = 1 << 3;
    pub const HEIGHT: u32 = 1 << 4;
}

// =============================================================================
// Attributes
// =============================================================================

/// Frame attributes resolvable from the metadata blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MetadataField {
    FrameCounter,
    SensorTimestamp,
    WhiteBalance,
    GainLevel,
    ActualExposure,
    AutoExposureMode,
    HwType,
    SkuId,
    Format,
    Width,
    Height,
}

/// A fixed-offset attribute reader over a metadata blob.
///
/// `offset` addresses the record within the blob, `field_offset` the field
/// within the record. `flag_mask` names the validity bit in the record's
/// flags word; zero means the field is always valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeParser {
    pub offset: usize,
    pub field_offset: usize,
    pub size: usize,
    pub flag_mask: u32,
}

impl AttributeParser {
    pub const fn new(offset: usize, field_offset: usize, size: usize, flag_mask: u32) -> Self {
        Self {
            offset,
            field_offset,
            size,
            flag_mask,
        }
    }

    fn read_at(buf: &[u8], start: usize, size: usize) -> Result<u64> {
        let end = start
            .checked_add(size)
            .ok_or_else(|| Error::validation("metadata field offset overflows"))?;
        if end > buf.len() {
            return Err(Error::validation(format!(
                "metadata field at {}..{} exceeds {}-byte buffer",
                start,
                end,
                buf.len()
            )));
        }
        let raw = &buf[start..end];
        Ok(match size {
            1 => raw[0] as u64,
            2 => LE::read_u16(raw) as u64,
            4 => LE::read_u32(raw) as u64,
            8 => LE::read_u64(raw),
            other => {
                return Err(Error::validation(format!(
                    "unsupported metadata field width {}",
                    other
                )))
            }
        })
    }

    /// Reads the attribute out of a borrowed metadata blob.
    ///
    /// Fails with `Validation` when the blob is too short for the record or
    /// the field, and with `InvalidValue` when the record's flags word marks
    /// the field as not captured for this frame.
    pub fn parse(&self, buf: &[u8]) -> Result<u64> {
        if self.flag_mask != 0 {
            let flags = Self::read_at(buf, self.offset + RECORD_FLAGS_OFFSET, 4)? as u32;
            if flags & self.flag_mask == 0 {
                return Err(Error::invalid_value(format!(
                    "metadata flag {:#x} not set for this frame",
                    self.flag_mask
                )));
            }
        }
        Self::read_at(buf, self.offset + self.field_offset, self.size)
    }
}

// Field offsets within a record, header included.
const F0: usize = RECORD_HEADER_SIZE;
const F1: usize = RECORD_HEADER_SIZE + 4;
const F2: usize = RECORD_HEADER_SIZE + 8;
const F3: usize = RECORD_HEADER_SIZE + 12;

/// Resolves the parser for a field of the depth-mode metadata layout.
pub fn depth_parser(field: MetadataField) -> AttributeParser {
    match field {
        MetadataField::FrameCounter => {
            AttributeParser::new(DEPTH_TIMING_OFFSET, F0, 4, timing_flags::FRAME_COUNTER)
        }
        MetadataField::SensorTimestamp => {
            AttributeParser::new(DEPTH_TIMING_OFFSET, F1, 4, timing_flags::SENSOR_TIMESTAMP)
        }
        MetadataField::WhiteBalance => {
            AttributeParser::new(DEPTH_STATS_OFFSET, F2, 4, stats_flags::WHITE_BALANCE)
        }
        MetadataField::GainLevel => {
            AttributeParser::new(DEPTH_CONTROL_OFFSET, F0, 4, control_flags::GAIN)
        }
        MetadataField::ActualExposure => {
            AttributeParser::new(DEPTH_CONTROL_OFFSET, F1, 4, control_flags::EXPOSURE)
        }
        MetadataField::AutoExposureMode => AttributeParser::new(
            DEPTH_CONTROL_OFFSET,
            F3,
            4,
            control_flags::AUTO_EXPOSURE_MODE,
        ),
        MetadataField::HwType => AttributeParser::new(
            DEPTH_CONFIGURATION_OFFSET,
            F0,
            1,
            configuration_flags::HW_TYPE,
        ),
        MetadataField::SkuId => AttributeParser::new(
            DEPTH_CONFIGURATION_OFFSET,
            F0 + 1,
            1,
            configuration_flags::SKU_ID,
        ),
        MetadataField::Format => AttributeParser::new(
            DEPTH_CONFIGURATION_OFFSET,
            F0 + 2,
            2,
            configuration_flags::FORMAT,
        ),
        MetadataField::Width => AttributeParser::new(
            DEPTH_CONFIGURATION_OFFSET,
            F1,
            2,
            configuration_flags::WIDTH,
        ),
        MetadataField::Height => AttributeParser::new(
            DEPTH_CONFIGURATION_OFFSET,
            F1 + 2,
            2,
            configuration_flags::HEIGHT,
        ),
    }
}

/// Resolves the parser for a field of the fisheye-mode metadata layout.
pub fn fisheye_parser(field: MetadataField) -> AttributeParser {
    match field {
        MetadataField::FrameCounter => {
            AttributeParser::new(FISHEYE_TIMING_OFFSET, F0, 4, timing_flags::FRAME_COUNTER)
        }
        MetadataField::SensorTimestamp => {
            AttributeParser::new(FISHEYE_TIMING_OFFSET, F1, 4, timing_flags::SENSOR_TIMESTAMP)
        }
        MetadataField::WhiteBalance => {
            AttributeParser::new(FISHEYE_STATS_OFFSET, F2, 4, stats_flags::WHITE_BALANCE)
        }
        MetadataField::GainLevel => {
            AttributeParser::new(FISHEYE_CONTROL_OFFSET, F0, 4, control_flags::GAIN)
        }
        MetadataField::ActualExposure => {
            AttributeParser::new(FISHEYE_CONTROL_OFFSET, F1, 4, control_flags::EXPOSURE)
        }
        MetadataField::AutoExposureMode => AttributeParser::new(
            FISHEYE_CONTROL_OFFSET,
            F2,
            4,
            control_flags::AUTO_EXPOSURE_MODE,
        ),
        MetadataField::HwType => AttributeParser::new(
            FISHEYE_CONFIGURATION_OFFSET,
            F0,
            1,
            configuration_flags::HW_TYPE,
        ),
        MetadataField::SkuId => AttributeParser::new(
            FISHEYE_CONFIGURATION_OFFSET,
            F0 + 1,
            1,
            configuration_flags::SKU_ID,
        ),
        MetadataField::Format => AttributeParser::new(
            FISHEYE_CONFIGURATION_OFFSET,
            F0 + 2,
            2,
            configuration_flags::FORMAT,
        ),
        MetadataField::Width => AttributeParser::new(
            FISHEYE_CONFIGURATION_OFFSET,
            F1,
            2,
            configuration_flags::WIDTH,
        ),
        MetadataField::Height => AttributeParser::new(
            FISHEYE_CONFIGURATION_OFFSET,
            F1 + 2,
            2,
            configuration_flags::HEIGHT,
        ),
    }
}

/// Fields available in the depth-mode layout.
pub const DEPTH_FIELDS: &[MetadataField] = &[
    MetadataField::FrameCounter,
    MetadataField::SensorTimestamp,
    MetadataField::WhiteBalance,
    MetadataField::GainLevel,
    MetadataField::ActualExposure,
    MetadataField::AutoExposureMode,
    MetadataField::HwType,
    MetadataField::SkuId,
    MetadataField::Format,
    MetadataField::Width,
    MetadataField::Height,
];

/// Fields available in the fisheye-mode layout.
pub const FISHEYE_FIELDS: &[MetadataField] = DEPTH_FIELDS;
