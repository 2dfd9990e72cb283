//! Hardware-monitor command channel.
//!
//! Every exchange with the camera's embedded controller goes through this
//! module: a [`Command`] is framed, sent over an injected transport, and the
//! opcode-echoed response is validated before the payload is handed back.
//! Calls serialize behind a lock shared with the owning endpoint's streaming
//! path, so command traffic and frame streaming never interleave on the same
//! physical link.

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::transport::CommandTransfer;

/// Magic word opening every hardware-monitor request.
pub const HWM_MAGIC: u16 = 0xCDAB;

/// Size of the request header: size, magic, opcode, four parameters.
pub const HWM_HEADER_SIZE: usize = 2 + 2 + 4 + 4 * 4;

/// Size of the opcode echo prefixing every response.
pub const HWM_RESPONSE_ECHO_SIZE: usize = 4;

/// Maximum payload a single request may carry.
pub const HWM_MAX_PAYLOAD: usize = 1000;

// Firmware command opcodes. Bit-exact device firmware contract.
pub mod opcode {
    /// Get logger data (debug op-code published in device info).
    pub const GLD: u32 = 0x0F;
    /// Get version data block (firmware identity, serial, lock state).
    pub const GVD: u32 = 0x10;
    /// Read a calibration table by numeric table id.
    pub const GETINTCAL: u32 = 0x15;
    /// Hardware reset.
    pub const HWRST: u32 = 0x20;
    /// Advanced-mode query.
    pub const UAMG: u32 = 0x30;
    /// Set the auto-exposure region of interest.
    pub const SETAEROI: u32 = 0x44;
    /// Get the auto-exposure region of interest.
    pub const GETAEROI: u32 = 0x45;
    /// Motion-module EEPROM read by offset and length.
    pub const MMER: u32 = 0x4F;
    /// Fisheye extrinsics read.
    pub const GET_EXTRINSICS: u32 = 0x53;
}

// GVD block offsets.
pub const GVD_FW_VERSION_OFFSET: usize = 12;
pub const GVD_CAMERA_LOCKED_OFFSET: usize = 25;
pub const GVD_MODULE_SERIAL_OFFSET: usize = 48;
pub const GVD_MOTION_MODULE_FW_VERSION_OFFSET: usize = 212;

/// Length of a module serial read from the GVD block.
pub const MODULE_SERIAL_LEN: usize = 6;

/// A single hardware-monitor request: opcode, up to four numeric parameters
/// and an optional variable-length payload. Value type with no identity
/// beyond its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: u32,
    pub param1: u32,
    pub param2: u32,
    pub param3: u32,
    pub param4: u32,
    pub data: Vec<u8>,
}

impl Command {
    /// Creates a command with no parameters.
    pub fn new(opcode: u32) -> Self {
        Self {
            opcode,
            param1: 0,
            param2: 0,
            param3: 0,
            param4: 0,
            data: Vec::new(),
        }
    }

    /// Creates a command with one parameter.
    pub fn with_param(opcode: u32, param1: u32) -> Self {
        Self {
            param1,
            ..Self::new(opcode)
        }
    }

    /// Creates a command with two parameters.
    pub fn with_params(opcode: u32, param1: u32, param2: u32) -> Self {
        Self {
            param1,
            param2,
            ..Self::new(opcode)
        }
    }

    /// Frames the command into the on-wire request buffer.
    ///
    /// Layout (little-endian): `[u16 size][u16 magic][u32 opcode][u32 p1..p4]`
    /// followed by the payload. The size word counts everything after itself.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.data.len() > HWM_MAX_PAYLOAD {
            return Err(Error::invalid_value(format!(
                "command payload of {} bytes exceeds the {} byte limit",
                self.data.len(),
                HWM_MAX_PAYLOAD
            )));
        }
        let size = (HWM_HEADER_SIZE - 2 + self.data.len()) as u16;
        let mut buf = Vec::with_capacity(HWM_HEADER_SIZE + self.data.len());
        buf.write_u16::<LE>(size)?;
        buf.write_u16::<LE>(HWM_MAGIC)?;
        buf.write_u32::<LE>(self.opcode)?;
        buf.write_u32::<LE>(self.param1)?;
        buf.write_u32::<LE>(self.param2)?;
        buf.write_u32::<LE>(self.param3)?;
        buf.write_u32::<LE>(self.param4)?;
        buf.extend_from_slice(&self.data);
        Ok(buf)
    }
}

/// A command transport serialized behind a lock shared with the streaming
/// path of the owning endpoint.
///
/// Only one request is in flight per physical channel; concurrent callers
/// block rather than interleave. The guard spans transport acquisition
/// end-to-end, so a stream reconfiguration cannot slice into a transfer pair.
pub struct LockedTransfer {
    transfer: Mutex<Box<dyn CommandTransfer>>,
    stream_guard: Arc<Mutex<()>>,
}

impl LockedTransfer {
    pub fn new(transfer: Box<dyn CommandTransfer>, stream_guard: Arc<Mutex<()>>) -> Self {
        Self {
            transfer: Mutex::new(transfer),
            stream_guard,
        }
    }

    /// Sends raw bytes and returns the raw response.
    pub fn send_receive(&self, data: &[u8]) -> Result<Vec<u8>> {
        let _streaming = self
            .stream_guard
            .lock()
            .map_err(|_| Error::transport("streaming guard poisoned"))?;
        let mut transfer = self
            .transfer
            .lock()
            .map_err(|_| Error::transport("command transfer lock poisoned"))?;
        transfer.send_receive(data)
    }
}

/// The hardware-monitor protocol endpoint.
///
/// Shared read-only by every component needing hardware access: options,
/// the calibration cache, ROI methods and the notification poller.
pub struct HwMonitor {
    transfer: LockedTransfer,
}

impl HwMonitor {
    pub fn new(transfer: LockedTransfer) -> Self {
        Self { transfer }
    }

    /// Sends a command and returns the validated response payload.
    ///
    /// The response must open with an echo of the request opcode; a mismatch
    /// or a response shorter than the echo word is a validation error. The
    /// echo is stripped before returning.
    pub fn send(&self, cmd: &Command) -> Result<Vec<u8>> {
        let request = cmd.encode()?;
        let response = self.transfer.send_receive(&request)?;
        if response.len() < HWM_RESPONSE_ECHO_SIZE {
            return Err(Error::validation(format!(
                "response of {} bytes is shorter than the opcode echo",
                response.len()
            )));
        }
        let mut cursor = Cursor::new(&response);
        let echoed = cursor.read_u32::<LE>()?;
        if echoed != cmd.opcode {
            return Err(Error::validation(format!(
                "response echoed opcode {:#x}, expected {:#x}",
                echoed, cmd.opcode
            )));
        }
        Ok(response[HWM_RESPONSE_ECHO_SIZE..].to_vec())
    }

    /// Raw passthrough for diagnostics: the caller supplies a pre-framed
    /// request and receives the unvalidated response.
    pub fn send_raw(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.transfer.send_receive(data)
    }

    /// Fetches the GVD identity block.
    fn get_gvd(&self) -> Result<Vec<u8>> {
        self.send(&Command::new(opcode::GVD))
    }

    /// Reads a dotted firmware version string from the GVD block.
    ///
    /// The four version bytes are stored most-significant-last and rendered
    /// most-significant-first.
    pub fn get_firmware_version_string(&self, offset: usize) -> Result<String> {
        let gvd = self.get_gvd()?;
        let end = offset + 4;
        if gvd.len() < end {
            return Err(Error::validation(format!(
                "GVD block of {} bytes has no version field at offset {}",
                gvd.len(),
                offset
            )));
        }
        let bytes = &gvd[offset..end];
        Ok(format!(
            "{}.{}.{}.{}",
            bytes[3], bytes[2], bytes[1], bytes[0]
        ))
    }

    /// Reads the hexified module serial from the GVD block.
    pub fn get_module_serial_string(&self, offset: usize) -> Result<String> {
        let gvd = self.get_gvd()?;
        let end = offset + MODULE_SERIAL_LEN;
        if gvd.len() < end {
            return Err(Error::validation(format!(
                "GVD block of {} bytes has no serial field at offset {}",
                gvd.len(),
                offset
            )));
        }
        Ok(gvd[offset..end]
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect())
    }

    /// Reads the camera lock flag from the GVD block.
    pub fn is_camera_locked(&self, offset: usize) -> Result<bool> {
        let gvd = self.get_gvd()?;
        if gvd.len() <= offset {
            return Err(Error::validation(format!(
                "GVD block of {} bytes has no lock field at offset {}",
                gvd.len(),
                offset
            )));
        }
        Ok(gvd[offset] != 0)
    }

    /// Issues a hardware reset. The device drops off the bus afterwards.
    pub fn hardware_reset(&self) -> Result<()> {
        self.send(&Command::new(opcode::HWRST))?;
        Ok(())
    }
}
