//! Transport traits implemented by the surrounding USB/UVC/HID backend.
//!
//! The device-control core never opens USB devices itself. Discovery hands it
//! descriptors, and a [`Backend`] turns descriptors into live handles behind
//! these narrow traits. Everything below this seam (bulk vs. control-transfer
//! framing, kernel drivers, isochronous streaming) is assumed correct.

use std::sync::Arc;

use crate::error::Result;
use crate::types::{HidDeviceInfo, UsbDeviceInfo, UvcDeviceInfo};

/// A vendor-defined extension unit tunneled over a video interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionUnit {
    /// Subdevice the unit is attached to.
    pub subdevice: u8,
    /// Unit id within the video function.
    pub unit: u8,
    /// Interface node.
    pub node: u8,
    /// Vendor GUID identifying the unit.
    pub guid: [u8; 16],
}

/// Synchronous request/response link to the device's embedded controller.
///
/// One call is one transfer pair. Implementations do not retry; a failed
/// transfer surfaces as a transport error. A hung transfer blocks the caller
/// for as long as the underlying transport allows.
pub trait CommandTransfer: Send {
    fn send_receive(&mut self, data: &[u8]) -> Result<Vec<u8>>;
}

/// A live UVC video device handle.
///
/// Only the control surface the core needs: processing-unit controls by id
/// and extension-unit controls by (unit, control-code).
pub trait UvcDevice: Send + Sync {
    /// Initializes an extension unit so it is reachable after power-up.
    fn claim_xu(&self, xu: &ExtensionUnit) -> Result<()>;

    /// Writes an extension-unit control.
    fn set_xu(&self, xu: &ExtensionUnit, ctrl: u8, data: &[u8]) -> Result<()>;

    /// Reads an extension-unit control. `len` is the expected report size.
    fn get_xu(&self, xu: &ExtensionUnit, ctrl: u8, len: usize) -> Result<Vec<u8>>;

    /// Writes a processing-unit control.
    fn set_pu(&self, ctrl: u32, value: i32) -> Result<()>;

    /// Reads a processing-unit control.
    fn get_pu(&self, ctrl: u32) -> Result<i32>;

    /// Reads the declared range of a processing-unit control as
    /// `(min, max, step, default)`.
    fn get_pu_range(&self, ctrl: u32) -> Result<(i32, i32, i32, i32)>;
}

/// A live HID device handle for the motion module.
pub trait HidDevice: Send + Sync {
    /// Names of the sensors the HID function exposes.
    fn sensors(&self) -> Vec<String>;

    /// Reads a custom sensor report by sensor and field name.
    fn get_custom_report(&self, sensor: &str, field: &str) -> Result<Vec<u8>>;
}

/// Monotonic time source used for frame pacing.
pub trait TimeService: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin.
    fn monotonic_millis(&self) -> f64;
}

/// Factory for live device handles, implemented by the platform backend.
pub trait Backend {
    fn create_uvc_device(&self, info: &UvcDeviceInfo) -> Result<Arc<dyn UvcDevice>>;

    /// Creates a command channel over a dedicated USB interface.
    fn create_usb_device(&self, info: &UsbDeviceInfo) -> Result<Box<dyn CommandTransfer>>;

    fn create_hid_device(&self, info: &HidDeviceInfo) -> Result<Arc<dyn HidDevice>>;

    fn create_time_service(&self) -> Arc<dyn TimeService>;
}

// =============================================================================
// Extension-unit tunneled command channel
// =============================================================================

/// [`CommandTransfer`] tunneled through a vendor extension unit.
///
/// Fallback command channel for units without a dedicated USB monitor
/// interface: a write to the unit's monitor control sends the request, a
/// subsequent read fetches the response.
pub struct XuCommandTransfer {
    device: Arc<dyn UvcDevice>,
    xu: ExtensionUnit,
    ctrl: u8,
    report_len: usize,
}

impl XuCommandTransfer {
    /// Report size of the hardware-monitor extension-unit control.
    pub const DEFAULT_REPORT_LEN: usize = 1024;

    pub fn new(device: Arc<dyn UvcDevice>, xu: ExtensionUnit, ctrl: u8) -> Self {
        Self {
            device,
            xu,
            ctrl,
            report_len: Self::DEFAULT_REPORT_LEN,
        }
    }
}

impl CommandTransfer for XuCommandTransfer {
    fn send_receive(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.device.set_xu(&self.xu, self.ctrl, data)?;
        self.device.get_xu(&self.xu, self.ctrl, self.report_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;

    struct RecordingUvc {
        last_write: Mutex<Vec<u8>>,
        response: Vec<u8>,
    }

    impl UvcDevice for RecordingUvc {
        fn claim_xu(&self, _xu: &ExtensionUnit) -> Result<()> {
            Ok(())
        }
        fn set_xu(&self, _xu: &ExtensionUnit, _ctrl: u8, data: &[u8]) -> Result<()> {
            *self.last_write.lock().unwrap() = data.to_vec();
            Ok(())
        }
        fn get_xu(&self, _xu: &ExtensionUnit, _ctrl: u8, _len: usize) -> Result<Vec<u8>> {
            Ok(self.response.clone())
        }
        fn set_pu(&self, _ctrl: u32, _value: i32) -> Result<()> {
            Err(Error::not_implemented("pu"))
        }
        fn get_pu(&self, _ctrl: u32) -> Result<i32> {
            Err(Error::not_implemented("pu"))
        }
        fn get_pu_range(&self, _ctrl: u32) -> Result<(i32, i32, i32, i32)> {
            Err(Error::not_implemented("pu"))
        }
    }

    #[test]
    fn test_xu_transfer_writes_then_reads_same_control() {
        let uvc = Arc::new(RecordingUvc {
            last_write: Mutex::new(Vec::new()),
            response: vec![0xAA, 0xBB],
        });
        let xu = ExtensionUnit {
            subdevice: 0,
            unit: 3,
            node: 2,
            guid: [0; 16],
        };
        let mut transfer = XuCommandTransfer::new(uvc.clone(), xu, 1);
        let res = transfer.send_receive(&[1, 2, 3]).unwrap();
        assert_eq!(res, vec![0xAA, 0xBB]);
        assert_eq!(*uvc.last_write.lock().unwrap(), vec![1, 2, 3]);
    }
}
