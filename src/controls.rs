//! Control implementations registered on endpoints.
//!
//! A [`Control`] is a named scalar knob with a declared range. Concrete
//! implementations route to an extension unit, a processing unit, the
//! hardware monitor, or a HID report; decorators add policy on top.

use byteorder::{ByteOrder, LE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::calibration::{check_table_header, TableId, TABLE_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::hwmon::{opcode, Command, HwMonitor};
use crate::transport::{ExtensionUnit, HidDevice, UvcDevice};
use crate::types::OptionRange;

/// A scalar device control.
///
/// Values are `f32` at the seam; each implementation converts to its wire
/// width. `set` validates against the declared range before any transfer.
pub trait Control: Send + Sync {
    fn set(&self, value: f32) -> Result<()>;
    fn get(&self) -> Result<f32>;
    fn range(&self) -> Result<OptionRange>;
    fn description(&self) -> &str;

    /// Human-readable name for an enumerated value, if the control has one.
    fn value_description(&self, _value: f32) -> Option<&str> {
        None
    }

    fn is_read_only(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for dyn Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Control")
            .field("description", &self.description())
            .finish()
    }
}

// =============================================================================
// Extension-unit controls
// =============================================================================

/// Wire width of an extension-unit control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XuWidth {
    U8,
    U16,
    U32,
}

impl XuWidth {
    fn len(self) -> usize {
        match self {
            XuWidth::U8 => 1,
            XuWidth::U16 => 2,
            XuWidth::U32 => 4,
        }
    }
}

/// A control backed by a vendor extension-unit register.
pub struct XuControl {
    device: Arc<dyn UvcDevice>,
    xu: ExtensionUnit,
    ctrl: u8,
    width: XuWidth,
    range: OptionRange,
    description: String,
    values: &'static [(u32, &'static str)],
}

impl XuControl {
    pub fn new(
        device: Arc<dyn UvcDevice>,
        xu: ExtensionUnit,
        ctrl: u8,
        width: XuWidth,
        range: OptionRange,
        description: impl Into<String>,
    ) -> Self {
        Self {
            device,
            xu,
            ctrl,
            width,
            range,
            description: description.into(),
            values: &[],
        }
    }

    /// Attaches names for an enumerated value set.
    pub fn with_value_descriptions(mut self, values: &'static [(u32, &'static str)]) -> Self {
        self.values = values;
        self
    }
}

impl Control for XuControl {
    fn set(&self, value: f32) -> Result<()> {
        if !self.range.contains(value) {
            return Err(Error::invalid_value(format!(
                "{} out of range [{}, {}] for {}",
                value, self.range.min, self.range.max, self.description
            )));
        }
        let raw = value as u32;
        let mut buf = [0u8; 4];
        match self.width {
            XuWidth::U8 => buf[0] = raw as u8,
            XuWidth::U16 => LE::write_u16(&mut buf[..2], raw as u16),
            XuWidth::U32 => LE::write_u32(&mut buf, raw),
        }
        self.device
            .set_xu(&self.xu, self.ctrl, &buf[..self.width.len()])
    }

    fn get(&self) -> Result<f32> {
        let raw = self.device.get_xu(&self.xu, self.ctrl, self.width.len())?;
        if raw.len() < self.width.len() {
            return Err(Error::validation(format!(
                "{}-byte report for {} is shorter than {}",
                raw.len(),
                self.description,
                self.width.len()
            )));
        }
        let value = match self.width {
            XuWidth::U8 => raw[0] as u32,
            XuWidth::U16 => LE::read_u16(&raw) as u32,
            XuWidth::U32 => LE::read_u32(&raw),
        };
        Ok(value as f32)
    }

    fn range(&self) -> Result<OptionRange> {
        Ok(self.range)
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn value_description(&self, value: f32) -> Option<&str> {
        self.values
            .iter()
            .find(|(v, _)| *v as f32 == value)
            .map(|(_, name)| *name)
    }
}

// =============================================================================
// Processing-unit controls
// =============================================================================

/// A control mapped onto a standard UVC processing-unit register.
pub struct PuControl {
    device: Arc<dyn UvcDevice>,
    ctrl: u32,
    description: String,
}

impl PuControl {
    pub fn new(device: Arc<dyn UvcDevice>, ctrl: u32, description: impl Into<String>) -> Self {
        Self {
            device,
            ctrl,
            description: description.into(),
        }
    }
}

impl Control for PuControl {
    fn set(&self, value: f32) -> Result<()> {
        let range = self.range()?;
        if !range.contains(value) {
            return Err(Error::invalid_value(format!(
                "{} out of range [{}, {}] for {}",
                value, range.min, range.max, self.description
            )));
        }
        self.device.set_pu(self.ctrl, value as i32)
    }

    fn get(&self) -> Result<f32> {
        Ok(self.device.get_pu(self.ctrl)? as f32)
    }

    fn range(&self) -> Result<OptionRange> {
        let (min, max, step, default) = self.device.get_pu_range(self.ctrl)?;
        Ok(OptionRange::new(
            min as f32,
            max as f32,
            step as f32,
            default as f32,
        ))
    }

    fn description(&self) -> &str {
        &self.description
    }
}

// =============================================================================
// Fixed and decorated controls
// =============================================================================

/// A read-only control publishing one fixed value.
pub struct ConstControl {
    value: f32,
    description: String,
}

impl ConstControl {
    pub fn new(value: f32, description: impl Into<String>) -> Self {
        Self {
            value,
            description: description.into(),
        }
    }
}

impl Control for ConstControl {
    fn set(&self, _value: f32) -> Result<()> {
        Err(Error::not_implemented(format!(
            "{} is read-only",
            self.description
        )))
    }

    fn get(&self) -> Result<f32> {
        Ok(self.value)
    }

    fn range(&self) -> Result<OptionRange> {
        Ok(OptionRange::new(self.value, self.value, 0.0, self.value))
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

/// Decorator rejecting manual writes while a governing auto mode is active.
///
/// Wraps exactly one control; nesting is never composed deeper than one
/// level. Reads and range queries pass straight through.
pub struct AutoDisablingControl {
    inner: Arc<dyn Control>,
    auto: Arc<dyn Control>,
}

impl AutoDisablingControl {
    pub fn new(inner: Arc<dyn Control>, auto: Arc<dyn Control>) -> Self {
        Self { inner, auto }
    }
}

impl Control for AutoDisablingControl {
    fn set(&self, value: f32) -> Result<()> {
        if self.auto.get()? != 0.0 {
            return Err(Error::invalid_value(format!(
                "cannot set {} while {} is enabled",
                self.inner.description(),
                self.auto.description()
            )));
        }
        self.inner.set(value)
    }

    fn get(&self) -> Result<f32> {
        self.inner.get()
    }

    fn range(&self) -> Result<OptionRange> {
        self.inner.range()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn value_description(&self, value: f32) -> Option<&str> {
        self.inner.value_description(value)
    }
}

// =============================================================================
// Temperature readouts
// =============================================================================

/// Read-only temperature report from an extension-unit register, in °C.
pub struct TemperatureControl {
    device: Arc<dyn UvcDevice>,
    xu: ExtensionUnit,
    ctrl: u8,
    description: String,
}

impl TemperatureControl {
    pub fn new(
        device: Arc<dyn UvcDevice>,
        xu: ExtensionUnit,
        ctrl: u8,
        description: impl Into<String>,
    ) -> Self {
        Self {
            device,
            xu,
            ctrl,
            description: description.into(),
        }
    }
}

impl Control for TemperatureControl {
    fn set(&self, _value: f32) -> Result<()> {
        Err(Error::not_implemented(format!(
            "{} is read-only",
            self.description
        )))
    }

    fn get(&self) -> Result<f32> {
        let raw = self.device.get_xu(&self.xu, self.ctrl, 1)?;
        if raw.is_empty() {
            return Err(Error::validation(format!(
                "empty report for {}",
                self.description
            )));
        }
        Ok(raw[0] as i8 as f32)
    }

    fn range(&self) -> Result<OptionRange> {
        Ok(OptionRange::new(-40.0, 125.0, 1.0, 0.0))
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

/// Motion-module temperature read through a HID custom report, in °C.
pub struct MotionModuleTemperatureControl {
    device: Arc<dyn HidDevice>,
}

impl MotionModuleTemperatureControl {
    /// HID sensor and report field carrying the temperature sample.
    pub const SENSOR: &'static str = "custom";
    pub const FIELD: &'static str = "motion_module_temperature";

    pub fn new(device: Arc<dyn HidDevice>) -> Self {
        Self { device }
    }
}

impl Control for MotionModuleTemperatureControl {
    fn set(&self, _value: f32) -> Result<()> {
        Err(Error::not_implemented(
            "motion module temperature is read-only",
        ))
    }

    fn get(&self) -> Result<f32> {
        let raw = self.device.get_custom_report(Self::SENSOR, Self::FIELD)?;
        if raw.len() < 4 {
            return Err(Error::validation(format!(
                "{}-byte motion temperature report is shorter than 4",
                raw.len()
            )));
        }
        Ok(LE::read_i32(&raw) as f32)
    }

    fn range(&self) -> Result<OptionRange> {
        Ok(OptionRange::new(0.0, 100.0, 1.0, 0.0))
    }

    fn description(&self) -> &str {
        "Current motion module temperature"
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

// =============================================================================
// Hardware-monitor-backed controls
// =============================================================================

/// Depth units in meters per device unit, read from the depth calibration
/// table through the hardware monitor.
pub struct DepthScaleControl {
    monitor: Arc<HwMonitor>,
}

impl DepthScaleControl {
    pub fn new(monitor: Arc<HwMonitor>) -> Self {
        Self { monitor }
    }
}

impl Control for DepthScaleControl {
    fn set(&self, _value: f32) -> Result<()> {
        Err(Error::not_implemented("depth units are read-only"))
    }

    fn get(&self) -> Result<f32> {
        let raw = self.monitor.send(&Command::with_param(
            opcode::GETINTCAL,
            TableId::DepthCalibration as u32,
        ))?;
        check_table_header(&raw)?;
        let payload = &raw[TABLE_HEADER_SIZE..];
        if payload.len() < 4 {
            return Err(Error::validation(
                "depth calibration table has no depth-units field",
            ));
        }
        Ok(LE::read_f32(payload))
    }

    fn range(&self) -> Result<OptionRange> {
        Ok(OptionRange::new(0.0001, 0.01, 0.000001, 0.001))
    }

    fn description(&self) -> &str {
        "Number of meters represented by a single depth unit"
    }

    fn is_read_only(&self) -> bool {
        true
    }
}

// =============================================================================
// Motion correction
// =============================================================================

/// Toggle for applying IMU intrinsic correction to motion frames.
///
/// Constructed only when the IMU calibration table was readable at
/// composition time.
pub struct MotionCorrectionControl {
    enabled: AtomicBool,
}

impl MotionCorrectionControl {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl Default for MotionCorrectionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl Control for MotionCorrectionControl {
    fn set(&self, value: f32) -> Result<()> {
        if value != 0.0 && value != 1.0 {
            return Err(Error::invalid_value(format!(
                "{} is not a valid motion correction toggle",
                value
            )));
        }
        self.enabled.store(value != 0.0, Ordering::SeqCst);
        Ok(())
    }

    fn get(&self) -> Result<f32> {
        Ok(if self.is_enabled() { 1.0 } else { 0.0 })
    }

    fn range(&self) -> Result<OptionRange> {
        Ok(OptionRange::new(0.0, 1.0, 1.0, 1.0))
    }

    fn description(&self) -> &str {
        "Enable/disable motion data correction"
    }
}
