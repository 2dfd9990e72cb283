//! Software auto-exposure and the exposure metering region.
//!
//! The mechanism meters average brightness over a region of interest on each
//! processed frame and steps exposure, then gain, toward a target level.
//! Writes to the underlying controls happen only while auto mode is enabled;
//! flipping to manual stops the loop's writes immediately. Antiflicker modes
//! quantize exposure to whole mains-flicker periods.

use std::sync::{Arc, Mutex};

use crate::controls::Control;
use crate::error::{Error, Result};
use crate::hwmon::{opcode, Command, HwMonitor};
use crate::types::{FrameSample, OptionRange, RegionOfInterest};

/// Metering target, mid-scale of an 8-bit luminance plane.
const TARGET_BRIGHTNESS: f32 = 128.0;
/// Dead band around the target; no adjustment inside it.
const BRIGHTNESS_TOLERANCE: f32 = 16.0;
/// Exposure adjustment per frame, in exposure units.
const EXPOSURE_STEP: f32 = 1000.0;
/// Gain adjustment per frame once exposure saturates.
const GAIN_STEP: f32 = 1.0;

/// Flicker period of 50 Hz mains, in microseconds.
const FLICKER_PERIOD_50HZ: f32 = 10_000.0;
/// Flicker period of 60 Hz mains, in microseconds.
const FLICKER_PERIOD_60HZ: f32 = 8_333.0;

// =============================================================================
// State
// =============================================================================

/// Auto-exposure operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AutoExposureMode {
    /// Free-running exposure, no flicker compensation.
    Static = 0,
    /// Exposure locked to whole flicker periods.
    AntiFlicker = 1,
    /// Flicker compensation once exposure reaches one period.
    Hybrid = 2,
}

impl AutoExposureMode {
    pub fn from_value(value: f32) -> Result<Self> {
        match value as i32 {
            0 => Ok(AutoExposureMode::Static),
            1 => Ok(AutoExposureMode::AntiFlicker),
            2 => Ok(AutoExposureMode::Hybrid),
            _ => Err(Error::invalid_value(format!(
                "{} is not an auto-exposure mode",
                value
            ))),
        }
    }
}

/// Shared auto-exposure state, guarded by one mutex and referenced by the
/// mechanism and by every option view over it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoExposureState {
    pub is_auto_exposure: bool,
    pub mode: AutoExposureMode,
    /// Antiflicker mains rate in Hz; only 50 and 60 are valid.
    pub rate: u32,
}

impl Default for AutoExposureState {
    fn default() -> Self {
        Self {
            is_auto_exposure: true,
            mode: AutoExposureMode::Static,
            rate: 60,
        }
    }
}

// =============================================================================
// Mechanism
// =============================================================================

/// Brightness-driven exposure/gain stepper.
///
/// Owns raw (undecorated) handles to the gain and exposure controls so its
/// own writes are not rejected by the manual-write guard.
pub struct AutoExposureMechanism {
    gain: Arc<dyn Control>,
    exposure: Arc<dyn Control>,
    state: Arc<Mutex<AutoExposureState>>,
    roi: Mutex<RegionOfInterest>,
}

impl AutoExposureMechanism {
    pub fn new(
        gain: Arc<dyn Control>,
        exposure: Arc<dyn Control>,
        state: Arc<Mutex<AutoExposureState>>,
    ) -> Self {
        Self {
            gain,
            exposure,
            state,
            roi: Mutex::new(RegionOfInterest::default()),
        }
    }

    /// Replaces the metering region.
    pub fn update_roi(&self, roi: RegionOfInterest) -> Result<()> {
        *self
            .roi
            .lock()
            .map_err(|_| Error::transport("auto-exposure roi lock poisoned"))? = roi;
        Ok(())
    }

    /// Returns the current metering region.
    pub fn roi(&self) -> Result<RegionOfInterest> {
        Ok(*self
            .roi
            .lock()
            .map_err(|_| Error::transport("auto-exposure roi lock poisoned"))?)
    }

    /// Meters one frame and steps the controls toward the target brightness.
    ///
    /// A no-op while manual exposure is active. The frame is only borrowed
    /// for the duration of the call.
    pub fn process_frame(&self, frame: &FrameSample<'_>) -> Result<()> {
        let state = *self
            .state
            .lock()
            .map_err(|_| Error::transport("auto-exposure state lock poisoned"))?;
        if !state.is_auto_exposure {
            return Ok(());
        }

        let brightness = self.mean_brightness(frame)?;
        let exposure_range = self.exposure.range()?;
        let gain_range = self.gain.range()?;
        let exposure = self.exposure.get()?;
        let gain = self.gain.get()?;

        if brightness < TARGET_BRIGHTNESS - BRIGHTNESS_TOLERANCE {
            // Too dark: raise exposure first, gain once exposure saturates.
            let next = next_exposure_up(exposure, &state).clamp(exposure_range.min, exposure_range.max);
            if next > exposure {
                self.exposure.set(next)?;
            } else if gain < gain_range.max {
                self.gain.set((gain + GAIN_STEP).min(gain_range.max))?;
            }
        } else if brightness > TARGET_BRIGHTNESS + BRIGHTNESS_TOLERANCE {
            // Too bright: drop gain first, exposure afterwards.
            if gain > gain_range.min {
                self.gain.set((gain - GAIN_STEP).max(gain_range.min))?;
            } else {
                let next =
                    next_exposure_down(exposure, &state).clamp(exposure_range.min, exposure_range.max);
                if next < exposure {
                    self.exposure.set(next)?;
                }
            }
        }
        Ok(())
    }

    /// Average luminance over the metering region, clamped to the frame.
    /// An all-zero region meters the whole frame.
    fn mean_brightness(&self, frame: &FrameSample<'_>) -> Result<f32> {
        let expected = frame.width as usize * frame.height as usize;
        if frame.pixels.len() < expected {
            return Err(Error::validation(format!(
                "{}-byte luminance plane is shorter than {}x{}",
                frame.pixels.len(),
                frame.width,
                frame.height
            )));
        }
        let roi = self.roi()?;
        let (min_x, max_x, min_y, max_y) = if roi == RegionOfInterest::default() {
            (0, frame.width, 0, frame.height)
        } else {
            (
                (roi.min_x as u32).min(frame.width),
                (roi.max_x as u32).min(frame.width),
                (roi.min_y as u32).min(frame.height),
                (roi.max_y as u32).min(frame.height),
            )
        };
        if min_x >= max_x || min_y >= max_y {
            return Err(Error::invalid_value(
                "metering region is empty after clamping to the frame",
            ));
        }
        let mut sum = 0u64;
        for y in min_y..max_y {
            let row = (y * frame.width + min_x) as usize..(y * frame.width + max_x) as usize;
            for &px in &frame.pixels[row] {
                sum += px as u64;
            }
        }
        let count = ((max_x - min_x) * (max_y - min_y)) as u64;
        Ok(sum as f32 / count as f32)
    }
}

fn flicker_period(state: &AutoExposureState) -> f32 {
    match state.rate {
        50 => FLICKER_PERIOD_50HZ,
        _ => FLICKER_PERIOD_60HZ,
    }
}

/// True when the active mode locks the given exposure to flicker periods.
fn is_quantized(value: f32, state: &AutoExposureState) -> bool {
    match state.mode {
        AutoExposureMode::Static => false,
        AutoExposureMode::AntiFlicker => true,
        AutoExposureMode::Hybrid => value >= flicker_period(state),
    }
}

/// Quantizes an exposure value to whole flicker periods per the active mode.
fn quantize_exposure(value: f32, state: &AutoExposureState) -> f32 {
    if is_quantized(value, state) || matches!(state.mode, AutoExposureMode::AntiFlicker) {
        let period = flicker_period(state);
        ((value / period).round().max(1.0)) * period
    } else {
        value
    }
}

/// Next exposure upward: fine steps when free-running, whole periods when
/// locked to the flicker grid.
fn next_exposure_up(exposure: f32, state: &AutoExposureState) -> f32 {
    let candidate = exposure + EXPOSURE_STEP;
    if is_quantized(candidate, state) {
        let quantized = quantize_exposure(candidate, state);
        if quantized > exposure {
            quantized
        } else {
            quantized + flicker_period(state)
        }
    } else {
        candidate
    }
}

/// Next exposure downward, mirroring [`next_exposure_up`]. On the flicker
/// grid one period is the floor; the value never drops below it.
fn next_exposure_down(exposure: f32, state: &AutoExposureState) -> f32 {
    let candidate = exposure - EXPOSURE_STEP;
    if is_quantized(candidate, state) {
        let period = flicker_period(state);
        let quantized = quantize_exposure(candidate, state);
        if quantized < exposure {
            quantized
        } else if quantized - period >= period {
            quantized - period
        } else {
            quantized
        }
    } else {
        candidate
    }
}

// =============================================================================
// Option views over the shared state
// =============================================================================

/// Manual/auto exposure toggle backed by the shared state.
pub struct EnableAutoExposureControl {
    state: Arc<Mutex<AutoExposureState>>,
}

impl EnableAutoExposureControl {
    pub fn new(state: Arc<Mutex<AutoExposureState>>) -> Self {
        Self { state }
    }
}

impl Control for EnableAutoExposureControl {
    fn set(&self, value: f32) -> Result<()> {
        if value != 0.0 && value != 1.0 {
            return Err(Error::invalid_value(format!(
                "{} is not a valid auto-exposure toggle",
                value
            )));
        }
        self.state
            .lock()
            .map_err(|_| Error::transport("auto-exposure state lock poisoned"))?
            .is_auto_exposure = value != 0.0;
        Ok(())
    }

    fn get(&self) -> Result<f32> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::transport("auto-exposure state lock poisoned"))?;
        Ok(if state.is_auto_exposure { 1.0 } else { 0.0 })
    }

    fn range(&self) -> Result<OptionRange> {
        Ok(OptionRange::new(0.0, 1.0, 1.0, 1.0))
    }

    fn description(&self) -> &str {
        "Enable/disable auto exposure"
    }
}

/// Auto-exposure mode selector (static / antiflicker / hybrid).
pub struct AutoExposureModeControl {
    state: Arc<Mutex<AutoExposureState>>,
}

impl AutoExposureModeControl {
    pub fn new(state: Arc<Mutex<AutoExposureState>>) -> Self {
        Self { state }
    }
}

impl Control for AutoExposureModeControl {
    fn set(&self, value: f32) -> Result<()> {
        let mode = AutoExposureMode::from_value(value)?;
        self.state
            .lock()
            .map_err(|_| Error::transport("auto-exposure state lock poisoned"))?
            .mode = mode;
        Ok(())
    }

    fn get(&self) -> Result<f32> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::transport("auto-exposure state lock poisoned"))?;
        Ok(state.mode as i32 as f32)
    }

    fn range(&self) -> Result<OptionRange> {
        Ok(OptionRange::new(0.0, 2.0, 1.0, 0.0))
    }

    fn description(&self) -> &str {
        "Auto-Exposure Mode"
    }

    fn value_description(&self, value: f32) -> Option<&str> {
        match value as i32 {
            0 => Some("Static"),
            1 => Some("Anti-Flicker"),
            2 => Some("Hybrid"),
            _ => None,
        }
    }
}

/// Antiflicker mains rate selector; only 50 and 60 Hz exist.
pub struct AntiflickerRateControl {
    state: Arc<Mutex<AutoExposureState>>,
}

impl AntiflickerRateControl {
    pub fn new(state: Arc<Mutex<AutoExposureState>>) -> Self {
        Self { state }
    }
}

impl Control for AntiflickerRateControl {
    fn set(&self, value: f32) -> Result<()> {
        let rate = value as u32;
        if rate != 50 && rate != 60 {
            return Err(Error::invalid_value(format!(
                "{} Hz is not a valid antiflicker rate",
                value
            )));
        }
        self.state
            .lock()
            .map_err(|_| Error::transport("auto-exposure state lock poisoned"))?
            .rate = rate;
        Ok(())
    }

    fn get(&self) -> Result<f32> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::transport("auto-exposure state lock poisoned"))?;
        Ok(state.rate as f32)
    }

    fn range(&self) -> Result<OptionRange> {
        Ok(OptionRange::new(50.0, 60.0, 10.0, 60.0))
    }

    fn description(&self) -> &str {
        "Auto-Exposure Anti-Flicker Rate"
    }
}

// =============================================================================
// Region-of-interest strategies
// =============================================================================

/// Where the metering region lives: in firmware or in the software stepper.
pub trait RoiMethod: Send + Sync {
    fn set_roi(&self, roi: &RegionOfInterest) -> Result<()>;
    fn get_roi(&self) -> Result<RegionOfInterest>;
}

/// ROI stored in firmware, set and read through the hardware monitor.
pub struct HwRoiMethod {
    monitor: Arc<HwMonitor>,
}

impl HwRoiMethod {
    pub fn new(monitor: Arc<HwMonitor>) -> Self {
        Self { monitor }
    }
}

impl RoiMethod for HwRoiMethod {
    fn set_roi(&self, roi: &RegionOfInterest) -> Result<()> {
        // Firmware parameter order is rows first.
        let cmd = Command {
            opcode: opcode::SETAEROI,
            param1: roi.min_y as u32,
            param2: roi.max_y as u32,
            param3: roi.min_x as u32,
            param4: roi.max_x as u32,
            data: Vec::new(),
        };
        self.monitor.send(&cmd)?;
        Ok(())
    }

    fn get_roi(&self) -> Result<RegionOfInterest> {
        let raw = self.monitor.send(&Command::new(opcode::GETAEROI))?;
        if raw.len() < 8 {
            return Err(Error::validation(format!(
                "{}-byte region-of-interest report is shorter than 8",
                raw.len()
            )));
        }
        let word = |i: usize| u16::from_le_bytes([raw[i * 2], raw[i * 2 + 1]]);
        Ok(RegionOfInterest {
            min_y: word(0),
            max_y: word(1),
            min_x: word(2),
            max_x: word(3),
        })
    }
}

/// ROI tracked by the software auto-exposure mechanism.
pub struct SwRoiMethod {
    mechanism: Arc<AutoExposureMechanism>,
}

impl SwRoiMethod {
    pub fn new(mechanism: Arc<AutoExposureMechanism>) -> Self {
        Self { mechanism }
    }
}

impl RoiMethod for SwRoiMethod {
    fn set_roi(&self, roi: &RegionOfInterest) -> Result<()> {
        self.mechanism.update_roi(*roi)
    }

    fn get_roi(&self) -> Result<RegionOfInterest> {
        self.mechanism.roi()
    }
}
