//! Shared types for the depth camera device-control core.
//!
//! Provides descriptor types produced by device discovery, control and
//! geometry value types, and the device metadata/notification vocabulary.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// =============================================================================
// Device Descriptors
// =============================================================================

/// Descriptor for a single UVC video interface of a physical camera.
///
/// Created once during discovery and read-only afterward. Interfaces that
/// belong to the same physical unit share a `unique_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UvcDeviceInfo {
    /// USB vendor id.
    pub vid: u16,
    /// USB product id.
    pub pid: u16,
    /// Identifier shared by all interfaces of one physical unit.
    pub unique_id: String,
    /// UVC interface number (mi). Interface 0 is the depth/stereo interface.
    pub mi: u16,
    /// Platform device path.
    pub device_path: String,
}

/// Descriptor for a dedicated USB hardware-monitor interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UsbDeviceInfo {
    pub vid: u16,
    pub pid: u16,
    pub unique_id: String,
    pub device_path: String,
}

/// Descriptor for a HID sibling interface (motion sensors).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HidDeviceInfo {
    pub vid: u16,
    pub pid: u16,
    pub unique_id: String,
    pub device_path: String,
}

// =============================================================================
// Firmware Version
// =============================================================================

/// A four-component firmware version parsed from a device string.
///
/// Ordering is componentwise, most significant first. Used purely for feature
/// gating; the wire formats never change mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FirmwareVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub build: u16,
}

impl FirmwareVersion {
    /// Creates a version from its four components.
    pub const fn new(major: u16, minor: u16, patch: u16, build: u16) -> Self {
        Self {
            major,
            minor,
            patch,
            build,
        }
    }
}

impl FromStr for FirmwareVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = [0u16; 4];
        let mut count = 0;
        for (i, field) in s.split('.').enumerate() {
            if i >= 4 {
                return Err(Error::invalid_value(format!(
                    "firmware version '{}' has more than 4 components",
                    s
                )));
            }
            parts[i] = field.trim().parse::<u16>().map_err(|_| {
                Error::invalid_value(format!("firmware version '{}' is not numeric", s))
            })?;
            count = i + 1;
        }
        if count != 4 {
            return Err(Error::invalid_value(format!(
                "firmware version '{}' must have 4 components",
                s
            )));
        }
        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.patch, self.build
        )
    }
}

// =============================================================================
// Controls
// =============================================================================

/// Declared numeric range of a control.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OptionRange {
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub default: f32,
}

impl OptionRange {
    pub fn new(min: f32, max: f32, step: f32, default: f32) -> Self {
        Self {
            min,
            max,
            step,
            default,
        }
    }

    /// Returns true if `value` lies within `[min, max]`.
    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Named controls a composed device may register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OptionCode {
    Gain,
    Exposure,
    EnableAutoExposure,
    AutoExposureMode,
    AutoExposureAntiflickerRate,
    EmitterEnabled,
    LaserPower,
    OutputTriggerEnabled,
    ErrorPollingEnabled,
    ProjectorTemperature,
    AsicTemperature,
    EnableAutoWhiteBalance,
    DepthUnits,
    EnableMotionCorrection,
    MotionModuleTemperature,
    BacklightCompensation,
    Brightness,
    Contrast,
    Gamma,
    Hue,
    Saturation,
    Sharpness,
    WhiteBalance,
}

/// Rectangular pixel region used to scope auto-exposure metering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionOfInterest {
    pub min_x: u16,
    pub max_x: u16,
    pub min_y: u16,
    pub max_y: u16,
}

impl RegionOfInterest {
    pub fn new(min_x: u16, max_x: u16, min_y: u16, max_y: u16) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
        }
    }
}

// =============================================================================
// Streams and Formats
// =============================================================================

/// Logical stream identities a sensor can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StreamKind {
    Depth,
    Infrared,
    Infrared2,
    Fisheye,
    Accel,
    Gyro,
    Color,
    Gpio,
}

/// The logical sensor kinds a composed device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorKind {
    Depth,
    Fisheye,
    Motion,
    Color,
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorKind::Depth => "Stereo Module",
            SensorKind::Fisheye => "Fisheye Camera",
            SensorKind::Motion => "Motion Module",
            SensorKind::Color => "RGB Camera",
        };
        write!(f, "{}", name)
    }
}

/// Pixel formats registered on endpoints during composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PixelFormat {
    /// 16-bit depth.
    Z16,
    /// Left imager luminance.
    Y8,
    Yuyv,
    /// Color projected onto depth.
    Uyvy,
    Rgb8,
    /// Interleaved left+right luminance. Requires advanced mode.
    Y8I,
    /// Interleaved left+right 12-bit, unrectified. Requires advanced mode.
    Y12I,
    Raw8,
    /// Raw8 fallback for unpatched kernels.
    Raw8Unpatched,
    Bayer16,
    AccelXyz32F,
    GyroXyz32F,
    GpioRaw,
}

/// A stream resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// =============================================================================
// Geometry
// =============================================================================

/// Per-stream optical intrinsics resolved from a calibration table.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    pub fx: f32,
    pub fy: f32,
    pub ppx: f32,
    pub ppy: f32,
}

/// Rigid transform between two streams. Rotation is row-major.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Extrinsics {
    pub rotation: [f32; 9],
    pub translation: [f32; 3],
}

impl Extrinsics {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [0.0, 0.0, 0.0],
        }
    }
}

/// A sensor pose: orientation (row-major 3x3) and position in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Pose {
    pub orientation: [f32; 9],
    pub position: [f32; 3],
}

impl Pose {
    /// The identity pose.
    pub fn identity() -> Self {
        Self {
            orientation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            position: [0.0, 0.0, 0.0],
        }
    }

    /// Inverts the pose. Orientation is orthonormal so the inverse rotation
    /// is the transpose.
    pub fn inverse(&self) -> Self {
        let r = &self.orientation;
        let rt = [r[0], r[3], r[6], r[1], r[4], r[7], r[2], r[5], r[8]];
        let p = &self.position;
        let position = [
            -(rt[0] * p[0] + rt[1] * p[1] + rt[2] * p[2]),
            -(rt[3] * p[0] + rt[4] * p[1] + rt[5] * p[2]),
            -(rt[6] * p[0] + rt[7] * p[1] + rt[8] * p[2]),
        ];
        Self {
            orientation: rt,
            position,
        }
    }

    /// Composes `self` with `other` (`self` applied after `other`).
    pub fn compose(&self, other: &Pose) -> Self {
        let a = &self.orientation;
        let b = &other.orientation;
        let mut orientation = [0.0f32; 9];
        for row in 0..3 {
            for col in 0..3 {
                orientation[row * 3 + col] = a[row * 3] * b[col]
                    + a[row * 3 + 1] * b[3 + col]
                    + a[row * 3 + 2] * b[6 + col];
            }
        }
        let p = &other.position;
        let position = [
            a[0] * p[0] + a[1] * p[1] + a[2] * p[2] + self.position[0],
            a[3] * p[0] + a[4] * p[1] + a[5] * p[2] + self.position[1],
            a[6] * p[0] + a[7] * p[1] + a[8] * p[2] + self.position[2],
        ];
        Self {
            orientation,
            position,
        }
    }
}

impl From<Extrinsics> for Pose {
    fn from(e: Extrinsics) -> Self {
        Self {
            orientation: e.rotation,
            position: e.translation,
        }
    }
}

impl From<Pose> for Extrinsics {
    fn from(p: Pose) -> Self {
        Self {
            rotation: p.orientation,
            translation: p.position,
        }
    }
}

// =============================================================================
// Device Metadata and Notifications
// =============================================================================

/// String-keyed device metadata fields published per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CameraInfo {
    DeviceName,
    ModuleName,
    SerialNumber,
    FirmwareVersion,
    DeviceLocation,
    DebugOpCode,
    AdvancedMode,
    ProductId,
    MotionModuleFirmwareVersion,
    CameraLocked,
}

/// Category of a decoded hardware notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NotificationCategory {
    HardwareError,
}

/// Severity of a decoded hardware notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NotificationSeverity {
    None,
    Warn,
    Error,
}

/// A decoded hardware notification, one per poll cycle with a changed code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Notification {
    pub category: NotificationCategory,
    pub code: i32,
    pub severity: NotificationSeverity,
    pub description: String,
}

impl Notification {
    pub fn new(
        category: NotificationCategory,
        code: i32,
        severity: NotificationSeverity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code,
            severity,
            description: description.into(),
        }
    }
}

/// A processed frame sample handed to the auto-exposure mechanism.
///
/// Holds a borrowed view of the luminance plane; never retained past the call.
#[derive(Debug)]
pub struct FrameSample<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // FirmwareVersion Tests
    // ==========================================================================

    #[test]
    fn test_firmware_version_parses_four_components() {
        let v: FirmwareVersion = "5.6.3.0".parse().unwrap();
        assert_eq!(v, FirmwareVersion::new(5, 6, 3, 0));
        assert_eq!(v.to_string(), "5.6.3.0");
    }

    #[test]
    fn test_firmware_version_rejects_malformed_strings() {
        assert!("5.6.3".parse::<FirmwareVersion>().is_err());
        assert!("5.6.3.0.1".parse::<FirmwareVersion>().is_err());
        assert!("5.6.x.0".parse::<FirmwareVersion>().is_err());
        assert!("".parse::<FirmwareVersion>().is_err());
    }

    #[test]
    fn test_firmware_version_ordering_is_componentwise() {
        let a: FirmwareVersion = "5.5.8.0".parse().unwrap();
        let b: FirmwareVersion = "5.6.3.0".parse().unwrap();
        let c: FirmwareVersion = "5.6.3.1".parse().unwrap();
        assert!(a < b);
        assert!(b < c);
        assert!("6.0.0.0".parse::<FirmwareVersion>().unwrap() > c);
        // Component order dominates string order.
        let lo: FirmwareVersion = "5.9.0.0".parse().unwrap();
        let hi: FirmwareVersion = "5.10.0.0".parse().unwrap();
        assert!(lo < hi);
    }

    // ==========================================================================
    // Pose Tests
    // ==========================================================================

    #[test]
    fn test_pose_inverse_of_identity_is_identity() {
        let p = Pose::identity();
        assert_eq!(p.inverse(), p);
    }

    #[test]
    fn test_pose_inverse_roundtrip_restores_identity() {
        // 90-degree rotation about z with a translation.
        let p = Pose {
            orientation: [0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            position: [1.0, 2.0, 3.0],
        };
        let round = p.compose(&p.inverse());
        let id = Pose::identity();
        for i in 0..9 {
            assert!((round.orientation[i] - id.orientation[i]).abs() < 1e-6);
        }
        for i in 0..3 {
            assert!(round.position[i].abs() < 1e-6);
        }
    }

    #[test]
    fn test_pose_compose_applies_translation_through_rotation() {
        let rot_z = Pose {
            orientation: [0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            position: [0.0, 0.0, 0.0],
        };
        let shift_x = Pose {
            orientation: Pose::identity().orientation,
            position: [1.0, 0.0, 0.0],
        };
        let composed = rot_z.compose(&shift_x);
        assert!((composed.position[0] - 0.0).abs() < 1e-6);
        assert!((composed.position[1] - 1.0).abs() < 1e-6);
    }

    // ==========================================================================
    // OptionRange Tests
    // ==========================================================================

    #[test]
    fn test_option_range_contains_is_inclusive() {
        let range = OptionRange::new(0.0, 1.0, 1.0, 1.0);
        assert!(range.contains(0.0));
        assert!(range.contains(1.0));
        assert!(!range.contains(1.5));
        assert!(!range.contains(-0.5));
    }
}
