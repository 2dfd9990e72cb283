//! Device-control core for a stereo depth-camera family.
//!
//! This crate turns enumerated USB descriptors into composed camera devices:
//! it groups sibling interfaces, speaks the hardware-monitor protocol to the
//! embedded controller, parses checksummed calibration tables and per-frame
//! metadata, and wires the control surface (exposure, emitter, temperatures,
//! error polling) that a streaming layer builds on. The transport itself is
//! injected behind the traits in [`transport`]; this crate never opens USB
//! devices.
//!
//! Composition is declarative: the product id and the firmware version read
//! at construction select capabilities through one gate table, and the
//! resulting [`device::DepthCamera`] exposes per-sensor [`endpoint::Endpoint`]s.

pub mod auto_exposure;
pub mod calibration;
pub mod controls;
pub mod device;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod hwmon;
pub mod metadata;
pub mod polling;
pub mod transport;
pub mod types;

pub use device::{enabled_features, DepthCamera, Feature};
pub use discovery::{pick_depth_devices, DeviceGroup};
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use types::{
    CameraInfo, Extrinsics, FirmwareVersion, Intrinsics, Notification, OptionCode, OptionRange,
    PixelFormat, Pose, RegionOfInterest, Resolution, SensorKind, StreamKind,
};
