//! Composed depth cameras.
//!
//! [`DepthCamera::new`] turns a claimed [`DeviceGroup`] into a fully wired
//! device: the command channel, one endpoint per logical sensor, the control
//! registry, calibration caches, metadata parsers, info records and the
//! error poller. What gets wired is decided declaratively by the product id
//! and the firmware version read at composition time; nothing re-gates
//! mid-session.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::auto_exposure::{
    AntiflickerRateControl, AutoExposureMechanism, AutoExposureModeControl, AutoExposureState,
    EnableAutoExposureControl, HwRoiMethod, SwRoiMethod,
};
use crate::calibration::{
    Cached, CoefficientsTable, FisheyeExtrinsicsTable, FisheyeIntrinsicsTable, ImuCalibrationTable,
    MotionIntrinsics, TableId, FISHEYE_INTRINSICS_LEN, FISHEYE_INTRINSICS_OFFSET,
    IMU_TABLE_OFFSET, TABLE_HEADER_SIZE,
};
use crate::controls::{
    AutoDisablingControl, ConstControl, Control, DepthScaleControl, MotionCorrectionControl,
    MotionModuleTemperatureControl, PuControl, TemperatureControl, XuControl, XuWidth,
};
use crate::discovery::{filter_by_mi, DeviceGroup};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::hwmon::{
    opcode, Command, HwMonitor, LockedTransfer, GVD_CAMERA_LOCKED_OFFSET, GVD_FW_VERSION_OFFSET,
    GVD_MODULE_SERIAL_OFFSET, GVD_MOTION_MODULE_FW_VERSION_OFFSET,
};
use crate::metadata::{depth_parser, fisheye_parser, DEPTH_FIELDS, FISHEYE_FIELDS};
use crate::polling::{DepthNotificationDecoder, PollingEnabledControl, PollingErrorHandler};
use crate::transport::{Backend, ExtensionUnit, UvcDevice, XuCommandTransfer};
use crate::types::{
    CameraInfo, Extrinsics, FirmwareVersion, Intrinsics, OptionCode, OptionRange, PixelFormat,
    Pose, Resolution, SensorKind, StreamKind,
};

/// USB vendor id of the camera family.
pub const CAMERA_VID: u16 = 0x8086;

/// Product ids of the supported sku family.
pub mod pid {
    pub const DC400: u16 = 0x0AD1;
    pub const DC410: u16 = 0x0AD2;
    pub const DC415: u16 = 0x0AD3;
    pub const DC430: u16 = 0x0AD4;
    pub const DC430_MM: u16 = 0x0AD5;
    pub const DC420_MM: u16 = 0x0AF6;
    pub const DC430_MM_RGB: u16 = 0x0B01;
    pub const DC435_RGB: u16 = 0x0B07;
}

pub const SUPPORTED_PIDS: &[u16] = &[
    pid::DC400,
    pid::DC410,
    pid::DC415,
    pid::DC430,
    pid::DC430_MM,
    pid::DC420_MM,
    pid::DC430_MM_RGB,
    pid::DC435_RGB,
];

const MOTION_CAPABLE_PIDS: &[u16] = &[pid::DC430_MM, pid::DC420_MM];
const RGB_PIDS: &[u16] = &[pid::DC415, pid::DC430_MM_RGB, pid::DC435_RGB];
const EMITTER_PIDS: &[u16] = &[
    pid::DC410,
    pid::DC430,
    pid::DC430_MM,
    pid::DC430_MM_RGB,
    pid::DC435_RGB,
];
const AUTO_WHITE_BALANCE_PIDS: &[u16] = &[pid::DC400, pid::DC410, pid::DC415];
const PROJECTOR_TEMPERATURE_PIDS: &[u16] = &[pid::DC410, pid::DC430, pid::DC430_MM];

pub fn is_motion_capable(pid: u16) -> bool {
    MOTION_CAPABLE_PIDS.contains(&pid)
}

pub fn is_rgb_capable(pid: u16) -> bool {
    RGB_PIDS.contains(&pid)
}

pub fn has_emitter(pid: u16) -> bool {
    EMITTER_PIDS.contains(&pid)
}

pub fn sku_name(pid: u16) -> &'static str {
    match pid {
        pid::DC400 => "DC400",
        pid::DC410 => "DC410",
        pid::DC415 => "DC415",
        pid::DC430 => "DC430",
        pid::DC430_MM => "DC430 Motion",
        pid::DC420_MM => "DC420 Motion",
        pid::DC430_MM_RGB => "DC430 Motion RGB",
        pid::DC435_RGB => "DC435 RGB",
        _ => "Unknown",
    }
}

// UVC interface numbers within one physical unit.
pub const FISHEYE_MI: u16 = 3;
pub const COLOR_MI: u16 = 2;

// =============================================================================
// Extension units and control codes
// =============================================================================

/// Vendor extension unit on the depth interface.
pub const DEPTH_XU: ExtensionUnit = ExtensionUnit {
    subdevice: 0,
    unit: 3,
    node: 2,
    guid: [
        0xCB, 0x6C, 0x60, 0xC9, 0x4C, 0x59, 0x25, 0x4D, 0xAF, 0x47, 0xCC, 0xC4, 0x96, 0x43, 0x59,
        0x95,
    ],
};

/// Vendor extension unit on the fisheye interface.
pub const FISHEYE_XU: ExtensionUnit = ExtensionUnit {
    subdevice: 3,
    unit: 3,
    node: 2,
    guid: [
        0xD1, 0xC3, 0xC3, 0xF6, 0xDE, 0x5C, 0x77, 0x44, 0xAD, 0xF0, 0x41, 0xEB, 0x9A, 0x5F, 0x04,
        0xA5,
    ],
};

/// Depth extension-unit control codes.
pub mod xu_ctrl {
    pub const EMITTER_ENABLED: u8 = 0x01;
    pub const EXPOSURE: u8 = 0x02;
    pub const LASER_POWER: u8 = 0x03;
    /// Hardware-monitor tunnel for skus without a dedicated USB interface.
    pub const HWMONITOR: u8 = 0x06;
    pub const ERROR_REPORTING: u8 = 0x07;
    pub const EXT_TRIGGER: u8 = 0x08;
    pub const ASIC_TEMPERATURE: u8 = 0x09;
    pub const AUTO_WHITE_BALANCE: u8 = 0x0A;
    pub const ENABLE_AUTO_EXPOSURE: u8 = 0x0B;
    pub const PROJECTOR_TEMPERATURE: u8 = 0x0C;
    /// Fisheye exposure lives in the fisheye unit's first control.
    pub const FISHEYE_EXPOSURE: u8 = 0x01;
}

/// Processing-unit control ids shared by the imagers.
pub mod pu_ctrl {
    pub const BACKLIGHT_COMPENSATION: u32 = 1;
    pub const BRIGHTNESS: u32 = 2;
    pub const CONTRAST: u32 = 3;
    pub const GAIN: u32 = 4;
    pub const GAMMA: u32 = 5;
    pub const HUE: u32 = 6;
    pub const SATURATION: u32 = 7;
    pub const SHARPNESS: u32 = 8;
    pub const WHITE_BALANCE: u32 = 9;
    pub const ENABLE_AUTO_WHITE_BALANCE: u32 = 10;
    pub const EXPOSURE: u32 = 11;
    pub const ENABLE_AUTO_EXPOSURE: u32 = 12;
}

// =============================================================================
// Feature gating
// =============================================================================

/// Capabilities gated on firmware version and product id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    DepthExposureControls,
    AutoWhiteBalance,
    FisheyeAutoExposure,
    CameraLockQuery,
    OutputTrigger,
    ErrorPolling,
    ProjectorTemperature,
    AsicTemperature,
    MotionModuleFirmwareQuery,
    GpioStreams,
    MotionModuleTemperature,
}

/// One row of the gate table: the feature exists from `min_fw` on, for the
/// listed product ids (`None` means every sku).
pub struct FeatureGate {
    pub min_fw: FirmwareVersion,
    pub pids: Option<&'static [u16]>,
    pub feature: Feature,
}

const FW_5_5_8_0: FirmwareVersion = FirmwareVersion::new(5, 5, 8, 0);
const FW_5_6_0_0: FirmwareVersion = FirmwareVersion::new(5, 6, 0, 0);
const FW_5_6_3_0: FirmwareVersion = FirmwareVersion::new(5, 6, 3, 0);

/// The whole capability surface, in one place. Composition walks this table
/// once; nothing else encodes a firmware comparison.
pub const FEATURE_GATES: &[FeatureGate] = &[
    FeatureGate {
        min_fw: FW_5_5_8_0,
        pids: None,
        feature: Feature::OutputTrigger,
    },
    FeatureGate {
        min_fw: FW_5_5_8_0,
        pids: None,
        feature: Feature::ErrorPolling,
    },
    FeatureGate {
        min_fw: FW_5_5_8_0,
        pids: None,
        feature: Feature::AsicTemperature,
    },
    FeatureGate {
        min_fw: FW_5_5_8_0,
        pids: Some(PROJECTOR_TEMPERATURE_PIDS),
        feature: Feature::ProjectorTemperature,
    },
    FeatureGate {
        min_fw: FW_5_5_8_0,
        pids: Some(MOTION_CAPABLE_PIDS),
        feature: Feature::MotionModuleFirmwareQuery,
    },
    FeatureGate {
        min_fw: FW_5_6_0_0,
        pids: Some(MOTION_CAPABLE_PIDS),
        feature: Feature::GpioStreams,
    },
    FeatureGate {
        min_fw: FW_5_6_0_0,
        pids: Some(MOTION_CAPABLE_PIDS),
        feature: Feature::MotionModuleTemperature,
    },
    FeatureGate {
        min_fw: FW_5_6_3_0,
        pids: None,
        feature: Feature::DepthExposureControls,
    },
    FeatureGate {
        min_fw: FW_5_6_3_0,
        pids: None,
        feature: Feature::CameraLockQuery,
    },
    FeatureGate {
        min_fw: FW_5_6_3_0,
        pids: Some(AUTO_WHITE_BALANCE_PIDS),
        feature: Feature::AutoWhiteBalance,
    },
    FeatureGate {
        min_fw: FW_5_6_3_0,
        pids: Some(MOTION_CAPABLE_PIDS),
        feature: Feature::FisheyeAutoExposure,
    },
];

/// Evaluates the gate table for one device.
pub fn enabled_features(fw: FirmwareVersion, pid: u16) -> Vec<Feature> {
    FEATURE_GATES
        .iter()
        .filter(|gate| fw >= gate.min_fw)
        .filter(|gate| gate.pids.map_or(true, |pids| pids.contains(&pid)))
        .map(|gate| gate.feature)
        .collect()
}

// =============================================================================
// The composed device
// =============================================================================

/// Streams produced by the stereo pair; extrinsics within this set come from
/// the baseline, not from pose composition.
const STEREO_STREAMS: &[StreamKind] = &[StreamKind::Depth, StreamKind::Infrared, StreamKind::Infrared2];

pub struct DepthCamera {
    pid: u16,
    fw: FirmwareVersion,
    features: Vec<Feature>,
    advanced_mode: bool,
    monitor: Arc<HwMonitor>,
    endpoints: Vec<Arc<Endpoint>>,
    coefficients: Arc<Cached<CoefficientsTable>>,
    fisheye_intrinsics: Option<Arc<Cached<FisheyeIntrinsicsTable>>>,
    imu_calibration: Option<Arc<Cached<ImuCalibrationTable>>>,
    fisheye_mechanism: Option<Arc<AutoExposureMechanism>>,
    // Kept alive for the lifetime of the device; Drop joins the thread.
    _poller: Option<PollingErrorHandler>,
}

impl DepthCamera {
    pub fn new(backend: &dyn Backend, group: &DeviceGroup) -> Result<Self> {
        let first = group
            .uvc_devices
            .first()
            .ok_or_else(|| Error::config("device group has no video interfaces"))?;
        let product = first.pid;
        if !SUPPORTED_PIDS.contains(&product) {
            return Err(Error::config(format!(
                "product id {:#06x} is not a supported sku",
                product
            )));
        }

        let depth_infos = filter_by_mi(&group.uvc_devices, crate::discovery::DEPTH_MI);
        let depth_info = depth_infos
            .first()
            .ok_or_else(|| Error::config("device group has no depth interface"))?;
        let depth_uvc = backend.create_uvc_device(depth_info)?;
        depth_uvc.claim_xu(&DEPTH_XU)?;

        let depth_ep = Arc::new(Endpoint::new(SensorKind::Depth));
        depth_ep.register_extension_unit(DEPTH_XU)?;

        // Command channel: dedicated USB interface when the sku has one,
        // otherwise tunneled through the depth extension unit.
        let transfer = match &group.usb_device {
            Some(usb) => backend.create_usb_device(usb)?,
            None => Box::new(XuCommandTransfer::new(
                depth_uvc.clone(),
                DEPTH_XU,
                xu_ctrl::HWMONITOR,
            )),
        };
        let mut monitor = Arc::new(HwMonitor::new(LockedTransfer::new(
            transfer,
            depth_ep.stream_guard(),
        )));

        let fw: FirmwareVersion = monitor
            .get_firmware_version_string(GVD_FW_VERSION_OFFSET)?
            .parse()?;
        let features = enabled_features(fw, product);
        let serial = monitor.get_module_serial_string(GVD_MODULE_SERIAL_OFFSET)?;
        let locked = if features.contains(&Feature::CameraLockQuery) {
            Some(monitor.is_camera_locked(GVD_CAMERA_LOCKED_OFFSET)?)
        } else {
            None
        };

        // Build-time switch: route all later command traffic through the
        // extension-unit tunnel even when a USB interface exists.
        if cfg!(feature = "hwm-over-xu") && group.usb_device.is_some() {
            monitor = Arc::new(HwMonitor::new(LockedTransfer::new(
                Box::new(XuCommandTransfer::new(
                    depth_uvc.clone(),
                    DEPTH_XU,
                    xu_ctrl::HWMONITOR,
                )),
                depth_ep.stream_guard(),
            )));
        }

        let advanced_mode = query_advanced_mode(&monitor)?;
        let coefficients = Arc::new(coefficients_cache(monitor.clone()));

        let mut camera = Self {
            pid: product,
            fw,
            features,
            advanced_mode,
            monitor,
            endpoints: Vec::new(),
            coefficients,
            fisheye_intrinsics: None,
            imu_calibration: None,
            fisheye_mechanism: None,
            _poller: None,
        };

        camera.compose_depth(depth_ep.clone(), depth_uvc, depth_info, &serial, locked)?;
        if is_motion_capable(product) {
            camera.compose_fisheye_and_motion(backend, group, &serial)?;
        }
        if is_rgb_capable(product) {
            camera.compose_color(backend, group, &serial)?;
        }
        Ok(camera)
    }

    // =========================================================================
    // Composition
    // =========================================================================

    fn compose_depth(
        &mut self,
        ep: Arc<Endpoint>,
        uvc: Arc<dyn UvcDevice>,
        info: &crate::types::UvcDeviceInfo,
        serial: &str,
        locked: Option<bool>,
    ) -> Result<()> {
        ep.register_pixel_format(PixelFormat::Z16)?;
        ep.register_pixel_format(PixelFormat::Y8)?;
        ep.register_pixel_format(PixelFormat::Yuyv)?;
        ep.register_pixel_format(PixelFormat::Uyvy)?;
        ep.register_pixel_format(PixelFormat::Rgb8)?;
        if self.advanced_mode {
            // Interleaved left+right formats need the advanced asic path.
            ep.register_pixel_format(PixelFormat::Y8I)?;
            ep.register_pixel_format(PixelFormat::Y12I)?;
        }

        if has_emitter(self.pid) {
            ep.register_option(
                OptionCode::EmitterEnabled,
                Arc::new(
                    XuControl::new(
                        uvc.clone(),
                        DEPTH_XU,
                        xu_ctrl::EMITTER_ENABLED,
                        XuWidth::U8,
                        OptionRange::new(0.0, 2.0, 1.0, 1.0),
                        "Emitter Enabled",
                    )
                    .with_value_descriptions(&[(0, "Off"), (1, "On"), (2, "Auto")]),
                ),
            )?;
            ep.register_option(
                OptionCode::LaserPower,
                Arc::new(XuControl::new(
                    uvc.clone(),
                    DEPTH_XU,
                    xu_ctrl::LASER_POWER,
                    XuWidth::U16,
                    OptionRange::new(0.0, 360.0, 30.0, 150.0),
                    "Laser Power",
                )),
            )?;
        }

        let gain: Arc<dyn Control> = Arc::new(PuControl::new(uvc.clone(), pu_ctrl::GAIN, "Gain"));
        if self.supports(Feature::DepthExposureControls) {
            let enable_ae: Arc<dyn Control> = Arc::new(XuControl::new(
                uvc.clone(),
                DEPTH_XU,
                xu_ctrl::ENABLE_AUTO_EXPOSURE,
                XuWidth::U8,
                OptionRange::new(0.0, 1.0, 1.0, 1.0),
                "Enable Auto Exposure",
            ));
            let exposure: Arc<dyn Control> = Arc::new(XuControl::new(
                uvc.clone(),
                DEPTH_XU,
                xu_ctrl::EXPOSURE,
                XuWidth::U32,
                OptionRange::new(20.0, 166_000.0, 20.0, 8_500.0),
                "Exposure",
            ));
            ep.register_option(
                OptionCode::Exposure,
                Arc::new(AutoDisablingControl::new(exposure, enable_ae.clone())),
            )?;
            ep.register_option(
                OptionCode::Gain,
                Arc::new(AutoDisablingControl::new(gain, enable_ae.clone())),
            )?;
            ep.register_option(OptionCode::EnableAutoExposure, enable_ae)?;
        } else {
            ep.register_option(OptionCode::Gain, gain)?;
        }

        if self.supports(Feature::AutoWhiteBalance) {
            ep.register_option(
                OptionCode::EnableAutoWhiteBalance,
                Arc::new(XuControl::new(
                    uvc.clone(),
                    DEPTH_XU,
                    xu_ctrl::AUTO_WHITE_BALANCE,
                    XuWidth::U8,
                    OptionRange::new(0.0, 1.0, 1.0, 1.0),
                    "Enable Auto White Balance",
                )),
            )?;
        }
        if self.supports(Feature::OutputTrigger) {
            ep.register_option(
                OptionCode::OutputTriggerEnabled,
                Arc::new(XuControl::new(
                    uvc.clone(),
                    DEPTH_XU,
                    xu_ctrl::EXT_TRIGGER,
                    XuWidth::U8,
                    OptionRange::new(0.0, 1.0, 1.0, 0.0),
                    "External trigger output",
                )),
            )?;
        }
        if self.supports(Feature::AsicTemperature) {
            ep.register_option(
                OptionCode::AsicTemperature,
                Arc::new(TemperatureControl::new(
                    uvc.clone(),
                    DEPTH_XU,
                    xu_ctrl::ASIC_TEMPERATURE,
                    "Asic Temperature",
                )),
            )?;
        }
        if self.supports(Feature::ProjectorTemperature) {
            ep.register_option(
                OptionCode::ProjectorTemperature,
                Arc::new(TemperatureControl::new(
                    uvc.clone(),
                    DEPTH_XU,
                    xu_ctrl::PROJECTOR_TEMPERATURE,
                    "Projector Temperature",
                )),
            )?;
        }

        let depth_units: Arc<dyn Control> = if self.advanced_mode {
            Arc::new(DepthScaleControl::new(self.monitor.clone()))
        } else {
            Arc::new(ConstControl::new(
                0.001,
                "Number of meters represented by a single depth unit",
            ))
        };
        ep.register_option(OptionCode::DepthUnits, depth_units)?;

        if self.supports(Feature::ErrorPolling) {
            let report: Arc<dyn Control> = Arc::new(XuControl::new(
                uvc,
                DEPTH_XU,
                xu_ctrl::ERROR_REPORTING,
                XuWidth::U8,
                OptionRange::new(0.0, 255.0, 1.0, 0.0),
                "Error report",
            ));
            let sink_ep = ep.clone();
            let poller = PollingErrorHandler::start(
                report,
                Arc::new(DepthNotificationDecoder),
                Arc::new(move |n| {
                    if let Err(err) = sink_ep.notify(n) {
                        log::warn!("failed to publish notification: {}", err);
                    }
                }),
            );
            // Polling is live from composition; the option can switch it off.
            poller.set_enabled(true);
            ep.register_option(
                OptionCode::ErrorPollingEnabled,
                Arc::new(PollingEnabledControl::new(poller.enabled_flag())),
            )?;
            self._poller = Some(poller);
        }

        for &field in DEPTH_FIELDS {
            ep.register_metadata(field, depth_parser(field))?;
        }
        ep.set_roi_method(Box::new(HwRoiMethod::new(self.monitor.clone())))?;
        ep.set_pose(Cached::new(|| Ok(Pose::identity())))?;

        self.register_common_info(&ep, "Stereo Module", info, serial)?;
        ep.register_info(
            CameraInfo::AdvancedMode,
            if self.advanced_mode { "YES" } else { "NO" },
        )?;
        if let Some(locked) = locked {
            ep.register_info(CameraInfo::CameraLocked, if locked { "YES" } else { "NO" })?;
        }
        if self.supports(Feature::MotionModuleFirmwareQuery) {
            let mm_fw = self
                .monitor
                .get_firmware_version_string(GVD_MOTION_MODULE_FW_VERSION_OFFSET)?;
            ep.register_info(CameraInfo::MotionModuleFirmwareVersion, mm_fw)?;
        }

        self.endpoints.push(ep);
        Ok(())
    }

    fn compose_fisheye_and_motion(
        &mut self,
        backend: &dyn Backend,
        group: &DeviceGroup,
        serial: &str,
    ) -> Result<()> {
        let fisheye_infos = filter_by_mi(&group.uvc_devices, FISHEYE_MI);
        if fisheye_infos.len() != 1 {
            return Err(Error::config(format!(
                "motion-capable sku needs exactly one fisheye interface, found {}",
                fisheye_infos.len()
            )));
        }
        let fisheye_info = &fisheye_infos[0];
        let fisheye_uvc = backend.create_uvc_device(fisheye_info)?;
        fisheye_uvc.claim_xu(&FISHEYE_XU)?;

        let fe_ep = Arc::new(Endpoint::new(SensorKind::Fisheye));
        fe_ep.register_extension_unit(FISHEYE_XU)?;
        fe_ep.register_pixel_format(PixelFormat::Raw8)?;
        fe_ep.register_pixel_format(PixelFormat::Raw8Unpatched)?;

        let fe_gain: Arc<dyn Control> =
            Arc::new(PuControl::new(fisheye_uvc.clone(), pu_ctrl::GAIN, "Gain"));
        let fe_exposure: Arc<dyn Control> = Arc::new(XuControl::new(
            fisheye_uvc,
            FISHEYE_XU,
            xu_ctrl::FISHEYE_EXPOSURE,
            XuWidth::U16,
            OptionRange::new(2.0, 320.0, 1.0, 40.0),
            "Exposure",
        ));

        if self.supports(Feature::FisheyeAutoExposure) {
            let state = Arc::new(Mutex::new(AutoExposureState::default()));
            let mechanism = Arc::new(AutoExposureMechanism::new(
                fe_gain.clone(),
                fe_exposure.clone(),
                state.clone(),
            ));
            let enable: Arc<dyn Control> = Arc::new(EnableAutoExposureControl::new(state.clone()));
            fe_ep.register_option(
                OptionCode::Exposure,
                Arc::new(AutoDisablingControl::new(fe_exposure, enable.clone())),
            )?;
            fe_ep.register_option(
                OptionCode::Gain,
                Arc::new(AutoDisablingControl::new(fe_gain, enable.clone())),
            )?;
            fe_ep.register_option(OptionCode::EnableAutoExposure, enable)?;
            fe_ep.register_option(
                OptionCode::AutoExposureMode,
                Arc::new(AutoExposureModeControl::new(state.clone())),
            )?;
            fe_ep.register_option(
                OptionCode::AutoExposureAntiflickerRate,
                Arc::new(AntiflickerRateControl::new(state)),
            )?;
            fe_ep.set_roi_method(Box::new(SwRoiMethod::new(mechanism.clone())))?;
            self.fisheye_mechanism = Some(mechanism);
        } else {
            fe_ep.register_option(OptionCode::Exposure, fe_exposure)?;
            fe_ep.register_option(OptionCode::Gain, fe_gain)?;
        }

        for &field in FISHEYE_FIELDS {
            fe_ep.register_metadata(field, fisheye_parser(field))?;
        }

        let fe_intrinsics = Arc::new(fisheye_intrinsics_cache(self.monitor.clone()));
        let fe_extrinsics = Arc::new(fisheye_extrinsics_cache(self.monitor.clone()));
        let imu = Arc::new(imu_calibration_cache(self.monitor.clone()));

        let pose_ext = fe_extrinsics.clone();
        fe_ep.set_pose(Cached::new(move || {
            let table = pose_ext.get()?;
            Ok(Pose::from(table.extrinsics).inverse())
        }))?;
        self.register_common_info(&fe_ep, "Fisheye Camera", fisheye_info, serial)?;
        self.endpoints.push(fe_ep);

        // Motion endpoint over the HID siblings.
        let hid_info = group
            .hid_devices
            .first()
            .ok_or_else(|| Error::config("motion-capable sku has no HID interface"))?;
        let hid = backend.create_hid_device(hid_info)?;

        let motion_ep = Arc::new(Endpoint::new(SensorKind::Motion));
        motion_ep.register_pixel_format(PixelFormat::AccelXyz32F)?;
        motion_ep.register_pixel_format(PixelFormat::GyroXyz32F)?;
        if self.supports(Feature::GpioStreams) {
            motion_ep.register_pixel_format(PixelFormat::GpioRaw)?;
        }
        if self.supports(Feature::MotionModuleTemperature) {
            motion_ep.register_option(
                OptionCode::MotionModuleTemperature,
                Arc::new(MotionModuleTemperatureControl::new(hid)),
            )?;
        }

        // Motion correction needs the IMU table; an unreadable table costs
        // the option, not the device.
        match imu.get() {
            Ok(_) => {
                motion_ep.register_option(
                    OptionCode::EnableMotionCorrection,
                    Arc::new(MotionCorrectionControl::new()),
                )?;
            }
            Err(err) => {
                log::warn!("IMU calibration unavailable, motion correction disabled: {}", err);
            }
        }

        let pose_ext = fe_extrinsics;
        let pose_imu = imu.clone();
        motion_ep.set_pose(Cached::new(move || {
            let fe_pose = Pose::from(pose_ext.get()?.extrinsics).inverse();
            let imu_pose = Pose::from(pose_imu.get()?.imu_to_fisheye);
            Ok(fe_pose.compose(&imu_pose))
        }))?;
        motion_ep.register_info(CameraInfo::DeviceName, sku_name(self.pid))?;
        motion_ep.register_info(CameraInfo::ModuleName, "Motion Module")?;
        motion_ep.register_info(CameraInfo::SerialNumber, serial)?;
        motion_ep.register_info(CameraInfo::FirmwareVersion, self.fw.to_string())?;
        motion_ep.register_info(CameraInfo::DeviceLocation, hid_info.device_path.as_str())?;
        motion_ep.register_info(CameraInfo::ProductId, format!("{:04X}", self.pid))?;
        self.endpoints.push(motion_ep);

        self.fisheye_intrinsics = Some(fe_intrinsics);
        self.imu_calibration = Some(imu);
        Ok(())
    }

    fn compose_color(
        &mut self,
        backend: &dyn Backend,
        group: &DeviceGroup,
        serial: &str,
    ) -> Result<()> {
        let color_infos = filter_by_mi(&group.uvc_devices, COLOR_MI);
        if color_infos.len() != 1 {
            return Err(Error::config(format!(
                "rgb sku needs exactly one color interface, found {}",
                color_infos.len()
            )));
        }
        let color_info = &color_infos[0];
        let uvc = backend.create_uvc_device(color_info)?;

        let ep = Arc::new(Endpoint::new(SensorKind::Color));
        for format in [
            PixelFormat::Yuyv,
            PixelFormat::Uyvy,
            PixelFormat::Rgb8,
            PixelFormat::Bayer16,
        ] {
            ep.register_pixel_format(format)?;
        }

        let pu_options: &[(OptionCode, u32, &str)] = &[
            (
                OptionCode::BacklightCompensation,
                pu_ctrl::BACKLIGHT_COMPENSATION,
                "Backlight Compensation",
            ),
            (OptionCode::Brightness, pu_ctrl::BRIGHTNESS, "Brightness"),
            (OptionCode::Contrast, pu_ctrl::CONTRAST, "Contrast"),
            (OptionCode::Gamma, pu_ctrl::GAMMA, "Gamma"),
            (OptionCode::Hue, pu_ctrl::HUE, "Hue"),
            (OptionCode::Saturation, pu_ctrl::SATURATION, "Saturation"),
            (OptionCode::Sharpness, pu_ctrl::SHARPNESS, "Sharpness"),
        ];
        for (code, ctrl, name) in pu_options {
            ep.register_option(*code, Arc::new(PuControl::new(uvc.clone(), *ctrl, *name)))?;
        }

        let auto_wb: Arc<dyn Control> = Arc::new(PuControl::new(
            uvc.clone(),
            pu_ctrl::ENABLE_AUTO_WHITE_BALANCE,
            "Enable Auto White Balance",
        ));
        let white_balance: Arc<dyn Control> = Arc::new(PuControl::new(
            uvc.clone(),
            pu_ctrl::WHITE_BALANCE,
            "White Balance",
        ));
        ep.register_option(
            OptionCode::WhiteBalance,
            Arc::new(AutoDisablingControl::new(white_balance, auto_wb.clone())),
        )?;
        ep.register_option(OptionCode::EnableAutoWhiteBalance, auto_wb)?;

        let auto_exp: Arc<dyn Control> = Arc::new(PuControl::new(
            uvc.clone(),
            pu_ctrl::ENABLE_AUTO_EXPOSURE,
            "Enable Auto Exposure",
        ));
        let exposure: Arc<dyn Control> =
            Arc::new(PuControl::new(uvc.clone(), pu_ctrl::EXPOSURE, "Exposure"));
        let gain: Arc<dyn Control> = Arc::new(PuControl::new(uvc, pu_ctrl::GAIN, "Gain"));
        ep.register_option(
            OptionCode::Exposure,
            Arc::new(AutoDisablingControl::new(exposure, auto_exp.clone())),
        )?;
        ep.register_option(
            OptionCode::Gain,
            Arc::new(AutoDisablingControl::new(gain, auto_exp.clone())),
        )?;
        ep.register_option(OptionCode::EnableAutoExposure, auto_exp)?;

        self.register_common_info(&ep, "RGB Camera", color_info, serial)?;
        self.endpoints.push(ep);
        Ok(())
    }

    fn register_common_info(
        &self,
        ep: &Endpoint,
        module: &str,
        info: &crate::types::UvcDeviceInfo,
        serial: &str,
    ) -> Result<()> {
        ep.register_info(CameraInfo::DeviceName, sku_name(self.pid))?;
        ep.register_info(CameraInfo::ModuleName, module)?;
        ep.register_info(CameraInfo::SerialNumber, serial)?;
        ep.register_info(CameraInfo::FirmwareVersion, self.fw.to_string())?;
        ep.register_info(CameraInfo::DeviceLocation, info.device_path.as_str())?;
        ep.register_info(CameraInfo::DebugOpCode, opcode::GLD.to_string())?;
        ep.register_info(CameraInfo::ProductId, format!("{:04X}", self.pid))?;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn product_id(&self) -> u16 {
        self.pid
    }

    pub fn firmware_version(&self) -> FirmwareVersion {
        self.fw
    }

    pub fn supports(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn is_camera_in_advanced_mode(&self) -> bool {
        self.advanced_mode
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn endpoint(&self, kind: SensorKind) -> Option<&Arc<Endpoint>> {
        self.endpoints.iter().find(|ep| ep.kind() == kind)
    }

    /// Software auto-exposure stepper of the fisheye imager, when wired.
    pub fn fisheye_auto_exposure(&self) -> Option<&Arc<AutoExposureMechanism>> {
        self.fisheye_mechanism.as_ref()
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    fn endpoint_at(&self, index: usize) -> Result<&Arc<Endpoint>> {
        self.endpoints
            .get(index)
            .ok_or_else(|| Error::invalid_value(format!("no endpoint at index {}", index)))
    }

    /// Resolves the camera model of one endpoint at a resolution.
    pub fn get_intrinsics(&self, index: usize, resolution: Resolution) -> Result<Intrinsics> {
        let ep = self.endpoint_at(index)?;
        match ep.kind() {
            SensorKind::Depth => self.coefficients.get()?.intrinsics(resolution),
            SensorKind::Fisheye => self
                .fisheye_intrinsics
                .as_ref()
                .ok_or_else(|| Error::not_implemented("no fisheye calibration"))?
                .get()?
                .intrinsics(resolution),
            kind => Err(Error::not_implemented(format!(
                "the {} publishes no intrinsics",
                kind
            ))),
        }
    }

    /// Pose of one endpoint relative to the depth imager.
    pub fn get_device_position(&self, index: usize) -> Result<Pose> {
        self.endpoint_at(index)?.pose()
    }

    /// Rigid transform from one stream's frame to another's.
    ///
    /// Within the stereo pair the transform is a pure baseline shift along
    /// x; across endpoints it composes the two poses.
    pub fn get_extrinsics(
        &self,
        from: usize,
        from_stream: StreamKind,
        to: usize,
        to_stream: StreamKind,
    ) -> Result<Extrinsics> {
        let from_ep = self.endpoint_at(from)?;
        let to_ep = self.endpoint_at(to)?;
        if from_ep.kind() == SensorKind::Depth
            && to_ep.kind() == SensorKind::Depth
            && STEREO_STREAMS.contains(&from_stream)
            && STEREO_STREAMS.contains(&to_stream)
        {
            let baseline_m = 0.001 * self.coefficients.get()?.baseline_mm;
            let tx = match (from_stream, to_stream) {
                (StreamKind::Infrared2, _) if to_stream != StreamKind::Infrared2 => baseline_m,
                (_, StreamKind::Infrared2) if from_stream != StreamKind::Infrared2 => -baseline_m,
                _ => 0.0,
            };
            return Ok(Extrinsics {
                rotation: Extrinsics::identity().rotation,
                translation: [tx, 0.0, 0.0],
            });
        }
        let from_pose = from_ep.pose()?;
        let to_pose = to_ep.pose()?;
        Ok(Extrinsics::from(to_pose.inverse().compose(&from_pose)))
    }

    /// Scale/bias model of one motion stream.
    pub fn get_motion_intrinsics(&self, stream: StreamKind) -> Result<MotionIntrinsics> {
        let imu = self
            .imu_calibration
            .as_ref()
            .ok_or_else(|| Error::not_implemented("this sku has no motion module"))?;
        let table = imu.get()?;
        match stream {
            StreamKind::Accel => Ok(table.accel_intrinsics),
            StreamKind::Gyro => Ok(table.gyro_intrinsics),
            other => Err(Error::invalid_value(format!(
                "{:?} is not a motion stream",
                other
            ))),
        }
    }

    // =========================================================================
    // Hardware monitor passthrough
    // =========================================================================

    /// Sends a pre-framed diagnostic request straight to the firmware.
    pub fn send_receive_raw_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.monitor.send_raw(data)
    }

    /// Resets the device; it drops off the bus and re-enumerates.
    pub fn hardware_reset(&self) -> Result<()> {
        self.monitor.hardware_reset()
    }
}

impl fmt::Debug for DepthCamera {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepthCamera")
            .field("pid", &format_args!("{:#06x}", self.pid))
            .field("fw", &self.fw)
            .field("features", &self.features)
            .field("advanced_mode", &self.advanced_mode)
            .field(
                "endpoints",
                &self.endpoints.iter().map(|ep| ep.kind()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Queries the asic for the advanced-mode flag.
fn query_advanced_mode(monitor: &HwMonitor) -> Result<bool> {
    let response = monitor.send(&Command::new(opcode::UAMG))?;
    match response.first() {
        Some(&flag) => Ok(flag != 0),
        None => Err(Error::validation("empty advanced-mode response")),
    }
}

// =============================================================================
// Calibration caches
// =============================================================================

fn coefficients_cache(monitor: Arc<HwMonitor>) -> Cached<CoefficientsTable> {
    Cached::new(move || {
        let raw = monitor.send(&Command::with_param(
            opcode::GETINTCAL,
            TableId::Coefficients as u32,
        ))?;
        CoefficientsTable::parse(&raw)
    })
}

fn fisheye_intrinsics_cache(monitor: Arc<HwMonitor>) -> Cached<FisheyeIntrinsicsTable> {
    Cached::new(move || {
        let raw = monitor.send(&Command::with_params(
            opcode::MMER,
            FISHEYE_INTRINSICS_OFFSET,
            FISHEYE_INTRINSICS_LEN,
        ))?;
        FisheyeIntrinsicsTable::parse(&raw)
    })
}

fn fisheye_extrinsics_cache(monitor: Arc<HwMonitor>) -> Cached<FisheyeExtrinsicsTable> {
    Cached::new(move || {
        let raw = monitor.send(&Command::new(opcode::GET_EXTRINSICS))?;
        FisheyeExtrinsicsTable::parse(&raw)
    })
}

fn imu_calibration_cache(monitor: Arc<HwMonitor>) -> Cached<ImuCalibrationTable> {
    let read_len = (TABLE_HEADER_SIZE + ImuCalibrationTable::PAYLOAD_SIZE) as u32;
    Cached::new(move || {
        let raw = monitor.send(&Command::with_params(
            opcode::MMER,
            IMU_TABLE_OFFSET,
            read_len,
        ))?;
        ImuCalibrationTable::parse(&raw)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_table_is_monotonic_in_firmware() {
        // Every feature enabled at some version stays enabled at any higher one.
        let versions = [
            FirmwareVersion::new(5, 5, 7, 0),
            FW_5_5_8_0,
            FW_5_6_0_0,
            FW_5_6_3_0,
            FirmwareVersion::new(6, 0, 0, 0),
        ];
        for pid in SUPPORTED_PIDS {
            let mut previous: Vec<Feature> = Vec::new();
            for fw in versions {
                let current = enabled_features(fw, *pid);
                for feature in &previous {
                    assert!(
                        current.contains(feature),
                        "{:?} lost at {} on {:04x}",
                        feature,
                        fw,
                        pid
                    );
                }
                previous = current;
            }
        }
    }

    #[test]
    fn test_gates_respect_pid_sets() {
        let fw = FirmwareVersion::new(5, 6, 3, 0);
        let motion = enabled_features(fw, pid::DC430_MM);
        assert!(motion.contains(&Feature::FisheyeAutoExposure));
        assert!(motion.contains(&Feature::MotionModuleTemperature));
        assert!(motion.contains(&Feature::DepthExposureControls));

        let plain = enabled_features(fw, pid::DC430);
        assert!(!plain.contains(&Feature::FisheyeAutoExposure));
        assert!(!plain.contains(&Feature::MotionModuleTemperature));
        assert!(plain.contains(&Feature::DepthExposureControls));
        assert!(!plain.contains(&Feature::AutoWhiteBalance));
        assert!(enabled_features(fw, pid::DC415).contains(&Feature::AutoWhiteBalance));
    }

    #[test]
    fn test_old_firmware_gets_nothing() {
        let fw = FirmwareVersion::new(5, 5, 7, 9);
        assert!(enabled_features(fw, pid::DC430_MM).is_empty());
    }

    #[test]
    fn test_midrange_firmware_gets_the_558_set_only() {
        let fw = FirmwareVersion::new(5, 6, 2, 0);
        let features = enabled_features(fw, pid::DC430);
        assert!(features.contains(&Feature::ErrorPolling));
        assert!(features.contains(&Feature::OutputTrigger));
        assert!(features.contains(&Feature::AsicTemperature));
        assert!(features.contains(&Feature::ProjectorTemperature));
        assert!(!features.contains(&Feature::DepthExposureControls));
        assert!(!features.contains(&Feature::CameraLockQuery));
    }

    #[test]
    fn test_sku_predicates() {
        assert!(is_motion_capable(pid::DC430_MM));
        assert!(is_motion_capable(pid::DC420_MM));
        assert!(!is_motion_capable(pid::DC430_MM_RGB));

        assert!(is_rgb_capable(pid::DC435_RGB));
        assert!(!is_rgb_capable(pid::DC430));

        assert!(has_emitter(pid::DC410));
        assert!(!has_emitter(pid::DC400));

        assert_eq!(sku_name(pid::DC415), "DC415");
        assert_eq!(sku_name(0xFFFF), "Unknown");
    }
}
