//! End-to-end composition against an in-process firmware mock.
//!
//! The mock backend answers the hardware-monitor wire protocol (GVD, UAMG,
//! GETINTCAL, MMER, GET_EXTRINSICS, AEROI) and serves in-memory UVC/HID
//! handles, so a full `DepthCamera` can be composed and exercised without
//! hardware.

use byteorder::{ByteOrder, LE};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use depth_cam::calibration::{crc32, TableId, TABLE_HEADER_SIZE};
use depth_cam::device::{pid, DepthCamera, CAMERA_VID};
use depth_cam::discovery::DeviceGroup;
use depth_cam::error::Result;
use depth_cam::hwmon::opcode;
use depth_cam::transport::{
    Backend, CommandTransfer, ExtensionUnit, HidDevice, TimeService, UvcDevice,
};
use depth_cam::types::{
    CameraInfo, HidDeviceInfo, OptionCode, PixelFormat, RegionOfInterest, Resolution, SensorKind,
    StreamKind, UsbDeviceInfo, UvcDeviceInfo,
};

// =============================================================================
// Calibration blob builders
// =============================================================================

fn build_table(table_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut raw = vec![0u8; TABLE_HEADER_SIZE + payload.len()];
    LE::write_u16(&mut raw[0..2], 0x0102);
    LE::write_u16(&mut raw[2..4], table_type);
    LE::write_u32(&mut raw[4..8], payload.len() as u32);
    LE::write_u32(&mut raw[12..16], crc32(payload));
    raw[TABLE_HEADER_SIZE..].copy_from_slice(payload);
    raw
}

const BASELINE_MM: f32 = 55.0;
const RECT_RESOLUTION_COUNT: usize = 10;
const COEFF_BASELINE_OFFSET: usize = 4 * 36;
const COEFF_RECT_PARAMS_OFFSET: usize = COEFF_BASELINE_OFFSET + 4 + 4 + 88;
const COEFF_PAYLOAD_SIZE: usize = COEFF_RECT_PARAMS_OFFSET + RECT_RESOLUTION_COUNT * 16 + 64;

fn coefficients_table() -> Vec<u8> {
    let mut payload = vec![0u8; COEFF_PAYLOAD_SIZE];
    LE::write_f32(&mut payload[COEFF_BASELINE_OFFSET..], BASELINE_MM);
    for i in 0..RECT_RESOLUTION_COUNT {
        let base = COEFF_RECT_PARAMS_OFFSET + i * 16;
        LE::write_f32(&mut payload[base..], 100.0 + i as f32);
        LE::write_f32(&mut payload[base + 4..], 200.0 + i as f32);
        LE::write_f32(&mut payload[base + 8..], 300.0 + i as f32);
        LE::write_f32(&mut payload[base + 12..], 400.0 + i as f32);
    }
    build_table(TableId::Coefficients as u16, &payload)
}

fn fisheye_intrinsics_record() -> Vec<u8> {
    let mut payload = vec![0u8; 44];
    let matrix = [260.0f32, 0.0, 320.0, 0.0, 260.0, 240.0, 0.0, 0.0, 1.0];
    for (i, v) in matrix.iter().enumerate() {
        LE::write_f32(&mut payload[i * 4..], *v);
    }
    LE::write_u32(&mut payload[36..], 640);
    LE::write_u32(&mut payload[40..], 480);
    build_table(TableId::FisheyeCalibration as u16, &payload)
}

fn fisheye_extrinsics_table(translation: [f32; 3]) -> Vec<u8> {
    // Identity rotation is the same in either storage order.
    let mut payload = vec![0u8; 48];
    for i in 0..3 {
        LE::write_f32(&mut payload[(i * 3 + i) * 4..], 1.0);
        LE::write_f32(&mut payload[36 + i * 4..], translation[i]);
    }
    build_table(0, &payload)
}

const MOTION_INTRINSICS_SIZE: usize = 72;
const IMU_PAYLOAD_SIZE: usize = 2 * MOTION_INTRINSICS_SIZE + 48;

fn imu_table(imu_to_fisheye_translation: [f32; 3]) -> Vec<u8> {
    let mut payload = vec![0u8; IMU_PAYLOAD_SIZE];
    // Recognizable accel scale matrix diagonal.
    for i in 0..3 {
        LE::write_f32(&mut payload[(i * 4 + i) * 4..], 0.98);
    }
    let rot_base = 2 * MOTION_INTRINSICS_SIZE;
    for i in 0..3 {
        LE::write_f32(&mut payload[rot_base + (i * 3 + i) * 4..], 1.0);
        LE::write_f32(
            &mut payload[rot_base + 36 + i * 4..],
            imu_to_fisheye_translation[i],
        );
    }
    build_table(TableId::ImuCalibration as u16, &payload)
}

// =============================================================================
// Firmware mock
// =============================================================================

struct MockFirmware {
    gvd: Vec<u8>,
    advanced: bool,
    roi: Mutex<[u16; 4]>,
}

impl MockFirmware {
    fn new(fw: [u8; 4], advanced: bool) -> Arc<Self> {
        let mut gvd = vec![0u8; 256];
        // Version bytes are stored most-significant-last.
        gvd[12..16].copy_from_slice(&[fw[3], fw[2], fw[1], fw[0]]);
        gvd[25] = 1; // locked
        gvd[48..54].copy_from_slice(&[0x01, 0xAB, 0x02, 0xCD, 0x03, 0xEF]);
        gvd[212..216].copy_from_slice(&[0, 0, 5, 4]); // motion module fw 4.5.0.0
        Arc::new(Self {
            gvd,
            advanced,
            roi: Mutex::new([0; 4]),
        })
    }

    fn respond(&self, request: &[u8]) -> Vec<u8> {
        let op = LE::read_u32(&request[4..8]);
        let param = |i: usize| LE::read_u32(&request[8 + i * 4..12 + i * 4]);
        let mut out = op.to_le_bytes().to_vec();
        match op {
            opcode::GVD => out.extend_from_slice(&self.gvd),
            opcode::UAMG => out.push(u8::from(self.advanced)),
            opcode::GETINTCAL if param(0) == TableId::Coefficients as u32 => {
                out.extend_from_slice(&coefficients_table())
            }
            opcode::MMER if param(0) == 0x84 => out.extend_from_slice(&fisheye_intrinsics_record()),
            opcode::MMER if param(0) == 0x134 => {
                out.extend_from_slice(&imu_table([0.01, 0.02, 0.03]))
            }
            opcode::GET_EXTRINSICS => {
                out.extend_from_slice(&fisheye_extrinsics_table([0.064, 0.0, 0.0]))
            }
            opcode::SETAEROI => {
                *self.roi.lock().unwrap() = [
                    param(0) as u16, // min_y
                    param(1) as u16, // max_y
                    param(2) as u16, // min_x
                    param(3) as u16, // max_x
                ];
            }
            opcode::GETAEROI => {
                for word in *self.roi.lock().unwrap() {
                    out.extend_from_slice(&word.to_le_bytes());
                }
            }
            _ => {}
        }
        out
    }
}

struct FirmwareChannel(Arc<MockFirmware>);

impl CommandTransfer for FirmwareChannel {
    fn send_receive(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.0.respond(data))
    }
}

// =============================================================================
// Device-handle mocks
// =============================================================================

struct FakeUvc {
    xu_regs: Mutex<HashMap<u8, Vec<u8>>>,
    pu_regs: Mutex<HashMap<u32, i32>>,
}

impl FakeUvc {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            xu_regs: Mutex::new(HashMap::new()),
            pu_regs: Mutex::new(HashMap::new()),
        })
    }
}

impl UvcDevice for FakeUvc {
    fn claim_xu(&self, _xu: &ExtensionUnit) -> Result<()> {
        Ok(())
    }
    fn set_xu(&self, _xu: &ExtensionUnit, ctrl: u8, data: &[u8]) -> Result<()> {
        self.xu_regs.lock().unwrap().insert(ctrl, data.to_vec());
        Ok(())
    }
    fn get_xu(&self, _xu: &ExtensionUnit, ctrl: u8, len: usize) -> Result<Vec<u8>> {
        let mut out = self
            .xu_regs
            .lock()
            .unwrap()
            .get(&ctrl)
            .cloned()
            .unwrap_or_default();
        out.resize(len, 0);
        Ok(out)
    }
    fn set_pu(&self, ctrl: u32, value: i32) -> Result<()> {
        self.pu_regs.lock().unwrap().insert(ctrl, value);
        Ok(())
    }
    fn get_pu(&self, ctrl: u32) -> Result<i32> {
        Ok(*self.pu_regs.lock().unwrap().get(&ctrl).unwrap_or(&0))
    }
    fn get_pu_range(&self, _ctrl: u32) -> Result<(i32, i32, i32, i32)> {
        Ok((0, 16_000, 1, 50))
    }
}

struct FakeHid;

impl HidDevice for FakeHid {
    fn sensors(&self) -> Vec<String> {
        vec!["gyro_3d".into(), "accel_3d".into(), "custom".into()]
    }
    fn get_custom_report(&self, _sensor: &str, _field: &str) -> Result<Vec<u8>> {
        Ok(35i32.to_le_bytes().to_vec())
    }
}

struct FakeClock;

impl TimeService for FakeClock {
    fn monotonic_millis(&self) -> f64 {
        0.0
    }
}

struct MockBackend {
    firmware: Arc<MockFirmware>,
}

impl Backend for MockBackend {
    fn create_uvc_device(&self, _info: &UvcDeviceInfo) -> Result<Arc<dyn UvcDevice>> {
        Ok(FakeUvc::new())
    }
    fn create_usb_device(&self, _info: &UsbDeviceInfo) -> Result<Box<dyn CommandTransfer>> {
        Ok(Box::new(FirmwareChannel(self.firmware.clone())))
    }
    fn create_hid_device(&self, _info: &HidDeviceInfo) -> Result<Arc<dyn HidDevice>> {
        Ok(Arc::new(FakeHid))
    }
    fn create_time_service(&self) -> Arc<dyn TimeService> {
        Arc::new(FakeClock)
    }
}

// =============================================================================
// Group builders
// =============================================================================

fn uvc(product: u16, mi: u16) -> UvcDeviceInfo {
    UvcDeviceInfo {
        vid: CAMERA_VID,
        pid: product,
        unique_id: "unit-1".into(),
        mi,
        device_path: format!("/dev/video{}", mi),
    }
}

fn group_for(product: u16, interfaces: &[u16], with_hid: bool) -> DeviceGroup {
    DeviceGroup {
        uvc_devices: interfaces.iter().map(|&mi| uvc(product, mi)).collect(),
        usb_device: Some(UsbDeviceInfo {
            vid: CAMERA_VID,
            pid: product,
            unique_id: "unit-1".into(),
            device_path: "/dev/usb0".into(),
        }),
        hid_devices: if with_hid {
            vec![HidDeviceInfo {
                vid: CAMERA_VID,
                pid: product,
                unique_id: "unit-1".into(),
                device_path: "/dev/hid0".into(),
            }]
        } else {
            Vec::new()
        },
    }
}

fn compose(product: u16, interfaces: &[u16], with_hid: bool, fw: [u8; 4]) -> Result<DepthCamera> {
    let backend = MockBackend {
        firmware: MockFirmware::new(fw, false),
    };
    DepthCamera::new(&backend, &group_for(product, interfaces, with_hid))
}

const FW_NEW: [u8; 4] = [5, 6, 3, 0];
const FW_OLD: [u8; 4] = [5, 5, 7, 0];

// =============================================================================
// Tests
// =============================================================================

#[test]
fn plain_depth_sku_composes_one_endpoint() {
    let camera = compose(pid::DC430, &[0], false, FW_NEW).unwrap();
    assert_eq!(camera.endpoints().len(), 1);
    let depth = camera.endpoint(SensorKind::Depth).unwrap();

    assert!(depth.supports_pixel_format(PixelFormat::Z16));
    assert!(depth.supports_pixel_format(PixelFormat::Y8));
    assert!(depth.supports_pixel_format(PixelFormat::Yuyv));
    assert!(depth.supports_pixel_format(PixelFormat::Uyvy));
    assert!(depth.supports_pixel_format(PixelFormat::Rgb8));
    // Not in advanced mode, so no interleaved formats.
    assert!(!depth.supports_pixel_format(PixelFormat::Y8I));
    assert!(!camera.is_camera_in_advanced_mode());

    for code in [
        OptionCode::Gain,
        OptionCode::Exposure,
        OptionCode::EnableAutoExposure,
        OptionCode::EmitterEnabled,
        OptionCode::LaserPower,
        OptionCode::DepthUnits,
        OptionCode::ErrorPollingEnabled,
        OptionCode::OutputTriggerEnabled,
        OptionCode::AsicTemperature,
        OptionCode::ProjectorTemperature,
    ] {
        assert!(depth.supports_option(code), "missing {:?}", code);
    }
    // DC430 is not in the auto-white-balance subset.
    assert!(!depth.supports_option(OptionCode::EnableAutoWhiteBalance));
}

#[test]
fn identity_info_records_come_from_the_gvd_block() {
    let camera = compose(pid::DC430, &[0], false, FW_NEW).unwrap();
    let depth = camera.endpoint(SensorKind::Depth).unwrap();
    assert_eq!(depth.info(CameraInfo::FirmwareVersion).unwrap(), "5.6.3.0");
    assert_eq!(depth.info(CameraInfo::SerialNumber).unwrap(), "01AB02CD03EF");
    assert_eq!(depth.info(CameraInfo::CameraLocked).unwrap(), "YES");
    assert_eq!(depth.info(CameraInfo::AdvancedMode).unwrap(), "NO");
    assert_eq!(depth.info(CameraInfo::ProductId).unwrap(), "0AD4");
    assert_eq!(depth.info(CameraInfo::DeviceName).unwrap(), "DC430");
}

#[test]
fn old_firmware_composes_without_gated_controls() {
    let camera = compose(pid::DC430, &[0], false, FW_OLD).unwrap();
    let depth = camera.endpoint(SensorKind::Depth).unwrap();
    // Gain survives ungated; the exposure group and the 5.5.8 set do not.
    assert!(depth.supports_option(OptionCode::Gain));
    assert!(!depth.supports_option(OptionCode::Exposure));
    assert!(!depth.supports_option(OptionCode::EnableAutoExposure));
    assert!(!depth.supports_option(OptionCode::ErrorPollingEnabled));
    assert!(!depth.supports_option(OptionCode::AsicTemperature));
    // The lock query is gated too, so the record is absent.
    assert!(!depth.supports_info(CameraInfo::CameraLocked));
}

#[test]
fn error_polling_is_live_after_composition() {
    let camera = compose(pid::DC430, &[0], false, FW_NEW).unwrap();
    let depth = camera.endpoint(SensorKind::Depth).unwrap();
    let polling = depth.get_option(OptionCode::ErrorPollingEnabled).unwrap();
    assert_eq!(polling.get().unwrap(), 1.0);
    assert_eq!(polling.range().unwrap().default, 1.0);

    // The toggle can still switch it off.
    polling.set(0.0).unwrap();
    assert_eq!(polling.get().unwrap(), 0.0);
}

#[test]
fn motion_sku_without_fisheye_interface_fails_composition() {
    let err = compose(pid::DC430_MM, &[0], true, FW_NEW).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn motion_sku_without_hid_fails_composition() {
    let err = compose(pid::DC430_MM, &[0, 3], false, FW_NEW).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn motion_sku_composes_depth_fisheye_and_motion() {
    let camera = compose(pid::DC430_MM, &[0, 3], true, FW_NEW).unwrap();
    assert_eq!(camera.endpoints().len(), 3);

    let fisheye = camera.endpoint(SensorKind::Fisheye).unwrap();
    assert!(fisheye.supports_pixel_format(PixelFormat::Raw8));
    assert!(fisheye.supports_option(OptionCode::EnableAutoExposure));
    assert!(fisheye.supports_option(OptionCode::AutoExposureMode));
    assert!(fisheye.supports_option(OptionCode::AutoExposureAntiflickerRate));
    assert!(camera.fisheye_auto_exposure().is_some());

    let motion = camera.endpoint(SensorKind::Motion).unwrap();
    assert!(motion.supports_pixel_format(PixelFormat::AccelXyz32F));
    assert!(motion.supports_pixel_format(PixelFormat::GyroXyz32F));
    assert!(motion.supports_pixel_format(PixelFormat::GpioRaw));
    assert!(motion.supports_option(OptionCode::MotionModuleTemperature));
    assert!(motion.supports_option(OptionCode::EnableMotionCorrection));
    assert!(motion
        .info(CameraInfo::MotionModuleFirmwareVersion)
        .unwrap_err()
        .is_not_implemented());
    // The motion-module firmware record lives on the depth endpoint.
    let depth = camera.endpoint(SensorKind::Depth).unwrap();
    assert_eq!(
        depth.info(CameraInfo::MotionModuleFirmwareVersion).unwrap(),
        "4.5.0.0"
    );
}

#[test]
fn manual_writes_are_rejected_while_auto_exposure_is_on() {
    let camera = compose(pid::DC430_MM, &[0, 3], true, FW_NEW).unwrap();
    let fisheye = camera.endpoint(SensorKind::Fisheye).unwrap();
    let enable = fisheye.get_option(OptionCode::EnableAutoExposure).unwrap();
    let exposure = fisheye.get_option(OptionCode::Exposure).unwrap();

    // Auto is on by default.
    assert_eq!(enable.get().unwrap(), 1.0);
    assert!(exposure.set(100.0).unwrap_err().is_invalid_value());

    enable.set(0.0).unwrap();
    exposure.set(100.0).unwrap();
    assert_eq!(exposure.get().unwrap(), 100.0);
}

#[test]
fn depth_roi_round_trips_through_the_hardware_monitor() {
    let camera = compose(pid::DC430, &[0], false, FW_NEW).unwrap();
    let depth = camera.endpoint(SensorKind::Depth).unwrap();
    let roi = RegionOfInterest::new(10, 200, 20, 100);
    depth.set_roi(&roi).unwrap();
    assert_eq!(depth.roi().unwrap(), roi);
}

#[test]
fn depth_intrinsics_resolve_from_the_coefficients_table() {
    let camera = compose(pid::DC430, &[0], false, FW_NEW).unwrap();
    // 848x480 is the sixth entry of the rectified resolution list.
    let intr = camera.get_intrinsics(0, Resolution::new(848, 480)).unwrap();
    assert_eq!(intr.fx, 105.0);
    assert_eq!(intr.ppy, 405.0);
    assert!(camera
        .get_intrinsics(0, Resolution::new(100, 100))
        .unwrap_err()
        .is_invalid_value());
}

#[test]
fn fisheye_intrinsics_resolve_at_native_resolution_only() {
    let camera = compose(pid::DC430_MM, &[0, 3], true, FW_NEW).unwrap();
    let fisheye_index = camera
        .endpoints()
        .iter()
        .position(|ep| ep.kind() == SensorKind::Fisheye)
        .unwrap();
    let intr = camera
        .get_intrinsics(fisheye_index, Resolution::new(640, 480))
        .unwrap();
    assert_eq!(intr.fx, 260.0);
    assert!(camera
        .get_intrinsics(fisheye_index, Resolution::new(320, 240))
        .unwrap_err()
        .is_invalid_value());
}

#[test]
fn stereo_extrinsics_are_a_baseline_shift() {
    let camera = compose(pid::DC430, &[0], false, FW_NEW).unwrap();
    let to_right = camera
        .get_extrinsics(0, StreamKind::Depth, 0, StreamKind::Infrared2)
        .unwrap();
    assert_eq!(to_right.rotation, depth_cam::Extrinsics::identity().rotation);
    assert!((to_right.translation[0] + 0.001 * BASELINE_MM).abs() < 1e-6);

    let from_right = camera
        .get_extrinsics(0, StreamKind::Infrared2, 0, StreamKind::Depth)
        .unwrap();
    assert!((from_right.translation[0] - 0.001 * BASELINE_MM).abs() < 1e-6);

    let same = camera
        .get_extrinsics(0, StreamKind::Depth, 0, StreamKind::Infrared)
        .unwrap();
    assert_eq!(same.translation, [0.0, 0.0, 0.0]);
}

#[test]
fn sensor_poses_compose_fisheye_and_imu_calibration() {
    let camera = compose(pid::DC430_MM, &[0, 3], true, FW_NEW).unwrap();
    let positions: HashMap<SensorKind, usize> = camera
        .endpoints()
        .iter()
        .enumerate()
        .map(|(i, ep)| (ep.kind(), i))
        .collect();

    // Depth is the reference frame.
    let depth_pose = camera.get_device_position(positions[&SensorKind::Depth]).unwrap();
    assert_eq!(depth_pose, depth_cam::Pose::identity());

    // Fisheye extrinsics translate by 64 mm on x; the pose is the inverse.
    let fe_pose = camera
        .get_device_position(positions[&SensorKind::Fisheye])
        .unwrap();
    assert!((fe_pose.position[0] + 0.064).abs() < 1e-6);

    // Motion pose chains the imu-to-fisheye transform onto the fisheye pose.
    let motion_pose = camera
        .get_device_position(positions[&SensorKind::Motion])
        .unwrap();
    assert!((motion_pose.position[0] - (-0.064 + 0.01)).abs() < 1e-6);
    assert!((motion_pose.position[1] - 0.02).abs() < 1e-6);
    assert!((motion_pose.position[2] - 0.03).abs() < 1e-6);
}

#[test]
fn motion_intrinsics_expose_the_imu_table() {
    let camera = compose(pid::DC430_MM, &[0, 3], true, FW_NEW).unwrap();
    let accel = camera.get_motion_intrinsics(StreamKind::Accel).unwrap();
    assert!((accel.data[0][0] - 0.98).abs() < 1e-6);
    assert!((accel.data[1][1] - 0.98).abs() < 1e-6);
    assert!(camera
        .get_motion_intrinsics(StreamKind::Depth)
        .unwrap_err()
        .is_invalid_value());

    let plain = compose(pid::DC430, &[0], false, FW_NEW).unwrap();
    assert!(plain
        .get_motion_intrinsics(StreamKind::Accel)
        .unwrap_err()
        .is_not_implemented());
}

#[test]
fn motion_module_temperature_reads_the_hid_report() {
    let camera = compose(pid::DC430_MM, &[0, 3], true, FW_NEW).unwrap();
    let motion = camera.endpoint(SensorKind::Motion).unwrap();
    let temp = motion
        .get_option(OptionCode::MotionModuleTemperature)
        .unwrap();
    assert_eq!(temp.get().unwrap(), 35.0);
    assert!(temp.set(10.0).unwrap_err().is_not_implemented());
}

#[test]
fn rgb_sku_composes_a_color_endpoint() {
    let camera = compose(pid::DC435_RGB, &[0, 2], false, FW_NEW).unwrap();
    assert_eq!(camera.endpoints().len(), 2);
    let color = camera.endpoint(SensorKind::Color).unwrap();
    assert!(color.supports_pixel_format(PixelFormat::Yuyv));
    assert!(color.supports_option(OptionCode::WhiteBalance));
    assert!(color.supports_option(OptionCode::EnableAutoWhiteBalance));
    assert!(color.supports_option(OptionCode::Brightness));
    // Color publishes no pose.
    assert!(color.pose().unwrap_err().is_not_implemented());

    // Missing the color interface is fatal for an RGB sku.
    let err = compose(pid::DC435_RGB, &[0], false, FW_NEW).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn raw_passthrough_reaches_the_firmware() {
    let camera = compose(pid::DC430, &[0], false, FW_NEW).unwrap();
    // Hand-framed GVD request.
    let mut request = vec![0u8; 24];
    LE::write_u16(&mut request[0..2], 22);
    LE::write_u16(&mut request[2..4], 0xCDAB);
    LE::write_u32(&mut request[4..8], opcode::GVD);
    let response = camera.send_receive_raw_data(&request).unwrap();
    // Unvalidated: the opcode echo is still in front.
    assert_eq!(LE::read_u32(&response[0..4]), opcode::GVD);
    assert_eq!(response.len(), 4 + 256);
}
