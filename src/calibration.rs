//! Calibration table parsing and the lazy calibration cache.
//!
//! Calibration blobs are fetched through the hardware monitor exactly once
//! per power-on session and memoized. Every checksummed record passes the
//! header guard before any field is interpreted; a guard failure is a hard
//! error and nothing is cached.

use byteorder::{ReadBytesExt, LE};
use std::io::{Cursor, Seek, SeekFrom};
use std::sync::Mutex;

use crate::error::{Error, Result};
use crate::types::{Extrinsics, Intrinsics, Resolution};

// =============================================================================
// Table identifiers and fixed addresses
// =============================================================================

/// Calibration table ids understood by the GETINTCAL opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableId {
    Coefficients = 25,
    DepthCalibration = 31,
    RgbCalibration = 32,
    FisheyeCalibration = 33,
    ImuCalibration = 34,
}

/// EEPROM address of the fisheye intrinsics record (MMER opcode).
pub const FISHEYE_INTRINSICS_OFFSET: u32 = 0x84;
/// EEPROM length of the fisheye intrinsics record.
pub const FISHEYE_INTRINSICS_LEN: u32 = 0x98;
/// EEPROM address of the IMU calibration table (MMER opcode).
pub const IMU_TABLE_OFFSET: u32 = 0x134;

/// Rectified depth resolutions indexed by the coefficients table.
pub const RECT_RESOLUTIONS: &[(u32, u32)] = &[
    (424, 240),
    (480, 270),
    (640, 360),
    (640, 400),
    (640, 480),
    (848, 480),
    (960, 540),
    (1280, 720),
    (1280, 800),
    (1920, 1080),
];

// =============================================================================
// Header guard
// =============================================================================

/// Size of the versioned table header.
pub const TABLE_HEADER_SIZE: usize = 16;

/// Highest table major version this core understands.
const MAX_SUPPORTED_TABLE_MAJOR: u8 = 2;

/// Versioned header opening every checksummed calibration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    pub version: u16,
    pub table_type: u16,
    pub table_size: u32,
    pub param: u32,
    pub crc32: u32,
}

/// CRC-32 (reflected, polynomial 0xEDB88320) as written by the firmware.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// Validates a raw table buffer and returns its parsed header.
///
/// Rejects buffers shorter than the declared payload, checksum mismatches
/// and unsupported major versions. Interpreting any field before this guard
/// passes is a contract violation.
pub fn check_table_header(raw: &[u8]) -> Result<TableHeader> {
    if raw.len() < TABLE_HEADER_SIZE {
        return Err(Error::validation(format!(
            "calibration buffer of {} bytes is shorter than the table header",
            raw.len()
        )));
    }
    let mut cursor = Cursor::new(raw);
    let header = TableHeader {
        version: cursor.read_u16::<LE>()?,
        table_type: cursor.read_u16::<LE>()?,
        table_size: cursor.read_u32::<LE>()?,
        param: cursor.read_u32::<LE>()?,
        crc32: cursor.read_u32::<LE>()?,
    };
    let payload_end = TABLE_HEADER_SIZE + header.table_size as usize;
    if raw.len() < payload_end {
        return Err(Error::validation(format!(
            "calibration table declares {} payload bytes but only {} are present",
            header.table_size,
            raw.len() - TABLE_HEADER_SIZE
        )));
    }
    let major = (header.version >> 8) as u8;
    if major > MAX_SUPPORTED_TABLE_MAJOR {
        return Err(Error::validation(format!(
            "calibration table major version {} is not supported",
            major
        )));
    }
    let computed = crc32(&raw[TABLE_HEADER_SIZE..payload_end]);
    if computed != header.crc32 {
        return Err(Error::validation(format!(
            "calibration table checksum mismatch: header {:#010x}, computed {:#010x}",
            header.crc32, computed
        )));
    }
    Ok(header)
}

// =============================================================================
// Parsing helpers
// =============================================================================

fn read_f32x3(cursor: &mut Cursor<&[u8]>) -> std::io::Result<[f32; 3]> {
    let mut out = [0.0f32; 3];
    for v in &mut out {
        *v = cursor.read_f32::<LE>()?;
    }
    Ok(out)
}

fn read_f32x9(cursor: &mut Cursor<&[u8]>) -> std::io::Result<[f32; 9]> {
    let mut out = [0.0f32; 9];
    for v in &mut out {
        *v = cursor.read_f32::<LE>()?;
    }
    Ok(out)
}

/// Reads a 3x3 matrix stored column-major and returns it row-major.
fn read_rotation_column_major(cursor: &mut Cursor<&[u8]>) -> std::io::Result<[f32; 9]> {
    let stored = read_f32x9(cursor)?;
    let mut row_major = [0.0f32; 9];
    for col in 0..3 {
        for row in 0..3 {
            row_major[row * 3 + col] = stored[col * 3 + row];
        }
    }
    Ok(row_major)
}

// =============================================================================
// Coefficients table (stereo module)
// =============================================================================

const COEFFICIENTS_BASELINE_OFFSET: u64 = 4 * 36;
const COEFFICIENTS_RECT_PARAMS_OFFSET: u64 = COEFFICIENTS_BASELINE_OFFSET + 4 + 4 + 88;

/// Stereo-module calibration: baseline and per-resolution rectified models.
#[derive(Debug, Clone, PartialEq)]
pub struct CoefficientsTable {
    pub header: TableHeader,
    /// Stereo baseline in millimeters.
    pub baseline_mm: f32,
    /// `[fx, fy, ppx, ppy]` per entry of [`RECT_RESOLUTIONS`].
    pub rect_params: Vec<[f32; 4]>,
}

impl CoefficientsTable {
    /// Declared payload size of a coefficients table.
    pub const PAYLOAD_SIZE: usize =
        COEFFICIENTS_RECT_PARAMS_OFFSET as usize + RECT_RESOLUTIONS.len() * 16 + 64;

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let header = check_table_header(raw)?;
        let payload = &raw[TABLE_HEADER_SIZE..];
        if payload.len() < Self::PAYLOAD_SIZE {
            return Err(Error::validation(format!(
                "coefficients table payload of {} bytes is shorter than {}",
                payload.len(),
                Self::PAYLOAD_SIZE
            )));
        }
        let mut cursor = Cursor::new(payload);
        cursor.seek(SeekFrom::Start(COEFFICIENTS_BASELINE_OFFSET))?;
        let baseline_mm = cursor.read_f32::<LE>()?;
        cursor.seek(SeekFrom::Start(COEFFICIENTS_RECT_PARAMS_OFFSET))?;
        let mut rect_params = Vec::with_capacity(RECT_RESOLUTIONS.len());
        for _ in 0..RECT_RESOLUTIONS.len() {
            let mut p = [0.0f32; 4];
            for v in &mut p {
                *v = cursor.read_f32::<LE>()?;
            }
            rect_params.push(p);
        }
        Ok(Self {
            header,
            baseline_mm,
            rect_params,
        })
    }

    /// Looks up the rectified model for a resolution.
    pub fn intrinsics(&self, resolution: Resolution) -> Result<Intrinsics> {
        let index = RECT_RESOLUTIONS
            .iter()
            .position(|&(w, h)| w == resolution.width && h == resolution.height)
            .ok_or_else(|| {
                Error::invalid_value(format!("{} is not a rectified depth resolution", resolution))
            })?;
        let p = self.rect_params[index];
        Ok(Intrinsics {
            width: resolution.width,
            height: resolution.height,
            fx: p[0],
            fy: p[1],
            ppx: p[2],
            ppy: p[3],
        })
    }
}

// =============================================================================
// Fisheye records
// =============================================================================

/// Checksummed fisheye intrinsics record read from motion-module EEPROM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FisheyeIntrinsicsTable {
    pub header: TableHeader,
    /// Row-major camera matrix.
    pub matrix: [f32; 9],
    pub width: u32,
    pub height: u32,
}

impl FisheyeIntrinsicsTable {
    /// Minimum payload size: 3x3 matrix plus the native resolution.
    pub const MIN_PAYLOAD_SIZE: usize = 36 + 8;

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let header = check_table_header(raw)?;
        let payload = &raw[TABLE_HEADER_SIZE..];
        if payload.len() < Self::MIN_PAYLOAD_SIZE {
            return Err(Error::validation(format!(
                "fisheye intrinsics payload of {} bytes is shorter than {}",
                payload.len(),
                Self::MIN_PAYLOAD_SIZE
            )));
        }
        let mut cursor = Cursor::new(payload);
        let matrix = read_f32x9(&mut cursor)?;
        let width = cursor.read_u32::<LE>()?;
        let height = cursor.read_u32::<LE>()?;
        Ok(Self {
            header,
            matrix,
            width,
            height,
        })
    }

    /// Resolves the camera model for a resolution.
    ///
    /// The record calibrates a single native resolution; any other request
    /// is rejected.
    pub fn intrinsics(&self, resolution: Resolution) -> Result<Intrinsics> {
        if resolution.width != self.width || resolution.height != self.height {
            return Err(Error::invalid_value(format!(
                "fisheye is calibrated at {}x{}, not {}",
                self.width, self.height, resolution
            )));
        }
        Ok(Intrinsics {
            width: self.width,
            height: self.height,
            fx: self.matrix[0],
            fy: self.matrix[4],
            ppx: self.matrix[2],
            ppy: self.matrix[5],
        })
    }
}

/// Checksummed fisheye-to-depth extrinsics record.
///
/// The rotation is stored column-major on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FisheyeExtrinsicsTable {
    pub header: TableHeader,
    pub extrinsics: Extrinsics,
}

impl FisheyeExtrinsicsTable {
    /// Payload size: rotation plus translation.
    pub const PAYLOAD_SIZE: usize = 36 + 12;

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let header = check_table_header(raw)?;
        let payload = &raw[TABLE_HEADER_SIZE..];
        if payload.len() < Self::PAYLOAD_SIZE {
            return Err(Error::validation(format!(
                "fisheye extrinsics payload of {} bytes is shorter than {}",
                payload.len(),
                Self::PAYLOAD_SIZE
            )));
        }
        let mut cursor = Cursor::new(payload);
        let rotation = read_rotation_column_major(&mut cursor)?;
        let translation = read_f32x3(&mut cursor)?;
        Ok(Self {
            header,
            extrinsics: Extrinsics {
                rotation,
                translation,
            },
        })
    }
}

// =============================================================================
// IMU calibration
// =============================================================================

/// Scale/bias model plus variances for one motion stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionIntrinsics {
    /// 3x4 row-major scale/cross-axis/bias matrix.
    pub data: [[f32; 4]; 3],
    pub noise_variances: [f32; 3],
    pub bias_variances: [f32; 3],
}

impl MotionIntrinsics {
    const SIZE: usize = 48 + 12 + 12;

    fn read(cursor: &mut Cursor<&[u8]>) -> std::io::Result<Self> {
        let mut data = [[0.0f32; 4]; 3];
        for row in &mut data {
            for v in row.iter_mut() {
                *v = cursor.read_f32::<LE>()?;
            }
        }
        Ok(Self {
            data,
            noise_variances: read_f32x3(cursor)?,
            bias_variances: read_f32x3(cursor)?,
        })
    }
}

/// Checksummed IMU calibration table read from motion-module EEPROM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuCalibrationTable {
    pub header: TableHeader,
    pub accel_intrinsics: MotionIntrinsics,
    pub gyro_intrinsics: MotionIntrinsics,
    /// IMU-to-fisheye transform; rotation stored column-major on the wire.
    pub imu_to_fisheye: Extrinsics,
}

impl ImuCalibrationTable {
    /// Declared payload size of the IMU calibration table.
    pub const PAYLOAD_SIZE: usize = 2 * MotionIntrinsics::SIZE + 36 + 12;

    pub fn parse(raw: &[u8]) -> Result<Self> {
        let header = check_table_header(raw)?;
        let payload = &raw[TABLE_HEADER_SIZE..];
        if payload.len() < Self::PAYLOAD_SIZE {
            return Err(Error::validation(format!(
                "IMU calibration payload of {} bytes is shorter than {}",
                payload.len(),
                Self::PAYLOAD_SIZE
            )));
        }
        let mut cursor = Cursor::new(payload);
        let accel_intrinsics = MotionIntrinsics::read(&mut cursor)?;
        let gyro_intrinsics = MotionIntrinsics::read(&mut cursor)?;
        let rotation = read_rotation_column_major(&mut cursor)?;
        let translation = read_f32x3(&mut cursor)?;
        Ok(Self {
            header,
            accel_intrinsics,
            gyro_intrinsics,
            imu_to_fisheye: Extrinsics {
                rotation,
                translation,
            },
        })
    }
}

// =============================================================================
// Memoizing accessor
// =============================================================================

/// A deferred, memoizing accessor for a calibration record.
///
/// The first `get` runs the fetch function and caches the value; later calls
/// return the cached copy without a hardware round trip. The slot lock is
/// held across the fetch, so concurrent first accesses resolve to exactly
/// one underlying fetch and identical cached content. A failed fetch caches
/// nothing and the next access retries.
pub struct Cached<T> {
    slot: Mutex<Option<T>>,
    fetch: Box<dyn Fn() -> Result<T> + Send + Sync>,
}

impl<T: Clone> Cached<T> {
    pub fn new<F>(fetch: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self {
            slot: Mutex::new(None),
            fetch: Box::new(fetch),
        }
    }

    /// Returns the cached value, fetching it on first access.
    pub fn get(&self) -> Result<T> {
        let mut slot = self
            .slot
            .lock()
            .map_err(|_| Error::transport("calibration cache lock poisoned"))?;
        if let Some(value) = slot.as_ref() {
            return Ok(value.clone());
        }
        let value = (self.fetch)()?;
        *slot = Some(value.clone());
        Ok(value)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use byteorder::{ByteOrder, LE as LEB};

    /// Builds a checksummed table around the given payload.
    pub fn build_table(version: u16, table_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut raw = vec![0u8; TABLE_HEADER_SIZE + payload.len()];
        LEB::write_u16(&mut raw[0..2], version);
        LEB::write_u16(&mut raw[2..4], table_type);
        LEB::write_u32(&mut raw[4..8], payload.len() as u32);
        LEB::write_u32(&mut raw[12..16], crc32(payload));
        raw[TABLE_HEADER_SIZE..].copy_from_slice(payload);
        raw
    }

    /// Builds a coefficients table with the given baseline and a recognizable
    /// rectified model per resolution.
    pub fn build_coefficients_table(baseline_mm: f32) -> Vec<u8> {
        let mut payload = vec![0u8; CoefficientsTable::PAYLOAD_SIZE];
        LEB::write_f32(
            &mut payload[COEFFICIENTS_BASELINE_OFFSET as usize..],
            baseline_mm,
        );
        for (i, _) in RECT_RESOLUTIONS.iter().enumerate() {
            let base = COEFFICIENTS_RECT_PARAMS_OFFSET as usize + i * 16;
            LEB::write_f32(&mut payload[base..], 100.0 + i as f32); // fx
            LEB::write_f32(&mut payload[base + 4..], 200.0 + i as f32); // fy
            LEB::write_f32(&mut payload[base + 8..], 300.0 + i as f32); // ppx
            LEB::write_f32(&mut payload[base + 12..], 400.0 + i as f32); // ppy
        }
        build_table(0x0102, TableId::Coefficients as u16, &payload)
    }

    /// Builds an IMU calibration table with a column-major identity
    /// imu-to-fisheye rotation and the given translation.
    pub fn build_imu_table(translation: [f32; 3]) -> Vec<u8> {
        let mut payload = vec![0u8; ImuCalibrationTable::PAYLOAD_SIZE];
        let rot_base = 2 * MotionIntrinsics::SIZE;
        for col in 0..3 {
            for row in 0..3 {
                let v = if row == col { 1.0 } else { 0.0 };
                LEB::write_f32(&mut payload[rot_base + (col * 3 + row) * 4..], v);
            }
        }
        for (i, t) in translation.iter().enumerate() {
            LEB::write_f32(&mut payload[rot_base + 36 + i * 4..], *t);
        }
        build_table(0x0102, TableId::ImuCalibration as u16, &payload)
    }

    /// Builds a fisheye extrinsics table with a column-major rotation.
    pub fn build_fisheye_extrinsics(rotation_col_major: [f32; 9], translation: [f32; 3]) -> Vec<u8> {
        let mut payload = vec![0u8; FisheyeExtrinsicsTable::PAYLOAD_SIZE];
        for (i, v) in rotation_col_major.iter().enumerate() {
            LEB::write_f32(&mut payload[i * 4..], *v);
        }
        for (i, v) in translation.iter().enumerate() {
            LEB::write_f32(&mut payload[36 + i * 4..], *v);
        }
        build_table(0x0102, 0, &payload)
    }

    /// Builds a checksummed fisheye intrinsics EEPROM record.
    pub fn build_fisheye_intrinsics(fx: f32, fy: f32, ppx: f32, ppy: f32) -> Vec<u8> {
        let mut payload = vec![0u8; FisheyeIntrinsicsTable::MIN_PAYLOAD_SIZE];
        let matrix = [fx, 0.0, ppx, 0.0, fy, ppy, 0.0, 0.0, 1.0];
        for (i, v) in matrix.iter().enumerate() {
            LEB::write_f32(&mut payload[i * 4..], *v);
        }
        LEB::write_u32(&mut payload[36..], 640);
        LEB::write_u32(&mut payload[40..], 480);
        build_table(0x0102, TableId::FisheyeCalibration as u16, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_crc32_matches_known_vector() {
        // Standard check value for "123456789".
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_header_guard_accepts_valid_table() {
        let raw = build_table(0x0102, 7, &[1, 2, 3, 4]);
        let header = check_table_header(&raw).unwrap();
        assert_eq!(header.table_type, 7);
        assert_eq!(header.table_size, 4);
    }

    #[test]
    fn test_header_guard_rejects_corrupted_payload() {
        let mut raw = build_table(0x0102, 7, &[1, 2, 3, 4]);
        raw[TABLE_HEADER_SIZE] ^= 0xFF;
        assert!(check_table_header(&raw).unwrap_err().is_validation());
    }

    #[test]
    fn test_header_guard_rejects_short_buffer() {
        let raw = build_table(0x0102, 7, &[1, 2, 3, 4]);
        assert!(check_table_header(&raw[..raw.len() - 1])
            .unwrap_err()
            .is_validation());
        assert!(check_table_header(&raw[..8]).unwrap_err().is_validation());
    }

    #[test]
    fn test_header_guard_rejects_unsupported_major_version() {
        let raw = build_table(0x0300, 7, &[1, 2, 3, 4]);
        assert!(check_table_header(&raw).unwrap_err().is_validation());
    }

    #[test]
    fn test_coefficients_table_resolves_intrinsics_by_resolution() {
        let raw = build_coefficients_table(55.0);
        let table = CoefficientsTable::parse(&raw).unwrap();
        assert!((table.baseline_mm - 55.0).abs() < f32::EPSILON);

        let intr = table.intrinsics(Resolution::new(640, 480)).unwrap();
        let index = RECT_RESOLUTIONS
            .iter()
            .position(|&(w, h)| (w, h) == (640, 480))
            .unwrap() as f32;
        assert_eq!(intr.fx, 100.0 + index);
        assert_eq!(intr.ppy, 400.0 + index);
        assert_eq!(intr.width, 640);
        assert_eq!(intr.height, 480);
    }

    #[test]
    fn test_coefficients_table_rejects_unlisted_resolution() {
        let raw = build_coefficients_table(55.0);
        let table = CoefficientsTable::parse(&raw).unwrap();
        assert!(table
            .intrinsics(Resolution::new(123, 45))
            .unwrap_err()
            .is_invalid_value());
    }

    #[test]
    fn test_fisheye_extrinsics_converts_column_major_rotation() {
        // Column-major storage of the row-major matrix [[0,-1,0],[1,0,0],[0,0,1]]:
        // columns are (0,1,0), (-1,0,0), (0,0,1).
        let raw = build_fisheye_extrinsics(
            [0.0, 1.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            [0.1, 0.2, 0.3],
        );
        let table = FisheyeExtrinsicsTable::parse(&raw).unwrap();
        assert_eq!(
            table.extrinsics.rotation,
            [0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0]
        );
        assert_eq!(table.extrinsics.translation, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_imu_table_parses_identity_rotation() {
        let raw = build_imu_table([0.01, 0.02, 0.03]);
        let table = ImuCalibrationTable::parse(&raw).unwrap();
        assert_eq!(table.imu_to_fisheye.rotation, Extrinsics::identity().rotation);
        assert_eq!(table.imu_to_fisheye.translation, [0.01, 0.02, 0.03]);
    }

    #[test]
    fn test_fisheye_intrinsics_native_resolution_only() {
        let raw = build_fisheye_intrinsics(260.0, 260.0, 320.0, 240.0);
        let table = FisheyeIntrinsicsTable::parse(&raw).unwrap();
        let intr = table.intrinsics(Resolution::new(640, 480)).unwrap();
        assert_eq!(intr.fx, 260.0);
        assert_eq!(intr.ppx, 320.0);
        assert!(table
            .intrinsics(Resolution::new(320, 240))
            .unwrap_err()
            .is_invalid_value());
    }

    #[test]
    fn test_fisheye_intrinsics_pass_the_header_guard() {
        // Garbage straight from EEPROM never reaches the matrix fields.
        let garbage = [0xFFu8; 44];
        assert!(FisheyeIntrinsicsTable::parse(&garbage)
            .unwrap_err()
            .is_validation());

        let mut raw = build_fisheye_intrinsics(260.0, 260.0, 320.0, 240.0);
        raw[TABLE_HEADER_SIZE] ^= 0xFF;
        assert!(FisheyeIntrinsicsTable::parse(&raw)
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_cached_fetches_once_under_concurrent_first_access() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_fetch = Arc::clone(&calls);
        let cached = Arc::new(Cached::new(move || {
            calls_for_fetch.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(10));
            Ok(42u32)
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cached = Arc::clone(&cached);
            handles.push(std::thread::spawn(move || cached.get().unwrap()));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cached_does_not_cache_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_fetch = Arc::clone(&calls);
        let cached: Cached<u32> = Cached::new(move || {
            let n = calls_for_fetch.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(Error::transport("first fetch fails"))
            } else {
                Ok(7)
            }
        });
        assert!(cached.get().is_err());
        assert_eq!(cached.get().unwrap(), 7);
        assert_eq!(cached.get().unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
