//! Logical sensor endpoints.
//!
//! An [`Endpoint`] is one logical sensor of a composed camera: its control
//! registry, pixel formats, metadata parsers, device-info records, deferred
//! pose and notification sink. Endpoints are assembled once at composition
//! and queried afterwards; registration is not exposed past construction by
//! convention, not by type.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::auto_exposure::RoiMethod;
use crate::calibration::Cached;
use crate::controls::Control;
use crate::error::{Error, Result};
use crate::metadata::{AttributeParser, MetadataField};
use crate::polling::NotificationSink;
use crate::transport::ExtensionUnit;
use crate::types::{CameraInfo, Notification, OptionCode, PixelFormat, Pose, RegionOfInterest, SensorKind};

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| Error::transport(format!("{} lock poisoned", what)))
}

pub struct Endpoint {
    kind: SensorKind,
    options: Mutex<HashMap<OptionCode, Arc<dyn Control>>>,
    formats: Mutex<Vec<PixelFormat>>,
    metadata: Mutex<HashMap<MetadataField, AttributeParser>>,
    extension_units: Mutex<Vec<ExtensionUnit>>,
    info: Mutex<BTreeMap<CameraInfo, String>>,
    pose: Mutex<Option<Cached<Pose>>>,
    sink: Mutex<Option<NotificationSink>>,
    roi_method: Mutex<Option<Box<dyn RoiMethod>>>,
    /// Held by the streaming path; shared with the command channel so
    /// command traffic and stream reconfiguration never interleave.
    stream_guard: Arc<Mutex<()>>,
}

impl Endpoint {
    pub fn new(kind: SensorKind) -> Self {
        Self {
            kind,
            options: Mutex::new(HashMap::new()),
            formats: Mutex::new(Vec::new()),
            metadata: Mutex::new(HashMap::new()),
            extension_units: Mutex::new(Vec::new()),
            info: Mutex::new(BTreeMap::new()),
            pose: Mutex::new(None),
            sink: Mutex::new(None),
            roi_method: Mutex::new(None),
            stream_guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// Guard serializing streaming against command traffic.
    pub fn stream_guard(&self) -> Arc<Mutex<()>> {
        self.stream_guard.clone()
    }

    // =========================================================================
    // Options
    // =========================================================================

    pub fn register_option(&self, code: OptionCode, control: Arc<dyn Control>) -> Result<()> {
        lock(&self.options, "options")?.insert(code, control);
        Ok(())
    }

    pub fn supports_option(&self, code: OptionCode) -> bool {
        lock(&self.options, "options")
            .map(|options| options.contains_key(&code))
            .unwrap_or(false)
    }

    pub fn get_option(&self, code: OptionCode) -> Result<Arc<dyn Control>> {
        lock(&self.options, "options")?
            .get(&code)
            .cloned()
            .ok_or_else(|| {
                Error::not_implemented(format!("{:?} is not supported by the {}", code, self.kind))
            })
    }

    pub fn option_codes(&self) -> Result<Vec<OptionCode>> {
        Ok(lock(&self.options, "options")?.keys().copied().collect())
    }

    // =========================================================================
    // Formats
    // =========================================================================

    pub fn register_pixel_format(&self, format: PixelFormat) -> Result<()> {
        let mut formats = lock(&self.formats, "formats")?;
        if !formats.contains(&format) {
            formats.push(format);
        }
        Ok(())
    }

    pub fn supports_pixel_format(&self, format: PixelFormat) -> bool {
        lock(&self.formats, "formats")
            .map(|formats| formats.contains(&format))
            .unwrap_or(false)
    }

    pub fn pixel_formats(&self) -> Result<Vec<PixelFormat>> {
        Ok(lock(&self.formats, "formats")?.clone())
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn register_metadata(&self, field: MetadataField, parser: AttributeParser) -> Result<()> {
        lock(&self.metadata, "metadata")?.insert(field, parser);
        Ok(())
    }

    pub fn supports_metadata(&self, field: MetadataField) -> bool {
        lock(&self.metadata, "metadata")
            .map(|parsers| parsers.contains_key(&field))
            .unwrap_or(false)
    }

    /// Parses one attribute out of a borrowed frame metadata blob.
    pub fn parse_metadata(&self, field: MetadataField, blob: &[u8]) -> Result<u64> {
        let parser = *lock(&self.metadata, "metadata")?
            .get(&field)
            .ok_or_else(|| {
                Error::not_implemented(format!(
                    "{:?} metadata is not published by the {}",
                    field, self.kind
                ))
            })?;
        parser.parse(blob)
    }

    // =========================================================================
    // Extension units
    // =========================================================================

    pub fn register_extension_unit(&self, xu: ExtensionUnit) -> Result<()> {
        lock(&self.extension_units, "extension units")?.push(xu);
        Ok(())
    }

    pub fn extension_units(&self) -> Result<Vec<ExtensionUnit>> {
        Ok(lock(&self.extension_units, "extension units")?.clone())
    }

    // =========================================================================
    // Info records
    // =========================================================================

    pub fn register_info(&self, key: CameraInfo, value: impl Into<String>) -> Result<()> {
        lock(&self.info, "info")?.insert(key, value.into());
        Ok(())
    }

    pub fn supports_info(&self, key: CameraInfo) -> bool {
        lock(&self.info, "info")
            .map(|info| info.contains_key(&key))
            .unwrap_or(false)
    }

    pub fn info(&self, key: CameraInfo) -> Result<String> {
        lock(&self.info, "info")?.get(&key).cloned().ok_or_else(|| {
            Error::not_implemented(format!("{:?} is not published by the {}", key, self.kind))
        })
    }

    // =========================================================================
    // Pose
    // =========================================================================

    /// Installs the deferred pose accessor. The fetch runs on first `pose()`
    /// call, not here.
    pub fn set_pose(&self, pose: Cached<Pose>) -> Result<()> {
        *lock(&self.pose, "pose")? = Some(pose);
        Ok(())
    }

    /// Resolves the sensor pose, fetching calibration on first access.
    pub fn pose(&self) -> Result<Pose> {
        lock(&self.pose, "pose")?
            .as_ref()
            .ok_or_else(|| {
                Error::not_implemented(format!("the {} publishes no pose", self.kind))
            })?
            .get()
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    pub fn set_notifications_sink(&self, sink: NotificationSink) -> Result<()> {
        *lock(&self.sink, "notifications sink")? = Some(sink);
        Ok(())
    }

    pub fn notifications_sink(&self) -> Result<Option<NotificationSink>> {
        Ok(lock(&self.sink, "notifications sink")?.clone())
    }

    /// Pushes a notification to the sink, if one is attached.
    pub fn notify(&self, notification: Notification) -> Result<()> {
        if let Some(sink) = lock(&self.sink, "notifications sink")?.as_ref() {
            sink(notification);
        }
        Ok(())
    }

    // =========================================================================
    // Region of interest
    // =========================================================================

    pub fn set_roi_method(&self, method: Box<dyn RoiMethod>) -> Result<()> {
        *lock(&self.roi_method, "roi method")? = Some(method);
        Ok(())
    }

    pub fn set_roi(&self, roi: &RegionOfInterest) -> Result<()> {
        lock(&self.roi_method, "roi method")?
            .as_ref()
            .ok_or_else(|| {
                Error::not_implemented(format!(
                    "the {} has no exposure metering region",
                    self.kind
                ))
            })?
            .set_roi(roi)
    }

    pub fn roi(&self) -> Result<RegionOfInterest> {
        lock(&self.roi_method, "roi method")?
            .as_ref()
            .ok_or_else(|| {
                Error::not_implemented(format!(
                    "the {} has no exposure metering region",
                    self.kind
                ))
            })?
            .get_roi()
    }
}
