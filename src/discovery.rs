//! Grouping enumerated interfaces into claimable camera units.
//!
//! The platform layer enumerates flat lists of UVC, USB and HID descriptors.
//! One physical camera shows up as several of those, tied together by a
//! shared `unique_id`. The picker filters to supported products, groups
//! sibling interfaces, attaches the dedicated hardware-monitor interface and
//! HID sensors where present, and removes claimed descriptors from the input
//! lists.

use crate::device::{is_motion_capable, CAMERA_VID, SUPPORTED_PIDS};
use crate::types::{HidDeviceInfo, UsbDeviceInfo, UvcDeviceInfo};

/// UVC interface number of the depth/stereo function.
pub const DEPTH_MI: u16 = 0;

/// Everything one composed camera claims from the enumerated lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroup {
    pub uvc_devices: Vec<UvcDeviceInfo>,
    /// Dedicated hardware-monitor interface, when the sku has one.
    pub usb_device: Option<UsbDeviceInfo>,
    pub hid_devices: Vec<HidDeviceInfo>,
}

pub fn filter_by_product(devices: &[UvcDeviceInfo], pids: &[u16]) -> Vec<UvcDeviceInfo> {
    devices
        .iter()
        .filter(|d| pids.contains(&d.pid))
        .cloned()
        .collect()
}

pub fn filter_by_mi(devices: &[UvcDeviceInfo], mi: u16) -> Vec<UvcDeviceInfo> {
    devices.iter().filter(|d| d.mi == mi).cloned().collect()
}

pub fn mi_present(devices: &[UvcDeviceInfo], mi: u16) -> bool {
    devices.iter().any(|d| d.mi == mi)
}

/// Groups sibling interfaces of one physical unit.
pub fn group_devices_by_unique_id(devices: &[UvcDeviceInfo]) -> Vec<Vec<UvcDeviceInfo>> {
    let mut groups: Vec<Vec<UvcDeviceInfo>> = Vec::new();
    for device in devices {
        match groups
            .iter_mut()
            .find(|g| g[0].unique_id == device.unique_id)
        {
            Some(group) => group.push(device.clone()),
            None => groups.push(vec![device.clone()]),
        }
    }
    groups
}

/// Attaches HID siblings to each UVC group by shared `unique_id`.
pub fn group_devices_and_hids_by_unique_id(
    groups: Vec<Vec<UvcDeviceInfo>>,
    hids: &[HidDeviceInfo],
) -> Vec<(Vec<UvcDeviceInfo>, Vec<HidDeviceInfo>)> {
    groups
        .into_iter()
        .map(|group| {
            let matching = hids
                .iter()
                .filter(|h| h.unique_id == group[0].unique_id)
                .cloned()
                .collect();
            (group, matching)
        })
        .collect()
}

/// Finds the dedicated hardware-monitor interface of a group, if any.
pub fn try_fetch_usb_device(
    usb_devices: &[UsbDeviceInfo],
    group: &[UvcDeviceInfo],
) -> Option<UsbDeviceInfo> {
    usb_devices
        .iter()
        .find(|u| group.iter().any(|d| d.unique_id == u.unique_id))
        .cloned()
}

/// Removes claimed descriptors from an enumerated list.
pub fn trim_device_list<T: PartialEq>(devices: &mut Vec<T>, claimed: &[T]) {
    devices.retain(|d| !claimed.contains(d));
}

/// Picks every claimable depth camera out of the enumerated lists.
///
/// A group is claimable when it has the depth interface. Motion-capable skus
/// without their HID siblings are left alone so a later enumeration pass can
/// pick them up complete. Claimed descriptors are trimmed from the inputs.
pub fn pick_depth_devices(
    uvc_devices: &mut Vec<UvcDeviceInfo>,
    usb_devices: &[UsbDeviceInfo],
    hid_devices: &mut Vec<HidDeviceInfo>,
) -> Vec<DeviceGroup> {
    let candidates: Vec<UvcDeviceInfo> = filter_by_product(uvc_devices, SUPPORTED_PIDS)
        .into_iter()
        .filter(|d| d.vid == CAMERA_VID)
        .collect();

    let mut results = Vec::new();
    let grouped = group_devices_and_hids_by_unique_id(
        group_devices_by_unique_id(&candidates),
        hid_devices,
    );
    for (group, hids) in grouped {
        if !mi_present(&group, DEPTH_MI) {
            log::warn!(
                "unit {} has no depth interface, skipping",
                group[0].unique_id
            );
            continue;
        }
        if is_motion_capable(group[0].pid) && hids.is_empty() {
            log::warn!(
                "motion-capable unit {} has no HID siblings yet, skipping",
                group[0].unique_id
            );
            continue;
        }
        let usb_device = try_fetch_usb_device(usb_devices, &group);
        trim_device_list(uvc_devices, &group);
        trim_device_list(hid_devices, &hids);
        results.push(DeviceGroup {
            uvc_devices: group,
            usb_device,
            hid_devices: hids,
        });
    }
    results
}
