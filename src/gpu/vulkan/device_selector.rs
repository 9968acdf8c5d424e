use ash::vk;
use std::ffi::CStr;

#[cfg(feature = "dashi-serde")]
use serde::{Deserialize, Serialize};

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "dashi-serde", derive(Serialize, Deserialize))]
pub enum DeviceType {
    Dedicated,
    Integrated,
    #[default]
    Other,
}

impl From<vk::PhysicalDeviceType> for DeviceType {
    fn from(value: vk::PhysicalDeviceType) -> Self {
        match value {
            vk::PhysicalDeviceType::DISCRETE_GPU => DeviceType::Dedicated,
            vk::PhysicalDeviceType::INTEGRATED_GPU => DeviceType::Integrated,
            _ => DeviceType::Other,
        }
    }
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub kind: DeviceType,
    pub driver_version: u32,
    pub api_version: u32,
}

impl From<vk::PhysicalDeviceProperties> for DeviceInfo {
    fn from(value: vk::PhysicalDeviceProperties) -> Self {
        DeviceInfo {
            name: unsafe {
                CStr::from_ptr(value.device_name.as_ptr())
                    .to_str()
                    .unwrap_or("UNKNOWN")
                    .to_string()
            },
            kind: value.device_type.into(),
            driver_version: value.driver_version,
            api_version: value.api_version,
        }
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[Name {} -- Type {:?} -- Driver Ver {}]",
            self.name, self.kind, self.driver_version
        )
    }
}

/// Index of the first discrete GPU, or the first device if there is none.
pub fn select_device(kinds: &[DeviceType]) -> Option<usize> {
    if kinds.is_empty() {
        return None;
    }
    Some(
        kinds
            .iter()
            .position(|k| *k == DeviceType::Dedicated)
            .unwrap_or(0),
    )
}

/// First queue family advertising compute, as `(family, queue_count)`.
pub fn select_compute_family(families: &[vk::QueueFamilyProperties]) -> Option<(u32, u32)> {
    families
        .iter()
        .enumerate()
        .find(|(_, prop)| {
            prop.queue_flags.contains(vk::QueueFlags::COMPUTE) && prop.queue_count > 0
        })
        .map(|(idx, prop)| (idx as u32, prop.queue_count))
}

/// Descending priorities `1 - i / count` for every queue of the family.
pub fn queue_priorities(count: u32) -> Vec<f32> {
    (0..count)
        .map(|i| 1.0 - i as f32 / count as f32)
        .collect()
}
