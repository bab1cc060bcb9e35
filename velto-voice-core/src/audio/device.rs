//! Audio device enumeration for the host's device picker.

use serde::{Deserialize, Serialize};

/// Which side of the duplex pipeline a device serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDirection {
    Input,
    Output,
}

/// Metadata about an audio device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Name reported by the OS; usable as `preferred_input_device`.
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this is the system default for its direction.
    pub is_default: bool,
}

/// Sort defaults first, then by name.
pub fn sort_devices(devices: &mut [DeviceInfo]) {
    devices.sort_by_key(|d| {
        (
            d.direction == DeviceDirection::Output,
            !d.is_default,
            d.name.to_ascii_lowercase(),
        )
    });
}

/// List input and output devices of the default host.
///
/// Returns an empty `Vec` when compiled without cpal or when enumeration fails.
#[cfg(feature = "audio-cpal")]
pub fn list_devices() -> Vec<DeviceInfo> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_in = host.default_input_device().and_then(|d| d.name().ok());
    let default_out = host.default_output_device().and_then(|d| d.name().ok());

    let mut list = Vec::new();
    match host.input_devices() {
        Ok(devices) => list.extend(devices.filter_map(|d| d.name().ok()).map(|name| DeviceInfo {
            is_default: default_in.as_deref() == Some(name.as_str()),
            name,
            direction: DeviceDirection::Input,
        })),
        Err(e) => tracing::warn!("failed to enumerate input devices: {e}"),
    }
    match host.output_devices() {
        Ok(devices) => list.extend(devices.filter_map(|d| d.name().ok()).map(|name| DeviceInfo {
            is_default: default_out.as_deref() == Some(name.as_str()),
            name,
            direction: DeviceDirection::Output,
        })),
        Err(e) => tracing::warn!("failed to enumerate output devices: {e}"),
    }

    sort_devices(&mut list);
    list
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_devices() -> Vec<DeviceInfo> {
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev(name: &str, direction: DeviceDirection, is_default: bool) -> DeviceInfo {
        DeviceInfo {
            name: name.into(),
            direction,
            is_default,
        }
    }

    #[test]
    fn inputs_first_and_defaults_lead_each_group() {
        let mut list = vec![
            dev("Speakers", DeviceDirection::Output, true),
            dev("b mic", DeviceDirection::Input, false),
            dev("USB Mic", DeviceDirection::Input, true),
            dev("A mic", DeviceDirection::Input, false),
        ];
        sort_devices(&mut list);
        let names: Vec<&str> = list.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["USB Mic", "A mic", "b mic", "Speakers"]);
    }

    #[test]
    fn device_info_serializes_camel_case() {
        let json = serde_json::to_value(dev("Mic", DeviceDirection::Input, true)).unwrap();
        assert_eq!(json["isDefault"], true);
        assert_eq!(json["direction"], "input");
    }
}
