//! Device capability model and platform/API validation
//!
//! The measurement only needs to know, per direction, which device is in use,
//! which audio API drives it, how many channels it has, and which sample rates
//! it advertises. Capabilities come from a [`DeviceQuery`]: either fixed values
//! from the configuration or, with the `cpal-devices` feature, the system's
//! default audio host.

use crate::error::{MeasurementError, MeasurementResultOf};
use serde::{Deserialize, Serialize};

/// Device name reported when no device could be resolved
pub const UNKNOWN_DEVICE: &str = "unknown";

/// One direction (playback or capture) of an audio device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionInfo {
    /// Device name
    pub name: String,
    /// Audio API identifier (e.g. "alsa", "asio", "coreaudio")
    pub api: String,
    /// Number of channels
    pub channels: usize,
    /// Advertised sample rates in Hz
    #[serde(default)]
    pub sample_rates: Vec<u32>,
}

impl DirectionInfo {
    /// Placeholder for an unresolved device
    pub fn unknown() -> Self {
        Self {
            name: UNKNOWN_DEVICE.to_string(),
            api: String::new(),
            channels: 0,
            sample_rates: Vec::new(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.name.eq_ignore_ascii_case(UNKNOWN_DEVICE)
    }

    pub fn supports_rate(&self, rate: u32) -> bool {
        self.sample_rates.contains(&rate)
    }
}

/// Playback and capture capabilities of the measurement interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub output: DirectionInfo,
    pub input: DirectionInfo,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            output: DirectionInfo::unknown(),
            input: DirectionInfo::unknown(),
        }
    }
}

impl DeviceCapabilities {
    /// Reject unresolved devices and unsupported platform/API combinations
    pub fn validate(&self) -> MeasurementResultOf<()> {
        if self.output.is_unknown() || self.input.is_unknown() {
            return Err(MeasurementError::NoDeviceAvailable);
        }
        check_platform_api(std::env::consts::OS, &self.output.api)?;
        check_platform_api(std::env::consts::OS, &self.input.api)?;
        Ok(())
    }
}

/// Source of device capabilities
pub trait DeviceQuery {
    fn capabilities(&self) -> MeasurementResultOf<DeviceCapabilities>;
}

/// Capabilities fixed up front, typically from the configuration file
#[derive(Debug, Clone)]
pub struct StaticDeviceQuery {
    capabilities: DeviceCapabilities,
}

impl StaticDeviceQuery {
    pub fn new(capabilities: DeviceCapabilities) -> Self {
        Self { capabilities }
    }
}

impl DeviceQuery for StaticDeviceQuery {
    fn capabilities(&self) -> MeasurementResultOf<DeviceCapabilities> {
        Ok(self.capabilities.clone())
    }
}

/// Audio APIs usable on an operating system
pub fn supported_apis(os: &str) -> &'static [&'static str] {
    match os {
        "linux" => &["alsa", "jack", "pulse"],
        "macos" => &["coreaudio"],
        "windows" => &["asio", "wasapi", "directsound"],
        _ => &[],
    }
}

/// Fail with [`MeasurementError::UnsupportedPlatform`] unless `api` runs on `os`
pub fn check_platform_api(os: &str, api: &str) -> MeasurementResultOf<()> {
    let api_lower = api.to_ascii_lowercase();
    if supported_apis(os).contains(&api_lower.as_str()) {
        Ok(())
    } else {
        Err(MeasurementError::UnsupportedPlatform {
            os: os.to_string(),
            api: api.to_string(),
        })
    }
}

/// Capabilities of the default devices of the system audio host
#[cfg(feature = "cpal-devices")]
#[derive(Debug, Default, Clone, Copy)]
pub struct HostDeviceQuery;

#[cfg(feature = "cpal-devices")]
impl HostDeviceQuery {
    /// Common sample rates to check against each supported config range
    const COMMON_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

    fn api_name(host: &cpal::Host) -> String {
        host.id().name().to_ascii_lowercase()
    }

    fn collect_rates<I>(configs: I) -> Vec<u32>
    where
        I: Iterator<Item = cpal::SupportedStreamConfigRange>,
    {
        let mut rates = Vec::new();
        for config in configs {
            for &rate in &Self::COMMON_RATES {
                if (config.min_sample_rate().0..=config.max_sample_rate().0).contains(&rate)
                    && !rates.contains(&rate)
                {
                    rates.push(rate);
                }
            }
        }
        rates.sort();
        rates
    }
}

#[cfg(feature = "cpal-devices")]
impl DeviceQuery for HostDeviceQuery {
    fn capabilities(&self) -> MeasurementResultOf<DeviceCapabilities> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        let api = Self::api_name(&host);
        let mut caps = DeviceCapabilities::default();

        if let Some(device) = host.default_output_device() {
            caps.output = DirectionInfo {
                name: device
                    .name()
                    .unwrap_or_else(|_| UNKNOWN_DEVICE.to_string()),
                api: api.clone(),
                channels: device
                    .default_output_config()
                    .map(|c| c.channels() as usize)
                    .unwrap_or(0),
                sample_rates: device
                    .supported_output_configs()
                    .map(Self::collect_rates)
                    .unwrap_or_default(),
            };
        }
        if let Some(device) = host.default_input_device() {
            caps.input = DirectionInfo {
                name: device
                    .name()
                    .unwrap_or_else(|_| UNKNOWN_DEVICE.to_string()),
                api,
                channels: device
                    .default_input_config()
                    .map(|c| c.channels() as usize)
                    .unwrap_or(0),
                sample_rates: device
                    .supported_input_configs()
                    .map(Self::collect_rates)
                    .unwrap_or_default(),
            };
        }

        tracing::info!(
            output = %caps.output.name,
            input = %caps.input.name,
            api = %caps.output.api,
            "Queried host audio devices"
        );
        Ok(caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direction(name: &str, api: &str) -> DirectionInfo {
        DirectionInfo {
            name: name.to_string(),
            api: api.to_string(),
            channels: 2,
            sample_rates: vec![44100, 48000],
        }
    }

    #[test]
    fn test_unknown_device_rejected() {
        let caps = DeviceCapabilities::default();
        assert!(matches!(
            caps.validate(),
            Err(MeasurementError::NoDeviceAvailable)
        ));

        let caps = DeviceCapabilities {
            output: direction("Interface", "alsa"),
            input: direction("Unknown", "alsa"),
        };
        assert!(matches!(
            caps.validate(),
            Err(MeasurementError::NoDeviceAvailable)
        ));
    }

    #[test]
    fn test_platform_api_matrix() {
        assert!(check_platform_api("linux", "ALSA").is_ok());
        assert!(check_platform_api("linux", "jack").is_ok());
        assert!(check_platform_api("windows", "asio").is_ok());
        assert!(check_platform_api("macos", "coreaudio").is_ok());
        assert!(matches!(
            check_platform_api("linux", "asio"),
            Err(MeasurementError::UnsupportedPlatform { .. })
        ));
        assert!(check_platform_api("freebsd", "oss").is_err());
    }

    #[test]
    fn test_validate_uses_host_platform() {
        let api = supported_apis(std::env::consts::OS)
            .first()
            .copied()
            .unwrap_or("none");
        let caps = DeviceCapabilities {
            output: direction("Interface", api),
            input: direction("Interface", api),
        };
        assert_eq!(
            caps.validate().is_ok(),
            !supported_apis(std::env::consts::OS).is_empty()
        );
    }

    #[test]
    fn test_supports_rate() {
        let d = direction("Interface", "alsa");
        assert!(d.supports_rate(48000));
        assert!(!d.supports_rate(96000));
    }

    #[test]
    fn test_static_query_returns_configured() {
        let caps = DeviceCapabilities {
            output: direction("Out", "alsa"),
            input: direction("In", "alsa"),
        };
        let query = StaticDeviceQuery::new(caps.clone());
        assert_eq!(query.capabilities().unwrap(), caps);
    }

    #[test]
    fn test_capabilities_json_defaults() {
        let json = r#"{
            "output": {"name": "Out", "api": "alsa", "channels": 2},
            "input": {"name": "In", "api": "alsa", "channels": 4, "sample_rates": [48000]}
        }"#;
        let caps: DeviceCapabilities = serde_json::from_str(json).unwrap();
        assert!(caps.output.sample_rates.is_empty());
        assert_eq!(caps.input.channels, 4);
    }
}
