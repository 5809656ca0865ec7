//! Recommended devices offered by the launch flow
//!
//! The launch flow can start a known-good emulator or simulator per platform.
//! This module only describes those devices; creating them is left to the
//! platform tooling (`avdmanager`, `xcrun simctl create`).

use devrig_core::prelude::*;
use devrig_core::{Device, DeviceType, Platform};
pub use devrig_driver::avds::AvdProfile;

// ─────────────────────────────────────────────────────────────────
// Android
// ─────────────────────────────────────────────────────────────────

pub const ANDROID_VERSIONS: [u32; 6] = [34, 33, 31, 30, 29, 28];
pub const ANDROID_DEFAULT_VERSION: u32 = 30;

const ANDROID_IMAGE_TAG: &str = "google_apis";

/// Device profiles to prefer, best first
pub const PIXEL_PREFERENCE: [&str; 5] = ["pixel_6", "pixel_6_pro", "pixel_5", "pixel_4", "pixel"];

/// First profile in [`PIXEL_PREFERENCE`] order
pub fn choose_pixel_device(profiles: &[AvdProfile]) -> Option<&AvdProfile> {
    PIXEL_PREFERENCE
        .iter()
        .find_map(|id| profiles.iter().find(|p| p.id == *id))
}

/// System-image ABI for a host CPU architecture (`std::env::consts::ARCH` values)
pub fn abi_for_arch(arch: &str) -> Result<&'static str> {
    match arch {
        "x86_64" => Ok("x86_64"),
        "aarch64" | "arm64" => Ok("arm64-v8a"),
        other => Err(Error::selection(format!("Unsupported architecture {}", other))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AndroidDeviceConfig {
    pub avd_name: String,
    /// Hardware profile id
    pub device: String,
    pub tag: String,
    pub system_image: String,
    pub abi: String,
    pub version: u32,
    description: String,
}

impl AndroidDeviceConfig {
    pub fn new(version: u32, profile: &AvdProfile, arch: &str) -> Result<Self> {
        if !ANDROID_VERSIONS.contains(&version) {
            return Err(Error::selection(format!(
                "Unsupported Android version {}. Supported versions: {:?}",
                version, ANDROID_VERSIONS
            )));
        }
        let abi = abi_for_arch(arch)?;

        Ok(Self {
            avd_name: format!("Devrig_{}_API_{}", profile.name.replace(' ', "_"), version),
            device: profile.id.clone(),
            tag: ANDROID_IMAGE_TAG.to_string(),
            system_image: format!("system-images;android-{};{};{}", version, ANDROID_IMAGE_TAG, abi),
            abi: abi.to_string(),
            version,
            description: format!("{} - Android {} (API {})", profile.name, api_to_release(version), version),
        })
    }

    /// `avdmanager` invocation that creates this AVD
    pub fn create_command(&self) -> String {
        format!(
            "avdmanager create avd --name {} --package '{}' --device {} --tag {} --abi {}",
            self.avd_name, self.system_image, self.device, self.tag, self.abi
        )
    }

    pub fn to_device(&self) -> Device {
        Device::available_for_launch(
            &self.avd_name,
            &self.description,
            Platform::Android,
            DeviceType::Emulator,
        )
        .with_os_version(self.version)
    }
}

fn api_to_release(api: u32) -> &'static str {
    match api {
        34 => "14",
        33 => "13",
        31 => "12",
        30 => "11",
        29 => "10",
        28 => "9",
        _ => "?",
    }
}

// ─────────────────────────────────────────────────────────────────
// iOS
// ─────────────────────────────────────────────────────────────────

pub const IOS_VERSIONS: [u32; 4] = [15, 16, 17, 18];
pub const IOS_DEFAULT_VERSION: u32 = 16;
pub const IOS_DEVICE_TYPE: &str = "iPhone-11";

pub fn ios_runtime(version: u32) -> Option<&'static str> {
    match version {
        15 => Some("iOS-15-5"),
        16 => Some("iOS-16-2"),
        17 => Some("iOS-17-0"),
        18 => Some("iOS-18-2"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IosDeviceConfig {
    pub name: String,
    pub device_type: String,
    pub runtime: String,
    pub version: u32,
}

impl IosDeviceConfig {
    pub fn new(version: u32) -> Result<Self> {
        let runtime = ios_runtime(version).ok_or_else(|| {
            Error::selection(format!(
                "Unsupported iOS version {}. Supported versions: {:?}",
                version, IOS_VERSIONS
            ))
        })?;
        Ok(Self {
            name: format!("Devrig_iPhone11_{}", version),
            device_type: IOS_DEVICE_TYPE.to_string(),
            runtime: runtime.to_string(),
            version,
        })
    }

    pub fn create_command(&self) -> String {
        format!(
            "xcrun simctl create {} com.apple.CoreSimulator.SimDeviceType.{} com.apple.CoreSimulator.SimRuntime.{}",
            self.name, self.device_type, self.runtime
        )
    }

    pub fn to_device(&self) -> Device {
        Device::available_for_launch(
            &self.name,
            format!("iPhone 11 - iOS {}", self.version),
            Platform::Ios,
            DeviceType::Simulator,
        )
        .with_os_version(self.version)
    }
}

// ─────────────────────────────────────────────────────────────────
// Any platform
// ─────────────────────────────────────────────────────────────────

/// The recommended device for `platform`, plus the command creating it if needed
///
/// Android picks the preferred Pixel among the installed `profiles`, falling
/// back to [`AvdProfile::default_pixel`].
pub fn recommended_device(
    platform: Platform,
    version: u32,
    profiles: &[AvdProfile],
) -> Result<(Device, Option<String>)> {
    match platform {
        Platform::Android => {
            let fallback = AvdProfile::default_pixel();
            let profile = choose_pixel_device(profiles).unwrap_or(&fallback);
            let config = AndroidDeviceConfig::new(version, profile, std::env::consts::ARCH)?;
            Ok((config.to_device(), Some(config.create_command())))
        }
        Platform::Ios => {
            let config = IosDeviceConfig::new(version)?;
            Ok((config.to_device(), Some(config.create_command())))
        }
        Platform::Web => {
            let browser = Device::browser();
            Ok((
                Device::available_for_launch(
                    browser.instance_id,
                    browser.description,
                    Platform::Web,
                    DeviceType::Browser,
                ),
                None,
            ))
        }
        Platform::AutomationHub => Err(Error::unsupported(
            "recommendedDevice",
            Platform::AutomationHub.description(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devrig_core::ConnectionState;

    #[test]
    fn test_android_config() {
        let config = AndroidDeviceConfig::new(30, &AvdProfile::default_pixel(), "x86_64").unwrap();
        assert_eq!(config.avd_name, "Devrig_Pixel_6_API_30");
        assert_eq!(config.system_image, "system-images;android-30;google_apis;x86_64");
        assert_eq!(config.device, "pixel_6");

        let arm = AndroidDeviceConfig::new(34, &AvdProfile::default_pixel(), "aarch64").unwrap();
        assert_eq!(arm.abi, "arm64-v8a");
    }

    #[test]
    fn test_android_rejects_unknown_version_and_arch() {
        assert!(AndroidDeviceConfig::new(32, &AvdProfile::default_pixel(), "x86_64").is_err());
        assert!(AndroidDeviceConfig::new(30, &AvdProfile::default_pixel(), "riscv64").is_err());
    }

    #[test]
    fn test_choose_pixel_device_preference() {
        let profiles = vec![
            AvdProfile::new("pixel", "Pixel"),
            AvdProfile::new("pixel_5", "Pixel 5"),
            AvdProfile::new("nexus_5", "Nexus 5"),
        ];
        assert_eq!(choose_pixel_device(&profiles).unwrap().id, "pixel_5");
        assert!(choose_pixel_device(&[AvdProfile::new("tv_1080p", "TV")]).is_none());
    }

    #[test]
    fn test_ios_config() {
        let config = IosDeviceConfig::new(IOS_DEFAULT_VERSION).unwrap();
        assert_eq!(config.name, "Devrig_iPhone11_16");
        assert_eq!(config.runtime, "iOS-16-2");
        assert!(config.create_command().contains("SimRuntime.iOS-16-2"));
        assert!(IosDeviceConfig::new(14).is_err());
    }

    #[test]
    fn test_recommended_android_prefers_installed_pixel() {
        let installed = vec![
            AvdProfile::new("nexus_5", "Nexus 5"),
            AvdProfile::new("pixel_4", "Pixel 4"),
        ];
        let (device, command) = recommended_device(Platform::Android, 33, &installed).unwrap();
        assert_eq!(device.instance_id, "Devrig_Pixel_4_API_33");
        assert!(command.unwrap().contains("--device pixel_4"));

        let (fallback, _) = recommended_device(Platform::Android, 33, &[]).unwrap();
        assert_eq!(fallback.instance_id, "Devrig_Pixel_6_API_33");
    }

    #[test]
    fn test_recommended_web_device() {
        let (device, command) = recommended_device(Platform::Web, 0, &[]).unwrap();
        assert_eq!(device.instance_id, "chromium");
        assert_eq!(device.device_type, DeviceType::Browser);
        assert_eq!(device.state, ConnectionState::AvailableForLaunch);
        assert!(command.is_none());
    }
}
