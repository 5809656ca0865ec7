//! Automation-hub device list and session capabilities
//!
//! Cloud-hosted devices are described in a capabilities file:
//!
//! ```json
//! {
//!   "isRealMobile": true,
//!   "devices": [
//!     { "enabled": true, "platformName": "android", "deviceName": "Pixel 7", "platformVersion": "13" }
//!   ]
//! }
//! ```
//!
//! Everything outside `devices` is common to every session. A device's
//! instance id is `"<platformName>, <deviceName>, <platformVersion>"`.

use devrig_core::prelude::*;
use devrig_core::{Device, DeviceType, Platform};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use url::Url;

/// Environment variables read when creating a hub session
pub const ENV_USERNAME: &str = "DEVRIG_HUB_USERNAME";
pub const ENV_ACCESS_KEY: &str = "DEVRIG_HUB_ACCESS_KEY";
pub const ENV_BUILD: &str = "DEVRIG_HUB_BUILD";
pub const ENV_IOS_APP: &str = "DEVRIG_HUB_IOS_APP";
pub const ENV_ANDROID_APP: &str = "DEVRIG_HUB_ANDROID_APP";

/// Hub used when none is configured
pub const DEFAULT_HUB_URL: &str = "https://mobile-hub.lambdatest.com/wd/hub";

/// Capability carrying the vendor options object
pub const VENDOR_OPTIONS_KEY: &str = "lt:options";

const SESSION_NAME: &str = "devrig";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubDevice {
    #[serde(default)]
    pub enabled: bool,
    pub platform_name: String,
    pub device_name: String,
    pub platform_version: String,
    /// Remaining per-device capabilities
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl HubDevice {
    pub fn instance_id(&self) -> String {
        format!(
            "{}, {}, {}",
            self.platform_name, self.device_name, self.platform_version
        )
    }

    /// Platform the hub runs this device on
    pub fn target_platform(&self) -> Result<Platform> {
        match self.platform_name.to_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            other => Err(Error::unsupported(
                "createHubSession",
                format!("hub platform '{}'", other),
            )),
        }
    }

    pub fn to_device(&self) -> Device {
        Device::connected(
            self.instance_id(),
            format!("{} ({} {})", self.device_name, self.platform_name, self.platform_version),
            Platform::AutomationHub,
            DeviceType::Real,
        )
    }

    /// Device capabilities as strings, as the hub expects them
    fn capabilities(&self) -> Map<String, Value> {
        let mut caps = stringify(&self.extra);
        caps.insert("platformName".into(), Value::String(self.platform_name.clone()));
        caps.insert("deviceName".into(), Value::String(self.device_name.clone()));
        caps.insert(
            "platformVersion".into(),
            Value::String(self.platform_version.clone()),
        );
        caps.remove("enabled");
        caps
    }
}

/// Parsed capabilities file
#[derive(Debug, Clone, Default)]
pub struct HubCapabilities {
    pub common: Map<String, Value>,
    pub devices: Vec<HubDevice>,
}

fn stringify(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), Value::String(s))
        })
        .collect()
}

impl HubCapabilities {
    pub fn parse(json: &str) -> Result<Self> {
        let mut root: Map<String, Value> = serde_json::from_str(json)?;
        let devices = match root.remove("devices") {
            Some(v) => serde_json::from_value(v)?,
            None => Vec::new(),
        };
        Ok(Self {
            common: root,
            devices,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::backend_unreachable(format!(
                "Failed to read hub capabilities {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    pub fn enabled_devices(&self) -> impl Iterator<Item = &HubDevice> {
        self.devices.iter().filter(|d| d.enabled)
    }

    pub fn find(&self, instance_id: &str) -> Option<&HubDevice> {
        self.enabled_devices()
            .find(|d| d.instance_id().eq_ignore_ascii_case(instance_id))
    }

    /// Session capabilities for `instance_id`, reading app paths from the environment
    pub fn session_capabilities(&self, instance_id: &str) -> Result<Value> {
        self.session_capabilities_with(instance_id, |k| std::env::var(k).ok())
    }

    /// Merge common and device capabilities into the vendor options object
    pub fn session_capabilities_with(
        &self,
        instance_id: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Value> {
        let device = self
            .find(instance_id)
            .ok_or_else(|| Error::device_not_found(instance_id))?;

        let app_var = match device.target_platform()? {
            Platform::Ios => ENV_IOS_APP,
            _ => ENV_ANDROID_APP,
        };

        let mut options = stringify(&self.common);
        options.extend(device.capabilities());
        options.insert("name".into(), Value::String(SESSION_NAME.into()));
        if let Some(build) = env(ENV_BUILD) {
            options.insert("build".into(), Value::String(build));
        }
        match env(app_var) {
            Some(app) => {
                options.insert("app".into(), Value::String(app));
            }
            None => warn!("{} is not set; the hub session will start without an app", app_var),
        }

        let mut caps = Map::new();
        caps.insert(VENDOR_OPTIONS_KEY.into(), Value::Object(options));
        Ok(Value::Object(caps))
    }
}

/// Hub endpoint with credentials from the environment embedded
pub fn hub_endpoint(configured: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(configured.unwrap_or(DEFAULT_HUB_URL))
        .map_err(|e| Error::config(format!("Invalid hub url: {}", e)))?;

    if let (Ok(user), Ok(key)) = (std::env::var(ENV_USERNAME), std::env::var(ENV_ACCESS_KEY)) {
        url.set_username(&user)
            .and_then(|_| url.set_password(Some(&key)))
            .map_err(|_| Error::config("Hub url cannot carry credentials"))?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const CAPS: &str = r#"{
        "isRealMobile": true,
        "visual": false,
        "devices": [
            { "enabled": true, "platformName": "android", "deviceName": "Pixel 7", "platformVersion": "13" },
            { "enabled": false, "platformName": "ios", "deviceName": "iPhone 14", "platformVersion": "16" },
            { "enabled": true, "platformName": "ios", "deviceName": "iPhone 15", "platformVersion": "17", "autoAcceptAlerts": true },
            { "enabled": true, "platformName": "tizen", "deviceName": "Watch", "platformVersion": "5" }
        ]
    }"#;

    #[test]
    fn test_enabled_devices_only() {
        let caps = HubCapabilities::parse(CAPS).unwrap();
        let ids: Vec<_> = caps.enabled_devices().map(|d| d.instance_id()).collect();
        assert_eq!(
            ids,
            vec!["android, Pixel 7, 13", "ios, iPhone 15, 17", "tizen, Watch, 5"]
        );
    }

    #[test]
    fn test_to_device() {
        let caps = HubCapabilities::parse(CAPS).unwrap();
        let device = caps.find("android, Pixel 7, 13").unwrap().to_device();
        assert_eq!(device.platform, Platform::AutomationHub);
        assert_eq!(device.instance_id, "android, Pixel 7, 13");
        assert!(device.is_connected());
    }

    #[test]
    fn test_session_capabilities_merge() {
        let caps = HubCapabilities::parse(CAPS).unwrap();
        let value = caps
            .session_capabilities_with("ios, iPhone 15, 17", |k| match k {
                ENV_IOS_APP => Some("lt://APP123".to_string()),
                ENV_BUILD => Some("nightly".to_string()),
                _ => None,
            })
            .unwrap();

        let options = &value[VENDOR_OPTIONS_KEY];
        assert_eq!(options["isRealMobile"], "true");
        assert_eq!(options["autoAcceptAlerts"], "true");
        assert_eq!(options["deviceName"], "iPhone 15");
        assert_eq!(options["app"], "lt://APP123");
        assert_eq!(options["build"], "nightly");
        assert!(options.get("enabled").is_none());
    }

    #[test]
    fn test_unsupported_hub_platform() {
        let caps = HubCapabilities::parse(CAPS).unwrap();
        let err = caps
            .session_capabilities_with("tizen, Watch, 5", |_| None)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_unknown_device() {
        let caps = HubCapabilities::parse(CAPS).unwrap();
        let err = caps
            .session_capabilities_with("ios, iPhone 14, 16", |_| None)
            .unwrap_err();
        assert!(matches!(err, Error::DeviceNotFound { .. }));
    }

    #[test]
    #[serial]
    fn test_hub_endpoint_embeds_credentials() {
        std::env::set_var(ENV_USERNAME, "alice");
        std::env::set_var(ENV_ACCESS_KEY, "s3cret");
        let url = hub_endpoint(None).unwrap();
        std::env::remove_var(ENV_USERNAME);
        std::env::remove_var(ENV_ACCESS_KEY);

        assert_eq!(url.username(), "alice");
        assert_eq!(url.password(), Some("s3cret"));
        assert_eq!(url.host_str(), Some("mobile-hub.lambdatest.com"));
    }
}
