//! Core domain types: platforms, devices, geometry and key codes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ─────────────────────────────────────────────────────────────────
// Platform
// ─────────────────────────────────────────────────────────────────

/// Automation platform a device belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Android,
    Ios,
    Web,
    AutomationHub,
}

impl Platform {
    /// All platforms in display order
    pub const ALL: [Platform; 4] = [
        Platform::Android,
        Platform::Ios,
        Platform::Web,
        Platform::AutomationHub,
    ];

    /// Human-readable name used to group devices in listings
    pub fn description(&self) -> &'static str {
        match self {
            Platform::Android => "Android",
            Platform::Ios => "iOS",
            Platform::Web => "Web",
            Platform::AutomationHub => "Automation Hub",
        }
    }

    /// Lowercase identifier used in config files and registry paths
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
            Platform::Web => "web",
            Platform::AutomationHub => "automation_hub",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl FromStr for Platform {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "web" => Ok(Platform::Web),
            "automation_hub" | "hub" | "appium" => Ok(Platform::AutomationHub),
            other => Err(crate::Error::selection(format!(
                "Unsupported platform '{}'. Use one of: android, ios, web",
                other
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Device
// ─────────────────────────────────────────────────────────────────

/// Whether a device can be driven right now or must be started first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    AvailableForLaunch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Emulator,
    Simulator,
    Real,
    Browser,
}

impl DeviceType {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceType::Emulator => "emulator",
            DeviceType::Simulator => "simulator",
            DeviceType::Real => "real",
            DeviceType::Browser => "browser",
        }
    }
}

/// A device known to the catalog
///
/// For `Connected` devices `instance_id` is the platform-scoped identity
/// (adb serial, simulator UDID, hub tuple). For `AvailableForLaunch` devices it
/// is the model identifier used to start it (AVD name, simulator UDID or name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub instance_id: String,

    pub description: String,

    pub platform: Platform,

    pub state: ConnectionState,

    pub device_type: DeviceType,

    /// OS major version when known (API level on Android)
    #[serde(default)]
    pub os_version: Option<u32>,
}

/// Instance id reserved for the built-in browser device
pub const BROWSER_DEVICE_ID: &str = "chromium";

impl Device {
    pub fn connected(
        instance_id: impl Into<String>,
        description: impl Into<String>,
        platform: Platform,
        device_type: DeviceType,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            description: description.into(),
            platform,
            state: ConnectionState::Connected,
            device_type,
            os_version: None,
        }
    }

    pub fn available_for_launch(
        model_id: impl Into<String>,
        description: impl Into<String>,
        platform: Platform,
        device_type: DeviceType,
    ) -> Self {
        Self {
            instance_id: model_id.into(),
            description: description.into(),
            platform,
            state: ConnectionState::AvailableForLaunch,
            device_type,
            os_version: None,
        }
    }

    /// The experimental desktop browser device
    pub fn browser() -> Self {
        Self::connected(
            BROWSER_DEVICE_ID,
            "Chromium Desktop Browser (Experimental)",
            Platform::Web,
            DeviceType::Browser,
        )
    }

    pub fn with_os_version(mut self, version: u32) -> Self {
        self.os_version = Some(version);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Case-insensitive exact instance id comparison
    pub fn matches_id(&self, id: &str) -> bool {
        self.instance_id.eq_ignore_ascii_case(id.trim())
    }

    /// Line shown in selection listings
    pub fn display_name(&self) -> String {
        match self.state {
            ConnectionState::Connected => {
                format!("{} - {}", self.description, self.instance_id)
            }
            ConnectionState::AvailableForLaunch => self.description.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Geometry
// ─────────────────────────────────────────────────────────────────

/// Screen dimensions of a driven device
///
/// Pixel values are what the backend reports; grid values are the coordinate
/// space gestures are expressed in (points on iOS, pixels on Android).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: Platform,
    pub width_pixels: u32,
    pub height_pixels: u32,
    pub width_grid: u32,
    pub height_grid: u32,
}

impl DeviceInfo {
    /// Point at fractional coordinates of the grid, truncated toward zero
    pub fn grid_point(&self, fx: f64, fy: f64) -> Point {
        Point::new(
            (self.width_grid as f64 * fx) as i32,
            (self.height_grid as f64 * fy) as i32,
        )
    }

    /// Convert a grid point to backend pixel space
    pub fn grid_to_pixels(&self, point: Point) -> Point {
        if self.width_grid == 0 || self.height_grid == 0 {
            return point;
        }
        let sx = self.width_pixels as f64 / self.width_grid as f64;
        let sy = self.height_pixels as f64 / self.height_grid as f64;
        Point::new((point.x as f64 * sx) as i32, (point.y as f64 * sy) as i32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwipeDirection {
    Up,
    Down,
    Left,
    Right,
}

// ─────────────────────────────────────────────────────────────────
// Keys
// ─────────────────────────────────────────────────────────────────

/// Logical keys accepted by `press_key`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyCode {
    Enter,
    Backspace,
    Back,
    Home,
    Lock,
    VolumeUp,
    VolumeDown,
    RemoteUp,
    RemoteDown,
    RemoteLeft,
    RemoteRight,
    RemoteCenter,
    RemotePlayPause,
    RemoteStop,
    RemoteNext,
    RemotePrevious,
    RemoteRewind,
    RemoteFastForward,
    Power,
    Escape,
    Tab,
}

impl KeyCode {
    /// Android `KEYCODE_*` value
    pub fn android_code(&self) -> u32 {
        match self {
            KeyCode::Enter => 66,
            KeyCode::Backspace => 67,
            KeyCode::Back => 4,
            KeyCode::Home => 3,
            KeyCode::Lock => 276,
            KeyCode::VolumeUp => 24,
            KeyCode::VolumeDown => 25,
            KeyCode::RemoteUp => 19,
            KeyCode::RemoteDown => 20,
            KeyCode::RemoteLeft => 21,
            KeyCode::RemoteRight => 22,
            KeyCode::RemoteCenter => 23,
            KeyCode::RemotePlayPause => 85,
            KeyCode::RemoteStop => 86,
            KeyCode::RemoteNext => 87,
            KeyCode::RemotePrevious => 88,
            KeyCode::RemoteRewind => 89,
            KeyCode::RemoteFastForward => 90,
            KeyCode::Power => 26,
            KeyCode::Escape => 111,
            KeyCode::Tab => 61,
        }
    }
}
