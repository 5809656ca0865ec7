//! Tool availability checking for device probes
//!
//! Locates the external tools the catalog and launcher shell out to:
//! `adb` and `emulator` from the Android SDK, and `xcrun simctl` on macOS.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Cached availability of external tools
#[derive(Debug, Clone, Default)]
pub struct ToolAvailability {
    /// Path to `adb` if found
    pub adb_path: Option<PathBuf>,

    /// Whether `xcrun simctl` is available (macOS with Xcode)
    pub xcrun_simctl: bool,

    /// Path to `emulator` if found
    pub emulator_path: Option<PathBuf>,
}

impl ToolAvailability {
    /// Check tool availability (run once at startup)
    pub async fn check() -> Self {
        let adb_path = Self::find_sdk_tool("adb", "platform-tools");
        let xcrun_simctl = Self::check_xcrun_simctl().await;
        let emulator_path = Self::check_android_emulator().await;

        tracing::debug!(
            "Tool availability: adb={:?} simctl={} emulator={:?}",
            adb_path,
            xcrun_simctl,
            emulator_path
        );

        Self {
            adb_path,
            xcrun_simctl,
            emulator_path,
        }
    }

    /// `adb` command to run, falling back to a bare `adb` lookup at spawn time
    pub fn adb(&self) -> PathBuf {
        self.adb_path.clone().unwrap_or_else(|| PathBuf::from("adb"))
    }

    /// `avdmanager` from `PATH` or the SDK's command-line tools
    pub fn avdmanager(&self) -> Option<PathBuf> {
        Self::find_sdk_tool("avdmanager", "cmdline-tools/latest/bin")
            .or_else(|| Self::find_sdk_tool("avdmanager", "tools/bin"))
    }

    async fn check_xcrun_simctl() -> bool {
        #[cfg(not(target_os = "macos"))]
        return false;

        #[cfg(target_os = "macos")]
        {
            Command::new("xcrun")
                .args(["simctl", "help"])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .inspect_err(|e| tracing::debug!("xcrun simctl check failed: {}", e))
                .unwrap_or(false)
        }
    }

    async fn check_android_emulator() -> Option<PathBuf> {
        for path in Self::sdk_tool_candidates("emulator", "emulator") {
            let ok = Command::new(&path)
                .arg("-list-avds")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .inspect_err(|e| {
                    tracing::debug!("Android emulator check failed for {}: {}", path.display(), e)
                })
                .unwrap_or(false);
            if ok {
                return Some(path);
            }
        }
        None
    }

    /// First candidate that exists on disk or on `PATH`
    fn find_sdk_tool(name: &str, sdk_subdir: &str) -> Option<PathBuf> {
        Self::sdk_tool_candidates(name, sdk_subdir)
            .into_iter()
            .find_map(|candidate| {
                if candidate.is_absolute() {
                    candidate.is_file().then_some(candidate)
                } else {
                    which::which(&candidate).ok()
                }
            })
    }

    /// Candidate locations: bare name, then `$ANDROID_HOME` and `$ANDROID_SDK_ROOT`
    fn sdk_tool_candidates(name: &str, sdk_subdir: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(name)];

        for var in ["ANDROID_HOME", "ANDROID_SDK_ROOT"] {
            if let Ok(root) = std::env::var(var) {
                paths.push(PathBuf::from(root).join(sdk_subdir).join(name));
            }
        }

        paths
    }

    pub fn ios_unavailable_message(&self) -> Option<&'static str> {
        if self.xcrun_simctl {
            None
        } else {
            #[cfg(target_os = "macos")]
            {
                Some("Xcode not installed. Install Xcode to manage iOS simulators.")
            }

            #[cfg(not(target_os = "macos"))]
            {
                Some("iOS simulators are only available on macOS.")
            }
        }
    }

    pub fn android_unavailable_message(&self) -> Option<&'static str> {
        if self.adb_path.is_some() {
            None
        } else {
            Some("Android SDK not found. Set ANDROID_HOME or install Android Studio.")
        }
    }
}

/// Whether the current process runs inside Windows Subsystem for Linux
pub fn is_wsl() -> bool {
    let osrelease = std::fs::read_to_string("/proc/sys/kernel/osrelease").ok();
    let distro = std::env::var("WSL_DISTRO_NAME").ok();
    is_wsl_with_inputs(osrelease.as_deref(), distro.as_deref())
}

fn is_wsl_with_inputs(osrelease: Option<&str>, distro: Option<&str>) -> bool {
    if distro.is_some() {
        return true;
    }
    osrelease
        .map(str::to_ascii_lowercase)
        .is_some_and(|v| v.contains("microsoft") || v.contains("wsl"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_tool_availability_default() {
        let availability = ToolAvailability::default();
        assert!(availability.adb_path.is_none());
        assert!(!availability.xcrun_simctl);
        assert_eq!(availability.adb(), PathBuf::from("adb"));
    }

    #[test]
    fn test_unavailable_messages() {
        let availability = ToolAvailability::default();
        assert!(availability.ios_unavailable_message().is_some());
        assert!(availability.android_unavailable_message().is_some());
    }

    #[test]
    #[serial]
    fn test_candidates_include_sdk_env_vars() {
        std::env::set_var("ANDROID_HOME", "/test/android");
        std::env::set_var("ANDROID_SDK_ROOT", "/test/sdk");
        let paths = ToolAvailability::sdk_tool_candidates("adb", "platform-tools");
        std::env::remove_var("ANDROID_HOME");
        std::env::remove_var("ANDROID_SDK_ROOT");

        assert_eq!(paths[0], PathBuf::from("adb"));
        assert!(paths.contains(&PathBuf::from("/test/android/platform-tools/adb")));
        assert!(paths.contains(&PathBuf::from("/test/sdk/platform-tools/adb")));
    }

    #[test]
    fn test_wsl_detection() {
        assert!(is_wsl_with_inputs(None, Some("Ubuntu")));
        assert!(is_wsl_with_inputs(
            Some("5.15.90.1-microsoft-standard-WSL2"),
            None
        ));
        assert!(!is_wsl_with_inputs(Some("6.5.0-generic"), None));
        assert!(!is_wsl_with_inputs(None, None));
    }
}
