//! Android device bridge
//!
//! Device discovery via `adb devices -l` and an adb-backed [`BackendClient`]
//! that drives a device through `adb shell`.

use crate::backend::{BackendClient, BackendResult, ScreenSize};
use crate::classify::BackendFailure;
use crate::gesture::GestureSequence;
use crate::permissions::PermissionAction;
use crate::ToolAvailability;
use async_trait::async_trait;
use devrig_core::prelude::*;
use devrig_core::{Device, DeviceType, KeyCode, Platform};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Default timeout for a single adb invocation
const ADB_TIMEOUT: Duration = Duration::from_secs(30);

/// Holds shorter than this are sent as `input tap`
const TAP_HOLD_THRESHOLD_MS: u64 = 500;

// ─────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────

/// List devices in the `device` state
pub async fn list_connected(tools: &ToolAvailability) -> Result<Vec<Device>> {
    let output = timeout(
        ADB_TIMEOUT,
        Command::new(tools.adb()).args(["devices", "-l"]).output(),
    )
    .await
    .map_err(|_| Error::backend_unreachable("adb devices timed out"))?
    .map_err(|e| Error::backend_unreachable(format!("Failed to run adb: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::backend_unreachable(format!(
            "adb devices failed: {}",
            stderr.trim()
        )));
    }

    Ok(parse_devices_output(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse the output of `adb devices -l`
///
/// ```text
/// List of devices attached
/// emulator-5554  device product:sdk_gphone64 model:sdk_gphone64_x86_64 device:emu64x transport_id:1
/// R58M123ABC     unauthorized usb:1-1 transport_id:2
/// ```
///
/// Only entries in the `device` state are returned.
pub fn parse_devices_output(output: &str) -> Vec<Device> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("List of devices") && !l.starts_with('*'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            if state != "device" {
                debug!("Skipping adb device {} in state {}", serial, state);
                return None;
            }

            let model = fields
                .find_map(|f| f.strip_prefix("model:"))
                .map(|m| m.replace('_', " "));

            let device_type = if serial.starts_with("emulator-") {
                DeviceType::Emulator
            } else {
                DeviceType::Real
            };

            let description = model.unwrap_or_else(|| serial.to_string());
            Some(Device::connected(
                serial,
                description,
                Platform::Android,
                device_type,
            ))
        })
        .collect()
}

/// AVD name of a running emulator (`adb -s <serial> emu avd name`)
pub async fn emulator_avd_name(tools: &ToolAvailability, serial: &str) -> Option<String> {
    let output = Command::new(tools.adb())
        .args(["-s", serial, "emu", "avd", "name"])
        .output()
        .await
        .inspect_err(|e| debug!("adb emu avd name failed for {}: {}", serial, e))
        .ok()?;

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && *l != "OK")
        .map(str::to_string)
}

// ─────────────────────────────────────────────────────────────────
// Parsers
// ─────────────────────────────────────────────────────────────────

/// Parse `wm size`, preferring an override size over the physical one
pub fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    let parse = |prefix: &str| -> Option<(u32, u32)> {
        output.lines().find_map(|line| {
            let (w, h) = line.trim().strip_prefix(prefix)?.trim().split_once('x')?;
            Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
        })
    };
    parse("Override size:").or_else(|| parse("Physical size:"))
}

/// Permissions listed under `requested permissions:` in `dumpsys package`
pub fn parse_requested_permissions(dumpsys: &str) -> Vec<String> {
    let mut permissions = Vec::new();
    let mut in_section = false;

    for line in dumpsys.lines() {
        let trimmed = line.trim();
        if trimmed == "requested permissions:" {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }
        if trimmed.is_empty() || trimmed.ends_with(':') {
            break;
        }
        let name = trimmed.split(':').next().unwrap_or(trimmed).trim();
        if !name.is_empty() && !permissions.iter().any(|p| p == name) {
            permissions.push(name.to_string());
        }
    }

    permissions
}

/// Escape text for `input text`
fn escape_input_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            ' ' => out.push_str("%s"),
            '\\' | '\'' | '"' | '&' | '<' | '>' | '|' | ';' | '(' | ')' | '$' | '`' | '*'
            | '~' | '!' | '?' | '#' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Extract the `<hierarchy>` document from `uiautomator dump /dev/tty` output
fn extract_dump(output: &str) -> Option<&str> {
    let start = output.find("<?xml").or_else(|| output.find("<hierarchy"))?;
    let end = output.rfind("</hierarchy>")? + "</hierarchy>".len();
    (start < end).then(|| &output[start..end])
}

// ─────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────

/// Backend client that drives one device through adb
#[derive(Debug, Clone)]
pub struct AdbClient {
    adb: PathBuf,
    serial: String,
    call_timeout: Duration,
}

impl AdbClient {
    pub fn new(tools: &ToolAvailability, serial: impl Into<String>) -> Self {
        Self {
            adb: tools.adb(),
            serial: serial.into(),
            call_timeout: ADB_TIMEOUT,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    async fn run(&self, args: &[&str]) -> BackendResult<Output> {
        let mut cmd = Command::new(&self.adb);
        cmd.arg("-s").arg(&self.serial).args(args);

        let output = timeout(self.call_timeout, cmd.output())
            .await
            .map_err(|_| {
                BackendFailure::deadline_exceeded(format!("adb {} timed out", args.join(" ")))
            })?
            .map_err(|e| BackendFailure::io(format!("Failed to run adb: {}", e)))?;

        if output.status.success() {
            return Ok(output);
        }

        let message = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
        .trim()
        .to_string();

        let lower = message.to_lowercase();
        if (lower.contains("not found") && lower.contains(&self.serial.to_lowercase()))
            || lower.contains("device offline")
            || lower.contains("no devices")
        {
            Err(BackendFailure::io(message))
        } else {
            Err(BackendFailure::internal(message))
        }
    }

    async fn run_stdout(&self, args: &[&str]) -> BackendResult<String> {
        let output = self.run(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl BackendClient for AdbClient {
    fn name(&self) -> String {
        format!("adb ({})", self.serial)
    }

    async fn probe(&self) -> BackendResult<()> {
        let state = self.run_stdout(&["get-state"]).await?;
        if state.trim() == "device" {
            Ok(())
        } else {
            Err(BackendFailure::unavailable(format!(
                "{} is in state {}",
                self.serial,
                state.trim()
            )))
        }
    }

    async fn quit(&self) -> BackendResult<()> {
        Ok(())
    }

    async fn screen_size(&self) -> BackendResult<ScreenSize> {
        let output = self.shell("wm size").await?;
        let (w, h) = parse_wm_size(&output).ok_or_else(|| {
            BackendFailure::internal(format!("Unexpected wm size output: {}", output.trim()))
        })?;
        Ok(ScreenSize::pixels(w, h))
    }

    async fn page_source(&self) -> BackendResult<String> {
        let output = self
            .run_stdout(&["exec-out", "uiautomator", "dump", "/dev/tty"])
            .await?;
        extract_dump(&output)
            .map(str::to_string)
            .ok_or_else(|| BackendFailure::internal("uiautomator dump returned no hierarchy"))
    }

    async fn perform(&self, gesture: &GestureSequence) -> BackendResult<()> {
        let start = gesture
            .start()
            .ok_or_else(|| BackendFailure::internal("gesture has no start point"))?;

        let command = match gesture.travel() {
            Some((end, duration)) => format!(
                "input swipe {} {} {} {} {}",
                start.x, start.y, end.x, end.y, duration
            ),
            None if gesture.hold_ms() >= TAP_HOLD_THRESHOLD_MS => format!(
                "input swipe {} {} {} {} {}",
                start.x,
                start.y,
                start.x,
                start.y,
                gesture.hold_ms()
            ),
            None => format!("input tap {} {}", start.x, start.y),
        };
        self.shell(&command).await.map(|_| ())
    }

    async fn screenshot(&self) -> BackendResult<Vec<u8>> {
        let output = self.run(&["exec-out", "screencap", "-p"]).await?;
        Ok(output.stdout)
    }

    async fn input_text(&self, text: &str) -> BackendResult<()> {
        self.shell(&format!("input text {}", escape_input_text(text)))
            .await
            .map(|_| ())
    }

    async fn press_key(&self, code: KeyCode) -> BackendResult<()> {
        self.shell(&format!("input keyevent {}", code.android_code()))
            .await
            .map(|_| ())
    }

    async fn back(&self) -> BackendResult<()> {
        self.press_key(KeyCode::Back).await
    }

    async fn shell(&self, command: &str) -> BackendResult<String> {
        trace!("adb -s {} shell {}", self.serial, command);
        self.run_stdout(&["shell", command]).await
    }

    async fn launch_app(&self, app_id: &str) -> BackendResult<()> {
        self.shell(&format!(
            "monkey -p {} -c android.intent.category.LAUNCHER 1",
            app_id
        ))
        .await
        .map(|_| ())
    }

    async fn stop_app(&self, app_id: &str) -> BackendResult<()> {
        self.shell(&format!("am force-stop {}", app_id))
            .await
            .map(|_| ())
    }

    async fn is_app_installed(&self, app_id: &str) -> BackendResult<bool> {
        match self.shell(&format!("pm path {}", app_id)).await {
            Ok(out) => Ok(out.contains("package:")),
            Err(failure) if failure.status == crate::classify::BackendStatus::Internal => {
                Ok(false)
            }
            Err(failure) => Err(failure),
        }
    }

    async fn install_app(&self, artifact: &Path) -> BackendResult<()> {
        let path = artifact.to_string_lossy();
        let out = self.run_stdout(&["install", "-r", "-g", &path]).await?;
        if out.contains("Success") {
            Ok(())
        } else {
            Err(BackendFailure::internal(format!(
                "Failed to install {}: {}",
                path,
                out.trim()
            )))
        }
    }

    async fn uninstall_app(&self, app_id: &str) -> BackendResult<()> {
        self.run(&["uninstall", app_id]).await.map(|_| ())
    }

    async fn set_permission(
        &self,
        app_id: &str,
        permission: &str,
        action: PermissionAction,
    ) -> BackendResult<()> {
        self.shell(&format!("pm {} {} {}", action.as_str(), app_id, permission))
            .await
            .map(|_| ())
    }

    async fn declared_permissions(&self, app_id: &str) -> BackendResult<Vec<String>> {
        let dumpsys = self.shell(&format!("dumpsys package {}", app_id)).await?;
        Ok(parse_requested_permissions(&dumpsys))
    }

    async fn forward_port(&self, host_port: u16, device_port: u16) -> BackendResult<()> {
        let host = format!("tcp:{}", host_port);
        let device = format!("tcp:{}", device_port);
        self.run(&["forward", &host, &device]).await.map(|_| ())
    }

    async fn remove_port_forward(&self, host_port: u16) -> BackendResult<()> {
        let host = format!("tcp:{}", host_port);
        self.run(&["forward", "--remove", &host]).await.map(|_| ())
    }
}
