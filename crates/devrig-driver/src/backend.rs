//! Backend client boundary
//!
//! A [`BackendClient`] is the transport to one device: an adb bridge, a
//! device-control service, an automation-hub session or a browser driver.
//! Driver adapters own exactly one client and never look at its wire format
//! except for the raw page source they normalize.

use crate::classify::BackendFailure;
use crate::gesture::GestureSequence;
use crate::permissions::PermissionAction;
use async_trait::async_trait;
use devrig_core::{Device, KeyCode};
use std::path::Path;
use std::sync::Arc;

pub type BackendResult<T> = std::result::Result<T, BackendFailure>;

/// Screen dimensions as reported by a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenSize {
    pub width_pixels: u32,
    pub height_pixels: u32,
    pub width_grid: u32,
    pub height_grid: u32,
}

impl ScreenSize {
    /// Backends whose gesture grid is the pixel grid
    pub fn pixels(width: u32, height: u32) -> Self {
        Self {
            width_pixels: width,
            height_pixels: height,
            width_grid: width,
            height_grid: height,
        }
    }
}

fn unimplemented<T>(operation: &str) -> BackendResult<T> {
    Err(BackendFailure::unimplemented(format!(
        "{} is not implemented by this backend",
        operation
    )))
}

/// Transport-level operations a driver adapter issues
///
/// Required methods are the ones every backend supports. The rest default to
/// an `Unimplemented` failure, which adapters surface as
/// `UnsupportedOperation`.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Name used in logs and error messages
    fn name(&self) -> String;

    /// Single connectivity check; `Ok` once the driver answers
    async fn probe(&self) -> BackendResult<()>;

    /// Release the backend session
    async fn quit(&self) -> BackendResult<()>;

    async fn screen_size(&self) -> BackendResult<ScreenSize>;

    /// Raw UI tree snapshot in the backend's own XML dialect
    async fn page_source(&self) -> BackendResult<String>;

    /// Perform a gesture, returning once the backend acknowledged it
    async fn perform(&self, gesture: &GestureSequence) -> BackendResult<()>;

    async fn screenshot(&self) -> BackendResult<Vec<u8>>;

    async fn input_text(&self, text: &str) -> BackendResult<()>;

    async fn press_key(&self, _code: KeyCode) -> BackendResult<()> {
        unimplemented("pressKey")
    }

    async fn back(&self) -> BackendResult<()> {
        unimplemented("backPress")
    }

    async fn shell(&self, _command: &str) -> BackendResult<String> {
        unimplemented("shell")
    }

    async fn launch_app(&self, _app_id: &str) -> BackendResult<()> {
        unimplemented("launchApp")
    }

    async fn stop_app(&self, _app_id: &str) -> BackendResult<()> {
        unimplemented("stopApp")
    }

    async fn is_app_installed(&self, _app_id: &str) -> BackendResult<bool> {
        unimplemented("isAppInstalled")
    }

    async fn install_app(&self, _artifact: &Path) -> BackendResult<()> {
        unimplemented("installApp")
    }

    async fn uninstall_app(&self, _app_id: &str) -> BackendResult<()> {
        unimplemented("uninstallApp")
    }

    async fn set_permission(
        &self,
        _app_id: &str,
        _permission: &str,
        _action: PermissionAction,
    ) -> BackendResult<()> {
        unimplemented("setPermission")
    }

    /// Permissions declared by the app's manifest
    async fn declared_permissions(&self, _app_id: &str) -> BackendResult<Vec<String>> {
        unimplemented("declaredPermissions")
    }

    async fn forward_port(&self, _host_port: u16, _device_port: u16) -> BackendResult<()> {
        unimplemented("forwardPort")
    }

    async fn remove_port_forward(&self, _host_port: u16) -> BackendResult<()> {
        unimplemented("removePortForward")
    }
}

/// Creates the backend client for a selected device
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn connect(&self, device: &Device) -> devrig_core::Result<Arc<dyn BackendClient>>;
}
