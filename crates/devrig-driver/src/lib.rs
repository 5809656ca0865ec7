//! # devrig-driver - Device Catalog and Driver Adapters
//!
//! Everything that talks to devices: platform probes, the backend client
//! boundary, and the [`DriverAdapter`] that gives every backend the same
//! device-control contract.
//!
//! ## Public API
//!
//! ### Catalog (`catalog`, `launcher`)
//! - [`DeviceCatalog`] - Connected and launchable devices across [`DeviceProbe`]s
//! - [`DeviceLauncher`] / [`SystemLauncher`] - Boot AVDs and simulators
//!
//! ### Backends (`backend`, `adb`, `connector`, `hub`)
//! - [`BackendClient`] - Transport operations an adapter issues
//! - [`BackendConnector`] - Creates a client for a selected device
//! - [`AdbClient`] - adb-backed client for Android devices
//! - [`HubCapabilities`] - Automation-hub device list and session capabilities
//!
//! ### Adapter (`adapter`) and its building blocks
//! - [`DriverAdapter`] - Uniform gestures, hierarchy capture, permissions, settle polling
//! - [`normalizer`] - Backend UI trees to the canonical tree
//! - [`gesture`] - Grid-relative gestures as pointer-action sequences
//! - [`permissions`] - Capability names to backend permission ids
//! - [`classify`] - Backend failures to the error taxonomy

pub mod adapter;
pub mod adb;
pub mod avds;
pub mod backend;
pub mod catalog;
pub mod classify;
pub mod connector;
pub mod gesture;
pub mod hub;
pub mod launcher;
pub mod normalizer;
pub mod permissions;
pub mod settle;
pub mod simulators;
pub mod tool_availability;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use adapter::{AdapterKind, DriverAdapter, DriverOptions, OpenMode};
pub use adb::AdbClient;
pub use backend::{BackendClient, BackendConnector, BackendResult, ScreenSize};
pub use catalog::{DeviceCatalog, DeviceProbe};
pub use classify::{classify, BackendFailure, BackendStatus, Classification};
pub use connector::SystemConnector;
pub use gesture::{GestureSequence, GestureSynthesizer, PointerAction};
pub use hub::HubCapabilities;
pub use launcher::{DeviceLauncher, SystemLauncher};
pub use permissions::{PermissionAction, PermissionPlan};
pub use tool_availability::{is_wsl, ToolAvailability};
