//! devrig-app - Device selection and session orchestration for devrig
//!
//! This crate resolves which device a caller drives (the [`DeviceSelector`]
//! state machine with its console prompts), shares backend connections across
//! processes through the file-backed [`SessionRegistry`], and scopes every
//! session's heartbeat and teardown in the [`SessionOrchestrator`].

pub mod config;
pub mod device_config;
pub mod orchestrator;
pub mod registry;
pub mod selector;
pub mod signals;

// Re-export primary types
pub use config::{load_settings, Settings};
pub use orchestrator::{PortLedger, SessionHandle, SessionOrchestrator};
pub use registry::{SessionRecord, SessionRegistry};
pub use selector::{
    CatalogSource, ConsoleView, DeviceSelector, DeviceSource, SelectionCriteria, SelectorState,
};

// Re-export driver types used by callers
pub use devrig_driver::{DeviceCatalog, DriverAdapter, OpenMode, SystemConnector, SystemLauncher, ToolAvailability};
