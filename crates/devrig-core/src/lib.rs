//! # devrig-core - Core Domain Types
//!
//! Foundation crate for devrig. Provides the device model, the canonical UI
//! tree, error handling and logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, regex, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Platform`] - Android, iOS, Web or an automation hub
//! - [`Device`] - A catalog entry with [`ConnectionState`] and [`DeviceType`]
//! - [`DeviceInfo`] - Pixel and grid dimensions of a driven device
//! - [`Point`], [`SwipeDirection`], [`KeyCode`] - Gesture and input primitives
//!
//! ### Canonical Tree (`tree`)
//! - [`TreeNode`] - Backend-independent UI element
//! - [`ViewHierarchy`] - Root node plus rotation
//! - [`Bounds`] - `[x1,y1][x2,y2]` rectangle
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error taxonomy with `transient` vs `fatal` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use devrig_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod tree;
pub mod types;

/// Prelude for common imports used throughout all devrig crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, Result, ResultExt};
pub use tree::{canonical, Bounds, TreeNode, ViewHierarchy, KEYBOARD_RESOURCE_PREFIX};
pub use types::{
    ConnectionState, Device, DeviceInfo, DeviceType, KeyCode, Platform, Point, SwipeDirection,
    BROWSER_DEVICE_ID,
};
