//! Backend connector for the host's own tooling
//!
//! Android devices are driven through adb. The device-control, hub and
//! browser transports are supplied by the embedding application as their own
//! [`BackendConnector`]s.

use crate::adb::AdbClient;
use crate::backend::{BackendClient, BackendConnector};
use crate::ToolAvailability;
use async_trait::async_trait;
use devrig_core::prelude::*;
use devrig_core::{Device, Platform};
use std::sync::Arc;

pub struct SystemConnector {
    tools: ToolAvailability,
}

impl SystemConnector {
    pub fn new(tools: ToolAvailability) -> Self {
        Self { tools }
    }
}

#[async_trait]
impl BackendConnector for SystemConnector {
    async fn connect(&self, device: &Device) -> Result<Arc<dyn BackendClient>> {
        match device.platform {
            Platform::Android => {
                debug!("Connecting to {} over adb", device.instance_id);
                Ok(Arc::new(AdbClient::new(&self.tools, &device.instance_id)))
            }
            other => Err(Error::unsupported(
                "connect",
                format!("{} (no transport configured)", other.description()),
            )),
        }
    }
}
