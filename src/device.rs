//! Device model and specification lookup boundary
//!
//! Devices form a two-level hierarchy: a top-level device has no parent,
//! a sub-device references exactly one top-level parent. Deeper nesting
//! is not modeled.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reference to a sub-device's top-level parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentRef {
    pub uuid: String,
}

/// A device known to the controller
///
/// `ctl_id` is the numeric controller-assigned identifier used to derive
/// the synthesized network address for ATTACH handling. `device_id` keys
/// a sub-device within its parent and is unused for top-level devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub uuid: String,
    pub device_id: String,
    pub ctl_id: u32,
    pub parent: Option<ParentRef>,
}

impl Device {
    pub fn top_level(uuid: impl Into<String>, ctl_id: u32) -> Self {
        Self {
            uuid: uuid.into(),
            device_id: String::new(),
            ctl_id,
            parent: None,
        }
    }

    pub fn sub_device(
        uuid: impl Into<String>,
        device_id: impl Into<String>,
        ctl_id: u32,
        parent_uuid: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            device_id: device_id.into(),
            ctl_id,
            parent: Some(ParentRef {
                uuid: parent_uuid.into(),
            }),
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }
}

/// Resolved device specification
///
/// `address` is left empty by the resolver and injected by the router
/// when an ATTACH command is dispatched. Everything else is opaque to
/// the controller and passed through to the request handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DeviceSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("No specification found for device: {0}")]
    NotFound(String),
}

/// Lookup boundary for device specifications
///
/// The controller does not validate specifications beyond what the
/// resolver returns.
pub trait SpecResolver: Send + Sync {
    fn resolve(&self, device: &Device) -> Result<DeviceSpec, SpecError>;
}

/// In-memory resolver keyed by device uuid
#[derive(Debug, Default)]
pub struct StaticSpecResolver {
    specs: HashMap<String, DeviceSpec>,
}

impl StaticSpecResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uuid: impl Into<String>, spec: DeviceSpec) {
        self.specs.insert(uuid.into(), spec);
    }
}

impl SpecResolver for StaticSpecResolver {
    fn resolve(&self, device: &Device) -> Result<DeviceSpec, SpecError> {
        self.specs
            .get(&device.uuid)
            .cloned()
            .ok_or_else(|| SpecError::NotFound(device.uuid.clone()))
    }
}
