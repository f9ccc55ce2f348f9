//! Capability registry: which devices are connected and what they can do.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{mapping::ActuatorKind, script::Channel};

/// Opaque identifier assigned by the transport, stable while connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actuator {
    pub index: u32,
    pub kind: ActuatorKind,
    /// Number of discrete levels above zero. Zero means "use the kind default".
    #[serde(default)]
    pub steps: u32,
}

impl Actuator {
    pub fn new(index: u32, kind: ActuatorKind, steps: u32) -> Self {
        Self { index, kind, steps }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub actuators: Vec<Actuator>,
    /// Shortest gap the device tolerates between commands to one actuator.
    #[serde(default)]
    pub min_command_interval: Option<Duration>,
}

impl Device {
    pub fn new(id: DeviceId, name: impl Into<String>, actuators: Vec<Actuator>) -> Self {
        Self {
            id,
            name: name.into(),
            actuators,
            min_command_interval: None,
        }
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_command_interval = Some(interval);
        self
    }

    pub fn actuator(&self, index: u32) -> Option<&Actuator> {
        self.actuators.iter().find(|actuator| actuator.index == index)
    }
}

/// One resolved (device, actuator) target for a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub device: DeviceId,
    pub actuator: u32,
    pub kind: ActuatorKind,
    pub steps: u32,
    pub min_interval: Option<Duration>,
}

/// Connected devices keyed by identifier.
///
/// Entries are replaced wholesale on reconnect and every change bumps the
/// generation so cached bindings can be invalidated.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    devices: BTreeMap<DeviceId, Arc<Device>>,
    generation: u64,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device, replacing any previous entry with the same id.
    pub fn on_connect(&mut self, device: Device) {
        tracing::info!(
            device = %device.id,
            name = %device.name,
            actuators = device.actuators.len(),
            "device connected"
        );
        self.devices.insert(device.id, Arc::new(device));
        self.generation += 1;
    }

    /// Removes a device. Returns it if it was known.
    pub fn on_disconnect(&mut self, id: DeviceId) -> Option<Arc<Device>> {
        let removed = self.devices.remove(&id);
        if removed.is_some() {
            tracing::info!(device = %id, "device disconnected");
            self.generation += 1;
        } else {
            tracing::debug!(device = %id, "disconnect for unknown device ignored");
        }
        removed
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn device(&self, id: DeviceId) -> Option<&Arc<Device>> {
        self.devices.get(&id)
    }

    pub fn devices(&self) -> impl Iterator<Item = &Arc<Device>> {
        self.devices.values()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Every actuator on every device whose kind matches the channel,
    /// ordered by device id then actuator index.
    pub fn resolve_binding(&self, channel: &Channel) -> Vec<Binding> {
        self.resolve_kind(channel.kind())
    }

    pub fn resolve_kind(&self, kind: ActuatorKind) -> Vec<Binding> {
        let mut bindings = Vec::new();
        for device in self.devices.values() {
            let mut matching: Vec<&Actuator> = device
                .actuators
                .iter()
                .filter(|actuator| actuator.kind == kind)
                .collect();
            matching.sort_by_key(|actuator| actuator.index);

            bindings.extend(matching.into_iter().map(|actuator| Binding {
                device: device.id,
                actuator: actuator.index,
                kind,
                steps: actuator.steps,
                min_interval: device.min_command_interval,
            }));
        }
        bindings
    }
}
