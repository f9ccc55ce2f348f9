use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    registry::DeviceId,
    transport::{CommandIntent, CommandTransport, DeliveryFailure},
};

/// Options for the in-memory recording transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSettings {
    /// Accept whole batches per tick instead of single intents.
    pub batching: bool,
    /// Stop keeping intents after this many. `None` keeps everything.
    pub capacity: Option<usize>,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            batching: true,
            capacity: None,
        }
    }
}

/// Transport that keeps every accepted intent in memory instead of talking
/// to hardware. Used for previews, dry runs, and tests.
///
/// Devices can be marked as failing to exercise the retry path.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    settings: RecordingSettings,
    intents: Vec<CommandIntent>,
    batches: Vec<usize>,
    failing: HashMap<DeviceId, String>,
    rejected: usize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::with_settings(RecordingSettings::default())
    }

    /// A recorder that only accepts one intent per call.
    pub fn unbatched() -> Self {
        Self::with_settings(RecordingSettings {
            batching: false,
            ..Default::default()
        })
    }

    pub fn with_settings(settings: RecordingSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// Rejects every later command for `device` with `reason`.
    pub fn fail_device(&mut self, device: DeviceId, reason: impl Into<String>) {
        self.failing.insert(device, reason.into());
    }

    pub fn recover_device(&mut self, device: DeviceId) {
        self.failing.remove(&device);
    }

    /// All accepted intents in delivery order.
    pub fn intents(&self) -> &[CommandIntent] {
        &self.intents
    }

    /// Accepted intents addressed to one actuator.
    pub fn intents_for(&self, device: DeviceId, actuator: u32) -> Vec<&CommandIntent> {
        self.intents
            .iter()
            .filter(|intent| intent.device == device && intent.actuator == actuator)
            .collect()
    }

    /// Sizes of the batches received through `send_batch`.
    pub fn batches(&self) -> &[usize] {
        &self.batches
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn clear(&mut self) {
        self.intents.clear();
        self.batches.clear();
        self.rejected = 0;
    }

    fn record(&mut self, intent: &CommandIntent) {
        if self
            .settings
            .capacity
            .map_or(true, |capacity| self.intents.len() < capacity)
        {
            self.intents.push(intent.clone());
        }
    }
}

impl CommandTransport for RecordingTransport {
    fn send(&mut self, intent: &CommandIntent) -> Result<(), DeliveryFailure> {
        if let Some(reason) = self.failing.get(&intent.device) {
            self.rejected += 1;
            return Err(DeliveryFailure::for_intent(intent, reason.clone()));
        }
        self.record(intent);
        Ok(())
    }

    fn send_batch(&mut self, batch: &[CommandIntent]) -> Vec<DeliveryFailure> {
        self.batches.push(batch.len());
        batch
            .iter()
            .filter_map(|intent| self.send(intent).err())
            .collect()
    }

    fn supports_batching(&self) -> bool {
        self.settings.batching
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mapping::ActuatorKind;

    fn intent(device: u32) -> CommandIntent {
        CommandIntent {
            device: DeviceId(device),
            actuator: 0,
            kind: ActuatorKind::Vibrate,
            value: 1.0,
            level: 20,
            timestamp: Duration::ZERO,
            playback_time: 0.0,
        }
    }

    #[test]
    fn records_batches_and_failures() {
        let mut transport = RecordingTransport::new();
        transport.fail_device(DeviceId(2), "unplugged");

        let failures = transport.send_batch(&[intent(1), intent(2)]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].reason, "unplugged");
        assert_eq!(transport.batches(), &[2]);
        assert_eq!(transport.intents().len(), 1);
        assert_eq!(transport.rejected(), 1);

        transport.recover_device(DeviceId(2));
        assert!(transport.send(&intent(2)).is_ok());
        assert_eq!(transport.intents_for(DeviceId(2), 0).len(), 1);
    }

    #[test]
    fn capacity_bounds_memory() {
        let mut transport = RecordingTransport::with_settings(RecordingSettings {
            batching: true,
            capacity: Some(1),
        });
        transport.send_batch(&[intent(1), intent(1)]);
        assert_eq!(transport.intents().len(), 1);

        transport.clear();
        assert!(transport.intents().is_empty());
        assert!(transport.batches().is_empty());
    }
}
