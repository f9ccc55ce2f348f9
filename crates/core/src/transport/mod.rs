//! Boundary with the device transport layer.
//!
//! Outbound, the engine hands [`CommandIntent`]s to a [`CommandTransport`].
//! Inbound, the transport reports device lifecycle changes through a
//! [`DeviceEventSender`], which may live on another thread. Events are queued
//! and applied by the session at the start of the next tick.

use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::{
    mapping::ActuatorKind,
    registry::{Device, DeviceId},
};

/// One scheduled instruction to set an actuator's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandIntent {
    pub device: DeviceId,
    pub actuator: u32,
    pub kind: ActuatorKind,
    /// Quantized value normalized to `[0, 1]`.
    pub value: f64,
    /// Discrete step matching `value`.
    pub level: u32,
    /// Session wall time of the tick that produced the intent.
    pub timestamp: Duration,
    /// Script position the value was sampled at.
    pub playback_time: f64,
}

impl CommandIntent {
    pub fn is_neutral(&self) -> bool {
        self.level == 0 && self.value == 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("delivery to {device} actuator {actuator} failed: {reason}")]
pub struct DeliveryFailure {
    pub device: DeviceId,
    pub actuator: u32,
    pub reason: String,
}

impl DeliveryFailure {
    pub fn new(device: DeviceId, actuator: u32, reason: impl Into<String>) -> Self {
        Self {
            device,
            actuator,
            reason: reason.into(),
        }
    }

    pub fn for_intent(intent: &CommandIntent, reason: impl Into<String>) -> Self {
        Self::new(intent.device, intent.actuator, reason)
    }
}

/// Sink for outbound commands. Calls must not block; delivery is best-effort.
pub trait CommandTransport {
    /// Sends a single intent. Failures known immediately are returned.
    fn send(&mut self, intent: &CommandIntent) -> Result<(), DeliveryFailure>;

    /// Sends a whole tick's worth of intents.
    fn send_batch(&mut self, batch: &[CommandIntent]) -> Vec<DeliveryFailure> {
        batch
            .iter()
            .filter_map(|intent| self.send(intent).err())
            .collect()
    }

    /// Whether `send_batch` is cheaper than repeated `send` calls.
    fn supports_batching(&self) -> bool {
        false
    }
}

impl<T: CommandTransport + ?Sized> CommandTransport for Box<T> {
    fn send(&mut self, intent: &CommandIntent) -> Result<(), DeliveryFailure> {
        (**self).send(intent)
    }

    fn send_batch(&mut self, batch: &[CommandIntent]) -> Vec<DeliveryFailure> {
        (**self).send_batch(batch)
    }

    fn supports_batching(&self) -> bool {
        (**self).supports_batching()
    }
}

/// Lifecycle notifications coming from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Connected(Device),
    Disconnected(DeviceId),
    DeliveryFailed(DeliveryFailure),
}

/// Queue of inbound [`DeviceEvent`]s owned by the session.
#[derive(Debug)]
pub struct DeviceEventQueue {
    sender: Sender<DeviceEvent>,
    receiver: Receiver<DeviceEvent>,
}

impl Default for DeviceEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceEventQueue {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    /// Handle the transport uses to report events.
    pub fn sender(&self) -> DeviceEventSender {
        DeviceEventSender {
            sender: self.sender.clone(),
        }
    }

    /// Takes every queued event in arrival order without blocking.
    pub fn drain(&self) -> Vec<DeviceEvent> {
        self.receiver.try_iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

/// Cloneable producer side of a [`DeviceEventQueue`].
#[derive(Debug, Clone)]
pub struct DeviceEventSender {
    sender: Sender<DeviceEvent>,
}

impl DeviceEventSender {
    /// Queues an event. Returns `false` once the session is gone.
    pub fn send(&self, event: DeviceEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn device_connected(&self, device: Device) -> bool {
        self.send(DeviceEvent::Connected(device))
    }

    pub fn device_disconnected(&self, id: DeviceId) -> bool {
        self.send(DeviceEvent::Disconnected(id))
    }

    pub fn command_delivery_failed(
        &self,
        device: DeviceId,
        actuator: u32,
        reason: impl Into<String>,
    ) -> bool {
        self.send(DeviceEvent::DeliveryFailed(DeliveryFailure::new(
            device, actuator, reason,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting {
        sent: usize,
    }

    impl CommandTransport for Counting {
        fn send(&mut self, intent: &CommandIntent) -> Result<(), DeliveryFailure> {
            self.sent += 1;
            if intent.actuator == 1 {
                Err(DeliveryFailure::for_intent(intent, "busy"))
            } else {
                Ok(())
            }
        }
    }

    fn intent(actuator: u32) -> CommandIntent {
        CommandIntent {
            device: DeviceId(7),
            actuator,
            kind: ActuatorKind::Vibrate,
            value: 0.5,
            level: 10,
            timestamp: Duration::ZERO,
            playback_time: 0.0,
        }
    }

    #[test]
    fn default_batch_falls_back_to_single_sends() {
        let mut transport = Counting { sent: 0 };
        let failures = transport.send_batch(&[intent(0), intent(1), intent(2)]);
        assert_eq!(transport.sent, 3);
        assert_eq!(failures, vec![DeliveryFailure::new(DeviceId(7), 1, "busy")]);
        assert!(!transport.supports_batching());
    }

    #[test]
    fn queue_preserves_arrival_order() {
        let queue = DeviceEventQueue::new();
        let sender = queue.sender();
        let device = Device::new(DeviceId(1), "toy", Vec::new());

        assert!(sender.device_connected(device.clone()));
        assert!(sender.device_disconnected(DeviceId(1)));

        let drained = queue.drain();
        assert_eq!(
            drained,
            vec![
                DeviceEvent::Connected(device),
                DeviceEvent::Disconnected(DeviceId(1))
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn sender_works_across_threads() {
        let queue = DeviceEventQueue::new();
        let sender = queue.sender();
        std::thread::spawn(move || {
            sender.command_delivery_failed(DeviceId(3), 0, "gatt write rejected");
        })
        .join()
        .unwrap();

        assert!(matches!(
            queue.drain().as_slice(),
            [DeviceEvent::DeliveryFailed(failure)] if failure.device == DeviceId(3)
        ));
    }

    #[test]
    fn sender_reports_closed_queue() {
        let queue = DeviceEventQueue::new();
        let sender = queue.sender();
        drop(queue);
        assert!(!sender.device_disconnected(DeviceId(1)));
    }
}
