//! In-process command dispatch: admin-issued probe commands fan out to
//! the probe's long-poll subscriber through a per-probe broadcast
//! channel. Which command names exist is the device side's concern; the
//! liveness gate has already run by the time a command reaches the bus.

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 16;

pub struct CommandBus {
    channels: DashMap<Uuid, broadcast::Sender<String>>,
}

impl CommandBus {
    pub fn new() -> CommandBus {
        CommandBus {
            channels: DashMap::new(),
        }
    }

    fn sender(&self, probe: Uuid) -> broadcast::Sender<String> {
        self.channels
            .entry(probe)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Dispatch a command; returns how many pollers received it.
    pub fn publish(&self, probe: Uuid, command: &str) -> usize {
        match self.sender(probe).send(command.to_string()) {
            Ok(receivers) => receivers,
            Err(_) => 0,
        }
    }

    /// Subscribe for the next command aimed at a probe.
    pub fn subscribe(&self, probe: Uuid) -> broadcast::Receiver<String> {
        self.sender(probe).subscribe()
    }
}

impl Default for CommandBus {
    fn default() -> Self {
        CommandBus::new()
    }
}
