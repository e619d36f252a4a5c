//! Operator commands and the bus that carries them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::inventory::OriginsSnapshot;
use crate::origin::{AppId, OriginId};

const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OriginCommand {
    EnableOrigin { app_id: AppId, origin_id: OriginId },
    DisableOrigin { app_id: AppId, origin_id: OriginId },
    /// Ask every inventory to re-publish its snapshot.
    GetOriginsInventorySnapshot,
}

impl OriginCommand {
    pub fn enable(app_id: AppId, origin_id: OriginId) -> Self {
        OriginCommand::EnableOrigin { app_id, origin_id }
    }

    pub fn disable(app_id: AppId, origin_id: OriginId) -> Self {
        OriginCommand::DisableOrigin { app_id, origin_id }
    }

    /// The application a command is addressed to, if any.
    pub fn app_id(&self) -> Option<&AppId> {
        match self {
            OriginCommand::EnableOrigin { app_id, .. } | OriginCommand::DisableOrigin { app_id, .. } => Some(app_id),
            OriginCommand::GetOriginsInventorySnapshot => None,
        }
    }
}

/// Application-wide publish/subscribe channel for commands and snapshots.
#[derive(Debug, Clone)]
pub struct OriginCommandBus {
    commands: broadcast::Sender<OriginCommand>,
    snapshots: broadcast::Sender<OriginsSnapshot>,
}

impl OriginCommandBus {
    pub fn new() -> Self {
        let (commands, _) = broadcast::channel(BUS_CAPACITY);
        let (snapshots, _) = broadcast::channel(BUS_CAPACITY);
        Self { commands, snapshots }
    }

    /// Publish a command; returns how many subscribers will see it.
    pub fn publish(&self, command: OriginCommand) -> usize {
        self.commands.send(command).unwrap_or(0)
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<OriginCommand> {
        self.commands.subscribe()
    }

    pub fn post_snapshot(&self, snapshot: OriginsSnapshot) {
        let _ = self.snapshots.send(snapshot);
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<OriginsSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn command_subscribers(&self) -> usize {
        self.commands.receiver_count()
    }
}

impl Default for OriginCommandBus {
    fn default() -> Self {
        Self::new()
    }
}
