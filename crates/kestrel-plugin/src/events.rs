//! Change notifications emitted by the plugin runtime.

use kestrel_core::ResultItem;
use serde::Serialize;
use tokio::sync::broadcast;

/// Capacity of the event channel. Slow receivers see `Lagged` past this.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Something the display layer may want to react to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PluginEvent {
    /// A plugin replaced its result list via `display`.
    ResultsChanged {
        plugin: String,
        items: Vec<ResultItem>,
    },

    /// A plugin posted a notification via `notify`.
    Notification {
        plugin: String,
        title: String,
        body: Option<String>,
    },

    /// An execution instance was created.
    InstanceCreated { plugin: String },

    /// An execution instance was destroyed.
    InstanceDestroyed { plugin: String },
}

impl PluginEvent {
    /// Name of the plugin the event concerns.
    pub fn plugin(&self) -> &str {
        match self {
            Self::ResultsChanged { plugin, .. }
            | Self::Notification { plugin, .. }
            | Self::InstanceCreated { plugin }
            | Self::InstanceDestroyed { plugin } => plugin,
        }
    }
}

/// Sending half of the event channel.
pub type EventSender = broadcast::Sender<PluginEvent>;

/// Create a new event channel.
pub fn channel() -> EventSender {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

/// Send an event, ignoring the case where nobody is listening.
pub(crate) fn emit(sender: &EventSender, event: PluginEvent) {
    let _ = sender.send(event);
}
