//! Update listener trait, push notification types and listening options

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::constants::DEFAULT_WS_READ_TIMEOUT_SECS;
use crate::device::PandoraDevice;
use crate::model::{CurrentState, StateChanges, TrackingEvent, TrackingPoint};

/// Command confirmation pushed by the server
#[derive(Clone, Debug, PartialEq)]
pub struct CommandReply {
    pub command_id: u32,
    /// Zero on success
    pub result: i64,
    pub reply: Value,
}

/// Trait for receiving device updates from the push channel.
///
/// Every method has a no-op default; implement the ones of interest.
/// Errors are logged by the dispatcher and never stop listening.
#[async_trait]
pub trait UpdateListener: Send + Sync {
    async fn on_state(
        &self,
        _device: &Arc<PandoraDevice>,
        _state: &CurrentState,
        _changes: &StateChanges,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_command(
        &self,
        _device: &Arc<PandoraDevice>,
        _reply: &CommandReply,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_event(
        &self,
        _device: &Arc<PandoraDevice>,
        _event: &TrackingEvent,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// `state` and `changes` are present when the point was newer than the state
    async fn on_point(
        &self,
        _device: &Arc<PandoraDevice>,
        _point: &TrackingPoint,
        _state: Option<&CurrentState>,
        _changes: Option<&StateChanges>,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_settings_update(
        &self,
        _device: &Arc<PandoraDevice>,
        _settings: &Map<String, Value>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Owned copy of a dispatched update
#[derive(Clone, Debug)]
pub enum UpdateMessage {
    State {
        device_id: u64,
        state: CurrentState,
        changes: StateChanges,
    },
    Command {
        device_id: u64,
        reply: CommandReply,
    },
    Event {
        device_id: u64,
        event: TrackingEvent,
    },
    Point {
        device_id: u64,
        point: TrackingPoint,
        state: Option<CurrentState>,
        changes: Option<StateChanges>,
    },
    Settings {
        device_id: u64,
        settings: Map<String, Value>,
    },
}

/// A listener that forwards every update into a channel.
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<UpdateMessage>,
}

impl ChannelListener {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<UpdateMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, message: UpdateMessage) -> anyhow::Result<()> {
        self.sender
            .send(message)
            .map_err(|_| anyhow::anyhow!("update receiver dropped"))
    }
}

#[async_trait]
impl UpdateListener for ChannelListener {
    async fn on_state(
        &self,
        device: &Arc<PandoraDevice>,
        state: &CurrentState,
        changes: &StateChanges,
    ) -> anyhow::Result<()> {
        self.send(UpdateMessage::State {
            device_id: device.device_id(),
            state: state.clone(),
            changes: changes.clone(),
        })
    }

    async fn on_command(
        &self,
        device: &Arc<PandoraDevice>,
        reply: &CommandReply,
    ) -> anyhow::Result<()> {
        self.send(UpdateMessage::Command {
            device_id: device.device_id(),
            reply: reply.clone(),
        })
    }

    async fn on_event(
        &self,
        device: &Arc<PandoraDevice>,
        event: &TrackingEvent,
    ) -> anyhow::Result<()> {
        self.send(UpdateMessage::Event {
            device_id: device.device_id(),
            event: event.clone(),
        })
    }

    async fn on_point(
        &self,
        device: &Arc<PandoraDevice>,
        point: &TrackingPoint,
        state: Option<&CurrentState>,
        changes: Option<&StateChanges>,
    ) -> anyhow::Result<()> {
        self.send(UpdateMessage::Point {
            device_id: device.device_id(),
            point: point.clone(),
            state: state.cloned(),
            changes: changes.cloned(),
        })
    }

    async fn on_settings_update(
        &self,
        device: &Arc<PandoraDevice>,
        settings: &Map<String, Value>,
    ) -> anyhow::Result<()> {
        self.send(UpdateMessage::Settings {
            device_id: device.device_id(),
            settings: settings.clone(),
        })
    }
}

/// What the listening loop does after a message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Continue,
    /// Reconnect to receive a fresh initial state
    Reconnect,
}

/// Options of [`crate::PandoraAccount::listen_for_updates`]
#[derive(Clone, Debug)]
pub struct ListenOptions {
    /// Reconnect after errors and closed connections instead of returning
    pub auto_restart: bool,
    /// Validate the token and re-authenticate before reconnecting
    pub auto_reauth: bool,
    /// Reconnect when a device comes online to receive its full state
    pub reconnect_on_device_online: bool,
    /// Close the connection when nothing arrives for this long
    pub read_timeout: Option<Duration>,
}

impl Default for ListenOptions {
    fn default() -> Self {
        Self {
            auto_restart: false,
            auto_reauth: true,
            reconnect_on_device_online: true,
            read_timeout: Some(Duration::from_secs(DEFAULT_WS_READ_TIMEOUT_SECS)),
        }
    }
}

impl ListenOptions {
    pub fn with_auto_restart(mut self, auto_restart: bool) -> Self {
        self.auto_restart = auto_restart;
        self
    }

    pub fn with_auto_reauth(mut self, auto_reauth: bool) -> Self {
        self.auto_reauth = auto_reauth;
        self
    }

    pub fn with_reconnect_on_device_online(mut self, reconnect: bool) -> Self {
        self.reconnect_on_device_online = reconnect;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_options_default() {
        let options = ListenOptions::default();
        assert!(!options.auto_restart);
        assert!(options.auto_reauth);
        assert!(options.reconnect_on_device_online);
        assert_eq!(options.read_timeout, Some(Duration::from_secs(180)));
    }

    #[test]
    fn test_listen_options_builder() {
        let options = ListenOptions::default()
            .with_auto_restart(true)
            .with_auto_reauth(false)
            .with_read_timeout(None);
        assert!(options.auto_restart);
        assert!(!options.auto_reauth);
        assert!(options.read_timeout.is_none());
    }
}
