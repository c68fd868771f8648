//! Sub-command handlers

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use pandora_cas::model::TrackingEvent;
use pandora_cas::{
    CommandId, CommandReply, CurrentState, ListenOptions, PandoraAccount, PandoraDevice,
    StateChanges, TrackingPoint, UpdateListener,
};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::Command;

pub async fn run(account: &PandoraAccount, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Devices => {
            for device in account.devices() {
                print_json(&json!({
                    "id": device.device_id(),
                    "name": device.name(),
                    "model": device.model(),
                    "type": device.device_type(),
                    "firmware": device.firmware_version(),
                    "features": device.features().map(|f| format!("{f:?}")),
                }))?;
            }
        }
        Command::State { device } => {
            account.request_updates(None).await?;
            let devices = match device {
                Some(device_id) => vec![account.require_device(device_id)?],
                None => account.devices(),
            };
            for device in devices {
                print_json(&json!({
                    "id": device.device_id(),
                    "name": device.name(),
                    "direction": device.state().map(|s| s.direction()),
                    "state": device.state(),
                }))?;
            }
        }
        Command::Command {
            device,
            command,
            no_wait,
        } => {
            let command: CommandId = command.parse()?;
            let device = account.require_device(device)?;
            // Commands are refused until the device state is known
            account.request_updates(None).await?;
            device
                .remote_command(command, None, !no_wait)
                .await
                .with_context(|| format!("command {} failed", command.name()))?;
            info!("Command {} executed on device {}", command.name(), device.device_id());
        }
        Command::Events {
            device,
            from,
            limit,
        } => {
            for event in account.fetch_events(from, None, limit, device).await? {
                print_event(&event)?;
            }
        }
        Command::Wakeup { device } => {
            account.require_device(device)?.wake_up().await?;
            info!("Wake up request sent to device {}", device);
        }
        Command::Track { device, track } => {
            let track = account.require_device(device)?.fetch_track_data(track).await?;
            print_json(&serde_json::to_value(&track)?)?;
        }
        Command::Listen { auto_restart } => {
            let options = ListenOptions::default().with_auto_restart(auto_restart);
            tokio::select! {
                result = account.listen_for_updates(&PrintListener, &options) => result?,
                _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping listener"),
            }
        }
    }
    Ok(())
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn print_event(event: &TrackingEvent) -> anyhow::Result<()> {
    let mut value = serde_json::to_value(event)?;
    if let Value::Object(map) = &mut value {
        map.insert(
            "primary_event".to_string(),
            Value::from(format!("{:?}", event.primary_event())),
        );
    }
    print_json(&value)
}

/// Prints every push update as a JSON line
struct PrintListener;

#[async_trait]
impl UpdateListener for PrintListener {
    async fn on_state(
        &self,
        device: &Arc<PandoraDevice>,
        _state: &CurrentState,
        changes: &StateChanges,
    ) -> anyhow::Result<()> {
        print_json(&json!({"device": device.device_id(), "state": changes}))
    }

    async fn on_command(
        &self,
        device: &Arc<PandoraDevice>,
        reply: &CommandReply,
    ) -> anyhow::Result<()> {
        print_json(&json!({
            "device": device.device_id(),
            "command": reply.command_id,
            "result": reply.result,
            "reply": reply.reply,
        }))
    }

    async fn on_event(
        &self,
        _device: &Arc<PandoraDevice>,
        event: &TrackingEvent,
    ) -> anyhow::Result<()> {
        print_event(event)
    }

    async fn on_point(
        &self,
        _device: &Arc<PandoraDevice>,
        point: &TrackingPoint,
        _state: Option<&CurrentState>,
        _changes: Option<&StateChanges>,
    ) -> anyhow::Result<()> {
        print_json(&serde_json::to_value(point)?)
    }

    async fn on_settings_update(
        &self,
        device: &Arc<PandoraDevice>,
        settings: &Map<String, Value>,
    ) -> anyhow::Result<()> {
        print_json(&json!({"device": device.device_id(), "settings": settings}))
    }
}
