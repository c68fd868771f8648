//! A single vehicle: cached attributes, live state, and remote commands

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::api::PandoraApi;
use crate::config::PandoraClientConfig;
use crate::error::{PandoraError, Result};
use crate::model::conv;
use crate::model::{
    CarType, CommandId, CommandParam, CurrentState, DeviceType, Features, HttpTrack,
    StateChanges, StateUpdate, TrackingEvent, TrackingPoint,
};

/// Pairs of local and UTC timestamp attributes
const TIMESTAMP_PAIRS: [(&str, &str); 2] = [
    ("online_timestamp", "online_timestamp_utc"),
    ("state_timestamp", "state_timestamp_utc"),
];

type ControlSender = oneshot::Sender<std::result::Result<(), String>>;

/// Read the device identifier from `dev_id`, falling back to `id`
pub fn parse_device_id(data: &Map<String, Value>) -> Result<u64> {
    let raw = conv::first(data, &["dev_id", "id"]).ok_or_else(|| {
        PandoraError::MalformedResponse("device ID not present".to_string())
    })?;
    match conv::uint(Some(raw)) {
        Some(id) if id != 0 => Ok(id),
        _ => Err(PandoraError::InvalidArgument(format!(
            "device ID is empty / zero: {raw}"
        ))),
    }
}

#[derive(Default)]
struct DeviceInner {
    attributes: Map<String, Value>,
    features: Option<Features>,
    system_info: Option<Map<String, Value>>,
    state: Option<CurrentState>,
    last_point: Option<TrackingPoint>,
    last_event: Option<TrackingEvent>,
    utc_offset: Option<i32>,
}

pub struct PandoraDevice {
    device_id: u64,
    api: Arc<PandoraApi>,
    account_utc_offset: i32,
    control_timeout: Duration,
    silence_update_warnings: bool,
    inner: RwLock<DeviceInner>,
    control: Mutex<Option<ControlSender>>,
}

impl PandoraDevice {
    pub fn new(
        api: Arc<PandoraApi>,
        attributes: Map<String, Value>,
        config: &PandoraClientConfig,
    ) -> Result<Self> {
        let device_id = parse_device_id(&attributes)?;
        let features = features_of(&attributes);
        Ok(Self {
            device_id,
            api,
            account_utc_offset: config.utc_offset,
            control_timeout: Duration::from_millis(config.control_timeout_ms),
            silence_update_warnings: config.silence_update_warnings,
            inner: RwLock::new(DeviceInner {
                attributes,
                features,
                ..Default::default()
            }),
            control: Mutex::new(None),
        })
    }

    pub fn device_id(&self) -> u64 {
        self.device_id
    }

    // ============================================================================
    // State management
    // ============================================================================

    /// Device UTC offset in seconds, falling back to the account offset
    pub fn utc_offset(&self) -> i32 {
        self.inner.read().utc_offset.unwrap_or(self.account_utc_offset)
    }

    pub fn set_utc_offset(&self, utc_offset: Option<i32>) {
        self.inner.write().utc_offset = utc_offset;
    }

    pub fn state(&self) -> Option<CurrentState> {
        self.inner.read().state.clone()
    }

    pub fn is_online(&self) -> bool {
        self.inner
            .read()
            .state
            .as_ref()
            .and_then(|s| s.is_online)
            .unwrap_or(false)
    }

    /// Merge an update into the device state
    ///
    /// Missing local/UTC timestamp counterparts are derived from the device
    /// UTC offset, which itself is recalculated whenever both are present.
    /// A pending command is confirmed once the command timestamp advances.
    pub fn update_state(&self, mut update: StateUpdate) -> (CurrentState, StateChanges) {
        let (state, changes, confirmed) = {
            let mut inner = self.inner.write();

            let mut utc_offset = inner.utc_offset.unwrap_or(self.account_utc_offset);
            for (local, utc) in TIMESTAMP_PAIRS {
                if let (Some(local), Some(utc)) = (update.int(local), update.int(utc)) {
                    let computed = (((local - utc) as f64 / 60.0).round() * 60.0) as i32;
                    if computed != utc_offset {
                        debug!(
                            "Calculated UTC offset for device {}: {} seconds",
                            self.device_id, computed
                        );
                        inner.utc_offset = Some(computed);
                    }
                    utc_offset = computed;
                    break;
                }
            }
            for (local, utc) in TIMESTAMP_PAIRS {
                match (update.int(local), update.int(utc)) {
                    (None, Some(value)) => {
                        update.insert(local, value + i64::from(utc_offset));
                    }
                    (Some(value), None) => {
                        update.insert(utc, value - i64::from(utc_offset));
                    }
                    _ => {}
                }
            }

            let previous_command = inner.state.as_ref().map(|s| s.command_timestamp_utc);
            let changes = match inner.state.as_mut() {
                None => {
                    debug!("Initializing state object");
                    let state = CurrentState::from_update(&update);
                    let changes = update
                        .iter()
                        .filter_map(|(name, _)| state.attribute_value(name).map(|v| (name, v)))
                        .collect();
                    inner.state = Some(state);
                    changes
                }
                Some(state) => {
                    let changes = state.apply(&update, self.silence_update_warnings);
                    if changes.is_empty() {
                        debug!("No attributes to update");
                        return (state.clone(), changes);
                    }
                    debug!("Updating state object");
                    changes
                }
            };

            let state = inner.state.clone().unwrap_or_default();
            let confirmed = match previous_command {
                None => true,
                Some(previous) => match (previous, state.command_timestamp_utc) {
                    (Some(old), Some(new)) => old < new,
                    (None, Some(_)) => true,
                    _ => false,
                },
            };
            (state, changes, confirmed)
        };

        if confirmed && self.control_busy() {
            let _ = self.release_control_lock(None);
        }
        (state, changes)
    }

    pub fn last_point(&self) -> Option<TrackingPoint> {
        self.inner.read().last_point.clone()
    }

    /// Record a point; position, fuel and speed are carried into the state
    /// when the point is newer than it
    pub fn set_last_point(&self, point: TrackingPoint) -> Result<()> {
        if point.device_id != self.device_id {
            return Err(PandoraError::InvalidArgument(
                "point does not belong to device identifier".to_string(),
            ));
        }

        let mut inner = self.inner.write();
        let silence = self.silence_update_warnings;
        if let Some(state) = inner.state.as_mut()
            && state.state_timestamp.is_none_or(|ts| ts < point.timestamp)
        {
            let mut update = StateUpdate::new();
            if let Some(fuel) = point.fuel {
                update.insert("fuel", fuel);
            }
            if let Some(speed) = point.speed {
                update.insert("speed", speed);
            }
            update.insert("latitude", point.latitude);
            update.insert("longitude", point.longitude);
            state.apply(&update, silence);
        }
        inner.last_point = Some(point);
        Ok(())
    }

    pub fn last_event(&self) -> Option<TrackingEvent> {
        self.inner.read().last_event.clone()
    }

    /// Keep the event if it is newer than the last known one
    pub fn record_event(&self, event: &TrackingEvent) {
        let mut inner = self.inner.write();
        let newer = match &inner.last_event {
            None => true,
            Some(last) => last.timestamp < event.timestamp,
        };
        if newer {
            inner.last_event = Some(event.clone());
        }
    }

    // ============================================================================
    // Remote commands
    // ============================================================================

    /// Whether a command is awaiting confirmation
    pub fn control_busy(&self) -> bool {
        self.control
            .lock()
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }

    /// Resolve the pending command, successfully or with the given error
    pub fn release_control_lock(&self, error: Option<String>) -> Result<()> {
        let sender = self.control.lock().take().ok_or_else(|| {
            PandoraError::InvalidArgument("control lock is not in effect".to_string())
        })?;
        let _ = sender.send(match error {
            None => Ok(()),
            Some(error) => Err(error),
        });
        Ok(())
    }

    /// Execute a command; with `ensure_complete` wait for the device to confirm
    pub async fn remote_command(
        &self,
        command: impl Into<u32>,
        params: Option<&Map<String, Value>>,
        ensure_complete: bool,
    ) -> Result<()> {
        let command = command.into();
        if self.inner.read().state.is_none() {
            return Err(PandoraError::StateUnavailable);
        }

        let receiver = {
            let mut control = self.control.lock();
            if control.as_ref().is_some_and(|sender| !sender.is_closed()) {
                return Err(PandoraError::DeviceBusy(self.device_id));
            }
            if ensure_complete {
                let (sender, receiver) = oneshot::channel();
                *control = Some(sender);
                Some(receiver)
            } else {
                None
            }
        };

        if let Err(e) = self.api.remote_command(self.device_id, command, params).await {
            if receiver.is_some() {
                self.control.lock().take();
            }
            return Err(e);
        }

        if let Some(receiver) = receiver {
            debug!(
                "Ensuring command {} completion (timeout: {:?})",
                command, self.control_timeout
            );
            match tokio::time::timeout(self.control_timeout, receiver).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(reply))) => return Err(PandoraError::CommandFailed(reply)),
                Ok(Err(_)) => {
                    return Err(PandoraError::CommandFailed(
                        "confirmation was abandoned".to_string(),
                    ));
                }
                Err(_) => {
                    self.control.lock().take();
                    return Err(PandoraError::CommandTimeout(command));
                }
            }
        }

        debug!("Command {} executed successfully", command);
        Ok(())
    }

    pub async fn remote_lock(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::Lock, None, ensure_complete).await
    }

    pub async fn remote_unlock(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::Unlock, None, ensure_complete).await
    }

    pub async fn remote_start_engine(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::StartEngine, None, ensure_complete)
            .await
    }

    pub async fn remote_stop_engine(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::StopEngine, None, ensure_complete)
            .await
    }

    pub async fn remote_enable_tracking(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::EnableTracking, None, ensure_complete)
            .await
    }

    pub async fn remote_disable_tracking(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::DisableTracking, None, ensure_complete)
            .await
    }

    pub async fn enable_active_security(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::EnableActiveSecurity, None, ensure_complete)
            .await
    }

    pub async fn disable_active_security(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::DisableActiveSecurity, None, ensure_complete)
            .await
    }

    pub async fn remote_turn_on_block_heater(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::TurnOnBlockHeater, None, ensure_complete)
            .await
    }

    pub async fn remote_turn_off_block_heater(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::TurnOffBlockHeater, None, ensure_complete)
            .await
    }

    pub async fn remote_turn_on_ext_channel(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::TurnOnExtChannel, None, ensure_complete)
            .await
    }

    pub async fn remote_turn_off_ext_channel(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::TurnOffExtChannel, None, ensure_complete)
            .await
    }

    pub async fn remote_enable_service_mode(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::EnableServiceMode, None, ensure_complete)
            .await
    }

    pub async fn remote_disable_service_mode(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::DisableServiceMode, None, ensure_complete)
            .await
    }

    pub async fn remote_trigger_horn(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::TriggerHorn, None, ensure_complete)
            .await
    }

    pub async fn remote_trigger_light(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::TriggerLight, None, ensure_complete)
            .await
    }

    pub async fn remote_trigger_trunk(&self, ensure_complete: bool) -> Result<()> {
        self.remote_command(CommandId::TriggerTrunk, None, ensure_complete)
            .await
    }

    /// Set the cabin temperature on climate-capable vehicles
    pub async fn remote_set_climate_temperature(
        &self,
        temperature: i64,
        ensure_complete: bool,
    ) -> Result<()> {
        let mut params = Map::new();
        params.insert(CommandParam::ClimateTemp.as_str().to_string(), temperature.into());
        self.remote_command(CommandId::ClimateSetTemperature, Some(&params), ensure_complete)
            .await
    }

    pub async fn wake_up(&self) -> Result<()> {
        self.api.wake_up_device(self.device_id).await
    }

    // ============================================================================
    // Remote data
    // ============================================================================

    pub async fn fetch_events(
        &self,
        from: i64,
        to: Option<i64>,
        limit: u32,
    ) -> Result<Vec<TrackingEvent>> {
        self.api
            .fetch_events(from, to, limit, Some(self.device_id))
            .await
    }

    pub async fn fetch_last_event(&self) -> Result<Option<TrackingEvent>> {
        Ok(self.fetch_events(0, None, 1).await?.into_iter().next())
    }

    pub async fn fetch_track_data(&self, track_id: u64) -> Result<HttpTrack> {
        self.api
            .fetch_track_data(self.device_id, track_id, None)
            .await
    }

    pub async fn fetch_settings(&self) -> Result<Map<String, Value>> {
        self.api.fetch_device_settings(self.device_id).await
    }

    /// Refresh and return system information (VIN, IMEI, firmware)
    pub async fn update_system_info(&self) -> Result<Map<String, Value>> {
        let info = self.api.fetch_device_system(self.device_id).await?;
        self.inner.write().system_info = Some(info.clone());
        Ok(info)
    }

    fn position(&self) -> Result<(f64, f64)> {
        let inner = self.inner.read();
        let state = inner.state.as_ref().ok_or(PandoraError::StateUnavailable)?;
        match (state.latitude, state.longitude) {
            (Some(lat), Some(lon)) => Ok((lat, lon)),
            _ => Err(PandoraError::InvalidArgument(
                "both latitude and longitude are required".to_string(),
            )),
        }
    }

    /// Short address of the current position
    pub async fn geocode(&self, language: Option<&str>) -> Result<Option<String>> {
        let (lat, lon) = self.position()?;
        self.api.geocode_short(lat, lon, language).await
    }

    pub async fn geocode_full(&self, language: Option<&str>) -> Result<Map<String, Value>> {
        let (lat, lon) = self.position()?;
        self.api.geocode(lat, lon, language).await
    }

    // ============================================================================
    // Attributes
    // ============================================================================

    pub fn attributes(&self) -> Map<String, Value> {
        self.inner.read().attributes.clone()
    }

    /// Replace attributes with a newer descriptor of the same device
    pub fn set_attributes(&self, attributes: Map<String, Value>) -> Result<()> {
        if parse_device_id(&attributes)? != self.device_id {
            return Err(PandoraError::InvalidArgument(
                "device IDs must match".to_string(),
            ));
        }
        let mut inner = self.inner.write();
        inner.features = features_of(&attributes);
        inner.attributes = attributes;
        Ok(())
    }

    pub fn system_info(&self) -> Option<Map<String, Value>> {
        self.inner.read().system_info.clone()
    }

    pub fn set_system_info(&self, system_info: Option<Map<String, Value>>) {
        self.inner.write().system_info = system_info;
    }

    pub fn features(&self) -> Option<Features> {
        self.inner.read().features
    }

    fn attribute_text(&self, key: &str) -> Option<String> {
        conv::text(self.inner.read().attributes.get(key))
    }

    fn system_text(&self, key: &str) -> Option<String> {
        let inner = self.inner.read();
        conv::text(inner.system_info.as_ref().and_then(|info| info.get(key)))
    }

    /// Raw device type string (`alarm`, `nav8`, ...)
    pub fn device_type(&self) -> Option<String> {
        self.attribute_text("type")
    }

    pub fn device_kind(&self) -> Option<DeviceType> {
        self.device_type().and_then(|t| t.parse().ok())
    }

    pub fn name(&self) -> Option<String> {
        self.attribute_text("name")
    }

    pub fn model(&self) -> Option<String> {
        self.attribute_text("model")
    }

    pub fn firmware_version(&self) -> Option<String> {
        self.attribute_text("firmware").max(self.system_text("firmware"))
    }

    pub fn voice_version(&self) -> Option<String> {
        self.attribute_text("voice_version")
            .max(self.system_text("voice"))
    }

    pub fn phone(&self) -> Option<String> {
        self.attribute_text("phone").max(self.system_text("phone"))
    }

    pub fn phone_other(&self) -> Option<String> {
        self.attribute_text("phone1").max(self.system_text("phone1"))
    }

    pub fn color(&self) -> Option<String> {
        self.attribute_text("color")
    }

    pub fn car_type_id(&self) -> Option<i64> {
        conv::int(self.inner.read().attributes.get("car_type"))
    }

    pub fn car_type(&self) -> Option<CarType> {
        self.car_type_id().map(CarType::from_id)
    }

    pub fn photo_id(&self) -> Option<String> {
        self.attribute_text("photo")
    }

    /// Avatar path relative to the API host
    pub fn photo_url(&self) -> Option<String> {
        self.photo_id().map(|id| format!("/images/avatars/{id}.jpg"))
    }

    pub fn vin(&self) -> Option<String> {
        self.system_text("vin")
    }

    pub fn imei(&self) -> Option<String> {
        self.system_text("imei")
    }

    /// Time of the last settings change, from system information
    pub fn settings_timestamp(&self) -> Option<i64> {
        let raw = self.system_text("dtime")?;
        if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
            return Some(parsed.timestamp());
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(&raw, format).ok())
            .and_then(|naive| Local.from_local_datetime(&naive).earliest())
            .map(|local| local.timestamp())
            .or_else(|| {
                warn!("Unrecognized settings timestamp format: {}", raw);
                None
            })
    }
}

impl fmt::Display for PandoraDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PandoraDevice[id={}, name=\"{}\", features={:?}]",
            self.device_id,
            self.name().unwrap_or_default(),
            self.features()
        )
    }
}

fn features_of(attributes: &Map<String, Value>) -> Option<Features> {
    match attributes.get("features") {
        Some(Value::Object(map)) => Features::from_map(map),
        _ => None,
    }
}
