//! Account: authentication, device registry, update polling and push dispatch

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{Local, TimeZone, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::api::{Credentials, PandoraApi};
use crate::config::PandoraClientConfig;
use crate::constants::WS_RECONNECT_DELAY_SECS;
use crate::device::{PandoraDevice, parse_device_id};
use crate::error::{PandoraError, Result};
use crate::listener::{CommandReply, DispatchOutcome, ListenOptions, UpdateListener};
use crate::model::conv;
use crate::model::{
    CurrentState, HttpTrack, StateChanges, StateUpdate, TrackingEvent, TrackingPoint,
    WsMessageType,
};
use crate::ws::{self, SessionEnd};

/// Result of one `/api/updates` poll
#[derive(Clone, Debug, Default)]
pub struct UpdateBatch {
    /// Attributes carried by the poll, per device
    pub states: BTreeMap<u64, StateChanges>,
    pub events: Vec<TrackingEvent>,
}

/// A Pandora Online account and the devices bound to it
pub struct PandoraAccount {
    api: Arc<PandoraApi>,
    config: PandoraClientConfig,
    user_id: RwLock<Option<u64>>,
    last_update: AtomicI64,
    devices: RwLock<BTreeMap<u64, Arc<PandoraDevice>>>,
}

impl PandoraAccount {
    pub fn new(config: PandoraClientConfig) -> Result<Self> {
        config.validate()?;
        let api = PandoraApi::new(&config)?;
        if let Some(token) = config.access_token.as_ref().filter(|t| !t.is_empty()) {
            api.http().set_access_token(Some(token.clone()));
        }
        Ok(Self {
            api: Arc::new(api),
            config,
            user_id: RwLock::new(None),
            last_update: AtomicI64::new(-1),
            devices: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn api(&self) -> &Arc<PandoraApi> {
        &self.api
    }

    pub fn username(&self) -> &str {
        &self.config.username
    }

    pub fn utc_offset(&self) -> i32 {
        self.config.utc_offset
    }

    pub fn user_id(&self) -> Option<u64> {
        *self.user_id.read()
    }

    pub fn access_token(&self) -> Option<String> {
        self.api.access_token()
    }

    /// Server timestamp of the last poll, `-1` before the first one
    pub fn last_update(&self) -> i64 {
        self.last_update.load(Ordering::Acquire)
    }

    // ============================================================================
    // Authentication
    // ============================================================================

    /// Bind an access token to the account credentials and make it current
    pub async fn apply_access_token(&self, access_token: &str) -> Result<()> {
        if self.config.username.is_empty() {
            return Err(PandoraError::InvalidArgument(
                "username is required".to_string(),
            ));
        }
        if self.config.password.is_empty() {
            return Err(PandoraError::InvalidArgument(
                "password is required".to_string(),
            ));
        }

        let credentials = Credentials {
            username: &self.config.username,
            password: &self.config.password,
            language: &self.config.language,
            utc_offset: self.config.utc_offset,
        };
        let user_id = self.api.login(&credentials, access_token).await?;

        *self.user_id.write() = Some(user_id);
        self.api.http().set_access_token(Some(access_token.to_string()));
        info!("Access token authentication successful");
        Ok(())
    }

    /// Authenticate, trying the given token, then the current one, then a
    /// freshly issued one
    pub async fn authenticate(&self, access_token: Option<&str>) -> Result<()> {
        debug!("Authenticating access token: {:?}", access_token);
        let provided = access_token.filter(|token| !token.is_empty());

        if let Some(token) = provided {
            match self.apply_access_token(token).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Authentication with provided access token failed: {}", e),
            }
        }

        if let Some(existing) = self.api.access_token()
            && !existing.is_empty()
            && provided != Some(existing.as_str())
        {
            match self.apply_access_token(&existing).await {
                Ok(()) => return Ok(()),
                Err(e) => warn!("Authentication with existing access token failed: {}", e),
            }
        }

        let token = self
            .api
            .fetch_access_token()
            .await
            .inspect_err(|e| error!("Could not retrieve access token: {}", e))?;
        self.apply_access_token(&token)
            .await
            .inspect_err(|e| error!("Authentication with fetched access token failed: {}", e))
    }

    // ============================================================================
    // Devices
    // ============================================================================

    /// Fetch the device list, refreshing known devices and adding new ones
    pub async fn refresh_devices(&self) -> Result<()> {
        let descriptors = self.api.fetch_devices().await?;
        debug!("Retrieved devices: {:?}", descriptors);

        for attributes in descriptors {
            let device_id = match parse_device_id(&attributes) {
                Ok(device_id) => device_id,
                Err(e) => {
                    error!("Error parsing device ID: {}", e);
                    continue;
                }
            };

            let existing = self.devices.read().get(&device_id).cloned();
            match existing {
                Some(device) => device.set_attributes(attributes)?,
                None => {
                    debug!("Adding new device with ID {}", device_id);
                    let device = PandoraDevice::new(self.api.clone(), attributes, &self.config)?;
                    self.devices.write().insert(device_id, Arc::new(device));
                }
            }
        }
        Ok(())
    }

    pub fn devices(&self) -> Vec<Arc<PandoraDevice>> {
        self.devices.read().values().cloned().collect()
    }

    pub fn device(&self, device_id: u64) -> Option<Arc<PandoraDevice>> {
        self.devices.read().get(&device_id).cloned()
    }

    /// Like [`Self::device`], failing on unknown identifiers
    pub fn require_device(&self, device_id: u64) -> Result<Arc<PandoraDevice>> {
        self.device(device_id)
            .ok_or(PandoraError::UnknownDevice(device_id))
    }

    // ============================================================================
    // Polling
    // ============================================================================

    /// Poll for changes since `timestamp`, or since the last poll when absent
    pub async fn request_updates(&self, timestamp: Option<i64>) -> Result<UpdateBatch> {
        self.api.http().require_token()?;
        let since = timestamp.unwrap_or_else(|| self.last_update());

        if since < 0 {
            info!("Fetching initial state");
        } else {
            let iso = Local
                .timestamp_opt(since, 0)
                .single()
                .map(|dt| dt.naive_local().format("%Y-%m-%dT%H:%M:%S").to_string())
                .unwrap_or_else(|| since.to_string());
            info!("Fetching since {}", iso);
        }

        let data = self.api.fetch_updates(since).await?;
        let mut batch = UpdateBatch::default();

        // Stats and time sections are merged per device before applying
        let mut sections: BTreeMap<u64, (Option<&Map<String, Value>>, Option<&Map<String, Value>>)> =
            BTreeMap::new();
        for key in ["stats", "time"] {
            let Some(Value::Object(mapping)) = data.get(key) else {
                continue;
            };
            for (raw_id, device_data) in mapping {
                let Ok(device_id) = raw_id.parse::<u64>() else {
                    warn!("Bad device ID in {} data: {}", key, raw_id);
                    continue;
                };
                if !self.devices.read().contains_key(&device_id) {
                    warn!(
                        "Received {} data for uninitialized device {}: {}",
                        key, device_id, device_data
                    );
                    continue;
                }
                let Value::Object(device_data) = device_data else {
                    warn!("Malformed {} data for device {}: {}", key, device_id, device_data);
                    continue;
                };
                let entry = sections.entry(device_id).or_default();
                if key == "stats" {
                    entry.0 = Some(device_data);
                } else {
                    entry.1 = Some(device_data);
                }
            }
        }

        for (device_id, (stats, time)) in sections {
            if let Some(device) = self.device(device_id) {
                let (_, changes) = self.process_http_state(&device, stats, time);
                batch.states.insert(device_id, changes);
            }
        }

        for wrapper in data.get("lenta").and_then(Value::as_array).into_iter().flatten() {
            let Some(Value::Object(obj)) = wrapper.get("obj") else {
                continue;
            };
            let Some(raw_id) = obj.get("dev_id") else {
                continue;
            };
            let Some(device_id) = conv::uint(Some(raw_id)) else {
                warn!("Bad device ID in event data: {}", raw_id);
                continue;
            };
            let Some(device) = self.device(device_id) else {
                warn!(
                    "Received event data for uninitialized device {}: {:?}",
                    device_id, obj
                );
                continue;
            };
            batch.events.push(self.process_event(&device, obj));
        }

        if !batch.states.is_empty() {
            debug!("Received updates from HTTP: {:?}", batch.states);
        }

        match conv::int(data.get("ts")) {
            Some(ts) => self.last_update.store(ts, Ordering::Release),
            None => warn!("Response did not contain timestamp"),
        }

        Ok(batch)
    }

    pub async fn fetch_events(
        &self,
        from: i64,
        to: Option<i64>,
        limit: u32,
        device_id: Option<u64>,
    ) -> Result<Vec<TrackingEvent>> {
        self.api.fetch_events(from, to, limit, device_id).await
    }

    /// Short address of a location
    pub async fn geocode(
        &self,
        latitude: f64,
        longitude: f64,
        language: Option<&str>,
    ) -> Result<Option<String>> {
        self.api.geocode_short(latitude, longitude, language).await
    }

    pub async fn remote_command(
        &self,
        device_id: u64,
        command: impl Into<u32>,
        params: Option<&Map<String, Value>>,
    ) -> Result<()> {
        self.api.remote_command(device_id, command.into(), params).await
    }

    pub async fn wake_up_device(&self, device_id: u64) -> Result<()> {
        self.api.wake_up_device(device_id).await
    }

    pub async fn fetch_device_system(&self, device_id: u64) -> Result<Map<String, Value>> {
        self.api.fetch_device_system(device_id).await
    }

    pub async fn fetch_device_settings(&self, device_id: u64) -> Result<Map<String, Value>> {
        self.api.fetch_device_settings(device_id).await
    }

    pub async fn fetch_track_data(
        &self,
        device_id: u64,
        track_id: u64,
        hash: Option<&str>,
    ) -> Result<HttpTrack> {
        self.api.fetch_track_data(device_id, track_id, hash).await
    }

    fn process_http_state(
        &self,
        device: &PandoraDevice,
        stats: Option<&Map<String, Value>>,
        time: Option<&Map<String, Value>>,
    ) -> (CurrentState, StateChanges) {
        let mut update = StateUpdate::new();
        if let Some(stats) = stats.filter(|stats| !stats.is_empty()) {
            debug!(
                "Received data update from HTTP for device {}: {:?}",
                device.device_id(),
                stats
            );
            update.extend(StateUpdate::from_http_stats(stats));
            update.insert("identifier", device.device_id());
        }
        if let Some(time) = time.filter(|time| !time.is_empty()) {
            debug!(
                "Received time update from HTTP for device {}: {:?}",
                device.device_id(),
                time
            );
            update.extend(StateUpdate::from_http_time(time));
        }
        device.update_state(update)
    }

    fn process_event(&self, device: &PandoraDevice, data: &Map<String, Value>) -> TrackingEvent {
        let event = TrackingEvent::from_map(data, Some(device.device_id()));
        device.record_event(&event);
        event
    }

    // ============================================================================
    // Push messages
    // ============================================================================

    fn process_ws_initial_state(
        &self,
        device: &PandoraDevice,
        data: &Map<String, Value>,
    ) -> (CurrentState, StateChanges) {
        debug!("Initializing state for {} from {:?}", device.device_id(), data);
        let mut update = StateUpdate::from_map(data);
        update.insert("identifier", device.device_id());
        device.update_state(update)
    }

    fn process_ws_state(
        &self,
        device: &PandoraDevice,
        data: &Map<String, Value>,
    ) -> (CurrentState, StateChanges) {
        debug!("Updating state for {} from {:?}", device.device_id(), data);
        let mut update = StateUpdate::from_map(data);
        update.insert("identifier", device.device_id());
        device.update_state(update)
    }

    fn process_ws_point(
        &self,
        device: &PandoraDevice,
        data: &Map<String, Value>,
    ) -> Result<(TrackingPoint, Option<CurrentState>, Option<StateChanges>)> {
        let timestamp = conv::int(data.get("dtime"))
            .filter(|ts| *ts != 0)
            .unwrap_or_else(|| Utc::now().timestamp());
        let point = TrackingPoint::from_map(data, device.device_id(), timestamp).ok_or_else(
            || PandoraError::MalformedResponse("point without track or position".to_string()),
        )?;

        let (state, changes) = match device.state() {
            Some(state) if state.state_timestamp.is_none_or(|ts| ts <= timestamp) => {
                let mut update = StateUpdate::from_map(data);
                update.insert("identifier", device.device_id());
                update.insert("state_timestamp", timestamp);
                let (state, changes) = device.update_state(update);
                (Some(state), Some(changes))
            }
            state => (state, None),
        };

        device.set_last_point(point.clone())?;
        Ok((point, state, changes))
    }

    fn process_ws_command(
        &self,
        device: &PandoraDevice,
        data: &Map<String, Value>,
    ) -> Result<CommandReply> {
        let (Some(command), Some(result), Some(reply)) =
            (data.get("command"), data.get("result"), data.get("reply"))
        else {
            return Err(PandoraError::MalformedResponse(
                "command reply is incomplete".to_string(),
            ));
        };
        let command_id = conv::uint(Some(command))
            .and_then(|id| u32::try_from(id).ok())
            .ok_or_else(|| {
                PandoraError::MalformedResponse(format!("invalid command ID: {command}"))
            })?;

        let result = conv::int(Some(result)).unwrap_or_else(|| {
            warn!(
                "Could not decode result {} for command {}, assuming an error",
                result, command_id
            );
            1
        });

        if device.control_busy() {
            let failure = (result != 0).then(|| format!("(CID:{command_id}) reply={reply}"));
            if let Err(e) = device.release_control_lock(failure) {
                debug!("Command {} confirmation arrived late: {}", command_id, e);
            }
        }

        Ok(CommandReply {
            command_id,
            result,
            reply: reply.clone(),
        })
    }

    fn process_ws_update_settings(
        &self,
        device: &PandoraDevice,
        data: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut settings = data.clone();
        settings.insert("device_id".to_string(), Value::from(device.device_id()));
        settings
    }

    /// Apply one push message and notify the listener.
    ///
    /// Malformed messages and listener failures are logged and skipped.
    pub async fn dispatch_ws_message<L: UpdateListener + ?Sized>(
        &self,
        listener: &L,
        message: &Map<String, Value>,
        reconnect_on_device_online: bool,
    ) -> DispatchOutcome {
        let (Some(Value::String(kind)), Some(Value::Object(data))) =
            (message.get("type"), message.get("data"))
        else {
            error!("WS malformed data: {:?}", message);
            return DispatchOutcome::Continue;
        };

        let device_id = match parse_device_id(data) {
            Ok(device_id) => device_id,
            Err(PandoraError::MalformedResponse(_)) => {
                warn!("WS {} with no device ID: {:?}", kind, data);
                return DispatchOutcome::Continue;
            }
            Err(_) => {
                warn!("WS data with invalid device ID: {:?}", data.get("dev_id"));
                return DispatchOutcome::Continue;
            }
        };

        let Some(device) = self.device(device_id) else {
            warn!("WS {} for unregistered device ID {}: {:?}", kind, device_id, data);
            return DispatchOutcome::Continue;
        };

        let Ok(kind) = kind.parse::<WsMessageType>() else {
            warn!("WS data of unknown type {}: {:?}", kind, data);
            return DispatchOutcome::Continue;
        };

        let mut outcome = DispatchOutcome::Continue;
        let delivered = match kind {
            WsMessageType::InitialState => {
                let (state, changes) = self.process_ws_initial_state(&device, data);
                listener.on_state(&device, &state, &changes).await
            }
            WsMessageType::State => {
                let was_online = device.is_online();
                let (state, changes) = self.process_ws_state(&device, data);
                if reconnect_on_device_online && !was_online && device.is_online() {
                    debug!(
                        "Will restart WS to fetch new state after device {} went online",
                        device_id
                    );
                    outcome = DispatchOutcome::Reconnect;
                }
                listener.on_state(&device, &state, &changes).await
            }
            WsMessageType::Point => match self.process_ws_point(&device, data) {
                Ok((point, state, changes)) => {
                    listener
                        .on_point(&device, &point, state.as_ref(), changes.as_ref())
                        .await
                }
                Err(e) => return report_processing_error(kind, e),
            },
            WsMessageType::Command => match self.process_ws_command(&device, data) {
                Ok(reply) => listener.on_command(&device, &reply).await,
                Err(e) => return report_processing_error(kind, e),
            },
            WsMessageType::Event => {
                let event = self.process_event(&device, data);
                listener.on_event(&device, &event).await
            }
            WsMessageType::UpdateSettings => {
                let settings = self.process_ws_update_settings(&device, data);
                listener.on_settings_update(&device, &settings).await
            }
        };

        if let Err(e) = delivered {
            error!("Error during callback handling: {:#}", e);
        }
        outcome
    }

    // ============================================================================
    // Listening
    // ============================================================================

    /// Validate the current token, re-authenticating when it was rejected.
    ///
    /// Returns `Ok(false)` on temporary failures worth retrying later.
    async fn ws_auto_auth(&self) -> Result<bool> {
        debug!("[reauth] Checking WS access token");
        let checked = match self.api.check_access_token(None).await {
            Ok(()) => {
                debug!("[reauth] WS access token still valid");
                Ok(())
            }
            Err(e) if e.is_auth_error() => {
                debug!("[reauth] Performing authentication");
                self.authenticate(None).await
            }
            Err(e) => Err(e),
        };

        match checked {
            Ok(()) => Ok(true),
            Err(e) if e.is_auth_error() => {
                error!("[reauth] Severe authentication error: {}", e);
                Err(e)
            }
            Err(e) if e.is_transient() || matches!(e, PandoraError::Http(_)) => {
                error!(
                    "[reauth] Temporary authentication error, will check again later: {}",
                    e
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Listen to the push channel, dispatching every message to `listener`.
    ///
    /// Without `auto_restart` the first error or closure is returned.
    pub async fn listen_for_updates<L: UpdateListener + ?Sized>(
        &self,
        listener: &L,
        options: &ListenOptions,
    ) -> Result<()> {
        let delay = Duration::from_secs(WS_RECONNECT_DELAY_SECS);
        loop {
            let failure = match ws::run_session(self, listener, options).await {
                Ok(SessionEnd::Reconnect) => continue,
                Ok(SessionEnd::Closed) => {
                    debug!("WS client closed");
                    None
                }
                Err(e) => {
                    error!("WS error: {}", e);
                    Some(e)
                }
            };

            if !options.auto_restart {
                return Err(failure.unwrap_or(PandoraError::WsClosed));
            }

            if options.auto_reauth {
                while !self.ws_auto_auth().await? {
                    tokio::time::sleep(delay).await;
                }
            } else {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn report_processing_error(kind: WsMessageType, error: PandoraError) -> DispatchOutcome {
    warn!(
        "Error during preliminary response processing with message type {}: {}",
        kind.as_str(),
        error
    );
    DispatchOutcome::Continue
}

impl fmt::Display for PandoraAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.user_id() {
            Some(user_id) => write!(
                f,
                "PandoraAccount[username=\"{}\", user_id={}]",
                self.config.username, user_id
            ),
            None => write!(
                f,
                "PandoraAccount[username=\"{}\", user_id=None]",
                self.config.username
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn account() -> PandoraAccount {
        PandoraAccount::new(
            PandoraClientConfig::new("user", "secret").with_base_url("http://127.0.0.1:9"),
        )
        .unwrap()
    }

    fn add_device(account: &PandoraAccount, device_id: u64) -> Arc<PandoraDevice> {
        let attributes = json!({"id": device_id, "name": "Car"});
        let device = Arc::new(
            PandoraDevice::new(
                account.api.clone(),
                attributes.as_object().unwrap().clone(),
                &account.config,
            )
            .unwrap(),
        );
        account.devices.write().insert(device_id, device.clone());
        device
    }

    #[test]
    fn test_account_new() {
        let account = account();
        assert_eq!(account.username(), "user");
        assert_eq!(account.last_update(), -1);
        assert!(account.user_id().is_none());
        assert!(account.access_token().is_none());
        assert_eq!(
            account.to_string(),
            "PandoraAccount[username=\"user\", user_id=None]"
        );
    }

    #[test]
    fn test_account_rejects_bad_offset() {
        let config = PandoraClientConfig::new("user", "secret").with_utc_offset(100_000);
        assert!(matches!(
            PandoraAccount::new(config),
            Err(PandoraError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_account_initial_token() {
        let config = PandoraClientConfig::new("user", "secret").with_access_token("abc");
        let account = PandoraAccount::new(config).unwrap();
        assert_eq!(account.access_token().as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_apply_access_token_requires_credentials() {
        let account = PandoraAccount::new(PandoraClientConfig::default()).unwrap();
        let result = account.apply_access_token("token").await;
        assert!(matches!(result, Err(PandoraError::InvalidArgument(_))));
    }

    #[test]
    fn test_process_ws_command_releases_lock() {
        let account = account();
        let device = add_device(&account, 7);

        let data = json!({"dev_id": 7, "command": 1, "result": "oops", "reply": 3});
        let reply = account
            .process_ws_command(&device, data.as_object().unwrap())
            .unwrap();
        assert_eq!(reply.command_id, 1);
        assert_eq!(reply.result, 1);
        assert_eq!(reply.reply, json!(3));

        let data = json!({"dev_id": 7, "command": 1});
        assert!(account
            .process_ws_command(&device, data.as_object().unwrap())
            .is_err());
    }

    #[test]
    fn test_process_ws_point_without_state() {
        let account = account();
        let device = add_device(&account, 7);

        let data = json!({"dev_id": 7, "track_id": 3, "x": 55.1, "y": 37.2, "dtime": 1000});
        let (point, state, changes) = account
            .process_ws_point(&device, data.as_object().unwrap())
            .unwrap();
        assert_eq!(point.timestamp, 1000);
        assert_eq!(point.latitude, Some(55.1));
        assert!(state.is_none());
        assert!(changes.is_none());
        assert_eq!(device.last_point(), Some(point));
    }

    #[test]
    fn test_process_ws_update_settings_adds_device_id() {
        let account = account();
        let device = add_device(&account, 7);
        let data = json!({"dev_id": 7, "value": 1});
        let settings = account.process_ws_update_settings(&device, data.as_object().unwrap());
        assert_eq!(settings.get("device_id"), Some(&json!(7)));
        assert_eq!(settings.get("value"), Some(&json!(1)));
    }

    #[test]
    fn test_process_http_state_marks_offline() {
        let account = account();
        let device = add_device(&account, 7);
        let stats = json!({"speed": 10.0});
        let (state, changes) =
            account.process_http_state(&device, stats.as_object(), None);
        assert_eq!(state.is_online, Some(false));
        assert_eq!(state.identifier, Some(7));
        assert!(changes.contains_key("speed"));
    }
}
