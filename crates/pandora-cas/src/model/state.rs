//! Device state and its timestamp-gated evolution
//!
//! A [`StateUpdate`] is the set of attribute values extracted from one vendor
//! payload. [`CurrentState::apply`] merges it into the known state, skipping
//! attributes whose recorded timestamp is newer than the update's, and reports
//! which attributes actually changed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::conv;
use super::flags::BitStatus;
use super::records::{Balance, FuelTank, LiquidSensor, ObdCode, SimCard, WsTrack};

/// Attribute that gates most others
const STATE_TS: Option<&str> = Some("state_timestamp_utc");
const NO_TS: Option<&str> = None;

/// Attributes that changed, with their new normalized values
pub type StateChanges = BTreeMap<&'static str, Value>;

/// Mapping of one state attribute onto vendor keys
#[derive(Debug)]
pub struct AttributeSpec {
    pub name: &'static str,
    /// Vendor keys, first present wins
    pub keys: &'static [&'static str],
    /// Attribute whose value gates updates to this one
    pub timestamp_source: Option<&'static str>,
}

macro_rules! current_state {
    (
        $(
            $(#[$fmeta:meta])*
            $field:ident: $ty:ty = [$($key:literal),+] => $conv:expr, $ts:expr;
        )*
    ) => {
        /// Latest known state of a device
        #[derive(Debug, Clone, Default, PartialEq, Serialize)]
        pub struct CurrentState {
            $( $(#[$fmeta])* pub $field: $ty, )*
            #[serde(skip)]
            last_updated: HashMap<&'static str, i64>,
        }

        pub const ATTRIBUTES: &[AttributeSpec] = &[
            $(
                AttributeSpec {
                    name: stringify!($field),
                    keys: &[$($key),+],
                    timestamp_source: $ts,
                },
            )*
        ];

        impl CurrentState {
            fn assign(&mut self, name: &str, value: &Value) -> bool {
                match name {
                    $( stringify!($field) => {
                        self.$field = $conv(Some(value));
                        true
                    } )*
                    _ => false,
                }
            }

            /// Normalized JSON value of an attribute
            pub fn attribute_value(&self, name: &str) -> Option<Value> {
                match name {
                    $( stringify!($field) => serde_json::to_value(&self.$field).ok(), )*
                    _ => None,
                }
            }
        }
    };
}

current_state! {
    identifier: Option<u64> = ["dev_id", "id"] => conv::uint, NO_TS;

    active_sim: Option<i64> = ["active_sim"] => conv::int, STATE_TS;
    balance: Option<Balance> = ["balance"] => conv::object, STATE_TS;
    balance_other: Option<Balance> = ["balance1"] => conv::object, STATE_TS;
    bit_state: Option<BitStatus> = ["bit_state_1"] => conv::bit_status, STATE_TS;
    can_mileage: Option<f64> = ["mileage_CAN"] => conv::float, STATE_TS;
    engine_rpm: Option<i64> = ["engine_rpm"] => conv::int, STATE_TS;
    engine_temperature: Option<f64> = ["engine_temp"] => conv::float, STATE_TS;
    exterior_temperature: Option<f64> = ["out_temp"] => conv::float, STATE_TS;
    fuel: Option<f64> = ["fuel"] => conv::float, STATE_TS;
    gsm_level: Option<i64> = ["gsm_level"] => conv::int, STATE_TS;
    interior_temperature: Option<f64> = ["cabin_temp"] => conv::float, STATE_TS;
    is_evacuating: Option<bool> = ["evaq"] => conv::boolean, STATE_TS;
    is_moving: Option<bool> = ["move"] => conv::boolean, STATE_TS;
    is_online: Option<bool> = ["online_mode"] => conv::boolean, NO_TS;
    key_number: Option<i64> = ["brelok"] => conv::int, STATE_TS;
    latitude: Option<f64> = ["x"] => conv::float, STATE_TS;
    lock_latitude: Option<f64> = ["lock_x"] => conv::lock_coordinate, STATE_TS;
    lock_longitude: Option<f64> = ["lock_y"] => conv::lock_coordinate, STATE_TS;
    longitude: Option<f64> = ["y"] => conv::float, STATE_TS;
    mileage: Option<f64> = ["mileage"] => conv::float, STATE_TS;
    engine_hours: Option<f64> = ["motohours"] => conv::float, STATE_TS;
    phone: Option<String> = ["phone"] => conv::text, STATE_TS;
    phone_other: Option<String> = ["phone1"] => conv::text, STATE_TS;
    relay: Option<i64> = ["relay"] => conv::int, STATE_TS;
    rotation: Option<f64> = ["rot"] => conv::float, STATE_TS;
    speed: Option<f64> = ["speed"] => conv::float, STATE_TS;
    tag_number: Option<i64> = ["metka"] => conv::int, STATE_TS;
    tracking_remaining: Option<f64> = ["track_remains"] => conv::float, STATE_TS;
    voltage: Option<f64> = ["voltage"] => conv::float, STATE_TS;
    internal_voltage: Option<f64> = ["internal_power"] => conv::float, STATE_TS;
    gear: Option<String> = ["gear"] => conv::text, STATE_TS;
    battery_warm_up: Option<bool> = ["battery_warm_up"] => conv::boolean, STATE_TS;
    lbs_coords: Option<bool> = ["Lbs_coords"] => conv::boolean, STATE_TS;
    engine_remains: Option<i64> = ["engine_remains"] => conv::int, STATE_TS;
    obd_error_codes: Vec<ObdCode> = ["OBD_codes"] => conv::list, STATE_TS;

    can_belt_back_center: Option<bool> = ["CAN_back_center_belt"] => conv::boolean, STATE_TS;
    can_belt_back_left: Option<bool> = ["CAN_back_left_belt"] => conv::boolean, STATE_TS;
    can_belt_back_right: Option<bool> = ["CAN_back_right_belt"] => conv::boolean, STATE_TS;
    can_belt_driver: Option<bool> = ["CAN_driver_belt"] => conv::boolean, STATE_TS;
    can_belt_passenger: Option<bool> = ["CAN_passenger_belt"] => conv::boolean, STATE_TS;

    can_glass_back_left: Option<bool> = ["CAN_back_left_glass"] => conv::boolean, STATE_TS;
    can_glass_back_right: Option<bool> = ["CAN_back_right_glass"] => conv::boolean, STATE_TS;
    can_glass_driver: Option<bool> = ["CAN_driver_glass"] => conv::boolean, STATE_TS;
    can_glass_passenger: Option<bool> = ["CAN_passenger_glass"] => conv::boolean, STATE_TS;

    // Vendor spells "forward" as "forvard"
    can_tpms_front_left: Option<f64> = ["CAN_TMPS_forvard_left"] => conv::float, STATE_TS;
    can_tpms_front_right: Option<f64> = ["CAN_TMPS_forvard_right"] => conv::float, STATE_TS;
    can_tpms_back_left: Option<f64> = ["CAN_TMPS_back_left"] => conv::float, STATE_TS;
    can_tpms_back_right: Option<f64> = ["CAN_TMPS_back_right"] => conv::float, STATE_TS;
    can_tpms_reserve: Option<f64> = ["CAN_TMPS_reserve"] => conv::float, STATE_TS;

    climate_firmware: Option<i64> = ["fw_climate"] => conv::int, STATE_TS;
    can_climate: Option<bool> = ["CAN_climate"] => conv::boolean, STATE_TS;
    can_climate_ac: Option<bool> = ["CAN_climate_ac"] => conv::boolean, STATE_TS;
    can_climate_defroster: Option<bool> = ["CAN_climate_defroster"] => conv::boolean, STATE_TS;
    can_climate_evb_heat: Option<bool> = ["CAN_climate_evb_heat"] => conv::boolean, STATE_TS;
    can_climate_glass_heat: Option<bool> = ["CAN_climate_glass_heat"] => conv::boolean, STATE_TS;
    can_climate_seat_heat_level: Option<i64> = ["CAN_climate_seat_heat_lvl"] => conv::int, STATE_TS;
    can_climate_seat_vent_level: Option<i64> = ["CAN_climate_seat_vent_lvl"] => conv::int, STATE_TS;
    can_climate_steering_heat: Option<bool> = ["CAN_climate_steering_heat"] => conv::boolean, STATE_TS;
    can_climate_temperature: Option<i64> = ["CAN_climate_temp"] => conv::int, STATE_TS;

    heater_errors: Vec<i64> = ["heater_errors"] => conv::list, STATE_TS;
    heater_flame: Option<bool> = ["heater_flame"] => conv::boolean, STATE_TS;
    heater_power: Option<bool> = ["heater_power"] => conv::boolean, STATE_TS;
    heater_temperature: Option<f64> = ["heater_temperature"] => conv::float, STATE_TS;
    heater_voltage: Option<f64> = ["heater_voltage"] => conv::float, STATE_TS;

    can_average_speed: Option<f64> = ["CAN_average_speed"] => conv::float, STATE_TS;
    can_consumption: Option<f64> = ["CAN_consumption"] => conv::float, STATE_TS;
    can_consumption_after: Option<f64> = ["CAN_consumption_after"] => conv::float, STATE_TS;
    can_days_to_maintenance: Option<i64> = ["CAN_days_to_maintenance"] => conv::int, STATE_TS;
    can_low_liquid: Option<bool> = ["CAN_low_liquid"] => conv::boolean, STATE_TS;
    can_mileage_by_battery: Option<f64> = ["CAN_mileage_by_battery"] => conv::float, STATE_TS;
    can_mileage_to_empty: Option<f64> = ["CAN_mileage_to_empty"] => conv::float, STATE_TS;
    can_mileage_to_maintenance: Option<f64> = ["CAN_mileage_to_maintenance"] => conv::float, STATE_TS;
    can_engine_hours: Option<f64> = ["motohours_CAN"] => conv::float, STATE_TS;
    can_need_pads_exchange: Option<bool> = ["CAN_need_pads_exchange"] => conv::boolean, STATE_TS;
    can_seat_taken: Option<bool> = ["CAN_seat_taken"] => conv::boolean, STATE_TS;

    ev_state_of_charge: Option<f64> = ["SOC"] => conv::float, STATE_TS;
    ev_state_of_health: Option<f64> = ["SOH"] => conv::float, STATE_TS;
    ev_charging_connected: Option<bool> = ["charging_connect"] => conv::boolean, STATE_TS;
    ev_charging_slow: Option<bool> = ["charging_slow"] => conv::boolean, STATE_TS;
    ev_charging_fast: Option<bool> = ["charging_fast"] => conv::boolean, STATE_TS;
    ev_status_ready: Option<bool> = ["ev_status_ready"] => conv::boolean, STATE_TS;
    battery_temperature: Option<i64> = ["battery_temperature"] => conv::int, STATE_TS;

    liquid_sensors: Vec<LiquidSensor> = ["liquid_sensor"] => conv::list, STATE_TS;
    bunker: Option<i64> = ["bunker"] => conv::int, STATE_TS;
    ex_status: Option<i64> = ["ex_status"] => conv::int, STATE_TS;
    fuel_tanks: Vec<FuelTank> = ["tanks"] => conv::list, STATE_TS;
    sims: Vec<SimCard> = ["sims"] => conv::list, STATE_TS;

    state_timestamp: Option<i64> = ["state"] => conv::int, NO_TS;
    state_timestamp_utc: Option<i64> = ["state_utc"] => conv::int, NO_TS;
    online_timestamp: Option<i64> = ["online"] => conv::int, NO_TS;
    online_timestamp_utc: Option<i64> = ["online_utc"] => conv::int, NO_TS;
    settings_timestamp_utc: Option<i64> = ["setting_utc"] => conv::int, NO_TS;
    command_timestamp_utc: Option<i64> = ["command_utc"] => conv::int, NO_TS;
    track: Option<WsTrack> = ["track"] => conv::object, STATE_TS;
}

/// Keys that are known but not mapped onto attributes
enum Ignored {
    Always,
    WhenStr(&'static str),
    WhenInt(i64),
}

const IGNORED_KEYS: &[(&str, Ignored)] = &[
    ("dtime_rec", Ignored::Always),
    ("can", Ignored::Always),
    ("heater", Ignored::Always),
    ("benish_mode", Ignored::Always),
    ("cmd_code", Ignored::Always),
    ("cmd_result", Ignored::Always),
    ("counter1", Ignored::Always),
    ("counter2", Ignored::Always),
    ("gps_ready", Ignored::Always),
    ("imei", Ignored::Always),
    ("land", Ignored::Always),
    ("length", Ignored::Always),
    ("max_speed", Ignored::Always),
    ("timezone", Ignored::Always),
    ("track_id", Ignored::Always),
    ("dtime", Ignored::Always),
    ("flags", Ignored::Always),
    ("tconsum", Ignored::Always),
    ("props", Ignored::Always),
    ("loadaxis", Ignored::WhenStr("")),
    ("smeter", Ignored::WhenInt(0)),
    ("socket1", Ignored::WhenInt(0)),
    ("socket2", Ignored::WhenInt(0)),
];

fn is_ignored(key: &str, value: &Value) -> bool {
    IGNORED_KEYS.iter().any(|(name, rule)| {
        *name == key
            && match rule {
                Ignored::Always => true,
                Ignored::WhenStr(s) => value.as_str() == Some(*s),
                Ignored::WhenInt(i) => value.as_i64() == Some(*i),
            }
    })
}

pub fn attribute_spec(name: &str) -> Option<&'static AttributeSpec> {
    ATTRIBUTES.iter().find(|spec| spec.name == name)
}

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W",
    "WNW", "NW", "NNW",
];

/// Attribute values extracted from one vendor payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate(BTreeMap<&'static str, Value>);

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract attributes from a payload, first matching vendor key wins
    pub fn from_map(data: &Map<String, Value>) -> Self {
        Self::from_layers(&[data])
    }

    /// Extract attributes from an HTTP `stats` payload, where `heater`
    /// overrides `can` which overrides the base mapping
    pub fn from_http_stats(data: &Map<String, Value>) -> Self {
        let mut layers = Vec::with_capacity(3);
        for nested in ["heater", "can"] {
            if let Some(Value::Object(map)) = data.get(nested)
                && !map.is_empty()
            {
                layers.push(map);
            }
        }
        layers.push(data);
        let mut update = Self::from_layers(&layers);
        // `online` in stats is the connectivity flag, not a timestamp
        update.0.remove("online_timestamp");
        let online = data.get("online").is_some_and(conv::is_truthy);
        update.0.insert("is_online", Value::Bool(online));
        update
    }

    /// Extract timestamps from an HTTP `time` payload
    pub fn from_http_time(data: &Map<String, Value>) -> Self {
        let mut update = Self::new();
        for (key, attribute) in [
            ("onlined", "online_timestamp"),
            ("online", "online_timestamp_utc"),
            ("command", "command_timestamp_utc"),
            ("setting", "settings_timestamp_utc"),
        ] {
            if let Some(value) = data.get(key)
                && !value.is_null()
            {
                update.0.insert(attribute, value.clone());
            }
        }
        update
    }

    fn from_layers(layers: &[&Map<String, Value>]) -> Self {
        let mut update = Self::new();
        let mut unmapped: BTreeSet<&str> = BTreeSet::new();
        for layer in layers {
            unmapped.extend(layer.keys().map(String::as_str));
        }

        for spec in ATTRIBUTES {
            for key in spec.keys {
                unmapped.remove(key);
            }
            let found = spec
                .keys
                .iter()
                .find_map(|key| layers.iter().find_map(|layer| layer.get(*key)));
            if let Some(value) = found {
                update.0.insert(spec.name, value.clone());
            }
        }

        unmapped.retain(|key| {
            let value = layers.iter().find_map(|layer| layer.get(*key));
            !value.is_some_and(|v| is_ignored(key, v))
        });
        if !unmapped.is_empty() {
            info!("[CurrentState] New attributes detected! Please, report this to the developer.");
            for key in unmapped {
                if let Some(value) = layers.iter().find_map(|layer| layer.get(key)) {
                    info!("[CurrentState]  {} = {}", key, value);
                }
            }
        }
        update
    }

    /// Set an attribute; unknown attribute names are rejected
    pub fn insert(&mut self, attribute: &str, value: impl Into<Value>) -> bool {
        match attribute_spec(attribute) {
            Some(spec) => {
                self.0.insert(spec.name, value.into());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.0.get(attribute)
    }

    pub fn int(&self, attribute: &str) -> Option<i64> {
        conv::int(self.0.get(attribute))
    }

    pub fn contains(&self, attribute: &str) -> bool {
        self.0.contains_key(attribute)
    }

    pub fn extend(&mut self, other: StateUpdate) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.0.iter().map(|(k, v)| (*k, v))
    }
}

impl CurrentState {
    /// Build the first state of a device
    pub fn from_update(update: &StateUpdate) -> Self {
        let mut state = Self::default();
        for (name, value) in update.iter() {
            state.assign(name, value);
        }
        for spec in ATTRIBUTES {
            if let Some(ts) = spec.timestamp_source {
                let stamp = state.timestamp_of(ts).filter(|t| *t != 0).unwrap_or(-1);
                state.last_updated.insert(spec.name, stamp);
            }
        }
        state
    }

    /// Timestamp an attribute was last updated at, `-1` when never stamped
    pub fn last_updated(&self, attribute: &str) -> Option<i64> {
        self.last_updated.get(attribute).copied()
    }

    fn timestamp_of(&self, attribute: &str) -> Option<i64> {
        self.attribute_value(attribute)
            .and_then(|v| conv::int(Some(&v)))
    }

    /// Merge an update, returning the attributes whose value changed
    pub fn apply(&mut self, update: &StateUpdate, silence_warnings: bool) -> StateChanges {
        let mut unstamped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut skipped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut stamps: Vec<(&'static str, i64)> = Vec::new();
        let mut accepted: Vec<(&'static str, &Value)> = Vec::new();

        for (name, value) in update.iter() {
            let Some(spec) = attribute_spec(name) else {
                continue;
            };
            if let Some(ts) = spec.timestamp_source {
                match update.int(ts) {
                    None => {
                        if !silence_warnings {
                            unstamped.entry(ts).or_default().push(name);
                        }
                    }
                    Some(stamp) if self.last_updated(name).unwrap_or(-1) > stamp => {
                        skipped.entry(ts).or_default().push(name);
                        continue;
                    }
                    Some(stamp) => stamps.push((spec.name, stamp)),
                }
            }
            accepted.push((spec.name, value));
        }

        for (ts, names) in unstamped {
            debug!(
                "Updating attributes {} without timestamp provided at {}",
                names.join(", "),
                ts
            );
        }
        for (ts, names) in skipped {
            debug!(
                "Skipping attributes {} update due to timestamp {} deviation",
                names.join(", "),
                ts
            );
        }

        let mut changes = StateChanges::new();
        for (name, value) in accepted {
            let previous = self.attribute_value(name);
            self.assign(name, value);
            let current = self.attribute_value(name);
            if current != previous
                && let Some(normalized) = current
            {
                changes.insert(name, normalized);
            }
        }
        self.last_updated.extend(stamps);
        changes
    }

    /// Rotation rendered as one of 16 compass points
    pub fn direction(&self) -> &'static str {
        let degrees = self.rotation.unwrap_or(0.0);
        let sector = 360.0 / COMPASS_POINTS.len() as f64;
        let index = (degrees / sector).round() as i64;
        COMPASS_POINTS[index.rem_euclid(COMPASS_POINTS.len() as i64) as usize]
    }
}
