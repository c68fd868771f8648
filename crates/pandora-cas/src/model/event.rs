use serde::Serialize;
use serde_json::{Map, Value};

use super::conv;
use super::enums::PrimaryEventId;
use super::flags::BitStatus;

/// Entry of the event feed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackingEvent {
    pub identifier: Option<i64>,
    pub event_id_primary: Option<i64>,
    pub event_id_secondary: Option<i64>,
    pub event_type: Option<i64>,

    pub device_id: Option<u64>,
    pub timestamp: Option<i64>,
    pub recorded_timestamp: Option<i64>,
    pub timezone: Option<i64>,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub rotation: Option<f64>,
    pub start_latitude: Option<f64>,
    pub start_longitude: Option<f64>,
    pub end_latitude: Option<f64>,
    pub end_longitude: Option<f64>,
    pub geozone_id: Option<i64>,
    pub length: Option<f64>,
    pub points: Option<i64>,
    pub lbs_coords: Option<bool>,

    pub bit_state: Option<BitStatus>,
    pub fuel: Option<i64>,
    pub gsm_level: Option<i64>,
    pub cabin_temperature: Option<f64>,
    pub engine_temperature: Option<f64>,
    pub exterior_temperature: Option<i64>,
    pub voltage: Option<f64>,
    pub speed: Option<f64>,
    pub engine_rpm: Option<i64>,
}

impl TrackingEvent {
    /// Build from an event object; `device_id` overrides the payload's `dev_id`
    pub fn from_map(data: &Map<String, Value>, device_id: Option<u64>) -> Self {
        Self {
            identifier: conv::int(data.get("id")),
            event_id_primary: conv::int(data.get("eventid1")),
            event_id_secondary: conv::int(data.get("eventid2")),
            event_type: conv::int(data.get("type")),
            device_id: device_id.or_else(|| conv::uint(data.get("dev_id"))),
            timestamp: conv::int(data.get("dtime")),
            recorded_timestamp: conv::int(data.get("dtime_rec")),
            timezone: conv::int(data.get("timezone")),
            latitude: conv::float(data.get("x")),
            longitude: conv::float(data.get("y")),
            rotation: conv::float(data.get("rot")),
            start_latitude: conv::float(data.get("start_x")),
            start_longitude: conv::float(data.get("start_y")),
            end_latitude: conv::float(data.get("end_x")),
            end_longitude: conv::float(data.get("end_y")),
            geozone_id: conv::int(data.get("geozone_id")),
            length: conv::float(data.get("len")),
            points: conv::int(data.get("points")),
            lbs_coords: conv::boolean(data.get("lbs_mode")),
            bit_state: conv::bit_status(data.get("bit_state_1")),
            fuel: conv::int(data.get("fuel")),
            gsm_level: conv::int(data.get("gsm_level")),
            cabin_temperature: conv::float(data.get("cabin_temp")),
            engine_temperature: conv::float(data.get("engine_temp")),
            exterior_temperature: conv::int(data.get("out_temp")),
            voltage: conv::float(data.get("voltage")),
            speed: conv::float(data.get("speed")),
            engine_rpm: conv::int(data.get("engine_rpm")),
        }
    }

    pub fn primary_event(&self) -> PrimaryEventId {
        PrimaryEventId::from_event_code(self.event_id_primary)
    }
}

/// Position report pushed while a track is recorded
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackingPoint {
    pub device_id: u64,
    pub track_id: i64,
    pub timestamp: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub lbs_coords: Option<bool>,
    pub fuel: Option<f64>,
    pub speed: Option<f64>,
    pub flags: Option<i64>,
    pub max_speed: Option<f64>,
    pub length: Option<f64>,
}

impl TrackingPoint {
    /// Build from a `point` message; `None` when the track or position is missing
    pub fn from_map(data: &Map<String, Value>, device_id: u64, timestamp: i64) -> Option<Self> {
        let latitude = conv::float(data.get("x"));
        let longitude = conv::float(data.get("y"));
        if latitude.is_none() || longitude.is_none() {
            return None;
        }
        Some(Self {
            device_id,
            track_id: conv::int(data.get("track_id"))?,
            timestamp,
            latitude,
            longitude,
            lbs_coords: conv::boolean(data.get("Lbs_coords")),
            fuel: conv::float(data.get("fuel")),
            speed: conv::float(data.get("speed")),
            flags: conv::int(data.get("flags")),
            max_speed: conv::float(data.get("max_speed")),
            length: conv::float(data.get("length")),
        })
    }
}
