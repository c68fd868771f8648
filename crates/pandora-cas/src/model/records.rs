//! Nested records carried inside state payloads

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::conv::{self, FromValue};
use super::enums::FuelConsumptionType;

fn as_map<'a>(value: &'a Value, record: &str) -> Option<&'a Map<String, Value>> {
    let map = value.as_object();
    if map.is_none() {
        warn!("Cannot build {} from non-mapping value {}", record, value);
    }
    map
}

/// Required field; logs and gives up the record when missing
fn required<T>(value: Option<T>, record: &str, key: &str) -> Option<T> {
    if value.is_none() {
        warn!("{} is missing required field '{}'", record, key);
    }
    value
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Balance {
    pub value: Option<f64>,
    pub currency: Option<String>,
}

impl FromValue for Balance {
    fn from_value(value: &Value) -> Option<Self> {
        let map = as_map(value, "Balance")?;
        Some(Self {
            value: conv::float(map.get("value")),
            currency: conv::text(map.get("cur")),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FuelTank {
    pub id: i64,
    pub value: Option<f64>,
    pub consumption: Option<f64>,
    pub consumption_total: Option<f64>,
    pub consumption_since_refuel: Option<f64>,
    pub consumption_type: Option<FuelConsumptionType>,
}

impl FromValue for FuelTank {
    fn from_value(value: &Value) -> Option<Self> {
        let map = as_map(value, "FuelTank")?;
        Some(Self {
            id: conv::int(map.get("id")).unwrap_or(0),
            value: conv::float(map.get("val")),
            consumption: conv::float(map.get("ras")),
            consumption_total: conv::float(map.get("ras_a")),
            consumption_since_refuel: conv::float(map.get("ras_z")),
            consumption_type: conv::fuel_consumption_type(map.get("ras_t")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimCard {
    pub phone: String,
    pub is_active: bool,
    pub balance: Option<Balance>,
}

impl FromValue for SimCard {
    fn from_value(value: &Value) -> Option<Self> {
        let map = as_map(value, "SimCard")?;
        let phone = map.get("phoneNumber").map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
        Some(Self {
            phone: required(phone, "SimCard", "phoneNumber")?,
            is_active: conv::boolean(map.get("isActive")).unwrap_or(false),
            balance: conv::object(map.get("balance")),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiquidSensor {
    pub identifier: i64,
    pub level: Option<f64>,
    pub temperature: Option<f64>,
    pub unit: Option<i64>,
    pub voltage: Option<f64>,
}

impl LiquidSensor {
    pub fn is_percentage(&self) -> bool {
        self.unit == Some(1)
    }

    pub fn is_liters(&self) -> bool {
        self.unit == Some(2)
    }
}

impl FromValue for LiquidSensor {
    fn from_value(value: &Value) -> Option<Self> {
        let map = as_map(value, "LiquidSensor")?;
        Some(Self {
            identifier: required(conv::int(map.get("num")), "LiquidSensor", "num")?,
            level: conv::float(map.get("level")),
            temperature: conv::float(map.get("temp")),
            unit: conv::int(map.get("unit")),
            voltage: conv::float(map.get("voltage")),
        })
    }
}

/// Diagnostic trouble code
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObdCode {
    pub code: String,
    pub timestamp: Option<i64>,
}

impl FromValue for ObdCode {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(code) => Some(Self {
                code: code.clone(),
                timestamp: None,
            }),
            Value::Number(code) => Some(Self {
                code: code.to_string(),
                timestamp: None,
            }),
            Value::Object(map) => {
                let code = conv::text(map.get("code"));
                Some(Self {
                    code: required(code, "ObdCode", "code")?,
                    timestamp: conv::int(map.get("dtime")),
                })
            }
            other => {
                warn!("Cannot build ObdCode from {}", other);
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsTrackPoint {
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub fuel: Option<i64>,
    pub speed: Option<i64>,
    pub flags: Option<i64>,
}

impl FromValue for WsTrackPoint {
    fn from_value(value: &Value) -> Option<Self> {
        let map = as_map(value, "WsTrackPoint")?;
        let timestamp = conv::int(conv::first(map, &["dtime", "ts"]));
        Some(Self {
            timestamp: required(timestamp, "WsTrackPoint", "dtime")?,
            latitude: required(conv::float(map.get("x")), "WsTrackPoint", "x")?,
            longitude: required(conv::float(map.get("y")), "WsTrackPoint", "y")?,
            fuel: conv::int(map.get("fuel")),
            speed: conv::int(map.get("speed")),
            flags: conv::int(map.get("flags")),
        })
    }
}

/// Track currently being recorded, as pushed in state updates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WsTrack {
    pub identifier: i64,
    pub length: Option<f64>,
    pub speed: Option<i64>,
    pub points: Vec<WsTrackPoint>,
}

impl FromValue for WsTrack {
    fn from_value(value: &Value) -> Option<Self> {
        let map = as_map(value, "WsTrack")?;
        Some(Self {
            identifier: required(conv::int(map.get("id")), "WsTrack", "id")?,
            length: conv::float(map.get("length")),
            speed: conv::int(map.get("speed")),
            points: conv::list(map.get("points")),
        })
    }
}

/// Track as returned by `/api/tracks/data`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HttpTrack {
    pub identifier: i64,
    pub length: Option<f64>,
    pub speed: Option<i64>,
    pub points: Vec<WsTrackPoint>,
    pub is_closed: Option<bool>,
    pub start_timestamp: Option<i64>,
    pub end_timestamp: Option<i64>,
}

impl FromValue for HttpTrack {
    fn from_value(value: &Value) -> Option<Self> {
        let map = as_map(value, "HttpTrack")?;
        Some(Self {
            identifier: required(conv::int(map.get("id")), "HttpTrack", "id")?,
            length: conv::float(map.get("length")),
            speed: conv::int(map.get("speed")),
            points: conv::list(conv::first(map, &["points", "items"])),
            is_closed: conv::boolean(map.get("closed")),
            start_timestamp: conv::int(map.get("start")),
            end_timestamp: conv::int(map.get("end")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fuel_tank() {
        let tank = FuelTank::from_value(&json!({
            "id": "2", "val": "41.5", "ras": 8.1, "ras_t": 1, "m": 0
        }))
        .unwrap();
        assert_eq!(tank.id, 2);
        assert_eq!(tank.value, Some(41.5));
        assert_eq!(tank.consumption, Some(8.1));
        assert_eq!(tank.consumption_type, Some(FuelConsumptionType::LitersPer100Km));
        assert_eq!(tank.consumption_total, None);
    }

    #[test]
    fn test_sim_card_requires_phone() {
        let sim = SimCard::from_value(&json!({
            "phoneNumber": "+79001234567",
            "isActive": 1,
            "balance": {"value": "150.20", "cur": "RUB"}
        }))
        .unwrap();
        assert!(sim.is_active);
        assert_eq!(sim.balance.unwrap().value, Some(150.2));

        assert!(SimCard::from_value(&json!({"isActive": true})).is_none());
    }

    #[test]
    fn test_empty_balance_is_absent() {
        let sim = SimCard::from_value(&json!({"phoneNumber": "1", "balance": {}})).unwrap();
        assert!(sim.balance.is_none());
    }

    #[test]
    fn test_liquid_sensor_units() {
        let sensor = LiquidSensor::from_value(&json!({"num": 1, "level": 40, "unit": 2}))
            .unwrap();
        assert!(sensor.is_liters());
        assert!(!sensor.is_percentage());
    }

    #[test]
    fn test_obd_code_shapes() {
        let code = ObdCode::from_value(&json!("P0301")).unwrap();
        assert_eq!(code.code, "P0301");
        let code = ObdCode::from_value(&json!(420)).unwrap();
        assert_eq!(code.code, "420");
        let code = ObdCode::from_value(&json!({"code": "P0171", "dtime": 1700000000})).unwrap();
        assert_eq!(code.timestamp, Some(1_700_000_000));
    }

    #[test]
    fn test_http_track_items() {
        let track = HttpTrack::from_value(&json!({
            "id": 7,
            "closed": 1,
            "items": [
                {"ts": 100, "x": 55.1, "y": 37.2, "speed": 40},
                {"dtime": 101, "x": 55.2},
            ]
        }))
        .unwrap();
        assert_eq!(track.identifier, 7);
        assert_eq!(track.is_closed, Some(true));
        assert_eq!(track.points.len(), 1);
        assert_eq!(track.points[0].timestamp, 100);
    }
}
