//! Bit flag sets reported by devices

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

macro_rules! flag_set {
    (
        $(#[$meta:meta])*
        pub struct $name:ident {
            $( $(#[$fmeta:meta])* const $flag:ident = $value:expr; )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            $( $(#[$fmeta])* pub const $flag: Self = Self($value); )*

            const NAMED: &'static [(&'static str, Self)] = &[
                $( (stringify!($flag), Self::$flag), )*
            ];

            pub const fn empty() -> Self {
                Self(0)
            }

            /// Keep every bit, including ones without a name
            pub const fn from_bits_retain(bits: u64) -> Self {
                Self(bits)
            }

            pub const fn bits(&self) -> u64 {
                self.0
            }

            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }

            pub const fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(&self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            /// Names of the set flags, in declaration order
            pub fn iter_names(&self) -> impl Iterator<Item = &'static str> + '_ {
                Self::NAMED
                    .iter()
                    .filter(move |(_, flag)| self.contains(*flag))
                    .map(|(name, _)| *name)
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let names: Vec<&str> = self.iter_names().collect();
                if names.is_empty() {
                    write!(f, "{}({:#x})", stringify!($name), self.0)
                } else {
                    write!(f, "{}({})", stringify!($name), names.join(" | "))
                }
            }
        }
    };
}

flag_set! {
    /// Decoded `bit_state_1` value
    pub struct BitStatus {
        const LOCKED = 1 << 0;
        const ALARM = 1 << 1;
        const ENGINE_RUNNING = 1 << 2;
        const IGNITION = 1 << 3;
        /// Autostart is running right now
        const AUTOSTART_ACTIVE = 1 << 4;
        const HANDS_FREE_LOCKING = 1 << 5;
        const HANDS_FREE_UNLOCKING = 1 << 6;
        const GSM_ACTIVE = 1 << 7;
        const GPS_ACTIVE = 1 << 8;
        const TRACKING_ENABLED = 1 << 9;
        const ENGINE_LOCKED = 1 << 10;
        const EXT_SENSOR_ALERT_ZONE = 1 << 11;
        const EXT_SENSOR_MAIN_ZONE = 1 << 12;
        const SENSOR_ALERT_ZONE = 1 << 13;
        const SENSOR_MAIN_ZONE = 1 << 14;
        /// Autostart function is enabled
        const AUTOSTART_ENABLED = 1 << 15;
        const INCOMING_SMS_ENABLED = 1 << 16;
        const INCOMING_CALLS_ENABLED = 1 << 17;
        const EXTERIOR_LIGHTS_ACTIVE = 1 << 18;
        const SIREN_WARNINGS_ENABLED = 1 << 19;
        const SIREN_SOUND_ENABLED = 1 << 20;
        const DOOR_DRIVER_OPEN = 1 << 21;
        const DOOR_PASSENGER_OPEN = 1 << 22;
        const DOOR_BACK_LEFT_OPEN = 1 << 23;
        const DOOR_BACK_RIGHT_OPEN = 1 << 24;
        const TRUNK_OPEN = 1 << 25;
        const HOOD_OPEN = 1 << 26;
        const HANDBRAKE_ENGAGED = 1 << 27;
        const BRAKES_ENGAGED = 1 << 28;
        /// Pre-start heater is running
        const BLOCK_HEATER_ACTIVE = 1 << 29;
        const ACTIVE_SECURITY_ENABLED = 1 << 30;
        /// Pre-start heater function is available
        const BLOCK_HEATER_ENABLED = 1 << 31;
        const EVACUATION_MODE_ACTIVE = 1 << 33;
        const SERVICE_MODE_ACTIVE = 1 << 34;
        const STAY_HOME_ACTIVE = 1 << 35;
        const SECURITY_TAGS_IGNORED = 1 << 60;
        const SECURITY_TAGS_ENFORCED = 1 << 61;
    }
}

flag_set! {
    /// Capabilities advertised in the device `features` mapping
    pub struct Features {
        const ACTIVE_SECURITY = 1 << 0;
        const AUTO_CHECK = 1 << 1;
        const AUTOSTART = 1 << 2;
        const BEEP = 1 << 3;
        const BENISH = 1 << 4;
        const BLUETOOTH = 1 << 5;
        const CAMPER = 1 << 6;
        const CHANNEL = 1 << 7;
        const CONNECTION = 1 << 8;
        const CUSTOM_PHONES = 1 << 9;
        const EVENTS = 1 << 10;
        const EXTEND_PROPS = 1 << 11;
        const HEATER = 1 << 12;
        const HEATER_FROM_40 = 1 << 13;
        const KEEP_ALIVE = 1 << 14;
        const LIGHT = 1 << 15;
        const MOTO = 1 << 16;
        const NAV = 1 << 17;
        const NAV11 = 1 << 18;
        const NAV12 = 1 << 19;
        const NAV12EGTS = 1 << 20;
        const NO_AUTORUN = 1 << 21;
        const NO_FUEL = 1 << 22;
        const NO_HEAT = 1 << 23;
        const NO_NOTIFICATION = 1 << 24;
        const NO_SENSORS = 1 << 25;
        const NO_SETTINGS = 1 << 26;
        const NO_TRACK = 1 << 27;
        const NOAPPSETT = 1 << 28;
        const NOTIFICATION = 1 << 29;
        const OBD_CODES = 1 << 30;
        const SAVE_MODE_TIME = 1 << 31;
        const SCHEDULE = 1 << 32;
        const SENSORS = 1 << 33;
        const STEALTH_MODE = 1 << 34;
        const SUBSCRIPTION = 1 << 35;
        const TRACK = 1 << 36;
        const TRACKING = 1 << 37;
        const TRUNK = 1 << 38;
        const VALUE_100 = 1 << 39;
        const WATCH_LIKE_TAG = 1 << 40;
    }
}

impl Features {
    /// Decode a `features` mapping; `None` when no known feature is enabled
    pub fn from_map(map: &Map<String, Value>) -> Option<Self> {
        let mut features = Self::empty();
        for (name, flag) in Self::NAMED {
            let enabled = match map.get(&name.to_ascii_lowercase()) {
                Some(Value::Bool(b)) => *b,
                Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v > 0.0),
                Some(Value::String(s)) => s.trim().parse::<f64>().is_ok_and(|v| v > 0.0),
                _ => false,
            };
            if enabled {
                features.insert(*flag);
            }
        }
        (!features.is_empty()).then_some(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bit_status_contains() {
        let status = BitStatus::from_bits_retain(0b101);
        assert!(status.contains(BitStatus::LOCKED));
        assert!(status.contains(BitStatus::ENGINE_RUNNING));
        assert!(!status.contains(BitStatus::ALARM));
        assert!(status.intersects(BitStatus::LOCKED | BitStatus::ALARM));
    }

    #[test]
    fn test_bit_status_retains_unknown_bits() {
        let status = BitStatus::from_bits_retain(1 << 32 | 1);
        assert_eq!(status.bits(), (1 << 32) | 1);
        assert_eq!(status.iter_names().collect::<Vec<_>>(), vec!["LOCKED"]);
    }

    #[test]
    fn test_high_bits() {
        let status = BitStatus::from_bits_retain(1 << 61);
        assert!(status.contains(BitStatus::SECURITY_TAGS_ENFORCED));
        assert_eq!(format!("{:?}", status), "BitStatus(SECURITY_TAGS_ENFORCED)");
    }

    #[test]
    fn test_features_from_map() {
        let map = json!({"heater": 1, "autostart": true, "beep": 0, "nav12": "2", "x": 1});
        let features = Features::from_map(map.as_object().unwrap()).unwrap();
        assert!(features.contains(Features::HEATER));
        assert!(features.contains(Features::AUTOSTART));
        assert!(features.contains(Features::NAV12));
        assert!(!features.contains(Features::BEEP));
    }

    #[test]
    fn test_features_absent_when_nothing_enabled() {
        let map = json!({"heater": 0, "unknown": 5});
        assert!(Features::from_map(map.as_object().unwrap()).is_none());
    }
}
