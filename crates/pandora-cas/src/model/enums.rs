//! Vendor code enumerations

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::PandoraError;

/// Normalize a textual name for loose matching: `start-engine`, `START_ENGINE`
/// and `StartEngine` all compare equal
fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

macro_rules! code_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident: $repr:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $code, )*
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$( Self::$variant, )*];

            pub const fn code(self) -> $repr {
                self as $repr
            }

            pub fn from_code(code: $repr) -> Option<Self> {
                match code {
                    $( $code => Some(Self::$variant), )*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => stringify!($variant), )*
                }
            }
        }

        impl From<$name> for $repr {
            fn from(value: $name) -> $repr {
                value as $repr
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.code().serialize(serializer)
            }
        }

        /// Accepts either the numeric code or the name in any case/separator style
        impl FromStr for $name {
            type Err = PandoraError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if let Ok(code) = s.trim().parse::<$repr>() {
                    return Self::from_code(code).ok_or_else(|| {
                        PandoraError::InvalidArgument(format!(
                            "unknown {} code {}",
                            stringify!($name),
                            code
                        ))
                    });
                }
                let wanted = normalize(s);
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| normalize(v.name()) == wanted)
                    .ok_or_else(|| {
                        PandoraError::InvalidArgument(format!(
                            "unknown {} name '{}'",
                            stringify!($name),
                            s
                        ))
                    })
            }
        }
    };
}

code_enum! {
    /// Remote commands accepted by `/api/devices/command`
    pub enum CommandId: u32 {
        Lock = 1,
        Unlock = 2,
        StartEngine = 4,
        StopEngine = 8,
        EnableTracking = 16,
        DisableTracking = 32,
        EnableActiveSecurity = 17,
        DisableActiveSecurity = 18,
        TurnOnBlockHeater = 21,
        TurnOffBlockHeater = 22,
        /// Timer channel
        TurnOnExtChannel = 33,
        TurnOffExtChannel = 34,
        EnableServiceMode = 40,
        DisableServiceMode = 41,
        EnableStatusOutput = 48,
        DisableStatusOutput = 49,
        TriggerHorn = 23,
        TriggerLight = 24,
        TriggerTrunk = 35,
        Check = 255,
        EraseDtc = 57856,
        ReadDtc = 57857,
        AdditionalCommand1 = 100,
        AdditionalCommand2 = 128,
        EnableConnection = 240,
        DisableConnection = 15,
        Nav12DisableServiceMode = 57374,
        Nav12EnableServiceMode = 57375,
        Nav12TurnOffBlockHeater = 57353,
        Nav12TurnOnBlockHeater = 57354,
        /// Reset heater errors
        Nav12ResetErrors = 57408,
        Nav12EnableStatusOutput = 57372,
        Nav12DisableStatusOutput = 57371,
        BenishDisableServiceMode = 57632,
        BenishEnableServiceMode = 57633,
        BenishDisableEngineBlocking = 57346,
        BenishEnableEngineBlocking = 57347,
        /// Takes the `climate_temp` parameter
        ClimateSetTemperature = 58624,
        ClimateSeatHeatTurnOn = 58625,
        ClimateSeatHeatTurnOff = 58626,
        ClimateSeatVentTurnOn = 58627,
        ClimateSeatVentTurnOff = 58628,
        ClimateGlassHeatTurnOn = 58629,
        ClimateGlassHeatTurnOff = 58630,
        ClimateSteeringHeatTurnOn = 58631,
        ClimateSteeringHeatTurnOff = 58632,
        ClimateAcTurnOn = 58633,
        ClimateAcTurnOff = 58634,
        ClimateSysTurnOn = 58635,
        ClimateSysTurnOff = 58636,
        ClimateDefrosterTurnOn = 58637,
        ClimateDefrosterTurnOff = 58638,
        ClimateModeComfort = 58639,
        ClimateModeVent = 58640,
        ClimateBatteryHeatTurnOn = 58647,
        ClimateBatteryHeatTurnOff = 58648,
        EnableStealthMode = 50,
        StayHomePropion = 42,
        PsCall = 256,
    }
}

code_enum! {
    pub enum EventType: u16 {
        Locked = 1,
        Unlocked = 2,
        Alert = 3,
        EngineStarted = 4,
        Engine = 5,
        GearChange = 6,
        ServiceMode = 7,
        SettingsChange = 8,
        FuelRefill = 9,
        Collision = 10,
        NetworkReception = 11,
        EmergencyCall = 12,
        TrunkOpenAlert = 17,
        VoltageAlert = 19,
        ActiveSecurityEnabled = 32,
        PreHeaterEnabled = 35,
    }
}

code_enum! {
    /// Secondary code of alert events
    pub enum AlertType: u16 {
        Battery = 1,
        ExtSensorWarningZone = 2,
        ExtSensorMainZone = 3,
        CrackSensorWarningZone = 4,
        CrackSensorMainZone = 5,
        BrakePedalPressed = 6,
        HandbrakeEngaged = 7,
        InclineDetected = 8,
        MovementDetected = 9,
        EngineIgnition = 10,
    }
}

code_enum! {
    pub enum PrimaryEventId: u16 {
        Unknown = 0,
        LockingEnabled = 1,
        LockingDisabled = 2,
        Alert = 3,
        EngineStarted = 4,
        EngineStopped = 5,
        EngineLocked = 6,
        ServiceModeEnabled = 7,
        SettingsChanged = 8,
        Refuel = 9,
        Collision = 10,
        GsmConnection = 11,
        EmergencyCall = 12,
        FailedStartAttempt = 13,
        TrackingEnabled = 14,
        TrackingDisabled = 15,
        SystemPowerLoss = 16,
        SecureTrunkOpen = 17,
        FactoryTesting = 18,
        PowerDip = 19,
        CheckReceived = 20,
        SystemLogin = 29,
        ActiveSecurityEnabled = 32,
        ActiveSecurityDisabled = 33,
        ActiveSecurityAlert = 34,
        BlockHeaterEnabled = 35,
        BlockHeaterDisabled = 36,
        RoughRoadConditions = 37,
        Driving = 38,
        EngineRunningProlongation = 40,
        ServiceModeDisabled = 41,
        GsmChannelEnabled = 42,
        GsmChannelDisabled = 43,
        Nav11Status = 48,
        DtcReadRequest = 166,
        DtcReadError = 167,
        DtcReadActive = 168,
        DtcEraseRequest = 169,
        DtcEraseActive = 170,
        SystemMessage = 176,
        EcoModeEnabled = 177,
        EcoModeDisabled = 178,
        TirePressureLow = 179,
        BluetoothStatus = 220,
        TagRequirementEnabled = 230,
        TagRequirementDisabled = 231,
        TagPollingEnabled = 232,
        TagPollingDisabled = 233,
        Point = 250,
    }
}

impl PrimaryEventId {
    /// Map any event code, falling back to [`PrimaryEventId::Unknown`]
    pub fn from_event_code(code: Option<i64>) -> Self {
        code.and_then(|c| u16::try_from(c).ok())
            .and_then(Self::from_code)
            .unwrap_or(Self::Unknown)
    }
}

code_enum! {
    pub enum FuelConsumptionType: u8 {
        LitersPer100Km = 1,
        LitersPerHour = 2,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Alarm,
    Nav8,
    Nav12,
}

impl FromStr for DeviceType {
    type Err = PandoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alarm" => Ok(Self::Alarm),
            "nav8" => Ok(Self::Nav8),
            "nav12" => Ok(Self::Nav12),
            other => Err(PandoraError::InvalidArgument(format!(
                "unknown device type '{other}'"
            ))),
        }
    }
}

/// Push message kinds delivered over WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WsMessageType {
    InitialState,
    State,
    Point,
    Command,
    Event,
    UpdateSettings,
}

impl WsMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InitialState => "initial-state",
            Self::State => "state",
            Self::Point => "point",
            Self::Command => "command",
            Self::Event => "event",
            Self::UpdateSettings => "update-settings",
        }
    }
}

impl FromStr for WsMessageType {
    type Err = PandoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial-state" => Ok(Self::InitialState),
            "state" => Ok(Self::State),
            "point" => Ok(Self::Point),
            "command" => Ok(Self::Command),
            "event" => Ok(Self::Event),
            "update-settings" => Ok(Self::UpdateSettings),
            other => Err(PandoraError::InvalidArgument(format!(
                "unknown message type '{other}'"
            ))),
        }
    }
}

/// Names of command parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandParam {
    ClimateTemp,
}

impl CommandParam {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClimateTemp => "climate_temp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CarType {
    Car,
    Truck,
    Moto,
}

impl CarType {
    pub fn from_id(id: i64) -> Self {
        match id {
            1 => Self::Truck,
            2 => Self::Moto,
            _ => Self::Car,
        }
    }
}
