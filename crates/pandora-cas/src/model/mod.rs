//! Data model for Pandora Online payloads

pub mod conv;
pub mod enums;
pub mod event;
pub mod flags;
pub mod records;
pub mod state;

pub use enums::{
    AlertType, CarType, CommandId, CommandParam, DeviceType, EventType,
    FuelConsumptionType, PrimaryEventId, WsMessageType,
};
pub use event::{TrackingEvent, TrackingPoint};
pub use flags::{BitStatus, Features};
pub use records::{
    Balance, FuelTank, HttpTrack, LiquidSensor, ObdCode, SimCard, WsTrack, WsTrackPoint,
};
pub use state::{CurrentState, StateChanges, StateUpdate};
