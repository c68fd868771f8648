//! Pandora Car Alarm System client
//!
//! Async client for the Pandora Online (pro.p-on.ru) service. It authenticates
//! an account, lists the devices bound to it, tracks their state through HTTP
//! polling or the WebSocket push channel, and sends remote commands.
//!
//! # Example
//!
//! ```ignore
//! use pandora_cas::{PandoraAccount, PandoraClientConfig};
//!
//! let account = PandoraAccount::new(PandoraClientConfig::new("login", "password"))?;
//! account.authenticate(None).await?;
//! account.refresh_devices().await?;
//! account.request_updates(None).await?;
//!
//! for device in account.devices() {
//!     println!("{device}: {:?}", device.state());
//! }
//! ```

pub mod account;
pub mod api;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod http;
pub mod listener;
pub mod model;
pub mod ws;

pub use account::{PandoraAccount, UpdateBatch};
pub use api::{Credentials, PandoraApi};
pub use config::PandoraClientConfig;
pub use device::PandoraDevice;
pub use error::{PandoraError, Result};
pub use listener::{
    ChannelListener, CommandReply, DispatchOutcome, ListenOptions, UpdateListener,
    UpdateMessage,
};
pub use model::{
    BitStatus, CommandId, CurrentState, Features, StateChanges, StateUpdate, TrackingEvent,
    TrackingPoint,
};
