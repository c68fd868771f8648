// Pandora Online endpoint paths and protocol constants

/// Production API host
pub const DEFAULT_BASE_URL: &str = "https://pro.p-on.ru";

/// Basic credentials of the official mobile client, used to obtain access tokens
pub const OAUTH_HEADER: &str = "Basic cGNvbm5lY3Q6SW5mXzRlUm05X2ZfaEhnVl9zNg==";

pub const DEFAULT_LANGUAGE: &str = "ru";

/// Login API revision
pub const LOGIN_API_VERSION: &str = "3";

pub const DEFAULT_CONTROL_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;

pub const WS_HEARTBEAT_SECS: u64 = 15;
pub const DEFAULT_WS_READ_TIMEOUT_SECS: u64 = 180;
pub const WS_RECONNECT_DELAY_SECS: u64 = 3;

/// Default number of events requested from the event feed
pub const DEFAULT_EVENTS_LIMIT: u32 = 20;

pub mod api_path {
    // Auth
    pub const OAUTH_TOKEN: &str = "/oauth/token";
    pub const USERS_LOGIN: &str = "/api/users/login";
    pub const IAMALIVE: &str = "/api/iamalive";

    // Devices
    pub const DEVICES: &str = "/api/devices";
    pub const DEVICES_COMMAND: &str = "/api/devices/command";
    pub const DEVICES_WAKEUP: &str = "/api/devices/wakeup";
    pub const DEVICES_SYSTEM: &str = "/api/devices/system";
    pub const DEVICES_SETTINGS: &str = "/api/devices/settings";

    // Tracking
    pub const TRACKS_DATA: &str = "/api/tracks/data";
    pub const LENTA: &str = "/api/lenta";
    pub const UPDATES: &str = "/api/updates";
    pub const GEO: &str = "/api/geo";

    // Push
    pub const WS_UPDATES: &str = "/api/v4/updates/ws";
}
