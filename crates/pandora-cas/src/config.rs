// Configuration for PandoraAccount and its HTTP transport

use chrono::{Local, Offset};

use crate::constants::{
    DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_CONTROL_TIMEOUT_MS,
    DEFAULT_LANGUAGE, DEFAULT_MAX_RETRIES, DEFAULT_READ_TIMEOUT_MS,
    DEFAULT_RETRY_BACKOFF_MS,
};
use crate::error::{PandoraError, Result};

/// Seconds in a day; UTC offsets must stay strictly inside this bound
const DAY_SECS: i32 = 86_400;

/// Configuration for the Pandora Online client
#[derive(Clone, Debug)]
pub struct PandoraClientConfig {
    /// API host (default: "https://pro.p-on.ru")
    pub base_url: String,
    /// Account login
    pub username: String,
    /// Account password
    pub password: String,
    /// Previously issued access token to try before fetching a new one
    pub access_token: Option<String>,
    /// Interface language sent on login and geocoding (default: "ru")
    pub language: String,
    /// Account UTC offset in seconds
    pub utc_offset: i32,
    /// Connection timeout in milliseconds (default: 5000)
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds (default: 30000)
    pub read_timeout_ms: u64,
    /// Extra attempts on connect/timeout errors (default: 2)
    pub max_retries: u32,
    /// Linear back-off step between attempts in milliseconds (default: 500)
    pub retry_backoff_ms: u64,
    /// How long a device waits for command confirmation (default: 30000)
    pub control_timeout_ms: u64,
    /// Suppress debug notes about state updates without timestamps
    pub silence_update_warnings: bool,
}

impl Default for PandoraClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            username: String::new(),
            password: String::new(),
            access_token: None,
            language: DEFAULT_LANGUAGE.to_string(),
            utc_offset: 0,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            control_timeout_ms: DEFAULT_CONTROL_TIMEOUT_MS,
            silence_update_warnings: true,
        }
    }
}

impl PandoraClientConfig {
    /// Create a config for the given credentials against the production host
    pub fn new(username: &str, password: &str) -> Self {
        Self::default().with_auth(username, password)
    }

    /// Set authentication credentials
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }

    /// Point the client at another host (test servers, mirrors)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_access_token(mut self, access_token: &str) -> Self {
        self.access_token = Some(access_token.to_string());
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = language.to_string();
        self
    }

    pub fn with_utc_offset(mut self, utc_offset: i32) -> Self {
        self.utc_offset = utc_offset;
        self
    }

    /// Use the UTC offset of the local timezone
    pub fn with_local_utc_offset(mut self) -> Self {
        self.utc_offset = Local::now().offset().fix().local_minus_utc();
        self
    }

    /// Set timeouts
    pub fn with_timeouts(mut self, connect_ms: u64, read_ms: u64) -> Self {
        self.connect_timeout_ms = connect_ms;
        self.read_timeout_ms = read_ms;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff_ms = backoff_ms;
        self
    }

    pub fn with_control_timeout(mut self, control_timeout_ms: u64) -> Self {
        self.control_timeout_ms = control_timeout_ms;
        self
    }

    pub fn with_silence_update_warnings(mut self, silence: bool) -> Self {
        self.silence_update_warnings = silence;
        self
    }

    /// Check values that would otherwise surface as confusing server errors
    pub fn validate(&self) -> Result<()> {
        if !(-DAY_SECS < self.utc_offset && self.utc_offset < DAY_SECS) {
            return Err(PandoraError::InvalidArgument(
                "utc offset cannot be greater than 24 hours".to_string(),
            ));
        }
        if self.base_url.is_empty() {
            return Err(PandoraError::InvalidArgument(
                "base url must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
