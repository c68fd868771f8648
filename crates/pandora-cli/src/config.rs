//! Configuration loading: file, `PANDORA_` environment, command line

use config::{Config, Environment, File};
use pandora_cas::PandoraClientConfig;
use pandora_cas::constants::{
    DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_CONTROL_TIMEOUT_MS,
    DEFAULT_LANGUAGE, DEFAULT_MAX_RETRIES, DEFAULT_READ_TIMEOUT_MS, DEFAULT_RETRY_BACKOFF_MS,
};

use crate::Cli;

const USERNAME: &str = "username";
const PASSWORD: &str = "password";
const ACCESS_TOKEN: &str = "access_token";
const BASE_URL: &str = "base_url";
const LANGUAGE: &str = "language";
const UTC_OFFSET: &str = "utc_offset";
const CONNECT_TIMEOUT_MS: &str = "connect_timeout_ms";
const READ_TIMEOUT_MS: &str = "read_timeout_ms";
const MAX_RETRIES: &str = "max_retries";
const RETRY_BACKOFF_MS: &str = "retry_backoff_ms";
const CONTROL_TIMEOUT_MS: &str = "control_timeout_ms";
const LOG_LEVEL: &str = "log_level";

/// Layered client configuration
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Later sources win: file, then environment, then command line
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name(&cli.config).required(false))
            .add_source(Environment::with_prefix("PANDORA").try_parsing(true));

        for (key, value) in [
            (USERNAME, &cli.username),
            (PASSWORD, &cli.password),
            (BASE_URL, &cli.base_url),
            (LANGUAGE, &cli.language),
            (LOG_LEVEL, &cli.log_level),
        ] {
            if let Some(value) = value {
                builder = builder.set_override(key, value.as_str())?;
            }
        }

        Ok(Self {
            config: builder.build()?,
        })
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        self.config
            .get_string(key)
            .unwrap_or_else(|_| default.to_string())
    }

    fn u64_or(&self, key: &str, default: u64) -> u64 {
        self.config
            .get_int(key)
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(default)
    }

    pub fn username(&self) -> String {
        self.string_or(USERNAME, "")
    }

    pub fn password(&self) -> String {
        self.string_or(PASSWORD, "")
    }

    pub fn access_token(&self) -> Option<String> {
        self.config
            .get_string(ACCESS_TOKEN)
            .ok()
            .filter(|token| !token.is_empty())
    }

    pub fn base_url(&self) -> String {
        self.string_or(BASE_URL, DEFAULT_BASE_URL)
    }

    pub fn language(&self) -> String {
        self.string_or(LANGUAGE, DEFAULT_LANGUAGE)
    }

    pub fn utc_offset(&self) -> Option<i64> {
        self.config.get_int(UTC_OFFSET).ok()
    }

    pub fn log_level(&self) -> String {
        self.string_or(LOG_LEVEL, "info")
    }

    pub fn to_client_config(&self) -> anyhow::Result<PandoraClientConfig> {
        let mut config = PandoraClientConfig::new(&self.username(), &self.password())
            .with_base_url(&self.base_url())
            .with_language(&self.language())
            .with_timeouts(
                self.u64_or(CONNECT_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS),
                self.u64_or(READ_TIMEOUT_MS, DEFAULT_READ_TIMEOUT_MS),
            )
            .with_retries(
                self.config
                    .get_int(MAX_RETRIES)
                    .ok()
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(DEFAULT_MAX_RETRIES),
                self.u64_or(RETRY_BACKOFF_MS, DEFAULT_RETRY_BACKOFF_MS),
            )
            .with_control_timeout(self.u64_or(CONTROL_TIMEOUT_MS, DEFAULT_CONTROL_TIMEOUT_MS));

        config = match self.utc_offset() {
            Some(offset) => config.with_utc_offset(i32::try_from(offset)?),
            None => config.with_local_utc_offset(),
        };
        if let Some(token) = self.access_token() {
            config = config.with_access_token(&token);
        }

        config.validate()?;
        Ok(config)
    }
}
