// PandoraApi - typed facade over the Pandora Online HTTP endpoints

use chrono::{Duration as ChronoDuration, Local};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::config::PandoraClientConfig;
use crate::constants::{LOGIN_API_VERSION, OAUTH_HEADER, api_path};
use crate::error::{PandoraError, Result};
use crate::http::{PandoraHttpClient, expect_array, expect_object};
use crate::model::conv::{self, FromValue};
use crate::model::{HttpTrack, TrackingEvent};

#[derive(Serialize)]
struct TokenQuery<'a> {
    access_token: &'a str,
}

#[derive(Serialize)]
struct DeviceQuery<'a> {
    access_token: &'a str,
    id: u64,
}

/// Login parameters of `/api/users/login`
pub struct Credentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub language: &'a str,
    /// Seconds east of UTC
    pub utc_offset: i32,
}

/// Stateless endpoint client; only the access token is kept between calls
pub struct PandoraApi {
    http: PandoraHttpClient,
    language: String,
}

impl PandoraApi {
    pub fn new(config: &PandoraClientConfig) -> Result<Self> {
        Ok(Self {
            http: PandoraHttpClient::new(config)?,
            language: config.language.clone(),
        })
    }

    pub fn http(&self) -> &PandoraHttpClient {
        &self.http
    }

    pub fn access_token(&self) -> Option<String> {
        self.http.access_token()
    }

    // ============================================================================
    // Authentication
    // ============================================================================

    /// Validate an access token, the current one when none is given
    pub async fn check_access_token(&self, access_token: Option<&str>) -> Result<()> {
        let token = match access_token {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => self.http.require_token()?,
        };

        let (status, body) = self
            .http
            .post_form_raw(api_path::IAMALIVE, &TokenQuery { access_token: &token })
            .await?;
        if status == StatusCode::OK {
            return Ok(());
        }

        let response: Value = serde_json::from_str(&body).map_err(|_| {
            error!("Malformed access token checking response: {}", body);
            PandoraError::MalformedResponse("malformed checking response".to_string())
        })?;
        debug!("Received error for access token check: {}", response);

        let status = match response.get("status") {
            Some(Value::String(s)) => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => {
                return Err(PandoraError::AuthFailed(
                    "error contains no status".to_string(),
                ));
            }
        };

        if status.contains("expired") {
            Err(PandoraError::SessionExpired(status))
        } else if status.contains("wrong") {
            Err(PandoraError::InvalidAccessToken(status))
        } else {
            Err(PandoraError::AuthFailed(status))
        }
    }

    /// Obtain a fresh, not yet bound access token
    pub async fn fetch_access_token(&self) -> Result<String> {
        let data = expect_object(
            self.http
                .post_authorized(api_path::OAUTH_TOKEN, OAUTH_HEADER)
                .await?,
        )?;
        match data.get("access_token") {
            Some(Value::String(token)) if !token.is_empty() => Ok(token.clone()),
            _ => Err(PandoraError::MalformedResponse(
                "access token not present".to_string(),
            )),
        }
    }

    /// Bind an access token to the account, returning the user ID
    pub async fn login(&self, credentials: &Credentials<'_>, access_token: &str) -> Result<u64> {
        #[derive(Serialize)]
        struct Form<'a> {
            login: &'a str,
            password: &'a str,
            lang: &'a str,
            v: &'a str,
            utc_offset: i32,
            access_token: &'a str,
        }

        debug!("Authenticating access token: {}", access_token);
        let form = Form {
            login: credentials.username,
            password: credentials.password,
            lang: credentials.language,
            v: LOGIN_API_VERSION,
            utc_offset: credentials.utc_offset.div_euclid(60),
            access_token,
        };
        let response = self
            .http
            .post_form(api_path::USERS_LOGIN, NO_QUERY, &form)
            .await
            .and_then(expect_object);
        let data = match response {
            Ok(data) => data,
            Err(e) if e.is_auth_error() => return Err(e),
            Err(PandoraError::Api(s)) | Err(PandoraError::MalformedResponse(s)) => {
                return Err(PandoraError::AuthFailed(s));
            }
            Err(e) => return Err(e),
        };

        let user_id = data.get("user_id").ok_or_else(|| {
            PandoraError::MalformedResponse("user ID not present".to_string())
        })?;
        conv::uint(Some(user_id)).ok_or_else(|| {
            PandoraError::MalformedResponse("unexpected user ID format".to_string())
        })
    }

    // ============================================================================
    // Devices
    // ============================================================================

    /// Raw device descriptors of the account
    pub async fn fetch_devices(&self) -> Result<Vec<Map<String, Value>>> {
        let token = self.http.require_token()?;
        debug!("Retrieving devices");
        let items = expect_array(
            self.http
                .get(api_path::DEVICES, &TokenQuery { access_token: &token })
                .await?,
        )?;
        debug!("Retrieved {} devices", items.len());
        Ok(items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                other => {
                    warn!("Skipping device descriptor that is not a mapping: {}", other);
                    None
                }
            })
            .collect())
    }

    /// Submit a command; the device confirms execution separately
    pub async fn remote_command(
        &self,
        device_id: u64,
        command: u32,
        params: Option<&Map<String, Value>>,
    ) -> Result<()> {
        #[derive(Serialize)]
        struct Form {
            id: u64,
            command: u32,
            #[serde(skip_serializing_if = "Option::is_none")]
            comm_params: Option<String>,
        }

        let token = self.http.require_token()?;
        info!("Sending command {} to device {}", command, device_id);

        let comm_params = match params {
            Some(params) if !params.is_empty() => Some(serde_json::to_string(params)?),
            _ => None,
        };
        let data = expect_object(
            self.http
                .post_form(
                    api_path::DEVICES_COMMAND,
                    &TokenQuery { access_token: &token },
                    &Form {
                        id: device_id,
                        command,
                        comm_params,
                    },
                )
                .await?,
        )?;
        debug!(
            "Command {} execution on device {} response: {:?}",
            command, device_id, data
        );

        let status = data
            .get("action_result")
            .and_then(|result| result.get(device_id.to_string()))
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        if status != "sent" {
            error!(
                "Error sending command {} to device {}: {}",
                command, device_id, status
            );
            return Err(PandoraError::Api(status.to_string()));
        }

        info!("Command {} sent to device {}", command, device_id);
        Ok(())
    }

    pub async fn wake_up_device(&self, device_id: u64) -> Result<()> {
        #[derive(Serialize)]
        struct Form {
            id: u64,
        }

        let token = self.http.require_token()?;
        info!("Waking up device {}", device_id);
        let data = expect_object(
            self.http
                .post_form(
                    api_path::DEVICES_WAKEUP,
                    &TokenQuery { access_token: &token },
                    &Form { id: device_id },
                )
                .await?,
        )?;

        let status = data
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        if status != "success" {
            error!("Error waking up device {}: {}", device_id, status);
            return Err(PandoraError::Api(status.to_string()));
        }
        Ok(())
    }

    pub async fn fetch_device_system(&self, device_id: u64) -> Result<Map<String, Value>> {
        let token = self.http.require_token()?;
        expect_object(
            self.http
                .get(
                    api_path::DEVICES_SYSTEM,
                    &DeviceQuery {
                        access_token: &token,
                        id: device_id,
                    },
                )
                .await?,
        )
    }

    /// Most recent settings entry of a device
    pub async fn fetch_device_settings(&self, device_id: u64) -> Result<Map<String, Value>> {
        let token = self.http.require_token()?;
        let mut data = expect_object(
            self.http
                .get(
                    api_path::DEVICES_SETTINGS,
                    &DeviceQuery {
                        access_token: &token,
                        id: device_id,
                    },
                )
                .await?,
        )?;

        let Some(Value::Object(mut devices_settings)) = data.remove("device_settings") else {
            return Err(PandoraError::MalformedResponse(
                "device_settings not retrieved".to_string(),
            ));
        };
        let Some(Value::Array(entries)) = devices_settings.remove(&device_id.to_string())
        else {
            return Err(PandoraError::MalformedResponse(
                "settings not retrieved".to_string(),
            ));
        };

        entries
            .into_iter()
            .filter_map(|entry| match entry {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .max_by_key(|entry| conv::int(entry.get("dtime")).unwrap_or(0))
            .ok_or_else(|| PandoraError::MalformedResponse("settings not retrieved".to_string()))
    }

    // ============================================================================
    // Tracking
    // ============================================================================

    pub async fn fetch_track_data(
        &self,
        device_id: u64,
        track_id: u64,
        hash: Option<&str>,
    ) -> Result<HttpTrack> {
        #[derive(Serialize)]
        struct Query<'a> {
            access_token: &'a str,
            dev_id: u64,
            id: u64,
            only_items: u8,
            get_tank: u8,
            #[serde(skip_serializing_if = "Option::is_none")]
            hash: Option<&'a str>,
        }

        let token = self.http.require_token()?;
        debug!("Retrieving track {} data for device {}", track_id, device_id);
        let tracks = expect_array(
            self.http
                .get(
                    api_path::TRACKS_DATA,
                    &Query {
                        access_token: &token,
                        dev_id: device_id,
                        id: track_id,
                        only_items: 1,
                        get_tank: 1,
                        hash,
                    },
                )
                .await?,
        )?;

        tracks
            .first()
            .and_then(HttpTrack::from_value)
            .ok_or_else(|| PandoraError::MalformedResponse("track data not retrieved".to_string()))
    }

    /// Event feed between two timestamps; `to` defaults to one day ahead
    pub async fn fetch_events(
        &self,
        from: i64,
        to: Option<i64>,
        limit: u32,
        device_id: Option<u64>,
    ) -> Result<Vec<TrackingEvent>> {
        #[derive(Serialize)]
        struct Query<'a> {
            access_token: &'a str,
            from: String,
            to: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            id: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            limit: Option<String>,
        }

        if from < 0 {
            return Err(PandoraError::InvalidArgument(
                "timestamp_from must not be less than zero".to_string(),
            ));
        }
        let token = self.http.require_token()?;
        // Ask for the future to absorb timezone differences
        let to = to.unwrap_or_else(|| (Local::now() + ChronoDuration::days(1)).timestamp());

        debug!("Fetching events between {} and {}", from, to);
        let data = expect_object(
            self.http
                .get(
                    api_path::LENTA,
                    &Query {
                        access_token: &token,
                        from: from.to_string(),
                        to: to.to_string(),
                        id: device_id.filter(|id| *id != 0).map(|id| id.to_string()),
                        limit: (limit > 0).then(|| limit.to_string()),
                    },
                )
                .await?,
        )?;

        let events: Vec<TrackingEvent> = data
            .get("lenta")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|entry| match entry.get("obj") {
                Some(Value::Object(obj)) if !obj.is_empty() => {
                    Some(TrackingEvent::from_map(obj, None))
                }
                _ => None,
            })
            .collect();
        debug!("Received {} events between {} and {}", events.len(), from, to);
        Ok(events)
    }

    /// Raw `/api/updates` payload since `ts` (`-1` for the full state)
    pub async fn fetch_updates(&self, ts: i64) -> Result<Map<String, Value>> {
        #[derive(Serialize)]
        struct Query<'a> {
            ts: i64,
            access_token: &'a str,
        }

        let token = self.http.require_token()?;
        expect_object(
            self.http
                .get(
                    api_path::UPDATES,
                    &Query {
                        ts,
                        access_token: &token,
                    },
                )
                .await?,
        )
    }

    /// Full reverse geocoding response
    pub async fn geocode(
        &self,
        latitude: f64,
        longitude: f64,
        language: Option<&str>,
    ) -> Result<Map<String, Value>> {
        #[derive(Serialize)]
        struct Query<'a> {
            lang: &'a str,
            lat: f64,
            lon: f64,
            access_token: &'a str,
        }

        let token = self.http.require_token()?;
        expect_object(
            self.http
                .get(
                    api_path::GEO,
                    &Query {
                        lang: language.unwrap_or(self.language.as_str()),
                        lat: latitude,
                        lon: longitude,
                        access_token: &token,
                    },
                )
                .await?,
        )
    }

    /// Short address, `None` when the server has none
    pub async fn geocode_short(
        &self,
        latitude: f64,
        longitude: f64,
        language: Option<&str>,
    ) -> Result<Option<String>> {
        let data = self.geocode(latitude, longitude, language).await?;
        Ok(conv::text(data.get("short")))
    }
}

const NO_QUERY: &[(&str, &str)] = &[];
