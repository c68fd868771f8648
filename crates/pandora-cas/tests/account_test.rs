//! Account and device flows against a mocked Pandora Online server

use std::time::Duration;

use pandora_cas::{
    ChannelListener, PandoraAccount, PandoraClientConfig, PandoraError, UpdateMessage,
};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> PandoraClientConfig {
    PandoraClientConfig::new("user", "secret")
        .with_base_url(&server.uri())
        .with_retries(0, 10)
        .with_control_timeout(2_000)
}

async fn authenticated_account(server: &MockServer) -> PandoraAccount {
    let account = PandoraAccount::new(config(server).with_access_token("tok")).unwrap();

    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .and(query_param("access_token", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 7, "name": "Car", "model": "DX-91", "features": {"heater": 1, "channel": 1}},
            {"name": "no identifier"}
        ])))
        .mount(server)
        .await;
    account.refresh_devices().await.unwrap();
    account
}

async fn mount_updates(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/updates"))
        .and(query_param("access_token", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ts": 1_700_000_100,
            "stats": {
                "7": {"online": 1, "speed": 20.5, "fuel": 40, "state": 1_700_000_000},
                "99": {"online": 1}
            },
            "time": {
                "7": {"online": 1_700_000_000, "command": 1_699_990_000}
            },
            "lenta": [
                {"obj": {"dev_id": 7, "id": 1, "eventid1": 1, "dtime": 1_700_000_050}},
                {"obj": {"dev_id": 99, "id": 2, "eventid1": 1}},
                {"obj": {}}
            ]
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_authenticate_fetches_new_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(header("authorization", pandora_cas::constants::OAUTH_HEADER))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "fresh"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/users/login"))
        .and(body_string_contains("access_token=fresh"))
        .and(body_string_contains("login=user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": 42})))
        .expect(1)
        .mount(&server)
        .await;

    let account = PandoraAccount::new(config(&server)).unwrap();
    account.authenticate(None).await.unwrap();

    assert_eq!(account.user_id(), Some(42));
    assert_eq!(account.access_token().as_deref(), Some("fresh"));
    assert_eq!(
        account.to_string(),
        "PandoraAccount[username=\"user\", user_id=42]"
    );
}

#[tokio::test]
async fn test_authenticate_falls_back_from_rejected_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/users/login"))
        .and(body_string_contains("access_token=stale"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error_text": "bad token"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "fresh"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/users/login"))
        .and(body_string_contains("access_token=fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user_id": "17"})))
        .mount(&server)
        .await;

    let account = PandoraAccount::new(config(&server)).unwrap();
    account.authenticate(Some("stale")).await.unwrap();

    assert_eq!(account.user_id(), Some(17));
    assert_eq!(account.access_token().as_deref(), Some("fresh"));
}

#[tokio::test]
async fn test_authenticate_reports_login_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "fresh"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/users/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .mount(&server)
        .await;

    let account = PandoraAccount::new(config(&server)).unwrap();
    let result = account.authenticate(None).await;
    assert!(matches!(result, Err(PandoraError::MalformedResponse(_))));
    assert!(account.user_id().is_none());
}

#[tokio::test]
async fn test_check_access_token_statuses() {
    let server = MockServer::start().await;
    for (token, status, body) in [
        ("good", 200, json!({})),
        ("old", 401, json!({"status": "Session expired"})),
        ("bad", 401, json!({"status": "wrong token"})),
        ("odd", 400, json!({"status": "banned"})),
        ("mute", 400, json!({})),
    ] {
        Mock::given(method("POST"))
            .and(path("/api/iamalive"))
            .and(body_string_contains(format!("access_token={token}")))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;
    }

    let account = PandoraAccount::new(config(&server)).unwrap();
    let api = account.api();
    assert!(api.check_access_token(Some("good")).await.is_ok());
    assert!(matches!(
        api.check_access_token(Some("old")).await,
        Err(PandoraError::SessionExpired(_))
    ));
    assert!(matches!(
        api.check_access_token(Some("bad")).await,
        Err(PandoraError::InvalidAccessToken(_))
    ));
    assert!(matches!(
        api.check_access_token(Some("odd")).await,
        Err(PandoraError::AuthFailed(s)) if s == "banned"
    ));
    assert!(matches!(
        api.check_access_token(Some("mute")).await,
        Err(PandoraError::AuthFailed(s)) if s == "error contains no status"
    ));
}

#[tokio::test]
async fn test_refresh_devices_registers_and_updates() {
    let server = MockServer::start().await;
    let account = authenticated_account(&server).await;

    let devices = account.devices();
    assert_eq!(devices.len(), 1);
    let device = account.device(7).unwrap();
    assert_eq!(device.name().as_deref(), Some("Car"));
    assert!(device.features().is_some());

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/api/devices"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 7, "name": "Renamed"}])))
        .mount(&server)
        .await;
    account.refresh_devices().await.unwrap();

    let same = account.device(7).unwrap();
    assert!(std::sync::Arc::ptr_eq(&device, &same));
    assert_eq!(same.name().as_deref(), Some("Renamed"));
    assert!(matches!(
        account.require_device(8),
        Err(PandoraError::UnknownDevice(8))
    ));
}

#[tokio::test]
async fn test_request_updates_applies_state_and_events() {
    let server = MockServer::start().await;
    let account = authenticated_account(&server).await;
    mount_updates(&server).await;

    let batch = account.request_updates(None).await.unwrap();

    assert_eq!(account.last_update(), 1_700_000_100);
    assert_eq!(batch.states.len(), 1);
    let changes = &batch.states[&7];
    assert!(changes.contains_key("speed"));
    assert!(changes.contains_key("is_online"));

    let device = account.device(7).unwrap();
    let state = device.state().unwrap();
    assert_eq!(state.is_online, Some(true));
    assert_eq!(state.speed, Some(20.5));
    assert_eq!(state.fuel, Some(40.0));
    assert_eq!(state.online_timestamp_utc, Some(1_700_000_000));
    assert_eq!(state.command_timestamp_utc, Some(1_699_990_000));
    assert!(device.is_online());

    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.events[0].device_id, Some(7));
    assert_eq!(
        device.last_event().and_then(|e| e.timestamp),
        Some(1_700_000_050)
    );
}

#[tokio::test]
async fn test_request_updates_requires_token() {
    let server = MockServer::start().await;
    let account = PandoraAccount::new(config(&server)).unwrap();
    assert!(matches!(
        account.request_updates(None).await,
        Err(PandoraError::MissingAccessToken)
    ));
}

#[tokio::test]
async fn test_remote_command_sent_and_rejected() {
    let server = MockServer::start().await;
    let account = authenticated_account(&server).await;
    mount_updates(&server).await;
    account.request_updates(None).await.unwrap();
    let device = account.device(7).unwrap();

    Mock::given(method("POST"))
        .and(path("/api/devices/command"))
        .and(body_string_contains("command=1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"action_result": {"7": "sent"}})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/devices/command"))
        .and(body_string_contains("command=2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"action_result": {"7": "busy"}})),
        )
        .mount(&server)
        .await;

    device.remote_lock(false).await.unwrap();
    assert!(matches!(
        device.remote_unlock(false).await,
        Err(PandoraError::Api(s)) if s == "busy"
    ));
    assert!(!device.control_busy());
}

#[tokio::test]
async fn test_timed_out_command_is_not_resent() {
    let server = MockServer::start().await;
    let account = PandoraAccount::new(
        config(&server)
            .with_access_token("tok")
            .with_timeouts(1_000, 200)
            .with_retries(2, 10),
    )
    .unwrap();

    Mock::given(method("POST"))
        .and(path("/api/devices/command"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"action_result": {"7": "sent"}}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/devices/system"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"vin": "X"}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    assert!(account.remote_command(7, 4u32, None).await.is_err());
    assert!(account.fetch_device_system(7).await.is_err());

    let requests = server.received_requests().await.unwrap();
    let count = |p: &str| requests.iter().filter(|r| r.url.path() == p).count();
    assert_eq!(count("/api/devices/command"), 1);
    assert_eq!(count("/api/devices/system"), 3);
}

#[tokio::test]
async fn test_remote_command_waits_for_confirmation() {
    let server = MockServer::start().await;
    let account = authenticated_account(&server).await;
    mount_updates(&server).await;
    account.request_updates(None).await.unwrap();
    let device = account.device(7).unwrap();

    Mock::given(method("POST"))
        .and(path("/api/devices/command"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"action_result": {"7": "sent"}})),
        )
        .mount(&server)
        .await;

    let (listener, mut receiver) = ChannelListener::channel();
    let confirm = async {
        while !device.control_busy() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let message = json!({
            "type": "command",
            "data": {"dev_id": 7, "command": 1, "result": 0, "reply": 0}
        });
        account
            .dispatch_ws_message(&listener, message.as_object().unwrap(), true)
            .await
    };
    let (result, _) = tokio::join!(device.remote_lock(true), confirm);
    result.unwrap();

    match receiver.try_recv().unwrap() {
        UpdateMessage::Command { device_id, reply } => {
            assert_eq!(device_id, 7);
            assert_eq!(reply.command_id, 1);
            assert_eq!(reply.result, 0);
        }
        other => panic!("unexpected message: {other:?}"),
    }

    let confirm = async {
        while !device.control_busy() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        let message = json!({
            "type": "command",
            "data": {"dev_id": 7, "command": 2, "result": 3, "reply": 12}
        });
        account
            .dispatch_ws_message(&listener, message.as_object().unwrap(), true)
            .await
    };
    let (result, _) = tokio::join!(device.remote_unlock(true), confirm);
    assert!(matches!(
        result,
        Err(PandoraError::CommandFailed(s)) if s == "(CID:2) reply=12"
    ));
}

#[tokio::test]
async fn test_wake_up_and_settings() {
    let server = MockServer::start().await;
    let account = authenticated_account(&server).await;
    let device = account.device(7).unwrap();

    Mock::given(method("POST"))
        .and(path("/api/devices/wakeup"))
        .and(body_string_contains("id=7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "success"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/devices/settings"))
        .and(query_param("id", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_settings": {"7": [
                {"dtime": 1, "autostart": 0},
                {"dtime": 5, "autostart": 1}
            ]}
        })))
        .mount(&server)
        .await;

    device.wake_up().await.unwrap();
    let settings = device.fetch_settings().await.unwrap();
    assert_eq!(settings.get("autostart"), Some(&json!(1)));
}

#[tokio::test]
async fn test_events_geocode_and_track() {
    let server = MockServer::start().await;
    let account = authenticated_account(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/lenta"))
        .and(query_param("from", "0"))
        .and(query_param("limit", "20"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "lenta": [
                {"obj": {"id": 10, "dev_id": 7, "eventid1": 4, "dtime": 100}},
                {"obj": null},
                {"other": 1}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/geo"))
        .and(query_param("lang", "ru"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"short": "Moscow", "full": "Moscow, Russia"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tracks/data"))
        .and(query_param("dev_id", "7"))
        .and(query_param("id", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 3, "length": 12.5, "closed": 1,
            "points": [{"dtime": 100, "x": 55.1, "y": 37.1}, {"ts": 110, "x": 55.2, "y": 37.2}]
        }])))
        .mount(&server)
        .await;

    let events = account.fetch_events(0, None, 20, None).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].identifier, Some(10));

    let address = account.geocode(55.1, 37.1, None).await.unwrap();
    assert_eq!(address.as_deref(), Some("Moscow"));

    let device = account.device(7).unwrap();
    let track = device.fetch_track_data(3).await.unwrap();
    assert_eq!(track.identifier, 3);
    assert_eq!(track.points.len(), 2);
    assert_eq!(track.is_closed, Some(true));
}

#[tokio::test]
async fn test_server_errors_map_to_api_errors() {
    let server = MockServer::start().await;
    let account = authenticated_account(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/updates"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error_text": "maintenance"})))
        .mount(&server)
        .await;
    assert!(matches!(
        account.request_updates(Some(0)).await,
        Err(PandoraError::Api(s)) if s == "maintenance"
    ));
    assert_eq!(account.last_update(), -1);
}
