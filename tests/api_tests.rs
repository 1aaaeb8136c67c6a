use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, test, web};
use gpiod_hub::{AppConfig, AppState, EdgeKind, EntitySet, GpioComponent, MockGpioBackend};
use serde_json::Value;

const CHIP: &str = "/dev/gpiochip0";

fn sample_config() -> AppConfig {
    serde_json::from_str(
        r#"
        {
            "http": {
                "host": "localhost:8080",
                "path": "/api/v1",
                "timeout": 30
            },
            "poll_timeout_ms": 50,
            "binary_sensors": [
                {
                    "name": "Door",
                    "port": 4,
                    "pull_mode": "UP",
                    "bouncetime": 20
                }
            ],
            "switches": [
                {
                    "name": "Relay",
                    "port": 17
                },
                {
                    "name": "Inverted relay",
                    "port": 18,
                    "invert_logic": true,
                    "unique_id": "relay-18"
                }
            ]
        }
        "#,
    )
    .expect("valid sample config")
}

fn sample_state(backend: &Arc<MockGpioBackend>) -> (AppConfig, AppState<MockGpioBackend>) {
    let cfg = sample_config();
    let component =
        Arc::new(GpioComponent::start(backend.clone(), &cfg).expect("component starts"));
    let entities = Arc::new(EntitySet::from_config(component, &cfg).expect("entities attach"));
    (cfg, AppState { entities })
}

#[actix_rt::test]
async fn list_entities_returns_all() {
    let backend = Arc::new(MockGpioBackend::default());
    let (cfg, state) = sample_state(&backend);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&cfg.http.path)),
    )
    .await;
    let req = test::TestRequest::get().uri("/api/v1/entities").to_request();
    let response: Value = test::call_and_read_body_json(&app, req).await;

    let sensors = response["binary_sensors"].as_array().unwrap();
    let switches = response["switches"].as_array().unwrap();
    assert_eq!(sensors.len(), 1);
    assert_eq!(switches.len(), 2);

    assert_eq!(sensors[0]["name"], "Door");
    assert_eq!(sensors[0]["kind"], "binary_sensor");
    assert_eq!(sensors[0]["is_on"], true);
    assert_eq!(switches[0]["port"], 17);
    assert_eq!(switches[0]["is_on"], false);
    assert_eq!(switches[1]["unique_id"], "relay-18");
    assert_eq!(switches[1]["invert_logic"], true);
}

#[actix_rt::test]
async fn unknown_entity_returns_404() {
    let backend = Arc::new(MockGpioBackend::default());
    let (cfg, state) = sample_state(&backend);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&cfg.http.path)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/v1/switch/999")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);

    let req = test::TestRequest::get()
        .uri("/api/v1/binary_sensor/17")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_rt::test]
async fn wrong_method_returns_405() {
    let backend = Arc::new(MockGpioBackend::default());
    let (cfg, state) = sample_state(&backend);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&cfg.http.path)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/binary_sensor/4")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 405);

    let req = test::TestRequest::delete()
        .uri("/api/v1/switch/17")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 405);
}

#[actix_rt::test]
async fn turn_switch_on_and_off() {
    let backend = Arc::new(MockGpioBackend::default());
    let (cfg, state) = sample_state(&backend);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&cfg.http.path)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/switch/17")
        .set_payload("on")
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["is_on"], true);
    assert_eq!(backend.line_value(CHIP, 17), Some(true));

    let req = test::TestRequest::get()
        .uri("/api/v1/switch/17")
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["is_on"], true);

    let req = test::TestRequest::post()
        .uri("/api/v1/switch/17")
        .set_payload("0")
        .to_request();
    let resp: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(resp["is_on"], false);
    assert_eq!(backend.line_value(CHIP, 17), Some(false));
}

#[actix_rt::test]
async fn inverted_switch_drives_line_low_when_on() {
    let backend = Arc::new(MockGpioBackend::default());
    let (cfg, state) = sample_state(&backend);
    assert_eq!(backend.line_value(CHIP, 18), Some(true));

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&cfg.http.path)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/switch/18")
        .set_payload("on")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    assert_eq!(backend.line_value(CHIP, 18), Some(false));
}

#[actix_rt::test]
async fn invalid_switch_payload_returns_400() {
    let backend = Arc::new(MockGpioBackend::default());
    let (cfg, state) = sample_state(&backend);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&cfg.http.path)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/v1/switch/17")
        .set_payload("maybe")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let req = test::TestRequest::post()
        .uri("/api/v1/switch/17")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_rt::test]
async fn sensor_reflects_edge_events() {
    let backend = Arc::new(MockGpioBackend::default());
    let (cfg, state) = sample_state(&backend);

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&cfg.http.path)),
    )
    .await;

    assert!(backend.inject_edge(CHIP, 4, EdgeKind::Falling));

    let mut is_on = Value::Null;
    for _ in 0..200 {
        let req = test::TestRequest::get()
            .uri("/api/v1/binary_sensor/4")
            .to_request();
        let resp: Value = test::call_and_read_body_json(&app, req).await;
        is_on = resp["is_on"].clone();
        if is_on == false {
            break;
        }
        actix_rt::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(is_on, false);
}
