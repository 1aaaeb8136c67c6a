use log::warn;
use std::sync::Arc;

use actix_web::{HttpRequest, HttpResponse, Responder, guard, http::Method, web};
use actix_ws::{Message, MessageStream, Session};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::backend::GpioBackend;
use crate::entity::{EntitySet, StateChange};
use crate::error::AppError;

pub struct AppState<B: GpioBackend> {
    pub entities: Arc<EntitySet<B>>,
}

impl<B: GpioBackend> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            entities: Arc::clone(&self.entities),
        }
    }
}

async fn handle_event_websocket(
    mut session: Session,
    mut client_stream: MessageStream,
    rx: broadcast::Receiver<StateChange>,
) {
    let mut events = BroadcastStream::new(rx);

    loop {
        tokio::select! {
            msg = client_stream.recv() => {
                let Some(msg) = msg else { break; };

                match msg {
                    Ok(Message::Ping(bytes)) => {
                        let _ = session.pong(&bytes).await;
                    }
                    Ok(Message::Close(reason)) => {
                        let _ = session.close(reason).await;
                        break;
                    }
                    Ok(Message::Text(_))
                    | Ok(Message::Binary(_))
                    | Ok(Message::Pong(_))
                    | Ok(Message::Continuation(_))
                    | Ok(Message::Nop) => {}
                    Err(_) => break,
                }
            }
            event = events.next() => {
                let Some(event) = event else { break; };

                match event {
                    Ok(event) => {
                        if let Ok(text) = serde_json::to_string(&event)
                            && session.text(text).await.is_err()
                        {
                            warn!("WebSocket client disconnected");
                            break;
                        }
                    }
                    Err(BroadcastStreamRecvError::Lagged(n)) => {
                        if session.text(AppError::Gpio(format!("Event stream lagged by {n} messages")).to_string()).await.is_err() {
                            warn!("WebSocket client lagged and disconnected");
                            break;
                        }
                    }
                }
            }
        }
    }
}

impl<B: GpioBackend> AppState<B> {
    pub fn api_scope(&self, base_path: &str) -> actix_web::Scope {
        web::scope(base_path)
            .service(
                web::resource("/entities")
                    .route(web::get().to(list_entities::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/events")
                    .route(web::get().to(events_ws::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/binary_sensor/{port}")
                    .route(web::get().to(get_binary_sensor::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET]))
                            .to(method_not_allowed),
                    ),
            )
            .service(
                web::resource("/switch/{port}")
                    .route(web::get().to(get_switch::<B>))
                    .route(web::post().to(set_switch::<B>))
                    .route(
                        web::route()
                            .guard(guard_not_methods(&[Method::GET, Method::POST]))
                            .to(method_not_allowed),
                    ),
            )
    }
}

async fn list_entities<B: GpioBackend>(
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    Ok(web::Json(state.entities.list()))
}

async fn get_binary_sensor<B: GpioBackend>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let port = parse_port(&req)?;
    let sensor = state.entities.binary_sensor(port)?;

    Ok(web::Json(sensor.snapshot()))
}

async fn get_switch<B: GpioBackend>(
    req: HttpRequest,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let port = parse_port(&req)?;
    let switch = state.entities.switch(port)?;

    Ok(web::Json(switch.snapshot()))
}

async fn set_switch<B: GpioBackend>(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState<B>>,
) -> Result<impl Responder, AppError> {
    let port = parse_port(&req)?;
    let on = parse_switch_payload(&body)?;
    let switch = state.entities.switch(port)?;

    switch.set(on)?;

    Ok(web::Json(switch.snapshot()))
}

async fn events_ws<B: GpioBackend>(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState<B>>,
) -> Result<HttpResponse, AppError> {
    let rx = state.entities.subscribe_events();
    let (response, session, client_stream) = actix_ws::handle(&req, stream)
        .map_err(|e| AppError::Gpio(format!("Websocket error: {e}")))?;

    actix_web::rt::spawn(async move {
        handle_event_websocket(session, client_stream, rx).await;
    });

    Ok(response)
}

fn parse_switch_payload(body: &[u8]) -> Result<bool, AppError> {
    if body.is_empty() {
        return Err(AppError::InvalidValue("Empty switch payload".into()));
    }

    match std::str::from_utf8(body) {
        Ok(text) => match text.trim().to_ascii_lowercase().as_str() {
            "on" | "1" | "true" => Ok(true),
            "off" | "0" | "false" => Ok(false),
            other => Err(AppError::InvalidValue(format!(
                "Switch payload must be on or off, got '{other}'"
            ))),
        },
        _ => Err(AppError::InvalidValue(
            "Switch payload must be valid UTF-8".into(),
        )),
    }
}

fn parse_port(req: &HttpRequest) -> Result<u32, AppError> {
    let port = req
        .match_info()
        .get("port")
        .ok_or_else(|| AppError::InvalidValue("Missing port".into()))?;
    let port = port
        .parse::<u32>()
        .map_err(|_| AppError::InvalidValue("Invalid port".into()))?;

    Ok(port)
}

async fn method_not_allowed() -> HttpResponse {
    HttpResponse::MethodNotAllowed().finish()
}

fn guard_not_methods(methods: &[Method]) -> impl guard::Guard {
    let allowed: Vec<Method> = methods.to_vec();
    guard::fn_guard(move |ctx| !allowed.iter().any(|m| m == ctx.head().method))
}
