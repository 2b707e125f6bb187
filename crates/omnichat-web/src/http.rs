use std::convert::Infallible;

use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use futures_util::{Stream, StreamExt};
use omnichat_core::{encode_image, ChatError, GenerationConfig, Message, Model, Part, Relay, ReplyStream};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OwnedMutexGuard;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::render;
use crate::session::{session_cookie, ChatSession, SessionRegistry};

/// Shared across all requests; everything per-user lives in the sessions.
#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub sessions: SessionRegistry,
}

impl AppState {
    pub fn new(relay: Relay, sessions: SessionRegistry) -> Self {
        Self { relay, sessions }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/settings", post(update_settings))
        .route("/reset", post(reset))
        .route("/chat", post(chat))
        .route("/messages", get(messages))
        .route("/models", get(list_models))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn with_cookie(session_id: &str, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    if let Ok(value) = HeaderValue::from_str(&session_cookie(session_id)) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

fn sse_event(kind: &str, payload: Value) -> Event {
    Event::default().event(kind).data(payload.to_string())
}

async fn index(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session_id, session) = state.sessions.resolve(&headers).await;
    let session = session.lock().await;
    with_cookie(&session_id, Html(render::render_page(&session)))
}

#[derive(Debug, Deserialize)]
pub struct SettingsForm {
    #[serde(default)]
    pub api_key: String,
    pub model: Option<String>,
    /// Kept as text so a non-number is reported through `ApiError`.
    pub temperature: Option<String>,
}

impl SettingsForm {
    fn generation(&self) -> Result<GenerationConfig, ApiError> {
        let mut generation = GenerationConfig::new();
        if let Some(name) = self.model.as_deref().filter(|name| !name.is_empty()) {
            let model = Model::from_str(name).ok_or_else(|| ChatError::UnknownModel(name.to_string()))?;
            generation = generation.with_model(model);
        }
        if let Some(raw) = self.temperature.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
            let temperature: f32 = raw
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("temperature {:?} is not a number", raw)))?;
            generation = generation.with_temperature(temperature)?;
        }
        Ok(generation)
    }
}

async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<SettingsForm>,
) -> Result<Response, ApiError> {
    let generation = form.generation()?;

    let (session_id, session) = state.sessions.resolve(&headers).await;
    let mut session = session.lock().await;
    session.api_key = form.api_key;
    session.generation = generation;

    info!(
        session = %session_id,
        model = generation.resolved_model().as_str(),
        temperature = generation.resolved_temperature(),
        key_ok = session.credential().is_ok(),
        "settings updated"
    );
    Ok(with_cookie(&session_id, Redirect::to("/")))
}

async fn reset(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session_id, session) = state.sessions.resolve(&headers).await;
    let mut session = session.lock().await;
    let dropped = session.conversation.len();
    session.conversation.clear();
    info!(session = %session_id, dropped, "conversation reset");
    with_cookie(&session_id, Redirect::to("/"))
}

/// Reads `prompt` and an optional `image` field. The image part, when
/// present, goes first.
async fn read_prompt(multipart: &mut Multipart) -> Result<Vec<Part>, ApiError> {
    let mut prompt = String::new();
    let mut image = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "prompt" => prompt = field.text().await?,
            "image" => {
                let bytes = field.bytes().await?;
                // browsers send an empty part when no file was picked
                if !bytes.is_empty() {
                    image = Some(encode_image(&bytes)?);
                }
            }
            _ => {}
        }
    }

    let mut parts = Vec::new();
    parts.extend(image);
    if !prompt.trim().is_empty() {
        parts.push(Part::text(prompt));
    }
    if parts.is_empty() {
        return Err(ApiError::BadRequest("prompt is empty".to_string()));
    }
    Ok(parts)
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let (session_id, session) = state.sessions.resolve(&headers).await;
    let mut session = session.lock_owned().await;

    // no key, no network
    let api_key = session.credential().inspect_err(|err| {
        warn!(session = %session_id, error = %err, "chat refused");
    })?;

    let parts = read_prompt(&mut multipart).await?;
    session.conversation.append(Message::user(parts));
    info!(
        session = %session_id,
        messages = session.conversation.len(),
        "user message recorded"
    );

    let reply = state
        .relay
        .stream(&api_key, &session.conversation, &session.generation)
        .await
        .inspect_err(|err| {
            error!(session = %session_id, error = %err, "failed to open reply stream");
        })?;

    let events = relay_events(session, reply, session_id.clone());
    Ok(with_cookie(
        &session_id,
        Sse::new(events).keep_alive(KeepAlive::default()),
    ))
}

/// Forward fragments as SSE, then append the finished reply. The session
/// stays locked until the reply ends or the client goes away; dropping the
/// stream early records nothing.
fn relay_events(
    mut session: OwnedMutexGuard<ChatSession>,
    mut reply: ReplyStream,
    session_id: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        while let Some(item) = reply.next().await {
            match item {
                Ok(fragment) => {
                    yield Ok::<_, Infallible>(sse_event("fragment", json!({ "text": fragment })));
                }
                Err(err) => {
                    error!(session = %session_id, error = %err, "reply stream failed");
                    yield Ok::<_, Infallible>(sse_event("error", json!({ "error": err.to_string() })));
                    break;
                }
            }
        }

        if let Ok(message) = reply.finish() {
            session.conversation.append(message);
            yield Ok::<_, Infallible>(sse_event("done", json!({ "messages": session.conversation.len() })));
        }
    }
}

async fn messages(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let (session_id, session) = state.sessions.resolve(&headers).await;
    let session = session.lock().await;
    let body = json!({
        "ready": session.credential().is_ok(),
        "messages": session.conversation.all(),
    });
    with_cookie(&session_id, Json(body))
}

async fn list_models() -> Json<Value> {
    let models: Vec<Value> = Model::all()
        .into_iter()
        .map(|model| json!({ "id": model.as_str(), "name": model.display_name() }))
        .collect();
    Json(json!({ "models": models, "default": Model::default().as_str() }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "omnichat"
    }))
}
