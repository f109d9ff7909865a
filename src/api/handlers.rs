// REST API handlers
// Packs, events, actions, flows and the datastore

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, info};

use super::extract::Payload;
use super::types::{
    ApiError, Envelope, EventRequest, HealthResponse, InfoResponse, PackView,
    RegisterPackRequest, RouteInfo, TakeQuery,
};
use super::AppState;
use crate::engine::storage::DatastoreEntry;
use crate::models::{Event, FlowDefinition, Pack};
use crate::PackflowError;

type ApiResult<T> = Result<T, ApiError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Routes advertised by `GET /v1/info`
const ROUTES: &[(&str, &str, &str)] = &[
    ("GET", "/health", "Liveness probe"),
    ("GET", "/v1/info", "Service information and route table"),
    ("POST", "/v1/packs", "Register a pack"),
    ("GET", "/v1/packs", "List packs"),
    ("GET", "/v1/packs/{id}", "Get a pack"),
    ("DELETE", "/v1/packs/{id}", "Remove a pack"),
    ("POST", "/v1/packs/{id}/events", "Publish an event"),
    ("POST", "/v1/packs/{id}/actions/take", "Take the oldest pending action (?actionName=)"),
    ("POST", "/v1/packs/{id}/actions/{actionId}/result", "Complete an action"),
    ("POST", "/v1/flows", "Register or replace a flow"),
    ("GET", "/v1/flows", "List flows"),
    ("GET", "/v1/flows/{name}", "Get a flow"),
    ("DELETE", "/v1/flows/{name}", "Remove a flow"),
    ("PUT", "/v1/datastore/{key}", "Store a raw value"),
    ("GET", "/v1/datastore", "List datastore keys"),
    ("GET", "/v1/datastore/{key}", "Get a raw value"),
    ("DELETE", "/v1/datastore/{key}", "Remove a value"),
];

/// `201 Created` with a `Location` header and a JSON body
fn created<T: serde::Serialize>(location: &str, body: T) -> Response {
    let mut response = (StatusCode::CREATED, Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

async fn seen_pack(state: &AppState, id: &str) -> ApiResult<Pack> {
    let pack = state.registry.get(id).await?;
    state.registry.update_last_seen(&pack.id).await?;
    Ok(pack)
}

fn event_from(request: EventRequest, pack: &Pack) -> ApiResult<Event> {
    request.validate()?;
    Ok(Event::new(
        request.event,
        pack,
        request.payload,
        request.created,
    ))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: VERSION.to_string(),
    })
}

pub async fn info() -> impl IntoResponse {
    Json(InfoResponse {
        name: "packflow".to_string(),
        version: VERSION.to_string(),
        routes: ROUTES
            .iter()
            .map(|&(method, path, description)| RouteInfo {
                method,
                path,
                description,
            })
            .collect(),
    })
}

pub async fn register_pack(
    State(state): State<AppState>,
    Payload(request): Payload<RegisterPackRequest>,
) -> ApiResult<Response> {
    let pack = state.registry.register(request.into_pack()?).await?;
    let href = format!("/v1/packs/{}", pack.id);
    Ok(created(&href, Envelope::new(PackView::from(pack), href.clone(), "/v1/packs")))
}

pub async fn list_packs(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let packs: Vec<PackView> = state
        .registry
        .find_all()
        .await?
        .into_iter()
        .map(PackView::from)
        .collect();
    Ok(Json(Envelope::new(packs, "/v1/packs", "/v1")))
}

pub async fn get_pack(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let pack = state.registry.get(&id).await?;
    Ok(Json(Envelope::new(
        PackView::from(pack),
        format!("/v1/packs/{}", id),
        "/v1/packs",
    )))
}

pub async fn delete_pack(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.remove(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accept an event and dispatch it in the background
pub async fn publish_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Payload(request): Payload<EventRequest>,
) -> ApiResult<impl IntoResponse> {
    let pack = seen_pack(&state, &id).await?;
    let event = event_from(request, &pack)?;
    debug!(pack = %pack.id, event = %event.name, "event accepted");

    state.dispatcher.dispatch_event(event.clone());
    Ok((
        StatusCode::ACCEPTED,
        Json(Envelope::new(
            event,
            format!("/v1/packs/{}/events", id),
            format!("/v1/packs/{}", id),
        )),
    ))
}

pub async fn take_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TakeQuery>,
) -> ApiResult<Response> {
    let pack = seen_pack(&state, &id).await?;
    match state.broker.take(&pack, query.action_name.as_deref()).await? {
        Some(action) => Ok(Json(Envelope::new(
            action,
            format!("/v1/packs/{}/actions/take", id),
            format!("/v1/packs/{}", id),
        ))
        .into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// Record an action result and continue its flow in the background
pub async fn complete_action(
    State(state): State<AppState>,
    Path((id, action_id)): Path<(String, String)>,
    Payload(request): Payload<EventRequest>,
) -> ApiResult<StatusCode> {
    let pack = seen_pack(&state, &id).await?;
    let result = event_from(request, &pack)?;

    if let Some(action) = state.broker.complete(&pack, &action_id, result).await? {
        state.dispatcher.dispatch_action(action);
    }
    Ok(StatusCode::ACCEPTED)
}

pub async fn register_flow(
    State(state): State<AppState>,
    Payload(mut flow): Payload<FlowDefinition>,
) -> ApiResult<Response> {
    flow.validate()?;
    // every registration is a new version
    flow.uuid = None;
    let flow = state.flows.add(flow).await?;
    info!(
        "🧩 Registered flow {} ({} steps)",
        flow.name,
        flow.steps.len()
    );

    let href = format!("/v1/flows/{}", flow.name);
    Ok(created(&href, Envelope::new(flow, href.clone(), "/v1/flows")))
}

pub async fn list_flows(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let flows = state.flows.find_all().await?;
    Ok(Json(Envelope::new(flows, "/v1/flows", "/v1")))
}

pub async fn get_flow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let flow = state
        .flows
        .get(&name)
        .await?
        .ok_or_else(|| PackflowError::FlowNotFound(name.clone()))?;
    Ok(Json(Envelope::new(
        flow,
        format!("/v1/flows/{}", name),
        "/v1/flows",
    )))
}

pub async fn delete_flow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    if state.flows.remove(&name).await? {
        info!("🗑️ Removed flow {}", name);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(PackflowError::FlowNotFound(name).into())
    }
}

pub async fn put_datastore_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("text/plain")
        .to_string();
    let value = String::from_utf8(body.to_vec())
        .map_err(|_| ApiError::bad_request("datastore values must be UTF-8"))?;

    let entry = DatastoreEntry::new(key.clone(), content_type, value);
    if state.datastore.put(entry)? {
        let href = format!("/v1/datastore/{}", key);
        let mut response = StatusCode::CREATED.into_response();
        if let Ok(location) = HeaderValue::from_str(&href) {
            response.headers_mut().insert(header::LOCATION, location);
        }
        Ok(response)
    } else {
        Ok(StatusCode::NO_CONTENT.into_response())
    }
}

pub async fn list_datastore_keys(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let keys = state.datastore.keys()?;
    Ok(Json(Envelope::new(keys, "/v1/datastore", "/v1")))
}

pub async fn get_datastore_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    let entry = state
        .datastore
        .get(&key)?
        .ok_or_else(|| PackflowError::NotFound(format!("datastore key {}", key)))?;
    Ok(([(header::CONTENT_TYPE, entry.content_type)], entry.value).into_response())
}

pub async fn delete_datastore_entry(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    if state.datastore.remove(&key)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(PackflowError::NotFound(format!("datastore key {}", key)).into())
    }
}

/// Error handler for invalid routes
pub async fn not_found() -> impl IntoResponse {
    ApiError::not_found("Not found")
}
