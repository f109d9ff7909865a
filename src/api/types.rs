// Request and response types for the REST API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::models::{Labels, Pack, PackCommand, PackStatus};
use crate::PackflowError;

/// Body of `POST /v1/packs`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPackRequest {
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub commands: Vec<PackCommand>,
    #[serde(default)]
    pub events: Vec<String>,
}

impl RegisterPackRequest {
    pub fn into_pack(self) -> Result<Pack, ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::bad_request("pack name is required"));
        }
        Ok(Pack::new(self.name, self.labels)
            .with_commands(self.commands)
            .with_events(self.events))
    }
}

/// Body of event submission and action completion
#[derive(Debug, Clone, Deserialize)]
pub struct EventRequest {
    /// Event name
    #[serde(alias = "name")]
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Creation time reported by the pack
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

impl EventRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.event.trim().is_empty() {
            return Err(ApiError::bad_request("event name is required"));
        }
        Ok(())
    }
}

/// Query of `POST /v1/packs/{id}/actions/take`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeQuery {
    pub action_name: Option<String>,
}

/// Hypermedia link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    pub href: String,
}

impl Link {
    pub fn new(rel: &str, href: impl Into<String>) -> Self {
        Self {
            rel: rel.to_string(),
            href: href.into(),
        }
    }
}

/// Payload wrapped with `self`, `up` and `help` links
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub data: T,
    pub links: Vec<Link>,
}

impl<T: Serialize> Envelope<T> {
    pub fn new(data: T, self_href: impl Into<String>, up_href: impl Into<String>) -> Self {
        Self {
            data,
            links: vec![
                Link::new("self", self_href),
                Link::new("up", up_href),
                Link::new("help", "/v1/info"),
            ],
        }
    }
}

/// A pack together with its liveness computed at read time
#[derive(Debug, Clone, Serialize)]
pub struct PackView {
    #[serde(flatten)]
    pub pack: Pack,
    pub status: PackStatus,
}

impl From<Pack> for PackView {
    fn from(pack: Pack) -> Self {
        let status = pack.status();
        Self { pack, status }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteInfo {
    pub method: &'static str,
    pub path: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct InfoResponse {
    pub name: String,
    pub version: String,
    pub routes: Vec<RouteInfo>,
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,

    #[serde(rename = "type")]
    pub error_type: String,
}

/// An error ready to be sent to the client
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error_type: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: ErrorDetail {
                    message: message.into(),
                    error_type: error_type.to_string(),
                },
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request_error", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found_error", message)
    }
}

impl From<PackflowError> for ApiError {
    fn from(err: PackflowError) -> Self {
        match &err {
            PackflowError::InvalidInput(_) => Self::bad_request(err.to_string()),
            e if e.is_not_found() => Self::not_found(err.to_string()),
            PackflowError::IllegalStateTransition { .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "illegal_state_transition",
                err.to_string(),
            ),
            _ => {
                error!("request failed: {}", err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    err.to_string(),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
