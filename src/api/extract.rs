// Request body extractor accepting JSON or YAML

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::header::CONTENT_TYPE,
};
use serde::de::DeserializeOwned;

use super::types::ApiError;

/// Body deserialized from JSON, or from YAML when the content type says so
///
/// YAML is first converted into a JSON value so both formats go through
/// the same serde model.
#[derive(Debug, Clone)]
pub struct Payload<T>(pub T);

fn is_yaml(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    matches!(
        essence.as_str(),
        "application/x-yaml" | "application/yaml" | "text/yaml" | "text/x-yaml"
    )
}

#[axum::async_trait]
impl<S, T> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let yaml = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(is_yaml)
            .unwrap_or(false);

        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;

        let value: serde_json::Value = if yaml {
            serde_yaml::from_slice(&bytes)
                .map_err(|e| ApiError::bad_request(format!("malformed YAML body: {}", e)))?
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| ApiError::bad_request(format!("malformed JSON body: {}", e)))?
        };

        serde_json::from_value(value)
            .map(Payload)
            .map_err(|e| ApiError::bad_request(format!("invalid request body: {}", e)))
    }
}
