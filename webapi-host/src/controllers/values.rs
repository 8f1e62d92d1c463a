use crate::auth::Identity;
use crate::errors::AppError;
use axum::{extract::Path, Extension, Json};
use serde::Serialize;

const VALUES: [&str; 2] = ["value1", "value2"];

pub async fn list() -> Json<Vec<&'static str>> {
    Json(VALUES.to_vec())
}

pub async fn get(Path(id): Path<usize>) -> Result<Json<&'static str>, AppError> {
    VALUES
        .get(id)
        .map(|v| Json(*v))
        .ok_or_else(|| AppError::NotFound(format!("No value with id {}", id)))
}

#[derive(Debug, Serialize)]
pub struct IdentityResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

pub async fn identity(identity: Option<Extension<Identity>>) -> Json<IdentityResponse> {
    Json(IdentityResponse {
        authenticated: identity.is_some(),
        name: identity.map(|Extension(i)| i.name),
    })
}
