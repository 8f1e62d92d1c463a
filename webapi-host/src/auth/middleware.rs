use super::{Identity, JwtAuthentication, TokenResponse, UserCredentials};
use crate::errors::AppError;
use axum::{
    extract::{FromRequest, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
    routing::post,
    Form, Json, Router,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Attaches an [`Identity`] for a valid bearer token. Requests without a
/// valid token continue anonymously.
pub async fn authentication_middleware(
    State(jwt): State<Arc<JwtAuthentication>>,
    mut request: Request,
    next: Next,
) -> Response {
    let validated = bearer_token(request.headers()).map(|token| jwt.validate_token(token));

    match validated {
        Some(Ok(identity)) => {
            debug!("Authenticated {}", identity.name);
            request.extensions_mut().insert(identity);
        }
        Some(Err(e)) => debug!("Bearer token rejected: {}", e),
        None => {}
    }

    next.run(request).await
}

/// Global policy for controller routes: the user must be authenticated.
pub async fn require_authenticated_user(
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if request.extensions().get::<Identity>().is_none() {
        return Err(AppError::Unauthorized("Authentication required".to_string()));
    }
    Ok(next.run(request).await)
}

pub fn token_routes(jwt: Arc<JwtAuthentication>) -> Router {
    let path = jwt.options().token_path.clone();
    Router::new()
        .route(&path, post(token_handler))
        .with_state(jwt)
}

async fn read_credentials(request: Request) -> Result<UserCredentials, AppError> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    if is_json {
        let Json(credentials) = Json::<UserCredentials>::from_request(request, &())
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        Ok(credentials)
    } else {
        let Form(credentials) = Form::<UserCredentials>::from_request(request, &())
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        Ok(credentials)
    }
}

async fn token_handler(
    State(jwt): State<Arc<JwtAuthentication>>,
    request: Request,
) -> Result<Json<TokenResponse>, AppError> {
    let credentials = read_credentials(request).await?;

    let token = jwt
        .authenticate(&credentials)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    match token {
        Some(token) => {
            info!("Token issued for {}", credentials.username);
            Ok(Json(token))
        }
        None => {
            warn!("Token request rejected for {}", credentials.username);
            Err(AppError::Unauthorized("Invalid username or password".to_string()))
        }
    }
}
