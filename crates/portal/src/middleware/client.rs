//! Browser client identification
//!
//! Reads the signed client cookie (or a bearer client token), issues a new
//! one when absent or invalid, and attaches that client's resolver to the
//! request. Anonymous requests for public or unknown pages are served
//! without registering a client.

use crate::AppState;
use axum::{
    extract::{FromRequestParts, OptionalFromRequestParts, Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
        request::Parts,
        HeaderValue,
    },
    middleware::Next,
    response::Response,
};
use campus_common::{
    auth::{client_cookie, cookie_value, extract_bearer},
    errors::AppError,
    SessionResolver,
};
use std::convert::Infallible;
use tracing::{debug, warn};
use uuid::Uuid;

/// The calling client and its resolver
#[derive(Clone)]
pub struct ClientContext {
    pub client_id: Uuid,
    pub resolver: SessionResolver,
}

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, AppError> {
        parts
            .extensions
            .get::<ClientContext>()
            .cloned()
            .ok_or_else(|| AppError::Internal {
                message: "client middleware not installed".to_string(),
            })
    }
}

impl<S> OptionalFromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Option<Self>, Infallible> {
        Ok(parts.extensions.get::<ClientContext>().cloned())
    }
}

/// Whether serving `path` needs a client of its own
fn needs_client(state: &AppState, path: &str) -> bool {
    if path.starts_with("/api/") {
        return true;
    }
    state
        .routes
        .resolve(path)
        .is_ok_and(|matched| matched.requirement().is_some())
}

fn presented_token<'a>(request: &'a Request, cookie_name: &str) -> Option<&'a str> {
    let from_cookie = request
        .headers()
        .get(COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|header| cookie_value(header, cookie_name));

    from_cookie.or_else(|| {
        request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_bearer)
    })
}

pub async fn client_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let cookie_name = state.config.auth.cookie_name.as_str();

    let known = presented_token(&request, cookie_name).and_then(|token| match state.tokens.validate(token) {
        Ok(client_id) => Some(client_id),
        Err(e) => {
            debug!(error = %e, "Ignoring client token");
            None
        }
    });

    let (client_id, issued) = match known {
        Some(client_id) => (client_id, None),
        None if !needs_client(&state, request.uri().path()) => {
            return Ok(next.run(request).await);
        }
        None => {
            let client_id = Uuid::new_v4();
            (client_id, Some(state.tokens.issue(client_id)?))
        }
    };

    let resolver = state.registry.get_or_create(client_id).await?;
    request.extensions_mut().insert(ClientContext { client_id, resolver });

    let mut response = next.run(request).await;

    if let Some(token) = issued {
        let cookie = client_cookie(cookie_name, &token, state.tokens.expiration_secs());
        match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => warn!(error = %e, "Client cookie is not a valid header value"),
        }
    }

    Ok(response)
}
