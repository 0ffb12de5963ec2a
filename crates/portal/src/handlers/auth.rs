//! Credential and demo login handlers

use super::session::{drain, SessionView};
use crate::middleware::client::ClientContext;
use axum::{http::StatusCode, Json};
use campus_common::{
    errors::Result,
    models::{Role, SignUpRequest},
    resolver::Notice,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct DemoRequest {
    pub role: Role,

    #[serde(default)]
    pub index: u32,
}

#[derive(Serialize)]
pub struct SignUpResponse {
    pub confirmation_required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
}

#[derive(Serialize)]
pub struct LogoutResponse {
    pub redirect: &'static str,
}

/// Password sign-in
pub async fn login(ctx: ClientContext, Json(request): Json<LoginRequest>) -> Result<Json<SessionView>> {
    request.validate()?;

    let mut notices = ctx.resolver.notices();
    let identity = ctx.resolver.sign_in(&request.email, &request.password).await?;

    tracing::info!(client_id = %ctx.client_id, role = ?identity.role, "Client signed in");
    Ok(Json(SessionView::settled(identity, drain(&mut notices))))
}

/// Account registration
pub async fn signup(
    ctx: ClientContext,
    Json(request): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<SignUpResponse>)> {
    let mut notices = ctx.resolver.notices();
    let identity = ctx.resolver.sign_up(request).await?;

    let response = SignUpResponse {
        confirmation_required: identity.is_none(),
        session: identity.map(|identity| SessionView::settled(identity, Vec::new())),
        notices: drain(&mut notices),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Sign out and report where to go next
pub async fn logout(ctx: ClientContext) -> Json<LogoutResponse> {
    let redirect = ctx.resolver.sign_out().await;
    tracing::info!(client_id = %ctx.client_id, "Client signed out");
    Json(LogoutResponse { redirect })
}

/// Switch the client to a demo identity
pub async fn demo(ctx: ClientContext, Json(request): Json<DemoRequest>) -> Result<Json<SessionView>> {
    let identity = ctx.resolver.set_test_user(request.role, request.index).await?;
    Ok(Json(SessionView::settled(identity, Vec::new())))
}
