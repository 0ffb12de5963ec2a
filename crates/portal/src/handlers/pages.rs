//! Page rendering through the route table and guard
//!
//! Every path that is not an API endpoint lands here. Public pages render
//! directly; protected pages wait for the client's identity to settle and
//! then render or redirect.

use crate::{middleware::client::ClientContext, AppState};
use axum::{
    extract::State,
    http::Uri,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use campus_common::{errors::Result, guard::GuardDecision, Identity};
use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

/// Page descriptor handed to the front-end
#[derive(Serialize)]
pub struct PageView {
    pub route: String,
    pub title: String,
    pub path: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, String>,
    pub identity: Identity,
}

/// `ctx` is absent for anonymous visitors of public pages
pub async fn render(State(state): State<AppState>, ctx: Option<ClientContext>, uri: Uri) -> Result<Response> {
    let path = uri.path();
    let matched = state.routes.resolve(path)?;

    let identity = match (matched.requirement(), ctx) {
        (None, ctx) => ctx.map(|ctx| ctx.resolver.snapshot().identity).unwrap_or_default(),
        (Some(_), None) => return Ok(Redirect::to(state.guard.login_route()).into_response()),
        (Some(requirement), Some(ctx)) => {
            let mut handle = ctx.resolver.handle();
            match state.guard.check(&mut handle, &requirement).await {
                GuardDecision::Render => handle.current().identity,
                GuardDecision::Redirect(target) => {
                    debug!(client_id = %ctx.client_id, path, target = %target, "Guard redirect");
                    return Ok(Redirect::to(&target).into_response());
                }
                GuardDecision::Wait => return Ok(Redirect::to(state.guard.login_route()).into_response()),
            }
        }
    };

    Ok(Json(PageView {
        route: matched.route.name.clone(),
        title: matched.route.title.clone(),
        path: path.to_string(),
        params: matched.params.clone(),
        identity,
    })
    .into_response())
}
