//! Session state handlers

use crate::middleware::client::ClientContext;
use axum::Json;
use campus_common::{
    resolver::{IdentityState, Notice},
    Identity,
};
use serde::Serialize;
use tokio::sync::broadcast;

/// Identity as returned to the browser
#[derive(Serialize)]
pub struct SessionView {
    pub authenticated: bool,
    pub loading: bool,
    pub identity: Identity,
    /// Dashboard for the resolved role
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landing_route: Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
}

impl SessionView {
    pub fn new(state: IdentityState, notices: Vec<Notice>) -> Self {
        Self {
            authenticated: state.identity.is_authenticated(),
            loading: state.loading,
            landing_route: state.identity.role.map(|role| role.landing_route()),
            identity: state.identity,
            notices,
        }
    }

    pub fn settled(identity: Identity, notices: Vec<Notice>) -> Self {
        Self::new(IdentityState { loading: false, identity }, notices)
    }
}

/// Notices published since `rx` subscribed
pub fn drain(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
    let mut notices = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(notice) => notices.push(notice),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    notices
}

/// Current identity, once resolution has settled
pub async fn get_session(ctx: ClientContext) -> Json<SessionView> {
    let mut notices = ctx.resolver.notices();
    let identity = ctx.resolver.handle().settled().await;
    Json(SessionView::settled(identity, drain(&mut notices)))
}

/// Re-run role resolution for the signed-in user
pub async fn refresh(ctx: ClientContext) -> Json<SessionView> {
    let mut notices = ctx.resolver.notices();
    let mut handle = ctx.resolver.handle();
    handle.settled().await;
    ctx.resolver.refresh_profile().await;
    Json(SessionView::new(handle.current(), drain(&mut notices)))
}
