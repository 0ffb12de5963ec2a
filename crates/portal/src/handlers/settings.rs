//! User settings handlers

use crate::middleware::client::ClientContext;
use axum::Json;
use campus_common::{
    errors::{AppError, Result},
    settings::{self, UserSettings},
    storage::{self, keys},
    Identity,
};

async fn signed_in(ctx: &ClientContext) -> Result<Identity> {
    let identity = ctx.resolver.handle().settled().await;
    if identity.is_authenticated() {
        Ok(identity)
    } else {
        Err(AppError::Unauthorized {
            message: "Sign in to manage settings".to_string(),
        })
    }
}

pub async fn get_settings(ctx: ClientContext) -> Result<Json<UserSettings>> {
    let identity = signed_in(&ctx).await?;
    let store = ctx.resolver.store();
    let user_id = identity.user_id().unwrap_or_default();

    if identity.is_demo {
        let stored: Option<UserSettings> = storage::get_json(store.as_ref(), &keys::user_settings(user_id)).await;
        return Ok(Json(stored.unwrap_or_default()));
    }

    let backend = ctx.resolver.backend();
    Ok(Json(settings::load(backend.as_ref(), store.as_ref(), user_id).await))
}

pub async fn put_settings(ctx: ClientContext, Json(update): Json<UserSettings>) -> Result<Json<UserSettings>> {
    let identity = signed_in(&ctx).await?;
    let store = ctx.resolver.store();
    let user_id = identity.user_id().unwrap_or_default();

    // Demo identities have no backend row; keep their settings locally
    if identity.is_demo {
        storage::set_json(store.as_ref(), &keys::user_settings(user_id), &update).await?;
        return Ok(Json(update));
    }

    let backend = ctx.resolver.backend();
    settings::save(backend.as_ref(), store, user_id, &update).await?;
    Ok(Json(update))
}
