//! School directory handlers

use crate::{middleware::client::ClientContext, AppState};
use axum::{extract::State, Json};
use campus_common::{
    directory,
    errors::{AppError, Result},
    guard::{GuardState, Requirement},
    models::{Role, StudentSummary, TeacherSummary},
    Identity,
};

/// Settle the caller's identity and check it against `requirement`
async fn authorize(state: &AppState, ctx: &ClientContext, requirement: &Requirement) -> Result<Identity> {
    let mut handle = ctx.resolver.handle();
    handle.settled().await;
    let current = handle.current();

    match state.guard.state(&current, requirement) {
        GuardState::Authorized => Ok(current.identity),
        GuardState::Unauthenticated | GuardState::Loading => Err(AppError::Unauthorized {
            message: "Sign in to view the directory".to_string(),
        }),
        GuardState::Unauthorized => Err(AppError::Forbidden {
            message: "Your role cannot view this list".to_string(),
        }),
    }
}

/// Teacher roster for the caller's school
pub async fn teachers(State(state): State<AppState>, ctx: ClientContext) -> Result<Json<Vec<TeacherSummary>>> {
    let identity = authorize(&state, &ctx, &Requirement::role(Role::School)).await?;
    let backend = ctx.resolver.backend();

    let teachers = directory::list_teachers(
        backend.as_ref(),
        &identity,
        &state.config.retry.policy(),
        state.config.directory_timeout(),
    )
    .await?;
    Ok(Json(teachers))
}

/// Student list for the caller's school
pub async fn students(State(state): State<AppState>, ctx: ClientContext) -> Result<Json<Vec<StudentSummary>>> {
    let identity = authorize(&state, &ctx, &Requirement::roles(&[Role::School, Role::Teacher])).await?;
    let backend = ctx.resolver.backend();

    let students = directory::list_students(
        backend.as_ref(),
        &identity,
        &state.config.retry.policy(),
        state.config.directory_timeout(),
    )
    .await?;
    Ok(Json(students))
}
