//! Defines the Axum API routes and handlers.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::state::{Command, SystemState};
use crate::web::control::{ControlError, ControlSurface};

pub type AppState = Arc<dyn ControlSurface>;

/// Creates the Axum router with all the API endpoints.
pub fn create_router(control: AppState) -> Router {
    Router::new()
        .route("/api/system-status", get(system_status))
        .route("/api/change-mode", post(change_mode))
        .route("/api/open-window", post(open_window))
        .route("/api/close-window", post(close_window))
        .route("/api/reset-alarm", post(reset_alarm))
        .layer(CorsLayer::permissive())
        .with_state(control)
}

fn status_code(err: ControlError) -> StatusCode {
    tracing::error!("Control request failed: {}", err);
    match err {
        ControlError::Unavailable => StatusCode::INTERNAL_SERVER_ERROR,
        ControlError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

/// Handler to get a snapshot of the system state.
async fn system_status(State(control): State<AppState>) -> Result<Json<SystemState>, StatusCode> {
    control.snapshot().await.map(Json).map_err(status_code)
}

async fn submit(control: &AppState, command: Command) -> Result<StatusCode, StatusCode> {
    control.submit(command).await.map_err(status_code)?;
    tracing::debug!("Accepted {:?}", command);
    Ok(StatusCode::OK)
}

async fn change_mode(State(control): State<AppState>) -> Result<StatusCode, StatusCode> {
    submit(&control, Command::ToggleMode).await
}

async fn open_window(State(control): State<AppState>) -> Result<StatusCode, StatusCode> {
    submit(&control, Command::OpenWindow).await
}

async fn close_window(State(control): State<AppState>) -> Result<StatusCode, StatusCode> {
    submit(&control, Command::CloseWindow).await
}

async fn reset_alarm(State(control): State<AppState>) -> Result<StatusCode, StatusCode> {
    submit(&control, Command::ResetAlarm).await
}
