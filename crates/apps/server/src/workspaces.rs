use axum::extract::State;
use axum::Json;
use catalog::{LayerView, Workspace};
use serde::Serialize;

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WorkspaceLayers {
    pub workspace: Workspace,
    pub layers: Vec<LayerView>,
}

/// First call creates the caller's workspace; later calls return it.
pub async fn my_workspace(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Workspace>, ApiError> {
    Ok(Json(state.catalog.workspace_for(&user).await?))
}

pub async fn my_workspace_layers(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<WorkspaceLayers>, ApiError> {
    let (workspace, layers) = state.catalog.workspace_layers(&user).await?;
    Ok(Json(WorkspaceLayers { workspace, layers }))
}
