use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use catalog::{Category, LayerDraft, LayerPatch, LayerQuery, LayerView, License, Rating};
use foundation::LayerId;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::{CurrentUser, MaybeUser};
use crate::error::{ApiError, ApiJson, ApiPath, ApiQuery};
use crate::AppState;

pub async fn list_layers(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiQuery(query): ApiQuery<LayerQuery>,
) -> Result<Json<Vec<LayerView>>, ApiError> {
    Ok(Json(state.catalog.search(user.user(), &query).await?))
}

pub async fn create_layer(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(draft): ApiJson<LayerDraft>,
) -> Result<(StatusCode, Json<LayerView>), ApiError> {
    let view = state.catalog.create_layer(&user, draft).await?;
    info!(layer_id = %view.id, owner = %user.id, visibility = %view.visibility, "layer created");
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn categories(State(state): State<AppState>) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(state.catalog.categories().await?))
}

pub async fn licenses(State(state): State<AppState>) -> Result<Json<Vec<License>>, ApiError> {
    Ok(Json(state.catalog.licenses().await?))
}

pub async fn get_layer(
    State(state): State<AppState>,
    user: MaybeUser,
    ApiPath(id): ApiPath<LayerId>,
) -> Result<Json<LayerView>, ApiError> {
    Ok(Json(state.catalog.read_layer(user.user(), &id).await?))
}

pub async fn update_layer(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<LayerId>,
    ApiJson(patch): ApiJson<LayerPatch>,
) -> Result<Json<LayerView>, ApiError> {
    Ok(Json(state.catalog.update_layer(&user, &id, patch).await?))
}

pub async fn delete_layer(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<LayerId>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.catalog.delete_layer(&user, &id).await?;
    if let Some(file) = removed.file {
        if let Err(e) = tokio::fs::remove_file(&file.path).await {
            warn!(layer_id = %id, path = %file.path, error = %e, "could not remove layer file");
        }
    }
    info!(layer_id = %id, owner = %user.id, "layer deleted");
    Ok(Json(json!({ "message": "Layer deleted successfully" })))
}

#[derive(Debug, Deserialize)]
pub struct RatingForm {
    pub rating: i64,
    pub comment: Option<String>,
}

pub async fn rate_layer(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<LayerId>,
    ApiJson(form): ApiJson<RatingForm>,
) -> Result<Json<Value>, ApiError> {
    let rating: Rating = state
        .catalog
        .rate_layer(&user, &id, form.rating, form.comment)
        .await?;
    Ok(Json(json!({
        "message": "Rating saved successfully",
        "rating": rating,
    })))
}

pub async fn remove_rating(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiPath(id): ApiPath<LayerId>,
) -> Result<Json<Value>, ApiError> {
    state.catalog.remove_rating(&user, &id).await?;
    Ok(Json(json!({ "message": "Rating removed successfully" })))
}
