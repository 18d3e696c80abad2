//! Plan changes: the billing webhook and the periodic reconciliation sweep.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use catalog::{Catalog, Plan, PlanChange};
use foundation::UserId;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum BillingEvent {
    #[serde(rename = "subscription.updated")]
    Updated { user_id: UserId, plan: Plan },
    #[serde(rename = "subscription.deleted")]
    Deleted { user_id: UserId },
}

impl BillingEvent {
    pub fn target(&self) -> (UserId, Plan) {
        match self {
            BillingEvent::Updated { user_id, plan } => (*user_id, *plan),
            BillingEvent::Deleted { user_id } => (*user_id, Plan::Free),
        }
    }
}

fn check_secret(expected: &str, headers: &HeaderMap) -> bool {
    let provided = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));
    // Constant-time: timing must not reveal how much of the secret matched.
    provided.is_some_and(|p| p.as_bytes().ct_eq(expected.as_bytes()).into())
}

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PlanChange>, ApiError> {
    let secret = state
        .config
        .billing_webhook_secret
        .as_deref()
        .ok_or_else(|| ApiError::Unavailable("Billing webhook is not configured".to_string()))?;
    if !check_secret(secret, &headers) {
        return Err(ApiError::Unauthorized("Invalid webhook credentials"));
    }

    let event: BillingEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Unprocessable(format!("Invalid billing event: {e}")))?;
    let (user_id, plan) = event.target();
    let change = state.catalog.change_plan(&user_id, plan).await?;
    info!(
        user_id = %change.user_id,
        previous = %change.previous,
        current = %change.current,
        published_layers = change.published_layers,
        "plan changed"
    );
    Ok(Json(change))
}

/// Run [`Catalog::reconcile_plans`] every `interval`. The first pass runs
/// immediately.
pub fn spawn_plan_sweep(catalog: Catalog, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match catalog.reconcile_plans().await {
                Ok(0) => debug!("plan sweep found nothing to publish"),
                Ok(published) => info!(published_layers = published, "plan sweep published layers"),
                Err(e) => warn!(error = %e, "plan sweep failed"),
            }
        }
    })
}
