use std::collections::HashMap;

use async_trait::async_trait;
use foundation::{LayerId, UserId};

use crate::CatalogError;
use crate::model::{
    Category, Layer, License, OAuthProvider, Plan, PlanChange, Rating, RatingSummary, Stars, User,
    Visibility, Workspace,
};

/// Row storage behind the [`Catalog`](crate::Catalog) service.
///
/// Backends enforce uniqueness (email, username, provider identity, one
/// workspace per owner, one rating per user and layer) and report violations
/// as [`CatalogError::Conflict`]. Access policy is not their concern.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    // Users

    async fn user(&self, id: &UserId) -> Result<Option<User>, CatalogError>;

    async fn user_by_identity(
        &self,
        provider: OAuthProvider,
        subject: &str,
    ) -> Result<Option<User>, CatalogError>;

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, CatalogError>;

    async fn username_taken(&self, username: &str) -> Result<bool, CatalogError>;

    async fn insert_user(&self, user: &User) -> Result<(), CatalogError>;

    /// Overwrite profile and identity columns of an existing user.
    async fn update_user(&self, user: &User) -> Result<(), CatalogError>;

    /// Set the user's plan. When the new plan does not allow private layers,
    /// every private layer of the user is published in the same transaction.
    async fn set_plan(
        &self,
        id: &UserId,
        plan: Plan,
        now_ms: u64,
    ) -> Result<PlanChange, CatalogError>;

    // Workspaces

    async fn workspace_of(&self, owner: &UserId) -> Result<Option<Workspace>, CatalogError>;

    /// Store `workspace` unless its owner already has one; returns whichever row is stored.
    async fn get_or_insert_workspace(&self, workspace: Workspace)
    -> Result<Workspace, CatalogError>;

    // Layers

    async fn insert_layer(&self, layer: &Layer) -> Result<(), CatalogError>;

    async fn layer(&self, id: &LayerId) -> Result<Option<Layer>, CatalogError>;

    /// Write the editable columns of `layer` and return the stored row.
    ///
    /// Counters and visibility are never copied from `layer`. Visibility
    /// changes only when `visibility` is set, and a private request is
    /// checked against the owner's plan as stored at write time.
    async fn update_layer(
        &self,
        layer: &Layer,
        visibility: Option<Visibility>,
    ) -> Result<Layer, CatalogError>;

    /// Remove the layer and its ratings; returns the removed row.
    async fn delete_layer(&self, id: &LayerId) -> Result<Option<Layer>, CatalogError>;

    async fn record_view(&self, id: &LayerId) -> Result<(), CatalogError>;

    async fn record_download(&self, id: &LayerId) -> Result<(), CatalogError>;

    /// Public layers plus, when given, the requester's private ones.
    async fn visible_layers(&self, requester: Option<&UserId>) -> Result<Vec<Layer>, CatalogError>;

    async fn layers_by_owner(&self, owner: &UserId) -> Result<Vec<Layer>, CatalogError>;

    // Ratings

    /// Insert or replace the (layer, user) rating. The stored row keeps its
    /// original id and creation time.
    async fn upsert_rating(&self, rating: &Rating) -> Result<Rating, CatalogError>;

    async fn delete_rating(&self, layer: &LayerId, user: &UserId) -> Result<bool, CatalogError>;

    async fn user_ratings(
        &self,
        user: &UserId,
        layers: &[LayerId],
    ) -> Result<HashMap<LayerId, Stars>, CatalogError>;

    async fn rating_summaries(
        &self,
        layers: &[LayerId],
    ) -> Result<HashMap<LayerId, RatingSummary>, CatalogError>;

    // Plan enforcement

    /// Publish every private layer whose owner is on a plan without private
    /// layers. Returns the number of layers changed.
    async fn publish_private_layers_of_free_users(&self, now_ms: u64) -> Result<u64, CatalogError>;

    // Reference data

    async fn categories(&self) -> Result<Vec<Category>, CatalogError>;

    async fn licenses(&self) -> Result<Vec<License>, CatalogError>;
}
