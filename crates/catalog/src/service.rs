use std::collections::HashMap;
use std::sync::Arc;

use foundation::{GeoBounds, LayerId, RatingId, UserId, WorkspaceId, now_ms};
use serde::{Deserialize, Serialize};

use crate::CatalogError;
use crate::model::{
    Category, IdentityProfile, Layer, LayerExtent, LayerFile, License, Plan, PlanChange, Rating,
    RatingSummary, Stars, User, Visibility, Workspace,
};
use crate::policy::{self, Access};
use crate::reference::{DEFAULT_CATEGORY, DEFAULT_LICENSE};
use crate::search::LayerQuery;
use crate::store::CatalogStore;

const USERNAME_ATTEMPTS: usize = 3;

/// Fields accepted when creating a layer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LayerDraft {
    pub title: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source_url: Option<String>,
    pub license: Option<String>,
    pub category: Option<String>,
    pub visibility: Option<Visibility>,
    pub workspace_id: Option<WorkspaceId>,
    pub bbox: Option<GeoBounds>,
}

/// Partial update; absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LayerPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub source_url: Option<String>,
    pub license: Option<String>,
    pub category: Option<String>,
    pub visibility: Option<Visibility>,
    pub bbox: Option<GeoBounds>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnerSummary {
    pub id: UserId,
    pub username: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl From<&User> for OwnerSummary {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            full_name: u.full_name.clone(),
            avatar_url: u.avatar_url.clone(),
        }
    }
}

/// Layer as returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerView {
    pub id: LayerId,
    pub workspace_id: Option<WorkspaceId>,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub source_url: Option<String>,
    pub license: String,
    pub category: String,
    pub visibility: Visibility,
    pub file_size: Option<u64>,
    pub file_format: Option<String>,
    pub processed_format: Option<String>,
    pub bbox: Option<GeoBounds>,
    pub center_lon: Option<f64>,
    pub center_lat: Option<f64>,
    pub zoom_level: Option<u8>,
    pub view_count: u64,
    pub download_count: u64,
    pub average_rating: f64,
    pub rating_count: u64,
    pub user_rating: Option<Stars>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub user: Option<OwnerSummary>,
}

impl LayerView {
    fn new(
        layer: Layer,
        rating: RatingSummary,
        user_rating: Option<Stars>,
        owner: Option<OwnerSummary>,
    ) -> Self {
        let extent = layer.extent.as_ref();
        Self {
            id: layer.id,
            workspace_id: layer.workspace_id,
            file_size: layer.file.as_ref().map(|f| f.size),
            file_format: layer.file.as_ref().map(|f| f.format.clone()),
            bbox: extent.map(|e| e.bbox),
            center_lon: extent.map(|e| e.center_lon),
            center_lat: extent.map(|e| e.center_lat),
            zoom_level: extent.map(|e| e.zoom_level),
            average_rating: rating.average(),
            rating_count: rating.count,
            user_rating,
            user: owner,
            title: layer.title,
            description: layer.description,
            tags: layer.tags,
            source_url: layer.source_url,
            license: layer.license,
            category: layer.category,
            visibility: layer.visibility,
            processed_format: layer.processed_format,
            view_count: layer.view_count,
            download_count: layer.download_count,
            created_at_ms: layer.created_at_ms,
            updated_at_ms: layer.updated_at_ms,
        }
    }
}

/// The catalog's operations, with access policy applied on top of a [`CatalogStore`].
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn CatalogStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    // Users

    /// Resolve a provider identity to a user, linking or creating as needed.
    pub async fn sign_in(&self, profile: IdentityProfile) -> Result<User, CatalogError> {
        if let Some(user) = self
            .store
            .user_by_identity(profile.provider, &profile.subject)
            .await?
        {
            return Ok(user);
        }

        let email = profile
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| {
                CatalogError::Invalid(format!(
                    "Email not provided by {}",
                    profile.provider.label()
                ))
            })?
            .to_string();

        if let Some(mut user) = self.store.user_by_email(&email).await? {
            user.provider = profile.provider;
            user.subject = profile.subject;
            user.updated_at_ms = now_ms();
            self.store.update_user(&user).await?;
            return Ok(user);
        }

        let base = profile
            .username_hint
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default())
            .to_string();
        let base = if base.is_empty() { "user".to_string() } else { base };

        let mut attempt = 0;
        loop {
            let now = now_ms();
            let user = User {
                id: UserId::new(),
                email: email.clone(),
                username: self.unique_username(&base).await?,
                full_name: profile.full_name.clone(),
                avatar_url: profile.avatar_url.clone(),
                provider: profile.provider,
                subject: profile.subject.clone(),
                plan: Plan::Free,
                is_active: true,
                created_at_ms: now,
                updated_at_ms: now,
            };
            match self.store.insert_user(&user).await {
                Ok(()) => return Ok(user),
                // Lost a race for the username; pick again.
                Err(CatalogError::Conflict(_)) if attempt + 1 < USERNAME_ATTEMPTS => attempt += 1,
                Err(e) => return Err(e),
            }
        }
    }

    async fn unique_username(&self, base: &str) -> Result<String, CatalogError> {
        let mut candidate = base.to_string();
        let mut n = 1u32;
        while self.store.username_taken(&candidate).await? {
            candidate = format!("{base}{n}");
            n += 1;
        }
        Ok(candidate)
    }

    pub async fn user(&self, id: &UserId) -> Result<User, CatalogError> {
        self.store.user(id).await?.ok_or(CatalogError::NotFound("User"))
    }

    pub async fn change_plan(&self, user: &UserId, plan: Plan) -> Result<PlanChange, CatalogError> {
        self.store.set_plan(user, plan, now_ms()).await
    }

    /// Publish private layers whose owners no longer have a paid plan.
    pub async fn reconcile_plans(&self) -> Result<u64, CatalogError> {
        self.store.publish_private_layers_of_free_users(now_ms()).await
    }

    // Workspaces

    pub async fn workspace_for(&self, user: &User) -> Result<Workspace, CatalogError> {
        if let Some(ws) = self.store.workspace_of(&user.id).await? {
            return Ok(ws);
        }
        self.store
            .get_or_insert_workspace(Workspace {
                id: WorkspaceId::new(),
                owner_id: user.id,
                name: format!("{}'s workspace", user.username),
                created_at_ms: now_ms(),
            })
            .await
    }

    pub async fn workspace_layers(
        &self,
        user: &User,
    ) -> Result<(Workspace, Vec<LayerView>), CatalogError> {
        let ws = self.workspace_for(user).await?;
        let mut layers = self.store.layers_by_owner(&user.id).await?;
        layers.sort_by(|a, b| {
            b.created_at_ms
                .cmp(&a.created_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });
        let views = self.views(Some(&user.id), layers).await?;
        Ok((ws, views))
    }

    // Layers

    pub async fn create_layer(
        &self,
        user: &User,
        draft: LayerDraft,
    ) -> Result<LayerView, CatalogError> {
        let title = required_title(&draft.title)?;
        let visibility = policy::resolve_visibility(user, draft.visibility)
            .ok_or_else(private_needs_paid)?;

        let ws = self.workspace_for(user).await?;
        if draft.workspace_id.is_some_and(|id| id != ws.id) {
            return Err(CatalogError::Forbidden(
                "Workspace belongs to another user".to_string(),
            ));
        }

        let now = now_ms();
        let layer = Layer {
            id: LayerId::new(),
            owner_id: user.id,
            workspace_id: Some(ws.id),
            title,
            description: optional_text(draft.description),
            tags: normalize_tags(draft.tags),
            source_url: optional_text(draft.source_url),
            license: optional_text(draft.license).unwrap_or_else(|| DEFAULT_LICENSE.to_string()),
            category: optional_text(draft.category)
                .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            visibility,
            file: None,
            processed_format: None,
            extent: draft.bbox.map(LayerExtent::from_bounds),
            view_count: 0,
            download_count: 0,
            created_at_ms: now,
            updated_at_ms: now,
        };
        self.store.insert_layer(&layer).await?;
        Ok(LayerView::new(
            layer,
            RatingSummary::default(),
            None,
            Some(user.into()),
        ))
    }

    /// Fetch a layer for display and count the view.
    pub async fn read_layer(
        &self,
        requester: Option<&User>,
        id: &LayerId,
    ) -> Result<LayerView, CatalogError> {
        let requester = requester.map(|u| &u.id);
        let mut layer = self.readable(requester, id).await?;
        self.store.record_view(id).await?;
        layer.view_count += 1;
        self.view(requester, layer).await
    }

    /// Load a layer the user is allowed to modify.
    pub async fn writable_layer(&self, user: &User, id: &LayerId) -> Result<Layer, CatalogError> {
        let layer = self.layer_row(id).await?;
        match policy::write_access(&user.id, &layer) {
            Access::Granted => Ok(layer),
            Access::Denied => Err(CatalogError::Forbidden(
                "Only the owner can modify this layer".to_string(),
            )),
            Access::Hidden => Err(CatalogError::NotFound("Layer")),
        }
    }

    pub async fn update_layer(
        &self,
        user: &User,
        id: &LayerId,
        patch: LayerPatch,
    ) -> Result<LayerView, CatalogError> {
        let mut layer = self.writable_layer(user, id).await?;

        if let Some(title) = patch.title {
            layer.title = required_title(&title)?;
        }
        let visibility = patch
            .visibility
            .map(|v| policy::resolve_visibility(user, Some(v)).ok_or_else(private_needs_paid))
            .transpose()?;
        if patch.description.is_some() {
            layer.description = optional_text(patch.description);
        }
        if let Some(tags) = patch.tags {
            layer.tags = normalize_tags(tags);
        }
        if patch.source_url.is_some() {
            layer.source_url = optional_text(patch.source_url);
        }
        if let Some(license) = optional_text(patch.license) {
            layer.license = license;
        }
        if let Some(category) = optional_text(patch.category) {
            layer.category = category;
        }
        if let Some(bbox) = patch.bbox {
            layer.extent = Some(LayerExtent::from_bounds(bbox));
        }
        layer.updated_at_ms = now_ms();

        let stored = self.store.update_layer(&layer, visibility).await?;
        self.view(Some(&user.id), stored).await
    }

    /// Remove a layer and its ratings. The removed row is returned so the
    /// caller can clean up its stored file.
    pub async fn delete_layer(&self, user: &User, id: &LayerId) -> Result<Layer, CatalogError> {
        self.writable_layer(user, id).await?;
        self.store
            .delete_layer(id)
            .await?
            .ok_or(CatalogError::NotFound("Layer"))
    }

    pub async fn attach_file(
        &self,
        user: &User,
        id: &LayerId,
        file: LayerFile,
        extent: Option<LayerExtent>,
    ) -> Result<LayerView, CatalogError> {
        let mut layer = self.writable_layer(user, id).await?;
        layer.processed_format = Some(file.format.trim_start_matches('.').to_string());
        layer.file = Some(file);
        if extent.is_some() {
            layer.extent = extent;
        }
        layer.updated_at_ms = now_ms();
        let stored = self.store.update_layer(&layer, None).await?;
        self.view(Some(&user.id), stored).await
    }

    pub async fn attach_source(
        &self,
        user: &User,
        id: &LayerId,
        url: &str,
        format: &str,
        extent: Option<LayerExtent>,
    ) -> Result<LayerView, CatalogError> {
        let mut layer = self.writable_layer(user, id).await?;
        layer.source_url = Some(url.to_string());
        layer.processed_format = Some(format.to_string());
        if extent.is_some() {
            layer.extent = extent;
        }
        layer.updated_at_ms = now_ms();
        let stored = self.store.update_layer(&layer, None).await?;
        self.view(Some(&user.id), stored).await
    }

    /// Count a download of the layer's stored file and return the row.
    pub async fn record_download(
        &self,
        requester: Option<&User>,
        id: &LayerId,
    ) -> Result<Layer, CatalogError> {
        let mut layer = self.readable(requester.map(|u| &u.id), id).await?;
        if layer.file.is_none() {
            return Err(CatalogError::NotFound("File"));
        }
        self.store.record_download(id).await?;
        layer.download_count += 1;
        Ok(layer)
    }

    pub async fn search(
        &self,
        requester: Option<&User>,
        query: &LayerQuery,
    ) -> Result<Vec<LayerView>, CatalogError> {
        let search = query.validate()?;
        let requester = requester.map(|u| &u.id);
        let layers = self.store.visible_layers(requester).await?;
        let ids: Vec<LayerId> = layers.iter().map(|l| l.id).collect();
        let mut summaries = self.store.rating_summaries(&ids).await?;
        let candidates = layers
            .into_iter()
            .map(|l| {
                let s = summaries.remove(&l.id).unwrap_or_default();
                (l, s)
            })
            .collect();
        self.assemble(requester, search.apply(candidates)).await
    }

    // Ratings

    pub async fn rate_layer(
        &self,
        user: &User,
        id: &LayerId,
        value: i64,
        comment: Option<String>,
    ) -> Result<Rating, CatalogError> {
        let stars = Stars::try_from(value).map_err(CatalogError::Invalid)?;
        let layer = self.layer_row(id).await?;
        if policy::rate_access(&user.id, &layer) != Access::Granted {
            return Err(CatalogError::NotFound("Layer"));
        }
        let now = now_ms();
        self.store
            .upsert_rating(&Rating {
                id: RatingId::new(),
                layer_id: *id,
                user_id: user.id,
                stars,
                comment: optional_text(comment),
                created_at_ms: now,
                updated_at_ms: now,
            })
            .await
    }

    pub async fn remove_rating(&self, user: &User, id: &LayerId) -> Result<(), CatalogError> {
        self.readable(Some(&user.id), id).await?;
        if self.store.delete_rating(id, &user.id).await? {
            Ok(())
        } else {
            Err(CatalogError::NotFound("Rating"))
        }
    }

    // Reference data

    pub async fn categories(&self) -> Result<Vec<Category>, CatalogError> {
        self.store.categories().await
    }

    pub async fn licenses(&self) -> Result<Vec<License>, CatalogError> {
        self.store.licenses().await
    }

    // Helpers

    async fn layer_row(&self, id: &LayerId) -> Result<Layer, CatalogError> {
        self.store.layer(id).await?.ok_or(CatalogError::NotFound("Layer"))
    }

    async fn readable(
        &self,
        requester: Option<&UserId>,
        id: &LayerId,
    ) -> Result<Layer, CatalogError> {
        let layer = self.layer_row(id).await?;
        match policy::read_access(requester, &layer) {
            Access::Granted => Ok(layer),
            _ => Err(CatalogError::NotFound("Layer")),
        }
    }

    async fn view(&self, requester: Option<&UserId>, layer: Layer) -> Result<LayerView, CatalogError> {
        let mut views = self.views(requester, vec![layer]).await?;
        views.pop().ok_or(CatalogError::NotFound("Layer"))
    }

    async fn views(
        &self,
        requester: Option<&UserId>,
        layers: Vec<Layer>,
    ) -> Result<Vec<LayerView>, CatalogError> {
        let ids: Vec<LayerId> = layers.iter().map(|l| l.id).collect();
        let mut summaries = self.store.rating_summaries(&ids).await?;
        let rows = layers
            .into_iter()
            .map(|l| {
                let s = summaries.remove(&l.id).unwrap_or_default();
                (l, s)
            })
            .collect();
        self.assemble(requester, rows).await
    }

    async fn assemble(
        &self,
        requester: Option<&UserId>,
        rows: Vec<(Layer, RatingSummary)>,
    ) -> Result<Vec<LayerView>, CatalogError> {
        let ids: Vec<LayerId> = rows.iter().map(|(l, _)| l.id).collect();
        let mine = match requester {
            Some(user) => self.store.user_ratings(user, &ids).await?,
            None => HashMap::new(),
        };
        let mut owners: HashMap<UserId, Option<OwnerSummary>> = HashMap::new();
        for (layer, _) in &rows {
            if !owners.contains_key(&layer.owner_id) {
                let owner = self.store.user(&layer.owner_id).await?;
                owners.insert(layer.owner_id, owner.as_ref().map(OwnerSummary::from));
            }
        }
        Ok(rows
            .into_iter()
            .map(|(layer, summary)| {
                let owner = owners.get(&layer.owner_id).cloned().flatten();
                let user_rating = mine.get(&layer.id).copied();
                LayerView::new(layer, summary, user_rating, owner)
            })
            .collect())
    }
}

fn private_needs_paid() -> CatalogError {
    CatalogError::Forbidden("Private layers require a paid plan".to_string())
}

fn required_title(title: &str) -> Result<String, CatalogError> {
    let t = title.trim();
    if t.is_empty() {
        return Err(CatalogError::Invalid("Title must not be empty".to_string()));
    }
    Ok(t.to_string())
}

fn optional_text(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Trim, drop blanks and duplicates, keep first-seen order.
fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OAuthProvider;
    use crate::search::SortField;
    use crate::InMemoryCatalogStore;
    use pretty_assertions::assert_eq;

    fn catalog() -> Catalog {
        Catalog::new(Arc::new(InMemoryCatalogStore::new()))
    }

    fn profile(subject: &str, email: &str, hint: Option<&str>) -> IdentityProfile {
        IdentityProfile {
            provider: OAuthProvider::Github,
            subject: subject.to_string(),
            email: Some(email.to_string()),
            username_hint: hint.map(str::to_string),
            full_name: None,
            avatar_url: None,
        }
    }

    async fn user_with_plan(c: &Catalog, name: &str, plan: Plan) -> User {
        let u = c
            .sign_in(profile(name, &format!("{name}@example.com"), Some(name)))
            .await
            .unwrap();
        c.change_plan(&u.id, plan).await.unwrap();
        c.user(&u.id).await.unwrap()
    }

    fn draft(title: &str, visibility: Option<Visibility>) -> LayerDraft {
        LayerDraft {
            title: title.to_string(),
            visibility,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn sign_in_is_stable_and_links_by_email() {
        let c = catalog();
        let first = c.sign_in(profile("42", "ada@example.com", None)).await.unwrap();
        assert_eq!(first.username, "ada");
        assert_eq!(first.plan, Plan::Free);

        let again = c.sign_in(profile("42", "ada@example.com", None)).await.unwrap();
        assert_eq!(again.id, first.id);

        let mut google = profile("g-1", "ada@example.com", None);
        google.provider = OAuthProvider::Google;
        let linked = c.sign_in(google).await.unwrap();
        assert_eq!(linked.id, first.id);
        assert_eq!(linked.provider, OAuthProvider::Google);
    }

    #[tokio::test]
    async fn usernames_are_made_unique() {
        let c = catalog();
        let a = c.sign_in(profile("1", "a@example.com", Some("geo"))).await.unwrap();
        let b = c.sign_in(profile("2", "b@example.com", Some("geo"))).await.unwrap();
        let d = c.sign_in(profile("3", "c@example.com", Some("geo"))).await.unwrap();
        assert_eq!(
            [a.username, b.username, d.username],
            ["geo".to_string(), "geo1".to_string(), "geo2".to_string()]
        );
    }

    #[tokio::test]
    async fn sign_in_requires_email() {
        let c = catalog();
        let mut p = profile("1", "", None);
        p.email = None;
        assert!(matches!(c.sign_in(p).await, Err(CatalogError::Invalid(_))));
    }

    #[tokio::test]
    async fn free_user_layers_default_to_public() {
        let c = catalog();
        let free = user_with_plan(&c, "free", Plan::Free).await;
        let view = c.create_layer(&free, draft("Rivers", None)).await.unwrap();
        assert_eq!(view.visibility, Visibility::Public);
        assert_eq!(view.license, DEFAULT_LICENSE);
        assert_eq!(view.category, DEFAULT_CATEGORY);

        let err = c
            .create_layer(&free, draft("Secret", Some(Visibility::Private)))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Forbidden(_)));
    }

    #[tokio::test]
    async fn create_validates_title_and_tags() {
        let c = catalog();
        let u = user_with_plan(&c, "u", Plan::Free).await;
        assert!(matches!(
            c.create_layer(&u, draft("  ", None)).await,
            Err(CatalogError::Invalid(_))
        ));

        let mut d = draft("Tagged", None);
        d.tags = vec![" a ".into(), "".into(), "b".into(), "a".into()];
        let view = c.create_layer(&u, d).await.unwrap();
        assert_eq!(view.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn create_rejects_foreign_workspace() {
        let c = catalog();
        let a = user_with_plan(&c, "a", Plan::Free).await;
        let b = user_with_plan(&c, "b", Plan::Free).await;
        let b_ws = c.workspace_for(&b).await.unwrap();
        let mut d = draft("x", None);
        d.workspace_id = Some(b_ws.id);
        assert!(matches!(
            c.create_layer(&a, d).await,
            Err(CatalogError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn private_layers_are_hidden_from_others() {
        let c = catalog();
        let owner = user_with_plan(&c, "owner", Plan::Paid).await;
        let other = user_with_plan(&c, "other", Plan::Free).await;
        let private = c
            .create_layer(&owner, draft("Mine", Some(Visibility::Private)))
            .await
            .unwrap();
        let public = c.create_layer(&owner, draft("Ours", None)).await.unwrap();

        assert_eq!(
            c.read_layer(None, &private.id).await.unwrap_err(),
            CatalogError::NotFound("Layer")
        );
        assert_eq!(
            c.read_layer(Some(&other), &private.id).await.unwrap_err(),
            CatalogError::NotFound("Layer")
        );
        assert!(c.read_layer(Some(&owner), &private.id).await.is_ok());
        assert!(c.read_layer(None, &public.id).await.is_ok());
        let seen = c.read_layer(Some(&other), &public.id).await.unwrap();
        assert_eq!(seen.view_count, 2);
        assert_eq!(seen.user.unwrap().username, "owner");
    }

    #[tokio::test]
    async fn writes_are_owner_only() {
        let c = catalog();
        let owner = user_with_plan(&c, "owner", Plan::Paid).await;
        let other = user_with_plan(&c, "other", Plan::Free).await;
        let public = c.create_layer(&owner, draft("Ours", None)).await.unwrap();
        let private = c
            .create_layer(&owner, draft("Mine", Some(Visibility::Private)))
            .await
            .unwrap();

        let patch = LayerPatch {
            title: Some("Hijacked".into()),
            ..Default::default()
        };
        assert!(matches!(
            c.update_layer(&other, &public.id, patch.clone()).await,
            Err(CatalogError::Forbidden(_))
        ));
        assert_eq!(
            c.delete_layer(&other, &private.id).await.unwrap_err(),
            CatalogError::NotFound("Layer")
        );

        let updated = c.update_layer(&owner, &public.id, patch).await.unwrap();
        assert_eq!(updated.title, "Hijacked");
        let removed = c.delete_layer(&owner, &public.id).await.unwrap();
        assert_eq!(removed.id, public.id);
        assert!(c.read_layer(Some(&owner), &public.id).await.is_err());
    }

    #[tokio::test]
    async fn free_user_cannot_make_layer_private_on_update() {
        let c = catalog();
        let u = user_with_plan(&c, "u", Plan::Free).await;
        let l = c.create_layer(&u, draft("x", None)).await.unwrap();
        let patch = LayerPatch {
            visibility: Some(Visibility::Private),
            ..Default::default()
        };
        assert!(matches!(
            c.update_layer(&u, &l.id, patch).await,
            Err(CatalogError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn rating_twice_keeps_one_row_with_latest_value() {
        let c = catalog();
        let owner = user_with_plan(&c, "owner", Plan::Free).await;
        let rater = user_with_plan(&c, "rater", Plan::Free).await;
        let l = c.create_layer(&owner, draft("x", None)).await.unwrap();

        let first = c.rate_layer(&rater, &l.id, 2, None).await.unwrap();
        let second = c
            .rate_layer(&rater, &l.id, 5, Some("great".into()))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.stars.get(), 5);

        let view = c.read_layer(Some(&rater), &l.id).await.unwrap();
        assert_eq!(view.rating_count, 1);
        assert_eq!(view.average_rating, 5.0);
        assert_eq!(view.user_rating.map(|s| s.get()), Some(5));

        c.remove_rating(&rater, &l.id).await.unwrap();
        assert_eq!(
            c.remove_rating(&rater, &l.id).await.unwrap_err(),
            CatalogError::NotFound("Rating")
        );
    }

    #[tokio::test]
    async fn rating_out_of_range_or_hidden_layer_fails() {
        let c = catalog();
        let owner = user_with_plan(&c, "owner", Plan::Paid).await;
        let rater = user_with_plan(&c, "rater", Plan::Free).await;
        let l = c.create_layer(&owner, draft("x", None)).await.unwrap();
        for bad in [0, 6, -1] {
            assert!(matches!(
                c.rate_layer(&rater, &l.id, bad, None).await,
                Err(CatalogError::Invalid(_))
            ));
        }
        let hidden = c
            .create_layer(&owner, draft("h", Some(Visibility::Private)))
            .await
            .unwrap();
        assert_eq!(
            c.rate_layer(&rater, &hidden.id, 3, None).await.unwrap_err(),
            CatalogError::NotFound("Layer")
        );
    }

    #[tokio::test]
    async fn downgrade_publishes_private_layers() {
        let c = catalog();
        let paid = user_with_plan(&c, "paid", Plan::Paid).await;
        let l = c
            .create_layer(&paid, draft("Secret", Some(Visibility::Private)))
            .await
            .unwrap();
        assert_eq!(l.visibility, Visibility::Private);

        let change = c.change_plan(&paid.id, Plan::Free).await.unwrap();
        assert_eq!(change.previous, Plan::Paid);
        assert_eq!(change.published_layers, 1);

        let layers = c.store().layers_by_owner(&paid.id).await.unwrap();
        assert!(layers.iter().all(|l| l.visibility == Visibility::Public));
        assert!(c.read_layer(None, &l.id).await.is_ok());
    }

    #[tokio::test]
    async fn sweep_publishes_only_free_users_layers() {
        let c = catalog();
        let paid = user_with_plan(&c, "paid", Plan::Paid).await;
        let lapsed = user_with_plan(&c, "lapsed", Plan::Paid).await;
        let kept = c
            .create_layer(&paid, draft("kept", Some(Visibility::Private)))
            .await
            .unwrap();
        let flipped = c
            .create_layer(&lapsed, draft("flipped", Some(Visibility::Private)))
            .await
            .unwrap();

        // Plan lowered behind the service's back: the row changes, layers do not.
        let mut row = c.user(&lapsed.id).await.unwrap();
        row.plan = Plan::Free;
        c.store().update_user(&row).await.unwrap();

        assert_eq!(c.reconcile_plans().await.unwrap(), 1);
        let kept = c.store().layer(&kept.id).await.unwrap().unwrap();
        let flipped = c.store().layer(&flipped.id).await.unwrap().unwrap();
        assert_eq!(kept.visibility, Visibility::Private);
        assert_eq!(flipped.visibility, Visibility::Public);
        assert_eq!(c.reconcile_plans().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn workspace_is_created_once() {
        let c = catalog();
        let u = user_with_plan(&c, "u", Plan::Free).await;
        let a = c.workspace_for(&u).await.unwrap();
        let b = c.workspace_for(&u).await.unwrap();
        assert_eq!(a.id, b.id);

        let l = c.create_layer(&u, draft("x", None)).await.unwrap();
        assert_eq!(l.workspace_id, Some(a.id));
        let (ws, layers) = c.workspace_layers(&u).await.unwrap();
        assert_eq!(ws.id, a.id);
        assert_eq!(layers.len(), 1);
    }

    #[tokio::test]
    async fn search_never_leaks_private_layers() {
        let c = catalog();
        let owner = user_with_plan(&c, "owner", Plan::Paid).await;
        let other = user_with_plan(&c, "other", Plan::Free).await;
        c.create_layer(&owner, draft("Alpha", Some(Visibility::Private)))
            .await
            .unwrap();
        c.create_layer(&owner, draft("Beta", None)).await.unwrap();
        c.create_layer(&other, draft("Gamma", None)).await.unwrap();

        let q = LayerQuery {
            sort_by: Some(SortField::Title),
            ..Default::default()
        };
        let titles = |v: Vec<LayerView>| v.into_iter().map(|l| l.title).collect::<Vec<_>>();
        assert_eq!(titles(c.search(None, &q).await.unwrap()), vec!["Beta", "Gamma"]);
        assert_eq!(
            titles(c.search(Some(&other), &q).await.unwrap()),
            vec!["Beta", "Gamma"]
        );
        assert_eq!(
            titles(c.search(Some(&owner), &q).await.unwrap()),
            vec!["Alpha", "Beta", "Gamma"]
        );
    }

    #[tokio::test]
    async fn downloads_need_a_file_and_are_counted() {
        let c = catalog();
        let u = user_with_plan(&c, "u", Plan::Free).await;
        let l = c.create_layer(&u, draft("x", None)).await.unwrap();
        assert_eq!(
            c.record_download(None, &l.id).await.unwrap_err(),
            CatalogError::NotFound("File")
        );

        let file = LayerFile {
            path: "uploads/x.geojson".into(),
            size: 10,
            format: ".geojson".into(),
        };
        let bbox = GeoBounds::new(10.0, 40.0, 12.0, 41.0).unwrap();
        let view = c
            .attach_file(&u, &l.id, file, Some(LayerExtent::from_bounds(bbox)))
            .await
            .unwrap();
        assert_eq!(view.processed_format.as_deref(), Some("geojson"));
        assert_eq!(view.zoom_level, Some(8));

        let row = c.record_download(None, &l.id).await.unwrap();
        assert_eq!(row.download_count, 1);
    }

    /// Store whose layer writes land just after the owner is downgraded and
    /// the layer is viewed, as if those requests raced the edit.
    struct RacingDowngrade {
        inner: InMemoryCatalogStore,
    }

    #[async_trait::async_trait]
    impl CatalogStore for RacingDowngrade {
        async fn user(&self, id: &UserId) -> Result<Option<User>, CatalogError> {
            self.inner.user(id).await
        }
        async fn user_by_identity(
            &self,
            provider: OAuthProvider,
            subject: &str,
        ) -> Result<Option<User>, CatalogError> {
            self.inner.user_by_identity(provider, subject).await
        }
        async fn user_by_email(&self, email: &str) -> Result<Option<User>, CatalogError> {
            self.inner.user_by_email(email).await
        }
        async fn username_taken(&self, username: &str) -> Result<bool, CatalogError> {
            self.inner.username_taken(username).await
        }
        async fn insert_user(&self, user: &User) -> Result<(), CatalogError> {
            self.inner.insert_user(user).await
        }
        async fn update_user(&self, user: &User) -> Result<(), CatalogError> {
            self.inner.update_user(user).await
        }
        async fn set_plan(
            &self,
            id: &UserId,
            plan: Plan,
            now_ms: u64,
        ) -> Result<PlanChange, CatalogError> {
            self.inner.set_plan(id, plan, now_ms).await
        }
        async fn workspace_of(&self, owner: &UserId) -> Result<Option<Workspace>, CatalogError> {
            self.inner.workspace_of(owner).await
        }
        async fn get_or_insert_workspace(
            &self,
            workspace: Workspace,
        ) -> Result<Workspace, CatalogError> {
            self.inner.get_or_insert_workspace(workspace).await
        }
        async fn insert_layer(&self, layer: &Layer) -> Result<(), CatalogError> {
            self.inner.insert_layer(layer).await
        }
        async fn layer(&self, id: &LayerId) -> Result<Option<Layer>, CatalogError> {
            self.inner.layer(id).await
        }
        async fn update_layer(
            &self,
            layer: &Layer,
            visibility: Option<Visibility>,
        ) -> Result<Layer, CatalogError> {
            self.inner.set_plan(&layer.owner_id, Plan::Free, now_ms()).await?;
            self.inner.record_view(&layer.id).await?;
            self.inner.update_layer(layer, visibility).await
        }
        async fn delete_layer(&self, id: &LayerId) -> Result<Option<Layer>, CatalogError> {
            self.inner.delete_layer(id).await
        }
        async fn record_view(&self, id: &LayerId) -> Result<(), CatalogError> {
            self.inner.record_view(id).await
        }
        async fn record_download(&self, id: &LayerId) -> Result<(), CatalogError> {
            self.inner.record_download(id).await
        }
        async fn visible_layers(
            &self,
            requester: Option<&UserId>,
        ) -> Result<Vec<Layer>, CatalogError> {
            self.inner.visible_layers(requester).await
        }
        async fn layers_by_owner(&self, owner: &UserId) -> Result<Vec<Layer>, CatalogError> {
            self.inner.layers_by_owner(owner).await
        }
        async fn upsert_rating(&self, rating: &Rating) -> Result<Rating, CatalogError> {
            self.inner.upsert_rating(rating).await
        }
        async fn delete_rating(&self, layer: &LayerId, user: &UserId) -> Result<bool, CatalogError> {
            self.inner.delete_rating(layer, user).await
        }
        async fn user_ratings(
            &self,
            user: &UserId,
            layers: &[LayerId],
        ) -> Result<HashMap<LayerId, Stars>, CatalogError> {
            self.inner.user_ratings(user, layers).await
        }
        async fn rating_summaries(
            &self,
            layers: &[LayerId],
        ) -> Result<HashMap<LayerId, RatingSummary>, CatalogError> {
            self.inner.rating_summaries(layers).await
        }
        async fn publish_private_layers_of_free_users(
            &self,
            now_ms: u64,
        ) -> Result<u64, CatalogError> {
            self.inner.publish_private_layers_of_free_users(now_ms).await
        }
        async fn categories(&self) -> Result<Vec<Category>, CatalogError> {
            self.inner.categories().await
        }
        async fn licenses(&self) -> Result<Vec<License>, CatalogError> {
            self.inner.licenses().await
        }
    }

    fn racing_catalog() -> Catalog {
        Catalog::new(Arc::new(RacingDowngrade {
            inner: InMemoryCatalogStore::new(),
        }))
    }

    #[tokio::test]
    async fn edits_racing_a_downgrade_leave_no_private_layer() {
        let c = racing_catalog();
        let owner = user_with_plan(&c, "owner", Plan::Paid).await;
        let l = c
            .create_layer(&owner, draft("Secret", Some(Visibility::Private)))
            .await
            .unwrap();

        let patch = LayerPatch {
            title: Some("Renamed".to_string()),
            ..Default::default()
        };
        let view = c.update_layer(&owner, &l.id, patch).await.unwrap();
        assert_eq!(view.title, "Renamed");
        assert_eq!(view.visibility, Visibility::Public);
        assert_eq!(view.view_count, 1);

        let file = LayerFile {
            path: "uploads/s.geojson".into(),
            size: 3,
            format: ".geojson".into(),
        };
        c.attach_file(&owner, &l.id, file, None).await.unwrap();
        c.attach_source(&owner, &l.id, "https://example.com/wms", "wms", None)
            .await
            .unwrap();

        let rows = c.store().layers_by_owner(&owner.id).await.unwrap();
        assert!(rows.iter().all(|l| l.visibility == Visibility::Public));
        assert_eq!(rows[0].view_count, 3);
    }

    #[tokio::test]
    async fn stale_paid_user_cannot_make_layer_private() {
        let c = racing_catalog();
        let owner = user_with_plan(&c, "owner", Plan::Paid).await;
        let l = c.create_layer(&owner, draft("Open", None)).await.unwrap();

        let patch = LayerPatch {
            visibility: Some(Visibility::Private),
            ..Default::default()
        };
        assert_eq!(
            c.update_layer(&owner, &l.id, patch).await.unwrap_err(),
            CatalogError::Forbidden("Private layers require a paid plan".to_string())
        );
        let row = c.store().layer(&l.id).await.unwrap().unwrap();
        assert_eq!(row.visibility, Visibility::Public);
    }
}
