use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use foundation::{LayerId, UserId};
use parking_lot::RwLock;

use crate::CatalogError;
use crate::model::{
    Category, Layer, License, OAuthProvider, Plan, PlanChange, Rating, RatingSummary, Stars, User,
    Visibility, Workspace,
};
use crate::reference::{default_categories, default_licenses};
use crate::store::CatalogStore;

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, User>,
    /// Keyed by owner: one workspace per user.
    workspaces: BTreeMap<UserId, Workspace>,
    layers: BTreeMap<LayerId, Layer>,
    ratings: BTreeMap<(LayerId, UserId), Rating>,
}

impl Tables {
    fn check_user_unique(&self, user: &User) -> Result<(), CatalogError> {
        for other in self.users.values().filter(|u| u.id != user.id) {
            if other.email == user.email {
                return Err(CatalogError::Conflict(format!(
                    "email {} already registered",
                    user.email
                )));
            }
            if other.username == user.username {
                return Err(CatalogError::Conflict(format!(
                    "username {} already taken",
                    user.username
                )));
            }
            if other.provider == user.provider && other.subject == user.subject {
                return Err(CatalogError::Conflict(
                    "identity already linked to another user".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn publish_private(&mut self, owner: &UserId, now_ms: u64) -> u64 {
        let mut n = 0;
        for layer in self.layers.values_mut() {
            if layer.owner_id == *owner && layer.visibility == Visibility::Private {
                layer.visibility = Visibility::Public;
                layer.updated_at_ms = now_ms;
                n += 1;
            }
        }
        n
    }
}

/// Process-local store used by tests and `DATABASE_URL=memory`.
///
/// Every mutation takes the write lock once, so multi-row changes such as a
/// plan downgrade are atomic with respect to readers.
#[derive(Debug)]
pub struct InMemoryCatalogStore {
    tables: RwLock<Tables>,
    categories: Vec<Category>,
    licenses: Vec<License>,
}

impl Default for InMemoryCatalogStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            categories: default_categories(),
            licenses: default_licenses(),
        }
    }
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn user(&self, id: &UserId) -> Result<Option<User>, CatalogError> {
        Ok(self.tables.read().users.get(id).cloned())
    }

    async fn user_by_identity(
        &self,
        provider: OAuthProvider,
        subject: &str,
    ) -> Result<Option<User>, CatalogError> {
        Ok(self
            .tables
            .read()
            .users
            .values()
            .find(|u| u.provider == provider && u.subject == subject)
            .cloned())
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, CatalogError> {
        Ok(self
            .tables
            .read()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn username_taken(&self, username: &str) -> Result<bool, CatalogError> {
        Ok(self
            .tables
            .read()
            .users
            .values()
            .any(|u| u.username == username))
    }

    async fn insert_user(&self, user: &User) -> Result<(), CatalogError> {
        let mut t = self.tables.write();
        if t.users.contains_key(&user.id) {
            return Err(CatalogError::Conflict("user already exists".to_string()));
        }
        t.check_user_unique(user)?;
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn update_user(&self, user: &User) -> Result<(), CatalogError> {
        let mut t = self.tables.write();
        if !t.users.contains_key(&user.id) {
            return Err(CatalogError::NotFound("User"));
        }
        t.check_user_unique(user)?;
        t.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn set_plan(
        &self,
        id: &UserId,
        plan: Plan,
        now_ms: u64,
    ) -> Result<PlanChange, CatalogError> {
        let mut t = self.tables.write();
        let user = t.users.get_mut(id).ok_or(CatalogError::NotFound("User"))?;
        let previous = user.plan;
        user.plan = plan;
        user.updated_at_ms = now_ms;
        let published_layers = if plan.allows_private_layers() {
            0
        } else {
            t.publish_private(id, now_ms)
        };
        Ok(PlanChange {
            user_id: *id,
            previous,
            current: plan,
            published_layers,
        })
    }

    async fn workspace_of(&self, owner: &UserId) -> Result<Option<Workspace>, CatalogError> {
        Ok(self.tables.read().workspaces.get(owner).cloned())
    }

    async fn get_or_insert_workspace(
        &self,
        workspace: Workspace,
    ) -> Result<Workspace, CatalogError> {
        let mut t = self.tables.write();
        Ok(t.workspaces
            .entry(workspace.owner_id)
            .or_insert(workspace)
            .clone())
    }

    async fn insert_layer(&self, layer: &Layer) -> Result<(), CatalogError> {
        let mut t = self.tables.write();
        if !t.users.contains_key(&layer.owner_id) {
            return Err(CatalogError::NotFound("User"));
        }
        if t.layers.contains_key(&layer.id) {
            return Err(CatalogError::Conflict("layer already exists".to_string()));
        }
        t.layers.insert(layer.id, layer.clone());
        Ok(())
    }

    async fn layer(&self, id: &LayerId) -> Result<Option<Layer>, CatalogError> {
        Ok(self.tables.read().layers.get(id).cloned())
    }

    async fn update_layer(
        &self,
        layer: &Layer,
        visibility: Option<Visibility>,
    ) -> Result<Layer, CatalogError> {
        let mut t = self.tables.write();
        let owner_plan = t.users.get(&layer.owner_id).map(|u| u.plan);
        let slot = t.layers.get_mut(&layer.id).ok_or(CatalogError::NotFound("Layer"))?;
        if visibility == Some(Visibility::Private)
            && !owner_plan.is_some_and(|p| p.allows_private_layers())
        {
            return Err(CatalogError::Forbidden(
                "Private layers require a paid plan".to_string(),
            ));
        }
        *slot = Layer {
            id: slot.id,
            owner_id: slot.owner_id,
            visibility: visibility.unwrap_or(slot.visibility),
            view_count: slot.view_count,
            download_count: slot.download_count,
            created_at_ms: slot.created_at_ms,
            ..layer.clone()
        };
        Ok(slot.clone())
    }

    async fn delete_layer(&self, id: &LayerId) -> Result<Option<Layer>, CatalogError> {
        let mut t = self.tables.write();
        let removed = t.layers.remove(id);
        if removed.is_some() {
            t.ratings.retain(|(layer, _), _| layer != id);
        }
        Ok(removed)
    }

    async fn record_view(&self, id: &LayerId) -> Result<(), CatalogError> {
        let mut t = self.tables.write();
        let layer = t.layers.get_mut(id).ok_or(CatalogError::NotFound("Layer"))?;
        layer.view_count += 1;
        Ok(())
    }

    async fn record_download(&self, id: &LayerId) -> Result<(), CatalogError> {
        let mut t = self.tables.write();
        let layer = t.layers.get_mut(id).ok_or(CatalogError::NotFound("Layer"))?;
        layer.download_count += 1;
        Ok(())
    }

    async fn visible_layers(&self, requester: Option<&UserId>) -> Result<Vec<Layer>, CatalogError> {
        Ok(self
            .tables
            .read()
            .layers
            .values()
            .filter(|l| l.visibility == Visibility::Public || Some(&l.owner_id) == requester)
            .cloned()
            .collect())
    }

    async fn layers_by_owner(&self, owner: &UserId) -> Result<Vec<Layer>, CatalogError> {
        Ok(self
            .tables
            .read()
            .layers
            .values()
            .filter(|l| l.owner_id == *owner)
            .cloned()
            .collect())
    }

    async fn upsert_rating(&self, rating: &Rating) -> Result<Rating, CatalogError> {
        let mut t = self.tables.write();
        if !t.layers.contains_key(&rating.layer_id) {
            return Err(CatalogError::NotFound("Layer"));
        }
        let stored = t
            .ratings
            .entry((rating.layer_id, rating.user_id))
            .and_modify(|r| {
                r.stars = rating.stars;
                r.comment = rating.comment.clone();
                r.updated_at_ms = rating.updated_at_ms;
            })
            .or_insert_with(|| rating.clone());
        Ok(stored.clone())
    }

    async fn delete_rating(&self, layer: &LayerId, user: &UserId) -> Result<bool, CatalogError> {
        Ok(self.tables.write().ratings.remove(&(*layer, *user)).is_some())
    }

    async fn user_ratings(
        &self,
        user: &UserId,
        layers: &[LayerId],
    ) -> Result<HashMap<LayerId, Stars>, CatalogError> {
        let t = self.tables.read();
        Ok(layers
            .iter()
            .filter_map(|l| t.ratings.get(&(*l, *user)).map(|r| (*l, r.stars)))
            .collect())
    }

    async fn rating_summaries(
        &self,
        layers: &[LayerId],
    ) -> Result<HashMap<LayerId, RatingSummary>, CatalogError> {
        let t = self.tables.read();
        let mut out: HashMap<LayerId, RatingSummary> = HashMap::new();
        for id in layers {
            let summary = t
                .ratings
                .iter()
                .filter(|((layer, _), _)| layer == id)
                .fold(RatingSummary::default(), |acc, (_, r)| RatingSummary {
                    total: acc.total + u64::from(r.stars.get()),
                    count: acc.count + 1,
                });
            out.insert(*id, summary);
        }
        Ok(out)
    }

    async fn publish_private_layers_of_free_users(&self, now_ms: u64) -> Result<u64, CatalogError> {
        let mut t = self.tables.write();
        let free: Vec<UserId> = t
            .users
            .values()
            .filter(|u| !u.plan.allows_private_layers())
            .map(|u| u.id)
            .collect();
        Ok(free.iter().map(|id| t.publish_private(id, now_ms)).sum())
    }

    async fn categories(&self) -> Result<Vec<Category>, CatalogError> {
        Ok(self.categories.clone())
    }

    async fn licenses(&self) -> Result<Vec<License>, CatalogError> {
        Ok(self.licenses.clone())
    }
}
