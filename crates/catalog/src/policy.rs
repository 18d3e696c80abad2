//! Who may see and change a layer.
//!
//! Everything here is a pure function of the requester and the row, so the
//! rules can be checked without a store. A layer the requester cannot read is
//! always reported as [`Access::Hidden`] rather than denied, which keeps
//! private layers from leaking their existence.

use foundation::UserId;

use crate::model::{Layer, Plan, User, Visibility};

/// Outcome of a policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Granted,
    /// The requester can see the layer but may not perform the action.
    Denied,
    /// The requester must not learn the layer exists.
    Hidden,
}

pub fn can_read(requester: Option<&UserId>, layer: &Layer) -> bool {
    layer.visibility == Visibility::Public || requester == Some(&layer.owner_id)
}

pub fn read_access(requester: Option<&UserId>, layer: &Layer) -> Access {
    if can_read(requester, layer) {
        Access::Granted
    } else {
        Access::Hidden
    }
}

/// Update, delete, upload and source changes: owner only.
pub fn write_access(requester: &UserId, layer: &Layer) -> Access {
    if requester == &layer.owner_id {
        Access::Granted
    } else if can_read(Some(requester), layer) {
        Access::Denied
    } else {
        Access::Hidden
    }
}

/// Any signed-in user who can read the layer may rate it.
pub fn rate_access(requester: &UserId, layer: &Layer) -> Access {
    read_access(Some(requester), layer)
}

/// Visibility a new or updated layer ends up with, or `None` if the plan forbids it.
pub fn resolve_visibility(user: &User, requested: Option<Visibility>) -> Option<Visibility> {
    match requested.unwrap_or_default() {
        Visibility::Public => Some(Visibility::Public),
        Visibility::Private if user.plan.allows_private_layers() => Some(Visibility::Private),
        Visibility::Private => None,
    }
}

/// Whether moving to `plan` requires publishing the user's private layers.
pub fn downgrade_publishes(plan: Plan) -> bool {
    !plan.allows_private_layers()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OAuthProvider;
    use foundation::LayerId;

    fn user(plan: Plan) -> User {
        User {
            id: UserId::new(),
            email: "a@example.com".to_string(),
            username: "a".to_string(),
            full_name: None,
            avatar_url: None,
            provider: OAuthProvider::Github,
            subject: "1".to_string(),
            plan,
            is_active: true,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    fn layer(owner: UserId, visibility: Visibility) -> Layer {
        Layer {
            id: LayerId::new(),
            owner_id: owner,
            workspace_id: None,
            title: "t".to_string(),
            description: None,
            tags: vec![],
            source_url: None,
            license: "CC BY 4.0".to_string(),
            category: "general".to_string(),
            visibility,
            file: None,
            processed_format: None,
            extent: None,
            view_count: 0,
            download_count: 0,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    #[test]
    fn public_layers_are_readable_by_everyone() {
        let owner = UserId::new();
        let l = layer(owner, Visibility::Public);
        assert!(can_read(None, &l));
        assert!(can_read(Some(&UserId::new()), &l));
        assert!(can_read(Some(&owner), &l));
    }

    #[test]
    fn private_layers_are_hidden_from_everyone_but_the_owner() {
        let owner = UserId::new();
        let l = layer(owner, Visibility::Private);
        assert_eq!(read_access(None, &l), Access::Hidden);
        assert_eq!(read_access(Some(&UserId::new()), &l), Access::Hidden);
        assert_eq!(read_access(Some(&owner), &l), Access::Granted);
    }

    #[test]
    fn writes_are_owner_only() {
        let owner = UserId::new();
        let stranger = UserId::new();
        let public = layer(owner, Visibility::Public);
        let private = layer(owner, Visibility::Private);
        assert_eq!(write_access(&owner, &public), Access::Granted);
        assert_eq!(write_access(&stranger, &public), Access::Denied);
        assert_eq!(write_access(&stranger, &private), Access::Hidden);
        assert_eq!(rate_access(&stranger, &public), Access::Granted);
        assert_eq!(rate_access(&stranger, &private), Access::Hidden);
    }

    #[test]
    fn visibility_defaults_to_public_and_private_needs_paid() {
        let free = user(Plan::Free);
        let paid = user(Plan::Paid);
        assert_eq!(resolve_visibility(&free, None), Some(Visibility::Public));
        assert_eq!(resolve_visibility(&paid, None), Some(Visibility::Public));
        assert_eq!(resolve_visibility(&free, Some(Visibility::Private)), None);
        assert_eq!(
            resolve_visibility(&paid, Some(Visibility::Private)),
            Some(Visibility::Private)
        );
        assert!(downgrade_publishes(Plan::Free));
        assert!(!downgrade_publishes(Plan::Paid));
    }
}
