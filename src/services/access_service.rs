//! Authentication and pool access resolution shared by the route middleware and the stream.

use time::OffsetDateTime;
use tracing::info;

use crate::{
    dao::models::UserEntity,
    error::ServiceError,
    state::{
        SharedState,
        access::{Admission, PoolAccess, Role, admission},
    },
};

/// Verify a bearer token and resolve its user.
pub async fn authenticate(
    state: &SharedState,
    token: Option<&str>,
) -> Result<UserEntity, ServiceError> {
    let token = token
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ServiceError::Unauthenticated("missing bearer token".into()))?;

    Ok(state
        .credentials()
        .authenticate(state.store(), token, OffsetDateTime::now_utc())
        .await?)
}

/// Load `pool_token` and resolve the role of `user` in it.
///
/// With `require_membership`, strangers are let into open pools by recording a membership
/// and rejected from the others. Site admins are never recorded as members.
pub async fn resolve(
    state: &SharedState,
    user: UserEntity,
    pool_token: &str,
    require_membership: bool,
) -> Result<PoolAccess, ServiceError> {
    let store = state.store();
    let pool = store
        .pool_by_token(pool_token.to_owned())
        .await?
        .ok_or_else(|| ServiceError::NotFound("pool not found".into()))?;
    let membership = store.membership(pool.id, user.id).await?;
    let mut role = Role::resolve(&user, &pool, membership);

    if require_membership {
        match admission(role, &pool, OffsetDateTime::now_utc()) {
            Admission::Granted => {}
            Admission::AutoJoin => {
                store.join_pool(pool.id, user.id).await?;
                info!(pool = %pool.token, user = user.id, "auto-joined open pool");
                role = Role::Member;
            }
            Admission::Denied => {
                return Err(ServiceError::Forbidden(
                    "you are not a member of this pool".into(),
                ));
            }
        }
    }

    Ok(PoolAccess { user, pool, role })
}

/// Mutations reserved to the owner and flagged managers.
pub fn require_manager(access: &PoolAccess) -> Result<(), ServiceError> {
    if access.is_pool_manager() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "you must be a pool manager to do this".into(),
        ))
    }
}

/// Reads reserved to managers, open to site admins as well.
pub fn require_manager_visibility(access: &PoolAccess) -> Result<(), ServiceError> {
    if access.has_manager_visibility() {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "you must be a pool manager to do this".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        dao::{
            memory::MemoryStore,
            models::{GridType, PoolEntity},
            store::{PoolChange, PoolStore},
        },
        state::test_support,
    };

    async fn open(store: &MemoryStore, pool: PoolEntity) -> PoolEntity {
        store
            .update_pool(pool.id, PoolChange::PasswordRequired(false))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn missing_token_is_unauthenticated() {
        let state = test_support::state(Arc::new(MemoryStore::new()));
        assert!(matches!(
            authenticate(&state, None).await,
            Err(ServiceError::Unauthenticated(_))
        ));
        assert!(matches!(
            authenticate(&state, Some("  ")).await,
            Err(ServiceError::Unauthenticated(_))
        ));
    }

    #[tokio::test]
    async fn bearer_resolves_guest_user() {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state(store.clone());
        let (guest, jwt) = test_support::guest(&store, "g1").await;
        let user = authenticate(&state, Some(&jwt)).await.unwrap();
        assert_eq!(user.id, guest.id);
    }

    #[tokio::test]
    async fn unknown_pool_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state(store.clone());
        let user = test_support::external(&store, "auth0|1").await;
        assert!(matches!(
            resolve(&state, user, "nope", true).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn strangers_join_open_pools_and_are_denied_closed_ones() {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state(store.clone());
        let owner = test_support::external(&store, "auth0|owner").await;
        let stranger = test_support::external(&store, "auth0|stranger").await;
        let pool = test_support::pool(&store, owner.id, GridType::Std100).await;

        assert!(matches!(
            resolve(&state, stranger.clone(), &pool.token, true).await,
            Err(ServiceError::Forbidden(_))
        ));
        // Without the membership requirement the role is reported as-is.
        let access = resolve(&state, stranger.clone(), &pool.token, false)
            .await
            .unwrap();
        assert_eq!(access.role, Role::None);

        open(&store, pool.clone()).await;
        let access = resolve(&state, stranger.clone(), &pool.token, true)
            .await
            .unwrap();
        assert_eq!(access.role, Role::Member);
        assert!(store.membership(pool.id, stranger.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn site_admins_are_not_recorded_as_members() {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state(store.clone());
        let owner = test_support::external(&store, "auth0|owner").await;
        let admin = test_support::external(&store, "auth0|admin").await;
        store.promote_site_admin(admin.id);
        let admin = UserEntity {
            is_site_admin: true,
            ..admin
        };
        let pool = test_support::pool(&store, owner.id, GridType::Std100).await;
        let pool = open(&store, pool).await;

        let access = resolve(&state, admin.clone(), &pool.token, true)
            .await
            .unwrap();
        assert_eq!(access.role, Role::SiteAdmin);
        assert!(require_manager(&access).is_err());
        assert!(require_manager_visibility(&access).is_ok());
        assert!(store.membership(pool.id, admin.id).await.unwrap().is_none());
    }
}
