use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{models::UserEntity, store::PoolListing},
    dto::{
        pool::PoolResponse,
        user::{GuestResponse, PoolMembershipFilter, SelfResponse, UserPoolsQuery, UserPoolsResponse},
    },
    error::ServiceError,
    state::SharedState,
};

const USER_POOLS_DEFAULT_LIMIT: i64 = 10;
const USER_POOLS_MAX_LIMIT: i64 = 50;

/// Mint a guest account and the self-signed credential that authenticates it.
pub async fn mint_guest(
    state: &SharedState,
    remote_addr: Option<String>,
) -> Result<GuestResponse, ServiceError> {
    let subject = format!("guest|{}", Uuid::new_v4());
    let signed = state
        .signer()
        .sign_guest(&subject, OffsetDateTime::now_utc(), state.config().guest_ttl)
        .map_err(|err| ServiceError::Internal(format!("signing guest token: {err}")))?;

    let user = state
        .store()
        .create_guest(subject, signed.expires_at, remote_addr)
        .await?;
    info!(user = user.id, expires_at = %signed.expires_at, "guest minted");

    Ok(GuestResponse {
        jwt: signed.jwt,
        expires_at: signed.expires_at.unix_timestamp(),
    })
}

/// Identity of the authenticated caller.
pub fn self_info(user: &UserEntity) -> SelfResponse {
    SelfResponse {
        id: user.id,
        store_id: user.subject.clone(),
        store: user.kind.as_str().to_owned(),
    }
}

/// Only the user themselves may read or change their pool list.
fn require_self(user: &UserEntity, user_id: i64) -> Result<(), ServiceError> {
    if user.id == user_id {
        Ok(())
    } else {
        Err(ServiceError::Forbidden("Forbidden".into()))
    }
}

/// Page through the pools a user owns or belongs to.
pub async fn user_pools(
    state: &SharedState,
    user: &UserEntity,
    user_id: i64,
    membership: PoolMembershipFilter,
    query: UserPoolsQuery,
) -> Result<UserPoolsResponse, ServiceError> {
    require_self(user, user_id)?;
    let limit = match query.limit {
        Some(limit) if limit > USER_POOLS_MAX_LIMIT => {
            return Err(ServiceError::InvalidInput(format!(
                "limit cannot exceed {USER_POOLS_MAX_LIMIT}"
            )));
        }
        Some(limit) if limit > 0 => limit,
        _ => USER_POOLS_DEFAULT_LIMIT,
    };
    let listing = match membership {
        PoolMembershipFilter::Own => PoolListing::Owned {
            include_archived: query.include_archived,
        },
        PoolMembershipFilter::Belong => PoolListing::Joined,
    };

    let page = state
        .store()
        .pools_for_user(user.id, listing, query.offset.max(0), limit)
        .await?;
    Ok(UserPoolsResponse {
        pools: page.items.iter().map(PoolResponse::from).collect(),
        total: page.total,
    })
}

/// Drop the user's membership of a pool.
pub async fn leave_pool(
    state: &SharedState,
    user: &UserEntity,
    user_id: i64,
    token: &str,
) -> Result<(), ServiceError> {
    require_self(user, user_id)?;
    let store = state.store();
    let pool = store
        .pool_by_token(token.to_owned())
        .await?
        .ok_or_else(|| ServiceError::NotFound("pool not found".into()))?;
    store.leave_pool(pool.id, user.id).await?;
    info!(pool = %pool.token, user = user.id, "left pool");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        dao::{
            memory::MemoryStore,
            models::{GridType, IdentityKind},
            store::{PoolChange, PoolStore},
        },
        services::access_service::authenticate,
        state::test_support,
    };

    #[tokio::test]
    async fn minted_guest_authenticates() {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state(store);
        let minted = mint_guest(&state, Some("203.0.113.7".into())).await.unwrap();

        let user = authenticate(&state, Some(&minted.jwt)).await.unwrap();
        assert_eq!(user.kind, IdentityKind::Guest);
        assert!(user.subject.starts_with("guest|"));

        let ttl = minted.expires_at - OffsetDateTime::now_utc().unix_timestamp();
        let expected = state.config().guest_ttl.as_secs() as i64;
        assert!((expected - 5..=expected).contains(&ttl));
    }

    #[tokio::test]
    async fn self_info_reports_the_credential_store() {
        let store = Arc::new(MemoryStore::new());
        let (guest, _) = test_support::guest(&store, "visitor").await;
        let info = self_info(&guest);
        assert_eq!(info.id, guest.id);
        assert_eq!(info.store, "guest");
        assert_eq!(info.store_id, guest.subject);
    }

    #[tokio::test]
    async fn user_pools_split_owned_and_joined() {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state(store.clone());
        let owner = test_support::external(&store, "auth0|owner").await;
        let member = test_support::external(&store, "auth0|member").await;
        let first = test_support::pool(&store, owner.id, GridType::Std25).await;
        let second = test_support::pool(&store, owner.id, GridType::Std100).await;
        store
            .update_pool(second.id, PoolChange::Archived(true))
            .await
            .unwrap();
        store.join_pool(first.id, member.id).await.unwrap();

        let owned = user_pools(
            &state,
            &owner,
            owner.id,
            PoolMembershipFilter::Own,
            UserPoolsQuery::default(),
        )
        .await
        .unwrap();
        assert_eq!(owned.total, 1);
        assert_eq!(owned.pools[0].token, first.token);

        let owned = user_pools(
            &state,
            &owner,
            owner.id,
            PoolMembershipFilter::Own,
            UserPoolsQuery {
                include_archived: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(owned.total, 2);

        let joined = user_pools(
            &state,
            &member,
            member.id,
            PoolMembershipFilter::Belong,
            UserPoolsQuery::default(),
        )
        .await
        .unwrap();
        assert_eq!(joined.total, 1);
        assert_eq!(joined.pools[0].token, first.token);

        leave_pool(&state, &member, member.id, &first.token)
            .await
            .unwrap();
        let joined = user_pools(
            &state,
            &member,
            member.id,
            PoolMembershipFilter::Belong,
            UserPoolsQuery::default(),
        )
        .await
        .unwrap();
        assert_eq!(joined.total, 0);
    }

    #[tokio::test]
    async fn user_pools_are_private_and_bounded() {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state(store.clone());
        let owner = test_support::external(&store, "auth0|owner").await;
        let other = test_support::external(&store, "auth0|other").await;

        let err = user_pools(
            &state,
            &other,
            owner.id,
            PoolMembershipFilter::Own,
            UserPoolsQuery::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));

        let err = user_pools(
            &state,
            &owner,
            owner.id,
            PoolMembershipFilter::Own,
            UserPoolsQuery {
                limit: Some(51),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "limit cannot exceed 50");

        let err = leave_pool(&state, &owner, owner.id, "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
