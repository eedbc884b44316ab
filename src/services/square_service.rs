use std::collections::BTreeMap;

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::{
    dao::{
        models::{IdentityKind, SquareEntity},
        store::{SquareWriteBatch, WriteGuard, WriteOutcome},
    },
    dto::{
        square::{SquareCommandRequest, SquareLogResponse, SquareResponse, UserInfo},
        validation::validate_claimant,
    },
    error::ServiceError,
    state::{
        PoolEvent, SharedState,
        access::PoolAccess,
        squares::{Actor, SquareBoard, SquareRequest, plan_command},
    },
};

/// Every square of the pool keyed by square number.
pub async fn list_squares(
    state: &SharedState,
    access: &PoolAccess,
) -> Result<BTreeMap<i32, SquareResponse>, ServiceError> {
    let squares = state.store().squares(access.pool.id).await?;
    Ok(squares
        .into_iter()
        .map(|square| (square.square_id, SquareResponse::from(square)))
        .collect())
}

/// One square; managers and site admins also get its log and claimant details.
pub async fn square_detail(
    state: &SharedState,
    access: &PoolAccess,
    square_id: i32,
) -> Result<SquareResponse, ServiceError> {
    let square = state
        .store()
        .square(access.pool.id, square_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("square not found".into()))?;
    render(state, access, square).await
}

async fn render(
    state: &SharedState,
    access: &PoolAccess,
    square: SquareEntity,
) -> Result<SquareResponse, ServiceError> {
    if !access.has_manager_visibility() {
        return Ok(SquareResponse::from(square));
    }

    let logs = state
        .store()
        .square_logs(access.pool.id, square.square_id)
        .await?
        .into_iter()
        .map(SquareLogResponse::from)
        .collect();
    let user_info = match square.user_id {
        Some(user_id) => user_info(state, user_id).await?,
        None => None,
    };

    let mut response = SquareResponse::from(square);
    response.logs = Some(logs);
    response.user_info = user_info;
    Ok(response)
}

/// Account type and email of a claimant, asking the identity directory when the email is
/// not stored yet.
async fn user_info(state: &SharedState, user_id: i64) -> Result<Option<UserInfo>, ServiceError> {
    let Some(user) = state.store().user_by_id(user_id).await? else {
        return Ok(None);
    };

    if user.kind == IdentityKind::Guest {
        return Ok(Some(UserInfo {
            user_type: "guest".into(),
            email: None,
        }));
    }

    let mut email = user.email.clone();
    if email.is_none() {
        match state.directory().email_for(user.subject.clone()).await {
            Ok(Some(found)) => {
                if let Err(err) = state.store().set_user_email(user.id, found.clone()).await {
                    warn!(error = %err, user = user.id, "could not store looked up email");
                }
                email = Some(found);
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, user = user.id, "identity directory lookup failed"),
        }
    }

    Ok(Some(UserInfo {
        user_type: "registered".into(),
        email,
    }))
}

/// Apply a claim, unclaim, rename or state change to one square.
pub async fn command(
    state: &SharedState,
    access: &PoolAccess,
    square_id: i32,
    request: SquareCommandRequest,
    remote_addr: Option<String>,
) -> Result<SquareResponse, ServiceError> {
    if access.is_locked_out(OffsetDateTime::now_utc()) {
        return Err(ServiceError::Forbidden("the grid is locked".into()));
    }

    let claimant = request.claimant.trim().to_owned();
    if request.rename || !claimant.is_empty() {
        validate_claimant(&claimant)?;
    }

    let store = state.store();
    let board = SquareBoard::new(store.squares(access.pool.id).await?);
    let actor = Actor {
        user_id: access.user.id,
        is_manager: access.is_pool_manager(),
    };
    let plan = plan_command(
        &board,
        access.pool.grid_type,
        square_id,
        &SquareRequest {
            claimant: Some(claimant),
            state: request.state,
            note: Some(request.note),
            unclaim: request.unclaim,
            rename: request.rename,
            secondary_square_id: request.secondary_square_id.filter(|id| *id != 0),
        },
        actor,
    )?;

    let outcome = store
        .apply_square_writes(SquareWriteBatch {
            pool_id: access.pool.id,
            actor_id: access.user.id,
            remote_addr,
            writes: plan.writes,
        })
        .await?;
    match outcome {
        WriteOutcome::Applied => {}
        WriteOutcome::Rejected {
            guard: WriteGuard::Unclaimed,
            ..
        } => return Err(ServiceError::Conflict("square has already been claimed".into())),
        WriteOutcome::Rejected {
            guard: WriteGuard::Claimed,
            ..
        } => {
            return Err(ServiceError::Conflict(
                "cannot change state of an unclaimed square".into(),
            ));
        }
        WriteOutcome::Rejected { square_id, .. } => {
            return Err(ServiceError::Internal(format!(
                "unguarded write to square {square_id} was rejected"
            )));
        }
        WriteOutcome::Missing { .. } => {
            return Err(ServiceError::NotFound("square not found".into()));
        }
    }

    info!(
        pool = %access.pool.token,
        square = square_id,
        user = access.user.id,
        action = ?plan.action,
        "square updated"
    );
    state.publish(&access.pool.token, PoolEvent::square_updated());

    square_detail(state, access, square_id).await
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        dao::{
            memory::MemoryStore,
            models::{GridType, PoolEntity, SquareState, UserEntity},
            store::{PoolChange, PoolStore},
        },
        state::{access::Role, test_support},
    };

    struct Fixture {
        store: Arc<MemoryStore>,
        state: SharedState,
        pool: PoolEntity,
        owner: UserEntity,
    }

    async fn fixture(grid_type: GridType) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state(store.clone());
        let owner = test_support::external(&store, "auth0|owner").await;
        let pool = test_support::pool(&store, owner.id, grid_type).await;
        Fixture {
            store,
            state,
            pool,
            owner,
        }
    }

    impl Fixture {
        fn manager(&self) -> PoolAccess {
            PoolAccess {
                user: self.owner.clone(),
                pool: self.pool.clone(),
                role: Role::PoolManager,
            }
        }

        async fn member(&self, subject: &str) -> PoolAccess {
            let user = test_support::external(&self.store, subject).await;
            self.store.add_member(self.pool.id, user.id, false);
            PoolAccess {
                user,
                pool: self.pool.clone(),
                role: Role::Member,
            }
        }
    }

    fn claim(name: &str) -> SquareCommandRequest {
        SquareCommandRequest {
            claimant: name.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn member_claims_and_unclaims_their_square() {
        let fx = fixture(GridType::Std100).await;
        let member = fx.member("auth0|m").await;
        let mut events = fx.state.broker().subscribe(&fx.pool.token);

        let square = command(&fx.state, &member, 7, claim("Alice"), None)
            .await
            .unwrap();
        assert_eq!(square.state, SquareState::Claimed);
        assert_eq!(square.claimant, "Alice");
        assert!(square.logs.is_none());
        assert_eq!(events.recv().await, Some(PoolEvent::square_updated()));

        let square = command(
            &fx.state,
            &member,
            7,
            SquareCommandRequest {
                unclaim: true,
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(square.state, SquareState::Unclaimed);
        assert_eq!(square.claimant, "");
    }

    #[tokio::test]
    async fn second_claim_is_rejected() {
        let fx = fixture(GridType::Std100).await;
        let first = fx.member("auth0|a").await;
        let second = fx.member("auth0|b").await;

        command(&fx.state, &first, 3, claim("Alice"), None)
            .await
            .unwrap();
        let err = command(&fx.state, &second, 3, claim("Bob"), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "square has already been claimed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_have_exactly_one_winner() {
        let fx = fixture(GridType::Std100).await;
        let mut tasks = Vec::new();
        for i in 0..8 {
            let member = fx.member(&format!("auth0|racer{i}")).await;
            let state = fx.state.clone();
            tasks.push(tokio::spawn(async move {
                command(&state, &member, 42, claim(&format!("Racer {i}")), None).await
            }));
        }
        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => winners += 1,
                Err(err) => assert_eq!(err.to_string(), "square has already been claimed"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn locked_pool_blocks_members_but_not_managers() {
        let mut fx = fixture(GridType::Std100).await;
        let locks = OffsetDateTime::now_utc() - Duration::from_secs(60);
        fx.pool = fx
            .store
            .update_pool(fx.pool.id, PoolChange::Locks(Some(locks)))
            .await
            .unwrap()
            .unwrap();
        let member = fx.member("auth0|m").await;

        let err = command(&fx.state, &member, 1, claim("Alice"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(ref message) if message == "the grid is locked"));

        assert!(
            command(&fx.state, &fx.manager(), 1, claim("Alice"), None)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn invalid_claimant_is_a_validation_error() {
        let fx = fixture(GridType::Std100).await;
        let member = fx.member("auth0|m").await;
        let err = command(&fx.state, &member, 1, claim("!!!"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { ref errors, .. } if errors.contains_key("claimant")));
    }

    #[tokio::test]
    async fn secondary_claims_only_on_rollover_pools() {
        let fx = fixture(GridType::Std100).await;
        let member = fx.member("auth0|m").await;
        let err = command(
            &fx.state,
            &member,
            1,
            SquareCommandRequest {
                claimant: "Alice".into(),
                secondary_square_id: Some(2),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "secondary squares are not used with this grid type"
        );

        let fx = fixture(GridType::Roll100).await;
        let member = fx.member("auth0|m").await;
        let primary = command(
            &fx.state,
            &member,
            1,
            SquareCommandRequest {
                claimant: "Alice".into(),
                secondary_square_id: Some(2),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
        assert_eq!(primary.child_square_ids, vec![2]);
        let secondary = square_detail(&fx.state, &member, 2).await.unwrap();
        assert_eq!(secondary.parent_square_id, Some(1));
        assert_eq!(secondary.claimant, "Alice");
    }

    #[tokio::test]
    async fn admin_unclaim_cascades_through_linked_squares_only() {
        let fx = fixture(GridType::Roll100).await;
        let member = fx.member("auth0|m").await;
        for (primary, secondary) in [(1, 2), (3, 4)] {
            command(
                &fx.state,
                &member,
                primary,
                SquareCommandRequest {
                    claimant: "Alice".into(),
                    secondary_square_id: Some(secondary),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();
        }

        command(
            &fx.state,
            &fx.manager(),
            1,
            SquareCommandRequest {
                state: Some(SquareState::Unclaimed),
                note: "admin unclaim".into(),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

        let squares = list_squares(&fx.state, &fx.manager()).await.unwrap();
        assert_eq!(squares[&1].state, SquareState::Unclaimed);
        assert_eq!(squares[&2].state, SquareState::Unclaimed);
        assert_eq!(squares[&3].state, SquareState::Claimed);
        assert_eq!(squares[&4].state, SquareState::Claimed);
    }

    #[tokio::test]
    async fn managers_see_logs_and_user_info() {
        let fx = fixture(GridType::Std100).await;
        let (guest, _) = test_support::guest(&fx.store, "g").await;
        fx.store.add_member(fx.pool.id, guest.id, false);
        let guest_access = PoolAccess {
            user: guest,
            pool: fx.pool.clone(),
            role: Role::Member,
        };
        command(&fx.state, &guest_access, 5, claim("Guesty"), None)
            .await
            .unwrap();

        let detail = square_detail(&fx.state, &fx.manager(), 5).await.unwrap();
        let logs = detail.logs.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].note, "user: initial claim");
        assert_eq!(detail.user_info.unwrap().user_type, "guest");
    }

    #[tokio::test]
    async fn admin_set_state_requires_a_claimed_square() {
        let fx = fixture(GridType::Std100).await;
        let err = command(
            &fx.state,
            &fx.manager(),
            9,
            SquareCommandRequest {
                state: Some(SquareState::PaidFull),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "cannot change state of an unclaimed square");
    }

    #[tokio::test]
    async fn non_owner_cannot_unclaim_someone_elses_square() {
        let fx = fixture(GridType::Std100).await;
        let alice = fx.member("auth0|alice").await;
        let bob = fx.member("auth0|bob").await;
        command(&fx.state, &alice, 1, claim("Alice"), None)
            .await
            .unwrap();
        let err = command(
            &fx.state,
            &bob,
            1,
            SquareCommandRequest {
                unclaim: true,
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }
}
