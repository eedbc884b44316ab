//! Manager operations over many squares at once.
//!
//! Each square is planned and written in its own transaction, so one failure never undoes
//! the squares before it.

use tracing::{info, warn};

use crate::{
    dao::{
        models::SquareState,
        store::{SquareWriteBatch, WriteGuard, WriteOutcome},
    },
    dto::{
        square::{BulkSquareResult, BulkSquaresRequest, BulkSquaresResponse},
        validation::validate_claimant,
    },
    error::ServiceError,
    services::access_service::require_manager,
    state::{
        PoolEvent, SharedState,
        access::PoolAccess,
        squares::{Actor, BulkAction, BulkItemError, SquareBoard, plan_bulk_item},
    },
};

fn parse_action(request: &BulkSquaresRequest) -> Result<BulkAction, ServiceError> {
    match request.action.as_str() {
        "claim" => {
            let claimant = request.claimant.trim();
            if claimant.is_empty() {
                return Err(ServiceError::InvalidInput(
                    "claimant is required for claim action".into(),
                ));
            }
            validate_claimant(claimant)?;
            Ok(BulkAction::Claim {
                claimant: claimant.to_owned(),
            })
        }
        "unclaim" => Ok(BulkAction::Unclaim),
        "set_state" => match request.state {
            Some(state @ (SquareState::Claimed | SquareState::PaidPartial | SquareState::PaidFull)) => {
                Ok(BulkAction::SetState {
                    state,
                    note: Some(request.note.clone()),
                })
            }
            _ => Err(ServiceError::InvalidInput(
                "state must be claimed, paid-partial, or paid-full".into(),
            )),
        },
        other => Err(ServiceError::InvalidInput(format!("invalid action: {other}"))),
    }
}

/// Run `request` against every listed square, reporting a result per id.
pub async fn bulk_update(
    state: &SharedState,
    access: &PoolAccess,
    request: BulkSquaresRequest,
    remote_addr: Option<String>,
) -> Result<BulkSquaresResponse, ServiceError> {
    require_manager(access)?;
    if request.square_ids.is_empty() {
        return Err(ServiceError::InvalidInput("squareIds must not be empty".into()));
    }
    let action = parse_action(&request)?;
    let actor = Actor {
        user_id: access.user.id,
        is_manager: true,
    };

    let mut results = Vec::with_capacity(request.square_ids.len());
    let mut applied = 0usize;
    for raw_id in request.square_ids {
        let outcome = apply_one(state, access, raw_id, &action, actor, remote_addr.clone()).await;
        results.push(match outcome {
            Ok(()) => {
                applied += 1;
                BulkSquareResult {
                    square_id: raw_id,
                    ok: true,
                    error: None,
                }
            }
            Err(err) => BulkSquareResult {
                square_id: raw_id,
                ok: false,
                error: Some(err.to_string()),
            },
        });
    }

    info!(
        pool = %access.pool.token,
        action = %request.action,
        applied,
        total = results.len(),
        "bulk square update"
    );
    if applied > 0 {
        state.publish(&access.pool.token, PoolEvent::square_updated());
    }
    Ok(BulkSquaresResponse { results })
}

async fn apply_one(
    state: &SharedState,
    access: &PoolAccess,
    raw_id: i64,
    action: &BulkAction,
    actor: Actor,
    remote_addr: Option<String>,
) -> Result<(), BulkItemError> {
    let square_id = i32::try_from(raw_id).map_err(|_| BulkItemError::InvalidSquareId)?;
    let store = state.store();
    let grid_type = access.pool.grid_type;
    if square_id < 1 || square_id > grid_type.square_count() {
        return Err(BulkItemError::InvalidSquareId);
    }

    let square = store
        .square(access.pool.id, square_id)
        .await
        .map_err(|err| {
            warn!(error = %err, square = square_id, "bulk lookup failed");
            BulkItemError::Internal
        })?;
    let board = SquareBoard::new(square.into_iter().collect());
    let writes = plan_bulk_item(&board, grid_type, square_id, action, actor)?;

    let outcome = store
        .apply_square_writes(SquareWriteBatch {
            pool_id: access.pool.id,
            actor_id: access.user.id,
            remote_addr,
            writes,
        })
        .await
        .map_err(|err| {
            warn!(error = %err, square = square_id, "bulk write failed");
            BulkItemError::Internal
        })?;

    match outcome {
        WriteOutcome::Applied => Ok(()),
        WriteOutcome::Rejected {
            guard: WriteGuard::Unclaimed,
            ..
        } => Err(BulkItemError::AlreadyClaimed),
        WriteOutcome::Rejected {
            guard: WriteGuard::Claimed,
            ..
        } => Err(BulkItemError::MustBeClaimed),
        WriteOutcome::Rejected { .. } => Err(BulkItemError::Internal),
        WriteOutcome::Missing { .. } => Err(BulkItemError::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        dao::{memory::MemoryStore, models::GridType, store::SquareStore},
        state::{access::Role, test_support},
    };

    async fn fixture(grid_type: GridType) -> (Arc<MemoryStore>, SharedState, PoolAccess) {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state(store.clone());
        let owner = test_support::external(&store, "auth0|owner").await;
        let pool = test_support::pool(&store, owner.id, grid_type).await;
        let access = PoolAccess {
            user: owner,
            pool,
            role: Role::PoolManager,
        };
        (store, state, access)
    }

    fn request(action: &str, ids: Vec<i64>) -> BulkSquaresRequest {
        BulkSquaresRequest {
            square_ids: ids,
            action: action.into(),
            claimant: "Alice".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn partial_failures_do_not_abort_the_batch() {
        let (_store, state, access) = fixture(GridType::Std100).await;
        bulk_update(&state, &access, request("claim", vec![3]), None)
            .await
            .unwrap();

        let mut events = state.broker().subscribe(&access.pool.token);
        let response = bulk_update(&state, &access, request("claim", vec![1, 3, 0, 101]), None)
            .await
            .unwrap();
        assert_eq!(
            response.results,
            vec![
                BulkSquareResult {
                    square_id: 1,
                    ok: true,
                    error: None
                },
                BulkSquareResult {
                    square_id: 3,
                    ok: false,
                    error: Some("already claimed".into())
                },
                BulkSquareResult {
                    square_id: 0,
                    ok: false,
                    error: Some("invalid square ID".into())
                },
                BulkSquareResult {
                    square_id: 101,
                    ok: false,
                    error: Some("invalid square ID".into())
                },
            ]
        );
        assert_eq!(events.recv().await, Some(PoolEvent::square_updated()));
    }

    #[tokio::test]
    async fn set_state_requires_claimed_squares() {
        let (store, state, access) = fixture(GridType::Std25).await;
        bulk_update(&state, &access, request("claim", vec![1]), None)
            .await
            .unwrap();
        let response = bulk_update(
            &state,
            &access,
            BulkSquaresRequest {
                square_ids: vec![1, 2],
                action: "set_state".into(),
                state: Some(SquareState::PaidFull),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
        assert!(response.results[0].ok);
        assert_eq!(
            response.results[1].error.as_deref(),
            Some("square must be claimed first")
        );

        let square = store.square(access.pool.id, 1).await.unwrap().unwrap();
        assert_eq!(square.state, SquareState::PaidFull);
        let logs = store.square_logs(access.pool.id, 1).await.unwrap();
        assert_eq!(logs[0].note, "admin: bulk set state to paid-full");
    }

    #[tokio::test]
    async fn request_level_validation() {
        let (_store, state, access) = fixture(GridType::Std100).await;
        let cases = [
            (request("claim", vec![]), "squareIds must not be empty"),
            (
                BulkSquaresRequest {
                    square_ids: vec![1],
                    action: "claim".into(),
                    ..Default::default()
                },
                "claimant is required for claim action",
            ),
            (
                BulkSquaresRequest {
                    square_ids: vec![1],
                    action: "set_state".into(),
                    state: Some(SquareState::Unclaimed),
                    ..Default::default()
                },
                "state must be claimed, paid-partial, or paid-full",
            ),
            (request("explode", vec![1]), "invalid action: explode"),
        ];
        for (request, message) in cases {
            let err = bulk_update(&state, &access, request, None).await.unwrap_err();
            assert_eq!(err.to_string(), message);
        }
    }

    #[tokio::test]
    async fn members_cannot_run_bulk_operations() {
        let (_store, state, mut access) = fixture(GridType::Std100).await;
        access.role = Role::Member;
        assert!(matches!(
            bulk_update(&state, &access, request("unclaim", vec![1]), None).await,
            Err(ServiceError::Forbidden(_))
        ));
    }
}
