use std::collections::BTreeMap;

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::info;
use validator::Validate;

use crate::{
    dao::{
        models::{GridColors, GridEntity, GridType, annotation_icon},
        store::{AnnotationWrite, DrawRecord, GridDeletion},
    },
    dto::grid::{
        AnnotationRequest, DrawResponse, GridAnnotationResponse, GridCommandData,
        GridCommandRequest, GridListResponse, GridResponse,
    },
    error::{FieldErrors, ServiceError, field_errors},
    services::access_service::require_manager,
    state::{
        PoolEvent, SharedState,
        access::PoolAccess,
        grid::{
            Draw, GridChanges, GridRuleError, MAX_GRIDS_PER_POOL, check_event_link, draw_manual,
            draw_random, should_lock_after_draw,
        },
    },
};

const SAVE_VALIDATION_MESSAGE: &str = "There were one or more validation errors";
const ALREADY_DRAWN: &str = "the numbers have already been drawn";

/// Result of a grid command, rendered with a different status per variant.
#[derive(Debug)]
pub enum GridCommandOutcome {
    /// Grid created or updated.
    Saved(GridResponse),
    /// Numbers drawn, with the resulting pool lock.
    Drawn(DrawResponse),
}

/// Active grids of the pool in display order.
pub async fn list_grids(
    state: &SharedState,
    access: &PoolAccess,
) -> Result<GridListResponse, ServiceError> {
    let grids: Vec<GridResponse> = state
        .store()
        .grids(access.pool.id)
        .await?
        .into_iter()
        .map(GridResponse::from)
        .collect();
    Ok(GridListResponse {
        total: grids.len(),
        grids,
        max_allowed: MAX_GRIDS_PER_POOL,
    })
}

/// One grid with its annotations keyed by square number.
pub async fn grid_detail(
    state: &SharedState,
    access: &PoolAccess,
    grid_id: i64,
) -> Result<GridResponse, ServiceError> {
    let grid = load_grid(state, access, grid_id).await?;
    let annotations: BTreeMap<i32, GridAnnotationResponse> = state
        .store()
        .grid_annotations(grid.id)
        .await?
        .into_iter()
        .map(|annotation| (annotation.square_id, annotation.into()))
        .collect();
    Ok(GridResponse {
        annotations: Some(annotations),
        ..GridResponse::from(grid)
    })
}

async fn load_grid(
    state: &SharedState,
    access: &PoolAccess,
    grid_id: i64,
) -> Result<GridEntity, ServiceError> {
    state
        .store()
        .grid(access.pool.id, grid_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound("grid not found".into()))
}

/// Dispatch `save`, `drawNumbers` or `drawManualNumbers`. Grid id `0` only accepts `save`,
/// which then creates a new grid.
pub async fn command(
    state: &SharedState,
    access: &PoolAccess,
    grid_id: i64,
    request: GridCommandRequest,
) -> Result<GridCommandOutcome, ServiceError> {
    require_manager(access)?;
    let action = request.action.as_str();
    if grid_id == 0 && action != "save" {
        return Err(ServiceError::InvalidInput(format!(
            "cannot call action {action} without an ID"
        )));
    }

    match action {
        "drawNumbers" => {
            let grid = load_grid(state, access, grid_id).await?;
            let draw = draw_random(&grid, &mut rand::rng()).map_err(draw_error)?;
            let lock_pool = request.data.and_then(|data| data.lock_pool);
            record_draw(state, access, grid, draw, lock_pool)
                .await
                .map(GridCommandOutcome::Drawn)
        }
        "drawManualNumbers" => {
            let data = request.data.ok_or_else(missing_data)?;
            let grid = load_grid(state, access, grid_id).await?;
            let draw = draw_manual(
                &grid,
                data.home_team_numbers.unwrap_or_default(),
                data.away_team_numbers.unwrap_or_default(),
            )
            .map_err(|err| match err {
                GridRuleError::InvalidNumbers => {
                    ServiceError::InvalidInput(format!("could not set manual numbers: {err}"))
                }
                other => draw_error(other),
            })?;
            record_draw(state, access, grid, draw, data.lock_pool)
                .await
                .map(GridCommandOutcome::Drawn)
        }
        "save" => {
            let data = request.data.ok_or_else(missing_data)?;
            save(state, access, grid_id, data)
                .await
                .map(GridCommandOutcome::Saved)
        }
        other => Err(ServiceError::InvalidInput(format!(
            "unsupported action {other}"
        ))),
    }
}

fn missing_data() -> ServiceError {
    ServiceError::InvalidInput("missing data in payload".into())
}

fn draw_error(err: GridRuleError) -> ServiceError {
    match err {
        GridRuleError::AlreadyDrawn => ServiceError::Conflict(ALREADY_DRAWN.into()),
        other => other.into(),
    }
}

async fn record_draw(
    state: &SharedState,
    access: &PoolAccess,
    grid: GridEntity,
    draw: Draw,
    lock_pool: Option<bool>,
) -> Result<DrawResponse, ServiceError> {
    let now = OffsetDateTime::now_utc();
    let lock_pool_at = should_lock_after_draw(&access.pool, lock_pool, now).then_some(now);

    let Draw { home, away, manual } = draw;
    let recorded = state
        .store()
        .record_draw(DrawRecord {
            pool_id: access.pool.id,
            grid_id: grid.id,
            home_numbers: home,
            away_numbers: away,
            manual,
            require_undrawn: true,
            lock_pool_at,
        })
        .await?;
    if !recorded {
        return Err(ServiceError::Conflict(ALREADY_DRAWN.into()));
    }

    info!(
        pool = %access.pool.token,
        grid = grid.id,
        manual,
        locked = lock_pool_at.is_some(),
        "numbers drawn"
    );
    state.publish(&access.pool.token, PoolEvent::grid_updated());

    let grid = load_grid(state, access, grid.id).await?;
    Ok(DrawResponse {
        grid: GridResponse::from(grid),
        pool_locks: lock_pool_at.or(access.pool.locks),
    })
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Validate the save payload, adding the checks that depend on the pool.
fn validate_save(
    data: &GridCommandData,
    grid_type: GridType,
) -> Result<Option<OffsetDateTime>, ServiceError> {
    let mut errors: FieldErrors = match data.validate() {
        Ok(()) => FieldErrors::new(),
        Err(errors) => field_errors(&errors),
    };

    if data.rollover && grid_type != GridType::Roll100 {
        errors
            .entry("rollover".into())
            .or_default()
            .push("Rollover is not valid for this pool type".into());
    }

    let event_date = match data.event_date.trim() {
        "" => None,
        raw => match OffsetDateTime::parse(raw, &Rfc3339) {
            Ok(date) => Some(date),
            Err(_) => {
                errors
                    .entry("eventDate".into())
                    .or_default()
                    .push("must be a valid date and time".into());
                None
            }
        },
    };

    if errors.is_empty() {
        Ok(event_date)
    } else {
        Err(ServiceError::Validation {
            message: SAVE_VALIDATION_MESSAGE.into(),
            errors,
        })
    }
}

async fn save(
    state: &SharedState,
    access: &PoolAccess,
    grid_id: i64,
    data: GridCommandData,
) -> Result<GridResponse, ServiceError> {
    let store = state.store();
    let event_date = validate_save(&data, access.pool.grid_type)?;

    let mut grid = if grid_id == 0 {
        if store.grids(access.pool.id).await?.len() >= MAX_GRIDS_PER_POOL {
            return Err(GridRuleError::GridLimit.into());
        }
        GridEntity::draft(access.pool.id, OffsetDateTime::now_utc())
    } else {
        load_grid(state, access, grid_id).await?
    };

    let current_event = match grid.linked_event_id {
        Some(id) => store.sports_event(id).await?,
        None => None,
    };
    check_event_link(current_event.as_ref(), data.bdl_event_id)?;

    let linked_event = match data.bdl_event_id {
        Some(id) if current_event.as_ref().is_some_and(|event| event.id == id) => current_event,
        Some(id) => Some(store.sports_event(id).await?.ok_or_else(|| {
            ServiceError::field("bdlEventId", "must reference a known event")
        })?),
        None => None,
    };
    let config = access.pool.number_set_config;
    if let Some(event) = linked_event
        .as_ref()
        .filter(|event| !config.supports_league(event.league))
    {
        return Err(ServiceError::field(
            "bdlEventId",
            format!(
                "{} games do not support the '{config}' configuration",
                event.league.label()
            ),
        ));
    }

    let mut changes = GridChanges {
        label: non_empty(data.label),
        home_team_name: non_empty(data.home_team_name),
        away_team_name: non_empty(data.away_team_name),
        event_date,
        notes: non_empty(data.notes),
        rollover: data.rollover,
        linked_event_id: data.bdl_event_id,
        colors: GridColors {
            home_team_color1: data.home_team_color1,
            home_team_color2: data.home_team_color2,
            away_team_color1: data.away_team_color1,
            away_team_color2: data.away_team_color2,
        },
    };
    if let Some(event) = &linked_event {
        changes.fill_from_event(event);
    }
    changes.apply(&mut grid);

    let saved = store.save_grid(grid).await?;
    info!(pool = %access.pool.token, grid = saved.id, "grid saved");
    state.publish(&access.pool.token, PoolEvent::grid_updated());
    Ok(GridResponse::from(saved))
}

/// Soft-delete a grid. The last active grid of a pool cannot be deleted.
pub async fn delete_grid(
    state: &SharedState,
    access: &PoolAccess,
    grid_id: i64,
) -> Result<(), ServiceError> {
    require_manager(access)?;
    match state.store().delete_grid(access.pool.id, grid_id).await? {
        GridDeletion::Deleted => {
            info!(pool = %access.pool.token, grid = grid_id, "grid deleted");
            state.publish(&access.pool.token, PoolEvent::grid_updated());
            Ok(())
        }
        GridDeletion::LastGrid => Err(ServiceError::Conflict(
            "you cannot delete the last grid".into(),
        )),
        GridDeletion::NotFound => Err(ServiceError::NotFound("grid not found".into())),
    }
}

fn check_annotation_square(access: &PoolAccess, square_id: i32) -> Result<(), ServiceError> {
    if (1..=access.pool.grid_type.square_count()).contains(&square_id) {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput("invalid square ID".into()))
    }
}

/// Pin an annotation to a square of the grid, replacing any existing one. The flag is
/// `true` when the annotation is new.
pub async fn save_annotation(
    state: &SharedState,
    access: &PoolAccess,
    grid_id: i64,
    square_id: i32,
    request: AnnotationRequest,
) -> Result<(GridAnnotationResponse, bool), ServiceError> {
    require_manager(access)?;
    check_annotation_square(access, square_id)?;

    let mut errors: FieldErrors = match request.validate() {
        Ok(()) => FieldErrors::new(),
        Err(errors) => field_errors(&errors),
    };
    if annotation_icon(request.icon).is_none() {
        errors
            .entry("icon".into())
            .or_default()
            .push(format!("{} is not a valid annotation icon", request.icon));
    }
    if !errors.is_empty() {
        return Err(ServiceError::Validation {
            message: SAVE_VALIDATION_MESSAGE.into(),
            errors,
        });
    }

    let grid = load_grid(state, access, grid_id).await?;
    let (annotation, created) = state
        .store()
        .save_annotation(AnnotationWrite {
            grid_id: grid.id,
            square_id,
            annotation: request.annotation.trim().to_owned(),
            icon: request.icon,
        })
        .await?;
    info!(pool = %access.pool.token, grid = grid.id, square = square_id, created, "annotation saved");
    state.publish(&access.pool.token, PoolEvent::grid_updated());
    Ok((annotation.into(), created))
}

/// Remove the annotation of a square. Missing annotations are not an error.
pub async fn delete_annotation(
    state: &SharedState,
    access: &PoolAccess,
    grid_id: i64,
    square_id: i32,
) -> Result<(), ServiceError> {
    require_manager(access)?;
    check_annotation_square(access, square_id)?;
    let grid = load_grid(state, access, grid_id).await?;
    state.store().delete_annotation(grid.id, square_id).await?;
    info!(pool = %access.pool.token, grid = grid.id, square = square_id, "annotation removed");
    state.publish(&access.pool.token, PoolEvent::grid_updated());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        dao::{
            memory::MemoryStore,
            models::{NumberSetConfig, SportsEventEntity, SportsEventStatus, SportsLeague},
            store::{GridStore, PoolChange, PoolStore},
        },
        state::{access::Role, test_support},
    };

    async fn fixture(grid_type: GridType) -> (Arc<MemoryStore>, SharedState, PoolAccess, i64) {
        let store = Arc::new(MemoryStore::new());
        let state = test_support::state(store.clone());
        let owner = test_support::external(&store, "auth0|owner").await;
        let pool = test_support::pool(&store, owner.id, grid_type).await;
        let grid_id = store.grids(pool.id).await.unwrap()[0].id;
        let access = PoolAccess {
            user: owner,
            pool,
            role: Role::PoolManager,
        };
        (store, state, access, grid_id)
    }

    fn action(action: &str, data: Option<GridCommandData>) -> GridCommandRequest {
        GridCommandRequest {
            action: action.into(),
            data,
        }
    }

    #[tokio::test]
    async fn draw_locks_the_pool_by_default() {
        let (store, state, access, grid_id) = fixture(GridType::Std100).await;
        let mut events = state.broker().subscribe(&access.pool.token);

        let outcome = command(&state, &access, grid_id, action("drawNumbers", None))
            .await
            .unwrap();
        let GridCommandOutcome::Drawn(drawn) = outcome else {
            panic!("expected a draw");
        };
        assert!(drawn.grid.home_numbers.is_some());
        let locks = drawn.pool_locks.unwrap();
        assert!(OffsetDateTime::now_utc() - locks < Duration::from_secs(5));

        let pool = store.pool_by_token(access.pool.token.clone()).await.unwrap().unwrap();
        assert_eq!(pool.locks, Some(locks));
        assert_eq!(events.recv().await, Some(PoolEvent::grid_updated()));
    }

    #[tokio::test]
    async fn draw_with_lock_suppressed_leaves_pool_unlocked() {
        let (store, state, access, grid_id) = fixture(GridType::Std100).await;
        let data = GridCommandData {
            lock_pool: Some(false),
            ..Default::default()
        };
        let outcome = command(&state, &access, grid_id, action("drawNumbers", Some(data)))
            .await
            .unwrap();
        let GridCommandOutcome::Drawn(drawn) = outcome else {
            panic!("expected a draw");
        };
        assert_eq!(drawn.pool_locks, None);
        let pool = store.pool_by_token(access.pool.token.clone()).await.unwrap().unwrap();
        assert_eq!(pool.locks, None);
    }

    #[tokio::test]
    async fn second_draw_is_rejected() {
        let (_store, state, access, grid_id) = fixture(GridType::Std100).await;
        command(&state, &access, grid_id, action("drawNumbers", None))
            .await
            .unwrap();
        let err = command(&state, &access, grid_id, action("drawNumbers", None))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "the numbers have already been drawn");
    }

    #[tokio::test]
    async fn manual_numbers_must_be_permutations() {
        let (_store, state, access, grid_id) = fixture(GridType::Std100).await;
        let bad = GridCommandData {
            home_team_numbers: Some(vec![0, 0, 1, 2, 3, 4, 5, 6, 7, 8]),
            away_team_numbers: Some((0..10).collect()),
            ..Default::default()
        };
        let err = command(&state, &access, grid_id, action("drawManualNumbers", Some(bad)))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not set manual numbers: numbers supplied are invalid"
        );

        let good = GridCommandData {
            home_team_numbers: Some(vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0]),
            away_team_numbers: Some((0..10).collect()),
            lock_pool: Some(false),
            ..Default::default()
        };
        let outcome = command(&state, &access, grid_id, action("drawManualNumbers", Some(good)))
            .await
            .unwrap();
        let GridCommandOutcome::Drawn(drawn) = outcome else {
            panic!("expected a draw");
        };
        assert!(drawn.grid.manual_draw);
        assert_eq!(drawn.grid.home_numbers, Some(vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0]));
    }

    #[tokio::test]
    async fn final_event_link_is_immutable() {
        let (store, state, access, grid_id) = fixture(GridType::Std100).await;
        store.upsert_sports_event(SportsEventEntity {
            home_team_name: Some("Kansas City Chiefs".into()),
            away_team_name: Some("Philadelphia Eagles".into()),
            home_team_color: Some("e31837".into()),
            away_team_color: Some("004c54".into()),
            ..test_support::sports_event(12345, SportsLeague::Nfl, SportsEventStatus::Scheduled)
        });
        let link = GridCommandData {
            bdl_event_id: Some(12345),
            ..Default::default()
        };
        let outcome = command(&state, &access, grid_id, action("save", Some(link.clone())))
            .await
            .unwrap();
        let GridCommandOutcome::Saved(saved) = outcome else {
            panic!("expected a save");
        };
        assert_eq!(saved.home_team_name.as_deref(), Some("Kansas City Chiefs"));
        assert_eq!(saved.settings.away_team_color1.as_deref(), Some("#004c54"));

        let mut event = store.sports_event(12345).await.unwrap().unwrap();
        event.status = SportsEventStatus::Final;
        store.upsert_sports_event(event);

        let err = command(
            &state,
            &access,
            grid_id,
            action("save", Some(GridCommandData::default())),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot change linked event after the game has ended"
        );
        assert!(
            command(&state, &access, grid_id, action("save", Some(link)))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn save_validation_reports_fields() {
        let (_store, state, access, grid_id) = fixture(GridType::Std100).await;
        let data = GridCommandData {
            rollover: true,
            event_date: "tomorrow".into(),
            home_team_color1: Some("red".into()),
            ..Default::default()
        };
        let err = command(&state, &access, grid_id, action("save", Some(data)))
            .await
            .unwrap_err();
        let ServiceError::Validation { message, errors } = err else {
            panic!("expected validation error");
        };
        assert_eq!(message, SAVE_VALIDATION_MESSAGE);
        assert!(errors.contains_key("rollover"));
        assert!(errors.contains_key("eventDate"));
        assert!(errors.contains_key("homeTeamColor1"));
    }

    #[tokio::test]
    async fn grid_id_zero_only_accepts_save() {
        let (_store, state, access, _) = fixture(GridType::Std100).await;
        let err = command(&state, &access, 0, action("drawNumbers", None))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot call action drawNumbers without an ID");

        let created = command(
            &state,
            &access,
            0,
            action(
                "save",
                Some(GridCommandData {
                    label: "Second half".into(),
                    ..Default::default()
                }),
            ),
        )
        .await
        .unwrap();
        let GridCommandOutcome::Saved(created) = created else {
            panic!("expected a save");
        };
        assert_eq!(created.label.as_deref(), Some("Second half"));
        assert_eq!(list_grids(&state, &access).await.unwrap().total, 2);
    }

    #[tokio::test]
    async fn last_grid_cannot_be_deleted() {
        let (_store, state, access, grid_id) = fixture(GridType::Std100).await;
        let err = delete_grid(&state, &access, grid_id).await.unwrap_err();
        assert_eq!(err.to_string(), "you cannot delete the last grid");

        command(&state, &access, 0, action("save", Some(GridCommandData::default())))
            .await
            .unwrap();
        delete_grid(&state, &access, grid_id).await.unwrap();
        assert!(matches!(
            grid_detail(&state, &access, grid_id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_actions_are_rejected() {
        let (_store, state, access, grid_id) = fixture(GridType::Std100).await;
        let err = command(&state, &access, grid_id, action("shuffle", None))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported action shuffle");
    }

    fn note(annotation: &str, icon: i16) -> AnnotationRequest {
        AnnotationRequest {
            annotation: annotation.into(),
            icon,
        }
    }

    #[tokio::test]
    async fn annotations_upsert_and_show_in_detail() {
        let (_store, state, access, grid_id) = fixture(GridType::Std25).await;
        let mut events = state.broker().subscribe(&access.pool.token);

        let (saved, created) = save_annotation(&state, &access, grid_id, 7, note("Q1", 0))
            .await
            .unwrap();
        assert!(created);
        assert_eq!(saved.square_id, 7);
        assert_eq!(events.recv().await, Some(PoolEvent::grid_updated()));

        let (updated, created) = save_annotation(&state, &access, grid_id, 7, note("Q2", 8))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(updated.id, saved.id);

        let detail = grid_detail(&state, &access, grid_id).await.unwrap();
        let annotations = detail.annotations.unwrap();
        assert_eq!(annotations[&7].annotation, "Q2");
        assert_eq!(annotations[&7].icon, 8);

        delete_annotation(&state, &access, grid_id, 7).await.unwrap();
        let detail = grid_detail(&state, &access, grid_id).await.unwrap();
        assert!(detail.annotations.unwrap().is_empty());
    }

    #[tokio::test]
    async fn annotation_input_is_checked() {
        let (_store, state, mut access, grid_id) = fixture(GridType::Std25).await;

        let err = save_annotation(&state, &access, grid_id, 26, note("x", 0))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid square ID");

        let err = save_annotation(&state, &access, grid_id, 3, note("x", 10))
            .await
            .unwrap_err();
        let ServiceError::Validation { message, errors } = err else {
            panic!("expected validation error");
        };
        assert_eq!(message, SAVE_VALIDATION_MESSAGE);
        assert_eq!(errors["icon"], vec!["10 is not a valid annotation icon"]);

        access.role = Role::Member;
        assert!(matches!(
            save_annotation(&state, &access, grid_id, 3, note("x", 0)).await,
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn linking_requires_a_league_that_fits_the_number_sets() {
        let (store, state, mut access, grid_id) = fixture(GridType::Std100).await;
        access.pool = store
            .update_pool(
                access.pool.id,
                PoolChange::NumberSetConfig(NumberSetConfig::QuartersFinal),
            )
            .await
            .unwrap()
            .unwrap();
        store.upsert_sports_event(test_support::sports_event(
            77,
            SportsLeague::Ncaab,
            SportsEventStatus::Scheduled,
        ));

        let link = GridCommandData {
            bdl_event_id: Some(77),
            ..Default::default()
        };
        let err = command(&state, &access, grid_id, action("save", Some(link)))
            .await
            .unwrap_err();
        let ServiceError::Validation { errors, .. } = err else {
            panic!("expected validation error");
        };
        assert_eq!(
            errors["bdlEventId"],
            vec!["NCAAB games do not support the '123f' configuration"]
        );
    }
}
