//! Pool lifecycle: creation, manager actions, invites and joining.

use std::collections::BTreeMap;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use rand::{Rng, RngCore, distr::Alphanumeric};
use time::OffsetDateTime;
use tracing::{info, warn};
use validator::Validate;

use crate::{
    dao::{
        models::{
            ANNOTATION_ICONS, GridEntity, GridType, IdentityKind, InviteEntity, NewPool,
            NumberSetConfig, PoolEntity, SquareState, UserEntity,
        },
        storage::StorageError,
        store::PoolChange,
    },
    dto::{
        pool::{
            AnnotationIconInfo, ConfigurationResponse, CreatePoolRequest, GridTypeInfo,
            InviteTokenResponse, JoinPoolRequest, NumberSetConfigInfo, PoolActionRequest,
            PoolDetailResponse, PoolLogQuery, PoolLogResponse, PoolResponse,
            PublicSquaresResponse,
        },
        square::{SquareLogResponse, SquareResponse},
        validation::{
            CLAIMANT_MAX_LENGTH, MIN_JOIN_PASSWORD_LENGTH, NAME_MAX_LENGTH, NOTES_MAX_LENGTH,
            TEAM_NAME_MAX_LENGTH, validate_printable,
        },
    },
    error::ServiceError,
    services::{access_service::require_manager, token_signer::INVITE_TTL},
    state::{PoolEvent, SharedState, access::PoolAccess},
};

const POOL_TOKEN_LENGTH: usize = 8;
const INVITE_TOKEN_LENGTH: usize = 10;
const TOKEN_ATTEMPTS: usize = 4;
const POOL_LOG_LIMIT: i64 = 100;
const INVALID_NUMBER_SET_CONFIG: &str = "Invalid number set configuration";

/// Argon2id PHC string for a join password.
pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    let salt = SaltString::encode_b64(&bytes)
        .map_err(|err| ServiceError::Internal(format!("password salt: {err}")))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| ServiceError::Internal(format!("password hash: {err}")))
}

/// Whether `password` matches the pool's stored hash. Pools without a hash never match.
pub fn verify_password(pool: &PoolEntity, password: &str) -> bool {
    let Some(stored) = pool.password_hash.as_deref() else {
        return false;
    };
    match PasswordHash::new(stored) {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(err) => {
            warn!(error = %err, pool = %pool.token, "stored password hash is unreadable");
            false
        }
    }
}

fn random_token(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn password_field_error(password: &str) -> Option<ServiceError> {
    (password.chars().count() < MIN_JOIN_PASSWORD_LENGTH).then(|| {
        ServiceError::field(
            "password",
            format!("password must be at least {MIN_JOIN_PASSWORD_LENGTH} characters"),
        )
    })
}

/// Create a pool owned by `user` with its squares and a first grid.
pub async fn create_pool(
    state: &SharedState,
    user: &UserEntity,
    request: CreatePoolRequest,
) -> Result<PoolResponse, ServiceError> {
    if user.kind != IdentityKind::External {
        return Err(ServiceError::Forbidden(
            "guests cannot create pools".into(),
        ));
    }
    let request = CreatePoolRequest {
        name: request.name.trim().to_owned(),
        ..request
    };
    request.validate()?;
    let grid_type: GridType = request
        .grid_type
        .parse()
        .map_err(|_| ServiceError::field("gridType", "must be a valid squares type"))?;
    let number_set_config = match request.number_set_config.as_deref() {
        None | Some("") => NumberSetConfig::Standard,
        Some(raw) => raw
            .parse()
            .map_err(|_| ServiceError::field("numberSetConfig", INVALID_NUMBER_SET_CONFIG))?,
    };
    let password_hash = hash_password(&request.join_password)?;

    for _ in 0..TOKEN_ATTEMPTS {
        let new_pool = NewPool {
            token: random_token(POOL_TOKEN_LENGTH),
            user_id: user.id,
            name: request.name.clone(),
            grid_type,
            password_hash: password_hash.clone(),
            number_set_config,
        };
        match state.store().create_pool(new_pool).await {
            Ok(pool) => {
                info!(pool = %pool.token, user = user.id, %grid_type, "pool created");
                return Ok(PoolResponse::from(&pool));
            }
            Err(StorageError::Duplicate(what)) => {
                warn!(%what, "pool token collision, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::Internal(
        "could not allocate a unique pool token".into(),
    ))
}

/// Pool metadata with the caller's role flags. Managers also learn whether the number
/// set configuration can still change.
pub async fn pool_detail(
    state: &SharedState,
    access: &PoolAccess,
) -> Result<PoolDetailResponse, ServiceError> {
    let mut detail = PoolDetailResponse::from(access);
    if access.is_pool_manager() {
        let grids = state.store().grids(access.pool.id).await?;
        detail.can_change_number_set_config = Some(!grids.iter().any(GridEntity::numbers_drawn));
    }
    Ok(detail)
}

/// Run a manager action against the pool and return its refreshed view.
///
/// Each action writes only the column it owns; the response reflects the stored row.
pub async fn pool_action(
    state: &SharedState,
    access: &PoolAccess,
    request: PoolActionRequest,
) -> Result<PoolDetailResponse, ServiceError> {
    require_manager(access)?;
    let store = state.store();
    let pool = &access.pool;

    let change = match request.action.as_str() {
        "lock" => Some(PoolChange::Locks(Some(OffsetDateTime::now_utc()))),
        "unlock" => Some(PoolChange::Locks(None)),
        "passwordRequired" => Some(PoolChange::PasswordRequired(request.password_required)),
        "accessOnLock" => Some(PoolChange::OpenAccessOnLock(request.open_access_on_lock)),
        "archive" => Some(PoolChange::Archived(true)),
        "unarchive" => Some(PoolChange::Archived(false)),
        "reorderGrids" => {
            store.reorder_grids(pool.id, request.ids).await?;
            None
        }
        "rename" => Some(PoolChange::Name(validated_name(&request.name)?)),
        "changeNumberSetConfig" => Some(PoolChange::NumberSetConfig(
            checked_number_set_config(state, pool, &request.number_set_config).await?,
        )),
        "changeJoinPassword" => {
            if let Some(err) = password_field_error(&request.password) {
                return Err(err);
            }
            let hash = hash_password(&request.password)?;
            store
                .change_join_password(pool.id, hash, request.reset_membership)
                .await?;
            if request.reset_membership {
                info!(pool = %pool.token, "pool memberships reset");
            }
            None
        }
        other => {
            return Err(ServiceError::InvalidInput(format!(
                "unsupported action {other}"
            )));
        }
    };

    let updated = match change {
        Some(change) => store.update_pool(pool.id, change).await?,
        None => store.pool_by_token(pool.token.clone()).await?,
    }
    .ok_or_else(|| ServiceError::NotFound("pool not found".into()))?;

    info!(pool = %updated.token, action = %request.action, "pool updated");
    state.publish(&updated.token, PoolEvent::pool_updated());
    pool_detail(
        state,
        &PoolAccess {
            pool: updated,
            ..access.clone()
        },
    )
    .await
}

fn validated_name(raw: &str) -> Result<String, ServiceError> {
    let name = raw.trim();
    if let Err(err) = validate_printable(name) {
        let message = err
            .message
            .map(|message| message.to_string())
            .unwrap_or_else(|| err.code.to_string());
        return Err(ServiceError::field("name", message));
    }
    if name.is_empty() || name.chars().count() > NAME_MAX_LENGTH {
        return Err(ServiceError::field(
            "name",
            format!("must be between 1 and {NAME_MAX_LENGTH} characters"),
        ));
    }
    Ok(name.to_owned())
}

/// Parse a requested configuration and make sure the pool can switch to it: no grid may
/// have drawn numbers and every linked event's league must support it.
async fn checked_number_set_config(
    state: &SharedState,
    pool: &PoolEntity,
    raw: &str,
) -> Result<NumberSetConfig, ServiceError> {
    let config: NumberSetConfig = raw
        .parse()
        .map_err(|_| ServiceError::InvalidInput(INVALID_NUMBER_SET_CONFIG.into()))?;
    let store = state.store();
    let grids = store.grids(pool.id).await?;
    if grids.iter().any(GridEntity::numbers_drawn) {
        return Err(ServiceError::Conflict(
            "Cannot change number set configuration after numbers have been drawn for any game"
                .into(),
        ));
    }

    for event_id in grids.iter().filter_map(|grid| grid.linked_event_id) {
        let Some(event) = store.sports_event(event_id).await? else {
            continue;
        };
        if !config.supports_league(event.league) {
            return Err(ServiceError::InvalidInput(format!(
                "Cannot use '{config}' configuration: one or more grids are linked to {} games \
                 which don't support this configuration",
                event.league
            )));
        }
    }
    Ok(config)
}

/// Square log rows across the pool, newest first.
pub async fn pool_logs(
    state: &SharedState,
    access: &PoolAccess,
    query: PoolLogQuery,
) -> Result<PoolLogResponse, ServiceError> {
    let limit = query.limit.unwrap_or(POOL_LOG_LIMIT);
    if limit > POOL_LOG_LIMIT {
        return Err(ServiceError::InvalidInput(format!(
            "limit cannot exceed {POOL_LOG_LIMIT}"
        )));
    }
    if limit < 0 || query.offset < 0 {
        return Err(ServiceError::InvalidInput(
            "offset and limit must not be negative".into(),
        ));
    }

    let page = state
        .store()
        .pool_logs(access.pool.id, query.offset, limit)
        .await?;
    Ok(PoolLogResponse {
        logs: page.items.into_iter().map(SquareLogResponse::from).collect(),
        total: page.total,
    })
}

/// Reuse the live invite at the current check id or issue a new one.
pub async fn invite_token(
    state: &SharedState,
    access: &PoolAccess,
) -> Result<InviteTokenResponse, ServiceError> {
    require_manager(access)?;
    let store = state.store();
    let pool = &access.pool;
    let now = OffsetDateTime::now_utc();

    let invite = match store.active_invite(pool.id, pool.check_id, now).await? {
        Some(invite) => invite,
        None => issue_invite(state, pool, now).await?,
    };
    let jwt = state
        .signer()
        .sign_invite(&pool.token, pool.check_id, now)
        .map_err(|err| ServiceError::Internal(format!("signing invite: {err}")))?;

    Ok(InviteTokenResponse {
        token: invite.token,
        jwt,
    })
}

async fn issue_invite(
    state: &SharedState,
    pool: &PoolEntity,
    now: OffsetDateTime,
) -> Result<InviteEntity, ServiceError> {
    for _ in 0..TOKEN_ATTEMPTS {
        let invite = InviteEntity {
            token: random_token(INVITE_TOKEN_LENGTH),
            pool_id: pool.id,
            check_id: pool.check_id,
            expires: now + INVITE_TTL,
        };
        match state.store().create_invite(invite).await {
            Ok(invite) => {
                info!(pool = %pool.token, check_id = pool.check_id, "invite issued");
                return Ok(invite);
            }
            Err(StorageError::Duplicate(what)) => {
                warn!(%what, "invite token collision, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ServiceError::Internal(
        "could not allocate a unique invite token".into(),
    ))
}

/// Record `access.user` as a member after checking one of the join credentials.
///
/// A stored invite wins over an invite JWT, which wins over the password.
pub async fn join(
    state: &SharedState,
    access: &PoolAccess,
    request: JoinPoolRequest,
) -> Result<(), ServiceError> {
    let pool = &access.pool;
    let now = OffsetDateTime::now_utc();

    if let Some(token) = request.invite.filter(|token| !token.is_empty()) {
        let admitted = state
            .store()
            .invite_by_token(token)
            .await?
            .is_some_and(|invite| invite.admits(pool, now));
        if !admitted {
            return Err(ServiceError::InvalidInput("invalid invite token".into()));
        }
    } else if let Some(jwt) = request.jwt.filter(|jwt| !jwt.is_empty()) {
        state
            .signer()
            .verify_invite(&jwt, &pool.token, pool.check_id)
            .map_err(|err| {
                info!(error = %err, pool = %pool.token, "join token rejected");
                ServiceError::InvalidInput("invalid join token".into())
            })?;
    } else {
        let password = request.password.unwrap_or_default();
        if !verify_password(pool, &password) {
            return Err(ServiceError::InvalidInput("password is invalid".into()));
        }
    }

    state.store().join_pool(pool.id, access.user.id).await?;
    info!(pool = %pool.token, user = access.user.id, "joined pool");
    Ok(())
}

fn basic_password(authorization: Option<&str>) -> Option<String> {
    let encoded = authorization?.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (_, password) = credentials.split_once(':')?;
    Some(password.to_owned())
}

/// Read-only squares of a pool, guarded by HTTP basic auth while the pool requires a password.
pub async fn public_squares(
    state: &SharedState,
    pool_token: &str,
    authorization: Option<&str>,
) -> Result<PublicSquaresResponse, ServiceError> {
    let store = state.store();
    let pool = store
        .pool_by_token(pool_token.to_owned())
        .await?
        .ok_or_else(|| ServiceError::NotFound("pool not found".into()))?;

    if !pool.is_open_at(OffsetDateTime::now_utc()) {
        let admitted = basic_password(authorization)
            .is_some_and(|password| verify_password(&pool, &password));
        if !admitted {
            return Err(ServiceError::CredentialsRequired(
                "authentication required".into(),
            ));
        }
    }

    let squares: BTreeMap<i32, SquareResponse> = store
        .squares(pool.id)
        .await?
        .into_iter()
        .map(|square| (square.square_id, SquareResponse::public(square)))
        .collect();
    Ok(PublicSquaresResponse {
        pool: PoolResponse::from(&pool),
        squares,
    })
}

/// Limits and enumerations clients render forms with.
pub fn configuration() -> ConfigurationResponse {
    ConfigurationResponse {
        claimant_max_length: CLAIMANT_MAX_LENGTH,
        name_max_length: NAME_MAX_LENGTH,
        notes_max_length: NOTES_MAX_LENGTH,
        team_name_max_length: TEAM_NAME_MAX_LENGTH,
        pool_square_states: SquareState::ALL.to_vec(),
        grid_types: GridType::ALL
            .into_iter()
            .map(|key| GridTypeInfo {
                key,
                description: key.description().to_owned(),
            })
            .collect(),
        number_set_configs: NumberSetConfig::ALL
            .into_iter()
            .map(|key| NumberSetConfigInfo {
                key,
                label: key.label().to_owned(),
                set_types: key.set_types().iter().map(|set| (*set).to_owned()).collect(),
            })
            .collect(),
        min_join_password_length: MIN_JOIN_PASSWORD_LENGTH,
        grid_annotation_icons: (0i16..)
            .zip(ANNOTATION_ICONS)
            .map(|(icon, name)| {
                (
                    icon,
                    AnnotationIconInfo {
                        name: name.to_owned(),
                    },
                )
            })
            .collect(),
    }
}
