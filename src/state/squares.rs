//! Square lifecycle rules.
//!
//! Planning is pure: a command is checked against a snapshot of the pool's squares and
//! turned into a list of guarded [`SquareWrite`]s. The store applies the list atomically and
//! re-checks every guard, so two racing claims cannot both win.

use std::collections::{BTreeMap, HashSet, VecDeque};

use thiserror::Error;

use crate::dao::{
    models::{GridType, SquareEntity, SquareState},
    store::{ParentLink, SquareWrite, WriteGuard},
};

/// Snapshot of every square of a pool keyed by square number.
#[derive(Debug, Clone, Default)]
pub struct SquareBoard {
    squares: BTreeMap<i32, SquareEntity>,
}

impl SquareBoard {
    /// Index the pool's squares by number.
    pub fn new(squares: Vec<SquareEntity>) -> Self {
        Self {
            squares: squares
                .into_iter()
                .map(|square| (square.square_id, square))
                .collect(),
        }
    }

    pub fn get(&self, square_id: i32) -> Option<&SquareEntity> {
        self.squares.get(&square_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SquareEntity> {
        self.squares.values()
    }

    /// The square plus everything reachable through parent and child edges, in discovery
    /// order. Each linked square is paired with the square it was reached from and whether it
    /// is that square's secondary.
    fn linkage(&self, square_id: i32) -> Vec<(i32, Option<Link>)> {
        let mut seen = HashSet::from([square_id]);
        let mut order = vec![(square_id, None)];
        let mut queue = VecDeque::from([square_id]);

        while let Some(current) = queue.pop_front() {
            let Some(square) = self.get(current) else {
                continue;
            };
            let parents = square.parent_square_id.into_iter().map(|id| (id, false));
            let children = square.child_square_ids.iter().map(|id| (*id, true));
            for (next, is_child) in parents.chain(children) {
                if seen.insert(next) {
                    order.push((
                        next,
                        Some(Link {
                            via: current,
                            is_child,
                        }),
                    ));
                    queue.push_back(next);
                }
            }
        }
        order
    }
}

#[derive(Debug, Clone, Copy)]
struct Link {
    via: i32,
    is_child: bool,
}

/// Raw square command as posted by a client.
#[derive(Debug, Clone, Default)]
pub struct SquareRequest {
    /// Already validated display name.
    pub claimant: Option<String>,
    pub state: Option<SquareState>,
    pub note: Option<String>,
    pub unclaim: bool,
    pub rename: bool,
    pub secondary_square_id: Option<i32>,
}

/// Who is acting and with which authority.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub user_id: i64,
    pub is_manager: bool,
}

/// Command chosen after applying precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SquareAction {
    Rename,
    Claim,
    Unclaim,
    SetState,
}

/// Writes to apply for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SquarePlan {
    pub action: SquareAction,
    pub writes: Vec<SquareWrite>,
}

/// Reasons a square command is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SquareCommandError {
    #[error("only an admin can rename a square")]
    RenameForbidden,
    #[error("cannot rename a secondary square directly; rename the primary square instead")]
    RenameSecondary,
    #[error("must be a different name")]
    SameName,
    #[error("square must be claimed first")]
    NotClaimed,
    #[error("secondary squares are not used with this grid type")]
    SecondaryUnsupported,
    #[error("secondary square must be different from the primary square")]
    SecondaryIsTarget,
    #[error("square {0} not found")]
    SquareNotFound(i32),
    #[error("square has already been claimed")]
    AlreadyClaimed,
    #[error("cannot directly edit a secondary square; edit the primary square instead")]
    SecondaryNotEditable,
    #[error("cannot change state of an unclaimed square")]
    StateOfUnclaimed,
    #[error("not allowed to administer squares in this pool")]
    Forbidden,
}

/// Plan `request` against square `square_id`.
///
/// Precedence: rename, then claim (non-empty claimant), then unclaim by the square's own
/// claimant, then admin state change.
pub fn plan_command(
    board: &SquareBoard,
    grid_type: GridType,
    square_id: i32,
    request: &SquareRequest,
    actor: Actor,
) -> Result<SquarePlan, SquareCommandError> {
    let target = board
        .get(square_id)
        .ok_or(SquareCommandError::SquareNotFound(square_id))?;

    if request.secondary_square_id.is_some() && !grid_type.supports_secondary() {
        return Err(SquareCommandError::SecondaryUnsupported);
    }
    if let Some(secondary) = request.secondary_square_id {
        if board.get(secondary).is_none() {
            return Err(SquareCommandError::SquareNotFound(secondary));
        }
    }

    let claimant = request.claimant.as_deref().filter(|name| !name.is_empty());

    if request.rename {
        let claimant = claimant.unwrap_or_default();
        return plan_rename(board, target, claimant, actor).map(|writes| SquarePlan {
            action: SquareAction::Rename,
            writes,
        });
    }

    if let Some(claimant) = claimant {
        return plan_claim(board, target, claimant, request.secondary_square_id, actor).map(
            |writes| SquarePlan {
                action: SquareAction::Claim,
                writes,
            },
        );
    }

    if request.unclaim && target.user_id == Some(actor.user_id) {
        return Ok(SquarePlan {
            action: SquareAction::Unclaim,
            writes: plan_user_unclaim(board, target, actor),
        });
    }

    if actor.is_manager {
        return plan_admin_state(board, target, request).map(|writes| SquarePlan {
            action: if request.state == Some(SquareState::Unclaimed) {
                SquareAction::Unclaim
            } else {
                SquareAction::SetState
            },
            writes,
        });
    }

    Err(SquareCommandError::Forbidden)
}

fn plan_rename(
    board: &SquareBoard,
    target: &SquareEntity,
    claimant: &str,
    actor: Actor,
) -> Result<Vec<SquareWrite>, SquareCommandError> {
    if !actor.is_manager {
        return Err(SquareCommandError::RenameForbidden);
    }
    if target.is_secondary() {
        return Err(SquareCommandError::RenameSecondary);
    }
    if target.state == SquareState::Unclaimed {
        return Err(SquareCommandError::NotClaimed);
    }
    let old = target.claimant.clone().unwrap_or_default();
    if old == claimant {
        return Err(SquareCommandError::SameName);
    }

    let mut writes = vec![SquareWrite {
        square_id: target.square_id,
        state: target.state,
        claimant: Some(claimant.to_owned()),
        user_id: None,
        parent: ParentLink::Keep,
        guard: WriteGuard::Claimed,
        note: format!("admin: changed claimant from {old}"),
    }];
    for child_id in &target.child_square_ids {
        let Some(child) = board.get(*child_id) else {
            continue;
        };
        writes.push(SquareWrite {
            square_id: child.square_id,
            state: child.state,
            claimant: Some(claimant.to_owned()),
            user_id: None,
            parent: ParentLink::Keep,
            guard: WriteGuard::Any,
            note: format!(
                "admin: changed claimant from {old} (via primary square {})",
                target.square_id
            ),
        });
    }
    Ok(writes)
}

fn plan_claim(
    board: &SquareBoard,
    target: &SquareEntity,
    claimant: &str,
    secondary: Option<i32>,
    actor: Actor,
) -> Result<Vec<SquareWrite>, SquareCommandError> {
    if target.is_secondary() {
        return Err(SquareCommandError::SecondaryNotEditable);
    }
    if target.state != SquareState::Unclaimed {
        return Err(SquareCommandError::AlreadyClaimed);
    }

    let mut writes = vec![SquareWrite {
        square_id: target.square_id,
        state: SquareState::Claimed,
        claimant: Some(claimant.to_owned()),
        user_id: Some(actor.user_id),
        parent: ParentLink::Clear,
        guard: WriteGuard::Unclaimed,
        note: "user: initial claim".into(),
    }];

    if let Some(secondary_id) = secondary {
        if secondary_id == target.square_id {
            return Err(SquareCommandError::SecondaryIsTarget);
        }
        let secondary = board
            .get(secondary_id)
            .ok_or(SquareCommandError::SquareNotFound(secondary_id))?;
        if secondary.state != SquareState::Unclaimed {
            return Err(SquareCommandError::AlreadyClaimed);
        }
        writes.push(SquareWrite {
            square_id: secondary_id,
            state: SquareState::Claimed,
            claimant: Some(claimant.to_owned()),
            user_id: Some(actor.user_id),
            parent: ParentLink::Set(target.square_id),
            guard: WriteGuard::Unclaimed,
            note: "user: initial claim (secondary)".into(),
        });
    }
    Ok(writes)
}

fn unclaim_write(square_id: i32, user_id: Option<i64>, note: String) -> SquareWrite {
    SquareWrite {
        square_id,
        state: SquareState::Unclaimed,
        claimant: None,
        user_id,
        parent: ParentLink::Clear,
        guard: WriteGuard::Any,
        note,
    }
}

fn plan_user_unclaim(board: &SquareBoard, target: &SquareEntity, actor: Actor) -> Vec<SquareWrite> {
    board
        .linkage(target.square_id)
        .into_iter()
        .filter_map(|(square_id, _)| board.get(square_id))
        .map(|square| {
            let previous = square.claimant.as_deref().unwrap_or_default();
            unclaim_write(
                square.square_id,
                Some(actor.user_id),
                format!("user: `{previous}` unclaimed"),
            )
        })
        .collect()
}

fn plan_admin_state(
    board: &SquareBoard,
    target: &SquareEntity,
    request: &SquareRequest,
) -> Result<Vec<SquareWrite>, SquareCommandError> {
    let note = request.note.clone().filter(|note| !note.is_empty());

    match request.state {
        Some(SquareState::Unclaimed) => Ok(board
            .linkage(target.square_id)
            .into_iter()
            .map(|(square_id, link)| {
                let note = match link {
                    None => note.clone().unwrap_or_else(|| "admin: unclaimed".into()),
                    Some(Link {
                        via,
                        is_child: true,
                    }) => format!("admin: unclaimed (secondary of square {via})"),
                    Some(Link {
                        via,
                        is_child: false,
                    }) => format!("admin: unclaimed (primary of square {via})"),
                };
                unclaim_write(square_id, None, note)
            })
            .collect()),
        Some(state) => {
            if target.is_secondary() {
                return Err(SquareCommandError::SecondaryNotEditable);
            }
            if target.state == SquareState::Unclaimed {
                return Err(SquareCommandError::StateOfUnclaimed);
            }
            Ok(vec![SquareWrite {
                square_id: target.square_id,
                state,
                claimant: target.claimant.clone(),
                user_id: None,
                parent: ParentLink::Keep,
                guard: WriteGuard::Claimed,
                note: note.unwrap_or_else(|| format!("admin: set state to {state}")),
            }])
        }
        None => {
            if target.is_secondary() {
                return Err(SquareCommandError::SecondaryNotEditable);
            }
            Ok(vec![SquareWrite {
                square_id: target.square_id,
                state: target.state,
                claimant: target.claimant.clone(),
                user_id: None,
                parent: ParentLink::Keep,
                guard: WriteGuard::Any,
                note: note.unwrap_or_default(),
            }])
        }
    }
}

/// Action applied to every id of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkAction {
    Claim { claimant: String },
    Unclaim,
    SetState { state: SquareState, note: Option<String> },
}

/// Per-square failure reported in a bulk response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BulkItemError {
    #[error("invalid square ID")]
    InvalidSquareId,
    #[error("square not found")]
    NotFound,
    #[error("cannot directly edit a secondary square; edit the primary square instead")]
    SecondaryNotEditable,
    #[error("already claimed")]
    AlreadyClaimed,
    #[error("square must be claimed first")]
    MustBeClaimed,
    #[error("internal error")]
    Internal,
}

/// Plan one element of a bulk request.
pub fn plan_bulk_item(
    board: &SquareBoard,
    grid_type: GridType,
    square_id: i32,
    action: &BulkAction,
    actor: Actor,
) -> Result<Vec<SquareWrite>, BulkItemError> {
    if square_id < 1 || square_id > grid_type.square_count() {
        return Err(BulkItemError::InvalidSquareId);
    }
    let square = board.get(square_id).ok_or(BulkItemError::NotFound)?;
    if grid_type.supports_secondary() && square.is_secondary() {
        return Err(BulkItemError::SecondaryNotEditable);
    }

    match action {
        BulkAction::Claim { claimant } => {
            if square.state != SquareState::Unclaimed {
                return Err(BulkItemError::AlreadyClaimed);
            }
            Ok(vec![SquareWrite {
                square_id,
                state: SquareState::Claimed,
                claimant: Some(claimant.clone()),
                user_id: Some(actor.user_id),
                parent: ParentLink::Clear,
                guard: WriteGuard::Unclaimed,
                note: "admin: bulk claim".into(),
            }])
        }
        BulkAction::Unclaim => {
            let mut writes = vec![unclaim_write(square_id, None, "admin: bulk unclaim".into())];
            if grid_type.supports_secondary() {
                writes.extend(square.child_square_ids.iter().map(|child| {
                    unclaim_write(
                        *child,
                        None,
                        format!("admin: bulk unclaim (secondary of square {square_id})"),
                    )
                }));
            }
            Ok(writes)
        }
        BulkAction::SetState { state, note } => {
            if square.state == SquareState::Unclaimed {
                return Err(BulkItemError::MustBeClaimed);
            }
            Ok(vec![SquareWrite {
                square_id,
                state: *state,
                claimant: square.claimant.clone(),
                user_id: None,
                parent: ParentLink::Keep,
                guard: WriteGuard::Claimed,
                note: note
                    .clone()
                    .filter(|note| !note.is_empty())
                    .unwrap_or_else(|| format!("admin: bulk set state to {state}")),
            }])
        }
    }
}
