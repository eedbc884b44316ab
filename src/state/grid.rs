//! Grid rules: number draws, event linkage and save merging.

use rand::{Rng, seq::SliceRandom};
use thiserror::Error;
use time::OffsetDateTime;

use crate::dao::models::{
    GridColors, GridEntity, PoolEntity, SportsEventEntity, SportsEventStatus,
};

/// Hard cap on active grids in one pool.
pub const MAX_GRIDS_PER_POOL: usize = 50;

/// Grid rule violations, mapped to client errors by the services.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridRuleError {
    #[error("numbers have already been drawn")]
    AlreadyDrawn,
    #[error("numbers supplied are invalid")]
    InvalidNumbers,
    #[error("Cannot change linked event after the game has ended")]
    EventFinal,
    #[error("you cannot create more than {MAX_GRIDS_PER_POOL} grids per pool")]
    GridLimit,
}

/// Numbers chosen for both axes of a grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    pub home: Vec<i32>,
    pub away: Vec<i32>,
    pub manual: bool,
}

/// Uniformly random ordering of the digits 0 through 9.
pub fn random_digits<R: Rng + ?Sized>(rng: &mut R) -> Vec<i32> {
    let mut digits: Vec<i32> = (0..10).collect();
    digits.shuffle(rng);
    digits
}

/// Whether `numbers` holds each digit 0 through 9 exactly once.
pub fn is_digit_permutation(numbers: &[i32]) -> bool {
    let mut seen = [false; 10];
    numbers.len() == 10
        && numbers.iter().all(|n| match usize::try_from(*n) {
            Ok(index) if index < 10 && !seen[index] => {
                seen[index] = true;
                true
            }
            _ => false,
        })
}

/// Draw random numbers for a grid that has none yet.
pub fn draw_random<R: Rng + ?Sized>(grid: &GridEntity, rng: &mut R) -> Result<Draw, GridRuleError> {
    if grid.numbers_drawn() {
        return Err(GridRuleError::AlreadyDrawn);
    }
    Ok(Draw {
        home: random_digits(rng),
        away: random_digits(rng),
        manual: false,
    })
}

/// Accept operator-supplied numbers for a grid that has none yet.
pub fn draw_manual(
    grid: &GridEntity,
    home: Vec<i32>,
    away: Vec<i32>,
) -> Result<Draw, GridRuleError> {
    if grid.numbers_drawn() {
        return Err(GridRuleError::AlreadyDrawn);
    }
    if !is_digit_permutation(&home) || !is_digit_permutation(&away) {
        return Err(GridRuleError::InvalidNumbers);
    }
    Ok(Draw {
        home,
        away,
        manual: true,
    })
}

/// Whether a draw should also lock the pool. Defaults to locking; never re-locks.
pub fn should_lock_after_draw(pool: &PoolEntity, lock_pool: Option<bool>, now: OffsetDateTime) -> bool {
    !pool.is_locked_at(now) && lock_pool.unwrap_or(true)
}

/// A grid linked to a finished event keeps that link.
pub fn check_event_link(
    current: Option<&SportsEventEntity>,
    incoming: Option<i64>,
) -> Result<(), GridRuleError> {
    match current {
        Some(event) if event.status == SportsEventStatus::Final && incoming != Some(event.id) => {
            Err(GridRuleError::EventFinal)
        }
        _ => Ok(()),
    }
}

/// Validated fields of a grid save.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridChanges {
    pub label: Option<String>,
    pub home_team_name: Option<String>,
    pub away_team_name: Option<String>,
    pub event_date: Option<OffsetDateTime>,
    pub notes: Option<String>,
    pub rollover: bool,
    pub linked_event_id: Option<i64>,
    pub colors: GridColors,
}

impl GridChanges {
    /// Fill empty team names and colors from the linked event.
    pub fn fill_from_event(&mut self, event: &SportsEventEntity) {
        fill(&mut self.home_team_name, event.home_team_name.clone());
        fill(&mut self.away_team_name, event.away_team_name.clone());
        fill(&mut self.colors.home_team_color1, hex(&event.home_team_color));
        fill(&mut self.colors.home_team_color2, hex(&event.home_team_alt_color));
        fill(&mut self.colors.away_team_color1, hex(&event.away_team_color));
        fill(&mut self.colors.away_team_color2, hex(&event.away_team_alt_color));
    }

    /// Overwrite the editable fields of `grid`.
    pub fn apply(self, grid: &mut GridEntity) {
        grid.label = self.label;
        grid.home_team_name = self.home_team_name;
        grid.away_team_name = self.away_team_name;
        grid.event_date = self.event_date;
        grid.notes = self.notes;
        grid.rollover = self.rollover;
        grid.linked_event_id = self.linked_event_id;
        grid.colors = self.colors;
    }
}

fn fill(slot: &mut Option<String>, value: Option<String>) {
    if slot.as_deref().is_none_or(str::is_empty) {
        if let Some(value) = value.filter(|value| !value.is_empty()) {
            *slot = Some(value);
        }
    }
}

fn hex(color: &Option<String>) -> Option<String> {
    color.as_ref().map(|color| format!("#{color}"))
}
