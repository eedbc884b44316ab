use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};

use crate::dao::models::{SportsEventEntity, SportsEventStatus, SportsLeague};

/// Supported league with its display label.
#[derive(Debug, Serialize, ToSchema)]
pub struct SportsLeagueInfo {
    pub key: SportsLeague,
    pub label: String,
}

/// Filters for `GET /sports/events`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(default)]
#[into_params(parameter_in = Query)]
pub struct SportsEventsQuery {
    /// Required league key.
    pub league: Option<String>,
    /// One status, or `scheduled,in_progress` for linkable events. Empty for all.
    pub status: Option<String>,
    /// Team or event name fragment; ignored below two characters.
    pub search: Option<String>,
    pub offset: i64,
    /// Defaults to 50, capped at 500.
    pub limit: Option<i64>,
}

/// Cached sports event.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SportsEventResponse {
    pub id: i64,
    pub league: SportsLeague,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub event_date: OffsetDateTime,
    pub status: SportsEventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub home_score: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub away_score: Option<i32>,
    pub home_team_name: Option<String>,
    pub away_team_name: Option<String>,
    pub home_team_color: Option<String>,
    pub home_team_alt_color: Option<String>,
    pub away_team_color: Option<String>,
    pub away_team_alt_color: Option<String>,
}

impl From<SportsEventEntity> for SportsEventResponse {
    fn from(event: SportsEventEntity) -> Self {
        Self {
            id: event.id,
            league: event.league,
            name: event.name,
            event_date: event.event_date,
            status: event.status,
            home_score: event.home_score,
            away_score: event.away_score,
            home_team_name: event.home_team_name,
            away_team_name: event.away_team_name,
            home_team_color: event.home_team_color,
            home_team_alt_color: event.home_team_alt_color,
            away_team_color: event.away_team_color,
            away_team_alt_color: event.away_team_alt_color,
        }
    }
}

/// Page of events.
#[derive(Debug, Serialize, ToSchema)]
pub struct SportsEventsResponse {
    pub events: Vec<SportsEventResponse>,
    pub total: i64,
}
