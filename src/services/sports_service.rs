use crate::{
    dao::{
        models::{SportsEventStatus, SportsLeague},
        store::SportsEventQuery,
    },
    dto::sports::{SportsEventResponse, SportsEventsQuery, SportsEventsResponse, SportsLeagueInfo},
    error::ServiceError,
    state::SharedState,
};

const DEFAULT_EVENTS_LIMIT: i64 = 50;
const MAX_EVENTS_LIMIT: i64 = 500;
const MIN_SEARCH_LENGTH: usize = 2;

/// Every supported league in display order.
pub fn leagues() -> Vec<SportsLeagueInfo> {
    SportsLeague::ALL
        .into_iter()
        .map(|key| SportsLeagueInfo {
            key,
            label: key.label().to_owned(),
        })
        .collect()
}

/// Status filter accepted by the event listing. Only the linkable pair may be combined.
fn parse_statuses(raw: &str) -> Result<Vec<SportsEventStatus>, ServiceError> {
    match raw.trim() {
        "" => Ok(Vec::new()),
        "scheduled,in_progress" | "in_progress,scheduled" => Ok(vec![
            SportsEventStatus::Scheduled,
            SportsEventStatus::InProgress,
        ]),
        combined if combined.contains(',') => Err(ServiceError::InvalidInput(
            "unsupported status combination".into(),
        )),
        single => single
            .parse()
            .map(|status| vec![status])
            .map_err(|_| ServiceError::InvalidInput("invalid status".into())),
    }
}

/// Events of one league ordered by start time.
pub async fn events(
    state: &SharedState,
    query: SportsEventsQuery,
) -> Result<SportsEventsResponse, ServiceError> {
    let league: SportsLeague = match query.league.as_deref().map(str::trim) {
        None | Some("") => {
            return Err(ServiceError::InvalidInput(
                "missing required field: league".into(),
            ));
        }
        Some(raw) => raw
            .parse()
            .map_err(|_| ServiceError::InvalidInput("invalid league".into()))?,
    };
    let statuses = parse_statuses(query.status.as_deref().unwrap_or_default())?;
    let search = query
        .search
        .map(|search| search.trim().to_owned())
        .filter(|search| search.chars().count() >= MIN_SEARCH_LENGTH);
    let limit = match query.limit {
        Some(limit) if limit > 0 => limit.min(MAX_EVENTS_LIMIT),
        _ => DEFAULT_EVENTS_LIMIT,
    };

    let page = state
        .store()
        .sports_events(SportsEventQuery {
            league,
            statuses,
            search,
            offset: query.offset.max(0),
            limit,
        })
        .await?;
    Ok(SportsEventsResponse {
        events: page.items.into_iter().map(SportsEventResponse::from).collect(),
        total: page.total,
    })
}

/// One cached event by id.
pub async fn event(state: &SharedState, id: i64) -> Result<SportsEventResponse, ServiceError> {
    state
        .store()
        .sports_event(id)
        .await?
        .map(SportsEventResponse::from)
        .ok_or_else(|| ServiceError::NotFound("sports event not found".into()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{dao::memory::MemoryStore, state::test_support};

    fn query(league: Option<&str>, status: Option<&str>) -> SportsEventsQuery {
        SportsEventsQuery {
            league: league.map(str::to_owned),
            status: status.map(str::to_owned),
            ..Default::default()
        }
    }

    fn seeded() -> SharedState {
        let store = Arc::new(MemoryStore::new());
        store.upsert_sports_event(test_support::sports_event(
            1,
            SportsLeague::Nfl,
            SportsEventStatus::Scheduled,
        ));
        store.upsert_sports_event(test_support::sports_event(
            2,
            SportsLeague::Nfl,
            SportsEventStatus::InProgress,
        ));
        store.upsert_sports_event(test_support::sports_event(
            3,
            SportsLeague::Nfl,
            SportsEventStatus::Final,
        ));
        let mut named = test_support::sports_event(4, SportsLeague::Nba, SportsEventStatus::Final);
        named.name = Some("Finals Game 7".into());
        store.upsert_sports_event(named);
        test_support::state(store)
    }

    #[test]
    fn leagues_list_every_key_with_its_label() {
        let leagues = leagues();
        assert_eq!(leagues.len(), 5);
        assert_eq!(leagues[0].key, SportsLeague::Nfl);
        assert_eq!(leagues[0].label, "NFL");
    }

    #[tokio::test]
    async fn league_is_required_and_checked() {
        let state = seeded();
        let err = events(&state, query(None, None)).await.unwrap_err();
        assert_eq!(err.to_string(), "missing required field: league");
        let err = events(&state, query(Some("mlb"), None)).await.unwrap_err();
        assert_eq!(err.to_string(), "invalid league");
    }

    #[tokio::test]
    async fn status_filters_follow_the_linkable_pair() {
        let state = seeded();
        let all = events(&state, query(Some("nfl"), None)).await.unwrap();
        assert_eq!(all.total, 3);

        let linkable = events(&state, query(Some("nfl"), Some("in_progress,scheduled")))
            .await
            .unwrap();
        let ids: Vec<i64> = linkable.events.iter().map(|event| event.id).collect();
        assert_eq!(linkable.total, 2);
        assert!(ids.contains(&1) && ids.contains(&2));

        let finals = events(&state, query(Some("nfl"), Some("final"))).await.unwrap();
        assert_eq!(finals.events[0].id, 3);

        let err = events(&state, query(Some("nfl"), Some("final,scheduled")))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "unsupported status combination");
    }

    #[tokio::test]
    async fn short_searches_are_ignored() {
        let state = seeded();
        let mut search = query(Some("nba"), None);
        search.search = Some("game 7".into());
        let found = events(&state, search).await.unwrap();
        assert_eq!(found.total, 1);

        let mut search = query(Some("nfl"), None);
        search.search = Some("z".into());
        let found = events(&state, search).await.unwrap();
        assert_eq!(found.total, 3);
    }

    #[tokio::test]
    async fn single_event_lookup() {
        let state = seeded();
        assert_eq!(event(&state, 4).await.unwrap().name.as_deref(), Some("Finals Game 7"));
        assert!(matches!(event(&state, 99).await, Err(ServiceError::NotFound(_))));
    }
}
