//! Introspection API (§4.8) — read-only `GET /queues[?state=...]` for
//! operators.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::gameserver::{GameServerRegistry, ProcessingState};
use crate::player::PlayerState;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
enum ProcessingStateFilter {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl ProcessingStateFilter {
    fn matches(self, state: ProcessingState) -> bool {
        matches!(
            (self, state),
            (ProcessingStateFilter::Idle, ProcessingState::Idle)
                | (ProcessingStateFilter::Running, ProcessingState::Running)
                | (ProcessingStateFilter::Stopping, ProcessingState::Stopping)
                | (ProcessingStateFilter::Stopped, ProcessingState::Stopped)
        )
    }
}

#[derive(Debug, Deserialize)]
struct ListQueuesParams {
    state: Option<ProcessingStateFilter>,
}

#[derive(Debug, Serialize)]
struct PlayerView {
    name: String,
    state: &'static str,
    join_attempts: usize,
    queue_time_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ServerInfoView {
    hostname: String,
    map: String,
    game_type: String,
    client_count: usize,
    max_clients: usize,
}

#[derive(Debug, Serialize)]
struct GameServerView {
    ip: String,
    port: u16,
    #[serde(rename = "instanceId")]
    instance_id: String,
    processing_state: &'static str,
    last_server_info: Option<ServerInfoView>,
    last_error: Option<String>,
    #[serde(rename = "spawnDate")]
    spawn_date: chrono::DateTime<chrono::Utc>,
    players: Vec<PlayerView>,
}

fn player_state_label(state: PlayerState) -> &'static str {
    match state {
        PlayerState::Connected => "Connected",
        PlayerState::Matchmaking => "Matchmaking",
        PlayerState::Queued => "Queued",
        PlayerState::Joining => "Joining",
        PlayerState::Joined => "Joined",
        PlayerState::Disconnected => "Disconnected",
    }
}

fn processing_state_label(state: ProcessingState) -> &'static str {
    match state {
        ProcessingState::Idle => "Idle",
        ProcessingState::Running => "Running",
        ProcessingState::Stopping => "Stopping",
        ProcessingState::Stopped => "Stopped",
    }
}

async fn list_queues(
    State(servers): State<Arc<GameServerRegistry>>,
    Query(params): Query<ListQueuesParams>,
) -> Json<Vec<GameServerView>> {
    let mut views = Vec::new();

    for server in servers.snapshot() {
        if let Some(filter) = params.state {
            if !filter.matches(server.processing_state()) {
                continue;
            }
        }

        let last_server_info = server.last_known_info().await.map(|info| ServerInfoView {
            hostname: info.hostname,
            map: info.map,
            game_type: info.game_type,
            client_count: info.client_count,
            max_clients: info.max_clients,
        });

        let players = server
            .queue
            .snapshot()
            .into_iter()
            .map(|(_, player)| PlayerView {
                name: player.display_name.clone(),
                state: player_state_label(player.state()),
                join_attempts: player.join_attempt_count(),
                queue_time_secs: player.queued_at().map(|at| at.elapsed().as_secs()),
            })
            .collect();

        views.push(GameServerView {
            ip: server.key.ip.to_string(),
            port: server.key.port,
            instance_id: server.instance_id().to_string(),
            processing_state: processing_state_label(server.processing_state()),
            last_server_info,
            last_error: server.last_error().await,
            spawn_date: server.spawned_at(),
            players,
        });
    }

    Json(views)
}

/// Build the introspection router, to be nested or served directly by the
/// caller's `axum::serve`.
pub fn router(servers: Arc<GameServerRegistry>) -> Router {
    Router::new()
        .route("/queues", get(list_queues))
        .with_state(servers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gameserver::GameServerKey;

    #[test]
    fn processing_state_filter_matches_exact_variant() {
        assert!(ProcessingStateFilter::Running.matches(ProcessingState::Running));
        assert!(!ProcessingStateFilter::Running.matches(ProcessingState::Idle));
    }

    #[tokio::test]
    async fn list_queues_reflects_registered_servers() {
        let servers = Arc::new(GameServerRegistry::new());
        servers.get_or_register(GameServerKey::new("203.0.113.1".parse().unwrap(), 28960), "instance-1");

        let Json(views) = list_queues(
            State(servers),
            Query(ListQueuesParams { state: None }),
        )
        .await;
        assert_eq!(views.len(), 1);
        assert_eq!(views[0].port, 28960);
    }
}
