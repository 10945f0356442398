//! Matchmaking Service (§4.7) — pre-queue server selection.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::debug;
use tokio::sync::Mutex;

use crate::channel::MatchmakingFailure;
use crate::config::Matchmaking as MatchmakingConfig;
use crate::gameserver::{GameServer, GameServerKey, GameServerRegistry};
use crate::player::{Player, PlayerState};
use crate::queueing::QueueingService;

/// `MatchSearchCriteria` (§3).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSearchCriteria {
    pub max_ping: Duration,
    pub min_players: usize,
    /// `-1` disables the score filter; no field in `ServerInfo` currently
    /// carries a per-server score, so this is accepted but not yet
    /// evaluated (see DESIGN.md).
    pub max_score: i32,
    /// `None` means unbounded (`maxPlayersOnServer < 0` in the source).
    pub max_players_on_server: Option<usize>,
    pub try_fresh_games_first: bool,
}

impl MatchSearchCriteria {
    fn is_satisfied_by(&self, info: &crate::probe::ServerInfo) -> bool {
        if info.ping > self.max_ping {
            return false;
        }
        if info.real_players() < self.min_players {
            return false;
        }
        if let Some(max) = self.max_players_on_server {
            if info.real_players() > max {
                return false;
            }
        }
        true
    }
}

struct Session {
    criteria: MatchSearchCriteria,
    preferred_servers: Vec<GameServerKey>,
    started_at: Instant,
}

/// Matches a player's preferences against candidate servers and hands the
/// winner to the Queueing Service.
pub struct MatchmakingService {
    servers: Arc<GameServerRegistry>,
    queueing: Arc<QueueingService>,
    sessions: DashMap<String, Mutex<Session>>,
    config: MatchmakingConfig,
}

impl MatchmakingService {
    pub fn new(servers: Arc<GameServerRegistry>, queueing: Arc<QueueingService>, config: MatchmakingConfig) -> Self {
        MatchmakingService {
            servers,
            queueing,
            sessions: DashMap::new(),
            config,
        }
    }

    /// `enterMatchmaking` (§4.7).
    pub fn enter_matchmaking(
        &self,
        player: &Arc<Player>,
        criteria: MatchSearchCriteria,
        preferred_servers: Vec<(IpAddr, u16)>,
    ) -> bool {
        if player.state() != PlayerState::Connected {
            return false;
        }

        player.set_state(PlayerState::Matchmaking);
        self.sessions.insert(
            player.stable_id.clone(),
            Mutex::new(Session {
                criteria,
                preferred_servers: preferred_servers
                    .into_iter()
                    .map(|(ip, port)| GameServerKey::new(ip, port))
                    .collect(),
                started_at: Instant::now(),
            }),
        );
        true
    }

    /// `updateSearchPreferences` (§4.7).
    pub async fn update_search_preferences(
        &self,
        player: &Arc<Player>,
        criteria: MatchSearchCriteria,
        preferred_servers: Vec<(IpAddr, u16)>,
    ) -> bool {
        if player.state() != PlayerState::Matchmaking {
            return false;
        }
        let Some(entry) = self.sessions.get(&player.stable_id) else {
            return false;
        };

        let mut session = entry.lock().await;
        session.criteria = criteria;
        session.preferred_servers = preferred_servers
            .into_iter()
            .map(|(ip, port)| GameServerKey::new(ip, port))
            .collect();
        true
    }

    /// `leaveMatchmaking` (§4.7).
    pub fn leave_matchmaking(&self, player: &Arc<Player>) {
        if player.state() != PlayerState::Matchmaking {
            return;
        }
        self.sessions.remove(&player.stable_id);
        player.set_state(PlayerState::Connected);
    }

    /// One periodic matchmaking tick, run by `spawn_tick_loop` every
    /// `config.tick_millis`.
    async fn tick(&self, players: &[Arc<Player>]) {
        for player in players {
            if player.state() != PlayerState::Matchmaking {
                continue;
            }
            let Some(session_entry) = self.sessions.get(&player.stable_id) else {
                continue;
            };

            let (criteria, preferred, elapsed) = {
                let session = session_entry.lock().await;
                (session.criteria, session.preferred_servers.clone(), session.started_at.elapsed())
            };
            drop(session_entry);

            if elapsed > Duration::from_secs(self.config.timeout_secs) {
                self.sessions.remove(&player.stable_id);
                player.set_state(PlayerState::Connected);
                player
                    .channel
                    .notify_matchmaking_failed(MatchmakingFailure::Timeout)
                    .await;
                continue;
            }

            match self.best_candidate(&preferred, &criteria).await {
                Some(server) => {
                    let instance_id = server.instance_id().to_string();
                    if self.queueing.join_queue(player, server.key, instance_id) {
                        self.sessions.remove(&player.stable_id);
                    }
                }
                None => {
                    debug!(target: "queue_core::matchmaking", "no candidate yet for {}", player.stable_id);
                }
            }
        }
    }

    /// Rank candidates by `(tryFreshGamesFirst ? lower realPlayers : higher
    /// realPlayers)` then by ping ascending, returning the winner.
    ///
    /// Only already-registered servers are considered: a preferred server
    /// a client pings by `(ip, port)` alone carries no `instanceId`, so
    /// matchmaking can't mint a registry entry for one it has never seen
    /// probed or reported by the web-front (see DESIGN.md).
    async fn best_candidate(
        &self,
        preferred: &[GameServerKey],
        criteria: &MatchSearchCriteria,
    ) -> Option<Arc<GameServer>> {
        let mut candidates = Vec::new();
        for key in preferred {
            let Some(server) = self.servers.get(key) else {
                continue;
            };
            if let Some(info) = server.last_known_info().await {
                if criteria.is_satisfied_by(&info) {
                    candidates.push((server, info));
                }
            }
        }

        candidates.sort_by(|(_, a), (_, b)| {
            let primary = if criteria.try_fresh_games_first {
                a.real_players().cmp(&b.real_players())
            } else {
                b.real_players().cmp(&a.real_players())
            };
            primary.then(a.ping.cmp(&b.ping))
        });

        candidates.into_iter().next().map(|(server, _)| server)
    }
}

/// Spawn the global periodic matchmaking tick task (§5: "the Matchmaking
/// Service has one global periodic task").
pub fn spawn_tick_loop(
    service: Arc<MatchmakingService>,
    players: Arc<crate::player::PlayerRegistry>,
) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_millis(service.config.tick_millis);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let snapshot: Vec<Arc<Player>> = players
                .stable_ids()
                .into_iter()
                .filter_map(|id| players.get(&id))
                .collect();
            service.tick(&snapshot).await;
        }
    })
}
