//! Player identity, state machine, and registry (§3, §4.4).

use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashMap;

use crate::channel::ClientChannel;
use crate::gameserver::GameServerKey;

/// Player state machine (§3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Connected,
    Matchmaking,
    Queued,
    Joining,
    Joined,
    Disconnected,
}

/// Reasons a player is removed from a queue (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DequeueReason {
    UserLeave,
    Disconnect,
    JoinFailed,
    JoinTimeout,
    MaxJoinAttemptsReached,
    Joined,
    Unknown,
}

/// Mutable player fields, owned by the per-GameServer loop once the player
/// is enqueued (§5). Guarded by a single mutex; never held across an
/// `.await`.
struct PlayerMut {
    state: PlayerState,
    server: Option<GameServerKey>,
    queued_at: Option<Instant>,
    join_attempts: VecDeque<Instant>,
}

/// A connected player (§3).
///
/// Identity is `stable_id`, which never changes for the lifetime of the
/// record. Equality and hashing are defined over identity only, which is
/// what lets `Arc<Player>` be used directly as the Concurrent Ordered
/// Queue's item type.
pub struct Player {
    pub stable_id: String,
    pub display_name: String,
    pub channel: Arc<dyn ClientChannel>,
    state: Mutex<PlayerMut>,
}

impl Player {
    pub fn new(stable_id: String, display_name: String, channel: Arc<dyn ClientChannel>) -> Self {
        Player {
            stable_id,
            display_name,
            channel,
            state: Mutex::new(PlayerMut {
                state: PlayerState::Connected,
                server: None,
                queued_at: None,
                join_attempts: VecDeque::new(),
            }),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state.lock().unwrap().state
    }

    pub fn set_state(&self, state: PlayerState) {
        self.state.lock().unwrap().state = state;
    }

    pub fn server(&self) -> Option<GameServerKey> {
        self.state.lock().unwrap().server.clone()
    }

    /// Enter the Queued state against `server`, resetting join attempts.
    pub fn enter_queue(&self, server: GameServerKey) {
        let mut guard = self.state.lock().unwrap();
        guard.state = PlayerState::Queued;
        guard.server = Some(server);
        guard.queued_at = Some(Instant::now());
        guard.join_attempts.clear();
    }

    /// Leave whatever server/queue this player was attached to, returning
    /// to `state` with no server back-reference.
    pub fn clear_server(&self, state: PlayerState) {
        let mut guard = self.state.lock().unwrap();
        guard.state = state;
        guard.server = None;
    }

    /// Record a new join attempt timestamp, returning the updated count.
    pub fn record_join_attempt(&self, at: Instant) -> usize {
        let mut guard = self.state.lock().unwrap();
        guard.join_attempts.push_back(at);
        guard.join_attempts.len()
    }

    /// Timestamp of the first recorded join attempt in the current cycle,
    /// if any (`joinAttempts[0]` in §4.6).
    pub fn first_join_attempt(&self) -> Option<Instant> {
        self.state.lock().unwrap().join_attempts.front().copied()
    }

    pub fn join_attempt_count(&self) -> usize {
        self.state.lock().unwrap().join_attempts.len()
    }

    /// Clear join attempts, used only when `clear_attempts_on_requeue` is
    /// enabled (§9 Open Questions).
    pub fn clear_join_attempts(&self) {
        self.state.lock().unwrap().join_attempts.clear();
    }

    pub fn queued_at(&self) -> Option<Instant> {
        self.state.lock().unwrap().queued_at
    }
}

impl PartialEq for Player {
    fn eq(&self, other: &Self) -> bool {
        self.stable_id == other.stable_id
    }
}

impl Eq for Player {}

impl Hash for Player {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.stable_id.hash(state);
    }
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("stable_id", &self.stable_id)
            .field("display_name", &self.display_name)
            .field("state", &self.state())
            .finish()
    }
}

/// Thread-safe `stableId -> Player` mapping (§4.4).
#[derive(Default)]
pub struct PlayerRegistry {
    players: DashMap<String, Arc<Player>>,
    /// Channel identity currently holding each stable id, used to reject a
    /// second concurrent session and to validate `try_remove`.
    owning_channel: DashMap<String, u64>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the existing record for `stable_id`, or create one owned by
    /// `channel_id`.
    ///
    /// Returns `None` if another channel already owns this identity — the
    /// new connection must be aborted, not the incumbent (§7).
    pub fn get_or_add(
        &self,
        stable_id: &str,
        channel_id: u64,
        display_name: String,
        channel: Arc<dyn ClientChannel>,
    ) -> Option<Arc<Player>> {
        if let Some(existing) = self.players.get(stable_id) {
            let owner = *self.owning_channel.get(stable_id).unwrap();
            if owner != channel_id {
                return None;
            }
            return Some(existing.clone());
        }

        let player = Arc::new(Player::new(
            stable_id.to_string(),
            display_name,
            channel,
        ));
        self.players.insert(stable_id.to_string(), player.clone());
        self.owning_channel.insert(stable_id.to_string(), channel_id);
        Some(player)
    }

    /// Remove the record for `stable_id`, but only if `channel_id` is the
    /// current owner.
    pub fn try_remove(&self, stable_id: &str, channel_id: u64) -> bool {
        match self.owning_channel.get(stable_id) {
            Some(owner) if *owner == channel_id => {
                drop(owner);
                self.owning_channel.remove(stable_id);
                self.players.remove(stable_id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, stable_id: &str) -> Option<Arc<Player>> {
        self.players.get(stable_id).map(|p| p.clone())
    }

    /// Snapshot of every registered identity, for callers (the matchmaking
    /// tick loop) that need to iterate the whole registry without holding
    /// a lock across `.await`.
    pub fn stable_ids(&self) -> Vec<String> {
        self.players.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
