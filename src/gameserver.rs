//! Game server identity, processing state, and registry (§3, §4.5).

use std::net::IpAddr;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, watch, RwLock};

use crate::player::Player;
use crate::probe::ServerInfo;
use crate::queue::ConcurrentOrderedQueue;

/// Address identity of a game server: the same tuple the probe dials and
/// the web-front reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GameServerKey {
    pub ip: IpAddr,
    pub port: u16,
}

impl GameServerKey {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        GameServerKey { ip, port }
    }
}

impl std::fmt::Display for GameServerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Lifecycle of a game server's per-server processing loop (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessingState {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl ProcessingState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ProcessingState::Idle,
            1 => ProcessingState::Running,
            2 => ProcessingState::Stopping,
            _ => ProcessingState::Stopped,
        }
    }
}

/// A registered game server: its queue, its processing loop's lifecycle,
/// and the last probe result seen for it.
///
/// Player state transitions against this server are owned exclusively by
/// its processing loop once a player is enqueued (§5); the atomics and
/// locks here exist so other tasks (the introspection API, the queueing
/// service's public entry points) can read/signal without contending with
/// that loop.
pub struct GameServer {
    pub key: GameServerKey,

    /// Opaque web-front lookup key, set once at creation from whichever
    /// caller registered this server first (§3, §4.5).
    instance_id: String,

    /// Wall-clock time this entry was created, surfaced by the
    /// introspection API (§4.8 `spawnDate`).
    spawned_at: DateTime<Utc>,

    /// `Idle | Running | Stopping | Stopped`, packed for lock-free reads.
    state: AtomicU8,

    /// Players waiting their turn, FIFO, de-duplicated by identity.
    pub queue: ConcurrentOrderedQueue<Arc<Player>>,

    /// Count of players currently in the Joining state against this
    /// server, used to respect the server's live slot count (§4.6 step 4).
    joining_count: AtomicUsize,

    /// Most recent probe or web-front result, if any.
    last_known_info: RwLock<Option<ServerInfo>>,

    /// Description of the most recent probe failure, if the last attempt
    /// did not produce a `ServerInfo` (surfaced by logging and the
    /// introspection API, per `QueueCoreError`'s doc comment).
    last_error: RwLock<Option<String>>,

    /// Broadcasts processing-state changes to anything awaiting a
    /// transition, mirroring the teacher's server status channel.
    state_tx: watch::Sender<ProcessingState>,
    state_rx: watch::Receiver<ProcessingState>,

    /// Feeds a dedicated per-server delivery task so `QueuePositionChanged`
    /// batches are sent to clients strictly in the order they were produced
    /// (§5), regardless of how the calling task is scheduled.
    position_tx: mpsc::UnboundedSender<Vec<(Arc<Player>, usize, usize)>>,
}

impl GameServer {
    pub fn new(key: GameServerKey, instance_id: String) -> Self {
        let (state_tx, state_rx) = watch::channel(ProcessingState::Idle);
        let (position_tx, mut position_rx) =
            mpsc::unbounded_channel::<Vec<(Arc<Player>, usize, usize)>>();

        tokio::spawn(async move {
            while let Some(batch) = position_rx.recv().await {
                for (player, position, length) in batch {
                    player.channel.notify_queue_position(position, length).await;
                }
            }
        });

        GameServer {
            key,
            instance_id,
            spawned_at: Utc::now(),
            state: AtomicU8::new(ProcessingState::Idle as u8),
            queue: ConcurrentOrderedQueue::new(),
            joining_count: AtomicUsize::new(0),
            last_known_info: RwLock::new(None),
            last_error: RwLock::new(None),
            state_tx,
            state_rx,
            position_tx,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }

    pub fn processing_state(&self) -> ProcessingState {
        ProcessingState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_processing_state(&self, state: ProcessingState) {
        self.state.store(state as u8, Ordering::SeqCst);
        let _ = self.state_tx.send(state);
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ProcessingState> {
        self.state_rx.clone()
    }

    /// Signal this server's processing loop to stop at its next check point
    /// (§5 "Cancellation", §3 `processingCancel`). A no-op if the loop is
    /// already stopping or stopped.
    pub fn cancel(&self) {
        if matches!(self.processing_state(), ProcessingState::Running | ProcessingState::Idle) {
            self.set_processing_state(ProcessingState::Stopping);
        }
    }

    /// Queue a batch of `QueuePositionChanged` notifications for delivery,
    /// preserving send order relative to any previously queued batch.
    pub fn queue_position_notifications(&self, batch: Vec<(Arc<Player>, usize, usize)>) {
        let _ = self.position_tx.send(batch);
    }

    pub fn joining_count(&self) -> usize {
        self.joining_count.load(Ordering::SeqCst)
    }

    pub fn increment_joining(&self) {
        self.joining_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement the joining count, saturating at zero so a duplicate
    /// decrement (e.g. racing timeout and late ack) can't underflow it.
    pub fn decrement_joining(&self) {
        let _ = self
            .joining_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub async fn last_known_info(&self) -> Option<ServerInfo> {
        self.last_known_info.read().await.clone()
    }

    pub async fn set_last_known_info(&self, info: ServerInfo) {
        *self.last_known_info.write().await = Some(info);
    }

    /// Reset to "unknown" after a failed probe (§7: "the loop resets
    /// `lastServerInfo` to null and retries after pacing").
    pub async fn clear_last_known_info(&self) {
        *self.last_known_info.write().await = None;
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_error.read().await.clone()
    }

    pub async fn set_last_error(&self, err: Option<String>) {
        *self.last_error.write().await = err;
    }

    /// Free slots implied by the last known info, or `0` if none has been
    /// observed yet (treated as "unknown capacity, admit nothing").
    pub async fn free_slots(&self) -> usize {
        match self.last_known_info().await {
            Some(info) => info.free_slots(),
            None => 0,
        }
    }
}

impl std::fmt::Debug for GameServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameServer")
            .field("key", &self.key)
            .field("instance_id", &self.instance_id)
            .field("state", &self.processing_state())
            .field("queue_len", &self.queue.len())
            .field("joining_count", &self.joining_count())
            .finish()
    }
}

/// Thread-safe `GameServerKey -> GameServer` mapping (§4.5).
#[derive(Default)]
pub struct GameServerRegistry {
    servers: DashMap<GameServerKey, Arc<GameServer>>,
}

impl GameServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the registered server for `key`, registering a fresh `Idle` one
    /// if this is the first time it's been seen. `instance_id` is only used
    /// on first registration; an existing entry's `instance_id` is never
    /// overwritten (§4.5 `getOrCreate` is atomic and idempotent).
    pub fn get_or_register(&self, key: GameServerKey, instance_id: impl Into<String>) -> Arc<GameServer> {
        let instance_id = instance_id.into();
        self.servers
            .entry(key)
            .or_insert_with(|| Arc::new(GameServer::new(key, instance_id)))
            .clone()
    }

    pub fn get(&self, key: &GameServerKey) -> Option<Arc<GameServer>> {
        self.servers.get(key).map(|s| s.clone())
    }

    pub fn snapshot(&self) -> Vec<Arc<GameServer>> {
        self.servers.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Signal every registered server's processing loop to stop (§5
    /// cancellation), returning the affected servers so a caller can await
    /// their `Stopped` transition via `subscribe_state`.
    pub fn cancel_all(&self) -> Vec<Arc<GameServer>> {
        let servers = self.snapshot();
        for server in &servers {
            server.cancel();
        }
        servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> GameServerKey {
        GameServerKey::new("203.0.113.10".parse().unwrap(), 28960)
    }

    #[tokio::test]
    async fn get_or_register_is_idempotent_and_keeps_first_instance_id() {
        let registry = GameServerRegistry::new();
        let a = registry.get_or_register(key(), "instance-a");
        let b = registry.get_or_register(key(), "instance-b");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.instance_id(), "instance-a");
    }

    #[tokio::test]
    async fn joining_count_never_underflows() {
        let server = GameServer::new(key(), "instance-a".into());
        server.decrement_joining();
        assert_eq!(server.joining_count(), 0);

        server.increment_joining();
        server.increment_joining();
        server.decrement_joining();
        assert_eq!(server.joining_count(), 1);
    }

    #[tokio::test]
    async fn processing_state_round_trips() {
        let server = GameServer::new(key(), "instance-a".into());
        assert_eq!(server.processing_state(), ProcessingState::Idle);
        server.set_processing_state(ProcessingState::Running);
        assert_eq!(server.processing_state(), ProcessingState::Running);
    }

    #[tokio::test]
    async fn cancel_moves_running_to_stopping_but_not_stopped_twice() {
        let server = GameServer::new(key(), "instance-a".into());
        server.set_processing_state(ProcessingState::Running);

        server.cancel();
        assert_eq!(server.processing_state(), ProcessingState::Stopping);

        server.set_processing_state(ProcessingState::Stopped);
        server.cancel();
        assert_eq!(server.processing_state(), ProcessingState::Stopped);
    }
}
