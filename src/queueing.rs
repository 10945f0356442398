//! Queueing Service (§4.6) — the core of the crate.
//!
//! Owns the per-server processing loop: probing, pacing, dispatch, timeout
//! enforcement, and dequeue accounting. Player state transitions against a
//! given server are only ever made from that server's own loop task, once
//! the player has been enqueued (§5).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio::time::sleep;

use crate::channel::ChannelError;
use crate::config::{Probe as ProbeConfig, Queue as QueueConfig};
use crate::gameserver::{GameServer, GameServerKey, GameServerRegistry, ProcessingState};
use crate::player::{DequeueReason, Player, PlayerState};
use crate::probe;
use crate::util::error::QueueCoreError;
use crate::webfront::WebfrontClient;

/// `MAX_JOIN_ATTEMPTS` is read from configuration (`config.queue.max_join_attempts`,
/// default 3 per §4.6) rather than hardcoded, per SPEC_FULL's configuration
/// expansion.
pub struct QueueingService {
    servers: Arc<GameServerRegistry>,
    webfront: Arc<WebfrontClient>,
    config: QueueConfig,
    probe_config: ProbeConfig,
}

impl QueueingService {
    pub fn new(
        servers: Arc<GameServerRegistry>,
        webfront: Arc<WebfrontClient>,
        config: QueueConfig,
        probe_config: ProbeConfig,
    ) -> Self {
        QueueingService {
            servers,
            webfront,
            config,
            probe_config,
        }
    }

    /// `joinQueue` (§4.6).
    ///
    /// `instance_id` is only used if this is the first time `key` is seen;
    /// an already-registered server keeps whichever instance id it was
    /// created with (§4.5 `getOrCreate`).
    ///
    /// Returns `false` without mutating anything if the player is already
    /// queued on this server or the queue is at its hard cap.
    pub fn join_queue(&self, player: &Arc<Player>, key: GameServerKey, instance_id: impl Into<String>) -> bool {
        match player.state() {
            PlayerState::Connected | PlayerState::Matchmaking => {}
            _ => return false,
        }

        let server = self.servers.get_or_register(key, instance_id);

        if server.queue.contains(player) {
            return false;
        }
        if server.queue.len() >= self.config.max_queue_size {
            warn!(target: "queue_core::queueing", "{}", QueueCoreError::CapacityExceeded);
            return false;
        }

        player.enter_queue(key);
        if !server.queue.enqueue(player.clone()) {
            // Lost a race with another joinQueue for the same player; undo.
            player.clear_server(PlayerState::Connected);
            return false;
        }

        self.notify_queue_positions(&server);
        self.ensure_processing_loop(server);
        true
    }

    /// `leaveQueue` (§4.6). No notification is sent to the leaver.
    pub fn leave_queue(&self, player: &Arc<Player>) {
        let Some(key) = player.server() else { return };
        let Some(server) = self.servers.get(&key) else { return };

        if !matches!(player.state(), PlayerState::Queued | PlayerState::Joining) {
            return;
        }
        if player.state() == PlayerState::Joining {
            server.decrement_joining();
        }

        server.queue.try_remove(player);
        player.clear_server(PlayerState::Connected);
        self.notify_queue_positions(&server);
    }

    /// Synchronous removal on client disconnect (§5: "Client disconnect
    /// synchronously cancels any outstanding join dispatch for that
    /// player"). Unlike `leave_queue`, the caller is already gone, so the
    /// `Disconnected` state is terminal, not `Connected`.
    pub fn on_disconnect(&self, player: &Arc<Player>) {
        let Some(key) = player.server() else {
            player.set_state(PlayerState::Disconnected);
            return;
        };
        let Some(server) = self.servers.get(&key) else {
            player.set_state(PlayerState::Disconnected);
            return;
        };

        if player.state() == PlayerState::Joining {
            server.decrement_joining();
        }
        server.queue.try_remove(player);
        player.clear_server(PlayerState::Disconnected);
        self.notify_queue_positions(&server);
    }

    /// `onJoinAck` (§4.6). Client's reply to a `NotifyJoin`.
    pub async fn on_join_ack(&self, player: &Arc<Player>, success: bool) {
        if player.state() != PlayerState::Joining {
            let err = QueueCoreError::InvalidState(format!(
                "JoinAck from {} while not Joining, ignoring",
                player.stable_id
            ));
            warn!(target: "queue_core::queueing", "{}", err);
            return;
        }
        let Some(key) = player.server() else { return };
        let Some(server) = self.servers.get(&key) else { return };

        if success {
            self.dequeue(&server, player, DequeueReason::Joined, false).await;
        } else {
            self.on_join_failed(&server, player).await;
        }
    }

    /// Late-failure policy (§4.6 `onJoinFailed`), triggered here by an
    /// explicit client `JoinAck(false)` arriving after the NotifyJoin was
    /// already accepted.
    async fn on_join_failed(&self, server: &Arc<GameServer>, player: &Arc<Player>) {
        server.decrement_joining();
        apply_late_failure(server, player, &self.config).await;
        self.notify_queue_positions(server);
    }

    /// Remove `player` from `server`'s queue with `reason`, notifying it
    /// unless `Joined`/`UserLeave` (silent per §4.6) and re-broadcasting
    /// positions to the remaining queue.
    async fn dequeue(&self, server: &Arc<GameServer>, player: &Arc<Player>, reason: DequeueReason, notify: bool) {
        server.queue.try_remove(player);
        let next_state = match reason {
            DequeueReason::Joined => PlayerState::Joined,
            _ => PlayerState::Connected,
        };
        player.clear_server(next_state);

        if notify || !matches!(reason, DequeueReason::Joined | DequeueReason::UserLeave) {
            player.channel.notify_removed(reason).await;
        }

        self.notify_queue_positions(server);
    }

    /// Push `QueuePositionChanged` to every queued player, 1-indexed.
    ///
    /// Handed off to the server's own delivery task rather than awaited or
    /// spawned here, so that notifications for a given player are observed
    /// in the order successive calls produced them (§5) even when this
    /// method itself is called from several tasks concurrently.
    fn notify_queue_positions(&self, server: &Arc<GameServer>) {
        let snapshot = server.queue.snapshot();
        let length = snapshot.len();
        let batch = snapshot
            .into_iter()
            .enumerate()
            .map(|(position, (_, player))| (player, position + 1, length))
            .collect();
        server.queue_position_notifications(batch);
    }

    /// Start the per-server processing loop if it isn't already running.
    fn ensure_processing_loop(&self, server: Arc<GameServer>) {
        if server.processing_state() == ProcessingState::Running {
            return;
        }
        server.set_processing_state(ProcessingState::Running);

        let webfront = self.webfront.clone();
        let config = self.config.clone();
        let probe_config = self.probe_config.clone();
        tokio::spawn(run_processing_loop(server, webfront, config, probe_config));
    }
}

/// The per-server processing loop body (§4.6 steps 1-7).
async fn run_processing_loop(
    server: Arc<GameServer>,
    webfront: Arc<WebfrontClient>,
    config: QueueConfig,
    probe_config: ProbeConfig,
) {
    let per_attempt_timeout = Duration::from_secs(config.per_attempt_timeout_secs());
    let total_join_time_limit = Duration::from_secs(config.total_join_time_limit_secs);
    let probe_timeout = Duration::from_secs(probe_config.loop_timeout_secs);

    loop {
        if server.processing_state() == ProcessingState::Stopping {
            server.set_processing_state(ProcessingState::Stopped);
            return;
        }

        // Step 1: idle queue.
        if server.queue.is_empty() && server.joining_count() == 0 {
            server.set_processing_state(ProcessingState::Idle);
            sleep(Duration::from_millis(config.idle_poll_millis)).await;
            if server.queue.is_empty() {
                continue;
            }
            server.set_processing_state(ProcessingState::Running);
        }

        let pacing = sleep(Duration::from_millis(config.pacing_millis));

        // Step 3: optional web-front cross-check.
        if webfront.enabled() && server.joining_count() > 0 {
            confirm_joins_with_webfront(&server, &webfront).await;
        }

        // Step 4: everyone queued is already mid-join.
        if server.joining_count() >= server.queue.len() {
            pacing.await;
            continue;
        }

        // Step 5: probe.
        match probe::request_info(server.key.ip, server.key.port, probe_timeout).await {
            Ok(info) => {
                server.set_last_known_info(info).await;
                server.set_last_error(None).await;
            }
            Err(err) => {
                let err = QueueCoreError::TransientNetwork(err.to_string());
                debug!(target: "queue_core::queueing", "probe of {} failed: {}", server.key, err);
                server.clear_last_known_info().await;
                server.set_last_error(Some(err.to_string())).await;
            }
        }

        // Step 6: dispatch within budget, and expire stale Joining entries.
        dispatch_round(&server, total_join_time_limit, per_attempt_timeout, &config).await;

        pacing.await;
    }
}

async fn confirm_joins_with_webfront(server: &Arc<GameServer>, webfront: &Arc<WebfrontClient>) {
    let status = webfront
        .status_for(server.instance_id(), server.key.ip, server.key.port)
        .await
        .ok();

    let snapshot = server.queue.snapshot();
    for (_, player) in snapshot {
        if player.state() != PlayerState::Joining {
            continue;
        }

        // No response for this instance: assume every Joining player made
        // it in, per §4.6 step 3's documented trade-off, rather than
        // stranding them in Joining forever.
        let confirmed = status.as_ref().map_or(true, |s| s.has_player(&player.display_name));
        if confirmed {
            server.queue.try_remove(&player);
            player.clear_server(PlayerState::Joined);
            server.decrement_joining();
        }
    }
}

async fn dispatch_round(
    server: &Arc<GameServer>,
    total_join_time_limit: Duration,
    per_attempt_timeout: Duration,
    config: &QueueConfig,
) {
    let free_slots = server.free_slots().await;
    let joining = server.joining_count();
    let mut budget = free_slots.saturating_sub(joining);

    for (_, player) in server.queue.snapshot() {
        match player.state() {
            PlayerState::Joining => {
                if let Some(first) = player.first_join_attempt() {
                    if first.elapsed() > total_join_time_limit {
                        server.decrement_joining();
                        server.queue.try_remove(&player);
                        player.clear_server(PlayerState::Connected);
                        player.channel.notify_removed(DequeueReason::JoinTimeout).await;
                    }
                }
            }
            PlayerState::Queued if budget > 0 => {
                budget -= 1;
                dispatch_join_attempt(server, &player, per_attempt_timeout, config).await;
            }
            _ => {}
        }
    }
}

/// Join attempt procedure for `(player, server)` (§4.6).
async fn dispatch_join_attempt(
    server: &Arc<GameServer>,
    player: &Arc<Player>,
    deadline: Duration,
    config: &QueueConfig,
) {
    player.record_join_attempt(Instant::now());

    let ip: IpAddr = server.key.ip;
    let port = server.key.port;
    let channel = player.channel.clone();

    let outcome = tokio::time::timeout(deadline, channel.notify_join(ip, port)).await;

    match outcome {
        Ok(Ok(true)) => {
            player.set_state(PlayerState::Joining);
            server.increment_joining();
        }
        Ok(Ok(false)) => {
            apply_late_failure(server, player, config).await;
        }
        Ok(Err(ChannelError::Closed)) => {
            let err = QueueCoreError::Internal(format!("channel closed for {}", player.stable_id));
            warn!(target: "queue_core::queueing", "{}", err);
            server.queue.try_remove(player);
            player.clear_server(PlayerState::Connected);
            player.channel.notify_removed(DequeueReason::Unknown).await;
        }
        Ok(Err(ChannelError::DeliveryFailed(msg))) => {
            let err = QueueCoreError::ClientProtocolViolation(msg);
            warn!(target: "queue_core::queueing", "{}", err);
            server.queue.try_remove(player);
            player.clear_server(PlayerState::Connected);
            player.channel.notify_removed(DequeueReason::Unknown).await;
        }
        Err(_timeout) => {
            server.queue.try_remove(player);
            player.clear_server(PlayerState::Connected);
            player.channel.notify_removed(DequeueReason::JoinTimeout).await;
        }
    }
}

/// `onJoinFailed` (§4.6), shared by the loop's synchronous delivery-failure
/// path and `onJoinAck(false)`.
async fn apply_late_failure(server: &Arc<GameServer>, player: &Arc<Player>, config: &QueueConfig) {
    if player.join_attempt_count() >= config.max_join_attempts as usize {
        server.queue.try_remove(player);
        player.clear_server(PlayerState::Connected);
        player
            .channel
            .notify_removed(DequeueReason::MaxJoinAttemptsReached)
            .await;
        return;
    }

    let free_slots = server.free_slots().await;
    if free_slots == 0 {
        if config.clear_attempts_on_requeue {
            player.clear_join_attempts();
        }
        player.set_state(PlayerState::Queued);
        return;
    }

    server.queue.try_remove(player);
    player.clear_server(PlayerState::Connected);
    player.channel.notify_removed(DequeueReason::JoinFailed).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::NullChannel;

    fn make_player(id: &str) -> Arc<Player> {
        Arc::new(Player::new(id.to_string(), id.to_string(), Arc::new(NullChannel)))
    }

    fn make_service() -> QueueingService {
        let servers = Arc::new(GameServerRegistry::new());
        let webfront = Arc::new(WebfrontClient::new(crate::config::Webfront::default()));
        QueueingService::new(servers, webfront, QueueConfig::default(), crate::config::Probe::default())
    }

    #[tokio::test]
    async fn join_queue_rejects_duplicate_enqueue() {
        let service = make_service();
        let key = GameServerKey::new("203.0.113.5".parse().unwrap(), 28960);
        let player = make_player("p1");

        assert!(service.join_queue(&player, key, "instance-a"));
        assert!(!service.join_queue(&player, key, "instance-a"));
    }

    #[tokio::test]
    async fn join_queue_respects_hard_cap() {
        let mut config = QueueConfig::default();
        config.max_queue_size = 1;
        let servers = Arc::new(GameServerRegistry::new());
        let webfront = Arc::new(WebfrontClient::new(crate::config::Webfront::default()));
        let service = QueueingService::new(servers, webfront, config, crate::config::Probe::default());

        let key = GameServerKey::new("203.0.113.5".parse().unwrap(), 28960);
        assert!(service.join_queue(&make_player("p1"), key, "instance-a"));
        assert!(!service.join_queue(&make_player("p2"), key, "instance-a"));
    }

    #[tokio::test]
    async fn leave_queue_is_silent_and_frees_position() {
        let service = make_service();
        let key = GameServerKey::new("203.0.113.5".parse().unwrap(), 28960);
        let a = make_player("a");
        let b = make_player("b");

        service.join_queue(&a, key, "instance-a");
        service.join_queue(&b, key, "instance-a");
        service.leave_queue(&a);

        let server = service.servers.get(&key).unwrap();
        assert!(!server.queue.contains(&a));
        assert!(server.queue.contains(&b));
        assert_eq!(a.state(), PlayerState::Connected);
    }
}
