//! End-to-end scenarios for the Queueing Service, driven against a small
//! in-process fake game server speaking the real `getinfo`/`infoResponse`
//! wire protocol, so the per-server processing loop (probe, dispatch,
//! timeout) runs unmodified. Timers run on tokio's paused virtual clock so
//! the tests complete instantly regardless of configured pacing intervals.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;

use queue_core::channel::{ChannelError, ClientChannel, MatchmakingFailure};
use queue_core::config::{Probe as ProbeConfig, Queue as QueueConfig, Webfront as WebfrontConfig};
use queue_core::gameserver::{GameServerKey, GameServerRegistry, ProcessingState};
use queue_core::player::{DequeueReason, Player, PlayerState};
use queue_core::queueing::QueueingService;
use queue_core::webfront::WebfrontClient;

const OOB_PREFIX: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF];

/// A fake server capacity, shared between the test and its probe responder
/// task so a scenario can flip "server full" to "server has room"
/// mid-test.
struct FakeCapacity {
    clients: AtomicUsize,
    max_clients: AtomicUsize,
}

/// Spawn a background task answering `getinfo` probes on loopback exactly
/// like a real game server would, with a live-editable player count.
async fn spawn_fake_server(max_clients: usize, clients: usize) -> (SocketAddr, Arc<FakeCapacity>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind fake server");
    let addr = socket.local_addr().expect("local addr");
    let capacity = Arc::new(FakeCapacity {
        clients: AtomicUsize::new(clients),
        max_clients: AtomicUsize::new(max_clients),
    });

    let task_capacity = capacity.clone();
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            let (n, peer) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => return,
            };
            let datagram = &buf[..n];
            if !datagram.starts_with(OOB_PREFIX) {
                continue;
            }
            let text = String::from_utf8_lossy(&datagram[OOB_PREFIX.len()..]);
            let Some(challenge) = text.strip_prefix("getinfo ").map(|s| s.trim_end()) else {
                continue;
            };

            let clients = task_capacity.clients.load(Ordering::SeqCst);
            let max_clients = task_capacity.max_clients.load(Ordering::SeqCst);
            let mut reply = Vec::from(OOB_PREFIX);
            reply.extend_from_slice(
                format!(
                    "infoResponse\n\\hostname\\Fake Server\\mapname\\m1\\gametype\\dm\\clients\\{clients}\\bots\\0\\sv_maxclients\\{max_clients}\\challenge\\{challenge}"
                )
                .as_bytes(),
            );
            let _ = socket.send_to(&reply, peer).await;
        }
    });

    (addr, capacity)
}

#[derive(Debug, Clone, PartialEq)]
enum RecordedEvent {
    NotifyJoin(SocketAddr),
    QueuePosition(usize, usize),
    Removed(DequeueReason),
    MatchFound(SocketAddr),
    MatchmakingFailed(MatchmakingFailure),
}

enum JoinBehavior {
    AcceptImmediately,
    RejectImmediately,
    Hang,
}

struct RecordingChannel {
    behavior: JoinBehavior,
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingChannel {
    fn new(behavior: JoinBehavior) -> Self {
        RecordingChannel {
            behavior,
            events: Mutex::new(Vec::new()),
        }
    }

    fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClientChannel for RecordingChannel {
    async fn notify_join(&self, ip: std::net::IpAddr, port: u16) -> Result<bool, ChannelError> {
        self.events.lock().unwrap().push(RecordedEvent::NotifyJoin(SocketAddr::new(ip, port)));
        match self.behavior {
            JoinBehavior::AcceptImmediately => Ok(true),
            JoinBehavior::RejectImmediately => Ok(false),
            JoinBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(true)
            }
        }
    }

    async fn notify_queue_position(&self, position: usize, length: usize) {
        self.events.lock().unwrap().push(RecordedEvent::QueuePosition(position, length));
    }

    async fn notify_removed(&self, reason: DequeueReason) {
        self.events.lock().unwrap().push(RecordedEvent::Removed(reason));
    }

    async fn notify_match_found(&self, ip: std::net::IpAddr, port: u16) {
        self.events.lock().unwrap().push(RecordedEvent::MatchFound(SocketAddr::new(ip, port)));
    }

    async fn notify_matchmaking_failed(&self, reason: MatchmakingFailure) {
        self.events.lock().unwrap().push(RecordedEvent::MatchmakingFailed(reason));
    }
}

fn fast_queue_config() -> QueueConfig {
    QueueConfig {
        max_queue_size: 20,
        max_join_attempts: 3,
        total_join_time_limit_secs: 9,
        pacing_millis: 50,
        idle_poll_millis: 20,
        clear_attempts_on_requeue: false,
    }
}

fn fast_probe_config() -> ProbeConfig {
    ProbeConfig {
        timeout_secs: 2,
        loop_timeout_secs: 2,
        max_concurrent: 32,
    }
}

fn make_service(registry: Arc<GameServerRegistry>) -> Arc<QueueingService> {
    let webfront = Arc::new(WebfrontClient::new(WebfrontConfig::default()));
    Arc::new(QueueingService::new(registry, webfront, fast_queue_config(), fast_probe_config()))
}

/// Poll `predicate` until it's true or the virtual clock has advanced past
/// a generous ceiling, auto-advancing time between polls.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition never became true");
}

#[tokio::test(start_paused = true)]
async fn happy_path_join_dispatch_and_ack() {
    let (addr, _capacity) = spawn_fake_server(2, 0).await;
    let key = GameServerKey::new(addr.ip(), addr.port());

    let registry = Arc::new(GameServerRegistry::new());
    let queueing = make_service(registry);

    let channel = Arc::new(RecordingChannel::new(JoinBehavior::AcceptImmediately));
    let player = Arc::new(Player::new("alice".into(), "Alice".into(), channel.clone()));

    assert!(queueing.join_queue(&player, key, "instance-a"));
    assert_eq!(player.state(), PlayerState::Queued);

    wait_until(|| player.state() == PlayerState::Joining).await;
    assert!(channel.events().contains(&RecordedEvent::NotifyJoin(addr)));

    queueing.on_join_ack(&player, true).await;
    assert_eq!(player.state(), PlayerState::Joined);
    assert!(player.server().is_none());
}

#[tokio::test(start_paused = true)]
async fn server_full_keeps_player_queued() {
    let (addr, _capacity) = spawn_fake_server(1, 1).await;
    let key = GameServerKey::new(addr.ip(), addr.port());

    let registry = Arc::new(GameServerRegistry::new());
    let queueing = make_service(registry);

    let channel = Arc::new(RecordingChannel::new(JoinBehavior::AcceptImmediately));
    let player = Arc::new(Player::new("bob".into(), "Bob".into(), channel.clone()));

    assert!(queueing.join_queue(&player, key, "instance-a"));

    // Let several processing loop ticks pass; a full server never offers
    // a dispatch budget, so the player should never be approached.
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(player.state(), PlayerState::Queued);
    assert!(channel.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn join_timeout_reverts_player_to_connected() {
    let (addr, _capacity) = spawn_fake_server(4, 0).await;
    let key = GameServerKey::new(addr.ip(), addr.port());

    let registry = Arc::new(GameServerRegistry::new());
    let queueing = make_service(registry);

    let channel = Arc::new(RecordingChannel::new(JoinBehavior::Hang));
    let player = Arc::new(Player::new("carol".into(), "Carol".into(), channel.clone()));

    assert!(queueing.join_queue(&player, key, "instance-a"));

    wait_until(|| player.state() == PlayerState::Connected).await;
    assert!(channel.events().contains(&RecordedEvent::Removed(DequeueReason::JoinTimeout)));
    assert!(player.server().is_none());
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_queued_is_terminal_and_silent() {
    let key = GameServerKey::new("203.0.113.9".parse().unwrap(), 28960);
    let registry = Arc::new(GameServerRegistry::new());
    let queueing = make_service(registry.clone());

    let channel = Arc::new(RecordingChannel::new(JoinBehavior::AcceptImmediately));
    let player = Arc::new(Player::new("dave".into(), "Dave".into(), channel.clone()));

    assert!(queueing.join_queue(&player, key, "instance-a"));
    queueing.on_disconnect(&player);

    assert_eq!(player.state(), PlayerState::Disconnected);
    let server = registry.get(&key).unwrap();
    assert!(!server.queue.contains(&player));
    // Disconnect is a silent removal: no DequeueReason notification fires.
    assert!(channel.events().iter().all(|e| !matches!(e, RecordedEvent::Removed(_))));
}

#[tokio::test(start_paused = true)]
async fn reject_immediately_dequeues_with_join_failed() {
    let (addr, _capacity) = spawn_fake_server(4, 3).await;
    let key = GameServerKey::new(addr.ip(), addr.port());

    let registry = Arc::new(GameServerRegistry::new());
    let queueing = make_service(registry);

    let channel = Arc::new(RecordingChannel::new(JoinBehavior::RejectImmediately));
    let player = Arc::new(Player::new("erin".into(), "Erin".into(), channel.clone()));

    assert!(queueing.join_queue(&player, key, "instance-a"));

    // One free slot: dispatch happens and the client synchronously rejects
    // it. With a free slot still available this is a regular join
    // failure, not a "server filled up" requeue (§4.6 onJoinFailed).
    wait_until(|| player.state() == PlayerState::Connected).await;
    assert!(channel.events().contains(&RecordedEvent::Removed(DequeueReason::JoinFailed)));
    assert_eq!(player.join_attempt_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_all_stops_a_running_processing_loop() {
    let (addr, _capacity) = spawn_fake_server(2, 0).await;
    let key = GameServerKey::new(addr.ip(), addr.port());

    let registry = Arc::new(GameServerRegistry::new());
    let queueing = make_service(registry.clone());

    let channel = Arc::new(RecordingChannel::new(JoinBehavior::Hang));
    let player = Arc::new(Player::new("frank".into(), "Frank".into(), channel.clone()));

    assert!(queueing.join_queue(&player, key, "instance-a"));
    let server = registry.get(&key).unwrap();
    wait_until(|| server.processing_state() == ProcessingState::Running).await;

    let cancelled = registry.cancel_all();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].processing_state(), ProcessingState::Stopping);

    wait_until(|| server.processing_state() == ProcessingState::Stopped).await;
}
