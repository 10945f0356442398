//! Client Channel abstraction (§6).
//!
//! The queueing and matchmaking services never talk to a transport
//! directly; they push notifications through this trait. Production code
//! wires it to whatever session layer the embedder uses (RCON, a game
//! server plugin bridge, a websocket, ...). Tests use an in-memory
//! implementation that records what it was sent.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::player::DequeueReason;

/// Why a channel failed to deliver a notification.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Why matchmaking gave up on a player (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchmakingFailure {
    Timeout,
    NoSuitableServer,
    Cancelled,
}

/// The push side of a player's connection.
///
/// Every method here is a best-effort notification: implementations
/// should never panic, and should prefer returning `Err` over blocking
/// indefinitely. Callers that need a deadline (e.g. `notify_join`, whose
/// reply gates a state transition) wrap the call in `tokio::time::timeout`
/// themselves, so implementations should not impose their own.
#[async_trait]
pub trait ClientChannel: Send + Sync {
    /// Tell the player to connect to `ip:port`, and await confirmation
    /// that the client accepted the instruction.
    ///
    /// `Ok(true)` is synchronous delivery-success, `Ok(false)` is
    /// synchronous delivery-failure (both count as a completed attempt);
    /// `Err` is an unexpected exception, mapped to `DequeueReason::Unknown`
    /// by the caller. A caller-side timeout is a third, distinct outcome
    /// the trait itself has no variant for.
    async fn notify_join(&self, ip: IpAddr, port: u16) -> Result<bool, ChannelError>;

    /// Tell the player their position changed in a queue of `length`.
    async fn notify_queue_position(&self, position: usize, length: usize);

    /// Tell the player they were dequeued without joining.
    async fn notify_removed(&self, reason: DequeueReason);

    /// Tell the player a match was found and which server to join.
    async fn notify_match_found(&self, ip: IpAddr, port: u16);

    /// Tell the player matchmaking did not find them a server.
    async fn notify_matchmaking_failed(&self, reason: MatchmakingFailure);
}

/// A channel that drops every notification. Useful for tests that only
/// care about queue/registry mechanics, not delivery.
pub struct NullChannel;

#[async_trait]
impl ClientChannel for NullChannel {
    async fn notify_join(&self, _ip: IpAddr, _port: u16) -> Result<bool, ChannelError> {
        Ok(true)
    }

    async fn notify_queue_position(&self, _position: usize, _length: usize) {}

    async fn notify_removed(&self, _reason: DequeueReason) {}

    async fn notify_match_found(&self, _ip: IpAddr, _port: u16) {}

    async fn notify_matchmaking_failed(&self, _reason: MatchmakingFailure) {}
}
