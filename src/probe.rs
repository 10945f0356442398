//! Game Server Probe (§4.2).
//!
//! Queries a game server's liveness and player count over the engine's
//! out-of-band UDP status protocol: an outbound `getinfo` datagram
//! prefixed with the four `0xFF` OOB marker bytes, and an `infoResponse`
//! reply encoding key/value pairs as a `\`-delimited string.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::time::timeout;

/// Four-byte out-of-band marker prefixing every probe datagram.
const OOB_PREFIX: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF];

/// Reply header after the OOB prefix.
const INFO_RESPONSE_HEADER: &str = "infoResponse";

/// Parsed reply to a `getinfo` probe (§3 `ServerInfo`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub hostname: String,
    pub map: String,
    pub game_type: String,
    /// Includes bots, per §3 (`currentPlayers (incl. bots)`).
    pub client_count: usize,
    pub bots: usize,
    pub max_clients: usize,
    pub is_private: bool,
    /// Round-trip time of the probe that produced this snapshot.
    pub ping: Duration,
    /// Every key/value pair from the reply, including ones not promoted
    /// to a dedicated field above (e.g. mod-specific fields).
    pub raw: HashMap<String, String>,
}

impl ServerInfo {
    fn from_pairs(raw: HashMap<String, String>, ping: Duration) -> Self {
        let get = |key: &str| raw.get(key).cloned().unwrap_or_default();
        let get_usize = |key: &str| raw.get(key).and_then(|v| v.parse().ok()).unwrap_or(0);

        ServerInfo {
            hostname: get("hostname"),
            map: get("mapname"),
            game_type: get("gametype"),
            client_count: get_usize("clients"),
            bots: get_usize("bots"),
            max_clients: get_usize("sv_maxclients"),
            is_private: get_usize("sv_privateClients") > 0,
            ping,
            raw,
        }
    }

    /// `realPlayers = currentPlayers - bots` (§3).
    pub fn real_players(&self) -> usize {
        self.client_count.saturating_sub(self.bots)
    }

    /// `freeSlots = max(0, maxClients - currentPlayers)` (§3).
    pub fn free_slots(&self) -> usize {
        self.max_clients.saturating_sub(self.client_count)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,
    #[error("probe i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("challenge mismatch")]
    ChallengeMismatch,
}

/// Generate a 16-hex-char challenge token (§6), echoed back in the reply to
/// guard against spoofed or stale responses.
fn generate_challenge() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..16)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

fn build_getinfo_packet(challenge: &str) -> Vec<u8> {
    let mut packet = Vec::with_capacity(OOB_PREFIX.len() + 8 + challenge.len() + 1);
    packet.extend_from_slice(OOB_PREFIX);
    packet.extend_from_slice(b"getinfo ");
    packet.extend_from_slice(challenge.as_bytes());
    packet.push(b'\n');
    packet
}

/// Parse an `infoResponse` datagram body (post-OOB-prefix) into key/value
/// pairs, validating the echoed challenge.
fn parse_info_response(
    body: &[u8],
    expected_challenge: &str,
    ping: Duration,
) -> Result<ServerInfo, ProbeError> {
    let text = String::from_utf8_lossy(body);
    let mut lines = text.splitn(2, '\n');

    let header = lines.next().unwrap_or("").trim();
    if header != INFO_RESPONSE_HEADER {
        return Err(ProbeError::Malformed(format!("unexpected header {header:?}")));
    }

    let payload = lines.next().unwrap_or("");
    let mut parts = payload.split('\\').filter(|s| !s.is_empty());

    let mut pairs = HashMap::new();
    while let (Some(key), Some(value)) = (parts.next(), parts.next()) {
        pairs.insert(key.to_string(), value.to_string());
    }

    match pairs.get("challenge") {
        Some(echoed) if echoed == expected_challenge => Ok(ServerInfo::from_pairs(pairs, ping)),
        Some(_) => Err(ProbeError::ChallengeMismatch),
        None => Err(ProbeError::Malformed("missing challenge field".into())),
    }
}

/// Query a single server for its current status, waiting at most
/// `request_timeout` for a valid reply.
pub async fn request_info(
    ip: IpAddr,
    port: u16,
    request_timeout: Duration,
) -> Result<ServerInfo, ProbeError> {
    let target = SocketAddr::new(ip, port);
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.connect(target).await?;

    let challenge = generate_challenge();
    let packet = build_getinfo_packet(&challenge);
    let sent_at = std::time::Instant::now();

    timeout(request_timeout, async {
        socket.send(&packet).await?;

        let mut buf = [0u8; 4096];
        loop {
            let n = socket.recv(&mut buf).await?;
            let datagram = &buf[..n];
            if !datagram.starts_with(OOB_PREFIX) {
                continue;
            }
            match parse_info_response(&datagram[OOB_PREFIX.len()..], &challenge, sent_at.elapsed()) {
                Ok(info) => return Ok(info),
                // A reply to some other, unrelated probe; keep waiting
                // within the same deadline.
                Err(ProbeError::ChallengeMismatch) => continue,
                Err(err) => return Err(err),
            }
        }
    })
    .await
    .map_err(|_| ProbeError::Timeout)?
}

/// Fan a `getinfo` probe out to every target concurrently, invoking
/// `on_reply` for each one as its result comes in. At most
/// `max_concurrent` requests are in flight at once.
pub async fn start_batch<F>(
    targets: Vec<(IpAddr, u16)>,
    request_timeout: Duration,
    max_concurrent: usize,
    on_reply: F,
) where
    F: Fn(IpAddr, u16, Result<ServerInfo, ProbeError>) + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let on_reply = Arc::new(on_reply);
    let mut handles = Vec::with_capacity(targets.len());

    for (ip, port) in targets {
        let semaphore = semaphore.clone();
        let on_reply = on_reply.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let result = request_info(ip, port, request_timeout).await;
            on_reply(ip, port, result);
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}
