use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::util::serde::to_socket_addrs;

/// Default config file name.
pub const CONFIG_FILE: &str = "queue-core.toml";

/// Hard cap on a single game server's queue, per §9 Open Questions
/// ("Queue hard cap (observed as 20) is not user-configurable in the
/// source; expose as configuration").
const DEFAULT_MAX_QUEUE_SIZE: usize = 20;

/// `MAX_JOIN_ATTEMPTS` from §4.6.
const DEFAULT_MAX_JOIN_ATTEMPTS: u32 = 3;

/// `TotalJoinTimeLimit` from §4.6, in seconds.
const DEFAULT_TOTAL_JOIN_TIME_LIMIT_SECS: u64 = 30;

/// Root configuration, loaded once at startup and shared read-only for the
/// lifetime of the process.
///
/// Mirrors the teacher's section-per-concern TOML layout: each nested
/// struct below is a `[section]` table.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub public: Public,

    #[serde(default)]
    pub probe: Probe,

    #[serde(default)]
    pub webfront: Webfront,

    #[serde(default)]
    pub queue: Queue,

    #[serde(default)]
    pub matchmaking: Matchmaking,
}

impl Config {
    /// Load configuration from the given TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let data = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&data)?;
        Ok(config)
    }

    /// Load configuration from the given path, or fall back to defaults if
    /// no file exists there yet.
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self, anyhow::Error> {
        match path {
            Some(path) if path.as_ref().is_file() => Self::load(path),
            _ => Ok(Config::default()),
        }
    }

    /// Serialize this configuration back to TOML, used by the
    /// `config generate` command to produce a starter file.
    pub fn to_toml_string(&self) -> Result<String, anyhow::Error> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Public-facing bind address for the introspection API (§4.8, §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Public {
    /// Address the introspection HTTP API listens on.
    #[serde(deserialize_with = "to_socket_addrs")]
    pub address: SocketAddr,
}

impl Default for Public {
    fn default() -> Self {
        Public {
            address: "127.0.0.1:7190".parse().unwrap(),
        }
    }
}

/// Game Server Probe configuration (§4.2).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Probe {
    /// Timeout for a single ad-hoc probe request, in seconds.
    pub timeout_secs: u64,

    /// Timeout used by the per-server processing loop's probe step (§4.6
    /// step 5), in seconds.
    pub loop_timeout_secs: u64,

    /// Maximum number of probes to fan out concurrently from `startBatch`.
    pub max_concurrent: usize,
}

impl Default for Probe {
    fn default() -> Self {
        Probe {
            timeout_secs: 2,
            loop_timeout_secs: 10,
            max_concurrent: 32,
        }
    }
}

/// Web-front Status Client configuration (§4.3).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Webfront {
    /// Whether the web-front cross-check is used by the per-server loop
    /// (`confirmJoinsWithWebfrontApi` in §4.6 step 3).
    pub enabled: bool,

    /// Base URL of the web-front status endpoint.
    pub base_url: String,

    /// Cache TTL in milliseconds (suggested 2s in §4.3).
    pub cache_ttl_millis: u64,

    /// Timeout for a single web-front HTTP request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for Webfront {
    fn default() -> Self {
        Webfront {
            enabled: false,
            base_url: "http://localhost:8080".into(),
            cache_ttl_millis: 2_000,
            request_timeout_secs: 10,
        }
    }
}

/// Queueing Service configuration (§4.6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Queue {
    /// Hard cap on a single game server's queue.
    pub max_queue_size: usize,

    /// `MAX_JOIN_ATTEMPTS`.
    pub max_join_attempts: u32,

    /// `TotalJoinTimeLimit`, in seconds.
    pub total_join_time_limit_secs: u64,

    /// Per-server loop pacing interval, in milliseconds (§4.6 step 2).
    pub pacing_millis: u64,

    /// Idle-queue poll interval, in milliseconds (§4.6 step 1).
    pub idle_poll_millis: u64,

    /// Whether `joinAttempts` is cleared when a player reverts from Joining
    /// back to Queued after a "server was full" late failure.
    ///
    /// Resolved Open Question (§9): default `false` ("do not clear").
    pub clear_attempts_on_requeue: bool,
}

impl Queue {
    /// Per-attempt join deadline: `TotalJoinTimeLimit / MAX_JOIN_ATTEMPTS`.
    pub fn per_attempt_timeout_secs(&self) -> u64 {
        if self.max_join_attempts == 0 {
            self.total_join_time_limit_secs
        } else {
            self.total_join_time_limit_secs / self.max_join_attempts as u64
        }
    }
}

impl Default for Queue {
    fn default() -> Self {
        Queue {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            max_join_attempts: DEFAULT_MAX_JOIN_ATTEMPTS,
            total_join_time_limit_secs: DEFAULT_TOTAL_JOIN_TIME_LIMIT_SECS,
            pacing_millis: 1_000,
            idle_poll_millis: 100,
            clear_attempts_on_requeue: false,
        }
    }
}

/// Matchmaking Service configuration (§4.7).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Matchmaking {
    /// Periodic matchmaking tick interval, in milliseconds.
    pub tick_millis: u64,

    /// Timeout after which a player stuck in Matchmaking is notified of
    /// failure and reverted to Connected, in seconds.
    pub timeout_secs: u64,
}

impl Default for Matchmaking {
    fn default() -> Self {
        Matchmaking {
            tick_millis: 500,
            timeout_secs: 60,
        }
    }
}

/// Resolve the config path from a CLI argument, falling back to the
/// current directory's default file name.
pub fn resolve_path(arg: Option<&str>) -> PathBuf {
    match arg {
        Some(path) => PathBuf::from(path),
        None => PathBuf::from(CONFIG_FILE),
    }
}
