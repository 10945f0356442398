use std::sync::Arc;

use anyhow::Context;
use log::info;

use std::time::Duration;

use crate::config::{self, Config};
use crate::gameserver::{GameServerRegistry, ProcessingState};
use crate::introspection;
use crate::matchmaking::{self, MatchmakingService};
use crate::player::PlayerRegistry;
use crate::queueing::QueueingService;
use crate::util::error::{quit_error, ErrorHintsBuilder};
use crate::webfront::WebfrontClient;

/// Start the queue core: build the registries and services, serve the
/// introspection API, and run until interrupted.
pub fn invoke(config_path: &str) -> Result<(), ()> {
    let config = match Config::load_or_default(Some(config_path)) {
        Ok(config) => config,
        Err(err) => {
            quit_error(
                err.context("failed to load config"),
                ErrorHintsBuilder::default().config(true).config_generate(true).build().unwrap(),
            );
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build async runtime");

    runtime.block_on(run(config));
    Ok(())
}

async fn run(config: Config) {
    let players = Arc::new(PlayerRegistry::new());
    let servers = Arc::new(GameServerRegistry::new());
    let webfront = Arc::new(WebfrontClient::new(config.webfront.clone()));
    let queueing = Arc::new(QueueingService::new(
        servers.clone(),
        webfront.clone(),
        config.queue.clone(),
        config.probe.clone(),
    ));
    let matchmaking = Arc::new(MatchmakingService::new(servers.clone(), queueing.clone(), config.matchmaking.clone()));

    let _matchmaking_tick = matchmaking::spawn_tick_loop(matchmaking.clone(), players.clone());

    let app = introspection::router(servers.clone());
    let listener = match tokio::net::TcpListener::bind(config.public.address).await {
        Ok(listener) => listener,
        Err(err) => {
            quit_error(
                anyhow::Error::new(err).context(format!(
                    "failed to bind introspection API on {}",
                    config.public.address
                )),
                ErrorHintsBuilder::default().config(true).build().unwrap(),
            );
        }
    };

    info!(target: "queue_core", "Introspection API listening on {}", config.public.address);

    let serve = axum::serve(listener, app);
    tokio::select! {
        result = serve => {
            if let Err(err) = result {
                log::error!(target: "queue_core", "introspection API stopped: {}", err);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!(target: "queue_core", "Shutting down");
            shutdown_processing_loops(&servers).await;
        }
    }
}

/// Cancel every server's processing loop and wait for each to settle at
/// `Stopped`, bounded so a stuck loop can't hang shutdown forever.
async fn shutdown_processing_loops(servers: &Arc<GameServerRegistry>) {
    let cancelled = servers.cancel_all();
    for server in cancelled {
        let mut state_rx = server.subscribe_state();
        let wait = async {
            while *state_rx.borrow() != ProcessingState::Stopped {
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
        };
        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            log::warn!(
                target: "queue_core",
                "{} did not reach Stopped before shutdown timeout",
                server.key
            );
        }
    }
}

/// Path used when the `config generate`/`config test` subcommands need it,
/// re-exported here so `main.rs` doesn't need to know about `config`'s
/// internal layout.
pub fn resolve_config_path(arg: &str) -> std::path::PathBuf {
    config::resolve_path(Some(arg))
}
