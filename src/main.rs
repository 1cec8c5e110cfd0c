mod api;
mod backoff;
mod bot;
mod config;
mod like;
mod onebot;
mod scheduler;
mod store;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::HostSurfaces;
use crate::backoff::Backoff;
use crate::bot::{BotRuntime, Router};
use crate::config::Config;
use crate::like::{DailySweep, LikeService, SystemClock};
use crate::onebot::{HttpApi, LinkSlot};
use crate::store::ConfigStore;

/// A session that lasted this long resets the reconnection backoff.
const STABILITY_THRESHOLD: Duration = Duration::from_secs(60);

/// Maximum consecutive failed connections before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 20;

fn print_help() {
    println!(
        "\
sendlike-bot v{}

QQ profile-like bot with daily subscriptions, for OneBot v11 hosts (NapCat...).

USAGE:
    sendlike-bot [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/bot.toml]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG        Log level filter for tracing
                    (e.g. debug, sendlike_bot=debug,warn)
    ONEBOT_TOKEN    Access token configured on the OneBot host
                    (referenced as access_token = \"${{ONEBOT_TOKEN}}\")

COMMANDS (in chat):
    #赞我            Like the sender
    #赞 @someone     Like every mentioned user
    #订阅点赞        Subscribe to the daily like
    #取消订阅点赞    Unsubscribe
    #订阅点赞列表    List subscribers
    #谁赞了bot       Who liked the bot (masters)
    #点赞配置        Show or change settings (masters)

EXAMPLES:
    sendlike-bot                          # uses config/bot.toml
    sendlike-bot /etc/sendlike/bot.toml   # custom config path
    RUST_LOG=debug sendlike-bot           # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("sendlike-bot v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sendlike_bot=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/bot.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;

    info!("OneBot WebSocket: {}", config.onebot.ws_url);
    match &config.onebot.http_url {
        Some(url) => info!("OneBot HTTP API: {url}"),
        None => info!("OneBot HTTP API: not configured"),
    }
    info!(
        "Daily sweep at {} (pacing {}ms), {} attempts x {} likes",
        config.schedule.daily_at,
        config.schedule.pacing_ms,
        config.like.attempts,
        config.like.batch_size
    );

    // Components that persist across reconnections
    let watch = Some(Duration::from_secs(config.store.watch_interval_secs.max(1)));
    let store = ConfigStore::open(config.store.path.clone(), watch).await;
    info!("Plugin document: {}", store.path().display());

    let http = config
        .onebot
        .http_url
        .as_deref()
        .map(|url| {
            HttpApi::new(
                url,
                config.onebot.access_token.clone(),
                Duration::from_secs(config.onebot.request_timeout_secs),
            )
        })
        .transpose()?;
    let slot = LinkSlot::new();
    let surfaces = HostSurfaces::new(slot.clone(), http);

    let likes = LikeService::new(store.clone(), &config.like);
    let router = Router::new(&config, store.clone(), likes.clone())?;
    let runtime = BotRuntime::new(router, surfaces.clone());

    let sweep = Arc::new(DailySweep::new(
        store.clone(),
        likes,
        Arc::new(SystemClock),
        Duration::from_millis(config.schedule.pacing_ms),
    ));
    tokio::spawn(scheduler::run_daily(
        sweep,
        surfaces,
        config.schedule.fire_time()?,
        config.schedule.catch_up_on_start,
    ));

    let mut backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(60), STABILITY_THRESHOLD);

    // ── Reconnection loop ──────────────────────────────────────────
    loop {
        info!("Connecting to OneBot host (attempt {})...", backoff.failures() + 1);

        match onebot::connect(&config.onebot).await {
            Ok((events, link)) => {
                let connected_at = Instant::now();
                slot.set(link.clone());

                let reason = tokio::select! {
                    reason = runtime.run(events, link) => reason,
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received, exiting");
                        return Ok(());
                    }
                };
                slot.clear();

                if backoff.session_ended(connected_at.elapsed()) {
                    info!("Connection was stable, backoff reset");
                } else {
                    warn!("Connection lasted only {}s", connected_at.elapsed().as_secs());
                }
                warn!("OneBot link lost ({reason}), preparing to reconnect...");
            }
            Err(e) => {
                // Permanent errors — exit immediately
                if !e.is_retriable() {
                    error!("Permanent connection error: {e}");
                    return Err(anyhow!("Cannot connect: {e}"));
                }

                warn!("Connection failed: {e}");

                if backoff.gave_up(MAX_RECONNECT_ATTEMPTS) {
                    error!("Exceeded {MAX_RECONNECT_ATTEMPTS} reconnection attempts, giving up");
                    return Err(anyhow!(
                        "Max reconnection attempts ({MAX_RECONNECT_ATTEMPTS}) exceeded"
                    ));
                }
            }
        }

        // Wait before retrying, but allow graceful shutdown during the wait
        let delay = backoff.next_delay();
        info!("Reconnecting in {}s...", delay.as_secs());

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received during backoff, exiting");
                return Ok(());
            }
        }
    }
}
