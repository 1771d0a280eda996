use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use holdem_server::auth::StaticTokenAuthenticator;
use holdem_server::bridge::{ws, SessionBridge};
use holdem_server::config::Config;
use holdem_server::ledger::ChipLedger;
use holdem_server::manager::TableManager;
use holdem_server::matchmaking::Matchmaking;
use holdem_server::recovery::{Recovery, RECONNECT_GRACE};
use holdem_server::store::pg::PgStore;
use holdem_server::store::Store;
use holdem_server::tournament::TournamentController;

/// Background loops tick at most this often.
const TICK_INTERVAL: Duration = Duration::from_secs(1);
const TRACKER_GC_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    let pg = PgStore::connect(&config.database_url())
        .await
        .context("connecting to the database")?;
    pg.migrate().await.context("running migrations")?;
    let store: Arc<dyn Store> = Arc::new(pg);

    let ledger = Arc::new(ChipLedger::new(store.clone()));
    let (manager, events_rx) = TableManager::new(store.clone(), ledger.clone());

    // The JWT-backed authenticator lives in the outer HTTP layer; local
    // runs use the static token table.
    let auth = Arc::new(StaticTokenAuthenticator::new());
    let bridge = SessionBridge::new(manager.clone(), auth);
    manager.set_notifier(bridge.clone());

    let controller = TournamentController::new(store.clone(), ledger.clone(), manager.clone());
    manager.set_tournament_hooks(controller.clone());

    let matchmaking = Arc::new(Matchmaking::new(
        store.clone(),
        ledger.clone(),
        manager.clone(),
        config.matchmaking_countdown_seconds,
    ));

    // Rehydrate active tables before accepting traffic; give clients a
    // moment to reconnect before hands deal again.
    let recovery = Recovery::new(store.clone(), manager.clone());
    let stats = recovery.recover().await.context("recovering tables")?;
    info!(?stats, "recovery finished");
    recovery.schedule_restart(RECONNECT_GRACE);

    // Engine event funnel and periodic control loops.
    tokio::spawn(manager.clone().run_events(events_rx));
    bridge.spawn_tracker_gc(TRACKER_GC_INTERVAL);
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                ticker.tick().await;
                controller.starter_tick().await;
            }
        });
    }
    {
        let controller = controller.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            loop {
                ticker.tick().await;
                controller.blind_tick().await;
            }
        });
    }

    // The HTTP surface (REST endpoints, auth, CORS) plugs in around this
    // router; matchmaking and tournament administration ride along as
    // extensions for it.
    let app = ws::router(bridge.clone())
        .layer(axum::Extension(matchmaking))
        .layer(axum::Extension(controller));

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, env = %config.env, "listening");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
