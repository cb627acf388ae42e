use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use zbus::names::BusName;

use cask_core::config::{self, Config};
use cask_secret_service::session_iface::SecretSession;
use cask_secret_service::{register_objects, ServiceState, Store};

/// The well-known name clients discover the daemon under.
const BUS_NAME: &str = "org.freedesktop.secrets";

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = load_config(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_filter)),
        )
        .init();
    if config_path.exists() {
        tracing::info!("loaded config from {}", config_path.display());
    } else {
        tracing::info!(
            "no config file at {}, using defaults",
            config_path.display()
        );
    }

    let db_path = config.database_path()?;
    let store = Store::open(&db_path)?;
    tracing::info!("database open at {}", db_path.display());

    let conn = zbus::Connection::session().await?;
    let state = register_objects(&conn, store).await?;

    // Claim the well-known bus name so clients can discover us.
    conn.request_name(BUS_NAME).await?;
    tracing::info!("caskd ready on session bus as {BUS_NAME}");

    // Sessions die with their peer: watch for unique names dropping off the
    // bus and collect whatever they left behind.
    let watcher_conn = conn.clone();
    let watcher_state = Arc::clone(&state);
    tokio::spawn(async move {
        if let Err(e) = watch_peers(watcher_conn, watcher_state).await {
            tracing::warn!("peer watcher stopped: {e}");
        }
    });

    shutdown_signal().await;
    tracing::info!("received shutdown signal, exiting");
    Ok(())
}

/// Drive session teardown from the bus's `NameOwnerChanged` signal.
///
/// When a unique name loses its owner the peer is gone; its sessions are
/// dropped from the registry and their objects unexported, so any in-flight
/// call referencing them fails NoSession.
async fn watch_peers(conn: zbus::Connection, state: Arc<ServiceState>) -> Result<()> {
    let dbus = zbus::fdo::DBusProxy::new(&conn).await?;
    let mut stream = dbus.receive_name_owner_changed().await?;
    let server = conn.object_server();

    while let Some(signal) = stream.next().await {
        let args = match signal.args() {
            Ok(args) => args,
            Err(e) => {
                tracing::debug!("malformed NameOwnerChanged: {e}");
                continue;
            }
        };
        if args.new_owner().is_some() {
            continue;
        }
        let BusName::Unique(peer) = args.name() else {
            continue;
        };

        let dropped = match state.gc_client(peer.as_str()) {
            Ok(dropped) => dropped,
            Err(e) => {
                tracing::warn!(peer = %peer, "session gc failed: {e}");
                continue;
            }
        };
        for path in dropped {
            if let Ok(object) = zbus::zvariant::ObjectPath::try_from(path.as_str()) {
                let _ = server.remove::<SecretSession, _>(object).await;
            }
            tracing::debug!(peer = %peer, session = %path, "session collected");
        }
    }
    Ok(())
}

/// Wait for ctrl-c (SIGINT) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}, falling back to SIGINT only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

/// Parse `--config <path>` from CLI args, falling back to the XDG default.
fn parse_config_path() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" || args[i] == "-c" {
            if let Some(path) = args.get(i + 1) {
                return PathBuf::from(path);
            }
            eprintln!("error: --config requires a path argument");
            std::process::exit(1);
        }
        if let Some(path) = args[i].strip_prefix("--config=") {
            return PathBuf::from(path);
        }
        if args[i] == "--help" || args[i] == "-h" {
            eprintln!("Usage: caskd [--config <path>]");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  -c, --config <path>  Path to config file (default: $XDG_CONFIG_HOME/cask/config.toml)");
            eprintln!("  -h, --help           Show this help message");
            std::process::exit(0);
        }
        i += 1;
    }
    config::default_config_path()
}

fn load_config(path: &PathBuf) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path)?;
    Ok(Config::from_toml(&text)?)
}
