mod cli;

use std::sync::Arc;
use std::time::Duration;

use tabhost_common::{encode_main_interface, TabhostError};
use tabhost_config::TabhostConfig;
use tabhost_ipc::{ChannelOptions, MessageChannel};
use tabhost_session::RestoreFlags;
use tabhost_supervisor::{CommandSpawner, ProcessSupervisor, Spawner, SupervisorEvent};
use tabhost_tabs::{headless_factory, InProcessSpawner, TabEvent, TabRouter};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use tabhost_app::BrowserWindow;

#[tokio::main]
async fn main() {
    let args = cli::parse();

    let config = tabhost_config::load_config(args.config.as_deref());

    // Logging comes up before the config error is reported.
    let configured_level = config
        .as_ref()
        .map(|c| c.logging.level.as_str())
        .unwrap_or("info");
    let fallback = format!("tabhost={configured_level}");
    let log_directive = args.log_level.as_deref().unwrap_or(&fallback);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| log_directive.into()),
        )
        .init();

    tracing::info!("tabhost v{} starting", env!("CARGO_PKG_VERSION"));

    let config = config.unwrap_or_else(|e| {
        tracing::warn!("Config load failed, using defaults: {e}");
        TabhostConfig::default()
    });

    if let Err(e) = run(args, config).await {
        tracing::error!("tabhost failed: {e}");
        std::process::exit(1);
    }
    tracing::info!("Shutdown complete");
}

async fn run(args: cli::Args, config: TabhostConfig) -> Result<(), TabhostError> {
    let engines = headless_factory();
    let spawner: Arc<dyn Spawner> = if args.in_process {
        tracing::info!("Tab engines run in-process");
        Arc::new(InProcessSpawner::new(engines.clone()))
    } else {
        let spawner = CommandSpawner::from_config(config.supervisor.plug_executable.as_deref())?;
        tracing::info!(executable = %spawner.executable().display(), "Using tab process executable");
        Arc::new(spawner)
    };

    let channel = MessageChannel::new(
        encode_main_interface(std::process::id()),
        ChannelOptions {
            query_timeout: Duration::from_millis(u64::from(config.channel.query_timeout_ms)),
            max_frame_bytes: config.channel.max_frame_bytes,
        },
    );
    let supervisor = ProcessSupervisor::with_timeouts(
        spawner,
        channel,
        Duration::from_millis(u64::from(config.supervisor.spawn_ready_timeout_ms)),
        Duration::from_millis(u64::from(config.supervisor.reap_grace_ms)),
    );
    let router = TabRouter::new(supervisor.clone());
    spawn_event_log(&supervisor, &router);

    let session_file = args.session.clone().or_else(|| config.session.resolved_file());
    let window = Arc::new(BrowserWindow::new(
        router,
        engines,
        config.closed_tabs.capacity as usize,
        session_file,
    ));

    if !args.no_restore && config.session.restore_on_start {
        let flags = RestoreFlags {
            share_process: !args.separate_processes,
        };
        match window.restore_session(flags).await {
            Ok(report) if !report.failed.is_empty() => {
                tracing::warn!(failed = ?report.failed, "Some tabs were restored without a process");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Session restore failed: {e}"),
        }
    }

    for uri in &args.uris {
        window.open_tab(Some(uri.as_str()), true).await?;
    }
    if window.tab_count().await == 0 {
        window.open_tab(None, true).await?;
    }
    tracing::info!(tabs = window.tab_count().await, "Window ready");

    let autosave = (config.session.autosave_interval_secs > 0).then(|| {
        let window = window.clone();
        let every = Duration::from_secs(u64::from(config.session.autosave_interval_secs));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match window.save_session().await {
                    Ok(saved) => tracing::debug!(saved, "Autosave tick"),
                    Err(e) => tracing::warn!("Autosave failed: {e}"),
                }
            }
        })
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupted, saving session");

    if let Some(task) = autosave {
        task.abort();
    }
    let saved = window.save_session().await;
    window.shutdown().await;
    let saved = saved?;
    tracing::info!(saved, "Session saved");
    Ok(())
}

/// Log process and tab lifecycle. A failed respawn is reported once per
/// episode, not once per affected tab.
fn spawn_event_log(supervisor: &ProcessSupervisor, router: &TabRouter) {
    let mut processes = supervisor.subscribe();
    tokio::spawn(async move {
        loop {
            match processes.recv().await {
                Ok(SupervisorEvent::RespawnFailed { process_id, reason }) => {
                    tracing::error!(process_id, "Tab process could not be restarted: {reason}");
                }
                Ok(SupervisorEvent::ProcessDied { process_id, sockets }) => {
                    tracing::warn!(process_id, tabs = sockets.len(), "Tab process died");
                }
                Ok(event) => tracing::debug!(?event, "Supervisor event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Supervisor event log lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut tabs = router.subscribe();
    tokio::spawn(async move {
        loop {
            match tabs.recv().await {
                Ok(TabEvent::Rebound {
                    socket_id,
                    process_id,
                }) => tracing::info!(socket_id, process_id, "Tab reconnected"),
                Ok(TabEvent::TitleChanged { socket_id, title }) => {
                    tracing::debug!(socket_id, %title, "Title changed");
                }
                Ok(event) => tracing::trace!(?event, "Tab event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Tab event log lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
