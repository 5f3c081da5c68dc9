mod catalog;
mod config;
mod console;
mod controller;
mod error;
mod media_session;
mod notification;
mod protocol;
mod queue;
mod sleep_timer;
mod store;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::watch;

use catalog::{CatalogRepository, LibraryDb, SortOrder};
use config::Config;
use console::Console;
use controller::{CommandSender, ControllerSeed, PlaybackController};
use media_session::MediaSessionBridge;
use notification::{LogNotificationHost, NotificationSynchronizer, NullForegroundHost};
use protocol::{Command, PlaybackSnapshot, RepeatMode};
use sleep_timer::SleepTimer;
use store::{PersistenceGateway, SqliteStore, KEY_REPEAT_MODE, KEY_SORT_ORDER};

const POSITION_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Advances the published position once per second while playback is
/// active. Ends when the controller drops its side of the watch channel.
async fn position_clock(
    mut latest: watch::Receiver<PlaybackSnapshot>,
    commands: CommandSender,
) {
    let mut ticker = tokio::time::interval(POSITION_TICK_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if latest.has_changed().is_err() {
            break;
        }
        let snapshot = latest.borrow().clone();
        if snapshot.is_playing() {
            let step = POSITION_TICK_INTERVAL.as_millis() as u64;
            let next = snapshot.position_ms + step;
            let duration_ms = snapshot.duration_ms();
            // Tracks with an unknown (zero) duration never finish on their
            // own; they keep ticking until skipped.
            if duration_ms > 0 && next >= duration_ms {
                commands.submit(Command::TrackFinished);
            } else {
                commands.submit(Command::PositionTick(next));
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut clog = colog::default_builder();
    clog.filter(None, log::LevelFilter::Debug);
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_dir = dirs::config_dir().ok_or("no config directory on this platform")?;
    let config_file = config_dir.join("trackline.toml");
    let config: Config = config::sanitize_config(config::load_or_create(&config_file)?);

    let data_dir = dirs::data_dir()
        .ok_or("no data directory on this platform")?
        .join("trackline");
    std::fs::create_dir_all(&data_dir)?;
    let db_file = data_dir.join("trackline.db");

    let library = Arc::new(LibraryDb::open(&db_file)?);
    if library.track_count()? == 0 {
        warn!(
            "catalog is empty; use the console 'add' command or populate {} directly",
            db_file.display()
        );
    }
    let catalog: Arc<dyn CatalogRepository> = Arc::clone(&library) as Arc<dyn CatalogRepository>;

    // Settings are read once at startup; all later writes go through the
    // persistence worker.
    let settings = SqliteStore::open(&db_file)?;
    if store::mark_first_install(&settings)? {
        info!("first run: settings store initialized at {}", db_file.display());
    }
    let last_played = settings.load_last_played()?;
    let sort_order = settings
        .load_setting(KEY_SORT_ORDER)?
        .and_then(|v| v.as_text().map(SortOrder::from_str_or_title))
        .unwrap_or(SortOrder::Title);
    let repeat_mode = if config.playback.persist_repeat_mode {
        settings
            .load_setting(KEY_REPEAT_MODE)?
            .and_then(|v| v.as_text().map(RepeatMode::from_str_or_off))
            .unwrap_or(RepeatMode::Off)
    } else {
        RepeatMode::Off
    };
    let (store_handle, store_join) = store::spawn_store_worker(Box::new(settings));
    let console_store = store_handle.clone();

    let seed = ControllerSeed {
        volume: config.playback.default_volume,
        repeat_mode,
        last_played,
        persist_repeat_mode: config.playback.persist_repeat_mode,
        restore_last_position: config.playback.restore_last_position,
    };
    let (playback_controller, controller_handle) = PlaybackController::new(
        Arc::clone(&catalog),
        store_handle,
        seed,
        config.playback.command_channel_capacity,
    );

    let notifier = NotificationSynchronizer::new(
        controller_handle.subscribe(),
        Box::new(LogNotificationHost),
        Box::new(NullForegroundHost),
        Duration::from_millis(config.notifications.min_render_interval_ms),
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()?;
    let runtime_handle = runtime.handle().clone();

    let clock_watch = controller_handle.watch();
    let clock_commands = controller_handle.commands();
    let runtime_join = thread::Builder::new()
        .name("playback-runtime".to_string())
        .spawn(move || {
            runtime.block_on(async move {
                let notifier_task = tokio::spawn(notifier.run());
                let clock_task = tokio::spawn(position_clock(clock_watch, clock_commands));
                playback_controller.run().await;
                // Dropping the controller closed the snapshot bus; both
                // observers unwind on their own.
                let _ = clock_task.await;
                let _ = notifier_task.await;
            });
        })?;

    let media_join = if config.media_session.enabled {
        let updates = controller_handle.subscribe();
        let commands = controller_handle.commands();
        Some(
            thread::Builder::new()
                .name("media-session".to_string())
                .spawn(move || {
                    let mut bridge = MediaSessionBridge::new(updates, commands);
                    bridge.run();
                })?,
        )
    } else {
        info!("media session bridge disabled by configuration");
        None
    };

    let sleep_timer = SleepTimer::new(controller_handle.commands(), runtime_handle);
    let mut console = Console::new(
        controller_handle.clone(),
        sleep_timer,
        Arc::clone(&library),
        console_store,
        sort_order,
    );
    console.run();

    controller_handle.submit(Command::Shutdown);
    // Release our broadcast senders so observers see the bus close.
    drop(console);
    drop(controller_handle);

    if runtime_join.join().is_err() {
        log::error!("playback runtime thread panicked");
    }
    if let Some(join) = media_join {
        if join.join().is_err() {
            log::error!("media session thread panicked");
        }
    }
    drop(catalog);
    if store_join.join().is_err() {
        log::error!("persistence worker thread panicked");
    }

    info!("Application exiting");
    Ok(())
}
