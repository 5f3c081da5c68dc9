//! Console frontend: a line-oriented playback shell.
//!
//! One of the three command producers. Parsing is kept separate from I/O so
//! the grammar is unit-testable without a terminal.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::catalog::{CatalogRepository, LibraryDb, Playlist, SortOrder};
use crate::controller::{CommandSender, ControllerHandle};
use crate::protocol::{Command, PlayTarget, RepeatMode, Track, TrackId};
use crate::sleep_timer::SleepTimer;
use crate::store::{SettingValue, StoreHandle, KEY_SORT_ORDER};

/// What one input line asks for.
#[derive(Debug, Clone, PartialEq)]
enum ConsoleAction {
    Submit(Command),
    Sleep(Duration),
    SleepOff,
    AddTrack(String),
    SavePlaylist {
        id: i64,
        name: String,
        track_ids: Vec<TrackId>,
    },
    Sort(SortOrder),
    Status,
    List,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_switch(value: &str) -> Option<bool> {
    match value {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

fn parse_line(line: &str) -> ConsoleAction {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let unknown = || ConsoleAction::Unknown(line.trim().to_string());

    match tokens.as_slice() {
        [] => ConsoleAction::Empty,
        ["play", id] => match id.parse() {
            Ok(id) => ConsoleAction::Submit(Command::Play(PlayTarget::Track(id))),
            Err(_) => unknown(),
        },
        ["play-all"] => ConsoleAction::Submit(Command::Play(PlayTarget::AllTracks {
            start_index: 0,
        })),
        ["play-all", index] => match index.parse() {
            Ok(start_index) => {
                ConsoleAction::Submit(Command::Play(PlayTarget::AllTracks { start_index }))
            }
            Err(_) => unknown(),
        },
        ["playlist", id] => match id.parse() {
            Ok(id) => ConsoleAction::Submit(Command::Play(PlayTarget::Playlist {
                id,
                start_index: 0,
            })),
            Err(_) => unknown(),
        },
        ["playlist", id, index] => match (id.parse(), index.parse()) {
            (Ok(id), Ok(start_index)) => {
                ConsoleAction::Submit(Command::Play(PlayTarget::Playlist { id, start_index }))
            }
            _ => unknown(),
        },
        ["pause"] => ConsoleAction::Submit(Command::Pause),
        ["resume"] => ConsoleAction::Submit(Command::Resume),
        ["stop"] => ConsoleAction::Submit(Command::Stop),
        ["next"] => ConsoleAction::Submit(Command::Next),
        ["prev"] | ["previous"] => ConsoleAction::Submit(Command::Previous),
        ["seek", seconds] => match seconds.parse::<u64>() {
            Ok(seconds) => ConsoleAction::Submit(Command::Seek(seconds * 1_000)),
            Err(_) => unknown(),
        },
        ["repeat", mode @ ("off" | "all" | "one")] => ConsoleAction::Submit(
            Command::SetRepeatMode(RepeatMode::from_str_or_off(mode)),
        ),
        ["fav", value] => match parse_switch(value) {
            Some(value) => ConsoleAction::Submit(Command::SetFavorite(value)),
            None => unknown(),
        },
        ["vol", percent] => match percent.parse::<u32>() {
            Ok(percent) => {
                ConsoleAction::Submit(Command::SetVolume(percent.min(100) as f32 / 100.0))
            }
            Err(_) => unknown(),
        },
        ["mute", value] => match parse_switch(value) {
            Some(value) => ConsoleAction::Submit(Command::SetMuted(value)),
            None => unknown(),
        },
        ["reorder", from, to] => match (from.parse(), to.parse()) {
            (Ok(from), Ok(to)) => ConsoleAction::Submit(Command::Reorder { from, to }),
            _ => unknown(),
        },
        ["add", path @ ..] if !path.is_empty() => ConsoleAction::AddTrack(path.join(" ")),
        ["playlist-set", id, name, ids @ ..] => {
            let Ok(id) = id.parse() else {
                return unknown();
            };
            let mut track_ids = Vec::with_capacity(ids.len());
            for raw in ids {
                match raw.parse() {
                    Ok(track_id) => track_ids.push(track_id),
                    Err(_) => return unknown(),
                }
            }
            ConsoleAction::SavePlaylist {
                id,
                name: name.to_string(),
                track_ids,
            }
        }
        ["sort", order @ ("title" | "artist" | "album")] => {
            ConsoleAction::Sort(SortOrder::from_str_or_title(order))
        }
        ["sleep", "off"] => ConsoleAction::SleepOff,
        ["sleep", minutes] => match minutes.parse::<u64>() {
            Ok(minutes) => ConsoleAction::Sleep(Duration::from_secs(minutes * 60)),
            Err(_) => unknown(),
        },
        ["status"] => ConsoleAction::Status,
        ["list"] => ConsoleAction::List,
        ["help"] => ConsoleAction::Help,
        ["quit"] | ["exit"] => ConsoleAction::Quit,
        _ => unknown(),
    }
}

const HELP_TEXT: &str = "\
commands:
  play <id>           play the catalog with the cursor on a track
  play-all [index]    play all catalog tracks
  playlist <id> [index]
  pause | resume | stop | next | prev
  seek <seconds>
  repeat off|all|one
  fav on|off          favorite flag for the current track
  vol <0-100> | mute on|off
  reorder <from> <to>
  sleep <minutes> | sleep off
  add <path>          register an audio file in the catalog
  playlist-set <id> <name> [track-ids...]
  sort title|artist|album
  status | list | help | quit";

fn title_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|name| name.to_str())
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(ToString::to_string)
        .unwrap_or_else(|| "Unknown Title".to_string())
}

pub struct Console {
    commands: CommandSender,
    controller: ControllerHandle,
    sleep_timer: SleepTimer,
    library: Arc<LibraryDb>,
    store: StoreHandle,
    sort_order: SortOrder,
}

impl Console {
    pub fn new(
        controller: ControllerHandle,
        sleep_timer: SleepTimer,
        library: Arc<LibraryDb>,
        store: StoreHandle,
        sort_order: SortOrder,
    ) -> Self {
        Self {
            commands: controller.commands(),
            controller,
            sleep_timer,
            library,
            store,
            sort_order,
        }
    }

    fn set_sort_order(&mut self, order: SortOrder) {
        self.sort_order = order;
        self.store.save_setting(
            KEY_SORT_ORDER,
            SettingValue::Text(order.as_str().to_string()),
        );
        println!("catalog sorted by {}", order.as_str());
    }

    fn add_track(&self, path: &str) {
        let id = match self.library.next_track_id() {
            Ok(id) => id,
            Err(err) => {
                println!("catalog error: {}", err);
                return;
            }
        };
        let track = Track {
            id,
            title: title_from_path(Path::new(path)),
            artist: "Unknown Artist".to_string(),
            album: "Unknown Album".to_string(),
            album_id: 0,
            duration_ms: 0,
            content_ref: path.to_string(),
            is_favorite: false,
        };
        match self.library.insert_track(&track) {
            Ok(()) => println!("added track {}: {}", track.id, track.title),
            Err(err) => println!("catalog error: {}", err),
        }
    }

    fn save_playlist(&self, id: i64, name: String, track_ids: Vec<TrackId>) {
        let count = track_ids.len();
        let playlist = Playlist {
            id,
            name,
            track_ids,
        };
        match self.library.update_playlist(&playlist) {
            Ok(()) => println!("playlist {} saved with {} tracks", id, count),
            Err(err) => println!("catalog error: {}", err),
        }
    }

    fn print_status(&self) {
        let snapshot = self.controller.latest();
        match snapshot.track.as_ref() {
            Some(track) => println!(
                "{} | {} - {} | {}s / {}s | vol {:.0}%{} | repeat {} | fav {}",
                snapshot.status,
                track.artist,
                track.title,
                snapshot.position_ms / 1_000,
                track.duration_ms / 1_000,
                snapshot.volume * 100.0,
                if snapshot.muted { " (muted)" } else { "" },
                snapshot.repeat_mode.as_str(),
                if snapshot.favorite { "yes" } else { "no" },
            ),
            None => println!("{} | no track", snapshot.status),
        }
        if let Some(remaining) = self.sleep_timer.remaining() {
            println!("sleep timer: {}s remaining", remaining.as_secs());
        }
    }

    fn print_catalog(&self) {
        match self.library.all_tracks() {
            Ok(tracks) if tracks.is_empty() => println!("catalog is empty"),
            Ok(mut tracks) => {
                tracks.sort_by(|a, b| self.sort_order.compare(a, b));
                for track in tracks {
                    println!(
                        "{:>5}  {} - {} ({})",
                        track.id, track.artist, track.title, track.album
                    );
                }
            }
            Err(err) => println!("catalog error: {}", err),
        }
    }

    /// Blocking REPL over stdin; returns when the user quits or input ends.
    pub fn run(&mut self) {
        info!("Console: started");
        let stdin = io::stdin();
        loop {
            print!("> ");
            let _ = io::stdout().flush();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break, // EOF
                Ok(_) => {}
                Err(err) => {
                    log::warn!("Console: stdin read failed: {}", err);
                    break;
                }
            }

            match parse_line(&line) {
                ConsoleAction::Submit(command) => self.commands.submit(command),
                ConsoleAction::Sleep(duration) => self.sleep_timer.arm(duration),
                ConsoleAction::SleepOff => {
                    if self.sleep_timer.is_armed() {
                        self.sleep_timer.cancel();
                        println!("sleep timer cancelled");
                    } else {
                        println!("sleep timer is not armed");
                    }
                }
                ConsoleAction::AddTrack(path) => self.add_track(&path),
                ConsoleAction::SavePlaylist {
                    id,
                    name,
                    track_ids,
                } => self.save_playlist(id, name, track_ids),
                ConsoleAction::Sort(order) => self.set_sort_order(order),
                ConsoleAction::Status => self.print_status(),
                ConsoleAction::List => self.print_catalog(),
                ConsoleAction::Help => println!("{}", HELP_TEXT),
                ConsoleAction::Quit => break,
                ConsoleAction::Empty => {}
                ConsoleAction::Unknown(input) => {
                    println!("unrecognized: {:?} (try 'help')", input)
                }
            }
        }
        info!("Console: stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_play_with_track_id() {
        assert_eq!(
            parse_line("play 42"),
            ConsoleAction::Submit(Command::Play(PlayTarget::Track(42)))
        );
    }

    #[test]
    fn test_parse_playlist_with_start_index() {
        assert_eq!(
            parse_line("playlist 3 7"),
            ConsoleAction::Submit(Command::Play(PlayTarget::Playlist {
                id: 3,
                start_index: 7
            }))
        );
    }

    #[test]
    fn test_parse_seek_converts_seconds_to_millis() {
        assert_eq!(
            parse_line("seek 95"),
            ConsoleAction::Submit(Command::Seek(95_000))
        );
    }

    #[test]
    fn test_parse_repeat_modes() {
        assert_eq!(
            parse_line("repeat one"),
            ConsoleAction::Submit(Command::SetRepeatMode(RepeatMode::One))
        );
        assert!(matches!(
            parse_line("repeat sometimes"),
            ConsoleAction::Unknown(_)
        ));
    }

    #[test]
    fn test_parse_volume_is_clamped_to_unit_range() {
        assert_eq!(
            parse_line("vol 250"),
            ConsoleAction::Submit(Command::SetVolume(1.0))
        );
    }

    #[test]
    fn test_parse_sleep_minutes_and_off() {
        assert_eq!(
            parse_line("sleep 30"),
            ConsoleAction::Sleep(Duration::from_secs(30 * 60))
        );
        assert_eq!(parse_line("sleep off"), ConsoleAction::SleepOff);
    }

    #[test]
    fn test_parse_reorder() {
        assert_eq!(
            parse_line("reorder 0 2"),
            ConsoleAction::Submit(Command::Reorder { from: 0, to: 2 })
        );
    }

    #[test]
    fn test_parse_add_keeps_spaces_in_path() {
        assert_eq!(
            parse_line("add /music/My Album/01 Track.flac"),
            ConsoleAction::AddTrack("/music/My Album/01 Track.flac".to_string())
        );
        assert!(matches!(parse_line("add"), ConsoleAction::Unknown(_)));
    }

    #[test]
    fn test_parse_playlist_set() {
        assert_eq!(
            parse_line("playlist-set 4 Morning 3 1 2"),
            ConsoleAction::SavePlaylist {
                id: 4,
                name: "Morning".to_string(),
                track_ids: vec![3, 1, 2],
            }
        );
        assert!(matches!(
            parse_line("playlist-set 4 Morning 3 x"),
            ConsoleAction::Unknown(_)
        ));
    }

    #[test]
    fn test_parse_sort_orders() {
        assert_eq!(
            parse_line("sort artist"),
            ConsoleAction::Sort(SortOrder::Artist)
        );
        assert!(matches!(
            parse_line("sort random"),
            ConsoleAction::Unknown(_)
        ));
    }

    #[test]
    fn test_sort_command_persists_preference() {
        use crate::controller::{ControllerSeed, PlaybackController};
        use crate::store::StoreRequest;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let library = Arc::new(LibraryDb::open_in_memory().unwrap());
        let catalog: Arc<dyn CatalogRepository> =
            Arc::clone(&library) as Arc<dyn CatalogRepository>;
        let (store, store_rx) = StoreHandle::channel();
        let (_controller, handle) =
            PlaybackController::new(catalog, store.clone(), ControllerSeed::default(), 8);
        let sleep_timer = SleepTimer::new(handle.commands(), runtime.handle().clone());
        let mut console = Console::new(
            handle,
            sleep_timer,
            library,
            store,
            SortOrder::Title,
        );

        console.set_sort_order(SortOrder::Artist);

        assert_eq!(console.sort_order, SortOrder::Artist);
        let wrote = store_rx.try_iter().any(|r| {
            matches!(r, StoreRequest::SaveSetting { key, value }
                if key == KEY_SORT_ORDER
                    && value == SettingValue::Text("artist".to_string()))
        });
        assert!(wrote);
    }

    #[test]
    fn test_title_from_path_uses_file_stem() {
        assert_eq!(title_from_path(Path::new("/music/01 Intro.flac")), "01 Intro");
        assert_eq!(title_from_path(Path::new("/music/.flac")), ".flac");
    }

    #[test]
    fn test_blank_and_garbage_lines() {
        assert_eq!(parse_line("   "), ConsoleAction::Empty);
        assert!(matches!(parse_line("play abc"), ConsoleAction::Unknown(_)));
        assert!(matches!(parse_line("frobnicate"), ConsoleAction::Unknown(_)));
    }
}
