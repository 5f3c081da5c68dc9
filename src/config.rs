//! Persistent application configuration model and defaults.

use std::path::Path;

use log::info;

use crate::error::{Error, Result};

/// Root configuration persisted to `trackline.toml`.
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Config {
    #[serde(default)]
    /// Controller behavior preferences.
    pub playback: PlaybackConfig,
    #[serde(default)]
    /// Notification rendering behavior.
    pub notifications: NotificationConfig,
    #[serde(default)]
    /// OS media-session integration preferences.
    pub media_session: MediaSessionConfig,
}

/// Controller behavior persisted between sessions.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Capacity of the bounded command channel into the controller.
    #[serde(default = "default_command_channel_capacity")]
    pub command_channel_capacity: usize,
    /// Persist repeat mode across restarts.
    #[serde(default)]
    pub persist_repeat_mode: bool,
    /// Resume the stored position when playing the last-played track again.
    #[serde(default = "default_true")]
    pub restore_last_position: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            command_channel_capacity: default_command_channel_capacity(),
            persist_repeat_mode: false,
            restore_last_position: true,
        }
    }
}

/// Notification synchronizer preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NotificationConfig {
    /// Minimum interval between host renders; bursts are coalesced into
    /// one trailing render carrying the latest state.
    #[serde(default = "default_min_render_interval_ms")]
    pub min_render_interval_ms: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            min_render_interval_ms: default_min_render_interval_ms(),
        }
    }
}

/// Media-session bridge preferences.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct MediaSessionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MediaSessionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_volume() -> f32 {
    0.75
}

fn default_command_channel_capacity() -> usize {
    64
}

fn default_min_render_interval_ms() -> u64 {
    200
}

/// Clamps loaded values into workable ranges.
pub fn sanitize_config(config: Config) -> Config {
    let clamped_volume = config.playback.default_volume.clamp(0.0, 1.0);
    let clamped_capacity = config.playback.command_channel_capacity.clamp(8, 4096);
    let clamped_interval = config.notifications.min_render_interval_ms.clamp(50, 2_000);

    Config {
        playback: PlaybackConfig {
            default_volume: clamped_volume,
            command_channel_capacity: clamped_capacity,
            ..config.playback
        },
        notifications: NotificationConfig {
            min_render_interval_ms: clamped_interval,
        },
        media_session: config.media_session,
    }
}

/// Loads the config file, writing defaults on first run.
pub fn load_or_create(config_file: &Path) -> Result<Config> {
    if !config_file.exists() {
        let default_config = Config::default();
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        let text = toml::to_string(&default_config)
            .map_err(|e| Error::Config(format!("serialize default config: {}", e)))?;
        std::fs::write(config_file, text)?;
        return Ok(default_config);
    }

    let content = std::fs::read_to_string(config_file)?;
    let parsed = toml::from_str::<Config>(&content).unwrap_or_else(|e| {
        log::warn!("Config file unreadable, using defaults: {}", e);
        Config::default()
    });
    Ok(sanitize_config(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.playback.default_volume, 0.75);
        assert!(!config.playback.persist_repeat_mode);
        assert!(config.playback.restore_last_position);
        assert_eq!(config.notifications.min_render_interval_ms, 200);
        assert!(config.media_session.enabled);
    }

    #[test]
    fn test_sanitize_clamps_out_of_range_values() {
        let mut config = Config::default();
        config.playback.default_volume = 3.0;
        config.playback.command_channel_capacity = 1;
        config.notifications.min_render_interval_ms = 10;

        let sanitized = sanitize_config(config);
        assert_eq!(sanitized.playback.default_volume, 1.0);
        assert_eq!(sanitized.playback.command_channel_capacity, 8);
        assert_eq!(sanitized.notifications.min_render_interval_ms, 50);
    }

    #[test]
    fn test_partial_file_fills_missing_sections_with_defaults() {
        let parsed: Config = toml::from_str(
            "[playback]\npersist_repeat_mode = true\n",
        )
        .unwrap();
        assert!(parsed.playback.persist_repeat_mode);
        assert_eq!(parsed.notifications.min_render_interval_ms, 200);
        assert!(parsed.media_session.enabled);
    }
}
