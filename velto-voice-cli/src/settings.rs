//! Persistent CLI settings (JSON file in the user data directory).
//!
//! Environment variables always win: settings only fill in variables that are
//! not already set.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use velto_voice_core::{transport::protocol::DEFAULT_LIVE_MODEL, LiveConfig};

pub const KNOWN_VOICES: &[&str] = &["Kore", "Puck", "Charon", "Fenrir", "Aoede", "Zephyr"];
const DEFAULT_VOICE: &str = "Kore";
const SETTINGS_FILE: &str = "settings.json";
#[cfg(target_os = "windows")]
const APP_DIR: &str = "Velto";
#[cfg(not(target_os = "windows"))]
const APP_DIR: &str = "velto";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct CliSettings {
    pub preferred_input_device: Option<String>,
    pub voice: String,
    pub live_model: String,
    pub volume_gain: f32,
    pub frame_size: usize,
    pub api_key: Option<String>,
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            voice: DEFAULT_VOICE.into(),
            live_model: DEFAULT_LIVE_MODEL.into(),
            volume_gain: 500.0,
            frame_size: 4096,
            api_key: None,
        }
    }
}

impl CliSettings {
    pub fn normalize(&mut self) {
        self.voice = normalize_voice(&self.voice);
        let model = self.live_model.trim();
        self.live_model = if model.is_empty() {
            DEFAULT_LIVE_MODEL.into()
        } else {
            model.trim_start_matches("models/").into()
        };
        self.volume_gain = if self.volume_gain.is_finite() {
            self.volume_gain.clamp(1.0, 10_000.0)
        } else {
            500.0
        };
        self.frame_size = self.frame_size.clamp(256, 16_384);
        self.api_key = trimmed(self.api_key.as_deref());
        self.preferred_input_device = trimmed(self.preferred_input_device.as_deref());
    }

    /// Live transport settings: environment first, then this file.
    pub fn live_config(&self) -> LiveConfig {
        let mut config = LiveConfig::from_env();
        if !config.has_api_key() {
            if let Some(key) = self.api_key.as_ref() {
                config.api_key = key.clone();
            }
        }
        config.model = self.live_model.clone();
        config.voice = self.voice.clone();
        config
    }
}

fn trimmed(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

/// Map a voice name onto a known prebuilt voice, case-insensitively.
pub fn normalize_voice(raw: &str) -> String {
    let wanted = raw.trim();
    KNOWN_VOICES
        .iter()
        .find(|v| v.eq_ignore_ascii_case(wanted))
        .copied()
        .unwrap_or(DEFAULT_VOICE)
        .to_string()
}

pub fn apply_runtime_env_from_settings(settings: &CliSettings) {
    if std::env::var("VELTO_VOLUME_GAIN").is_err() {
        std::env::set_var("VELTO_VOLUME_GAIN", format!("{:.1}", settings.volume_gain));
    }
    if std::env::var("VELTO_FRAME_SIZE").is_err() {
        std::env::set_var("VELTO_FRAME_SIZE", settings.frame_size.to_string());
    }
    if std::env::var("VELTO_INPUT_DEVICE").is_err() {
        if let Some(device) = settings.preferred_input_device.as_ref() {
            std::env::set_var("VELTO_INPUT_DEVICE", device);
        }
    }
}

/// `VELTO_SETTINGS` if set, else `settings.json` in the per-user data
/// directory, else the working directory.
pub fn default_settings_path() -> PathBuf {
    if let Some(explicit) = std::env::var_os("VELTO_SETTINGS").filter(|p| !p.is_empty()) {
        return PathBuf::from(explicit);
    }
    user_data_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_default()
        .join(SETTINGS_FILE)
}

#[cfg(target_os = "windows")]
fn user_data_dir() -> Option<PathBuf> {
    std::env::var_os("APPDATA").map(PathBuf::from)
}

#[cfg(not(target_os = "windows"))]
fn user_data_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| Path::new(&home).join(".local/share")))
}

/// Read settings, falling back to defaults when the file is missing or
/// unreadable. A broken file is reported but never fatal.
pub fn load_settings(path: &Path) -> CliSettings {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str::<CliSettings>(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), "ignoring malformed settings: {e}");
            CliSettings::default()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CliSettings::default(),
        Err(e) => {
            warn!(path = %path.display(), "cannot read settings: {e}");
            CliSettings::default()
        }
    };
    settings.normalize();
    settings
}

/// Write through a sibling temp file so a crash never leaves half a file.
pub fn save_settings(path: &Path, settings: &CliSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(settings).map_err(std::io::Error::other)?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, json)?;
    fs::rename(&staging, path)?;
    debug!(path = %path.display(), "settings saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("nope.json"));
        assert_eq!(settings.voice, "Kore");
        assert_eq!(settings.frame_size, 4096);
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = CliSettings {
            voice: "Puck".into(),
            preferred_input_device: Some("USB Mic".into()),
            ..CliSettings::default()
        };
        save_settings(&path, &settings).unwrap();

        let loaded = load_settings(&path);
        assert_eq!(loaded.voice, "Puck");
        assert_eq!(loaded.preferred_input_device.as_deref(), Some("USB Mic"));
    }

    #[test]
    fn partial_file_fills_in_defaults_and_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"voice":"  charon ","frameSize":12,"apiKey":"   ","liveModel":"models/x"}"#,
        )
        .unwrap();

        let loaded = load_settings(&path);
        assert_eq!(loaded.voice, "Charon");
        assert_eq!(loaded.frame_size, 256);
        assert_eq!(loaded.api_key, None);
        assert_eq!(loaded.live_model, "x");
        assert_eq!(loaded.volume_gain, 500.0);
    }

    #[test]
    fn save_leaves_no_staging_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        save_settings(&path, &CliSettings::default()).unwrap();
        save_settings(&path, &CliSettings::default()).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("settings.json")]);
    }

    #[test]
    fn default_path_ends_in_the_app_directory() {
        if std::env::var_os("VELTO_SETTINGS").is_some() || user_data_dir().is_none() {
            return;
        }
        let path = default_settings_path();
        assert!(path.ends_with(Path::new(APP_DIR).join(SETTINGS_FILE)));
    }

    #[test]
    fn unknown_voice_falls_back() {
        assert_eq!(normalize_voice("robot"), "Kore");
        assert_eq!(normalize_voice("ZEPHYR"), "Zephyr");
    }

    #[test]
    fn garbage_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(load_settings(&path).voice, "Kore");
    }
}
