// Application settings
// Loaded from ~/.config/calcgrid/settings.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Grid defaults for new and hydrated documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub default_rows: usize,
    pub default_columns: usize,
    /// Undo depth
    pub history_capacity: usize,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            default_rows: 100,
            default_columns: 26,
            history_capacity: 50,
        }
    }
}

/// Backoff for failed writes: `base_delay_ms * 2^n`, capped at `max_delay_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// 0 disables retry; the next edit triggers the flush instead
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 8_000,
        }
    }
}

/// Debounce and presence timings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub flush_debounce_ms: u64,
    pub autosave_debounce_ms: u64,
    pub presence_ttl_secs: u64,
    pub presence_sweep_ms: u64,
    pub retry: RetrySettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            flush_debounce_ms: 500,
            autosave_debounce_ms: 800,
            presence_ttl_secs: 10,
            presence_sweep_ms: 1_000,
            retry: RetrySettings::default(),
        }
    }
}

impl SyncSettings {
    pub fn flush_debounce(&self) -> Duration {
        Duration::from_millis(self.flush_debounce_ms)
    }

    pub fn autosave_debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn presence_sweep(&self) -> Duration {
        Duration::from_millis(self.presence_sweep_ms)
    }
}

/// Document server endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// `None` = offline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub timeout_secs: u64,
    /// Identity used for presence and to ignore our own broadcasts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            timeout_secs: 10,
            user_id: None,
        }
    }
}

impl ServerSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub grid: GridSettings,
    pub sync: SyncSettings,
    pub server: ServerSettings,
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calcgrid");
        config_dir.join("settings.toml")
    }

    /// Load settings from disk, falling back to defaults
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load from an explicit path. Missing or unreadable files yield defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents).unwrap_or_else(|e| {
                log::warn!("Error parsing {}: {}; using default settings", path.display(), e);
                Self::default()
            }),
            Err(e) => {
                log::warn!("Error reading {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Save current settings to disk
    pub fn save(&self) -> Result<(), String> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let text = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        fs::write(path, text).map_err(|e| e.to_string())
    }

    /// Get the config file path for display/opening
    pub fn config_path_display() -> String {
        Self::config_path().to_string_lossy().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.grid.default_rows, 100);
        assert_eq!(s.grid.default_columns, 26);
        assert_eq!(s.grid.history_capacity, 50);
        assert_eq!(s.sync.flush_debounce(), Duration::from_millis(500));
        assert_eq!(s.sync.autosave_debounce(), Duration::from_millis(800));
        assert_eq!(s.sync.presence_ttl(), Duration::from_secs(10));
        assert_eq!(s.sync.retry.max_attempts, 3);
        assert!(s.server.base_url.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let s = Settings::from_toml_str(
            r#"
            [grid]
            default_rows = 500

            [sync.retry]
            max_attempts = 0
            "#,
        )
        .unwrap();
        assert_eq!(s.grid.default_rows, 500);
        assert_eq!(s.grid.default_columns, 26);
        assert_eq!(s.sync.retry.max_attempts, 0);
        assert_eq!(s.sync.retry.base_delay_ms, 1_000);
        assert_eq!(s.sync.flush_debounce_ms, 500);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[grid\ndefault_rows = ").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempdir().unwrap();
        assert_eq!(Settings::load_from(&dir.path().join("nope.toml")), Settings::default());
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let mut s = Settings::default();
        s.server.base_url = Some("https://calc.example.com/api".into());
        s.server.user_id = Some("u-1".into());
        s.sync.flush_debounce_ms = 250;
        s.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path), s);
    }
}
