use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Environment variable overriding `storage.directory`.
pub const STORAGE_DIR_ENV: &str = "SYNAPTIC_STORAGE_DIR";
/// Environment variable overriding `state.directory`.
pub const STATE_DIR_ENV: &str = "SYNAPTIC_STATE_DIR";

// ── Record storage ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding `<unixSeconds>_<id>.longterm` record files and the
    /// `memory_index.json` side-file.
    pub directory: PathBuf,
    /// gzip level (0-9) used for freshly stored records.
    pub compression_level: u32,
    /// gzip level applied when the optimizer re-compresses records that have
    /// aged past the one-week bucket.
    pub archive_compression_level: u32,
    /// Upper bound on concurrent record reads during a search fan-out.
    pub max_parallel_reads: usize,
    /// Number of record files sampled when estimating the compression ratio.
    pub stats_sample_size: usize,
    /// Result limit applied when a search query does not specify one.
    pub default_search_limit: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".synaptic/longterm"),
            compression_level: 6,
            archive_compression_level: 9,
            max_parallel_reads: 16,
            stats_sample_size: 10,
            default_search_limit: 50,
        }
    }
}

// ── Snapshots / checkpoints / backups ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Root of `current_state.json`, `Checkpoints/` and `Backups/`.
    pub directory: PathBuf,
    /// Interval of the automatic backup timer.  `0` disables the timer.
    pub backup_interval_secs: u64,
    /// Automatic backups retained after each new automatic backup.
    pub max_automatic_backups: usize,
    /// Default retention used by `checkpoint cleanup` when no count is given.
    pub max_checkpoints: usize,
    /// Initial value of `SleepStatus::auto_sleep_enabled` on a fresh install.
    pub auto_sleep_enabled: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(".synaptic/state"),
            backup_interval_secs: 5 * 60,
            max_automatic_backups: 5,
            max_checkpoints: 10,
            auto_sleep_enabled: true,
        }
    }
}

impl StateConfig {
    pub fn current_state_path(&self) -> PathBuf {
        self.directory.join("current_state.json")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.directory.join("Checkpoints")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.directory.join("Backups")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub state: StateConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var(STORAGE_DIR_ENV) {
            if !value.is_empty() {
                config.storage.directory = PathBuf::from(value);
            }
        }

        if let Ok(value) = env::var(STATE_DIR_ENV) {
            if !value.is_empty() {
                config.state.directory = PathBuf::from(value);
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Point both storage roots below `root`, keeping the default sub-layout.
    pub fn with_data_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.storage.directory = root.join("longterm");
        self.state.directory = root.join("state");
        self
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn durability_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.state.backup_interval_secs, 300);
        assert_eq!(cfg.state.max_automatic_backups, 5);
        assert_eq!(cfg.state.max_checkpoints, 10);
        assert_eq!(cfg.storage.compression_level, 6);
        assert_eq!(cfg.storage.archive_compression_level, 9);
        assert_eq!(cfg.logging.filter, "info");
    }

    #[test]
    fn state_paths_follow_directory() {
        let mut state = StateConfig::default();
        state.directory = PathBuf::from("/data/state");
        assert_eq!(
            state.current_state_path(),
            PathBuf::from("/data/state/current_state.json")
        );
        assert_eq!(state.checkpoint_dir(), PathBuf::from("/data/state/Checkpoints"));
        assert_eq!(state.backup_dir(), PathBuf::from("/data/state/Backups"));
    }

    #[test]
    fn with_data_root_rewrites_both_directories() {
        let cfg = AppConfig::default().with_data_root("/srv/synaptic");
        assert_eq!(cfg.storage.directory, PathBuf::from("/srv/synaptic/longterm"));
        assert_eq!(cfg.state.directory, PathBuf::from("/srv/synaptic/state"));
    }

    // ── load_from ──────────────────────────────────────────────────────────

    #[test]
    fn load_from_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = AppConfig::load_from(dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(cfg.storage.default_search_limit, 50);
        assert!(cfg.state.auto_sleep_enabled);
    }

    #[test]
    fn load_from_partial_toml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(
            &path,
            r#"
[state]
backup_interval_secs = 60
max_automatic_backups = 2

[storage]
compression_level = 1
"#,
        )
        .unwrap();

        let cfg = AppConfig::load_from(&path).unwrap();
        assert_eq!(cfg.state.backup_interval_secs, 60);
        assert_eq!(cfg.state.max_automatic_backups, 2);
        assert_eq!(cfg.state.max_checkpoints, 10);
        assert_eq!(cfg.storage.compression_level, 1);
        assert_eq!(cfg.storage.archive_compression_level, 9);
        assert_eq!(cfg.logging.filter, "info");
    }

    #[test]
    fn load_from_invalid_toml_returns_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[state\nbackup_interval_secs = ").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.storage.max_parallel_reads = 4;
        cfg.state.auto_sleep_enabled = false;
        cfg.logging.filter = "synaptic_memory=debug".to_string();
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.storage.max_parallel_reads, 4);
        assert!(!loaded.state.auto_sleep_enabled);
        assert_eq!(loaded.logging.filter, "synaptic_memory=debug");
    }

    // ── Env var overrides ──────────────────────────────────────────────────

    #[test]
    fn env_directories_override_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("env.toml");
        fs::write(
            &path,
            r#"
[storage]
directory = "/from/file"
"#,
        )
        .unwrap();

        // SAFETY: no other test in this crate asserts on the directories.
        unsafe { env::set_var(STORAGE_DIR_ENV, "/from/env/longterm") };
        unsafe { env::set_var(STATE_DIR_ENV, "/from/env/state") };
        let cfg = AppConfig::load_from(&path).unwrap();
        unsafe { env::remove_var(STORAGE_DIR_ENV) };
        unsafe { env::remove_var(STATE_DIR_ENV) };

        assert_eq!(cfg.storage.directory, PathBuf::from("/from/env/longterm"));
        assert_eq!(cfg.state.directory, PathBuf::from("/from/env/state"));
    }
}
