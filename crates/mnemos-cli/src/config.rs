//! Configuration Vault – reads/writes `~/.mnemos/config.toml`.

use mnemos_memory::MemoryConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted user configuration stored in `~/.mnemos/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Agent id used by `/remember` and `/search` until `/agent` changes it.
    #[serde(default = "default_agent")]
    pub default_agent: String,

    /// SQLite snapshot file.  Empty means `~/.mnemos/memories.db`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub snapshot_path: String,

    /// Seconds between background consolidation passes.
    #[serde(default = "default_consolidation_interval")]
    pub consolidation_interval_secs: u64,

    /// Engine tunables.  Kept last: TOML tables must follow plain values.
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_agent() -> String {
    "operator".to_string()
}
fn default_consolidation_interval() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_agent: default_agent(),
            snapshot_path: String::new(),
            consolidation_interval_secs: default_consolidation_interval(),
            memory: MemoryConfig::default(),
        }
    }
}

impl Config {
    /// Snapshot file, resolved against `home` when not set explicitly.
    pub fn snapshot_file(&self, home: &str) -> PathBuf {
        if self.snapshot_path.is_empty() {
            mnemos_dir_for_home(home).join("memories.db")
        } else {
            PathBuf::from(&self.snapshot_path)
        }
    }
}

pub fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// Return the path to `~/.mnemos/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

fn mnemos_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".mnemos")
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    mnemos_dir_for_home(home).join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    cfg.memory
        .validate()
        .map_err(|e| format!("Invalid [memory] settings: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `MNEMOS_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `MNEMOS_AGENT` | `default_agent` |
/// | `MNEMOS_SNAPSHOT_PATH` | `snapshot_path` |
/// | `MNEMOS_CONSOLIDATION_INTERVAL` | `consolidation_interval_secs` |
/// | `MNEMOS_MAX_MEMORY_SIZE` | `memory.max_memory_size` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("MNEMOS_AGENT")
        && !v.trim().is_empty()
    {
        cfg.default_agent = v;
    }
    if let Ok(v) = std::env::var("MNEMOS_SNAPSHOT_PATH") {
        cfg.snapshot_path = v;
    }
    if let Ok(v) = std::env::var("MNEMOS_CONSOLIDATION_INTERVAL")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.consolidation_interval_secs = secs;
    }
    if let Ok(v) = std::env::var("MNEMOS_MAX_MEMORY_SIZE")
        && let Ok(size) = v.parse::<usize>()
    {
        cfg.memory.max_memory_size = size;
    }
}

/// Save the config to disk, creating `~/.mnemos/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

/// Create `dir` (rwx------ on Unix) if it does not exist.
pub(crate) fn ensure_private_dir(dir: &Path) -> Result<(), String> {
    fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create directory {}: {}", dir.display(), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| format!("Failed to set permissions on {}: {}", dir.display(), e))?;
    }
    Ok(())
}
