//! Configuration persistence.
//!
//! # Storage layout
//!
//! ```text
//! ~/.ocsync/
//!   config.yaml   (mode 0600, password included)
//! ```
//!
//! Path helpers come in two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::ConfigError;
use crate::types::Configuration;

pub const CONFIG_FILE: &str = "config.yaml";

/// Where a [`Configuration`] comes from and goes to. The daemon does not care
/// about the backing mechanism.
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` means nothing has been saved yet (first run).
    fn load(&self) -> Result<Option<Configuration>, ConfigError>;

    fn save(&self, config: &Configuration) -> Result<(), ConfigError>;
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.ocsync/`
pub fn ocsync_root(home: &Path) -> PathBuf {
    home.join(".ocsync")
}

/// `<home>/.ocsync/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    ocsync_root(home).join(CONFIG_FILE)
}

pub fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// 2. YAML file store
// ---------------------------------------------------------------------------

/// File-backed store. Writes are atomic: serialize → `.tmp` sibling →
/// `chmod 0600` → `rename`.
#[derive(Debug, Clone)]
pub struct YamlConfigStore {
    path: PathBuf,
}

impl YamlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `<home>/.ocsync/config.yaml`.
    pub fn at_home(home: &Path) -> Self {
        Self::new(config_path_at(home))
    }

    /// `at_home` convenience wrapper.
    pub fn default_location() -> Result<Self, ConfigError> {
        Ok(Self::at_home(&home()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for YamlConfigStore {
    fn load(&self) -> Result<Option<Configuration>, ConfigError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        serde_yaml::from_str(&contents)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    fn save(&self, config: &Configuration) -> Result<(), ConfigError> {
        config.validate()?;

        if let Some(dir) = self.path.parent() {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                set_dir_permissions(dir)?;
            }
        }

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| CONFIG_FILE.to_string());
        let tmp_path = self.path.with_file_name(format!("{file_name}.tmp"));

        let yaml = serde_yaml::to_string(config)?;
        std::fs::write(&tmp_path, yaml)?;
        set_file_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 3. In-memory store
// ---------------------------------------------------------------------------

/// Process-local store, for tests and for running without persistence.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    slot: Mutex<Option<Configuration>>,
}

impl MemoryConfigStore {
    pub fn new(initial: Option<Configuration>) -> Self {
        Self {
            slot: Mutex::new(initial),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Option<Configuration>, ConfigError> {
        let slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(slot.clone())
    }

    fn save(&self, config: &Configuration) -> Result<(), ConfigError> {
        config.validate()?;
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(config.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn make_home() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    #[test]
    fn config_path_is_correct() {
        let home = make_home();
        assert!(config_path_at(home.path()).ends_with(".ocsync/config.yaml"));
    }

    #[test]
    fn load_absent_returns_none() {
        let home = make_home();
        let store = YamlConfigStore::at_home(home.path());
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn save_then_load_returns_same_record() {
        let home = make_home();
        let store = YamlConfigStore::at_home(home.path());
        let mut config = Configuration::defaults_at(home.path());
        config.user = "bob".into();
        config.password = "hunter2".into();
        store.save(&config).expect("save");

        let loaded = store.load().expect("load").expect("present");
        assert_eq!(loaded, config);
    }

    #[test]
    fn save_creates_private_file_and_dir() {
        let home = make_home();
        let store = YamlConfigStore::at_home(home.path());
        store
            .save(&Configuration::defaults_at(home.path()))
            .expect("save");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let file_mode = std::fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
            assert_eq!(file_mode, 0o600);
            let dir_mode = std::fs::metadata(ocsync_root(home.path()))
                .unwrap()
                .permissions()
                .mode()
                & 0o777;
            assert_eq!(dir_mode, 0o700);
        }
    }

    #[test]
    fn invalid_config_is_not_persisted() {
        let home = make_home();
        let store = YamlConfigStore::at_home(home.path());
        let mut config = Configuration::defaults_at(home.path());
        config.timeout = Duration::ZERO;
        assert!(matches!(
            store.save(&config),
            Err(ConfigError::InvalidTimeout { .. })
        ));
        assert!(!store.path().exists());
    }

    #[test]
    fn memory_store_replaces_wholesale() {
        let store = MemoryConfigStore::default();
        assert!(store.load().expect("load").is_none());

        let home = make_home();
        let mut config = Configuration::defaults_at(home.path());
        store.save(&config).expect("save");
        config.host = "other".into();
        store.save(&config).expect("save again");
        assert_eq!(store.load().expect("load").expect("present").host, "other");
    }
}
