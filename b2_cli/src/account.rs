//! Account state persisted between invocations: the application key, the last session and a
//! bucket name to id cache.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use b2_client::{Credentials, Session};
use serde::{Deserialize, Serialize};

use crate::constants::{CONFIG_DIR_NAME, CONFIG_FILE_NAME};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountConfig {
    pub key_id: String,
    pub key: String,
    /// Bucket name to bucket id.
    pub buckets: BTreeMap<String, String>,
    pub session: Option<Session>,
}

impl AccountConfig {
    /// `<config dir>/b2/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| anyhow!("no configuration directory available"))?;
        Ok(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Reads the state at `path`; a missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Writes the state to `path`. The file holds an application key, so on unix it is only ever
    /// readable by its owner, including while it is being written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path).with_context(|| format!("opening {}", path.display()))?;

        // `mode` only applies to new files; an older file may still be group-readable.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(content.as_bytes())
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn credentials(&self) -> Option<Credentials> {
        if self.key_id.is_empty() || self.key.is_empty() {
            return None;
        }
        Some(Credentials::new(&self.key_id, &self.key))
    }

    /// Switches to a new application key, forgetting everything learned with the old one.
    pub fn set_credentials(&mut self, credentials: &Credentials, session: Option<Session>) {
        self.key_id = credentials.key_id.clone();
        self.key = credentials.key.clone();
        self.session = session;
        self.buckets.clear();
    }
}
