use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use directories::BaseDirs;
use figment::{
    providers::{Env, Format, Json, Serialized, Yaml},
    Figment,
};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;

static BASE_DIRS: Lazy<BaseDirs> = Lazy::new(|| BaseDirs::new().expect("failed to get base dirs"));

const ERR_INVALID_UTF8: &str = "default path contains non-UTF8";

const DIR: &str = "md-task-sync";

fn config_dir() -> Utf8PathBuf {
    Utf8Path::from_path(BASE_DIRS.config_dir())
        .expect(ERR_INVALID_UTF8)
        .to_owned()
        .join(DIR)
}

fn data_dir() -> Utf8PathBuf {
    Utf8Path::from_path(BASE_DIRS.data_dir())
        .expect(ERR_INVALID_UTF8)
        .to_owned()
        .join(DIR)
}

fn config_name() -> Utf8PathBuf {
    config_dir().join("config.yaml")
}

fn config_fallback_name() -> Utf8PathBuf {
    config_dir().join("config-fallback.json")
}

pub fn default_links_path() -> Utf8PathBuf {
    data_dir().join("sync_links.json")
}

pub fn default_reminders_store_path() -> Utf8PathBuf {
    data_dir().join("reminders.json")
}

/// Which way changes are allowed to flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Both,
    DocToRem,
    RemToDoc,
}

impl Direction {
    pub fn creates_reminders(self) -> bool {
        matches!(self, Direction::Both | Direction::DocToRem)
    }

    pub fn creates_documents(self) -> bool {
        matches!(self, Direction::Both | Direction::RemToDoc)
    }
}

/// Maps a vault to its default reminder list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VaultMapping {
    pub vault_id: String,
    pub list_id: String,
}

/// Routes document tasks carrying `tag` in `vault_id` to `list_id`.
/// Configuration order is precedence order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TagRoute {
    pub vault_id: String,
    pub tag: String,
    pub list_id: String,
}

/// Routes reminders from a named list into a target file when creating
/// document counterparts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemToDocRule {
    pub list_name: String,
    pub target_file: Utf8PathBuf,
    #[serde(default)]
    pub heading: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreationConfig {
    /// Skip records whose modified timestamp is older than this many days.
    #[serde(default)]
    pub since_days: Option<i64>,
    pub max_creates_per_run: usize,
    pub include_completed: bool,
    /// Vault-relative fallback file for document-side creations.
    pub inbox_file: Utf8PathBuf,
    #[serde(default)]
    pub rem_default_list_id: Option<String>,
    #[serde(default)]
    pub rem_to_doc_rules: Vec<RemToDocRule>,
}

impl Default for CreationConfig {
    fn default() -> Self {
        Self {
            since_days: None,
            max_creates_per_run: 50,
            include_completed: false,
            inbox_file: "Inbox.md".into(),
            rem_default_list_id: None,
            rem_to_doc_rules: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Links scoring below this are rejected.
    pub min_score: f64,
    /// Window within which two due dates count as close but not equal.
    pub days_tolerance: i64,
    pub include_completed: bool,
    pub vault_mappings: Vec<VaultMapping>,
    pub tag_routes: Vec<TagRoute>,
    pub direction: Direction,
    pub enable_deduplication: bool,
    pub dedup_auto_apply: bool,
    /// Delete completed reminders whose last change is older than this many
    /// days, after the sync proper.
    #[serde(default)]
    pub clear_completed_older_than_days: Option<i64>,
    pub links_path: Utf8PathBuf,
    /// Backing file for the JSON reminder gateway.
    pub reminders_store_path: Utf8PathBuf,
    pub creation: CreationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_score: 0.75,
            days_tolerance: 1,
            include_completed: false,
            vault_mappings: Vec::new(),
            tag_routes: Vec::new(),
            direction: Direction::Both,
            enable_deduplication: false,
            dedup_auto_apply: false,
            clear_completed_older_than_days: None,
            links_path: default_links_path(),
            reminders_store_path: default_reminders_store_path(),
            creation: CreationConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        Self::load_from(config_name())
    }

    pub fn load_from<P: AsRef<Utf8Path>>(path: P) -> Result<Self, Error> {
        let cfg: Config = Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("MD_TASK_SYNC_"))
            .join(Json::file(config_fallback_name()))
            .join(Serialized::defaults(Config::default()))
            .extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(Error::ConfigMissing {
                what: format!("min_score within [0, 1], got {}", self.min_score),
            });
        }
        if self.days_tolerance < 0 {
            return Err(Error::ConfigMissing {
                what: format!("non-negative days_tolerance, got {}", self.days_tolerance),
            });
        }
        if self.clear_completed_older_than_days.is_some_and(|d| d < 0) {
            return Err(Error::ConfigMissing {
                what: "non-negative clear_completed_older_than_days".into(),
            });
        }
        if self.links_path.as_str().is_empty() {
            return Err(Error::ConfigMissing {
                what: "links_path".into(),
            });
        }
        Ok(())
    }

    /// Default reminder list for a vault, from `vault_mappings`.
    pub fn default_list_for(&self, vault_id: &str) -> Option<&str> {
        self.vault_mappings
            .iter()
            .find(|m| m.vault_id == vault_id)
            .map(|m| m.list_id.as_str())
    }

    /// Lists in scope for a vault: the default mapping plus every tag-route
    /// target, deduplicated in configuration order.
    pub fn list_ids_for(&self, vault_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        if let Some(id) = self.default_list_for(vault_id) {
            ids.push(id.to_owned());
        }
        for route in self.tag_routes.iter().filter(|r| r.vault_id == vault_id) {
            if !ids.iter().any(|id| id == &route.list_id) {
                ids.push(route.list_id.clone());
            }
        }
        ids
    }
}
