//! Configuration management for paperharvest using the prefer crate.
//!
//! A config file (YAML, TOML or JSON) is discovered with `prefer` or given
//! explicitly, parsed into [`Config`], and applied onto [`Settings`], which
//! the pipeline reads. Environment variables and CLI flags win over the file.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::repository::util::is_postgres_url;
use crate::repository::{DbContext, DieselError, FailurePolicy};
use crate::search::DEFAULT_API_URL;
use crate::services::scheduler::AdvancePolicy;

/// Default database filename inside the data directory.
const DEFAULT_DATABASE_FILENAME: &str = "paperharvest.db";

/// Default object storage directory inside the data directory.
const OBJECTS_SUBDIR: &str = "objects";

/// Longest accepted claim lease: one year.
pub const MAX_LEASE_MINUTES: u64 = 60 * 24 * 366;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {format} config {path}: {message}")]
    Parse {
        path: PathBuf,
        format: &'static str,
        message: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Declared categories, grouped by field, in file order.
///
/// Accepts either a map of group name to category list or a plain list
/// (which becomes a single `default` group).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryGroups(pub Vec<(String, Vec<String>)>);

impl CategoryGroups {
    /// All categories in declaration order, first occurrence kept.
    pub fn flatten(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for (_, cats) in &self.0 {
            for cat in cats {
                if !out.contains(cat) {
                    out.push(cat.clone());
                }
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|(_, cats)| cats.is_empty())
    }
}

impl Serialize for CategoryGroups {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (group, cats) in &self.0 {
            map.serialize_entry(group, cats)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CategoryGroups {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct GroupsVisitor;

        impl<'de> Visitor<'de> for GroupsVisitor {
            type Value = CategoryGroups;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of group name to category list, or a category list")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut groups = Vec::new();
                while let Some((group, cats)) = map.next_entry::<String, Vec<String>>()? {
                    groups.push((group, cats));
                }
                Ok(CategoryGroups(groups))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut cats = Vec::new();
                while let Some(cat) = seq.next_element::<String>()? {
                    cats.push(cat);
                }
                Ok(CategoryGroups(vec![("default".to_string(), cats)]))
            }
        }

        deserializer.deserialize_any(GroupsVisitor)
    }
}

/// Where raw batch objects are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Directory tree on local disk.
    Local { root: PathBuf },
    /// HTTP endpoint accepting PUT/GET.
    Http { url: String, token: Option<String> },
    /// Process memory; objects vanish on exit.
    Memory,
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    pub database_url: Option<String>,
    pub storage: StorageBackend,
    /// Declared categories.
    pub categories: CategoryGroups,

    /// Upper bound of results fetched per category per run.
    pub max_results_goal: u32,
    /// Records per raw batch object, also the search page size.
    pub batch_size: u32,
    /// Categories harvested per collector invocation.
    pub num_categories_per_run: u32,
    /// Dedup window in months.
    pub lookback_months: u32,
    pub s3_max_attempts: u32,
    pub initial_delay_seconds: u64,
    pub advance_policy: AdvancePolicy,

    /// Descriptors claimed per loader invocation.
    pub pending_gz_batch: u32,
    /// Records per content/history insert.
    pub etl_batch_size: u32,
    /// Minutes after which a `processing` descriptor may be reclaimed.
    pub etl_lease_minutes: Option<u64>,

    pub statement_failure_policy: FailurePolicy,

    pub search_api_url: String,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Delay between search requests in milliseconds.
    pub request_delay_ms: u64,
    pub request_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        // ~/.local/share/paperharvest, falling back to the home or current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("paperharvest");

        Self {
            storage: StorageBackend::Local {
                root: data_dir.join(OBJECTS_SUBDIR),
            },
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            categories: CategoryGroups::default(),
            max_results_goal: 1000,
            batch_size: 100,
            num_categories_per_run: 1,
            lookback_months: 6,
            s3_max_attempts: 5,
            initial_delay_seconds: 1,
            advance_policy: AdvancePolicy::default(),
            pending_gz_batch: 10,
            etl_batch_size: 500,
            etl_lease_minutes: None,
            statement_failure_policy: FailurePolicy::default(),
            search_api_url: DEFAULT_API_URL.to_string(),
            user_agent: concat!("paperharvest/", env!("CARGO_PKG_VERSION")).to_string(),
            request_delay_ms: 3000,
            request_retries: 3,
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            storage: StorageBackend::Local {
                root: data_dir.join(OBJECTS_SUBDIR),
            },
            data_dir,
            ..Default::default()
        }
    }

    /// Get the database URL, constructing from path if not explicitly set.
    pub fn database_url(&self) -> String {
        if let Some(ref url) = self.database_url {
            url.clone()
        } else {
            format!("sqlite:{}", self.database_path().display())
        }
    }

    /// Check if using PostgreSQL (vs SQLite).
    pub fn is_postgres(&self) -> bool {
        self.database_url
            .as_ref()
            .is_some_and(|url| is_postgres_url(url))
    }

    /// Get the full path to the database (for SQLite file-based databases).
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Ensure the data directory and local object root exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        if let StorageBackend::Local { ref root } = self.storage {
            std::fs::create_dir_all(root)?;
        }
        Ok(())
    }

    /// Create a database context for the configured database.
    pub fn create_db_context(&self) -> Result<DbContext, DieselError> {
        DbContext::from_url(&self.database_url())
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.etl_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "etl_batch_size must be at least 1".into(),
            ));
        }
        if self.s3_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "s3_max_attempts must be at least 1".into(),
            ));
        }
        if self.pending_gz_batch == 0 {
            return Err(ConfigError::Invalid(
                "pending_gz_batch must be at least 1".into(),
            ));
        }
        if let Some(minutes) = self.etl_lease_minutes {
            if minutes == 0 || minutes > MAX_LEASE_MINUTES {
                return Err(ConfigError::Invalid(format!(
                    "etl_lease_minutes must be between 1 and {MAX_LEASE_MINUTES}"
                )));
            }
        }
        Ok(())
    }
}

/// Collector section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results_goal: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_categories_per_run: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookback_months: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advance_policy: Option<AdvancePolicy>,
}

/// Loader section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_gz_batch: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etl_batch_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_minutes: Option<u64>,
}

/// Search API section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
}

/// Object storage section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `local`, `http` or `memory`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    /// Root directory for the local backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Base URL for the http backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Database URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    /// User agent string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement_failure_policy: Option<FailurePolicy>,
    #[serde(default, alias = "source_papers")]
    pub harvest: HarvestConfig,
    #[serde(default, alias = "etl")]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default, skip_serializing_if = "CategoryGroups::is_empty")]
    pub categories: CategoryGroups,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    ///
    /// Returns defaults when no config file is found.
    pub async fn load() -> Result<Self, ConfigError> {
        match prefer::load("paperharvest").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => Self::load_from_path(path).await,
                None => Ok(Self::default()),
            },
            Err(e) => {
                tracing::debug!("No config file discovered: {}", e);
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext).map_err(|(format, message)| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                format,
                message,
            }
        })?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse config text in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, (&'static str, String)> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ("TOML", e.to_string())),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ("YAML", e.to_string())),
            _ => serde_json::from_str(contents).map_err(|e| ("JSON", e.to_string())),
        }
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved against `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(
        &self,
        settings: &mut Settings,
        base_dir: &Path,
    ) -> Result<(), ConfigError> {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
            settings.storage = StorageBackend::Local {
                root: settings.data_dir.join(OBJECTS_SUBDIR),
            };
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref url) = self.database_url {
            settings.database_url = Some(url.clone());
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(policy) = self.statement_failure_policy {
            settings.statement_failure_policy = policy;
        }
        if !self.categories.is_empty() {
            settings.categories = self.categories.clone();
        }

        let h = &self.harvest;
        if let Some(v) = h.max_results_goal {
            settings.max_results_goal = v;
        }
        if let Some(v) = h.batch_size {
            settings.batch_size = v;
        }
        if let Some(v) = h.num_categories_per_run {
            settings.num_categories_per_run = v;
        }
        if let Some(v) = h.lookback_months {
            settings.lookback_months = v;
        }
        if let Some(v) = h.s3_max_attempts {
            settings.s3_max_attempts = v;
        }
        if let Some(v) = h.initial_delay_seconds {
            settings.initial_delay_seconds = v;
        }
        if let Some(v) = h.advance_policy {
            settings.advance_policy = v;
        }

        if let Some(v) = self.loader.pending_gz_batch {
            settings.pending_gz_batch = v;
        }
        if let Some(v) = self.loader.etl_batch_size {
            settings.etl_batch_size = v;
        }
        if self.loader.lease_minutes.is_some() {
            settings.etl_lease_minutes = self.loader.lease_minutes;
        }

        if let Some(ref url) = self.search.api_url {
            settings.search_api_url = url.clone();
        }
        if let Some(v) = self.search.request_delay_ms {
            settings.request_delay_ms = v;
        }
        if let Some(v) = self.search.retries {
            settings.request_retries = v;
        }

        match self.storage.backend.as_deref() {
            None | Some("local") => {
                if let Some(ref root) = self.storage.root {
                    settings.storage = StorageBackend::Local {
                        root: self.resolve_path(root, base_dir),
                    };
                }
            }
            Some("http") => {
                let url = self.storage.url.clone().ok_or_else(|| {
                    ConfigError::Invalid("storage.url is required for the http backend".into())
                })?;
                settings.storage = StorageBackend::Http { url, token: None };
            }
            Some("memory") => settings.storage = StorageBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "unknown storage backend '{other}'"
                )))
            }
        }
        Ok(())
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Use CWD for relative paths instead of config file directory.
    pub use_cwd: bool,
    /// Data directory (--target flag).
    pub target: Option<PathBuf>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(
    options: LoadOptions,
) -> Result<(Settings, Config), ConfigError> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await?,
    };

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = if options.use_cwd {
        cwd.clone()
    } else {
        config.base_dir().unwrap_or_else(|| cwd.clone())
    };

    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings, &base_dir)?;

    // --target takes precedence over the config file's data_dir
    if let Some(target) = options.target {
        let target = config.resolve_path(&target.to_string_lossy(), &cwd);
        if matches!(settings.storage, StorageBackend::Local { .. })
            && config.storage.root.is_none()
        {
            settings.storage = StorageBackend::Local {
                root: target.join(OBJECTS_SUBDIR),
            };
        }
        settings.data_dir = target;
    }

    // DATABASE_URL environment variable takes highest precedence
    if let Some(url) = env_var("DATABASE_URL") {
        tracing::debug!(
            "Using DATABASE_URL from environment: {}",
            crate::repository::util::redact_url_password(&url)
        );
        settings.database_url = Some(url);
    }
    if let Some(url) = env_var("PAPERHARVEST_STORAGE_URL") {
        settings.storage = StorageBackend::Http { url, token: None };
    }
    if let StorageBackend::Http { ref mut token, .. } = settings.storage {
        *token = env_var("PAPERHARVEST_STORAGE_TOKEN");
    }

    settings.validate()?;
    Ok((settings, config))
}
