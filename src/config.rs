//! Configuration system for feedvault.
//!
//! Layered sources, lowest to highest priority:
//!
//! 1. **Compiled defaults**
//! 2. **User config file** - `~/.config/feedvault/config.toml` (or `--config`)
//! 3. **Environment variables** - `FV_*` prefix
//!
//! # Example Configuration File
//!
//! ```toml
//! [paths]
//! db = "~/.local/share/feedvault/feedvault.db"
//!
//! [paths.roots]
//! x = "~/twitter"
//! bsky = "~/bluesky"
//! reddit = "~/reddit"
//! fa = "~/furaffinity"
//!
//! [downloader]
//! gallery_dl = "~/venv/bin/gallery-dl"
//! cookies_x = "./cookies.txt"
//!
//! [service]
//! items_per_page = 30
//! cache_interval_secs = 1800
//! ```

use crate::source::SourceKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main configuration structure for feedvault.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path-related configuration.
    pub paths: PathsConfig,
    /// External downloader configuration.
    pub downloader: DownloaderConfig,
    /// Service loop configuration.
    pub service: ServiceConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Per-source filesystem roots plus database locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Path to the main `SQLite` database file.
    /// Environment variable: `FV_DB`
    pub db: Option<PathBuf>,

    /// Path to the favorites database file.
    /// Environment variable: `FV_FAV_DB`
    pub fav_db: Option<PathBuf>,

    /// Per-source archive roots.
    pub roots: RootsConfig,
}

/// Archive root directory per source type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RootsConfig {
    pub x: PathBuf,
    pub bsky: PathBuf,
    pub reddit: PathBuf,
    pub fa: PathBuf,
}

/// External downloader invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// gallery-dl binary; plain `gallery-dl` resolved from PATH when unset.
    pub gallery_dl: Option<PathBuf>,

    /// gallery-dl config profile for regular jobs.
    pub config_profile: PathBuf,

    /// gallery-dl config profile for media-only jobs.
    pub media_only_profile: PathBuf,

    /// Browser cookie export passed to gallery-dl for X downloads.
    pub cookies_x: Option<PathBuf>,

    /// Dedicated FurAffinity scraper program.
    pub fa_scraper: Option<PathBuf>,
}

/// Service loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Page size for serving-layer views.
    pub items_per_page: usize,

    /// Seconds between cache-builder wakeups.
    pub cache_interval_secs: u64,

    /// Enqueue incremental refresh jobs for known accounts.
    pub update_daemon: bool,

    /// Abort ingestion on the first malformed sidecar instead of skipping.
    pub strict: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Append log output to this file in addition to stderr.
    pub file: Option<PathBuf>,
}

impl Default for RootsConfig {
    fn default() -> Self {
        Self {
            x: PathBuf::from("~/twitter"),
            bsky: PathBuf::from("~/bluesky"),
            reddit: PathBuf::from("~/reddit"),
            fa: PathBuf::from("~/furaffinity"),
        }
    }
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            gallery_dl: None,
            config_profile: PathBuf::from("gallery-dl-config.json"),
            media_only_profile: PathBuf::from("gallery-dl-config-media-only.json"),
            cookies_x: None,
            fa_scraper: None,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            items_per_page: 30,
            cache_interval_secs: 30 * 60,
            update_daemon: false,
            strict: false,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// When `path` is given it is used instead of the standard user config
    /// location. Environment variables are applied on top either way.
    #[must_use]
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = Self::default();

        let file_config = match path {
            Some(p) => Self::load_from_file(p),
            None => Self::user_config_path().and_then(|p| Self::load_from_file(&p)),
        };
        if let Some(file_config) = file_config {
            config = file_config;
        }

        config.apply_env_overrides();
        debug!("Configuration loaded: {:?}", config);
        config
    }

    /// Load configuration from a specific file.
    #[must_use]
    pub fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            debug!("Config file not found: {}", path.display());
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    info!("Loaded config from: {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Get the path to the user configuration file.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("feedvault").join("config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(db) = std::env::var("FV_DB") {
            self.paths.db = Some(PathBuf::from(db));
        }
        if let Ok(db) = std::env::var("FV_FAV_DB") {
            self.paths.fav_db = Some(PathBuf::from(db));
        }
        if let Ok(root) = std::env::var("FV_ROOT_X") {
            self.paths.roots.x = PathBuf::from(root);
        }
        if let Ok(root) = std::env::var("FV_ROOT_BSKY") {
            self.paths.roots.bsky = PathBuf::from(root);
        }
        if let Ok(root) = std::env::var("FV_ROOT_REDDIT") {
            self.paths.roots.reddit = PathBuf::from(root);
        }
        if let Ok(root) = std::env::var("FV_ROOT_FA") {
            self.paths.roots.fa = PathBuf::from(root);
        }
        if let Ok(bin) = std::env::var("FV_GALLERY_DL") {
            self.downloader.gallery_dl = Some(PathBuf::from(bin));
        }
        if std::env::var("FV_STRICT").is_ok() {
            self.service.strict = true;
        }
    }

    /// Get the main database path, using defaults if not configured.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.paths
            .db
            .as_deref()
            .map_or_else(
                || crate::default_data_dir().join(crate::DEFAULT_DB_NAME),
                expand_tilde,
            )
    }

    /// Get the favorites database path, using defaults if not configured.
    #[must_use]
    pub fn fav_db_path(&self) -> PathBuf {
        self.paths
            .fav_db
            .as_deref()
            .map_or_else(
                || crate::default_data_dir().join(crate::DEFAULT_FAV_DB_NAME),
                expand_tilde,
            )
    }

    /// Archive root directory for one source, tilde-expanded.
    #[must_use]
    pub fn root(&self, kind: SourceKind) -> PathBuf {
        let raw = match kind {
            SourceKind::X => &self.paths.roots.x,
            SourceKind::Bsky => &self.paths.roots.bsky,
            SourceKind::Reddit => &self.paths.roots.reddit,
            SourceKind::Fa => &self.paths.roots.fa,
        };
        expand_tilde(raw)
    }

    /// gallery-dl binary path, tilde-expanded; bare `gallery-dl` when unset.
    #[must_use]
    pub fn gallery_dl_bin(&self) -> PathBuf {
        self.downloader
            .gallery_dl
            .as_deref()
            .map_or_else(|| PathBuf::from("gallery-dl"), expand_tilde)
    }
}

/// Expand a leading `~/` against the user's home directory.
#[must_use]
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.service.items_per_page, 30);
        assert_eq!(config.service.cache_interval_secs, 1800);
        assert!(!config.service.strict);
        assert_eq!(
            config.downloader.config_profile,
            PathBuf::from("gallery-dl-config.json")
        );
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(
            config.service.items_per_page,
            parsed.service.items_per_page
        );
        assert_eq!(config.paths.roots.x, parsed.paths.roots.x);
    }

    #[test]
    fn load_from_file_overrides_roots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[paths.roots]
x = "/srv/archive/x"

[service]
items_per_page = 10
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.paths.roots.x, PathBuf::from("/srv/archive/x"));
        assert_eq!(config.service.items_per_page, 10);
        // Untouched sections keep their defaults.
        assert_eq!(config.paths.roots.bsky, PathBuf::from("~/bluesky"));
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(
            expand_tilde(Path::new("/srv/archive")),
            PathBuf::from("/srv/archive")
        );
    }
}
