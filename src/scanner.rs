//! Filesystem ingestion: fold downloaded sidecars and media into the store.
//!
//! Three passes per source (users, posts, media), each idempotent and
//! independently restartable. Entities are created on first sight and
//! upserted thereafter; a malformed sidecar skips that one item unless
//! strict mode is on. Every pass ends by committing and clearing the read
//! cache so later passes and the serving layer see the new rows.

use crate::config::Config;
use crate::error::VaultError;
use crate::model::{self, Media, Post, User};
use crate::normalize;
use crate::source::SourceKind;
use crate::store::Store;
use crate::{natural_sort_desc, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use walkdir::WalkDir;

static EPOCH_IN_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{10}").unwrap());
static REDDIT_MEDIA_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9]{6,8}_\d").unwrap());

/// Media filename stems that are external-host markers, not post ids.
const EXTERNAL_HOSTS: &[&str] = &["redgifs", "tumblr", "imgur", "gfycat"];

/// Filesystem scanner over one configuration's source roots.
pub struct Scanner<'a> {
    store: &'a Store,
    config: &'a Config,
    strict: bool,
    fetch_remote_metadata: bool,
}

impl<'a> Scanner<'a> {
    #[must_use]
    pub fn new(store: &'a Store, config: &'a Config) -> Self {
        Self {
            store,
            config,
            strict: config.service.strict,
            fetch_remote_metadata: true,
        }
    }

    /// Disable network metadata enrichment (tests, offline ingestion).
    #[must_use]
    pub fn without_remote_metadata(mut self) -> Self {
        self.fetch_remote_metadata = false;
        self
    }

    /// Run all three passes, optionally scoped to one user directory.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures, or on the first malformed
    /// sidecar in strict mode.
    pub fn scan_all(&self, kind: SourceKind, user_name: Option<&str>) -> Result<()> {
        self.scan_users(kind, user_name)?;
        self.scan_posts(kind, user_name)?;
        self.scan_media(kind, user_name)?;
        Ok(())
    }

    /// User pass: ensure a user row per directory under the source root.
    ///
    /// An existing row short-circuits unless a single user is named (which
    /// forces a refresh). The newest user-describing sidecar wins; with no
    /// sidecar at all a minimal placeholder row is written.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures, or per strict mode.
    pub fn scan_users(&self, kind: SourceKind, user_name: Option<&str>) -> Result<()> {
        let root = self.config.root(kind);
        let user_names = self.list_user_dirs(&root, user_name)?;
        let single = user_names.len() == 1 && user_name.is_some();

        for name in &user_names {
            if let Err(e) = self.scan_one_user(kind, &root, name, single) {
                if self.strict {
                    return Err(e);
                }
                error!("Error loading user {name}: {e}");
            }
        }
        self.store.commit()?;
        self.store.clear_cache();
        Ok(())
    }

    fn scan_one_user(
        &self,
        kind: SourceKind,
        root: &Path,
        name: &str,
        single: bool,
    ) -> Result<()> {
        let user_dir = root.join(name);
        info!("scanning for user {name}");

        let mut user = User::new(name, kind);
        let existing = self.store.load_user(&user.uid, true)?;
        if existing.is_some() && !single {
            return Ok(());
        }

        match self.select_user_sidecar(kind, &user_dir)? {
            Some(sidecar) => {
                info!("found user json file: {sidecar}");
                let json = read_json(&user_dir.join(&sidecar))?;
                let about = if kind == SourceKind::Reddit && self.fetch_remote_metadata {
                    normalize::fetch_reddit_about(name)
                } else {
                    None
                };
                normalize::populate_user(&mut user, &json, about.as_ref())?;
                user.update_time = if single {
                    now_epoch()
                } else {
                    dir_mtime_epoch(&user_dir)
                };
            }
            None => {
                // No sidecar at all: placeholder row from the directory name.
                user.nick = name.to_lowercase();
                user.update_time = now_epoch();
            }
        }
        self.store.upsert_user(&user)
    }

    /// Post pass: one row per post sidecar matching the source's filename
    /// pattern. Already-ingested posts are skipped unless a single user is
    /// named.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures, or per strict mode.
    pub fn scan_posts(&self, kind: SourceKind, user_name: Option<&str>) -> Result<()> {
        let root = self.config.root(kind);
        let user_names = self.list_user_dirs(&root, user_name)?;
        let single = user_names.len() == 1 && user_name.is_some();

        for (cnt, name) in user_names.iter().enumerate() {
            info!(
                "[{}/{}] scanning for posts of user {name}",
                cnt + 1,
                user_names.len()
            );
            let user_dir = root.join(name);
            let files = list_files(&user_dir);
            let file_re = kind.post_file_regex();
            for file in files.iter().filter(|f| f.ends_with(".json")) {
                if !file_re.is_match(file) {
                    continue;
                }
                let Some(post_id) = kind.extract_post_id(file) else {
                    warn!("no post id in sidecar name: {file}");
                    continue;
                };
                if self.store.load_post(&post_id, false)?.is_some() && !single {
                    continue;
                }
                let path = user_dir.join(file);
                if let Err(e) = self.ingest_post_sidecar(kind, name, &post_id, &path) {
                    if self.strict {
                        return Err(e);
                    }
                    error!("Error loading {}: {e}", path.display());
                }
            }
        }
        self.store.commit()?;
        self.store.clear_cache();
        Ok(())
    }

    fn ingest_post_sidecar(
        &self,
        kind: SourceKind,
        user_name: &str,
        post_id: &str,
        path: &Path,
    ) -> Result<()> {
        let json = read_json(path)?;
        let mut post = Post::new(post_id, user_name, kind);
        normalize::populate_post(&mut post, &json)?;
        self.store.upsert_post(&post)
    }

    /// Media pass: one row per media file, with the owning post resolved
    /// from the filename (or the per-media sidecar for FurAffinity). A
    /// missing owning post gets a synthesized stand-in so media is never
    /// relationally orphaned.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures, or per strict mode.
    pub fn scan_media(&self, kind: SourceKind, user_name: Option<&str>) -> Result<()> {
        let root = self.config.root(kind);
        let user_names = self.list_user_dirs(&root, user_name)?;

        for (cnt, name) in user_names.iter().enumerate() {
            info!(
                "[{}/{}] scanning for media of user {name}",
                cnt + 1,
                user_names.len()
            );
            let user_dir = root.join(name);
            let files = list_files(&user_dir);
            for file in files.iter().filter(|f| model::is_media_file(f)) {
                if let Err(e) = self.ingest_media_file(kind, name, &user_dir, file) {
                    if self.strict {
                        return Err(e);
                    }
                    error!("Error loading media {file}: {e}");
                }
            }
        }
        self.store.commit()?;
        self.store.clear_cache();
        Ok(())
    }

    fn ingest_media_file(
        &self,
        kind: SourceKind,
        user_name: &str,
        user_dir: &Path,
        file: &str,
    ) -> Result<()> {
        let (media_id, related_post_id) = match kind {
            SourceKind::Fa => {
                let media_id = file.to_string();
                let sidecar = user_dir.join(format!("{file}.json"));
                let related = if sidecar.exists() {
                    match read_json(&sidecar).map(|json| id_from_json(&json)) {
                        Ok(Some(id)) => id,
                        Ok(None) | Err(_) if self.strict => {
                            return Err(VaultError::parse_error(
                                sidecar.display().to_string(),
                                "no usable post id",
                            ));
                        }
                        Ok(None) => {
                            warn!("no post id in sidecar: {}", sidecar.display());
                            format!("0{file}")
                        }
                        Err(e) => {
                            error!("Error loading {}: {e}", sidecar.display());
                            format!("0{file}")
                        }
                    }
                } else {
                    warn!("no json file found for media: {}", sidecar.display());
                    format!("0{file}")
                };
                (media_id, related)
            }
            _ => {
                let media_id = file.split('.').next().unwrap_or(file).to_string();
                let mut related = kind.extract_post_id(file).unwrap_or_else(|| {
                    warn!("no post id found in filename: {file}");
                    format!("0{file}")
                });
                if EXTERNAL_HOSTS.contains(&related.as_str()) {
                    related = format!("-1{user_name}_{related}");
                }
                (media_id, related)
            }
        };

        let post = match self.store.load_post(&related_post_id, false)? {
            Some(post) => post,
            None => {
                warn!("media {media_id} has no related post {related_post_id} in database");
                let post =
                    synthesize_media_post(kind, user_name, &related_post_id, &media_id, file, user_dir);
                self.store.upsert_post(&post)?;
                post
            }
        };

        let mut media = Media::new(&media_id, &related_post_id, user_name, kind);
        media.file_name = file.to_string();
        media.time.clone_from(&post.time);
        if self.store.load_media(&media_id, false)?.is_none() {
            self.store.upsert_media(&media)?;
        }
        Ok(())
    }

    fn select_user_sidecar(&self, kind: SourceKind, user_dir: &Path) -> Result<Option<String>> {
        if let Some(fixed) = kind.user_sidecar() {
            return Ok(user_dir.join(fixed).exists().then(|| fixed.to_string()));
        }
        let mut json_files: Vec<String> = list_files(user_dir)
            .into_iter()
            .filter(|f| f.ends_with(".json"))
            .collect();
        natural_sort_desc(&mut json_files, String::as_str);
        Ok(json_files.into_iter().next())
    }

    fn list_user_dirs(&self, root: &Path, user_name: Option<&str>) -> Result<Vec<String>> {
        if !root.is_dir() {
            warn!("source root {} does not exist", root.display());
            return Ok(Vec::new());
        }
        match user_name {
            Some(name) => {
                let dir = root.join(name);
                if !dir.exists() {
                    warn!("{name} does not exist under {}", root.display());
                    return Ok(Vec::new());
                }
                if !dir.is_dir() {
                    warn!("{name} is not a directory");
                    return Ok(Vec::new());
                }
                Ok(vec![name.to_string()])
            }
            None => {
                let mut names = Vec::new();
                for entry in WalkDir::new(root).min_depth(1).max_depth(1) {
                    let entry = entry.map_err(|e| {
                        VaultError::command(format!("walking {}: {e}", root.display()))
                    })?;
                    if !entry.file_type().is_dir() {
                        continue;
                    }
                    if let Some(name) = entry.file_name().to_str() {
                        if !name.starts_with('.') {
                            names.push(name.to_string());
                        }
                    }
                }
                names.sort();
                Ok(names)
            }
        }
    }
}

/// Stand-in post for a media file whose real post was never downloaded.
/// Best-effort timestamp: a 10-digit epoch embedded in the media id when it
/// lies in the past, else the file's mtime.
fn synthesize_media_post(
    kind: SourceKind,
    user_name: &str,
    post_id: &str,
    media_id: &str,
    file: &str,
    user_dir: &Path,
) -> Post {
    let mut post = Post::new(post_id, user_name, kind);
    post.text_content = file.to_string();

    let guessed = EPOCH_IN_ID
        .find(media_id)
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .filter(|&epoch| epoch <= chrono::Utc::now().timestamp());
    post.time = match guessed {
        Some(epoch) => chrono::DateTime::from_timestamp(epoch, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
        None => {
            #[allow(clippy::cast_possible_truncation)]
            let mtime = file_mtime_epoch(&user_dir.join(file)) as i64;
            chrono::DateTime::from_timestamp(mtime, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default()
        }
    };

    if kind == SourceKind::Reddit && REDDIT_MEDIA_SUFFIX.is_match(media_id) {
        let base_id = media_id.split('_').next().unwrap_or(media_id);
        post.url = kind.post_url(user_name, base_id);
    } else {
        post.url = String::new();
    }
    post
}

fn id_from_json(json: &serde_json::Value) -> Option<String> {
    match &json["id"] {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path).map_err(|source| VaultError::PathError {
        operation: "read",
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content)
        .map_err(|e| VaultError::parse_error(path.display().to_string(), e.to_string()))
}

fn list_files(dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).into_iter().flatten() {
        if entry.file_type().is_file() {
            if let Some(name) = entry.file_name().to_str() {
                files.push(name.to_string());
            }
        }
    }
    files.sort();
    files
}

fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn dir_mtime_epoch(path: &Path) -> f64 {
    file_mtime_epoch(path)
}

fn file_mtime_epoch(path: &Path) -> f64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or_else(now_epoch, |d| d.as_secs_f64())
}
