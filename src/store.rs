//! Unified `SQLite` store for archived content.
//!
//! Two databases: the main content database (users, posts, media) and a
//! separate favorites database, so user-specific state survives a full
//! re-ingest of the archive. All reads and writes against a handle are
//! serialized by one mutex per handle; there is no finer-grained locking
//! and no cross-handle atomicity.
//!
//! Read results flow through a coarse query cache keyed by the exact
//! (SQL, params) pair. Callers that need read-after-write visibility must
//! bypass it; writes that must be immediately visible (favorites, account
//! flags, ingestion) clear it.

use crate::model::{self, Favorite, Media, Post, User, VIDEO_EXTENSIONS};
use crate::source::SourceKind;
use crate::{natural_cmp, natural_sort_desc, Result};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A generic result row.
pub type Row = Vec<Value>;

/// Whole-cache clear threshold for the raw query cache. Coarse on purpose:
/// the workload is read-heavy with a single infrequent writer.
const QUERY_CACHE_MAX: usize = 5000;

/// Text-search caches are dropped wholesale once this old.
const TEXT_CACHE_TTL: Duration = Duration::from_secs(20 * 60);

/// The tables exposed through the generic row query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Users,
    Posts,
    Media,
    Fav,
}

impl Table {
    const fn name(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Posts => "posts",
            Self::Media => "media",
            Self::Fav => "fav",
        }
    }

    const fn is_fav(self) -> bool {
        matches!(self, Self::Fav)
    }
}

type TextCache<T> = HashMap<Vec<String>, (Instant, Vec<T>)>;

/// Unified store over the main and favorites databases.
pub struct Store {
    conn: Mutex<Connection>,
    fav_conn: Mutex<Connection>,
    query_cache: Mutex<HashMap<String, Vec<Row>>>,
    post_text_cache: Mutex<TextCache<(String, String)>>,
    media_text_cache: Mutex<TextCache<String>>,
}

impl Store {
    /// Open (or create) both databases and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if either database cannot be opened or migrated.
    pub fn open(db_path: impl AsRef<Path>, fav_db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = open_connection(db_path.as_ref())?;
        let fav_conn = open_connection(fav_db_path.as_ref())?;
        let store = Self::from_connections(conn, fav_conn)?;
        info!(
            "Opened store: {} / {}",
            db_path.as_ref().display(),
            fav_db_path.as_ref().display()
        );
        Ok(store)
    }

    /// Open both databases in memory (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory databases cannot be initialized.
    pub fn open_memory() -> Result<Self> {
        Self::from_connections(Connection::open_in_memory()?, Connection::open_in_memory()?)
    }

    fn from_connections(conn: Connection, fav_conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
            fav_conn: Mutex::new(fav_conn),
            query_cache: Mutex::new(HashMap::new()),
            post_text_cache: Mutex::new(HashMap::new()),
            media_text_cache: Mutex::new(HashMap::new()),
        };
        store.prepare_schema()?;
        Ok(store)
    }

    fn prepare_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS users (
                uid TEXT PRIMARY KEY,
                user_name TEXT,
                udid TEXT,
                nick TEXT,
                avatar TEXT,
                banner TEXT,
                description TEXT,
                type TEXT,
                update_time NUMBER,
                flagged BOOLEAN DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_users_user_name ON users(user_name);
            CREATE INDEX IF NOT EXISTS idx_users_udid ON users(udid);

            CREATE TABLE IF NOT EXISTS posts (
                post_id TEXT PRIMARY KEY,
                text_content TEXT,
                uid TEXT,
                nick TEXT,
                time TEXT,
                type TEXT,
                url TEXT,
                likes INTEGER,
                reposts INTEGER,
                comments INTEGER,
                embed TEXT,
                isreply BOOLEAN,
                reply_to TEXT,
                real_user TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_posts_uid ON posts(uid);

            CREATE TABLE IF NOT EXISTS media (
                media_id TEXT PRIMARY KEY,
                post_id TEXT,
                file_name TEXT,
                uid TEXT,
                type TEXT,
                time TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_media_post_id ON media(post_id);
            CREATE INDEX IF NOT EXISTS idx_media_uid ON media(uid);
            ",
        )?;
        self.fav_conn.lock().execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS fav (
                post_id TEXT PRIMARY KEY,
                fav_time TEXT
            );
            ",
        )?;
        Ok(())
    }

    // =========================================================================
    // Upserts
    // =========================================================================

    /// Insert or overwrite a user row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        let kind = user.kind.map(SourceKind::as_str).unwrap_or_default();
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO users VALUES (?,?,?,?,?,?,?,?,?,?)",
            params![
                user.uid,
                user.user_name,
                user.udid,
                user.nick,
                user.avatar,
                user.banner,
                user.description,
                kind,
                user.update_time,
                i32::from(user.flagged),
            ],
        )?;
        Ok(())
    }

    /// Insert or overwrite a post row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_post(&self, post: &Post) -> Result<()> {
        let kind = post.kind.map(SourceKind::as_str).unwrap_or_default();
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO posts VALUES (?,?,?,?,?,?,?,?,?,?,?,?,?,?)",
            params![
                post.post_id,
                post.text_content,
                post.uid,
                post.nick,
                post.time,
                kind,
                post.url,
                post.likes,
                post.reposts,
                post.comments,
                post.embed,
                i32::from(post.is_reply),
                post.reply_to,
                post.real_user,
            ],
        )?;
        Ok(())
    }

    /// Insert or overwrite a media row.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_media(&self, media: &Media) -> Result<()> {
        let kind = media.kind.map(SourceKind::as_str).unwrap_or_default();
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO media VALUES (?,?,?,?,?,?)",
            params![
                media.media_id,
                media.post_id,
                media.file_name,
                media.uid,
                kind,
                media.time,
            ],
        )?;
        Ok(())
    }

    // =========================================================================
    // Generic queries
    // =========================================================================

    /// All rows of `table` matching a conjunction of equality predicates.
    ///
    /// Results come from the query cache unless `use_cache` is false; any
    /// caller whose answer must reflect the latest write (favorite checks,
    /// mid-ingestion reloads) bypasses it. `sort_col` natural-sorts the
    /// result descending by the given column projection.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn query_rows(
        &self,
        table: Table,
        predicates: &[(&str, Value)],
        use_cache: bool,
        sort_col: Option<usize>,
    ) -> Result<Vec<Row>> {
        let (sql, values) = if predicates.is_empty() {
            (format!("SELECT * FROM {}", table.name()), Vec::new())
        } else {
            let clause = predicates
                .iter()
                .map(|(k, _)| format!("{k} = ?"))
                .collect::<Vec<_>>()
                .join(" AND ");
            let values: Vec<Value> = predicates.iter().map(|(_, v)| v.clone()).collect();
            (
                format!("SELECT * FROM {} WHERE {clause}", table.name()),
                values,
            )
        };

        let mut rows = self.raw_query_on(table.is_fav(), &sql, &values, use_cache)?;
        if let Some(col) = sort_col {
            let keys: Vec<String> = rows.iter().map(|r| value_sort_key(r, col)).collect();
            let mut keyed: Vec<(String, Row)> = keys.into_iter().zip(rows).collect();
            natural_sort_desc(&mut keyed, |(k, _)| k.as_str());
            rows = keyed.into_iter().map(|(_, r)| r).collect();
        }
        Ok(rows)
    }

    /// Execute an arbitrary parameterized query against the main database,
    /// through the same cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn raw_query(&self, sql: &str, values: &[Value], use_cache: bool) -> Result<Vec<Row>> {
        self.raw_query_on(false, sql, values, use_cache)
    }

    fn raw_query_on(
        &self,
        fav: bool,
        sql: &str,
        values: &[Value],
        use_cache: bool,
    ) -> Result<Vec<Row>> {
        let cache_key = format!("{}|{sql}|{values:?}", u8::from(fav));

        if use_cache {
            let mut cache = self.query_cache.lock();
            if cache.len() > QUERY_CACHE_MAX {
                debug!("Clearing query cache ({} entries)", cache.len());
                cache.clear();
            } else if let Some(rows) = cache.get(&cache_key) {
                return Ok(rows.clone());
            }
        }

        let rows = {
            let conn = if fav { self.fav_conn.lock() } else { self.conn.lock() };
            let mut stmt = conn.prepare(sql)?;
            let column_count = stmt.column_count();
            let mapped = stmt.query_map(rusqlite::params_from_iter(values.iter()), |r| {
                let mut row = Vec::with_capacity(column_count);
                for i in 0..column_count {
                    row.push(r.get::<_, Value>(i)?);
                }
                Ok(row)
            })?;
            mapped.collect::<std::result::Result<Vec<Row>, _>>()?
        };

        if use_cache {
            self.query_cache.lock().insert(cache_key, rows.clone());
        }
        Ok(rows)
    }

    fn execute_on(&self, fav: bool, sql: &str, values: &[Value]) -> Result<usize> {
        let conn = if fav { self.fav_conn.lock() } else { self.conn.lock() };
        Ok(conn.execute(sql, rusqlite::params_from_iter(values.iter()))?)
    }

    // =========================================================================
    // Typed loads
    // =========================================================================

    /// Load a user by composite key. `bypass_cache` forces a fresh read.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails; a missing row is `Ok(None)`.
    pub fn load_user(&self, uid: &str, bypass_cache: bool) -> Result<Option<User>> {
        let rows = self.query_rows(
            Table::Users,
            &[("uid", Value::from(uid.to_string()))],
            !bypass_cache,
            None,
        )?;
        Ok(rows.first().and_then(|r| User::from_row(r)))
    }

    /// Load a user by bare name, for call sites that lost the source tag.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load_user_by_name(&self, user_name: &str) -> Result<Option<User>> {
        let rows = self.query_rows(
            Table::Users,
            &[("user_name", Value::from(user_name.to_string()))],
            true,
            None,
        )?;
        Ok(rows.first().and_then(|r| User::from_row(r)))
    }

    /// Load a user by source-native durable id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn load_user_by_udid(&self, udid: &str) -> Result<Option<User>> {
        let rows = self.query_rows(
            Table::Users,
            &[("udid", Value::from(udid.to_string()))],
            true,
            None,
        )?;
        Ok(rows.first().and_then(|r| User::from_row(r)))
    }

    /// Load a post by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails; a missing row is `Ok(None)`.
    pub fn load_post(&self, post_id: &str, bypass_cache: bool) -> Result<Option<Post>> {
        let rows = self.query_rows(
            Table::Posts,
            &[("post_id", Value::from(post_id.to_string()))],
            !bypass_cache,
            None,
        )?;
        Ok(rows.first().and_then(|r| Post::from_row(r)))
    }

    /// Load a media row by id. Rows with an empty filename read as missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails; a missing row is `Ok(None)`.
    pub fn load_media(&self, media_id: &str, bypass_cache: bool) -> Result<Option<Media>> {
        let rows = self.query_rows(
            Table::Media,
            &[("media_id", Value::from(media_id.to_string()))],
            !bypass_cache,
            None,
        )?;
        Ok(rows.first().and_then(|r| Media::from_row(r)))
    }

    /// All media rows for one post.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn media_for_post(&self, post_id: &str) -> Result<Vec<Media>> {
        let rows = self.query_rows(
            Table::Media,
            &[("post_id", Value::from(post_id.to_string()))],
            true,
            None,
        )?;
        let mut media: Vec<Media> = rows.iter().filter_map(|r| Media::from_row(r)).collect();
        media.sort_by(|a, b| natural_cmp(&a.media_id, &b.media_id));
        Ok(media)
    }

    /// All users, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_users(&self) -> Result<Vec<User>> {
        let rows = self.query_rows(Table::Users, &[], true, None)?;
        let mut users: Vec<User> = rows.iter().filter_map(|r| User::from_row(r)).collect();
        users.sort_by(|a, b| b.update_time.total_cmp(&a.update_time));
        Ok(users)
    }

    /// Mark an account as one the orchestrator could not refresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn flag_user(&self, user_name: &str, kind: SourceKind) -> Result<()> {
        let uid = model::make_uid(&user_name.to_lowercase(), kind);
        info!("Flagging user {uid}");
        self.execute_on(
            false,
            "UPDATE users SET flagged = 1 WHERE uid = ?",
            &[Value::from(uid)],
        )?;
        self.clear_cache();
        self.commit()
    }

    // =========================================================================
    // Text search
    // =========================================================================

    /// Posts whose searchable text contains every query token, newest
    /// first. Returns `(post_id, time)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn query_posts_by_text(&self, text: &str) -> Result<Vec<(String, String)>> {
        let words = tokenize(text);
        if words.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(hit) = take_fresh(&self.post_text_cache, &words) {
            debug!("Using cached post query for {words:?}");
            return Ok(hit);
        }
        info!("Querying posts by text: {words:?}");

        let clause = like_clause(words.len());
        let sql = format!("SELECT post_id, time FROM posts WHERE {clause}");
        let values = like_params(&words);
        let rows = self.raw_query(&sql, &values, true)?;

        let mut result: Vec<(String, String)> = rows
            .iter()
            .filter_map(|r| Some((value_text(r, 0)?, value_text(r, 1)?)))
            .collect();
        natural_sort_desc(&mut result, |(_, time)| time.as_str());

        self.post_text_cache
            .lock()
            .insert(words, (Instant::now(), result.clone()));
        Ok(result)
    }

    /// Video media ids whose owning post matches every query token, newest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn query_media_by_text(&self, text: &str) -> Result<Vec<String>> {
        let words = tokenize(text);
        if words.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(hit) = take_fresh(&self.media_text_cache, &words) {
            debug!("Using cached media query for {words:?}");
            return Ok(hit);
        }
        info!("Querying media by text: {words:?}");

        let video_filter = VIDEO_EXTENSIONS
            .iter()
            .map(|ext| format!("file_name LIKE '%.{ext}'"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let clause = like_clause(words.len());
        let sql = format!(
            "SELECT media_id, time FROM media WHERE ({video_filter}) \
             AND post_id IN (SELECT post_id FROM posts WHERE {clause})"
        );
        let values = like_params(&words);
        let rows = self.raw_query(&sql, &values, true)?;

        let mut keyed: Vec<(String, String)> = rows
            .iter()
            .filter_map(|r| Some((value_text(r, 0)?, value_text(r, 1)?)))
            .collect();
        natural_sort_desc(&mut keyed, |(_, time)| time.as_str());
        let result: Vec<String> = keyed.into_iter().map(|(id, _)| id).collect();

        self.media_text_cache
            .lock()
            .insert(words, (Instant::now(), result.clone()));
        Ok(result)
    }

    // =========================================================================
    // Favorites
    // =========================================================================

    /// All favorites, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get_favorites(&self) -> Result<Vec<Favorite>> {
        let rows = self.query_rows(Table::Fav, &[], false, None)?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                Some(Favorite {
                    post_id: value_text(r, 0)?,
                    fav_time: value_text(r, 1)?,
                })
            })
            .collect())
    }

    /// Whether a post is favorited. Always reads fresh.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn is_favorite(&self, post_id: &str) -> Result<bool> {
        let rows = self.query_rows(
            Table::Fav,
            &[("post_id", Value::from(post_id.to_string()))],
            false,
            None,
        )?;
        Ok(!rows.is_empty())
    }

    /// Favorite a post. Ignored when the post does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn add_favorite(&self, post_id: &str) -> Result<()> {
        if self.load_post(post_id, true)?.is_none() {
            return Ok(());
        }
        let fav_time = chrono::Local::now().format("%a %b %e %H:%M:%S %Y").to_string();
        self.execute_on(
            true,
            "INSERT OR REPLACE INTO fav VALUES (?, ?)",
            &[Value::from(post_id.to_string()), Value::from(fav_time)],
        )?;
        self.commit()
    }

    /// Remove a favorite.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn remove_favorite(&self, post_id: &str) -> Result<()> {
        self.execute_on(
            true,
            "DELETE FROM fav WHERE post_id = ?",
            &[Value::from(post_id.to_string())],
        )?;
        self.commit()
    }

    /// Toggle a favorite; returns true when the post is now favorited.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn toggle_favorite(&self, post_id: &str) -> Result<bool> {
        if self.is_favorite(post_id)? {
            self.remove_favorite(post_id)?;
            Ok(false)
        } else {
            self.add_favorite(post_id)?;
            Ok(true)
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Flush both databases' WAL journals.
    ///
    /// # Errors
    ///
    /// Returns an error if a checkpoint fails.
    pub fn commit(&self) -> Result<()> {
        // In-memory databases (tests) have no WAL to checkpoint.
        let _ = self
            .conn
            .lock()
            .execute_batch("PRAGMA wal_checkpoint(PASSIVE)");
        let _ = self
            .fav_conn
            .lock()
            .execute_batch("PRAGMA wal_checkpoint(PASSIVE)");
        Ok(())
    }

    /// Drop every cached query result. Called after writes that must become
    /// visible to cached readers.
    pub fn clear_cache(&self) {
        self.query_cache.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn query_cache_len(&self) -> usize {
        self.query_cache.lock().len()
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
        ",
    )?;
    Ok(conn)
}

/// Split a search query into its deduplicated token set. A leading `u/`
/// (pasted Reddit handles) is stripped. The set is sorted so it can key the
/// text caches.
fn tokenize(text: &str) -> Vec<String> {
    let mut words: Vec<String> = text
        .split_whitespace()
        .map(|w| w.strip_prefix("u/").unwrap_or(w).to_string())
        .filter(|w| !w.is_empty())
        .collect();
    words.sort();
    words.dedup();
    words
}

fn like_clause(tokens: usize) -> String {
    std::iter::repeat("(text_content || ' ' || nick || real_user) LIKE ?")
        .take(tokens)
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn like_params(words: &[String]) -> Vec<Value> {
    words
        .iter()
        .map(|w| Value::from(format!("%{w}%")))
        .collect()
}

/// Fetch a fresh cached result; a stale hit drops the entire cache, per the
/// original's coarse TTL policy.
fn take_fresh<T: Clone>(cache: &Mutex<TextCache<T>>, words: &[String]) -> Option<Vec<T>> {
    let mut cache = cache.lock();
    if let Some((stamp, hit)) = cache.get(words) {
        if stamp.elapsed() > TEXT_CACHE_TTL {
            info!("Clearing outdated text query cache");
            cache.clear();
            return None;
        }
        return Some(hit.clone());
    }
    None
}

fn value_text(row: &Row, idx: usize) -> Option<String> {
    match row.get(idx) {
        Some(Value::Text(s)) => Some(s.clone()),
        Some(Value::Integer(i)) => Some(i.to_string()),
        Some(Value::Real(f)) => Some(f.to_string()),
        Some(Value::Null) => Some(String::new()),
        _ => None,
    }
}

fn value_sort_key(row: &Row, idx: usize) -> String {
    value_text(row, idx).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Media, Post, User};

    fn seeded_store() -> Store {
        let store = Store::open_memory().unwrap();

        let mut alice = User::new("alice", SourceKind::X);
        alice.nick = "Alice".to_string();
        alice.description = "archivist".to_string();
        alice.update_time = 1_700_000_000.0;
        store.upsert_user(&alice).unwrap();

        let mut p1 = Post::new("100", "alice", SourceKind::X);
        p1.text_content = "hello world from alice".to_string();
        p1.nick = "Alice".to_string();
        p1.time = "2024-01-02 09:00:00".to_string();
        p1.likes = 5;
        store.upsert_post(&p1).unwrap();

        let mut p2 = Post::new("101", "alice", SourceKind::X);
        p2.text_content = "Hello Bob, world is big".to_string();
        p2.nick = "Alice".to_string();
        p2.time = "2024-01-10 09:00:00".to_string();
        p2.likes = 50;
        store.upsert_post(&p2).unwrap();

        let mut m1 = Media::new("101_1", "101", "alice", SourceKind::X);
        m1.file_name = "101_1.mp4".to_string();
        m1.time = p2.time.clone();
        store.upsert_media(&m1).unwrap();

        store
    }

    #[test]
    fn user_upsert_then_load_round_trips() {
        let store = Store::open_memory().unwrap();
        let mut user = User::new("Some_Fox", SourceKind::Fa);
        user.nick = "Some Fox".to_string();
        user.avatar = "https://a.example/avatar.png".to_string();
        user.update_time = 1_720_000_000.5;
        user.flagged = true;
        store.upsert_user(&user).unwrap();

        let loaded = store.load_user("some_fox@fa", true).unwrap().unwrap();
        assert_eq!(loaded.uid, "some_fox@fa");
        assert_eq!(loaded.user_name, "some_fox");
        assert_eq!(loaded.nick, "Some Fox");
        assert_eq!(loaded.avatar, user.avatar);
        assert!((loaded.update_time - user.update_time).abs() < f64::EPSILON);
        assert!(loaded.flagged);
    }

    #[test]
    fn post_upsert_then_load_round_trips() {
        let store = Store::open_memory().unwrap();
        let mut post = Post::new("3kabc123", "alice.bsky.social", SourceKind::Bsky);
        post.text_content = "some text".to_string();
        post.time = "2024-06-01 12:30:15".to_string();
        post.likes = 7;
        post.is_reply = true;
        post.reply_to = "3xyz@did:plc:abc".to_string();
        post.embed = "at://did:plc:other/app.bsky.feed.post/3aaa".to_string();
        store.upsert_post(&post).unwrap();

        let loaded = store.load_post("3kabc123", true).unwrap().unwrap();
        assert_eq!(loaded.uid, "alice.bsky.social@bsky");
        assert_eq!(loaded.user_name, "alice.bsky.social");
        assert_eq!(loaded.kind, Some(SourceKind::Bsky));
        assert!(loaded.is_reply);
        assert_eq!(loaded.reply_to, post.reply_to);
        assert_eq!(loaded.embed, post.embed);
    }

    #[test]
    fn upsert_is_idempotent_and_replaces() {
        let store = seeded_store();
        let mut post = store.load_post("100", true).unwrap().unwrap();
        store.upsert_post(&post).unwrap();

        let rows = store
            .query_rows(
                Table::Posts,
                &[("post_id", Value::from("100".to_string()))],
                false,
                None,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);

        post.likes = 9;
        store.upsert_post(&post).unwrap();
        assert_eq!(store.load_post("100", true).unwrap().unwrap().likes, 9);
    }

    #[test]
    fn query_rows_conjunction_and_sort() {
        let store = seeded_store();
        let rows = store
            .query_rows(
                Table::Posts,
                &[
                    ("uid", Value::from("alice@x".to_string())),
                    ("type", Value::from("x".to_string())),
                ],
                false,
                Some(4),
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        // Sorted descending by the time column.
        assert_eq!(rows[0][0], Value::Text("101".to_string()));
        assert_eq!(rows[1][0], Value::Text("100".to_string()));
    }

    #[test]
    fn cached_reads_go_stale_until_bypassed() {
        let store = seeded_store();
        // Prime the cache.
        let rows = store
            .query_rows(Table::Posts, &[], true, None)
            .unwrap();
        assert_eq!(rows.len(), 2);

        let mut p3 = Post::new("102", "alice", SourceKind::X);
        p3.time = "2024-02-01 00:00:00".to_string();
        store.upsert_post(&p3).unwrap();

        // Cached read still sees the old result set.
        let rows = store.query_rows(Table::Posts, &[], true, None).unwrap();
        assert_eq!(rows.len(), 2);

        // Bypass sees the write; clearing fixes the cached path too.
        let rows = store.query_rows(Table::Posts, &[], false, None).unwrap();
        assert_eq!(rows.len(), 3);
        store.clear_cache();
        let rows = store.query_rows(Table::Posts, &[], true, None).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn query_cache_clears_past_threshold() {
        let store = Store::open_memory().unwrap();
        for i in 0..=QUERY_CACHE_MAX {
            store
                .raw_query(
                    "SELECT ?",
                    &[Value::from(i64::try_from(i).unwrap())],
                    true,
                )
                .unwrap();
        }
        assert!(store.query_cache_len() > QUERY_CACHE_MAX);
        // The next cached query trips the whole-cache clear.
        store
            .raw_query("SELECT 'one more'", &[], true)
            .unwrap();
        assert_eq!(store.query_cache_len(), 1);
    }

    #[test]
    fn text_search_requires_every_token() {
        let store = seeded_store();
        let hits = store.query_posts_by_text("hello world").unwrap();
        assert_eq!(hits.len(), 2);
        // Descending by time.
        assert_eq!(hits[0].0, "101");
        assert_eq!(hits[1].0, "100");

        // Case-insensitive, and "bob" only matches the second post.
        let hits = store.query_posts_by_text("HELLO bob").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "101");

        let hits = store.query_posts_by_text("absent").unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn text_search_strips_reddit_handle_prefix() {
        assert_eq!(tokenize("u/alice hello"), vec!["alice", "hello"]);
        // Only the literal prefix goes, not every leading u.
        assert_eq!(tokenize("user"), vec!["user"]);
        assert_eq!(tokenize("b a b"), vec!["a", "b"]);
    }

    #[test]
    fn media_text_search_restricts_to_video() {
        let store = seeded_store();
        let mut image = Media::new("101_2", "101", "alice", SourceKind::X);
        image.file_name = "101_2.jpg".to_string();
        image.time = "2024-01-10 09:00:00".to_string();
        store.upsert_media(&image).unwrap();

        let hits = store.query_media_by_text("bob").unwrap();
        assert_eq!(hits, vec!["101_1".to_string()]);
    }

    #[test]
    fn favorite_toggle_round_trips_and_is_immediately_visible() {
        let store = seeded_store();
        assert!(!store.is_favorite("100").unwrap());

        assert!(store.toggle_favorite("100").unwrap());
        assert!(store.is_favorite("100").unwrap());

        assert!(!store.toggle_favorite("100").unwrap());
        assert!(!store.is_favorite("100").unwrap());
        assert!(store.get_favorites().unwrap().is_empty());
    }

    #[test]
    fn favoriting_a_missing_post_is_a_no_op() {
        let store = seeded_store();
        store.add_favorite("does-not-exist").unwrap();
        assert!(!store.is_favorite("does-not-exist").unwrap());
    }

    #[test]
    fn flag_user_sets_the_flag() {
        let store = seeded_store();
        store.flag_user("alice", SourceKind::X).unwrap();
        let user = store.load_user("alice@x", true).unwrap().unwrap();
        assert!(user.flagged);
    }

    #[test]
    fn media_for_post_sorts_naturally() {
        let store = seeded_store();
        for (id, name) in [("101_10", "101_10.jpg"), ("101_2", "101_2.jpg")] {
            let mut media = Media::new(id, "101", "alice", SourceKind::X);
            media.file_name = name.to_string();
            store.upsert_media(&media).unwrap();
        }
        let media = store.media_for_post("101").unwrap();
        let ids: Vec<&str> = media.iter().map(|m| m.media_id.as_str()).collect();
        assert_eq!(ids, vec!["101_1", "101_2", "101_10"]);
    }
}
