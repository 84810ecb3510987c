//! Entity types for the unified archive store.
//!
//! Users, posts, and media share one identity convention: users are keyed by
//! the composite `"{user_name}@{source}"` string (`uid`), posts and media by
//! their source-native ids, which are unique only within a source.

use crate::source::SourceKind;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

/// Known video extensions.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "m4v"];
/// Known audio extensions.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg"];
/// Known image extensions.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];
/// Known flash extensions.
pub const FLASH_EXTENSIONS: &[&str] = &["swf"];
/// Known attachment extensions.
pub const ATTACHMENT_EXTENSIONS: &[&str] = &["pdf", "epub", "txt", "doc", "docx"];

/// Compose the `"{user_name}@{source}"` composite user key.
#[must_use]
pub fn make_uid(user_name: &str, kind: SourceKind) -> String {
    format!("{user_name}@{kind}")
}

/// Split a composite key back into `(user_name, source_tag)`. Keys without
/// an `@` yield the whole string as the name.
#[must_use]
pub fn split_uid(uid: &str) -> (&str, Option<&str>) {
    match uid.rsplit_once('@') {
        Some((name, tag)) => (name, Some(tag)),
        None => (uid, None),
    }
}

/// File extension (after the last dot), or empty.
#[must_use]
pub fn extension_of(file_name: &str) -> &str {
    file_name.rsplit_once('.').map_or("", |(_, ext)| ext)
}

fn has_extension_in(file_name: &str, set: &[&str]) -> bool {
    let ext = extension_of(file_name);
    set.iter().any(|s| s.eq_ignore_ascii_case(ext))
}

/// Whether a filename is any recognized media kind.
#[must_use]
pub fn is_media_file(file_name: &str) -> bool {
    has_extension_in(file_name, VIDEO_EXTENSIONS)
        || has_extension_in(file_name, AUDIO_EXTENSIONS)
        || has_extension_in(file_name, IMAGE_EXTENSIONS)
        || has_extension_in(file_name, FLASH_EXTENSIONS)
        || has_extension_in(file_name, ATTACHMENT_EXTENSIONS)
}

/// An archived account (or subreddit, for Reddit sources).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub uid: String,
    pub user_name: String,
    /// Source-native durable id; equals `user_name` except for sources with
    /// rename-stable ids (Bluesky DIDs).
    pub udid: String,
    pub nick: String,
    pub avatar: String,
    pub banner: String,
    pub description: String,
    pub kind: Option<SourceKind>,
    /// Epoch seconds of the last refresh.
    pub update_time: f64,
    /// Set when the orchestrator could not refresh this account.
    pub flagged: bool,
}

impl User {
    /// New in-memory user identified by name and source.
    #[must_use]
    pub fn new(user_name: &str, kind: SourceKind) -> Self {
        let user_name = user_name.to_lowercase();
        Self {
            uid: make_uid(&user_name, kind),
            udid: user_name.clone(),
            user_name,
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Canonical profile URL.
    #[must_use]
    pub fn url(&self) -> String {
        self.kind
            .map(|k| k.user_url(&self.user_name))
            .unwrap_or_default()
    }

    /// Last-refresh time in the `%Y-%m-%d %H:%M` display form.
    #[must_use]
    pub fn update_time_str(&self) -> String {
        crate::format_epoch_minutes(self.update_time)
    }

    /// Convert a `users` table row. Empty nicks fall back to the user name.
    #[must_use]
    pub fn from_row(row: &[Value]) -> Option<Self> {
        let uid = text(row, 0)?;
        let user_name = text(row, 1)?;
        let kind = SourceKind::parse(&text(row, 7)?);
        let mut nick = text(row, 3)?;
        if nick.is_empty() {
            nick.clone_from(&user_name);
        }
        Some(Self {
            uid,
            user_name,
            udid: text(row, 2)?,
            nick,
            avatar: text(row, 4)?,
            banner: text(row, 5)?,
            description: text(row, 6)?,
            kind,
            update_time: real(row, 8),
            flagged: integer(row, 9) != 0,
        })
    }
}

/// An archived post.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Post {
    pub post_id: String,
    pub text_content: String,
    pub uid: String,
    pub user_name: String,
    pub nick: String,
    /// Source-native display timestamp; ordered by natural sort.
    pub time: String,
    pub kind: Option<SourceKind>,
    pub url: String,
    pub likes: i64,
    pub reposts: i64,
    pub comments: i64,
    /// String encoding of a quoted/embedded post (URL or AT URI); may
    /// dangle.
    pub embed: String,
    pub is_reply: bool,
    /// `"{reply_post_id}@{reply_user_name}"`; may dangle.
    pub reply_to: String,
    /// Actual author where it can differ from the archived account
    /// (Reddit); `"[deleted]"` when unknown there.
    pub real_user: String,
}

impl Post {
    /// New in-memory post owned by `user_name` on `kind`.
    #[must_use]
    pub fn new(post_id: &str, user_name: &str, kind: SourceKind) -> Self {
        let user_name = user_name.to_lowercase();
        Self {
            post_id: post_id.to_string(),
            uid: make_uid(&user_name, kind),
            user_name,
            kind: Some(kind),
            real_user: if kind == SourceKind::Reddit {
                "[deleted]".to_string()
            } else {
                String::new()
            },
            ..Self::default()
        }
    }

    /// Convert a `posts` table row.
    #[must_use]
    pub fn from_row(row: &[Value]) -> Option<Self> {
        let uid = text(row, 2)?;
        let (user_name, _) = split_uid(&uid);
        let user_name = user_name.to_string();
        Some(Self {
            post_id: text(row, 0)?,
            text_content: text(row, 1)?,
            user_name,
            nick: text(row, 3)?,
            time: text(row, 4)?,
            kind: SourceKind::parse(&text(row, 5)?),
            url: text(row, 6)?,
            likes: integer(row, 7),
            reposts: integer(row, 8),
            comments: integer(row, 9),
            embed: text(row, 10)?,
            is_reply: integer(row, 11) != 0,
            reply_to: text(row, 12)?,
            real_user: text(row, 13)?,
            uid,
        })
    }
}

/// An archived media file belonging to a post.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Media {
    pub media_id: String,
    pub post_id: String,
    pub file_name: String,
    pub uid: String,
    pub user_name: String,
    pub kind: Option<SourceKind>,
    pub time: String,
}

impl Media {
    /// New in-memory media row.
    #[must_use]
    pub fn new(media_id: &str, post_id: &str, user_name: &str, kind: SourceKind) -> Self {
        let user_name = user_name.to_lowercase();
        Self {
            media_id: media_id.to_string(),
            post_id: post_id.to_string(),
            uid: make_uid(&user_name, kind),
            user_name,
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Convert a `media` table row. Rows with an empty filename are
    /// invalid and read as not-found.
    #[must_use]
    pub fn from_row(row: &[Value]) -> Option<Self> {
        let file_name = text(row, 2)?;
        if file_name.is_empty() {
            return None;
        }
        let uid = text(row, 3)?;
        let (user_name, _) = split_uid(&uid);
        let user_name = user_name.to_string();
        Some(Self {
            media_id: text(row, 0)?,
            post_id: text(row, 1)?,
            file_name,
            user_name,
            kind: SourceKind::parse(&text(row, 4)?),
            time: text(row, 5)?,
            uid,
        })
    }

    #[must_use]
    pub fn is_video(&self) -> bool {
        has_extension_in(&self.file_name, VIDEO_EXTENSIONS)
    }

    #[must_use]
    pub fn is_audio(&self) -> bool {
        has_extension_in(&self.file_name, AUDIO_EXTENSIONS)
    }

    #[must_use]
    pub fn is_image(&self) -> bool {
        has_extension_in(&self.file_name, IMAGE_EXTENSIONS)
    }

    #[must_use]
    pub fn is_flash(&self) -> bool {
        has_extension_in(&self.file_name, FLASH_EXTENSIONS)
    }

    #[must_use]
    pub fn is_attachment(&self) -> bool {
        has_extension_in(&self.file_name, ATTACHMENT_EXTENSIONS)
    }
}

/// A favorited post id with its favoriting time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Favorite {
    pub post_id: String,
    pub fav_time: String,
}

/// A queued download request. Jobs are transient: consumed once, never
/// requeued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJob {
    pub url: String,
    /// Re-download everything instead of stopping at already-seen content.
    pub full: bool,
    /// Use the media-only downloader profile.
    pub media_only: bool,
}

fn text(row: &[Value], idx: usize) -> Option<String> {
    match row.get(idx) {
        Some(Value::Text(s)) => Some(s.clone()),
        Some(Value::Null) => Some(String::new()),
        Some(Value::Integer(i)) => Some(i.to_string()),
        Some(Value::Real(f)) => Some(f.to_string()),
        _ => None,
    }
}

fn integer(row: &[Value], idx: usize) -> i64 {
    match row.get(idx) {
        Some(Value::Integer(i)) => *i,
        #[allow(clippy::cast_possible_truncation)]
        Some(Value::Real(f)) => *f as i64,
        Some(Value::Text(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn real(row: &[Value], idx: usize) -> f64 {
    match row.get(idx) {
        Some(Value::Real(f)) => *f,
        #[allow(clippy::cast_precision_loss)]
        Some(Value::Integer(i)) => *i as f64,
        Some(Value::Text(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
