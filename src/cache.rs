//! Global timeline caches and the rebuild loop.
//!
//! The serving layer pages over three precomputed orderings of every post
//! (newest, most-liked, shuffled) and one shuffled pool of video media ids.
//! Rebuilding them walks the whole posts table, so it runs on a timer and
//! only when the dirty flag says new content has landed. While a rebuild is
//! in flight the busy flag tells the serving layer to show a please-wait
//! state; it is a UX hint, not a correctness mechanism.

use crate::model::VIDEO_EXTENSIONS;
use crate::store::Store;
use crate::{natural_sort_desc, Result, StopSignal};
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rusqlite::types::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info};

/// Ordering of the global timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    New,
    Top,
    Random,
}

impl SortOrder {
    /// Parse the serving layer's sort parameter.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "top" => Some(Self::Top),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Views {
    newest: Vec<String>,
    top: Vec<String>,
    random: Vec<String>,
    video_pool: Vec<String>,
}

/// Cache service owning the global views and the busy/dirty flags.
///
/// Created once at startup; the download worker marks it dirty, the rebuild
/// loop consumes the flag.
#[derive(Default)]
pub struct CacheService {
    views: Mutex<Views>,
    user_video_ids: Mutex<HashMap<String, Vec<String>>>,
    busy: AtomicBool,
    dirty: AtomicBool,
}

impl CacheService {
    /// New cache service, dirty from the start so the first cycle builds.
    #[must_use]
    pub fn new() -> Self {
        let service = Self::default();
        service.dirty.store(true, Ordering::SeqCst);
        service
    }

    /// Note that new content has landed since the last rebuild.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Whether a rebuild is in flight (serving layer: show please-wait).
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Raise or clear the busy hint from outside the rebuild loop (the
    /// download worker holds it through post-run rescans).
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    /// One timer tick: rebuild if dirty, clearing the busy flag on every
    /// exit path.
    pub fn run_cycle(&self, store: &Store) {
        if !self.is_dirty() {
            info!("No new download, skipping cache build.");
            return;
        }
        self.busy.store(true, Ordering::SeqCst);
        info!("Building cache...");
        match self.rebuild(store) {
            Ok(()) => {
                self.dirty.store(false, Ordering::SeqCst);
                info!("Cache built.");
            }
            Err(e) => error!("Cache build failed: {e}"),
        }
        self.busy.store(false, Ordering::SeqCst);
    }

    /// Periodic loop: one cycle per interval until shutdown.
    pub fn run_loop(&self, store: &Store, interval: Duration, signal: &StopSignal) {
        loop {
            self.run_cycle(store);
            if !signal.sleep(interval) {
                info!("Cache builder stopped.");
                return;
            }
        }
    }

    /// Recompute every view from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails; flags are the caller's concern.
    pub fn rebuild(&self, store: &Store) -> Result<()> {
        let rows = store.raw_query("SELECT post_id, type, time, likes FROM posts", &[], false)?;

        let mut by_time: Vec<(String, String)> = rows
            .iter()
            .filter_map(|r| Some((value_text(r, 0)?, value_text(r, 2)?)))
            .collect();
        natural_sort_desc(&mut by_time, |(_, time)| time.as_str());
        let newest: Vec<String> = by_time.into_iter().map(|(id, _)| id).collect();

        let mut by_likes: Vec<(String, i64)> = rows
            .iter()
            .filter_map(|r| Some((value_text(r, 0)?, value_integer(r, 3))))
            .collect();
        by_likes.sort_by(|a, b| b.1.cmp(&a.1));
        let top: Vec<String> = by_likes.into_iter().map(|(id, _)| id).collect();

        let mut random = newest.clone();
        random.shuffle(&mut rand::thread_rng());

        let video_filter = VIDEO_EXTENSIONS
            .iter()
            .map(|ext| format!("file_name LIKE '%.{ext}'"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let media_rows = store.raw_query(
            &format!("SELECT media_id FROM media WHERE {video_filter}"),
            &[],
            false,
        )?;
        let mut video_pool: Vec<String> = media_rows
            .iter()
            .filter_map(|r| value_text(r, 0))
            .collect();
        video_pool.shuffle(&mut rand::thread_rng());

        *self.views.lock() = Views {
            newest,
            top,
            random,
            video_pool,
        };
        self.user_video_ids.lock().clear();
        store.clear_cache();
        Ok(())
    }

    /// Total number of posts in the global views.
    #[must_use]
    pub fn post_count(&self) -> usize {
        self.views.lock().newest.len()
    }

    /// One page of the global timeline in the given order.
    #[must_use]
    pub fn posts_page(&self, sort: SortOrder, page: usize, per_page: usize) -> Vec<String> {
        let views = self.views.lock();
        let ids = match sort {
            SortOrder::New => &views.newest,
            SortOrder::Top => &views.top,
            SortOrder::Random => &views.random,
        };
        page_of(ids, page, per_page)
    }

    /// The shuffled video pool entry at `idx`, wrapping around.
    #[must_use]
    pub fn video_at(&self, idx: usize) -> Option<String> {
        let views = self.views.lock();
        if views.video_pool.is_empty() {
            return None;
        }
        Some(views.video_pool[idx % views.video_pool.len()].clone())
    }

    /// Number of pooled videos.
    #[must_use]
    pub fn video_count(&self) -> usize {
        self.views.lock().video_pool.len()
    }

    /// A user's video media ids, newest first; computed on first use and
    /// kept until the next rebuild.
    ///
    /// # Errors
    ///
    /// Returns an error if the media query fails.
    pub fn user_videos(&self, store: &Store, uid: &str) -> Result<Vec<String>> {
        if let Some(hit) = self.user_video_ids.lock().get(uid) {
            return Ok(hit.clone());
        }
        info!("cache miss for {uid}, building media cache...");
        let rows = store.raw_query(
            "SELECT media_id, time, file_name FROM media WHERE uid = ?",
            &[Value::from(uid.to_string())],
            true,
        )?;
        let mut videos: Vec<(String, String)> = rows
            .iter()
            .filter_map(|r| {
                let file_name = value_text(r, 2)?;
                let ext = crate::model::extension_of(&file_name);
                if !VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)) {
                    return None;
                }
                Some((value_text(r, 0)?, value_text(r, 1)?))
            })
            .collect();
        videos.sort_by(|a, b| b.1.cmp(&a.1));
        let ids: Vec<String> = videos.into_iter().map(|(id, _)| id).collect();
        if !ids.is_empty() {
            self.user_video_ids.lock().insert(uid.to_string(), ids.clone());
        }
        Ok(ids)
    }
}

fn page_of(ids: &[String], page: usize, per_page: usize) -> Vec<String> {
    ids.iter()
        .skip(page * per_page)
        .take(per_page)
        .cloned()
        .collect()
}

fn value_text(row: &[Value], idx: usize) -> Option<String> {
    match row.get(idx) {
        Some(Value::Text(s)) => Some(s.clone()),
        Some(Value::Integer(i)) => Some(i.to_string()),
        _ => None,
    }
}

fn value_integer(row: &[Value], idx: usize) -> i64 {
    match row.get(idx) {
        Some(Value::Integer(i)) => *i,
        Some(Value::Text(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}
