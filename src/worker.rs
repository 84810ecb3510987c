//! Download job queue and dispatch loop.
//!
//! Jobs arrive from the presentation layer as `(url, full, media_only)`
//! tuples, get their URL normalized and deduplicated at submission, and are
//! consumed one at a time by a single worker loop: build the downloader
//! command for the URL's source, run it under the command runner, then
//! rescan the affected account and mark the timeline caches dirty. A
//! failing job degrades that one cycle and never halts the loop.

use crate::cache::CacheService;
use crate::config::Config;
use crate::model::DownloadJob;
use crate::runner::{CommandRunner, InterruptHandle, RunOptions};
use crate::scanner::Scanner;
use crate::source::SourceKind;
use crate::store::Store;
use crate::{Result, StopSignal};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

static BARE_BSKY_HANDLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w+\.bsky\.social").unwrap());
static PHOTO_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"photo/\d+").unwrap());
static VIDEO_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"video/\d+").unwrap());

/// Incremental jobs stop once gallery-dl keeps reporting already-seen
/// content; its per-item marker line is a bare `#`.
const INCREMENTAL_STOP_KEYWORDS: &[&str] = &["#"];

const IDLE_POLL: Duration = Duration::from_secs(1);
const DAEMON_SPACING: Duration = Duration::from_secs(10);

/// Result of a job submission, echoed back to the presentation layer.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    /// Human-readable disposition message.
    pub message: String,
    /// URL currently being downloaded, if any.
    pub current: String,
    /// Snapshot of the queue after the submission.
    pub queue: Vec<DownloadJob>,
}

/// Single-consumer download orchestrator.
pub struct DownloadWorker {
    store: Arc<Store>,
    cache: Arc<CacheService>,
    config: Config,
    queue: Mutex<VecDeque<DownloadJob>>,
    current_url: Mutex<String>,
    runner: CommandRunner,
}

impl DownloadWorker {
    #[must_use]
    pub fn new(store: Arc<Store>, cache: Arc<CacheService>, config: Config) -> Self {
        Self {
            store,
            cache,
            config,
            queue: Mutex::new(VecDeque::new()),
            current_url: Mutex::new(String::new()),
            runner: CommandRunner::new(),
        }
    }

    /// Handle for interrupting whatever download is currently running.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.runner.interrupt_handle()
    }

    /// Submit a download request.
    ///
    /// Normalizes the URL (scheme coercion, domain aliasing, gallery-page
    /// suffix stripping), rejects URLs outside the four supported
    /// platforms, and drops exact duplicates already in the queue.
    pub fn submit(&self, url: &str, full: bool, media_only: bool) -> SubmitOutcome {
        let url = url.trim();
        if url.is_empty() {
            return self.outcome("Enter your url above.\n");
        }
        if SourceKind::detect(url).is_none() {
            let msg = format!("Invalid URL: {url}\n");
            info!("{}", msg.trim_end());
            return self.outcome(&msg);
        }
        if url.contains("did:") {
            let msg = format!(
                "Go get the actual bsky handle like 'xxx.bsky.social', {url} won't do.\n"
            );
            info!("{}", msg.trim_end());
            return self.outcome(&msg);
        }

        let url = normalize_url(url);
        let job = DownloadJob {
            url: url.clone(),
            full,
            media_only,
        };
        let msg = {
            let mut queue = self.queue.lock();
            if queue.contains(&job) {
                format!("{url} already in download queue.\n")
            } else {
                queue.push_back(job);
                format!("Added {url} to download queue.\n")
            }
        };
        info!("{}", msg.trim_end());
        self.outcome(&msg)
    }

    fn outcome(&self, message: &str) -> SubmitOutcome {
        SubmitOutcome {
            message: message.to_string(),
            current: self.current_url.lock().clone(),
            queue: self.queue.lock().iter().cloned().collect(),
        }
    }

    /// Snapshot of the pending queue.
    #[must_use]
    pub fn queue_snapshot(&self) -> Vec<DownloadJob> {
        self.queue.lock().iter().cloned().collect()
    }

    /// The worker loop: pop one job at a time until shutdown. Every
    /// failure is caught and logged; the loop outlives any single job.
    pub fn run_loop(&self, signal: &StopSignal) {
        info!("Download worker started.");
        loop {
            if signal.is_stopped() {
                break;
            }
            let job = self.queue.lock().pop_front();
            let Some(job) = job else {
                if !signal.sleep(IDLE_POLL) {
                    break;
                }
                continue;
            };

            *self.current_url.lock() = job.url.clone();
            info!("Downloading {}", job.url);
            if let Err(e) = self.process_job(&job) {
                error!("Error in download worker: {e}");
            }
            self.current_url.lock().clear();
        }
        info!("Download worker stopped.");
    }

    /// Dispatch one job: command construction, supervised run, rescan.
    ///
    /// # Errors
    ///
    /// Returns an error on rescan/store failures; unsupported or
    /// unresolvable URLs are dropped with a log message instead.
    fn process_job(&self, job: &DownloadJob) -> Result<()> {
        let Some(kind) = SourceKind::detect(&job.url) else {
            warn!("Unsupported URL: {}", job.url);
            return Ok(());
        };
        let Some(account) = self.resolve_account(kind, &job.url) else {
            warn!("Invalid {kind} URL: {}", job.url);
            return Ok(());
        };
        info!("User: {account} Type: {kind}");

        let argv = kind.build_command(&self.config, &job.url, &account, job.media_only);
        let stop_keywords = if job.full {
            Vec::new()
        } else {
            INCREMENTAL_STOP_KEYWORDS
                .iter()
                .map(|s| (*s).to_string())
                .collect()
        };
        let flag_account = || {
            if let Err(e) = self.store.flag_user(&account, kind) {
                error!("Failed to flag {account}: {e}");
            }
        };
        let options = RunOptions {
            stop_keywords,
            triggers: vec![
                ("NotFoundError".to_string(), Box::new(flag_account.clone())),
                ("AuthorizationError".to_string(), Box::new(flag_account)),
            ],
            ..RunOptions::default()
        };

        if let Err(e) = self.runner.run(&argv, &options) {
            error!("Downloader run failed: {e}");
            return Ok(());
        }

        self.rescan_account(kind, &account)
    }

    fn rescan_account(&self, kind: SourceKind, account: &str) -> Result<()> {
        self.cache.set_busy(true);
        let result = (|| -> Result<()> {
            let scanner = Scanner::new(&self.store, &self.config);
            scanner.scan_all(kind, Some(account))?;
            self.store.commit()?;
            self.cache.mark_dirty();
            self.store.clear_cache();
            info!("{account} downloaded");
            Ok(())
        })();
        self.cache.set_busy(false);
        if result.is_err() {
            error!("Scan Failed.");
        }
        result
    }

    fn resolve_account(&self, kind: SourceKind, url: &str) -> Option<String> {
        if let Some(account) = kind.extract_account(url) {
            return Some(account);
        }
        if kind == SourceKind::Fa {
            // Category-less FA URLs carry no username; assume the most
            // recently updated archive directory.
            info!("Guessing username now...");
            let guessed = most_recent_dir(&self.config.root(kind));
            if let Some(name) = &guessed {
                info!("Using most recently updated user: {name}");
            }
            return guessed;
        }
        None
    }

    /// One pass of the account refresh daemon: enqueue an incremental
    /// media-only job for every known, unflagged X/Bluesky account, oldest
    /// first, spaced out so downloads interleave with the queue draining.
    pub fn enqueue_known_accounts(&self, signal: &StopSignal) {
        let users = match self.store.get_users() {
            Ok(users) => users,
            Err(e) => {
                error!("[update daemon] {e}");
                return;
            }
        };
        for user in users.iter().rev().filter(|u| !u.flagged) {
            let url = match user.kind {
                Some(SourceKind::X | SourceKind::Bsky) => user.url(),
                _ => continue,
            };
            self.submit(&url, false, true);
            info!("[update daemon] Added {url} to queue.");
            if !signal.sleep(DAEMON_SPACING) {
                return;
            }
        }
    }
}

/// Canonicalize a submitted URL: https scheme, no trailing slash, x.com
/// domain, bare Bluesky handles expanded, `/media` and photo/video gallery
/// suffixes stripped.
fn normalize_url(url: &str) -> String {
    let mut url = url.to_string();
    if BARE_BSKY_HANDLE.is_match(&url) {
        url = format!("https://bsky.app/profile/{}", filter_ascii(&url).trim());
    }
    if !url.starts_with("http") {
        url = format!("https://{url}");
    }
    url = url.replace("http://", "https://");
    url = url.trim_end_matches('/').to_string();
    if let Some(stripped) = url.strip_suffix("/media") {
        url = stripped.to_string();
    }
    url = url.replace("twitter.com", "x.com");
    if url.contains("/photo/") {
        url = PHOTO_SUFFIX.replace(&url, "").to_string();
    }
    if url.contains("/video/") {
        url = VIDEO_SUFFIX.replace(&url, "").to_string();
    }
    url.trim_end_matches('/').to_string()
}

fn filter_ascii(text: &str) -> String {
    text.chars().filter(char::is_ascii).collect()
}

fn most_recent_dir(root: &std::path::Path) -> Option<String> {
    let entries = std::fs::read_dir(root).ok()?;
    let mut dirs: Vec<(std::time::SystemTime, String)> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let mtime = e.metadata().ok()?.modified().ok()?;
            Some((mtime, e.file_name().to_str()?.to_string()))
        })
        .collect();
    dirs.sort_by(|a, b| b.0.cmp(&a.0));
    dirs.into_iter().next().map(|(_, name)| name)
}
