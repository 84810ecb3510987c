//! Per-platform dispatch table.
//!
//! Everything that differs between the four supported platforms lives here:
//! domain matching, canonical URL shapes, sidecar filename patterns, post-id
//! extraction, and downloader command construction. The rest of the crate
//! switches on [`SourceKind`] exactly once per operation, through these
//! methods.

use crate::config::{expand_tilde, Config};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One of the four supported platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    X,
    Bsky,
    Reddit,
    Fa,
}

static X_POST_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+.+json$").unwrap());
static X_POST_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)").unwrap());
static BSKY_POST_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}.+\.json$").unwrap());
static BSKY_POST_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}-\d{2}-\d{2}_([^_]+)").unwrap());
static REDDIT_POST_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r".+json$").unwrap());
static REDDIT_POST_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([a-zA-Z0-9]+)").unwrap());
static FA_POST_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+").unwrap());
static FA_POST_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)").unwrap());

static X_ACCOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:x|twitter)\.com/([a-zA-Z0-9\-_.]+)").unwrap());
static BSKY_ACCOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"profile/([a-zA-Z0-9\-_.]+)").unwrap());
static REDDIT_ACCOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"reddit\.com/r/([a-zA-Z0-9\-_.]+)").unwrap());
static FA_ACCOUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"furaffinity\.net/(?:user|gallery|scraps|journals)/([\w\-.~]+)").unwrap());

impl SourceKind {
    /// All supported sources, in ingestion order.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [Self::X, Self::Bsky, Self::Reddit, Self::Fa]
    }

    /// The short tag stored in `type` columns and used in composite keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Bsky => "bsky",
            Self::Reddit => "reddit",
            Self::Fa => "fa",
        }
    }

    /// Parse the short tag back into a source kind.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "x" => Some(Self::X),
            "bsky" => Some(Self::Bsky),
            "reddit" => Some(Self::Reddit),
            "fa" => Some(Self::Fa),
            _ => None,
        }
    }

    /// Determine the source a download URL belongs to. First match wins;
    /// Bluesky is tested before X so `bsky.app` profile URLs never fall
    /// through to the generic domain checks.
    #[must_use]
    pub fn detect(url: &str) -> Option<Self> {
        if url.contains("bsky") {
            Some(Self::Bsky)
        } else if url.contains("x.com") || url.contains("twitter.com") {
            Some(Self::X)
        } else if url.contains("reddit.com") {
            Some(Self::Reddit)
        } else if url.contains("furaffinity") {
            Some(Self::Fa)
        } else {
            None
        }
    }

    /// Extract the account (or subreddit) name from a download URL.
    #[must_use]
    pub fn extract_account(self, url: &str) -> Option<String> {
        let re: &Regex = match self {
            Self::X => &X_ACCOUNT,
            Self::Bsky => &BSKY_ACCOUNT,
            Self::Reddit => &REDDIT_ACCOUNT,
            Self::Fa => &FA_ACCOUNT,
        };
        re.captures(url)
            .map(|c| c.get(1).unwrap().as_str().to_lowercase())
    }

    /// Canonical profile URL for an account.
    #[must_use]
    pub fn user_url(self, user_name: &str) -> String {
        match self {
            Self::X => format!("https://x.com/{user_name}"),
            Self::Bsky => format!("https://bsky.app/profile/{user_name}"),
            Self::Reddit => format!("https://reddit.com/r/{user_name}"),
            Self::Fa => format!("https://www.furaffinity.net/user/{user_name}"),
        }
    }

    /// Canonical post URL.
    #[must_use]
    pub fn post_url(self, user_name: &str, post_id: &str) -> String {
        match self {
            Self::X => format!("https://x.com/{user_name}/status/{post_id}"),
            Self::Bsky => format!("https://bsky.app/profile/{user_name}/post/{post_id}"),
            Self::Reddit => format!("https://reddit.com/r/{user_name}/comments/{post_id}"),
            Self::Fa => format!("https://www.furaffinity.net/view/{post_id}/"),
        }
    }

    /// FurAffinity journals live under a different path than gallery posts.
    #[must_use]
    pub fn fa_journal_url(post_id: &str) -> String {
        format!("https://www.furaffinity.net/journal/{post_id}/")
    }

    /// Filename pattern selecting post sidecars in a user directory.
    #[must_use]
    pub fn post_file_regex(self) -> &'static Regex {
        match self {
            Self::X => &X_POST_FILE,
            Self::Bsky => &BSKY_POST_FILE,
            Self::Reddit => &REDDIT_POST_FILE,
            Self::Fa => &FA_POST_FILE,
        }
    }

    /// Capture pattern extracting the post id from a sidecar or media
    /// filename.
    #[must_use]
    pub fn post_id_regex(self) -> &'static Regex {
        match self {
            Self::X => &X_POST_ID,
            Self::Bsky => &BSKY_POST_ID,
            Self::Reddit => &REDDIT_POST_ID,
            Self::Fa => &FA_POST_ID,
        }
    }

    /// Extract a post id from a filename using the source's capture pattern.
    #[must_use]
    pub fn extract_post_id(self, file_name: &str) -> Option<String> {
        self.post_id_regex()
            .captures(file_name)
            .map(|c| c.get(1).unwrap().as_str().to_string())
    }

    /// The user-describing sidecar for FurAffinity is a fixed filename; the
    /// other sources use the newest post sidecar as the profile snapshot.
    #[must_use]
    pub const fn user_sidecar(self) -> Option<&'static str> {
        match self {
            Self::Fa => Some("user.json"),
            _ => None,
        }
    }

    /// Build the external downloader argv for one job.
    ///
    /// The destination is keyed by the extracted account name under the
    /// source root. FurAffinity dispatches to the dedicated scraper program
    /// instead of gallery-dl.
    #[must_use]
    pub fn build_command(
        self,
        config: &Config,
        url: &str,
        account: &str,
        media_only: bool,
    ) -> Vec<String> {
        let profile = if media_only {
            &config.downloader.media_only_profile
        } else {
            &config.downloader.config_profile
        };
        let dest = config.root(self).join(account);

        match self {
            Self::Fa => {
                let scraper = config
                    .downloader
                    .fa_scraper
                    .as_deref()
                    .map_or_else(|| "fa-scraper".to_string(), path_arg);
                vec![
                    scraper,
                    "-o".into(),
                    format!("{}/", config.root(self).display()),
                    url.to_string(),
                ]
            }
            Self::X => {
                let mut cmd = vec![
                    path_arg(&config.gallery_dl_bin()),
                    "-c".into(),
                    path_arg(profile),
                ];
                if let Some(cookies) = &config.downloader.cookies_x {
                    cmd.push("-C".into());
                    cmd.push(path_arg(&expand_tilde(cookies)));
                }
                cmd.push(url.to_string());
                cmd.push("-D".into());
                cmd.push(format!("{}/", dest.display()));
                cmd
            }
            Self::Bsky | Self::Reddit => vec![
                path_arg(&config.gallery_dl_bin()),
                "-c".into(),
                path_arg(profile),
                url.to_string(),
                "-D".into(),
                format!("{}/", dest.display()),
            ],
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
