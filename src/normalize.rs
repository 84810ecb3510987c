//! Per-source normalization of raw sidecar JSON into store entities.
//!
//! Each of the four platforms writes a different JSON shape; these
//! functions fold them into the common [`User`] and [`Post`] attributes.
//! Missing optional fields degrade to empty values with a warning, since
//! older downloader versions simply did not record them. A missing
//! required field is an error for the caller (the scanner) to log or, in
//! strict mode, propagate.

use crate::error::VaultError;
use crate::model::{make_uid, Post, User};
use crate::source::SourceKind;
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

static BSKY_REPLY_URI: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^at://([^/]+)/app\.bsky\.feed\.post/([^/]+)$").unwrap());

const REDDIT_ABOUT_RETRIES: u32 = 3;
const REDDIT_ABOUT_BACKOFF: Duration = Duration::from_secs(1);

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/58.0.3029.110 Safari/537.3";

/// Populate a user from its source-specific profile snapshot.
///
/// `reddit_about` carries the already-fetched subreddit `about.json` data
/// where available (see [`fetch_reddit_about`]); other sources ignore it.
///
/// # Errors
///
/// Returns an error when a field the source requires is missing.
pub fn populate_user(
    user: &mut User,
    json: &Value,
    reddit_about: Option<&Value>,
) -> Result<()> {
    let Some(kind) = user.kind else {
        return Err(VaultError::missing_field("type", "user record"));
    };
    match kind {
        SourceKind::X => {
            user.nick = require_str(&json["author"]["nick"], "author.nick", "x user")?;
            user.udid.clone_from(&user.user_name);
            user.avatar = json["author"]["profile_image"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            user.banner = optional_str(&json["author"]["profile_banner"], || {
                warn!(
                    "user {} has no banner; re-download with a current gallery-dl to fix",
                    user.user_name
                );
            });
            user.description = optional_str(&json["author"]["description"], || {
                warn!(
                    "user {} has no description; re-download with a current gallery-dl to fix",
                    user.user_name
                );
            });
        }
        SourceKind::Bsky => {
            user.nick = require_str(&json["author"]["displayName"], "author.displayName", "bsky user")?;
            user.udid = require_str(&json["author"]["did"], "author.did", "bsky user")?;
            user.avatar = optional_str(&json["author"]["avatar"], || {
                warn!("user {} has no avatar", user.user_name);
            });
            user.banner = optional_str(&json["user"]["banner"], || {
                warn!("user {} has no banner", user.user_name);
            });
            user.description = optional_str(&json["user"]["description"], || {
                warn!("user {} has no description", user.user_name);
            });
        }
        SourceKind::Reddit => {
            user.nick.clone_from(&user.user_name);
            user.udid.clone_from(&user.user_name);
            user.avatar = String::new();
            user.banner = String::new();
            user.description = format!("Reddit subreddit {}.\n", user.user_name);
            if let Some(about) = reddit_about {
                user.description
                    .push_str(about["public_description"].as_str().unwrap_or_default());
                user.banner = first_nonempty(&[
                    strip_query(about["banner_background_image"].as_str()),
                    strip_query(about["banner_img"].as_str()),
                ]);
                user.avatar = first_nonempty(&[
                    strip_query(about["community_icon"].as_str()),
                    strip_query(about["icon_img"].as_str()),
                ]);
            }
        }
        SourceKind::Fa => {
            user.nick = require_str(&json["display_name"], "display_name", "fa user")?;
            user.udid.clone_from(&user.user_name);
            user.avatar = json["avatar_url"].as_str().unwrap_or_default().to_string();
            user.banner = json["banner_url"].as_str().unwrap_or_default().to_string();
            user.description = json["description"].as_str().unwrap_or_default().to_string();
        }
    }
    Ok(())
}

/// Populate a post from its source-specific sidecar.
///
/// The post's owning user may be filled in from the record when the caller
/// did not know it; the composite key is recomputed afterwards either way.
///
/// # Errors
///
/// Returns an error when a field the source requires is missing.
#[allow(clippy::too_many_lines)]
pub fn populate_post(post: &mut Post, json: &Value) -> Result<()> {
    let Some(kind) = post.kind else {
        return Err(VaultError::missing_field("type", "post record"));
    };
    match kind {
        SourceKind::X => {
            post.post_id = require_id(&json["tweet_id"], "tweet_id", "x post")?;
            post.text_content = require_str(&json["content"], "content", "x post")?;
            if post.user_name.is_empty() {
                post.user_name =
                    require_str(&json["author"]["name"], "author.name", "x post")?.to_lowercase();
            }
            post.nick = require_str(&json["author"]["nick"], "author.nick", "x post")?;
            post.time = require_str(&json["date"], "date", "x post")?;
            post.url = kind.post_url(&post.user_name, &post.post_id);
            post.likes = json["favorite_count"].as_i64().unwrap_or(0);
            post.reposts = json["retweet_count"].as_i64().unwrap_or(0);
            post.comments = json["reply_count"].as_i64().unwrap_or(0);

            post.is_reply = !json["reply_to"].is_null();
            let reply_id = id_string(&json["reply_id"]);
            let reply_to_user = json["reply_to"].as_str().unwrap_or_default();
            if !reply_id.is_empty() && !reply_to_user.is_empty() {
                post.reply_to = format!("{reply_id}@{}", reply_to_user.to_lowercase());
            }
        }
        SourceKind::Bsky => {
            post.post_id = require_id(&json["post_id"], "post_id", "bsky post")?;
            post.text_content = require_str(&json["text"], "text", "bsky post")?;
            if let Some(facets) = json["facets"].as_array() {
                post.text_content = bsky_link_fix(&post.text_content, facets);
            }
            if post.user_name.is_empty() {
                post.user_name = require_str(&json["author"]["handle"], "author.handle", "bsky post")?
                    .to_lowercase();
            }
            post.nick = require_str(&json["author"]["displayName"], "author.displayName", "bsky post")?;
            post.time = require_str(&json["date"], "date", "bsky post")?;
            post.url = kind.post_url(&post.user_name, &post.post_id);
            post.likes = json["likeCount"].as_i64().unwrap_or(0);
            post.reposts = json["repostCount"].as_i64().unwrap_or(0);
            post.comments = json["replyCount"].as_i64().unwrap_or(0);

            if !json["embed"]["record"].is_null() {
                post.embed = json["embed"]["record"]["uri"]
                    .as_str()
                    .or_else(|| json["embed"]["record"]["record"]["uri"].as_str())
                    .unwrap_or_default()
                    .to_string();
            }
            post.is_reply = !json["reply"].is_null();
            if let Some(parent_uri) = json["reply"]["parent"]["uri"].as_str() {
                if let Some(caps) = BSKY_REPLY_URI.captures(parent_uri) {
                    post.reply_to = format!("{}@{}", &caps[2], &caps[1]);
                }
            }
        }
        SourceKind::Reddit => {
            post.post_id = require_id(&json["id"], "id", "reddit post")?;
            let title = require_str(&json["title"], "title", "reddit post")?;
            let selftext = json["selftext"].as_str().unwrap_or_default();
            post.text_content = format!("<span class='rdt_title'>{title}</span>{selftext}");
            post.user_name = require_str(&json["subreddit"], "subreddit", "reddit post")?
                .to_lowercase();
            post.nick.clone_from(&post.user_name);
            post.time = json["created_utc"]
                .as_f64()
                .and_then(|epoch| {
                    #[allow(clippy::cast_possible_truncation)]
                    let epoch = epoch as i64;
                    chrono::DateTime::from_timestamp(epoch, 0)
                        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
                })
                .ok_or_else(|| VaultError::missing_field("created_utc", "reddit post"))?;
            post.url = kind.post_url(&post.user_name, &post.post_id);
            post.likes = json["score"].as_i64().unwrap_or(0);
            post.reposts = 0;
            post.comments = json["num_comments"].as_i64().unwrap_or(0);
            post.is_reply = false;
            post.real_user = json["author"]
                .as_str()
                .unwrap_or("[deleted]")
                .to_string();
        }
        SourceKind::Fa => {
            post.post_id = require_id(&json["id"], "id", "fa post")?;
            let title = require_str(&json["title"], "title", "fa post")?;
            let description = json["description"].as_str().unwrap_or_default();
            post.text_content = format!("<span class='rdt_title'>{title}</span>{description}");
            post.user_name = require_str(&json["user"], "user", "fa post")?.to_lowercase();
            post.nick = json["artist"]
                .as_str()
                .map_or_else(|| post.user_name.clone(), String::from);
            post.time = require_str(&json["date"], "date", "fa post")?;
            let is_journal = json["subcategory"].as_str() == Some("journals")
                || json["category"].as_str() == Some("journals");
            post.url = if is_journal {
                SourceKind::fa_journal_url(&post.post_id)
            } else {
                kind.post_url(&post.user_name, &post.post_id)
            };
            post.likes = json["favorites"].as_i64().unwrap_or(0);
            post.reposts = 0;
            post.comments = json["comments"].as_i64().unwrap_or(0);
            post.is_reply = false;
            post.real_user.clone_from(&post.user_name);
        }
    }
    post.uid = make_uid(&post.user_name, kind);
    Ok(())
}

/// Undo Bluesky's rich-text link shortening.
///
/// Facets carry byte offsets into the display text plus the true URI; when
/// the display span is shorter than the scheme-stripped URI, the display
/// text holds `uri[..span-3] + "..."` and the full URI is substituted back.
#[must_use]
pub fn bsky_link_fix(text: &str, facets: &[Value]) -> String {
    let mut text = text.to_string();
    for facet in facets {
        let Some(features) = facet["features"].as_array() else {
            continue;
        };
        for feature in features {
            if feature["$type"].as_str() != Some("app.bsky.richtext.facet#link") {
                continue;
            }
            let Some(uri) = feature["uri"].as_str() else {
                continue;
            };
            let uri = uri
                .trim_start_matches("https://")
                .trim_start_matches("http://");
            let start = facet["index"]["byteStart"].as_i64().unwrap_or(0);
            let end = facet["index"]["byteEnd"].as_i64().unwrap_or(0);
            let length = usize::try_from((end - start).abs()).unwrap_or(0);
            if length < uri.len() && length >= 3 {
                let shortened: String = uri
                    .char_indices()
                    .take_while(|(i, _)| *i < length - 3)
                    .map(|(_, c)| c)
                    .collect();
                let shortened = format!("{shortened}...");
                text = text.replace(&shortened, uri);
            }
        }
    }
    text
}

/// Fetch a subreddit's `about.json` metadata.
///
/// Transient failures are retried a fixed number of times with a short
/// fixed backoff; exhaustion surfaces as `None`, never an error, since the
/// description enrichment is best-effort.
#[must_use]
pub fn fetch_reddit_about(subreddit: &str) -> Option<Value> {
    let url = format!("https://www.reddit.com/r/{subreddit}/about.json");
    for attempt in 1..=REDDIT_ABOUT_RETRIES {
        match try_fetch_json(&url) {
            Ok(data) => return data.get("data").cloned(),
            Err(e) => {
                warn!("about.json fetch for r/{subreddit} failed (attempt {attempt}): {e}");
                if attempt < REDDIT_ABOUT_RETRIES {
                    std::thread::sleep(REDDIT_ABOUT_BACKOFF);
                }
            }
        }
    }
    None
}

fn try_fetch_json(url: &str) -> anyhow::Result<Value> {
    let client = reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(15))
        .build()?;
    let response = client.get(url).send()?.error_for_status()?;
    Ok(response.json()?)
}

fn require_str(value: &Value, field: &str, context: &str) -> Result<String> {
    value
        .as_str()
        .map(String::from)
        .ok_or_else(|| VaultError::missing_field(field, context))
}

/// Ids show up as strings or bare numbers depending on downloader version.
fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

fn require_id(value: &Value, field: &str, context: &str) -> Result<String> {
    let id = id_string(value);
    if id.is_empty() {
        return Err(VaultError::missing_field(field, context));
    }
    Ok(id)
}

fn optional_str(value: &Value, on_missing: impl FnOnce()) -> String {
    value.as_str().map_or_else(
        || {
            on_missing();
            String::new()
        },
        String::from,
    )
}

fn strip_query(value: Option<&str>) -> String {
    value
        .unwrap_or_default()
        .split('?')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn first_nonempty(candidates: &[String]) -> String {
    candidates
        .iter()
        .find(|s| !s.is_empty())
        .cloned()
        .unwrap_or_default()
}
