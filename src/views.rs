//! Page assembly for the presentation layer.
//!
//! Takes the id lists produced by the cache service (or by text search and
//! per-user queries) and folds each id into a fully resolved view: the
//! post, its owning user, its naturally-ordered media, its embed, and the
//! favorite flag. Dangling references never surface as errors here; they
//! resolve to external stubs or synthesized stand-ins.

use crate::cache::{CacheService, SortOrder};
use crate::model::{Media, Post, User};
use crate::source::SourceKind;
use crate::store::{Store, Table};
use crate::Result;
use rusqlite::types::Value;
use std::collections::{HashSet, VecDeque};
use tracing::{info, warn};

/// Upper bound on reply-chain expansion per page, so cyclic or very deep
/// chains terminate.
pub const REPLY_CHAIN_CAP: usize = 50;

/// A fully resolved post for rendering.
#[derive(Debug, Clone)]
pub struct PostView {
    pub post: Post,
    pub user: Option<User>,
    pub media: Vec<Media>,
    pub embed: Option<EmbedView>,
    pub fav: bool,
    /// Set on favorites stand-ins whose post left the archive.
    pub missing: bool,
}

/// A quoted/embedded post, resolved locally when possible.
#[derive(Debug, Clone)]
pub struct EmbedView {
    pub post_id: String,
    pub udid: String,
    pub url: String,
    /// True when the referenced post is not in the archive; only `url` is
    /// meaningful then.
    pub external: bool,
    pub user_name: String,
    pub nick: String,
    pub text_content: String,
    pub time: String,
    pub media: Vec<Media>,
}

/// One page of items plus the unpaged total.
#[derive(Debug, Clone)]
pub struct PageOf<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
}

/// Read-side facade over the store and cache service.
pub struct Views<'a> {
    store: &'a Store,
    cache: &'a CacheService,
    per_page: usize,
}

impl<'a> Views<'a> {
    #[must_use]
    pub fn new(store: &'a Store, cache: &'a CacheService, per_page: usize) -> Self {
        Self {
            store,
            cache,
            per_page,
        }
    }

    /// One page of the global timeline.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures.
    pub fn timeline(&self, sort: SortOrder, page: usize) -> Result<PageOf<PostView>> {
        let ids = self.cache.posts_page(sort, page, self.per_page);
        Ok(PageOf {
            items: self.assemble_many(&ids)?,
            total: self.cache.post_count(),
            page,
        })
    }

    /// One page of text-search results, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures.
    pub fn search(&self, query: &str, page: usize) -> Result<PageOf<PostView>> {
        let hits = self.store.query_posts_by_text(query)?;
        let ids: Vec<String> = hits
            .iter()
            .skip(page * self.per_page)
            .take(self.per_page)
            .map(|(id, _)| id.clone())
            .collect();
        Ok(PageOf {
            items: self.assemble_many(&ids)?,
            total: hits.len(),
            page,
        })
    }

    /// One page of a user's posts, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures.
    pub fn user_posts(&self, uid: &str, page: usize) -> Result<PageOf<PostView>> {
        let rows = self.store.query_rows(
            Table::Posts,
            &[("uid", Value::from(uid.to_string()))],
            true,
            Some(4),
        )?;
        let ids: Vec<String> = rows
            .iter()
            .skip(page * self.per_page)
            .take(self.per_page)
            .filter_map(|r| Post::from_row(r).map(|p| p.post_id))
            .collect();
        Ok(PageOf {
            items: self.assemble_many(&ids)?,
            total: rows.len(),
            page,
        })
    }

    /// One page of a user's media grid, newest first. The grid shows twice
    /// as many items as a post page.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures.
    pub fn user_media(&self, uid: &str, page: usize) -> Result<PageOf<Media>> {
        let per_page = self.per_page * 2;
        let rows = self.store.query_rows(
            Table::Media,
            &[("uid", Value::from(uid.to_string()))],
            true,
            Some(5),
        )?;
        let items: Vec<Media> = rows
            .iter()
            .skip(page * per_page)
            .take(per_page)
            .filter_map(|r| Media::from_row(r))
            .collect();
        Ok(PageOf {
            items,
            total: rows.len(),
            page,
        })
    }

    /// One page of favorited posts, most recently favorited first. A
    /// favorite whose post left the archive renders a stand-in instead of
    /// erroring.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures.
    pub fn favorites(&self, page: usize) -> Result<PageOf<PostView>> {
        let mut favorites = self.store.get_favorites()?;
        favorites.reverse();
        let total = favorites.len();

        let mut items = Vec::new();
        for fav in favorites
            .iter()
            .skip(page * self.per_page)
            .take(self.per_page)
        {
            match self.assemble_post(&fav.post_id)? {
                Some(mut view) => {
                    view.fav = true;
                    items.push(view);
                }
                None => {
                    info!("Post [{}] not found.", fav.post_id);
                    let mut post = Post::default();
                    post.post_id.clone_from(&fav.post_id);
                    post.user_name = "None".to_string();
                    post.text_content =
                        format!("This post is missing from file system. [{}]", fav.post_id);
                    items.push(PostView {
                        post,
                        user: None,
                        media: Vec::new(),
                        embed: None,
                        fav: true,
                        missing: true,
                    });
                }
            }
        }
        Ok(PageOf { items, total, page })
    }

    /// Resolve one post id into a full view. `Ok(None)` when the post is
    /// not in the store.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures.
    pub fn assemble_post(&self, post_id: &str) -> Result<Option<PostView>> {
        let Some(post) = self.store.load_post(post_id, false)? else {
            return Ok(None);
        };
        let user = self.store.load_user(&post.uid, false)?;
        let media = self.store.media_for_post(post_id)?;
        let embed = self.resolve_embed(&post)?;
        let fav = self.store.is_favorite(post_id)?;
        Ok(Some(PostView {
            post,
            user,
            media,
            embed,
            fav,
            missing: false,
        }))
    }

    fn assemble_many(&self, ids: &[String]) -> Result<Vec<PostView>> {
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(view) = self.assemble_post(id)? {
                views.push(view);
            }
        }
        Ok(views)
    }

    /// Resolve a post's embed reference. The reference is soft: when the
    /// target is absent (or the user it names was never archived) the
    /// result is an external stub carrying only the canonical URL.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures.
    pub fn resolve_embed(&self, post: &Post) -> Result<Option<EmbedView>> {
        if post.embed.is_empty() {
            return Ok(None);
        }
        let Some(kind) = post.kind else {
            return Ok(None);
        };
        let Some((udid, embed_post_id)) = parse_embed_ref(kind, &post.embed) else {
            warn!("unparseable embed reference: {}", post.embed);
            return Ok(None);
        };

        let url = match kind {
            SourceKind::X => format!("https://x.com/{udid}/status/{embed_post_id}"),
            SourceKind::Bsky => {
                format!("https://bsky.app/profile/{udid}/post/{embed_post_id}")
            }
            _ => String::new(),
        };
        let mut view = EmbedView {
            post_id: embed_post_id.clone(),
            udid: udid.clone(),
            url,
            external: true,
            user_name: String::new(),
            nick: String::new(),
            text_content: String::new(),
            time: String::new(),
            media: Vec::new(),
        };

        let Some(user) = self.store.load_user_by_udid(&udid)? else {
            info!("User {udid} not found in database");
            return Ok(Some(view));
        };
        let Some(target) = self.store.load_post(&embed_post_id, false)? else {
            info!("Post {embed_post_id} not found in database");
            return Ok(Some(view));
        };

        view.user_name = user.user_name;
        view.nick = user.nick;
        view.text_content = target.text_content;
        view.time = target.time;
        view.media = self.store.media_for_post(&embed_post_id)?;
        view.external = false;
        Ok(Some(view))
    }

    /// Expand the reply chains reachable from a page's posts.
    ///
    /// Walks an explicit frontier with a visited set and a hard cap, so
    /// cyclic or very deep chains terminate. A reply target that is not in
    /// the store gets a placeholder row written so the chain stays
    /// relationally closed.
    ///
    /// # Errors
    ///
    /// Returns an error on store failures.
    pub fn expand_reply_targets(&self, seed_ids: &[String]) -> Result<Vec<Post>> {
        let mut visited: HashSet<String> = seed_ids.iter().cloned().collect();
        let mut frontier: VecDeque<String> = seed_ids.iter().cloned().collect();
        let mut expanded = Vec::new();

        while let Some(post_id) = frontier.pop_front() {
            if expanded.len() >= REPLY_CHAIN_CAP {
                warn!("reply expansion cap reached");
                break;
            }
            let Some(post) = self.store.load_post(&post_id, false)? else {
                continue;
            };
            if !post.is_reply || post.reply_to.is_empty() {
                continue;
            }
            let Some((target_id, target_user)) = post.reply_to.split_once('@') else {
                continue;
            };
            if !visited.insert(target_id.to_string()) {
                continue;
            }

            let target = match self.store.load_post(target_id, false)? {
                Some(target) => target,
                None => {
                    // Reply target never ingested: write a placeholder so
                    // the chain resolves on every later read.
                    let kind = post.kind.unwrap_or(SourceKind::X);
                    let mut placeholder = Post::new(target_id, target_user, kind);
                    placeholder.time.clone_from(&post.time);
                    placeholder.url = kind.post_url(&placeholder.user_name, target_id);
                    self.store.upsert_post(&placeholder)?;
                    placeholder
                }
            };
            frontier.push_back(target.post_id.clone());
            expanded.push(target);
        }
        Ok(expanded)
    }
}

/// Split an embed reference into `(udid, post_id)`.
///
/// X references end `.../<user>/status/<id>`; Bluesky references are
/// `at://<did>/app.bsky.feed.post/<id>` AT URIs.
fn parse_embed_ref(kind: SourceKind, embed: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = embed.split('/').collect();
    match kind {
        SourceKind::X => {
            if parts.len() < 2 {
                return None;
            }
            let udid = parts[parts.len() - 2];
            let post_id = parts[parts.len() - 1];
            // Tolerate ".../status/<id>" shapes where the user sits one
            // segment earlier.
            if udid == "status" && parts.len() >= 3 {
                Some((parts[parts.len() - 3].to_string(), post_id.to_string()))
            } else {
                Some((udid.to_string(), post_id.to_string()))
            }
        }
        SourceKind::Bsky => {
            if parts.len() < 3 {
                return None;
            }
            Some((
                parts[parts.len() - 3].to_string(),
                parts[parts.len() - 1].to_string(),
            ))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;

    fn fixture() -> (Store, CacheService) {
        let store = Store::open_memory().unwrap();

        let mut alice = User::new("alice", SourceKind::X);
        alice.nick = "Alice".to_string();
        store.upsert_user(&alice).unwrap();

        let mut quoted = Post::new("500", "alice", SourceKind::X);
        quoted.text_content = "the quoted one".to_string();
        quoted.time = "2024-01-01 00:00:00".to_string();
        store.upsert_post(&quoted).unwrap();

        let mut quoting = Post::new("501", "alice", SourceKind::X);
        quoting.text_content = "quoting".to_string();
        quoting.time = "2024-01-02 00:00:00".to_string();
        quoting.embed = "https://x.com/alice/status/500".to_string();
        store.upsert_post(&quoting).unwrap();

        let cache = CacheService::new();
        cache.run_cycle(&store);
        (store, cache)
    }

    #[test]
    fn embed_resolves_locally_when_archived() {
        let (store, cache) = fixture();
        let views = Views::new(&store, &cache, 30);
        let post = store.load_post("501", true).unwrap().unwrap();
        let embed = views.resolve_embed(&post).unwrap().unwrap();
        assert!(!embed.external);
        assert_eq!(embed.post_id, "500");
        assert_eq!(embed.nick, "Alice");
        assert_eq!(embed.text_content, "the quoted one");
    }

    #[test]
    fn embed_falls_back_to_external_stub() {
        let (store, cache) = fixture();
        let views = Views::new(&store, &cache, 30);
        let mut post = Post::new("502", "alice", SourceKind::X);
        post.embed = "https://x.com/stranger/status/999".to_string();
        store.upsert_post(&post).unwrap();

        let embed = views.resolve_embed(&post).unwrap().unwrap();
        assert!(embed.external);
        assert_eq!(embed.url, "https://x.com/stranger/status/999");
        assert!(embed.text_content.is_empty());
    }

    #[test]
    fn bsky_embed_ref_parses_at_uri() {
        assert_eq!(
            parse_embed_ref(
                SourceKind::Bsky,
                "at://did:plc:abc/app.bsky.feed.post/3kxyz"
            ),
            Some(("did:plc:abc".to_string(), "3kxyz".to_string()))
        );
        assert_eq!(
            parse_embed_ref(SourceKind::X, "https://x.com/alice/status/500"),
            Some(("alice".to_string(), "500".to_string()))
        );
    }

    #[test]
    fn favorites_page_substitutes_missing_posts() {
        let (store, cache) = fixture();
        store.add_favorite("500").unwrap();
        // Force a dangling favorite the way archive maintenance can: the
        // post row goes away underneath it.
        store
            .raw_query("DELETE FROM posts WHERE post_id = '500'", &[], false)
            .unwrap();
        store.clear_cache();

        let views = Views::new(&store, &cache, 30);
        let page = views.favorites(0).unwrap();
        assert_eq!(page.total, 1);
        let item = &page.items[0];
        assert!(item.missing);
        assert!(item.fav);
        assert!(item
            .post
            .text_content
            .contains("This post is missing from file system. [500]"));
    }

    #[test]
    fn timeline_assembles_full_views() {
        let (store, cache) = fixture();
        store.add_favorite("501").unwrap();
        let views = Views::new(&store, &cache, 30);
        let page = views.timeline(SortOrder::New, 0).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].post.post_id, "501");
        assert!(page.items[0].fav);
        assert!(page.items[0].embed.is_some());
        assert_eq!(page.items[0].user.as_ref().unwrap().nick, "Alice");
        assert!(!page.items[1].fav);
    }

    #[test]
    fn reply_expansion_synthesizes_placeholder_and_terminates() {
        let (store, cache) = fixture();
        let mut reply = Post::new("600", "alice", SourceKind::X);
        reply.time = "2024-01-03 00:00:00".to_string();
        reply.is_reply = true;
        reply.reply_to = "599@bob".to_string();
        store.upsert_post(&reply).unwrap();

        let views = Views::new(&store, &cache, 30);
        let expanded = views
            .expand_reply_targets(&["600".to_string()])
            .unwrap();
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].post_id, "599");
        assert_eq!(expanded[0].user_name, "bob");

        // The placeholder persisted.
        let placeholder = store.load_post("599", true).unwrap().unwrap();
        assert_eq!(placeholder.uid, "bob@x");
        assert_eq!(placeholder.time, "2024-01-03 00:00:00");
    }

    #[test]
    fn reply_expansion_survives_cycles() {
        let (store, cache) = fixture();
        for (id, target) in [("700", "701"), ("701", "700")] {
            let mut post = Post::new(id, "alice", SourceKind::X);
            post.is_reply = true;
            post.reply_to = format!("{target}@alice");
            store.upsert_post(&post).unwrap();
        }
        let views = Views::new(&store, &cache, 30);
        let expanded = views
            .expand_reply_targets(&["700".to_string()])
            .unwrap();
        // 701 joins once; the cycle back to 700 is already visited.
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].post_id, "701");
    }

    #[test]
    fn user_pages_sort_and_paginate() {
        let (store, cache) = fixture();
        for i in 0..5 {
            let mut media = Media::new(
                &format!("m{i}"),
                "500",
                "alice",
                SourceKind::X,
            );
            media.file_name = format!("m{i}.jpg");
            media.time = format!("2024-02-0{} 00:00:00", i + 1);
            store.upsert_media(&media).unwrap();
        }
        let views = Views::new(&store, &cache, 1);
        let posts = views.user_posts("alice@x", 0).unwrap();
        assert_eq!(posts.total, 2);
        assert_eq!(posts.items.len(), 1);
        assert_eq!(posts.items[0].post.post_id, "501");

        let media = views.user_media("alice@x", 0).unwrap();
        assert_eq!(media.total, 5);
        // Grid pages are double width; newest first.
        assert_eq!(media.items.len(), 2);
        assert_eq!(media.items[0].media_id, "m4");
    }

    #[test]
    fn search_pages_through_matches() {
        let (store, cache) = fixture();
        let views = Views::new(&store, &cache, 1);
        let page = views.search("quoting", 0).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].post.post_id, "501");
    }
}
