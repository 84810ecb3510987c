//! feedvault - archive and serving core for scraped social media content
//!
//! This library ingests content that an external downloader (gallery-dl or
//! the FurAffinity scraper) has already written to disk, normalizes it into
//! a unified `SQLite` store, and serves sorted, paginated, searchable views
//! over it while orchestrating further downloads.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`config`] - Layered configuration (file, environment)
//! - [`error`] - Custom error types
//! - [`source`] - Per-platform dispatch: URL shapes, filename patterns, commands
//! - [`model`] - Entity types (users, posts, media, embeds, jobs)
//! - [`store`] - Two-database `SQLite` store with query caching
//! - [`normalize`] - Per-source JSON-to-entity population
//! - [`scanner`] - Filesystem ingestion passes
//! - [`views`] - Page assembly for the presentation layer
//! - [`cache`] - Global timeline caches and the rebuild loop
//! - [`runner`] - Supervised subprocess execution
//! - [`worker`] - Download job queue and dispatch loop

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod normalize;
pub mod runner;
pub mod scanner;
pub mod source;
pub mod store;
pub mod views;
pub mod worker;

pub use cli::*;
pub use error::{Result, VaultError};
pub use model::{Media, Post, User};
pub use source::SourceKind;
pub use store::Store;

use std::cmp::Ordering;

/// Default main database filename
pub const DEFAULT_DB_NAME: &str = "feedvault.db";

/// Default favorites database filename
pub const DEFAULT_FAV_DB_NAME: &str = "favorites.db";

/// Get the default data directory for feedvault
#[must_use]
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("feedvault")
}

/// Compare two strings naturally: runs of digits are ordered by numeric
/// value, everything else byte-wise. `"post_9" < "post_10"` and
/// `"2024-01-02" < "2024-01-10"`.
///
/// Digit runs are compared without parsing (leading zeros stripped, then
/// length, then lexicographic), so arbitrarily long ids are safe.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ab = a.as_bytes();
    let mut bb = b.as_bytes();

    loop {
        match (ab.first(), bb.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&ca), Some(&cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let (na, rest_a) = split_digit_run(ab);
                    let (nb, rest_b) = split_digit_run(bb);
                    let trimmed_a = trim_leading_zeros(na);
                    let trimmed_b = trim_leading_zeros(nb);
                    let ord = trimmed_a
                        .len()
                        .cmp(&trimmed_b.len())
                        .then_with(|| trimmed_a.cmp(trimmed_b));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                    ab = rest_a;
                    bb = rest_b;
                } else {
                    if ca != cb {
                        return ca.cmp(&cb);
                    }
                    ab = &ab[1..];
                    bb = &bb[1..];
                }
            }
        }
    }
}

fn split_digit_run(s: &[u8]) -> (&[u8], &[u8]) {
    let end = s.iter().position(|b| !b.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

fn trim_leading_zeros(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|&b| b != b'0').unwrap_or(s.len() - 1);
    &s[start..]
}

/// Sort items naturally by a string key, descending. The tie-break rule used
/// everywhere a "most recent candidate wins" decision is needed.
pub fn natural_sort_desc<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> &str,
{
    items.sort_by(|x, y| natural_cmp(key(y), key(x)));
}

/// Format an epoch-seconds timestamp as the `%Y-%m-%d %H:%M` display form
/// used for user update times.
#[must_use]
pub fn format_epoch_minutes(epoch: f64) -> String {
    #[allow(clippy::cast_possible_truncation)]
    let epoch = epoch as i64;
    chrono::DateTime::from_timestamp(epoch, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default()
}

/// Stop side of a shutdown channel. Dropping it (or calling [`stop`]) wakes
/// every sleeping loop immediately.
///
/// [`stop`]: StopHandle::stop
pub struct StopHandle {
    tx: Option<crossbeam_channel::Sender<()>>,
}

/// Signal side of a shutdown channel, cloned into each background loop.
#[derive(Clone)]
pub struct StopSignal {
    rx: crossbeam_channel::Receiver<()>,
}

/// Create a linked stop handle/signal pair.
#[must_use]
pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = crossbeam_channel::bounded(0);
    (StopHandle { tx: Some(tx) }, StopSignal { rx })
}

impl StopHandle {
    /// Signal every holder of the paired [`StopSignal`] to stop.
    pub fn stop(&mut self) {
        self.tx = None;
    }
}

impl StopSignal {
    /// Sleep for `duration` or until shutdown. Returns false once stopped.
    #[must_use]
    pub fn sleep(&self, duration: std::time::Duration) -> bool {
        matches!(
            self.rx.recv_timeout(duration),
            Err(crossbeam_channel::RecvTimeoutError::Timeout)
        )
    }

    /// Whether shutdown has been signaled.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        matches!(
            self.rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{natural_cmp, natural_sort_desc};
    use std::cmp::Ordering;

    #[test]
    fn natural_cmp_orders_digit_runs_numerically() {
        assert_eq!(natural_cmp("post_9", "post_10"), Ordering::Less);
        assert_eq!(natural_cmp("10", "9"), Ordering::Greater);
        assert_eq!(natural_cmp("a2b", "a2b"), Ordering::Equal);
        assert_eq!(natural_cmp("007", "7"), Ordering::Equal);
        assert_eq!(natural_cmp("1748354156", "998"), Ordering::Greater);
    }

    #[test]
    fn natural_cmp_handles_huge_ids() {
        // Longer than u64 on purpose.
        let a = "184674033456729812345678901234567890";
        let b = "184674033456729812345678901234567891";
        assert_eq!(natural_cmp(a, b), Ordering::Less);
    }

    #[test]
    fn natural_cmp_mixed_text() {
        assert_eq!(
            natural_cmp("2024-01-02 09:00", "2024-01-10 08:00"),
            Ordering::Less
        );
        assert_eq!(natural_cmp("abc", "abd"), Ordering::Less);
        assert_eq!(natural_cmp("abc", "abcd"), Ordering::Less);
    }

    #[test]
    fn natural_sort_desc_newest_first() {
        let mut rows = vec![
            ("a", "2024-01-02 09:00"),
            ("b", "2024-01-10 08:00"),
            ("c", "2023-12-31 23:59"),
        ];
        natural_sort_desc(&mut rows, |r| r.1);
        let ids: Vec<_> = rows.iter().map(|r| r.0).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn stop_channel_wakes_sleepers() {
        let (mut handle, signal) = super::stop_channel();
        assert!(!signal.is_stopped());
        assert!(signal.sleep(std::time::Duration::from_millis(5)));

        let waiter = {
            let signal = signal.clone();
            std::thread::spawn(move || signal.sleep(std::time::Duration::from_secs(30)))
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        handle.stop();
        // The sleeping thread returns promptly instead of waiting 30s.
        assert!(!waiter.join().unwrap());
        assert!(signal.is_stopped());
    }
}
