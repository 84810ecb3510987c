//! fv - archive service entry point.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};

use feedvault::cache::CacheService;
use feedvault::config::Config;
use feedvault::logging::{init_logging, LogConfig};
use feedvault::model::split_uid;
use feedvault::scanner::Scanner;
use feedvault::source::SourceKind;
use feedvault::store::Store;
use feedvault::worker::DownloadWorker;
use feedvault::{Cli, Commands, FlagArgs, RunArgs, ScanArgs, SearchArgs};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref());

    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };
    init_logging(&LogConfig {
        level,
        target: false,
        file: config.logging.file.clone(),
    })
    .context("failed to initialize logging")?;

    match &cli.command {
        Commands::Run(args) => cmd_run(&config, args),
        Commands::Scan(args) => cmd_scan(&config, args),
        Commands::Search(args) => cmd_search(&config, args),
        Commands::Flag(args) => cmd_flag(&config, args),
    }
}

fn open_store(config: &Config) -> Result<Store> {
    for kind in SourceKind::all() {
        let root = config.root(kind);
        if !root.exists() {
            std::fs::create_dir_all(&root)
                .with_context(|| format!("creating source root {}", root.display()))?;
        }
    }
    Ok(Store::open(config.db_path(), config.fav_db_path())?)
}

/// The startup scan: users for every source, posts and media for the
/// sources whose sidecars ingest unattended. FurAffinity post/media passes
/// run only through an explicit `scan --source fa`.
fn startup_scan(store: &Store, config: &Config, skip_content: bool) -> Result<()> {
    let scanner = Scanner::new(store, config);
    for kind in SourceKind::all() {
        scanner.scan_users(kind, None)?;
    }
    if !skip_content {
        for kind in [SourceKind::X, SourceKind::Bsky, SourceKind::Reddit] {
            scanner.scan_posts(kind, None)?;
            scanner.scan_media(kind, None)?;
        }
    }
    store.commit()?;
    info!("Scan finished.");
    Ok(())
}

fn cmd_run(config: &Config, args: &RunArgs) -> Result<()> {
    let store = Arc::new(open_store(config)?);
    startup_scan(&store, config, args.skip_scan)?;

    let cache = Arc::new(CacheService::new());
    let worker = Arc::new(DownloadWorker::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        config.clone(),
    ));

    let (mut stop_handle, stop_signal) = feedvault::stop_channel();
    let interval = std::time::Duration::from_secs(config.service.cache_interval_secs);

    let cache_thread = {
        let cache = Arc::clone(&cache);
        let store = Arc::clone(&store);
        let signal = stop_signal.clone();
        std::thread::spawn(move || cache.run_loop(&store, interval, &signal))
    };
    info!("Cache building thread started.");

    let worker_thread = {
        let worker = Arc::clone(&worker);
        let signal = stop_signal.clone();
        std::thread::spawn(move || worker.run_loop(&signal))
    };
    info!("Download worker started.");

    let daemon_thread = if args.update_daemon || config.service.update_daemon {
        info!("Starting update daemon...");
        let worker = Arc::clone(&worker);
        let signal = stop_signal.clone();
        Some(std::thread::spawn(move || {
            worker.enqueue_known_accounts(&signal);
        }))
    } else {
        None
    };

    info!("Ready.");
    wait_for_shutdown()?;

    info!("Shutting down...");
    worker.interrupt_handle().interrupt();
    stop_handle.stop();
    let _ = cache_thread.join();
    let _ = worker_thread.join();
    if let Some(daemon) = daemon_thread {
        let _ = daemon.join();
    }
    store.commit()?;
    Ok(())
}

fn wait_for_shutdown() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("failed to listen for shutdown signal")?;
    Ok(())
}

fn cmd_scan(config: &Config, args: &ScanArgs) -> Result<()> {
    let store = open_store(config)?;
    match &args.source {
        Some(tag) => {
            let kind = SourceKind::parse(tag)
                .with_context(|| format!("unknown source '{tag}' (expected x, bsky, reddit, fa)"))?;
            let scanner = Scanner::new(&store, config);
            scanner.scan_all(kind, args.user.as_deref())?;
        }
        None => startup_scan(&store, config, false)?,
    }
    store.commit()?;
    Ok(())
}

fn cmd_search(config: &Config, args: &SearchArgs) -> Result<()> {
    let store = open_store(config)?;
    let hits = store.query_posts_by_text(&args.query)?;
    let per_page = config.service.items_per_page;
    let page = args.page.saturating_sub(1);

    println!("{} matching posts", hits.len());
    for (post_id, time) in hits.iter().skip(page * per_page).take(per_page) {
        if let Some(post) = store.load_post(post_id, false)? {
            println!("{time}  [{}]  {}", post.uid, post.url);
        } else {
            println!("{time}  [{post_id}]");
        }
    }
    Ok(())
}

fn cmd_flag(config: &Config, args: &FlagArgs) -> Result<()> {
    let (user_name, tag) = split_uid(&args.uid);
    let kind = tag
        .and_then(SourceKind::parse)
        .with_context(|| format!("'{}' is not a user_name@source key", args.uid))?;
    let store = open_store(config)?;
    store.flag_user(user_name, kind)?;
    println!("Flagged {}", args.uid);
    Ok(())
}
