//! Supervised execution of external downloader commands.
//!
//! Streams a child's stdout and stderr line-by-line (one reader thread per
//! pipe feeding a shared channel, so neither stream can stall the other)
//! and applies two independent policies to every line:
//!
//! 1. **Stop keywords** - a counter of consecutive matching lines; once it
//!    reaches the threshold the process group is terminated. gallery-dl
//!    prints a marker line per already-downloaded item, so a long run of
//!    them means no new content remains.
//! 2. **Triggers** - substring-to-callback pairs, e.g. flagging the account
//!    on an authorization failure.
//!
//! The child is placed in its own process group and the group is reaped on
//! every exit path: natural completion, keyword stop, external interrupt,
//! or runner failure.

use crate::error::VaultError;
use crate::Result;
use crossbeam_channel::unbounded;
use parking_lot::Mutex;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Consecutive stop-keyword matches required before termination.
pub const DEFAULT_STOP_THRESHOLD: usize = 12;

const SETTLE_DELAY: Duration = Duration::from_millis(400);
const TERM_GRACE: Duration = Duration::from_secs(1);
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for one supervised run.
pub struct RunOptions<'cb> {
    /// Substrings whose consecutive occurrence stops the command.
    pub stop_keywords: Vec<String>,
    /// Consecutive-match count that triggers the stop.
    pub stop_threshold: usize,
    /// Prefix the command with `stdbuf -oL -eL` for line-buffered output.
    pub unbuffered: bool,
    /// Substring-to-callback pairs checked against every output line.
    pub triggers: Vec<(String, Box<dyn Fn() + 'cb>)>,
}

impl Default for RunOptions<'_> {
    fn default() -> Self {
        Self {
            stop_keywords: Vec::new(),
            stop_threshold: DEFAULT_STOP_THRESHOLD,
            unbuffered: true,
            triggers: Vec::new(),
        }
    }
}

/// How a supervised run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    /// Child exit code, when it exited normally.
    pub exit_code: Option<i32>,
    /// The stop-keyword policy terminated the run.
    pub stopped_by_keyword: bool,
    /// An external interrupt terminated the run.
    pub interrupted: bool,
}

/// Runs one external command at a time under supervision.
#[derive(Default)]
pub struct CommandRunner {
    current_group: Arc<Mutex<Option<u32>>>,
    interrupted: Arc<AtomicBool>,
}

/// Cross-thread handle to interrupt whatever command is currently running.
#[derive(Clone)]
pub struct InterruptHandle {
    current_group: Arc<Mutex<Option<u32>>>,
    interrupted: Arc<AtomicBool>,
}

impl InterruptHandle {
    /// Kill the currently running command's process group. No-op when
    /// nothing is running.
    pub fn interrupt(&self) {
        let group = *self.current_group.lock();
        if let Some(pgid) = group {
            info!("Interrupting running command (pgid {pgid})");
            self.interrupted.store(true, Ordering::SeqCst);
            std::thread::sleep(SETTLE_DELAY);
            pg::kill_group(pgid, pg::SIGKILL);
        }
    }
}

impl CommandRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle usable from other threads to interrupt the active run.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            current_group: Arc::clone(&self.current_group),
            interrupted: Arc::clone(&self.interrupted),
        }
    }

    /// Run `argv` to completion under the configured policies.
    ///
    /// # Errors
    ///
    /// Returns an error when the command cannot be spawned. Output policy
    /// stops and non-zero exits are reported through [`RunOutcome`], not as
    /// errors.
    pub fn run(&self, argv: &[String], options: &RunOptions<'_>) -> Result<RunOutcome> {
        if argv.is_empty() {
            return Err(VaultError::command("empty command line"));
        }
        info!("[Running command] {}", argv.join(" "));
        self.interrupted.store(false, Ordering::SeqCst);

        let mut child = spawn_in_group(argv, options.unbuffered)?;
        let pgid = child.id();
        *self.current_group.lock() = Some(pgid);

        let outcome = self.supervise(&mut child, pgid, options);

        // The group registration must not outlive the run, whatever path
        // got us here.
        *self.current_group.lock() = None;
        reap(&mut child, pgid);
        let exit_code = child.wait().ok().and_then(|s| s.code());

        let mut outcome = outcome;
        outcome.exit_code = exit_code;
        outcome.interrupted = self.interrupted.load(Ordering::SeqCst);
        info!("[Command finished with exit code {:?}]", outcome.exit_code);
        Ok(outcome)
    }

    fn supervise(&self, child: &mut Child, pgid: u32, options: &RunOptions<'_>) -> RunOutcome {
        let (line_tx, line_rx) = unbounded::<String>();

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let tx = line_tx.clone();
            readers.push(std::thread::spawn(move || {
                for line in BufReader::new(stdout).lines().map_while(|l| l.ok()) {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = line_tx.clone();
            readers.push(std::thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(line_tx);

        let mut stop_count = 0usize;
        let mut stopped_by_keyword = false;

        // Both pipes closing ends the loop; an interrupt or keyword stop
        // kills the group, which closes them.
        for line in &line_rx {
            debug!("{line}");

            if !options.stop_keywords.is_empty() {
                if options.stop_keywords.iter().any(|k| line.contains(k.as_str())) {
                    stop_count += 1;
                    if stop_count >= options.stop_threshold {
                        info!("[Stopping command]");
                        stopped_by_keyword = true;
                        std::thread::sleep(SETTLE_DELAY);
                        pg::kill_group(pgid, pg::SIGTERM);
                        std::thread::sleep(TERM_GRACE);
                        if child.try_wait().ok().flatten().is_none() {
                            info!("[Force killing command]");
                            pg::kill_group(pgid, pg::SIGKILL);
                        }
                        break;
                    }
                } else {
                    stop_count = 0;
                }
            }

            for (needle, callback) in &options.triggers {
                if line.contains(needle.as_str()) {
                    info!("[Trigger '{needle}' activated]");
                    callback();
                }
            }
        }

        for reader in readers {
            let _ = reader.join();
        }

        RunOutcome {
            exit_code: None,
            stopped_by_keyword,
            interrupted: false,
        }
    }
}

fn spawn_in_group(argv: &[String], unbuffered: bool) -> Result<Child> {
    let mut full_argv: Vec<&str> = Vec::with_capacity(argv.len() + 3);
    if unbuffered && cfg!(unix) {
        // Line-buffer the child's pipes so policy lines arrive promptly.
        full_argv.extend(["stdbuf", "-oL", "-eL"]);
    }
    full_argv.extend(argv.iter().map(String::as_str));

    let mut command = Command::new(full_argv[0]);
    command
        .args(&full_argv[1..])
        .env("PYTHONUNBUFFERED", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null());
    pg::set_process_group(&mut command);

    command.spawn().map_err(|e| {
        VaultError::command(format!("failed to spawn '{}': {e}", full_argv[0]))
    })
}

/// Make sure neither the child nor its group is left running.
fn reap(child: &mut Child, pgid: u32) {
    let deadline = Instant::now() + REAP_TIMEOUT;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if Instant::now() >= deadline => {
                warn!("Process did not terminate in time, killing it.");
                pg::kill_group(pgid, pg::SIGKILL);
                let _ = child.kill();
                break;
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(100)),
            // Already reaped elsewhere.
            Err(_) => break,
        }
    }
    // A second kill tolerates the already-exited race.
    pg::kill_group(pgid, pg::SIGKILL);
}

#[cfg(unix)]
mod pg {
    //! Process-group plumbing. The child gets its own group so shell
    //! wrappers and their descendants die together.
    #![allow(unsafe_code)]

    use std::os::unix::process::CommandExt;
    use std::process::Command;

    pub const SIGTERM: i32 = libc::SIGTERM;
    pub const SIGKILL: i32 = libc::SIGKILL;

    pub fn set_process_group(command: &mut Command) {
        command.process_group(0);
    }

    pub fn kill_group(pgid: u32, signal: i32) {
        let Ok(pgid) = i32::try_from(pgid) else {
            return;
        };
        // killpg on a gone group returns ESRCH; that race is fine.
        unsafe {
            libc::killpg(pgid, signal);
        }
    }
}

#[cfg(not(unix))]
mod pg {
    use std::process::Command;

    pub const SIGTERM: i32 = 15;
    pub const SIGKILL: i32 = 9;

    pub fn set_process_group(_command: &mut Command) {}

    pub fn kill_group(_pgid: u32, _signal: i32) {}
}
