//! Operator control: cancellation and snapshot requests.
//!
//! The monitor observes the `CancellationToken` at the top of every iteration and
//! while waiting out a recovery backoff. The token is cloned into the Ctrl-C handler
//! and the operator console; nothing else can stop the loop.

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lock, _) = &*self.inner;
        *lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for `timeout` or until cancelled. Returns `true` if cancelled.
    ///
    /// A timeout past the representable clock range waits for cancellation only.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now().checked_add(timeout);
        let mut cancelled = lock.lock().unwrap_or_else(|e| e.into_inner());
        while !*cancelled {
            cancelled = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    cvar.wait_timeout(cancelled, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => cvar.wait(cancelled).unwrap_or_else(|e| e.into_inner()),
            };
        }
        *cancelled
    }
}

/// One-shot request to save the next frame to disk.
#[derive(Clone, Debug, Default)]
pub struct SnapshotTrigger {
    requested: Arc<AtomicBool>,
}

impl SnapshotTrigger {
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Consume a pending request.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::SeqCst)
    }
}

/// Commands accepted on the operator console.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorCommand {
    Snapshot,
    Quit,
}

impl OperatorCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "s" | "S" | "snapshot" => Some(OperatorCommand::Snapshot),
            "q" | "Q" | "quit" => Some(OperatorCommand::Quit),
            _ => None,
        }
    }
}

/// Read operator commands from `input` until EOF or `q`.
pub fn run_console<R: BufRead>(input: R, token: &CancellationToken, snapshots: &SnapshotTrigger) {
    for line in input.lines() {
        let Ok(line) = line else {
            break;
        };
        match OperatorCommand::parse(&line) {
            Some(OperatorCommand::Snapshot) => {
                log::info!("operator requested a snapshot");
                snapshots.request();
            }
            Some(OperatorCommand::Quit) => {
                log::info!("operator requested shutdown");
                token.cancel();
                break;
            }
            None if line.trim().is_empty() => {}
            None => log::warn!("unknown operator command {:?} (use s or q)", line.trim()),
        }
    }
}

/// Run the console on stdin in a background thread.
pub fn spawn_stdin_console(token: CancellationToken, snapshots: SnapshotTrigger) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        run_console(stdin.lock(), &token, &snapshots);
    })
}
