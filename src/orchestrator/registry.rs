//! Session-scoped table of background runs.
//!
//! Every read-modify-write goes through one mutex, which is never held across
//! an await: the registry only hands out cancellation tokens, the run itself
//! happens elsewhere.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle kept while a module runs in the background.
#[derive(Debug, Clone)]
struct RunHandle {
    id: u64,
    token: CancellationToken,
    started: Instant,
    started_at: OffsetDateTime,
}

/// What `try_register` gives the launcher: the token to run with and the id to complete with.
#[derive(Debug, Clone)]
pub struct RunTicket {
    pub id: u64,
    pub token: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NotRunning,
}

/// One line of `jobs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveRun {
    pub prompt: String,
    pub started_at: OffsetDateTime,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    runs: HashMap<String, RunHandle>,
}

#[derive(Debug, Default)]
pub struct RunRegistry {
    inner: Mutex<Inner>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a run for `prompt` unless one is already registered or `busy` reports
    /// the module still winding down. The check and the insert happen under the same lock.
    pub fn try_register(&self, prompt: &str, busy: impl FnOnce() -> bool) -> Option<RunTicket> {
        let mut inner = self.lock();
        if inner.runs.contains_key(prompt) || busy() {
            return None;
        }
        inner.next_id += 1;
        let handle = RunHandle {
            id: inner.next_id,
            token: CancellationToken::new(),
            started: Instant::now(),
            started_at: OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc()),
        };
        let ticket = RunTicket {
            id: handle.id,
            token: handle.token.clone(),
        };
        inner.runs.insert(prompt.to_string(), handle);
        debug!(module = prompt, run_id = ticket.id, "run registered");
        Some(ticket)
    }

    /// Cancel and forget the run for `prompt`.
    pub fn stop(&self, prompt: &str) -> StopOutcome {
        let mut inner = self.lock();
        match inner.runs.remove(prompt) {
            Some(handle) => {
                handle.token.cancel();
                debug!(module = prompt, run_id = handle.id, "run cancelled");
                StopOutcome::Stopped
            }
            None => StopOutcome::NotRunning,
        }
    }

    /// Drop the handle once the run has returned. Only the run that registered
    /// it can remove it; returns false if it was already stopped.
    pub fn complete(&self, prompt: &str, id: u64) -> bool {
        let mut inner = self.lock();
        if inner.runs.get(prompt).is_some_and(|h| h.id == id) {
            inner.runs.remove(prompt);
            return true;
        }
        false
    }

    pub fn contains(&self, prompt: &str) -> bool {
        self.lock().runs.contains_key(prompt)
    }

    /// Active runs sorted by prompt.
    pub fn active(&self) -> Vec<ActiveRun> {
        let inner = self.lock();
        let mut runs: Vec<ActiveRun> = inner
            .runs
            .iter()
            .map(|(prompt, h)| ActiveRun {
                prompt: prompt.clone(),
                started_at: h.started_at,
                elapsed: h.started.elapsed(),
            })
            .collect();
        runs.sort_by(|a, b| a.prompt.cmp(&b.prompt));
        runs
    }

    /// Cancel every run; returns the prompts that were stopped.
    pub fn stop_all(&self) -> Vec<String> {
        let mut inner = self.lock();
        let mut stopped: Vec<String> = inner
            .runs
            .drain()
            .map(|(prompt, handle)| {
                handle.token.cancel();
                prompt
            })
            .collect();
        stopped.sort();
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn concurrent_registration_admits_exactly_one() {
        let registry = Arc::new(RunRegistry::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    registry.try_register("dnsbrute", || false).is_some()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join())
            .filter(|joined| matches!(joined, Ok(true)))
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(registry.active().len(), 1);
    }

    #[test]
    fn stop_cancels_and_removes() {
        let registry = RunRegistry::new();
        let ticket = registry.try_register("fuzzer", || false).unwrap();
        assert_eq!(registry.stop("fuzzer"), StopOutcome::Stopped);
        assert!(ticket.token.is_cancelled());
        assert!(!registry.contains("fuzzer"));
        assert!(!registry.complete("fuzzer", ticket.id));
    }

    #[test]
    fn stopping_idle_module_changes_nothing() {
        let registry = RunRegistry::new();
        registry.try_register("webspider", || false).unwrap();
        assert_eq!(registry.stop("portscanner"), StopOutcome::NotRunning);
        assert_eq!(registry.active().len(), 1);
        assert_eq!(registry.active()[0].prompt, "webspider");
    }

    #[test]
    fn busy_module_is_not_registered() {
        let registry = RunRegistry::new();
        assert!(registry.try_register("dnsbrute", || true).is_none());
        assert!(registry.active().is_empty());
    }

    #[test]
    fn stale_completion_leaves_newer_run_alone() {
        let registry = RunRegistry::new();
        let first = registry.try_register("dnsbrute", || false).unwrap();
        registry.stop("dnsbrute");
        let second = registry.try_register("dnsbrute", || false).unwrap();

        assert!(!registry.complete("dnsbrute", first.id));
        assert!(registry.contains("dnsbrute"));
        assert!(registry.complete("dnsbrute", second.id));
    }

    #[test]
    fn stop_all_cancels_everything() {
        let registry = RunRegistry::new();
        let a = registry.try_register("webspider", || false).unwrap();
        let b = registry.try_register("dnsbrute", || false).unwrap();
        assert_eq!(registry.stop_all(), vec!["dnsbrute", "webspider"]);
        assert!(a.token.is_cancelled() && b.token.is_cancelled());
        assert!(registry.active().is_empty());
    }
}
