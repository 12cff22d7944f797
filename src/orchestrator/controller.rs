//! Run lifecycle controller.
//!
//! Decides how a module run is launched, wraps it in `start`/`stop`, and
//! reports background completions to the console as [`RunEvent`]s.

use super::registry::{ActiveRun, RunRegistry, StopOutcome};
use crate::errors::ModuleError;
use crate::model::ResultTable;
use crate::modules::Module;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Emitted by background runs for the console to print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Finished {
        prompt: String,
        /// Result items published by the run.
        results: usize,
        elapsed: Duration,
        cancelled: bool,
    },
}

#[derive(Debug)]
pub enum LaunchOutcome {
    /// Foreground run returned.
    Completed(ResultTable),
    /// Background run spawned.
    Started,
    AlreadyRunning,
    Invalid(ModuleError),
}

/// Flips the module's running flag for the lifetime of a run and, for
/// background runs, releases the registry entry. Runs on drop so a panicking
/// module still ends up idle.
struct LifecycleGuard {
    module: Arc<dyn Module>,
    registration: Option<(Arc<RunRegistry>, u64)>,
}

impl LifecycleGuard {
    fn start(module: Arc<dyn Module>, registration: Option<(Arc<RunRegistry>, u64)>) -> Self {
        module.start();
        Self { module, registration }
    }
}

impl Drop for LifecycleGuard {
    fn drop(&mut self) {
        self.module.stop();
        if let Some((registry, id)) = &self.registration {
            registry.complete(self.module.prompt(), *id);
        }
    }
}

pub struct RunController {
    registry: Arc<RunRegistry>,
    events: UnboundedSender<RunEvent>,
}

impl RunController {
    pub fn new(events: UnboundedSender<RunEvent>) -> Self {
        Self {
            registry: Arc::new(RunRegistry::new()),
            events,
        }
    }

    /// Run in the caller's task. Not registered, so only `cancel` can interrupt it.
    pub async fn run_foreground(&self, module: Arc<dyn Module>, cancel: CancellationToken) -> LaunchOutcome {
        let prompt = module.prompt();
        if self.registry.contains(prompt) || module.running() {
            return LaunchOutcome::AlreadyRunning;
        }
        debug!(module = prompt, "foreground run");
        let _guard = LifecycleGuard::start(module.clone(), None);
        LaunchOutcome::Completed(module.run(cancel).await)
    }

    /// Validate, register and spawn. The registry entry exists before this returns.
    pub fn run_background(&self, module: Arc<dyn Module>) -> LaunchOutcome {
        if let Err(e) = module.validate() {
            return LaunchOutcome::Invalid(e);
        }
        let prompt = module.prompt();
        let Some(ticket) = self.registry.try_register(prompt, || module.running()) else {
            return LaunchOutcome::AlreadyRunning;
        };

        info!(module = prompt, run_id = ticket.id, "background run started");
        let guard = LifecycleGuard::start(module.clone(), Some((self.registry.clone(), ticket.id)));
        let events = self.events.clone();
        tokio::spawn(async move {
            let started = Instant::now();
            let table = module.run(ticket.token.clone()).await;
            drop(guard);

            let event = RunEvent::Finished {
                prompt: module.prompt().to_string(),
                results: table.items,
                elapsed: started.elapsed(),
                cancelled: ticket.token.is_cancelled(),
            };
            // The console may already be gone during shutdown.
            let _ = events.send(event);
        });
        LaunchOutcome::Started
    }

    pub fn stop(&self, prompt: &str) -> StopOutcome {
        let outcome = self.registry.stop(prompt);
        if outcome == StopOutcome::Stopped {
            info!(module = prompt, "background run stopped");
        }
        outcome
    }

    pub fn active(&self) -> Vec<ActiveRun> {
        self.registry.active()
    }

    pub fn stop_all(&self) -> Vec<String> {
        let stopped = self.registry.stop_all();
        if !stopped.is_empty() {
            info!(modules = ?stopped, "stopped all background runs");
        }
        stopped
    }
}
