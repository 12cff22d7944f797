//! Interactive session: command dispatch over the module registry.

mod commands;

pub use commands::{parse, Command};

use crate::model::ResultTable;
use crate::modules::{Module, ModuleRegistry};
use crate::orchestrator::{LaunchOutcome, RunController, RunEvent, StopOutcome};
use crate::output::Console;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use time::macros::format_description;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const CORE_PROMPT: &str = "oblv";

/// Whether the console loop keeps reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Session {
    modules: ModuleRegistry,
    active: Option<Arc<dyn Module>>,
    controller: RunController,
    console: Console,
}

/// Console text for a background completion.
pub fn describe_event(event: &RunEvent) -> String {
    match event {
        RunEvent::Finished {
            prompt, results, elapsed, ..
        } => format!(
            "Module {prompt} finished executing in background ({results} results, {})",
            humantime::format_duration(truncate_millis(*elapsed))
        ),
    }
}

fn truncate_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}

fn truncate_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}

fn strings<const N: usize>(row: [&str; N]) -> Vec<String> {
    row.iter().map(|s| s.to_string()).collect()
}

impl Session {
    pub fn new(modules: ModuleRegistry, controller: RunController, console: Console) -> Self {
        Self {
            modules,
            active: None,
            controller,
            console,
        }
    }

    pub fn prompt(&self) -> String {
        match &self.active {
            Some(module) => format!("{CORE_PROMPT}>{}> ", module.prompt()),
            None => format!("{CORE_PROMPT}> "),
        }
    }

    /// Print what a background run reported.
    pub fn report(&self, event: &RunEvent) {
        let RunEvent::Finished { prompt, cancelled, .. } = event;
        info!(module = %prompt, cancelled, "background run reported");
        self.console.success(describe_event(event));
    }

    pub fn has_background_runs(&self) -> bool {
        !self.controller.active().is_empty()
    }

    /// Cancel every background run; called on exit.
    pub fn shutdown(&self) {
        for prompt in self.controller.stop_all() {
            self.console.warn(format!("Stopping module {prompt}"));
        }
        info!("session stopped");
    }

    pub async fn execute(&mut self, line: &str) -> Flow {
        let command = match parse(line) {
            None => return Flow::Continue,
            Some(Err(usage)) => {
                self.console.error(usage);
                return Flow::Continue;
            }
            Some(Ok(command)) => command,
        };
        info!(command = line.trim(), "console command");

        match command {
            Command::Help => self.help(),
            Command::Search(terms) => self.search(&terms),
            Command::Use(prompt) => self.use_module(prompt),
            Command::Options => self.options(),
            Command::Set { name, value } => self.set(name, value),
            Command::Run { background } => self.run(background).await,
            Command::Stop(target) => self.stop(target),
            Command::Show(target) => self.show(target),
            Command::Save(file) => self.save(file),
            Command::Jobs => self.jobs(),
            Command::Back => self.back(),
            Command::Exit => {
                self.shutdown();
                self.console.success("Exiting Oblivion.");
                return Flow::Exit;
            }
            Command::Unknown(name) => self.console.error(format!("Unknown command: {name}")),
        }
        Flow::Continue
    }

    fn active_or_warn(&self) -> Option<Arc<dyn Module>> {
        if self.active.is_none() {
            self.console.error("No active module.");
        }
        self.active.clone()
    }

    /// Explicit prompt argument, else the active module.
    fn target(&self, name: Option<&str>, usage: &str) -> Option<Arc<dyn Module>> {
        match name {
            Some(prompt) => {
                let found = self.modules.get(prompt);
                if found.is_none() {
                    self.console.error(format!("Module not found: {prompt}"));
                }
                found
            }
            None => {
                if self.active.is_none() {
                    self.console.error(usage);
                }
                self.active.clone()
            }
        }
    }

    fn help(&self) {
        let rows: Vec<Vec<String>> = commands::CORE_HELP.iter().map(|r| strings(*r)).collect();
        self.console.table(&[], &rows);
        if let Some(module) = &self.active {
            self.console.line("");
            self.console.table(&[], &module.help());
        }
    }

    fn search(&self, terms: &[&str]) {
        let terms: Vec<String> = if terms.is_empty() {
            vec!["*".to_string()]
        } else {
            terms.iter().map(|t| t.to_lowercase()).collect()
        };

        let mut found = BTreeSet::new();
        for module in self.modules.iter() {
            let haystack = [module.prompt(), module.name(), module.description(), module.author()]
                .map(str::to_lowercase);
            let hit = terms
                .iter()
                .any(|t| t == "*" || haystack.iter().any(|field| field.contains(t.as_str())));
            if hit {
                found.insert(strings([module.prompt(), module.name(), module.author(), module.description()]));
            }
        }

        if found.is_empty() {
            self.console.warn("No modules found.");
            return;
        }
        let rows: Vec<Vec<String>> = found.into_iter().collect();
        self.console.table(&strings(["Prompt", "Name", "Author", "Description"]), &rows);
    }

    fn use_module(&mut self, prompt: &str) {
        match self.modules.get(prompt) {
            Some(module) => self.active = Some(module),
            None => self.console.error(format!("Module not found: {prompt}")),
        }
    }

    fn options(&self) {
        let Some(module) = self.active_or_warn() else { return };
        let rows: Vec<Vec<String>> = module
            .options()
            .into_iter()
            .map(|o| vec![format!("  {}", o.name), o.value, o.required.to_string(), o.description])
            .collect();
        self.console.info(format!("Module options {}", module.prompt()));
        self.console.table(&strings(["  Name", "Current Setting", "Required", "Description"]), &rows);
    }

    fn set(&self, name: &str, value: &str) {
        let Some(module) = self.active_or_warn() else { return };
        match module.set(name, value) {
            Ok((name, value)) => self.console.info(format!("{name} => {value}")),
            Err(e) => {
                warn!(module = module.prompt(), option = e.name(), error = %e, "set rejected");
                self.console.error(format!("{}: {e}", e.name()));
            }
        }
    }

    async fn run(&self, background: bool) {
        let Some(module) = self.active_or_warn() else { return };
        let prompt = module.prompt();

        if background {
            match self.controller.run_background(module) {
                LaunchOutcome::Started => {
                    self.console.info(format!("Module {prompt} execution started in the background."))
                }
                LaunchOutcome::AlreadyRunning => self.console.warn(already_running(prompt)),
                LaunchOutcome::Invalid(e) => self.console.error(format!("Error: {e}")),
                LaunchOutcome::Completed(table) => self.print_results(prompt, &table),
            }
            return;
        }

        let cancel = CancellationToken::new();
        let run = self.controller.run_foreground(module, cancel.clone());
        tokio::pin!(run);
        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                    warn!(module = prompt, "foreground run interrupted");
                    self.console.warn("Interrupted, collecting partial results...");
                    cancel.cancel();
                }
            }
        };

        match outcome {
            LaunchOutcome::Completed(table) => self.print_results(prompt, &table),
            LaunchOutcome::AlreadyRunning => self.console.warn(already_running(prompt)),
            LaunchOutcome::Invalid(e) => self.console.error(format!("Error: {e}")),
            LaunchOutcome::Started => {}
        }
    }

    fn print_results(&self, prompt: &str, table: &ResultTable) {
        if table.is_empty() {
            self.console.warn(format!("No results for module {prompt}"));
        } else {
            self.console.results(table);
        }
    }

    fn stop(&self, target: Option<&str>) {
        let Some(module) = self.target(target, "Usage: stop <module>") else { return };
        let prompt = module.prompt();
        match self.controller.stop(prompt) {
            StopOutcome::Stopped => self.console.warn(format!("Stopping module {prompt}")),
            StopOutcome::NotRunning => self.console.error(format!("Module {prompt} is not running")),
        }
    }

    fn show(&self, target: Option<&str>) {
        let Some(module) = self.target(target, "Usage: show <module>") else { return };
        match module.results() {
            Ok(table) => self.print_results(module.prompt(), &table),
            Err(_) => self.console.warn(format!(
                "Module {} is running in the background. Try later.",
                module.prompt()
            )),
        }
    }

    fn save(&self, file: &str) {
        let Some(module) = self.active_or_warn() else { return };
        match module.save(Path::new(file)) {
            Ok(()) => {
                info!(module = module.prompt(), file, "results saved");
                self.console.success(format!("Results saved to {file}"));
            }
            Err(e) => {
                warn!(module = module.prompt(), file, error = %e, "save failed");
                self.console.error(format!("Error saving: {e}"));
            }
        }
    }

    fn jobs(&self) {
        let active = self.controller.active();
        if active.is_empty() {
            self.console.info("No modules running in the background.");
            return;
        }
        let clock = format_description!("[hour]:[minute]:[second]");
        let rows: Vec<Vec<String>> = active
            .into_iter()
            .map(|run| {
                vec![
                    run.prompt,
                    run.started_at.format(clock).unwrap_or_default(),
                    humantime::format_duration(truncate_secs(run.elapsed)).to_string(),
                ]
            })
            .collect();
        self.console.table(&strings(["Module", "Started", "Elapsed"]), &rows);
    }

    fn back(&mut self) {
        if self.active.take().is_some() {
            self.console.success("Returned to core.");
        }
    }
}

fn already_running(prompt: &str) -> String {
    format!("Module {prompt} is already running. Stop it first.")
}
