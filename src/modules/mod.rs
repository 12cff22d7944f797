//! Module contract and the built-in reconnaissance modules.
//!
//! A module is constructed once at startup, registered by its prompt and then
//! driven by the session: options are changed through [`Module::set`], work is
//! done by [`Module::run`], and the last result set is read back with
//! [`Module::results`] or written out with [`Module::save`]. Every module keeps
//! its shared state in a [`ModuleCore`]; the trait's provided methods operate on
//! it so an implementation only supplies its identity and [`Module::execute`].

pub mod dns;
pub mod dnsbrute;
pub mod fuzzer;
mod help;
pub mod portscanner;
mod registry;
pub mod subdomain_takeover;
pub mod subdomains_search;
pub mod webspider;

pub use registry::ModuleRegistry;

use crate::errors::{ModuleError, OptionError};
use crate::model::{OptionRecord, OptionSet, ResultTable, RunOutput};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Static identity of a module.
#[derive(Debug, Clone, Copy)]
pub struct ModuleInfo {
    pub name: &'static str,
    pub author: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
}

#[derive(Debug, Default)]
struct Published {
    table: ResultTable,
    records: Option<serde_json::Value>,
}

/// State every module carries: identity, options, last results and the running flag.
#[derive(Debug)]
pub struct ModuleCore {
    info: ModuleInfo,
    options: RwLock<OptionSet>,
    published: RwLock<Published>,
    running: AtomicBool,
}

impl ModuleCore {
    pub fn new(info: ModuleInfo, options: OptionSet) -> Self {
        Self {
            info,
            options: RwLock::new(options),
            published: RwLock::new(Published::default()),
            running: AtomicBool::new(false),
        }
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    /// Copy of the current options; a run works from this so later `set` calls cannot affect it.
    pub fn snapshot(&self) -> OptionSet {
        self.options
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_option(&self, name: &str, raw: &str) -> Result<(String, String), OptionError> {
        self.options
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set(name, raw)
    }

    fn publish(&self, output: RunOutput) {
        let mut slot = self.published.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Published {
            table: output.table,
            records: output.records,
        };
    }

    fn results(&self) -> Result<ResultTable, ModuleError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ModuleError::Busy {
                prompt: self.info.prompt.to_string(),
            });
        }
        Ok(self
            .published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .table
            .clone())
    }

    fn save(&self, path: &Path) -> Result<(), ModuleError> {
        let payload = {
            let published = self.published.read().unwrap_or_else(PoisonError::into_inner);
            if published.table.is_empty() {
                return Err(ModuleError::NoResults);
            }
            encode_results(&published)?
        };

        if let Err(source) = std::fs::write(path, payload) {
            let _ = std::fs::remove_file(path);
            return Err(ModuleError::Save {
                path: path.to_path_buf(),
                source,
            });
        }
        Ok(())
    }
}

/// Structured records are written as pretty JSON, plain tables as one line per row.
fn encode_results(published: &Published) -> Result<String, ModuleError> {
    if let Some(records) = &published.records {
        let mut out = serde_json::to_string_pretty(records)?;
        out.push('\n');
        return Ok(out);
    }
    let mut out = String::new();
    for row in &published.table.rows {
        out.push_str(&row.join(","));
        out.push('\n');
    }
    Ok(out)
}

#[async_trait]
pub trait Module: Send + Sync {
    fn core(&self) -> &ModuleCore;

    /// Module specific work over a validated option snapshot.
    ///
    /// Must return promptly once `cancel` fires, with whatever was gathered.
    async fn execute(&self, opts: OptionSet, cancel: CancellationToken) -> Result<RunOutput, ModuleError>;

    fn name(&self) -> &'static str {
        self.core().info().name
    }

    fn author(&self) -> &'static str {
        self.core().info().author
    }

    fn description(&self) -> &'static str {
        self.core().info().description
    }

    fn prompt(&self) -> &'static str {
        self.core().info().prompt
    }

    fn options(&self) -> Vec<OptionRecord> {
        self.core().snapshot().records()
    }

    fn set(&self, name: &str, raw: &str) -> Result<(String, String), OptionError> {
        self.core().set_option(name, raw)
    }

    /// Pre-run check of required options.
    fn validate(&self) -> Result<(), ModuleError> {
        match self.core().snapshot().first_missing() {
            Some(name) => Err(ModuleError::MissingOption { name: name.to_string() }),
            None => Ok(()),
        }
    }

    /// Execute and publish. Errors come back as a one-row table and leave the
    /// previous results in place; a cancelled run publishes its partial results.
    async fn run(&self, cancel: CancellationToken) -> ResultTable {
        let core = self.core();
        let prompt = core.info().prompt;
        let opts = core.snapshot();
        if let Some(name) = opts.first_missing() {
            let err = ModuleError::MissingOption { name: name.to_string() };
            warn!(module = prompt, error = %err, "run rejected");
            return ResultTable::error(err);
        }

        let started = Instant::now();
        info!(module = prompt, "run started");
        match self.execute(opts, cancel.clone()).await {
            Ok(output) => {
                let table = output.table.clone();
                info!(
                    module = prompt,
                    rows = table.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    cancelled = cancel.is_cancelled(),
                    "run finished"
                );
                core.publish(output);
                table
            }
            Err(e) => {
                warn!(module = prompt, error = %e, "run failed");
                ResultTable::error(e)
            }
        }
    }

    fn results(&self) -> Result<ResultTable, ModuleError> {
        self.core().results()
    }

    fn save(&self, path: &Path) -> Result<(), ModuleError> {
        self.core().save(path)
    }

    fn help(&self) -> Vec<Vec<String>> {
        help::help_rows(self.prompt(), &self.core().snapshot())
    }

    fn start(&self) {
        self.core().running.store(true, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.core().running.store(false, Ordering::SeqCst);
    }

    fn running(&self) -> bool {
        self.core().running.load(Ordering::SeqCst)
    }
}

/// Construct and register every built-in module.
pub fn load_modules() -> ModuleRegistry {
    let mut registry = ModuleRegistry::default();
    registry.register(Arc::new(dnsbrute::DnsBrute::new()));
    registry.register(Arc::new(portscanner::PortScanner::new()));
    registry.register(Arc::new(subdomains_search::SubdomainsSearch::new()));
    registry.register(Arc::new(subdomain_takeover::SubdomainTakeover::new()));
    registry.register(Arc::new(webspider::WebSpider::new()));
    registry.register(Arc::new(fuzzer::Fuzzer::new()));
    info!(count = registry.len(), "modules loaded");
    registry
}

#[cfg(test)]
mod tests {
    use super::dns::testing::ScriptedDns;
    use super::dnsbrute::DnsBrute;
    use super::*;

    fn brute() -> DnsBrute {
        DnsBrute::with_dns(Arc::new(ScriptedDns::with_hosts(["www.example.com", "api.example.com"])))
    }

    #[tokio::test]
    async fn missing_required_option_is_reported_without_running() {
        let module = brute();
        let table = module.run(CancellationToken::new()).await;
        assert_eq!(table.rows, vec![vec!["Error: DOMAIN not set".to_string()]]);
        assert!(module.results().unwrap().is_empty());
    }

    #[tokio::test]
    async fn results_are_published_after_run() {
        let module = brute();
        module.set("DOMAIN", "example.com").unwrap();
        module.set("WORDLIST", "www,api,nope").unwrap();

        let table = module.run(CancellationToken::new()).await;
        assert_eq!(table, module.results().unwrap());
        assert_eq!(
            table.rows,
            vec![vec!["api.example.com".to_string()], vec!["www.example.com".to_string()]]
        );
    }

    #[test]
    fn results_are_refused_while_running() {
        let module = brute();
        module.start();
        assert!(matches!(module.results(), Err(ModuleError::Busy { .. })));
        module.stop();
        assert!(module.results().is_ok());
    }

    #[test]
    fn save_without_results_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");

        let err = brute().save(&path).unwrap_err();
        assert!(matches!(err, ModuleError::NoResults));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn save_writes_one_line_per_row() {
        let module = brute();
        module.set("DOMAIN", "example.com").unwrap();
        module.set("WORDLIST", "www,api").unwrap();
        module.run(CancellationToken::new()).await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        module.save(&path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "api.example.com\nwww.example.com\n"
        );
    }

    #[test]
    fn save_reports_unwritable_path() {
        let core = ModuleCore::new(
            ModuleInfo {
                name: "t",
                author: "t",
                description: "t",
                prompt: "t",
            },
            OptionSet::new(),
        );
        core.publish(RunOutput::table(ResultTable::from_items(vec!["x".to_string()])));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("out.txt");
        assert!(matches!(core.save(&path), Err(ModuleError::Save { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn every_builtin_module_is_registered() {
        let registry = load_modules();
        assert_eq!(
            registry.list(),
            vec![
                "dnsbrute",
                "fuzzer",
                "portscanner",
                "subdomain_takeover",
                "subdomains_search",
                "webspider"
            ]
        );
    }
}
