use super::{Module, ModuleCore, ModuleInfo};
use crate::engine::{run_pool, PoolConfig};
use crate::errors::ModuleError;
use crate::model::{OptionSet, OptionValue, ResultTable, RunOutput};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Free passive sources; `%s` is replaced with the domain.
const DEFAULT_SOURCES: &[&str] = &[
    "https://api.certspotter.com/v1/issuances?domain=%s&expand=dns_names&expand=issuer",
    "https://crt.sh/?q=%s&output=json",
    "https://urlscan.io/api/v1/search/?q=domain:%s",
    "https://otx.alienvault.com/api/v1/indicators/domain/%s/passive_dns",
    "https://jldc.me/anubis/subdomains/%s",
    "https://api.hackertarget.com/hostsearch/?q=%s",
];

pub struct SubdomainsSearch {
    core: ModuleCore,
}

impl SubdomainsSearch {
    pub fn new() -> Self {
        Self::with_sources(DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect())
    }

    pub fn with_sources(sources: Vec<String>) -> Self {
        let options = OptionSet::new()
            .add_fixed("SOURCES_URI", OptionValue::List(sources), "Sources queried for subdomains")
            .add_text("DOMAIN", "", true, "Domain to search subdomains for")
            .add_flag("FILTER_BY_DOMAIN", false, "Keep only names under the base domain")
            .add_int("TIMEOUT", 10, false, "HTTP timeout per source in seconds");

        Self {
            core: ModuleCore::new(
                ModuleInfo {
                    name: "Subdomains Search",
                    author: "Luca Cuzzolin",
                    description: "Passive subdomain search across public certificate and DNS datasets",
                    prompt: "subdomains_search",
                },
                options,
            ),
        }
    }
}

impl Default for SubdomainsSearch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    CertSpotter,
    CrtSh,
    Urlscan,
    AlienVault,
    Anubis,
    HackerTarget,
    Unknown,
}

impl SourceKind {
    fn detect(url: &str) -> Self {
        if url.contains("certspotter") {
            SourceKind::CertSpotter
        } else if url.contains("crt.sh") {
            SourceKind::CrtSh
        } else if url.contains("urlscan.io") {
            SourceKind::Urlscan
        } else if url.contains("alienvault") {
            SourceKind::AlienVault
        } else if url.contains("jldc.me") {
            SourceKind::Anubis
        } else if url.contains("hackertarget") {
            SourceKind::HackerTarget
        } else {
            SourceKind::Unknown
        }
    }
}

/// Lowercase, strip wildcard label and trailing dot.
fn normalize(name: &str) -> Option<String> {
    let name = name.trim().trim_end_matches('.').to_lowercase();
    let name = name.strip_prefix("*.").map(str::to_string).unwrap_or(name);
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

fn str_field<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter().try_fold(value, |v, key| v.get(key))?.as_str()
}

fn parse_source(kind: SourceKind, body: &str) -> Vec<String> {
    let raw: Vec<String> = if kind == SourceKind::HackerTarget {
        body.lines()
            .filter_map(|l| l.split(',').next())
            .map(str::to_string)
            .collect()
    } else {
        let json: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                debug!(?kind, "unparseable source response: {e}");
                return Vec::new();
            }
        };
        let entries = || json.as_array().into_iter().flatten();
        match kind {
            SourceKind::CrtSh => entries()
                .filter_map(|e| str_field(e, &["name_value"]))
                .flat_map(|names| names.split_whitespace())
                .map(str::to_string)
                .collect(),
            SourceKind::CertSpotter => entries()
                .filter_map(|e| e.get("dns_names").and_then(Value::as_array))
                .flatten()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            SourceKind::Urlscan => json
                .get("results")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|r| str_field(r, &["page", "domain"]))
                .map(str::to_string)
                .collect(),
            SourceKind::AlienVault => json
                .get("passive_dns")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(|r| str_field(r, &["hostname"]))
                .map(str::to_string)
                .collect(),
            SourceKind::Anubis | SourceKind::Unknown | SourceKind::HackerTarget => {
                entries().filter_map(Value::as_str).map(str::to_string).collect()
            }
        }
    };
    raw.iter().filter_map(|n| normalize(n)).collect()
}

async fn fetch_source(client: &reqwest::Client, template: &str, domain: &str) -> Vec<String> {
    let url = template.replace("%s", domain);
    let resp = match client.get(&url).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!(source = %url, "fetch failed: {e}");
            return Vec::new();
        }
    };
    match resp.text().await {
        Ok(body) => parse_source(SourceKind::detect(template), &body),
        Err(e) => {
            warn!(source = %url, "reading body failed: {e}");
            Vec::new()
        }
    }
}

fn under_domain(name: &str, domain: &str) -> bool {
    name == domain || name.ends_with(&format!(".{domain}"))
}

#[async_trait]
impl Module for SubdomainsSearch {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    async fn execute(&self, opts: OptionSet, cancel: CancellationToken) -> Result<RunOutput, ModuleError> {
        let domain = opts.text("DOMAIN").trim_end_matches('.').to_lowercase();
        let sources = opts.list("SOURCES_URI");
        let secs = opts.int("TIMEOUT").filter(|s| *s > 0).unwrap_or(10) as u64;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(secs))
            .user_agent(concat!("oblivion/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ModuleError::setup(format!("failed to build HTTP client: {e}")))?;

        let pool = PoolConfig::new(Some(sources.len() as i64), 1);
        let shared = Arc::new((client, domain.clone()));
        let mut found = run_pool(sources, pool, &cancel, move |template| {
            let shared = shared.clone();
            async move {
                let (client, domain) = &*shared;
                fetch_source(client, &template, domain).await
            }
        })
        .await;

        if opts.flag("FILTER_BY_DOMAIN") {
            found.retain(|n| under_domain(n, &domain));
        }
        Ok(RunOutput::table(ResultTable::from_items(found)))
    }
}
