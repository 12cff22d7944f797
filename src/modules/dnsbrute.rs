use super::dns::{DnsClient, SystemDns};
use super::{Module, ModuleCore, ModuleInfo};
use crate::engine::{run_pool, PoolConfig};
use crate::errors::ModuleError;
use crate::model::{ListCheck, OptionSet, ResultTable, RunOutput};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_THREADS: usize = 20;

pub struct DnsBrute {
    core: ModuleCore,
    dns: Option<Arc<dyn DnsClient>>,
}

impl DnsBrute {
    pub fn new() -> Self {
        let options = OptionSet::new()
            .add_text("DOMAIN", "", true, "Domain to brute force")
            .add_list("WORDLIST", ListCheck::Any, true, "Subdomain prefixes, comma separated or a file path")
            .add_int("THREADS", DEFAULT_THREADS as i64, false, "Number of concurrent lookups")
            .add_flag("SUFFIXES", false, "Also probe numeric suffixes on every name that resolves");

        Self {
            core: ModuleCore::new(
                ModuleInfo {
                    name: "DNS Brute Force",
                    author: "Luca Cuzzolin",
                    description: "Brute-force subdomains using a wordlist and DNS resolution, optionally appending numeric suffixes to found hosts.",
                    prompt: "dnsbrute",
                },
                options,
            ),
            dns: None,
        }
    }

    /// Use `dns` instead of the system resolver.
    pub fn with_dns(dns: Arc<dyn DnsClient>) -> Self {
        Self {
            dns: Some(dns),
            ..Self::new()
        }
    }
}

impl Default for DnsBrute {
    fn default() -> Self {
        Self::new()
    }
}

/// `1, 01, 001, -1, -01, -001` and so on up to 10.
fn number_suffixes() -> Vec<String> {
    (1..=10)
        .flat_map(|i| {
            [
                format!("{i}"),
                format!("{i:02}"),
                format!("{i:03}"),
                format!("-{i}"),
                format!("-0{i}"),
                format!("-00{i}"),
            ]
        })
        .collect()
}

#[async_trait]
impl Module for DnsBrute {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    async fn execute(&self, opts: OptionSet, cancel: CancellationToken) -> Result<RunOutput, ModuleError> {
        let domain = opts.text("DOMAIN").trim_end_matches('.').to_lowercase();
        let words = opts.list("WORDLIST");
        let pool = PoolConfig::new(opts.int("THREADS"), DEFAULT_THREADS);
        let suffixes = if opts.flag("SUFFIXES") {
            number_suffixes()
        } else {
            Vec::new()
        };
        let dns = match &self.dns {
            Some(dns) => dns.clone(),
            None => SystemDns::shared()?,
        };

        debug!(domain = %domain, words = words.len(), workers = pool.workers, "dns brute force");
        let domain: Arc<str> = domain.into();
        let resolver = dns.clone();
        let base_domain = domain.clone();
        let bases = run_pool(words, pool, &cancel, move |word| {
            let dns = resolver.clone();
            let domain = base_domain.clone();
            async move {
                let fqdn = format!("{word}.{domain}");
                if dns.resolves(&fqdn).await {
                    vec![(word, fqdn)]
                } else {
                    Vec::new()
                }
            }
        })
        .await;

        let mut found: BTreeSet<String> = bases.iter().map(|(_, fqdn)| fqdn.clone()).collect();
        if !suffixes.is_empty() && !cancel.is_cancelled() {
            // One task per suffixed name of every word that resolved.
            let domain: &str = &domain;
            let candidates: Vec<String> = bases
                .iter()
                .flat_map(|(word, _)| suffixes.iter().map(move |suffix| format!("{word}{suffix}.{domain}")))
                .collect();
            debug!(candidates = candidates.len(), "probing numeric suffixes");
            found.extend(
                run_pool(candidates, pool, &cancel, move |candidate| {
                    let dns = dns.clone();
                    async move {
                        if dns.resolves(&candidate).await {
                            vec![candidate]
                        } else {
                            Vec::new()
                        }
                    }
                })
                .await,
            );
        }

        Ok(RunOutput::table(ResultTable::from_items(found)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::dns::testing::ScriptedDns;
    use std::time::{Duration, Instant};

    #[test]
    fn suffixes_cover_padding_variants() {
        let s = number_suffixes();
        assert_eq!(s.len(), 60);
        assert_eq!(&s[..6], &["1", "01", "001", "-1", "-01", "-001"]);
        assert!(s.contains(&"010".to_string()));
    }

    #[tokio::test]
    async fn suffixes_are_only_probed_for_resolving_words() {
        let dns = Arc::new(ScriptedDns::with_hosts([
            "dev.example.com",
            "dev01.example.com",
            "dev-2.example.com",
            "test1.example.com",
        ]));
        let module = DnsBrute::with_dns(dns);
        module.set("DOMAIN", "Example.com.").unwrap();
        module.set("WORDLIST", "dev,test").unwrap();
        module.set("SUFFIXES", "true").unwrap();

        let table = module.run(CancellationToken::new()).await;
        let names: Vec<_> = table.rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(names, vec!["dev-2.example.com", "dev.example.com", "dev01.example.com"]);
    }

    #[tokio::test]
    async fn non_positive_threads_fall_back_to_default() {
        let dns = Arc::new(ScriptedDns::with_hosts(["a.example.com"]));
        let module = DnsBrute::with_dns(dns);
        module.set("DOMAIN", "example.com").unwrap();
        module.set("WORDLIST", "a,b").unwrap();
        module.set("THREADS", "0").unwrap();

        let table = module.run(CancellationToken::new()).await;
        assert_eq!(table.rows, vec![vec!["a.example.com".to_string()]]);
    }

    #[tokio::test]
    async fn resolved_names_survive_a_stop_during_suffix_probing() {
        let dns = Arc::new(
            ScriptedDns::with_hosts(["dev.example.com", "dev1.example.com"]).slow_except(["dev.example.com"]),
        );
        let module = DnsBrute::with_dns(dns);
        module.set("DOMAIN", "example.com").unwrap();
        module.set("WORDLIST", "dev").unwrap();
        module.set("SUFFIXES", "true").unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let table = tokio::time::timeout(Duration::from_secs(5), module.run(cancel))
            .await
            .expect("run ignored cancellation");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(table.rows, vec![vec!["dev.example.com".to_string()]]);
        assert_eq!(module.results().unwrap().rows, table.rows);
    }
}
