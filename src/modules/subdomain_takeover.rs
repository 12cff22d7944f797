use super::dns::{CnameLookup, DnsClient, SystemDns};
use super::{Module, ModuleCore, ModuleInfo};
use crate::engine::{run_pool, PoolConfig};
use crate::errors::ModuleError;
use crate::model::{ListCheck, OptionSet, ResultTable, RunOutput};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DEFAULT_THREADS: usize = 50;
const USER_AGENT: &str = "subdomain-takeover-scanner";

/// A hosting provider recognisable from a CNAME target.
struct ServiceFingerprint {
    name: &'static str,
    cname_suffixes: &'static [&'static str],
    /// Body fragments served for an unclaimed resource.
    http_signatures: &'static [&'static str],
    /// The dangling alias itself no longer resolves.
    nxdomain: bool,
    vulnerable: bool,
}

const SERVICES: &[ServiceFingerprint] = &[
    ServiceFingerprint {
        name: "AWS S3",
        cname_suffixes: &[".s3.amazonaws.com", ".s3-website-us-east-1.amazonaws.com", ".s3-website.eu-west-1.amazonaws.com"],
        http_signatures: &["NoSuchBucket", "The specified bucket does not exist"],
        nxdomain: false,
        vulnerable: true,
    },
    ServiceFingerprint {
        name: "GitHub Pages",
        cname_suffixes: &["github.io"],
        http_signatures: &["There isn't a GitHub Pages site here."],
        nxdomain: false,
        vulnerable: true,
    },
    ServiceFingerprint {
        name: "Heroku",
        cname_suffixes: &["herokuapp.com", "herokudns.com", "herokussl.com"],
        http_signatures: &["No such app", "herokucdn.com/error-pages/no-such-app.html"],
        nxdomain: false,
        vulnerable: true,
    },
    ServiceFingerprint {
        name: "Microsoft Azure",
        cname_suffixes: &[
            ".azurewebsites.net",
            ".cloudapp.net",
            ".cloudapp.azure.com",
            ".trafficmanager.net",
            ".blob.core.windows.net",
            ".azureedge.net",
        ],
        http_signatures: &[],
        nxdomain: true,
        vulnerable: true,
    },
    ServiceFingerprint {
        name: "Shopify",
        cname_suffixes: &["myshopify.com"],
        http_signatures: &["Sorry, this shop is currently unavailable."],
        nxdomain: false,
        vulnerable: true,
    },
    ServiceFingerprint {
        name: "Fastly",
        cname_suffixes: &["fastly.net"],
        http_signatures: &["Fastly error: unknown domain"],
        nxdomain: false,
        vulnerable: true,
    },
    ServiceFingerprint {
        name: "Pantheon",
        cname_suffixes: &["pantheonsite.io"],
        http_signatures: &["The gods are wise, but do not know of the site which you seek."],
        nxdomain: false,
        vulnerable: true,
    },
    ServiceFingerprint {
        name: "Tumblr",
        cname_suffixes: &["domains.tumblr.com"],
        http_signatures: &["Whatever you were looking for doesn't currently exist at this address"],
        nxdomain: false,
        vulnerable: true,
    },
    ServiceFingerprint {
        name: "Surge.sh",
        cname_suffixes: &["surge.sh"],
        http_signatures: &["project not found"],
        nxdomain: false,
        vulnerable: true,
    },
    ServiceFingerprint {
        name: "Bitbucket",
        cname_suffixes: &["bitbucket.io"],
        http_signatures: &["Repository not found"],
        nxdomain: false,
        vulnerable: true,
    },
    ServiceFingerprint {
        name: "Ghost",
        cname_suffixes: &["ghost.io"],
        http_signatures: &["Failed to resolve DNS path for this host"],
        nxdomain: false,
        vulnerable: true,
    },
    ServiceFingerprint {
        name: "Zendesk",
        cname_suffixes: &["zendesk.com"],
        http_signatures: &["Help Center Closed"],
        nxdomain: false,
        vulnerable: true,
    },
    ServiceFingerprint {
        name: "Akamai",
        cname_suffixes: &["edgekey.net", "edgesuite.net", "akamaiedge.net"],
        http_signatures: &[],
        nxdomain: false,
        vulnerable: false,
    },
    ServiceFingerprint {
        name: "Netlify",
        cname_suffixes: &["netlify.app", "netlify.com"],
        http_signatures: &[],
        nxdomain: false,
        vulnerable: false,
    },
];

fn match_service(cname: &str) -> Option<&'static ServiceFingerprint> {
    let cname = cname.to_lowercase();
    SERVICES
        .iter()
        .find(|svc| svc.cname_suffixes.iter().any(|s| cname.ends_with(s)))
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Finding {
    domain: String,
    cname: String,
    service: String,
    status: String,
    vulnerable: bool,
}

impl Finding {
    fn nxdomain(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            cname: String::new(),
            service: String::new(),
            status: "NXDOMAIN".into(),
            vulnerable: false,
        }
    }

    fn vulnerable(domain: &str, cname: &str, svc: &ServiceFingerprint) -> Self {
        Self {
            domain: domain.to_string(),
            cname: cname.to_string(),
            service: svc.name.to_string(),
            status: "Vulnerable".into(),
            vulnerable: true,
        }
    }

    fn into_row(self) -> Vec<String> {
        vec![self.domain, self.cname, self.service, self.status, self.vulnerable.to_string()]
    }
}

pub struct SubdomainTakeover {
    core: ModuleCore,
    dns: Option<Arc<dyn DnsClient>>,
}

impl SubdomainTakeover {
    pub fn new() -> Self {
        let options = OptionSet::new()
            .add_list("DOMAINS", ListCheck::Any, true, "Domains to check, comma separated or a file path")
            .add_int("THREADS", DEFAULT_THREADS as i64, false, "Number of domains checked concurrently")
            .add_int("TIMEOUT", 10, false, "HTTP timeout in seconds");

        Self {
            core: ModuleCore::new(
                ModuleInfo {
                    name: "Subdomain Takeover",
                    author: "Luca Cuzzolin",
                    description: "Detects subdomain takeover via CNAME and HTTP response analysis",
                    prompt: "subdomain_takeover",
                },
                options,
            ),
            dns: None,
        }
    }

    pub fn with_dns(dns: Arc<dyn DnsClient>) -> Self {
        Self {
            dns: Some(dns),
            ..Self::new()
        }
    }
}

impl Default for SubdomainTakeover {
    fn default() -> Self {
        Self::new()
    }
}

async fn body_matches(client: &reqwest::Client, domain: &str, signatures: &[&str]) -> bool {
    for scheme in ["http://", "https://"] {
        let resp = match client.get(format!("{scheme}{domain}")).send().await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let Ok(body) = resp.text().await else { continue };
        if signatures.iter().any(|sig| body.contains(sig)) {
            return true;
        }
    }
    false
}

async fn check_domain(dns: &dyn DnsClient, client: &reqwest::Client, domain: &str) -> Option<Finding> {
    let cname = match dns.cname(domain).await {
        CnameLookup::NxDomain => return Some(Finding::nxdomain(domain)),
        CnameLookup::NoAlias => return None,
        CnameLookup::Alias(c) if c.eq_ignore_ascii_case(domain) => return None,
        CnameLookup::Alias(c) => c,
    };

    let svc = match_service(&cname)?;
    if !svc.vulnerable {
        debug!(domain, cname = %cname, service = svc.name, "service not takeover-prone");
        return None;
    }

    let dangling = if svc.nxdomain {
        !dns.resolves(&cname).await
    } else {
        body_matches(client, domain, svc.http_signatures).await
    };
    dangling.then(|| Finding::vulnerable(domain, &cname, svc))
}

#[async_trait]
impl Module for SubdomainTakeover {
    fn core(&self) -> &ModuleCore {
        &self.core
    }

    async fn execute(&self, opts: OptionSet, cancel: CancellationToken) -> Result<RunOutput, ModuleError> {
        let domains = opts.list("DOMAINS");
        let pool = PoolConfig::new(opts.int("THREADS"), DEFAULT_THREADS);
        let secs = opts.int("TIMEOUT").filter(|s| *s > 0).unwrap_or(10) as u64;
        let dns = match &self.dns {
            Some(dns) => dns.clone(),
            None => SystemDns::shared()?,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(secs))
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ModuleError::setup(format!("failed to build HTTP client: {e}")))?;

        let client = Arc::new(client);
        let findings = run_pool(domains, pool, &cancel, move |domain| {
            let dns = dns.clone();
            let client = client.clone();
            async move {
                check_domain(dns.as_ref(), &client, &domain)
                    .await
                    .into_iter()
                    .collect::<Vec<_>>()
            }
        })
        .await;

        let vulnerable = findings.iter().filter(|f| f.vulnerable).count();
        info!(checked = findings.len(), vulnerable, "takeover check complete");
        Ok(RunOutput::table(ResultTable::new(
            findings.into_iter().map(Finding::into_row).collect(),
        )))
    }
}
