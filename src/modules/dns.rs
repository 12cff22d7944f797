//! DNS access used by the dnsbrute and subdomain_takeover modules.

use crate::errors::ModuleError;
use async_trait::async_trait;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioResolver;
use std::sync::Arc;

/// Outcome of a CNAME query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CnameLookup {
    Alias(String),
    NoAlias,
    NxDomain,
}

#[async_trait]
pub trait DnsClient: Send + Sync {
    /// True when the name has at least one A/AAAA record.
    async fn resolves(&self, host: &str) -> bool;

    async fn cname(&self, host: &str) -> CnameLookup;
}

/// Resolver built from the host's system configuration.
pub struct SystemDns {
    resolver: TokioResolver,
}

impl SystemDns {
    pub fn from_system_conf() -> Result<Self, ModuleError> {
        let resolver = TokioResolver::builder(TokioConnectionProvider::default())
            .map_err(|e| ModuleError::setup(format!("Failed to create resolver: {e}")))?
            .build();
        Ok(Self { resolver })
    }

    pub fn shared() -> Result<Arc<dyn DnsClient>, ModuleError> {
        Ok(Arc::new(Self::from_system_conf()?))
    }
}

fn is_nxdomain(err: &impl std::fmt::Debug) -> bool {
    let text = format!("{err:?}").to_lowercase();
    text.contains("nxdomain") || text.contains("no name")
}

#[async_trait]
impl DnsClient for SystemDns {
    async fn resolves(&self, host: &str) -> bool {
        match self.resolver.lookup_ip(host).await {
            Ok(lookup) => lookup.iter().next().is_some(),
            Err(_) => false,
        }
    }

    async fn cname(&self, host: &str) -> CnameLookup {
        match self.resolver.lookup(host, RecordType::CNAME).await {
            Ok(response) => response
                .iter()
                .find_map(|record| record.as_cname())
                .map(|cname| CnameLookup::Alias(cname.0.to_string().trim_end_matches('.').to_string()))
                .unwrap_or(CnameLookup::NoAlias),
            Err(e) if is_nxdomain(&e) => CnameLookup::NxDomain,
            Err(_) => CnameLookup::NoAlias,
        }
    }
}
