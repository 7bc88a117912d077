//! DNS validation for sending domains.
//!
//! Resolves MX and TXT records to judge whether a domain is ready for
//! warmup: MX is required, SPF/DKIM/DMARC are probed and recorded on the
//! account for the operator to act on.

use async_trait::async_trait;
use chrono::Utc;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::TokioAsyncResolver;

use super::{TransportError, TransportResult};
use crate::domain::DnsHealth;

/// DKIM selectors probed under `_domainkey` when no selector is known.
const DKIM_SELECTORS: &[&str] = &["default", "dkim", "mail", "email", "selector1", "selector2"];

/// DNS lookup abstraction.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// Resolves MX hostnames for a domain. Empty when none exist.
    async fn resolve_mx(&self, domain: &str) -> TransportResult<Vec<String>>;

    /// Resolves TXT record strings for a name. Empty when none exist.
    async fn resolve_txt(&self, name: &str) -> TransportResult<Vec<String>>;
}

/// Resolver backed by `trust-dns-resolver` with default upstreams.
pub struct SystemDnsResolver {
    resolver: TokioAsyncResolver,
}

impl SystemDnsResolver {
    /// Creates a resolver using the default public configuration.
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for SystemDnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsResolver for SystemDnsResolver {
    async fn resolve_mx(&self, domain: &str) -> TransportResult<Vec<String>> {
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|mx| mx.exchange().to_utf8())
                .collect()),
            Err(e) if is_no_records(&e) => Ok(vec![]),
            Err(e) => Err(TransportError::Connection(format!(
                "MX lookup for {} failed: {}",
                domain, e
            ))),
        }
    }

    async fn resolve_txt(&self, name: &str) -> TransportResult<Vec<String>> {
        match self.resolver.txt_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    txt.iter()
                        .map(|part| String::from_utf8_lossy(part).to_string())
                        .collect::<Vec<_>>()
                        .join("")
                })
                .collect()),
            Err(e) if is_no_records(&e) => Ok(vec![]),
            Err(e) => Err(TransportError::Connection(format!(
                "TXT lookup for {} failed: {}",
                name, e
            ))),
        }
    }
}

fn is_no_records(error: &ResolveError) -> bool {
    matches!(error.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

/// Runs the full DNS health check for a domain.
///
/// Individual record failures degrade the report rather than failing it;
/// only the resolver being unreachable propagates as an error from the
/// MX lookup.
pub async fn check_dns_health(
    resolver: &dyn DnsResolver,
    domain: &str,
) -> TransportResult<DnsHealth> {
    let mx = !resolver.resolve_mx(domain).await?.is_empty();

    let spf = resolver
        .resolve_txt(domain)
        .await
        .unwrap_or_default()
        .iter()
        .any(|record| record.to_lowercase().starts_with("v=spf1"));

    let mut dkim = false;
    for selector in DKIM_SELECTORS {
        let name = format!("{}._domainkey.{}", selector, domain);
        if !resolver.resolve_txt(&name).await.unwrap_or_default().is_empty() {
            dkim = true;
            break;
        }
    }

    let dmarc = resolver
        .resolve_txt(&format!("_dmarc.{}", domain))
        .await
        .unwrap_or_default()
        .iter()
        .any(|record| record.to_lowercase().starts_with("v=dmarc1"));

    let health = DnsHealth {
        domain: domain.to_string(),
        mx,
        spf,
        dkim,
        dmarc,
        checked_at: Utc::now(),
    };

    tracing::info!(
        domain,
        mx = health.mx,
        spf = health.spf,
        dkim = health.dkim,
        dmarc = health.dmarc,
        "DNS health check complete"
    );

    Ok(health)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Scripted resolver for tests.
    struct FakeResolver {
        mx: Vec<String>,
        txt: HashMap<String, Vec<String>>,
    }

    #[async_trait]
    impl DnsResolver for FakeResolver {
        async fn resolve_mx(&self, _domain: &str) -> TransportResult<Vec<String>> {
            Ok(self.mx.clone())
        }

        async fn resolve_txt(&self, name: &str) -> TransportResult<Vec<String>> {
            Ok(self.txt.get(name).cloned().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn healthy_domain_passes_all_checks() {
        let mut txt = HashMap::new();
        txt.insert(
            "example.com".to_string(),
            vec!["v=spf1 include:_spf.example.com ~all".to_string()],
        );
        txt.insert(
            "default._domainkey.example.com".to_string(),
            vec!["v=DKIM1; k=rsa; p=abc".to_string()],
        );
        txt.insert(
            "_dmarc.example.com".to_string(),
            vec!["v=DMARC1; p=quarantine".to_string()],
        );
        let resolver = FakeResolver {
            mx: vec!["mx1.example.com.".to_string()],
            txt,
        };

        let health = check_dns_health(&resolver, "example.com").await.unwrap();
        assert!(health.mx);
        assert!(health.spf);
        assert!(health.dkim);
        assert!(health.dmarc);
        assert!(health.is_sendable());
    }

    #[tokio::test]
    async fn missing_mx_fails_sendability() {
        let resolver = FakeResolver {
            mx: vec![],
            txt: HashMap::new(),
        };

        let health = check_dns_health(&resolver, "nowhere.example").await.unwrap();
        assert!(!health.mx);
        assert!(!health.is_sendable());
    }

    #[tokio::test]
    async fn dkim_found_under_alternate_selector() {
        let mut txt = HashMap::new();
        txt.insert(
            "selector1._domainkey.example.com".to_string(),
            vec!["v=DKIM1; p=abc".to_string()],
        );
        let resolver = FakeResolver {
            mx: vec!["mx.example.com.".to_string()],
            txt,
        };

        let health = check_dns_health(&resolver, "example.com").await.unwrap();
        assert!(health.dkim);
        assert!(!health.spf);
    }
}
