use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DnsError {
    #[error("NXDOMAIN: domain does not exist")]
    NxDomain,
    #[error("SERVFAIL: server failure")]
    ServFail,
    #[error("timeout")]
    Timeout,
    #[error("DNS error: {0}")]
    Other(String),
}

/// DNS lookup abstraction. Pool resolution only ever needs TXT records;
/// implement with caching at the resolver layer if desired.
pub trait DnsResolver: Clone + Send + Sync + 'static {
    fn query_txt(&self, domain: &str) -> impl Future<Output = Result<Vec<String>, DnsError>> + Send;
}

/// Hickory DNS resolver backed by the system-configured nameservers.
#[derive(Clone)]
pub struct HickoryResolver {
    resolver: TokioResolver,
}

impl HickoryResolver {
    pub fn new() -> Self {
        let resolver = TokioResolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        )
        .build();
        Self { resolver }
    }

    fn classify_error(e: &hickory_resolver::ResolveError) -> DnsError {
        let msg = e.to_string().to_lowercase();
        if msg.contains("nxdomain") || msg.contains("no records") {
            DnsError::NxDomain
        } else if msg.contains("timeout") {
            DnsError::Timeout
        } else if msg.contains("servfail") {
            DnsError::ServFail
        } else {
            DnsError::Other(e.to_string())
        }
    }
}

impl Default for HickoryResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DnsResolver for HickoryResolver {
    async fn query_txt(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        match self.resolver.txt_lookup(domain).await {
            Ok(lookup) => Ok(lookup.iter().map(|txt| txt.to_string()).collect()),
            Err(e) => Err(Self::classify_error(&e)),
        }
    }
}

/// Mock DNS resolver for testing.
#[derive(Clone, Default)]
pub struct MockResolver {
    txt_records: Arc<Mutex<HashMap<String, Vec<String>>>>,
    txt_errors: Arc<Mutex<HashMap<String, DnsError>>>,
    queries: Arc<Mutex<usize>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_txt(&self, domain: &str, records: Vec<String>) {
        self.txt_records
            .lock()
            .unwrap()
            .insert(domain.to_lowercase(), records);
    }

    pub fn add_txt_err(&self, domain: &str, error: DnsError) {
        self.txt_errors
            .lock()
            .unwrap()
            .insert(domain.to_lowercase(), error);
    }

    /// Number of TXT queries served so far.
    pub fn txt_queries(&self) -> usize {
        *self.queries.lock().unwrap()
    }
}

impl DnsResolver for MockResolver {
    async fn query_txt(&self, domain: &str) -> Result<Vec<String>, DnsError> {
        *self.queries.lock().unwrap() += 1;
        let key = domain.to_lowercase();
        if let Some(e) = self.txt_errors.lock().unwrap().get(&key) {
            return Err(e.clone());
        }
        Ok(self
            .txt_records
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_resolver_txt() {
        let resolver = MockResolver::new();
        resolver.add_txt("example.com", vec!["v=spf1 -all".to_string()]);

        let result = resolver.query_txt("example.com").await.unwrap();
        assert_eq!(result, vec!["v=spf1 -all"]);
        assert_eq!(resolver.txt_queries(), 1);
    }

    #[tokio::test]
    async fn test_mock_resolver_unknown_domain_empty() {
        let resolver = MockResolver::new();
        let result = resolver.query_txt("unknown.example.com").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_mock_resolver_error_injection() {
        let resolver = MockResolver::new();
        resolver.add_txt_err("broken.example.com", DnsError::NxDomain);

        let result = resolver.query_txt("broken.example.com").await;
        assert!(matches!(result, Err(DnsError::NxDomain)));
    }

    #[tokio::test]
    async fn test_mock_resolver_case_insensitive() {
        let resolver = MockResolver::new();
        resolver.add_txt("Example.COM", vec!["hello".to_string()]);

        let result = resolver.query_txt("example.com").await.unwrap();
        assert_eq!(result, vec!["hello"]);
    }
}
