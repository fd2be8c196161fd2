//! Recursive expansion of SPF policies into address-range pools.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use super::record::PolicyRecord;
use crate::common::cidr::Cidr;
use crate::common::dns::DnsResolver;

/// Hard ceiling on include/redirect chain depth. Cycle protection already
/// bounds the walk; this additionally caps pathological linear chains.
pub const MAX_INCLUDE_DEPTH: usize = 10;

/// Expands SPF policies into deduplicated address-range sets.
///
/// Resolution fails softly: a domain that cannot be resolved (DNS failure,
/// no SPF record, malformed record) contributes zero ranges and never
/// aborts its siblings.
pub struct PoolResolver<R: DnsResolver> {
    resolver: Arc<R>,
}

impl<R: DnsResolver> PoolResolver<R> {
    pub fn new(resolver: Arc<R>) -> Self {
        Self { resolver }
    }

    /// Resolve a list of top-level domains into the union of all address
    /// ranges reachable through their `include:`/`redirect=` chains.
    ///
    /// Domains are visited at most once per call, so duplicate inputs and
    /// include cycles both collapse. The returned ranges are deduplicated
    /// by canonical form and keep first-seen order.
    pub async fn resolve<S: AsRef<str>>(&self, domains: &[S]) -> Vec<Cidr> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut ranges: Vec<Cidr> = Vec::new();
        for domain in domains {
            self.expand(domain.as_ref(), 0, &mut visited, &mut ranges)
                .await;
        }
        ranges
    }

    async fn expand(
        &self,
        domain: &str,
        depth: usize,
        visited: &mut HashSet<String>,
        ranges: &mut Vec<Cidr>,
    ) {
        let domain = domain.trim().to_ascii_lowercase();
        if domain.is_empty() || depth > MAX_INCLUDE_DEPTH {
            return;
        }
        if !visited.insert(domain.clone()) {
            return;
        }

        let txt_records = match self.resolver.query_txt(&domain).await {
            Ok(records) => records,
            Err(e) => {
                debug!(%domain, error = %e, "TXT lookup failed, domain contributes no ranges");
                return;
            }
        };

        for txt in &txt_records {
            let Some(record) = PolicyRecord::parse(txt) else {
                continue;
            };
            for range in record.ranges {
                if !ranges.contains(&range) {
                    ranges.push(range);
                }
            }
            for referral in &record.referrals {
                Box::pin(self.expand(referral, depth + 1, visited, ranges)).await;
            }
        }
    }
}
