//! Address pools resolved once at startup and sampled per emission.

use std::fmt;
use std::net::IpAddr;

use rand::Rng;
use tracing::info;

use crate::common::cidr::Cidr;
use crate::common::dns::DnsResolver;
use crate::spf::PoolResolver;

/// Which verdict pool an emission draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRole {
    Pass,
    Fail,
}

impl fmt::Display for PoolRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolRole::Pass => write!(f, "pass"),
            PoolRole::Fail => write!(f, "fail"),
        }
    }
}

/// A deduplicated set of address ranges for one pool role. Built once at
/// startup and only read afterwards, so it can be shared freely.
#[derive(Debug, Clone)]
pub struct ResolvedPool {
    role: PoolRole,
    ranges: Vec<Cidr>,
}

impl ResolvedPool {
    pub fn new(role: PoolRole, ranges: Vec<Cidr>) -> Self {
        Self { role, ranges }
    }

    pub fn role(&self) -> PoolRole {
        self.role
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Sample one range uniformly, then one address within it. `None` when
    /// resolution produced no ranges for this role.
    pub fn sample(&self, rng: &mut impl Rng) -> Option<IpAddr> {
        if self.ranges.is_empty() {
            return None;
        }
        let range = self.ranges[rng.gen_range(0..self.ranges.len())];
        Some(range.sample_host(rng))
    }
}

/// Both pools, resolved from configuration at process start.
#[derive(Debug, Clone)]
pub struct Pools {
    pub pass: ResolvedPool,
    pub fail: ResolvedPool,
}

impl Pools {
    /// Resolve both role domain lists. Resolver failures shrink pools
    /// (possibly to empty) but never abort startup.
    pub async fn build<R: DnsResolver>(
        resolver: &PoolResolver<R>,
        pass_domains: &[String],
        fail_domains: &[String],
    ) -> Self {
        let pass = ResolvedPool::new(PoolRole::Pass, resolver.resolve(pass_domains).await);
        let fail = ResolvedPool::new(PoolRole::Fail, resolver.resolve(fail_domains).await);
        info!(domains = pass_domains.len(), ranges = pass.len(), "resolved pass pool");
        info!(domains = fail_domains.len(), ranges = fail.len(), "resolved fail pool");
        Self { pass, fail }
    }

    pub fn get(&self, role: PoolRole) -> &ResolvedPool {
        match role {
            PoolRole::Pass => &self.pass,
            PoolRole::Fail => &self.fail,
        }
    }
}
