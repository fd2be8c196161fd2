//! SPF policy harvesting and include expansion (RFC 7208 subset).
//!
//! Only the address literals of a policy matter here: records are harvested
//! for `ip4:`/`ip6:` tokens and chased through `include:`/`redirect=`
//! referrals. Hostname-derived mechanisms (`a`, `mx`, `ptr`, `exists`) and
//! policy evaluation are out of scope.

mod record;
mod resolver;

pub use record::PolicyRecord;
pub use resolver::{PoolResolver, MAX_INCLUDE_DEPTH};
