//! Lenient SPF TXT harvesting.

use tracing::debug;

use crate::common::cidr::Cidr;

/// Harvested view of one SPF TXT value: literal address ranges plus the
/// domains referenced by `include:` and `redirect=`. Transient, consumed
/// during expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyRecord {
    pub ranges: Vec<Cidr>,
    pub referrals: Vec<String>,
}

impl PolicyRecord {
    /// Check if a TXT record is an SPF record (case-insensitive v=spf1 prefix).
    pub fn is_spf(txt: &str) -> bool {
        let lower = txt.trim().to_ascii_lowercase();
        lower == "v=spf1" || lower.starts_with("v=spf1 ")
    }

    /// Harvest address literals and referrals from an SPF TXT value.
    /// Returns `None` for non-SPF text.
    ///
    /// This is deliberately not a full record parser: qualifier prefixes are
    /// stripped and ignored, unknown mechanisms and modifiers are skipped,
    /// and a malformed CIDR token drops only itself, never the record.
    pub fn parse(txt: &str) -> Option<Self> {
        let txt = txt.trim();
        if !Self::is_spf(txt) {
            return None;
        }

        let mut record = PolicyRecord::default();
        for token in txt[6..].split_whitespace() {
            let term = strip_qualifier(token);
            let lower = term.to_ascii_lowercase();

            if let Some(rest) = lower.strip_prefix("ip4:") {
                match Cidr::parse_v4(rest) {
                    Ok(cidr) => record.ranges.push(cidr),
                    Err(e) => debug!(token, error = %e, "skipping malformed ip4 token"),
                }
            } else if let Some(rest) = lower.strip_prefix("ip6:") {
                match Cidr::parse_v6(rest) {
                    Ok(cidr) => record.ranges.push(cidr),
                    Err(e) => debug!(token, error = %e, "skipping malformed ip6 token"),
                }
            } else if let Some(domain) = lower.strip_prefix("include:") {
                if !domain.is_empty() {
                    record.referrals.push(domain.to_string());
                }
            } else if let Some(domain) = lower.strip_prefix("redirect=") {
                // Range collection treats a redirect like an include.
                if !domain.is_empty() {
                    record.referrals.push(domain.to_string());
                }
            }
            // a, mx, ptr, exists, all, and unknown modifiers carry no
            // address literals; ignored.
        }

        Some(record)
    }
}

/// Strip a leading `+`/`-`/`~`/`?` qualifier, if any.
fn strip_qualifier(s: &str) -> &str {
    match s.as_bytes().first() {
        Some(b'+') | Some(b'-') | Some(b'~') | Some(b'?') => &s[1..],
        _ => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn harvests_ip4_literals() {
        let record =
            PolicyRecord::parse("v=spf1 ip4:192.0.2.0/24 ip4:198.51.100.7 -all").unwrap();
        assert_eq!(record.ranges.len(), 2);
        assert_eq!(record.ranges[0].to_string(), "192.0.2.0/24");
        assert_eq!(record.ranges[1].to_string(), "198.51.100.7/32");
        assert!(record.referrals.is_empty());
    }

    #[test]
    fn harvests_ip6_literals() {
        let record = PolicyRecord::parse("v=spf1 ip6:2001:db8::/32 ~all").unwrap();
        assert_eq!(record.ranges.len(), 1);
        assert_eq!(record.ranges[0].to_string(), "2001:db8::/32");
    }

    #[test]
    fn harvests_includes() {
        let record =
            PolicyRecord::parse("v=spf1 include:_spf.example.net include:relay.example.org -all")
                .unwrap();
        assert_eq!(
            record.referrals,
            vec!["_spf.example.net".to_string(), "relay.example.org".to_string()]
        );
    }

    #[test]
    fn redirect_treated_like_include() {
        let record = PolicyRecord::parse("v=spf1 redirect=_spf.example.com").unwrap();
        assert_eq!(record.referrals, vec!["_spf.example.com".to_string()]);
    }

    #[test]
    fn qualifiers_are_stripped() {
        let record = PolicyRecord::parse("v=spf1 +ip4:10.0.0.0/8 ?include:a.example -all").unwrap();
        assert_eq!(record.ranges.len(), 1);
        assert_eq!(record.referrals, vec!["a.example".to_string()]);
    }

    #[test]
    fn malformed_cidr_skips_only_itself() {
        let record =
            PolicyRecord::parse("v=spf1 ip4:banana/24 ip4:203.0.113.0/24 ip6:2001:db8::/200 -all")
                .unwrap();
        assert_eq!(record.ranges.len(), 1);
        assert_eq!(record.ranges[0].to_string(), "203.0.113.0/24");
    }

    #[test]
    fn hostname_mechanisms_ignored() {
        let record = PolicyRecord::parse("v=spf1 a mx ptr exists:%{i}.example.com -all").unwrap();
        assert!(record.ranges.is_empty());
        assert!(record.referrals.is_empty());
    }

    #[test]
    fn non_spf_text_is_none() {
        assert!(PolicyRecord::parse("google-site-verification=abc123").is_none());
        assert!(PolicyRecord::parse("v=spf10 ip4:1.2.3.4").is_none());
        assert!(PolicyRecord::parse("").is_none());
    }

    #[test]
    fn case_insensitive_version_tag() {
        let record = PolicyRecord::parse("V=SPF1 IP4:192.0.2.0/24 -ALL").unwrap();
        assert_eq!(record.ranges.len(), 1);
    }

    #[test]
    fn bare_version_yields_empty_record() {
        let record = PolicyRecord::parse("v=spf1").unwrap();
        assert!(record.ranges.is_empty());
        assert!(record.referrals.is_empty());
    }

    #[test]
    fn empty_include_domain_skipped() {
        let record = PolicyRecord::parse("v=spf1 include: -all").unwrap();
        assert!(record.referrals.is_empty());
    }
}
