//! DMARC aggregate report synthesis (RFC 7489 Appendix C).

use std::net::IpAddr;

use rand::Rng;
use uuid::Uuid;

use crate::pool::PoolRole;
use crate::schedule::Emission;

/// DMARC Aggregate Report (RFC 7489 Appendix C).
#[derive(Debug, Clone)]
pub struct AggregateReport {
    pub metadata: ReportMetadata,
    pub policy_published: PolicyPublished,
    pub records: Vec<ReportRecord>,
}

/// Report metadata.
#[derive(Debug, Clone)]
pub struct ReportMetadata {
    pub org_name: String,
    pub email: String,
    pub report_id: String,
    pub date_range_begin: u64,
    pub date_range_end: u64,
}

/// Published DMARC policy.
#[derive(Debug, Clone)]
pub struct PolicyPublished {
    pub domain: String,
    pub adkim: AlignmentMode,
    pub aspf: AlignmentMode,
    pub policy: Policy,
    pub subdomain_policy: Policy,
    pub percent: u8,
}

/// A single row in the aggregate report.
#[derive(Debug, Clone)]
pub struct ReportRecord {
    pub source_ip: IpAddr,
    pub count: u32,
    pub disposition: Disposition,
    pub dkim: AuthVerdict,
    pub spf: AuthVerdict,
    pub header_from: String,
}

/// Alignment mode for DKIM/SPF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentMode {
    /// Organizational domain match.
    Relaxed,
    /// Exact domain match.
    Strict,
}

/// DMARC policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    None,
    Quarantine,
    Reject,
}

/// Applied disposition for a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    None,
    Quarantine,
    Reject,
}

/// Per-mechanism evaluation result for a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVerdict {
    Pass,
    Fail,
}

impl AggregateReport {
    /// Serialize to XML per RFC 7489 Appendix C schema.
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<feedback>\n");

        // Report metadata
        xml.push_str("  <report_metadata>\n");
        xml.push_str(&format!(
            "    <org_name>{}</org_name>\n",
            escape_xml(&self.metadata.org_name)
        ));
        xml.push_str(&format!(
            "    <email>{}</email>\n",
            escape_xml(&self.metadata.email)
        ));
        xml.push_str(&format!(
            "    <report_id>{}</report_id>\n",
            escape_xml(&self.metadata.report_id)
        ));
        xml.push_str("    <date_range>\n");
        xml.push_str(&format!(
            "      <begin>{}</begin>\n",
            self.metadata.date_range_begin
        ));
        xml.push_str(&format!(
            "      <end>{}</end>\n",
            self.metadata.date_range_end
        ));
        xml.push_str("    </date_range>\n");
        xml.push_str("  </report_metadata>\n");

        // Policy published
        xml.push_str("  <policy_published>\n");
        xml.push_str(&format!(
            "    <domain>{}</domain>\n",
            escape_xml(&self.policy_published.domain)
        ));
        xml.push_str(&format!(
            "    <adkim>{}</adkim>\n",
            alignment_str(self.policy_published.adkim)
        ));
        xml.push_str(&format!(
            "    <aspf>{}</aspf>\n",
            alignment_str(self.policy_published.aspf)
        ));
        xml.push_str(&format!(
            "    <p>{}</p>\n",
            policy_str(self.policy_published.policy)
        ));
        xml.push_str(&format!(
            "    <sp>{}</sp>\n",
            policy_str(self.policy_published.subdomain_policy)
        ));
        xml.push_str(&format!(
            "    <pct>{}</pct>\n",
            self.policy_published.percent
        ));
        xml.push_str("  </policy_published>\n");

        // Records
        for record in &self.records {
            xml.push_str("  <record>\n");
            xml.push_str("    <row>\n");
            xml.push_str(&format!(
                "      <source_ip>{}</source_ip>\n",
                record.source_ip
            ));
            xml.push_str(&format!("      <count>{}</count>\n", record.count));
            xml.push_str("      <policy_evaluated>\n");
            xml.push_str(&format!(
                "        <disposition>{}</disposition>\n",
                disposition_str(record.disposition)
            ));
            xml.push_str(&format!(
                "        <dkim>{}</dkim>\n",
                verdict_str(record.dkim)
            ));
            xml.push_str(&format!("        <spf>{}</spf>\n", verdict_str(record.spf)));
            xml.push_str("      </policy_evaluated>\n");
            xml.push_str("    </row>\n");

            xml.push_str("    <identifiers>\n");
            xml.push_str(&format!(
                "      <header_from>{}</header_from>\n",
                escape_xml(&record.header_from)
            ));
            xml.push_str("    </identifiers>\n");

            // Auth results mirror the evaluated policy for synthetic rows.
            xml.push_str("    <auth_results>\n");
            xml.push_str("      <dkim>\n");
            xml.push_str(&format!(
                "        <domain>{}</domain>\n",
                escape_xml(&record.header_from)
            ));
            xml.push_str(&format!(
                "        <result>{}</result>\n",
                verdict_str(record.dkim)
            ));
            xml.push_str("      </dkim>\n");
            xml.push_str("      <spf>\n");
            xml.push_str(&format!(
                "        <domain>{}</domain>\n",
                escape_xml(&record.header_from)
            ));
            xml.push_str(&format!(
                "        <result>{}</result>\n",
                verdict_str(record.spf)
            ));
            xml.push_str("      </spf>\n");
            xml.push_str("    </auth_results>\n");
            xml.push_str("  </record>\n");
        }

        xml.push_str("</feedback>\n");
        xml
    }
}

/// Build a one-record aggregate report for a scheduled emission.
///
/// Verdict mapping: a pass-pool emission yields at least one passing
/// mechanism (randomized which, sometimes both); a fail-pool emission fails
/// both SPF and DKIM. Disposition stays `none`, matching the published
/// `p=none` policy.
pub fn synthesize(
    emission: &Emission,
    org_name: &str,
    report_domain: &str,
    rng: &mut impl Rng,
) -> AggregateReport {
    let end = emission.instant.timestamp().max(0) as u64;
    let begin = end.saturating_sub(3600);
    let report_id = format!("{}-{}", emission.instant.timestamp_millis(), Uuid::new_v4());

    let (spf, dkim) = match emission.role {
        PoolRole::Pass => {
            let spf_ok = rng.gen_bool(0.5);
            let dkim_ok = !spf_ok || rng.gen_bool(0.5);
            (verdict(spf_ok), verdict(dkim_ok))
        }
        PoolRole::Fail => (AuthVerdict::Fail, AuthVerdict::Fail),
    };

    AggregateReport {
        metadata: ReportMetadata {
            org_name: org_name.to_string(),
            email: format!("dmarc-reports@{report_domain}"),
            report_id,
            date_range_begin: begin,
            date_range_end: end,
        },
        policy_published: PolicyPublished {
            domain: report_domain.to_string(),
            adkim: AlignmentMode::Relaxed,
            aspf: AlignmentMode::Relaxed,
            policy: Policy::None,
            subdomain_policy: Policy::None,
            percent: 100,
        },
        records: vec![ReportRecord {
            source_ip: emission.source_ip,
            count: rng.gen_range(1..=7),
            disposition: Disposition::None,
            dkim,
            spf,
            header_from: report_domain.to_string(),
        }],
    }
}

fn verdict(ok: bool) -> AuthVerdict {
    if ok {
        AuthVerdict::Pass
    } else {
        AuthVerdict::Fail
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn alignment_str(a: AlignmentMode) -> &'static str {
    match a {
        AlignmentMode::Relaxed => "r",
        AlignmentMode::Strict => "s",
    }
}

fn policy_str(p: Policy) -> &'static str {
    match p {
        Policy::None => "none",
        Policy::Quarantine => "quarantine",
        Policy::Reject => "reject",
    }
}

fn disposition_str(d: Disposition) -> &'static str {
    match d {
        Disposition::None => "none",
        Disposition::Quarantine => "quarantine",
        Disposition::Reject => "reject",
    }
}

fn verdict_str(v: AuthVerdict) -> &'static str {
    match v {
        AuthVerdict::Pass => "pass",
        AuthVerdict::Fail => "fail",
    }
}
