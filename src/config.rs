//! Command-line and environment configuration.

use clap::Parser;
use thiserror::Error;

use crate::mail::SmtpSecurity;
use crate::schedule::{RateEnvelope, RateError};

/// Generate and send synthetic DMARC aggregate reports at a steady,
/// jittered hourly rate.
#[derive(Parser, Debug)]
#[command(name = "dmarc-synth")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Reporting org_name in report metadata
    #[arg(long, default_value = "ExampleOrg")]
    pub org_name: String,

    /// Domain being reported on (policy_published.domain)
    #[arg(long)]
    pub report_domain: String,

    /// SMTP From address
    #[arg(long)]
    pub mail_from: String,

    /// Destination address that receives the reports
    #[arg(long)]
    pub mail_to: String,

    /// SMTP host
    #[arg(long)]
    pub smtp_host: String,

    /// SMTP port (587 STARTTLS, 465 SSL)
    #[arg(long, default_value_t = 587)]
    pub smtp_port: u16,

    /// SMTP username
    #[arg(long, env = "SMTP_USER")]
    pub smtp_user: Option<String>,

    /// SMTP password
    #[arg(long, env = "SMTP_PASS", hide_env_values = true)]
    pub smtp_pass: Option<String>,

    /// Use implicit TLS (SMTPS, port 465 typical)
    #[arg(long)]
    pub ssl: bool,

    /// Disable STARTTLS (not recommended)
    #[arg(long)]
    pub no_starttls: bool,

    /// Minimum reports per hour
    #[arg(long, default_value_t = 50)]
    pub min_per_hour: u32,

    /// Maximum reports per hour
    #[arg(long, default_value_t = 100)]
    pub max_per_hour: u32,

    /// Probability that an emission draws from the pass pool
    #[arg(long, default_value_t = 0.5)]
    pub pass_ratio: f64,

    /// Space-separated SPF domains resolved into the pass pool
    #[arg(long, env = "SPF_PASS_INCLUDES", default_value = "")]
    pub spf_pass_includes: String,

    /// Space-separated SPF domains resolved into the fail pool
    #[arg(long, env = "SPF_FAIL_INCLUDES", default_value = "")]
    pub spf_fail_includes: String,

    /// Send a single report and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Rate(#[from] RateError),
    #[error("pass-ratio must be within [0, 1], got {0}")]
    InvalidPassRatio(f64),
}

impl Config {
    /// Validate the rate bounds. Fatal at startup: a malformed envelope
    /// must not start a schedule.
    pub fn envelope(&self) -> Result<RateEnvelope, ConfigError> {
        Ok(RateEnvelope::new(self.min_per_hour, self.max_per_hour)?)
    }

    /// Validate the pool bias.
    pub fn validated_pass_ratio(&self) -> Result<f64, ConfigError> {
        if (0.0..=1.0).contains(&self.pass_ratio) {
            Ok(self.pass_ratio)
        } else {
            Err(ConfigError::InvalidPassRatio(self.pass_ratio))
        }
    }

    pub fn smtp_security(&self) -> SmtpSecurity {
        if self.ssl {
            SmtpSecurity::Implicit
        } else if self.no_starttls {
            SmtpSecurity::Plaintext
        } else {
            SmtpSecurity::StartTls
        }
    }

    /// Credentials are used when a username is configured; a missing
    /// password defaults to empty.
    pub fn smtp_credentials(&self) -> Option<(String, String)> {
        self.smtp_user.as_ref().map(|user| {
            (
                user.clone(),
                self.smtp_pass.clone().unwrap_or_default(),
            )
        })
    }

    pub fn pass_domains(&self) -> Vec<String> {
        split_domains(&self.spf_pass_includes)
    }

    pub fn fail_domains(&self) -> Vec<String> {
        split_domains(&self.spf_fail_includes)
    }
}

fn split_domains(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}
