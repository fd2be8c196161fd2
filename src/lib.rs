//! Synthetic DMARC aggregate report generation.
//!
//! Two independent components compose into the generator: an SPF resolver
//! that expands `include:` chains into deduplicated address pools, and a
//! jittered hourly scheduler that turns those pools into a lazy stream of
//! emissions. Report assembly, gzip compression, and SMTP delivery consume
//! that stream without ever blocking it.

pub mod common;
pub mod config;
pub mod mail;
pub mod pool;
pub mod report;
pub mod schedule;
pub mod spf;
