//! dmarc-synth: synthetic DMARC aggregate report sender.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dmarc_synth::common::dns::HickoryResolver;
use dmarc_synth::config::Config;
use dmarc_synth::mail::{gzip, Mailer};
use dmarc_synth::pool::Pools;
use dmarc_synth::report;
use dmarc_synth::schedule::{Emission, Scheduler};
use dmarc_synth::spf::PoolResolver;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let envelope = config.envelope()?;
    let pass_ratio = config.validated_pass_ratio()?;

    let mailer = Arc::new(Mailer::new(
        &config.smtp_host,
        config.smtp_port,
        config.smtp_security(),
        config.smtp_credentials(),
        &config.mail_from,
        &config.mail_to,
    )?);

    let resolver = PoolResolver::new(Arc::new(HickoryResolver::new()));
    let pools = Pools::build(&resolver, &config.pass_domains(), &config.fail_domains()).await;

    let once = config.once;
    let mut scheduler = Scheduler::new(envelope, pass_ratio, pools, once);
    let config = Arc::new(config);

    loop {
        let emission = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
            emission = scheduler.next() => match emission {
                Some(emission) => emission,
                None => break,
            },
        };

        // One-way hand-off: a slow send must not delay the next tick.
        let mailer = Arc::clone(&mailer);
        let config = Arc::clone(&config);
        let task = tokio::spawn(async move {
            if let Err(e) = send_report(&emission, &config, &mailer).await {
                error!(error = %e, "failed to send report");
            }
        });

        // One-shot mode waits for its single delivery before exiting.
        if once {
            let _ = task.await;
        }
    }

    Ok(())
}

async fn send_report(emission: &Emission, config: &Config, mailer: &Mailer) -> Result<()> {
    let report = report::synthesize(
        emission,
        &config.org_name,
        &config.report_domain,
        &mut rand::thread_rng(),
    );
    let xml_gz = gzip(report.to_xml().as_bytes())?;
    let message = mailer.build_message(
        &config.org_name,
        &config.report_domain,
        xml_gz,
        report.metadata.date_range_begin,
        report.metadata.date_range_end,
    )?;
    mailer.send(message).await?;
    info!(source_ip = %emission.source_ip, pool = %emission.role, "report sent");
    Ok(())
}
