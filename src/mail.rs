//! Report packaging and SMTP delivery.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("message build error: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("compression error: {0}")]
    Compress(#[from] std::io::Error),
}

/// How the SMTP session is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS.
    StartTls,
    /// Implicit TLS (SMTPS, port 465 typical).
    Implicit,
    /// No TLS at all. Not recommended.
    Plaintext,
}

/// Gzip a serialized report.
pub fn gzip(data: &[u8]) -> Result<Vec<u8>, MailError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Conventional aggregate-report attachment name:
/// `<domain>!<begin>!<end>!<id>.xml.gz`.
pub fn attachment_name(report_domain: &str, begin: u64, end: u64) -> String {
    format!(
        "{report_domain}!{begin}!{end}!{}.xml.gz",
        Uuid::new_v4().simple()
    )
}

/// Async SMTP sender for finished reports.
#[derive(Clone)]
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
}

impl Mailer {
    pub fn new(
        host: &str,
        port: u16,
        security: SmtpSecurity,
        credentials: Option<(String, String)>,
        from: &str,
        to: &str,
    ) -> Result<Self, MailError> {
        let mut builder = match security {
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?
            }
            SmtpSecurity::Implicit => AsyncSmtpTransport::<Tokio1Executor>::relay(host)?,
            SmtpSecurity::Plaintext => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            }
        }
        .port(port);
        if let Some((user, pass)) = credentials {
            builder = builder.credentials(Credentials::new(user, pass));
        }
        Ok(Self {
            transport: builder.build(),
            from: from.parse()?,
            to: to.parse()?,
        })
    }

    /// Build the report message: a plaintext summary plus the gzipped XML
    /// attachment under the conventional filename.
    pub fn build_message(
        &self,
        org_name: &str,
        report_domain: &str,
        xml_gz: Vec<u8>,
        begin: u64,
        end: u64,
    ) -> Result<Message, MailError> {
        let filename = attachment_name(report_domain, begin, end);
        let subject = format!("DMARC Aggregate Report for {report_domain} [{begin}-{end}]");
        let body = format!(
            "DMARC aggregate report attached.\n\n\
             org: {org_name}\n\
             domain: {report_domain}\n\
             window: {begin}-{end} (Unix epoch)\n\
             file: {filename}\n"
        );

        let message = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(body))
                    .singlepart(
                        Attachment::new(filename).body(
                            xml_gz,
                            ContentType::parse("application/gzip")
                                .expect("static content type"),
                        ),
                    ),
            )?;
        Ok(message)
    }

    pub async fn send(&self, message: Message) -> Result<(), MailError> {
        self.transport.send(message).await?;
        Ok(())
    }
}
