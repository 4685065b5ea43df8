use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};
use std::time::Duration;

use super::Notifier;
use crate::config::SmtpConfig;
use crate::error::WatchError;

const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct EmailSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl EmailSender {
    /// STARTTLS relay; AUTH only when a user is configured.
    pub fn from_config(cfg: &SmtpConfig) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.host)
            .map_err(|e| WatchError::config(format!("invalid WAITLY_SMTP_HOST: {e}")))?
            .port(cfg.port)
            .timeout(Some(SMTP_TIMEOUT));
        if !cfg.user.is_empty() {
            builder = builder.credentials(Credentials::new(cfg.user.clone(), cfg.password.clone()));
        }

        let from: Mailbox = cfg
            .from
            .parse()
            .map_err(|e| WatchError::config(format!("invalid WAITLY_MAIL_FROM: {e}")))?;
        let to = cfg
            .to
            .iter()
            .map(|addr| {
                addr.parse::<Mailbox>()
                    .map_err(|e| WatchError::config(format!("invalid WAITLY_MAIL_TO entry {addr:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            mailer: builder.build(),
            from,
            to,
        })
    }

    fn build_message(&self, subject: &str, body: &str) -> Result<Message> {
        let mut msg = Message::builder().from(self.from.clone());
        for to in &self.to {
            msg = msg.to(to.clone());
        }
        msg.subject(subject)
            .header(header::ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("build email")
    }
}

#[async_trait]
impl Notifier for EmailSender {
    async fn deliver(&self, subject: &str, body: &str) -> Result<()> {
        let msg = self.build_message(subject, body)?;
        self.mailer.send(msg).await.context("send email")?;
        tracing::info!(target: "notify", %subject, recipients = self.to.len(), "email sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "email"
    }
}
