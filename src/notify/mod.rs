pub mod email;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

use crate::config::SmtpConfig;

/// Outbound message sink. Implementations fail loudly; callers decide
/// whether a failed delivery aborts anything.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, subject: &str, body: &str) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Used when SMTP is not configured at all: messages only go to the log.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, subject: &str, body: &str) -> Result<()> {
        tracing::info!(target: "notify", %subject, lines = body.lines().count(), "mail disabled, not sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Keeps every message in memory. For tests and dry runs.
#[derive(Default)]
pub struct MemoryNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent
            .lock()
            .map(|v| v.iter().map(|(s, _)| s.clone()).collect())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn deliver(&self, subject: &str, body: &str) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("memory notifier poisoned"))?
            .push((subject.to_string(), body.to_string()));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

pub fn build_notifier(smtp: Option<&SmtpConfig>) -> Result<Box<dyn Notifier>> {
    match smtp {
        Some(cfg) => Ok(Box::new(email::EmailSender::from_config(cfg)?)),
        None => {
            tracing::warn!(target: "notify", "WAITLY_SMTP_* not set; notifications go to the log only");
            Ok(Box::new(LogNotifier))
        }
    }
}

/// Plain-text body: a heading, a blank line, one item per line.
pub fn list_body(heading: &str, items: &[String]) -> String {
    let mut body = String::with_capacity(heading.len() + items.len() * 64);
    body.push_str(heading);
    body.push_str("\n\n");
    for it in items {
        body.push_str(it);
        body.push('\n');
    }
    body
}
