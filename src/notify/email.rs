use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use crate::config::Recipient;
use crate::pipeline::{ComposedDigest, Deliverer, DeliveryReceipt};

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} missing"))
}

pub struct EmailDeliverer {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailDeliverer {
    /// `SMTP_HOST`, `SMTP_USER`, `SMTP_PASS`, `DIGEST_EMAIL_FROM`.
    pub fn from_env() -> Result<Self> {
        let host = env_var("SMTP_HOST")?;
        let user = env_var("SMTP_USER")?;
        let pass = env_var("SMTP_PASS")?;
        let from_addr = env_var("DIGEST_EMAIL_FROM")?;

        let creds = Credentials::new(user, pass);
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .context("invalid SMTP_HOST")?
            .credentials(creds)
            .build();
        let from = from_addr.parse().context("invalid DIGEST_EMAIL_FROM")?;

        Ok(Self { mailer, from })
    }

    pub fn message(&self, digest: &ComposedDigest, recipient: &Recipient) -> Result<Message> {
        let to = if recipient.name.is_empty() {
            recipient.email.parse::<Mailbox>()
        } else {
            format!("{} <{}>", recipient.name, recipient.email).parse::<Mailbox>()
        }
        .with_context(|| format!("invalid recipient {}", recipient.email))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(digest.subject.clone())
            .header(header::ContentType::TEXT_HTML)
            .body(digest.html.clone())
            .context("build email")
    }
}

#[async_trait]
impl Deliverer for EmailDeliverer {
    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn deliver(&self, digest: &ComposedDigest, recipient: &Recipient) -> Result<DeliveryReceipt> {
        let msg = self.message(digest, recipient)?;
        let resp = self.mailer.send(msg).await.context("send email")?;
        let detail = resp.message().collect::<Vec<_>>().join(" ");
        tracing::info!(to = %recipient.email, "digest emailed");
        Ok(DeliveryReceipt::sent(recipient, detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn set_smtp_env() {
        std::env::set_var("SMTP_HOST", "smtp.example.com");
        std::env::set_var("SMTP_USER", "digest");
        std::env::set_var("SMTP_PASS", "secret");
        std::env::set_var("DIGEST_EMAIL_FROM", "Signal Digest <digest@example.com>");
    }

    #[serial_test::serial]
    #[tokio::test]
    async fn builds_html_message_for_named_recipient() {
        set_smtp_env();
        let mailer = EmailDeliverer::from_env().unwrap();
        let digest = ComposedDigest {
            subject: "Signal Digest [Week 3]: Kistler cuts prices".into(),
            html: "<html><body>hi</body></html>".into(),
            generated_at: Utc::now(),
        };
        let to = Recipient {
            email: "ops@example.com".into(),
            name: "Ops Team".into(),
            active: true,
        };
        let raw = String::from_utf8(mailer.message(&digest, &to).unwrap().formatted()).unwrap();
        assert!(raw.contains("Ops Team"));
        assert!(raw.contains("<ops@example.com>"));
        assert!(raw.contains("Content-Type: text/html"));
        assert!(raw.contains("Kistler cuts prices"));
    }

    #[serial_test::serial]
    #[tokio::test]
    async fn missing_settings_fail() {
        set_smtp_env();
        std::env::remove_var("SMTP_PASS");
        let err = EmailDeliverer::from_env().err().unwrap();
        assert!(err.to_string().contains("SMTP_PASS"));
    }
}
