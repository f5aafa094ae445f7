use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::config::Recipient;
use crate::pipeline::{ComposedDigest, Deliverer, DeliveryReceipt};

/// Writes one HTML file per recipient instead of sending mail.
#[derive(Debug, Clone)]
pub struct FileDeliverer {
    dir: PathBuf,
}

impl FileDeliverer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn file_stem(email: &str) -> String {
    email
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}

/// Break up `--` runs so the value cannot close the header comment.
fn comment_safe(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_dash = false;
    for c in s.chars() {
        if c == '-' && prev_dash {
            out.push(' ');
        }
        out.push(c);
        prev_dash = c == '-';
    }
    out
}

#[async_trait]
impl Deliverer for FileDeliverer {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn deliver(&self, digest: &ComposedDigest, recipient: &Recipient) -> Result<DeliveryReceipt> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.dir.join(format!(
            "{}-{}.html",
            digest.generated_at.format("%Y%m%d-%H%M%S"),
            file_stem(&recipient.email)
        ));
        let body = format!(
            "<!-- To: {} <{}> | Subject: {} -->\n{}",
            comment_safe(&recipient.name),
            comment_safe(&recipient.email),
            comment_safe(&digest.subject),
            digest.html
        );
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(to = %recipient.email, path = %path.display(), "mock delivery written");
        Ok(DeliveryReceipt::sent(recipient, path.display().to_string()))
    }
}
