//! HTML digest composition.
//!
//! Layout is deliberately plain: a summary of the top signals, one section per
//! matched category, and the notable trends of the run. Every text field goes
//! through `html_escape` before it lands in markup.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Utc};
use html_escape::{encode_double_quoted_attribute, encode_text};
use serde::Serialize;

use crate::analyze::Analysis;
use crate::config::Catalog;
use crate::pipeline::{ComposedDigest, Composer};
use crate::signal::Signal;
use crate::trends::NotableTrend;

const TOP_SIGNALS: usize = 5;

#[derive(Debug, Clone)]
pub struct HtmlDigestComposer {
    /// Prefix for the subject line.
    pub title: String,
}

impl Default for HtmlDigestComposer {
    fn default() -> Self {
        Self {
            title: "Signal Digest".to_string(),
        }
    }
}

impl HtmlDigestComposer {
    pub fn subject(&self, entries: &[(Signal, Analysis)], now: DateTime<Utc>) -> String {
        let week = now.iso_week().week();
        let top = entries
            .first()
            .map(|(_, a)| a.headline.as_str())
            .unwrap_or("Industry update");
        let mut subject = format!("{} [Week {}]: {}", self.title, week, top);
        if entries.len() > 1 {
            let _ = write!(subject, " + {} more signals", entries.len() - 1);
        }
        subject
    }
}

fn signal_card(out: &mut String, signal: &Signal, a: &Analysis) {
    let _ = write!(
        out,
        "<div class=\"signal\"><h3><a href=\"{}\">{}</a></h3>\
         <p class=\"meta\">{} | score {:.2} | {}</p>\
         <p>{}</p><p><strong>Why it matters:</strong> {}</p>\
         <p><strong>Quick win:</strong> {}</p>\
         <p><strong>Owner:</strong> {} | <strong>Impact:</strong> {}</p>",
        encode_double_quoted_attribute(&signal.url),
        encode_text(&a.headline),
        encode_text(&a.signal_type.label()),
        a.composite,
        encode_text(&signal.source_id),
        encode_text(&a.what_summary),
        encode_text(&a.why_it_matters),
        encode_text(&a.quick_win),
        encode_text(&a.suggested_owner),
        encode_text(&a.estimated_impact),
    );
    if let Some(t) = &a.outreach_template {
        let _ = write!(out, "<pre class=\"outreach\">{}</pre>", encode_text(t));
    }
    out.push_str("</div>\n");
}

impl Composer for HtmlDigestComposer {
    fn compose(
        &self,
        entries: &[(Signal, Analysis)],
        notable: &[NotableTrend],
        catalog: &Catalog,
        now: DateTime<Utc>,
    ) -> Result<ComposedDigest> {
        let subject = self.subject(entries, now);
        let mut html = String::with_capacity(4096);
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{}</title></head><body>\n\
             <h1>{}</h1>\n<p>{} | {} signals</p>\n",
            encode_text(&subject),
            encode_text(&self.title),
            now.format("%B %d, %Y"),
            entries.len()
        );

        html.push_str("<h2>Top signals</h2>\n<ol>\n");
        for (_, a) in entries.iter().take(TOP_SIGNALS) {
            let _ = writeln!(
                html,
                "<li>{} ({:.2})</li>",
                encode_text(&a.headline),
                a.composite
            );
        }
        html.push_str("</ol>\n");

        // Entries are ranked, so each section keeps the global order.
        let mut sections: BTreeMap<&str, Vec<&(Signal, Analysis)>> = BTreeMap::new();
        for entry in entries {
            for m in &entry.1.category_matches {
                sections.entry(m.category_id.as_str()).or_default().push(entry);
            }
        }
        for (category_id, items) in sections {
            let _ = writeln!(
                html,
                "<h2>{}</h2>",
                encode_text(catalog.name_of(category_id))
            );
            for (signal, a) in items {
                signal_card(&mut html, signal, a);
            }
        }

        if !notable.is_empty() {
            html.push_str("<h2>Trends to watch</h2>\n<ul>\n");
            for t in notable {
                let _ = writeln!(
                    html,
                    "<li>{} : {} ({} this run, {:+.1}%)</li>",
                    encode_text(&t.label),
                    t.momentum.as_str(),
                    t.count,
                    t.change_pct
                );
            }
            html.push_str("</ul>\n");
        }
        html.push_str("</body></html>\n");

        Ok(ComposedDigest {
            subject,
            html,
            generated_at: now,
        })
    }
}

/// Write the local copy every run keeps, `digest-<year>-W<week>.html`
/// (overwritten by a second run in the same week).
pub async fn save_digest_html(dir: &Path, digest: &ComposedDigest) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let iso = digest.generated_at.iso_week();
    let path = dir.join(format!("digest-{}-W{:02}.html", iso.year(), iso.week()));
    let tmp = path.with_extension("html.tmp");
    tokio::fs::write(&tmp, digest.html.as_bytes())
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .with_context(|| format!("replacing {}", path.display()))?;
    tracing::info!(path = %path.display(), subject = %digest.subject, "digest saved");
    Ok(path)
}

/// One saved digest in the archive listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestFile {
    pub filename: String,
    pub size_kb: f64,
    pub created_at: DateTime<Utc>,
    pub preview_url: String,
}

/// Plain `digest-*.html` names only; anything that could leave the
/// directory is refused.
pub fn is_digest_name(name: &str) -> bool {
    name.starts_with("digest-")
        && name.ends_with(".html")
        && !name.contains(['/', '\\'])
        && !name.contains("..")
}

/// Saved digests, newest name first. A missing directory is an empty archive.
pub async fn list_digests(dir: &Path) -> Result<Vec<DigestFile>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !is_digest_name(&name) {
            continue;
        }
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let created_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        files.push(DigestFile {
            size_kb: (meta.len() as f64 / 1024.0 * 10.0).round() / 10.0,
            created_at,
            preview_url: format!("/digests/{name}/preview"),
            filename: name,
        });
    }
    files.sort_by(|a, b| b.filename.cmp(&a.filename));
    Ok(files)
}

/// Contents of one saved digest; `None` when it does not exist.
pub async fn read_digest(dir: &Path, name: &str) -> Result<Option<String>> {
    if !is_digest_name(name) {
        anyhow::bail!("invalid digest name '{name}'");
    }
    match tokio::fs::read_to_string(dir.join(name)).await {
        Ok(html) => Ok(Some(html)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading digest {name}")),
    }
}
