use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::classify::{MarkerPattern, is_redirect};
use crate::client::WikiWriteApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagOutcome {
    Tagged,
    AlreadyTagged,
    SkippedRedirect,
}

impl TagOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tagged => "tagged",
            Self::AlreadyTagged => "already_tagged",
            Self::SkippedRedirect => "skipped_redirect",
        }
    }
}

/// Marker, edit summary and compiled pattern used for every write in a pass.
#[derive(Debug, Clone)]
pub struct Tagger {
    pattern: MarkerPattern,
    summary: String,
}

impl Tagger {
    pub fn new(marker: &str, summary: &str) -> Self {
        Self {
            pattern: MarkerPattern::new(marker),
            summary: summary.to_string(),
        }
    }

    pub fn marker(&self) -> &str {
        self.pattern.marker()
    }

    /// Makes sure `doc_title` carries the marker.
    ///
    /// The text is read fresh on every call. The marker check is the only
    /// idempotency guard, and writes are last-writer-wins.
    pub fn ensure_marker<A: WikiWriteApi>(
        &self,
        api: &mut A,
        doc_title: &str,
    ) -> Result<TagOutcome> {
        let snapshot = api
            .get_page(doc_title)
            .with_context(|| format!("failed to read {doc_title}"))?;

        if is_redirect(&snapshot.text) {
            debug!(title = doc_title, "redirect, skipping");
            return Ok(TagOutcome::SkippedRedirect);
        }
        if self.pattern.is_present(&snapshot.text) {
            debug!(title = doc_title, "marker already present");
            return Ok(TagOutcome::AlreadyTagged);
        }

        let tagged = format!("{}\n\n{}", self.marker(), snapshot.text);
        api.edit_page(doc_title, &tagged, &self.summary, true)
            .with_context(|| format!("failed to tag {doc_title}"))?;
        info!(title = doc_title, created = !snapshot.exists, "added marker");
        Ok(TagOutcome::Tagged)
    }
}
