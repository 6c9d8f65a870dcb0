use anyhow::{Context, Result};
use tracing::debug;

use crate::client::{PageBatch, WikiReadApi};
use crate::config::TaggerConfig;

/// Lists the next batch of the configured namespace starting at `cursor`.
///
/// An empty cursor starts at the beginning of the namespace. Failures are not
/// retried here; the caller aborts without touching the checkpoint.
pub fn list_batch<A: WikiReadApi>(
    api: &mut A,
    config: &TaggerConfig,
    cursor: &str,
) -> Result<PageBatch> {
    let namespace = config.namespace();
    let limit = config.batch_size();
    let from = Some(cursor.trim()).filter(|value| !value.is_empty());

    let batch = api
        .list_pages(namespace, limit, from)
        .with_context(|| format!("failed to list namespace {namespace} from {cursor:?}"))?;
    debug!(
        namespace,
        limit,
        listed = batch.titles.len(),
        next = batch.continue_from.as_deref().unwrap_or(""),
        "listed batch"
    );
    Ok(batch)
}
