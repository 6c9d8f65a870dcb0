use std::env;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::checkpoint::{
    Checkpoint, CheckpointStore, FileCheckpointStore, WikiPageCheckpointStore,
};
use crate::client::{MediaWikiClient, MediaWikiClientConfig, WikiWriteApi};
use crate::config::{CheckpointBackend, TaggerConfig};
use crate::enumerate::list_batch;
use crate::mutate::{TagOutcome, Tagger};
use crate::title::{doc_title, qualified_title, resume_key};

#[derive(Debug, Clone, Serialize)]
pub struct TagPageResult {
    pub listed_title: String,
    pub doc_title: String,
    pub outcome: Option<TagOutcome>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub resumed_from: Checkpoint,
    pub listed: usize,
    pub tagged: usize,
    pub already_tagged: usize,
    pub skipped_redirects: usize,
    pub pages: Vec<TagPageResult>,
    pub next_checkpoint: Checkpoint,
    pub walk_complete: bool,
    pub request_count: usize,
}

/// Runs one pass from configuration: connects, logs in, and processes a single batch.
pub fn run_crawl_pass(config: &TaggerConfig, project_root: &Path) -> Result<CrawlReport> {
    let (username, password) = bot_credentials()?;
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config)?)?;
    info!(api_url = client.api_url(), "resolved wiki endpoint");
    client
        .login(&username, &password)
        .context("bot login failed")?;

    let mut store = open_checkpoint_store(config, project_root)?;
    crawl_pass_with_api(&mut client, store.as_mut(), config)
}

pub fn open_checkpoint_store(
    config: &TaggerConfig,
    project_root: &Path,
) -> Result<Box<dyn CheckpointStore>> {
    Ok(match config.checkpoint.backend {
        CheckpointBackend::File => {
            Box::new(FileCheckpointStore::new(config.checkpoint_path(project_root)))
        }
        CheckpointBackend::Page => {
            Box::new(WikiPageCheckpointStore::new(config.checkpoint_page()?))
        }
    })
}

/// Store description plus its current record.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointStatus {
    pub store: String,
    pub checkpoint: Checkpoint,
}

/// Reads the checkpoint without writing anywhere. Only the page backend
/// contacts the wiki, and it does so without logging in.
pub fn inspect_checkpoint(
    config: &TaggerConfig,
    project_root: &Path,
) -> Result<CheckpointStatus> {
    match config.checkpoint.backend {
        CheckpointBackend::File => {
            let store = FileCheckpointStore::new(config.checkpoint_path(project_root));
            Ok(CheckpointStatus {
                store: store.describe(),
                checkpoint: store.read(),
            })
        }
        CheckpointBackend::Page => {
            let store = WikiPageCheckpointStore::new(config.checkpoint_page()?);
            let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config)?)?;
            Ok(CheckpointStatus {
                store: store.describe(),
                checkpoint: store.peek(&mut client),
            })
        }
    }
}

/// Clears the checkpoint. The page backend logs in before writing.
pub fn reset_checkpoint(config: &TaggerConfig, project_root: &Path) -> Result<String> {
    match config.checkpoint.backend {
        CheckpointBackend::File => {
            let store = FileCheckpointStore::new(config.checkpoint_path(project_root));
            store.write(&Checkpoint::default())?;
            Ok(store.describe())
        }
        CheckpointBackend::Page => {
            let (username, password) = bot_credentials()?;
            let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config)?)?;
            client
                .login(&username, &password)
                .context("bot login failed")?;
            let mut store = WikiPageCheckpointStore::new(config.checkpoint_page()?);
            store.save(&mut client, &Checkpoint::default())?;
            Ok(store.describe())
        }
    }
}

pub fn bot_credentials() -> Result<(String, String)> {
    let username = env::var("WIKI_BOT_USER")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow::anyhow!("WIKI_BOT_USER is required"))?;
    let password = env::var("WIKI_BOT_PASS")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow::anyhow!("WIKI_BOT_PASS is required"))?;
    Ok((username, password))
}

/// Load checkpoint, list one batch, tag each title, then save the checkpoint.
///
/// Every title in the batch is attempted even if an earlier one failed. When
/// any title fails the checkpoint is left untouched so the whole batch is
/// retried next run.
pub fn crawl_pass_with_api<A: WikiWriteApi>(
    api: &mut A,
    store: &mut dyn CheckpointStore,
    config: &TaggerConfig,
) -> Result<CrawlReport> {
    let resumed_from = store.load(api);
    if resumed_from.is_empty() {
        info!(store = %store.describe(), "no checkpoint, starting at beginning of namespace");
    } else {
        info!(store = %store.describe(), title = %resumed_from.title, "resuming");
    }

    let namespace = config.namespace();
    let namespace_name = api
        .namespace_name(namespace)
        .with_context(|| format!("failed to resolve namespace {namespace}"))?;
    let cursor = resume_key(&resumed_from.title, &namespace_name);
    let batch = list_batch(api, config, &cursor)?;
    let tagger = Tagger::new(config.marker(), &config.summary());

    let mut report = CrawlReport {
        resumed_from,
        listed: batch.titles.len(),
        tagged: 0,
        already_tagged: 0,
        skipped_redirects: 0,
        pages: Vec::with_capacity(batch.titles.len()),
        next_checkpoint: Checkpoint::default(),
        walk_complete: batch.continue_from.is_none(),
        request_count: 0,
    };

    let mut failed = Vec::new();
    for listed_title in batch.titles {
        let target = doc_title(&listed_title);
        match tagger.ensure_marker(api, &target) {
            Ok(outcome) => {
                match outcome {
                    TagOutcome::Tagged => report.tagged += 1,
                    TagOutcome::AlreadyTagged => report.already_tagged += 1,
                    TagOutcome::SkippedRedirect => report.skipped_redirects += 1,
                }
                info!(title = %target, outcome = outcome.as_str(), "processed");
                report.pages.push(TagPageResult {
                    listed_title,
                    doc_title: target,
                    outcome: Some(outcome),
                    error: None,
                });
            }
            Err(error) => {
                warn!(title = %target, "{error:#}");
                failed.push(target.clone());
                report.pages.push(TagPageResult {
                    listed_title,
                    doc_title: target,
                    outcome: None,
                    error: Some(format!("{error:#}")),
                });
            }
        }
    }

    if !failed.is_empty() {
        bail!(
            "{} of {} titles failed, checkpoint not advanced: {}",
            failed.len(),
            report.listed,
            failed.join(", ")
        );
    }

    report.next_checkpoint = match &batch.continue_from {
        Some(next) => next_checkpoint(api, &namespace_name, next),
        None => Checkpoint::default(),
    };
    store.save(api, &report.next_checkpoint)?;
    if report.walk_complete {
        info!("namespace walk complete, next run starts from the beginning");
    } else {
        info!(next = %report.next_checkpoint.title, "checkpoint advanced");
    }

    report.request_count = api.request_count();
    Ok(report)
}

/// Checkpoint for listing cursor `key`, with provenance read from the page
/// the key names in the walked namespace.
fn next_checkpoint<A: WikiWriteApi>(api: &mut A, namespace_name: &str, key: &str) -> Checkpoint {
    let title = qualified_title(namespace_name, key);
    let revision = match api.get_latest_revision(&title) {
        Ok(revision) => revision,
        Err(error) => {
            warn!(%title, "no revision metadata for checkpoint: {error:#}");
            None
        }
    };
    match revision {
        Some(revision) => Checkpoint {
            title: key.to_string(),
            editor: revision.user,
            timestamp: revision.timestamp,
        },
        None => Checkpoint::resume_at(key),
    }
}
