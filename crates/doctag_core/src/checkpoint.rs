//! Resume position for the namespace walk.
//!
//! A record is `{title, editor, timestamp}`: the title to resume from plus the
//! author and time of that page's latest revision. The empty record means
//! "start of namespace". Loading never fails; anything unreadable degrades to
//! the empty record.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::client::{WikiReadApi, WikiWriteApi};

pub const CHECKPOINT_SUMMARY: &str = "Update documentation tagging checkpoint";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub title: String,
    #[serde(default, alias = "user")]
    pub editor: String,
    #[serde(default, alias = "time")]
    pub timestamp: String,
}

impl Checkpoint {
    pub fn resume_at(title: &str) -> Self {
        Self {
            title: title.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.trim().is_empty()
    }

    /// Wire form. The empty record encodes as an empty string.
    pub fn encode(&self) -> Result<String> {
        if self.is_empty() {
            return Ok(String::new());
        }
        serde_json::to_string(self).context("failed to serialize checkpoint")
    }

    /// Parses a stored record. Older records used single quotes; a bare
    /// non-JSON line is taken as the resume title.
    pub fn decode(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let parsed = if trimmed.starts_with('{') {
            serde_json::from_str::<Checkpoint>(trimmed)
                .or_else(|_| serde_json::from_str::<Checkpoint>(&trimmed.replace('\'', "\"")))
                .ok()?
        } else if trimmed.lines().count() == 1 {
            Self::resume_at(trimmed)
        } else {
            return None;
        };
        (!parsed.is_empty()).then_some(parsed)
    }
}

pub trait CheckpointStore {
    fn load(&mut self, api: &mut dyn WikiWriteApi) -> Checkpoint;
    fn save(&mut self, api: &mut dyn WikiWriteApi, checkpoint: &Checkpoint) -> Result<()>;
    fn describe(&self) -> String;
}

/// Record kept in a local file.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current record without creating the file.
    pub fn read(&self) -> Checkpoint {
        if !self.path.exists() {
            return Checkpoint::default();
        }
        match fs::read_to_string(&self.path) {
            Ok(raw) => decode_or_empty(&raw, &self.describe()),
            Err(error) => {
                warn!(path = %self.path.display(), "failed to read checkpoint: {error}");
                Checkpoint::default()
            }
        }
    }

    pub fn write(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&self.path, checkpoint.encode()?)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&mut self, _api: &mut dyn WikiWriteApi) -> Checkpoint {
        if !self.path.exists() {
            info!(path = %self.path.display(), "checkpoint file not found, creating");
            if let Err(error) = self.write(&Checkpoint::default()) {
                warn!("{error:#}");
            }
            return Checkpoint::default();
        }
        self.read()
    }

    fn save(&mut self, _api: &mut dyn WikiWriteApi, checkpoint: &Checkpoint) -> Result<()> {
        self.write(checkpoint)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path().to_string_lossy().replace('\\', "/"))
    }
}

/// Record kept as the text of a page on the wiki itself.
#[derive(Debug, Clone)]
pub struct WikiPageCheckpointStore {
    title: String,
}

impl WikiPageCheckpointStore {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
        }
    }

    /// Current record using reads only. A missing page is left missing.
    pub fn peek(&self, api: &mut dyn WikiReadApi) -> Checkpoint {
        self.read_page(api).unwrap_or_default()
    }

    /// `None` when the page does not exist.
    fn read_page(&self, api: &mut dyn WikiReadApi) -> Option<Checkpoint> {
        match api.get_page(&self.title) {
            Ok(snapshot) if snapshot.exists => {
                Some(decode_or_empty(&snapshot.text, &self.describe()))
            }
            Ok(_) => None,
            Err(error) => {
                warn!(page = %self.title, "failed to read checkpoint page: {error:#}");
                Some(Checkpoint::default())
            }
        }
    }
}

impl CheckpointStore for WikiPageCheckpointStore {
    fn load(&mut self, api: &mut dyn WikiWriteApi) -> Checkpoint {
        if let Some(checkpoint) = self.read_page(api) {
            return checkpoint;
        }
        info!(page = %self.title, "checkpoint page not found, creating");
        if let Err(error) = api.edit_page(&self.title, "", CHECKPOINT_SUMMARY, false) {
            warn!(page = %self.title, "failed to create checkpoint page: {error:#}");
        }
        Checkpoint::default()
    }

    fn save(&mut self, api: &mut dyn WikiWriteApi, checkpoint: &Checkpoint) -> Result<()> {
        api.edit_page(&self.title, &checkpoint.encode()?, CHECKPOINT_SUMMARY, false)
            .with_context(|| format!("failed to save checkpoint to {}", self.title))
    }

    fn describe(&self) -> String {
        format!("page {}", self.title)
    }
}

fn decode_or_empty(raw: &str, source: &str) -> Checkpoint {
    if raw.trim().is_empty() {
        debug!(source, "checkpoint is empty");
        return Checkpoint::default();
    }
    match Checkpoint::decode(raw) {
        Some(checkpoint) => checkpoint,
        None => {
            warn!(source, "checkpoint is unreadable, starting from the beginning");
            Checkpoint::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::test_support::MockApi;

    fn sample() -> Checkpoint {
        Checkpoint {
            title: "Template:C".to_string(),
            editor: "Editor".to_string(),
            timestamp: "2024-05-01T10:00:00Z".to_string(),
        }
    }

    #[test]
    fn decode_accepts_single_quoted_legacy_record() {
        let checkpoint = Checkpoint::decode(
            "{'user': 'Editor', 'time': '2024-05-01T10:00:00Z', 'title': 'Template:C'}",
        )
        .expect("decode");
        assert_eq!(checkpoint, sample());
    }

    #[test]
    fn decode_accepts_bare_title() {
        assert_eq!(
            Checkpoint::decode("Template:C\n"),
            Some(Checkpoint::resume_at("Template:C"))
        );
    }

    #[test]
    fn decode_rejects_incomplete_and_garbage() {
        assert_eq!(Checkpoint::decode("{\"editor\": \"Editor\"}"), None);
        assert_eq!(Checkpoint::decode("{\"title\": \"\"}"), None);
        assert_eq!(Checkpoint::decode("{not json"), None);
        assert_eq!(Checkpoint::decode("two\nlines"), None);
        assert_eq!(Checkpoint::decode("   "), None);
    }

    #[test]
    fn empty_checkpoint_encodes_as_empty_text() {
        assert_eq!(Checkpoint::default().encode().expect("encode"), "");
    }

    #[test]
    fn file_store_round_trips() {
        let temp = tempdir().expect("tempdir");
        let mut store = FileCheckpointStore::new(temp.path().join("state").join("checkpoint.json"));
        let mut api = MockApi::default();

        store.save(&mut api, &sample()).expect("save");
        assert_eq!(store.load(&mut api), sample());

        store.save(&mut api, &Checkpoint::default()).expect("save empty");
        assert_eq!(store.load(&mut api), Checkpoint::default());
    }

    #[test]
    fn file_store_creates_missing_file_on_load() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("checkpoint.json");
        let mut store = FileCheckpointStore::new(&path);

        assert!(store.load(&mut MockApi::default()).is_empty());
        assert_eq!(fs::read_to_string(&path).expect("read"), "");
    }

    #[test]
    fn file_store_degrades_on_corrupt_record() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("checkpoint.json");
        fs::write(&path, "{\"title\": ").expect("write");
        let mut store = FileCheckpointStore::new(&path);
        assert_eq!(store.load(&mut MockApi::default()), Checkpoint::default());
    }

    #[test]
    fn page_store_round_trips() {
        let mut api = MockApi::default();
        let mut store = WikiPageCheckpointStore::new("Project:Doctag checkpoint");

        store.save(&mut api, &sample()).expect("save");
        assert_eq!(store.load(&mut api), sample());
        assert!(!api.edits[0].bot);
        assert_eq!(api.edits[0].summary, CHECKPOINT_SUMMARY);
    }

    #[test]
    fn page_store_creates_missing_page() {
        let mut api = MockApi::default();
        let mut store = WikiPageCheckpointStore::new("Project:Doctag checkpoint");

        assert!(store.load(&mut api).is_empty());
        assert_eq!(api.edited_titles(), vec!["Project:Doctag checkpoint"]);
        assert_eq!(api.text("Project:Doctag checkpoint"), Some(""));
    }

    #[test]
    fn page_store_degrades_on_read_failure_and_corruption() {
        let mut api = MockApi::default();
        api.fail_reads.insert("Project:Broken".to_string());
        api.put_page("Project:Corrupt", "{'title': ");

        assert!(WikiPageCheckpointStore::new("Project:Broken").load(&mut api).is_empty());
        assert!(WikiPageCheckpointStore::new("Project:Corrupt").load(&mut api).is_empty());
        assert!(api.edits.is_empty());
    }

    #[test]
    fn page_store_peek_never_writes() {
        let mut api = MockApi::default();
        let store = WikiPageCheckpointStore::new("Project:Doctag checkpoint");
        assert!(store.peek(&mut api).is_empty());
        assert!(api.edits.is_empty());
        assert_eq!(api.text("Project:Doctag checkpoint"), None);

        api.put_page("Project:Doctag checkpoint", "{\"title\":\"C\"}");
        assert_eq!(store.peek(&mut api), Checkpoint::resume_at("C"));
        assert!(api.edits.is_empty());
    }

    #[test]
    fn file_store_read_does_not_create_file() {
        let temp = tempdir().expect("tempdir");
        let store = FileCheckpointStore::new(temp.path().join("checkpoint.json"));
        assert!(store.read().is_empty());
        assert!(!store.path().exists());

        store.write(&sample()).expect("write");
        assert_eq!(store.read(), sample());
    }
}
