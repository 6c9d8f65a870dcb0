use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, bail};

use crate::client::{PageBatch, PageSnapshot, RevisionInfo, WikiReadApi, WikiWriteApi};

#[derive(Debug, Clone)]
pub(crate) struct RecordedEdit {
    pub title: String,
    pub content: String,
    pub summary: String,
    pub bot: bool,
}

/// In-memory wiki. Lists `namespace_titles` in order and, like
/// `list=allpages`, hands out the next page's key (no namespace prefix,
/// underscores for spaces) as the continuation cursor.
#[derive(Default)]
pub(crate) struct MockApi {
    pub namespace_titles: BTreeMap<i32, Vec<String>>,
    pub pages: BTreeMap<String, String>,
    pub revisions: BTreeMap<String, RevisionInfo>,
    pub edits: Vec<RecordedEdit>,
    pub list_calls: Vec<(i32, usize, Option<String>)>,
    pub fail_list: bool,
    pub fail_namespace: bool,
    pub fail_reads: BTreeSet<String>,
    pub fail_edits: BTreeSet<String>,
    pub request_count: usize,
}

impl MockApi {
    pub fn with_namespace(namespace: i32, titles: &[&str]) -> Self {
        let mut api = Self::default();
        api.namespace_titles.insert(
            namespace,
            titles.iter().map(|title| title.to_string()).collect(),
        );
        api
    }

    pub fn put_page(&mut self, title: &str, text: &str) {
        self.pages.insert(title.to_string(), text.to_string());
    }

    pub fn text(&self, title: &str) -> Option<&str> {
        self.pages.get(title).map(String::as_str)
    }

    pub fn edited_titles(&self) -> Vec<&str> {
        self.edits.iter().map(|edit| edit.title.as_str()).collect()
    }
}

impl WikiReadApi for MockApi {
    fn list_pages(
        &mut self,
        namespace: i32,
        limit: usize,
        from: Option<&str>,
    ) -> Result<PageBatch> {
        self.request_count += 1;
        self.list_calls
            .push((namespace, limit, from.map(ToString::to_string)));
        if self.fail_list {
            bail!("MediaWiki API request failed with HTTP 503 Service Unavailable");
        }
        let prefix = format!("{}:", canonical_namespace(namespace));
        let key = |title: &String| {
            title
                .strip_prefix(prefix.as_str())
                .unwrap_or(title.as_str())
                .replace(' ', "_")
        };
        let all = self
            .namespace_titles
            .get(&namespace)
            .cloned()
            .unwrap_or_default();
        let start = match from {
            Some(cursor) => all
                .iter()
                .position(|title| key(title).as_str() >= cursor)
                .unwrap_or(all.len()),
            None => 0,
        };
        let titles = all.iter().skip(start).take(limit).cloned().collect();
        Ok(PageBatch {
            titles,
            continue_from: all.get(start + limit).map(key),
        })
    }

    fn get_page(&mut self, title: &str) -> Result<PageSnapshot> {
        self.request_count += 1;
        if self.fail_reads.contains(title) {
            bail!("failed to call MediaWiki API");
        }
        Ok(match self.pages.get(title) {
            Some(text) => PageSnapshot {
                title: title.to_string(),
                exists: true,
                text: text.clone(),
            },
            None => PageSnapshot {
                title: title.to_string(),
                exists: false,
                text: String::new(),
            },
        })
    }

    fn get_latest_revision(&mut self, title: &str) -> Result<Option<RevisionInfo>> {
        self.request_count += 1;
        Ok(self.revisions.get(title).cloned())
    }

    fn namespace_name(&mut self, namespace: i32) -> Result<String> {
        self.request_count += 1;
        if self.fail_namespace {
            bail!("MediaWiki API request failed with HTTP 502 Bad Gateway");
        }
        Ok(canonical_namespace(namespace).to_string())
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn canonical_namespace(namespace: i32) -> &'static str {
    match namespace {
        2 => "User",
        4 => "Project",
        10 => "Template",
        828 => "Module",
        _ => "",
    }
}

impl WikiWriteApi for MockApi {
    fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
        self.request_count += 1;
        Ok(())
    }

    fn edit_page(&mut self, title: &str, content: &str, summary: &str, bot: bool) -> Result<()> {
        self.request_count += 1;
        if self.fail_edits.contains(title) {
            bail!("MediaWiki edit failed for {title}: Failure");
        }
        self.edits.push(RecordedEdit {
            title: title.to_string(),
            content: content.to_string(),
            summary: summary.to_string(),
            bot,
        });
        self.pages.insert(title.to_string(), content.to_string());
        Ok(())
    }
}
