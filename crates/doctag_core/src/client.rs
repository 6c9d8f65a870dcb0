use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::TaggerConfig;

/// One listing round: titles in server order plus the cursor for the next round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageBatch {
    pub titles: Vec<String>,
    pub continue_from: Option<String>,
}

/// Page text as read at one point in time. Missing pages read as empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub title: String,
    pub exists: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub user: String,
    pub timestamp: String,
}

pub trait WikiReadApi {
    fn list_pages(
        &mut self,
        namespace: i32,
        limit: usize,
        from: Option<&str>,
    ) -> Result<PageBatch>;
    /// Local name of `namespace`; empty for the main namespace.
    fn namespace_name(&mut self, namespace: i32) -> Result<String>;
    fn get_page(&mut self, title: &str) -> Result<PageSnapshot>;
    fn get_latest_revision(&mut self, title: &str) -> Result<Option<RevisionInfo>>;
    fn request_count(&self) -> usize;
}

pub trait WikiWriteApi: WikiReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    fn edit_page(&mut self, title: &str, content: &str, summary: &str, bot: bool) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub accept_invalid_certs: bool,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub rate_limit_write_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

impl MediaWikiClientConfig {
    /// Retries default to zero: a failed call aborts the run unless the
    /// environment asks for more attempts.
    pub fn from_config(config: &TaggerConfig) -> Result<Self> {
        Self::with_api_url(config.api_url(), config)
    }

    fn with_api_url(api_url: Option<String>, config: &TaggerConfig) -> Result<Self> {
        let api_url =
            api_url.ok_or_else(|| anyhow::anyhow!("WIKI_API_URL or [wiki] api_url is required"))?;
        Ok(Self {
            api_url,
            user_agent: config.user_agent(),
            accept_invalid_certs: config.wiki.accept_invalid_certs,
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            rate_limit_write_ms: env_value_u64("WIKI_RATE_LIMIT_WRITE", 1_000),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 0),
            max_write_retries: env_value_usize("WIKI_HTTP_WRITE_RETRIES", 0),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        })
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
    csrf_token: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Method {
    Get,
    Post,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> Result<Self> {
        if config.accept_invalid_certs {
            warn!("TLS certificate verification is disabled for {}", config.api_url);
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
            csrf_token: None,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    fn request_json(
        &mut self,
        method: Method,
        params: &[(&str, String)],
        is_write: bool,
    ) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid WIKI_API_URL: {}", self.config.api_url))?;
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };

        let pairs = request_pairs(method, params);

        for attempt in 0..=max_retries {
            self.apply_rate_limit(is_write);
            let request: RequestBuilder = match method {
                Method::Get => self.client.get(base_url.clone()).query(&pairs),
                Method::Post => self.client.post(base_url.clone()).form(&pairs),
            };
            let response = request
                .header("User-Agent", self.config.user_agent.clone())
                .send();

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt, is_write);
                            continue;
                        }
                        bail!("MediaWiki API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode MediaWiki API JSON response")?;
                    check_api_error(&payload)?;
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error).context("failed to call MediaWiki API");
                }
            }
        }

        bail!("MediaWiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self, is_write: bool) {
        let delay = if is_write {
            Duration::from_millis(self.config.rate_limit_write_ms)
        } else {
            Duration::from_millis(self.config.rate_limit_read_ms)
        };
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        let delay = base.saturating_mul(multiplier).saturating_add(jitter);
        debug!(attempt, delay_ms = delay, "retrying MediaWiki request");
        sleep(Duration::from_millis(delay));
    }

    fn fetch_token(&mut self, kind: &str) -> Result<String> {
        let response = self.request_json(
            Method::Get,
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", kind.to_string()),
            ],
            false,
        )?;
        decode_token(&response, kind)
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let token = self.fetch_token("csrf")?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }
}

impl WikiReadApi for MediaWikiClient {
    fn list_pages(
        &mut self,
        namespace: i32,
        limit: usize,
        from: Option<&str>,
    ) -> Result<PageBatch> {
        let params = vec![
            ("action", "query".to_string()),
            ("list", "allpages".to_string()),
            ("apnamespace", namespace.to_string()),
            ("aplimit", limit.to_string()),
            ("apcontinue", from.unwrap_or_default().to_string()),
        ];
        let response = self.request_json(Method::Get, &params, false)?;
        decode_page_batch(response)
    }

    fn get_page(&mut self, title: &str) -> Result<PageSnapshot> {
        let params = vec![
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content".to_string()),
            ("rvslots", "main".to_string()),
        ];
        let response = self.request_json(Method::Get, &params, false)?;
        decode_page_snapshot(title, response)
    }

    fn get_latest_revision(&mut self, title: &str) -> Result<Option<RevisionInfo>> {
        let params = vec![
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "timestamp|user".to_string()),
        ];
        let response = self.request_json(Method::Get, &params, false)?;
        Ok(decode_latest_revision(response))
    }

    fn namespace_name(&mut self, namespace: i32) -> Result<String> {
        let params = vec![
            ("action", "query".to_string()),
            ("meta", "siteinfo".to_string()),
            ("siprop", "namespaces".to_string()),
        ];
        let response = self.request_json(Method::Get, &params, false)?;
        decode_namespace_name(&response, namespace)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl WikiWriteApi for MediaWikiClient {
    /// Bot-password login. Any cached CSRF token belongs to the old session.
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let login_token = self.fetch_token("login")?;
        let params = vec![
            ("action", "login".to_string()),
            ("lgname", username.to_string()),
            ("lgpassword", password.to_string()),
            ("lgtoken", login_token),
        ];
        let response = self.request_json(Method::Post, &params, true)?;
        self.csrf_token = None;
        check_login_result(&response, username)
    }

    fn edit_page(&mut self, title: &str, content: &str, summary: &str, bot: bool) -> Result<()> {
        let token = self.ensure_csrf_token()?;
        let mut params = vec![
            ("action", "edit".to_string()),
            ("title", title.to_string()),
            ("text", content.to_string()),
            ("summary", summary.to_string()),
        ];
        if bot {
            params.push(("bot", "1".to_string()));
        }
        params.push(("token", token));

        let response = self.request_json(Method::Post, &params, true)?;
        let edit_payload: EditResponse =
            serde_json::from_value(response).context("failed to decode edit response")?;
        let edit = edit_payload
            .edit
            .ok_or_else(|| anyhow::anyhow!("missing edit payload in API response"))?;
        if edit.result.as_deref() != Some("Success") {
            bail!(
                "MediaWiki edit failed for {}: {}",
                title,
                edit.result.unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }
}

fn check_api_error(payload: &Value) -> Result<()> {
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(())
}

/// Query strings drop empty values so optional parameters such as
/// `apcontinue` can be passed blank. Form bodies keep them; blank edit text is
/// a real value.
fn request_pairs(method: Method, params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if matches!(method, Method::Get) && value.is_empty() {
            continue;
        }
        pairs.push(((*key).to_string(), value.clone()));
    }
    pairs
}

fn decode_token(response: &Value, kind: &str) -> Result<String> {
    response
        .pointer(&format!("/query/tokens/{kind}token"))
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki {kind} token"))
}

fn check_login_result(response: &Value, username: &str) -> Result<()> {
    let login = response.get("login");
    let result = login
        .and_then(|login| login.get("result"))
        .and_then(Value::as_str);
    if result == Some("Success") {
        return Ok(());
    }
    let reason = login
        .and_then(|login| login.get("reason"))
        .and_then(Value::as_str)
        .or(result)
        .unwrap_or("unknown error");
    bail!("MediaWiki login failed for {username}: {reason}")
}

fn decode_namespace_name(response: &Value, namespace: i32) -> Result<String> {
    response
        .pointer(&format!("/query/namespaces/{namespace}/name"))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| anyhow::anyhow!("wiki reports no namespace {namespace}"))
}

/// A listing without a `query` object is malformed, not empty.
fn decode_page_batch(response: Value) -> Result<PageBatch> {
    let parsed: QueryResponse =
        serde_json::from_value(response).context("failed to decode allpages API response")?;
    let query = parsed
        .query
        .ok_or_else(|| anyhow::anyhow!("allpages API response has no query payload"))?;
    Ok(PageBatch {
        titles: query.allpages.into_iter().map(|item| item.title).collect(),
        continue_from: parsed
            .continuation
            .and_then(|cont| cont.apcontinue)
            .filter(|token| !token.is_empty()),
    })
}

fn decode_page_snapshot(title: &str, response: Value) -> Result<PageSnapshot> {
    let parsed: QueryResponse =
        serde_json::from_value(response).context("failed to decode page content API response")?;
    let query = parsed
        .query
        .ok_or_else(|| anyhow::anyhow!("page content API response has no query payload"))?;
    let missing = PageSnapshot {
        title: title.to_string(),
        exists: false,
        text: String::new(),
    };
    let Some(page) = query.pages.into_iter().next() else {
        return Ok(missing);
    };
    if page.missing.unwrap_or(false) || page.invalid.unwrap_or(false) {
        return Ok(PageSnapshot {
            title: page.title,
            ..missing
        });
    }
    let text = page
        .revisions
        .into_iter()
        .next()
        .and_then(|revision| revision.slots)
        .and_then(|slots| slots.main)
        .map(|slot| slot.content)
        .unwrap_or_default();
    Ok(PageSnapshot {
        title: page.title,
        exists: true,
        text,
    })
}

/// Anything short of a complete revision record reads as "no revision".
fn decode_latest_revision(response: Value) -> Option<RevisionInfo> {
    let parsed: QueryResponse = serde_json::from_value(response).ok()?;
    let page = parsed.query?.pages.into_iter().next()?;
    if page.missing.unwrap_or(false) {
        return None;
    }
    let revision = page.revisions.into_iter().next()?;
    Some(RevisionInfo {
        user: revision.user?,
        timestamp: revision.timestamp?,
    })
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    query: Option<QueryPayload>,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    allpages: Vec<TitleQueryItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    apcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    invalid: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    user: Option<String>,
    timestamp: Option<String>,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn page_batch_reads_titles_and_cursor() {
        let batch = decode_page_batch(json!({
            "batchcomplete": true,
            "continue": { "apcontinue": "C", "continue": "-||" },
            "query": { "allpages": [
                { "pageid": 1, "ns": 10, "title": "Template:A" },
                { "pageid": 2, "ns": 10, "title": "Template:B/doc" }
            ]}
        }))
        .expect("decode");
        assert_eq!(batch.titles, vec!["Template:A", "Template:B/doc"]);
        assert_eq!(batch.continue_from.as_deref(), Some("C"));
    }

    #[test]
    fn page_batch_without_continue_is_exhausted() {
        let batch = decode_page_batch(json!({
            "query": { "allpages": [{ "ns": 10, "title": "Template:Z" }] }
        }))
        .expect("decode");
        assert_eq!(batch.titles, vec!["Template:Z"]);
        assert!(batch.continue_from.is_none());
    }

    #[test]
    fn page_batch_without_query_is_malformed() {
        let error = decode_page_batch(json!({ "warnings": {} })).expect_err("must fail");
        assert!(error.to_string().contains("no query payload"));
    }

    #[test]
    fn snapshot_reads_main_slot_content() {
        let snapshot = decode_page_snapshot(
            "Template:A/doc",
            json!({ "query": { "pages": [{
                "pageid": 7, "ns": 10, "title": "Template:A/doc",
                "revisions": [{ "slots": { "main": {
                    "contentmodel": "wikitext", "content": "Usage notes"
                }}}]
            }]}}),
        )
        .expect("decode");
        assert!(snapshot.exists);
        assert_eq!(snapshot.text, "Usage notes");
    }

    #[test]
    fn missing_page_reads_as_empty() {
        let snapshot = decode_page_snapshot(
            "Template:Nope/doc",
            json!({ "query": { "pages": [{
                "ns": 10, "title": "Template:Nope/doc", "missing": true
            }]}}),
        )
        .expect("decode");
        assert!(!snapshot.exists);
        assert_eq!(snapshot.text, "");
        assert_eq!(snapshot.title, "Template:Nope/doc");
    }

    #[test]
    fn latest_revision_degrades_to_none() {
        assert_eq!(
            decode_latest_revision(json!({ "query": { "pages": [{
                "ns": 10, "title": "Template:C",
                "revisions": [{ "user": "Editor", "timestamp": "2024-05-01T10:00:00Z" }]
            }]}})),
            Some(RevisionInfo {
                user: "Editor".to_string(),
                timestamp: "2024-05-01T10:00:00Z".to_string(),
            })
        );
        assert_eq!(
            decode_latest_revision(json!({ "query": { "pages": [{
                "ns": 10, "title": "Template:C", "missing": true
            }]}})),
            None
        );
        assert_eq!(decode_latest_revision(json!({ "batchcomplete": true })), None);
    }

    #[test]
    fn api_error_payload_is_reported() {
        let error = check_api_error(&json!({
            "error": { "code": "badtoken", "info": "Invalid CSRF token." }
        }))
        .expect_err("must fail");
        assert_eq!(
            error.to_string(),
            "MediaWiki API error [badtoken]: Invalid CSRF token."
        );
    }

    #[test]
    fn only_transient_statuses_are_retryable() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
        assert!(!is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn client_config_requires_api_url() {
        let config = TaggerConfig::default();
        let error = MediaWikiClientConfig::with_api_url(None, &config).expect_err("must fail");
        assert!(error.to_string().contains("api_url is required"));

        let resolved = MediaWikiClientConfig::with_api_url(
            Some("https://wiki.example.org/api.php".to_string()),
            &config,
        )
        .expect("config");
        assert_eq!(resolved.api_url, "https://wiki.example.org/api.php");
    }

    #[test]
    fn get_pairs_drop_empty_values() {
        let pairs = request_pairs(
            Method::Get,
            &[
                ("action", "query".to_string()),
                ("list", "allpages".to_string()),
                ("apcontinue", String::new()),
            ],
        );
        assert_eq!(
            pairs,
            vec![
                ("format".to_string(), "json".to_string()),
                ("formatversion".to_string(), "2".to_string()),
                ("action".to_string(), "query".to_string()),
                ("list".to_string(), "allpages".to_string()),
            ]
        );
    }

    #[test]
    fn post_pairs_keep_blank_edit_text() {
        let pairs = request_pairs(
            Method::Post,
            &[
                ("action", "edit".to_string()),
                ("title", "Project:Doctag checkpoint".to_string()),
                ("text", String::new()),
            ],
        );
        assert!(pairs.contains(&("text".to_string(), String::new())));
        assert_eq!(pairs[0], ("format".to_string(), "json".to_string()));
        assert_eq!(pairs.len(), 5);
    }

    #[test]
    fn tokens_are_read_by_kind() {
        let response = json!({ "batchcomplete": true, "query": { "tokens": {
            "logintoken": "abc+\\", "csrftoken": "def+\\"
        }}});
        assert_eq!(decode_token(&response, "login").expect("login"), "abc+\\");
        assert_eq!(decode_token(&response, "csrf").expect("csrf"), "def+\\");
        let error = decode_token(&json!({ "query": {} }), "csrf").expect_err("must fail");
        assert!(error.to_string().contains("csrf token"));
    }

    #[test]
    fn login_failure_reports_reason() {
        check_login_result(&json!({ "login": { "result": "Success" } }), "Bot@doctag")
            .expect("success");
        let error = check_login_result(
            &json!({ "login": { "result": "Failed", "reason": "Incorrect password" } }),
            "Bot@doctag",
        )
        .expect_err("must fail");
        assert_eq!(
            error.to_string(),
            "MediaWiki login failed for Bot@doctag: Incorrect password"
        );
    }

    #[test]
    fn namespace_name_comes_from_siteinfo() {
        let response = json!({ "query": { "namespaces": {
            "0": { "id": 0, "case": "first-letter", "name": "", "content": true },
            "10": { "id": 10, "case": "first-letter", "name": "Template", "canonical": "Template" }
        }}});
        assert_eq!(decode_namespace_name(&response, 10).expect("ns 10"), "Template");
        assert_eq!(decode_namespace_name(&response, 0).expect("ns 0"), "");
        assert!(decode_namespace_name(&response, 828).is_err());
    }
}
