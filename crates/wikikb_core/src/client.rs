use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow, bail};
use reqwest::blocking::Client;
use reqwest::{Proxy, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::KbConfig;
use crate::markup::wikitext_to_markdown;

/// How a title is resolved before the page is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleLookup {
    /// Resolve through the search API first and load its suggestion or top hit.
    AutoSuggest,
    /// Load exactly the given title.
    Exact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub title: String,
    pub language: String,
    pub wikitext: String,
}

impl Page {
    pub fn to_markdown(&self) -> String {
        wikitext_to_markdown(&self.wikitext)
    }
}

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("\"{title}\" is a disambiguation page ({} options)", .options.len())]
    Disambiguation { title: String, options: Vec<String> },
    #[error("page \"{title}\" does not exist")]
    NotFound { title: String },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Read primitives of the encyclopedia. Every call names its language, so
/// no language state lives on the client.
pub trait EncyclopediaApi {
    fn fetch_page(
        &mut self,
        language: &str,
        title: &str,
        lookup: TitleLookup,
    ) -> Result<Page, LookupError>;
    fn page_links(&mut self, page: &Page) -> Result<Vec<String>, LookupError>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct MediaWikiClientConfig {
    pub api_url_template: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub min_request_interval: Duration,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
}

impl MediaWikiClientConfig {
    pub fn from_config(config: &KbConfig) -> Self {
        Self {
            api_url_template: config.api_url_template(),
            user_agent: config.user_agent(),
            timeout: config.timeout(),
            min_request_interval: config.min_request_interval(),
            http_proxy: config.http_proxy(),
            https_proxy: config.https_proxy(),
        }
    }

    pub fn api_url(&self, language: &str) -> anyhow::Result<Url> {
        let raw = self.api_url_template.replace("{lang}", language);
        Url::parse(&raw).with_context(|| format!("invalid MediaWiki API URL: {raw}"))
    }
}

pub struct MediaWikiClient {
    client: Client,
    config: MediaWikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl MediaWikiClient {
    pub fn new(config: MediaWikiClientConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder().timeout(config.timeout);
        if let Some(proxy) = &config.http_proxy {
            builder = builder.proxy(
                Proxy::http(proxy).with_context(|| format!("invalid HTTP proxy: {proxy}"))?,
            );
        }
        if let Some(proxy) = &config.https_proxy {
            builder = builder.proxy(
                Proxy::https(proxy).with_context(|| format!("invalid HTTPS proxy: {proxy}"))?,
            );
        }
        let client = builder
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn request_json_get(
        &mut self,
        language: &str,
        params: &[(&str, String)],
    ) -> anyhow::Result<Value> {
        let api_url = self.config.api_url(language)?;

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        self.apply_rate_limit();
        tracing::trace!(%api_url, ?pairs, "MediaWiki request");
        let response = self
            .client
            .get(api_url)
            .header("User-Agent", self.config.user_agent.clone())
            .query(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;

        let status = response.status();
        if !status.is_success() {
            bail!("MediaWiki API request failed with HTTP {status}");
        }
        let payload: Value = response
            .json()
            .context("failed to decode MediaWiki API JSON response")?;
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
        Ok(payload)
    }

    fn apply_rate_limit(&mut self) {
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < self.config.min_request_interval {
                sleep(self.config.min_request_interval - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn suggest_title(&mut self, language: &str, title: &str) -> Result<String, LookupError> {
        let payload = self.request_json_get(
            language,
            &[
                ("action", "query".to_string()),
                ("list", "search".to_string()),
                ("srsearch", title.to_string()),
                ("srlimit", "1".to_string()),
                ("srinfo", "suggestion".to_string()),
            ],
        )?;
        parse_suggestion(payload, title)
    }

    fn links_for_title(&mut self, language: &str, title: &str) -> anyhow::Result<Vec<String>> {
        let mut links = Vec::new();
        let mut continue_token = None::<String>;
        loop {
            let mut params = vec![
                ("action", "query".to_string()),
                ("titles", title.to_string()),
                ("prop", "links".to_string()),
                ("plnamespace", "0".to_string()),
                ("pllimit", "max".to_string()),
            ];
            if let Some(token) = &continue_token {
                params.push(("plcontinue", token.clone()));
            }
            let payload = self.request_json_get(language, &params)?;
            let (batch, next) = parse_links(payload)?;
            links.extend(batch);
            continue_token = next;
            if continue_token.is_none() {
                break;
            }
        }
        Ok(links)
    }
}

impl EncyclopediaApi for MediaWikiClient {
    fn fetch_page(
        &mut self,
        language: &str,
        title: &str,
        lookup: TitleLookup,
    ) -> Result<Page, LookupError> {
        let resolved = match lookup {
            TitleLookup::Exact => title.to_string(),
            TitleLookup::AutoSuggest => self.suggest_title(language, title)?,
        };
        let payload = self.request_json_get(
            language,
            &[
                ("action", "query".to_string()),
                ("titles", resolved.clone()),
                ("prop", "revisions|pageprops".to_string()),
                ("ppprop", "disambiguation".to_string()),
                ("rvprop", "content".to_string()),
                ("rvslots", "main".to_string()),
                ("redirects", "1".to_string()),
            ],
        )?;

        match classify_page(payload, &resolved)? {
            PageLookup::Found { title, wikitext } => Ok(Page {
                title,
                language: language.to_string(),
                wikitext,
            }),
            PageLookup::Disambiguation { title } => {
                let options = self.links_for_title(language, &title).unwrap_or_default();
                Err(LookupError::Disambiguation { title, options })
            }
        }
    }

    fn page_links(&mut self, page: &Page) -> Result<Vec<String>, LookupError> {
        let language = page.language.clone();
        Ok(self.links_for_title(&language, &page.title)?)
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PageLookup {
    Found { title: String, wikitext: String },
    Disambiguation { title: String },
}

fn classify_page(payload: Value, requested: &str) -> Result<PageLookup, LookupError> {
    let parsed: QueryResponse =
        serde_json::from_value(payload).context("failed to decode page query response")?;
    let page = parsed
        .query
        .pages
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("MediaWiki response contained no pages for {requested}"))?;

    if page.missing || page.invalid {
        return Err(LookupError::NotFound {
            title: requested.to_string(),
        });
    }
    if page
        .pageprops
        .as_ref()
        .is_some_and(|props| props.disambiguation.is_some())
    {
        return Ok(PageLookup::Disambiguation { title: page.title });
    }

    let wikitext = page
        .revisions
        .into_iter()
        .next()
        .and_then(|revision| revision.slots)
        .and_then(|slots| slots.main)
        .map(|slot| slot.content)
        .ok_or_else(|| anyhow!("page {} returned no revision content", page.title))?;
    Ok(PageLookup::Found {
        title: page.title,
        wikitext,
    })
}

fn parse_suggestion(payload: Value, title: &str) -> Result<String, LookupError> {
    let parsed: QueryResponse =
        serde_json::from_value(payload).context("failed to decode search API response")?;
    let suggestion = parsed
        .query
        .searchinfo
        .and_then(|info| info.suggestion)
        .filter(|value| !value.trim().is_empty());
    suggestion
        .or_else(|| parsed.query.search.into_iter().next().map(|hit| hit.title))
        .ok_or_else(|| LookupError::NotFound {
            title: title.to_string(),
        })
}

fn parse_links(payload: Value) -> anyhow::Result<(Vec<String>, Option<String>)> {
    let parsed: QueryResponse =
        serde_json::from_value(payload).context("failed to decode page links response")?;
    let links = parsed
        .query
        .pages
        .into_iter()
        .flat_map(|page| page.links)
        .map(|link| link.title)
        .collect();
    Ok((links, parsed.continuation.and_then(|cont| cont.plcontinue)))
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
    #[serde(default)]
    search: Vec<TitleQueryItem>,
    searchinfo: Option<SearchInfo>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    plcontinue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TitleQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct SearchInfo {
    suggestion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    invalid: bool,
    pageprops: Option<PageProps>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    #[serde(default)]
    links: Vec<TitleQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageProps {
    disambiguation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn api_url_substitutes_language() {
        let config = MediaWikiClientConfig::from_config(&KbConfig::default());
        let template = MediaWikiClientConfig {
            api_url_template: "https://{lang}.wikipedia.org/w/api.php".to_string(),
            ..config
        };
        let url = template.api_url("en").expect("url");
        assert_eq!(url.as_str(), "https://en.wikipedia.org/w/api.php");
        assert!(
            MediaWikiClientConfig {
                api_url_template: "not a url {lang}".to_string(),
                ..template
            }
            .api_url("en")
            .is_err()
        );
    }

    #[test]
    fn classify_page_returns_wikitext() {
        let payload = json!({
            "query": {"pages": [{
                "pageid": 1, "ns": 0, "title": "深度学习",
                "revisions": [{"slots": {"main": {"content": "'''深度学习'''"}}}]
            }]}
        });
        assert_eq!(
            classify_page(payload, "深度学习").expect("found"),
            PageLookup::Found {
                title: "深度学习".to_string(),
                wikitext: "'''深度学习'''".to_string(),
            }
        );
    }

    #[test]
    fn classify_page_detects_missing_pages() {
        let payload = json!({"query": {"pages": [{"ns": 0, "title": "Nope", "missing": true}]}});
        let error = classify_page(payload, "Nope").expect_err("missing");
        assert!(matches!(error, LookupError::NotFound { title } if title == "Nope"));
    }

    #[test]
    fn classify_page_detects_disambiguation_pageprop() {
        let payload = json!({
            "query": {"pages": [{
                "pageid": 2, "ns": 0, "title": "Mercury",
                "pageprops": {"disambiguation": ""},
                "revisions": [{"slots": {"main": {"content": "may refer to"}}}]
            }]}
        });
        assert_eq!(
            classify_page(payload, "Mercury").expect("classified"),
            PageLookup::Disambiguation {
                title: "Mercury".to_string()
            }
        );
    }

    #[test]
    fn classify_page_without_content_is_transient() {
        let payload = json!({"query": {"pages": [{"pageid": 3, "ns": 0, "title": "Empty"}]}});
        let error = classify_page(payload, "Empty").expect_err("no content");
        assert!(matches!(error, LookupError::Other(_)));
    }

    #[test]
    fn suggestion_wins_over_first_hit() {
        let payload = json!({
            "query": {
                "searchinfo": {"suggestion": "machine learning"},
                "search": [{"ns": 0, "title": "Machine learning"}]
            }
        });
        assert_eq!(
            parse_suggestion(payload, "machne learning").expect("suggestion"),
            "machine learning"
        );

        let payload = json!({"query": {"searchinfo": {}, "search": [{"ns": 0, "title": "Backpropagation"}]}});
        assert_eq!(
            parse_suggestion(payload, "backprop").expect("hit"),
            "Backpropagation"
        );
    }

    #[test]
    fn empty_search_is_not_found() {
        let payload = json!({"query": {"searchinfo": {"totalhits": 0}, "search": []}});
        let error = parse_suggestion(payload, "zzzz").expect_err("nothing");
        assert!(matches!(error, LookupError::NotFound { .. }));
    }

    #[test]
    fn parse_links_reads_continuation() {
        let payload = json!({
            "continue": {"plcontinue": "123|0|Beta", "continue": "||"},
            "query": {"pages": [{
                "pageid": 1, "ns": 0, "title": "Topic",
                "links": [{"ns": 0, "title": "Alpha"}, {"ns": 0, "title": "Beta"}]
            }]}
        });
        let (links, next) = parse_links(payload).expect("links");
        assert_eq!(links, vec!["Alpha".to_string(), "Beta".to_string()]);
        assert_eq!(next.as_deref(), Some("123|0|Beta"));

        let (links, next) = parse_links(json!({"query": {"pages": [{"ns": 0, "title": "T"}]}}))
            .expect("links");
        assert!(links.is_empty());
        assert!(next.is_none());
    }
}
