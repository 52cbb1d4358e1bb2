//! Instagram caption scraper
//!
//! Reads the public post page. The caption comes from the first JSON-LD
//! block that declares an `@type`, falling back to the `og:description`
//! meta tag.

use crate::captions::{CaptionError, CaptionFetcher};
use crate::infrastructure::config::CaptionConfig;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

const LD_JSON_MARKER: &str = "application/ld+json";
const CAPTION_FIELDS: [&str; 3] = ["caption", "articleBody", "description"];

pub struct InstagramScraper {
    client: reqwest::Client,
}

impl InstagramScraper {
    pub fn new(config: &CaptionConfig) -> Result<Self, CaptionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| CaptionError::FetchFailed(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CaptionFetcher for InstagramScraper {
    async fn fetch_caption(&self, url: &str) -> Result<String, CaptionError> {
        tracing::debug!("Fetching caption from {}", url);

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| CaptionError::FetchFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CaptionError::Http(response.status().as_u16()));
        }

        let html = response
            .text()
            .await
            .map_err(|e| CaptionError::FetchFailed(e.to_string()))?;

        extract_caption(&html).ok_or(CaptionError::NotFound)
    }
}

/// Pull the caption out of a post page
pub fn extract_caption(html: &str) -> Option<String> {
    json_ld_caption(html)
        .or_else(|| og_description(html))
        .map(|caption| caption.trim().to_string())
        .filter(|caption| !caption.is_empty())
}

fn json_ld_caption(html: &str) -> Option<String> {
    json_ld_blocks(html)
        .filter_map(|block| serde_json::from_str::<Value>(block).ok())
        .flat_map(|value| match value {
            Value::Array(items) => items,
            other => vec![other],
        })
        .find(|item| item.get("@type").is_some())
        .and_then(|item| {
            CAPTION_FIELDS
                .iter()
                .filter_map(|field| item.get(*field).and_then(Value::as_str))
                .find(|text| !text.trim().is_empty())
                .map(str::to_string)
        })
}

/// Bodies of every `<script type="application/ld+json">` element
fn json_ld_blocks(html: &str) -> impl Iterator<Item = &str> {
    let mut rest = html;
    std::iter::from_fn(move || loop {
        let marker = rest.find(LD_JSON_MARKER)?;
        let in_script_tag = rest[..marker].rfind('<').is_some_and(|open| {
            let head = &rest[open..marker];
            head.starts_with("<script") && !head.contains('>')
        });
        let after_marker = &rest[marker..];
        let open_end = after_marker.find('>')? + 1;

        if !in_script_tag || after_marker[..open_end].contains('<') {
            // Marker matched outside a script tag; resume right after it
            rest = &after_marker[LD_JSON_MARKER.len()..];
            continue;
        }

        let body = &after_marker[open_end..];
        let close = body.find("</script>")?;
        rest = &body[close..];
        return Some(body[..close].trim());
    })
}

fn og_description(html: &str) -> Option<String> {
    let mut rest = html;
    while let Some(start) = rest.find("<meta") {
        let tag_body = &rest[start..];
        let end = tag_body.find('>')?;
        let tag = &tag_body[..end];
        rest = &tag_body[end..];

        if tag.contains("property=\"og:description\"") {
            return attribute(tag, "content").map(decode_entities);
        }
    }
    None
}

fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("{}=\"", name);
    let start = tag.find(&needle)? + needle.len();
    let end = tag[start..].find('"')?;
    Some(&tag[start..start + end])
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
