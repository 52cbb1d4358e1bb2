//! Input validation
//!
//! Cheap checks run before any worker is acquired or any collaborator is
//! called. Each rejection carries a human-readable reason.

use crate::infrastructure::config::ValidationConfig;
use std::fmt;
use url::Url;

/// Why an input was rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// Social platforms a post URL may come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Instagram,
    Twitter,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Instagram => f.write_str("instagram"),
            Platform::Twitter => f.write_str("twitter"),
        }
    }
}

/// Longest run of one repeated character that is still accepted
const MAX_CHAR_RUN: usize = 10;

/// Validate caption text before classification or rewriting
pub fn validate_caption(caption: &str, rules: &ValidationConfig) -> Result<(), ValidationError> {
    if caption.trim().is_empty() {
        return Err(ValidationError::new(
            "Caption cannot be empty or contain only whitespace",
        ));
    }

    let length = caption.chars().count();
    if length < rules.min_length {
        return Err(ValidationError::new(format!(
            "Caption must be at least {} character(s)",
            rules.min_length
        )));
    }
    if length > rules.max_length {
        return Err(ValidationError::new(format!(
            "Caption exceeds maximum length of {} characters",
            rules.max_length
        )));
    }

    let special = caption
        .chars()
        .filter(|c| !c.is_ascii_alphanumeric() && !c.is_whitespace())
        .count();
    if special * 2 > length {
        return Err(ValidationError::new("Caption contains too many special characters"));
    }

    if longest_char_run(caption) > MAX_CHAR_RUN {
        return Err(ValidationError::new("Caption contains excessive character repetition"));
    }

    if emoji_runs(caption) > rules.max_emojis {
        return Err(ValidationError::new("Caption contains too many emojis"));
    }

    if caption.contains('\0') {
        return Err(ValidationError::new("Caption contains null bytes"));
    }

    if caption
        .chars()
        .any(|c| (c as u32) < 32 && !matches!(c, '\n' | '\r' | '\t'))
    {
        return Err(ValidationError::new("Caption contains invalid control characters"));
    }

    if caption.split_whitespace().count() > rules.max_words {
        return Err(ValidationError::new(format!(
            "Caption contains too many words (max {})",
            rules.max_words
        )));
    }

    Ok(())
}

/// Validate a post URL for the given platform
pub fn validate_post_url(url: &str, platform: Platform) -> Result<(), ValidationError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ValidationError::new("URL cannot be empty"));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ValidationError::new("URL must start with http:// or https://"));
    }

    let parsed =
        Url::parse(url).map_err(|e| ValidationError::new(format!("Invalid URL format: {}", e)))?;
    let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
    let path = parsed.path().trim_matches('/');

    match platform {
        Platform::Instagram => {
            if !matches!(host.as_str(), "www.instagram.com" | "instagram.com") {
                return Err(ValidationError::new(format!(
                    "URL must be from Instagram (got: {})",
                    host
                )));
            }
            if path.is_empty() {
                return Err(ValidationError::new(
                    "Instagram URL must contain a post path (e.g., /p/shortcode/ or /reel/shortcode/)",
                ));
            }

            let parts: Vec<&str> = path.split('/').collect();
            if parts.len() < 2 {
                return Err(ValidationError::new("Invalid Instagram post URL format"));
            }

            let post_type = parts[0];
            if !matches!(post_type, "p" | "reel" | "tv") {
                return Err(ValidationError::new(format!(
                    "Instagram URL must be a post (/p/), reel (/reel/), or IGTV (/tv/). Got: /{}/",
                    post_type
                )));
            }

            let shortcode = parts[1];
            if shortcode.is_empty() {
                return Err(ValidationError::new(
                    "Instagram post URL must contain a valid shortcode",
                ));
            }
            let shortcode_len = shortcode.chars().count();
            if !(5..=20).contains(&shortcode_len) {
                return Err(ValidationError::new(format!(
                    "Invalid Instagram shortcode length: {} characters",
                    shortcode_len
                )));
            }
            if !shortcode
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
            {
                return Err(ValidationError::new(
                    "Instagram shortcode contains invalid characters",
                ));
            }
        }
        Platform::Twitter => {
            if !matches!(
                host.as_str(),
                "www.twitter.com" | "twitter.com" | "x.com" | "www.x.com"
            ) {
                return Err(ValidationError::new(format!(
                    "URL must be from Twitter/X (got: {})",
                    host
                )));
            }
            if path.is_empty() {
                return Err(ValidationError::new("Twitter URL must contain a post path"));
            }
        }
    }

    Ok(())
}

/// Validate a target sentiment label for rewriting
pub fn validate_sentiment(label: &str) -> Result<(), ValidationError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(ValidationError::new("Sentiment cannot be empty"));
    }
    if label.len() > 32 || !label.chars().all(|c| c.is_alphabetic() || c == '-' || c == '_') {
        return Err(ValidationError::new(format!("Invalid sentiment label: {}", label)));
    }
    Ok(())
}

fn longest_char_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous = None;

    for c in text.chars() {
        // Line breaks never count as a repeated character
        if c == '\n' {
            current = 0;
            previous = None;
            continue;
        }
        if Some(c) == previous {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        longest = longest.max(current);
    }
    longest
}

fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F600..=0x1F64F   // emoticons
            | 0x1F300..=0x1F5FF // symbols & pictographs
            | 0x1F680..=0x1F6FF // transport & map symbols
            | 0x1F1E0..=0x1F1FF // flags
            | 0x2702..=0x27B0   // dingbats
            | 0x24C2..=0x1F251
    )
}

/// Count maximal runs of consecutive emoji characters
fn emoji_runs(text: &str) -> usize {
    let mut runs = 0;
    let mut in_run = false;
    for c in text.chars() {
        let emoji = is_emoji(c);
        if emoji && !in_run {
            runs += 1;
        }
        in_run = emoji;
    }
    runs
}
