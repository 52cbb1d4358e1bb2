//! Caption collaborators
//!
//! - **instagram**: fetches a post's caption from its public page
//! - **groq**: rewrites a caption towards a target sentiment through an
//!   OpenAI-compatible chat completion API

pub mod groq;
pub mod instagram;

use async_trait::async_trait;

pub use groq::GroqRewriter;
pub use instagram::InstagramScraper;

/// Caption fetch failures
#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    /// The page was fetched but carried no caption
    #[error("No caption found for post")]
    NotFound,
    #[error("Failed to fetch post: {0}")]
    FetchFailed(String),
    #[error("Post page returned HTTP {0}")]
    Http(u16),
}

/// Caption rewrite failures
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),
    #[error("Rewrite request failed: {0}")]
    Request(String),
    #[error("Rewrite provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },
    #[error("Rewrite provider returned no content")]
    Empty,
}

/// Turns a validated post URL into its caption text
#[async_trait]
pub trait CaptionFetcher: Send + Sync {
    async fn fetch_caption(&self, url: &str) -> Result<String, CaptionError>;
}

/// Rewrites a caption so it reads with the given sentiment
#[async_trait]
pub trait CaptionRewriter: Send + Sync {
    async fn rewrite(&self, caption: &str, sentiment: &str) -> Result<String, RewriteError>;
}
