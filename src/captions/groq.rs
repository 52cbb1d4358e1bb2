//! Caption rewriting through an OpenAI-compatible chat completion API

use crate::captions::{CaptionRewriter, RewriteError};
use crate::infrastructure::config::RewriteConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_completion_tokens: u32,
    top_p: f64,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct GroqRewriter {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key_env: String,
}

impl GroqRewriter {
    pub fn new(config: &RewriteConfig) -> Result<Self, RewriteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RewriteError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
        })
    }

    /// Key is read per call so it can be provisioned after startup
    fn api_key(&self) -> Result<String, RewriteError> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| RewriteError::MissingApiKey(self.api_key_env.clone()))
    }
}

/// Instruction sent to the model
pub fn rewrite_prompt(caption: &str, sentiment: &str) -> String {
    format!(
        "The caption from a social media post is given below. Modify and improve the caption to attract more users and interactions and it reflects a {sentiment} sentiment. include relevant tags and emojis if necessary\n The caption: '{caption}' \n\nNOTE: RETURN THE CAPTION ONLY"
    )
}

#[async_trait]
impl CaptionRewriter for GroqRewriter {
    async fn rewrite(&self, caption: &str, sentiment: &str) -> Result<String, RewriteError> {
        let api_key = self.api_key()?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: rewrite_prompt(caption, sentiment),
            }],
            temperature: 1.0,
            max_completion_tokens: 8192,
            top_p: 1.0,
            stream: false,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RewriteError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RewriteError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| RewriteError::Request(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(RewriteError::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn rewriter(base_url: String, api_key_env: &str) -> GroqRewriter {
        GroqRewriter::new(&RewriteConfig {
            base_url,
            api_key_env: api_key_env.to_string(),
            ..RewriteConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_prompt_mentions_sentiment_and_caption() {
        let prompt = rewrite_prompt("messi retires", "negative");
        assert!(prompt.contains("reflects a negative sentiment"));
        assert!(prompt.contains("The caption: 'messi retires'"));
        assert!(prompt.ends_with("RETURN THE CAPTION ONLY"));
    }

    #[tokio::test]
    async fn test_missing_api_key() {
        let rewriter = rewriter("http://127.0.0.1:9".to_string(), "SOCIOLENS_TEST_UNSET_KEY");
        let err = rewriter.rewrite("hello", "positive").await.unwrap_err();
        assert!(matches!(err, RewriteError::MissingApiKey(name) if name == "SOCIOLENS_TEST_UNSET_KEY"));
    }

    #[tokio::test]
    async fn test_rewrite_round_trip() {
        let router = Router::new().route(
            "/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "openai/gpt-oss-20b");
                assert_eq!(body["messages"][0]["role"], "user");
                Json(json!({
                    "choices": [{"message": {"role": "assistant", "content": "  Best day ever! ☀️ #happy  "}}]
                }))
            }),
        );
        let base = serve(router).await;

        std::env::set_var("SOCIOLENS_TEST_KEY_OK", "test-key");
        let rewriter = rewriter(base, "SOCIOLENS_TEST_KEY_OK");
        let caption = rewriter.rewrite("good day", "positive").await.unwrap();
        assert_eq!(caption, "Best day ever! ☀️ #happy");
    }

    #[tokio::test]
    async fn test_provider_error() {
        let router = Router::new().route(
            "/chat/completions",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "rate limited") }),
        );
        let base = serve(router).await;

        std::env::set_var("SOCIOLENS_TEST_KEY_ERR", "test-key");
        let rewriter = rewriter(base, "SOCIOLENS_TEST_KEY_ERR");
        match rewriter.rewrite("good day", "positive").await {
            Err(RewriteError::Provider { status, message }) => {
                assert_eq!(status, 429);
                assert_eq!(message, "rate limited");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
