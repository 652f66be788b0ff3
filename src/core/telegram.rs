/// Telegram Bot API client for backup delivery

use anyhow::{Context, Result};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{OpsError, TELEGRAM_API_URL};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

pub struct TelegramClient {
    client: reqwest::Client,
    api_url: String,
    token: String,
    chat_id: String,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self> {
        Self::with_api_url(TELEGRAM_API_URL, token, chat_id)
    }

    /// Client against a different API root (local Bot API servers, tests)
    pub fn with_api_url(
        api_url: impl Into<String>,
        token: impl Into<String>,
        chat_id: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("panelctl/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            chat_id: chat_id.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    async fn check(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .with_context(|| format!("Unexpected Telegram response (HTTP {})", status))?;

        if !body.ok {
            return Err(OpsError::Telegram(
                body.description.unwrap_or_else(|| format!("HTTP {}", status)),
            )
            .into());
        }
        Ok(())
    }

    /// Send a plain text message
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await
            .context("Failed to reach Telegram")?;

        Self::check(response).await
    }

    /// Upload a file as a document
    pub async fn send_document(&self, path: &Path, caption: &str) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "backup.zip".to_string());

        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", caption.to_string())
            .part("document", Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .context("Failed to upload document to Telegram")?;

        Self::check(response).await
    }

    /// Send every part, captioned `<prefix> (i/n)` when there is more than one
    pub async fn deliver_parts(&self, parts: &[PathBuf], caption: &str) -> Result<()> {
        let total = parts.len();
        for (i, part) in parts.iter().enumerate() {
            let caption = if total > 1 {
                format!("{} ({}/{})", caption, i + 1, total)
            } else {
                caption.to_string()
            };

            tracing::info!(part = %part.display(), "uploading to Telegram");
            self.send_document(part, &caption)
                .await
                .with_context(|| format!("Failed to send part {}/{}", i + 1, total))?;
        }
        Ok(())
    }
}
