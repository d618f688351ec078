//! OpenAI-compatible Chat Completions decider.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tracing::debug;

use super::decision::{Decider, DecisionRequest};
use crate::config::DecisionSettings;
use crate::error::RelayError;

pub struct ChatCompletionsDecider {
    client: reqwest::Client,
    settings: DecisionSettings,
}

impl ChatCompletionsDecider {
    pub fn new(settings: DecisionSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn settings(&self) -> &DecisionSettings {
        &self.settings
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = &self.settings.api_key {
            if let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    fn build_request_body(&self, request: &DecisionRequest) -> serde_json::Value {
        serde_json::json!({
            "model": self.settings.model,
            "temperature": self.settings.temperature,
            "messages": [
                { "role": "system", "content": request.system_prompt() },
                { "role": "user", "content": request.user_prompt() },
            ],
        })
    }
}

#[async_trait]
impl Decider for ChatCompletionsDecider {
    async fn decide(&self, request: DecisionRequest) -> Result<String, RelayError> {
        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        let body = self.build_request_body(&request);

        debug!(model = %self.settings.model, "requesting decision");

        let resp = self
            .client
            .post(&url)
            .headers(self.headers())
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(RelayError::Decision(format!(
                "HTTP {}: {body_text}",
                status.as_u16()
            )));
        }

        let data: ChatResponse = resp.json().await?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Decision("no choices in response".into()))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
