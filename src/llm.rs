//! Thin transport for an OpenAI-compatible chat-completions API.
//!
//! The pipeline owns the prompt contract and all response validation (see
//! [`crate::parse`]); this client only moves text over HTTP.

use std::time::Duration;

use crate::{config::LlmConfig, prelude::*};

/// Timeout for a single language-model call.
const LLM_TIMEOUT: Duration = Duration::from_secs(60);

/// Sampling temperature. Extraction should be as deterministic as the model
/// allows.
const TEMPERATURE: f64 = 0.2;

/// Upper bound on the structured response.
const MAX_TOKENS: u32 = 2_048;

/// A language model that turns raw menu text into a raw JSON string.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send menu text to the model and return its raw response text.
    ///
    /// The response is *not* validated here; the caller decides whether it
    /// honors the JSON contract.
    async fn parse(&self, text: &str) -> Result<String>;
}

/// The extraction prompt. The contract is strict: a single JSON object in a
/// fixed schema, no prose, no markdown, and an explicit empty form so the
/// model never invents items for sparse documents.
pub fn build_extraction_prompt(menu_text: &str) -> String {
    format!(
        r#"You are a strict data parser that converts restaurant menu text into JSON.

Rules:
- Return ONLY a single valid JSON object. No explanations. No markdown.
- Extract each priced menu item with its name, category, and price.
- category must be exactly one of: "starter", "main_course", "drink", "dessert".
- price must be a positive number. DO NOT guess missing prices; omit the item.
- tax_percent is the tax rate printed on the menu, or 0 if none is printed.
- If the text contains no priced items, return {{"items": [], "tax_percent": 0}}.

Output format:
{{"items": [{{"name": string, "category": string, "price": number}}], "tax_percent": number}}

Menu text:
{menu_text}
"#
    )
}

/// [`LlmClient`] implementation speaking the OpenAI `/chat/completions`
/// protocol (works with OpenAI, LiteLLM, Ollama, and most gateways).
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    config: LlmConfig,
}

/// The slice of a chat-completions response we care about.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiCompatClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(LLM_TIMEOUT)
            .build()
            .context("failed to build LLM HTTP client")?;
        Ok(Self { client, config })
    }

    /// Build the chat-completions endpoint URL.
    fn completions_url(&self) -> String {
        let mut url = self.config.api_base.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str("chat/completions");
        url
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    #[instrument(level = "debug", skip_all, fields(model = %self.config.model))]
    async fn parse(&self, text: &str) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "messages": [{
                "role": "user",
                "content": build_extraction_prompt(text),
            }],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        });

        let mut request = self.client.post(self.completions_url()).json(&body);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .context("LLM request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("LLM API returned status {}: {}", status, body));
        }

        let response = response
            .json::<ChatCompletionResponse>()
            .await
            .context("failed to parse LLM response envelope")?;
        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .ok_or_else(|| anyhow!("empty LLM response"))?;
        Ok(content.to_owned())
    }
}
