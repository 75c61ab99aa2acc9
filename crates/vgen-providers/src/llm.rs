//! Text generation: script and search term prompts.
//!
//! Two client families cover the supported providers:
//! - [`OpenAiCompatibleClient`] for OpenAI, Moonshot, DeepSeek, Ollama and gateways
//! - [`GeminiClient`] for Google Gemini

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{LlmConfig, LlmProvider};
use crate::error::{ProviderError, ProviderResult};

/// Marker some gateways put in a 200 response when the call actually failed.
pub const ERROR_MARKER: &str = "Error: ";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

static JSON_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*\]").expect("valid json array regex"));
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[.*\]").expect("valid bracket regex"));
static PARENTHESIZED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(.*\)").expect("valid parenthesis regex"));

/// A backend that completes a single prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> ProviderResult<String>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Build the generator selected by `config`.
///
/// Missing keys or models are reported here, before any task runs.
pub fn create_text_generator(config: &LlmConfig) -> ProviderResult<Arc<dyn TextGenerator>> {
    let provider = config.provider;
    let model = config
        .model
        .clone()
        .ok_or_else(|| ProviderError::configuration(format!("{provider}: model name is not set")))?;
    let api_key = match (&config.api_key, provider.requires_api_key()) {
        (Some(key), _) => key.clone(),
        (None, false) => provider.as_str().to_string(),
        (None, true) => {
            return Err(ProviderError::configuration(format!(
                "{provider}: api key is not set"
            )))
        }
    };
    let base_url = config
        .resolved_base_url()
        .ok_or_else(|| ProviderError::configuration(format!("{provider}: base url is not set")))?;

    info!("Using {} text generator with model {}", provider, model);
    let generator: Arc<dyn TextGenerator> = match provider {
        LlmProvider::Gemini => Arc::new(GeminiClient::new(api_key, model)?.with_base_url(base_url)),
        _ => Arc::new(OpenAiCompatibleClient::new(
            provider.as_str(),
            base_url,
            api_key,
            model,
        )?),
    };
    Ok(generator)
}

fn http_client() -> ProviderResult<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?)
}

// OpenAI-compatible chat completions

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for `/chat/completions` style APIs.
pub struct OpenAiCompatibleClient {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> ProviderResult<Self> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: http_client()?,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleClient {
    async fn generate_text(&self, prompt: &str) -> ProviderResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens: 4096,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::request_failed(format!("{} request failed: {}", self.name, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::request_failed(format!(
                "{} returned {}: {}",
                self.name, status, error_text
            )));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::invalid_response(format!("failed to parse {} response: {}", self.name, e))
        })?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::invalid_response(format!("{} returned no content", self.name)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// Gemini generateContent

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

/// Google Gemini client.
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> ProviderResult<Self> {
        Ok(Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: LlmProvider::Gemini
                .default_base_url()
                .unwrap_or_default()
                .to_string(),
            client: http_client()?,
        })
    }

    /// Create from `GEMINI_API_KEY` and `GEMINI_MODEL_NAME`.
    pub fn from_env() -> ProviderResult<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ProviderError::configuration("GEMINI_API_KEY not set"))?;
        let model =
            std::env::var("GEMINI_MODEL_NAME").unwrap_or_else(|_| "gemini-2.5-flash".to_string());
        Self::new(api_key, model)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate_text(&self, prompt: &str) -> ProviderResult<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.5,
                max_output_tokens: 8192,
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::request_failed(format!("Gemini API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::request_failed(format!(
                "Gemini API returned {}: {}",
                status, error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            ProviderError::invalid_response(format!("Failed to parse Gemini response: {}", e))
        })?;

        gemini_response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| ProviderError::invalid_response("No content in Gemini response"))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// Prompts and reply handling

/// Prompt for a narration script about `subject`.
pub fn script_prompt(subject: &str, language: Option<&str>, paragraphs: u32) -> String {
    let mut prompt = format!(
        r#"# Role: Video Script Generator
## Goals:
Generate a script for a video, depending on the subject of the video.
## Constraints:
1. Return the script as plain text with the specified number of paragraphs.
2. Get straight to the point, do not start with "welcome to this video".
3. Do not use markdown, titles or speaker labels.
4. Respond in the same language as the video subject.
# Initialization:
- video subject: {subject}
- number of paragraphs: {paragraphs}"#
    );
    if let Some(language) = language.filter(|l| !l.is_empty()) {
        prompt.push_str(&format!("\n- language: {language}"));
    }
    prompt
}

/// Prompt for `amount` English stock footage search terms.
pub fn terms_prompt(subject: &str, script: &str, amount: usize) -> String {
    format!(
        r#"# Role: Video Search Terms Generator
## Goals:
Generate {amount} search terms for stock videos, depending on the subject of a video.
## Constraints:
1. Return the search terms as a JSON array of strings.
2. Each search term should consist of 1-3 words and include the main subject of the video.
3. Reply with the JSON array only.
4. The search terms must be in English.
## Output Example:
["search term 1", "search term 2", "search term 3"]
## Context:
### Video Subject
{subject}
### Video Script
{script}"#
    )
}

/// Strip markdown markers and bracketed or parenthesized notes.
pub fn clean_script(reply: &str) -> String {
    let text = reply.replace(['*', '#'], "");
    let text = BRACKETED.replace_all(&text, "");
    let text = PARENTHESIZED.replace_all(&text, "");
    text.trim().to_string()
}

/// Parse the first JSON array of strings in `reply`.
pub fn extract_terms(reply: &str) -> ProviderResult<Vec<String>> {
    let array = JSON_ARRAY
        .find(reply)
        .ok_or_else(|| ProviderError::invalid_response(format!("no JSON array in reply: {reply}")))?;
    let terms: Vec<String> = serde_json::from_str(array.as_str())?;
    Ok(terms
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

fn reject_error_reply(reply: &str) -> ProviderResult<()> {
    if reply.contains(ERROR_MARKER) {
        return Err(ProviderError::invalid_response(reply.to_string()));
    }
    Ok(())
}

/// One attempt at generating a cleaned script.
pub async fn request_script(
    generator: &dyn TextGenerator,
    subject: &str,
    language: Option<&str>,
    paragraphs: u32,
) -> ProviderResult<String> {
    let reply = generator
        .generate_text(&script_prompt(subject, language, paragraphs.max(1)))
        .await?;
    reject_error_reply(&reply)?;

    let script = clean_script(&reply);
    if script.is_empty() {
        return Err(ProviderError::invalid_response(format!(
            "{} returned an empty script",
            generator.name()
        )));
    }
    debug!("Generated script: {}", script);
    Ok(script)
}

/// One attempt at generating search terms for `script`.
pub async fn request_terms(
    generator: &dyn TextGenerator,
    subject: &str,
    script: &str,
    amount: usize,
) -> ProviderResult<Vec<String>> {
    let reply = generator
        .generate_text(&terms_prompt(subject, script, amount))
        .await?;
    reject_error_reply(&reply)?;

    let mut terms = extract_terms(&reply)?;
    if terms.is_empty() {
        warn!("{} returned no search terms", generator.name());
        return Err(ProviderError::invalid_response("empty search term list"));
    }
    terms.truncate(amount.max(1));
    info!("Generated search terms: {:?}", terms);
    Ok(terms)
}
