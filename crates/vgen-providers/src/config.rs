//! Provider configuration.

use std::fmt;
use std::str::FromStr;

use crate::error::ProviderError;

/// Supported text generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAi,
    Moonshot,
    DeepSeek,
    Ollama,
    /// Any OpenAI-compatible gateway; requires an explicit base URL
    OneApi,
    Gemini,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "openai",
            LlmProvider::Moonshot => "moonshot",
            LlmProvider::DeepSeek => "deepseek",
            LlmProvider::Ollama => "ollama",
            LlmProvider::OneApi => "oneapi",
            LlmProvider::Gemini => "gemini",
        }
    }

    /// Prefix of the provider-specific environment variables.
    fn env_prefix(&self) -> &'static str {
        match self {
            LlmProvider::OpenAi => "OPENAI",
            LlmProvider::Moonshot => "MOONSHOT",
            LlmProvider::DeepSeek => "DEEPSEEK",
            LlmProvider::Ollama => "OLLAMA",
            LlmProvider::OneApi => "ONEAPI",
            LlmProvider::Gemini => "GEMINI",
        }
    }

    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            LlmProvider::OpenAi => Some("https://api.openai.com/v1"),
            LlmProvider::Moonshot => Some("https://api.moonshot.cn/v1"),
            LlmProvider::DeepSeek => Some("https://api.deepseek.com"),
            LlmProvider::Ollama => Some("http://localhost:11434/v1"),
            LlmProvider::OneApi => None,
            LlmProvider::Gemini => Some("https://generativelanguage.googleapis.com/v1beta"),
        }
    }

    /// Whether requests need an API key.
    pub fn requires_api_key(&self) -> bool {
        !matches!(self, LlmProvider::Ollama)
    }
}

impl fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LlmProvider {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(LlmProvider::OpenAi),
            "moonshot" => Ok(LlmProvider::Moonshot),
            "deepseek" => Ok(LlmProvider::DeepSeek),
            "ollama" => Ok(LlmProvider::Ollama),
            "oneapi" => Ok(LlmProvider::OneApi),
            "gemini" => Ok(LlmProvider::Gemini),
            other => Err(ProviderError::configuration(format!(
                "unknown LLM provider: {other}"
            ))),
        }
    }
}

/// Text generation settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl LlmConfig {
    pub fn new(provider: LlmProvider) -> Self {
        Self {
            provider,
            api_key: None,
            model: None,
            base_url: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Read `LLM_PROVIDER` and the matching `<PROVIDER>_API_KEY`,
    /// `<PROVIDER>_MODEL_NAME` and `<PROVIDER>_BASE_URL` variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        let provider: LlmProvider = std::env::var("LLM_PROVIDER")
            .unwrap_or_else(|_| "openai".to_string())
            .parse()?;
        let prefix = provider.env_prefix();

        Ok(Self {
            provider,
            api_key: non_empty_var(&format!("{prefix}_API_KEY")),
            model: non_empty_var(&format!("{prefix}_MODEL_NAME")),
            base_url: non_empty_var(&format!("{prefix}_BASE_URL")),
        })
    }

    /// Base URL to use, falling back to the provider default.
    pub fn resolved_base_url(&self) -> Option<String> {
        self.base_url
            .clone()
            .or_else(|| self.provider.default_base_url().map(str::to_string))
    }
}

/// Which subtitle source the pipeline starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubtitleProvider {
    /// Synthesizer word timing, with transcription as the fallback
    #[default]
    Edge,
    /// Transcription followed by correction
    Whisper,
}

impl FromStr for SubtitleProvider {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "edge" | "" => Ok(SubtitleProvider::Edge),
            "whisper" => Ok(SubtitleProvider::Whisper),
            other => Err(ProviderError::configuration(format!(
                "unknown subtitle provider: {other}"
            ))),
        }
    }
}

/// Settings for every provider the pipeline talks to.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub llm: LlmConfig,
    pub pexels_api_keys: Vec<String>,
    pub pixabay_api_keys: Vec<String>,
    pub subtitle_provider: SubtitleProvider,
    /// edge-tts executable
    pub edge_tts_bin: String,
    /// whisper-compatible executable
    pub whisper_bin: String,
    pub whisper_model: String,
}

impl ProviderConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ProviderError> {
        Ok(Self {
            llm: LlmConfig::from_env()?,
            pexels_api_keys: split_keys(&std::env::var("PEXELS_API_KEYS").unwrap_or_default()),
            pixabay_api_keys: split_keys(&std::env::var("PIXABAY_API_KEYS").unwrap_or_default()),
            subtitle_provider: std::env::var("SUBTITLE_PROVIDER")
                .unwrap_or_default()
                .parse()?,
            edge_tts_bin: std::env::var("EDGE_TTS_BIN").unwrap_or_else(|_| "edge-tts".to_string()),
            whisper_bin: std::env::var("WHISPER_BIN").unwrap_or_else(|_| "whisper".to_string()),
            whisper_model: std::env::var("WHISPER_MODEL").unwrap_or_else(|_| "base".to_string()),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Split a comma separated key list, dropping blanks.
pub fn split_keys(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}
