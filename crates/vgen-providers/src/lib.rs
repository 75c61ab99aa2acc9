//! External providers for the video generation pipeline.
//!
//! One trait per capability, one implementation per provider:
//! - [`TextGenerator`]: OpenAI-compatible chat APIs and Gemini
//! - [`MaterialSearch`]: Pexels and Pixabay
//! - [`SpeechSynthesizer`]: edge-tts
//! - [`Transcriber`]: whisper-compatible CLIs

pub mod config;
pub mod error;
pub mod llm;
pub mod process;
pub mod search;
pub mod transcribe;
pub mod tts;

pub use config::{LlmConfig, LlmProvider, ProviderConfig, SubtitleProvider};
pub use error::{ProviderError, ProviderResult};
pub use llm::{
    create_text_generator, request_script, request_terms, GeminiClient, OpenAiCompatibleClient,
    TextGenerator,
};
pub use search::{create_material_search, MaterialSearch, PexelsSearch, PixabaySearch};
pub use transcribe::{Transcriber, WhisperCliTranscriber};
pub use tts::{EdgeTtsSynthesizer, SpeechOutput, SpeechRequest, SpeechSynthesizer};
