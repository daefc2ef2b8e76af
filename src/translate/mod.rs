// Translation backends
//
// - ollama: streaming chat client with retry, timeout and cancellation
// - stream: newline-delimited JSON decoding of the chat stream
// - prompt: system/user message construction

pub mod ollama;
pub mod prompt;
pub mod stream;

use async_trait::async_trait;

pub use ollama::{ConnectionStatus, OllamaClient, TranslationSettings, check_connection};

use crate::error::TranslateError;

/// One streamed piece of a translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamChunk<'a> {
    /// Text received in this piece, as sent by the model
    pub delta: &'a str,
    /// Everything received so far in the current attempt, including `delta`
    pub accumulated: &'a str,
}

pub type ChunkCallback<'a> = &'a mut (dyn for<'c> FnMut(StreamChunk<'c>) + Send);

/// Translates one paragraph at a time.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text`, reporting streamed output through `on_chunk`.
    ///
    /// Transient failures are retried internally; the error returned is the
    /// final classification.
    async fn translate(
        &self,
        text: &str,
        target_language: &str,
        source_language: Option<&str>,
        on_chunk: Option<ChunkCallback<'_>>,
    ) -> Result<String, TranslateError>;
}
