//! Sequential translation of one job's paragraphs.
//!
//! Units run strictly in order with at most one request on the wire. Each
//! unit ends in exactly one terminal status; a failed unit does not stop the
//! job, a cancellation marks the current unit and every later one as
//! `Cancelled` and ends it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::TranslateError;
use crate::events::{EventSink, TranslationEvent, UnitStatus};
use crate::translate::{StreamChunk, Translator};

pub const CANCELLED_MESSAGE: &str = "Cancelled";

/// Opaque paragraph identifier, unique within a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UnitId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UnitId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub id: UnitId,
    pub text: String,
}

impl TranslationUnit {
    pub fn new(id: impl Into<UnitId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationJob {
    pub units: Vec<TranslationUnit>,
    pub target_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_language: Option<String>,
}

impl TranslationJob {
    pub fn new(units: Vec<TranslationUnit>, target_language: impl Into<String>) -> Self {
        Self {
            units,
            target_language: target_language.into(),
            source_language: None,
        }
    }

    pub fn with_source_language(mut self, source_language: impl Into<String>) -> Self {
        self.source_language = Some(source_language.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    pub cancelled: bool,
}

impl JobResult {
    pub const COMPLETED: Self = Self {
        success: true,
        cancelled: false,
    };

    pub const CANCELLED: Self = Self {
        success: false,
        cancelled: true,
    };
}

/// How one unit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Translated(String),
    Cancelled,
    Failed(TranslateError),
}

/// Drives a job through a [`Translator`], reporting to an [`EventSink`].
pub struct JobRunner {
    translator: Arc<dyn Translator>,
    sink: Arc<dyn EventSink>,
    token: CancellationToken,
}

impl JobRunner {
    pub fn new(
        translator: Arc<dyn Translator>,
        sink: Arc<dyn EventSink>,
        token: CancellationToken,
    ) -> Self {
        Self {
            translator,
            sink,
            token,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Request cancellation of the running job.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Translate every unit of `job`. Resets the token first, so a
    /// cancellation left over from an earlier job has no effect.
    pub async fn run(&self, job: &TranslationJob) -> JobResult {
        self.token.reset();
        self.process(job).await
    }

    /// The unit loop of [`run`](Self::run), without the reset.
    pub(crate) async fn process(&self, job: &TranslationJob) -> JobResult {
        let total = job.units.len();
        info!(
            "Starting translation job: {} paragraphs to {}",
            total, job.target_language
        );

        for (idx, unit) in job.units.iter().enumerate() {
            if self.token.is_cancelled() {
                info!("Job cancelled before paragraph {}/{}", idx + 1, total);
                self.cancel_remaining(&job.units[idx..]);
                return JobResult::CANCELLED;
            }

            self.notify(TranslationEvent::Progress {
                current: idx + 1,
                total,
            });
            self.notify(TranslationEvent::status(&unit.id, UnitStatus::Translating));

            match self.translate_unit(job, unit).await {
                UnitOutcome::Translated(text) => {
                    debug!("Paragraph {} translated ({} chars)", unit.id, text.len());
                    self.notify(TranslationEvent::partial(&unit.id, text, true));
                    self.notify(TranslationEvent::status(&unit.id, UnitStatus::Done));
                }
                UnitOutcome::Cancelled => {
                    info!("Job cancelled during paragraph {}/{}", idx + 1, total);
                    self.cancel_remaining(&job.units[idx..]);
                    return JobResult::CANCELLED;
                }
                UnitOutcome::Failed(e) => {
                    warn!("Paragraph {} failed: {}", unit.id, e);
                    self.notify(TranslationEvent::error(&unit.id, e.user_message()));
                }
            }
        }

        info!("Translation job finished: {} paragraphs", total);
        JobResult::COMPLETED
    }

    async fn translate_unit(&self, job: &TranslationJob, unit: &TranslationUnit) -> UnitOutcome {
        let sink = &self.sink;
        let mut forward = |chunk: StreamChunk<'_>| {
            deliver(
                sink.as_ref(),
                TranslationEvent::partial(&unit.id, chunk.accumulated, false),
            );
        };

        let result = self
            .translator
            .translate(
                &unit.text,
                &job.target_language,
                job.source_language.as_deref(),
                Some(&mut forward),
            )
            .await;

        match result {
            Ok(text) => UnitOutcome::Translated(text),
            Err(TranslateError::Cancelled) => UnitOutcome::Cancelled,
            Err(_) if self.token.is_cancelled() => UnitOutcome::Cancelled,
            Err(e) => UnitOutcome::Failed(e),
        }
    }

    fn cancel_remaining(&self, units: &[TranslationUnit]) {
        for unit in units {
            self.notify(TranslationEvent::error(&unit.id, CANCELLED_MESSAGE));
        }
    }

    fn notify(&self, event: TranslationEvent) {
        deliver(self.sink.as_ref(), event);
    }
}

fn deliver(sink: &dyn EventSink, event: TranslationEvent) {
    if let Err(e) = sink.emit(event) {
        debug!("Dropped event: {}", e);
    }
}
