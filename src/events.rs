//! Progress, status, and partial-result events pushed to whatever surface is
//! rendering a job.
//!
//! Delivery is best effort. A sink reports failures, the job runner logs and
//! drops them; a listener that went away never stops a job.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::job::UnitId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Waiting for its turn. Set by renderers; the job runner never emits it.
    Queued,
    Translating,
    Done,
    Error,
}

impl UnitStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TranslationEvent {
    Progress {
        current: usize,
        total: usize,
    },
    Status {
        paragraph_id: UnitId,
        status: UnitStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    #[serde(rename = "translation_chunk")]
    PartialResult {
        paragraph_id: UnitId,
        text: String,
        done: bool,
    },
}

impl TranslationEvent {
    pub fn status(paragraph_id: &UnitId, status: UnitStatus) -> Self {
        Self::Status {
            paragraph_id: paragraph_id.clone(),
            status,
            error: None,
        }
    }

    pub fn error(paragraph_id: &UnitId, message: impl Into<String>) -> Self {
        Self::Status {
            paragraph_id: paragraph_id.clone(),
            status: UnitStatus::Error,
            error: Some(message.into()),
        }
    }

    pub fn partial(paragraph_id: &UnitId, text: impl Into<String>, done: bool) -> Self {
        Self::PartialResult {
            paragraph_id: paragraph_id.clone(),
            text: text.into(),
            done,
        }
    }

    pub fn paragraph_id(&self) -> Option<&UnitId> {
        match self {
            Self::Progress { .. } => None,
            Self::Status { paragraph_id, .. } | Self::PartialResult { paragraph_id, .. } => {
                Some(paragraph_id)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Event listener is gone")]
    Disconnected,

    #[error("Failed to deliver event: {0}")]
    Delivery(String),
}

/// Push channel toward a renderer.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TranslationEvent) -> Result<(), SinkError>;
}

/// Forwards events into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TranslationEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<TranslationEvent>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<TranslationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: TranslationEvent) -> Result<(), SinkError> {
        self.tx.send(event).map_err(|_| SinkError::Disconnected)
    }
}

/// Logs each event. Useful when nothing renders the job.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: TranslationEvent) -> Result<(), SinkError> {
        match &event {
            TranslationEvent::Progress { current, total } => {
                info!("Paragraph {}/{}", current, total);
            }
            TranslationEvent::Status { paragraph_id, status, error } => match error {
                Some(error) => info!("{}: {:?} ({})", paragraph_id, status, error),
                None => info!("{}: {:?}", paragraph_id, status),
            },
            TranslationEvent::PartialResult { paragraph_id, text, done: true } => {
                info!("{} => {}", paragraph_id, text);
            }
            TranslationEvent::PartialResult { .. } => {}
        }
        Ok(())
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(TranslationEvent) -> Result<(), SinkError> + Send + Sync,
{
    fn emit(&self, event: TranslationEvent) -> Result<(), SinkError> {
        (self.0)(event)
    }
}
