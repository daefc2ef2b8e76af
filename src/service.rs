//! Message API in front of the job runner and the settings store.
//!
//! Requests and responses use the same action names as the browser extension
//! protocol, so any front end speaking it can drive a [`TranslationService`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::{
    EffectiveSettings, GlobalSettings, GlobalSettingsUpdate, SettingsStore, SiteSettingsUpdate,
};
use crate::error::{ParatransError, Result};
use crate::events::EventSink;
use crate::job::{JobResult, JobRunner, TranslationJob, TranslationUnit};
use crate::translate::{self, ConnectionStatus, OllamaClient, TranslationSettings};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    CheckConnection,
    GetModels,
    GetSettings {
        #[serde(default)]
        domain: Option<String>,
    },
    UpdateGlobalSettings {
        updates: GlobalSettingsUpdate,
    },
    UpdateSiteSettings {
        domain: String,
        updates: SiteSettingsUpdate,
    },
    RemoveSiteSettings {
        domain: String,
    },
    CancelTranslation,
    Translate {
        paragraphs: Vec<TranslationUnit>,
        /// Empty means the effective target language
        #[serde(default)]
        target_lang: String,
        #[serde(default)]
        source_lang: Option<String>,
        #[serde(default)]
        domain: Option<String>,
    },
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Self::CheckConnection => "check_connection",
            Self::GetModels => "get_models",
            Self::GetSettings { .. } => "get_settings",
            Self::UpdateGlobalSettings { .. } => "update_global_settings",
            Self::UpdateSiteSettings { .. } => "update_site_settings",
            Self::RemoveSiteSettings { .. } => "remove_site_settings",
            Self::CancelTranslation => "cancel_translation",
            Self::Translate { .. } => "translate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Connection(ConnectionStatus),
    Models(Vec<String>),
    Settings(EffectiveSettings),
    GlobalSettings(GlobalSettings),
    Job(JobResult),
    Ack { success: bool },
    Error { error: String },
}

impl Response {
    pub fn ok() -> Self {
        Self::Ack { success: true }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Owns the settings store and the single cancellation token shared by every
/// job it runs. At most one job runs at a time.
pub struct TranslationService {
    store: RwLock<SettingsStore>,
    token: CancellationToken,
    sink: Arc<dyn EventSink>,
    job_lock: Mutex<()>,
}

impl TranslationService {
    pub fn new(store: SettingsStore, sink: Arc<dyn EventSink>) -> Self {
        Self {
            store: RwLock::new(store),
            token: CancellationToken::new(),
            sink,
            job_lock: Mutex::new(()),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        info!("Cancelling translation");
        self.token.cancel();
    }

    pub fn is_busy(&self) -> bool {
        self.job_lock.try_lock().is_err()
    }

    pub async fn handle(&self, request: Request) -> Response {
        debug!("Handling request: {}", request.action());

        match request {
            Request::CheckConnection => Response::Connection(self.check_connection().await),
            Request::GetModels => Response::Models(self.check_connection().await.models),
            Request::GetSettings { domain } => {
                Response::Settings(self.store.read().effective(domain.as_deref()))
            }
            Request::UpdateGlobalSettings { updates } => {
                respond(self.store.write().update_global(updates), Response::GlobalSettings)
            }
            Request::UpdateSiteSettings { domain, updates } => {
                respond(self.store.write().update_site(&domain, updates), |_| Response::ok())
            }
            Request::RemoveSiteSettings { domain } => {
                respond(self.store.write().remove_site(&domain), |removed| Response::Ack {
                    success: removed,
                })
            }
            Request::CancelTranslation => {
                self.cancel();
                Response::ok()
            }
            Request::Translate {
                paragraphs,
                target_lang,
                source_lang,
                domain,
            } => {
                let mut job = TranslationJob::new(paragraphs, target_lang);
                job.source_language = source_lang.filter(|s| !s.trim().is_empty());
                match self.translate(job, domain.as_deref()).await {
                    Ok(result) => Response::Job(result),
                    Err(e) => Response::error(e.to_string()),
                }
            }
        }
    }

    pub async fn check_connection(&self) -> ConnectionStatus {
        let (endpoint, timeout) = {
            let store = self.store.read();
            (store.global().ollama_url.clone(), store.client().probe_timeout())
        };
        translate::check_connection(&endpoint, timeout).await
    }

    /// Run `job` with the settings in effect for `domain`. Fails without
    /// touching the token when another job is still running.
    pub async fn translate(&self, mut job: TranslationJob, domain: Option<&str>) -> Result<JobResult> {
        let Ok(_running) = self.job_lock.try_lock() else {
            warn!("Rejected translation request: a job is already running");
            return Err(ParatransError::Busy);
        };

        let (effective, tuning) = {
            let store = self.store.read();
            (store.effective(domain), store.client().clone())
        };
        if job.target_language.trim().is_empty() {
            job.target_language = effective.global.target_lang.clone();
        }

        let settings = TranslationSettings::from(&effective.global);
        info!(
            "Translating {} paragraphs with {} at {}",
            job.units.len(),
            settings.model,
            settings.endpoint
        );

        let client = OllamaClient::new(settings, tuning, self.token.clone())?;
        let runner = JobRunner::new(Arc::new(client), self.sink.clone(), self.token.clone());
        Ok(runner.run(&job).await)
    }
}

fn respond<T>(result: Result<T>, on_ok: impl FnOnce(T) -> Response) -> Response {
    match result {
        Ok(value) => on_ok(value),
        Err(e) => {
            warn!("Request failed: {}", e);
            Response::error(e.to_string())
        }
    }
}
