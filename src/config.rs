use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ParatransError, Result};
use crate::languages;

fn default_auto_translate() -> bool {
    false
}

/// Distinguishes an explicit `null` (clear the value) from a missing field.
fn explicit_null<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalSettings,
    /// Per-domain overrides
    #[serde(default)]
    pub sites: BTreeMap<String, SiteSettings>,
    #[serde(default)]
    pub client: ClientSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Language code translations are produced in
    pub target_lang: String,
    /// Ollama model used for translation
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Replaces the generated system prompt when set
    pub custom_prompt: Option<String>,
    /// Ollama endpoint URL
    pub ollama_url: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            target_lang: languages::default_target_language().to_string(),
            model: "translategemma:4b".to_string(),
            temperature: 0.3,
            custom_prompt: None,
            ollama_url: "http://localhost:11434".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteSettings {
    #[serde(default = "default_auto_translate")]
    pub auto_translate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_lang: Option<String>,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            auto_translate: default_auto_translate(),
            model: None,
            target_lang: None,
        }
    }
}

/// Tuning for the ollama client. Not exposed through the message API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Wall-clock limit for one streaming attempt
    pub request_timeout_ms: u64,
    /// Additional attempts after the first one fails
    pub max_retries: u32,
    /// Backoff before retry k is `retry_base_delay_ms * k`
    pub retry_base_delay_ms: u64,
    /// Limit for the `/api/tags` reachability probe
    pub probe_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            max_retries: 2,
            retry_base_delay_ms: 1_000,
            probe_timeout_ms: 5_000,
        }
    }
}

impl ClientSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Global settings with the site override for one domain applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveSettings {
    #[serde(flatten)]
    pub global: GlobalSettings,
    pub auto_translate: bool,
}

/// Partial update of [`GlobalSettings`]. `custom_prompt: Some(None)` clears
/// the prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalSettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, deserialize_with = "explicit_null", skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ollama_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteSettingsUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_translate: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_lang: Option<String>,
}

impl GlobalSettings {
    pub fn apply(&mut self, update: GlobalSettingsUpdate) {
        if let Some(target_lang) = update.target_lang {
            self.target_lang = target_lang;
        }
        if let Some(model) = update.model {
            self.model = model;
        }
        if let Some(temperature) = update.temperature {
            self.temperature = temperature;
        }
        if let Some(custom_prompt) = update.custom_prompt {
            self.custom_prompt = custom_prompt.filter(|p| !p.trim().is_empty());
        }
        if let Some(ollama_url) = update.ollama_url {
            self.ollama_url = ollama_url.trim_end_matches('/').to_string();
        }
    }
}

impl SiteSettings {
    pub fn apply(&mut self, update: SiteSettingsUpdate) {
        if let Some(auto_translate) = update.auto_translate {
            self.auto_translate = auto_translate;
        }
        if let Some(model) = update.model {
            self.model = Some(model);
        }
        if let Some(target_lang) = update.target_lang {
            self.target_lang = Some(target_lang);
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ParatransError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| ParatransError::Config(format!("Failed to parse config file: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| ParatransError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)
            .map_err(|e| ParatransError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Settings in force for `domain`. Without a domain, or without an
    /// override for it, the global settings apply and auto-translate is off.
    pub fn effective(&self, domain: Option<&str>) -> EffectiveSettings {
        let mut global = self.global.clone();
        let site = domain.and_then(|d| self.sites.get(&d.trim().to_lowercase()));

        if let Some(site) = site {
            if let Some(model) = &site.model {
                global.model = model.clone();
            }
            if let Some(target_lang) = &site.target_lang {
                global.target_lang = target_lang.clone();
            }
        }

        EffectiveSettings {
            global,
            auto_translate: site.map(|s| s.auto_translate).unwrap_or(false),
        }
    }
}

/// File-backed settings. Every mutation is written through to disk.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    config: Config,
}

impl SettingsStore {
    /// Load settings from `path`, falling back to defaults when the file does
    /// not exist yet.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = if path.exists() {
            debug!("Loading settings from {}", path.display());
            Config::from_file(&path)?
        } else {
            info!("No settings at {}, using defaults", path.display());
            Config::default()
        };

        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn global(&self) -> &GlobalSettings {
        &self.config.global
    }

    pub fn client(&self) -> &ClientSettings {
        &self.config.client
    }

    pub fn effective(&self, domain: Option<&str>) -> EffectiveSettings {
        self.config.effective(domain)
    }

    pub fn update_global(&mut self, update: GlobalSettingsUpdate) -> Result<GlobalSettings> {
        let mut next = self.config.clone();
        next.global.apply(update);
        self.commit(next)?;
        info!("Updated global settings");
        Ok(self.config.global.clone())
    }

    pub fn update_site(&mut self, domain: &str, update: SiteSettingsUpdate) -> Result<SiteSettings> {
        let domain = normalize_domain(domain)?;
        let mut next = self.config.clone();
        let site = next.sites.entry(domain.clone()).or_default();
        site.apply(update);
        let updated = site.clone();
        self.commit(next)?;
        info!("Updated site settings for {}", domain);
        Ok(updated)
    }

    /// Returns whether an override existed.
    pub fn remove_site(&mut self, domain: &str) -> Result<bool> {
        let domain = normalize_domain(domain)?;
        if !self.config.sites.contains_key(&domain) {
            return Ok(false);
        }
        let mut next = self.config.clone();
        next.sites.remove(&domain);
        self.commit(next)?;
        info!("Removed site settings for {}", domain);
        Ok(true)
    }

    /// Replace the in-memory settings only once `next` is on disk.
    fn commit(&mut self, next: Config) -> Result<()> {
        next.save_to_file(&self.path)?;
        self.config = next;
        Ok(())
    }
}

fn normalize_domain(domain: &str) -> Result<String> {
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() {
        return Err(ParatransError::Settings("Domain must not be empty".to_string()));
    }
    Ok(domain)
}
