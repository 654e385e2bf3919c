//! User settings: per-agent model configuration, clarification preference
//! and search API keys. Loaded once, flushed on every mutation.

use crate::db::{namespaces, KeyValueStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

const SETTINGS_KEY: &str = "state";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Corrupt settings document: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Unknown value: {0}")]
    Unknown(String),
}

/// Model slot the research service exposes for configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AgentModelKey {
    #[serde(rename = "prism-reasoning-core")]
    ReasoningCore,
    #[serde(rename = "prism-researcher-default")]
    Researcher,
    #[serde(rename = "prism-summarizer-large-context")]
    Summarizer,
    #[serde(rename = "prism-coder-agent")]
    Coder,
}

impl AgentModelKey {
    pub const ALL: [AgentModelKey; 4] = [
        Self::ReasoningCore,
        Self::Researcher,
        Self::Summarizer,
        Self::Coder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReasoningCore => "prism-reasoning-core",
            Self::Researcher => "prism-researcher-default",
            Self::Summarizer => "prism-summarizer-large-context",
            Self::Coder => "prism-coder-agent",
        }
    }
}

impl std::fmt::Display for AgentModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentModelKey {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| SettingsError::Unknown(format!("agent model key '{}'", s)))
    }
}

/// Model selection for one slot; `provider: "default"` leaves the choice to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "default".to_string(),
            model: None,
            api_key: None,
            base_url: None,
        }
    }
}

/// Partial update merged into a [`ModelConfig`]
#[derive(Debug, Clone, Default)]
pub struct ModelConfigUpdate {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl ModelConfig {
    fn merge(&mut self, update: ModelConfigUpdate) {
        if let Some(provider) = update.provider {
            self.provider = provider;
        }
        if update.model.is_some() {
            self.model = update.model;
        }
        if update.api_key.is_some() {
            self.api_key = update.api_key;
        }
        if update.base_url.is_some() {
            self.base_url = update.base_url;
        }
    }
}

/// How the orchestrator should treat ambiguous queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationMode {
    #[default]
    Agent,
    AlwaysAsk,
    NeverAsk,
}

impl std::str::FromStr for ClarificationMode {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "agent" => Ok(Self::Agent),
            "always_ask" | "always-ask" => Ok(Self::AlwaysAsk),
            "never_ask" | "never-ask" => Ok(Self::NeverAsk),
            _ => Err(SettingsError::Unknown(format!("clarification mode '{}'", s))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_model_configs")]
    pub model_configs: BTreeMap<AgentModelKey, ModelConfig>,
    #[serde(default)]
    pub clarification_mode: ClarificationMode,
    #[serde(default)]
    pub google_api_key: String,
    #[serde(default)]
    pub google_cx_id: String,
}

fn default_model_configs() -> BTreeMap<AgentModelKey, ModelConfig> {
    AgentModelKey::ALL
        .into_iter()
        .map(|key| (key, ModelConfig::default()))
        .collect()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_configs: default_model_configs(),
            clarification_mode: ClarificationMode::default(),
            google_api_key: String::new(),
            google_cx_id: String::new(),
        }
    }
}

/// Settings service backed by the `settings` namespace
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
    settings: Arc<RwLock<Settings>>,
}

impl SettingsStore {
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Result<Self, SettingsError> {
        let mut settings: Settings = match store.get(namespaces::SETTINGS, SETTINGS_KEY).await? {
            Some(json) => serde_json::from_str(&json)?,
            None => Settings::default(),
        };
        // Slots added since the document was written start at their default.
        for key in AgentModelKey::ALL {
            settings.model_configs.entry(key).or_default();
        }

        Ok(Self {
            store,
            settings: Arc::new(RwLock::new(settings)),
        })
    }

    pub async fn snapshot(&self) -> Settings {
        self.settings.read().await.clone()
    }

    pub async fn model_configs(&self) -> BTreeMap<AgentModelKey, ModelConfig> {
        self.settings.read().await.model_configs.clone()
    }

    pub async fn set_model_config(
        &self,
        key: AgentModelKey,
        update: ModelConfigUpdate,
    ) -> Result<(), SettingsError> {
        self.update(|s| s.model_configs.entry(key).or_default().merge(update))
            .await
    }

    pub async fn set_clarification_mode(
        &self,
        mode: ClarificationMode,
    ) -> Result<(), SettingsError> {
        self.update(|s| s.clarification_mode = mode).await
    }

    pub async fn set_google_keys(&self, api_key: &str, cx_id: &str) -> Result<(), SettingsError> {
        self.update(|s| {
            s.google_api_key = api_key.to_string();
            s.google_cx_id = cx_id.to_string();
        })
        .await
    }

    async fn update<F>(&self, mutate: F) -> Result<(), SettingsError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.settings.write().await;
        mutate(&mut settings);
        let json = serde_json::to_string(&*settings)?;
        self.store.set(namespaces::SETTINGS, SETTINGS_KEY, &json).await?;
        Ok(())
    }
}
