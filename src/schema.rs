//! App schemas and their memoization
//!
//! An app config is the remote type definition for a collection of
//! items: the ordered field declarations, including full option sets
//! for category fields. Schemas are fetched lazily, once per app id,
//! and kept for the lifetime of the owning cache object; they are never
//! invalidated automatically, but [`AppConfigCache::invalidate`] allows
//! an explicit refresh.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;
use crate::field::Field;
use crate::session::Session;

/// The remote definition of an app
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub app_id: i64,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppConfig {
    /// Look up a field declaration by external id
    pub fn field(&self, external_id: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.external_id == external_id)
    }
}

/// Process-local memoization of app configs, keyed by app id
#[derive(Debug, Default)]
pub struct AppConfigCache {
    configs: HashMap<i64, AppConfig>,
}

impl AppConfigCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The memoized config for an app, if already fetched
    pub fn get(&self, app_id: i64) -> Option<&AppConfig> {
        self.configs.get(&app_id)
    }

    /// Memoize a config without a remote round trip
    pub fn insert(&mut self, config: AppConfig) {
        self.configs.insert(config.app_id, config);
    }

    /// Drop the memoized config so the next access re-fetches it
    pub fn invalidate(&mut self, app_id: i64) -> Option<AppConfig> {
        self.configs.remove(&app_id)
    }

    /// The config for an app, fetched from the remote service on first
    /// access and memoized afterwards.
    pub async fn get_or_fetch(
        &mut self,
        session: &Session,
        app_id: i64,
    ) -> Result<AppConfig, Error> {
        if let Some(config) = self.configs.get(&app_id) {
            return Ok(config.clone());
        }
        let url = session.url(&format!("app/{}", app_id));
        let response = session.get(&url, None).await?;
        let response = Session::check(response).await?;
        let config: AppConfig = response.json().await?;
        self.configs.insert(app_id, config.clone());
        Ok(config)
    }
}
