//! Configuration for the REITTI controller
//!
//! Supplied once at startup and immutable thereafter.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;

/// Controller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Ingress class tag this controller manages
    #[serde(default = "default_class")]
    pub class: String,

    /// Namespace to watch; `None` watches the whole cluster
    #[serde(default)]
    pub namespace: Option<String>,

    /// Equality label selector applied to Ingress objects. Empty matches
    /// everything.
    #[serde(default)]
    pub selector: LabelSelector,

    /// Handler failures retried per key before the key is dropped
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    /// Base delay for the retry backoff in milliseconds
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Bind address of the config/health HTTP surface
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_class() -> String {
    "reitti".to_string()
}

fn default_retry_budget() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    5
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            class: default_class(),
            namespace: None,
            selector: LabelSelector::default(),
            retry_budget: default_retry_budget(),
            retry_base_ms: default_retry_base_ms(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();

        if let Ok(val) = env::var("REITTI_CLASS") {
            config.class = val;
        }
        if let Ok(val) = env::var("REITTI_NAMESPACE") {
            if !val.is_empty() {
                config.namespace = Some(val);
            }
        }
        if let Ok(val) = env::var("REITTI_SELECTOR") {
            config.selector = val.parse()?;
        }
        if let Ok(val) = env::var("REITTI_RETRY_BUDGET") {
            config.retry_budget = val.parse()?;
        }
        if let Ok(val) = env::var("REITTI_BIND_ADDR") {
            config.bind_addr = val;
        }

        Ok(config)
    }
}

/// Equality-based label selector ("app=web,tier=edge").
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let Some(labels) = labels else {
            return false;
        };
        self.0
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|have| have == v))
    }
}

impl std::str::FromStr for LabelSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut requirements = BTreeMap::new();
        for term in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (key, value) = term
                .split_once('=')
                .ok_or_else(|| format!("invalid selector term {term:?}, expected key=value"))?;
            requirements.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(Self(requirements))
    }
}
