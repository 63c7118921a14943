//! decK declarative configuration (`_format_version: "3.0"`).
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::common::strings_at;

pub const FORMAT_VERSION: &str = "3.0";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct KongConfig {
    #[serde(rename = "_format_version", default)]
    pub format_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<KongService>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<KongUpstream>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumers: Vec<KongConsumer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<KongPlugin>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct KongService {
    pub name: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<KongRoute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<KongPlugin>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_port() -> u16 {
    80
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct KongRoute {
    pub name: String,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocols: Option<Vec<String>>,
    #[serde(default)]
    pub strip_path: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<KongPlugin>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct KongUpstream {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthchecks: Option<KongHealthchecks>,
    #[serde(default)]
    pub targets: Vec<KongTarget>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct KongTarget {
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    100
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct KongHealthchecks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<KongActiveCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passive: Option<KongPassiveCheck>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct KongActiveCheck {
    #[serde(default = "default_check_type", rename = "type")]
    pub check_type: String,
    #[serde(default)]
    pub http_path: String,
    #[serde(default)]
    pub timeout: f64,
    #[serde(default)]
    pub healthy: KongThresholds,
    #[serde(default)]
    pub unhealthy: KongThresholds,
}

fn default_check_type() -> String {
    "http".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct KongPassiveCheck {
    #[serde(default)]
    pub unhealthy: KongThresholds,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct KongThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_failures: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_statuses: Vec<u16>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct KongConsumer {
    pub username: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub basicauth_credentials: Vec<KongBasicCredential>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jwt_secrets: Vec<KongJwtSecret>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct KongBasicCredential {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct KongJwtSecret {
    pub key: String,
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
}

fn default_jwt_algorithm() -> String {
    "RS256".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KongPlugin {
    pub name: String,
    #[serde(default = "empty_object")]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl KongPlugin {
    pub fn new(name: &str, config: Value) -> Self {
        Self {
            name: name.to_string(),
            config,
            tags: Vec::new(),
        }
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn u64(&self, key: &str) -> Option<u64> {
        self.config.get(key).and_then(Value::as_u64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.config.get(key).and_then(Value::as_bool)
    }

    pub fn strings(&self, key: &str) -> Vec<String> {
        strings_at(&self.config, key)
    }
}
