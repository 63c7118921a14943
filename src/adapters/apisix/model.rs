//! APISIX standalone `apisix.yaml`.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trailer APISIX requires before it reloads a standalone file.
pub const END_MARKER: &str = "#END";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ApisixConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<ApisixRoute>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<ApisixUpstream>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumers: Vec<ApisixConsumer>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ApisixRoute {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<ApisixUpstream>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<ApisixTimeout>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub plugins: IndexMap<String, Value>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

impl ApisixRoute {
    /// Every URI pattern of the route, `uri` first.
    pub fn patterns(&self) -> Vec<&str> {
        self.uri
            .iter()
            .map(String::as_str)
            .chain(self.uris.iter().map(String::as_str))
            .collect()
    }
}

/// Timeouts in seconds.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct ApisixTimeout {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ApisixUpstream {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub lb_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    pub nodes: ApisixNodes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checks: Option<ApisixChecks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<ApisixTimeout>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

/// Nodes are either a list or a `"host:port": weight` map.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum ApisixNodes {
    List(Vec<ApisixNode>),
    Map(IndexMap<String, u32>),
}

impl Default for ApisixNodes {
    fn default() -> Self {
        ApisixNodes::List(Vec::new())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApisixNode {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ApisixChecks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<ApisixActiveCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passive: Option<ApisixPassiveCheck>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ApisixActiveCheck {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub check_type: Option<String>,
    #[serde(default)]
    pub http_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(default)]
    pub healthy: ApisixThresholds,
    #[serde(default)]
    pub unhealthy: ApisixThresholds,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ApisixPassiveCheck {
    #[serde(default)]
    pub unhealthy: ApisixThresholds,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ApisixThresholds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_failures: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_statuses: Vec<u16>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ApisixConsumer {
    pub username: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub plugins: IndexMap<String, Value>,
}
