use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Identifier of a supported gateway dialect.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderId {
    #[serde(rename = "nginx")]
    Nginx,
    #[serde(rename = "envoy")]
    Envoy,
    #[serde(rename = "kong")]
    Kong,
    #[serde(rename = "traefik")]
    Traefik,
    #[serde(rename = "apisix")]
    Apisix,
    #[serde(rename = "istio")]
    Istio,
    #[serde(rename = "aws-apigateway")]
    AwsApiGateway,
}

impl ProviderId {
    pub const ALL: [ProviderId; 7] = [
        ProviderId::Nginx,
        ProviderId::Envoy,
        ProviderId::Kong,
        ProviderId::Traefik,
        ProviderId::Apisix,
        ProviderId::Istio,
        ProviderId::AwsApiGateway,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Nginx => "nginx",
            ProviderId::Envoy => "envoy",
            ProviderId::Kong => "kong",
            ProviderId::Traefik => "traefik",
            ProviderId::Apisix => "apisix",
            ProviderId::Istio => "istio",
            ProviderId::AwsApiGateway => "aws-apigateway",
        }
    }

    /// Conventional file extension of the native artifact.
    pub fn file_extension(&self) -> &'static str {
        match self {
            ProviderId::Nginx => "conf",
            ProviderId::AwsApiGateway => "json",
            _ => "yaml",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "aws" | "apigateway" | "aws-api-gateway" => Ok(ProviderId::AwsApiGateway),
            "openresty" => Ok(ProviderId::Nginx),
            other => ProviderId::ALL
                .into_iter()
                .find(|p| p.as_str() == other)
                .ok_or_else(|| format!("unknown provider '{s}'")),
        }
    }
}
