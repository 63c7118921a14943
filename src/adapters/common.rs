//! Helpers shared by the dialect adapters: document (de)serialization,
//! passthrough merging, duration spelling and header template lookups.
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    config::models::{HttpMethod, LoadBalanceAlgorithm, LoadBalancer, Target, TemplateValue},
    core::provider::ProviderId,
    ports::translator::{TranslateError, TranslateResult},
};

/// Scope used for importer diagnostics that are not tied to a service.
pub const DOCUMENT_SCOPE: &str = "document";

pub fn to_yaml<T: Serialize>(provider: ProviderId, value: &T) -> TranslateResult<String> {
    serde_yaml::to_string(value).map_err(|e| TranslateError::render(provider, e.to_string()))
}

pub fn to_json<T: Serialize>(provider: ProviderId, value: &T) -> TranslateResult<String> {
    serde_json::to_string_pretty(value)
        .map(|mut text| {
            text.push('\n');
            text
        })
        .map_err(|e| TranslateError::render(provider, e.to_string()))
}

pub fn to_value<T: Serialize>(provider: ProviderId, value: &T) -> TranslateResult<Value> {
    serde_json::to_value(value).map_err(|e| TranslateError::render(provider, e.to_string()))
}

/// Parse a YAML (or JSON) document into a typed native structure.
pub fn from_yaml<T: DeserializeOwned>(provider: ProviderId, text: &str) -> TranslateResult<T> {
    if text.trim().is_empty() {
        return Err(TranslateError::parse(provider, "document is empty"));
    }
    serde_yaml::from_str(text).map_err(|e| TranslateError::parse(provider, e.to_string()))
}

/// Deep-merge `overlay` into `base`: objects merge key by key, arrays are
/// appended, anything else is replaced.
pub fn merge_value(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(base), Value::Array(overlay)) => base.extend(overlay.iter().cloned()),
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Duration as Go / Traefik spell it: `5s`, `1500ms`.
pub fn go_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}

/// Duration as protobuf JSON spells it: `5s`, `1.5s`.
pub fn proto_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        let text = format!("{}.{:03}", millis / 1000, millis % 1000);
        format!("{}s", text.trim_end_matches('0'))
    }
}

/// Parse the duration spellings found in native documents: humantime
/// (`1m 30s`), Go (`1m30s`), protobuf (`1.5s`) and bare seconds (`60`).
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    if let Ok(duration) = humantime::parse_duration(raw) {
        return Some(duration);
    }
    raw.strip_suffix('s')
        .and_then(|secs| secs.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Read a duration that may be written as a string or as a number of seconds.
pub fn value_duration(value: &Value) -> Option<Duration> {
    match value {
        Value::String(text) => parse_duration(text),
        Value::Number(n) => n.as_f64().filter(|s| *s >= 0.0).map(Duration::from_secs_f64),
        _ => None,
    }
}

/// Methods as a sorted list of verbs.
pub fn method_names<'a>(methods: impl IntoIterator<Item = &'a HttpMethod>) -> Vec<String> {
    methods.into_iter().map(|m| m.as_str().to_string()).collect()
}

/// Parse verbs, collecting the ones that are not HTTP methods.
pub fn parse_methods<'a>(
    names: impl IntoIterator<Item = &'a str>,
) -> (std::collections::BTreeSet<HttpMethod>, Vec<String>) {
    let mut methods = std::collections::BTreeSet::new();
    let mut unknown = Vec::new();
    for name in names {
        match name.parse::<HttpMethod>() {
            Ok(method) => {
                methods.insert(method);
            }
            Err(_) => unknown.push(name.to_string()),
        }
    }
    (methods, unknown)
}

/// Reverse lookup of a dialect runtime expression.
pub fn template_from(value: &str, uuid: &[&str], timestamp: &[&str]) -> TemplateValue {
    let trimmed = value.trim();
    if uuid.contains(&trimmed) {
        TemplateValue::Uuid
    } else if timestamp.contains(&trimmed) {
        TemplateValue::Timestamp
    } else {
        TemplateValue::Literal(value.to_string())
    }
}

/// `{SHA}` htpasswd entry for a basic-auth user.
pub fn htpasswd_sha(username: &str, password: &str) -> String {
    use base64::Engine;
    use sha1::{Digest, Sha1};

    let digest = Sha1::digest(password.as_bytes());
    format!(
        "{username}:{{SHA}}{}",
        base64::engine::general_purpose::STANDARD.encode(digest)
    )
}

/// Split a `user:hash` htpasswd line.
pub fn parse_htpasswd(line: &str) -> Option<(String, String)> {
    let (user, hash) = line.trim().split_once(':')?;
    Some((user.to_string(), hash.to_string()))
}

/// String array at `key`, tolerating a single string.
pub fn strings_at(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

/// Load balancer recovered from a native round-robin setting: weighted when
/// the targets carry different weights.
pub fn round_robin_for(targets: &[Target]) -> LoadBalancer {
    let weights_differ = targets.windows(2).any(|w| w[0].weight != w[1].weight);
    LoadBalancer {
        algorithm: if weights_differ {
            LoadBalanceAlgorithm::Weighted
        } else {
            LoadBalanceAlgorithm::RoundRobin
        },
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts and a missing port.
pub fn split_authority(raw: &str, default_port: u16) -> Option<(String, u16)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(rest) = raw.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None => default_port,
        };
        return Some((host.to_string(), port));
    }
    match raw.rsplit_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((raw.to_string(), default_port)),
    }
}

/// Split an upstream URL into scheme, host and port.
pub fn split_url(raw: &str) -> Option<(String, String, u16)> {
    let url = url::Url::parse(raw).ok()?;
    let host = url.host_str()?.trim_matches(|c| c == '[' || c == ']').to_string();
    let port = url.port_or_known_default()?;
    Some((url.scheme().to_string(), host, port))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merges_nested_objects_and_appends_arrays() {
        let mut base = json!({"a": {"b": 1}, "list": [1]});
        merge_value(&mut base, &json!({"a": {"c": 2}, "list": [2], "d": true}));
        assert_eq!(base, json!({"a": {"b": 1, "c": 2}, "list": [1, 2], "d": true}));
    }

    #[test]
    fn durations_round_trip_through_native_spellings() {
        let d = Duration::from_millis(1500);
        assert_eq!(go_duration(d), "1500ms");
        assert_eq!(proto_duration(d), "1.5s");
        assert_eq!(parse_duration("1.5s"), Some(d));
        assert_eq!(parse_duration("1500ms"), Some(d));
        assert_eq!(parse_duration("60"), Some(Duration::from_secs(60)));
        assert_eq!(proto_duration(Duration::from_secs(30)), "30s");
    }

    #[test]
    fn splits_authorities() {
        assert_eq!(split_authority("a:8080", 80), Some(("a".to_string(), 8080)));
        assert_eq!(split_authority("a", 80), Some(("a".to_string(), 80)));
        assert_eq!(split_authority("[::1]:9000", 80), Some(("::1".to_string(), 9000)));
        assert_eq!(split_authority("a:http", 80), None);
        assert_eq!(
            split_url("https://users.internal:8443/"),
            Some(("https".to_string(), "users.internal".to_string(), 8443))
        );
        assert_eq!(
            split_url("http://users"),
            Some(("http".to_string(), "users".to_string(), 80))
        );
    }

    #[test]
    fn differing_weights_import_as_weighted() {
        let equal = [Target::new("a", 1, 1), Target::new("b", 1, 1)];
        let uneven = [Target::new("a", 1, 2), Target::new("b", 1, 1)];
        assert_eq!(round_robin_for(&equal).algorithm, LoadBalanceAlgorithm::RoundRobin);
        assert_eq!(round_robin_for(&uneven).algorithm, LoadBalanceAlgorithm::Weighted);
    }

    #[test]
    fn htpasswd_uses_sha1_base64() {
        assert_eq!(
            htpasswd_sha("alice", "password"),
            "alice:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g="
        );
    }
}
