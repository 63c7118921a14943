//! Identifier helpers shared by importers and exporters.

use once_cell::sync::Lazy;
use regex::Regex;

/// Names usable as generated resource names in every supported dialect.
pub static VALID_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$").expect("invalid name regex"));

/// True when `name` is usable as a resource name in every dialect.
pub fn is_valid_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

/// Turn arbitrary text (host names, upstream URLs) into a valid name.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_dash = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    let trimmed = out.trim_end_matches('-').to_string();
    if trimmed.is_empty() {
        "service".to_string()
    } else {
        trimmed
    }
}

/// Identifier safe for dialects that reject dashes (nginx zones, Lua names).
pub fn snake_name(raw: &str) -> String {
    sanitize_name(raw).replace('-', "_")
}

/// Stable per-route resource name: `<service>-<index>`.
pub fn route_name(service: &str, index: usize) -> String {
    format!("{service}-{index}")
}

/// Recover `(service, index)` from a name produced by [`route_name`].
pub fn parse_route_name(name: &str) -> Option<(&str, usize)> {
    let (service, index) = name.rsplit_once('-')?;
    Some((service, index.parse().ok()?))
}

/// Lower-case header names as a header-map key, e.g. `X-Api-Key` -> `http_x_api_key`.
pub fn nginx_header_var(header: &str) -> String {
    format!("http_{}", header.to_ascii_lowercase().replace('-', "_"))
}

/// Inverse of [`nginx_header_var`], producing canonical `X-Api-Key` casing.
pub fn header_from_nginx_var(var: &str) -> Option<String> {
    let name = var.trim_start_matches('$').strip_prefix("http_")?;
    Some(
        name.split('_')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("-"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_hosts() {
        assert_eq!(sanitize_name("users.svc.local"), "users-svc-local");
        assert_eq!(sanitize_name("http://a:8080/"), "http-a-8080");
        assert_eq!(sanitize_name("..."), "service");
        assert!(is_valid_name(&sanitize_name("weird name!")));
    }

    #[test]
    fn route_names_round_trip() {
        let name = route_name("user-api", 3);
        assert_eq!(parse_route_name(&name), Some(("user-api", 3)));
        assert_eq!(parse_route_name("nohyphen"), None);
    }

    #[test]
    fn header_variables_round_trip() {
        assert_eq!(nginx_header_var("X-Api-Key"), "http_x_api_key");
        assert_eq!(
            header_from_nginx_var("$http_x_api_key").as_deref(),
            Some("X-Api-Key")
        );
    }
}
