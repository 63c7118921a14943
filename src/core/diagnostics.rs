//! Diagnostics accumulated by every import, export and validation pass.
//!
//! Diagnostics are returned alongside results rather than raised; whether an
//! `Error` entry aborts anything is decided by the caller's policy (see
//! [`Diagnostics::exit_code`]).
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    /// Where the finding applies, e.g. `service/users/route/api`.
    pub scope: String,
    /// Dotted model path of the feature, e.g. `route.rateLimit`.
    pub feature_path: String,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.severity, self.scope, self.feature_path, self.message
        )
    }
}

/// Ordered collection of [`Diagnostic`] entries.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        severity: Severity,
        scope: impl Into<String>,
        feature_path: impl Into<String>,
        message: impl Into<String>,
    ) {
        let diagnostic = Diagnostic {
            scope: scope.into(),
            feature_path: feature_path.into(),
            severity,
            message: message.into(),
        };
        match severity {
            Severity::Error => tracing::debug!(%diagnostic, "error diagnostic"),
            Severity::Warning => tracing::debug!(%diagnostic, "warning diagnostic"),
            Severity::Info => tracing::trace!(%diagnostic, "info diagnostic"),
        }
        self.0.push(diagnostic);
    }

    pub fn info(
        &mut self,
        scope: impl Into<String>,
        feature_path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.push(Severity::Info, scope, feature_path, message);
    }

    pub fn warning(
        &mut self,
        scope: impl Into<String>,
        feature_path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.push(Severity::Warning, scope, feature_path, message);
    }

    pub fn error(
        &mut self,
        scope: impl Into<String>,
        feature_path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.push(Severity::Error, scope, feature_path, message);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.0.iter().filter(|d| d.severity == severity).count()
    }

    /// Entries at or above the given severity.
    pub fn at_least(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(move |d| d.severity >= severity)
    }

    /// True when some entry at or above `severity` names `feature_path`.
    pub fn mentions(&self, feature_path: &str, severity: Severity) -> bool {
        self.at_least(severity)
            .any(|d| d.feature_path == feature_path || d.feature_path.starts_with(feature_path))
    }

    /// Entries grouped most severe first, keeping insertion order within a group.
    pub fn grouped(&self) -> Vec<(Severity, Vec<&Diagnostic>)> {
        [Severity::Error, Severity::Warning, Severity::Info]
            .into_iter()
            .map(|severity| {
                (
                    severity,
                    self.0.iter().filter(|d| d.severity == severity).collect::<Vec<_>>(),
                )
            })
            .filter(|(_, group)| !group.is_empty())
            .collect()
    }

    /// Process exit code: non-zero only when an `Error` entry is present.
    pub fn exit_code(&self) -> i32 {
        if self.has_errors() { 1 } else { 0 }
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Scope label for a service.
pub fn service_scope(service: &str) -> String {
    format!("service/{service}")
}

/// Scope label for a route, identified by its position and prefix.
pub fn route_scope(service: &str, index: usize, path_prefix: &str) -> String {
    format!("service/{service}/route[{index}]{path_prefix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_ignores_warnings() {
        let mut diags = Diagnostics::new();
        diags.warning("service/a", "route.cors", "partial");
        diags.info("service/a", "route", "note");
        assert_eq!(diags.exit_code(), 0);

        diags.error("service/a", "upstream.targets", "empty");
        assert_eq!(diags.exit_code(), 1);
    }

    #[test]
    fn groups_most_severe_first() {
        let mut diags = Diagnostics::new();
        diags.info("s", "a", "1");
        diags.error("s", "b", "2");
        diags.warning("s", "c", "3");
        diags.error("s", "d", "4");

        let grouped = diags.grouped();
        assert_eq!(grouped[0].0, Severity::Error);
        assert_eq!(grouped[0].1.len(), 2);
        assert_eq!(grouped[0].1[1].feature_path, "d");
        assert_eq!(grouped[2].0, Severity::Info);
    }

    #[test]
    fn mentions_matches_feature_path_prefix() {
        let mut diags = Diagnostics::new();
        diags.warning("s", "route.authentication.jwt", "partial");
        assert!(diags.mentions("route.authentication", Severity::Warning));
        assert!(!diags.mentions("route.authentication", Severity::Error));
    }
}
