//! Heuristic credential detection in connector properties.
//!
//! A leaf is flagged when its key looks credential-shaped and its value is
//! non-empty, or when its value is a URL carrying a userinfo password.
//! Values that are already a variable token are never flagged.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::artifact::{DecomposedArtifact, PropertyValue};
use crate::vars::token::is_single_token;

/// Why a value was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretReason {
    CredentialKey,
    UrlPassword,
}

/// A flagged property. The value itself is never recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretFinding {
    /// `source` or `destinations[N]`.
    pub connector: String,
    pub connector_name: String,
    /// e.g. `destinations[0].properties/password`
    pub path: String,
    pub reason: SecretReason,
    /// Variable the value is masked with on export.
    pub variable: String,
}

fn credential_key() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(password|passwd|secret|token|api[_-]?key|credential|private[_-]?key|passphrase)",
        )
        .ok()
    })
    .as_ref()
}

fn url_userinfo() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.:\-]*://[^/@:\s]+:([^/@\s]+)@").ok())
        .as_ref()
}

/// Upper-case variable name segment: `To DB` -> `TO_DB`.
pub fn variable_segment(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_uppercase());
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    let out = out.trim_end_matches('_').to_string();
    match out.chars().next() {
        Some(c) if c.is_ascii_digit() => format!("_{out}"),
        _ => out,
    }
}

/// Mask text for `value`, or `None` when the value is not a secret.
fn classify(key: &str, value: &str, variable: &str) -> Option<(SecretReason, String)> {
    let trimmed = value.trim();
    if trimmed.is_empty() || is_single_token(trimmed) {
        return None;
    }

    if let Some(caps) = url_userinfo().and_then(|re| re.captures(value)) {
        if let Some(password) = caps.get(1) {
            if is_single_token(password.as_str()) {
                return None;
            }
            let mut masked = value.to_string();
            masked.replace_range(password.range(), &format!("${{{variable}_PASSWORD}}"));
            return Some((SecretReason::UrlPassword, masked));
        }
    }

    let is_flag = matches!(trimmed.to_ascii_lowercase().as_str(), "true" | "false");
    if !is_flag && credential_key().is_some_and(|re| re.is_match(key)) {
        return Some((SecretReason::CredentialKey, format!("${{{variable}}}")));
    }
    None
}

fn walk(
    value: &mut PropertyValue,
    path: &str,
    key: &str,
    f: &mut dyn FnMut(&str, &str, &mut String),
) {
    match value {
        PropertyValue::Text(text) => f(path, key, text),
        PropertyValue::List(items) => {
            for (i, item) in items.iter_mut().enumerate() {
                walk(item, &format!("{path}[{i}]"), key, f);
            }
        }
        PropertyValue::Group(map) => {
            for (k, v) in map.iter_mut() {
                walk(v, &format!("{path}/{k}"), k, f);
            }
        }
    }
}

fn scan(artifact: &mut DecomposedArtifact, mask: bool) -> Vec<SecretFinding> {
    let mut findings = Vec::new();
    let labels: Vec<String> = artifact.connectors().into_iter().map(|(l, _)| l).collect();
    for (label, connector) in labels.into_iter().zip(artifact.connectors_mut()) {
        let prefix = if connector.name.is_empty() {
            label.clone()
        } else {
            connector.name.clone()
        };
        let connector_name = connector.name.clone();
        for (key, value) in connector.properties.iter_mut() {
            walk(value, key, key, &mut |path, leaf_key, text| {
                let variable = format!(
                    "{}_{}",
                    variable_segment(&prefix),
                    variable_segment(leaf_key)
                );
                if let Some((reason, masked)) = classify(leaf_key, text, &variable) {
                    let variable = match reason {
                        SecretReason::UrlPassword => format!("{variable}_PASSWORD"),
                        SecretReason::CredentialKey => variable,
                    };
                    findings.push(SecretFinding {
                        connector: label.clone(),
                        connector_name: connector_name.clone(),
                        path: format!("{label}.properties/{path}"),
                        reason,
                        variable,
                    });
                    if mask {
                        *text = masked;
                    }
                }
            });
        }
    }
    findings
}

/// Flag credential-shaped property values.
pub fn detect_secrets(artifact: &DecomposedArtifact) -> Vec<SecretFinding> {
    scan(&mut artifact.clone(), false)
}

/// Replace flagged values with variable tokens so import can re-inject them
/// from the environment. Returns what was masked.
pub fn mask_secrets(artifact: &mut DecomposedArtifact) -> Vec<SecretFinding> {
    scan(artifact, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::decompose_str;

    const DOC: &str = "<channel><id>c</id><sourceConnector><name>sourceConnector</name><properties><username>svc</username><password>hunter2</password><usePassword>true</usePassword><apiKey>${API_KEY}</apiKey></properties></sourceConnector><destinationConnectors><connector><name>To DB</name><properties><url>jdbc:postgresql://svc:s3cret@db:5432/app</url><dbToken></dbToken><auth><clientSecret>abc</clientSecret></auth></properties></connector></destinationConnectors></channel>";

    #[test]
    fn detection_patterns_compile() {
        let key = credential_key().expect("credential key pattern");
        assert!(key.is_match("clientSecret"));
        assert!(!key.is_match("username"));
        let url = url_userinfo().expect("url userinfo pattern");
        assert!(url.is_match("sftp://svc:pw@host/in"));
        assert!(!url.is_match("https://host/path"));
    }

    #[test]
    fn detects_credential_keys_and_url_passwords() {
        let artifact = decompose_str(DOC).unwrap();
        let findings = detect_secrets(&artifact);
        let paths: Vec<(&str, SecretReason)> = findings
            .iter()
            .map(|f| (f.path.as_str(), f.reason))
            .collect();
        assert_eq!(
            paths,
            vec![
                ("source.properties/password", SecretReason::CredentialKey),
                ("destinations[0].properties/url", SecretReason::UrlPassword),
                ("destinations[0].properties/auth/clientSecret", SecretReason::CredentialKey),
            ]
        );
        assert_eq!(findings[0].variable, "SOURCECONNECTOR_PASSWORD");
        assert_eq!(findings[1].variable, "TO_DB_URL_PASSWORD");
        assert_eq!(findings[2].variable, "TO_DB_CLIENTSECRET");
    }

    #[test]
    fn masking_replaces_values_with_tokens() {
        let mut artifact = decompose_str(DOC).unwrap();
        let masked = mask_secrets(&mut artifact);
        assert_eq!(masked.len(), 3);
        assert_eq!(
            artifact.source.properties["password"],
            PropertyValue::text("${SOURCECONNECTOR_PASSWORD}")
        );
        assert_eq!(
            artifact.destinations[0].properties["url"],
            PropertyValue::text("jdbc:postgresql://svc:${TO_DB_URL_PASSWORD}@db:5432/app")
        );
        assert!(detect_secrets(&artifact).is_empty());
    }

    #[test]
    fn segments_are_upper_snake() {
        assert_eq!(variable_segment("To DB (primary)"), "TO_DB_PRIMARY");
        assert_eq!(variable_segment("1st"), "_1ST");
    }
}
