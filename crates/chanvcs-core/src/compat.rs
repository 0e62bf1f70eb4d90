//! Compatibility checks for channel promotions.
//!
//! Evaluates a candidate artifact against a [`CompatRuleSet`] and the target
//! environment's engine to produce a [`CompatVerdict`]. Error violations
//! block the promotion of that channel; warnings are reported only.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::artifact::DecomposedArtifact;
use crate::config::EnvironmentConfig;

/// A single compatibility rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompatRule {
    /// No connector may use a transport the target engine cannot run.
    UnsupportedTransport,
    /// No connector's properties version may be newer than the target
    /// engine version.
    PropertiesVersionTooNew,
    /// Disabled destinations are flagged.
    DisabledDestination,
    /// Channels and connectors should be named.
    EmptyName,
}

impl CompatRule {
    pub fn severity(&self) -> Severity {
        match self {
            CompatRule::UnsupportedTransport | CompatRule::PropertiesVersionTooNew => {
                Severity::Error
            }
            CompatRule::DisabledDestination | CompatRule::EmptyName => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// A set of compatibility rules to evaluate before promoting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompatRuleSet {
    pub rules: Vec<CompatRule>,
}

impl CompatRuleSet {
    /// Every rule.
    pub fn standard() -> Self {
        Self {
            rules: vec![
                CompatRule::UnsupportedTransport,
                CompatRule::PropertiesVersionTooNew,
                CompatRule::DisabledDestination,
                CompatRule::EmptyName,
            ],
        }
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule to this set (builder pattern).
    pub fn with_rule(mut self, rule: CompatRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// What a candidate is checked against.
pub struct PromoteContext<'a> {
    pub artifact: &'a DecomposedArtifact,
    pub target: &'a EnvironmentConfig,
}

/// A single rule violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompatViolation {
    pub rule: CompatRule,
    pub severity: Severity,
    /// `source`, `destinations[N]` or `channel`.
    pub location: String,
    pub reason: String,
}

/// The outcome of evaluating a rule set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompatVerdict {
    pub violations: Vec<CompatViolation>,
}

impl CompatVerdict {
    /// No error-severity violations.
    pub fn passed(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn errors(&self) -> impl Iterator<Item = &CompatViolation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CompatViolation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Warning)
    }
}

/// Evaluate `ctx` against `rule_set`.
pub fn evaluate_compat(rule_set: &CompatRuleSet, ctx: &PromoteContext) -> CompatVerdict {
    let mut violations = Vec::new();
    for rule in &rule_set.rules {
        check_rule(rule, ctx, &mut violations);
    }
    CompatVerdict { violations }
}

/// Compare dotted numeric versions; missing components count as zero.
/// `None` when either side has a non-numeric component.
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    let parse = |v: &str| -> Option<Vec<u64>> {
        v.trim()
            .split('.')
            .map(|part| part.parse::<u64>().ok())
            .collect()
    };
    let (a, b) = (parse(a)?, parse(b)?);
    let len = a.len().max(b.len());
    for i in 0..len {
        let ord = a.get(i).unwrap_or(&0).cmp(b.get(i).unwrap_or(&0));
        if ord != Ordering::Equal {
            return Some(ord);
        }
    }
    Some(Ordering::Equal)
}

fn check_rule(rule: &CompatRule, ctx: &PromoteContext, out: &mut Vec<CompatViolation>) {
    let mut push = |location: &str, reason: String| {
        out.push(CompatViolation {
            rule: rule.clone(),
            severity: rule.severity(),
            location: location.to_string(),
            reason,
        });
    };

    match rule {
        CompatRule::UnsupportedTransport => {
            for (label, connector) in ctx.artifact.connectors() {
                if ctx
                    .target
                    .unsupported_transports
                    .iter()
                    .any(|t| t.eq_ignore_ascii_case(&connector.transport_kind))
                {
                    push(
                        &label,
                        format!(
                            "transport '{}' is not supported by the target engine",
                            connector.transport_kind
                        ),
                    );
                }
            }
        }
        CompatRule::PropertiesVersionTooNew => {
            let Some(engine) = ctx.target.engine_version.as_deref() else {
                return;
            };
            for (label, connector) in ctx.artifact.connectors() {
                let Some(version) = connector.properties_version.as_deref() else {
                    continue;
                };
                if compare_versions(version, engine) == Some(Ordering::Greater) {
                    push(
                        &label,
                        format!("properties version {version} is newer than engine {engine}"),
                    );
                }
            }
        }
        CompatRule::DisabledDestination => {
            for (i, dest) in ctx.artifact.destinations.iter().enumerate() {
                if !dest.enabled {
                    push(
                        &format!("destinations[{i}]"),
                        format!("destination '{}' is disabled", dest.name),
                    );
                }
            }
        }
        CompatRule::EmptyName => {
            if ctx.artifact.metadata.name.trim().is_empty() {
                push("channel", "channel name is empty".to_string());
            }
            for (label, connector) in ctx.artifact.connectors() {
                if connector.name.trim().is_empty() {
                    push(&label, "connector name is empty".to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::decompose_str;

    const DOC: &str = "<channel><id>c</id><name>Orders</name><sourceConnector><name>sourceConnector</name><transportName>TCP Listener</transportName><properties class=\"p\" version=\"4.5.0\"/></sourceConnector><destinationConnectors><connector><name>To DB</name><transportName>Database Writer</transportName><enabled>false</enabled><properties class=\"d\" version=\"3.12.0\"/></connector><connector><name></name><transportName>Serial Writer</transportName><enabled>true</enabled><properties class=\"s\"/></connector></destinationConnectors></channel>";

    fn target(version: Option<&str>, unsupported: &[&str]) -> EnvironmentConfig {
        EnvironmentConfig {
            engine_version: version.map(str::to_string),
            unsupported_transports: unsupported.iter().map(|s| s.to_string()).collect(),
            ..EnvironmentConfig::default()
        }
    }

    #[test]
    fn clean_channel_passes() {
        let artifact = decompose_str(DOC).unwrap();
        let env = target(Some("4.5.0"), &[]);
        let verdict = evaluate_compat(
            &CompatRuleSet::empty().with_rule(CompatRule::UnsupportedTransport),
            &PromoteContext {
                artifact: &artifact,
                target: &env,
            },
        );
        assert!(verdict.passed());
        assert!(verdict.violations.is_empty());
    }

    #[test]
    fn errors_and_warnings_are_separated() {
        let artifact = decompose_str(DOC).unwrap();
        let env = target(Some("4.4"), &["serial writer"]);
        let verdict = evaluate_compat(
            &CompatRuleSet::standard(),
            &PromoteContext {
                artifact: &artifact,
                target: &env,
            },
        );
        assert!(!verdict.passed());

        let errors: Vec<(&CompatRule, &str)> = verdict
            .errors()
            .map(|v| (&v.rule, v.location.as_str()))
            .collect();
        assert_eq!(
            errors,
            vec![
                (&CompatRule::UnsupportedTransport, "destinations[1]"),
                (&CompatRule::PropertiesVersionTooNew, "source"),
            ]
        );
        let warnings: Vec<&CompatRule> = verdict.warnings().map(|v| &v.rule).collect();
        assert_eq!(
            warnings,
            vec![&CompatRule::DisabledDestination, &CompatRule::EmptyName]
        );
    }

    #[test]
    fn versions_compare_numerically() {
        assert_eq!(compare_versions("4.10.0", "4.9"), Some(Ordering::Greater));
        assert_eq!(compare_versions("4.5", "4.5.0"), Some(Ordering::Equal));
        assert_eq!(compare_versions("3.12.0", "4.0.0"), Some(Ordering::Less));
        assert_eq!(compare_versions("4.5.0-beta", "4.5.0"), None);
    }

    #[test]
    fn unknown_engine_version_skips_version_rule() {
        let artifact = decompose_str(DOC).unwrap();
        let env = target(None, &[]);
        let verdict = evaluate_compat(
            &CompatRuleSet::empty().with_rule(CompatRule::PropertiesVersionTooNew),
            &PromoteContext {
                artifact: &artifact,
                target: &env,
            },
        );
        assert!(verdict.passed());
    }
}
