//! `chanvcs.toml` configuration.
//!
//! Every field has a default, so an absent file is a valid configuration.
//! Environment overrides are applied after parsing:
//!
//! - `CHANVCS_CONFIG`: path of the config file
//! - `CHANVCS_MAX_CONCURRENCY`: `[batch] max_concurrency`
//! - `CHANVCS_VARIABLE_PREFIX`: `[resolver] process_prefix`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::error::{ChanvcsError, Result};

/// Default config filename, looked up in the working directory.
pub const DEFAULT_CONFIG_NAME: &str = "chanvcs.toml";
/// Environment variable override for the config path.
pub const CONFIG_ENV_VAR: &str = "CHANVCS_CONFIG";
pub const MAX_CONCURRENCY_ENV_VAR: &str = "CHANVCS_MAX_CONCURRENCY";
pub const VARIABLE_PREFIX_ENV_VAR: &str = "CHANVCS_VARIABLE_PREFIX";

const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_APPROVALS_PATH: &str = ".chanvcs/approvals.jsonl";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Upper bound on channels processed at once.
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Only process variables starting with this prefix are visible, with
    /// the prefix stripped. `None` exposes the whole process environment.
    pub process_prefix: Option<String>,
    /// Import fails on any unresolved variable.
    pub strict_import: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Replace detected credentials with variable tokens on export.
    pub mask_secrets: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { mask_secrets: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalsConfig {
    /// JSON-lines approval log, relative to the repository root.
    pub path: PathBuf,
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_APPROVALS_PATH),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory of `<id>.xml` live channel documents.
    pub directory: Option<PathBuf>,
}

/// Per-environment settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Tree path inside the repository. Defaults to the environment name.
    pub tree: Option<String>,
    /// Version of the routing engine running this environment.
    pub engine_version: Option<String>,
    /// Promotions into this environment need an approval record.
    pub require_approval: bool,
    /// Transports the target engine cannot run.
    pub unsupported_transports: Vec<String>,
}

/// An allowed `from -> to` promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionPath {
    pub from: String,
    pub to: String,
}

/// Root of `chanvcs.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChanvcsConfig {
    pub batch: BatchConfig,
    pub resolver: ResolverConfig,
    pub export: ExportConfig,
    pub approvals: ApprovalsConfig,
    pub engine: EngineConfig,
    pub environments: BTreeMap<String, EnvironmentConfig>,
    pub promotion_paths: Vec<PromotionPath>,
}

impl ChanvcsConfig {
    /// Load from `path`, `$CHANVCS_CONFIG`, or `./chanvcs.toml`, then apply
    /// environment overrides.
    ///
    /// An explicitly named file must exist; the default file may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

        let mut config = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ChanvcsError::ConfigurationMissing(path.display().to_string()));
                }
                Self::from_file(&path)?
            }
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_NAME);
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    debug!("no {DEFAULT_CONFIG_NAME} found, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content).map_err(|err| match err {
            ChanvcsError::ConfigurationInvalid { reason, .. } => {
                ChanvcsError::ConfigurationInvalid {
                    path: path.display().to_string(),
                    reason,
                }
            }
            other => other,
        })?;
        debug!(path = %path.display(), environments = config.environments.len(), "config loaded");
        Ok(config)
    }

    /// Parse and validate without environment overrides.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `CHANVCS_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup(MAX_CONCURRENCY_ENV_VAR) {
            self.batch.max_concurrency = raw.trim().parse().map_err(|_| {
                invalid(format!("{MAX_CONCURRENCY_ENV_VAR} must be a positive integer, got '{raw}'"))
            })?;
        }
        if let Some(prefix) = lookup(VARIABLE_PREFIX_ENV_VAR) {
            self.resolver.process_prefix = (!prefix.is_empty()).then_some(prefix);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.max_concurrency == 0 {
            return Err(invalid("batch.max_concurrency must be at least 1"));
        }
        for (name, env) in &self.environments {
            if name.is_empty() || name.contains('/') || name == "defaults" {
                return Err(invalid(format!("invalid environment name '{name}'")));
            }
            if let Some(tree) = &env.tree {
                chanvcs_state::validate_path(tree).map_err(|e| invalid(e.to_string()))?;
            }
        }
        for path in &self.promotion_paths {
            for end in [&path.from, &path.to] {
                if !self.environments.is_empty() && !self.environments.contains_key(end) {
                    return Err(invalid(format!(
                        "promotion path {} -> {} names unknown environment '{end}'",
                        path.from, path.to
                    )));
                }
            }
        }
        Ok(())
    }

    /// Settings of `name`. When no environments are configured every name
    /// is accepted with defaults.
    pub fn environment(&self, name: &str) -> Result<EnvironmentConfig> {
        if self.environments.is_empty() {
            return Ok(EnvironmentConfig::default());
        }
        self.environments
            .get(name)
            .cloned()
            .ok_or_else(|| ChanvcsError::EnvironmentUnknown(name.to_string()))
    }

    /// Tree path of `name` inside the repository.
    pub fn tree_for(&self, name: &str) -> Result<String> {
        Ok(self.environment(name)?.tree.unwrap_or_else(|| name.to_string()))
    }

    /// Whether `from -> to` is allowed. Anything goes when no path is
    /// configured.
    pub fn allows_promotion(&self, from: &str, to: &str) -> bool {
        self.promotion_paths.is_empty()
            || self
                .promotion_paths
                .iter()
                .any(|p| p.from == from && p.to == to)
    }
}

fn invalid(reason: impl Into<String>) -> ChanvcsError {
    ChanvcsError::ConfigurationInvalid {
        path: DEFAULT_CONFIG_NAME.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[batch]
max_concurrency = 8

[resolver]
process_prefix = "CHV_"
strict_import = true

[export]
mask_secrets = false

[environments.staging]

[environments.production]
tree = "envs/prod"
engine_version = "4.5.0"
require_approval = true
unsupported_transports = ["Serial Reader"]

[[promotion_paths]]
from = "staging"
to = "production"
"#;

    #[test]
    fn empty_config_uses_defaults() {
        let config = ChanvcsConfig::from_toml_str("").unwrap();
        assert_eq!(config.batch.max_concurrency, 4);
        assert!(config.export.mask_secrets);
        assert!(!config.resolver.strict_import);
        assert_eq!(config.approvals.path, PathBuf::from(".chanvcs/approvals.jsonl"));
        assert_eq!(config.tree_for("anything").unwrap(), "anything");
        assert!(config.allows_promotion("a", "b"));
    }

    #[test]
    fn parses_every_section() {
        let config = ChanvcsConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.batch.max_concurrency, 8);
        assert_eq!(config.resolver.process_prefix.as_deref(), Some("CHV_"));
        assert!(!config.export.mask_secrets);
        assert_eq!(config.tree_for("staging").unwrap(), "staging");
        assert_eq!(config.tree_for("production").unwrap(), "envs/prod");
        let prod = config.environment("production").unwrap();
        assert!(prod.require_approval);
        assert_eq!(prod.unsupported_transports, vec!["Serial Reader"]);
        assert!(config.allows_promotion("staging", "production"));
        assert!(!config.allows_promotion("production", "staging"));
    }

    #[test]
    fn unknown_environment_is_an_error() {
        let config = ChanvcsConfig::from_toml_str(SAMPLE).unwrap();
        assert!(matches!(
            config.environment("qa"),
            Err(ChanvcsError::EnvironmentUnknown(name)) if name == "qa"
        ));
    }

    #[test]
    fn promotion_path_must_name_configured_environments() {
        let toml = "[environments.a]\n[[promotion_paths]]\nfrom = \"a\"\nto = \"b\"\n";
        assert!(matches!(
            ChanvcsConfig::from_toml_str(toml),
            Err(ChanvcsError::ConfigurationInvalid { .. })
        ));
    }

    #[test]
    fn overrides_apply() {
        let mut config = ChanvcsConfig::default();
        config
            .apply_overrides(|name| match name {
                MAX_CONCURRENCY_ENV_VAR => Some("2".to_string()),
                VARIABLE_PREFIX_ENV_VAR => Some("APP_".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.batch.max_concurrency, 2);
        assert_eq!(config.resolver.process_prefix.as_deref(), Some("APP_"));

        let err = config
            .apply_overrides(|name| (name == MAX_CONCURRENCY_ENV_VAR).then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("CHANVCS_MAX_CONCURRENCY"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(ChanvcsConfig::from_toml_str("[batch]\nmax_concurrency = 0\n").is_err());
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = ChanvcsConfig::load(Some(&path)).unwrap();
        assert!(config.environments.contains_key("production"));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            ChanvcsConfig::load(Some(&missing)),
            Err(ChanvcsError::ConfigurationMissing(_))
        ));
    }
}
