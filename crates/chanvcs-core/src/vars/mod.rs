//! Deploy-time variable resolution.
//!
//! Resolves `${NAME}` and `${NAME:default}` tokens through a layered chain,
//! highest priority first: process override, environment file, defaults
//! file, inline default, programmatic extra variables.
//!
//! Resolution is synchronous over loaded state. Only
//! [`VariableResolver::load_environment`] touches the store.

pub mod token;

use std::collections::BTreeMap;
use std::sync::Arc;

use chanvcs_state::FileStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::artifact::layout;
use crate::domain::error::{ChanvcsError, Result};
use token::{is_valid_name, scan, split_inner, Segment};

/// Expansion levels allowed below the text being resolved.
pub const MAX_NESTING_DEPTH: usize = 10;

/// Immutable snapshot of process-level overrides.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnvironment {
    vars: BTreeMap<String, String>,
    /// Snapshot was filtered by a name prefix, so every entry is intended
    /// as a channel variable.
    prefixed: bool,
}

impl ProcessEnvironment {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_map(vars: BTreeMap<String, String>) -> Self {
        Self {
            vars,
            prefixed: false,
        }
    }

    /// Snapshot the current process environment. With a prefix, only
    /// variables starting with it are kept and the prefix is stripped.
    pub fn capture(prefix: Option<&str>) -> Self {
        Self::from_pairs(std::env::vars(), prefix)
    }

    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (String, String)>,
        prefix: Option<&str>,
    ) -> Self {
        let vars = match prefix {
            Some(prefix) => pairs
                .into_iter()
                .filter_map(|(k, v)| {
                    k.strip_prefix(prefix)
                        .filter(|rest| !rest.is_empty())
                        .map(|rest| (rest.to_string(), v))
                })
                .collect(),
            None => pairs.into_iter().collect(),
        };
        Self {
            vars,
            prefixed: prefix.is_some(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

/// Layer a variable value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSource {
    ProcessOverride,
    EnvironmentFile,
    DefaultsFile,
    InlineDefault,
    Extra,
}

/// A known variable and the layer that wins for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: String,
    pub source: VariableSource,
}

/// A resolved value plus every name that could not be resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub unresolved: Vec<String>,
}

/// Layered variable resolver. See the module docs for priority.
#[derive(Debug, Clone)]
pub struct VariableResolver {
    process: Arc<ProcessEnvironment>,
    environment: BTreeMap<String, String>,
    defaults: BTreeMap<String, String>,
    extra: BTreeMap<String, String>,
    environment_name: Option<String>,
    strict: bool,
}

impl VariableResolver {
    pub fn new(process: Arc<ProcessEnvironment>) -> Self {
        Self {
            process,
            environment: BTreeMap::new(),
            defaults: BTreeMap::new(),
            extra: BTreeMap::new(),
            environment_name: None,
            strict: false,
        }
    }

    pub fn with_environment_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.environment = vars;
        self
    }

    pub fn with_defaults(mut self, vars: BTreeMap<String, String>) -> Self {
        self.defaults = vars;
        self
    }

    /// Lowest-priority variables supplied by the caller.
    pub fn with_extra(mut self, vars: BTreeMap<String, String>) -> Self {
        self.extra = vars;
        self
    }

    /// In strict mode any unresolved name is an error.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn environment_name(&self) -> Option<&str> {
        self.environment_name.as_deref()
    }

    /// Load `<tree>/environments/defaults.yaml` and, when `env` is given,
    /// `<tree>/environments/<env>.yaml`. Missing files are empty.
    pub async fn load_environment(
        &mut self,
        store: &dyn FileStore,
        tree: &str,
        env: Option<&str>,
    ) -> Result<()> {
        let defaults_path = layout::environment_file(tree, layout::DEFAULTS_ENVIRONMENT);
        self.defaults = load_variable_file(store, &defaults_path).await?;

        self.environment = match env {
            Some(name) => load_variable_file(store, &layout::environment_file(tree, name)).await?,
            None => BTreeMap::new(),
        };
        self.environment_name = env.map(str::to_string);
        debug!(
            tree = %tree,
            environment = ?env,
            defaults = self.defaults.len(),
            environment_vars = self.environment.len(),
            "variables loaded"
        );
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&str> {
        self.process
            .get(name)
            .or_else(|| self.environment.get(name).map(String::as_str))
            .or_else(|| self.defaults.get(name).map(String::as_str))
    }

    /// Resolve every token in `text`.
    pub fn resolve(&self, text: &str) -> Result<Resolved<String>> {
        let mut unresolved = Vec::new();
        let value = self.resolve_with(text, &mut unresolved)?;
        self.check_strict(&unresolved)?;
        Ok(Resolved { value, unresolved })
    }

    /// Deep copy of `value` with every string leaf resolved.
    pub fn resolve_object(&self, value: &serde_json::Value) -> Result<Resolved<serde_json::Value>> {
        let mut unresolved = Vec::new();
        let value = self.resolve_value(value, &mut unresolved)?;
        self.check_strict(&unresolved)?;
        Ok(Resolved { value, unresolved })
    }

    fn resolve_value(
        &self,
        value: &serde_json::Value,
        unresolved: &mut Vec<String>,
    ) -> Result<serde_json::Value> {
        use serde_json::Value;
        Ok(match value {
            Value::String(s) => Value::String(self.resolve_with(s, unresolved)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.resolve_value(v, unresolved))
                    .collect::<Result<_>>()?,
            ),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(k.clone(), self.resolve_value(v, unresolved)?);
                }
                Value::Object(out)
            }
            other => other.clone(),
        })
    }

    /// Resolve `text`, accumulating unresolved names without applying
    /// strict mode. Cycles and depth overflow still fail.
    pub fn resolve_with(&self, text: &str, unresolved: &mut Vec<String>) -> Result<String> {
        let mut stack = Vec::new();
        self.expand(text, 0, &mut stack, unresolved)
    }

    /// Fail in strict mode when anything is left unresolved.
    pub fn check_strict(&self, unresolved: &[String]) -> Result<()> {
        if self.strict && !unresolved.is_empty() {
            return Err(ChanvcsError::UnresolvedVariable {
                names: unresolved.to_vec(),
            });
        }
        Ok(())
    }

    fn expand(
        &self,
        text: &str,
        depth: usize,
        stack: &mut Vec<String>,
        unresolved: &mut Vec<String>,
    ) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        for segment in scan(text) {
            match segment {
                Segment::Literal(lit) => out.push_str(lit),
                Segment::Token { raw, inner } => {
                    out.push_str(&self.expand_token(raw, inner, depth, stack, unresolved)?)
                }
            }
        }
        Ok(out)
    }

    fn expand_token(
        &self,
        raw: &str,
        inner: &str,
        depth: usize,
        stack: &mut Vec<String>,
        unresolved: &mut Vec<String>,
    ) -> Result<String> {
        let (name, default) = split_inner(inner);
        if !is_valid_name(name) {
            return Ok(raw.to_string());
        }
        if stack.iter().any(|n| n == name) {
            let mut chain = stack.clone();
            chain.push(name.to_string());
            return Err(ChanvcsError::CircularVariableReference {
                chain: chain.join(" -> "),
            });
        }

        let next = match (self.lookup(name), default) {
            (Some(value), _) => Some((value, true)),
            (None, Some(default)) => Some((default, false)),
            (None, None) => self.extra.get(name).map(|v| (v.as_str(), true)),
        };

        let Some((value, named)) = next else {
            if !unresolved.iter().any(|n| n == name) {
                unresolved.push(name.to_string());
            }
            return Ok(raw.to_string());
        };

        if depth >= MAX_NESTING_DEPTH {
            return Err(ChanvcsError::NestingDepthExceeded {
                limit: MAX_NESTING_DEPTH,
                token: raw.to_string(),
            });
        }
        if named {
            stack.push(name.to_string());
        }
        let expanded = self.expand(value, depth + 1, stack, unresolved);
        if named {
            stack.pop();
        }
        expanded
    }

    /// Every known name with its raw value and winning layer.
    ///
    /// Process variables appear when another layer names them, or for every
    /// entry when the snapshot was prefix-filtered.
    pub fn variable_map(&self) -> BTreeMap<String, Variable> {
        let mut map = BTreeMap::new();
        let mut put = |name: &String, value: &String, source| {
            map.insert(
                name.clone(),
                Variable {
                    name: name.clone(),
                    value: value.clone(),
                    source,
                },
            );
        };
        for (k, v) in &self.extra {
            put(k, v, VariableSource::Extra);
        }
        for (k, v) in &self.defaults {
            put(k, v, VariableSource::DefaultsFile);
        }
        for (k, v) in &self.environment {
            put(k, v, VariableSource::EnvironmentFile);
        }
        for (k, v) in &self.process.vars {
            let known = self.environment.contains_key(k)
                || self.defaults.contains_key(k)
                || self.extra.contains_key(k);
            if self.process.prefixed || known {
                put(k, v, VariableSource::ProcessOverride);
            }
        }
        map
    }
}

/// Single-pass substitution used at assemble time: each token is replaced
/// by its value or default once, and substituted text is not rescanned.
pub fn substitute_once(text: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    for segment in scan(text) {
        match segment {
            Segment::Literal(lit) => out.push_str(lit),
            Segment::Token { raw, inner } => {
                let (name, default) = split_inner(inner);
                match (vars.get(name), default) {
                    (Some(value), _) if is_valid_name(name) => out.push_str(value),
                    (None, Some(default)) if is_valid_name(name) => out.push_str(default),
                    _ => out.push_str(raw),
                }
            }
        }
    }
    out
}

/// Read a flat YAML map of variables. A missing or empty file is empty.
pub async fn load_variable_file(
    store: &dyn FileStore,
    path: &str,
) -> Result<BTreeMap<String, String>> {
    let Some(bytes) = store.read_file(path).await? else {
        debug!(path = %path, "variable file absent");
        return Ok(BTreeMap::new());
    };
    parse_variable_file(path, &bytes)
}

pub(crate) fn parse_variable_file(path: &str, bytes: &[u8]) -> Result<BTreeMap<String, String>> {
    use serde_yaml::Value;

    let invalid = |reason: String| ChanvcsError::ConfigurationInvalid {
        path: path.to_string(),
        reason,
    };
    let value: Value = serde_yaml::from_slice(bytes).map_err(|e| invalid(e.to_string()))?;
    let mapping = match value {
        Value::Null => return Ok(BTreeMap::new()),
        Value::Mapping(mapping) => mapping,
        _ => return Err(invalid("expected a map of variable names to values".to_string())),
    };

    let mut vars = BTreeMap::new();
    for (key, value) in mapping {
        let key = scalar_to_string(&key)
            .ok_or_else(|| invalid("variable names must be scalars".to_string()))?;
        let value = scalar_to_string(&value)
            .ok_or_else(|| invalid(format!("variable '{key}' must be a scalar value")))?;
        vars.insert(key, value);
    }
    Ok(vars)
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    use serde_yaml::Value;
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}
