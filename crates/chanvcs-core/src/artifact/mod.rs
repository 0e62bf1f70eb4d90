//! Structured model of a channel document.
//!
//! [`decompose`] turns a parsed channel into a [`DecomposedArtifact`];
//! [`assemble`] writes a (possibly edited) artifact back onto the document
//! it came from. Anything the model does not own survives unchanged through
//! `raw_tree`.

mod assemble;
mod decompose;
pub mod layout;
mod store;

use std::fmt;

use indexmap::IndexMap;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::error::Result;
use crate::vars::VariableResolver;
use crate::xml::Document;

pub use assemble::{assemble, assemble_to_string, AssembleOptions, StepOrder};
pub use decompose::{decompose, decompose_str};
pub use store::{list_channel_ids, read_artifact, remove_artifact, write_artifact};

/// Ordered property bag of a connector.
pub type Properties = IndexMap<String, PropertyValue>;

/// A connector property.
///
/// A leaf element is `Text`, an element with element children is a
/// `Group`, and a name repeated under one parent becomes a `List`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Text(String),
    List(Vec<PropertyValue>),
    Group(Properties),
}

impl PropertyValue {
    pub fn text(value: impl Into<String>) -> Self {
        PropertyValue::Text(value.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Visit every text leaf with its `/`-joined path below `prefix`.
    pub fn for_each_leaf<'a>(&'a self, prefix: &str, f: &mut dyn FnMut(String, &'a str)) {
        match self {
            PropertyValue::Text(t) => f(prefix.to_string(), t),
            PropertyValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.for_each_leaf(&format!("{prefix}[{i}]"), f);
                }
            }
            PropertyValue::Group(map) => {
                for (k, v) in map {
                    v.for_each_leaf(&format!("{prefix}/{k}"), f);
                }
            }
        }
    }

    /// Mutable visit of every text leaf with its key name.
    pub fn try_for_each_leaf_mut(
        &mut self,
        key: &str,
        f: &mut dyn FnMut(&str, &mut String) -> Result<()>,
    ) -> Result<()> {
        match self {
            PropertyValue::Text(t) => f(key, t),
            PropertyValue::List(items) => items
                .iter_mut()
                .try_for_each(|item| item.try_for_each_leaf_mut(key, f)),
            PropertyValue::Group(map) => map
                .iter_mut()
                .try_for_each(|(k, v)| v.try_for_each_leaf_mut(k, f)),
        }
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PropertyVisitor;

        impl<'de> Visitor<'de> for PropertyVisitor {
            type Value = PropertyValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a scalar, a list or a map of properties")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
                Ok(PropertyValue::Text(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> std::result::Result<Self::Value, E> {
                Ok(PropertyValue::Text(v))
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> std::result::Result<Self::Value, E> {
                Ok(PropertyValue::Text(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
                Ok(PropertyValue::Text(v.to_string()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
                Ok(PropertyValue::Text(v.to_string()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Self::Value, E> {
                Ok(PropertyValue::Text(v.to_string()))
            }

            fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(PropertyValue::Text(String::new()))
            }

            fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
                Ok(PropertyValue::Text(String::new()))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<Self::Value, A::Error> {
                let mut items = Vec::new();
                while let Some(item) = seq.next_element()? {
                    items.push(item);
                }
                Ok(PropertyValue::List(items))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut group = IndexMap::new();
                while let Some((key, value)) = map.next_entry::<String, PropertyValue>()? {
                    group.insert(key, value);
                }
                Ok(PropertyValue::Group(group))
            }
        }

        deserializer.deserialize_any(PropertyVisitor)
    }
}

/// Channel-level identity fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// One transformer step or filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Element name the step is keyed by in the document.
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind_version: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sequence_number: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Filter rules only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    #[serde(default)]
    pub body: String,
}

pub type StepList = Vec<Step>;

fn default_true() -> bool {
    true
}

/// A source or destination connector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorFiles {
    pub name: String,
    /// `metaDataId`; 0 for the source connector.
    pub id: String,
    pub transport_kind: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_previous: Option<bool>,
    #[serde(default)]
    pub properties_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties_version: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformer: Option<StepList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_transformer: Option<StepList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<StepList>,
}

impl ConnectorFiles {
    /// Every property text leaf as `(path, value)`, paths `/`-separated.
    pub fn property_leaves(&self) -> Vec<(String, &str)> {
        let mut leaves = Vec::new();
        for (key, value) in &self.properties {
            value.for_each_leaf(key, &mut |path, text| leaves.push((path, text)));
        }
        leaves
    }

    /// Named step lists in a fixed order.
    pub fn step_lists(&self) -> [(&'static str, Option<&StepList>); 3] {
        [
            ("transformer", self.transformer.as_ref()),
            ("response_transformer", self.response_transformer.as_ref()),
            ("filter", self.filter.as_ref()),
        ]
    }
}

/// Channel-level scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scripts {
    pub deploy: Option<String>,
    pub undeploy: Option<String>,
    pub preprocess: Option<String>,
    pub postprocess: Option<String>,
}

impl Scripts {
    /// `(name, script)` pairs in a fixed order.
    pub fn entries(&self) -> [(&'static str, Option<&String>); 4] {
        [
            ("deploy", self.deploy.as_ref()),
            ("undeploy", self.undeploy.as_ref()),
            ("preprocess", self.preprocess.as_ref()),
            ("postprocess", self.postprocess.as_ref()),
        ]
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
        match name {
            "deploy" => Some(&mut self.deploy),
            "undeploy" => Some(&mut self.undeploy),
            "preprocess" => Some(&mut self.preprocess),
            "postprocess" => Some(&mut self.postprocess),
            _ => None,
        }
    }
}

/// A channel split into owned fields plus the document they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct DecomposedArtifact {
    pub raw_tree: Document,
    pub metadata: ChannelMetadata,
    pub source: ConnectorFiles,
    /// Deployment order.
    pub destinations: Vec<ConnectorFiles>,
    pub scripts: Scripts,
}

impl DecomposedArtifact {
    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    /// Source then destinations, labelled by their model path.
    pub fn connectors(&self) -> Vec<(String, &ConnectorFiles)> {
        let mut out = vec![("source".to_string(), &self.source)];
        for (i, dest) in self.destinations.iter().enumerate() {
            out.push((format!("destinations[{i}]"), dest));
        }
        out
    }

    pub fn connectors_mut(&mut self) -> impl Iterator<Item = &mut ConnectorFiles> {
        std::iter::once(&mut self.source).chain(self.destinations.iter_mut())
    }

    /// Resolve every property leaf in place. Returns unresolved names; in
    /// strict mode they are an error instead.
    pub fn resolve_properties(&mut self, resolver: &VariableResolver) -> Result<Vec<String>> {
        let mut unresolved = Vec::new();
        for connector in self.connectors_mut() {
            for (key, value) in connector.properties.iter_mut() {
                value.try_for_each_leaf_mut(key, &mut |_, text| {
                    *text = resolver.resolve_with(text, &mut unresolved)?;
                    Ok(())
                })?;
            }
        }
        resolver.check_strict(&unresolved)?;
        Ok(unresolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_value_accepts_scalars_lists_and_maps() {
        let yaml = "host: db\nport: 5432\nssl: true\nempty: ~\nlist: [a, 1]\ngroup:\n  k: v\n";
        let props: Properties = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(props["host"], PropertyValue::text("db"));
        assert_eq!(props["port"], PropertyValue::text("5432"));
        assert_eq!(props["ssl"], PropertyValue::text("true"));
        assert_eq!(props["empty"], PropertyValue::text(""));
        assert_eq!(
            props["list"],
            PropertyValue::List(vec![PropertyValue::text("a"), PropertyValue::text("1")])
        );
        let mut group = IndexMap::new();
        group.insert("k".to_string(), PropertyValue::text("v"));
        assert_eq!(props["group"], PropertyValue::Group(group));
        assert_eq!(
            props.keys().collect::<Vec<_>>(),
            vec!["host", "port", "ssl", "empty", "list", "group"]
        );
    }

    #[test]
    fn leaves_use_slash_and_index_paths() {
        let yaml = "host: db\nheaders:\n  entry:\n    - { string: a }\n    - { string: b }\n";
        let props: Properties = serde_yaml::from_str(yaml).unwrap();
        let connector = ConnectorFiles {
            name: "out".to_string(),
            id: "1".to_string(),
            transport_kind: "HTTP Sender".to_string(),
            mode: "DESTINATION".to_string(),
            enabled: true,
            wait_for_previous: None,
            properties_kind: String::new(),
            properties_version: None,
            properties: props,
            transformer: None,
            response_transformer: None,
            filter: None,
        };
        let leaves = connector.property_leaves();
        assert_eq!(
            leaves,
            vec![
                ("host".to_string(), "db"),
                ("headers/entry[0]/string".to_string(), "a"),
                ("headers/entry[1]/string".to_string(), "b"),
            ]
        );
    }
}
