use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::decompose::{parse_bool, read_enabled, read_steps, SCRIPT_ELEMENTS, STEP_ELEMENTS};
use super::{ChannelMetadata, ConnectorFiles, DecomposedArtifact, Properties, PropertyValue, Step};
use crate::domain::error::{ChanvcsError, Result};
use crate::vars::substitute_once;
use crate::xml::{write_document, Document, Element, Node};

/// How step lists are re-serialized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOrder {
    /// Exactly the model order.
    #[default]
    Sequence,
    /// Steps grouped by kind, groups ordered by first appearance. Matches
    /// tools that write one block per step type.
    GroupByKind,
}

#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    /// Substituted into property text once, without recursion.
    pub variables: Option<BTreeMap<String, String>>,
    pub step_order: StepOrder,
}

impl AssembleOptions {
    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_step_order(mut self, order: StepOrder) -> Self {
        self.step_order = order;
        self
    }
}

/// Write `artifact` back onto a copy of the document it was decomposed from.
///
/// Elements are only touched where the model differs, so an unedited
/// artifact reproduces its source document.
pub fn assemble(artifact: &DecomposedArtifact, opts: &AssembleOptions) -> Result<Document> {
    let mut doc = artifact.raw_tree.clone();
    let root = &mut doc.root;
    if root.name != "channel" {
        return Err(ChanvcsError::MalformedArtifact(format!(
            "raw tree root is <{}>, expected <channel>",
            root.name
        )));
    }

    apply_metadata(root, &artifact.metadata);

    let source = root.child_mut("sourceConnector").ok_or_else(|| {
        ChanvcsError::MalformedArtifact("raw tree has no <sourceConnector>".to_string())
    })?;
    apply_connector(source, &artifact.source, opts)?;

    apply_destinations(root, &artifact.destinations, opts)?;

    let scripts = artifact.scripts.entries();
    for ((_, element), (_, script)) in SCRIPT_ELEMENTS.iter().zip(scripts) {
        if let Some(script) = script {
            root.set_child_text(element, script);
        }
    }

    Ok(doc)
}

/// [`assemble`] and serialize.
pub fn assemble_to_string(artifact: &DecomposedArtifact, opts: &AssembleOptions) -> Result<String> {
    Ok(write_document(&assemble(artifact, opts)?))
}

/// Only fields the source document already carries are written.
fn apply_metadata(root: &mut Element, meta: &ChannelMetadata) {
    root.set_child_text("id", &meta.id);
    set_field(root, "name", &meta.name, false);
    if let Some(revision) = meta.revision {
        set_field(root, "revision", &revision.to_string(), false);
    }
    if let Some(description) = &meta.description {
        set_field(root, "description", description, false);
    }
    if let Some(enabled) = meta.enabled {
        match read_enabled(root) {
            Some(current) if current != enabled => {
                let value = enabled.to_string();
                if root.child("enabled").is_some() {
                    root.set_child_text("enabled", &value);
                } else if let Some(el) = root.descendant_mut("exportData/metadata/enabled") {
                    el.set_text(&value);
                }
            }
            _ => {}
        }
    }
}

fn apply_destinations(
    root: &mut Element,
    destinations: &[ConnectorFiles],
    opts: &AssembleOptions,
) -> Result<()> {
    let Some(list) = root.child_mut("destinationConnectors") else {
        if destinations.is_empty() {
            return Ok(());
        }
        return Err(ChanvcsError::ShapeMismatch(format!(
            "document has no destination slots, artifact has {}",
            destinations.len()
        )));
    };
    let slots = list.count_named("connector");
    if slots != destinations.len() {
        return Err(ChanvcsError::ShapeMismatch(format!(
            "document has {slots} destination slots, artifact has {}",
            destinations.len()
        )));
    }
    for (el, dest) in list
        .elements_mut()
        .filter(|el| el.name == "connector")
        .zip(destinations)
    {
        apply_connector(el, dest, opts)?;
    }
    Ok(())
}

/// Set child `name` when it exists, or create it when `create` is set.
fn set_field(el: &mut Element, name: &str, value: &str, create: bool) {
    if create || el.child(name).is_some() {
        el.set_child_text(name, value);
    }
}

/// Booleans compare by meaning, so `True` in the source is left alone.
fn set_bool(el: &mut Element, name: &str, value: bool, create: bool) {
    match el.child_text(name) {
        Some(current) if parse_bool(&current) == Some(value) => {}
        Some(_) => el.set_child_text(name, &value.to_string()),
        None if create => el.set_child_text(name, &value.to_string()),
        None => {}
    }
}

fn apply_connector(el: &mut Element, conn: &ConnectorFiles, opts: &AssembleOptions) -> Result<()> {
    set_field(el, "metaDataId", &conn.id, false);
    set_field(el, "name", &conn.name, false);
    set_field(el, "transportName", &conn.transport_kind, false);
    set_field(el, "mode", &conn.mode, false);
    set_bool(el, "enabled", conn.enabled, false);
    if let Some(wait) = conn.wait_for_previous {
        set_bool(el, "waitForPrevious", wait, false);
    }

    let wants_properties = !conn.properties_kind.is_empty()
        || conn.properties_version.is_some()
        || !conn.properties.is_empty();
    if wants_properties || el.child("properties").is_some() {
        let props_el = el.child_or_insert("properties");
        if props_el.attribute("class").unwrap_or_default() != conn.properties_kind {
            let kind = (!conn.properties_kind.is_empty()).then_some(conn.properties_kind.as_str());
            props_el.set_attribute("class", kind);
        }
        props_el.set_attribute("version", conn.properties_version.as_deref());
        match &opts.variables {
            Some(vars) => apply_group(props_el, &substitute_properties(&conn.properties, vars))?,
            None => apply_group(props_el, &conn.properties)?,
        }
    }

    for (field, element) in STEP_ELEMENTS {
        let steps = match field {
            "transformer" => conn.transformer.as_ref(),
            "response_transformer" => conn.response_transformer.as_ref(),
            _ => conn.filter.as_ref(),
        };
        if let Some(steps) = steps {
            let container = el.child_or_insert(element).child_or_insert("elements");
            rebuild_steps(container, steps, opts.step_order);
        }
    }
    Ok(())
}

fn substitute_properties(props: &Properties, vars: &BTreeMap<String, String>) -> Properties {
    fn substitute(value: &PropertyValue, vars: &BTreeMap<String, String>) -> PropertyValue {
        match value {
            PropertyValue::Text(t) => PropertyValue::Text(substitute_once(t, vars)),
            PropertyValue::List(items) => {
                PropertyValue::List(items.iter().map(|v| substitute(v, vars)).collect())
            }
            PropertyValue::Group(map) => PropertyValue::Group(substitute_properties(map, vars)),
        }
    }
    props
        .iter()
        .map(|(k, v)| (k.clone(), substitute(v, vars)))
        .collect()
}

/// Make the element children of `el` match `props`.
fn apply_group(el: &mut Element, props: &Properties) -> Result<()> {
    let mut stale: Vec<String> = Vec::new();
    for child in el.elements() {
        if !props.contains_key(&child.name) && !stale.contains(&child.name) {
            stale.push(child.name.clone());
        }
    }
    for name in stale {
        el.remove_children(&name);
    }
    for (key, value) in props {
        apply_entry(el, key, value)?;
    }
    Ok(())
}

fn apply_entry(parent: &mut Element, key: &str, value: &PropertyValue) -> Result<()> {
    let items: Vec<&PropertyValue> = match value {
        PropertyValue::List(items) => items.iter().collect(),
        single => vec![single],
    };
    let existing = parent.count_named(key);

    for (i, item) in items.iter().enumerate() {
        match parent.nth_named(key, i).and_then(|nth| parent.element_mut(nth)) {
            Some(target) => apply_value(target, key, item)?,
            None => {
                let mut fresh = Element::new(key);
                apply_value(&mut fresh, key, item)?;
                parent.push_element(fresh);
            }
        }
    }
    for n in (items.len()..existing).rev() {
        if let Some(nth) = parent.nth_named(key, n) {
            parent.remove_element(nth);
        }
    }
    Ok(())
}

fn apply_value(el: &mut Element, key: &str, value: &PropertyValue) -> Result<()> {
    match value {
        PropertyValue::Text(text) => {
            if el.has_element_children() || el.text() != *text {
                el.set_text(text);
            }
            Ok(())
        }
        PropertyValue::Group(map) => {
            if !el.has_element_children() {
                el.children.retain(|n| !matches!(n, Node::Text(_) | Node::CData(_)));
            }
            apply_group(el, map)
        }
        PropertyValue::List(_) => Err(ChanvcsError::ShapeMismatch(format!(
            "property '{key}' holds a list directly inside a list"
        ))),
    }
}

fn order_steps(steps: &[Step], order: StepOrder) -> Vec<&Step> {
    match order {
        StepOrder::Sequence => steps.iter().collect(),
        StepOrder::GroupByKind => {
            let mut kinds: Vec<&str> = Vec::new();
            for step in steps {
                if !kinds.contains(&step.kind.as_str()) {
                    kinds.push(&step.kind);
                }
            }
            kinds
                .into_iter()
                .flat_map(|kind| steps.iter().filter(move |s| s.kind == kind))
                .collect()
        }
    }
}

/// Rebuild a step container, reusing the original element at each position
/// when it has the same kind so unmodeled step fields survive.
fn rebuild_steps(container: &mut Element, steps: &[Step], order: StepOrder) {
    let ordered = order_steps(steps, order);
    let current = read_steps(container);
    if current.len() == ordered.len() && current.iter().zip(&ordered).all(|(a, b)| a == *b) {
        return;
    }

    let originals: Vec<Element> = container.elements().cloned().collect();
    let first = container.children.iter().position(|n| n.as_element().is_some());
    let indent = first
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| match &container.children[i] {
            Node::Text(ws) if ws.trim().is_empty() => Some(ws.clone()),
            _ => None,
        });
    let closing = match container.children.last() {
        Some(Node::Text(ws)) if ws.trim().is_empty() && first.is_some() => Some(ws.clone()),
        _ => None,
    };

    let mut children = Vec::with_capacity(ordered.len() * 2 + 1);
    for (i, step) in ordered.iter().enumerate() {
        let (mut el, fresh) = match originals.get(i) {
            Some(original) if original.name == step.kind => (original.clone(), false),
            _ => (Element::new(step.kind.as_str()), true),
        };
        apply_step(&mut el, step, fresh);
        if let Some(ws) = &indent {
            children.push(Node::Text(ws.clone()));
        }
        children.push(Node::Element(el));
    }
    if !children.is_empty() {
        if let Some(ws) = closing {
            children.push(Node::Text(ws));
        }
        container.self_closing = false;
    }
    container.children = children;
}

fn apply_step(el: &mut Element, step: &Step, fresh: bool) {
    el.set_attribute("version", step.kind_version.as_deref());
    set_field(el, "name", &step.name, fresh || !step.name.is_empty());
    set_field(
        el,
        "sequenceNumber",
        &step.sequence_number.to_string(),
        fresh || step.sequence_number != 0,
    );
    set_bool(el, "enabled", step.enabled, fresh || !step.enabled);
    if let Some(operator) = &step.operator {
        el.set_child_text("operator", operator);
    }
    set_field(el, "script", &step.body, fresh || !step.body.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::decompose_str;

    const DOC: &str = "<channel>\n  <id>c</id>\n  <name>n</name>\n  <sourceConnector>\n    <metaDataId>0</metaDataId>\n    <properties class=\"P\" version=\"3.9.0\">\n      <host>h</host>\n      <port>1</port>\n    </properties>\n    <transformer>\n      <elements>\n        <JsStep version=\"1\">\n          <name>a</name>\n          <sequenceNumber>0</sequenceNumber>\n          <enabled>true</enabled>\n          <script>one</script>\n          <extra>kept</extra>\n        </JsStep>\n        <MapStep>\n          <name>b</name>\n          <sequenceNumber>1</sequenceNumber>\n          <enabled>true</enabled>\n        </MapStep>\n        <JsStep>\n          <name>c</name>\n          <sequenceNumber>2</sequenceNumber>\n          <enabled>true</enabled>\n          <script>three</script>\n        </JsStep>\n      </elements>\n    </transformer>\n    <enabled>true</enabled>\n  </sourceConnector>\n  <destinationConnectors/>\n</channel>";

    #[test]
    fn unedited_artifact_reproduces_source() {
        let artifact = decompose_str(DOC).unwrap();
        let out = assemble_to_string(&artifact, &AssembleOptions::default()).unwrap();
        assert_eq!(out, DOC);
    }

    #[test]
    fn only_changed_property_is_rewritten() {
        let mut artifact = decompose_str(DOC).unwrap();
        artifact
            .source
            .properties
            .insert("port".to_string(), PropertyValue::text("2"));
        let out = assemble_to_string(&artifact, &AssembleOptions::default()).unwrap();
        assert_eq!(out, DOC.replace("<port>1</port>", "<port>2</port>"));
    }

    #[test]
    fn added_and_removed_properties() {
        let mut artifact = decompose_str(DOC).unwrap();
        artifact.source.properties.shift_remove("host");
        artifact
            .source
            .properties
            .insert("timeout".to_string(), PropertyValue::text("30"));
        let out = assemble_to_string(&artifact, &AssembleOptions::default()).unwrap();
        assert!(!out.contains("<host>"));
        assert!(out.contains("      <port>1</port>\n      <timeout>30</timeout>\n    </properties>"));
    }

    #[test]
    fn reordered_steps_reuse_elements_by_position() {
        let mut artifact = decompose_str(DOC).unwrap();
        let steps = artifact.source.transformer.as_mut().unwrap();
        steps[0].body = "changed".to_string();
        let out = assemble_to_string(&artifact, &AssembleOptions::default()).unwrap();
        assert!(out.contains("<script>changed</script>"));
        assert!(out.contains("<extra>kept</extra>"));

        let reparsed = decompose_str(&out).unwrap();
        assert_eq!(reparsed.source.transformer, artifact.source.transformer);
    }

    #[test]
    fn group_by_kind_regroups_steps() {
        let mut artifact = decompose_str(DOC).unwrap();
        artifact.source.transformer.as_mut().unwrap()[1].name = "b2".to_string();

        let grouped = AssembleOptions::default().with_step_order(StepOrder::GroupByKind);
        let out = assemble_to_string(&artifact, &grouped).unwrap();
        let kinds: Vec<String> = decompose_str(&out)
            .unwrap()
            .source
            .transformer
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(kinds, vec!["a", "c", "b2"]);

        let sequence = assemble_to_string(&artifact, &AssembleOptions::default()).unwrap();
        let names: Vec<String> = decompose_str(&sequence)
            .unwrap()
            .source
            .transformer
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["a", "b2", "c"]);
    }

    #[test]
    fn destination_count_mismatch_is_shape_error() {
        let mut artifact = decompose_str(DOC).unwrap();
        artifact.destinations.push(artifact.source.clone());
        let err = assemble(&artifact, &AssembleOptions::default()).unwrap_err();
        assert!(matches!(err, ChanvcsError::ShapeMismatch(_)));
    }

    #[test]
    fn assemble_variables_substitute_once() {
        let mut artifact = decompose_str(DOC).unwrap();
        artifact
            .source
            .properties
            .insert("host".to_string(), PropertyValue::text("${HOST:${FALLBACK}}"));
        let mut vars = BTreeMap::new();
        vars.insert("FALLBACK".to_string(), "x".to_string());
        let opts = AssembleOptions::default().with_variables(vars);
        let out = assemble_to_string(&artifact, &opts).unwrap();
        assert!(out.contains("<host>${FALLBACK}</host>"));
    }

    #[test]
    fn fields_missing_from_source_are_never_added() {
        const BARE: &str = "<channel><id>c</id><name>n</name><sourceConnector><name>s</name></sourceConnector><destinationConnectors/></channel>";
        let mut artifact = decompose_str(BARE).unwrap();
        artifact.metadata.revision = Some(3);
        artifact.metadata.description = Some("d".to_string());
        artifact.metadata.enabled = Some(false);
        artifact.source.enabled = false;
        artifact.source.wait_for_previous = Some(true);
        artifact.source.id = "7".to_string();
        artifact.source.transport_kind = "TCP Listener".to_string();
        artifact.source.mode = "SOURCE".to_string();

        let out = assemble_to_string(&artifact, &AssembleOptions::default()).unwrap();
        assert_eq!(out, BARE);
    }

    #[test]
    fn fields_present_in_source_are_rewritten() {
        let mut artifact = decompose_str(DOC).unwrap();
        artifact.metadata.name = "renamed".to_string();
        artifact.source.enabled = false;
        artifact.source.id = "5".to_string();
        let out = assemble_to_string(&artifact, &AssembleOptions::default()).unwrap();
        let expected = DOC
            .replace("<name>n</name>", "<name>renamed</name>")
            .replace("<metaDataId>0</metaDataId>", "<metaDataId>5</metaDataId>")
            .replace(
                "    <enabled>true</enabled>\n  </sourceConnector>",
                "    <enabled>false</enabled>\n  </sourceConnector>",
            );
        assert_eq!(out, expected);
    }

    #[test]
    fn retagging_properties_changes_attributes_only() {
        let mut artifact = decompose_str(DOC).unwrap();
        artifact.source.properties_version = Some("4.0.0".to_string());
        let out = assemble_to_string(&artifact, &AssembleOptions::default()).unwrap();
        assert!(out.contains("<properties class=\"P\" version=\"4.0.0\">"));
    }
}
