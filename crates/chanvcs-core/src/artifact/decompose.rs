use indexmap::IndexMap;

use super::{
    ChannelMetadata, ConnectorFiles, DecomposedArtifact, Properties, PropertyValue, Scripts, Step,
    StepList,
};
use crate::domain::error::{ChanvcsError, Result};
use crate::xml::{parse_document, Document, Element};

/// `(model name, element name)` of channel scripts.
pub(super) const SCRIPT_ELEMENTS: [(&str, &str); 4] = [
    ("deploy", "deployScript"),
    ("undeploy", "undeployScript"),
    ("preprocess", "preprocessingScript"),
    ("postprocess", "postprocessingScript"),
];

/// `(model name, element name)` of connector step lists.
pub(super) const STEP_ELEMENTS: [(&str, &str); 3] = [
    ("transformer", "transformer"),
    ("response_transformer", "responseTransformer"),
    ("filter", "filter"),
];

pub(super) fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Parse and decompose a channel document.
pub fn decompose_str(xml: &str) -> Result<DecomposedArtifact> {
    decompose(parse_document(xml)?)
}

/// Split a channel document into the structured model.
pub fn decompose(doc: Document) -> Result<DecomposedArtifact> {
    let root = &doc.root;
    if root.name != "channel" {
        return Err(ChanvcsError::MalformedArtifact(format!(
            "root element is <{}>, expected <channel>",
            root.name
        )));
    }
    let id = root
        .child_text("id")
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ChanvcsError::MalformedArtifact("channel has no <id>".to_string()))?;
    let source_el = root.child("sourceConnector").ok_or_else(|| {
        ChanvcsError::MalformedArtifact(format!("channel '{id}' has no <sourceConnector>"))
    })?;

    let metadata = ChannelMetadata {
        name: root.child_text("name").unwrap_or_default(),
        revision: root
            .child_text("revision")
            .and_then(|r| r.trim().parse().ok()),
        description: root.child_text("description"),
        enabled: read_enabled(root),
        id,
    };

    let source = read_connector(source_el);
    let destinations = root
        .child("destinationConnectors")
        .map(|list| {
            list.elements()
                .filter(|el| el.name == "connector")
                .map(read_connector)
                .collect()
        })
        .unwrap_or_default();

    let mut scripts = Scripts::default();
    for (name, element) in SCRIPT_ELEMENTS {
        if let Some(slot) = scripts.get_mut(name) {
            *slot = root.child_text(element);
        }
    }

    Ok(DecomposedArtifact {
        raw_tree: doc,
        metadata,
        source,
        destinations,
        scripts,
    })
}

/// Channel `<enabled>`, falling back to `exportData/metadata/enabled`.
pub(super) fn read_enabled(root: &Element) -> Option<bool> {
    root.child_text("enabled")
        .or_else(|| {
            root.descendant("exportData/metadata/enabled")
                .map(Element::text)
        })
        .and_then(|t| parse_bool(&t))
}

pub(super) fn read_connector(el: &Element) -> ConnectorFiles {
    let properties_el = el.child("properties");
    let mut connector = ConnectorFiles {
        name: el.child_text("name").unwrap_or_default(),
        id: el.child_text("metaDataId").unwrap_or_default().trim().to_string(),
        transport_kind: el.child_text("transportName").unwrap_or_default(),
        mode: el.child_text("mode").unwrap_or_default(),
        enabled: el
            .child_text("enabled")
            .and_then(|t| parse_bool(&t))
            .unwrap_or(true),
        wait_for_previous: el
            .child_text("waitForPrevious")
            .and_then(|t| parse_bool(&t)),
        properties_kind: properties_el
            .and_then(|p| p.attribute("class"))
            .unwrap_or_default(),
        properties_version: properties_el.and_then(|p| p.attribute("version")),
        properties: properties_el.map(read_properties).unwrap_or_default(),
        transformer: None,
        response_transformer: None,
        filter: None,
    };
    for (field, element) in STEP_ELEMENTS {
        let steps = el
            .child(element)
            .and_then(|container| container.child("elements"))
            .map(read_steps);
        match field {
            "transformer" => connector.transformer = steps,
            "response_transformer" => connector.response_transformer = steps,
            _ => connector.filter = steps,
        }
    }
    connector
}

/// Child elements of `el` as an ordered property map.
pub(super) fn read_properties(el: &Element) -> Properties {
    let mut grouped: IndexMap<&str, Vec<PropertyValue>> = IndexMap::new();
    for child in el.elements() {
        grouped
            .entry(child.name.as_str())
            .or_default()
            .push(read_property_value(child));
    }
    grouped
        .into_iter()
        .map(|(name, mut values)| {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                PropertyValue::List(values)
            };
            (name.to_string(), value)
        })
        .collect()
}

pub(super) fn read_property_value(el: &Element) -> PropertyValue {
    if el.has_element_children() {
        PropertyValue::Group(read_properties(el))
    } else {
        PropertyValue::Text(el.text())
    }
}

pub(super) fn read_steps(elements: &Element) -> StepList {
    elements.elements().map(read_step).collect()
}

pub(super) fn read_step(el: &Element) -> Step {
    Step {
        kind: el.name.clone(),
        kind_version: el.attribute("version"),
        name: el.child_text("name").unwrap_or_default(),
        sequence_number: el
            .child_text("sequenceNumber")
            .and_then(|n| n.trim().parse().ok())
            .unwrap_or_default(),
        enabled: el
            .child_text("enabled")
            .and_then(|t| parse_bool(&t))
            .unwrap_or(true),
        operator: el.child_text("operator"),
        body: el.child_text("script").unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHANNEL: &str = r#"<channel version="3.9.0">
  <id>ch-1</id>
  <name>ADT Inbound</name>
  <description>Receives ADT</description>
  <revision>7</revision>
  <sourceConnector version="3.9.0">
    <metaDataId>0</metaDataId>
    <name>sourceConnector</name>
    <properties class="com.mirth.connect.connectors.tcp.TcpReceiverProperties" version="3.9.0">
      <listenerConnectorProperties>
        <host>0.0.0.0</host>
        <port>${ADT_PORT:6661}</port>
      </listenerConnectorProperties>
      <charsetEncoding>DEFAULT_ENCODING</charsetEncoding>
    </properties>
    <filter version="3.9.0">
      <elements>
        <com.mirth.connect.plugins.rulebuilder.RuleBuilderRule version="3.9.0">
          <name>Only ADT</name>
          <sequenceNumber>0</sequenceNumber>
          <enabled>true</enabled>
          <operator>NONE</operator>
          <script>return true;</script>
        </com.mirth.connect.plugins.rulebuilder.RuleBuilderRule>
      </elements>
    </filter>
    <transportName>TCP Listener</transportName>
    <mode>SOURCE</mode>
    <enabled>true</enabled>
    <waitForPrevious>true</waitForPrevious>
  </sourceConnector>
  <destinationConnectors>
    <connector version="3.9.0">
      <metaDataId>1</metaDataId>
      <name>To File</name>
      <properties class="com.mirth.connect.connectors.file.FileDispatcherProperties" version="3.9.0">
        <host>/data/out</host>
        <headers>
          <entry><string>a</string><string>1</string></entry>
          <entry><string>b</string><string>2</string></entry>
        </headers>
      </properties>
      <transportName>File Writer</transportName>
      <mode>DESTINATION</mode>
      <enabled>false</enabled>
    </connector>
  </destinationConnectors>
  <deployScript>return;</deployScript>
  <exportData>
    <metadata>
      <enabled>true</enabled>
    </metadata>
  </exportData>
</channel>"#;

    #[test]
    fn decomposes_metadata_and_connectors() {
        let artifact = decompose_str(CHANNEL).unwrap();
        assert_eq!(artifact.metadata.id, "ch-1");
        assert_eq!(artifact.metadata.name, "ADT Inbound");
        assert_eq!(artifact.metadata.revision, Some(7));
        assert_eq!(artifact.metadata.description.as_deref(), Some("Receives ADT"));
        assert_eq!(artifact.metadata.enabled, Some(true));

        let source = &artifact.source;
        assert_eq!(source.transport_kind, "TCP Listener");
        assert_eq!(source.wait_for_previous, Some(true));
        assert_eq!(
            source.properties_kind,
            "com.mirth.connect.connectors.tcp.TcpReceiverProperties"
        );
        let listener = match &source.properties["listenerConnectorProperties"] {
            PropertyValue::Group(g) => g,
            other => panic!("expected group, got {other:?}"),
        };
        assert_eq!(listener["port"], PropertyValue::text("${ADT_PORT:6661}"));

        let filter = source.filter.as_ref().unwrap();
        assert_eq!(filter.len(), 1);
        assert_eq!(filter[0].operator.as_deref(), Some("NONE"));
        assert_eq!(filter[0].body, "return true;");
        assert_eq!(filter[0].kind_version.as_deref(), Some("3.9.0"));
        assert!(source.transformer.is_none());

        assert_eq!(artifact.destinations.len(), 1);
        let dest = &artifact.destinations[0];
        assert!(!dest.enabled);
        assert_eq!(dest.id, "1");
        match &dest.properties["headers"] {
            PropertyValue::Group(headers) => match &headers["entry"] {
                PropertyValue::List(entries) => assert_eq!(entries.len(), 2),
                other => panic!("expected list, got {other:?}"),
            },
            other => panic!("expected group, got {other:?}"),
        }

        assert_eq!(artifact.scripts.deploy.as_deref(), Some("return;"));
        assert!(artifact.scripts.undeploy.is_none());
    }

    #[test]
    fn non_channel_root_is_malformed() {
        let err = decompose_str("<codeTemplate><id>x</id></codeTemplate>").unwrap_err();
        assert!(matches!(err, ChanvcsError::MalformedArtifact(_)));
    }

    #[test]
    fn missing_id_or_source_is_malformed() {
        assert!(matches!(
            decompose_str("<channel><sourceConnector/></channel>"),
            Err(ChanvcsError::MalformedArtifact(_))
        ));
        assert!(matches!(
            decompose_str("<channel><id>x</id></channel>"),
            Err(ChanvcsError::MalformedArtifact(_))
        ));
    }

    #[test]
    fn channel_level_enabled_wins_over_export_data() {
        let xml = "<channel><id>x</id><enabled>false</enabled><sourceConnector/><exportData><metadata><enabled>true</enabled></metadata></exportData></channel>";
        assert_eq!(decompose_str(xml).unwrap().metadata.enabled, Some(false));
    }
}
