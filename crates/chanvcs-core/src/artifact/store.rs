//! Reading and writing artifacts in an environment tree.

use std::collections::BTreeSet;

use chanvcs_state::FileStore;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::layout::{self, validate_channel_id};
use super::{
    assemble, decompose, AssembleOptions, ChannelMetadata, ConnectorFiles, DecomposedArtifact,
};
use crate::domain::error::{ChanvcsError, Result};
use crate::xml::{parse_document, write_document};

fn to_utf8(path: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| ChanvcsError::ConfigurationInvalid {
        path: path.to_string(),
        reason: format!("not utf-8: {e}"),
    })
}

async fn read_yaml<T: DeserializeOwned>(store: &dyn FileStore, path: &str) -> Result<Option<T>> {
    let Some(bytes) = store.read_file(path).await? else {
        return Ok(None);
    };
    serde_yaml::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ChanvcsError::ConfigurationInvalid {
            path: path.to_string(),
            reason: e.to_string(),
        })
}

/// Channel ids stored under `<tree>/channels/`, sorted.
pub async fn list_channel_ids(store: &dyn FileStore, tree: &str) -> Result<Vec<String>> {
    let files = store.list_files(&layout::channels_dir(tree)).await?;
    let ids: BTreeSet<String> = files
        .iter()
        .filter(|p| p.ends_with(&format!("/{}", layout::CHANNEL_XML)))
        .filter_map(|p| layout::channel_id_of(tree, p))
        .collect();
    Ok(ids.into_iter().collect())
}

/// Load a stored artifact. `None` when the channel has no `channel.xml`.
///
/// `channel.xml` provides the raw tree; the YAML and script files, when
/// present, override the fields decomposed from it.
#[instrument(skip(store), fields(tree = %tree, channel_id = %id))]
pub async fn read_artifact(
    store: &dyn FileStore,
    tree: &str,
    id: &str,
) -> Result<Option<DecomposedArtifact>> {
    validate_channel_id(id)?;
    let xml_path = layout::channel_file(tree, id, layout::CHANNEL_XML);
    let Some(bytes) = store.read_file(&xml_path).await? else {
        return Ok(None);
    };
    let doc = parse_document(&to_utf8(&xml_path, bytes)?)?;
    let mut artifact = decompose(doc)?;

    if let Some(metadata) =
        read_yaml::<ChannelMetadata>(store, &layout::channel_file(tree, id, layout::CHANNEL_YAML))
            .await?
    {
        artifact.metadata = metadata;
    }
    if let Some(source) =
        read_yaml::<ConnectorFiles>(store, &layout::channel_file(tree, id, layout::SOURCE_YAML))
            .await?
    {
        artifact.source = source;
    }

    let dest_dir = layout::channel_file(tree, id, layout::DESTINATIONS_DIR);
    let mut dest_files: Vec<String> = store
        .list_files(&dest_dir)
        .await?
        .into_iter()
        .filter(|p| p.ends_with(".yaml"))
        .collect();
    // numeric, not lexicographic: `100-x` deploys after `11-y`
    dest_files.sort_by_key(|p| (layout::destination_index(p).unwrap_or(usize::MAX), p.clone()));
    if !dest_files.is_empty() {
        let mut destinations = Vec::with_capacity(dest_files.len());
        for path in &dest_files {
            if let Some(dest) = read_yaml::<ConnectorFiles>(store, path).await? {
                destinations.push(dest);
            }
        }
        artifact.destinations = destinations;
    }

    let script_names: Vec<&str> = artifact.scripts.entries().iter().map(|(n, _)| *n).collect();
    for name in script_names {
        let path = layout::script_file(tree, id, name);
        if let Some(bytes) = store.read_file(&path).await? {
            let script = to_utf8(&path, bytes)?;
            if let Some(slot) = artifact.scripts.get_mut(name) {
                *slot = Some(script);
            }
        }
    }

    if artifact.metadata.id != id {
        return Err(ChanvcsError::MalformedArtifact(format!(
            "artifact in directory '{id}' declares id '{}'",
            artifact.metadata.id
        )));
    }
    debug!(destinations = artifact.destinations.len(), "artifact loaded");
    Ok(Some(artifact))
}

/// Write an artifact under `<tree>/channels/<id>/`, removing files of the
/// channel that are no longer produced. Returns the written paths.
///
/// `channel.xml` is the model assembled onto the raw tree, so the stored
/// document always agrees with the YAML files.
#[instrument(skip(store, artifact), fields(tree = %tree, channel_id = %artifact.id()))]
pub async fn write_artifact(
    store: &dyn FileStore,
    tree: &str,
    artifact: &DecomposedArtifact,
) -> Result<Vec<String>> {
    let id = artifact.id();
    validate_channel_id(id)?;

    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    let doc = assemble(artifact, &AssembleOptions::default())?;
    files.push((
        layout::channel_file(tree, id, layout::CHANNEL_XML),
        write_document(&doc).into_bytes(),
    ));
    files.push((
        layout::channel_file(tree, id, layout::CHANNEL_YAML),
        serde_yaml::to_string(&artifact.metadata)?.into_bytes(),
    ));
    files.push((
        layout::channel_file(tree, id, layout::SOURCE_YAML),
        serde_yaml::to_string(&artifact.source)?.into_bytes(),
    ));
    for (i, dest) in artifact.destinations.iter().enumerate() {
        let name = layout::destination_file_name(i, &dest.name);
        files.push((
            layout::channel_file(tree, id, &format!("{}/{name}", layout::DESTINATIONS_DIR)),
            serde_yaml::to_string(dest)?.into_bytes(),
        ));
    }
    for (name, script) in artifact.scripts.entries() {
        if let Some(script) = script {
            files.push((layout::script_file(tree, id, name), script.clone().into_bytes()));
        }
    }

    let produced: BTreeSet<&str> = files.iter().map(|(p, _)| p.as_str()).collect();
    for existing in store.list_files(&layout::channel_dir(tree, id)).await? {
        if !produced.contains(existing.as_str()) {
            debug!(path = %existing, "removing stale artifact file");
            store.remove_file(&existing).await?;
        }
    }

    let mut written = Vec::with_capacity(files.len());
    for (path, data) in files {
        let unchanged = store.read_file(&path).await?.as_deref() == Some(data.as_slice());
        if !unchanged {
            store.write_file(&path, &data).await?;
        }
        written.push(path);
    }
    Ok(written)
}

/// Delete every file of a stored channel.
pub async fn remove_artifact(store: &dyn FileStore, tree: &str, id: &str) -> Result<usize> {
    validate_channel_id(id)?;
    let files = store.list_files(&layout::channel_dir(tree, id)).await?;
    for path in &files {
        store.remove_file(path).await?;
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{decompose_str, PropertyValue};
    use chanvcs_state::fakes::MemoryRepository;

    const DOC: &str = "<channel>\n  <id>c1</id>\n  <name>Inbound</name>\n  <sourceConnector>\n    <properties class=\"S\">\n      <port>6661</port>\n    </properties>\n  </sourceConnector>\n  <destinationConnectors>\n    <connector>\n      <metaDataId>1</metaDataId>\n      <name>To DB</name>\n      <properties class=\"D\">\n        <url>jdbc://db</url>\n      </properties>\n    </connector>\n    <connector>\n      <metaDataId>2</metaDataId>\n      <name>To File</name>\n      <properties class=\"F\">\n        <dir>/out</dir>\n      </properties>\n    </connector>\n  </destinationConnectors>\n  <deployScript>return;</deployScript>\n</channel>";

    #[tokio::test]
    async fn destination_order_survives_three_digit_indices() {
        let connectors: String = (0..=100)
            .map(|i| {
                format!(
                    "<connector><metaDataId>{}</metaDataId><name>d{i}</name><properties class=\"D\"><n>{i}</n></properties></connector>",
                    i + 1
                )
            })
            .collect();
        let doc = format!(
            "<channel><id>wide</id><sourceConnector><name>s</name></sourceConnector><destinationConnectors>{connectors}</destinationConnectors></channel>"
        );

        let repo = MemoryRepository::new();
        let artifact = decompose_str(&doc).unwrap();
        assert_eq!(artifact.destinations.len(), 101);
        write_artifact(&repo, "t", &artifact).await.unwrap();

        let loaded = read_artifact(&repo, "t", "wide").await.unwrap().unwrap();
        let names: Vec<String> = loaded.destinations.iter().map(|d| d.name.clone()).collect();
        let expected: Vec<String> = (0..=100).map(|i| format!("d{i}")).collect();
        assert_eq!(names, expected);

        let out = crate::artifact::assemble_to_string(&loaded, &AssembleOptions::default()).unwrap();
        assert_eq!(out, doc);
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let repo = MemoryRepository::new();
        let artifact = decompose_str(DOC).unwrap();
        let written = write_artifact(&repo, "staging", &artifact).await.unwrap();
        assert!(written.contains(&"staging/channels/c1/destinations/00-to-db.yaml".to_string()));
        assert!(written.contains(&"staging/channels/c1/destinations/01-to-file.yaml".to_string()));
        assert!(written.contains(&"staging/channels/c1/scripts/deploy.js".to_string()));

        let stored = repo
            .read_file("staging/channels/c1/channel.xml")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(String::from_utf8(stored).unwrap(), DOC);

        let loaded = read_artifact(&repo, "staging", "c1").await.unwrap().unwrap();
        assert_eq!(loaded.metadata, artifact.metadata);
        assert_eq!(loaded.source, artifact.source);
        assert_eq!(loaded.destinations, artifact.destinations);
        assert_eq!(loaded.scripts, artifact.scripts);

        assert_eq!(list_channel_ids(&repo, "staging").await.unwrap(), vec!["c1"]);
        assert!(read_artifact(&repo, "staging", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn yaml_edits_override_channel_xml() {
        let repo = MemoryRepository::new();
        let artifact = decompose_str(DOC).unwrap();
        write_artifact(&repo, "t", &artifact).await.unwrap();

        repo.write_file(
            "t/channels/c1/destinations/00-to-db.yaml",
            b"name: To DB\nid: '1'\ntransport_kind: ''\nproperties_kind: D\nproperties:\n  url: jdbc://${DB_HOST}\n",
        )
        .await
        .unwrap();
        let loaded = read_artifact(&repo, "t", "c1").await.unwrap().unwrap();
        assert_eq!(
            loaded.destinations[0].properties["url"],
            PropertyValue::text("jdbc://${DB_HOST}")
        );
    }

    #[tokio::test]
    async fn stale_destination_files_are_removed() {
        let repo = MemoryRepository::new();
        let mut artifact = decompose_str(DOC).unwrap();
        write_artifact(&repo, "t", &artifact).await.unwrap();

        artifact.destinations[1].name = "Archive".to_string();
        write_artifact(&repo, "t", &artifact).await.unwrap();
        let files = repo.list_files("t/channels/c1/destinations").await.unwrap();
        assert_eq!(
            files,
            vec![
                "t/channels/c1/destinations/00-to-db.yaml".to_string(),
                "t/channels/c1/destinations/01-archive.yaml".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn mismatched_directory_id_is_malformed() {
        let repo = MemoryRepository::new();
        repo.write_file("t/channels/other/channel.xml", DOC.as_bytes())
            .await
            .unwrap();
        let err = read_artifact(&repo, "t", "other").await.unwrap_err();
        assert!(matches!(err, ChanvcsError::MalformedArtifact(_)));
    }

    #[tokio::test]
    async fn remove_artifact_deletes_all_files() {
        let repo = MemoryRepository::new();
        write_artifact(&repo, "t", &decompose_str(DOC).unwrap())
            .await
            .unwrap();
        assert!(remove_artifact(&repo, "t", "c1").await.unwrap() > 0);
        assert!(list_channel_ids(&repo, "t").await.unwrap().is_empty());
    }
}
