use serde::Deserialize;

use crate::{
    cache::LayerCache,
    oci::{ImageWithMeta, ManifestV1, SCRATCH_LAYER_ID},
    LayerpullError, LayerpullResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The fields of a per-layer image document that link layers together.
#[derive(Debug, Default, Deserialize)]
struct LayerLink {
    #[serde(default)]
    id: String,

    #[serde(default)]
    parent: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the layer records of a schema 1 manifest, index-aligned with it (newest first).
///
/// Entries are decoded oldest first. A layer the cache already holds, and that is not being
/// downloaded, is taken from the cache instead.
pub async fn layers_to_download(
    manifest: &ManifestV1,
    store: &str,
    cache: &dyn LayerCache,
) -> LayerpullResult<Vec<ImageWithMeta>> {
    manifest.validate()?;

    let history = manifest.get_history();
    let fs_layers = manifest.get_fs_layers();
    let mut layers = Vec::with_capacity(history.len());

    for i in (0..history.len()).rev() {
        let meta = &history[i].v1_compatibility;
        let link: LayerLink = serde_json::from_str(meta).map_err(|e| {
            LayerpullError::manifest_decode(
                format!(
                    "history entry {i} of {}:{}",
                    manifest.get_name(),
                    manifest.get_tag()
                ),
                e,
            )
        })?;

        if link.id.is_empty() {
            return Err(LayerpullError::manifest_decode(
                format!(
                    "history entry {i} of {}:{}",
                    manifest.get_name(),
                    manifest.get_tag()
                ),
                "layer has no id",
            ));
        }

        let parent = if link.parent.is_empty() {
            SCRATCH_LAYER_ID.to_string()
        } else {
            link.parent
        };

        let layer = match cache.get(&link.id).await? {
            Some(cached) if !cached.get_downloading() => {
                tracing::debug!(layer = %link.id, "layer found in cache");
                cached
            }
            _ => ImageWithMeta::builder()
                .id(link.id)
                .parent(parent)
                .store(store)
                .layer(fs_layers[i].clone())
                .meta(meta.clone())
                .build(),
        };

        layers.push(layer);
    }

    layers.reverse();
    Ok(layers)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::{
        cache::MemoryLayerCache,
        oci::{FsLayer, V1Compatibility},
        ErrorKind,
    };

    use super::*;

    fn manifest(entries: &[(&str, &str)]) -> ManifestV1 {
        let fs_layers = entries
            .iter()
            .map(|(id, _)| FsLayer {
                blob_sum: format!("sha256:{id}"),
            })
            .collect();
        let history = entries
            .iter()
            .map(|(id, parent)| V1Compatibility {
                v1_compatibility: format!(r#"{{"id":"{id}","parent":"{parent}"}}"#),
            })
            .collect();
        ManifestV1::new("library/busybox", "latest", fs_layers, history)
    }

    #[tokio::test]
    async fn test_layers_are_index_aligned_and_chain_to_scratch() -> anyhow::Result<()> {
        let manifest = manifest(&[("c", "b"), ("b", "a"), ("a", "")]);
        let cache = MemoryLayerCache::new();

        let layers = layers_to_download(&manifest, "default", &cache).await?;
        assert_eq!(layers.len(), 3);

        let ids: Vec<_> = layers.iter().map(|l| l.get_id().as_str()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
        for (layer, fs_layer) in layers.iter().zip(manifest.get_fs_layers()) {
            assert_eq!(layer.get_layer(), fs_layer);
            assert_eq!(layer.get_store(), "default");
        }

        let parents: HashMap<_, _> = layers
            .iter()
            .map(|l| (l.get_id().as_str(), l.get_parent().as_str()))
            .collect();
        let mut current = "c";
        let mut hops = 0;
        while current != SCRATCH_LAYER_ID {
            current = parents[current];
            hops += 1;
            assert!(hops <= layers.len());
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_layers_substitute_finished_cache_entries() -> anyhow::Result<()> {
        let manifest = manifest(&[("top", "base"), ("base", "")]);
        let cache = MemoryLayerCache::new();

        let finished = ImageWithMeta::builder()
            .id("base")
            .parent(SCRATCH_LAYER_ID)
            .store("other")
            .diff_id("sha256:beef")
            .layer(FsLayer::default())
            .meta("{}")
            .size(99)
            .build();
        let in_progress = ImageWithMeta::builder()
            .id("top")
            .parent("base")
            .store("other")
            .layer(FsLayer::default())
            .meta("{}")
            .downloading(true)
            .build();
        cache.insert(finished.clone()).await?;
        cache.insert(in_progress).await?;

        let layers = layers_to_download(&manifest, "default", &cache).await?;
        assert_eq!(layers[1], finished);
        assert_eq!(layers[0].get_store(), "default");
        assert!(!layers[0].get_downloading());

        Ok(())
    }

    #[tokio::test]
    async fn test_layers_reject_malformed_history() {
        let mut bad = manifest(&[("top", "base"), ("base", "")]);
        bad = ManifestV1::new(
            bad.get_name().clone(),
            bad.get_tag().clone(),
            bad.get_fs_layers().clone(),
            vec![
                V1Compatibility {
                    v1_compatibility: "{not json".into(),
                },
                bad.get_history()[1].clone(),
            ],
        );

        let err = layers_to_download(&bad, "default", &MemoryLayerCache::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ManifestDecode);
        assert!(err.to_string().contains("history entry 0"));
    }
}
