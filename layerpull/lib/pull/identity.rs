use sha2::{Digest, Sha256};

use crate::{
    cache::{ImageCache, RepositoryCache},
    oci::{
        to_engine_json, CanonicalImage, History, ImageConfig, ImageWithMeta,
        LayerConfigAccumulator, ManifestV1, Reference, RootFs, V1Image, EMPTY_LAYER_DIFF_ID,
    },
    LayerpullError, LayerpullResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the image config of a pulled layer chain, newest layer first.
///
/// When the repository cache already binds the topmost layer to an image whose config is in the
/// image cache, that config is returned as is.
pub async fn create_image_config(
    layers: &[ImageWithMeta],
    manifest: &ManifestV1,
    digest: &str,
    reference: &Reference,
    repositories: &dyn RepositoryCache,
    images: &dyn ImageCache,
) -> LayerpullResult<ImageConfig> {
    let top = top_layer(layers)?;

    if let Some(image_id) = repositories.get_image_id_by_layer(top.get_id()).await? {
        if let Some(config) = images.get(&image_id).await? {
            tracing::debug!(layer = %top, image_id = %image_id, "image config found in cache");
            return Ok(config);
        }
    }

    compute_image_config(layers, manifest, digest, reference)
}

/// Computes the image config and image ID of a layer chain, newest layer first.
///
/// The layers' documents are folded oldest first. Every layer adds one history entry, and every
/// layer whose diff ID is not [`EMPTY_LAYER_DIFF_ID`] adds its diff ID to the root filesystem.
/// The image ID is the SHA-256 of the canonical encoding of the folded document together with
/// the root filesystem and history.
pub fn compute_image_config(
    layers: &[ImageWithMeta],
    manifest: &ManifestV1,
    digest: &str,
    reference: &Reference,
) -> LayerpullResult<ImageConfig> {
    let top = top_layer(layers)?;

    let mut accumulator = LayerConfigAccumulator::new();
    let mut rootfs = RootFs::new();
    let mut history = Vec::with_capacity(layers.len());
    let mut size = 0;

    for layer in layers.iter().rev() {
        let unmarshall_error = |e: LayerpullError| {
            LayerpullError::manifest_decode(
                format!("layer history of {layer}"),
                format!("Failed to unmarshall layer history: {e}"),
            )
        };

        accumulator.apply(layer.get_meta()).map_err(unmarshall_error)?;
        let image = accumulator.image().map_err(unmarshall_error)?;

        let empty_layer = layer.get_diff_id() == EMPTY_LAYER_DIFF_ID;
        if !empty_layer {
            rootfs.diff_ids.push(layer.get_diff_id().clone());
        }

        history.push(History {
            created: image.created,
            author: image.author,
            created_by: image.container_config.cmd.join(),
            comment: image.comment,
            empty_layer,
        });
        size += layer.get_size();
    }

    let image = accumulator.image()?;
    let canonical = CanonicalImage {
        architecture: &image.architecture,
        author: &image.author,
        comment: &image.comment,
        config: image.config.as_ref(),
        container: &image.container,
        container_config: &image.container_config,
        created: image.created,
        docker_version: &image.docker_version,
        history: &history,
        os: &image.os,
        rootfs: &rootfs,
    };

    let image_id = hex::encode(Sha256::digest(to_engine_json(&canonical)?));
    tracing::info!("Image ID: sha256:{image_id}");

    let v1_image = V1Image {
        id: top.get_id().clone(),
        size,
        ..image
    };

    Ok(ImageConfig::new(
        v1_image,
        image_id,
        vec![digest.to_string()],
        vec![reference.get_tag().clone()],
        manifest.get_name().clone(),
        history,
        reference.to_string(),
    ))
}

fn top_layer(layers: &[ImageWithMeta]) -> LayerpullResult<&ImageWithMeta> {
    layers
        .first()
        .ok_or_else(|| LayerpullError::manifest_decode("layer chain", "image has no layers"))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
