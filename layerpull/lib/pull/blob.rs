use std::{path::Path, sync::Arc};

use tokio::fs;

use crate::{
    oci::ImageWithMeta,
    store::ImageStoreBackend,
    utils::LAYER_TAR_EXTENSION,
    LayerpullError, LayerpullResult,
};

use super::{layer_directory, ProgressOutput, ProgressReader, PullContext};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Writes a downloaded layer's tar into the image store.
///
/// Reads `{destination}/{id}/{id}.tar`. With `cleanup`, the whole scratch directory is removed
/// once the layer is written. On failure nothing is removed.
pub async fn write_image_blob(
    ctx: &PullContext,
    store: &dyn ImageStoreBackend,
    layer: &ImageWithMeta,
    destination: &Path,
    progress: Arc<dyn ProgressOutput>,
    cleanup: bool,
) -> LayerpullResult<()> {
    let id = layer.get_id();
    let tar_path = layer_directory(destination, id).join(format!("{id}.{LAYER_TAR_EXTENSION}"));

    let file = fs::File::open(&tar_path)
        .await
        .map_err(|e| LayerpullError::blob_write(id.as_str(), format!("failed to open file: {e}")))?;
    let size = file
        .metadata()
        .await
        .map_err(|e| LayerpullError::blob_write(id.as_str(), format!("failed to stat file: {e}")))?
        .len();

    let reader = ProgressReader::new(
        file,
        progress.clone(),
        id.as_str(),
        "Extracting",
        size,
        ctx.token().clone(),
    );

    ctx.run(store.write_image(layer.get_store(), layer, Box::new(reader)))
        .await
        .map_err(|e| match e {
            e @ LayerpullError::BlobWrite { .. } => e,
            e => LayerpullError::blob_write(
                id.as_str(),
                format!("failed to write to image store: {e}"),
            ),
        })?;

    progress.message(id, "Pull complete");

    if cleanup {
        fs::remove_dir_all(destination).await.map_err(|e| {
            LayerpullError::blob_write(
                id.as_str(),
                format!("failed to remove download directory: {e}"),
            )
        })?;
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
