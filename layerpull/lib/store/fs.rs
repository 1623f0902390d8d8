use std::path::PathBuf;

use tokio::fs;
use tokio_util::io::SyncIoBridge;

use crate::{
    oci::ImageWithMeta,
    utils::{LAYER_META_EXTENSION, LAYER_PARTIAL_EXTENSION},
    LayerpullError, LayerpullResult,
};

use super::{ImageStoreBackend, LayerReader};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An image store on the local filesystem.
///
/// Layers are unpacked to `{root}/{store}/{layer id}`, with the layer record written to
/// `{root}/{store}/{layer id}.meta.json`. A layer directory only appears once fully unpacked.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FsImageStore {
    /// Creates a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the directory a layer is unpacked to.
    pub fn layer_path(&self, store: &str, layer_id: &str) -> PathBuf {
        self.root.join(store).join(layer_id)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl ImageStoreBackend for FsImageStore {
    fn address(&self) -> String {
        self.root.display().to_string()
    }

    async fn ping(&self) -> LayerpullResult<()> {
        let unusable = |reason: String| LayerpullError::BackendUnreachable {
            host: self.address(),
            reason,
        };

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| unusable(e.to_string()))?;

        let metadata = fs::metadata(&self.root)
            .await
            .map_err(|e| unusable(e.to_string()))?;
        if metadata.permissions().readonly() {
            return Err(unusable("store root is read-only".into()));
        }

        Ok(())
    }

    async fn has_layer(&self, store: &str, layer_id: &str) -> LayerpullResult<bool> {
        Ok(fs::try_exists(self.layer_path(store, layer_id)).await?)
    }

    async fn write_image(
        &self,
        store: &str,
        layer: &ImageWithMeta,
        reader: LayerReader,
    ) -> LayerpullResult<()> {
        let id = layer.get_id();
        let store_dir = self.root.join(store);
        let final_path = store_dir.join(id);
        let partial_path = store_dir.join(format!("{id}.{LAYER_PARTIAL_EXTENSION}"));
        let meta_path = store_dir.join(format!("{id}.{LAYER_META_EXTENSION}"));

        if fs::try_exists(&partial_path).await? {
            fs::remove_dir_all(&partial_path).await?;
        }
        fs::create_dir_all(&partial_path).await?;

        let bridge = SyncIoBridge::new(reader);
        let unpack_path = partial_path.clone();
        tokio::task::spawn_blocking(move || tar::Archive::new(bridge).unpack(&unpack_path))
            .await?
            .map_err(|e| LayerpullError::blob_write(id.as_str(), e))?;

        fs::write(&meta_path, serde_json::to_vec(layer)?).await?;

        if fs::try_exists(&final_path).await? {
            fs::remove_dir_all(&final_path).await?;
        }
        fs::rename(&partial_path, &final_path).await?;

        tracing::debug!(layer = %id, path = %final_path.display(), "layer unpacked");

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
