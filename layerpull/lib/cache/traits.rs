use crate::{
    oci::{ImageConfig, ImageWithMeta},
    LayerpullResult,
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Layers known to this process, keyed by local layer ID.
#[async_trait::async_trait]
pub trait LayerCache: Send + Sync {
    /// Returns the layer with the given ID.
    async fn get(&self, id: &str) -> LayerpullResult<Option<ImageWithMeta>>;

    /// Stores a layer, replacing any previous record with the same ID.
    async fn insert(&self, layer: ImageWithMeta) -> LayerpullResult<()>;

    /// Removes the layer with the given ID.
    async fn remove(&self, id: &str) -> LayerpullResult<()>;
}

/// Bindings from references and layers to image IDs.
#[async_trait::async_trait]
pub trait RepositoryCache: Send + Sync {
    /// Binds a `name:tag` or `name@digest` reference to an image ID.
    async fn add_reference(&self, reference: &str, image_id: &str) -> LayerpullResult<()>;

    /// Returns the image ID bound to a reference.
    async fn get_image_id(&self, reference: &str) -> LayerpullResult<Option<String>>;

    /// Records which image ID the topmost layer with the given ID belongs to.
    async fn bind_layer(&self, layer_id: &str, image_id: &str) -> LayerpullResult<()>;

    /// Returns the image ID recorded for a layer.
    async fn get_image_id_by_layer(&self, layer_id: &str) -> LayerpullResult<Option<String>>;
}

/// Computed image configs, keyed by image ID.
#[async_trait::async_trait]
pub trait ImageCache: Send + Sync {
    /// Returns the config of the image with the given ID.
    async fn get(&self, image_id: &str) -> LayerpullResult<Option<ImageConfig>>;

    /// Stores a config under its image ID.
    async fn insert(&self, config: &ImageConfig) -> LayerpullResult<()>;
}
