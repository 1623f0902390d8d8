use tokio::io::AsyncRead;

use crate::{oci::ImageWithMeta, LayerpullResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A boxed tar stream handed to an [`ImageStoreBackend`].
pub type LayerReader = Box<dyn AsyncRead + Send + Unpin>;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The backend that persists unpacked layers.
#[async_trait::async_trait]
pub trait ImageStoreBackend: Send + Sync {
    /// A human-readable address of the backend, used in errors and logs.
    fn address(&self) -> String;

    /// Checks that the backend is reachable and usable.
    async fn ping(&self) -> LayerpullResult<()>;

    /// Returns true if the layer is already unpacked in the named store.
    async fn has_layer(&self, store: &str, layer_id: &str) -> LayerpullResult<bool>;

    /// Unpacks a layer's tar stream into the named store.
    async fn write_image(
        &self,
        store: &str,
        layer: &ImageWithMeta,
        reader: LayerReader,
    ) -> LayerpullResult<()>;
}

/// Provides a stable identifier for this host, used to name its store.
#[async_trait::async_trait]
pub trait HostIdentity: Send + Sync {
    /// Returns the identifier, or an empty string when the host has none.
    async fn identity(&self) -> LayerpullResult<String>;
}
