use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::{
    oci::{ImageConfig, ImageWithMeta},
    LayerpullResult,
};

use super::{ImageCache, LayerCache, RepositoryCache};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A [`LayerCache`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryLayerCache {
    layers: RwLock<HashMap<String, ImageWithMeta>>,
}

/// A [`RepositoryCache`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryRepositoryCache {
    references: RwLock<HashMap<String, String>>,
    layers: RwLock<HashMap<String, String>>,
}

/// An [`ImageCache`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryImageCache {
    images: RwLock<HashMap<String, ImageConfig>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryLayerCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of cached layers.
    pub async fn len(&self) -> usize {
        self.layers.read().await.len()
    }

    /// Returns true when no layer is cached.
    pub async fn is_empty(&self) -> bool {
        self.layers.read().await.is_empty()
    }
}

impl MemoryRepositoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryImageCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl LayerCache for MemoryLayerCache {
    async fn get(&self, id: &str) -> LayerpullResult<Option<ImageWithMeta>> {
        Ok(self.layers.read().await.get(id).cloned())
    }

    async fn insert(&self, layer: ImageWithMeta) -> LayerpullResult<()> {
        self.layers
            .write()
            .await
            .insert(layer.get_id().clone(), layer);
        Ok(())
    }

    async fn remove(&self, id: &str) -> LayerpullResult<()> {
        self.layers.write().await.remove(id);
        Ok(())
    }
}

#[async_trait::async_trait]
impl RepositoryCache for MemoryRepositoryCache {
    async fn add_reference(&self, reference: &str, image_id: &str) -> LayerpullResult<()> {
        self.references
            .write()
            .await
            .insert(reference.to_string(), image_id.to_string());
        Ok(())
    }

    async fn get_image_id(&self, reference: &str) -> LayerpullResult<Option<String>> {
        Ok(self.references.read().await.get(reference).cloned())
    }

    async fn bind_layer(&self, layer_id: &str, image_id: &str) -> LayerpullResult<()> {
        self.layers
            .write()
            .await
            .insert(layer_id.to_string(), image_id.to_string());
        Ok(())
    }

    async fn get_image_id_by_layer(&self, layer_id: &str) -> LayerpullResult<Option<String>> {
        Ok(self.layers.read().await.get(layer_id).cloned())
    }
}

#[async_trait::async_trait]
impl ImageCache for MemoryImageCache {
    async fn get(&self, image_id: &str) -> LayerpullResult<Option<ImageConfig>> {
        Ok(self.images.read().await.get(image_id).cloned())
    }

    async fn insert(&self, config: &ImageConfig) -> LayerpullResult<()> {
        self.images
            .write()
            .await
            .insert(config.get_image_id().clone(), config.clone());
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::oci::FsLayer;

    use super::*;

    fn layer(id: &str, downloading: bool) -> ImageWithMeta {
        ImageWithMeta::builder()
            .id(id)
            .parent("scratch")
            .store("default")
            .layer(FsLayer {
                blob_sum: format!("sha256:{id}"),
            })
            .meta("{}")
            .downloading(downloading)
            .build()
    }

    #[tokio::test]
    async fn test_memory_layer_cache_replaces_by_id() -> anyhow::Result<()> {
        let cache = MemoryLayerCache::new();
        cache.insert(layer("a", true)).await?;
        cache.insert(layer("a", false)).await?;
        cache.insert(layer("b", false)).await?;

        assert_eq!(cache.len().await, 2);
        assert!(!cache.get("a").await?.unwrap().get_downloading());

        cache.remove("a").await?;
        assert!(cache.get("a").await?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn test_memory_repository_cache_keeps_layers_and_references_apart() -> anyhow::Result<()>
    {
        let cache = MemoryRepositoryCache::new();
        cache.add_reference("docker.io/library/busybox:latest", "abc").await?;
        cache.bind_layer("layer1", "abc").await?;

        assert_eq!(
            cache
                .get_image_id("docker.io/library/busybox:latest")
                .await?
                .as_deref(),
            Some("abc")
        );
        assert_eq!(cache.get_image_id_by_layer("layer1").await?.as_deref(), Some("abc"));
        assert!(cache.get_image_id("layer1").await?.is_none());

        Ok(())
    }
}
