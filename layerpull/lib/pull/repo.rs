use crate::{
    cache::RepositoryCache, oci::Reference, BindingPhase, LayerpullError, LayerpullResult,
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Binds a pulled image's tag and digest references to its image ID.
///
/// An empty `image_id` is looked up through the layer that represents the image. The two
/// bindings are stored one after the other, so a failed digest binding leaves the tag binding
/// in place.
pub async fn update_repository_cache(
    cache: &dyn RepositoryCache,
    reference: &Reference,
    digest: &str,
    layer_id: &str,
    image_id: &str,
) -> LayerpullResult<String> {
    let image_id = if image_id.is_empty() {
        cache
            .get_image_id_by_layer(layer_id)
            .await?
            .ok_or_else(|| LayerpullError::IdentityUnresolved(layer_id.to_string()))?
    } else {
        image_id.to_string()
    };

    let tagged = reference.tagged();
    cache
        .add_reference(&tagged, &image_id)
        .await
        .map_err(|e| LayerpullError::CacheBinding {
            phase: BindingPhase::Tag,
            reference: tagged.clone(),
            reason: e.to_string(),
        })?;

    let digested = reference.with_digest(digest);
    cache
        .add_reference(&digested, &image_id)
        .await
        .map_err(|e| LayerpullError::CacheBinding {
            phase: BindingPhase::Digest,
            reference: digested.clone(),
            reason: e.to_string(),
        })?;

    tracing::debug!(%tagged, %digested, %image_id, "repository cache updated");
    Ok(image_id)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
