use getset::{Getters, Setters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::FsLayer;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The parent of the root layer.
pub const SCRATCH_LAYER_ID: &str = "scratch";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One layer of a pulled image and what is known about it locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct ImageWithMeta {
    /// The local image ID of the layer.
    #[builder(setter(into))]
    id: String,

    /// The parent layer's ID, or [`SCRATCH_LAYER_ID`] for the root.
    #[builder(setter(into))]
    parent: String,

    /// The image store the layer belongs to.
    #[builder(setter(into))]
    store: String,

    /// The digest of the uncompressed layer tar, once known.
    #[builder(default, setter(into))]
    diff_id: String,

    /// The compressed blob the layer is fetched from.
    layer: FsLayer,

    /// The serialized per-layer image document.
    #[builder(setter(into))]
    meta: String,

    /// The uncompressed size of the layer in bytes, once known.
    #[builder(default)]
    size: i64,

    /// Whether a download of this layer is under way.
    #[builder(default)]
    downloading: bool,
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl std::fmt::Display for ImageWithMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
