//! The pull engine.
//!
//! [`ImagePuller::pull`] resolves the reference, talks to the registry and downloads the layers
//! through the shared [`LayerDownloader`]. [`ImagePuller::register_image`] then writes the
//! layers to the image store, computes the image ID and binds the image's references.
//! Each step is also exposed on its own.

mod blob;
mod context;
mod downloader;
mod identity;
mod layers;
mod path;
mod progress;
mod puller;
mod repo;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use blob::*;
pub use context::*;
pub use downloader::*;
pub use identity::*;
pub use layers::*;
pub use path::*;
pub use progress::*;
pub use puller::*;
pub use repo::*;
