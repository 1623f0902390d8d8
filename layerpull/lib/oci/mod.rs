//! OCI (Open Container Initiative) module for interacting with container registries.
//!
//! This module provides functionality for:
//! - Parsing and resolving image references
//! - Talking to registries: auth discovery, token exchange, manifest and blob fetches
//! - Decoding schema 1 and schema 2 manifests
//! - Docker-compatible image documents and their canonical encoding

mod distribution;
mod image;
mod layer;
mod manifest;
mod reference;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use distribution::*;
pub use image::*;
pub use layer::*;
pub use manifest::*;
pub use reference::*;
