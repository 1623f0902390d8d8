//! `layerpull` pulls container images from a registry and materializes them into a local image
//! store with Docker-compatible image IDs.
//!
//! # Overview
//!
//! A pull runs in two steps:
//! - [`pull::ImagePuller::pull`] resolves the reference, discovers the registry and its auth,
//!   fetches the manifests and downloads every layer the process does not already have
//! - [`pull::ImagePuller::register_image`] writes the layers to the image store, oldest first,
//!   computes the image ID and binds the image's tag and digest to it
//!
//! Layer downloads are shared between concurrent pulls: a layer wanted by two pulls is fetched
//! once, and survives either pull being cancelled as long as the other still wants it.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use layerpull::{config::PullOptions, pull::ImagePuller};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let options = PullOptions::builder().reference("busybox:latest").build();
//!     let puller = ImagePuller::from_options(&options).await?;
//!
//!     let token = CancellationToken::new();
//!     let pulled = puller.pull(&options, &token).await?;
//!     let config = puller.register_image(&options, &pulled, &token).await?;
//!
//!     println!("{}", config.get_image_id());
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Layer, repository and image config caches
//! - [`cli`] - Command-line interface and argument parsing
//! - [`config`] - Pull options and defaults
//! - [`oci`] - References, manifests, image documents and the registry client
//! - [`pull`] - The pull engine
//! - [`store`] - Image store backends and host identity
//! - [`utils`] - Common utilities and helpers

#![warn(missing_docs)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod cache;
pub mod cli;
pub mod config;
pub mod oci;
pub mod pull;
pub mod store;
pub mod utils;

pub use error::*;
