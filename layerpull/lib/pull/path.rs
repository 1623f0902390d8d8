use std::path::{Path, PathBuf};

use reqwest::Url;

use crate::oci::Reference;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the scratch directory a pull downloads its layers into.
///
/// The path is `{destination}/{scheme}/{host[:port]}/{url path}/{repository}/{tag}`, where the
/// repository keeps its `/` separated segments and a pinned digest takes the place of the tag.
/// Tags never contain `/`, so distinct inputs never share a directory.
pub fn destination_directory(destination: &Path, url: &Url, reference: &Reference) -> PathBuf {
    let mut path = destination.join(url.scheme());

    let host = url.host_str().unwrap_or_default();
    path.push(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    });

    for segment in url.path().split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    for segment in reference.get_repository().split('/') {
        path.push(segment);
    }

    path.push(reference.target());
    path
}

/// Returns the directory of one layer inside a pull's scratch directory.
pub fn layer_directory(destination: &Path, layer_id: &str) -> PathBuf {
    destination.join(layer_id)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
