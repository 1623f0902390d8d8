use getset::Getters;
use oci_spec::image::ImageManifest;
use serde::{Deserialize, Serialize};

use crate::{LayerpullError, LayerpullResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The media type of a signed schema 1 manifest.
pub const MANIFEST_V1_MIME_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+prettyjws";

/// The media type of a schema 2 image manifest.
pub const MANIFEST_V2_MIME_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The manifest schema to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestVersion {
    /// Schema 1, which carries the per-layer image documents.
    V1,

    /// Schema 2, used only for its digest.
    V2,
}

/// A schema 1 manifest.
///
/// `fs_layers` and `history` are index-aligned, with index 0 the topmost layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ManifestV1 {
    /// Always 1.
    #[serde(rename = "schemaVersion")]
    schema_version: u16,

    /// The repository name.
    #[serde(default)]
    name: String,

    /// The tag the manifest was published under.
    #[serde(default)]
    tag: String,

    /// The image architecture.
    #[serde(default)]
    architecture: String,

    /// Layer blobs, newest first.
    #[serde(rename = "fsLayers")]
    fs_layers: Vec<FsLayer>,

    /// Per-layer image documents, newest first.
    history: Vec<V1Compatibility>,
}

/// A layer blob reference in a schema 1 manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FsLayer {
    /// The digest of the compressed layer blob.
    #[serde(rename = "blobSum")]
    pub blob_sum: String,
}

/// A history entry of a schema 1 manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct V1Compatibility {
    /// The serialized per-layer image document.
    #[serde(rename = "v1Compatibility")]
    pub v1_compatibility: String,
}

/// A decoded manifest.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    /// A schema 1 manifest.
    V1(ManifestV1),

    /// A schema 2 manifest.
    V2(ImageManifest),
}

/// A manifest together with its content digest.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedManifest {
    /// The decoded manifest.
    pub manifest: Manifest,

    /// The `algorithm:hex` digest of the manifest.
    pub digest: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ManifestV1 {
    /// Creates a schema 1 manifest from its parts, newest layer first.
    pub fn new(
        name: impl Into<String>,
        tag: impl Into<String>,
        fs_layers: Vec<FsLayer>,
        history: Vec<V1Compatibility>,
    ) -> Self {
        Self {
            schema_version: 1,
            name: name.into(),
            tag: tag.into(),
            architecture: String::new(),
            fs_layers,
            history,
        }
    }

    /// Decodes and checks a schema 1 manifest body.
    pub fn from_slice(body: &[u8]) -> LayerpullResult<Self> {
        let manifest: Self = serde_json::from_slice(body)
            .map_err(|e| LayerpullError::manifest_decode("schema 1 manifest", e))?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Checks the schema version and that layers and history line up.
    pub fn validate(&self) -> LayerpullResult<()> {
        if self.schema_version != 1 {
            return Err(LayerpullError::manifest_decode(
                "schema 1 manifest",
                format!("unexpected schema version {}", self.schema_version),
            ));
        }

        if self.fs_layers.len() != self.history.len() {
            return Err(LayerpullError::manifest_decode(
                "schema 1 manifest",
                format!(
                    "{} layers but {} history entries",
                    self.fs_layers.len(),
                    self.history.len()
                ),
            ));
        }

        if self.fs_layers.is_empty() {
            return Err(LayerpullError::manifest_decode(
                "schema 1 manifest",
                "no layers",
            ));
        }

        Ok(())
    }
}

impl ManifestVersion {
    /// Returns the `Accept` header value used to request this schema.
    pub fn accept(&self) -> &'static str {
        match self {
            Self::V1 => MANIFEST_V1_MIME_TYPE,
            Self::V2 => MANIFEST_V2_MIME_TYPE,
        }
    }
}

impl Manifest {
    /// Decodes a manifest body of the given schema.
    pub fn from_slice(version: ManifestVersion, body: &[u8]) -> LayerpullResult<Self> {
        match version {
            ManifestVersion::V1 => ManifestV1::from_slice(body).map(Self::V1),
            ManifestVersion::V2 => serde_json::from_slice::<ImageManifest>(body)
                .map(Self::V2)
                .map_err(|e| LayerpullError::manifest_decode("schema 2 manifest", e)),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
