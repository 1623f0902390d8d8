use std::fmt::{self, Display};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a layerpull-related operation.
pub type LayerpullResult<T> = Result<T, LayerpullError>;

/// An error that occurred while pulling or registering an image.
#[derive(pretty_error_debug::Debug, Error)]
pub enum LayerpullError {
    /// The image reference could not be parsed.
    #[error("invalid image reference: {0}")]
    InvalidReference(String),

    /// The local host identity could not be determined.
    #[error("failed to determine host identity: {0}")]
    HostIdentity(String),

    /// The execution backend did not answer its health check.
    #[error("backend {host} is unreachable: {reason}")]
    BackendUnreachable {
        /// The backend address that was probed.
        host: String,

        /// Why the probe failed.
        reason: String,
    },

    /// The registry endpoint could not be resolved or reached.
    #[error("failed to reach registry {registry}: {reason}")]
    RegistryDiscovery {
        /// The registry host.
        registry: String,

        /// Why discovery failed.
        reason: String,
    },

    /// The registry does not know the image.
    #[error("Error: image {0} not found")]
    ImageNotFound(String),

    /// The registry knows the image but not the tag.
    #[error("Tag {tag} not found in repository {image}")]
    TagNotFound {
        /// The requested tag.
        tag: String,

        /// The repository that was searched.
        image: String,
    },

    /// The auth endpoint could not be discovered or a token could not be obtained.
    #[error("authentication failed for {image}: {reason}")]
    Auth {
        /// The repository being pulled.
        image: String,

        /// Why authentication failed.
        reason: String,
    },

    /// The manifest could not be fetched.
    #[error("failed to fetch manifest for {reference}: {reason}")]
    ManifestFetch {
        /// The reference whose manifest was requested.
        reference: String,

        /// Why the fetch failed.
        reason: String,
    },

    /// A manifest or one of its history entries could not be decoded.
    #[error("failed to decode {context}: {reason}")]
    ManifestDecode {
        /// Which document, or which entry of it, failed to decode.
        context: String,

        /// The decoder's message.
        reason: String,
    },

    /// A layer could not be downloaded.
    #[error("failed to download layer {layer}: {reason}")]
    LayerDownload {
        /// The local layer ID.
        layer: String,

        /// Why the download failed.
        reason: String,
    },

    /// A downloaded layer could not be written to the image store.
    #[error("failed to write layer {layer} to the image store: {reason}")]
    BlobWrite {
        /// The local layer ID.
        layer: String,

        /// Why the write failed.
        reason: String,
    },

    /// No image ID is known for the layer that represents the pulled image.
    #[error("ImageID not found by LayerID({0}) in repository cache")]
    IdentityUnresolved(String),

    /// A repository cache binding could not be stored.
    #[error("unable to add image {phase} ({reference}): {reason}")]
    CacheBinding {
        /// Which binding failed.
        phase: BindingPhase,

        /// The reference that was being bound.
        reference: String,

        /// Why the binding failed.
        reason: String,
    },

    /// The pull was cancelled or ran past its deadline.
    #[error("pull cancelled: {0}")]
    Cancelled(String),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that occurred during an HTTP request.
    #[error("http request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// An error that occurred during an HTTP middleware operation.
    #[error("http middleware error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// A JSON (de)serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error.
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// A spawned task failed to complete.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// A digest string was rejected.
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

/// The closed classification of [`LayerpullError`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`LayerpullError::InvalidReference`].
    InvalidReference,

    /// See [`LayerpullError::HostIdentity`].
    HostIdentity,

    /// See [`LayerpullError::BackendUnreachable`].
    BackendUnreachable,

    /// See [`LayerpullError::RegistryDiscovery`].
    RegistryDiscovery,

    /// See [`LayerpullError::ImageNotFound`].
    ImageNotFound,

    /// See [`LayerpullError::TagNotFound`].
    TagNotFound,

    /// See [`LayerpullError::Auth`].
    Auth,

    /// See [`LayerpullError::ManifestFetch`].
    ManifestFetch,

    /// See [`LayerpullError::ManifestDecode`].
    ManifestDecode,

    /// See [`LayerpullError::LayerDownload`].
    LayerDownload,

    /// See [`LayerpullError::BlobWrite`].
    BlobWrite,

    /// See [`LayerpullError::IdentityUnresolved`].
    IdentityUnresolved,

    /// See [`LayerpullError::CacheBinding`].
    CacheBinding,

    /// Transport, storage and runtime failures not yet attributed to a pull phase.
    Internal,
}

/// The repository cache binding that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingPhase {
    /// The `name:tag` binding.
    Tag,

    /// The `name@digest` binding.
    Digest,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerpullError {
    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidReference(_) => ErrorKind::InvalidReference,
            Self::HostIdentity(_) => ErrorKind::HostIdentity,
            Self::BackendUnreachable { .. } => ErrorKind::BackendUnreachable,
            Self::RegistryDiscovery { .. } => ErrorKind::RegistryDiscovery,
            Self::ImageNotFound(_) => ErrorKind::ImageNotFound,
            Self::TagNotFound { .. } => ErrorKind::TagNotFound,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::ManifestFetch { .. } => ErrorKind::ManifestFetch,
            Self::ManifestDecode { .. } => ErrorKind::ManifestDecode,
            Self::LayerDownload { .. } => ErrorKind::LayerDownload,
            Self::BlobWrite { .. } => ErrorKind::BlobWrite,
            Self::IdentityUnresolved(_) => ErrorKind::IdentityUnresolved,
            Self::CacheBinding { .. } => ErrorKind::CacheBinding,
            Self::Cancelled(_)
            | Self::Io(_)
            | Self::HttpRequest(_)
            | Self::HttpMiddleware(_)
            | Self::Json(_)
            | Self::Database(_)
            | Self::Migrate(_)
            | Self::JoinError(_)
            | Self::InvalidDigest(_) => ErrorKind::Internal,
        }
    }

    /// Creates a [`LayerpullError::LayerDownload`] for the given layer.
    pub fn layer_download(layer: impl Into<String>, reason: impl Display) -> Self {
        Self::LayerDownload {
            layer: layer.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a [`LayerpullError::BlobWrite`] for the given layer.
    pub fn blob_write(layer: impl Into<String>, reason: impl Display) -> Self {
        Self::BlobWrite {
            layer: layer.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a [`LayerpullError::ManifestDecode`] with the given context.
    pub fn manifest_decode(context: impl Into<String>, reason: impl Display) -> Self {
        Self::ManifestDecode {
            context: context.into(),
            reason: reason.to_string(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for BindingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag => write!(f, "reference"),
            Self::Digest => write!(f, "digest"),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
