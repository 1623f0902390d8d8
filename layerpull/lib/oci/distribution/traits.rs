use bytes::Bytes;
use futures::stream::BoxStream;
use reqwest::Url;

use crate::{
    oci::{FetchedManifest, ManifestVersion, Reference},
    LayerpullResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A bearer challenge returned by a registry that requires a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// The token endpoint.
    pub realm: String,

    /// The service the token is issued for.
    pub service: Option<String>,

    /// The scope requested, `repository:<name>:pull` when the registry names none.
    pub scope: String,
}

/// Where and how to talk to a registry for the rest of a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySession {
    /// The registry's `/v2/` base URL.
    pub url: Url,

    /// The bearer token, when the registry requires one.
    pub token: Option<String>,
}

/// A streamed blob download.
pub struct BlobResponse {
    /// The byte offset the stream starts at. Zero when the registry ignored a range request.
    pub offset: u64,

    /// The blob content.
    pub stream: BoxStream<'static, LayerpullResult<Bytes>>,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The network operations of a pull, one per protocol phase.
#[async_trait::async_trait]
pub trait RegistryClient: Send + Sync {
    /// Resolves the registry's `/v2/` base URL and checks it answers.
    async fn learn_registry_url(&self, registry: &str) -> LayerpullResult<Url>;

    /// Finds out whether the registry wants a bearer token for the reference.
    ///
    /// Fails with [`crate::LayerpullError::ImageNotFound`] when the repository is unknown.
    async fn learn_auth_url(
        &self,
        url: &Url,
        reference: &Reference,
    ) -> LayerpullResult<Option<AuthChallenge>>;

    /// Exchanges a challenge for a bearer token.
    async fn fetch_token(&self, challenge: &AuthChallenge) -> LayerpullResult<String>;

    /// Fetches the reference's manifest in the given schema.
    ///
    /// Fails with [`crate::LayerpullError::ImageNotFound`] or
    /// [`crate::LayerpullError::TagNotFound`] when the registry does not have it.
    async fn fetch_manifest(
        &self,
        session: &RegistrySession,
        reference: &Reference,
        version: ManifestVersion,
    ) -> LayerpullResult<FetchedManifest>;

    /// Streams a blob, starting at `offset`.
    async fn fetch_blob(
        &self,
        session: &RegistrySession,
        repository: &str,
        digest: &str,
        offset: u64,
    ) -> LayerpullResult<BlobResponse>;
}
