use std::fmt;

use futures::StreamExt;
use getset::Getters;
use reqwest::{header, Certificate, Client, StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    config::PullOptions,
    oci::{FetchedManifest, Manifest, ManifestVersion, Reference},
    utils, LayerpullError, LayerpullResult,
};

use super::{AuthChallenge, BlobResponse, RegistryClient, RegistrySession};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The header registries put a manifest's canonical digest in.
const DOCKER_CONTENT_DIGEST_HEADER: &str = "Docker-Content-Digest";

/// The MIME type for Docker Registry v2 image blobs, used to identify the format of the image blob data.
const DOCKER_IMAGE_BLOB_MIME_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// The registry error code for a manifest that does not exist under the requested tag.
const MANIFEST_UNKNOWN_CODE: &str = "MANIFEST_UNKNOWN";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// DockerRegistry is a client for the Docker Registry HTTP API v2.
///
/// It follows the token flow: probe `/v2/`, read the bearer challenge from a `401`, exchange it
/// for a token at the realm, then fetch manifests and blobs with that token.
///
/// [See Docker Registry API for more details on the API][Docker Registry API]
///
/// [Docker Registry API]: https://distribution.github.io/distribution/spec/api/#introduction
#[derive(Debug, Getters)]
#[getset(get = "pub with_prefix")]
pub struct DockerRegistry {
    /// The HTTP client used to make requests to the registry.
    client: ClientWithMiddleware,

    /// Fall back to plain HTTP when HTTPS is not served.
    insecure_allow_http: bool,

    /// Basic auth credentials used for token exchange and, without a token, for every request.
    credentials: Option<(String, String)>,
}

/// Stores authentication credentials obtained from a token endpoint.
#[derive(Debug, Default, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct DockerAuthMaterial {
    /// The token used to authenticate requests to the registry.
    #[serde(default)]
    token: String,

    /// The OAuth2 name for the same token.
    #[serde(default)]
    access_token: String,

    /// Seconds until the token expires.
    #[serde(default)]
    expires_in: u32,

    /// When the token was issued.
    #[serde(default)]
    issued_at: Option<String>,
}

/// An error response returned by a registry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryErrorResponse {
    /// The errors returned by the registry.
    #[serde(default)]
    pub errors: Vec<RegistryErrorEntry>,
}

/// One error of a [`RegistryErrorResponse`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryErrorEntry {
    /// The machine-readable error code, e.g. `MANIFEST_UNKNOWN`.
    #[serde(default)]
    pub code: String,

    /// The human-readable message.
    #[serde(default)]
    pub message: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl DockerRegistry {
    /// Creates a client with the transport settings of the pull options.
    ///
    /// Transient failures are retried with exponential backoff.
    pub async fn new(options: &PullOptions) -> LayerpullResult<Self> {
        let mut builder = Client::builder()
            .danger_accept_invalid_certs(*options.get_insecure_skip_verify());

        for path in options.get_registry_cas() {
            let pem = fs::read(path).await?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(builder.build()?)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let credentials = match (options.get_username(), options.get_password()) {
            (Some(user), password) => Some((user.clone(), password.clone().unwrap_or_default())),
            _ => None,
        };

        Ok(Self {
            client,
            insecure_allow_http: *options.get_insecure_allow_http(),
            credentials,
        })
    }

    /// Attaches the bearer token, or basic credentials when there is no token.
    fn authorize(&self, request: RequestBuilder, session: &RegistrySession) -> RequestBuilder {
        match (&session.token, &self.credentials) {
            (Some(token), _) => request.bearer_auth(token),
            (None, Some((user, password))) => request.basic_auth(user, Some(password)),
            (None, None) => request,
        }
    }

    fn manifest_url(url: &Url, repository: &str, target: &str) -> LayerpullResult<Url> {
        url.join(&format!("{repository}/manifests/{target}"))
            .map_err(|e| LayerpullError::ManifestFetch {
                reference: format!("{repository}:{target}"),
                reason: e.to_string(),
            })
    }
}

impl RegistryErrorResponse {
    /// Returns true when any entry carries the given code.
    pub fn has_code(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait::async_trait]
impl RegistryClient for DockerRegistry {
    async fn learn_registry_url(&self, registry: &str) -> LayerpullResult<Url> {
        let schemes: &[&str] = if self.insecure_allow_http {
            &["https", "http"]
        } else {
            &["https"]
        };

        let mut last_error = String::new();
        for scheme in schemes {
            let url = Url::parse(&format!("{scheme}://{registry}/v2/")).map_err(|e| {
                LayerpullError::RegistryDiscovery {
                    registry: registry.to_string(),
                    reason: e.to_string(),
                }
            })?;

            // Any answer, 401 included, proves the endpoint is a registry.
            match self.client.get(url.clone()).send().await {
                Ok(response) => {
                    tracing::debug!(registry, status = %response.status(), "registry answered");
                    return Ok(url);
                }
                Err(e) => {
                    tracing::debug!(registry, scheme, error = %e, "registry probe failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(LayerpullError::RegistryDiscovery {
            registry: registry.to_string(),
            reason: last_error,
        })
    }

    async fn learn_auth_url(
        &self,
        url: &Url,
        reference: &Reference,
    ) -> LayerpullResult<Option<AuthChallenge>> {
        let repository = reference.get_repository();
        let manifest_url = Self::manifest_url(url, repository, &reference.target())?;

        let mut request = self
            .client
            .get(manifest_url)
            .header(header::ACCEPT, ManifestVersion::V1.accept());
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED => {
                let challenge = response
                    .headers()
                    .get(header::WWW_AUTHENTICATE)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| parse_bearer_challenge(value, repository));
                Ok(challenge)
            }
            StatusCode::NOT_FOUND => Err(LayerpullError::ImageNotFound(repository.clone())),
            status if status.is_success() => Ok(None),
            status => Err(LayerpullError::Auth {
                image: repository.clone(),
                reason: format!("unexpected status {status} while probing for auth"),
            }),
        }
    }

    async fn fetch_token(&self, challenge: &AuthChallenge) -> LayerpullResult<String> {
        let mut query = vec![("scope", challenge.scope.as_str())];
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }

        let mut request = self.client.get(&challenge.realm).query(&query);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LayerpullError::Auth {
                image: challenge.scope.clone(),
                reason: format!("token endpoint {} returned {status}", challenge.realm),
            });
        }

        let material = response.json::<DockerAuthMaterial>().await?;
        match (material.token, material.access_token) {
            (token, _) if !token.is_empty() => Ok(token),
            (_, access_token) if !access_token.is_empty() => Ok(access_token),
            _ => Err(LayerpullError::Auth {
                image: challenge.scope.clone(),
                reason: "token endpoint returned no token".into(),
            }),
        }
    }

    async fn fetch_manifest(
        &self,
        session: &RegistrySession,
        reference: &Reference,
        version: ManifestVersion,
    ) -> LayerpullResult<FetchedManifest> {
        let repository = reference.get_repository();
        let target = reference.target();
        let url = Self::manifest_url(&session.url, repository, &target)?;

        tracing::debug!(%url, ?version, "fetching manifest");

        let request = self
            .client
            .get(url)
            .header(header::ACCEPT, version.accept());
        let response = self.authorize(request, session).send().await?;

        let status = response.status();
        let digest_header = response
            .headers()
            .get(DOCKER_CONTENT_DIGEST_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?;

        match status {
            status if status.is_success() => {
                let manifest = Manifest::from_slice(version, &body)?;
                let digest = digest_header.unwrap_or_else(|| utils::sha256_digest(&body));
                Ok(FetchedManifest { manifest, digest })
            }
            StatusCode::NOT_FOUND => {
                let errors = serde_json::from_slice::<RegistryErrorResponse>(&body)
                    .unwrap_or_default();
                if errors.has_code(MANIFEST_UNKNOWN_CODE) {
                    Err(LayerpullError::TagNotFound {
                        tag: target,
                        image: repository.clone(),
                    })
                } else {
                    Err(LayerpullError::ImageNotFound(repository.clone()))
                }
            }
            StatusCode::UNAUTHORIZED => Err(LayerpullError::ImageNotFound(repository.clone())),
            status => Err(LayerpullError::ManifestFetch {
                reference: reference.to_string(),
                reason: format!("registry returned {status}: {}", String::from_utf8_lossy(&body)),
            }),
        }
    }

    async fn fetch_blob(
        &self,
        session: &RegistrySession,
        repository: &str,
        digest: &str,
        offset: u64,
    ) -> LayerpullResult<BlobResponse> {
        let url = session
            .url
            .join(&format!("{repository}/blobs/{digest}"))
            .map_err(|e| LayerpullError::layer_download(digest, e))?;

        tracing::info!("fetching blob: {repository} {digest} {offset}-");

        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, DOCKER_IMAGE_BLOB_MIME_TYPE);
        if let Some(range) = utils::range_header(offset..) {
            request = request.header(header::RANGE, range);
        }

        let response = self.authorize(request, session).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LayerpullError::layer_download(
                digest,
                format!("registry returned {status}"),
            ));
        }

        let offset = if status == StatusCode::PARTIAL_CONTENT {
            offset
        } else {
            0
        };
        let stream = response
            .bytes_stream()
            .map(|item| item.map_err(LayerpullError::from));

        Ok(BlobResponse {
            offset,
            stream: stream.boxed(),
        })
    }
}

impl std::error::Error for RegistryErrorResponse {}

impl fmt::Display for RegistryErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for entry in &self.errors {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", entry.code, entry.message)?;
            first = false;
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a `WWW-Authenticate: Bearer realm="...",service="...",scope="..."` header.
///
/// Returns `None` for other schemes.
pub fn parse_bearer_challenge(header: &str, repository: &str) -> Option<AuthChallenge> {
    let (scheme, params) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut realm = None;
    let mut service = None;
    let mut scope = None;
    for part in split_auth_params(params) {
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim().trim_matches('"').to_string();
            match key.trim() {
                "realm" => realm = Some(value),
                "service" => service = Some(value),
                "scope" => scope = Some(value),
                _ => {}
            }
        }
    }

    Some(AuthChallenge {
        realm: realm?,
        service,
        scope: scope.unwrap_or_else(|| format!("repository:{repository}:pull")),
    })
}

/// Splits auth header parameters, respecting quoted values.
fn split_auth_params(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;

    for (i, ch) in s.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < s.len() {
        parts.push(s[start..].trim());
    }
    parts
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_parse_bearer_challenge() {
        let challenge = parse_bearer_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/busybox:pull,push""#,
            "library/busybox",
        )
        .unwrap();

        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(challenge.scope, "repository:library/busybox:pull,push");
    }

    #[test]
    fn test_docker_parse_bearer_challenge_defaults_scope() {
        let challenge =
            parse_bearer_challenge(r#"Bearer realm="https://r.example/token""#, "team/app").unwrap();
        assert_eq!(challenge.service, None);
        assert_eq!(challenge.scope, "repository:team/app:pull");

        assert!(parse_bearer_challenge(r#"Basic realm="registry""#, "team/app").is_none());
        assert!(parse_bearer_challenge(r#"Bearer service="x""#, "team/app").is_none());
    }

    #[test]
    fn test_docker_registry_error_response() {
        let errors: RegistryErrorResponse = serde_json::from_str(
            r#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"manifest unknown","detail":{"Tag":"nope"}}]}"#,
        )
        .unwrap();

        assert!(errors.has_code(MANIFEST_UNKNOWN_CODE));
        assert_eq!(errors.to_string(), "MANIFEST_UNKNOWN: manifest unknown");
    }

    #[ignore = "requires Docker registry access"]
    #[test_log::test(tokio::test)]
    async fn test_docker_fetch_manifest_v1() -> anyhow::Result<()> {
        let options = PullOptions::builder().reference("busybox").build();
        let registry = DockerRegistry::new(&options).await?;
        let reference: Reference = "busybox".parse()?;

        let url = registry.learn_registry_url(reference.get_registry()).await?;
        let token = match registry.learn_auth_url(&url, &reference).await? {
            Some(challenge) => Some(registry.fetch_token(&challenge).await?),
            None => None,
        };

        let session = RegistrySession { url, token };
        let fetched = registry
            .fetch_manifest(&session, &reference, ManifestVersion::V1)
            .await?;

        assert!(fetched.digest.starts_with("sha256:"));
        assert!(matches!(fetched.manifest, Manifest::V1(_)));

        Ok(())
    }
}
