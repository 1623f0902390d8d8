use std::{fmt, str::FromStr, sync::LazyLock};

use getset::Getters;
use oci_spec::image::Digest;
use regex::Regex;

use crate::{
    config::{
        DEFAULT_REFERENCE_DOMAIN, DEFAULT_REFERENCE_REPO_NAMESPACE, DEFAULT_REFERENCE_TAG,
        DEFAULT_REGISTRY,
    },
    LayerpullError,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The longest repository name, registry included, a registry accepts.
const NAME_TOTAL_LENGTH_MAX: usize = 255;

static REGISTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.-]+(:[0-9]+)?$").expect("valid registry regex"));

static REPOSITORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]+(?:(?:[._]|__|[-]+)[a-z0-9]+)*)(/[a-z0-9]+(?:(?:[._]|__|[-]+)[a-z0-9]+)*)*$")
        .expect("valid repository regex")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\w[\w.-]{0,127}$").expect("valid tag regex"));

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A resolved image reference.
///
/// The registry is always a concrete host: references without a registry, or naming
/// `docker.io`, resolve to the default registry host. The tag is always present and defaults to
/// `latest`. When a digest is present it is the pull target.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct Reference {
    /// The registry host, with an optional port.
    registry: String,

    /// The repository path inside the registry.
    repository: String,

    /// The image tag.
    tag: String,

    /// The digest pinned by the reference, if any.
    digest: Option<Digest>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Reference {
    /// Returns what the manifest is fetched by: the digest when pinned, the tag otherwise.
    pub fn target(&self) -> String {
        match &self.digest {
            Some(digest) => digest.to_string(),
            None => self.tag.clone(),
        }
    }

    /// Returns `registry/repository`.
    pub fn name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Returns the tag form, `registry/repository:tag`.
    pub fn tagged(&self) -> String {
        format!("{}:{}", self.name(), self.tag)
    }

    /// Returns the digest form, `registry/repository@digest`.
    pub fn with_digest(&self, digest: &str) -> String {
        format!("{}@{}", self.name(), digest)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for Reference {
    type Err = LayerpullError;

    /// Parses an image reference.
    ///
    /// Supported formats include:
    /// - "repository"
    /// - "repository:tag"
    /// - "registry/repository:tag"
    /// - "registry/repository@digest"
    /// - "registry/repository:tag@digest"
    ///
    /// A first path segment is a registry when it contains `.` or `:`, or is `localhost`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LayerpullError::InvalidReference(
                "input string is empty".into(),
            ));
        }

        let (named, digest) = match s.split_once('@') {
            Some((named, digest_str)) => {
                let digest = digest_str.parse::<Digest>().map_err(|e| {
                    LayerpullError::InvalidReference(format!("invalid digest {digest_str}: {e}"))
                })?;
                (named, Some(digest))
            }
            None => (s, None),
        };

        let (domain, remainder) = extract_registry_and_path(named);
        let (repository, tag) = extract_repository_and_tag(&domain, remainder)?;

        validate_registry(&domain)?;
        validate_repository(&repository)?;
        validate_tag(&tag)?;

        if domain.len() + 1 + repository.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(LayerpullError::InvalidReference(format!(
                "repository name must not be more than {NAME_TOTAL_LENGTH_MAX} characters"
            )));
        }

        Ok(Reference {
            registry: resolve_registry_host(&domain),
            repository,
            tag,
            digest,
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)?;
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn validate_registry(registry: &str) -> Result<(), LayerpullError> {
    if REGISTRY_RE.is_match(registry) {
        Ok(())
    } else {
        Err(LayerpullError::InvalidReference(format!(
            "invalid registry: {registry}"
        )))
    }
}

fn validate_repository(repository: &str) -> Result<(), LayerpullError> {
    if REPOSITORY_RE.is_match(repository) {
        Ok(())
    } else {
        Err(LayerpullError::InvalidReference(format!(
            "invalid repository: {repository}"
        )))
    }
}

fn validate_tag(tag: &str) -> Result<(), LayerpullError> {
    if TAG_RE.is_match(tag) {
        Ok(())
    } else {
        Err(LayerpullError::InvalidReference(format!("invalid tag: {tag}")))
    }
}

/// Whether the registry is Docker Hub, where single-segment names live under `library/`.
fn is_docker_hub(registry: &str) -> bool {
    registry == DEFAULT_REFERENCE_DOMAIN || registry == DEFAULT_REGISTRY
}

/// Maps the well-known `docker.io` domain to the registry host that serves it.
fn resolve_registry_host(domain: &str) -> String {
    if domain == DEFAULT_REFERENCE_DOMAIN {
        DEFAULT_REGISTRY.to_string()
    } else {
        domain.to_string()
    }
}

/// Splits the registry from the remaining path, defaulting to `docker.io`.
fn extract_registry_and_path(reference: &str) -> (String, &str) {
    match reference.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest)
        }
        _ => (DEFAULT_REFERENCE_DOMAIN.to_string(), reference),
    }
}

/// Splits the repository from the tag, defaulting the tag and the Docker Hub namespace.
fn extract_repository_and_tag(
    registry: &str,
    path: &str,
) -> Result<(String, String), LayerpullError> {
    let (repo_part, tag) = match path.rsplit_once(':') {
        // A colon before the last slash belongs to the path, not to a tag.
        Some((repo, tag)) if !tag.contains('/') => (repo, tag.to_string()),
        _ => (path, DEFAULT_REFERENCE_TAG.to_string()),
    };

    if repo_part.is_empty() {
        return Err(LayerpullError::InvalidReference(
            "repository is empty".into(),
        ));
    }

    let repository = if is_docker_hub(registry) && !repo_part.contains('/') {
        format!("{DEFAULT_REFERENCE_REPO_NAMESPACE}/{repo_part}")
    } else {
        repo_part.to_string()
    };

    Ok((repository, tag))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:a3ed95caeb02ffe68cdd9fd84406680ae93d633cb16422d00e8a7c22955b46d4";

    #[test]
    fn test_reference_bare_repository_uses_defaults() {
        let reference = "busybox".parse::<Reference>().unwrap();
        assert_eq!(reference.get_registry(), DEFAULT_REGISTRY);
        assert_eq!(reference.get_repository(), "library/busybox");
        assert_eq!(reference.get_tag(), "latest");
        assert!(reference.get_digest().is_none());
        assert_eq!(reference.target(), "latest");
    }

    #[test]
    fn test_reference_registry_with_port_and_tag() {
        let reference = "myregistry.example.com:5000/app:v2"
            .parse::<Reference>()
            .unwrap();
        assert_eq!(reference.get_registry(), "myregistry.example.com:5000");
        assert_eq!(reference.get_repository(), "app");
        assert_eq!(reference.get_tag(), "v2");
    }

    #[test]
    fn test_reference_docker_io_maps_to_default_registry() {
        let reference = "docker.io/library/alpine:3.12"
            .parse::<Reference>()
            .unwrap();
        assert_eq!(reference.get_registry(), DEFAULT_REGISTRY);
        assert_eq!(reference.get_repository(), "library/alpine");
        assert_eq!(reference.get_tag(), "3.12");
        assert_eq!(
            reference.to_string(),
            "registry-1.docker.io/library/alpine:3.12"
        );
    }

    #[test]
    fn test_reference_namespaced_repository_on_default_registry() {
        let reference = "bitnami/redis:7".parse::<Reference>().unwrap();
        assert_eq!(reference.get_registry(), DEFAULT_REGISTRY);
        assert_eq!(reference.get_repository(), "bitnami/redis");
    }

    #[test]
    fn test_reference_localhost_registry() {
        let reference = "localhost/app".parse::<Reference>().unwrap();
        assert_eq!(reference.get_registry(), "localhost");
        assert_eq!(reference.get_repository(), "app");
        assert_eq!(reference.get_tag(), "latest");
    }

    #[test]
    fn test_reference_registry_port_without_tag() {
        let reference = "localhost:5000/team/app".parse::<Reference>().unwrap();
        assert_eq!(reference.get_registry(), "localhost:5000");
        assert_eq!(reference.get_repository(), "team/app");
        assert_eq!(reference.get_tag(), "latest");
    }

    #[test]
    fn test_reference_with_digest() {
        let reference = format!("busybox@{DIGEST}").parse::<Reference>().unwrap();
        assert_eq!(reference.get_tag(), "latest");
        assert_eq!(reference.target(), DIGEST);
        assert_eq!(
            reference.with_digest(DIGEST),
            format!("registry-1.docker.io/library/busybox@{DIGEST}")
        );

        let reference = format!("busybox:1.36@{DIGEST}")
            .parse::<Reference>()
            .unwrap();
        assert_eq!(reference.get_tag(), "1.36");
        assert_eq!(reference.target(), DIGEST);
        assert_eq!(
            reference.to_string(),
            format!("registry-1.docker.io/library/busybox:1.36@{DIGEST}")
        );
    }

    #[test]
    fn test_reference_invalid_inputs() {
        for input in [
            "",
            "   ",
            ":latest",
            "Busybox",
            "busybox:",
            "busybox:-bad",
            "busybox@notadigest",
            "bad_registry!/app",
        ] {
            let err = input.parse::<Reference>().unwrap_err();
            assert!(
                matches!(err, LayerpullError::InvalidReference(_)),
                "expected invalid reference for {input:?}, got {err}"
            );
        }
    }

    #[test]
    fn test_reference_rejects_overlong_names() {
        let input = format!("example.com/{}", "a".repeat(260));
        assert!(input.parse::<Reference>().is_err());
    }

    #[test]
    fn test_reference_parse_is_idempotent() {
        for input in [
            "busybox",
            "alpine:3.19",
            "bitnami/redis:7",
            "docker.io/library/ubuntu:22.04",
            "myregistry.example.com:5000/app:v2",
            "localhost:5000/team/app",
            "ghcr.io/owner/repo/sub:1.0.0",
        ] {
            let first = input.parse::<Reference>().unwrap();
            let second = first.tagged().parse::<Reference>().unwrap();
            assert_eq!(first, second, "re-parsing {input:?} changed the reference");
        }
    }
}
