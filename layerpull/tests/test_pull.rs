use std::{sync::Arc, time::Duration};

use layerpull::{
    cache::{LayerCache, MemoryImageCache, MemoryLayerCache, MemoryRepositoryCache, RepositoryCache},
    config::PullOptions,
    pull::{ImagePuller, LayerDownloader, NoopProgress, SecondaryManifest},
    store::{FsImageStore, StaticHostIdentity},
    ErrorKind,
};
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

use helper::{MockRegistry, SchemaTwo, BASE_ID, TOP_ID};

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_pull_downloads_and_registers_image() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let registry = Arc::new(MockRegistry::new());
    let env = helper::Env::new(&temp_dir, registry.clone());
    let options = env.options("busybox", true);
    let token = CancellationToken::new();

    let pulled = env.puller.pull(&options, &token).await?;
    assert_eq!(pulled.get_layers().len(), 2);
    assert_eq!(pulled.get_layers()[0].get_id(), TOP_ID);
    assert_eq!(pulled.get_layers()[1].get_id(), BASE_ID);
    assert_eq!(pulled.get_store(), "test-host");
    assert_eq!(pulled.get_digest(), &registry.schema2_digest());
    assert!(matches!(pulled.get_schema2(), SecondaryManifest::Fetched(_)));
    assert!(pulled.get_layers().iter().all(|l| !l.get_downloading()));
    assert!(pulled.get_layers()[1].get_diff_id().starts_with("sha256:"));

    let config = env.puller.register_image(&options, &pulled, &token).await?;
    let image_id = config.get_image_id().clone();
    assert_eq!(image_id.len(), 64);
    assert_eq!(config.get_v1_image().id, TOP_ID);
    assert_eq!(config.get_v1_image().parent, BASE_ID);

    let tagged = "registry-1.docker.io/library/busybox:latest";
    let pinned = format!(
        "registry-1.docker.io/library/busybox@{}",
        registry.schema2_digest()
    );
    assert_eq!(env.repositories.get_image_id(tagged).await?, Some(image_id.clone()));
    assert_eq!(env.repositories.get_image_id(&pinned).await?, Some(image_id.clone()));
    assert_eq!(env.repositories.get_image_id_by_layer(TOP_ID).await?, Some(image_id));

    let store = env.store_root().join("test-host");
    assert_eq!(
        tokio::fs::read_to_string(store.join(BASE_ID).join("hello.txt")).await?,
        "hello from base"
    );
    assert!(store.join(TOP_ID).join("etc/motd").exists());
    assert!(store.join(format!("{TOP_ID}.meta.json")).exists());
    assert!(!pulled.get_destination().exists());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_pull_reports_missing_tag() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let registry = Arc::new(MockRegistry::new().with_known_tag("latest"));
    let env = helper::Env::new(&temp_dir, registry.clone());

    let err = env
        .puller
        .pull(&env.options("busybox:nope", false), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TagNotFound);
    assert_eq!(err.to_string(), "Tag nope not found in repository library/busybox");
    assert_eq!(registry.blob_fetches(), 0);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_pull_reports_unknown_image_by_reference() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let registry = Arc::new(MockRegistry::new().with_unknown_image());
    let env = helper::Env::new(&temp_dir, registry);

    let err = env
        .puller
        .pull(&env.options("busybox", false), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ImageNotFound);
    assert_eq!(err.to_string(), "Error: image busybox not found");

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_pull_keeps_schema1_digest_when_schema2_fails() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let registry = Arc::new(MockRegistry::new().with_schema2(SchemaTwo::Fail));
    let env = helper::Env::new(&temp_dir, registry.clone());
    let options = env.options("busybox", false);
    let token = CancellationToken::new();

    let pulled = env.puller.pull(&options, &token).await?;
    assert!(matches!(pulled.get_schema2(), SecondaryManifest::Failed(_)));
    assert_eq!(pulled.get_digest(), &registry.schema1_digest());

    env.puller.register_image(&options, &pulled, &token).await?;
    let pinned = format!(
        "registry-1.docker.io/library/busybox@{}",
        registry.schema1_digest()
    );
    assert!(env.repositories.get_image_id(&pinned).await?.is_some());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_pull_shares_concurrent_layer_downloads() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let registry = Arc::new(MockRegistry::new().gated());
    let env = helper::Env::new(&temp_dir, registry.clone());
    let options = env.options("busybox", false);
    let token = CancellationToken::new();

    let opener = {
        let registry = registry.clone();
        async move {
            helper::wait_until(|| registry.blob_fetches() >= 2).await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            registry.open_gate();
        }
    };

    let (a, b, c, ()) = tokio::join!(
        env.puller.pull(&options, &token),
        env.puller.pull(&options, &token),
        env.puller.pull(&options, &token),
        opener,
    );
    let (a, b, c) = (a?, b?, c?);

    assert_eq!(registry.blob_fetches(), 2);
    assert_eq!(a.get_layers(), b.get_layers());
    assert_eq!(b.get_layers(), c.get_layers());
    assert_eq!(env.downloader.in_flight(), 0);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_cancelled_pull_leaves_shared_download_running() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let registry = Arc::new(MockRegistry::new().gated());
    let env = helper::Env::new(&temp_dir, registry.clone());
    let options = env.options("busybox", false);

    let token_a = CancellationToken::new();
    let token_b = CancellationToken::new();
    let pull_a = tokio::spawn({
        let (puller, options, token) = (env.puller.clone(), options.clone(), token_a.clone());
        async move { puller.pull(&options, &token).await }
    });
    let pull_b = tokio::spawn({
        let (puller, options, token) = (env.puller.clone(), options.clone(), token_b.clone());
        async move { puller.pull(&options, &token).await }
    });

    let downloader = env.downloader.clone();
    helper::wait_until(|| downloader.waiters(BASE_ID) == 2 && downloader.waiters(TOP_ID) == 2)
        .await;

    token_a.cancel();
    let err = pull_a.await?.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LayerDownload);
    assert_eq!(downloader.waiters(BASE_ID), 1);

    registry.open_gate();
    let pulled = pull_b.await??;

    assert_eq!(pulled.get_layers().len(), 2);
    assert_eq!(registry.blob_fetches(), 2);
    let cached = env.layers.get(BASE_ID).await?.expect("base layer cached");
    assert!(!cached.get_downloading());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_pull_reuses_layers_already_cached() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let registry = Arc::new(MockRegistry::new());
    let env = helper::Env::new(&temp_dir, registry.clone());
    let options = env.options("busybox", false);
    let token = CancellationToken::new();

    let first = env.puller.pull(&options, &token).await?;
    let first_config = env.puller.register_image(&options, &first, &token).await?;
    assert_eq!(registry.blob_fetches(), 2);

    let second = env.puller.pull(&options, &token).await?;
    let second_config = env.puller.register_image(&options, &second, &token).await?;

    assert_eq!(registry.blob_fetches(), 2);
    assert_eq!(first_config.get_image_id(), second_config.get_image_id());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_register_fails_when_cached_layers_were_never_stored() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let registry = Arc::new(MockRegistry::new());
    let env = helper::Env::new(&temp_dir, registry.clone());
    let latest = env.options("busybox:latest", false);
    let other = env.options("busybox:other", false);
    let token = CancellationToken::new();

    env.puller.pull(&latest, &token).await?;
    let pulled = env.puller.pull(&other, &token).await?;
    assert_eq!(registry.blob_fetches(), 2);

    let err = env
        .puller
        .register_image(&other, &pulled, &token)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BlobWrite);
    assert!(err.to_string().contains(BASE_ID));
    assert!(!env.store_root().join("test-host").join(BASE_ID).exists());
    assert_eq!(
        env.repositories
            .get_image_id("registry-1.docker.io/library/busybox:other")
            .await?,
        None
    );

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_register_needs_joined_download_layers_in_store() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let registry = Arc::new(MockRegistry::new().gated());
    let env = helper::Env::new(&temp_dir, registry.clone());
    let latest = env.options("busybox:latest", false);
    let other = env.options("busybox:other", false);
    let token = CancellationToken::new();

    let pull_latest = tokio::spawn({
        let (puller, options, token) = (env.puller.clone(), latest.clone(), token.clone());
        async move { puller.pull(&options, &token).await }
    });
    let downloader = env.downloader.clone();
    helper::wait_until(|| downloader.waiters(BASE_ID) == 1 && downloader.waiters(TOP_ID) == 1)
        .await;

    let pull_other = tokio::spawn({
        let (puller, options, token) = (env.puller.clone(), other.clone(), token.clone());
        async move { puller.pull(&options, &token).await }
    });
    helper::wait_until(|| downloader.waiters(BASE_ID) == 2 && downloader.waiters(TOP_ID) == 2)
        .await;

    registry.open_gate();
    let pulled_latest = pull_latest.await??;
    let pulled_other = pull_other.await??;
    assert_eq!(registry.blob_fetches(), 2);

    let err = env
        .puller
        .register_image(&other, &pulled_other, &token)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BlobWrite);

    let latest_config = env
        .puller
        .register_image(&latest, &pulled_latest, &token)
        .await?;
    let other_config = env
        .puller
        .register_image(&other, &pulled_other, &token)
        .await?;

    assert_eq!(latest_config.get_image_id(), other_config.get_image_id());
    assert_eq!(
        env.repositories
            .get_image_id("registry-1.docker.io/library/busybox:other")
            .await?,
        Some(other_config.get_image_id().clone())
    );

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_cancelled_manifest_fetch_is_a_manifest_error() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let registry = Arc::new(MockRegistry::new().gated_manifests());
    let env = helper::Env::new(&temp_dir, registry.clone());
    let options = env.options("busybox", false);
    let token = CancellationToken::new();

    let pull = tokio::spawn({
        let (puller, options, token) = (env.puller.clone(), options.clone(), token.clone());
        async move { puller.pull(&options, &token).await }
    });
    helper::wait_until(|| registry.manifest_fetches() == 1).await;

    token.cancel();
    let err = pull.await?.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ManifestFetch);
    assert!(err.to_string().contains("pull was cancelled"));
    assert_eq!(registry.blob_fetches(), 0);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_manifest_fetch_past_deadline_is_a_manifest_error() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let registry = Arc::new(MockRegistry::new().gated_manifests());
    let env = helper::Env::new(&temp_dir, registry.clone());
    let mut options = env.options("busybox", false);
    options.set_timeout(Duration::from_millis(50));

    let err = env
        .puller
        .pull(&options, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ManifestFetch);
    assert!(err.to_string().contains("deadline exceeded"));
    assert_eq!(registry.manifest_fetches(), 1);

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Helpers
//--------------------------------------------------------------------------------------------------

mod helper {
    use std::{
        io::Write,
        path::PathBuf,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use bytes::Bytes;
    use flate2::{write::GzEncoder, Compression};
    use futures::StreamExt;
    use layerpull::{
        oci::{
            AuthChallenge, BlobResponse, FetchedManifest, FsLayer, Manifest, ManifestV1,
            ManifestVersion, Reference, RegistryClient, RegistrySession, V1Compatibility,
        },
        utils, LayerpullError, LayerpullResult,
    };
    use reqwest::Url;
    use tokio::sync::watch;

    use super::*;

    pub(super) const BASE_ID: &str = "1b2c3d4e5f60718293a4b5c6d7e8f9001b2c3d4e5f60718293a4b5c6d7e8f900";
    pub(super) const TOP_ID: &str = "9f8e7d6c5b4a39281706f5e4d3c2b1a09f8e7d6c5b4a39281706f5e4d3c2b1a0";

    pub(super) enum SchemaTwo {
        Serve,
        Fail,
    }

    /// A registry serving one two-layer image.
    pub(super) struct MockRegistry {
        manifest: ManifestV1,
        blobs: Vec<(String, Vec<u8>)>,
        known_tag: Option<String>,
        unknown_image: bool,
        schema2: SchemaTwo,
        gate: watch::Sender<bool>,
        gate_manifests: bool,
        blob_fetches: AtomicUsize,
        manifest_fetches: AtomicUsize,
    }

    /// A puller wired to in-memory caches and a temporary store.
    pub(super) struct Env {
        pub(super) puller: Arc<ImagePuller>,
        pub(super) downloader: Arc<LayerDownloader>,
        pub(super) layers: Arc<MemoryLayerCache>,
        pub(super) repositories: Arc<MemoryRepositoryCache>,
        root: PathBuf,
    }

    impl MockRegistry {
        pub(super) fn new() -> Self {
            let base_blob = layer_blob(&[("hello.txt", b"hello from base".as_slice())]);
            let top_blob = layer_blob(&[("etc/motd", b"welcome".as_slice())]);
            let base_sum = utils::sha256_digest(&base_blob);
            let top_sum = utils::sha256_digest(&top_blob);

            let base_meta = format!(
                r##"{{"id":"{BASE_ID}","created":"2016-06-01T00:00:00Z","container_config":{{"Cmd":["/bin/sh","-c","#(nop) ADD file:abc in /"]}},"os":"linux"}}"##
            );
            let top_meta = format!(
                r##"{{"id":"{TOP_ID}","parent":"{BASE_ID}","created":"2016-06-02T00:00:00Z","container_config":{{"Cmd":["/bin/sh","-c","#(nop) ADD file:def in /etc"]}},"config":{{"Cmd":["sh"]}},"os":"linux"}}"##
            );

            let manifest = ManifestV1::new(
                "library/busybox",
                "latest",
                vec![
                    FsLayer {
                        blob_sum: top_sum.clone(),
                    },
                    FsLayer {
                        blob_sum: base_sum.clone(),
                    },
                ],
                vec![
                    V1Compatibility {
                        v1_compatibility: top_meta,
                    },
                    V1Compatibility {
                        v1_compatibility: base_meta,
                    },
                ],
            );

            Self {
                manifest,
                blobs: vec![(base_sum, base_blob), (top_sum, top_blob)],
                known_tag: None,
                unknown_image: false,
                schema2: SchemaTwo::Serve,
                gate: watch::Sender::new(true),
                gate_manifests: false,
                blob_fetches: AtomicUsize::new(0),
                manifest_fetches: AtomicUsize::new(0),
            }
        }

        pub(super) fn with_known_tag(mut self, tag: &str) -> Self {
            self.known_tag = Some(tag.to_string());
            self
        }

        pub(super) fn with_unknown_image(mut self) -> Self {
            self.unknown_image = true;
            self
        }

        pub(super) fn with_schema2(mut self, schema2: SchemaTwo) -> Self {
            self.schema2 = schema2;
            self
        }

        /// Holds blob responses until [`MockRegistry::open_gate`] is called.
        pub(super) fn gated(self) -> Self {
            self.gate.send_replace(false);
            self
        }

        /// Holds manifest responses as well as blob responses.
        pub(super) fn gated_manifests(mut self) -> Self {
            self.gate_manifests = true;
            self.gated()
        }

        pub(super) fn open_gate(&self) {
            self.gate.send_replace(true);
        }

        pub(super) fn blob_fetches(&self) -> usize {
            self.blob_fetches.load(Ordering::SeqCst)
        }

        pub(super) fn manifest_fetches(&self) -> usize {
            self.manifest_fetches.load(Ordering::SeqCst)
        }

        pub(super) fn schema1_digest(&self) -> String {
            utils::sha256_digest(serde_json::to_vec(&self.manifest).unwrap_or_default())
        }

        pub(super) fn schema2_digest(&self) -> String {
            utils::sha256_digest(schema2_body())
        }
    }

    #[async_trait::async_trait]
    impl RegistryClient for MockRegistry {
        async fn learn_registry_url(&self, _registry: &str) -> LayerpullResult<Url> {
            Ok(Url::parse("https://registry.test/v2/").expect("valid url"))
        }

        async fn learn_auth_url(
            &self,
            _url: &Url,
            reference: &Reference,
        ) -> LayerpullResult<Option<AuthChallenge>> {
            if self.unknown_image {
                return Err(LayerpullError::ImageNotFound(reference.get_repository().clone()));
            }
            Ok(None)
        }

        async fn fetch_token(&self, _challenge: &AuthChallenge) -> LayerpullResult<String> {
            Ok("token".into())
        }

        async fn fetch_manifest(
            &self,
            _session: &RegistrySession,
            reference: &Reference,
            version: ManifestVersion,
        ) -> LayerpullResult<FetchedManifest> {
            self.manifest_fetches.fetch_add(1, Ordering::SeqCst);
            if self.gate_manifests {
                let _ = self.gate.subscribe().wait_for(|open| *open).await;
            }

            if let Some(tag) = &self.known_tag {
                if reference.get_tag() != tag {
                    return Err(LayerpullError::TagNotFound {
                        tag: "unknown".into(),
                        image: "unknown".into(),
                    });
                }
            }

            match version {
                ManifestVersion::V1 => Ok(FetchedManifest {
                    manifest: Manifest::V1(self.manifest.clone()),
                    digest: self.schema1_digest(),
                }),
                ManifestVersion::V2 => match self.schema2 {
                    SchemaTwo::Serve => Ok(FetchedManifest {
                        manifest: Manifest::from_slice(ManifestVersion::V2, &schema2_body())?,
                        digest: self.schema2_digest(),
                    }),
                    SchemaTwo::Fail => Err(LayerpullError::ManifestFetch {
                        reference: reference.to_string(),
                        reason: "schema 2 not served".into(),
                    }),
                },
            }
        }

        async fn fetch_blob(
            &self,
            _session: &RegistrySession,
            _repository: &str,
            digest: &str,
            _offset: u64,
        ) -> LayerpullResult<BlobResponse> {
            self.blob_fetches.fetch_add(1, Ordering::SeqCst);

            let blob = self
                .blobs
                .iter()
                .find(|(sum, _)| sum == digest)
                .map(|(_, blob)| Bytes::from(blob.clone()))
                .ok_or_else(|| LayerpullError::layer_download(digest, "unknown blob"))?;

            let mut gate = self.gate.subscribe();
            let stream = futures::stream::once(async move {
                let _ = gate.wait_for(|open| *open).await;
                Ok(blob)
            });

            Ok(BlobResponse {
                offset: 0,
                stream: stream.boxed(),
            })
        }
    }

    impl Env {
        pub(super) fn new(temp_dir: &TempDir, registry: Arc<MockRegistry>) -> Self {
            let root = temp_dir.path().to_path_buf();
            let layers = Arc::new(MemoryLayerCache::new());
            let repositories = Arc::new(MemoryRepositoryCache::new());
            let downloader = Arc::new(LayerDownloader::new(registry.clone(), layers.clone(), 3));

            let puller = ImagePuller::builder()
                .registry(registry)
                .store(Arc::new(FsImageStore::new(root.join("store"))))
                .host(Arc::new(StaticHostIdentity("test-host".into())))
                .layers(layers.clone())
                .repositories(repositories.clone())
                .images(Arc::new(MemoryImageCache::new()))
                .downloader(downloader.clone())
                .progress(Arc::new(NoopProgress))
                .build();

            Self {
                puller: Arc::new(puller),
                downloader,
                layers,
                repositories,
                root,
            }
        }

        pub(super) fn options(&self, reference: &str, cleanup: bool) -> PullOptions {
            PullOptions::builder()
                .reference(reference)
                .destination(self.root.join("downloads"))
                .store_root(self.store_root())
                .timeout(Duration::from_secs(30))
                .cleanup(cleanup)
                .build()
        }

        pub(super) fn store_root(&self) -> PathBuf {
            self.root.join("store")
        }
    }

    /// Polls until the condition holds, for at most five seconds.
    pub(super) async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    /// Builds a gzipped tar holding the given files.
    fn layer_blob(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).expect("append file");
        }
        let tar = builder.into_inner().expect("finish tar");

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar).expect("compress");
        encoder.finish().expect("finish gzip")
    }

    fn schema2_body() -> Vec<u8> {
        br#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json","config":{"mediaType":"application/vnd.docker.container.image.v1+json","size":1469,"digest":"sha256:2b8fd9751c4c0f5dd266fcae00707e67a2545ef34f9a29354585f93dac906749"},"layers":[]}"#
            .to_vec()
    }
}
