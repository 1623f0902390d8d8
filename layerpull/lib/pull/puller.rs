use std::{path::PathBuf, sync::Arc};

use getset::Getters;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::{
    cache::{
        init_db, ImageCache, LayerCache, MemoryLayerCache, RepositoryCache, SqliteImageCache,
        SqliteRepositoryCache, CACHE_DB_MIGRATOR,
    },
    config::{PullOptions, DEFAULT_CACHE_DB_FILENAME, DEFAULT_STORE_NAME},
    oci::{
        DockerRegistry, FetchedManifest, ImageConfig, ImageWithMeta, Manifest, ManifestV1,
        ManifestVersion, Reference, RegistryClient, RegistrySession,
    },
    store::{FsImageStore, HostIdentity, ImageStoreBackend, SystemHostIdentity},
    utils::{self, LAYER_TAR_EXTENSION},
    LayerpullError, LayerpullResult,
};

use super::{
    create_image_config, destination_directory, layer_directory, layers_to_download,
    update_repository_cache, write_image_blob, DownloadJob, LayerDownloader, ProgressOutput,
    PullContext, TracingProgress,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Pulls images and registers them in the local image store.
///
/// One puller is meant to live as long as the process and be shared by every pull, so that
/// concurrent pulls share layer downloads and caches.
#[derive(TypedBuilder)]
pub struct ImagePuller {
    /// The registry protocol client.
    registry: Arc<dyn RegistryClient>,

    /// The image store layers are written to.
    store: Arc<dyn ImageStoreBackend>,

    /// Names the store of this host.
    host: Arc<dyn HostIdentity>,

    /// Layers known to this process.
    layers: Arc<dyn LayerCache>,

    /// Reference to image ID bindings.
    repositories: Arc<dyn RepositoryCache>,

    /// Computed image configs.
    images: Arc<dyn ImageCache>,

    /// The shared layer download coordinator.
    downloader: Arc<LayerDownloader>,

    /// Receives progress events.
    #[builder(default = Arc::new(TracingProgress) as Arc<dyn ProgressOutput>)]
    progress: Arc<dyn ProgressOutput>,
}

/// The outcome of the optional schema 2 manifest fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum SecondaryManifest {
    /// The registry served a schema 2 manifest. Its digest is the image's digest.
    Fetched(FetchedManifest),

    /// The registry answered with something other than a schema 2 manifest.
    Absent,

    /// The fetch failed. The schema 1 digest stays authoritative.
    Failed(String),
}

/// An image whose layers are all downloaded.
#[derive(Debug, Clone, Getters)]
#[getset(get = "pub with_prefix")]
pub struct PulledImage {
    /// The resolved reference.
    reference: Reference,

    /// The name of the store the layers belong to.
    store: String,

    /// The registry session the image was pulled with.
    session: RegistrySession,

    /// The pull's scratch directory.
    destination: PathBuf,

    /// The schema 1 manifest the layers were built from.
    manifest: ManifestV1,

    /// The image's manifest digest, from schema 2 when available.
    digest: String,

    /// The result of the schema 2 manifest fetch.
    schema2: SecondaryManifest,

    /// The downloaded layers, newest first.
    layers: Vec<ImageWithMeta>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImagePuller {
    /// Creates a puller talking to a Docker registry and writing to the filesystem store in
    /// `options`, with the repository and image caches kept in the layerpull home.
    pub async fn from_options(options: &PullOptions) -> LayerpullResult<Self> {
        let registry: Arc<dyn RegistryClient> = Arc::new(DockerRegistry::new(options).await?);
        let layers: Arc<dyn LayerCache> = Arc::new(MemoryLayerCache::new());
        let pool = init_db(
            utils::layerpull_home_path().join(DEFAULT_CACHE_DB_FILENAME),
            &CACHE_DB_MIGRATOR,
        )
        .await?;

        let downloader = Arc::new(LayerDownloader::new(
            registry.clone(),
            layers.clone(),
            *options.get_download_concurrency(),
        ));

        Ok(Self::builder()
            .registry(registry)
            .store(Arc::new(FsImageStore::new(options.get_store_root())))
            .host(Arc::new(SystemHostIdentity::new()))
            .layers(layers)
            .repositories(Arc::new(SqliteRepositoryCache::new(pool.clone())))
            .images(Arc::new(SqliteImageCache::new(pool)))
            .downloader(downloader)
            .build())
    }

    /// Returns the shared download coordinator.
    pub fn downloader(&self) -> &Arc<LayerDownloader> {
        &self.downloader
    }

    /// Pulls the image named in `options` and downloads every layer it is missing.
    ///
    /// The pull ends when `caller` is cancelled or the options' timeout passes. Registering
    /// the downloaded layers is a separate step, see [`ImagePuller::register_image`].
    pub async fn pull(
        &self,
        options: &PullOptions,
        caller: &CancellationToken,
    ) -> LayerpullResult<PulledImage> {
        let ctx = PullContext::new(caller, *options.get_timeout());
        self.pull_with(&ctx, options)
            .await
            .inspect_err(|e| tracing::error!(reference = %options.get_reference(), "pull failed: {e}"))
    }

    /// Writes the pulled layers to the image store, oldest first, then computes the image
    /// config and binds the image's references to it.
    pub async fn register_image(
        &self,
        options: &PullOptions,
        pulled: &PulledImage,
        caller: &CancellationToken,
    ) -> LayerpullResult<ImageConfig> {
        let ctx = PullContext::new(caller, *options.get_timeout());
        let destination = pulled.get_destination();

        let mut downloaded = Vec::new();
        for layer in pulled.get_layers().iter().rev() {
            let id = layer.get_id();
            let tar_path = layer_directory(destination, id).join(format!("{id}.{LAYER_TAR_EXTENSION}"));
            if fs::try_exists(&tar_path).await? {
                downloaded.push(layer);
            } else if self.store.has_layer(layer.get_store(), id).await? {
                tracing::debug!(layer = %id, "layer already in the image store, skipping write");
            } else {
                return Err(LayerpullError::blob_write(
                    id.as_str(),
                    format!(
                        "no download at {} and not in image store {}",
                        tar_path.display(),
                        layer.get_store()
                    ),
                ));
            }
        }

        let cleanup = *options.get_cleanup();
        let last = downloaded.len();
        for (i, layer) in downloaded.into_iter().enumerate() {
            write_image_blob(
                &ctx,
                self.store.as_ref(),
                layer,
                destination,
                self.progress.clone(),
                cleanup && i + 1 == last,
            )
            .await?;
        }

        if cleanup && last == 0 && fs::try_exists(destination).await? {
            fs::remove_dir_all(destination).await?;
        }

        let config = create_image_config(
            pulled.get_layers(),
            pulled.get_manifest(),
            pulled.get_digest(),
            pulled.get_reference(),
            self.repositories.as_ref(),
            self.images.as_ref(),
        )
        .await?;

        let top = pulled
            .get_layers()
            .first()
            .ok_or_else(|| LayerpullError::manifest_decode("layer chain", "image has no layers"))?;

        self.images.insert(&config).await?;
        self.repositories
            .bind_layer(top.get_id(), config.get_image_id())
            .await?;
        update_repository_cache(
            self.repositories.as_ref(),
            pulled.get_reference(),
            pulled.get_digest(),
            top.get_id(),
            config.get_image_id(),
        )
        .await?;

        tracing::info!(reference = %pulled.get_reference(), image_id = %config.get_image_id(), "image registered");
        Ok(config)
    }

    async fn pull_with(
        &self,
        ctx: &PullContext,
        options: &PullOptions,
    ) -> LayerpullResult<PulledImage> {
        let reference: Reference = options.get_reference().parse()?;
        let repository = reference.get_repository().clone();
        tracing::info!(%reference, "pulling image");

        let host = ctx
            .run(self.host.identity())
            .await
            .map_err(|e| match e {
                e @ LayerpullError::HostIdentity(_) => e,
                e => LayerpullError::HostIdentity(e.to_string()),
            })?;
        let store = if host.is_empty() {
            tracing::warn!("host has no usable identity, using store name {DEFAULT_STORE_NAME}");
            DEFAULT_STORE_NAME.to_string()
        } else {
            tracing::info!("Using UUID ({host}) for imagestore name");
            host
        };

        ctx.run(self.store.ping()).await.map_err(|e| match e {
            e @ LayerpullError::BackendUnreachable { .. } => e,
            e => LayerpullError::BackendUnreachable {
                host: self.store.address(),
                reason: e.to_string(),
            },
        })?;

        let url = ctx
            .run(self.registry.learn_registry_url(reference.get_registry()))
            .await
            .map_err(|e| match e {
                e @ LayerpullError::RegistryDiscovery { .. } => e,
                e => LayerpullError::RegistryDiscovery {
                    registry: reference.get_registry().clone(),
                    reason: e.to_string(),
                },
            })?;

        let challenge = ctx
            .run(self.registry.learn_auth_url(&url, &reference))
            .await
            .map_err(|e| match e {
                LayerpullError::ImageNotFound(_) => {
                    LayerpullError::ImageNotFound(options.get_reference().clone())
                }
                e => LayerpullError::Auth {
                    image: repository.clone(),
                    reason: format!("Failed to obtain OAuth endpoint: {e}"),
                },
            })?;

        let token = match challenge {
            Some(challenge) => Some(
                ctx.run(self.registry.fetch_token(&challenge))
                    .await
                    .map_err(|e| match e {
                        e @ LayerpullError::Auth { .. } => e,
                        e => LayerpullError::Auth {
                            image: repository.clone(),
                            reason: format!("Failed to fetch OAuth token: {e}"),
                        },
                    })?,
            ),
            None => None,
        };
        let session = RegistrySession { url, token };

        self.progress
            .message("", &format!("Pulling from {repository}"));

        let fetched = ctx
            .run(
                self.registry
                    .fetch_manifest(&session, &reference, ManifestVersion::V1),
            )
            .await
            .map_err(|e| match e {
                LayerpullError::ImageNotFound(_) => {
                    LayerpullError::ImageNotFound(repository.clone())
                }
                LayerpullError::TagNotFound { .. } => LayerpullError::TagNotFound {
                    tag: reference.get_tag().clone(),
                    image: repository.clone(),
                },
                e @ LayerpullError::ManifestDecode { .. } => e,
                e => manifest_fetch_error(&reference, e),
            })?;

        let Manifest::V1(manifest) = fetched.manifest else {
            return Err(LayerpullError::manifest_decode(
                "schema 1 manifest",
                "Error pulling manifest schema 1",
            ));
        };
        let mut digest = fetched.digest;

        let schema2 = match ctx
            .run(
                self.registry
                    .fetch_manifest(&session, &reference, ManifestVersion::V2),
            )
            .await
        {
            Ok(fetched @ FetchedManifest {
                manifest: Manifest::V2(_),
                ..
            }) => {
                digest = fetched.digest.clone();
                SecondaryManifest::Fetched(fetched)
            }
            Ok(_) => SecondaryManifest::Absent,
            Err(e @ LayerpullError::Cancelled(_)) => {
                return Err(manifest_fetch_error(&reference, e));
            }
            Err(e) => {
                tracing::warn!(%reference, "schema 2 manifest unavailable: {e}");
                SecondaryManifest::Failed(e.to_string())
            }
        };

        let layers = layers_to_download(&manifest, &store, self.layers.as_ref()).await?;

        let destination = destination_directory(options.get_destination(), &session.url, &reference);
        let job = DownloadJob {
            session: session.clone(),
            repository: repository.clone(),
            destination: destination.clone(),
        };
        let layers = self.downloader.download_layers(ctx, &job, layers).await?;

        tracing::info!(%reference, %digest, layers = layers.len(), "image pulled");

        Ok(PulledImage {
            reference,
            store,
            session,
            destination,
            manifest,
            digest,
            schema2,
            layers,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl std::fmt::Debug for ImagePuller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePuller")
            .field("store", &self.store.address())
            .field("downloader", &self.downloader)
            .finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn manifest_fetch_error(reference: &Reference, error: LayerpullError) -> LayerpullError {
    LayerpullError::ManifestFetch {
        reference: reference.to_string(),
        reason: format!("Error while pulling image manifest: {error}"),
    }
}
