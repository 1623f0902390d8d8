use std::{
    collections::HashMap,
    io::{BufReader, Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt, StreamExt,
};
use oci_spec::image::{Digest, DigestAlgorithm};
use sha2::{Digest as _, Sha256};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
    sync::Semaphore,
};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::LayerCache,
    oci::{ImageWithMeta, RegistryClient, RegistrySession},
    utils::{self, LAYER_BLOB_EXTENSION, LAYER_JSON_EXTENSION, LAYER_TAR_EXTENSION},
    LayerpullError, LayerpullResult,
};

use super::{layer_directory, PullContext};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const EXTRACT_BUFFER_SIZE: usize = 64 * 1024;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Where and from which repository one pull downloads its layers.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// The registry session of the pull.
    pub session: RegistrySession,

    /// The repository the blobs belong to.
    pub repository: String,

    /// The pull's scratch directory.
    pub destination: PathBuf,
}

/// Downloads layer blobs for every pull in the process.
///
/// Each layer ID has at most one download in flight. Callers asking for a layer that is already
/// being downloaded wait for that download and share its outcome. A download is abandoned only
/// once every pull waiting on it has gone, and the number of concurrent downloads is capped.
pub struct LayerDownloader {
    registry: Arc<dyn RegistryClient>,
    cache: Arc<dyn LayerCache>,
    permits: Arc<Semaphore>,
    inflight: Arc<Mutex<HashMap<String, Flight>>>,
    next_flight: AtomicU64,
}

type FlightResult = Shared<BoxFuture<'static, Result<ImageWithMeta, String>>>;

/// One in-flight download and the pulls waiting on it.
struct Flight {
    id: u64,
    waiters: usize,
    token: CancellationToken,
    result: FlightResult,
}

/// Unregisters a waiter from its flight when dropped.
struct Waiter {
    key: String,
    flight: u64,
    inflight: Arc<Mutex<HashMap<String, Flight>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LayerDownloader {
    /// Creates a downloader allowing `concurrency` downloads at a time.
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        cache: Arc<dyn LayerCache>,
        concurrency: usize,
    ) -> Self {
        Self {
            registry,
            cache,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            next_flight: AtomicU64::new(0),
        }
    }

    /// Returns how many layers are being downloaded.
    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).len()
    }

    /// Returns how many pulls are waiting on the layer's download.
    pub fn waiters(&self, layer_id: &str) -> usize {
        lock(&self.inflight)
            .get(layer_id)
            .map_or(0, |flight| flight.waiters)
    }

    /// Downloads every layer that is not already in the layer cache.
    ///
    /// Returns the completed records in the order given. Fails on the first layer that fails,
    /// or with a download error naming the unfinished layers once the pull is cancelled.
    pub async fn download_layers(
        &self,
        ctx: &PullContext,
        job: &DownloadJob,
        layers: Vec<ImageWithMeta>,
    ) -> LayerpullResult<Vec<ImageWithMeta>> {
        let ids: Vec<String> = layers.iter().map(|l| l.get_id().clone()).collect();
        let downloads = layers
            .into_iter()
            .map(|layer| self.download_layer(job, layer));

        match ctx.run(futures::future::try_join_all(downloads)).await {
            Err(LayerpullError::Cancelled(reason)) => {
                let mut pending = Vec::new();
                for id in ids {
                    match self.cache.get(&id).await {
                        Ok(Some(layer)) if !layer.get_downloading() => {}
                        _ => pending.push(id),
                    }
                }
                Err(LayerpullError::layer_download(pending.join(", "), reason))
            }
            result => result,
        }
    }

    async fn download_layer(
        &self,
        job: &DownloadJob,
        layer: ImageWithMeta,
    ) -> LayerpullResult<ImageWithMeta> {
        if let Some(cached) = self.cache.get(layer.get_id()).await? {
            if !cached.get_downloading() {
                return Ok(cached);
            }
        }

        let id = layer.get_id().clone();
        let (waiter, result) = self.join(job, layer);
        let outcome = result.await;
        drop(waiter);

        outcome.map_err(|reason| LayerpullError::layer_download(id, reason))
    }

    /// Registers as a waiter on the layer's flight, starting one if there is none.
    fn join(&self, job: &DownloadJob, layer: ImageWithMeta) -> (Waiter, FlightResult) {
        let key = layer.get_id().clone();
        let mut inflight = lock(&self.inflight);

        if let Some(flight) = inflight.get_mut(&key) {
            tracing::debug!(layer = %key, "joining in-flight download");
            flight.waiters += 1;
            let waiter = Waiter {
                key,
                flight: flight.id,
                inflight: self.inflight.clone(),
            };
            return (waiter, flight.result.clone());
        }

        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let handle = tokio::spawn(fetch_layer(
            self.registry.clone(),
            self.cache.clone(),
            self.permits.clone(),
            token.clone(),
            job.clone(),
            layer,
        ));
        let result = async move {
            match handle.await {
                Ok(Ok(layer)) => Ok(layer),
                Ok(Err(LayerpullError::LayerDownload { reason, .. })) => Err(reason),
                Ok(Err(e)) => Err(e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        }
        .boxed()
        .shared();

        inflight.insert(
            key.clone(),
            Flight {
                id,
                waiters: 1,
                token,
                result: result.clone(),
            },
        );

        let waiter = Waiter {
            key,
            flight: id,
            inflight: self.inflight.clone(),
        };
        (waiter, result)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut inflight = lock(&self.inflight);
        let Some(flight) = inflight.get_mut(&self.key) else {
            return;
        };
        if flight.id != self.flight {
            return;
        }

        flight.waiters -= 1;
        if flight.waiters == 0 {
            flight.token.cancel();
            inflight.remove(&self.key);
        }
    }
}

impl std::fmt::Debug for LayerDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerDownloader")
            .field("in_flight", &self.in_flight())
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Downloads and extracts one layer, keeping the layer cache in step.
async fn fetch_layer(
    registry: Arc<dyn RegistryClient>,
    cache: Arc<dyn LayerCache>,
    permits: Arc<Semaphore>,
    token: CancellationToken,
    job: DownloadJob,
    layer: ImageWithMeta,
) -> LayerpullResult<ImageWithMeta> {
    let id = layer.get_id().clone();

    let work = async {
        let _permit = permits
            .acquire_owned()
            .await
            .map_err(|e| LayerpullError::layer_download(id.as_str(), e))?;

        let mut layer = layer;
        layer.set_downloading(true);
        cache.insert(layer.clone()).await?;

        let (diff_id, size) = fetch_and_extract(registry.as_ref(), &job, &layer).await?;
        layer
            .set_diff_id(diff_id)
            .set_size(size)
            .set_downloading(false);
        cache.insert(layer.clone()).await?;

        tracing::info!(layer = %id, diff_id = %layer.get_diff_id(), "layer downloaded");
        Ok(layer)
    };

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => Err(LayerpullError::Cancelled("download abandoned".into())),
        result = work => result,
    };

    if let Err(e) = &result {
        tracing::warn!(layer = %id, error = %e, "layer download failed");
        if let Ok(Some(record)) = cache.get(&id).await {
            if *record.get_downloading() {
                cache.remove(&id).await?;
            }
        }
    }

    result
}

/// Fetches a layer's blob into its scratch directory and extracts it.
///
/// Returns the diff ID and the uncompressed size.
async fn fetch_and_extract(
    registry: &dyn RegistryClient,
    job: &DownloadJob,
    layer: &ImageWithMeta,
) -> LayerpullResult<(String, i64)> {
    let id = layer.get_id();
    let dir = layer_directory(&job.destination, id);
    fs::create_dir_all(&dir).await?;

    fs::write(
        dir.join(format!("{id}.{LAYER_JSON_EXTENSION}")),
        layer.get_meta(),
    )
    .await?;

    let blob_path = dir.join(format!("{id}.{LAYER_BLOB_EXTENSION}"));
    let tar_path = dir.join(format!("{id}.{LAYER_TAR_EXTENSION}"));

    // Extracted by an earlier attempt that got as far as removing the blob.
    if !fs::try_exists(&blob_path).await? && fs::try_exists(&tar_path).await? {
        let hash = utils::get_file_hash(&tar_path, &DigestAlgorithm::Sha256).await?;
        let size = fs::metadata(&tar_path).await?.len();
        return Ok((format!("sha256:{}", hex::encode(hash)), size as i64));
    }

    download_blob(registry, job, layer, &blob_path).await?;

    let source = blob_path.clone();
    let (diff_id, size) = tokio::task::spawn_blocking(move || extract_blob(&source, &tar_path))
        .await??;
    fs::remove_file(&blob_path).await?;

    Ok((diff_id, size))
}

/// Downloads a blob, resuming a partial file, and checks its digest.
async fn download_blob(
    registry: &dyn RegistryClient,
    job: &DownloadJob,
    layer: &ImageWithMeta,
    path: &Path,
) -> LayerpullResult<()> {
    let id = layer.get_id();
    let blob_sum = &layer.get_layer().blob_sum;
    let digest: Digest = blob_sum
        .parse()
        .map_err(|e| LayerpullError::layer_download(id.as_str(), e))?;

    let downloaded_size = match fs::metadata(path).await {
        Ok(metadata) => metadata.len(),
        Err(_) => 0,
    };
    if downloaded_size > 0 && blob_matches(path, &digest).await? {
        tracing::info!("blob already downloaded, skipping: {}", path.display());
        return Ok(());
    }

    let response = match registry
        .fetch_blob(&job.session, &job.repository, blob_sum, downloaded_size)
        .await
    {
        Ok(response) => response,
        Err(e) => {
            if downloaded_size > 0 {
                fs::remove_file(path).await?;
            }
            return Err(e);
        }
    };

    let mut file = if response.offset == 0 {
        OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(path)
            .await?
    } else {
        OpenOptions::new().append(true).open(path).await?
    };

    let mut stream = response.stream;
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;

    if !blob_matches(path, &digest).await? {
        fs::remove_file(path).await?;
        return Err(LayerpullError::layer_download(
            id.as_str(),
            format!("({}:{blob_sum}) file hash does not match", job.repository),
        ));
    }

    Ok(())
}

async fn blob_matches(path: &Path, digest: &Digest) -> LayerpullResult<bool> {
    let actual = hex::encode(utils::get_file_hash(path, digest.algorithm()).await?);
    Ok(actual == digest.digest())
}

/// Decompresses a gzipped tar, returning the digest and size of the tar.
fn extract_blob(source: &Path, target: &Path) -> std::io::Result<(String, i64)> {
    let mut decoder = flate2::read::GzDecoder::new(BufReader::new(std::fs::File::open(source)?));
    let mut output = std::fs::File::create(target)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; EXTRACT_BUFFER_SIZE];
    let mut size = 0u64;

    loop {
        let n = decoder.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        output.write_all(&buffer[..n])?;
        size += n as u64;
    }
    output.sync_all()?;

    Ok((
        format!("sha256:{}", hex::encode(hasher.finalize())),
        size as i64,
    ))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use flate2::{write::GzEncoder, Compression};
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_downloader_extract_blob_reports_diff_id_and_size() -> anyhow::Result<()> {
        let temp_dir = tempdir()?;
        let tar = b"not really a tar, but bytes all the same".repeat(100);

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tar)?;
        let source = temp_dir.path().join("layer.tar.gz");
        std::fs::write(&source, encoder.finish()?)?;

        let target = temp_dir.path().join("layer.tar");
        let (diff_id, size) = extract_blob(&source, &target)?;

        assert_eq!(diff_id, utils::sha256_digest(&tar));
        assert_eq!(size, tar.len() as i64);
        assert_eq!(std::fs::read(&target)?, tar);

        Ok(())
    }
}
