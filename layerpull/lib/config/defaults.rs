use std::{path::PathBuf, sync::LazyLock, time::Duration};

use crate::utils::LAYERPULL_HOME_DIR;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The registry host used when a reference names no registry, or names `docker.io`.
pub const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

/// The registry domain users write in references that maps to [`DEFAULT_REGISTRY`].
pub const DEFAULT_REFERENCE_DOMAIN: &str = "docker.io";

/// The namespace prepended to single-segment repositories on the default registry.
pub const DEFAULT_REFERENCE_REPO_NAMESPACE: &str = "library";

/// The tag used when a reference names only a repository.
pub const DEFAULT_REFERENCE_TAG: &str = "latest";

/// The subdirectory of the layerpull home where scratch downloads land.
pub const DEFAULT_DESTINATION_SUBDIR: &str = "images";

/// The subdirectory of the layerpull home holding the local image store.
pub const DEFAULT_STORE_SUBDIR: &str = "store";

/// The file name of the SQLite cache database.
pub const DEFAULT_CACHE_DB_FILENAME: &str = "cache.db";

/// The file name used when logging to a file.
pub const DEFAULT_LOG_FILENAME: &str = "layerpull.log";

/// The store name used when the host has no usable identity.
pub const DEFAULT_STORE_NAME: &str = "default";

/// The overall deadline of one pull.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(3600);

/// How many layer blobs may download at the same time across all pulls.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 3;

/// The path where all layerpull data is stored when `LAYERPULL_HOME` is not set.
pub static DEFAULT_LAYERPULL_HOME: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(LAYERPULL_HOME_DIR)
});
