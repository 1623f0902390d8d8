use std::{path::PathBuf, time::Duration};

use getset::{Getters, Setters};
use typed_builder::TypedBuilder;

use crate::{
    config::{
        DEFAULT_DESTINATION_SUBDIR, DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_PULL_TIMEOUT,
        DEFAULT_STORE_SUBDIR,
    },
    utils,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Options for a single image pull.
///
/// ## Examples
///
/// ```
/// use layerpull::config::PullOptions;
///
/// let options = PullOptions::builder().reference("busybox").build();
/// assert_eq!(options.get_reference(), "busybox");
/// assert_eq!(options.get_timeout().as_secs(), 3600);
/// ```
#[derive(Debug, Clone, TypedBuilder, Getters, Setters)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct PullOptions {
    /// The image reference to pull.
    #[builder(setter(into))]
    reference: String,

    /// Root of the scratch directory tree downloads are written to.
    #[builder(default = utils::layerpull_home_path().join(DEFAULT_DESTINATION_SUBDIR), setter(into))]
    destination: PathBuf,

    /// Root of the local image store.
    #[builder(default = utils::layerpull_home_path().join(DEFAULT_STORE_SUBDIR), setter(into))]
    store_root: PathBuf,

    /// Registry user name.
    #[builder(default, setter(strip_option, into))]
    username: Option<String>,

    /// Registry password.
    #[builder(default, setter(strip_option, into))]
    password: Option<String>,

    /// Deadline for the whole pull.
    #[builder(default = DEFAULT_PULL_TIMEOUT)]
    timeout: Duration,

    /// Accept registry certificates that fail verification.
    #[builder(default)]
    insecure_skip_verify: bool,

    /// Fall back to plain HTTP when the registry does not speak HTTPS.
    #[builder(default)]
    insecure_allow_http: bool,

    /// Extra PEM certificate files trusted when talking to the registry.
    #[builder(default)]
    registry_cas: Vec<PathBuf>,

    /// How many layer blobs may download concurrently.
    #[builder(default = DEFAULT_DOWNLOAD_CONCURRENCY)]
    download_concurrency: usize,

    /// Remove the scratch directory after the last layer is written to the store.
    #[builder(default)]
    cleanup: bool,
}
