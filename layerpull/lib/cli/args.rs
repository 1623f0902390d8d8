use std::{path::PathBuf, time::Duration};

use clap::Parser;

use crate::config::{PullOptions, DEFAULT_DOWNLOAD_CONCURRENCY, DEFAULT_PULL_TIMEOUT};

use super::styles;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// layerpull - pulls container images into a local image store
#[derive(Debug, Parser)]
#[command(name = "layerpull", author, about, version, styles=styles::styles())]
pub struct LayerpullArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<LayerpullSubcommand>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    pub logfile: Option<PathBuf>,
}

/// Available subcommands
#[derive(Debug, Parser)]
pub enum LayerpullSubcommand {
    /// Pull an image and register it in the image store
    #[command(name = "pull")]
    Pull(PullArgs),
}

/// Arguments of the `pull` subcommand
#[derive(Debug, Clone, Parser)]
pub struct PullArgs {
    /// The image reference, e.g. `busybox:latest`
    #[arg(required = true)]
    pub reference: String,

    /// Directory downloads are written to
    #[arg(short, long, value_name = "PATH")]
    pub destination: Option<PathBuf>,

    /// Root of the image store
    #[arg(long, value_name = "PATH")]
    pub store_root: Option<PathBuf>,

    /// Registry user name
    #[arg(short, long)]
    pub username: Option<String>,

    /// Registry password
    #[arg(short, long, requires = "username")]
    pub password: Option<String>,

    /// Deadline for the whole pull, in seconds
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_PULL_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Skip registry certificate verification
    #[arg(long)]
    pub insecure_skip_verify: bool,

    /// Allow plain HTTP registries
    #[arg(long)]
    pub insecure_allow_http: bool,

    /// Extra PEM certificates to trust
    #[arg(long = "registry-ca", value_name = "PATH")]
    pub registry_cas: Vec<PathBuf>,

    /// Maximum concurrent layer downloads
    #[arg(long, default_value_t = DEFAULT_DOWNLOAD_CONCURRENCY)]
    pub concurrency: usize,

    /// Remove the download directory once the image is registered
    #[arg(long)]
    pub cleanup: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PullArgs {
    /// Converts the arguments into pull options, keeping defaults for unset paths.
    pub fn into_options(self) -> PullOptions {
        let mut options = PullOptions::builder()
            .reference(self.reference)
            .timeout(Duration::from_secs(self.timeout))
            .insecure_skip_verify(self.insecure_skip_verify)
            .insecure_allow_http(self.insecure_allow_http)
            .registry_cas(self.registry_cas)
            .download_concurrency(self.concurrency)
            .cleanup(self.cleanup)
            .build();

        if let Some(destination) = self.destination {
            options.set_destination(destination);
        }
        if let Some(store_root) = self.store_root {
            options.set_store_root(store_root);
        }
        if let Some(username) = self.username {
            options.set_username(Some(username));
        }
        if let Some(password) = self.password {
            options.set_password(Some(password));
        }

        options
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
