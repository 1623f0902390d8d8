use std::collections::{BTreeMap, HashMap};

use getset::Getters;
use serde::{Deserialize, Deserializer, Serialize};

use super::Timestamp;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The diff ID of a layer whose tar stream is empty.
pub const EMPTY_LAYER_DIFF_ID: &str =
    "sha256:5f70bf18a086007016e948b04aed3b82103a36bea41755b6cddfaf10ace3c6ef";

/// The only root filesystem type images use.
pub const ROOTFS_TYPE_LAYERS: &str = "layers";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An empty JSON object, used as the value of set-like maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// A list of strings that also accepts a single string when decoded.
///
/// `None` encodes as `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StrSlice(pub Option<Vec<String>>);

/// Container configuration recorded in an image.
///
/// Field order and names follow the Docker engine, and are part of the image ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct ContainerConfig {
    #[serde(rename = "Hostname")]
    pub hostname: String,

    #[serde(rename = "Domainname")]
    pub domainname: String,

    #[serde(rename = "User")]
    pub user: String,

    #[serde(rename = "AttachStdin")]
    pub attach_stdin: bool,

    #[serde(rename = "AttachStdout")]
    pub attach_stdout: bool,

    #[serde(rename = "AttachStderr")]
    pub attach_stderr: bool,

    #[serde(rename = "ExposedPorts", skip_serializing_if = "is_empty_map")]
    pub exposed_ports: Option<BTreeMap<String, Empty>>,

    #[serde(rename = "Tty")]
    pub tty: bool,

    #[serde(rename = "OpenStdin")]
    pub open_stdin: bool,

    #[serde(rename = "StdinOnce")]
    pub stdin_once: bool,

    #[serde(rename = "Env")]
    pub env: Option<Vec<String>>,

    #[serde(rename = "Cmd")]
    pub cmd: StrSlice,

    #[serde(rename = "Healthcheck", skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthConfig>,

    #[serde(rename = "ArgsEscaped", skip_serializing_if = "is_false")]
    pub args_escaped: bool,

    #[serde(rename = "Image")]
    pub image: String,

    #[serde(rename = "Volumes")]
    pub volumes: Option<BTreeMap<String, Empty>>,

    #[serde(rename = "WorkingDir")]
    pub working_dir: String,

    #[serde(rename = "Entrypoint")]
    pub entrypoint: StrSlice,

    #[serde(rename = "NetworkDisabled", skip_serializing_if = "is_false")]
    pub network_disabled: bool,

    #[serde(rename = "MacAddress", skip_serializing_if = "String::is_empty")]
    pub mac_address: String,

    #[serde(rename = "OnBuild")]
    pub on_build: Option<Vec<String>>,

    #[serde(rename = "Labels")]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(rename = "StopSignal", skip_serializing_if = "String::is_empty")]
    pub stop_signal: String,

    #[serde(rename = "StopTimeout", skip_serializing_if = "Option::is_none")]
    pub stop_timeout: Option<i64>,

    #[serde(rename = "Shell", skip_serializing_if = "StrSlice::is_empty")]
    pub shell: StrSlice,
}

/// How the container's health is probed. Durations are in nanoseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct HealthConfig {
    #[serde(rename = "Test", skip_serializing_if = "is_empty_vec")]
    pub test: Option<Vec<String>>,

    #[serde(rename = "Interval", skip_serializing_if = "is_zero")]
    pub interval: i64,

    #[serde(rename = "Timeout", skip_serializing_if = "is_zero")]
    pub timeout: i64,

    #[serde(rename = "StartPeriod", skip_serializing_if = "is_zero")]
    pub start_period: i64,

    #[serde(rename = "Retries", skip_serializing_if = "is_zero")]
    pub retries: i64,
}

/// The legacy per-layer image document carried in schema 1 manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct V1Image {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub parent: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub comment: String,

    pub created: Timestamp,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub container: String,

    pub container_config: ContainerConfig,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub docker_version: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub author: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ContainerConfig>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub architecture: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub os: String,

    #[serde(rename = "Size", skip_serializing_if = "is_zero")]
    pub size: i64,
}

/// One entry of an image's build history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(missing_docs)]
pub struct History {
    pub created: Timestamp,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub author: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub comment: String,

    #[serde(skip_serializing_if = "is_false")]
    pub empty_layer: bool,
}

/// The ordered diff IDs making up an image's filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct RootFs {
    #[serde(rename = "type")]
    pub fs_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diff_ids: Vec<String>,
}

/// The image document whose SHA-256 is the image ID.
///
/// Keys are declared in lexicographic order, which is the order they are hashed in.
#[derive(Debug, Serialize)]
#[allow(missing_docs)]
pub struct CanonicalImage<'a> {
    #[serde(skip_serializing_if = "is_empty_str")]
    pub architecture: &'a str,

    #[serde(skip_serializing_if = "is_empty_str")]
    pub author: &'a str,

    #[serde(skip_serializing_if = "is_empty_str")]
    pub comment: &'a str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<&'a ContainerConfig>,

    #[serde(skip_serializing_if = "is_empty_str")]
    pub container: &'a str,

    pub container_config: &'a ContainerConfig,

    pub created: Timestamp,

    #[serde(skip_serializing_if = "is_empty_str")]
    pub docker_version: &'a str,

    #[serde(skip_serializing_if = "is_empty_history")]
    pub history: &'a [History],

    #[serde(skip_serializing_if = "is_empty_str")]
    pub os: &'a str,

    pub rootfs: &'a RootFs,
}

/// The registered configuration of a pulled image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ImageConfig {
    /// The final image document, with the local layer ID, parent and accumulated size.
    #[serde(flatten)]
    v1_image: V1Image,

    /// The hex SHA-256 of the canonical image document.
    image_id: String,

    /// Manifest digests the image was pulled by.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    digests: Vec<String>,

    /// Tags the image was pulled by.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,

    /// The repository name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,

    /// Diff IDs keyed by layer. Never populated.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    diff_ids: HashMap<String, String>,

    /// The build history, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    history: Vec<History>,

    /// The reference the image was pulled by.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    reference: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StrSlice {
    /// Returns true when unset or empty.
    pub fn is_empty(&self) -> bool {
        self.0.as_ref().is_none_or(Vec::is_empty)
    }

    /// Joins the parts with single spaces.
    pub fn join(&self) -> String {
        self.0.as_deref().unwrap_or_default().join(" ")
    }
}

impl RootFs {
    /// Creates an empty layered root filesystem.
    pub fn new() -> Self {
        Self {
            fs_type: ROOTFS_TYPE_LAYERS.to_string(),
            diff_ids: Vec::new(),
        }
    }
}

impl ImageConfig {
    /// Assembles an image config record.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        v1_image: V1Image,
        image_id: impl Into<String>,
        digests: Vec<String>,
        tags: Vec<String>,
        name: impl Into<String>,
        history: Vec<History>,
        reference: impl Into<String>,
    ) -> Self {
        Self {
            v1_image,
            image_id: image_id.into(),
            digests,
            tags,
            name: name.into(),
            diff_ids: HashMap::new(),
            history,
            reference: reference.into(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<'de> Deserialize<'de> for StrSlice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        Ok(StrSlice(Option::<Raw>::deserialize(deserializer)?.map(
            |raw| match raw {
                Raw::One(s) => vec![s],
                Raw::Many(v) => v,
            },
        )))
    }
}

impl Default for RootFs {
    fn default() -> Self {
        Self::new()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

fn is_empty_vec(value: &Option<Vec<String>>) -> bool {
    value.as_ref().is_none_or(Vec::is_empty)
}

fn is_empty_str(value: &&str) -> bool {
    value.is_empty()
}

fn is_empty_history(value: &&[History]) -> bool {
    value.is_empty()
}

fn is_empty_map(value: &Option<BTreeMap<String, Empty>>) -> bool {
    value.as_ref().is_none_or(BTreeMap::is_empty)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
