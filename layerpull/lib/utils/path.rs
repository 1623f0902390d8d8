//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The sub directory of the user's home where layerpull data is stored.
pub const LAYERPULL_HOME_DIR: &str = ".layerpull";

/// The environment variable that overrides the layerpull home directory.
pub const LAYERPULL_HOME_ENV_VAR: &str = "LAYERPULL_HOME";

/// The suffix of a layer's v1 compatibility document inside its scratch directory.
pub const LAYER_JSON_EXTENSION: &str = "json";

/// The suffix of a layer's compressed blob inside its scratch directory.
pub const LAYER_BLOB_EXTENSION: &str = "tar.gz";

/// The suffix of a layer's extracted tar inside its scratch directory.
pub const LAYER_TAR_EXTENSION: &str = "tar";

/// The suffix of the file written next to an unpacked layer describing it.
pub const LAYER_META_EXTENSION: &str = "meta.json";

/// The suffix of a layer directory that is still being unpacked.
pub const LAYER_PARTIAL_EXTENSION: &str = "partial";
