use std::{env, path::PathBuf};

use crate::config::DEFAULT_LAYERPULL_HOME;

use super::LAYERPULL_HOME_ENV_VAR;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the layerpull home directory.
///
/// Uses `LAYERPULL_HOME` when it is set, and the default home otherwise.
pub fn layerpull_home_path() -> PathBuf {
    match env::var(LAYERPULL_HOME_ENV_VAR) {
        Ok(home) if !home.is_empty() => PathBuf::from(home),
        _ => {
            tracing::debug!(
                "{LAYERPULL_HOME_ENV_VAR} is not set, using default: {}",
                DEFAULT_LAYERPULL_HOME.display()
            );
            DEFAULT_LAYERPULL_HOME.clone()
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
