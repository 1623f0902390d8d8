use std::path::PathBuf;

use sysinfo::System;
use tokio::fs;

use crate::LayerpullResult;

use super::HostIdentity;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Where Linux exposes the machine's DMI product UUID.
pub const DMI_PRODUCT_UUID_PATH: &str = "/sys/class/dmi/id/product_uuid";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Identifies the host by its DMI product UUID, falling back to its hostname.
#[derive(Debug, Clone)]
pub struct SystemHostIdentity {
    dmi_path: PathBuf,
    use_hostname: bool,
}

/// A fixed host identity.
#[derive(Debug, Clone, Default)]
pub struct StaticHostIdentity(pub String);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SystemHostIdentity {
    /// Creates an identity provider reading the standard DMI path.
    pub fn new() -> Self {
        Self {
            dmi_path: PathBuf::from(DMI_PRODUCT_UUID_PATH),
            use_hostname: true,
        }
    }

    /// Reads the product UUID from another file.
    pub fn with_dmi_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dmi_path = path.into();
        self
    }

    /// Enables or disables the hostname fallback.
    pub fn with_hostname_fallback(mut self, enabled: bool) -> Self {
        self.use_hostname = enabled;
        self
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for SystemHostIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HostIdentity for SystemHostIdentity {
    async fn identity(&self) -> LayerpullResult<String> {
        match fs::read_to_string(&self.dmi_path).await {
            Ok(uuid) if !uuid.trim().is_empty() => return Ok(sanitize(&uuid.to_lowercase())),
            Ok(_) => tracing::debug!(path = %self.dmi_path.display(), "product uuid is empty"),
            Err(e) => {
                tracing::debug!(path = %self.dmi_path.display(), error = %e, "product uuid unavailable")
            }
        }

        if !self.use_hostname {
            return Ok(String::new());
        }

        Ok(System::host_name()
            .map(|name| sanitize(&name))
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl HostIdentity for StaticHostIdentity {
    async fn identity(&self) -> LayerpullResult<String> {
        Ok(self.0.clone())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Keeps an identifier usable as a single path segment.
fn sanitize(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '-',
        })
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
