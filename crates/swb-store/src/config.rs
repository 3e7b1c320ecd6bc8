// SPDX-License-Identifier: MIT OR Apache-2.0
//! Object-store configuration from the environment.

use serde::{Deserialize, Serialize};

/// S3-style object store settings, read from `S3_*` environment
/// variables. Which SDK consumes them is deployment-specific; the
/// platform only carries them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Endpoint URL.
    pub endpoint: Option<String>,
    /// Access key id.
    pub access_key: Option<String>,
    /// Secret access key.
    pub secret_key: Option<String>,
    /// Region.
    pub region: String,
    /// Bucket name.
    pub bucket: Option<String>,
    /// Use path-style addressing.
    pub force_path_style: bool,
    /// Presigned URL lifetime in seconds.
    pub presign_expires: u64,
    /// Public endpoint substituted into presigned URLs, when the
    /// internal endpoint is not reachable by browsers.
    pub public_endpoint: Option<String>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: "us-east-1".to_string(),
            bucket: None,
            force_path_style: true,
            presign_expires: 300,
            public_endpoint: None,
        }
    }
}

impl ObjectStoreConfig {
    /// Read the `S3_*` environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let get = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let defaults = Self::default();
        Self {
            endpoint: get("S3_ENDPOINT"),
            access_key: get("S3_ACCESS_KEY"),
            secret_key: get("S3_SECRET_KEY"),
            region: get("S3_REGION").unwrap_or(defaults.region),
            bucket: get("S3_BUCKET"),
            force_path_style: get("S3_FORCE_PATH_STYLE")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(defaults.force_path_style),
            presign_expires: get("S3_PRESIGN_EXPIRES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.presign_expires),
            public_endpoint: get("S3_PUBLIC_ENDPOINT"),
        }
    }
}
