use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::checksum::HashAlgorithm;
use crate::error::{Error, Result};
use crate::verify::VerifyOptions;

/// Integrity settings for archive creation and verification.
///
/// ```json
/// { "algorithm": "sha256", "verify_on_create": true, "workers": 0 }
/// ```
///
/// Missing keys take their defaults; unknown keys are rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IntegrityConfig {
    pub algorithm: HashAlgorithm,
    /// Verify and record status right after checksums are generated.
    pub verify_on_create: bool,
    /// Per-entry verification workers; `0` means one per available core.
    pub workers: usize,
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self { algorithm: HashAlgorithm::Sha256, verify_on_create: true, workers: 0 }
    }
}

impl IntegrityConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config { path: path.to_path_buf(), detail: e.to_string() })
    }

    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions::with_workers(self.workers)
    }
}
