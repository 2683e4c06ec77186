//! Acoustic fingerprinting through the Chromaprint `fpcalc` tool.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::debug;

use crate::beatmap_store::AcousticFingerprint;

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("failed to run {0}: {1}")]
    Spawn(String, std::io::Error),

    #[error("fpcalc could not decode the audio: {0}")]
    Decode(String),

    #[error("invalid fpcalc output: {0}")]
    InvalidOutput(String),
}

/// Computes a fingerprint of an audio file. Must be deterministic: the same
/// bytes always give the same fingerprint.
pub trait FingerprintEngine: Send + Sync {
    fn fingerprint(&self, audio_path: &Path) -> Result<AcousticFingerprint, FingerprintError>;
}

#[derive(Deserialize)]
struct FpcalcOutput {
    duration: f64,
    fingerprint: String,
}

pub struct FpcalcEngine {
    binary: PathBuf,
}

impl FpcalcEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Checks that the binary can be started at all.
    pub fn check_available(&self) -> Result<(), FingerprintError> {
        Command::new(&self.binary)
            .arg("-version")
            .output()
            .map(|_| ())
            .map_err(|e| FingerprintError::Spawn(self.binary.display().to_string(), e))
    }
}

fn parse_fpcalc_output(stdout: &[u8]) -> Result<AcousticFingerprint, FingerprintError> {
    let output: FpcalcOutput = serde_json::from_slice(stdout)
        .map_err(|e| FingerprintError::InvalidOutput(e.to_string()))?;
    if output.fingerprint.is_empty() {
        return Err(FingerprintError::InvalidOutput(
            "empty fingerprint".to_string(),
        ));
    }
    Ok(AcousticFingerprint {
        duration: output.duration,
        fingerprint: output.fingerprint,
    })
}

impl FingerprintEngine for FpcalcEngine {
    fn fingerprint(&self, audio_path: &Path) -> Result<AcousticFingerprint, FingerprintError> {
        let output = Command::new(&self.binary)
            .arg("-json")
            .arg(audio_path)
            .output()
            .map_err(|e| FingerprintError::Spawn(self.binary.display().to_string(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FingerprintError::Decode(stderr.trim().to_string()));
        }
        let fingerprint = parse_fpcalc_output(&output.stdout)?;
        debug!(
            "Fingerprinted {:?}: {:.1}s",
            audio_path, fingerprint.duration
        );
        Ok(fingerprint)
    }
}
