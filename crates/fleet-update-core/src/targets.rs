//! Trusted target descriptors.
//!
//! Target descriptors are treated as opaque signed values: apart from name
//! lookup and the length/hash pair used when caching a payload, nothing here
//! interprets their contents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised while parsing or validating target metadata.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The metadata document is not valid JSON of the expected shape.
    #[error("targets metadata parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// A payload does not have the length its descriptor declares.
    #[error("target '{path}' payload length mismatch (expected {expected}, got {actual})")]
    PayloadLengthMismatch {
        /// Target name.
        path: String,
        /// Length declared by the descriptor.
        expected: i64,
        /// Length of the payload that was fetched.
        actual: i64,
    },
    /// A payload digest does not match the descriptor.
    #[error("target '{path}' payload hash mismatch for '{algorithm}'")]
    PayloadHashMismatch {
        /// Target name.
        path: String,
        /// Digest algorithm that failed.
        algorithm: String,
    },
    /// The descriptor declares a digest this client cannot compute.
    #[error("unsupported hash algorithm '{algorithm}' for target validation")]
    UnsupportedHashAlgorithm {
        /// Algorithm named by the descriptor.
        algorithm: String,
    },
}

/// Description of a single trusted target as signed by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Payload length in bytes.
    pub length: i64,
    /// Digests keyed by algorithm name (typically `sha256`).
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
    /// Installer-defined metadata carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
}

/// Signed envelope of a targets metadata document.
#[derive(Debug, Deserialize)]
struct TargetsDocument {
    signed: TargetsSigned,
}

/// Signed section holding the target map.
#[derive(Debug, Deserialize)]
struct TargetsSigned {
    #[serde(default)]
    targets: BTreeMap<String, TargetDescriptor>,
}

/// Parses a serialized targets metadata document into a name → descriptor map.
pub fn parse_targets_map_from_bytes(
    bytes: &[u8],
) -> Result<BTreeMap<String, TargetDescriptor>, TargetError> {
    let document: TargetsDocument = serde_json::from_slice(bytes)?;
    Ok(document.signed.targets)
}

/// Checks a payload against the length and digests its descriptor declares.
pub fn validate_payload_bytes(
    path: &str,
    descriptor: &TargetDescriptor,
    payload: &[u8],
) -> Result<(), TargetError> {
    let actual = payload.len() as i64;
    if descriptor.length != actual {
        return Err(TargetError::PayloadLengthMismatch {
            path: path.to_string(),
            expected: descriptor.length,
            actual,
        });
    }
    for (algorithm, expected) in &descriptor.hashes {
        match algorithm.as_str() {
            "sha256" => {
                let digest = sha256_hex(payload);
                if !digest.eq_ignore_ascii_case(expected) {
                    return Err(TargetError::PayloadHashMismatch {
                        path: path.to_string(),
                        algorithm: algorithm.clone(),
                    });
                }
            }
            _ => {
                return Err(TargetError::UnsupportedHashAlgorithm {
                    algorithm: algorithm.clone(),
                })
            }
        }
    }
    Ok(())
}

/// Returns the on-disk filename for a cached target payload.
///
/// When hash prefixing is enabled the file segment is prefixed with the
/// descriptor's sha256 digest (`dir/{hash}.{file}`); descriptors without a
/// sha256 digest fall back to the plain name.
pub fn physical_target_name(path: &str, descriptor: &TargetDescriptor) -> String {
    let Some(hash) = descriptor.hashes.get("sha256") else {
        return path.to_string();
    };
    let (dir, file) = split_dir_and_file(path);
    let mut physical = String::with_capacity(dir.len() + hash.len() + 1 + file.len());
    physical.push_str(dir);
    physical.push_str(hash);
    physical.push('.');
    physical.push_str(file);
    physical
}

/// Splits a path into `directory/` (with trailing slash when present) and `file` segments.
fn split_dir_and_file(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..=idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Computes the hex-encoded SHA-256 digest of a payload.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Extracts the version number from a TUF metadata document.
pub(crate) fn meta_version(bytes: &[u8]) -> u64 {
    serde_json::from_slice::<Value>(bytes)
        .ok()
        .and_then(|value| value.pointer("/signed/version").and_then(Value::as_u64))
        .unwrap_or_default()
}
