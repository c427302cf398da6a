//! Digest-sealed JSON artifacts.
//!
//! Every artifact the harness persists is one JSON envelope:
//!
//! ```json
//! { "digest": "<hex sha256 of body>", "body": { ... } }
//! ```
//!
//! The body is kept byte-for-byte as it was serialized, so the digest is
//! checked against exactly the bytes on disk. Payload and digest live in the
//! same file and are replaced together by a single rename: a reader sees the
//! old artifact or the new one, never a mix, even across processes.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::domain::{EvalError, Result};

#[derive(Serialize, Deserialize)]
struct Envelope {
    digest: String,
    body: Box<RawValue>,
}

/// Hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Write `data` to `path` via a temp file in the same directory and rename.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Serialize `payload` into a sealed envelope. Returns the bytes and the digest.
pub fn seal<T: Serialize>(payload: &T) -> Result<(Vec<u8>, String)> {
    let body = serde_json::to_string(payload)?;
    let digest = sha256_hex(body.as_bytes());
    let envelope = Envelope {
        digest: digest.clone(),
        body: RawValue::from_string(body)?,
    };
    Ok((serde_json::to_vec_pretty(&envelope)?, digest))
}

/// Verify a sealed envelope and deserialize its body.
///
/// # Errors
///
/// `Serialization` if the bytes are not an envelope or the body does not
/// decode, `DigestMismatch` if the body was altered.
pub fn unseal<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    let body = envelope.body.get();
    let actual = sha256_hex(body.as_bytes());
    if envelope.digest != actual {
        return Err(EvalError::DigestMismatch {
            expected: envelope.digest,
            actual,
        });
    }
    Ok(serde_json::from_str(body)?)
}

/// Seal `payload` and write it to `path` atomically. Returns the digest.
pub fn write_sealed<T: Serialize>(path: &Path, payload: &T) -> Result<String> {
    let (bytes, digest) = seal(payload)?;
    write_atomic(path, &bytes)?;
    Ok(digest)
}

/// Read and verify the sealed artifact at `path`.
///
/// # Errors
///
/// `Io` if the file cannot be read; otherwise as [`unseal`].
pub fn read_sealed<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    unseal(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_write_then_read_sealed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run.json");
        let payload = json!({"ok": true, "rate": 0.1, "events": ["a", "b"]});
        let digest = write_sealed(&path, &payload).unwrap();

        let on_disk: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk["digest"], digest.as_str());
        assert_eq!(on_disk["body"], payload);
        let back: serde_json::Value = read_sealed(&path).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_tampered_body_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        write_sealed(&path, &json!({"ok": true})).unwrap();
        let text = fs::read_to_string(&path).unwrap().replace("true", "false");
        fs::write(&path, text).unwrap();
        assert!(matches!(
            read_sealed::<serde_json::Value>(&path),
            Err(EvalError::DigestMismatch { .. })
        ));
    }

    #[test]
    fn test_bare_json_is_not_an_envelope() {
        assert!(matches!(
            unseal::<serde_json::Value>(br#"{"ok":true}"#),
            Err(EvalError::Serialization(_))
        ));
    }
}
