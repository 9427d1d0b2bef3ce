//! Hashing System - SHA-256 for Artifact Evidence
//!
//! Artifact files are verified against the registry by the digest of
//! their exact bytes. Build fingerprints use canonical JSON so they are
//! reproducible across runs.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Stream a file through SHA-256
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Strip an optional `sha256:` prefix and lowercase the hex
pub fn normalize_digest(digest: &str) -> String {
    let trimmed = digest.trim();
    trimmed
        .strip_prefix("sha256:")
        .unwrap_or(trimmed)
        .to_ascii_lowercase()
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    let sorted = sort_value(&v);
    to_string(&sorted)
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => {
            Value::Array(arr.iter().map(sort_value).collect())
        }
        _ => v.clone()
    }
}

/// Fingerprint of a build's inputs for the build summary
/// fingerprint = sha256(canonical_tree + ":" + registry digests + ":" + engine_version)
pub fn compute_build_fingerprint<'a>(
    normalized_tree: &Value,
    artifact_digests: impl IntoIterator<Item = (&'a str, &'a str)>,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let canonical_tree = canonical_json(normalized_tree)?;
    let digests: Vec<String> = artifact_digests
        .into_iter()
        .map(|(id, digest)| format!("{id}={digest}"))
        .collect();
    let combined = format!("{}:{}:{}", canonical_tree, digests.join(","), engine_version);
    Ok(sha256_hex(combined.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": 2, "m": 3});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_digest_matches_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"evidence").unwrap();
        assert_eq!(sha256_file(file.path()).unwrap(), sha256_hex(b"evidence"));
    }

    #[test]
    fn test_digest_spellings() {
        let hex = sha256_hex(b"abc");
        assert_eq!(normalize_digest(&hex), hex);
        assert_eq!(normalize_digest(&format!(" sha256:{} ", hex.to_uppercase())), hex);
    }

    #[test]
    fn test_fingerprint_stable() {
        let tree = json!({"blocks": [], "meta": {}});
        let a = compute_build_fingerprint(&tree, [("m", "00")], "1.0.0").unwrap();
        let b = compute_build_fingerprint(&tree, [("m", "00")], "1.0.0").unwrap();
        let c = compute_build_fingerprint(&tree, [("m", "01")], "1.0.0").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
