//! Content digests of serialized snapshots.
//!
//! Remote caches re-publish on every change notification, and many of those
//! snapshots are identical to the previous one. Both ends compare digests to
//! skip redundant work.

use std::fmt;

use crate::serialize::SerializedPayload;

/// A 32-byte Blake3 digest of a serialized snapshot.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateDigest(pub [u8; 32]);

impl StateDigest {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StateDigest({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Digest of a serialized snapshot.
///
/// JSON objects are rendered with sorted keys and the meta tables are
/// ordered maps, so the digest depends only on payload content.
pub fn snapshot_digest(payload: &SerializedPayload) -> StateDigest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"cachescope-snapshot-v0:");
    hasher.update(payload.json.to_string().as_bytes());

    if let Some(meta) = &payload.meta {
        hasher.update(b":values");
        for (path, tag) in &meta.values {
            hasher.update(&(path.len() as u64).to_le_bytes());
            hasher.update(path.as_bytes());
            hasher.update(tag.as_str().as_bytes());
        }
        hasher.update(b":refs");
        for (target, sites) in &meta.referential_equalities {
            hasher.update(&(target.len() as u64).to_le_bytes());
            hasher.update(target.as_bytes());
            hasher.update(&(sites.len() as u64).to_le_bytes());
            for site in sites {
                hasher.update(&(site.len() as u64).to_le_bytes());
                hasher.update(site.as_bytes());
            }
        }
    }

    StateDigest(*hasher.finalize().as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::serialize;
    use crate::value::Value;

    #[test]
    fn test_equal_values_equal_digest() {
        let a = Value::object([("b", Value::from(1)), ("a", Value::Undefined)]);
        let b = Value::object([("a", Value::Undefined), ("b", Value::from(1))]);
        assert_eq!(snapshot_digest(&serialize(&a)), snapshot_digest(&serialize(&b)));
    }

    #[test]
    fn test_meta_changes_digest() {
        // Same json (`null`), different tag.
        let undefined = serialize(&Value::Undefined);
        let null = serialize(&Value::Null);
        assert_eq!(undefined.json, null.json);
        assert_ne!(snapshot_digest(&undefined), snapshot_digest(&null));
    }

    #[test]
    fn test_hex_roundtrip() {
        let digest = snapshot_digest(&serialize(&Value::from("x")));
        let parsed = StateDigest::from_hex(&digest.to_hex()).unwrap();
        assert_eq!(parsed, digest);
        assert_eq!(digest.to_string().len(), 16);
    }
}
