use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Published attachment of a certificate, stored as camelCase JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDescriptor {
    #[serde(alias = "IpfsLink")]
    pub ipfs_link: String,
    #[serde(alias = "Hash")]
    pub hash: String,
    #[serde(alias = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl AttachmentDescriptor {
    pub fn from_json(raw: &str) -> Result<Option<Self>, serde_json::Error> {
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(raw).map(Some)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Content fingerprint of a published file: MD5 over the file bytes followed
/// by the UTF-8 content identifier, lower-case hex. Detects a mismatch between
/// the local file and its published copy; not a security control.
pub fn fingerprint(file_bytes: &[u8], content_id: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(file_bytes);
    hasher.update(content_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = fingerprint(b"diploma bytes", "QmCid");
        assert_eq!(a, fingerprint(b"diploma bytes", "QmCid"));
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn fingerprint_changes_with_either_input() {
        let base = fingerprint(b"diploma bytes", "QmCid");
        assert_ne!(base, fingerprint(b"diploma bytez", "QmCid"));
        assert_ne!(base, fingerprint(b"diploma bytes", "QmCie"));
    }

    #[test]
    fn fingerprint_matches_concatenation() {
        // md5("abc") is a well-known vector.
        assert_eq!(fingerprint(b"a", "bc"), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn descriptor_round_trips_through_json() {
        let d = AttachmentDescriptor {
            ipfs_link: "QmCid".to_string(),
            hash: "abc".to_string(),
            name: Some("transcript.pdf".to_string()),
        };
        let json = d.to_json();
        assert!(json.contains("\"ipfsLink\":\"QmCid\""));
        assert_eq!(AttachmentDescriptor::from_json(&json).unwrap(), Some(d));
        assert_eq!(AttachmentDescriptor::from_json("").unwrap(), None);
    }
}
